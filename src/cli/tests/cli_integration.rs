//! Integration tests: drive the `skiff` binary against local archives.
//!
//! Every test runs with its own store and registries configuration, and
//! only uses the docker-archive transport, so no network is needed.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use sha2::{Digest, Sha256};
use tempfile::TempDir;

struct TestEnv {
    dir: TempDir,
}

impl TestEnv {
    fn new() -> Self {
        Self::with_search(&["docker.io", "quay.io"])
    }

    fn with_search(registries: &[&str]) -> Self {
        let dir = TempDir::new().unwrap();
        let list: Vec<String> = registries.iter().map(|r| format!("\"{r}\"")).collect();
        std::fs::write(
            dir.path().join("registries.conf"),
            format!("unqualified-search-registries = [{}]\n", list.join(", ")),
        )
        .unwrap();
        Self { dir }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn skiff(&self, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_skiff"))
            .arg("--store")
            .arg(self.path("store"))
            .args(args)
            .env("SKIFF_REGISTRIES_CONF", self.path("registries.conf"))
            .env_remove("SKIFF_STORE")
            .env_remove("SKIFF_PLATFORM")
            .env_remove("REGISTRY_AUTH_FILE")
            .output()
            .expect("failed to run skiff")
    }
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

struct ArchiveImage {
    config: Vec<u8>,
    layer: Vec<u8>,
    tags: Vec<String>,
}

impl ArchiveImage {
    fn new(name: &str, tags: &[&str]) -> Self {
        let config = serde_json::to_vec(&serde_json::json!({
            "architecture": "amd64",
            "os": "linux",
            "created": "2024-01-01T00:00:00Z",
            "config": { "Labels": { "name": name } },
            "rootfs": { "type": "layers", "diff_ids": [] },
        }))
        .unwrap();
        Self {
            config,
            layer: format!("layer of {name}").into_bytes(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
        }
    }

    fn id(&self) -> String {
        hex::encode(Sha256::digest(&self.config))
    }
}

fn append(builder: &mut tar::Builder<Vec<u8>>, name: &str, data: &[u8]) {
    let mut header = tar::Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append_data(&mut header, name, data).unwrap();
}

fn write_archive(path: &Path, images: &[&ArchiveImage]) {
    let mut builder = tar::Builder::new(Vec::new());
    let mut items = Vec::new();
    for (i, image) in images.iter().enumerate() {
        let config_name = format!("{}.json", image.id());
        let layer_name = format!("{i}/layer.tar");
        append(&mut builder, &config_name, &image.config);
        append(&mut builder, &layer_name, &image.layer);
        items.push(serde_json::json!({
            "Config": config_name,
            "RepoTags": image.tags,
            "Layers": [layer_name],
        }));
    }
    append(&mut builder, "manifest.json", &serde_json::to_vec(&items).unwrap());
    std::fs::write(path, builder.into_inner().unwrap()).unwrap();
}

fn two_image_archive(env: &TestEnv) -> (String, ArchiveImage, ArchiveImage) {
    let first = ArchiveImage::new("first", &["first:latest"]);
    let second = ArchiveImage::new("second", &["quay.io/second:v2"]);
    let path = env.path("two.tar");
    write_archive(&path, &[&first, &second]);
    (format!("docker-archive:{}", path.display()), first, second)
}

#[test]
fn test_multi_image_archive_needs_selector() {
    let env = TestEnv::new();
    let (archive, first, second) = two_image_archive(&env);

    let out = env.skiff(&["pull", "-q", &archive]);
    assert_eq!(out.status.code(), Some(125));
    assert!(stderr(&out).contains("Unexpected tar manifest.json: expected 1 item, got 2"));

    let out = env.skiff(&["pull", "-q", &format!("{archive}:@0")]);
    assert!(out.status.success(), "{}", stderr(&out));
    assert_eq!(stdout(&out).trim(), first.id());

    let out = env.skiff(&["pull", "-q", &format!("{archive}:@1")]);
    assert!(out.status.success(), "{}", stderr(&out));
    assert_eq!(stdout(&out).trim(), second.id());

    let out = env.skiff(&["pull", "-q", &format!("{archive}:@2")]);
    assert_eq!(out.status.code(), Some(125));
    assert!(stderr(&out).contains("Invalid source index @2, only 2 manifest items available"));

    let out = env.skiff(&["pull", "-q", &format!("{archive}:nope:latest")]);
    assert_eq!(out.status.code(), Some(125));
    assert!(stderr(&out).contains("nope:latest"));
    assert!(stderr(&out).contains("not found"));
}

#[test]
fn test_pull_by_archive_tag_name() {
    let env = TestEnv::new();
    let (archive, first, _) = two_image_archive(&env);

    let out = env.skiff(&["pull", &format!("{archive}:first:latest")]);
    assert!(out.status.success(), "{}", stderr(&out));
    assert!(stderr(&out).contains("Writing manifest to image destination"));
    assert_eq!(stdout(&out).trim(), first.id());

    assert!(env.skiff(&["exists", "first"]).status.success());
    assert!(env.skiff(&["exists", "docker.io/library/first:latest"]).status.success());
}

#[test]
fn test_quiet_pull_id_is_stable_across_removal() {
    let env = TestEnv::new();
    let image = ArchiveImage::new("stable", &["quay.io/stable:1"]);
    let path = env.path("stable.tar");
    write_archive(&path, &[&image]);
    let reference = format!("docker-archive:{}", path.display());

    let out = env.skiff(&["pull", "-q", &reference]);
    assert!(out.status.success(), "{}", stderr(&out));
    assert_eq!(stdout(&out), format!("{}\n", image.id()));

    let out = env.skiff(&["rmi", "quay.io/stable:1"]);
    assert!(out.status.success(), "{}", stderr(&out));
    assert!(stdout(&out).contains(&format!("Deleted: {}", image.id())));

    let out = env.skiff(&["pull", "-q", &reference]);
    assert_eq!(stdout(&out), format!("{}\n", image.id()));
}

#[test]
fn test_images_inspect_tag_untag() {
    let env = TestEnv::new();
    let (archive, _, second) = two_image_archive(&env);
    let id = second.id();
    assert!(env.skiff(&["pull", "-q", &format!("{archive}:@1")]).status.success());

    let out = env.skiff(&["images"]);
    let listing = stdout(&out);
    assert!(listing.contains("REPOSITORY"));
    assert!(listing.contains("quay.io/second"));
    assert!(listing.contains("v2"));
    assert!(listing.contains(&id[..12]));

    let out = env.skiff(&["images", "-q", "--no-trunc"]);
    assert_eq!(stdout(&out).trim(), id);

    let out = env.skiff(&["inspect", "quay.io/second:v2"]);
    assert!(out.status.success(), "{}", stderr(&out));
    let records: serde_json::Value = serde_json::from_str(&stdout(&out)).unwrap();
    assert_eq!(records[0]["Id"], id.as_str());
    assert_eq!(records[0]["Os"], "linux");
    assert_eq!(records[0]["Config"]["Labels"]["name"], "second");

    assert!(env.skiff(&["tag", &id[..12], "mine:v3"]).status.success());
    assert!(env.skiff(&["exists", "localhost/mine:v3"]).status.success());

    assert!(env.skiff(&["untag", &id]).status.success());
    assert_eq!(env.skiff(&["exists", "mine:v3"]).status.code(), Some(1));
    assert!(env.skiff(&["exists", &id]).status.success());

    let out = env.skiff(&["images"]);
    assert!(stdout(&out).contains("<none>"));

    let out = env.skiff(&["rmi", &id]);
    assert!(out.status.success(), "{}", stderr(&out));
    assert!(env.skiff(&["images", "-q"]).stdout.is_empty());
}

#[test]
fn test_exists_is_silent() {
    let env = TestEnv::new();
    let out = env.skiff(&["exists", "alpine"]);
    assert_eq!(out.status.code(), Some(1));
    assert!(!stderr(&out).contains("Error"));
}

#[test]
fn test_rmi_missing_image() {
    let env = TestEnv::new();
    let out = env.skiff(&["rmi", "alpine"]);
    assert_eq!(out.status.code(), Some(2));
    assert!(env.skiff(&["rmi", "--force", "alpine"]).status.success());
}

#[test]
fn test_missing_authfile() {
    let env = TestEnv::new();
    let (archive, _, _) = two_image_archive(&env);
    let out = env.skiff(&[
        "pull",
        "--authfile",
        "/tmp/skiff-nonexistent/auth.json",
        &format!("{archive}:@0"),
    ]);
    assert_eq!(out.status.code(), Some(3));
}

#[test]
fn test_malformed_reference() {
    let env = TestEnv::new();
    let out = env.skiff(&["pull", "Alpine"]);
    assert_eq!(out.status.code(), Some(125));
    assert!(stderr(&out).contains("Alpine"));

    let out = env.skiff(&["pull", "--all-tags", "alpine:latest"]);
    assert_eq!(out.status.code(), Some(125));
}

#[test]
fn test_short_name_without_search_registries() {
    let env = TestEnv::with_search(&[]);
    let out = env.skiff(&["pull", "alpine"]);
    assert_eq!(out.status.code(), Some(125));
    assert!(stderr(&out).contains("no unqualified-search registries"));
}
