//! Registry credentials.
//!
//! Reads docker-style auth files (`{"auths": {"quay.io": {"auth": "<base64 user:pass>"}}}`)
//! named by `--authfile` or `$REGISTRY_AUTH_FILE`, falling back to
//! `REGISTRY_USERNAME` / `REGISTRY_PASSWORD`, then anonymous access.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use base64::Engine;
use oci_distribution::secrets::RegistryAuth as OciRegistryAuth;
use serde::Deserialize;
use skiff_core::error::{Result, SkiffError};

use crate::reference::normalize_authority;

/// Authentication credentials for a container registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryAuth {
    username: Option<String>,
    password: Option<String>,
}

impl RegistryAuth {
    /// Create anonymous authentication (no credentials).
    pub fn anonymous() -> Self {
        Self {
            username: None,
            password: None,
        }
    }

    /// Create basic authentication with username and password.
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    /// Reads `REGISTRY_USERNAME` and `REGISTRY_PASSWORD`.
    /// Falls back to anonymous if either is unset.
    pub fn from_env() -> Self {
        match (
            std::env::var("REGISTRY_USERNAME").ok(),
            std::env::var("REGISTRY_PASSWORD").ok(),
        ) {
            (Some(u), Some(p)) => Self::basic(u, p),
            _ => Self::anonymous(),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.username.is_none()
    }

    pub(crate) fn to_oci_auth(&self) -> OciRegistryAuth {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => OciRegistryAuth::Basic(u.clone(), p.clone()),
            _ => OciRegistryAuth::Anonymous,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct AuthFileContent {
    #[serde(default)]
    auths: HashMap<String, AuthEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct AuthEntry {
    #[serde(default)]
    auth: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

/// A parsed auth file.
#[derive(Debug, Clone, Default)]
pub struct AuthFile {
    path: PathBuf,
    auths: HashMap<String, (String, String)>,
}

impl AuthFile {
    /// Load an auth file. A missing or unparseable file is an error.
    pub fn load(path: &Path) -> Result<Self> {
        let auth_err = |message: String| SkiffError::AuthFile {
            path: path.display().to_string(),
            message,
        };

        let data = std::fs::read_to_string(path).map_err(|e| auth_err(e.to_string()))?;
        let content: AuthFileContent =
            serde_json::from_str(&data).map_err(|e| auth_err(e.to_string()))?;

        let mut auths = HashMap::new();
        for (key, entry) in content.auths {
            let creds = match (&entry.auth, entry.username, entry.password) {
                (Some(encoded), _, _) if !encoded.is_empty() => {
                    decode_basic(encoded).map_err(|m| auth_err(format!("{}: {}", key, m)))?
                }
                (_, Some(u), Some(p)) => (u, p),
                _ => continue,
            };
            auths.insert(normalize_registry(&key), creds);
        }

        Ok(Self {
            path: path.to_path_buf(),
            auths,
        })
    }

    /// `$REGISTRY_AUTH_FILE` when set.
    pub fn env_path() -> Option<PathBuf> {
        std::env::var("REGISTRY_AUTH_FILE")
            .ok()
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Credentials for a registry host.
    pub fn get(&self, registry: &str) -> Option<(String, String)> {
        self.auths.get(&normalize_registry(registry)).cloned()
    }
}

/// Resolves credentials per registry.
#[derive(Debug, Clone, Default)]
pub struct AuthResolver {
    file: Option<AuthFile>,
}

impl AuthResolver {
    /// Use an explicit auth file, else `$REGISTRY_AUTH_FILE`, else none.
    pub fn new(authfile: Option<&Path>) -> Result<Self> {
        let path = authfile.map(Path::to_path_buf).or_else(AuthFile::env_path);
        let file = path.as_deref().map(AuthFile::load).transpose()?;
        Ok(Self { file })
    }

    pub fn from_file(file: AuthFile) -> Self {
        Self { file: Some(file) }
    }

    /// Auth file entry, then environment variables, then anonymous.
    pub fn for_registry(&self, registry: &str) -> RegistryAuth {
        if let Some((u, p)) = self.file.as_ref().and_then(|f| f.get(registry)) {
            return RegistryAuth::basic(u, p);
        }
        RegistryAuth::from_env()
    }
}

fn decode_basic(encoded: &str) -> std::result::Result<(String, String), String> {
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| format!("invalid base64 auth: {}", e))?;
    let decoded = String::from_utf8(decoded).map_err(|e| format!("invalid auth: {}", e))?;
    let (user, pass) = decoded
        .split_once(':')
        .ok_or_else(|| "auth is not in user:password form".to_string())?;
    Ok((user.to_string(), pass.to_string()))
}

/// Reduce an auth-file key (`https://index.docker.io/v1/`, `quay.io/org`) to a host.
fn normalize_registry(registry: &str) -> String {
    let r = registry.trim().to_lowercase();
    let r = r
        .strip_prefix("https://")
        .or_else(|| r.strip_prefix("http://"))
        .unwrap_or(&r);
    let host = r.split('/').next().unwrap_or(r);
    normalize_authority(host)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn encode(s: &str) -> String {
        base64::engine::general_purpose::STANDARD.encode(s)
    }

    fn write_authfile(dir: &TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("auth.json");
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_registry_auth_to_oci() {
        assert!(matches!(
            RegistryAuth::anonymous().to_oci_auth(),
            OciRegistryAuth::Anonymous
        ));
        assert!(matches!(
            RegistryAuth::basic("user", "pass").to_oci_auth(),
            OciRegistryAuth::Basic(_, _)
        ));
        assert!(RegistryAuth::anonymous().is_anonymous());
    }

    #[test]
    fn test_load_auth_file() {
        let dir = TempDir::new().unwrap();
        let path = write_authfile(
            &dir,
            &format!(
                r#"{{"auths": {{"quay.io": {{"auth": "{}"}}, "https://index.docker.io/v1/": {{"auth": "{}"}}}}}}"#,
                encode("alice:secret"),
                encode("bob:hunter2")
            ),
        );
        let file = AuthFile::load(&path).unwrap();
        assert_eq!(
            file.get("quay.io"),
            Some(("alice".to_string(), "secret".to_string()))
        );
        assert_eq!(
            file.get("docker.io"),
            Some(("bob".to_string(), "hunter2".to_string()))
        );
        assert_eq!(file.get("ghcr.io"), None);
        assert_eq!(file.path(), path.as_path());
    }

    #[test]
    fn test_load_username_password_entry() {
        let dir = TempDir::new().unwrap();
        let path = write_authfile(
            &dir,
            r#"{"auths": {"ghcr.io": {"username": "u", "password": "p"}}}"#,
        );
        let file = AuthFile::load(&path).unwrap();
        assert_eq!(file.get("ghcr.io"), Some(("u".to_string(), "p".to_string())));
    }

    #[test]
    fn test_missing_auth_file_is_error() {
        let err = AuthFile::load(Path::new("/tmp/nonexist/auth.json")).unwrap_err();
        assert!(matches!(err, SkiffError::AuthFile { .. }));
        assert_eq!(err.exit_code(), skiff_core::error::EXIT_AUTH_FILE);
    }

    #[test]
    fn test_unparseable_auth_file_is_error() {
        let dir = TempDir::new().unwrap();
        let path = write_authfile(&dir, "{ not json");
        assert!(matches!(
            AuthFile::load(&path),
            Err(SkiffError::AuthFile { .. })
        ));
    }

    #[test]
    fn test_bad_base64_is_error() {
        let dir = TempDir::new().unwrap();
        let path = write_authfile(&dir, r#"{"auths": {"quay.io": {"auth": "!!!"}}}"#);
        assert!(matches!(
            AuthFile::load(&path),
            Err(SkiffError::AuthFile { .. })
        ));
    }

    #[test]
    fn test_resolver_prefers_file() {
        let dir = TempDir::new().unwrap();
        let path = write_authfile(
            &dir,
            &format!(r#"{{"auths": {{"quay.io": {{"auth": "{}"}}}}}}"#, encode("a:b")),
        );
        let resolver = AuthResolver::new(Some(&path)).unwrap();
        assert_eq!(resolver.for_registry("quay.io"), RegistryAuth::basic("a", "b"));
    }

    #[test]
    fn test_resolver_missing_explicit_file() {
        let result = AuthResolver::new(Some(Path::new("/tmp/nonexist")));
        assert!(matches!(result, Err(SkiffError::AuthFile { .. })));
    }

    #[test]
    fn test_normalize_registry() {
        assert_eq!(normalize_registry("https://index.docker.io/v1/"), "docker.io");
        assert_eq!(normalize_registry("Quay.io/org/repo"), "quay.io");
        assert_eq!(normalize_registry("localhost:5000"), "localhost:5000");
    }
}
