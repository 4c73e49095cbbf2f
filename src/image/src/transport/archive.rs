//! Tarball helpers shared by the archive transports.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use skiff_core::error::{Result, SkiffError};
use tempfile::TempDir;
use xz2::read::XzDecoder;

use crate::digest::Digest;

const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];
const XZ_MAGIC: &[u8] = &[0xfd, b'7', b'z', b'X', b'Z', 0x00];

/// Compression detected from leading magic bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Compression {
    None,
    Gzip,
    Xz,
}

pub(crate) fn detect_compression(path: &Path) -> Result<Compression> {
    let mut header = [0u8; 6];
    let mut file = File::open(path)?;
    let mut read = 0;
    while read < header.len() {
        let n = file.read(&mut header[read..])?;
        if n == 0 {
            break;
        }
        read += n;
    }
    let header = &header[..read];
    Ok(if header.starts_with(XZ_MAGIC) {
        Compression::Xz
    } else if header.starts_with(GZIP_MAGIC) {
        Compression::Gzip
    } else {
        Compression::None
    })
}

/// Unpack a (possibly compressed) tarball into a fresh temporary directory.
pub(crate) fn extract(path: &Path) -> Result<TempDir> {
    let archive_err = |e: std::io::Error| {
        SkiffError::Other(format!("Failed to read archive {}: {}", path.display(), e))
    };

    let file = File::open(path).map_err(archive_err)?;
    let reader: Box<dyn Read> = match detect_compression(path)? {
        Compression::Gzip => Box::new(GzDecoder::new(BufReader::new(file))),
        Compression::Xz => Box::new(XzDecoder::new(BufReader::new(file))),
        Compression::None => Box::new(BufReader::new(file)),
    };

    let dir = TempDir::new()?;
    tar::Archive::new(reader)
        .unpack(dir.path())
        .map_err(archive_err)?;

    tracing::debug!(
        archive = %path.display(),
        target = %dir.path().display(),
        "Extracted archive"
    );
    Ok(dir)
}

/// Read a blob file and check it against `digest`.
pub(crate) fn read_verified(reference: &str, path: &Path, digest: &Digest) -> Result<Vec<u8>> {
    let data = std::fs::read(path).map_err(|e| {
        SkiffError::Other(format!("Failed to read blob {}: {}", path.display(), e))
    })?;
    digest.verify(reference, &data)?;
    Ok(data)
}

/// Absolute form of a transport path, used for `localhost/<path>` names.
pub(crate) fn absolute(path: &str) -> Result<PathBuf> {
    let p = Path::new(path);
    if p.is_absolute() {
        return Ok(p.to_path_buf());
    }
    Ok(std::env::current_dir()?.join(p))
}

/// `localhost/<absolute path>` repository for path-addressed images.
pub(crate) fn localhost_name(path: &str) -> Result<String> {
    let abs = absolute(path)?;
    let abs = abs.to_string_lossy();
    Ok(format!("localhost/{}", abs.trim_start_matches('/')))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn tar_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, data) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap()
    }

    #[test]
    fn test_extract_plain_gzip_and_xz() {
        let dir = TempDir::new().unwrap();
        let raw = tar_bytes(&[("manifest.json", b"[]")]);

        let plain = dir.path().join("a.tar");
        std::fs::write(&plain, &raw).unwrap();

        let gz = dir.path().join("a.tar.gz");
        let mut enc = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        enc.write_all(&raw).unwrap();
        std::fs::write(&gz, enc.finish().unwrap()).unwrap();

        let xz = dir.path().join("a.tar.xz");
        let mut enc = xz2::write::XzEncoder::new(Vec::new(), 6);
        enc.write_all(&raw).unwrap();
        std::fs::write(&xz, enc.finish().unwrap()).unwrap();

        assert_eq!(detect_compression(&plain).unwrap(), Compression::None);
        assert_eq!(detect_compression(&gz).unwrap(), Compression::Gzip);
        assert_eq!(detect_compression(&xz).unwrap(), Compression::Xz);

        for path in [&plain, &gz, &xz] {
            let out = extract(path).unwrap();
            assert_eq!(std::fs::read(out.path().join("manifest.json")).unwrap(), b"[]");
        }
    }

    #[test]
    fn test_extract_missing_archive() {
        assert!(extract(Path::new("/nonexistent/a.tar")).is_err());
    }

    #[test]
    fn test_read_verified() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("blob");
        std::fs::write(&path, b"data").unwrap();
        assert!(read_verified("dir:/x", &path, &Digest::of_bytes(b"data")).is_ok());
        match read_verified("dir:/x", &path, &Digest::of_bytes(b"other")) {
            Err(SkiffError::DigestMismatch { reference, .. }) => assert_eq!(reference, "dir:/x"),
            other => panic!("expected digest mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_localhost_name() {
        assert_eq!(localhost_name("/tmp/layout").unwrap(), "localhost/tmp/layout");
        assert!(localhost_name("rel/dir").unwrap().starts_with("localhost/"));
    }
}
