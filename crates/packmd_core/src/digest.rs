use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};

/// Hex SHA-256 of the file's full contents.
pub fn digest_file(path: &Path) -> Result<String> {
    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    Ok(digest_bytes(&bytes))
}

pub fn digest_bytes(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut output = String::with_capacity(digest.len() * 2);
    for byte in digest {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::{digest_bytes, digest_file};

    #[test]
    fn digest_is_stable_hex() {
        assert_eq!(
            digest_bytes(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn identical_files_share_a_digest() {
        let temp = tempdir().expect("tempdir");
        let first = temp.path().join("a.png");
        let second = temp.path().join("b.png");
        fs::write(&first, b"same bytes").expect("write a");
        fs::write(&second, b"same bytes").expect("write b");
        assert_eq!(
            digest_file(&first).expect("digest a"),
            digest_file(&second).expect("digest b")
        );
    }

    #[test]
    fn missing_file_reports_path() {
        let temp = tempdir().expect("tempdir");
        let error = digest_file(&temp.path().join("nope.png")).expect_err("must fail");
        assert!(error.to_string().contains("nope.png"));
    }
}
