use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use crate::model::{ObjectKind, WatchedObject};

pub fn digest_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

pub fn hash_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Does the live path still match the trusted state?
///
/// Directory markers only need to exist. Content objects are hashed in full;
/// an unreadable path counts as drift.
pub fn check_file(obj: &WatchedObject) -> bool {
    match obj.kind() {
        ObjectKind::Directory => obj.path().is_dir(),
        ObjectKind::Content => match hash_file(obj.path()) {
            Ok(actual) => Some(actual.as_str()) == obj.digest(),
            Err(_) => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn streaming_hash_matches_in_memory_digest() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("big");
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        fs::write(&path, &data).unwrap();
        assert_eq!(hash_file(&path).unwrap(), digest_hex(&data));
    }

    #[test]
    fn known_digest() {
        assert_eq!(
            digest_hex(b"hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }
}
