//! BLAKE3 hashing for templates, resource declarations and emitted files.

use std::io::Read;
use std::path::Path;

const STREAM_BUF_SIZE: usize = 65536;

/// Hash a file's contents. Returns `"blake3:{hex}"`.
pub fn hash_file(path: &Path) -> Result<String, String> {
    let mut file =
        std::fs::File::open(path).map_err(|e| format!("cannot open {}: {}", path.display(), e))?;
    let mut hasher = blake3::Hasher::new();
    let mut buf = [0u8; STREAM_BUF_SIZE];
    loop {
        let n = file
            .read(&mut buf)
            .map_err(|e| format!("read error {}: {}", path.display(), e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("blake3:{}", hasher.finalize().to_hex()))
}

/// Hash a string. Returns `"blake3:{hex}"`.
pub fn hash_string(s: &str) -> String {
    format!("blake3:{}", blake3::hash(s.as_bytes()).to_hex())
}

/// Hash the compact JSON form of a value. Object keys keep their insertion
/// order, so two declarations built the same way hash the same.
pub fn hash_json<T: serde::Serialize>(value: &T) -> Result<String, String> {
    let json = serde_json::to_string(value).map_err(|e| format!("JSON serialize error: {}", e))?;
    Ok(hash_string(&json))
}

/// Compute a composite hash from multiple component hashes.
pub fn composite_hash(components: &[&str]) -> String {
    let mut hasher = blake3::Hasher::new();
    for c in components {
        hasher.update(c.as_bytes());
        hasher.update(b"\0");
    }
    format!("blake3:{}", hasher.finalize().to_hex())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_hash_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("CommonStack.template.json");
        std::fs::write(&path, "{}").unwrap();
        let h = hash_file(&path).unwrap();
        assert!(h.starts_with("blake3:"));
        assert_eq!(h.len(), 7 + 64);
        assert_eq!(h, hash_string("{}"));
    }

    #[test]
    fn test_hash_file_not_found() {
        assert!(hash_file(Path::new("/nonexistent/template.json")).is_err());
    }

    #[test]
    fn test_hash_string() {
        assert_eq!(hash_string("hello"), hash_string("hello"));
        assert_ne!(hash_string("hello"), hash_string("world"));
    }

    #[test]
    fn test_hash_json_tracks_content() {
        let a = hash_json(&json!({"Type": "AWS::S3::Bucket", "Properties": {}})).unwrap();
        let b = hash_json(&json!({"Type": "AWS::S3::Bucket", "Properties": {}})).unwrap();
        let c = hash_json(&json!({"Type": "AWS::S3::Bucket", "Properties": {"X": 1}})).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_composite_hash_is_ordered() {
        let h = composite_hash(&["blake3:aaa", "blake3:bbb"]);
        assert!(h.starts_with("blake3:"));
        assert_ne!(h, composite_hash(&["blake3:bbb", "blake3:aaa"]));
    }
}
