//! Content hashing for the watcher's no-op write guard.
//!
//! Only equality matters, so any collision-resistant hash does; blake3 is
//! fast enough to hash on every debounced event.

use camino::Utf8Path;

pub type ContentHash = blake3::Hash;

pub fn content_hash(path: &Utf8Path) -> std::io::Result<ContentHash> {
    let bytes = std::fs::read(path)?;
    Ok(blake3::hash(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;

    #[test]
    fn same_bytes_same_hash() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let a = root.join("a.yaml");
        let b = root.join("b.yaml");
        std::fs::write(&a, "object: supplier\n").unwrap();
        std::fs::write(&b, "object: supplier\n").unwrap();
        assert_eq!(content_hash(&a).unwrap(), content_hash(&b).unwrap());

        std::fs::write(&b, "object: ingredient\n").unwrap();
        assert_ne!(content_hash(&a).unwrap(), content_hash(&b).unwrap());
    }
}
