use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of `data`.
pub fn hex_digest(data: impl AsRef<[u8]>) -> String {
    format!("{:x}", Sha256::digest(data.as_ref()))
}

/// Hashes several content keys into one. The order of `keys` matters, and a
/// separator is hashed between keys so `["ab", "c"]` and `["a", "bc"]` differ.
pub fn combined_digest<I, S>(keys: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut hasher = Sha256::new();
    for key in keys {
        hasher.update(key.as_ref().as_bytes());
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_digest() {
        assert_eq!(
            hex_digest("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_combined_digest_separates_keys() {
        assert_ne!(combined_digest(["ab", "c"]), combined_digest(["a", "bc"]));
        assert_eq!(combined_digest(["a", "b"]), combined_digest(vec!["a", "b"]));
    }
}
