use crate::bencode::BencodeValue;
use sha1::Digest;
use sha1::Sha1;
use std::collections::HashMap;

/// Calculates the SHA-1 hash of a canonically re-encoded info dictionary.
///
/// The `info_hash` is the torrent's identity on trackers and peers: it must
/// be stable across runs, so the dictionary is re-encoded with keys in
/// ascending byte order before hashing rather than hashed from its original
/// byte range.
///
/// # Example
/// For an info dict that canonically encodes to
/// `d6:lengthi12e4:name4:file12:piece lengthi8e6:pieces20:<20 bytes>e`,
/// this returns the SHA-1 digest of those exact bytes.
pub fn calculate_info_hash(info_dict: &HashMap<Vec<u8>, BencodeValue>) -> [u8; 20] {
    let buffer = crate::bencode::encode(&BencodeValue::Dict(info_dict.clone()));

    let mut hasher = Sha1::new();
    hasher.update(&buffer);
    let digest = hasher.finalize();

    let mut info_hash = [0u8; 20];
    info_hash.copy_from_slice(&digest);
    info_hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashes_canonical_encoding() {
        let mut dict = HashMap::new();
        dict.insert(b"length".to_vec(), BencodeValue::Integer(12));
        dict.insert(b"name".to_vec(), BencodeValue::String(b"file".to_vec()));
        dict.insert(b"piece length".to_vec(), BencodeValue::Integer(8));
        dict.insert(b"pieces".to_vec(), BencodeValue::String(vec![0u8; 20]));

        let hash = calculate_info_hash(&dict);

        let mut expected_input = Vec::new();
        expected_input.extend_from_slice(b"d6:lengthi12e4:name4:file12:piece lengthi8e6:pieces20:");
        expected_input.extend_from_slice(&[0u8; 20]);
        expected_input.extend_from_slice(b"e");

        let mut hasher = Sha1::new();
        hasher.update(&expected_input);
        let expected: [u8; 20] = hasher.finalize().into();

        assert_eq!(hash, expected);
    }

    #[test]
    fn is_deterministic_regardless_of_insertion_order() {
        let mut a = HashMap::new();
        a.insert(b"a".to_vec(), BencodeValue::Integer(1));
        a.insert(b"b".to_vec(), BencodeValue::Integer(2));

        let mut b = HashMap::new();
        b.insert(b"b".to_vec(), BencodeValue::Integer(2));
        b.insert(b"a".to_vec(), BencodeValue::Integer(1));

        assert_eq!(calculate_info_hash(&a), calculate_info_hash(&b));
    }
}
