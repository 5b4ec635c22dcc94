//! NID encoding for dynamic symbol names.
//!
//! The runtime does not resolve symbols by plain name. Each name is reduced
//! to a short identifier: the first 8 bytes of `SHA1(name || suffix_key)`,
//! byte-swapped, base64-encoded with the trailing pad stripped and `/`
//! replaced by `-`, then tagged with library- and module-index characters:
//! `<hash>#<lib>#<mod>`.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha1::{Digest, Sha1};

use crate::abi::{INDEX_ENCODING_TABLE, NID_SUFFIX_KEY};

/// Prefix that smuggles a literal NID through a symbol name.
const LITERAL_PREFIX: &str = "__PS4_NID_";

/// Hash a symbol name into its 11-character NID form.
pub fn hash(symbol: &str) -> String {
    let suffix = hex::decode(NID_SUFFIX_KEY).unwrap();

    let mut hasher = Sha1::new();
    hasher.update(symbol.as_bytes());
    hasher.update(&suffix);
    let digest = hasher.finalize();

    // The runtime reads the leading 8 digest bytes as a big-endian word and
    // stores it little-endian, so the bytes reverse before encoding.
    let mut word = [0u8; 8];
    word.copy_from_slice(&digest[..8]);
    word.reverse();

    let mut encoded = STANDARD.encode(word);
    encoded.truncate(encoded.len() - 1);
    encoded.replace('/', "-")
}

/// Build a full NID string-table entry (without the terminating NUL).
///
/// Ids index the 64-character encoding alphabet; callers assign them 1-based
/// and keep them below 64. A `__PS4_NID_` name bypasses hashing and emits the
/// literal after the marker, with `_plus`/`_minus` standing in for `+`/`-`.
pub fn encode(symbol: &str, library_id: usize, module_id: usize) -> String {
    let nid = match symbol.split_once("_NID_") {
        Some((_, literal)) if symbol.starts_with(LITERAL_PREFIX) => {
            literal.replace("_plus", "+").replace("_minus", "-")
        }
        _ => hash(symbol),
    };

    let library_char = INDEX_ENCODING_TABLE[library_id] as char;
    let module_char = INDEX_ENCODING_TABLE[module_id] as char;
    format!("{nid}#{library_char}#{module_char}")
}
