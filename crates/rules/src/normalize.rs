use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;

/// Canonicalize text for fingerprinting: NFC composition, typographic
/// punctuation folded to ASCII, whitespace runs collapsed to single spaces,
/// leading/trailing whitespace trimmed. Idempotent.
#[must_use]
pub fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;
    for ch in text.nfc() {
        let ch = fold_punctuation(ch);
        if ch.is_whitespace() {
            // Only emit a separator once non-space content exists.
            pending_space = !out.is_empty();
            continue;
        }
        if pending_space {
            out.push(' ');
            pending_space = false;
        }
        out.push(ch);
    }
    out
}

fn fold_punctuation(ch: char) -> char {
    match ch {
        // en dash, em dash, horizontal bar, minus sign
        '\u{2013}' | '\u{2014}' | '\u{2015}' | '\u{2212}' => '-',
        // curly single quotes
        '\u{2018}' | '\u{2019}' => '\'',
        // curly double quotes
        '\u{201C}' | '\u{201D}' => '"',
        // non-breaking and narrow no-break space
        '\u{00A0}' | '\u{202F}' => ' ',
        other => other,
    }
}

/// Collision-resistant fingerprint of normalized text, suitable as a
/// persisted cache/relationship key. Stable across processes; no seed, no
/// locale dependence.
#[must_use]
pub fn fingerprint(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize(text).as_bytes());
    hex_digest(&hasher.finalize())
}

pub(crate) fn hex_digest(bytes: &[u8]) -> String {
    use std::fmt::Write as _;

    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(&mut out, "{byte:02x}");
    }
    out
}

/// Cheap non-cryptographic hash over normalized text for in-memory dedup
/// candidates. Never persisted.
#[must_use]
pub fn quick_hash(text: &str) -> u64 {
    fnv1a64(normalize(text).as_bytes())
}

fn fnv1a64(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 14_695_981_039_346_656_037;
    const PRIME: u64 = 1_099_511_628_211;
    let mut hash = OFFSET;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}
