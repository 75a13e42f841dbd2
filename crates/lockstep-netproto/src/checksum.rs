//! State checksum used by desync audits.
//!
//! Order-sensitive multiplicative rolling hash over UTF-16 code units, so
//! that peers built on different runtimes agree on the value for the same
//! serialized state text.

const SEED: u64 = 3_074_457_345_618_258_791;
const MULTIPLIER: u64 = 3_074_457_345_618_258_799;

pub fn state_hash(text: &str) -> u64 {
    text.encode_utf16().fold(SEED, |h, unit| {
        h.wrapping_add(u64::from(unit)).wrapping_mul(MULTIPLIER)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_hashes_to_seed() {
        assert_eq!(state_hash(""), SEED);
    }

    #[test]
    fn single_char_matches_formula() {
        let expected = SEED.wrapping_add(u64::from(b'a')).wrapping_mul(MULTIPLIER);
        assert_eq!(state_hash("a"), expected);
    }

    #[test]
    fn order_sensitive() {
        assert_ne!(state_hash("ab"), state_hash("ba"));
        assert_eq!(state_hash("lockstep"), state_hash("lockstep"));
    }

    #[test]
    fn hashes_utf16_units() {
        // U+1F600 is a surrogate pair: two units, not one scalar.
        let manual = [0xD83Du16, 0xDE00]
            .iter()
            .fold(SEED, |h, &u| h.wrapping_add(u64::from(u)).wrapping_mul(MULTIPLIER));
        assert_eq!(state_hash("\u{1F600}"), manual);
    }
}
