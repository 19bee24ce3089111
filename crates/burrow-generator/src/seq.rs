use crate::{Generator, GeneratorError};
use burrow_core::{LinkId, LINK_ID_ALPHABET, LINK_ID_LENGTH};
use std::sync::atomic::{AtomicU64, Ordering};

/// Number of distinct ids, 62^5.
const ID_SPACE: u64 = 916_132_832;

/// A deterministic generator that counts through the id space.
///
/// Produces "aaaaa", "aaaab", ... and wraps around after [`ID_SPACE`]
/// values. Useful where predictable ids matter, such as tests.
#[derive(Debug)]
pub struct SeqGenerator {
    counter: AtomicU64,
}

impl Clone for SeqGenerator {
    fn clone(&self) -> Self {
        Self {
            counter: AtomicU64::new(self.counter.load(Ordering::SeqCst)),
        }
    }
}

impl SeqGenerator {
    pub fn new() -> Self {
        Self::with_offset(0)
    }

    /// Creates a generator starting from a specific counter value.
    pub fn with_offset(offset: u64) -> Self {
        Self {
            counter: AtomicU64::new(offset),
        }
    }

    fn encode(mut value: u64) -> String {
        let base = LINK_ID_ALPHABET.len() as u64;
        let mut chars = [LINK_ID_ALPHABET[0]; LINK_ID_LENGTH];
        for slot in chars.iter_mut().rev() {
            *slot = LINK_ID_ALPHABET[(value % base) as usize];
            value /= base;
        }
        chars.iter().map(|&b| b as char).collect()
    }
}

impl Default for SeqGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl Generator for SeqGenerator {
    fn generate(&self) -> Result<LinkId, GeneratorError> {
        let count = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(LinkId::new_unchecked(Self::encode(count % ID_SPACE)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_space_matches_alphabet() {
        assert_eq!(ID_SPACE, (LINK_ID_ALPHABET.len() as u64).pow(LINK_ID_LENGTH as u32));
    }

    #[test]
    fn produces_sequential_ids() {
        let generator = SeqGenerator::new();

        assert_eq!(generator.generate().unwrap().as_str(), "aaaaa");
        assert_eq!(generator.generate().unwrap().as_str(), "aaaab");
        assert_eq!(generator.generate().unwrap().as_str(), "aaaac");
    }

    #[test]
    fn carries_into_next_position() {
        let generator = SeqGenerator::with_offset(61);

        assert_eq!(generator.generate().unwrap().as_str(), "aaaa9");
        assert_eq!(generator.generate().unwrap().as_str(), "aaaba");
    }

    #[test]
    fn wraps_around_id_space() {
        let generator = SeqGenerator::with_offset(ID_SPACE - 1);

        assert_eq!(generator.generate().unwrap().as_str(), "99999");
        assert_eq!(generator.generate().unwrap().as_str(), "aaaaa");
    }

    #[test]
    fn ids_are_valid() {
        let generator = SeqGenerator::with_offset(123_456);
        for _ in 0..100 {
            let id = generator.generate().unwrap();
            assert!(LinkId::new(id.as_str()).is_ok());
        }
    }

    #[test]
    fn clone_preserves_counter_state() {
        let generator = SeqGenerator::new();
        generator.generate().unwrap();
        generator.generate().unwrap();

        let cloned = generator.clone();

        assert_eq!(generator.generate().unwrap().as_str(), "aaaac");
        assert_eq!(cloned.generate().unwrap().as_str(), "aaaac");
    }
}
