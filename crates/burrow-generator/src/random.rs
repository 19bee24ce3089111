use crate::{Generator, GeneratorError};
use burrow_core::{LinkId, LINK_ID_ALPHABET, LINK_ID_LENGTH};
use parking_lot::Mutex;
use rand::rngs::OsRng;
use rand::TryRngCore;

/// Largest multiple of the alphabet size that fits in a byte. Bytes at or
/// above it are rejected so every character is equally likely.
const ACCEPT_BELOW: u8 = (u8::MAX as usize / LINK_ID_ALPHABET.len() * LINK_ID_ALPHABET.len()) as u8;

/// Draws ids uniformly at random from [`LINK_ID_ALPHABET`].
///
/// The default source is the operating system CSPRNG. A failing source
/// surfaces as [`GeneratorError::Entropy`]; a partial id is never returned.
pub struct RandomGenerator<R = OsRng> {
    source: Mutex<R>,
}

impl RandomGenerator<OsRng> {
    pub fn new() -> Self {
        Self::with_source(OsRng)
    }
}

impl Default for RandomGenerator<OsRng> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> RandomGenerator<R>
where
    R: TryRngCore + Send + 'static,
{
    /// Creates a generator drawing from a custom entropy source.
    pub fn with_source(source: R) -> Self {
        Self {
            source: Mutex::new(source),
        }
    }
}

impl<R> std::fmt::Debug for RandomGenerator<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RandomGenerator").finish_non_exhaustive()
    }
}

impl<R> Generator for RandomGenerator<R>
where
    R: TryRngCore + Send + 'static,
{
    fn generate(&self) -> Result<LinkId, GeneratorError> {
        let mut source = self.source.lock();
        let mut id = String::with_capacity(LINK_ID_LENGTH);
        let mut buf = [0u8; 2 * LINK_ID_LENGTH];

        while id.len() < LINK_ID_LENGTH {
            source
                .try_fill_bytes(&mut buf)
                .map_err(|e| GeneratorError::Entropy(e.to_string()))?;

            for byte in buf.iter().copied().filter(|b| *b < ACCEPT_BELOW) {
                let index = byte as usize % LINK_ID_ALPHABET.len();
                id.push(LINK_ID_ALPHABET[index] as char);
                if id.len() == LINK_ID_LENGTH {
                    break;
                }
            }
        }

        Ok(LinkId::new_unchecked(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    /// Yields a fixed byte pattern, cycling.
    struct PatternRng {
        pattern: Vec<u8>,
        pos: usize,
    }

    impl TryRngCore for PatternRng {
        type Error = std::io::Error;

        fn try_next_u32(&mut self) -> Result<u32, Self::Error> {
            let mut bytes = [0u8; 4];
            self.try_fill_bytes(&mut bytes)?;
            Ok(u32::from_le_bytes(bytes))
        }

        fn try_next_u64(&mut self) -> Result<u64, Self::Error> {
            let mut bytes = [0u8; 8];
            self.try_fill_bytes(&mut bytes)?;
            Ok(u64::from_le_bytes(bytes))
        }

        fn try_fill_bytes(&mut self, dst: &mut [u8]) -> Result<(), Self::Error> {
            for b in dst {
                *b = self.pattern[self.pos % self.pattern.len()];
                self.pos += 1;
            }
            Ok(())
        }
    }

    struct BrokenRng;

    impl TryRngCore for BrokenRng {
        type Error = std::io::Error;

        fn try_next_u32(&mut self) -> Result<u32, Self::Error> {
            Err(std::io::Error::other("no entropy"))
        }

        fn try_next_u64(&mut self) -> Result<u64, Self::Error> {
            Err(std::io::Error::other("no entropy"))
        }

        fn try_fill_bytes(&mut self, _dst: &mut [u8]) -> Result<(), Self::Error> {
            Err(std::io::Error::other("no entropy"))
        }
    }

    #[test]
    fn accept_bound_is_multiple_of_alphabet() {
        assert_eq!(ACCEPT_BELOW, 248);
        assert_eq!(ACCEPT_BELOW as usize % LINK_ID_ALPHABET.len(), 0);
    }

    #[test]
    fn os_generator_produces_valid_ids() {
        let generator = RandomGenerator::new();
        for _ in 0..1_000 {
            let id = generator.generate().unwrap();
            assert!(LinkId::new(id.as_str()).is_ok(), "malformed id {id}");
        }
    }

    #[test]
    fn os_generator_spreads_ids() {
        let generator = RandomGenerator::new();
        let ids: HashSet<_> = (0..200).map(|_| generator.generate().unwrap()).collect();
        // 62^5 possible ids; 200 draws colliding en masse means a broken source.
        assert!(ids.len() > 190);
    }

    #[test]
    fn maps_bytes_onto_alphabet() {
        let generator = RandomGenerator::with_source(PatternRng {
            pattern: vec![0, 1, 26, 61, 62],
            pos: 0,
        });
        // 62 wraps to index 0.
        assert_eq!(generator.generate().unwrap().as_str(), "abA9a");
    }

    #[test]
    fn rejects_biased_bytes() {
        let generator = RandomGenerator::with_source(PatternRng {
            pattern: vec![255, 248, 1],
            pos: 0,
        });
        assert_eq!(generator.generate().unwrap().as_str(), "bbbbb");
    }

    #[test]
    fn entropy_failure_is_reported() {
        let generator = RandomGenerator::with_source(BrokenRng);
        let err = generator.generate().unwrap_err();
        assert!(matches!(err, GeneratorError::Entropy(_)));
    }

    #[test]
    fn generator_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<RandomGenerator>();
    }
}
