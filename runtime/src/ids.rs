//! Correlation-id generation
//!
//! Ids are short base-36 tokens. They are not cryptographic and only need to
//! be unique enough within one rendering pass; at the default length of five
//! characters there are 36^5 (about 60 million) possible tokens.

use async_taxi_core::action::CorrelationId;
use async_taxi_core::environment::IdGenerator;
use rand::Rng;

/// Default token length
pub const DEFAULT_ID_LENGTH: usize = 5;

const ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Random base-36 correlation ids
#[derive(Debug, Clone, Copy)]
pub struct RandomIdGenerator {
    length: usize,
}

impl RandomIdGenerator {
    /// Generator producing [`DEFAULT_ID_LENGTH`]-character ids
    #[must_use]
    pub const fn new() -> Self {
        Self {
            length: DEFAULT_ID_LENGTH,
        }
    }

    /// Generator producing ids of `length` characters (at least one)
    #[must_use]
    pub const fn with_length(length: usize) -> Self {
        Self {
            length: if length == 0 { 1 } else { length },
        }
    }

    /// Configured token length
    #[must_use]
    pub const fn length(&self) -> usize {
        self.length
    }
}

impl Default for RandomIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator for RandomIdGenerator {
    fn next_id(&self) -> CorrelationId {
        let mut rng = rand::thread_rng();
        let token: String = (0..self.length)
            .map(|_| char::from(ALPHABET[rng.gen_range(0..ALPHABET.len())]))
            .collect();
        CorrelationId::new(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn ids_use_base36_alphabet() {
        let ids = RandomIdGenerator::new();

        for _ in 0..100 {
            let id = ids.next_id();
            assert_eq!(id.as_str().len(), DEFAULT_ID_LENGTH);
            assert!(id
                .as_str()
                .chars()
                .all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
        }
    }

    #[test]
    fn length_is_configurable() {
        assert_eq!(RandomIdGenerator::with_length(8).next_id().as_str().len(), 8);
        assert_eq!(RandomIdGenerator::with_length(0).length(), 1);
    }

    #[test]
    fn ids_are_unique_enough_for_one_pass() {
        let ids = RandomIdGenerator::with_length(8);

        let distinct: HashSet<_> = (0..1_000).map(|_| ids.next_id()).collect();

        assert_eq!(distinct.len(), 1_000);
    }
}
