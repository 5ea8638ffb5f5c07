//! # Internal Key Format
//!
//! Key of the write buffer: the primary key plus the sequence number of the
//! write.
//!
//! ## Ordering
//!
//! InternalKeys are ordered by:
//! 1. user_key (ascending, bytewise)
//! 2. sequence (descending - newer first)

use std::cmp::Ordering;

/// Internal key used in the write buffer.
///
/// Ordering the newest version of a key first lets a forward scan see every
/// version of one key contiguously, latest to oldest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InternalKey {
    user_key: Vec<u8>,
    sequence: u64,
}

impl InternalKey {
    /// Creates a new InternalKey.
    pub fn new(user_key: Vec<u8>, sequence: u64) -> Self {
        Self { user_key, sequence }
    }

    /// Returns the user key.
    pub fn user_key(&self) -> &[u8] {
        &self.user_key
    }

    /// Returns the sequence number.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

impl PartialOrd for InternalKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for InternalKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.user_key.cmp(&other.user_key) {
            Ordering::Equal => other.sequence.cmp(&self.sequence),
            other_ordering => other_ordering,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_internal_key_ordering_by_user_key() {
        let key1 = InternalKey::new(b"a".to_vec(), 100);
        let key2 = InternalKey::new(b"b".to_vec(), 1);

        assert!(key1 < key2);
    }

    #[test]
    fn test_internal_key_ordering_by_sequence() {
        // Higher sequence should come first (descending order)
        let key1 = InternalKey::new(b"key".to_vec(), 100);
        let key2 = InternalKey::new(b"key".to_vec(), 50);

        assert!(key1 < key2);
    }

    #[test]
    fn test_internal_key_complete_ordering() {
        let mut keys = [
            InternalKey::new(b"key2".to_vec(), 100),
            InternalKey::new(b"key1".to_vec(), 50),
            InternalKey::new(b"key1".to_vec(), 150),
            InternalKey::new(b"key1".to_vec(), 100),
        ];
        keys.sort();

        let order: Vec<_> = keys.iter().map(|k| (k.user_key().to_vec(), k.sequence())).collect();
        assert_eq!(
            order,
            vec![
                (b"key1".to_vec(), 150),
                (b"key1".to_vec(), 100),
                (b"key1".to_vec(), 50),
                (b"key2".to_vec(), 100),
            ]
        );
    }
}
