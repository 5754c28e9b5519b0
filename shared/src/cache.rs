//! Per-connection signature cache.
//!
//! Both ends of a connection push the same signatures in the same order, so
//! slot numbers agree and a previously transmitted signature can be referenced
//! by its slot instead of its bytes. Slot numbers mean nothing outside the
//! connection that produced them.

use std::collections::{HashSet, VecDeque};

use crate::signature::MessageSignature;

pub const DEFAULT_CAPACITY: usize = 128;

#[derive(Debug, Clone)]
pub struct MessageSignatureCache {
    entries: Box<[Option<MessageSignature>]>,
}

impl MessageSignatureCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: vec![None; capacity].into_boxed_slice(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Returns the slot holding `signature`, if any.
    pub fn pack(&self, signature: &MessageSignature) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| entry.as_ref() == Some(signature))
    }

    pub fn unpack(&self, slot: usize) -> Option<MessageSignature> {
        self.entries.get(slot).copied().flatten()
    }

    /// Merges a message's last-seen signatures and its own signature.
    ///
    /// The batch is written from slot 0, newest first. A displaced entry that
    /// is not part of the batch is re-queued behind the remaining batch, so it
    /// lands in a later slot; whatever does not fit is dropped.
    pub fn push(&mut self, last_seen: &[MessageSignature], own: Option<MessageSignature>) {
        let mut pending: VecDeque<MessageSignature> = last_seen.iter().copied().collect();
        pending.extend(own);

        let batch: HashSet<MessageSignature> = pending.iter().copied().collect();

        for slot in self.entries.iter_mut() {
            let Some(next) = pending.pop_back() else {
                break;
            };
            if let Some(previous) = slot.replace(next) {
                if !batch.contains(&previous) {
                    pending.push_front(previous);
                }
            }
        }
    }
}

impl Default for MessageSignatureCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig(id: u8) -> MessageSignature {
        MessageSignature::from_bytes([id; 64])
    }

    #[test]
    fn test_pack_unpack_after_push() {
        let mut cache = MessageSignatureCache::default();
        cache.push(&[sig(1)], None);

        let slot = cache.pack(&sig(1)).unwrap();
        assert_eq!(cache.unpack(slot), Some(sig(1)));
    }

    #[test]
    fn test_pack_unknown_signature() {
        let mut cache = MessageSignatureCache::default();
        assert_eq!(cache.pack(&sig(1)), None);

        cache.push(&[sig(2), sig(3)], Some(sig(4)));
        assert_eq!(cache.pack(&sig(1)), None);
    }

    #[test]
    fn test_unpack_empty_or_out_of_range_slot() {
        let cache = MessageSignatureCache::new(4);
        assert_eq!(cache.unpack(0), None);
        assert_eq!(cache.unpack(4), None);
        assert_eq!(cache.unpack(usize::MAX), None);
    }

    #[test]
    fn test_newest_signature_lands_in_slot_zero() {
        let mut cache = MessageSignatureCache::default();
        cache.push(&[sig(1), sig(2)], Some(sig(3)));

        assert_eq!(cache.unpack(0), Some(sig(3)));
        assert_eq!(cache.unpack(1), Some(sig(2)));
        assert_eq!(cache.unpack(2), Some(sig(1)));
        assert_eq!(cache.unpack(3), None);
    }

    #[test]
    fn test_batch_front_survivors_back() {
        let mut cache = MessageSignatureCache::new(2);
        cache.push(&[sig(b'A'), sig(b'B')], None);
        assert_eq!(cache.unpack(0), Some(sig(b'B')));
        assert_eq!(cache.unpack(1), Some(sig(b'A')));

        cache.push(&[sig(b'C')], None);
        assert_eq!(cache.unpack(0), Some(sig(b'C')));
        assert_eq!(cache.unpack(1), Some(sig(b'B')));
        assert_eq!(cache.pack(&sig(b'A')), None);
    }

    #[test]
    fn test_repushed_signature_moves_forward_without_duplicates() {
        let mut cache = MessageSignatureCache::default();
        cache.push(&[sig(1), sig(2), sig(3)], None);
        cache.push(&[sig(1)], Some(sig(4)));

        assert_eq!(cache.unpack(0), Some(sig(4)));
        assert_eq!(cache.unpack(1), Some(sig(1)));
        assert_eq!(cache.unpack(2), Some(sig(3)));
        assert_eq!(cache.unpack(3), Some(sig(2)));
        assert_eq!(cache.unpack(4), None);
    }

    #[test]
    fn test_capacity_bounds_entries() {
        let mut cache = MessageSignatureCache::new(3);
        let batch: Vec<MessageSignature> = (0..10).map(sig).collect();
        cache.push(&batch, None);

        assert_eq!(cache.unpack(0), Some(sig(9)));
        assert_eq!(cache.unpack(2), Some(sig(7)));
        assert_eq!(cache.pack(&sig(0)), None);
    }
}
