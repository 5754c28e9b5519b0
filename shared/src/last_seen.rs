//! Last-seen acknowledgement window.
//!
//! The client tracks which relayed messages it displayed and tells the server
//! with a compact [`LastSeenUpdate`]. The server mirrors the window in a
//! [`LastSeenMessagesValidator`] and rebuilds the exact signature list the
//! client signed over, so it cannot hide a message without the signature
//! check failing.

use log::debug;

use crate::body::LastSeenMessages;
use crate::codec::{CodecResult, PacketReader, PacketWriter};
use crate::error::{ChatError, Result};
use crate::signature::MessageSignature;
use crate::LAST_SEEN_WINDOW_SIZE;

/// A signature in the window. `pending` until it has been acknowledged once.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LastSeenTrackedEntry {
    pub signature: MessageSignature,
    pub pending: bool,
}

impl LastSeenTrackedEntry {
    pub fn acknowledge(self) -> Self {
        Self {
            pending: false,
            ..self
        }
    }
}

/// Offset plus acknowledgement bitset, sent alongside every chat message.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LastSeenUpdate {
    pub offset: u32,
    /// Bit `i` acknowledges window position `i`, oldest first.
    pub acknowledged: u32,
}

impl LastSeenUpdate {
    pub fn is_acknowledged(&self, position: usize) -> bool {
        position < 32 && self.acknowledged & (1 << position) != 0
    }

    pub fn acknowledged_count(&self) -> u32 {
        self.acknowledged.count_ones()
    }

    pub fn write(&self, writer: &mut PacketWriter) -> CodecResult<()> {
        writer.write_var_int(self.offset);
        writer.write_fixed_bit_set(self.acknowledged, LAST_SEEN_WINDOW_SIZE)
    }

    pub fn read(reader: &mut PacketReader<'_>) -> CodecResult<Self> {
        Ok(Self {
            offset: reader.read_var_int()?,
            acknowledged: reader.read_fixed_bit_set(LAST_SEEN_WINDOW_SIZE)?,
        })
    }
}

/// Result of [`LastSeenMessagesTracker::generate_and_apply_update`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrackerUpdate {
    /// Signed into the outgoing message body.
    pub last_seen: LastSeenMessages,
    /// Sent on the wire in place of the full list.
    pub update: LastSeenUpdate,
}

/// Sending side of the window: a ring of the most recent relayed messages.
#[derive(Debug, Clone)]
pub struct LastSeenMessagesTracker {
    tracked: [Option<LastSeenTrackedEntry>; LAST_SEEN_WINDOW_SIZE],
    tail: usize,
    offset: u32,
    last_tracked: Option<MessageSignature>,
}

impl LastSeenMessagesTracker {
    pub fn new() -> Self {
        Self {
            tracked: [None; LAST_SEEN_WINDOW_SIZE],
            tail: 0,
            offset: 0,
            last_tracked: None,
        }
    }

    /// Records a relayed message. Hidden messages take a slot but are never
    /// acknowledged. Returns false for an immediate repeat.
    pub fn add_pending(&mut self, signature: MessageSignature, displayed: bool) -> bool {
        if self.last_tracked == Some(signature) {
            return false;
        }
        self.last_tracked = Some(signature);
        let entry = displayed.then_some(LastSeenTrackedEntry {
            signature,
            pending: true,
        });
        self.add_entry(entry);
        true
    }

    fn add_entry(&mut self, entry: Option<LastSeenTrackedEntry>) {
        let slot = self.tail;
        self.tail = (slot + 1) % LAST_SEEN_WINDOW_SIZE;
        self.offset += 1;
        self.tracked[slot] = entry;
    }

    /// Forgets a message that was filtered out before it reached the screen.
    pub fn ignore_pending(&mut self, signature: &MessageSignature) {
        if let Some(slot) = self.tracked.iter_mut().find(|slot| {
            matches!(slot, Some(entry) if entry.pending && entry.signature == *signature)
        }) {
            *slot = None;
        }
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn get_and_clear_offset(&mut self) -> u32 {
        std::mem::take(&mut self.offset)
    }

    pub fn generate_and_apply_update(&mut self) -> TrackerUpdate {
        let offset = self.get_and_clear_offset();
        let mut acknowledged = 0u32;
        let mut entries = Vec::with_capacity(LAST_SEEN_WINDOW_SIZE);

        for position in 0..LAST_SEEN_WINDOW_SIZE {
            let slot = (self.tail + position) % LAST_SEEN_WINDOW_SIZE;
            if let Some(entry) = self.tracked[slot] {
                acknowledged |= 1 << position;
                entries.push(entry.signature);
                self.tracked[slot] = Some(entry.acknowledge());
            }
        }

        TrackerUpdate {
            last_seen: LastSeenMessages::new(entries),
            update: LastSeenUpdate {
                offset,
                acknowledged,
            },
        }
    }

    /// Entries currently held in the ring, oldest first.
    pub fn entries(&self) -> Vec<LastSeenTrackedEntry> {
        (0..LAST_SEEN_WINDOW_SIZE)
            .filter_map(|position| self.tracked[(self.tail + position) % LAST_SEEN_WINDOW_SIZE])
            .collect()
    }
}

impl Default for LastSeenMessagesTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving side of the window, kept by the server for each client.
///
/// Messages sent to the client are appended as pending; acknowledgements
/// slide the window forward. The first `LAST_SEEN_WINDOW_SIZE` positions are
/// the window the next update refers to.
#[derive(Debug, Clone)]
pub struct LastSeenMessagesValidator {
    last_seen_count: usize,
    tracked: Vec<Option<LastSeenTrackedEntry>>,
    last_pending: Option<MessageSignature>,
}

impl LastSeenMessagesValidator {
    pub fn new() -> Self {
        Self::with_window(LAST_SEEN_WINDOW_SIZE)
    }

    fn with_window(last_seen_count: usize) -> Self {
        Self {
            last_seen_count,
            tracked: vec![None; last_seen_count],
            last_pending: None,
        }
    }

    pub fn add_pending(&mut self, signature: MessageSignature) {
        if self.last_pending != Some(signature) {
            self.tracked.push(Some(LastSeenTrackedEntry {
                signature,
                pending: true,
            }));
            self.last_pending = Some(signature);
        }
    }

    pub fn tracked_count(&self) -> usize {
        self.tracked.len()
    }

    /// Drops the oldest `offset` entries. Fails if that would cut into the
    /// window itself.
    pub fn apply_offset(&mut self, offset: u32) -> Result<()> {
        let available = self.tracked.len() - self.last_seen_count;
        let offset = offset as usize;
        if offset > available {
            return Err(ChatError::WindowOverflow {
                reason: format!("offset {offset} exceeds {available} trackable messages"),
            });
        }
        self.tracked.drain(..offset);
        Ok(())
    }

    /// Applies a client's update and rebuilds the list it signed over.
    pub fn apply_update(&mut self, update: &LastSeenUpdate) -> Result<LastSeenMessages> {
        self.apply_offset(update.offset)?;

        if self.last_seen_count < 32 && update.acknowledged >> self.last_seen_count != 0 {
            return Err(ChatError::WindowOverflow {
                reason: "acknowledged bits beyond the window".to_string(),
            });
        }

        let mut entries = Vec::with_capacity(update.acknowledged_count() as usize);
        for position in 0..self.last_seen_count {
            let entry = self.tracked[position];
            if update.is_acknowledged(position) {
                let Some(entry) = entry else {
                    debug!("Acknowledgement for empty window position {}", position);
                    return Err(ChatError::WindowOverflow {
                        reason: format!("position {position} acknowledged but never sent"),
                    });
                };
                self.tracked[position] = Some(entry.acknowledge());
                entries.push(entry.signature);
            } else {
                if matches!(entry, Some(entry) if !entry.pending) {
                    return Err(ChatError::WindowOverflow {
                        reason: format!("position {position} was acknowledged before"),
                    });
                }
                self.tracked[position] = None;
            }
        }

        Ok(LastSeenMessages::new(entries))
    }
}

impl Default for LastSeenMessagesValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig(id: u8) -> MessageSignature {
        MessageSignature::from_bytes([id; 64])
    }

    #[test]
    fn test_tracker_ignores_repeat() {
        let mut tracker = LastSeenMessagesTracker::new();
        assert!(tracker.add_pending(sig(1), true));
        assert!(!tracker.add_pending(sig(1), true));
        assert!(tracker.add_pending(sig(2), true));
        assert!(tracker.add_pending(sig(1), true));
        assert_eq!(tracker.offset(), 3);
    }

    #[test]
    fn test_tracker_wraps_after_window() {
        let mut tracker = LastSeenMessagesTracker::new();
        for id in 0..25u8 {
            tracker.add_pending(sig(id), true);
        }

        let entries = tracker.entries();
        assert_eq!(entries.len(), LAST_SEEN_WINDOW_SIZE);
        assert!(entries.iter().all(|entry| entry.pending));
        assert_eq!(entries.first().unwrap().signature, sig(5));
        assert_eq!(entries.last().unwrap().signature, sig(24));

        let result = tracker.generate_and_apply_update();
        assert_eq!(result.update.offset, 25);
        assert_eq!(result.update.acknowledged_count(), 20);
        assert_eq!(result.last_seen.len(), 20);
        assert_eq!(result.last_seen.entries()[0], sig(5));
        assert_eq!(tracker.offset(), 0);
        assert!(tracker.entries().iter().all(|entry| !entry.pending));
    }

    #[test]
    fn test_tracker_hidden_messages_are_not_acknowledged() {
        let mut tracker = LastSeenMessagesTracker::new();
        tracker.add_pending(sig(1), true);
        tracker.add_pending(sig(2), false);
        tracker.add_pending(sig(3), true);

        let result = tracker.generate_and_apply_update();
        assert_eq!(result.update.offset, 3);
        assert_eq!(result.last_seen.entries(), &[sig(1), sig(3)]);
        // Ring positions 0..17 are empty, then sig(1), hidden, sig(3).
        assert_eq!(result.update.acknowledged, 1 << 17 | 1 << 19);
    }

    #[test]
    fn test_tracker_ignore_pending() {
        let mut tracker = LastSeenMessagesTracker::new();
        tracker.add_pending(sig(1), true);
        tracker.add_pending(sig(2), true);
        tracker.ignore_pending(&sig(1));

        let result = tracker.generate_and_apply_update();
        assert_eq!(result.last_seen.entries(), &[sig(2)]);

        // Acknowledged entries can no longer be retracted.
        tracker.ignore_pending(&sig(2));
        assert_eq!(tracker.entries().len(), 1);
    }

    #[test]
    fn test_validator_apply_offset_bounds() {
        let mut validator = LastSeenMessagesValidator::new();
        assert!(validator.apply_offset(0).is_ok());
        assert!(validator.apply_offset(1).is_err());

        validator.add_pending(sig(1));
        validator.add_pending(sig(2));
        assert_eq!(validator.tracked_count(), LAST_SEEN_WINDOW_SIZE + 2);
        assert!(validator.apply_offset(3).is_err());
        assert!(validator.apply_offset(2).is_ok());
        assert_eq!(validator.tracked_count(), LAST_SEEN_WINDOW_SIZE);
    }

    #[test]
    fn test_validator_ignores_repeat() {
        let mut validator = LastSeenMessagesValidator::new();
        validator.add_pending(sig(1));
        validator.add_pending(sig(1));
        assert_eq!(validator.tracked_count(), LAST_SEEN_WINDOW_SIZE + 1);
    }

    #[test]
    fn test_tracker_and_validator_agree() {
        let mut tracker = LastSeenMessagesTracker::new();
        let mut validator = LastSeenMessagesValidator::new();

        for id in 1..=3u8 {
            validator.add_pending(sig(id));
            tracker.add_pending(sig(id), true);
        }

        let first = tracker.generate_and_apply_update();
        let rebuilt = validator.apply_update(&first.update).unwrap();
        assert_eq!(rebuilt, first.last_seen);

        validator.add_pending(sig(4));
        tracker.add_pending(sig(4), false);

        let second = tracker.generate_and_apply_update();
        let rebuilt = validator.apply_update(&second.update).unwrap();
        assert_eq!(rebuilt, second.last_seen);
        assert_eq!(rebuilt.entries(), &[sig(1), sig(2), sig(3)]);
    }

    #[test]
    fn test_validator_rejects_ack_without_entry() {
        let mut validator = LastSeenMessagesValidator::new();
        validator.add_pending(sig(1));

        let forged = LastSeenUpdate {
            offset: 1,
            acknowledged: 1 << 0,
        };
        assert!(matches!(
            validator.apply_update(&forged),
            Err(ChatError::WindowOverflow { .. })
        ));
    }

    #[test]
    fn test_validator_rejects_retracted_acknowledgement() {
        let mut validator = LastSeenMessagesValidator::new();
        validator.add_pending(sig(1));

        let ack = LastSeenUpdate {
            offset: 1,
            acknowledged: 1 << 19,
        };
        assert!(validator.apply_update(&ack).is_ok());

        let retract = LastSeenUpdate {
            offset: 0,
            acknowledged: 0,
        };
        assert!(validator.apply_update(&retract).is_err());
    }

    #[test]
    fn test_validator_allows_unshown_pending() {
        let mut validator = LastSeenMessagesValidator::new();
        validator.add_pending(sig(1));

        let update = LastSeenUpdate {
            offset: 1,
            acknowledged: 0,
        };
        let rebuilt = validator.apply_update(&update).unwrap();
        assert!(rebuilt.is_empty());
    }

    #[test]
    fn test_validator_rejects_bits_beyond_window() {
        let mut validator = LastSeenMessagesValidator::new();
        let update = LastSeenUpdate {
            offset: 0,
            acknowledged: 1 << 20,
        };
        assert!(validator.apply_update(&update).is_err());
    }

    #[test]
    fn test_update_wire_size() {
        let update = LastSeenUpdate {
            offset: 3,
            acknowledged: 0b111,
        };
        let mut writer = PacketWriter::new();
        update.write(&mut writer).unwrap();
        let bytes = writer.into_bytes();
        assert_eq!(bytes, vec![3, 0b111, 0, 0]);

        let mut reader = PacketReader::new(&bytes);
        assert_eq!(LastSeenUpdate::read(&mut reader).unwrap(), update);
    }
}
