//! Live event merging for the active room.
//!
//! [`Timeline`] is the ordered, id-unique message sequence. Every mutation is
//! monotone (status only rises, deletion is terminal), so delivered/seen
//! events commute and replays are harmless.

use std::collections::HashSet;

use tokio::time::{Duration, Instant};

use crate::models::{DeletedFor, DeliveryStatus, Message};

/// Ordered message sequence with set semantics keyed by id.
#[derive(Debug, Default, Clone)]
pub struct Timeline {
    messages: Vec<Message>,
    ids: HashSet<String>,
}

impl Timeline {
    pub fn as_slice(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn get(&self, id: &str) -> Option<&Message> {
        if !self.contains(id) {
            return None;
        }
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.ids.clear();
    }

    /// Replace the whole sequence with a freshly loaded batch.
    pub fn seed(&mut self, batch: Vec<Message>) {
        self.clear();
        for msg in batch {
            self.upsert(msg);
        }
        self.sort();
        self.resolve_replies();
    }

    /// Fold a re-fetched batch into the existing sequence.
    ///
    /// Rows from the backend replace content, local status never drops,
    /// local tombstones stay tombstones, and messages the fetch did not
    /// include are kept (they may have arrived after the snapshot was taken).
    pub fn reconcile(&mut self, batch: Vec<Message>) {
        for msg in batch {
            self.upsert(msg);
        }
        self.sort();
        self.resolve_replies();
    }

    /// Append a live message. Returns false if the id is already present.
    ///
    /// Delivery order is trusted; no re-sort.
    pub fn insert_live(&mut self, mut msg: Message) -> bool {
        if msg.id.is_empty() || self.contains(&msg.id) {
            return false;
        }

        if msg.reply_to.is_none() {
            if let Some(target) = msg.reply_to_id.as_deref().and_then(|id| self.get(id)) {
                msg.reply_to = Some(target.reply_snapshot());
            }
        }

        // Earlier messages may have been waiting on this one as reply target.
        let snapshot = msg.reply_snapshot();
        for waiting in self
            .messages
            .iter_mut()
            .filter(|m| m.reply_to.is_none() && m.reply_to_id.as_deref() == Some(msg.id.as_str()))
        {
            waiting.reply_to = Some(snapshot.clone());
        }

        self.ids.insert(msg.id.clone());
        self.messages.push(msg);
        true
    }

    /// Raise a message to at least `status`. Unknown ids are a no-op.
    pub fn raise(&mut self, id: &str, status: DeliveryStatus) -> bool {
        if !self.contains(id) {
            return false;
        }
        match self.messages.iter_mut().find(|m| m.id == id) {
            Some(m) => m.raise_status(status),
            None => false,
        }
    }

    /// Mark every known id as seen. Returns how many changed.
    pub fn mark_seen(&mut self, ids: &[String]) -> usize {
        ids.iter()
            .filter(|id| self.raise(id, DeliveryStatus::Seen))
            .count()
    }

    /// Apply a deletion. Returns true if the sequence changed.
    pub fn delete(&mut self, id: &str, scope: DeletedFor) -> bool {
        if !self.contains(id) {
            return false;
        }
        match scope {
            DeletedFor::Everyone => {
                let Some(msg) = self.messages.iter_mut().find(|m| m.id == id) else {
                    return false;
                };
                if msg.is_deleted && msg.deleted_for == Some(DeletedFor::Everyone) {
                    return false;
                }
                msg.tombstone();
                let snapshot = msg.reply_snapshot();
                for m in self.messages.iter_mut() {
                    if m.reply_to_id.as_deref() == Some(id) {
                        m.reply_to = Some(snapshot.clone());
                    }
                }
            }
            DeletedFor::Me => {
                self.messages.retain(|m| m.id != id);
                self.ids.remove(id);
                for m in self.messages.iter_mut() {
                    if m.reply_to_id.as_deref() == Some(id) {
                        m.reply_to = None;
                    }
                }
            }
        }
        true
    }

    fn upsert(&mut self, incoming: Message) {
        if incoming.id.is_empty() {
            return;
        }
        if !self.ids.insert(incoming.id.clone()) {
            if let Some(existing) = self.messages.iter_mut().find(|m| m.id == incoming.id) {
                merge_into(existing, incoming);
            }
            return;
        }
        self.messages.push(incoming);
    }

    fn sort(&mut self) {
        // Stable: equal timestamps keep arrival order.
        self.messages.sort_by_key(|m| m.created_at);
    }

    /// Resolve reply snapshots against the current sequence. Links already
    /// resolved are refreshed from the target so tombstones propagate.
    fn resolve_replies(&mut self) {
        let snapshots: Vec<Option<Box<Message>>> = self
            .messages
            .iter()
            .map(|m| {
                m.reply_to_id.as_deref().and_then(|target| {
                    self.messages
                        .iter()
                        .find(|t| t.id == target)
                        .map(Message::reply_snapshot)
                })
            })
            .collect();
        for (msg, snap) in self.messages.iter_mut().zip(snapshots) {
            if snap.is_some() {
                msg.reply_to = snap;
            }
        }
    }
}

/// Merge a fresh backend row into a local one, never regressing.
fn merge_into(existing: &mut Message, incoming: Message) {
    let status = existing.status().max(incoming.status());
    let tombstoned = existing.is_deleted && existing.deleted_for == Some(DeletedFor::Everyone);
    let reply_to = existing.reply_to.take();

    *existing = incoming;
    existing.raise_status(status);
    if tombstoned {
        existing.tombstone();
    }
    if existing.reply_to.is_none() {
        existing.reply_to = reply_to;
    }
}

/// Batches `message_seen` acknowledgments for one room.
///
/// The window opens at the first pending id and is not extended by later
/// ones, so acknowledgment latency stays bounded by the window.
#[derive(Debug)]
pub struct SeenBatcher {
    window: Duration,
    room_id: Option<String>,
    pending: Vec<String>,
    deadline: Option<Instant>,
}

/// A batch of ids ready to acknowledge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeenBatch {
    pub room_id: String,
    pub message_ids: Vec<String>,
}

impl SeenBatcher {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            room_id: None,
            pending: Vec::new(),
            deadline: None,
        }
    }

    pub fn schedule(&mut self, room_id: &str, message_id: &str, now: Instant) {
        if self.room_id.as_deref() != Some(room_id) {
            // Room changed underneath; the caller flushes before switching.
            self.pending.clear();
            self.room_id = Some(room_id.to_string());
        }
        if !self.pending.iter().any(|id| id == message_id) {
            self.pending.push(message_id.to_string());
        }
        self.deadline.get_or_insert(now + self.window);
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Take the batch if its window has elapsed.
    pub fn take_due(&mut self, now: Instant) -> Option<SeenBatch> {
        match self.deadline {
            Some(deadline) if deadline <= now => self.take_all(),
            _ => None,
        }
    }

    /// Take whatever is pending regardless of the window.
    pub fn take_all(&mut self) -> Option<SeenBatch> {
        self.deadline = None;
        if self.pending.is_empty() {
            return None;
        }
        let room_id = self.room_id.clone()?;
        Some(SeenBatch {
            room_id,
            message_ids: std::mem::take(&mut self.pending),
        })
    }
}

/// Single "who is typing" slot. Last typer wins.
#[derive(Debug)]
pub struct TypingSlot {
    expiry: Duration,
    user: Option<String>,
    expires_at: Option<Instant>,
}

impl TypingSlot {
    pub fn new(expiry: Duration) -> Self {
        Self {
            expiry,
            user: None,
            expires_at: None,
        }
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.expires_at
    }

    /// Returns true if the visible typer changed.
    pub fn start(&mut self, sender: &str, now: Instant) -> bool {
        self.expires_at = Some(now + self.expiry);
        if self.user.as_deref() == Some(sender) {
            return false;
        }
        self.user = Some(sender.to_string());
        true
    }

    /// Clear the slot. A named stop only clears that user's indicator.
    pub fn stop(&mut self, sender: Option<&str>) -> bool {
        match (sender, self.user.as_deref()) {
            (_, None) => false,
            (Some(s), Some(current)) if s != current => false,
            _ => self.clear(),
        }
    }

    pub fn expire(&mut self, now: Instant) -> bool {
        match self.expires_at {
            Some(at) if at <= now => self.clear(),
            _ => false,
        }
    }

    pub fn clear(&mut self) -> bool {
        self.expires_at = None;
        self.user.take().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::{msg, reply};

    fn ids(t: &Timeline) -> Vec<&str> {
        t.as_slice().iter().map(|m| m.id.as_str()).collect()
    }

    #[test]
    fn test_seed_sorts_by_created_at() {
        let mut t = Timeline::default();
        t.seed(vec![
            msg("m1", "r1", "bob", 0),
            msg("m3", "r1", "bob", 2),
            msg("m2", "r1", "bob", 1),
        ]);
        assert_eq!(ids(&t), vec!["m1", "m2", "m3"]);
    }

    #[test]
    fn test_seed_resolves_replies_within_batch() {
        let mut t = Timeline::default();
        t.seed(vec![
            reply("m2", "r1", "alice", 1, "m1"),
            msg("m1", "r1", "bob", 0),
            reply("m3", "r1", "alice", 2, "missing"),
        ]);
        assert_eq!(t.get("m2").unwrap().reply_to.as_ref().unwrap().id, "m1");
        assert!(t.get("m3").unwrap().reply_to.is_none());
    }

    #[test]
    fn test_seed_dedups_batch() {
        let mut t = Timeline::default();
        let mut seen_copy = msg("m1", "r1", "bob", 0);
        seen_copy.is_seen = true;
        t.seed(vec![seen_copy, msg("m1", "r1", "bob", 0)]);
        assert_eq!(t.len(), 1);
        assert_eq!(t.get("m1").unwrap().status(), DeliveryStatus::Seen);
    }

    #[test]
    fn test_insert_live_is_idempotent() {
        let mut t = Timeline::default();
        assert!(t.insert_live(msg("m4", "r1", "bob", 4)));
        assert!(!t.insert_live(msg("m4", "r1", "bob", 4)));
        assert_eq!(ids(&t), vec!["m4"]);
    }

    #[test]
    fn test_reply_resolved_when_target_arrives_later() {
        let mut t = Timeline::default();
        t.seed(vec![reply("m2", "r1", "alice", 1, "m1")]);
        assert!(t.get("m2").unwrap().reply_to.is_none());

        t.insert_live(msg("m1", "r1", "bob", 0));
        assert_eq!(t.get("m2").unwrap().reply_to.as_ref().unwrap().id, "m1");
    }

    #[test]
    fn test_live_reply_to_known_target() {
        let mut t = Timeline::default();
        t.insert_live(msg("m1", "r1", "bob", 0));
        t.insert_live(reply("m2", "r1", "alice", 1, "m1"));
        assert_eq!(t.get("m2").unwrap().reply_to.as_ref().unwrap().id, "m1");
    }

    #[test]
    fn test_seen_then_delivered_does_not_revert() {
        let mut t = Timeline::default();
        t.seed(vec![msg("m1", "r1", "alice", 0), msg("m2", "r1", "alice", 1)]);

        assert_eq!(t.mark_seen(&["m1".into(), "m2".into(), "zz".into()]), 2);
        assert!(!t.raise("m1", DeliveryStatus::Delivered));

        let m1 = t.get("m1").unwrap();
        assert!(m1.is_seen && m1.is_delivered);
    }

    #[test]
    fn test_unknown_ids_are_noops() {
        let mut t = Timeline::default();
        assert!(!t.raise("nope", DeliveryStatus::Delivered));
        assert!(!t.delete("nope", DeletedFor::Me));
    }

    #[test]
    fn test_delete_for_everyone_keeps_slot() {
        let mut t = Timeline::default();
        t.seed(vec![msg("m1", "r1", "bob", 0), reply("m2", "r1", "alice", 1, "m1")]);

        assert!(t.delete("m1", DeletedFor::Everyone));
        assert_eq!(t.len(), 2);
        assert!(t.get("m1").unwrap().is_deleted);
        assert!(t.get("m2").unwrap().reply_to.as_ref().unwrap().is_deleted);

        // Repeated tombstone is not a change.
        assert!(!t.delete("m1", DeletedFor::Everyone));
    }

    #[test]
    fn test_delete_for_me_removes_exactly_one() {
        let mut t = Timeline::default();
        t.seed(vec![msg("m1", "r1", "bob", 0), reply("m2", "r1", "alice", 1, "m1")]);

        assert!(t.delete("m1", DeletedFor::Me));
        assert_eq!(ids(&t), vec!["m2"]);
        assert!(t.get("m2").unwrap().reply_to.is_none());
        assert!(!t.contains("m1"));
    }

    #[test]
    fn test_reconcile_keeps_local_progress() {
        let mut t = Timeline::default();
        t.seed(vec![msg("m1", "r1", "alice", 0), msg("m2", "r1", "bob", 1)]);
        t.mark_seen(&["m1".into()]);
        t.delete("m2", DeletedFor::Everyone);
        t.insert_live(msg("m5", "r1", "bob", 5));

        // Stale refetch: m1 not yet seen, m2 not yet deleted, m5 missing, m3 new.
        t.reconcile(vec![
            msg("m3", "r1", "bob", 3),
            msg("m2", "r1", "bob", 1),
            msg("m1", "r1", "alice", 0),
        ]);

        assert_eq!(ids(&t), vec!["m1", "m2", "m3", "m5"]);
        assert!(t.get("m1").unwrap().is_seen);
        assert!(t.get("m2").unwrap().is_deleted);
    }

    #[test]
    fn test_seen_batcher_window() {
        let start = Instant::now();
        let mut b = SeenBatcher::new(Duration::from_millis(500));
        b.schedule("r1", "m1", start);
        b.schedule("r1", "m2", start + Duration::from_millis(300));
        b.schedule("r1", "m1", start + Duration::from_millis(350));

        assert_eq!(b.deadline(), Some(start + Duration::from_millis(500)));
        assert_eq!(b.take_due(start + Duration::from_millis(499)), None);

        let batch = b.take_due(start + Duration::from_millis(500)).unwrap();
        assert_eq!(batch.room_id, "r1");
        assert_eq!(batch.message_ids, vec!["m1", "m2"]);
        assert_eq!(b.deadline(), None);
        assert_eq!(b.take_all(), None);
    }

    #[test]
    fn test_typing_slot() {
        let start = Instant::now();
        let mut slot = TypingSlot::new(Duration::from_secs(6));

        assert!(slot.start("bob", start));
        assert!(!slot.start("bob", start + Duration::from_secs(1)));
        assert!(slot.start("carol", start + Duration::from_secs(2)));
        assert_eq!(slot.user(), Some("carol"));

        // Stop from someone else leaves carol.
        assert!(!slot.stop(Some("bob")));
        assert_eq!(slot.user(), Some("carol"));

        assert!(!slot.expire(start + Duration::from_secs(7)));
        assert!(slot.expire(start + Duration::from_secs(8)));
        assert_eq!(slot.user(), None);

        slot.start("bob", start);
        assert!(slot.stop(None));
    }
}
