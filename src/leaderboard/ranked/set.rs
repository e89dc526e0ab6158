use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap};

use crate::leaderboard::types::{RankedEntry, ScoreValue, UserId};

type OrderKey = (Reverse<ScoreValue>, u64, UserId);

#[derive(Clone, Copy, Debug)]
struct Slot {
    value: ScoreValue,
    seq: u64,
}

/// Ordered set of users by score, highest first. Equal values keep the order
/// in which their current value was written.
#[derive(Debug, Default)]
pub struct RankedSet {
    members: HashMap<UserId, Slot>,
    order: BTreeSet<OrderKey>,
    next_seq: u64,
}

impl RankedSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: impl IntoIterator<Item = RankedEntry>) -> Self {
        let mut set = Self::new();
        for entry in entries {
            set.upsert(entry.user_id, entry.value);
        }
        set
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn value_of(&self, user_id: UserId) -> Option<ScoreValue> {
        self.members.get(&user_id).map(|slot| slot.value)
    }

    /// Last writer wins. Rewriting the same value keeps the member's position.
    pub fn upsert(&mut self, user_id: UserId, value: ScoreValue) {
        if let Some(existing) = self.members.get(&user_id).copied() {
            if existing.value == value {
                return;
            }
            self.order
                .remove(&(Reverse(existing.value), existing.seq, user_id));
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.members.insert(user_id, Slot { value, seq });
        self.order.insert((Reverse(value), seq, user_id));
    }

    /// Writes `value` only when the member is absent or holds a lower value.
    /// Returns whether the set changed.
    pub fn raise(&mut self, user_id: UserId, value: ScoreValue) -> bool {
        match self.value_of(user_id) {
            Some(current) if current >= value => false,
            _ => {
                self.upsert(user_id, value);
                true
            }
        }
    }

    /// 1-based rank: one plus the number of members with a strictly greater value.
    pub fn rank_of(&self, user_id: UserId) -> Option<u64> {
        let slot = self.members.get(&user_id)?;
        let ahead = self
            .order
            .range(..(Reverse(slot.value), 0, UserId::MIN))
            .count();
        Some(ahead as u64 + 1)
    }

    pub fn top(&self, k: usize) -> Vec<RankedEntry> {
        self.order
            .iter()
            .take(k)
            .map(|(Reverse(value), _, user_id)| RankedEntry::new(*user_id, *value))
            .collect()
    }

    pub fn entries(&self) -> Vec<RankedEntry> {
        self.top(self.len())
    }
}
