//! Priority routing queue with dedup, branch/global caps, local-set
//! preference, and anti-starvation.
//!
//! Backed by a plain `Vec<RoutingItem>` rather than a `BinaryHeap`: selection
//! needs two different orderings depending on phase (local-set-first, then
//! global), and needs the unselected remainder intact for repeated scans — a
//! heap would need rebuilding every phase regardless, so a `Vec` with
//! targeted `min_by`/`position`/`remove` is both simpler and correct.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::model::{Intent, MemberId, RoutingItem};

static ENQUEUE_CLOCK: AtomicU64 = AtomicU64::new(0);

fn next_enqueue_tick() -> u64 {
    ENQUEUE_CLOCK.fetch_add(1, Ordering::Relaxed)
}

/// Why an enqueue attempt for one target did not result in a queued item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    QueueOverflow,
    Duplicate,
    AdjacentDuplicate,
}

/// One requested target in an `enqueue` batch.
#[derive(Debug, Clone)]
pub struct EnqueueRequest {
    pub target_member_id: MemberId,
    pub intent: Intent,
}

/// A skipped enqueue attempt, reported back to the caller for logging/UI.
#[derive(Debug, Clone)]
pub struct SkippedEnqueue {
    pub target_member_id: MemberId,
    pub reason: SkipReason,
}

/// A protection event fired when an enqueue is demoted or dropped.
#[derive(Debug, Clone)]
pub struct ProtectionEvent {
    pub reason: &'static str,
    pub target_member_id: MemberId,
}

#[derive(Debug, Clone, Default)]
pub struct EnqueueOutcome {
    pub enqueued: Vec<RoutingItem>,
    pub skipped: Vec<SkippedEnqueue>,
    pub protection_events: Vec<ProtectionEvent>,
}

#[derive(Debug, Clone, Default)]
pub struct QueueStats {
    pub by_intent: IntentCounts,
    pub total_pending: usize,
    pub local_queue_size: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IntentCounts {
    pub p1: usize,
    pub p2: usize,
    pub p3: usize,
}

pub struct RoutingQueue {
    items: Vec<RoutingItem>,
    dedupe_set: HashSet<String>,
    last_completed_message_id: Option<std::sync::Arc<str>>,
    local_seq_count: usize,
    max_queue_size: usize,
    max_branch_size: usize,
    max_local_seq: usize,
}

impl RoutingQueue {
    pub fn new(max_queue_size: usize, max_branch_size: usize, max_local_seq: usize) -> Self {
        RoutingQueue {
            items: Vec::new(),
            dedupe_set: HashSet::new(),
            last_completed_message_id: None,
            local_seq_count: 0,
            max_queue_size,
            max_branch_size,
            max_local_seq,
        }
    }

    /// Enqueue a batch of requested targets under a single parent message.
    pub fn enqueue(
        &mut self,
        requests: &[EnqueueRequest],
        parent_message_id: std::sync::Arc<str>,
    ) -> EnqueueOutcome {
        let mut outcome = EnqueueOutcome::default();

        for request in requests {
            if self.items.len() >= self.max_queue_size {
                outcome.skipped.push(SkippedEnqueue {
                    target_member_id: request.target_member_id.clone(),
                    reason: SkipReason::QueueOverflow,
                });
                outcome.protection_events.push(ProtectionEvent {
                    reason: "queue_overflow",
                    target_member_id: request.target_member_id.clone(),
                });
                continue;
            }

            let branch_count = self
                .items
                .iter()
                .filter(|i| i.parent_message_id == parent_message_id)
                .count();
            let mut intent = request.intent;
            if branch_count >= self.max_branch_size {
                intent = Intent::P3Extend;
                outcome.protection_events.push(ProtectionEvent {
                    reason: "branch_overflow",
                    target_member_id: request.target_member_id.clone(),
                });
            }

            let item = RoutingItem {
                id: std::sync::Arc::from(uuid::Uuid::new_v4().to_string()),
                target_member_id: request.target_member_id.clone(),
                parent_message_id: parent_message_id.clone(),
                trigger_message_id: parent_message_id.clone(),
                intent,
                enqueued_at: next_enqueue_tick(),
            };
            let key = item.dedupe_key();

            if self.dedupe_set.contains(&key) {
                outcome.skipped.push(SkippedEnqueue {
                    target_member_id: request.target_member_id.clone(),
                    reason: SkipReason::Duplicate,
                });
                continue;
            }

            if self
                .items
                .last()
                .map(|last| last.target_member_id == item.target_member_id)
                .unwrap_or(false)
            {
                outcome.skipped.push(SkippedEnqueue {
                    target_member_id: request.target_member_id.clone(),
                    reason: SkipReason::AdjacentDuplicate,
                });
                continue;
            }

            self.dedupe_set.insert(key);
            outcome.enqueued.push(item.clone());
            self.items.push(item);
        }

        outcome
    }

    /// Select the next routing item to dispatch, per the three-phase scan:
    /// global P1 preemption, then the local set, then the global set.
    pub fn select_next(&mut self) -> Option<RoutingItem> {
        // Phase 1: global P1 preemption.
        if let Some(pos) = self.min_index_by_intent(Intent::P1Interrupt) {
            self.local_seq_count = 0;
            let item = self.items.remove(pos);
            self.dedupe_set.remove(&item.dedupe_key());
            return Some(item);
        }

        // Phase 2: local set, bounded by max_local_seq.
        if let Some(parent) = self.last_completed_message_id.clone() {
            if self.local_seq_count < self.max_local_seq {
                let local_positions: Vec<usize> = self
                    .items
                    .iter()
                    .enumerate()
                    .filter(|(_, i)| i.parent_message_id == parent)
                    .map(|(idx, _)| idx)
                    .collect();
                if !local_positions.is_empty() {
                    let best = local_positions
                        .into_iter()
                        .min_by(|&a, &b| {
                            self.items[a]
                                .intent
                                .cmp(&self.items[b].intent)
                                .then(self.items[a].enqueued_at.cmp(&self.items[b].enqueued_at))
                        })
                        .unwrap();
                    self.local_seq_count += 1;
                    let item = self.items.remove(best);
                    self.dedupe_set.remove(&item.dedupe_key());
                    return Some(item);
                }
            }
        }

        // Phase 3: global set.
        self.local_seq_count = 0;
        if self.items.is_empty() {
            return None;
        }
        let best = (0..self.items.len())
            .min_by(|&a, &b| {
                self.items[a]
                    .intent
                    .cmp(&self.items[b].intent)
                    .then(self.items[a].enqueued_at.cmp(&self.items[b].enqueued_at))
            })
            .unwrap();
        let item = self.items.remove(best);
        self.dedupe_set.remove(&item.dedupe_key());
        Some(item)
    }

    fn min_index_by_intent(&self, intent: Intent) -> Option<usize> {
        self.items
            .iter()
            .enumerate()
            .filter(|(_, i)| i.intent == intent)
            .min_by_key(|(_, i)| i.enqueued_at)
            .map(|(idx, _)| idx)
    }

    pub fn mark_completed(&mut self, message_id: std::sync::Arc<str>) {
        self.last_completed_message_id = Some(message_id);
    }

    pub fn size(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn peek(&self) -> &[RoutingItem] {
        &self.items
    }

    /// Empties items and the dedup set, zeroes `local_seq_count`. Preserves
    /// `last_completed_message_id`, per the open-question decision recorded
    /// in DESIGN.md.
    pub fn clear(&mut self) {
        self.items.clear();
        self.dedupe_set.clear();
        self.local_seq_count = 0;
    }

    pub fn remove_by_target(&mut self, member_id: &str) -> usize {
        let before = self.items.len();
        self.items.retain(|i| i.target_member_id.as_ref() != member_id);
        let removed = before - self.items.len();
        self.dedupe_set = self.items.iter().map(|i| i.dedupe_key()).collect();
        self.local_seq_count = 0;
        removed
    }

    pub fn get_stats(&self) -> QueueStats {
        let mut counts = IntentCounts::default();
        for item in &self.items {
            match item.intent {
                Intent::P1Interrupt => counts.p1 += 1,
                Intent::P2Reply => counts.p2 += 1,
                Intent::P3Extend => counts.p3 += 1,
            }
        }
        let local_queue_size = match &self.last_completed_message_id {
            Some(parent) => self
                .items
                .iter()
                .filter(|i| &i.parent_message_id == parent)
                .count(),
            None => 0,
        };
        QueueStats {
            by_intent: counts,
            total_pending: self.items.len(),
            local_queue_size,
        }
    }
}
