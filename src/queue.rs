//! Work queue deciding which class gets which strategy next.
//!
//! New labels first pass through the working queue, where inferral and
//! initial strategies run once each. Labels then settle into per-group
//! level queues: a label popped from group `i` is handed the strategies of
//! expansion group `i` and pushed onward to group `i + 1`; after the last
//! group the label stops yielding for good. Labels re-added before that
//! accumulate a multiplicity that decides their order when the next level
//! starts.

use crate::class_db::Label;
use crate::trace::debug;
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;
use std::collections::VecDeque;

/// What to do with the label in a work packet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QueueTask {
    /// Run all inferral strategies.
    Inferral,
    /// Run the initial strategy with this index.
    Initial(usize),
    /// Run all strategies of the expansion group with this index.
    Expansion(usize),
}

/// One unit of work: a label and the strategies to apply to it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkPacket {
    pub label: Label,
    pub task: QueueTask,
}

/// The class queue.
pub struct ClassQueue {
    num_initial: usize,
    has_inferral: bool,
    /// Labels still owed inferral/initial packets.
    working: VecDeque<Label>,
    /// Inferral not yet emitted for these labels.
    inferral_pending: FxHashSet<Label>,
    /// Initial strategy indices not yet emitted, per label.
    initial_pending: FxHashMap<Label, SmallVec<[usize; 4]>>,
    /// One queue per expansion group for the current level.
    curr_level: Vec<VecDeque<Label>>,
    /// Labels waiting for the next level, with re-add multiplicity.
    next_level: FxHashMap<Label, u32>,
    /// Labels that must never be yielded again.
    ignore: FxHashSet<Label>,
    /// Every label ever added, to tell first adds from re-adds.
    added: FxHashSet<Label>,
    levels_completed: u32,
}

impl ClassQueue {
    /// Build a queue for a pack with the given strategy counts.
    pub fn new(num_initial: usize, has_inferral: bool, num_groups: usize) -> Self {
        assert!(num_groups >= 1, "a pack needs at least one expansion group");
        Self {
            num_initial,
            has_inferral,
            working: VecDeque::new(),
            inferral_pending: FxHashSet::default(),
            initial_pending: FxHashMap::default(),
            curr_level: (0..num_groups).map(|_| VecDeque::new()).collect(),
            next_level: FxHashMap::default(),
            ignore: FxHashSet::default(),
            added: FxHashSet::default(),
            levels_completed: 0,
        }
    }

    /// Add a label. The first add routes it through the working queue;
    /// later adds bump its multiplicity for the next level.
    pub fn add(&mut self, label: Label) {
        if self.ignore.contains(&label) {
            return;
        }
        if self.added.insert(label) {
            if self.has_inferral {
                self.inferral_pending.insert(label);
            }
            if self.num_initial > 0 {
                self.initial_pending
                    .insert(label, (0..self.num_initial).collect());
            }
            self.working.push_back(label);
        } else {
            *self.next_level.entry(label).or_insert(0) += 1;
        }
    }

    /// Drop a label from the inferral phase (it is fully inferred).
    pub fn set_not_inferrable(&mut self, label: Label) {
        self.inferral_pending.remove(&label);
    }

    /// Drop one initial strategy for a label (it applied or cannot apply).
    pub fn set_not_initial(&mut self, label: Label, index: usize) {
        if let Some(pending) = self.initial_pending.get_mut(&label) {
            pending.retain(|&mut i| i != index);
            if pending.is_empty() {
                self.initial_pending.remove(&label);
            }
        }
    }

    /// Never yield this label again, purging it from every queue.
    pub fn set_stop_yielding(&mut self, label: Label) {
        self.ignore.insert(label);
        self.inferral_pending.remove(&label);
        self.initial_pending.remove(&label);
        self.next_level.remove(&label);
        // Lazy removal from working/curr_level happens at pop time, but a
        // purge keeps status counts honest.
        self.working.retain(|&l| l != label);
        for queue in &mut self.curr_level {
            queue.retain(|&l| l != label);
        }
    }

    /// The next packet, advancing to the next level when the current one is
    /// exhausted. `None` means the queue is permanently empty.
    pub fn next_packet(&mut self) -> Option<WorkPacket> {
        loop {
            if let Some(packet) = self.next_packet_no_change() {
                return Some(packet);
            }
            if !self.change_level() {
                return None;
            }
        }
    }

    /// The next packet within the current level only.
    fn next_packet_no_change(&mut self) -> Option<WorkPacket> {
        // Working-queue labels get inferral first, then each initial
        // strategy, then graduate to the next level.
        while let Some(&label) = self.working.front() {
            if self.ignore.contains(&label) {
                self.working.pop_front();
                continue;
            }
            if self.inferral_pending.remove(&label) {
                return Some(WorkPacket {
                    label,
                    task: QueueTask::Inferral,
                });
            }
            if let Some(pending) = self.initial_pending.get_mut(&label) {
                let index = pending.remove(0);
                if pending.is_empty() {
                    self.initial_pending.remove(&label);
                }
                return Some(WorkPacket {
                    label,
                    task: QueueTask::Initial(index),
                });
            }
            self.working.pop_front();
            self.next_level.entry(label).or_insert(0);
        }
        for group in 0..self.curr_level.len() {
            while let Some(label) = self.curr_level[group].pop_front() {
                if self.ignore.contains(&label) {
                    continue;
                }
                if group + 1 < self.curr_level.len() {
                    self.curr_level[group + 1].push_back(label);
                } else {
                    // Seen every group: stop yielding this label.
                    self.ignore.insert(label);
                }
                return Some(WorkPacket {
                    label,
                    task: QueueTask::Expansion(group),
                });
            }
        }
        None
    }

    /// Promote the next level into group zero, most-re-added labels first.
    /// Returns false when there is nothing to promote.
    fn change_level(&mut self) -> bool {
        debug_assert!(self.working.is_empty());
        debug_assert!(self.curr_level.iter().all(VecDeque::is_empty));
        if self.next_level.is_empty() {
            return false;
        }
        let mut promoted: Vec<(Label, u32)> = self
            .next_level
            .drain()
            .filter(|(label, _)| !self.ignore.contains(label))
            .collect();
        if promoted.is_empty() {
            return false;
        }
        promoted.sort_by(|a, b| b.1.cmp(&a.1).then(a.0 .0.cmp(&b.0 .0)));
        for (label, _) in promoted {
            self.curr_level[0].push_back(label);
        }
        self.levels_completed += 1;
        debug!("queue advanced to level {}", self.levels_completed);
        true
    }

    /// All packets of the current level, without starting the next one.
    /// A level that drained without emitting anything (a working phase with
    /// no inferral or initial strategies does that) rolls into the next, so
    /// an empty result means the queue is permanently exhausted.
    pub fn do_level(&mut self) -> Vec<WorkPacket> {
        let mut packets = Vec::new();
        loop {
            while let Some(packet) = self.next_packet_no_change() {
                packets.push(packet);
            }
            if !packets.is_empty() || !self.change_level() {
                return packets;
            }
        }
    }

    /// Number of fully processed levels.
    pub fn levels_completed(&self) -> u32 {
        self.levels_completed
    }

    /// One-line summary for status reports.
    pub fn status(&self) -> String {
        let curr: usize = self.curr_level.iter().map(VecDeque::len).sum();
        format!(
            "ClassQueue: {} working, {} in current level, {} queued for next, {} ignored, {} levels done",
            self.working.len(),
            curr,
            self.next_level.len(),
            self.ignore.len(),
            self.levels_completed
        )
    }
}
