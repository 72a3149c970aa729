//! Bookkeeping of which replica of which segment has been tried.

use ramlog_core::ServerId;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

/// Progress of one replica row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicaState {
    /// Not tried yet.
    NotStarted,
    /// A fetch is in flight.
    Waiting,
    /// The fetch (or its replay) failed.
    Failed,
    /// The segment was replayed, from this or another replica.
    Ok,
}

/// One candidate source for one segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replica {
    /// Backup holding the replica.
    pub backup_id: ServerId,
    /// Segment the replica copies.
    pub segment_id: u64,
    /// Progress.
    pub state: ReplicaState,
}

impl Replica {
    /// Creates a row that has not been tried.
    #[must_use]
    pub fn new(backup_id: ServerId, segment_id: u64) -> Self {
        Self {
            backup_id,
            segment_id,
            state: ReplicaState::NotStarted,
        }
    }
}

impl fmt::Display for Replica {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "segment {} on {} ({:?})",
            self.segment_id, self.backup_id, self.state
        )
    }
}

/// Scoreboard over the caller's replica rows.
///
/// At most one fetch per segment id is in flight. A segment counts as
/// recovered as soon as one of its rows succeeds.
pub(crate) struct Scoreboard<'a> {
    rows: &'a mut [Replica],
    /// First row that may still be `NotStarted`.
    cursor: usize,
    running: HashSet<u64>,
    rows_by_segment: HashMap<u64, Vec<usize>>,
}

impl<'a> Scoreboard<'a> {
    pub(crate) fn new(rows: &'a mut [Replica]) -> Self {
        let mut rows_by_segment: HashMap<u64, Vec<usize>> = HashMap::new();
        for (i, row) in rows.iter().enumerate() {
            rows_by_segment.entry(row.segment_id).or_default().push(i);
        }
        Self {
            rows,
            cursor: 0,
            running: HashSet::new(),
            rows_by_segment,
        }
    }

    pub(crate) fn row(&self, idx: usize) -> &Replica {
        &self.rows[idx]
    }

    /// Next row that may be started: not started, and its segment is neither
    /// in flight nor already recovered.
    pub(crate) fn next_candidate(&mut self) -> Option<usize> {
        while self.cursor < self.rows.len()
            && self.rows[self.cursor].state != ReplicaState::NotStarted
        {
            self.cursor += 1;
        }
        (self.cursor..self.rows.len()).find(|&i| {
            let row = &self.rows[i];
            row.state == ReplicaState::NotStarted && !self.running.contains(&row.segment_id)
        })
    }

    pub(crate) fn mark_waiting(&mut self, idx: usize) {
        self.rows[idx].state = ReplicaState::Waiting;
        self.running.insert(self.rows[idx].segment_id);
    }

    /// Marks every row of `segment_id` recovered.
    pub(crate) fn mark_ok(&mut self, segment_id: u64) {
        if let Some(rows) = self.rows_by_segment.get(&segment_id) {
            for &i in rows {
                self.rows[i].state = ReplicaState::Ok;
            }
        }
        self.running.remove(&segment_id);
    }

    /// Marks one row failed; other rows of its segment stay eligible.
    pub(crate) fn mark_failed(&mut self, idx: usize) {
        let row = &mut self.rows[idx];
        if row.state == ReplicaState::Waiting {
            self.running.remove(&row.segment_id);
        }
        row.state = ReplicaState::Failed;
    }

    /// Segments none of whose rows succeeded, ascending.
    pub(crate) fn unrecovered_segments(&self) -> Vec<u64> {
        self.rows_by_segment
            .iter()
            .filter(|(_, rows)| rows.iter().all(|&i| self.rows[i].state != ReplicaState::Ok))
            .map(|(&segment, _)| segment)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Distinct segment ids on the board.
    pub(crate) fn segment_count(&self) -> usize {
        self.rows_by_segment.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(layout: &[(u64, u64)]) -> Vec<Replica> {
        layout.iter()
            .map(|&(backup, segment)| Replica::new(ServerId::new(backup), segment))
            .collect()
    }

    #[test]
    fn skips_running_segments() {
        let mut rows = rows(&[(1, 7), (2, 7), (1, 8)]);
        let mut board = Scoreboard::new(&mut rows);
        assert_eq!(board.next_candidate(), Some(0));
        board.mark_waiting(0);
        assert_eq!(board.next_candidate(), Some(2));
        board.mark_waiting(2);
        assert_eq!(board.next_candidate(), None);
    }

    #[test]
    fn failure_makes_next_replica_eligible() {
        let mut rows = rows(&[(1, 7), (2, 7)]);
        let mut board = Scoreboard::new(&mut rows);
        board.mark_waiting(0);
        board.mark_failed(0);
        assert_eq!(board.next_candidate(), Some(1));
        board.mark_waiting(1);
        board.mark_ok(7);
        assert_eq!(board.next_candidate(), None);
        assert!(board.unrecovered_segments().is_empty());
        drop(board);
        assert_eq!(rows[0].state, ReplicaState::Ok);
        assert_eq!(rows[1].state, ReplicaState::Ok);
    }

    #[test]
    fn success_settles_all_rows_of_segment() {
        let mut rows = rows(&[(1, 3), (2, 3), (3, 3), (1, 4)]);
        let mut board = Scoreboard::new(&mut rows);
        board.mark_waiting(0);
        board.mark_ok(3);
        assert_eq!(board.next_candidate(), Some(3));
        assert_eq!(board.segment_count(), 2);
    }

    #[test]
    fn reports_unrecovered_segments() {
        let mut rows = rows(&[(1, 9), (1, 2), (2, 2)]);
        let mut board = Scoreboard::new(&mut rows);
        board.mark_failed(0);
        board.mark_waiting(1);
        board.mark_ok(2);
        assert_eq!(board.unrecovered_segments(), vec![9]);
    }

    #[test]
    fn start_failure_does_not_touch_running_set() {
        let mut rows = rows(&[(1, 5), (2, 5)]);
        let mut board = Scoreboard::new(&mut rows);
        board.mark_waiting(1);
        // Row 0 failed before starting; row 1 is still in flight.
        board.mark_failed(0);
        assert_eq!(board.next_candidate(), None);
    }
}
