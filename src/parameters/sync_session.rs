use bitvec::{bitvec, vec::BitVec};
use std::collections::BTreeSet;

/// Bookkeeping of one get-all-parameters run.
///
/// A session is created by every refresh and replaced, never merged, by the next one.
/// `received ⊆ [0, expected)` holds at all times: indices reported before the total is
/// known are parked and folded in once it is latched.
#[derive(Debug, Default)]
pub struct ParameterSyncSession {
    /// Total count, latched from the first message reporting a nonzero total.
    expected: Option<usize>,
    /// One bit per expected index, allocated when `expected` is latched.
    received: BitVec,
    /// Indices seen while `expected` was still unknown.
    early: BTreeSet<u16>,
}

impl ParameterSyncSession {
    pub fn new() -> Self { Self::default() }

    /// Records one value update.
    pub fn record(&mut self, index: u16, total: u16) {
        if self.expected.is_none() && total > 0 {
            let expected = usize::from(total);
            let mut received = bitvec![0; expected];
            for early in std::mem::take(&mut self.early).into_iter().map(usize::from) {
                if early < expected {
                    received.set(early, true);
                }
            }
            self.received = received;
            self.expected = Some(expected);
        }
        match self.expected {
            Some(expected) => {
                let index = usize::from(index);
                if index < expected {
                    self.received.set(index, true);
                }
            }
            None => {
                self.early.insert(index);
            }
        }
    }

    pub fn expected(&self) -> Option<usize> { self.expected }

    /// Number of distinct indices received so far.
    pub fn received_count(&self) -> usize {
        match self.expected {
            Some(_) => self.received.count_ones(),
            None => self.early.len(),
        }
    }

    /// `[0, expected) − received` in ascending order; empty while `expected` is unknown.
    pub fn missing(&self) -> Vec<u16> {
        self.received
            .iter_zeros()
            .filter_map(|i| u16::try_from(i).ok())
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.expected.is_some() && self.received.all()
    }
}
