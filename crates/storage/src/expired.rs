//! Expired-loggable accounting
//!
//! A commit supersedes records: values that were overwritten or deleted,
//! and the pages of the tree revision it replaces. Each committed tree
//! contributes one batch; [`ExpiredLoggables`] flattens the batches into
//! one lazy sequence for the garbage collector to drain at will.

use arbor_core::{Address, StructureId};

/// One superseded record in the log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiredLoggable {
    /// Address of the dead record
    pub address: Address,
    /// Frame length of the dead record in bytes
    pub length: u64,
    /// Tree the record belonged to
    pub structure_id: StructureId,
}

/// Flat lazy sequence over per-tree batches of expired records
pub struct ExpiredLoggables {
    total: usize,
    batches: std::vec::IntoIter<Vec<ExpiredLoggable>>,
    current: std::vec::IntoIter<ExpiredLoggable>,
}

impl ExpiredLoggables {
    /// Build the sequence from per-tree batches
    pub fn from_batches(batches: Vec<Vec<ExpiredLoggable>>) -> Self {
        let total = batches.iter().map(Vec::len).sum();
        ExpiredLoggables {
            total,
            batches: batches.into_iter(),
            current: Vec::new().into_iter(),
        }
    }

    /// An empty sequence
    pub fn empty() -> Self {
        ExpiredLoggables::from_batches(Vec::new())
    }

    /// Total number of expired records across all batches
    pub fn len(&self) -> usize {
        self.total
    }

    /// Check whether there is nothing to reclaim
    pub fn is_empty(&self) -> bool {
        self.total == 0
    }
}

impl Iterator for ExpiredLoggables {
    type Item = ExpiredLoggable;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.current.next() {
                return Some(item);
            }
            self.current = self.batches.next()?.into_iter();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expired(address: Address) -> ExpiredLoggable {
        ExpiredLoggable {
            address,
            length: 32,
            structure_id: StructureId::META,
        }
    }

    #[test]
    fn test_flattens_in_batch_order() {
        let seq = ExpiredLoggables::from_batches(vec![
            vec![expired(0), expired(32)],
            vec![],
            vec![expired(64)],
        ]);
        assert_eq!(seq.len(), 3);
        let addresses: Vec<_> = seq.map(|e| e.address).collect();
        assert_eq!(addresses, vec![0, 32, 64]);
    }

    #[test]
    fn test_empty_sequence() {
        let mut seq = ExpiredLoggables::empty();
        assert!(seq.is_empty());
        assert!(seq.next().is_none());
    }
}
