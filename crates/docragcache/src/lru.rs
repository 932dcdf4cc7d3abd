//! LRU eviction policy
//!
//! Eviction runs in batches: once the store holds more than half of
//! `max_documents`, the older half goes. If what is left plus the incoming
//! batch would still break the size cap, more of the oldest records go until
//! it fits.

use std::collections::HashMap;

use ahash::RandomState;
use docragdb::DocumentRecord;

/// Incoming document sizes keyed by id
pub(crate) type IncomingSizes<'a> = HashMap<&'a str, u64, RandomState>;

/// Records chosen for deletion before a batch is written
#[derive(Debug, Default, Clone, PartialEq)]
pub(crate) struct EvictionPlan {
    /// Ids to delete, oldest first
    pub ids: Vec<String>,
    /// How many of `ids` the halving step chose
    pub by_count: usize,
    /// How many of `ids` were needed to fit the size cap
    pub by_size: usize,
}

impl EvictionPlan {
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Number of records the halving step removes from a store of `count`
pub(crate) fn halving_count(count: usize, max_documents: usize) -> usize {
    // count > max_documents / 2, without losing the odd half
    if count.saturating_mul(2) > max_documents {
        count / 2
    } else {
        0
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct EvictionPolicy {
    max_documents: usize,
    max_total_size: u64,
}

impl EvictionPolicy {
    pub fn new(max_documents: usize, max_total_size: u64) -> Self {
        Self {
            max_documents,
            max_total_size,
        }
    }

    /// Pick victims among existing records
    ///
    /// `oldest_first` must be ordered by ascending `last_accessed`, ties by
    /// ascending id. Records whose id is in `incoming` are about to be
    /// overwritten, so they never count towards the projected size.
    pub fn plan<'a, I>(&self, oldest_first: I, incoming: &IncomingSizes<'_>) -> EvictionPlan
    where
        I: IntoIterator<Item = &'a DocumentRecord>,
    {
        let existing: Vec<&DocumentRecord> = oldest_first.into_iter().collect();
        let by_count = halving_count(existing.len(), self.max_documents);

        let mut plan = EvictionPlan {
            ids: existing[..by_count].iter().map(|r| r.id.clone()).collect(),
            by_count,
            by_size: 0,
        };

        let survivors: Vec<&DocumentRecord> = existing[by_count..]
            .iter()
            .copied()
            .filter(|r| !incoming.contains_key(r.id.as_str()))
            .collect();

        let mut projected: u64 = survivors.iter().map(|r| r.size_bytes).sum::<u64>()
            + incoming.values().sum::<u64>();

        for record in survivors {
            if projected <= self.max_total_size {
                break;
            }
            projected -= record.size_bytes;
            plan.ids.push(record.id.clone());
            plan.by_size += 1;
        }

        plan
    }
}
