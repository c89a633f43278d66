//! Eviction policy: decides which resident images to drop to make room.
//!
//! Victims are chosen least-recently-accessed first, in two phases:
//! 1. images not in the related set,
//! 2. if that is not enough, the related images as well.
//!
//! The related set holds frames backing a volume being assembled; evicting
//! them first would force an immediate re-fetch.

use std::collections::HashSet;

/// A resident image that could be evicted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictionCandidate {
    pub id: String,
    pub size_in_bytes: u64,
    pub last_accessed: u64,
}

/// Outcome of victim selection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionPlan {
    /// Ids in eviction order.
    pub victims: Vec<String>,
    pub bytes_freed: u64,
    /// How many victims came from the related set.
    pub related_victims: usize,
    /// Whether the victims free at least the requested bytes.
    pub satisfied: bool,
}

/// The eviction policy engine.
#[derive(Debug, Default, Clone, Copy)]
pub struct Evictor;

impl Evictor {
    pub fn new() -> Self {
        Self
    }

    /// Select victims freeing at least `bytes_to_free` bytes.
    ///
    /// Entries with equal `last_accessed` keep their input order. When the
    /// candidates cannot free enough, the returned plan lists every candidate
    /// and `satisfied` is false; callers must not apply it.
    pub fn select_victims(
        &self,
        candidates: Vec<EvictionCandidate>,
        bytes_to_free: u64,
        related_ids: &HashSet<String>,
    ) -> EvictionPlan {
        let mut plan = EvictionPlan::default();
        if bytes_to_free == 0 {
            plan.satisfied = true;
            return plan;
        }

        let (mut related, mut unrelated): (Vec<_>, Vec<_>) =
            candidates.into_iter().partition(|c| related_ids.contains(&c.id));

        unrelated.sort_by_key(|c| c.last_accessed);
        related.sort_by_key(|c| c.last_accessed);

        for candidate in unrelated {
            if plan.bytes_freed >= bytes_to_free {
                break;
            }
            plan.bytes_freed += candidate.size_in_bytes;
            plan.victims.push(candidate.id);
        }

        for candidate in related {
            if plan.bytes_freed >= bytes_to_free {
                break;
            }
            plan.bytes_freed += candidate.size_in_bytes;
            plan.victims.push(candidate.id);
            plan.related_victims += 1;
        }

        plan.satisfied = plan.bytes_freed >= bytes_to_free;
        plan
    }
}
