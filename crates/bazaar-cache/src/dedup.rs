//! Cross-section deduplicator
//!
//! One page render allocates a [`CycleId`]; every section assembled for that
//! render claims products through the same cycle. A product claimed by one
//! section is never handed to another. Cycle memory lives in a moka cache
//! whose TTL releases cycles nobody ended explicitly.

use bazaar_model::{CycleId, ProductId};
use moka::future::Cache;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

type Claimed = Arc<Mutex<HashSet<ProductId>>>;

/// Per-cycle claim registry
#[derive(Debug, Clone)]
pub struct Deduplicator {
    cycles: Cache<CycleId, Claimed>,
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::new(10_000, Duration::from_secs(60))
    }
}

impl Deduplicator {
    /// Create registry holding at most `max_cycles` cycles for `ttl` each
    #[must_use]
    pub fn new(max_cycles: u64, ttl: Duration) -> Self {
        Self {
            cycles: Cache::builder()
                .max_capacity(max_cycles)
                .time_to_live(ttl)
                .build(),
        }
    }

    async fn cycle(&self, cycle: CycleId) -> Claimed {
        self.cycles
            .get_with(cycle, async { Arc::new(Mutex::new(HashSet::new())) })
            .await
    }

    /// Claim up to `want` of `candidates`, in order, skipping claimed ones
    pub async fn claim(
        &self,
        cycle: CycleId,
        candidates: &[ProductId],
        want: usize,
    ) -> Vec<ProductId> {
        self.claim_with(cycle, |claimed| {
            let mut seen = HashSet::new();
            candidates
                .iter()
                .filter(|id| !claimed.contains(*id) && seen.insert(*id))
                .take(want)
                .cloned()
                .collect()
        })
        .await
    }

    /// Run `select` against the cycle's claimed set and claim its result
    ///
    /// Selection and marking happen under one lock, so two sections of the
    /// same cycle cannot both take a product. Ids in the result that were
    /// already claimed are dropped.
    pub async fn claim_with<F>(&self, cycle: CycleId, select: F) -> Vec<ProductId>
    where
        F: FnOnce(&HashSet<ProductId>) -> Vec<ProductId>,
    {
        let claimed = self.cycle(cycle).await;
        let mut guard = claimed.lock();
        let chosen = select(&guard);
        let chosen: Vec<ProductId> = chosen
            .into_iter()
            .filter(|id| guard.insert(id.clone()))
            .collect();
        tracing::trace!(%cycle, claimed = chosen.len(), total = guard.len(), "cycle claim");
        chosen
    }

    /// Products claimed so far in `cycle`
    pub async fn claimed(&self, cycle: CycleId) -> HashSet<ProductId> {
        match self.cycles.get(&cycle).await {
            Some(claimed) => claimed.lock().clone(),
            None => HashSet::new(),
        }
    }

    /// Release `cycle`
    pub async fn end_cycle(&self, cycle: CycleId) {
        self.cycles.invalidate(&cycle).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(raw: &[&str]) -> Vec<ProductId> {
        raw.iter().map(|s| ProductId::from(*s)).collect()
    }

    #[tokio::test]
    async fn first_section_wins() {
        let dedup = Deduplicator::default();
        let cycle = CycleId::new();

        let trending = dedup.claim(cycle, &ids(&["p1", "p2", "p3"]), 2).await;
        assert_eq!(trending, ids(&["p1", "p2"]));

        let new = dedup.claim(cycle, &ids(&["p2", "p3", "p4"]), 2).await;
        assert_eq!(new, ids(&["p3", "p4"]));

        assert_eq!(dedup.claimed(cycle).await.len(), 4);
    }

    #[tokio::test]
    async fn cycles_are_independent() {
        let dedup = Deduplicator::default();
        let a = CycleId::new();
        let b = CycleId::new();
        dedup.claim(a, &ids(&["p1"]), 1).await;
        assert_eq!(dedup.claim(b, &ids(&["p1"]), 1).await, ids(&["p1"]));
    }

    #[tokio::test]
    async fn ending_a_cycle_releases_it() {
        let dedup = Deduplicator::default();
        let cycle = CycleId::new();
        dedup.claim(cycle, &ids(&["p1"]), 1).await;
        dedup.end_cycle(cycle).await;
        assert!(dedup.claimed(cycle).await.is_empty());
    }

    #[tokio::test]
    async fn duplicates_in_one_selection_are_claimed_once() {
        let dedup = Deduplicator::default();
        let cycle = CycleId::new();
        let chosen = dedup
            .claim_with(cycle, |_| ids(&["p1", "p1", "p2"]))
            .await;
        assert_eq!(chosen, ids(&["p1", "p2"]));
        assert!(dedup.claim(cycle, &ids(&["p1", "p2"]), 5).await.is_empty());
    }

    #[tokio::test]
    async fn concurrent_sections_never_share_products() {
        let dedup = Deduplicator::default();
        let cycle = CycleId::new();
        let pool = ids(&["p1", "p2", "p3", "p4", "p5", "p6"]);

        let mut handles = Vec::new();
        for _ in 0..4 {
            let dedup = dedup.clone();
            let pool = pool.clone();
            handles.push(tokio::spawn(async move {
                dedup.claim(cycle, &pool, 3).await
            }));
        }

        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.await.unwrap());
        }
        let unique: HashSet<_> = all.iter().cloned().collect();
        assert_eq!(unique.len(), all.len());
        assert_eq!(all.len(), 6);
    }
}
