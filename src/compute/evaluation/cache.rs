//! Phenotype-keyed evaluation cache with request coalescing.
//!
//! Every distinct phenotype is evaluated at most once while its entry lives.
//! Requests that arrive while the first evaluation is in flight wait on the
//! entry and are filled by [`EvaluationCache::store`]. Size is bounded at
//! generation boundaries by an approximate LRU that tracks recency per
//! generation, not per access.

use std::collections::{BTreeMap, HashMap};
use std::ops::AddAssign;
use std::sync::Arc;

use log::{trace, warn};

use crate::schema::Fitness;

use super::Candidate;

/// One distinct phenotype.
#[derive(Debug)]
pub struct CacheEntry<C> {
    fitness: Option<Fitness>,
    generation_stored: u64,
    generation_last_used: u64,
    waiters: Vec<Arc<C>>,
}

impl<C> CacheEntry<C> {
    fn new(generation: u64) -> Self {
        Self {
            fitness: None,
            generation_stored: generation,
            generation_last_used: generation,
            waiters: Vec::new(),
        }
    }

    pub fn fitness(&self) -> Option<&Fitness> {
        self.fitness.as_ref()
    }

    pub fn generation_stored(&self) -> u64 {
        self.generation_stored
    }

    pub fn generation_last_used(&self) -> u64 {
        self.generation_last_used
    }

    /// Candidates waiting for the in-flight evaluation.
    pub fn waiter_count(&self) -> usize {
        self.waiters.len()
    }
}

/// How a lookup was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    /// Fitness was known and copied into the candidate.
    Resolved,
    /// An evaluation is in flight; the candidate waits on it.
    Coalesced,
    /// New phenotype; the candidate must be sent to a backend.
    Forward,
}

/// Evaluation accounting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheCounters {
    /// Lookups that required a real evaluation.
    pub actual: u64,
    /// Repeated lookups of a phenotype within one generation.
    pub duplicate: u64,
    /// Lookups served from an earlier generation.
    pub cache_hit: u64,
}

impl CacheCounters {
    pub fn total(&self) -> u64 {
        self.actual + self.duplicate + self.cache_hit
    }
}

impl AddAssign for CacheCounters {
    fn add_assign(&mut self, other: Self) {
        self.actual += other.actual;
        self.duplicate += other.duplicate;
        self.cache_hit += other.cache_hit;
    }
}

/// Phenotype to entry map. Not synchronized; share it behind a mutex.
#[derive(Debug)]
pub struct EvaluationCache<C> {
    entries: HashMap<String, CacheEntry<C>>,
    max_size: usize,
    generation: u64,
    counters: CacheCounters,
}

impl<C: Candidate> EvaluationCache<C> {
    /// Create a cache keeping at most `max_size` entries across generations.
    /// Zero disables reuse across generations.
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: HashMap::new(),
            max_size,
            generation: 0,
            counters: CacheCounters::default(),
        }
    }

    /// Look a candidate up, copying a known fitness into it or queueing it
    /// behind an in-flight evaluation.
    pub fn evaluate(&mut self, candidate: &Arc<C>) -> Lookup {
        let phenotype = candidate.phenotype();

        if let Some(entry) = self.entries.get_mut(phenotype) {
            let lookup = match &entry.fitness {
                Some(fitness) => {
                    candidate.fitness().set(fitness.clone());
                    Lookup::Resolved
                }
                None => {
                    entry.waiters.push(Arc::clone(candidate));
                    Lookup::Coalesced
                }
            };

            if entry.generation_last_used == self.generation {
                self.counters.duplicate += 1;
                trace!("{}: duplicate of {}", candidate.id(), phenotype);
            } else {
                entry.generation_last_used = self.generation;
                self.counters.cache_hit += 1;
                trace!("{}: cache hit for {}", candidate.id(), phenotype);
            }
            return lookup;
        }

        self.entries
            .insert(phenotype.to_string(), CacheEntry::new(self.generation));
        self.counters.actual += 1;
        trace!("{}: new phenotype {}", candidate.id(), phenotype);
        Lookup::Forward
    }

    /// Fill an entry and every candidate waiting on it. Returns the number of
    /// waiters filled.
    pub fn store(&mut self, phenotype: &str, fitness: Fitness) -> usize {
        let Some(entry) = self.entries.get_mut(phenotype) else {
            warn!("Storing fitness for {} which is not cached", phenotype);
            return 0;
        };
        if entry.fitness.is_some() {
            warn!("Fitness for {} stored twice, keeping the first", phenotype);
            return 0;
        }

        let waiters = std::mem::take(&mut entry.waiters);
        for waiter in &waiters {
            waiter.fitness().set(fitness.clone());
        }
        entry.fitness = Some(fitness);
        waiters.len()
    }

    /// Drop an entry whose evaluation failed, returning its waiters.
    pub fn abandon(&mut self, phenotype: &str) -> Vec<Arc<C>> {
        self.entries
            .remove(phenotype)
            .map(|entry| entry.waiters)
            .unwrap_or_default()
    }

    /// Move to `generation` and evict the least recently used entries beyond
    /// the size bound.
    pub fn step(&mut self, generation: u64) {
        self.generation = generation;

        if self.max_size == 0 {
            self.entries.clear();
            return;
        }
        if self.entries.len() <= self.max_size {
            return;
        }

        let mut histogram: BTreeMap<u64, usize> = BTreeMap::new();
        for entry in self.entries.values() {
            *histogram.entry(entry.generation_last_used).or_default() += 1;
        }

        // Quota per generation bucket, oldest first.
        let mut excess = self.entries.len() - self.max_size;
        let mut quota: HashMap<u64, usize> = HashMap::new();
        for (&used, &count) in &histogram {
            if excess == 0 {
                break;
            }
            let take = count.min(excess);
            quota.insert(used, take);
            excess -= take;
        }

        self.entries.retain(|_, entry| match quota.get_mut(&entry.generation_last_used) {
            Some(left) if *left > 0 => {
                *left -= 1;
                false
            }
            _ => true,
        });
        trace!(
            "Cache trimmed to {} entries at generation {}",
            self.entries.len(),
            generation
        );
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn get(&self, phenotype: &str) -> Option<&CacheEntry<C>> {
        self.entries.get(phenotype)
    }

    pub fn contains(&self, phenotype: &str) -> bool {
        self.entries.contains_key(phenotype)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn counters(&self) -> CacheCounters {
        self.counters
    }

    /// Return the counters and start counting from zero.
    pub fn take_counters(&mut self) -> CacheCounters {
        std::mem::take(&mut self.counters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::evaluation::candidate::testing::TestCandidate;
    use proptest::prelude::*;

    fn candidate(id: &str, phenotype: &str) -> Arc<TestCandidate> {
        Arc::new(TestCandidate::new(id, phenotype))
    }

    #[test]
    fn test_coalescing() {
        let mut cache = EvaluationCache::new(10);
        cache.step(1);
        let first = candidate("1", "A");
        let second = candidate("2", "A");

        assert_eq!(cache.evaluate(&first), Lookup::Forward);
        assert_eq!(cache.evaluate(&second), Lookup::Coalesced);
        assert_eq!(cache.get("A").unwrap().waiter_count(), 1);

        let fitness = Fitness::new(vec![4.0]);
        first.fitness().set(fitness.clone());
        assert_eq!(cache.store("A", fitness.clone()), 1);
        assert_eq!(second.fitness().get(), Some(fitness.clone()));
        assert_eq!(cache.get("A").unwrap().waiter_count(), 0);

        cache.step(2);
        let third = candidate("3", "A");
        assert_eq!(cache.evaluate(&third), Lookup::Resolved);
        assert_eq!(third.fitness().get(), Some(fitness));

        let counters = cache.counters();
        assert_eq!(counters.actual, 1);
        assert_eq!(counters.duplicate, 1);
        assert_eq!(counters.cache_hit, 1);
    }

    #[test]
    fn test_same_generation_repeat_is_duplicate() {
        let mut cache = EvaluationCache::new(10);
        cache.evaluate(&candidate("1", "A"));
        cache.store("A", Fitness::new(vec![1.0]));
        assert_eq!(cache.evaluate(&candidate("2", "A")), Lookup::Resolved);
        assert_eq!(cache.counters().duplicate, 1);
        assert_eq!(cache.counters().cache_hit, 0);
    }

    #[test]
    fn test_lru_scenario() {
        let mut cache = EvaluationCache::new(2);
        for (generation, phenotype) in [(1, "A"), (2, "B"), (3, "C")] {
            cache.step(generation);
            cache.evaluate(&candidate(phenotype, phenotype));
            cache.store(phenotype, Fitness::new(vec![generation as f64]));
        }
        cache.step(4);

        assert_eq!(cache.len(), 2);
        assert!(!cache.contains("A"));
        assert!(cache.contains("B"));
        assert!(cache.contains("C"));
    }

    #[test]
    fn test_touch_protects_entry() {
        let mut cache = EvaluationCache::new(2);
        for (generation, phenotype) in [(1, "A"), (2, "B"), (3, "C")] {
            cache.step(generation);
            cache.evaluate(&candidate(phenotype, phenotype));
            cache.store(phenotype, Fitness::new(vec![1.0]));
        }
        // Reading A in generation 3 makes B the oldest.
        cache.evaluate(&candidate("again", "A"));
        cache.step(4);
        assert!(cache.contains("A"));
        assert!(!cache.contains("B"));
        assert_eq!(cache.get("A").unwrap().generation_stored(), 1);
    }

    #[test]
    fn test_zero_size_disables_reuse() {
        let mut cache = EvaluationCache::new(0);
        cache.evaluate(&candidate("1", "A"));
        cache.store("A", Fitness::new(vec![1.0]));
        cache.step(1);
        assert!(cache.is_empty());
        assert_eq!(cache.evaluate(&candidate("2", "A")), Lookup::Forward);
    }

    #[test]
    fn test_abandon_returns_waiters() {
        let mut cache = EvaluationCache::new(10);
        cache.evaluate(&candidate("1", "A"));
        cache.evaluate(&candidate("2", "A"));
        let waiters = cache.abandon("A");
        assert_eq!(waiters.len(), 1);
        assert_eq!(waiters[0].id(), "2");
        assert!(!cache.contains("A"));
    }

    #[test]
    fn test_store_twice_keeps_first() {
        let mut cache = EvaluationCache::new(10);
        cache.evaluate(&candidate("1", "A"));
        cache.store("A", Fitness::new(vec![1.0]));
        cache.store("A", Fitness::new(vec![2.0]));
        assert_eq!(
            cache.get("A").unwrap().fitness(),
            Some(&Fitness::new(vec![1.0]))
        );
        assert_eq!(cache.store("missing", Fitness::new(vec![1.0])), 0);
    }

    proptest! {
        #[test]
        fn prop_counters_account_for_every_lookup(
            generations in prop::collection::vec(prop::collection::vec(0u8..12, 0..30), 1..8),
            max_size in 0usize..8,
        ) {
            let mut cache = EvaluationCache::new(max_size);
            let mut calls = 0u64;
            let mut totals = CacheCounters::default();

            for (g, lookups) in generations.iter().enumerate() {
                cache.step(g as u64 + 1);
                for (i, key) in lookups.iter().enumerate() {
                    let phenotype = format!("p{}", key);
                    let c = candidate(&format!("{}-{}", g, i), &phenotype);
                    if cache.evaluate(&c) == Lookup::Forward {
                        cache.store(&phenotype, Fitness::new(vec![f64::from(*key)]));
                    }
                    calls += 1;
                }
                totals += cache.take_counters();
            }
            prop_assert_eq!(totals.total(), calls);
        }

        #[test]
        fn prop_eviction_keeps_most_recent(
            generations in prop::collection::vec(prop::collection::vec(0u8..20, 1..6), 2..10),
            max_size in 1usize..10,
        ) {
            let mut cache = EvaluationCache::new(usize::MAX);
            for (g, lookups) in generations.iter().enumerate() {
                cache.step(g as u64 + 1);
                for key in lookups {
                    let phenotype = format!("p{}", key);
                    if cache.evaluate(&candidate(&phenotype, &phenotype)) == Lookup::Forward {
                        cache.store(&phenotype, Fitness::new(vec![1.0]));
                    }
                }
            }

            let before: Vec<(String, u64)> = cache
                .entries
                .iter()
                .map(|(k, e)| (k.clone(), e.generation_last_used))
                .collect();
            cache.max_size = max_size;
            cache.step(generations.len() as u64 + 1);

            prop_assert_eq!(cache.len(), before.len().min(max_size));
            let oldest_kept = cache.entries.values().map(|e| e.generation_last_used).min();
            for (phenotype, used) in &before {
                if !cache.contains(phenotype) {
                    prop_assert!(oldest_kept.is_none_or(|kept| *used <= kept));
                }
            }
        }
    }
}
