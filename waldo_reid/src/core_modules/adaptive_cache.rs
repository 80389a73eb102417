// THEORY:
// The `AdaptiveCache` is the engine's learned memory. The base set captured during
// enrollment never changes, but clothes crease, light shifts, and the person turns in
// ways enrollment never saw. The cache lets the reference pool follow that drift
// without letting it wander off.
//
// Key architectural principles:
// 1.  **Bounded**: a fixed-capacity ring buffer (slots + head index). When full, the
//     oldest descriptor is overwritten. Memory is fixed at construction and the
//     per-frame path never reallocates.
// 2.  **Time-gated**: `AdmissionGate` admits at most one descriptor per interval, no
//     matter how many frames per second arrive. This bounds how fast the pool can
//     drift.
// 3.  **Stricter bar to learn than to act**: the gate only admits samples whose score
//     is strictly above the admission threshold, which sits above the acceptance
//     threshold. A marginal false match can be displayed but cannot teach the cache.

use crate::core_modules::histogram::FeatureVector;
use std::time::{Duration, Instant};
use tracing::debug;

/// Fixed-capacity FIFO store of learned descriptors.
#[derive(Debug, Clone)]
pub struct AdaptiveCache {
    slots: Vec<Option<FeatureVector>>,
    /// Index of the oldest entry.
    head: usize,
    len: usize,
}

impl AdaptiveCache {
    /// Creates an empty cache. A capacity of zero is bumped to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: vec![None; capacity],
            head: 0,
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Appends a descriptor, returning the evicted oldest one when the cache was full.
    pub fn push(&mut self, feature: FeatureVector) -> Option<FeatureVector> {
        let capacity = self.capacity();
        if self.len < capacity {
            let tail = (self.head + self.len) % capacity;
            self.slots[tail] = Some(feature);
            self.len += 1;
            None
        } else {
            let evicted = self.slots[self.head].replace(feature);
            self.head = (self.head + 1) % capacity;
            evicted
        }
    }

    /// Iterates from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &FeatureVector> + Clone + '_ {
        let capacity = self.capacity();
        (0..self.len).filter_map(move |i| self.slots[(self.head + i) % capacity].as_ref())
    }

    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.head = 0;
        self.len = 0;
    }
}

/// Decides when an accepted sample may be learned.
#[derive(Debug, Clone)]
pub struct AdmissionGate {
    threshold: f64,
    interval: Duration,
    last_admission: Option<Instant>,
}

impl AdmissionGate {
    pub fn new(threshold: f64, interval: Duration) -> Self {
        Self {
            threshold,
            interval,
            last_admission: None,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn last_admission(&self) -> Option<Instant> {
        self.last_admission
    }

    /// True if a sample with `score` may be admitted at `now`. Does not mutate.
    pub fn permits(&self, score: f64, now: Instant) -> bool {
        if score <= self.threshold {
            return false;
        }
        match self.last_admission {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        }
    }

    /// Records an admission at `now`, restarting the interval.
    pub fn record(&mut self, now: Instant) {
        self.last_admission = Some(now);
    }

    /// Admits `feature` into `cache` if the gate permits it. Returns true when the
    /// cache changed.
    pub fn try_admit(
        &mut self,
        cache: &mut AdaptiveCache,
        feature: &FeatureVector,
        score: f64,
        now: Instant,
    ) -> bool {
        if !self.permits(score, now) {
            return false;
        }
        let evicted = cache.push(feature.clone());
        self.record(now);
        debug!(
            score,
            cache_len = cache.len(),
            evicted = evicted.is_some(),
            "admitted feature into adaptive cache"
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tagged(tag: usize) -> FeatureVector {
        let mut bins = vec![0.0f32; 32];
        bins[tag % 32] = 1.0;
        bins[(tag / 32) % 32] += 0.5;
        FeatureVector::from_bins(4, 8, bins).expect("valid shape")
    }

    #[test]
    fn fills_then_evicts_oldest_first() {
        let mut cache = AdaptiveCache::new(3);
        assert!(cache.push(tagged(1)).is_none());
        assert!(cache.push(tagged(2)).is_none());
        assert!(cache.push(tagged(3)).is_none());
        assert_eq!(cache.push(tagged(4)), Some(tagged(1)));
        assert_eq!(cache.push(tagged(5)), Some(tagged(2)));
        let order: Vec<_> = cache.iter().cloned().collect();
        assert_eq!(order, vec![tagged(3), tagged(4), tagged(5)]);
    }

    #[test]
    fn length_never_exceeds_capacity() {
        let mut cache = AdaptiveCache::new(20);
        for i in 0..21 {
            cache.push(tagged(i));
            assert!(cache.len() <= 20);
        }
        assert_eq!(cache.len(), 20);
        assert!(cache.iter().all(|f| f != &tagged(0)), "first admitted entry should be evicted");
    }

    #[test]
    fn clear_resets_the_ring() {
        let mut cache = AdaptiveCache::new(2);
        cache.push(tagged(1));
        cache.push(tagged(2));
        cache.push(tagged(3));
        cache.clear();
        assert!(cache.is_empty());
        cache.push(tagged(9));
        assert_eq!(cache.iter().cloned().collect::<Vec<_>>(), vec![tagged(9)]);
    }

    #[test]
    fn gate_requires_score_strictly_above_threshold() {
        let gate = AdmissionGate::new(0.8, Duration::from_secs(10));
        let now = Instant::now();
        assert!(!gate.permits(0.8, now));
        assert!(gate.permits(0.8001, now));
    }

    #[test]
    fn gate_admits_once_per_interval_regardless_of_frame_rate() {
        let mut gate = AdmissionGate::new(0.8, Duration::from_secs(10));
        let mut cache = AdaptiveCache::new(20);
        let start = Instant::now();
        let feature = tagged(7);
        // 30 fps for 10 seconds: 300 qualifying frames.
        let admissions = (0..300)
            .filter(|frame| {
                let now = start + Duration::from_millis(frame * 1000 / 30);
                gate.try_admit(&mut cache, &feature, 0.95, now)
            })
            .count();
        assert_eq!(admissions, 1);
        assert_eq!(cache.len(), 1);
        assert!(gate.try_admit(&mut cache, &feature, 0.95, start + Duration::from_secs(10)));
    }
}
