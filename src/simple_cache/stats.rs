use std::fmt;

const NUM_BUCKETS: usize = 16;

/// Histogram with a fixed number of buckets whose width doubles whenever a
/// sample falls beyond the covered range.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Histogram {
    bucket_size: u64,
    buckets: [u64; NUM_BUCKETS],
    samples: u64,
    sum: u64,
    min: Option<u64>,
    max: Option<u64>,
}

impl Default for Histogram {
    fn default() -> Self {
        Self {
            bucket_size: 1,
            buckets: [0; NUM_BUCKETS],
            samples: 0,
            sum: 0,
            min: None,
            max: None,
        }
    }
}

impl Histogram {
    pub fn sample(&mut self, v: u64) {
        while v / self.bucket_size >= NUM_BUCKETS as u64 {
            self.grow();
        }
        self.buckets[(v / self.bucket_size) as usize] += 1;
        self.samples += 1;
        self.sum = self.sum.saturating_add(v);
        self.min = Some(self.min.map_or(v, |m| m.min(v)));
        self.max = Some(self.max.map_or(v, |m| m.max(v)));
    }

    // merge neighbouring buckets pairwise
    fn grow(&mut self) {
        let mut merged = [0; NUM_BUCKETS];
        for (i, b) in self.buckets.iter().enumerate() {
            merged[i / 2] += b;
        }
        self.buckets = merged;
        self.bucket_size *= 2;
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }
    pub fn bucket_size(&self) -> u64 {
        self.bucket_size
    }
    pub fn buckets(&self) -> &[u64] {
        &self.buckets
    }
    pub fn min(&self) -> Option<u64> {
        self.min
    }
    pub fn max(&self) -> Option<u64> {
        self.max
    }
    pub fn mean(&self) -> Option<f64> {
        (self.samples > 0).then(|| self.sum as f64 / self.samples as f64)
    }
}

/// Counters kept by the cache.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// cycles from acceptance of a missing request to its completion
    pub miss_latency: Histogram,
    pub evictions: u64,
    pub writebacks: u64,
    pub refusals: u64,
    pub retries_sent: u64,
    pub occupancy: usize,
    pub peak_occupancy: usize,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> Option<f64> {
        let accesses = self.hits + self.misses;
        (accesses > 0).then(|| self.hits as f64 / accesses as f64)
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "hits            {}", self.hits)?;
        writeln!(f, "misses          {}", self.misses)?;
        match self.hit_ratio() {
            Some(r) => writeln!(f, "hit ratio       {:.4}", r)?,
            None => writeln!(f, "hit ratio       n/a")?,
        }
        if let Some(mean) = self.miss_latency.mean() {
            writeln!(f, "miss latency    mean {:.2} min {} max {} (bucket {})",
                mean,
                self.miss_latency.min().unwrap_or(0),
                self.miss_latency.max().unwrap_or(0),
                self.miss_latency.bucket_size())?;
        }
        writeln!(f, "evictions       {}", self.evictions)?;
        writeln!(f, "writebacks      {}", self.writebacks)?;
        writeln!(f, "refusals        {}", self.refusals)?;
        writeln!(f, "retries sent    {}", self.retries_sent)?;
        write!(f, "occupancy       {} (peak {})", self.occupancy, self.peak_occupancy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn histogram_grows() {
        let mut h = Histogram::default();
        h.sample(3);
        h.sample(15);
        assert_eq!(h.bucket_size(), 1);
        assert_eq!(h.buckets()[3], 1);

        h.sample(40);
        assert_eq!(h.bucket_size(), 4);
        assert_eq!(h.buckets()[0], 1);
        assert_eq!(h.buckets()[3], 1);
        assert_eq!(h.buckets()[10], 1);
        assert_eq!(h.samples(), 3);
        assert_eq!(h.min(), Some(3));
        assert_eq!(h.max(), Some(40));
    }

    #[test]
    fn histogram_takes_huge_samples() {
        let mut h = Histogram::default();
        h.sample(1);
        h.sample(u64::MAX);
        assert_eq!(h.bucket_size(), 1 << 60);
        assert_eq!(h.buckets()[0], 1);
        assert_eq!(h.buckets()[15], 1);
        assert_eq!(h.max(), Some(u64::MAX));
        h.sample(u64::MAX);
        assert_eq!(h.samples(), 3);
    }

    #[test]
    fn hit_ratio() {
        let mut stats = CacheStats::default();
        assert_eq!(stats.hit_ratio(), None);
        stats.hits = 3;
        stats.misses = 1;
        assert_eq!(stats.hit_ratio(), Some(0.75));
    }
}
