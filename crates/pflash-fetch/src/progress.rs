/// Tracks downloaded bytes and reports each new 10% bucket exactly once.
///
/// With an unknown (or zero) total nothing is ever reported.
#[derive(Debug, Clone)]
pub struct ProgressBuckets {
    total: Option<u64>,
    downloaded: u64,
    last_bucket: Option<u8>,
}

impl ProgressBuckets {
    pub fn new(total: Option<u64>) -> Self {
        Self {
            total: total.filter(|t| *t > 0),
            downloaded: 0,
            last_bucket: None,
        }
    }

    pub fn downloaded(&self) -> u64 {
        self.downloaded
    }

    pub fn total(&self) -> Option<u64> {
        self.total
    }

    /// Records `bytes` more and returns the new percentage (0, 10, ... 100)
    /// when a higher bucket has been reached.
    pub fn advance(&mut self, bytes: u64) -> Option<u8> {
        self.downloaded = self.downloaded.saturating_add(bytes);
        let total = self.total?;
        let percent = (self.downloaded.saturating_mul(100) / total).min(100);
        let bucket = (percent / 10) as u8;
        if self.last_bucket.is_some_and(|last| bucket <= last) {
            return None;
        }
        self.last_bucket = Some(bucket);
        Some(bucket * 10)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_total_never_reports() {
        let mut progress = ProgressBuckets::new(None);
        assert_eq!(progress.advance(1024), None);
        assert_eq!(progress.downloaded(), 1024);

        let mut zero = ProgressBuckets::new(Some(0));
        assert_eq!(zero.advance(10), None);
    }

    #[test]
    fn buckets_are_monotonic_and_unique() {
        let mut progress = ProgressBuckets::new(Some(1000));
        let mut seen = Vec::new();
        for _ in 0..40 {
            if let Some(p) = progress.advance(25) {
                seen.push(p);
            }
        }
        assert_eq!(seen, vec![0, 10, 20, 30, 40, 50, 60, 70, 80, 90, 100]);
    }

    #[test]
    fn large_chunks_skip_buckets_without_repeating() {
        let mut progress = ProgressBuckets::new(Some(100));
        assert_eq!(progress.advance(45), Some(40));
        assert_eq!(progress.advance(4), None);
        assert_eq!(progress.advance(51), Some(100));
        assert_eq!(progress.advance(10), None);
    }
}
