//! Token-bucket bandwidth limiter, one instance per direction (up/down) per session. Grounded in
//! the bandwidth-budget enforcement described alongside `next_session_entry_t`'s `kbps_up`/
//! `kbps_down` fields.

pub struct BandwidthLimiter {
    kbps: u32,
    bucket_bytes: f64,
    capacity_bytes: f64,
    over_limit: bool,
}

/// Burst allowance expressed in seconds of the configured rate.
const BUCKET_SECONDS: f64 = 1.0;

impl BandwidthLimiter {
    pub fn new(kbps: u32) -> Self {
        let capacity_bytes = kbps as f64 * 1000.0 / 8.0 * BUCKET_SECONDS;
        BandwidthLimiter { kbps, bucket_bytes: capacity_bytes, capacity_bytes, over_limit: false }
    }

    pub fn set_kbps(&mut self, kbps: u32) {
        self.kbps = kbps;
        self.capacity_bytes = kbps as f64 * 1000.0 / 8.0 * BUCKET_SECONDS;
        self.bucket_bytes = self.bucket_bytes.min(self.capacity_bytes);
    }

    pub fn kbps(&self) -> u32 {
        self.kbps
    }

    /// Refills the bucket for `dt` seconds elapsed since the last call.
    pub fn update(&mut self, dt: f64) {
        self.bucket_bytes = (self.bucket_bytes + self.capacity_bytes / BUCKET_SECONDS * dt)
            .min(self.capacity_bytes);
    }

    /// Attempts to spend `bytes` from the bucket. Returns `false` (and sets the over-limit bit)
    /// if there isn't enough budget; the caller still sends the packet — Network Next's bandwidth
    /// tracker reports, it doesn't drop.
    pub fn consume(&mut self, bytes: usize) -> bool {
        if bytes as f64 > self.bucket_bytes {
            self.over_limit = true;
            return false;
        }

        self.bucket_bytes -= bytes as f64;
        self.over_limit = false;
        true
    }

    pub fn is_over_limit(&self) -> bool {
        self.over_limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consumes_within_budget() {
        let mut limiter = BandwidthLimiter::new(800); // 100,000 bytes/s
        assert!(limiter.consume(50_000));
        assert!(!limiter.is_over_limit());
    }

    #[test]
    fn flags_over_limit_when_bucket_drained() {
        let mut limiter = BandwidthLimiter::new(8); // 1,000 bytes/s
        assert!(limiter.consume(900));
        assert!(!limiter.consume(500));
        assert!(limiter.is_over_limit());
    }

    #[test]
    fn refills_over_time() {
        let mut limiter = BandwidthLimiter::new(8); // 1,000 bytes/s
        limiter.consume(1000);
        limiter.update(0.5);
        assert!(limiter.consume(400));
    }

    #[test]
    fn rate_change_caps_existing_bucket() {
        let mut limiter = BandwidthLimiter::new(800);
        limiter.set_kbps(8);
        assert_eq!(limiter.kbps(), 8);
    }
}
