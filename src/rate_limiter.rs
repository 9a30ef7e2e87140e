//! Rate-limited stream wrapper.
//!
//! A token bucket sized in bytes/sec. Before satisfying a read it tops up
//! the bucket based on elapsed wall-clock time, then sleeps the calling
//! thread for however long is needed to afford the request -- reads run on
//! a blocking I/O pool thread, so a plain `thread::sleep` is the right
//! primitive. Slept nanoseconds accumulate into an atomic counter so
//! operators can see throttle pressure; this and the token count are the
//! only mutable state, both lock-free.

use std::io::Read;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct Bucket {
    available: f64,
    last_refill: Instant,
}

/// Process-local, shared across every concurrent upload/restore for one
/// direction.
pub struct RateLimiter {
    bytes_per_sec: f64,
    capacity: f64,
    bucket: Mutex<Bucket>,
    throttled_nanos: AtomicU64,
}

impl RateLimiter {
    /// Returns `None` when `bytes_per_sec` is non-positive -- callers should
    /// bypass the null limiter entirely.
    pub fn new(bytes_per_sec: u64) -> Option<Self> {
        if bytes_per_sec == 0 {
            return None;
        }
        let bytes_per_sec = bytes_per_sec as f64;
        Some(Self {
            bytes_per_sec,
            capacity: bytes_per_sec, // one second worth of burst
            bucket: Mutex::new(Bucket {
                available: bytes_per_sec,
                last_refill: Instant::now(),
            }),
            throttled_nanos: AtomicU64::new(0),
        })
    }

    pub fn throttled_nanos(&self) -> u64 {
        self.throttled_nanos.load(Ordering::Relaxed)
    }

    /// Blocks the calling thread until `bytes` worth of budget is available.
    pub fn acquire(&self, bytes: usize) {
        let bytes = bytes as f64;
        loop {
            let wait = {
                let mut bucket = self.bucket.lock().unwrap();
                let now = Instant::now();
                let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
                bucket.available = (bucket.available + elapsed * self.bytes_per_sec).min(self.capacity);
                bucket.last_refill = now;

                if bucket.available >= bytes {
                    bucket.available -= bytes;
                    None
                } else {
                    let missing = bytes - bucket.available;
                    bucket.available = 0.0;
                    Some(Duration::from_secs_f64(missing / self.bytes_per_sec))
                }
            };
            match wait {
                None => return,
                Some(d) => {
                    std::thread::sleep(d);
                    self.throttled_nanos
                        .fetch_add(d.as_nanos() as u64, Ordering::Relaxed);
                }
            }
        }
    }
}

/// Wraps any blocking `Read`, throttling through an optional shared limiter.
pub struct RateLimitedReader<'a, R> {
    inner: R,
    limiter: Option<&'a RateLimiter>,
}

impl<'a, R: Read> RateLimitedReader<'a, R> {
    pub fn new(inner: R, limiter: Option<&'a RateLimiter>) -> Self {
        Self { inner, limiter }
    }
}

impl<'a, R: Read> Read for RateLimitedReader<'a, R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if let Some(limiter) = self.limiter {
            limiter.acquire(buf.len());
        }
        self.inner.read(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn null_limiter_bypasses_wrapper() {
        assert!(RateLimiter::new(0).is_none());
    }

    #[test]
    fn throttles_and_tracks_nanos() {
        let limiter = RateLimiter::new(1024).unwrap();
        let data = vec![0u8; 4096];
        let mut reader = RateLimitedReader::new(Cursor::new(&data[..]), Some(&limiter));
        let mut out = Vec::new();
        std::io::Read::read_to_end(&mut reader, &mut out).unwrap();
        assert_eq!(out.len(), data.len());
        assert!(limiter.throttled_nanos() > 0);
    }

    #[test]
    fn burst_within_capacity_does_not_block() {
        let limiter = RateLimiter::new(1024 * 1024).unwrap();
        let start = Instant::now();
        limiter.acquire(1024);
        assert!(start.elapsed() < Duration::from_millis(50));
    }
}
