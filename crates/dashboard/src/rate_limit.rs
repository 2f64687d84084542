use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Sliding-window request limiter. Keys are caller-chosen (category-prefixed
/// client addresses); each call supplies its category's limit and window, so
/// the upload and general API categories share one bounded map.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<Mutex<HashMap<String, VecDeque<Instant>>>>,
    max_keys: usize,
}

impl RateLimiter {
    pub fn new(max_keys: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            max_keys,
        }
    }

    /// Records the request and returns whether it is within the window. A
    /// zero limit disables the category.
    pub fn allow(&self, key: &str, limit: u32, window: Duration) -> bool {
        if limit == 0 {
            return true;
        }

        let now = Instant::now();
        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let queue = inner.entry(key.to_string()).or_default();
        while let Some(front) = queue.front() {
            if now.duration_since(*front) >= window {
                queue.pop_front();
            } else {
                break;
            }
        }

        if queue.len() >= limit as usize {
            return false;
        }
        queue.push_back(now);

        // Bound the number of tracked addresses so a scan across many source
        // addresses cannot grow the map without limit.
        if inner.len() > self.max_keys {
            let mut overflow = inner.len() - self.max_keys;
            let stale = inner
                .keys()
                .filter(|k| k.as_str() != key)
                .take(overflow)
                .cloned()
                .collect::<Vec<_>>();
            for victim in stale {
                if overflow == 0 {
                    break;
                }
                if inner.remove(&victim).is_some() {
                    overflow -= 1;
                }
            }
        }

        true
    }
}
