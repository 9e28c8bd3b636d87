use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};

type Generator = Box<dyn Fn(usize) -> Bytes + Send + Sync>;

/// Upload bodies memoized by size. Entries are built on first use and never evicted;
/// the upload plan only uses a handful of distinct sizes.
pub struct PayloadCache {
    payloads: Mutex<HashMap<usize, Bytes>>,
    generate: Generator,
}

impl PayloadCache {
    pub fn new() -> Self {
        Self::with_generator(|size| Bytes::from(vec![b'x'; size]))
    }

    pub fn with_generator(generate: impl Fn(usize) -> Bytes + Send + Sync + 'static) -> Self {
        Self {
            payloads: Mutex::new(HashMap::new()),
            generate: Box::new(generate),
        }
    }

    /// Payload of exactly `size` bytes. Clones share the cached buffer.
    pub fn get(&self, size: usize) -> Bytes {
        let mut payloads = self.payloads.lock().unwrap_or_else(PoisonError::into_inner);
        payloads
            .entry(size)
            .or_insert_with(|| (self.generate)(size))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.payloads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PayloadCache {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PayloadCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PayloadCache")
            .field("sizes", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn same_size_is_generated_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let cache = PayloadCache::with_generator(move |size| {
            counter.fetch_add(1, Ordering::SeqCst);
            Bytes::from(vec![0u8; size])
        });

        let first = cache.get(2_000);
        let second = cache.get(2_000);

        assert_eq!(first.len(), 2_000);
        assert_eq!(second.len(), 2_000);
        assert_eq!(first.as_ptr(), second.as_ptr());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn each_size_gets_its_own_entry() {
        let cache = PayloadCache::new();
        assert!(cache.is_empty());

        assert_eq!(cache.get(500).len(), 500);
        assert_eq!(cache.get(1_000).len(), 1_000);
        assert_eq!(cache.get(500).len(), 500);

        assert_eq!(cache.len(), 2);
        assert!(cache.get(10).iter().all(|&byte| byte == b'x'));
    }
}
