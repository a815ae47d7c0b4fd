use super::{ArtCache, ArtDecoder, ArtEntry, ArtError, ArtOutcome, CacheKey, ConsumerHandle};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, warn};

/// Callback run once a request settles. Always invoked on the thread that
/// owns the [`ArtLoader`], so it may capture non-`Send` UI state.
pub type OnReady = Box<dyn FnOnce(ArtOutcome)>;

/// The request a consumer is currently waiting on.
struct PendingRequest {
    key: CacheKey,
    generation: u64,
    on_ready: OnReady,
}

/// A finished decode travelling back from a worker to the owner thread.
#[derive(Debug)]
struct Completion {
    handle: ConsumerHandle,
    generation: u64,
    key: CacheKey,
    entry: Option<Arc<ArtEntry>>,
}

/// Serves covers from an [`ArtCache`], decoding misses on a bounded worker
/// pool and handing results back to whoever asked for them last.
///
/// The loader lives on one thread (typically the UI loop). Decoded results
/// are inserted into the shared cache by the workers, then queued for that
/// thread, which calls [`ArtLoader::dispatch_ready`] or
/// [`ArtLoader::dispatch_next`] to run callbacks. A result whose consumer has
/// since requested something else is dropped at that point.
pub struct ArtLoader {
    cache: Arc<ArtCache>,
    decoder: Arc<dyn ArtDecoder>,
    permits: Arc<Semaphore>,
    runtime: Handle,
    pending: HashMap<ConsumerHandle, PendingRequest>,
    next_generation: u64,
    in_flight: usize,
    completion_tx: mpsc::UnboundedSender<Completion>,
    completion_rx: mpsc::UnboundedReceiver<Completion>,
}

impl ArtLoader {
    /// Build a loader on the current tokio runtime.
    pub fn new(
        cache: Arc<ArtCache>,
        decoder: Arc<dyn ArtDecoder>,
        workers: usize,
    ) -> Result<Self, ArtError> {
        let runtime = Handle::try_current().map_err(|_| ArtError::NoRuntime)?;
        Self::with_runtime(cache, decoder, workers, runtime)
    }

    pub fn with_runtime(
        cache: Arc<ArtCache>,
        decoder: Arc<dyn ArtDecoder>,
        workers: usize,
        runtime: Handle,
    ) -> Result<Self, ArtError> {
        if workers == 0 {
            return Err(ArtError::NoWorkers);
        }

        let (completion_tx, completion_rx) = mpsc::unbounded_channel();

        Ok(Self {
            cache,
            decoder,
            permits: Arc::new(Semaphore::new(workers)),
            runtime,
            pending: HashMap::new(),
            next_generation: 0,
            in_flight: 0,
            completion_tx,
            completion_rx,
        })
    }

    /// Ask for the cover behind `key` on behalf of `handle`.
    ///
    /// A cache hit runs `on_ready` before this returns. A miss schedules a
    /// decode and returns immediately; `on_ready` then runs from a later
    /// dispatch call, and only if `handle` has not requested anything else in
    /// the meantime.
    pub fn request<F>(&mut self, handle: ConsumerHandle, key: impl Into<CacheKey>, on_ready: F)
    where
        F: FnOnce(ArtOutcome) + 'static,
    {
        let key = key.into();
        self.next_generation += 1;
        let generation = self.next_generation;

        if let Some(entry) = self.cache.get(&key) {
            // Supersedes whatever this handle was still waiting on
            self.pending.remove(&handle);
            on_ready(ArtOutcome::Ready(entry));
            return;
        }

        if let Some(previous) = self.pending.insert(
            handle,
            PendingRequest {
                key: key.clone(),
                generation,
                on_ready: Box::new(on_ready),
            },
        ) {
            debug!(
                handle = handle.id(),
                previous = %previous.key,
                key = %key,
                "consumer moved on before its art arrived"
            );
        }

        self.spawn_decode(handle, generation, key);
    }

    fn spawn_decode(&mut self, handle: ConsumerHandle, generation: u64, key: CacheKey) {
        let cache = Arc::clone(&self.cache);
        let decoder = Arc::clone(&self.decoder);
        let permits = Arc::clone(&self.permits);
        let completion_tx = self.completion_tx.clone();
        self.in_flight += 1;

        self.runtime.spawn(async move {
            let entry = match permits.acquire_owned().await {
                Ok(_permit) => {
                    let decode_key = key.clone();
                    match tokio::task::spawn_blocking(move || decoder.decode(&decode_key)).await {
                        // Cached even if the consumer has moved on; someone will want it
                        Ok(Some(image)) => Some(cache.put(key.clone(), image)),
                        Ok(None) => None,
                        Err(e) => {
                            warn!(key = %key, error = %e, "album art decode task failed");
                            None
                        }
                    }
                }
                Err(_) => None,
            };

            let _ = completion_tx.send(Completion {
                handle,
                generation,
                key,
                entry,
            });
        });
    }

    /// Run callbacks for every decode that has already finished. Never blocks.
    /// Returns how many callbacks ran.
    pub fn dispatch_ready(&mut self) -> usize {
        let mut delivered = 0;
        while let Ok(completion) = self.completion_rx.try_recv() {
            if self.deliver(completion) {
                delivered += 1;
            }
        }
        delivered
    }

    /// Wait for the next decode to finish and dispatch it.
    ///
    /// Returns `None` when nothing is in flight, otherwise whether the result
    /// reached a consumer (`false` means it was stale and dropped).
    pub async fn dispatch_next(&mut self) -> Option<bool> {
        if self.in_flight == 0 {
            return None;
        }
        let completion = self.completion_rx.recv().await?;
        Some(self.deliver(completion))
    }

    /// Dispatch until every in-flight decode has settled.
    pub async fn settle(&mut self) -> usize {
        let mut delivered = 0;
        while let Some(was_delivered) = self.dispatch_next().await {
            if was_delivered {
                delivered += 1;
            }
        }
        delivered
    }

    fn deliver(&mut self, completion: Completion) -> bool {
        self.in_flight = self.in_flight.saturating_sub(1);

        let is_current = self
            .pending
            .get(&completion.handle)
            .map(|pending| pending.generation == completion.generation)
            .unwrap_or(false);

        if !is_current {
            debug!(
                handle = completion.handle.id(),
                key = %completion.key,
                "dropping stale album art result"
            );
            return false;
        }

        let Some(pending) = self.pending.remove(&completion.handle) else {
            return false;
        };
        debug_assert_eq!(pending.key, completion.key);

        let outcome = match completion.entry {
            Some(entry) => ArtOutcome::Ready(entry),
            None => ArtOutcome::Fallback,
        };
        (pending.on_ready)(outcome);
        true
    }

    /// Forget a consumer (its view was destroyed). Any result still on its
    /// way for it will be dropped.
    pub fn release(&mut self, handle: ConsumerHandle) -> bool {
        self.pending.remove(&handle).is_some()
    }

    /// Key `handle` is still waiting on, if any.
    pub fn pending_key(&self, handle: ConsumerHandle) -> Option<&CacheKey> {
        self.pending.get(&handle).map(|pending| &pending.key)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn get(&self, key: &CacheKey) -> Option<Arc<ArtEntry>> {
        self.cache.get(key)
    }

    pub fn invalidate(&self, key: &CacheKey) -> bool {
        self.cache.invalidate(key)
    }

    pub fn clear(&self) -> usize {
        self.cache.clear()
    }

    pub fn cache(&self) -> &Arc<ArtCache> {
        &self.cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::art::RawImage;
    use parking_lot::{Condvar, Mutex};
    use std::cell::RefCell;
    use std::collections::HashSet;
    use std::rc::Rc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Decoder whose calls block until the test opens the gate for that key.
    /// Keys starting with "bad" decode to nothing. Width encodes the key length
    /// so results can be told apart.
    #[derive(Default)]
    struct GatedDecoder {
        calls: AtomicUsize,
        open: Mutex<HashSet<String>>,
        opened: Condvar,
    }

    impl GatedDecoder {
        fn open(&self, key: &str) {
            self.open.lock().insert(key.to_string());
            self.opened.notify_all();
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl ArtDecoder for GatedDecoder {
        fn decode(&self, key: &CacheKey) -> Option<RawImage> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut open = self.open.lock();
            while !open.contains(key.as_str()) {
                self.opened.wait(&mut open);
            }
            drop(open);

            if key.as_str().starts_with("bad") {
                None
            } else {
                Some(RawImage::blank_rgba(key.as_str().len() as u32, 1))
            }
        }
    }

    type Received = Rc<RefCell<Vec<(u64, Option<(u32, u32)>)>>>;

    fn recorder(received: &Received, handle: ConsumerHandle) -> impl FnOnce(ArtOutcome) + 'static {
        let received = Rc::clone(received);
        move |outcome| {
            let dims = outcome.entry().map(|entry| entry.dimensions());
            received.borrow_mut().push((handle.id(), dims));
        }
    }

    fn setup(capacity: usize) -> (ArtLoader, Arc<GatedDecoder>) {
        let cache = Arc::new(ArtCache::new(capacity).unwrap());
        let decoder = Arc::new(GatedDecoder::default());
        let loader = ArtLoader::new(cache, decoder.clone(), 2).unwrap();
        (loader, decoder)
    }

    #[tokio::test]
    async fn test_zero_workers_is_rejected() {
        let cache = Arc::new(ArtCache::new(1_000).unwrap());
        let decoder = Arc::new(GatedDecoder::default());
        assert!(matches!(
            ArtLoader::new(cache, decoder, 0),
            Err(ArtError::NoWorkers)
        ));
    }

    #[test]
    fn test_requires_a_runtime() {
        let cache = Arc::new(ArtCache::new(1_000).unwrap());
        let decoder = Arc::new(GatedDecoder::default());
        assert!(matches!(
            ArtLoader::new(cache, decoder, 1),
            Err(ArtError::NoRuntime)
        ));
    }

    #[tokio::test]
    async fn test_cache_hit_answers_synchronously_without_decoding() {
        let (mut loader, decoder) = setup(10_000);
        let key = CacheKey::from("/music/cover.png");
        let stored = loader.cache().put(key.clone(), RawImage::blank_rgba(4, 4));

        let received: Rc<RefCell<Vec<Arc<ArtEntry>>>> = Rc::default();
        for id in 0..3 {
            let sink = Rc::clone(&received);
            loader.request(ConsumerHandle::new(id), key.clone(), move |outcome| {
                sink.borrow_mut().push(outcome.entry().cloned().unwrap());
            });
        }

        assert_eq!(received.borrow().len(), 3);
        assert!(received.borrow().iter().all(|entry| Arc::ptr_eq(entry, &stored)));
        assert_eq!(decoder.calls(), 0);
        assert_eq!(loader.in_flight(), 0);
        assert_eq!(loader.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_miss_decodes_caches_and_delivers() {
        let (mut loader, decoder) = setup(10_000);
        let received = Received::default();
        let handle = ConsumerHandle::new(1);

        loader.request(handle, "abc", recorder(&received, handle));
        assert!(received.borrow().is_empty());
        assert_eq!(loader.pending_key(handle), Some(&CacheKey::from("abc")));

        decoder.open("abc");
        assert_eq!(loader.dispatch_next().await, Some(true));

        assert_eq!(*received.borrow(), vec![(1, Some((3, 1)))]);
        assert!(loader.get(&CacheKey::from("abc")).is_some());
        assert_eq!(loader.pending_len(), 0);
        assert_eq!(loader.dispatch_next().await, None);
    }

    #[tokio::test]
    async fn test_stale_result_is_dropped_but_still_cached() {
        let (mut loader, decoder) = setup(10_000);
        let received = Received::default();
        let handle = ConsumerHandle::new(7);

        loader.request(handle, "k1", recorder(&received, handle));
        loader.request(handle, "key-two", recorder(&received, handle));

        decoder.open("k1");
        assert_eq!(loader.dispatch_next().await, Some(false));
        assert!(received.borrow().is_empty());
        assert!(loader.cache().contains(&CacheKey::from("k1")));

        decoder.open("key-two");
        assert_eq!(loader.dispatch_next().await, Some(true));
        assert_eq!(*received.borrow(), vec![(7, Some((7, 1)))]);
    }

    #[tokio::test]
    async fn test_earlier_result_arriving_last_is_dropped() {
        let (mut loader, decoder) = setup(10_000);
        let received = Received::default();
        let handle = ConsumerHandle::new(8);

        loader.request(handle, "k1", recorder(&received, handle));
        loader.request(handle, "key-two", recorder(&received, handle));

        decoder.open("key-two");
        assert_eq!(loader.dispatch_next().await, Some(true));
        assert_eq!(*received.borrow(), vec![(8, Some((7, 1)))]);

        decoder.open("k1");
        assert_eq!(loader.dispatch_next().await, Some(false));
        assert_eq!(received.borrow().len(), 1);
        assert!(loader.cache().contains(&CacheKey::from("k1")));
        assert_eq!(loader.dispatch_next().await, None);
    }

    #[tokio::test]
    async fn test_repeated_request_for_same_key_delivers_once() {
        let (mut loader, decoder) = setup(10_000);
        let received = Received::default();
        let handle = ConsumerHandle::new(3);

        loader.request(handle, "same", recorder(&received, handle));
        loader.request(handle, "same", recorder(&received, handle));

        decoder.open("same");
        assert_eq!(loader.settle().await, 1);
        assert_eq!(received.borrow().len(), 1);
    }

    #[tokio::test]
    async fn test_cache_hit_supersedes_in_flight_request() {
        let (mut loader, decoder) = setup(10_000);
        let received = Received::default();
        let handle = ConsumerHandle::new(9);
        loader.cache().put(CacheKey::from("warm"), RawImage::blank_rgba(2, 2));

        loader.request(handle, "cold", recorder(&received, handle));
        loader.request(handle, "warm", recorder(&received, handle));
        assert_eq!(*received.borrow(), vec![(9, Some((2, 2)))]);

        decoder.open("cold");
        assert_eq!(loader.dispatch_next().await, Some(false));
        assert_eq!(received.borrow().len(), 1);
    }

    #[tokio::test]
    async fn test_handles_are_tracked_independently() {
        let (mut loader, decoder) = setup(10_000);
        let received = Received::default();
        let first = ConsumerHandle::new(1);
        let second = ConsumerHandle::new(2);

        loader.request(first, "aa", recorder(&received, first));
        loader.request(second, "bbbb", recorder(&received, second));

        decoder.open("aa");
        decoder.open("bbbb");
        assert_eq!(loader.settle().await, 2);

        let mut got = received.borrow().clone();
        got.sort();
        assert_eq!(got, vec![(1, Some((2, 1))), (2, Some((4, 1)))]);
    }

    #[tokio::test]
    async fn test_failed_decode_signals_fallback_and_caches_nothing() {
        let (mut loader, decoder) = setup(10_000);
        let received = Received::default();
        let handle = ConsumerHandle::new(4);

        loader.request(handle, "bad-file", recorder(&received, handle));
        decoder.open("bad-file");
        assert_eq!(loader.dispatch_next().await, Some(true));

        assert_eq!(*received.borrow(), vec![(4, None)]);
        assert!(!loader.cache().contains(&CacheKey::from("bad-file")));
        assert!(loader.cache().is_empty());
    }

    #[tokio::test]
    async fn test_released_handle_gets_nothing() {
        let (mut loader, decoder) = setup(10_000);
        let received = Received::default();
        let handle = ConsumerHandle::new(5);

        loader.request(handle, "gone", recorder(&received, handle));
        assert!(loader.release(handle));
        assert!(!loader.release(handle));

        decoder.open("gone");
        assert_eq!(loader.dispatch_next().await, Some(false));
        assert!(received.borrow().is_empty());
        assert!(loader.cache().contains(&CacheKey::from("gone")));
    }

    #[tokio::test]
    async fn test_clear_does_not_disturb_in_flight_decodes() {
        let (mut loader, decoder) = setup(10_000);
        let received = Received::default();
        let handle = ConsumerHandle::new(6);
        loader.cache().put(CacheKey::from("old"), RawImage::blank_rgba(2, 2));

        loader.request(handle, "fresh", recorder(&received, handle));
        assert_eq!(loader.clear(), 1);
        assert!(loader.get(&CacheKey::from("old")).is_none());

        decoder.open("fresh");
        assert_eq!(loader.dispatch_next().await, Some(true));
        assert!(loader.get(&CacheKey::from("fresh")).is_some());
    }

    #[tokio::test]
    async fn test_dispatch_ready_never_blocks() {
        let (mut loader, decoder) = setup(10_000);
        let received = Received::default();
        let handle = ConsumerHandle::new(8);

        loader.request(handle, "slow", recorder(&received, handle));
        assert_eq!(loader.dispatch_ready(), 0);
        assert_eq!(loader.in_flight(), 1);

        decoder.open("slow");
        assert_eq!(loader.settle().await, 1);
        assert_eq!(loader.in_flight(), 0);
    }
}
