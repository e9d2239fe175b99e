//! Search-as-you-type in front of a taxon source.
//!
//! Input is debounced: each call to [`SearchDebouncer::input`] cancels the
//! pending timer and starts a new one. When a timer fires the query is
//! dispatched with the next sequence number, and its response is published
//! only if no later query has been dispatched since. Dispatched requests are
//! never aborted, their answers are just dropped when stale.

use crate::gbif::MIN_QUERY_LEN;
use crate::record::Taxon;
use log::debug;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;

pub trait TaxonSource {
    fn search(&self, query: &str) -> impl Future<Output = Vec<Taxon>> + Send;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchResults {
    /// Sequence number of the search that produced these results, 0 if none
    pub seq: u64,
    pub query: String,
    pub taxa: Vec<Taxon>,
}

pub struct SearchDebouncer<S> {
    source: Arc<S>,
    delay: Duration,
    pending: Option<JoinHandle<()>>,
    latest: Arc<AtomicU64>,
    results: Arc<watch::Sender<SearchResults>>,
}

impl<S> SearchDebouncer<S>
where
    S: TaxonSource + Send + Sync + 'static,
{
    pub fn new(source: Arc<S>, delay: Duration) -> Self {
        let (results, _) = watch::channel(SearchResults::default());
        Self {
            source,
            delay,
            pending: None,
            latest: Arc::new(AtomicU64::new(0)),
            results: Arc::new(results),
        }
    }

    /// Receiver that observes every published result set.
    pub fn subscribe(&self) -> watch::Receiver<SearchResults> {
        self.results.subscribe()
    }

    pub fn results(&self) -> SearchResults {
        self.results.borrow().clone()
    }

    /// Feed the current contents of the search box.
    pub fn input(&mut self, query: &str) {
        if let Some(pending) = self.pending.take() {
            pending.abort();
        }

        let query = query.trim().to_string();
        if query.chars().count() < MIN_QUERY_LEN {
            // Anything already in flight is now stale
            let seq = self.latest.fetch_add(1, Ordering::SeqCst) + 1;
            self.results.send_replace(SearchResults {
                seq,
                query,
                taxa: Vec::new(),
            });
            return;
        }

        let source = Arc::clone(&self.source);
        let latest = Arc::clone(&self.latest);
        let results = Arc::clone(&self.results);
        let delay = self.delay;

        self.pending = Some(tokio::spawn(async move {
            sleep(delay).await;
            let seq = latest.fetch_add(1, Ordering::SeqCst) + 1;
            debug!("Dispatching search #{} for '{}'", seq, query);

            // Aborting the timer must not cancel a dispatched request
            tokio::spawn(async move {
                let taxa = source.search(&query).await;
                if latest.load(Ordering::SeqCst) == seq {
                    results.send_replace(SearchResults { seq, query, taxa });
                } else {
                    debug!("Discarding stale search #{} for '{}'", seq, query);
                }
            });
        }));
    }

    /// Drop any pending search that has not fired yet.
    pub fn cancel(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.abort();
        }
    }
}

impl<S> Drop for SearchDebouncer<S> {
    fn drop(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    const DEBOUNCE: Duration = Duration::from_millis(300);

    /// Records every query and answers after a per-query delay.
    #[derive(Default)]
    struct FakeSource {
        calls: Mutex<Vec<String>>,
        delays: HashMap<String, Duration>,
    }

    impl FakeSource {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl TaxonSource for FakeSource {
        fn search(&self, query: &str) -> impl Future<Output = Vec<Taxon>> + Send {
            self.calls.lock().unwrap().push(query.to_string());
            let delay = self.delays.get(query).copied().unwrap_or_default();
            let taxon = Taxon::new(query.len() as u64, query, "SPECIES");
            async move {
                sleep(delay).await;
                vec![taxon]
            }
        }
    }

    fn debouncer(source: &Arc<FakeSource>) -> SearchDebouncer<FakeSource> {
        SearchDebouncer::new(Arc::clone(source), DEBOUNCE)
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_once_after_pause() {
        let source = Arc::new(FakeSource::default());
        let mut search = debouncer(&source);

        search.input("Apis");
        sleep(Duration::from_millis(299)).await;
        assert!(source.calls().is_empty());

        sleep(Duration::from_millis(10)).await;
        assert_eq!(source.calls(), vec!["Apis"]);
        assert_eq!(search.results().query, "Apis");
        assert_eq!(search.results().taxa.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_input_cancels_pending_timer() {
        let source = Arc::new(FakeSource::default());
        let mut search = debouncer(&source);

        search.input("Api");
        sleep(Duration::from_millis(100)).await;
        search.input("Apis");
        sleep(Duration::from_millis(400)).await;

        assert_eq!(source.calls(), vec!["Apis"]);
        assert_eq!(search.results().query, "Apis");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_response_is_discarded() {
        let mut delays = HashMap::new();
        delays.insert("Vanessa".to_string(), Duration::from_secs(2));
        let source = Arc::new(FakeSource {
            calls: Mutex::new(Vec::new()),
            delays,
        });
        let mut search = debouncer(&source);
        let mut updates = search.subscribe();

        search.input("Vanessa");
        sleep(Duration::from_millis(350)).await;
        search.input("Danaus");
        sleep(Duration::from_secs(5)).await;

        assert_eq!(source.calls(), vec!["Vanessa", "Danaus"]);
        let results = search.results();
        assert_eq!(results.query, "Danaus");
        assert_eq!(results.seq, 2);

        assert!(updates.has_changed().unwrap());
        assert_eq!(updates.borrow_and_update().query, "Danaus");
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_query_clears_results() {
        let mut delays = HashMap::new();
        delays.insert("Bombus".to_string(), Duration::from_secs(1));
        let source = Arc::new(FakeSource {
            calls: Mutex::new(Vec::new()),
            delays,
        });
        let mut search = debouncer(&source);

        search.input("Bombus");
        sleep(Duration::from_millis(400)).await;
        search.input("B");
        sleep(Duration::from_secs(2)).await;

        assert_eq!(source.calls(), vec!["Bombus"]);
        assert!(search.results().taxa.is_empty());
        assert_eq!(search.results().query, "B");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_drops_pending_search() {
        let source = Arc::new(FakeSource::default());
        let mut search = debouncer(&source);

        search.input("Papilio");
        search.cancel();
        sleep(Duration::from_secs(1)).await;

        assert!(source.calls().is_empty());
        assert_eq!(search.results(), SearchResults::default());
    }
}
