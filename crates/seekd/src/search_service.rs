//! Latest-wins search delivery for interactive front ends.
//!
//! Every submitted query gets a generation number. A single worker drains the request
//! queue, runs only the newest pending request, and publishes into a watch channel that
//! never moves backwards in generation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use seekcore_query::{QueryEngine, RankedHit, SearchOptions, SearchRequest};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchSnapshot {
    pub generation: u64,
    pub query: String,
    pub hits: Vec<RankedHit>,
    pub error: Option<String>,
}

impl SearchSnapshot {
    /// Replaces `self` with `incoming` only if it belongs to a newer generation.
    pub fn apply_if_newer(&mut self, incoming: SearchSnapshot) -> bool {
        if incoming.generation <= self.generation {
            return false;
        }
        *self = incoming;
        true
    }
}

pub struct SearchService {
    requests: mpsc::UnboundedSender<SearchRequest>,
    results: watch::Receiver<SearchSnapshot>,
    next_generation: AtomicU64,
    options: SearchOptions,
    worker: JoinHandle<()>,
}

impl SearchService {
    /// Starts the worker on the current tokio runtime.
    pub fn spawn<E>(engine: Arc<E>, options: SearchOptions) -> Self
    where
        E: QueryEngine + Send + Sync + 'static,
    {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (result_tx, result_rx) = watch::channel(SearchSnapshot::default());
        let worker = tokio::spawn(run_worker(engine, request_rx, result_tx));

        Self {
            requests: request_tx,
            results: result_rx,
            next_generation: AtomicU64::new(0),
            options,
            worker,
        }
    }

    /// Queues a query and returns its generation. Older queued queries are dropped.
    pub fn submit(&self, query: impl Into<String>) -> u64 {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let request = SearchRequest {
            generation,
            query: query.into(),
            options: self.options,
        };
        if self.requests.send(request).is_err() {
            warn!(generation, "search worker is gone; query dropped");
        }
        generation
    }

    pub fn subscribe(&self) -> watch::Receiver<SearchSnapshot> {
        self.results.clone()
    }

    pub fn latest(&self) -> SearchSnapshot {
        self.results.borrow().clone()
    }

    /// Resolves once a snapshot at or past `generation` is published.
    pub async fn wait_for(&self, generation: u64) -> Option<SearchSnapshot> {
        let mut results = self.results.clone();
        let snapshot = results
            .wait_for(|snapshot| snapshot.generation >= generation)
            .await
            .ok()?;
        Some(snapshot.clone())
    }

    pub async fn shutdown(self) {
        drop(self.requests);
        if let Err(err) = self.worker.await {
            warn!(error = %err, "search worker ended abnormally");
        }
    }
}

async fn run_worker<E>(
    engine: Arc<E>,
    mut requests: mpsc::UnboundedReceiver<SearchRequest>,
    results: watch::Sender<SearchSnapshot>,
) where
    E: QueryEngine + Send + Sync + 'static,
{
    while let Some(mut request) = requests.recv().await {
        // Arrival order is not generation order when submitters race.
        while let Ok(queued) = requests.try_recv() {
            if queued.generation > request.generation {
                debug!(
                    superseded = request.generation,
                    by = queued.generation,
                    "query superseded"
                );
                request = queued;
            } else {
                debug!(
                    superseded = queued.generation,
                    by = request.generation,
                    "query superseded"
                );
            }
        }

        let published = results.borrow().generation;
        if request.generation <= published {
            debug!(generation = request.generation, published, "query already superseded");
            continue;
        }

        let generation = request.generation;
        let query = request.query.clone();
        let engine = Arc::clone(&engine);
        let outcome = tokio::task::spawn_blocking(move || engine.search(&request)).await;

        let snapshot = match outcome {
            Ok(Ok(hits)) => SearchSnapshot {
                generation,
                query,
                hits,
                error: None,
            },
            Ok(Err(err)) => {
                warn!(generation, error = %err, "search failed");
                SearchSnapshot {
                    generation,
                    query,
                    hits: Vec::new(),
                    error: Some(err.to_string()),
                }
            }
            Err(err) => {
                warn!(generation, error = %err, "search task panicked");
                SearchSnapshot {
                    generation,
                    query,
                    hits: Vec::new(),
                    error: Some(err.to_string()),
                }
            }
        };

        results.send_if_modified(|current| current.apply_if_newer(snapshot));
    }
    debug!("search worker stopped");
}
