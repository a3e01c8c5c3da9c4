// src/pool.rs
//! Bounded worker pool over a shared claim-next index.
//!
//! `concurrency` tokio tasks each claim the next unprocessed index with an
//! atomic `fetch_add` until the list is exhausted. Result order is not
//! preserved; callers key results by their input.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub async fn run_pool<T, R, F, Fut>(items: Vec<T>, concurrency: usize, f: F) -> Vec<R>
where
    T: Clone + Send + Sync + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
{
    if items.is_empty() {
        return Vec::new();
    }
    let workers = concurrency.clamp(1, items.len());
    let items = Arc::new(items);
    let next = Arc::new(AtomicUsize::new(0));
    let f = Arc::new(f);

    let mut handles = Vec::with_capacity(workers);
    for _ in 0..workers {
        let items = Arc::clone(&items);
        let next = Arc::clone(&next);
        let f = Arc::clone(&f);
        handles.push(tokio::spawn(async move {
            let mut out = Vec::new();
            loop {
                let i = next.fetch_add(1, Ordering::Relaxed);
                let Some(item) = items.get(i) else {
                    break;
                };
                out.push(f(item.clone()).await);
            }
            out
        }));
    }

    let mut results = Vec::with_capacity(items.len());
    for h in handles {
        match h.await {
            Ok(mut part) => results.append(&mut part),
            Err(e) => tracing::warn!(error = %e, "pool worker panicked"),
        }
    }
    results
}
