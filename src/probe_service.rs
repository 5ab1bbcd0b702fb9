//! Batch orchestration of image probes.
//!
//! The `Prober` partitions a URL list by origin, builds one HTTP client
//! and one admission limiter per origin, fans out one task per URL gated
//! by the global and per-origin limiters, and collects results back into
//! input order.

use crate::fetch::fetch_image_info;
use crate::{
    acquire_global, parse_origin, ImageInfo, Origin, OriginLimiter, ProbeError, ProbeMetrics,
    ProbeOptions, ProbeResult, ProgressTracker,
};
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Batch probing engine.
///
/// Origins, clients, and limiters are created per `probe` call and torn
/// down when it returns; nothing is shared across batches.
///
/// # Examples
///
/// ```rust,no_run
/// use image_probe::{Prober, ProbeOptions};
/// use tokio_util::sync::CancellationToken;
///
/// #[tokio::main]
/// async fn main() {
///     let prober = Prober::new(ProbeOptions::default());
///     let urls = vec!["https://example.com/a.png".to_string()];
///     let results = prober.probe(&urls, &CancellationToken::new()).await;
///     for result in &results {
///         println!("{}: {:?}", result.url, result.info);
///     }
/// }
/// ```
pub struct Prober {
    options: ProbeOptions,
    metrics: Arc<ProbeMetrics>,
}

impl Prober {
    pub fn new(options: ProbeOptions) -> Self {
        Self {
            options: options.normalized(),
            metrics: Arc::new(ProbeMetrics::new()),
        }
    }

    pub fn options(&self) -> &ProbeOptions {
        &self.options
    }

    /// Probes every URL and returns one result per input, in input order.
    pub async fn probe(&self, urls: &[String], cancel: &CancellationToken) -> Vec<ProbeResult> {
        self.probe_tracked(urls, cancel, None).await
    }

    /// Like [`probe`](Self::probe), recording each completion into the
    /// given tracker as it happens.
    pub async fn probe_tracked(
        &self,
        urls: &[String],
        cancel: &CancellationToken,
        progress: Option<Arc<ProgressTracker>>,
    ) -> Vec<ProbeResult> {
        let mut results: Vec<ProbeResult> = urls.iter().map(|u| ProbeResult::pending(u)).collect();
        if urls.is_empty() {
            return results;
        }

        // Partition by origin; unparseable URLs fill their slot right here
        // and never touch the network or an admission gate.
        let mut groups: BTreeMap<String, Vec<(usize, String)>> = BTreeMap::new();
        for (index, raw) in urls.iter().enumerate() {
            match parse_origin(raw) {
                Ok((_, key)) => groups.entry(key).or_default().push((index, raw.clone())),
                Err(err) => {
                    if let Some(progress) = &progress {
                        progress.record_completion(false);
                    }
                    results[index].error = Some(err);
                }
            }
        }

        info!("probing {} URLs across {} origins", urls.len(), groups.len());

        let global = Arc::new(Semaphore::new(self.options.max_concurrent_connections));
        let mut handles = Vec::with_capacity(urls.len());

        // BTreeMap order keeps client/limiter construction reproducible.
        for (key, items) in groups {
            let origin = match Origin::connect(key, &self.options) {
                Ok(origin) => origin,
                Err(err) => {
                    for (index, _) in items {
                        if let Some(progress) = &progress {
                            progress.record_completion(false);
                        }
                        results[index].error = Some(err.clone());
                    }
                    continue;
                }
            };

            for (index, url) in items {
                let client = origin.client.clone();
                let limiter = origin.limiter.clone();
                let global = global.clone();
                let cancel = cancel.clone();
                let metrics = self.metrics.clone();
                let progress = progress.clone();

                let handle = tokio::spawn(async move {
                    let started = Instant::now();
                    let outcome =
                        probe_one(&client, &url, &global, &limiter, &cancel, &metrics).await;
                    metrics.record_probe(started.elapsed(), outcome.is_ok());
                    if let Some(progress) = &progress {
                        progress.record_completion(outcome.is_ok());
                    }
                    outcome
                });
                handles.push((index, handle));
            }
        }

        let (indices, joins): (Vec<_>, Vec<_>) = handles.into_iter().unzip();
        for (index, joined) in indices.into_iter().zip(join_all(joins).await) {
            match joined {
                Ok(Ok(info)) => results[index].info = info,
                Ok(Err(err)) => results[index].error = Some(err),
                Err(err) => {
                    results[index].error = Some(ProbeError::Transport {
                        url: results[index].url.clone(),
                        message: format!("probe task failed: {err}"),
                    });
                }
            }
        }

        // The last client clone died with its task, closing idle
        // connections for the batch.
        let successes = results.iter().filter(|r| r.is_success()).count();
        debug!(
            "batch complete: {} ok, {} failed",
            successes,
            results.len() - successes
        );
        results
    }
}

async fn probe_one(
    client: &reqwest::Client,
    url: &str,
    global: &Arc<Semaphore>,
    limiter: &Arc<OriginLimiter>,
    cancel: &CancellationToken,
    metrics: &ProbeMetrics,
) -> Result<ImageInfo, ProbeError> {
    // Fixed acquisition order: global, then origin. Permits are RAII, so
    // a failed origin acquire drops the global slot on the way out.
    let _global = acquire_global(global, cancel).await?;
    let _origin = limiter.acquire(cancel).await?;

    fetch_image_info(client, url, limiter, cancel, metrics).await
}

/// Probes with default options.
pub async fn probe_urls(urls: &[String], cancel: &CancellationToken) -> Vec<ProbeResult> {
    Prober::new(ProbeOptions::default()).probe(urls, cancel).await
}
