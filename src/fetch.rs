//! Progressive range fetching for a single URL.
//!
//! Issues GET requests with ascending `Range` budgets, sniffing the bytes
//! after each round trip and stopping at the first budget that resolves
//! the image header. Rate-limit responses with a usable `Retry-After`
//! abort the ladder and are retried exactly once by the wrapper.

use crate::{detect, ImageInfo, OriginLimiter, ProbeError, ProbeMetrics, MIN_HEADER_BYTES};
use reqwest::{header, Client, Response, StatusCode};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Ascending per-request byte budgets. Each step is one full round trip;
/// the server decides how many bytes actually come back.
pub(crate) const RANGE_BUDGETS: [usize; 5] = [1024, 4096, 16384, 65536, 262144];

enum Attempt {
    Resolved(ImageInfo),
    NeedMore { read: usize },
}

/// Runs the progressive ladder with the one-shot rate-limit retry.
///
/// The caller holds both admission permits for the full duration,
/// including the backoff sleep.
pub(crate) async fn fetch_image_info(
    client: &Client,
    url: &str,
    limiter: &OriginLimiter,
    cancel: &CancellationToken,
    metrics: &ProbeMetrics,
) -> Result<ImageInfo, ProbeError> {
    let mut result = fetch_progressive(client, url, limiter, cancel, metrics).await;

    if let Err(err) = &result {
        if let Some(wait) = err.retry_after() {
            debug!("rate limited for {}, retrying once after {:?}", url, wait);
            metrics.record_retry();
            sleep_cancellable(wait, cancel).await?;
            result = fetch_progressive(client, url, limiter, cancel, metrics).await;
        }
    }

    result
}

async fn fetch_progressive(
    client: &Client,
    url: &str,
    limiter: &OriginLimiter,
    cancel: &CancellationToken,
    metrics: &ProbeMetrics,
) -> Result<ImageInfo, ProbeError> {
    let mut last_read = 0usize;

    for budget in RANGE_BUDGETS {
        if budget < MIN_HEADER_BYTES {
            continue;
        }
        match fetch_once(client, url, budget, limiter, cancel, metrics).await? {
            Attempt::Resolved(info) => return Ok(info),
            Attempt::NeedMore { read } => {
                if read > 0 {
                    last_read = read;
                }
            }
        }
    }

    // Every budget came back readable but never enough to resolve.
    Err(ProbeError::InsufficientBytes {
        got: last_read,
        min: MIN_HEADER_BYTES,
    })
}

async fn fetch_once(
    client: &Client,
    url: &str,
    budget: usize,
    limiter: &OriginLimiter,
    cancel: &CancellationToken,
    metrics: &ProbeMetrics,
) -> Result<Attempt, ProbeError> {
    metrics.record_range_request();

    let request = client
        .get(url)
        .header(header::RANGE, format!("bytes=0-{}", budget - 1));

    let response = tokio::select! {
        _ = cancel.cancelled() => return Err(ProbeError::Cancelled),
        response = request.send() => response.map_err(|e| ProbeError::Transport {
            url: url.to_string(),
            message: e.to_string(),
        })?,
    };

    let status = response.status();

    if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::SERVICE_UNAVAILABLE {
        if let Some(retry_after) = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_retry_after)
        {
            return Err(ProbeError::RateLimited {
                url: url.to_string(),
                status: status.as_u16(),
                retry_after,
            });
        }
    }

    if status == StatusCode::PARTIAL_CONTENT {
        limiter.mark_range_supported();
    }

    if status != StatusCode::OK && status != StatusCode::PARTIAL_CONTENT {
        return Err(ProbeError::HttpStatus {
            url: url.to_string(),
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or_default().to_string(),
        });
    }

    let data = read_capped(response, budget, url, cancel).await?;
    metrics.record_bytes_read(data.len() as u64);

    if data.len() < MIN_HEADER_BYTES {
        return Err(ProbeError::InsufficientBytes {
            got: data.len(),
            min: MIN_HEADER_BYTES,
        });
    }

    let info = detect(&data);
    if info.is_resolved() {
        Ok(Attempt::Resolved(info))
    } else {
        Ok(Attempt::NeedMore { read: data.len() })
    }
}

/// Reads at most `cap` bytes of the body. A 200 response may carry far
/// more than the requested range; the connection is dropped once the cap
/// is reached.
async fn read_capped(
    mut response: Response,
    cap: usize,
    url: &str,
    cancel: &CancellationToken,
) -> Result<Vec<u8>, ProbeError> {
    let mut buf: Vec<u8> = Vec::with_capacity(cap.min(16 * 1024));

    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => return Err(ProbeError::Cancelled),
            chunk = response.chunk() => chunk.map_err(|e| ProbeError::Transport {
                url: url.to_string(),
                message: e.to_string(),
            })?,
        };

        match chunk {
            Some(bytes) => {
                buf.extend_from_slice(&bytes);
                if buf.len() >= cap {
                    buf.truncate(cap);
                    return Ok(buf);
                }
            }
            None => return Ok(buf),
        }
    }
}

/// Parses a `Retry-After` value: integer seconds or an HTTP date.
/// Zero, negative, or past values count as unparseable.
pub(crate) fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(seconds) = value.parse::<i64>() {
        if seconds <= 0 {
            return None;
        }
        return Some(Duration::from_secs(seconds as u64));
    }

    let at = chrono::DateTime::parse_from_rfc2822(value).ok()?;
    let wait = at.signed_duration_since(chrono::Utc::now()).to_std().ok()?;
    (wait > Duration::ZERO).then_some(wait)
}

async fn sleep_cancellable(wait: Duration, cancel: &CancellationToken) -> Result<(), ProbeError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(ProbeError::Cancelled),
        _ = tokio::time::sleep(wait) => Ok(()),
    }
}
