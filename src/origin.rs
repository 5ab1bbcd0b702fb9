//! Origin identification and per-origin resources.
//!
//! Every URL in a batch maps to an origin key (scheme + normalized host);
//! URLs sharing a key share one HTTP client and one admission limiter for
//! the lifetime of the batch.

use crate::{OriginLimiter, ProbeError, ProbeOptions};
use std::sync::Arc;
use url::Url;

/// Canonical origin key for a parsed URL.
///
/// Default ports are folded into the bare hostname (the url crate already
/// reports `port()` as `None` when it matches the scheme default), so
/// `http://host:80/a` and `http://host/b` land on the same client.
pub fn origin_key(url: &Url) -> Result<String, ProbeError> {
    let host = url
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or_else(|| ProbeError::InvalidUrl(url.as_str().to_string()))?;

    Ok(match url.port() {
        Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
        None => format!("{}://{}", url.scheme(), host),
    })
}

/// Parses a raw URL and derives its origin key in one step.
pub fn parse_origin(raw: &str) -> Result<(Url, String), ProbeError> {
    let url = Url::parse(raw).map_err(|_| ProbeError::InvalidUrl(raw.to_string()))?;
    let key = origin_key(&url)?;
    Ok((url, key))
}

/// One origin's shared probing resources: an HTTP client whose connection
/// pool is sized to the reusable limit, plus the two-tier limiter.
pub struct Origin {
    pub key: String,
    pub client: reqwest::Client,
    pub limiter: Arc<OriginLimiter>,
}

impl Origin {
    pub fn connect(key: String, options: &ProbeOptions) -> Result<Self, ProbeError> {
        let mut builder =
            reqwest::Client::builder().pool_max_idle_per_host(options.concurrent_requests_reusable);
        if let Some(user_agent) = &options.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        let client = builder.build().map_err(|e| ProbeError::Transport {
            url: key.clone(),
            message: e.to_string(),
        })?;

        let limiter = Arc::new(OriginLimiter::new(
            options.concurrent_requests_non_reusable,
            options.concurrent_requests_reusable,
        ));

        Ok(Self {
            key,
            client,
            limiter,
        })
    }
}
