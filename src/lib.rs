//! # image-probe
//!
//! A bulk image prober that determines the type and pixel dimensions of
//! remote images over HTTP without downloading them in full. Designed for
//! validation/indexing runs over many URLs at once while staying polite to
//! each origin server.
//!
//! ## How it works
//!
//! - URLs are partitioned by origin (scheme + host, default ports folded);
//!   each origin gets one pooled HTTP client and one admission limiter.
//! - Each URL is fetched with progressively larger `Range: bytes=0-N`
//!   requests (1 KiB up to 256 KiB), sniffing the header bytes after each
//!   round trip and stopping as soon as the dimensions resolve.
//! - Admission is two-tier: a global connection cap across all origins,
//!   plus a per-origin limit that starts conservative (5 concurrent) and
//!   widens (to 20) once the origin answers a range request with
//!   206 Partial Content, since servers that stream partial content handle
//!   concurrent short requests cheaply.
//! - 429/503 responses with a `Retry-After` are retried exactly once after
//!   the requested wait; everything is cancellable through a shared
//!   `CancellationToken`.
//! - Results come back in input order, one per input URL, errors included
//!   per-slot rather than failing the batch.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use image_probe::{ProbeOptions, Prober};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let prober = Prober::new(ProbeOptions::default());
//!     let urls = vec![
//!         "https://example.com/a.png".to_string(),
//!         "https://example.com/b.jpg".to_string(),
//!     ];
//!
//!     let results = prober.probe(&urls, &CancellationToken::new()).await;
//!     for result in &results {
//!         match &result.error {
//!             None => println!(
//!                 "{}: {} {}x{}",
//!                 result.url, result.info.format, result.info.width, result.info.height
//!             ),
//!             Some(err) => eprintln!("{}: {}", result.url, err),
//!         }
//!     }
//! }
//! ```
//!
//! ## CLI Usage
//!
//! ```bash
//! # Single target, local file or URL
//! image-probe single https://example.com/banner.png
//!
//! # Batch from a file, JSON report to stdout
//! image-probe batch --input urls.txt
//!
//! # Tighter limits against fragile origins
//! image-probe --non-reusable 2 --max-connections 10 batch --input urls.txt
//! ```

/// Probe options and per-URL results
pub mod config;

/// Error types for per-URL probe failures
pub mod error;

/// Progressive range fetching and retry policy
pub mod fetch;

/// Global and per-origin admission control
pub mod limiter;

/// Probe metrics on the `metrics` facade
pub mod metrics;

/// Origin keys and per-origin HTTP clients
pub mod origin;

/// Batch orchestration
pub mod probe_service;

/// Batch progress tracking
pub mod progress;

/// Header sniffing (format and dimensions from a byte prefix)
pub mod sniff;

/// Command-line interface implementation
pub mod cli;

#[cfg(test)]
mod tests;

pub use cli::*;
pub use config::*;
pub use error::*;
pub use limiter::*;
pub use metrics::*;
pub use origin::*;
pub use probe_service::*;
pub use progress::*;
pub use sniff::*;
