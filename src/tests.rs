#[cfg(test)]
mod integration_tests {
    use crate::{probe_urls, ImageFormat, ImageInfo, ProbeError, ProbeOptions, Prober};
    use axum::extract::State;
    use axum::http::{header, HeaderMap, HeaderValue, StatusCode, Uri};
    use axum::response::{IntoResponse, Response};
    use axum::routing::get;
    use axum::Router;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};
    use tokio_util::sync::CancellationToken;

    fn test_options() -> ProbeOptions {
        ProbeOptions {
            concurrent_requests_reusable: 2,
            concurrent_requests_non_reusable: 1,
            max_concurrent_connections: 2,
            user_agent: None,
        }
    }

    // ---- synthetic image fixtures ----

    fn padded(mut data: Vec<u8>, len: usize) -> Vec<u8> {
        if data.len() < len {
            data.resize(len, 0);
        }
        data
    }

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let mut data = b"\x89PNG\r\n\x1a\n".to_vec();
        data.extend_from_slice(&13u32.to_be_bytes());
        data.extend_from_slice(b"IHDR");
        data.extend_from_slice(&width.to_be_bytes());
        data.extend_from_slice(&height.to_be_bytes());
        data.extend_from_slice(&[8, 6, 0, 0, 0]);
        padded(data, 600)
    }

    fn gif_bytes(width: u16, height: u16) -> Vec<u8> {
        let mut data = b"GIF89a".to_vec();
        data.extend_from_slice(&width.to_le_bytes());
        data.extend_from_slice(&height.to_le_bytes());
        padded(data, 400)
    }

    /// JPEG whose start-of-frame sits behind `filler` bytes of comment
    /// segment, pushing resolution past the small range budgets.
    fn jpeg_bytes(width: u16, height: u16, filler: usize) -> Vec<u8> {
        let mut data = vec![0xff, 0xd8];
        if filler > 0 {
            data.extend_from_slice(&[0xff, 0xfe]);
            data.extend_from_slice(&((filler as u16) + 2).to_be_bytes());
            data.extend(std::iter::repeat(0x20).take(filler));
        }
        data.extend_from_slice(&[0xff, 0xc0, 0x00, 0x11, 0x08]);
        data.extend_from_slice(&height.to_be_bytes());
        data.extend_from_slice(&width.to_be_bytes());
        data.extend_from_slice(&[0x03, 0x01, 0x22, 0x00, 0x02, 0x11, 0x01, 0x03, 0x11, 0x01]);
        padded(data, 100)
    }

    // ---- test servers ----

    #[derive(Clone)]
    struct ImageServer {
        files: Arc<HashMap<&'static str, Vec<u8>>>,
        support_range: bool,
        hits: Arc<AtomicUsize>,
    }

    async fn serve_image(
        State(server): State<ImageServer>,
        uri: Uri,
        headers: HeaderMap,
    ) -> Response {
        server.hits.fetch_add(1, Ordering::SeqCst);

        let Some(data) = server.files.get(uri.path()) else {
            return StatusCode::NOT_FOUND.into_response();
        };

        if server.support_range {
            if let Some((start, end)) = parse_range(headers.get(header::RANGE), data.len()) {
                let body = data[start..=end].to_vec();
                return (
                    StatusCode::PARTIAL_CONTENT,
                    [(
                        header::CONTENT_RANGE,
                        format!("bytes {}-{}/{}", start, end, data.len()),
                    )],
                    body,
                )
                    .into_response();
            }
        }

        (StatusCode::OK, data.clone()).into_response()
    }

    fn parse_range(value: Option<&HeaderValue>, size: usize) -> Option<(usize, usize)> {
        let spec = value?.to_str().ok()?.strip_prefix("bytes=")?;
        let (start, end) = spec.split_once('-')?;
        let start: usize = start.parse().ok()?;
        let end: usize = end.parse().ok()?;
        if start >= size || end < start {
            return None;
        }
        Some((start, end.min(size - 1)))
    }

    async fn spawn_app(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test server");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve");
        });
        format!("http://{addr}")
    }

    async fn spawn_image_server(
        files: HashMap<&'static str, Vec<u8>>,
        support_range: bool,
    ) -> (String, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let server = ImageServer {
            files: Arc::new(files),
            support_range,
            hits: hits.clone(),
        };
        let app = Router::new().fallback(get(serve_image)).with_state(server);
        (spawn_app(app).await, hits)
    }

    fn sample_files() -> HashMap<&'static str, Vec<u8>> {
        HashMap::from([
            ("/a.png", png_bytes(90, 60)),
            ("/b.gif", gif_bytes(333, 194)),
            ("/c.jpg", jpeg_bytes(52, 54, 0)),
        ])
    }

    fn expected_infos() -> [ImageInfo; 3] {
        [
            ImageInfo {
                format: ImageFormat::Png,
                width: 90,
                height: 60,
            },
            ImageInfo {
                format: ImageFormat::Gif,
                width: 333,
                height: 194,
            },
            ImageInfo {
                format: ImageFormat::Jpeg,
                width: 52,
                height: 54,
            },
        ]
    }

    // ---- batch behavior ----

    #[tokio::test]
    async fn resolves_images_with_range_server() {
        let (base, _) = spawn_image_server(sample_files(), true).await;
        let urls = vec![
            format!("{base}/a.png"),
            format!("{base}/b.gif"),
            format!("{base}/c.jpg"),
        ];

        let prober = Prober::new(test_options());
        let results = prober.probe(&urls, &CancellationToken::new()).await;

        assert_eq!(results.len(), urls.len());
        for (result, expected) in results.iter().zip(expected_infos()) {
            assert!(result.is_success(), "unexpected error: {:?}", result.error);
            assert_eq!(result.info, expected);
        }
    }

    #[tokio::test]
    async fn resolves_images_without_range_server() {
        let (base, _) = spawn_image_server(sample_files(), false).await;
        let urls = vec![
            format!("{base}/a.png"),
            format!("{base}/b.gif"),
            format!("{base}/c.jpg"),
        ];

        let prober = Prober::new(test_options());
        let results = prober.probe(&urls, &CancellationToken::new()).await;

        for (result, expected) in results.iter().zip(expected_infos()) {
            assert!(result.is_success(), "unexpected error: {:?}", result.error);
            assert_eq!(result.info, expected);
        }
    }

    #[tokio::test]
    async fn results_match_input_order() {
        let (base, _) = spawn_image_server(sample_files(), true).await;
        let urls = vec![
            format!("{base}/c.jpg"),
            format!("{base}/a.png"),
            format!("{base}/c.jpg"),
            format!("{base}/b.gif"),
        ];

        let results = probe_urls(&urls, &CancellationToken::new()).await;

        assert_eq!(results.len(), urls.len());
        for (result, url) in results.iter().zip(&urls) {
            assert_eq!(&result.url, url);
        }
        assert_eq!(results[0].info.format, ImageFormat::Jpeg);
        assert_eq!(results[1].info.format, ImageFormat::Png);
        assert_eq!(results[2].info.format, ImageFormat::Jpeg);
        assert_eq!(results[3].info.format, ImageFormat::Gif);
    }

    #[tokio::test]
    async fn repeated_batches_are_idempotent() {
        let (base, _) = spawn_image_server(sample_files(), true).await;
        let urls = vec![format!("{base}/a.png"), format!("{base}/b.gif")];

        let prober = Prober::new(test_options());
        let first = prober.probe(&urls, &CancellationToken::new()).await;
        let second = prober.probe(&urls, &CancellationToken::new()).await;

        for (a, b) in first.iter().zip(&second) {
            assert_eq!(a.info, b.info);
        }
    }

    #[test]
    fn empty_batch_is_empty_and_offline() {
        let results = tokio_test::block_on(probe_urls(&[], &CancellationToken::new()));
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn malformed_urls_fail_locally_alongside_good_ones() {
        let (base, hits) = spawn_image_server(sample_files(), true).await;
        let urls = vec![
            "::not a url".to_string(),
            String::new(),
            format!("{base}/a.png"),
            "no-scheme.example.com/x.png".to_string(),
        ];

        let results = probe_urls(&urls, &CancellationToken::new()).await;

        assert!(matches!(results[0].error, Some(ProbeError::InvalidUrl(_))));
        assert!(matches!(results[1].error, Some(ProbeError::InvalidUrl(_))));
        assert!(results[2].is_success());
        assert!(matches!(results[3].error, Some(ProbeError::InvalidUrl(_))));

        // Only the valid URL produced network traffic.
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn non_http_scheme_is_a_transport_error() {
        let urls = vec!["ftp://example.com/a.png".to_string()];
        let results = probe_urls(&urls, &CancellationToken::new()).await;
        assert!(matches!(results[0].error, Some(ProbeError::Transport { .. })));
    }

    // ---- progressive fetching ----

    #[tokio::test]
    async fn small_header_needs_exactly_one_request() {
        let (base, hits) = spawn_image_server(sample_files(), true).await;
        let urls = vec![format!("{base}/a.png")];

        let results = probe_urls(&urls, &CancellationToken::new()).await;

        assert!(results[0].is_success());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn late_header_widens_to_second_budget() {
        let files = HashMap::from([("/deep.jpg", jpeg_bytes(640, 480, 2000))]);
        let (base, hits) = spawn_image_server(files, true).await;
        let urls = vec![format!("{base}/deep.jpg")];

        let results = probe_urls(&urls, &CancellationToken::new()).await;

        assert_eq!(
            results[0].info,
            ImageInfo {
                format: ImageFormat::Jpeg,
                width: 640,
                height: 480,
            }
        );
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn tiny_file_reports_insufficient_bytes() {
        let files = HashMap::from([("/tiny.bin", vec![0u8; 40])]);
        let (base, hits) = spawn_image_server(files, true).await;
        let urls = vec![format!("{base}/tiny.bin")];

        let results = probe_urls(&urls, &CancellationToken::new()).await;

        assert!(matches!(
            results[0].error,
            Some(ProbeError::InsufficientBytes { got: 40, min: 80 })
        ));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn undetectable_payload_exhausts_every_budget() {
        let files = HashMap::from([("/noise.bin", vec![0u8; 100_000])]);
        let (base, hits) = spawn_image_server(files, true).await;
        let urls = vec![format!("{base}/noise.bin")];

        let results = probe_urls(&urls, &CancellationToken::new()).await;

        assert!(matches!(
            results[0].error,
            Some(ProbeError::InsufficientBytes { got: 100_000, .. })
        ));
        assert_eq!(hits.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn missing_file_is_a_status_error() {
        let (base, _) = spawn_image_server(sample_files(), true).await;
        let urls = vec![format!("{base}/nope.png")];

        let results = probe_urls(&urls, &CancellationToken::new()).await;

        assert!(matches!(
            results[0].error,
            Some(ProbeError::HttpStatus { status: 404, .. })
        ));
    }

    // ---- rate limiting ----

    async fn spawn_rate_limited_server(
        limit_first: Option<Vec<u8>>,
    ) -> (String, Arc<AtomicUsize>) {
        // With a payload, only the first request is limited; without one,
        // every request is.
        let hits = Arc::new(AtomicUsize::new(0));
        let state = hits.clone();
        let app = Router::new().fallback(get(move || {
            let state = state.clone();
            let payload = limit_first.clone();
            async move {
                let previous = state.fetch_add(1, Ordering::SeqCst);
                match payload {
                    Some(data) if previous > 0 => (StatusCode::OK, data).into_response(),
                    _ => (
                        StatusCode::TOO_MANY_REQUESTS,
                        [(header::RETRY_AFTER, "1")],
                        "slow down",
                    )
                        .into_response(),
                }
            }
        }));
        (spawn_app(app).await, hits)
    }

    #[tokio::test]
    async fn persistent_rate_limit_retries_exactly_once() {
        let (base, hits) = spawn_rate_limited_server(None).await;
        let urls = vec![format!("{base}/limited.png")];

        let started = Instant::now();
        let results = probe_urls(&urls, &CancellationToken::new()).await;

        assert!(matches!(
            results[0].error,
            Some(ProbeError::RateLimited { status: 429, .. })
        ));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert!(started.elapsed() >= Duration::from_millis(900));
    }

    #[tokio::test]
    async fn rate_limit_clears_on_the_retry() {
        let (base, hits) = spawn_rate_limited_server(Some(png_bytes(90, 60))).await;
        let urls = vec![format!("{base}/flaky.png")];

        let started = Instant::now();
        let results = probe_urls(&urls, &CancellationToken::new()).await;

        assert!(results[0].is_success(), "error: {:?}", results[0].error);
        assert_eq!(results[0].info.format, ImageFormat::Png);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert!(started.elapsed() >= Duration::from_millis(900));
    }

    #[tokio::test]
    async fn rate_limit_without_retry_after_is_a_status_error() {
        let hits = Arc::new(AtomicUsize::new(0));
        let state = hits.clone();
        let app = Router::new().fallback(get(move || {
            let state = state.clone();
            async move {
                state.fetch_add(1, Ordering::SeqCst);
                StatusCode::TOO_MANY_REQUESTS
            }
        }));
        let base = spawn_app(app).await;
        let urls = vec![format!("{base}/limited.png")];

        let results = probe_urls(&urls, &CancellationToken::new()).await;

        assert!(matches!(
            results[0].error,
            Some(ProbeError::HttpStatus { status: 429, .. })
        ));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    // ---- cancellation ----

    #[tokio::test]
    async fn cancellation_aborts_admission_blocked_tasks() {
        let hits = Arc::new(AtomicUsize::new(0));
        let state = hits.clone();
        let app = Router::new().fallback(get(move || {
            let state = state.clone();
            async move {
                state.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(30)).await;
                StatusCode::OK
            }
        }));
        let base = spawn_app(app).await;
        let urls: Vec<String> = (0..3).map(|i| format!("{base}/slow-{i}.png")).collect();

        let options = ProbeOptions {
            concurrent_requests_reusable: 1,
            concurrent_requests_non_reusable: 1,
            max_concurrent_connections: 1,
            user_agent: None,
        };
        let cancel = CancellationToken::new();
        let prober = Prober::new(options);

        let probe = tokio::spawn({
            let cancel = cancel.clone();
            async move { prober.probe(&urls, &cancel).await }
        });

        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel.cancel();

        let results = tokio::time::timeout(Duration::from_secs(5), probe)
            .await
            .expect("cancellation must unblock the batch")
            .expect("probe task");

        assert_eq!(results.len(), 3);
        for result in &results {
            assert!(matches!(result.error, Some(ProbeError::Cancelled)));
        }
        // Only the task holding the single admission slot reached the wire.
        assert!(hits.load(Ordering::SeqCst) <= 1);
    }
}
