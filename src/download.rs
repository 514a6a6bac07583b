use crate::config::DEFAULT_MAX_REDIRECTS;
use crate::error::{Result, YvmError};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::{Client, Url};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Body of a response, delivered in chunks
pub type BodyStream = BoxStream<'static, Result<Vec<u8>>>;

/// A single, non-redirect-following HTTP response
pub struct TransportResponse {
    pub status: u16,
    pub location: Option<String>,
    pub content_length: Option<u64>,
    pub body: BodyStream,
}

/// Performs one GET request. Redirects are reported, never followed.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &str) -> Result<TransportResponse>;
}

pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!(
                env!("CARGO_PKG_NAME"),
                "/",
                env!("CARGO_PKG_VERSION")
            ))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| YvmError::InternalError(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &str) -> Result<TransportResponse> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| YvmError::network(url, e))?;

        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        let status = response.status().as_u16();
        let content_length = response.content_length();
        let owned_url = url.to_string();
        let body = response
            .bytes_stream()
            .map(move |chunk| {
                chunk
                    .map(|bytes| bytes.to_vec())
                    .map_err(|e| YvmError::network(&owned_url, e))
            })
            .boxed();

        Ok(TransportResponse {
            status,
            location,
            content_length,
            body,
        })
    }
}

/// HTTPS-only fetcher that follows a bounded number of redirects
#[derive(Clone)]
pub struct Downloader {
    transport: Arc<dyn Transport>,
    max_redirects: usize,
}

impl Downloader {
    pub fn new() -> Result<Self> {
        Ok(Self::with_transport(Arc::new(HttpTransport::new()?)))
    }

    pub fn with_transport(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            max_redirects: DEFAULT_MAX_REDIRECTS,
        }
    }

    pub fn max_redirects(mut self, limit: usize) -> Self {
        self.max_redirects = limit;
        self
    }

    /// Fetch a small document (release indices) into memory
    pub async fn fetch_text(&self, url: &str, cancel: &CancellationToken) -> Result<String> {
        let (final_url, response) = self.open(url, cancel).await?;
        let mut body = response.body;
        let mut buffer = Vec::new();

        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(YvmError::Cancelled(final_url.clone())),
                chunk = body.next() => chunk,
            };
            match chunk {
                Some(chunk) => buffer.extend_from_slice(&chunk?),
                None => break,
            }
        }

        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }

    /// Stream `url` to `dest`. The body lands in a `.part` sibling first and is
    /// renamed into place only once complete; on any failure the partial file
    /// is removed.
    pub async fn fetch_to_file(
        &self,
        url: &str,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let (final_url, response) = self.open(url, cancel).await?;
        let part = partial_path(dest);

        match self.write_body(&final_url, response, &part, cancel).await {
            Ok(written) => {
                tokio::fs::rename(&part, dest).await?;
                Ok(written)
            }
            Err(e) => {
                if let Err(cleanup) = tokio::fs::remove_file(&part).await {
                    if cleanup.kind() != std::io::ErrorKind::NotFound {
                        debug!("could not remove partial download {}: {}", part.display(), cleanup);
                    }
                }
                Err(e)
            }
        }
    }

    async fn write_body(
        &self,
        url: &str,
        response: TransportResponse,
        part: &Path,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let pb = ProgressBar::new(response.content_length.unwrap_or(0));
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({eta})")
                .map_err(|e| YvmError::InternalError(e.to_string()))?
                .progress_chars("#>-"),
        );
        pb.set_message(format!(
            "Downloading {}",
            url.rsplit('/').next().unwrap_or("file")
        ));

        let mut file = File::create(part).await?;
        let mut written: u64 = 0;
        let mut body = response.body;

        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    pb.abandon_with_message("Download cancelled");
                    return Err(YvmError::Cancelled(url.to_string()));
                }
                chunk = body.next() => chunk,
            };
            let Some(chunk) = chunk else { break };
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
            pb.set_position(written);
        }

        file.flush().await?;
        pb.finish_with_message("Download complete");
        Ok(written)
    }

    /// Issue the request, following HTTPS redirects, and return the final
    /// URL together with the successful response.
    async fn open(&self, url: &str, cancel: &CancellationToken) -> Result<(String, TransportResponse)> {
        let mut current = require_https(url)?;
        let mut hops = 0;

        loop {
            let response = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(YvmError::Cancelled(current.to_string())),
                response = self.transport.get(current.as_str()) => response?,
            };

            match response.status {
                300..=399 => {
                    let Some(location) = response.location.as_deref() else {
                        return Err(YvmError::DownloadFailed {
                            status: response.status,
                            url: current.to_string(),
                        });
                    };
                    let next = current
                        .join(location)
                        .map_err(|_| YvmError::UnsupportedScheme(location.to_string()))?;
                    let next = require_https(next.as_str())?;

                    hops += 1;
                    if hops > self.max_redirects {
                        return Err(YvmError::TooManyRedirects {
                            url: url.to_string(),
                            limit: self.max_redirects,
                        });
                    }
                    debug!("following redirect {} -> {}", current, next);
                    current = next;
                }
                status if status >= 400 => {
                    return Err(YvmError::DownloadFailed {
                        status,
                        url: current.to_string(),
                    });
                }
                _ => {
                    info!("fetched {}", current);
                    return Ok((current.to_string(), response));
                }
            }
        }
    }
}

fn require_https(url: &str) -> Result<Url> {
    match Url::parse(url) {
        Ok(parsed) if parsed.scheme() == "https" => Ok(parsed),
        _ => Err(YvmError::UnsupportedScheme(url.to_string())),
    }
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_os_string();
    name.push(".part");
    PathBuf::from(name)
}


#[cfg(test)]
mod tests {
    use super::testing::MockTransport;
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_http_scheme_rejected_without_network() {
        let transport = MockTransport::new();
        let downloader = Downloader::with_transport(transport.clone());
        let cancel = CancellationToken::new();

        let err = downloader
            .fetch_text("http://example.com/index.json", &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, YvmError::UnsupportedScheme(_)));

        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("yarn.tar.gz");
        let err = downloader
            .fetch_to_file("ftp://example.com/yarn.tar.gz", &dest, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, YvmError::UnsupportedScheme(_)));

        assert_eq!(transport.request_count(), 0);
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_redirect_chain_written_once() {
        let transport = MockTransport::new();
        transport.redirect("https://a.example/yarn.tar.gz", "https://b.example/yarn.tar.gz");
        transport.ok("https://b.example/yarn.tar.gz", b"archive-bytes".to_vec());

        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("v1.2.0.tar.gz");
        let downloader = Downloader::with_transport(transport.clone());

        let written = downloader
            .fetch_to_file("https://a.example/yarn.tar.gz", &dest, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(written, 13);
        assert_eq!(std::fs::read(&dest).unwrap(), b"archive-bytes");
        assert!(!partial_path(&dest).exists());
        assert_eq!(
            transport.requested(),
            vec!["https://a.example/yarn.tar.gz", "https://b.example/yarn.tar.gz"]
        );
    }

    #[tokio::test]
    async fn test_relative_redirect_resolved_against_current_url() {
        let transport = MockTransport::new();
        transport.redirect("https://a.example/dl/latest", "/dl/v2");
        transport.ok("https://a.example/dl/v2", "body");

        let downloader = Downloader::with_transport(transport.clone());
        let text = downloader
            .fetch_text("https://a.example/dl/latest", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(text, "body");
    }

    #[tokio::test]
    async fn test_redirect_to_http_rejected() {
        let transport = MockTransport::new();
        transport.redirect("https://a.example/x", "http://b.example/x");

        let downloader = Downloader::with_transport(transport.clone());
        let err = downloader
            .fetch_text("https://a.example/x", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, YvmError::UnsupportedScheme(_)));
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn test_redirect_cycle_is_bounded() {
        let transport = MockTransport::new();
        transport.redirect("https://a.example/x", "https://b.example/x");
        transport.redirect("https://b.example/x", "https://a.example/x");

        let downloader = Downloader::with_transport(transport.clone()).max_redirects(4);
        let err = downloader
            .fetch_text("https://a.example/x", &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, YvmError::TooManyRedirects { limit: 4, .. }));
        assert_eq!(transport.request_count(), 5);
    }

    #[tokio::test]
    async fn test_error_status_leaves_no_file() {
        let transport = MockTransport::new();
        transport.status("https://a.example/missing.tar.gz", 404);

        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("v9.9.9.tar.gz");
        let downloader = Downloader::with_transport(transport);

        let err = downloader
            .fetch_to_file("https://a.example/missing.tar.gz", &dest, &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            YvmError::DownloadFailed { status, url } => {
                assert_eq!(status, 404);
                assert_eq!(url, "https://a.example/missing.tar.gz");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!dest.exists());
        assert!(!partial_path(&dest).exists());
    }

    #[tokio::test]
    async fn test_cancelled_fetch_cleans_up() {
        let transport = MockTransport::new();
        transport.ok("https://a.example/yarn.tar.gz", b"data".to_vec());

        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("v1.0.0.tar.gz");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = Downloader::with_transport(transport)
            .fetch_to_file("https://a.example/yarn.tar.gz", &dest, &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, YvmError::Cancelled(_)));
        assert!(!dest.exists());
        assert!(!partial_path(&dest).exists());
    }

    /// Serves one chunk, then either stalls forever or fails
    struct InterruptedTransport {
        fail: bool,
    }

    #[async_trait]
    impl Transport for InterruptedTransport {
        async fn get(&self, url: &str) -> Result<TransportResponse> {
            let first = futures_util::stream::iter(vec![Ok(b"first-chunk".to_vec())]);
            let body = if self.fail {
                let err = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
                first
                    .chain(futures_util::stream::iter(vec![Err(YvmError::network(url, err))]))
                    .boxed()
            } else {
                first.chain(futures_util::stream::pending()).boxed()
            };

            Ok(TransportResponse {
                status: 200,
                location: None,
                content_length: Some(1024),
                body,
            })
        }
    }

    #[tokio::test]
    async fn test_cancel_during_body_removes_partial_file() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("v1.0.0.tar.gz");
        let part = partial_path(&dest);
        let cancel = CancellationToken::new();

        let downloader = Downloader::with_transport(Arc::new(InterruptedTransport { fail: false }));
        let task = {
            let dest = dest.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                downloader
                    .fetch_to_file("https://a.example/yarn.tar.gz", &dest, &cancel)
                    .await
            })
        };

        for _ in 0..200 {
            if part.exists() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(part.exists(), "partial file should exist while the body stalls");

        cancel.cancel();
        let err = task.await.unwrap().unwrap_err();

        assert!(matches!(err, YvmError::Cancelled(_)));
        assert!(!dest.exists());
        assert!(!part.exists());
    }

    #[tokio::test]
    async fn test_network_error_during_body_removes_partial_file() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("v1.0.0.tar.gz");

        let err = Downloader::with_transport(Arc::new(InterruptedTransport { fail: true }))
            .fetch_to_file("https://a.example/yarn.tar.gz", &dest, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, YvmError::NetworkError { .. }));
        assert!(!dest.exists());
        assert!(!partial_path(&dest).exists());
    }

    #[tokio::test]
    async fn test_http_transport_reports_redirect_without_following() {
        let mut server = mockito::Server::new_async().await;
        let redirect = server
            .mock("GET", "/latest.tar.gz")
            .with_status(302)
            .with_header("location", "https://example.com/yarn-v1.2.0.tar.gz")
            .create_async()
            .await;

        let transport = HttpTransport::new().unwrap();
        let response = transport
            .get(&format!("{}/latest.tar.gz", server.url()))
            .await
            .unwrap();

        assert_eq!(response.status, 302);
        assert_eq!(
            response.location.as_deref(),
            Some("https://example.com/yarn-v1.2.0.tar.gz")
        );
        redirect.assert_async().await;
    }

    #[tokio::test]
    async fn test_http_transport_streams_body() {
        let mut server = mockito::Server::new_async().await;
        let index = server
            .mock("GET", "/releases")
            .with_status(200)
            .with_body(r#"[{"tag_name":"v1.2.0"}]"#)
            .create_async()
            .await;

        let transport = HttpTransport::new().unwrap();
        let response = transport
            .get(&format!("{}/releases", server.url()))
            .await
            .unwrap();
        assert_eq!(response.status, 200);

        let chunks: Vec<Vec<u8>> = response
            .body
            .map(|chunk| chunk.unwrap())
            .collect()
            .await;
        assert_eq!(chunks.concat(), br#"[{"tag_name":"v1.2.0"}]"#.to_vec());
        index.assert_async().await;
    }
}
