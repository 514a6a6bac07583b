use crate::download::Downloader;
use crate::error::{Result, YvmError};
use crate::models::ReleaseDescriptor;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const ARCHIVE_EXTENSIONS: &[&str] = &[".tar.gz", ".tgz", ".zip"];

#[derive(Debug, Deserialize)]
struct GitHubAsset {
    browser_download_url: String,
}

#[derive(Debug, Deserialize)]
struct GitHubRelease {
    tag_name: String,
    #[serde(default)]
    assets: Vec<GitHubAsset>,
}

impl GitHubRelease {
    fn into_descriptor(self) -> Result<ReleaseDescriptor> {
        let chosen = self
            .assets
            .iter()
            .position(|asset| {
                ARCHIVE_EXTENSIONS
                    .iter()
                    .any(|ext| asset.browser_download_url.ends_with(ext))
            })
            .unwrap_or(0);

        let asset = self.assets.into_iter().nth(chosen).ok_or_else(|| {
            YvmError::MalformedReleaseIndex(format!(
                "release {} has no downloadable asset",
                self.tag_name
            ))
        })?;

        Ok(ReleaseDescriptor {
            tag_name: self.tag_name,
            download_url: asset.browser_download_url,
        })
    }
}

/// Resolves version specifiers against a GitHub-style release index
pub struct ReleaseApi {
    downloader: Downloader,
    latest_url: String,
    releases_url: String,
}

impl ReleaseApi {
    pub fn new(downloader: Downloader, latest_url: &str, releases_url: &str) -> Self {
        Self {
            downloader,
            latest_url: latest_url.to_string(),
            releases_url: releases_url.to_string(),
        }
    }

    /// Most recent release, as reported by the single-object "latest" endpoint.
    /// The remote service is trusted to define what "latest" means.
    pub async fn latest(&self, cancel: &CancellationToken) -> Result<ReleaseDescriptor> {
        let body = self.downloader.fetch_text(&self.latest_url, cancel).await?;
        let release: GitHubRelease = serde_json::from_str(&body)
            .map_err(|e| YvmError::MalformedReleaseIndex(e.to_string()))?;
        release.into_descriptor()
    }

    /// First release, in index order, whose tag matches `pattern`
    pub async fn find(&self, pattern: &str, cancel: &CancellationToken) -> Result<ReleaseDescriptor> {
        let matcher = TagMatcher::new(pattern);

        for release in self.releases(cancel).await? {
            if matcher.is_match(&release.tag_name) {
                debug!("pattern '{}' matched release {}", pattern, release.tag_name);
                return release.into_descriptor();
            }
            // Every entry passed over must still be well formed
            if release.assets.is_empty() {
                return Err(YvmError::MalformedReleaseIndex(format!(
                    "release {} has no downloadable asset",
                    release.tag_name
                )));
            }
        }

        Err(YvmError::VersionNotFound(pattern.to_string()))
    }

    /// Every tag in the release list, in index order
    pub async fn list_remote(&self, cancel: &CancellationToken) -> Result<Vec<String>> {
        Ok(self
            .releases(cancel)
            .await?
            .into_iter()
            .map(|release| release.tag_name)
            .collect())
    }

    async fn releases(&self, cancel: &CancellationToken) -> Result<Vec<GitHubRelease>> {
        let body = self.downloader.fetch_text(&self.releases_url, cancel).await?;
        let value: Value = serde_json::from_str(&body)
            .map_err(|e| YvmError::MalformedReleaseIndex(e.to_string()))?;

        if !value.is_array() {
            return Err(YvmError::MalformedReleaseIndex(
                "expected a JSON array of releases".to_string(),
            ));
        }

        serde_json::from_value(value).map_err(|e| YvmError::MalformedReleaseIndex(e.to_string()))
    }
}

/// Tag pattern: a regular expression searched within the tag, or a literal
/// substring when the pattern does not compile.
enum TagMatcher {
    Regex(Regex),
    Literal(String),
}

impl TagMatcher {
    fn new(pattern: &str) -> Self {
        match Regex::new(pattern) {
            Ok(re) => TagMatcher::Regex(re),
            Err(_) => TagMatcher::Literal(pattern.to_string()),
        }
    }

    fn is_match(&self, tag: &str) -> bool {
        match self {
            TagMatcher::Regex(re) => re.is_match(tag),
            TagMatcher::Literal(literal) => tag.contains(literal.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::testing::MockTransport;

    const LATEST: &str = "https://api.example.com/releases/latest";
    const LIST: &str = "https://api.example.com/releases";

    fn api(transport: &std::sync::Arc<MockTransport>) -> ReleaseApi {
        ReleaseApi::new(Downloader::with_transport(transport.clone()), LATEST, LIST)
    }

    fn release_list() -> String {
        serde_json::json!([
            {
                "tag_name": "v1.22.19",
                "assets": [
                    { "browser_download_url": "https://dl.example.com/yarn_1.22.19_all.deb" },
                    { "browser_download_url": "https://dl.example.com/yarn-v1.22.19.tar.gz" }
                ]
            },
            {
                "tag_name": "v1.22.18",
                "assets": [{ "browser_download_url": "https://dl.example.com/yarn-v1.22.18.tar.gz" }]
            },
            {
                "tag_name": "v1.21.1",
                "assets": [{ "browser_download_url": "https://dl.example.com/yarn-v1.21.1.tar.gz" }]
            }
        ])
        .to_string()
    }

    #[tokio::test]
    async fn test_latest_uses_single_object_endpoint() {
        let transport = MockTransport::new();
        transport.ok(
            LATEST,
            r#"{"tag_name":"v3.1.0","assets":[{"browser_download_url":"https://dl.example.com/yvm.zip"}]}"#,
        );
        transport.ok(LIST, release_list());

        let release = api(&transport).latest(&CancellationToken::new()).await.unwrap();
        assert_eq!(release.tag_name, "v3.1.0");
        assert_eq!(release.download_url, "https://dl.example.com/yvm.zip");
        assert_eq!(transport.requested(), vec![LATEST]);
    }

    #[tokio::test]
    async fn test_pattern_returns_first_match_in_index_order() {
        let transport = MockTransport::new();
        transport.ok(LIST, release_list());

        let release = api(&transport)
            .find("1.22", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(release.tag_name, "v1.22.19");
        assert_eq!(release.download_url, "https://dl.example.com/yarn-v1.22.19.tar.gz");

        let release = api(&transport)
            .find(r"^v1\.21", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(release.tag_name, "v1.21.1");
    }

    #[tokio::test]
    async fn test_invalid_regex_falls_back_to_literal() {
        let transport = MockTransport::new();
        transport.ok(
            LIST,
            r#"[{"tag_name":"v2.0.0(beta","assets":[{"browser_download_url":"https://dl.example.com/a.zip"}]}]"#,
        );

        let release = api(&transport)
            .find("0(beta", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(release.tag_name, "v2.0.0(beta");
    }

    #[tokio::test]
    async fn test_no_match_is_version_not_found() {
        let transport = MockTransport::new();
        transport.ok(LIST, release_list());

        let err = api(&transport)
            .find("9.9", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, YvmError::VersionNotFound(ref v) if v == "9.9"));
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn test_malformed_index() {
        let transport = MockTransport::new();
        transport.ok(LIST, r#"{"message":"API rate limit exceeded"}"#);
        let err = api(&transport)
            .find("1.22", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, YvmError::MalformedReleaseIndex(_)));

        let transport = MockTransport::new();
        transport.ok(LIST, r#"[{"tag_name":"v1.0.0","assets":[]}]"#);
        let err = api(&transport)
            .find("1.0", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, YvmError::MalformedReleaseIndex(_)));

        let transport = MockTransport::new();
        transport.ok(LATEST, "not json");
        let err = api(&transport).latest(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, YvmError::MalformedReleaseIndex(_)));
    }

    #[tokio::test]
    async fn test_index_over_http_is_rejected() {
        let transport = MockTransport::new();
        let api = ReleaseApi::new(
            Downloader::with_transport(transport.clone()),
            "http://api.example.com/latest",
            "http://api.example.com/releases",
        );

        let err = api.latest(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, YvmError::UnsupportedScheme(_)));
        let err = api.find("1", &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, YvmError::UnsupportedScheme(_)));
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn test_list_remote_keeps_index_order() {
        let transport = MockTransport::new();
        transport.ok(LIST, release_list());

        let tags = api(&transport).list_remote(&CancellationToken::new()).await.unwrap();
        assert_eq!(tags, vec!["v1.22.19", "v1.22.18", "v1.21.1"]);
    }
}
