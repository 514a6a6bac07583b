use thiserror::Error;

#[derive(Error, Debug)]
pub enum YvmError {
    #[error("Unsupported URL scheme (only https:// is allowed): {0}")]
    UnsupportedScheme(String),

    #[error("Download of {url} failed with HTTP status {status}")]
    DownloadFailed { status: u16, url: String },

    #[error("Too many redirects (more than {limit}) while fetching {url}")]
    TooManyRedirects { url: String, limit: usize },

    #[error("Network error while fetching {url}: {source}")]
    NetworkError {
        url: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Fetch of {0} was cancelled")]
    Cancelled(String),

    #[error("No release matches version '{0}'")]
    VersionNotFound(String),

    #[error("Malformed release index: {0}")]
    MalformedReleaseIndex(String),

    #[error("Failed to extract archive: {0}")]
    ExtractionFailed(String),

    #[error("Yarn {0} is not installed")]
    VersionNotInstalled(String),

    #[error("Invalid version format: {0}")]
    InvalidVersion(String),

    #[error("No shell config file found to configure")]
    NoShellConfigFound,

    #[error("Shell config files exist but none could be updated: {0}")]
    ShellConfigNotWritten(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),
}

impl YvmError {
    pub fn network<E>(url: &str, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        YvmError::NetworkError {
            url: url.to_string(),
            source: Box::new(source),
        }
    }
}

pub type Result<T> = std::result::Result<T, YvmError>;
