use crate::error::{Result, YvmError};
use crate::models::Version;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_LATEST_RELEASE_URL: &str =
    "https://api.github.com/repos/yarnpkg/yarn/releases/latest";
pub const DEFAULT_RELEASES_URL: &str = "https://api.github.com/repos/yarnpkg/yarn/releases";
pub const DEFAULT_DOWNLOAD_URL_TEMPLATE: &str =
    "https://yarnpkg.com/downloads/{version}/yarn-v{version}.tar.gz";
pub const DEFAULT_SELF_LATEST_RELEASE_URL: &str =
    "https://d236jo9e8rrdox.cloudfront.net/yvm-releases";
pub const DEFAULT_SELF_RELEASES_URL: &str = "https://api.github.com/repos/tophat/yvm/releases";
pub const DEFAULT_MAX_REDIRECTS: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(skip)]
    pub yvm_dir: PathBuf,

    #[serde(skip)]
    pub versions_dir: PathBuf,

    #[serde(skip)]
    pub config_file: PathBuf,

    /// Use a local artifact instead of downloading during self-install (`USE_LOCAL`)
    #[serde(skip)]
    pub use_local: bool,

    /// Local artifact consumed when `use_local` is set
    #[serde(skip)]
    pub local_artifact: PathBuf,

    /// Tag pattern pinning the self-install release (`INSTALL_VERSION`)
    #[serde(skip)]
    pub install_version: Option<String>,

    /// Version reported as the default in listings
    pub default_version: Option<String>,

    /// Endpoint returning the most recent Yarn release as a single object
    pub latest_release_url: String,

    /// Endpoint returning the full Yarn release list, most recent first
    pub releases_url: String,

    /// Archive URL for an exact version; `{version}` is substituted
    pub download_url_template: String,

    pub self_latest_release_url: String,

    pub self_releases_url: String,

    /// Upper bound on followed HTTPS redirects per fetch
    pub max_redirects: usize,

    /// Abort downloads that take longer than this many seconds
    pub download_timeout_secs: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self::for_root(Self::default_yvm_dir())
    }
}

impl Config {
    /// Configuration rooted at an explicit install directory
    pub fn for_root<P: Into<PathBuf>>(yvm_dir: P) -> Self {
        let yvm_dir = yvm_dir.into();

        Self {
            versions_dir: yvm_dir.join("versions"),
            config_file: yvm_dir.join("config.toml"),
            yvm_dir,
            use_local: false,
            local_artifact: PathBuf::from("artifacts/yvm.zip"),
            install_version: None,
            default_version: None,
            latest_release_url: DEFAULT_LATEST_RELEASE_URL.to_string(),
            releases_url: DEFAULT_RELEASES_URL.to_string(),
            download_url_template: DEFAULT_DOWNLOAD_URL_TEMPLATE.to_string(),
            self_latest_release_url: DEFAULT_SELF_LATEST_RELEASE_URL.to_string(),
            self_releases_url: DEFAULT_SELF_RELEASES_URL.to_string(),
            max_redirects: DEFAULT_MAX_REDIRECTS,
            download_timeout_secs: None,
        }
    }

    fn default_yvm_dir() -> PathBuf {
        for var in ["YVM_DIR", "YVM_INSTALL_DIR"] {
            if let Ok(dir) = std::env::var(var) {
                if !dir.trim().is_empty() {
                    return PathBuf::from(shellexpand::tilde(&dir).to_string());
                }
            }
        }

        match home_dir() {
            Some(home) => home.join(".yvm"),
            None => PathBuf::from(shellexpand::tilde("~/.yvm").to_string()),
        }
    }

    /// Load configuration. Never creates the install root.
    pub fn load() -> Result<Self> {
        let mut config = Self::default();
        config.merge_file()?;

        config.use_local = std::env::var("USE_LOCAL")
            .map(|v| !v.is_empty() && v != "0" && v != "false")
            .unwrap_or(false);
        config.install_version = std::env::var("INSTALL_VERSION")
            .ok()
            .filter(|v| !v.trim().is_empty());

        Ok(config)
    }

    fn merge_file(&mut self) -> Result<()> {
        if !self.config_file.exists() {
            return Ok(());
        }

        let contents = std::fs::read_to_string(&self.config_file)?;
        let file_config: Config = toml::from_str(&contents)?;

        self.default_version = file_config.default_version;
        self.latest_release_url = file_config.latest_release_url;
        self.releases_url = file_config.releases_url;
        self.download_url_template = file_config.download_url_template;
        self.self_latest_release_url = file_config.self_latest_release_url;
        self.self_releases_url = file_config.self_releases_url;
        self.max_redirects = file_config.max_redirects;
        self.download_timeout_secs = file_config.download_timeout_secs;
        Ok(())
    }

    pub fn save(&self) -> Result<()> {
        let contents =
            toml::to_string_pretty(self).map_err(|e| YvmError::ConfigError(e.to_string()))?;

        std::fs::create_dir_all(&self.yvm_dir)?;
        std::fs::write(&self.config_file, contents)?;
        Ok(())
    }

    pub fn get_version_dir(&self, version: &Version) -> PathBuf {
        self.versions_dir.join(version.dir_name())
    }

    pub fn download_url(&self, version: &Version) -> String {
        self.download_url_template
            .replace("{version}", &version.to_string())
    }

    /// Marker recording the last self-installed release tag
    pub fn version_marker(&self) -> PathBuf {
        self.yvm_dir.join(".version")
    }
}

/// `HOME`, falling back to what the OS reports
pub fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .filter(|h| !h.is_empty())
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_for_root() {
        let config = Config::for_root("/tmp/yvm-root");
        assert_eq!(config.versions_dir, PathBuf::from("/tmp/yvm-root/versions"));
        assert_eq!(config.max_redirects, DEFAULT_MAX_REDIRECTS);
        assert!(config.default_version.is_none());
        assert_eq!(
            config.get_version_dir(&Version::new(1, 2, 0)),
            PathBuf::from("/tmp/yvm-root/versions/v1.2.0")
        );
    }

    #[test]
    fn test_download_url_template() {
        let config = Config::for_root("/tmp/yvm-root");
        assert_eq!(
            config.download_url(&Version::new(1, 22, 19)),
            "https://yarnpkg.com/downloads/1.22.19/yarn-v1.22.19.tar.gz"
        );
    }

    #[test]
    fn test_save_and_merge_roundtrip() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("root");

        let mut config = Config::for_root(&root);
        assert!(!root.exists());
        config.default_version = Some("1.3.0".to_string());
        config.max_redirects = 3;
        config.save().unwrap();

        let mut reloaded = Config::for_root(&root);
        reloaded.merge_file().unwrap();
        assert_eq!(reloaded.default_version.as_deref(), Some("1.3.0"));
        assert_eq!(reloaded.max_redirects, 3);
    }

    #[test]
    fn test_partial_config_file_keeps_defaults() {
        let temp = TempDir::new().unwrap();
        let mut config = Config::for_root(temp.path());
        std::fs::write(&config.config_file, "default_version = \"1.1.0\"\n").unwrap();

        config.merge_file().unwrap();
        assert_eq!(config.default_version.as_deref(), Some("1.1.0"));
        assert_eq!(config.releases_url, DEFAULT_RELEASES_URL);
    }

    #[test]
    fn test_missing_config_file_does_not_create_root() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("absent");
        let mut config = Config::for_root(&root);
        config.merge_file().unwrap();
        assert!(!root.exists());
    }
}
