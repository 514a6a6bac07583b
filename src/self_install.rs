use crate::api::ReleaseApi;
use crate::config::{home_dir, Config};
use crate::download::Downloader;
use crate::error::{Result, YvmError};
use crate::install::extract_zip;
use crate::models::ReleaseDescriptor;
use crate::shell::{configure_files, Shell};
use futures_util::future::join_all;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Files from a previous release that must not survive an upgrade
const STALE_FILES: &[&str] = &["yvm.sh", "yvm.js", "yvm.fish", "node_modules"];

#[derive(Serialize)]
struct VersionMarker<'a> {
    version: &'a str,
}

/// What a self-install left behind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelfInstallReport {
    pub tag_name: Option<String>,
    pub script: PathBuf,
    pub configured: Vec<PathBuf>,
}

/// Installs (or upgrades) the yvm scripts themselves into the install root
pub struct SelfInstaller {
    config: Config,
    downloader: Downloader,
    home: Option<PathBuf>,
}

impl SelfInstaller {
    pub fn new(config: Config, downloader: Downloader) -> Self {
        Self {
            config,
            downloader,
            home: None,
        }
    }

    /// Configure shell files under `home` instead of the user's home
    pub fn with_home<P: Into<PathBuf>>(mut self, home: P) -> Self {
        self.home = Some(home.into());
        self
    }

    pub async fn run(&self, cancel: &CancellationToken) -> Result<SelfInstallReport> {
        let root = &self.config.yvm_dir;
        tokio::fs::create_dir_all(root).await?;

        let (release, zip_path) = if self.config.use_local {
            (None, self.config.local_artifact.clone())
        } else {
            let release = self.resolve(cancel).await?;
            let zip_path = root.join("yvm.zip");
            self.downloader
                .fetch_to_file(&release.download_url, &zip_path, cancel)
                .await?;
            (Some(release), zip_path)
        };

        if let Some(release) = &release {
            info!("installing yvm {}", release.tag_name);
        }

        clean_root(root).await;

        let unpack_zip = zip_path.clone();
        let unpack_root = root.clone();
        tokio::task::spawn_blocking(move || extract_zip(&unpack_zip, &unpack_root))
            .await
            .map_err(|e| YvmError::InternalError(e.to_string()))??;

        let script = root.join("yvm.sh");
        let tag_name = release.as_ref().map(|r| r.tag_name.clone());

        let remove_zip = async {
            if !self.config.use_local {
                tokio::fs::remove_file(&zip_path).await?;
            }
            Ok::<_, YvmError>(())
        };
        let save_version = async {
            if let Some(tag) = &tag_name {
                self.save_version(tag).await?;
            }
            Ok::<_, YvmError>(())
        };
        let make_executable = ensure_executable(&script);
        let configure = self.configure_shells();

        let (removed, saved, executable, configured) =
            tokio::join!(remove_zip, save_version, make_executable, configure);
        removed?;
        saved?;
        executable?;

        Ok(SelfInstallReport {
            tag_name,
            script,
            configured,
        })
    }

    async fn resolve(&self, cancel: &CancellationToken) -> Result<ReleaseDescriptor> {
        let api = ReleaseApi::new(
            self.downloader.clone(),
            &self.config.self_latest_release_url,
            &self.config.self_releases_url,
        );

        match &self.config.install_version {
            Some(tag) => {
                info!("querying release API for version tag {}", tag);
                api.find(tag, cancel).await
            }
            None => {
                info!("querying release API for the latest version");
                api.latest(cancel).await
            }
        }
    }

    async fn save_version(&self, tag: &str) -> Result<()> {
        let marker = serde_json::to_string(&VersionMarker { version: tag })?;
        tokio::fs::write(self.config.version_marker(), marker).await?;
        Ok(())
    }

    /// Patch every shell file that exists. Failures are isolated per file.
    async fn configure_shells(&self) -> Vec<PathBuf> {
        let Some(home) = self.home.clone().or_else(home_dir) else {
            warn!("could not determine the home directory; shell files left untouched");
            return Vec::new();
        };

        configure_files(&home, &Shell::ALL, &self.config.yvm_dir, None)
            .await
            .configured
    }
}

/// Remove leftovers of a previous release concurrently; missing entries are fine
async fn clean_root(root: &Path) {
    let removals = STALE_FILES.iter().map(|name| {
        let path = root.join(name);
        async move {
            let result = match tokio::fs::symlink_metadata(&path).await {
                Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(&path).await,
                Ok(_) => tokio::fs::remove_file(&path).await,
                Err(_) => return,
            };
            match result {
                Ok(()) => debug!("removed {}", path.display()),
                Err(e) => warn!("could not remove {}: {}", path.display(), e),
            }
        }
    });

    join_all(removals).await;
}

#[cfg(unix)]
async fn ensure_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut permissions = tokio::fs::metadata(path).await?.permissions();
    permissions.set_mode(permissions.mode() | 0o111);
    tokio::fs::set_permissions(path, permissions).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn ensure_executable(_path: &Path) -> Result<()> {
    Ok(())
}
