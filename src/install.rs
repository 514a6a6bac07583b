use crate::api::ReleaseApi;
use crate::config::Config;
use crate::download::Downloader;
use crate::error::{Result, YvmError};
use crate::models::{InstallOutcome, Version, VersionSpecifier};
use crate::utils::format_size;
use colored::*;
use flate2::read::GzDecoder;
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::File;
use std::path::{Path, PathBuf};
use tar::Archive;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Directories created by one install attempt, newest last. Only the attempt
/// that produced the list may roll it back.
#[derive(Debug, Default)]
#[must_use]
pub struct CreatedDirs {
    dirs: Vec<PathBuf>,
}

impl CreatedDirs {
    /// `create_dir_all`, recording every component that did not exist before
    pub fn create(&mut self, path: &Path) -> Result<()> {
        let mut missing = Vec::new();
        let mut cursor = Some(path);
        while let Some(dir) = cursor {
            if dir.exists() {
                break;
            }
            missing.push(dir.to_path_buf());
            cursor = dir.parent();
        }

        std::fs::create_dir_all(path)?;
        self.dirs.extend(missing.into_iter().rev());
        Ok(())
    }

    /// Record a directory that came into existence some other way (a rename)
    pub fn record(&mut self, path: &Path) {
        self.dirs.push(path.to_path_buf());
    }

    #[cfg(test)]
    pub fn paths(&self) -> &[PathBuf] {
        &self.dirs
    }

    /// Remove the recorded directories, newest first
    pub fn rollback(self) {
        for dir in self.dirs.iter().rev() {
            match std::fs::remove_dir_all(dir) {
                Ok(()) => debug!("rolled back {}", dir.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("could not roll back {}: {}", dir.display(), e),
            }
        }
    }
}

pub struct Installer {
    config: Config,
    downloader: Downloader,
}

impl Installer {
    pub fn new(config: Config, downloader: Downloader) -> Self {
        Self { config, downloader }
    }

    /// Resolve, download and unpack a Yarn version
    pub async fn install_version(
        &self,
        specifier: &VersionSpecifier,
        cancel: &CancellationToken,
    ) -> Result<InstallOutcome> {
        let (version, url) = match specifier {
            VersionSpecifier::Exact(version) => {
                if let Some(outcome) = self.already_installed(version) {
                    return Ok(outcome);
                }
                (version.clone(), self.config.download_url(version))
            }
            VersionSpecifier::Latest | VersionSpecifier::Pattern(_) => {
                let api = ReleaseApi::new(
                    self.downloader.clone(),
                    &self.config.latest_release_url,
                    &self.config.releases_url,
                );
                let release = match specifier {
                    VersionSpecifier::Pattern(pattern) => api.find(pattern, cancel).await?,
                    _ => api.latest(cancel).await?,
                };
                let version: Version = release.tag_name.parse()?;
                if let Some(outcome) = self.already_installed(&version) {
                    return Ok(outcome);
                }
                (version, release.download_url)
            }
        };

        println!(
            "{} Yarn {} in {}",
            "Installing".green().bold(),
            version.to_string().cyan(),
            self.config.yvm_dir.display().to_string().dimmed()
        );

        let mut created = CreatedDirs::default();
        if let Err(e) = created.create(&self.config.versions_dir) {
            created.rollback();
            return Err(e);
        }

        let archive_path = self.archive_path(&version, &url);
        let bytes = match self.downloader.fetch_to_file(&url, &archive_path, cancel).await {
            Ok(bytes) => bytes,
            Err(e) => {
                created.rollback();
                return Err(e);
            }
        };
        info!("finished downloading Yarn {} ({})", version, format_size(bytes));

        self.install_archive_with(&version, &archive_path, created)
            .await
    }

    /// Unpack an already downloaded archive into its canonical version directory
    #[cfg(test)]
    pub async fn install_archive(
        &self,
        version: &Version,
        archive_path: &Path,
    ) -> Result<InstallOutcome> {
        if let Some(outcome) = self.already_installed(version) {
            return Ok(outcome);
        }

        let mut created = CreatedDirs::default();
        if let Err(e) = created.create(&self.config.versions_dir) {
            created.rollback();
            return Err(e);
        }
        self.install_archive_with(version, archive_path, created).await
    }

    /// Unpack on the blocking pool
    async fn install_archive_with(
        &self,
        version: &Version,
        archive_path: &Path,
        created: CreatedDirs,
    ) -> Result<InstallOutcome> {
        let versions_dir = self.config.versions_dir.clone();
        let target = self.config.get_version_dir(version);
        let version = version.clone();
        let archive_path = archive_path.to_path_buf();

        tokio::task::spawn_blocking(move || {
            unpack_archive(&versions_dir, &target, &version, &archive_path, created)
        })
        .await
        .map_err(|e| YvmError::InternalError(e.to_string()))?
    }

    /// Uninstall a Yarn version
    pub fn remove(&self, version: &Version) -> Result<PathBuf> {
        let version_dir = self.config.get_version_dir(version);

        if !version_dir.is_dir() {
            return Err(YvmError::VersionNotInstalled(version.to_string()));
        }

        std::fs::remove_dir_all(&version_dir)?;
        Ok(version_dir)
    }

    fn already_installed(&self, version: &Version) -> Option<InstallOutcome> {
        let path = self.config.get_version_dir(version);
        path.is_dir().then(|| InstallOutcome::AlreadyInstalled {
            version: version.clone(),
            path,
        })
    }

    fn archive_path(&self, version: &Version, url: &str) -> PathBuf {
        let extension = if url.ends_with(".zip") { "zip" } else { "tar.gz" };
        self.config
            .versions_dir
            .join(format!("{}.{}", version.dir_name(), extension))
    }
}

/// Extract `archive_path` through a staging directory into `target`. On
/// success the archive is deleted; on failure the archive is deleted too and
/// every directory in `created` is rolled back.
fn unpack_archive(
    versions_dir: &Path,
    target: &Path,
    version: &Version,
    archive_path: &Path,
    mut created: CreatedDirs,
) -> Result<InstallOutcome> {
    let staging = versions_dir.join(format!(".extracting-{}", version.dir_name()));

    match extract_into_place(archive_path, &staging, target, &mut created) {
        Ok(()) => {
            if let Err(e) = std::fs::remove_file(archive_path) {
                warn!("could not remove archive {}: {}", archive_path.display(), e);
            }
            info!("finished extracting Yarn {}", version);
            Ok(InstallOutcome::Installed {
                version: version.clone(),
                path: target.to_path_buf(),
            })
        }
        Err(e) => {
            // The archive is never kept after a failed extraction
            if let Err(rm) = std::fs::remove_file(archive_path) {
                debug!("could not remove archive {}: {}", archive_path.display(), rm);
            }
            created.rollback();
            Err(match e {
                YvmError::ExtractionFailed(_) => e,
                other => YvmError::ExtractionFailed(other.to_string()),
            })
        }
    }
}

fn extract_into_place(
    archive_path: &Path,
    staging: &Path,
    target: &Path,
    created: &mut CreatedDirs,
) -> Result<()> {
    if staging.exists() {
        std::fs::remove_dir_all(staging)?;
    }
    created.create(staging)?;

    extract_archive(archive_path, staging)?;

    // A single top-level directory (`yarn-v1.2.0`) is the version's
    // contents; anything else is taken as-is.
    let entries: Vec<_> = std::fs::read_dir(staging)?
        .filter_map(|e| e.ok())
        .collect();

    if entries.len() == 1 && entries[0].path().is_dir() {
        std::fs::rename(entries[0].path(), target)?;
        created.record(target);
        std::fs::remove_dir_all(staging)?;
    } else {
        std::fs::rename(staging, target)?;
        created.record(target);
    }
    Ok(())
}

/// Extract archive based on file type
pub fn extract_archive(archive_path: &Path, dest_dir: &Path) -> Result<()> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .map_err(|e| YvmError::InternalError(e.to_string()))?,
    );
    pb.set_message("Extracting...");

    let file_name = archive_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("");

    if file_name.ends_with(".tar.gz") || file_name.ends_with(".tgz") {
        extract_tar_gz(archive_path, dest_dir)?;
    } else if file_name.ends_with(".zip") {
        extract_zip(archive_path, dest_dir)?;
    } else {
        pb.finish_and_clear();
        return Err(YvmError::ExtractionFailed(format!(
            "Unsupported archive format: {}",
            archive_path.display()
        )));
    }

    pb.finish_with_message("Extraction complete");
    Ok(())
}

fn extract_tar_gz(archive_path: &Path, dest_dir: &Path) -> Result<()> {
    let tar_gz = File::open(archive_path)?;
    let mut archive = Archive::new(GzDecoder::new(tar_gz));
    archive.set_preserve_permissions(true);

    archive
        .unpack(dest_dir)
        .map_err(|e| YvmError::ExtractionFailed(format!("{}: {}", archive_path.display(), e)))
}

/// Extract a zip archive, overwriting files that already exist
pub fn extract_zip(archive_path: &Path, dest_dir: &Path) -> Result<()> {
    let file = File::open(archive_path)?;
    let mut archive =
        zip::ZipArchive::new(file).map_err(|e| YvmError::ExtractionFailed(e.to_string()))?;

    for i in 0..archive.len() {
        let mut file = archive
            .by_index(i)
            .map_err(|e| YvmError::ExtractionFailed(e.to_string()))?;

        let outpath = match file.enclosed_name() {
            Some(path) => dest_dir.join(path),
            None => continue,
        };

        if file.is_dir() {
            std::fs::create_dir_all(&outpath)?;
        } else {
            if let Some(p) = outpath.parent() {
                std::fs::create_dir_all(p)?;
            }
            let mut outfile = File::create(&outpath)?;
            std::io::copy(&mut file, &mut outfile)?;
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = file.unix_mode() {
                std::fs::set_permissions(&outpath, std::fs::Permissions::from_mode(mode))?;
            }
        }
    }

    Ok(())
}
