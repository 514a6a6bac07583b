use crate::config::Config;
use crate::error::{Result, YvmError};
use crate::models::Version;
use std::path::{Path, PathBuf};

/// Separator between entries of `PATH`
#[cfg(unix)]
pub const PATH_SEPARATOR: &str = ":";
#[cfg(windows)]
pub const PATH_SEPARATOR: &str = ";";

/// Separator between entries of fish's `fish_user_paths`
pub const FISH_PATH_SEPARATOR: &str = " ";

/// Read-only view of the versions installed under the install root
pub struct VersionManager {
    config: Config,
}

impl VersionManager {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Installed versions, ascending. Entries that are not canonical version
    /// directories (stray files, in-flight extractions) are skipped.
    pub fn list_installed(&self) -> Result<Vec<Version>> {
        let mut installed = Vec::new();

        if !self.config.versions_dir.is_dir() {
            return Ok(installed);
        }

        for entry in std::fs::read_dir(&self.config.versions_dir)? {
            let entry = entry?;
            if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            if let Some(version) = entry.file_name().to_str().and_then(Version::from_dir_name) {
                installed.push(version);
            }
        }

        installed.sort();
        Ok(installed)
    }

    pub fn is_installed(&self, version: &Version) -> bool {
        self.config.get_version_dir(version).is_dir()
    }

    /// Version whose `bin` directory appears first on `path_var`. A version
    /// that is referenced but not installed is reported as `None`.
    pub fn current_version(&self, path_var: &str) -> Option<Version> {
        let version = path_var
            .split(PATH_SEPARATOR)
            .find_map(|entry| self.version_in_entry(Path::new(entry)))?;

        self.is_installed(&version).then_some(version)
    }

    /// Current version from the process environment
    pub fn current_from_env(&self) -> Option<Version> {
        let path = std::env::var("PATH").unwrap_or_default();
        self.current_version(&path)
    }

    /// Configured default, if any and if it names a valid version
    pub fn default_version(&self) -> Option<Version> {
        self.config
            .default_version
            .as_deref()
            .and_then(|v| v.parse().ok())
    }

    /// Persist `version` as the default. It must be installed.
    pub fn set_default(&mut self, version: &Version) -> Result<()> {
        if !self.is_installed(version) {
            return Err(YvmError::VersionNotInstalled(version.to_string()));
        }
        self.config.default_version = Some(version.to_string());
        self.config.save()
    }

    pub fn bin_dir(&self, version: &Version) -> PathBuf {
        self.config.get_version_dir(version).join("bin")
    }

    /// Rewrite a path list so `version` is active: the first entry under the
    /// versions directory is replaced, otherwise the new entry is prepended.
    pub fn activation_path(&self, version: &Version, path_var: &str, separator: &str) -> String {
        let new_entry = self.bin_dir(version).display().to_string();
        let mut entries: Vec<String> = path_var
            .split(separator)
            .filter(|entry| !entry.is_empty())
            .map(str::to_string)
            .collect();

        match entries
            .iter()
            .position(|entry| Path::new(entry).starts_with(&self.config.versions_dir))
        {
            Some(index) => entries[index] = new_entry,
            None => entries.insert(0, new_entry),
        }

        entries.join(separator)
    }

    fn version_in_entry(&self, entry: &Path) -> Option<Version> {
        let relative = entry.strip_prefix(&self.config.versions_dir).ok()?;
        let first = relative.components().next()?;
        Version::from_dir_name(first.as_os_str().to_str()?)
    }
}
