use crate::error::YvmError;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Tag accepted in place of a version to mean "most recent release".
pub const LATEST_TAG: &str = "latest";

/// Yarn release version (`MAJOR.MINOR.PATCH[-PRE]`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub pre: Option<String>,
}

impl Version {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            pre: None,
        }
    }

    /// Name of the canonical directory this version lives in (`v1.2.0`)
    pub fn dir_name(&self) -> String {
        format!("v{}", self)
    }

    /// Parse a canonical version directory name. Anything else yields `None`.
    pub fn from_dir_name(name: &str) -> Option<Self> {
        name.strip_prefix('v')?.parse().ok()
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(pre) = &self.pre {
            write!(f, "-{}", pre)?;
        }
        Ok(())
    }
}

impl FromStr for Version {
    type Err = YvmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || YvmError::InvalidVersion(s.to_string());
        let trimmed = s.trim();
        let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);

        let (core, pre) = match trimmed.split_once('-') {
            Some((core, pre)) if !pre.is_empty() => (core, Some(pre.to_string())),
            Some(_) => return Err(invalid()),
            None => (trimmed, None),
        };

        let mut parts = core.split('.');
        let mut next = || -> Result<u64, YvmError> {
            let part = parts.next().ok_or_else(invalid)?;
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid());
            }
            part.parse::<u64>().map_err(|_| invalid())
        };

        let major = next()?;
        let minor = next()?;
        let patch = next()?;
        if parts.next().is_some() {
            return Err(invalid());
        }

        let mut version = Version::new(major, minor, patch);
        version.pre = pre;
        Ok(version)
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch)
            .cmp(&(other.major, other.minor, other.patch))
            .then_with(|| match (&self.pre, &other.pre) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(a), Some(b)) => a.cmp(b),
            })
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// What the user asked to install
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionSpecifier {
    Latest,
    Exact(Version),
    /// Partial version or regular expression matched against release tags
    Pattern(String),
}

impl FromStr for VersionSpecifier {
    type Err = YvmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(YvmError::InvalidVersion(s.to_string()));
        }
        if trimmed == LATEST_TAG {
            return Ok(VersionSpecifier::Latest);
        }
        match trimmed.parse::<Version>() {
            Ok(version) => Ok(VersionSpecifier::Exact(version)),
            Err(_) => Ok(VersionSpecifier::Pattern(trimmed.to_string())),
        }
    }
}

impl fmt::Display for VersionSpecifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionSpecifier::Latest => write!(f, "{}", LATEST_TAG),
            VersionSpecifier::Exact(version) => write!(f, "{}", version),
            VersionSpecifier::Pattern(pattern) => write!(f, "{}", pattern),
        }
    }
}

/// One resolved entry of a remote release index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseDescriptor {
    pub tag_name: String,
    pub download_url: String,
}

/// Result of an install attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    Installed { version: Version, path: PathBuf },
    AlreadyInstalled { version: Version, path: PathBuf },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_parsing() {
        let v = "1.22.19".parse::<Version>().unwrap();
        assert_eq!(v, Version::new(1, 22, 19));

        let v = "v1.2.0".parse::<Version>().unwrap();
        assert_eq!(v, Version::new(1, 2, 0));

        let v = "2.0.0-rc.1".parse::<Version>().unwrap();
        assert_eq!(v.pre.as_deref(), Some("rc.1"));
        assert_eq!(v.to_string(), "2.0.0-rc.1");

        assert!("1.2".parse::<Version>().is_err());
        assert!("1.2.0.4".parse::<Version>().is_err());
        assert!("1.x.0".parse::<Version>().is_err());
        assert!("1.2.0-".parse::<Version>().is_err());
    }

    #[test]
    fn test_version_ordering() {
        let mut versions: Vec<Version> = ["1.10.0", "1.2.0", "1.9.4", "1.10.0-rc.1"]
            .iter()
            .map(|v| v.parse().unwrap())
            .collect();
        versions.sort();

        let sorted: Vec<String> = versions.iter().map(|v| v.to_string()).collect();
        assert_eq!(sorted, vec!["1.2.0", "1.9.4", "1.10.0-rc.1", "1.10.0"]);
    }

    #[test]
    fn test_dir_names() {
        assert_eq!(Version::new(1, 2, 0).dir_name(), "v1.2.0");
        assert_eq!(Version::from_dir_name("v1.2.0"), Some(Version::new(1, 2, 0)));
        assert_eq!(Version::from_dir_name("1.2.0"), None);
        assert_eq!(Version::from_dir_name("yarn-v1.2.0"), None);
        assert_eq!(Version::from_dir_name(".extracting-v1.2.0"), None);
    }

    #[test]
    fn test_specifier_parsing() {
        assert_eq!("latest".parse::<VersionSpecifier>().unwrap(), VersionSpecifier::Latest);
        assert_eq!(
            "1.2.0".parse::<VersionSpecifier>().unwrap(),
            VersionSpecifier::Exact(Version::new(1, 2, 0))
        );
        assert_eq!(
            "1.22".parse::<VersionSpecifier>().unwrap(),
            VersionSpecifier::Pattern("1.22".to_string())
        );
        assert!("  ".parse::<VersionSpecifier>().is_err());
    }
}
