use crate::config::home_dir;
use crate::error::{Result, YvmError};
use crate::models::Version;
use crate::utils::print_success;
use futures_util::future::join_all;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{error, info, warn};

/// Name of the variable the shell hooks read the install root from
pub const YVM_DIR_VAR: &str = "YVM_DIR";

pub const EXIT_CONFIGURED: i32 = 0;
pub const EXIT_NONE_CONFIGURED: i32 = 1;
pub const EXIT_INTERNAL_ERROR: i32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
}

impl Shell {
    pub const ALL: [Shell; 3] = [Shell::Bash, Shell::Zsh, Shell::Fish];

    pub fn detect() -> Option<Self> {
        let shell = std::env::var("SHELL").ok()?;
        if shell.contains("zsh") {
            Some(Shell::Zsh)
        } else if shell.contains("bash") {
            Some(Shell::Bash)
        } else if shell.contains("fish") {
            Some(Shell::Fish)
        } else {
            None
        }
    }

    /// Startup file this shell should be configured through, if one exists
    pub fn config_file(&self, home: &Path) -> Option<PathBuf> {
        let candidates: &[&str] = match self {
            Shell::Bash => &[".bashrc", ".bash_profile"],
            Shell::Zsh => &[".zshrc"],
            Shell::Fish => &[".config/fish/config.fish"],
        };

        candidates
            .iter()
            .map(|file| home.join(file))
            .find(|path| path.is_file())
    }

    /// Lines that must be present for sourcing the file to activate yvm
    pub fn managed_lines(&self, yvm_dir: &Path, pin: Option<&Version>) -> Vec<ManagedLine> {
        let dir = yvm_dir.display();
        let mut lines = match self {
            Shell::Bash | Shell::Zsh => vec![
                ManagedLine::keyed(
                    format!("export {YVM_DIR_VAR}="),
                    format!("export {YVM_DIR_VAR}={dir}"),
                ),
                ManagedLine::exact(format!(
                    "[ -r ${YVM_DIR_VAR}/yvm.sh ] && . ${YVM_DIR_VAR}/yvm.sh"
                )),
            ],
            Shell::Fish => vec![
                ManagedLine::keyed(
                    format!("set -x {YVM_DIR_VAR} "),
                    format!("set -x {YVM_DIR_VAR} {dir}"),
                ),
                ManagedLine::exact(format!(". ${YVM_DIR_VAR}/yvm.fish")),
            ],
        };

        if let Some(version) = pin {
            let bin = format!("${YVM_DIR_VAR}/versions/{}/bin", version.dir_name());
            lines.push(match self {
                Shell::Bash | Shell::Zsh => ManagedLine::keyed(
                    format!("export PATH=\"${YVM_DIR_VAR}/versions/"),
                    format!("export PATH=\"{bin}:$PATH\""),
                ),
                Shell::Fish => ManagedLine::keyed(
                    format!("set -x PATH ${YVM_DIR_VAR}/versions/"),
                    format!("set -x PATH {bin} $PATH"),
                ),
            });
        }

        lines
    }

    /// Snippet that installs `new_path` as the search path of the current session
    pub fn use_command(&self, new_path: &str) -> String {
        match self {
            Shell::Bash | Shell::Zsh => format!("export PATH=\"{}\"", new_path),
            Shell::Fish => format!("set -gx fish_user_paths {}", new_path),
        }
    }
}

impl fmt::Display for Shell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Shell::Bash => "bash",
            Shell::Zsh => "zsh",
            Shell::Fish => "fish",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for Shell {
    type Err = YvmError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "bash" => Ok(Shell::Bash),
            "zsh" => Ok(Shell::Zsh),
            "fish" => Ok(Shell::Fish),
            other => Err(YvmError::ConfigError(format!("Unsupported shell: {}", other))),
        }
    }
}

/// A line owned by yvm inside a shell startup file. Any line containing `key`
/// is considered an occurrence of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedLine {
    pub key: String,
    pub text: String,
}

impl ManagedLine {
    pub fn exact(text: String) -> Self {
        Self {
            key: text.clone(),
            text,
        }
    }

    pub fn keyed(key: String, text: String) -> Self {
        Self { key, text }
    }
}

/// Bring `contents` in line with `lines`: the first line containing a key is
/// replaced in place, later ones are dropped, missing lines are appended.
/// The file's line ending (`\r\n` or `\n`) is kept.
/// Returns the new contents and whether anything was appended.
pub fn apply_managed_lines(contents: &str, lines: &[ManagedLine]) -> (String, bool) {
    let eol = if contents.contains("\r\n") { "\r\n" } else { "\n" };
    let mut out: Vec<String> = if contents.is_empty() {
        Vec::new()
    } else {
        contents.split(eol).map(str::to_string).collect()
    };
    let mut missing = Vec::new();

    for line in lines {
        let mut found = false;
        out.retain_mut(|existing| {
            if !existing.contains(&line.key) {
                return true;
            }
            if found {
                return false;
            }
            found = true;
            existing.clone_from(&line.text);
            true
        });
        if !found {
            missing.push(line.text.as_str());
        }
    }

    let mut result = out.join(eol);
    if !missing.is_empty() {
        if !result.is_empty() && !result.ends_with('\n') {
            result.push_str(eol);
        }
        for line in &missing {
            result.push_str(line);
            result.push_str(eol);
        }
    }

    (result, !missing.is_empty())
}

/// Patch an existing config file. A missing file is left alone and reported
/// as `Ok(false)`.
pub fn ensure_config(config_file: &Path, lines: &[ManagedLine]) -> Result<bool> {
    if !config_file.is_file() {
        return Ok(false);
    }

    let contents = std::fs::read_to_string(config_file)?;
    let (updated, _) = apply_managed_lines(&contents, lines);
    if updated != contents {
        std::fs::write(config_file, updated)?;
    }
    Ok(true)
}

/// Startup files touched by one configure pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ShellReport {
    pub configured: Vec<PathBuf>,
    /// Files that exist but could not be updated
    pub failed: Vec<PathBuf>,
}

/// Patch the startup file of every shell in `shells` concurrently and wait for
/// all of them. A failure on one file never stops the others.
pub async fn configure_files(
    home: &Path,
    shells: &[Shell],
    install_dir: &Path,
    pin: Option<&Version>,
) -> ShellReport {
    let tasks = shells.iter().filter_map(|&shell| {
        let file = shell.config_file(home)?;
        let lines = shell.managed_lines(install_dir, pin);
        Some(async move {
            let outcome = tokio::task::spawn_blocking({
                let file = file.clone();
                move || ensure_config(&file, &lines)
            })
            .await
            .map_err(|e| YvmError::InternalError(e.to_string()))
            .and_then(|result| result);
            (shell, file, outcome)
        })
    });

    let mut report = ShellReport::default();
    for (shell, file, outcome) in join_all(tasks).await {
        match outcome {
            Ok(true) => report.configured.push(file),
            Ok(false) => {}
            Err(e) => {
                warn!("Failed to configure {} ({}): {}", shell, file.display(), e);
                report.failed.push(file);
            }
        }
    }
    report
}

#[derive(Debug, Clone, Default)]
pub struct ShellOptions {
    /// Only this shell; every supported shell when unset
    pub shell: Option<Shell>,
    pub home: Option<PathBuf>,
    pub install_dir: Option<PathBuf>,
    /// Also pin `PATH` to this installed version
    pub pin: Option<Version>,
}

/// Configure shell startup files, returning the process exit code:
/// 0 when at least one file was configured, 1 when none was, 2 on an
/// unexpected error.
pub async fn configure_shell(options: &ShellOptions) -> i32 {
    configure_shell_with(options, home_dir).await
}

async fn configure_shell_with<F>(options: &ShellOptions, home_lookup: F) -> i32
where
    F: FnOnce() -> Option<PathBuf>,
{
    match configure(options, home_lookup).await {
        Ok(configured) => {
            for file in &configured {
                info!("Configured '{}'", file.display());
                print_success(&format!("Configured '{}'", file.display()));
            }
            EXIT_CONFIGURED
        }
        Err(YvmError::NoShellConfigFound) => {
            warn!("Unable to configure any shell: no startup file found");
            EXIT_NONE_CONFIGURED
        }
        Err(e @ YvmError::ShellConfigNotWritten(_)) => {
            warn!("Unable to configure any shell: {}", e);
            EXIT_NONE_CONFIGURED
        }
        Err(e) => {
            error!("{}", e);
            info!("{:?}", e);
            EXIT_INTERNAL_ERROR
        }
    }
}

async fn configure<F>(options: &ShellOptions, home_lookup: F) -> Result<Vec<PathBuf>>
where
    F: FnOnce() -> Option<PathBuf>,
{
    let home = match &options.home {
        Some(home) => home.clone(),
        None => home_lookup().ok_or_else(|| {
            YvmError::InternalError("could not determine the home directory".to_string())
        })?,
    };
    let install_dir = options
        .install_dir
        .clone()
        .unwrap_or_else(|| home.join(".yvm"));

    let shells: Vec<Shell> = match options.shell {
        Some(shell) => vec![shell],
        None => Shell::ALL.to_vec(),
    };

    let report = configure_files(&home, &shells, &install_dir, options.pin.as_ref()).await;

    if report.configured.is_empty() {
        if report.failed.is_empty() {
            return Err(YvmError::NoShellConfigFound);
        }
        let failed: Vec<String> = report
            .failed
            .iter()
            .map(|f| f.display().to_string())
            .collect();
        return Err(YvmError::ShellConfigNotWritten(failed.join(", ")));
    }
    Ok(report.configured)
}
