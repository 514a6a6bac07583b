use crate::models::Version;
use colored::*;

pub const VERSION_IN_USE_SYMBOL: &str = "→";
pub const VERSION_INSTALLED_SYMBOL: &str = "✓";
pub const DEFAULT_VERSION_TEXT: &str = "(default)";

pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

pub fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

pub fn confirm(prompt: &str) -> bool {
    use dialoguer::Confirm;

    Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()
        .unwrap_or(false)
}

/// Which entries of a version listing get highlighted
#[derive(Debug, Default, Clone, Copy)]
pub struct VersionMarkers<'a> {
    pub in_use: Option<&'a Version>,
    pub default: Option<&'a Version>,
    pub installed: &'a [Version],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VersionState {
    InUse,
    Installed,
    Available,
}

impl<'a> VersionMarkers<'a> {
    fn state(&self, version: &Version) -> VersionState {
        if self.in_use == Some(version) {
            VersionState::InUse
        } else if self.installed.contains(version) {
            VersionState::Installed
        } else {
            VersionState::Available
        }
    }

    /// Plain-text line for `version`, without colors
    pub fn render(&self, version: &Version) -> String {
        let symbol = match self.state(version) {
            VersionState::InUse => VERSION_IN_USE_SYMBOL,
            VersionState::Installed => VERSION_INSTALLED_SYMBOL,
            VersionState::Available => " ",
        };

        let mut line = format!("{} {}", symbol, version);
        if self.default == Some(version) {
            line.push(' ');
            line.push_str(DEFAULT_VERSION_TEXT);
        }
        line
    }
}

/// Print `versions` in ascending order under a heading, highlighting the
/// version in use, the default and the installed ones. Returns the rendered
/// lines in print order.
pub fn print_versions(heading: &str, versions: &[Version], markers: &VersionMarkers) -> Vec<String> {
    let mut sorted = versions.to_vec();
    sorted.sort();
    sorted.dedup();

    println!("{}", heading.green().bold());

    sorted
        .iter()
        .map(|version| {
            let line = markers.render(version);
            let painted = match markers.state(version) {
                VersionState::InUse => line.green().bold(),
                VersionState::Installed => line.cyan(),
                VersionState::Available => line.normal(),
            };
            println!("  {}", painted);
            line
        })
        .collect()
}
