use crate::api::ReleaseApi;
use crate::config::Config;
use crate::download::Downloader;
use crate::error::{Result, YvmError};
use crate::install::Installer;
use crate::models::{InstallOutcome, Version, VersionSpecifier};
use crate::self_install::SelfInstaller;
use crate::shell::{configure_shell, Shell, ShellOptions, EXIT_CONFIGURED};
use crate::utils::{
    confirm, print_info, print_success, print_versions, print_warning, VersionMarkers,
};
use crate::version_manager::{VersionManager, FISH_PATH_SEPARATOR, PATH_SEPARATOR};
use clap::{Parser, Subcommand};
use colored::*;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[cfg(windows)]
const YARN_BIN: &str = "yarn.cmd";
#[cfg(not(windows))]
const YARN_BIN: &str = "yarn";

#[derive(Parser)]
#[command(name = "yvm")]
#[command(about = "Yarn Version Manager", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Show diagnostic output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(skip)]
    config: Config,
}

#[derive(Subcommand)]
enum Commands {
    /// Install a Yarn version (e.g. 1.22.19, 1.22, latest)
    Install {
        version: String,
    },

    /// Remove an installed Yarn version
    Remove {
        version: String,

        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Run Yarn with a specific installed version
    Exec {
        version: String,

        /// Arguments passed through to yarn
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Show the path of the Yarn executable in use
    Which,

    /// List installed Yarn versions
    #[command(name = "ls", alias = "list")]
    Ls,

    /// List Yarn versions available for install
    LsRemote,

    /// Print the snippet that activates a version in the current shell
    Use {
        version: String,

        /// Shell syntax to emit (bash, zsh, fish)
        #[arg(short, long)]
        shell: Option<String>,
    },

    /// Show or set the default Yarn version
    Default {
        version: Option<String>,
    },

    /// Add yvm to shell startup files
    ConfigureShell {
        /// Only configure this shell (bash, zsh, fish)
        #[arg(short, long)]
        shell: Option<String>,

        /// Home directory holding the startup files
        #[arg(long)]
        home: Option<PathBuf>,

        /// yvm install directory referenced by the startup files
        #[arg(long)]
        install_dir: Option<PathBuf>,

        /// Also put this installed version on PATH
        #[arg(long)]
        pin: Option<String>,
    },

    /// Install or upgrade yvm itself
    SelfInstall,
}

impl Cli {
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub async fn run(self) -> Result<()> {
        match self.command {
            Commands::Install { ref version } => self.install(version).await,
            Commands::Remove { ref version, yes } => self.remove(version, yes),
            Commands::Exec { ref version, ref args } => self.exec(version, args),
            Commands::Which => self.which(),
            Commands::Ls => self.list(),
            Commands::LsRemote => self.list_remote().await,
            Commands::Use { ref version, ref shell } => self.use_version(version, shell.as_deref()),
            Commands::Default { ref version } => self.default(version.as_deref()),
            Commands::ConfigureShell {
                ref shell,
                ref home,
                ref install_dir,
                ref pin,
            } => {
                self.configure_shell(shell.as_deref(), home, install_dir, pin.as_deref())
                    .await
            }
            Commands::SelfInstall => self.self_install().await,
        }
    }

    fn downloader(&self) -> Result<Downloader> {
        Ok(Downloader::new()?.max_redirects(self.config.max_redirects))
    }

    /// Token cancelled on Ctrl-C or once the configured download timeout elapses
    fn cancellation_token(&self) -> CancellationToken {
        let token = CancellationToken::new();
        let watcher = token.clone();
        let timeout = self.config.download_timeout_secs;

        tokio::spawn(async move {
            let deadline = async {
                match timeout {
                    Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                _ = watcher.cancelled() => return,
                _ = tokio::signal::ctrl_c() => warn!("interrupted"),
                _ = deadline => warn!("gave up after {} seconds", timeout.unwrap_or_default()),
            }
            watcher.cancel();
        });

        token
    }

    async fn install(&self, version: &str) -> Result<()> {
        let specifier: VersionSpecifier = version.parse()?;
        let installer = Installer::new(self.config.clone(), self.downloader()?);
        let cancel = self.cancellation_token();

        let outcome = installer.install_version(&specifier, &cancel).await;
        cancel.cancel();

        match outcome? {
            InstallOutcome::Installed { version, path } => {
                print_success(&format!("Yarn {} installed successfully", version));
                println!("  Path: {}", path.display().to_string().dimmed());
                println!("\n{}", "Next steps:".yellow());
                println!("  yvm use {}        # Activate this version", version);
                println!("  yvm default {}    # Set as default", version);
            }
            InstallOutcome::AlreadyInstalled { version, path } => {
                print_info(&format!(
                    "Yarn {} is already installed in {}",
                    version,
                    path.display()
                ));
            }
        }

        Ok(())
    }

    fn remove(&self, version: &str, skip_confirm: bool) -> Result<()> {
        let version: Version = version.parse()?;
        let manager = VersionManager::new(self.config.clone());

        if manager.current_from_env().as_ref() == Some(&version) {
            print_warning(&format!("Yarn {} is currently in use", version));
            if !skip_confirm && !confirm(&format!("Remove Yarn {} anyway?", version)) {
                print_info("Removal cancelled");
                return Ok(());
            }
        }

        let installer = Installer::new(self.config.clone(), self.downloader()?);
        let path = installer.remove(&version)?;
        print_success(&format!("Removed Yarn {}", version));
        debug!("deleted {}", path.display());

        Ok(())
    }

    fn exec(&self, version: &str, args: &[String]) -> Result<()> {
        let version: Version = version.parse()?;
        let manager = VersionManager::new(self.config.clone());

        if !manager.is_installed(&version) {
            return Err(YvmError::VersionNotInstalled(version.to_string()));
        }

        let yarn = manager.bin_dir(&version).join(YARN_BIN);
        let path = std::env::var("PATH").unwrap_or_default();
        let path = manager.activation_path(&version, &path, PATH_SEPARATOR);
        info!("running {} with {:?}", yarn.display(), args);

        let status = std::process::Command::new(&yarn)
            .args(args)
            .env("PATH", path)
            .status()?;
        std::process::exit(status.code().unwrap_or(1));
    }

    fn which(&self) -> Result<()> {
        let manager = VersionManager::new(self.config.clone());

        match manager.current_from_env() {
            Some(version) => {
                println!("{}", manager.bin_dir(&version).join(YARN_BIN).display());
            }
            None => {
                print_warning("No yvm-managed Yarn version is in use");
                if let Some(default) = manager.default_version() {
                    println!("  Default: {}", default.to_string().cyan());
                }
                println!("\n{}", "Activate a version:".yellow());
                println!("  yvm use <version>");
            }
        }

        Ok(())
    }

    fn list(&self) -> Result<()> {
        let manager = VersionManager::new(self.config.clone());
        let installed = manager.list_installed()?;

        if installed.is_empty() {
            print_warning("No Yarn versions installed");
            println!("\n{}", "Install a version:".yellow());
            println!("  yvm install latest");
            return Ok(());
        }

        let in_use = manager.current_from_env();
        let default = manager.default_version();
        let markers = VersionMarkers {
            in_use: in_use.as_ref(),
            default: default.as_ref(),
            installed: &installed,
        };
        print_versions("Installed Yarn versions:", &installed, &markers);

        Ok(())
    }

    async fn list_remote(&self) -> Result<()> {
        let api = ReleaseApi::new(
            self.downloader()?,
            &self.config.latest_release_url,
            &self.config.releases_url,
        );
        let cancel = self.cancellation_token();

        print_info("Fetching available Yarn versions...");
        let tags = api.list_remote(&cancel).await;
        cancel.cancel();

        let available: Vec<Version> = tags?
            .iter()
            .filter_map(|tag| match tag.parse() {
                Ok(version) => Some(version),
                Err(_) => {
                    debug!("skipping unrecognised tag {}", tag);
                    None
                }
            })
            .collect();

        let manager = VersionManager::new(self.config.clone());
        let installed = manager.list_installed()?;
        let in_use = manager.current_from_env();
        let default = manager.default_version();
        let markers = VersionMarkers {
            in_use: in_use.as_ref(),
            default: default.as_ref(),
            installed: &installed,
        };
        print_versions("Available Yarn versions:", &available, &markers);

        Ok(())
    }

    /// Prints only the activation snippet on stdout so the output can be eval'd
    fn use_version(&self, version: &str, shell: Option<&str>) -> Result<()> {
        let version: Version = version.parse()?;
        let manager = VersionManager::new(self.config.clone());

        if !manager.is_installed(&version) {
            return Err(YvmError::VersionNotInstalled(version.to_string()));
        }

        let shell = match shell {
            Some(name) => name.parse()?,
            None => Shell::detect().unwrap_or(Shell::Bash),
        };

        let new_path = match shell {
            Shell::Fish => {
                let paths = std::env::var("FISH_USER_PATHS").unwrap_or_default();
                manager.activation_path(&version, &paths, FISH_PATH_SEPARATOR)
            }
            Shell::Bash | Shell::Zsh => {
                let path = std::env::var("PATH").unwrap_or_default();
                manager.activation_path(&version, &path, PATH_SEPARATOR)
            }
        };

        info!("activating Yarn {} for {}", version, shell);
        println!("{}", shell.use_command(&new_path));
        Ok(())
    }

    fn default(&self, version: Option<&str>) -> Result<()> {
        let mut manager = VersionManager::new(self.config.clone());

        match version {
            Some(version) => {
                let version: Version = version.parse()?;
                manager.set_default(&version)?;
                print_success(&format!("Default Yarn version set to {}", version));
            }
            None => match manager.default_version() {
                Some(default) => println!("{}", default),
                None => {
                    print_warning("No default Yarn version set");
                    println!("  yvm default <version>");
                }
            },
        }

        Ok(())
    }

    async fn configure_shell(
        &self,
        shell: Option<&str>,
        home: &Option<PathBuf>,
        install_dir: &Option<PathBuf>,
        pin: Option<&str>,
    ) -> Result<()> {
        let options = ShellOptions {
            shell: shell.map(str::parse).transpose()?,
            home: home.clone(),
            install_dir: install_dir
                .clone()
                .or_else(|| Some(self.config.yvm_dir.clone())),
            pin: pin.map(str::parse).transpose()?,
        };

        let code = configure_shell(&options).await;
        if code != EXIT_CONFIGURED {
            std::process::exit(code);
        }
        Ok(())
    }

    async fn self_install(&self) -> Result<()> {
        let installer = SelfInstaller::new(self.config.clone(), self.downloader()?);
        let cancel = self.cancellation_token();

        let report = installer.run(&cancel).await;
        cancel.cancel();
        let report = report?;
        debug!("entry script at {}", report.script.display());

        match &report.tag_name {
            Some(tag) => print_success(&format!(
                "yvm {} installed in {}",
                tag,
                self.config.yvm_dir.display()
            )),
            None => print_success(&format!(
                "yvm installed in {} from {}",
                self.config.yvm_dir.display(),
                self.config.local_artifact.display()
            )),
        }

        for file in &report.configured {
            println!("  Configured: {}", file.display().to_string().dimmed());
        }
        if report.configured.is_empty() {
            print_warning("No shell startup file was found to configure");
            println!("  yvm configure-shell");
        }
        println!("\n{}", "Open a new terminal to start using yvm".yellow());

        Ok(())
    }
}
