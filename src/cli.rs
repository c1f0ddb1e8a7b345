///
/// This module implements the CLI interface for tripleo-ctl: command parsing,
/// flag and environment resolution, and dispatch into the core workflows.
///
/// All business logic (reconciliation, boot-agent sync, image builds and the
/// undercloud deploy command) lives in the [`tripleo-ctl-core`] crate. This
/// module is CLI glue only.
///
/// ## Features
/// - Entry struct [`Cli`] defines all user-facing options and subcommands.
/// - Flags that are not given fall back to environment variables, including
///   deprecated names, and then to defaults.
/// - Async entrypoint ([`run`]) for programmatic invocation and integration tests.
///
/// ## Extending
/// When adding subcommands, update [`Commands`] and keep non-trivial logic in
/// `tripleo-ctl-core`.
///
/// [`tripleo-ctl-core`]: ../../tripleo-ctl-core/
use anyhow::Result;
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use tripleo_ctl_core::config::{
    BuildConfig, ImageType, UploadConfig, DEFAULT_BUILD_CONFIG_FILES, DEFAULT_HTTP_BOOT, DEFAULT_IMAGE_PATH,
    DEFAULT_IPA_NAME, DEFAULT_OS_IMAGE_NAME,
};
use tripleo_ctl_core::contract::ImageBuilder;
use tripleo_ctl_core::env::env_var;
use tripleo_ctl_core::image_build::DibImageBuilder;
use tripleo_ctl_core::process::SystemRunner;
use tripleo_ctl_core::synchronise::synchronise_images;
use tripleo_ctl_core::undercloud::{run_undercloud, DeployMode, DeployOptions};

use crate::glance::GlanceClient;
use crate::load_config::load_undercloud_config;

/// CLI for tripleo-ctl: overcloud images and undercloud lifecycle.
#[derive(Parser, Debug)]
#[clap(
    name = "tripleo-ctl",
    version,
    about = "Build and upload overcloud images, install or upgrade the undercloud"
)]
pub struct Cli {
    /// More log output (-v info, -vv debug, -vvv trace). RUST_LOG wins when set
    #[clap(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Overcloud image management
    #[clap(subcommand)]
    Image(ImageCommands),
    /// Undercloud lifecycle
    #[clap(subcommand)]
    Undercloud(UndercloudCommands),
}

#[derive(Subcommand, Debug)]
pub enum ImageCommands {
    /// Build overcloud images from YAML definitions
    Build(BuildArgs),
    /// Upload overcloud images and copy boot-agent files into place
    Upload(UploadArgs),
}

#[derive(Subcommand, Debug)]
pub enum UndercloudCommands {
    /// Install the undercloud
    Install(UndercloudArgs),
    /// Upgrade the undercloud
    Upgrade(UndercloudArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct BuildArgs {
    /// YAML file with image definitions; repeat to layer several files
    #[clap(long = "config-file")]
    pub config_files: Vec<PathBuf>,
    /// Only build this image; may be repeated
    #[clap(long = "image-name")]
    pub image_names: Vec<String>,
    /// Rebuild images whose output file already exists
    #[clap(long)]
    pub no_skip: bool,
    /// Directory the images are written to
    #[clap(long)]
    pub output_directory: Option<PathBuf>,
}

impl BuildArgs {
    pub fn into_config(self) -> BuildConfig {
        let defaults = BuildConfig::default();
        BuildConfig {
            config_files: if self.config_files.is_empty() {
                DEFAULT_BUILD_CONFIG_FILES.iter().map(PathBuf::from).collect()
            } else {
                self.config_files
            },
            output_directory: self.output_directory.unwrap_or(defaults.output_directory),
            skip: !self.no_skip,
            images: (!self.image_names.is_empty()).then_some(self.image_names),
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageTypeArg {
    Os,
    IronicPythonAgent,
}

impl From<ImageTypeArg> for ImageType {
    fn from(arg: ImageTypeArg) -> Self {
        match arg {
            ImageTypeArg::Os => ImageType::Os,
            ImageTypeArg::IronicPythonAgent => ImageType::IronicPythonAgent,
        }
    }
}

#[derive(Args, Debug, Clone, Default)]
pub struct UploadArgs {
    /// Directory containing the image files [env: IMAGE_PATH] [default: ./]
    #[clap(long)]
    pub image_path: Option<PathBuf>,
    /// OS image file name [env: OS_IMAGE_NAME] [default: overcloud-full.qcow2]
    #[clap(long)]
    pub os_image_name: Option<String>,
    /// Boot-agent base file name [env: IRONIC_PYTHON_AGENT_NAME] [default: ironic-python-agent]
    #[clap(long)]
    pub ironic_python_agent_name: Option<String>,
    /// HTTP-boot directory; may be repeated [env: HTTP_BOOT] [default: /var/lib/ironic/httpboot]
    #[clap(long)]
    pub http_boot: Vec<PathBuf>,
    /// Replace images that differ from the local files
    #[clap(long)]
    pub update_existing: bool,
    /// Upload a single whole-disk image instead of kernel, ramdisk and disk
    #[clap(long)]
    pub whole_disk: bool,
    /// Architecture of the images
    #[clap(long, alias = "arch")]
    pub architecture: Option<String>,
    /// Platform of the images; requires --architecture
    #[clap(long)]
    pub platform: Option<String>,
    /// Only upload one kind of image
    #[clap(long, value_enum)]
    pub image_type: Option<ImageTypeArg>,
}

impl UploadArgs {
    /// Applies the flag, environment and default precedence.
    pub fn into_config(self) -> UploadConfig {
        let http_boot = if self.http_boot.is_empty() {
            env_var("HTTP_BOOT", DEFAULT_HTTP_BOOT, &[])
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(PathBuf::from)
                .collect()
        } else {
            self.http_boot
        };
        UploadConfig {
            image_path: self
                .image_path
                .unwrap_or_else(|| PathBuf::from(env_var("IMAGE_PATH", DEFAULT_IMAGE_PATH, &[]))),
            os_image_name: self
                .os_image_name
                .unwrap_or_else(|| env_var("OS_IMAGE_NAME", DEFAULT_OS_IMAGE_NAME, &["OS_IMAGE"])),
            ipa_name: self.ironic_python_agent_name.unwrap_or_else(|| {
                env_var("IRONIC_PYTHON_AGENT_NAME", DEFAULT_IPA_NAME, &["AGENT_NAME"])
            }),
            http_boot,
            whole_disk: self.whole_disk,
            update_existing: self.update_existing,
            architecture: self.architecture,
            platform: self.platform,
            image_type: self.image_type.map(ImageType::from),
        }
    }
}

#[derive(Args, Debug, Clone, Default)]
pub struct UndercloudArgs {
    /// Deploy with the standalone heat installer instead of instack
    #[clap(long)]
    pub use_heat: bool,
    /// Skip the preflight validation of the settings
    #[clap(long)]
    pub no_validations: bool,
    /// Undercloud settings file [default: undercloud.yaml if present]
    #[clap(long)]
    pub config: Option<PathBuf>,
}

/// Installs the global tracing subscriber. `RUST_LOG` overrides `-v`.
pub fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    // Emit a top-level 'trace_initialised' event at the very start
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Image(ImageCommands::Build(args)) => {
            let config = args.into_config();
            tracing::info!(command = "image build", "Starting image build");
            let report = tokio::task::spawn_blocking(move || DibImageBuilder::new(&SystemRunner).build(&config))
                .await??;
            tracing::info!(command = "image build", built = ?report.built, skipped = ?report.skipped, "Image build complete");
            Ok(())
        }
        Commands::Image(ImageCommands::Upload(args)) => {
            let config = args.into_config();
            // Configuration errors must surface before any registry access.
            config.validate()?;
            tracing::info!(command = "image upload", "Starting image upload");
            let client = GlanceClient::new_from_env()?;
            match synchronise_images(&config, &client, &SystemRunner).await {
                Ok(report) => {
                    tracing::info!(command = "image upload", ?report, "Image upload complete");
                    Ok(())
                }
                Err(e) => {
                    tracing::error!(command = "image upload", error = %e, "Image upload failed");
                    Err(e.into())
                }
            }
        }
        Commands::Undercloud(cmd) => {
            let (mode, args) = match cmd {
                UndercloudCommands::Install(args) => (DeployMode::Install, args),
                UndercloudCommands::Upgrade(args) => (DeployMode::Upgrade, args),
            };
            let config = load_undercloud_config(args.config.as_deref())?;
            let options = DeployOptions {
                use_heat: args.use_heat,
                validations: !args.no_validations,
                debug: cli.verbose > 1,
                cwd: std::env::current_dir()?,
            };
            tracing::info!(command = "undercloud", ?mode, use_heat = options.use_heat, "Starting undercloud deployment");
            tokio::task::spawn_blocking(move || run_undercloud(mode, &config, &options, &SystemRunner)).await??;
            println!("Undercloud {} complete.", match mode {
                DeployMode::Install => "install",
                DeployMode::Upgrade => "upgrade",
            });
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn build_args_default_to_stock_definitions() {
        let config = BuildArgs::default().into_config();
        assert_eq!(config.config_files.len(), 2);
        assert!(config.skip);
        assert_eq!(config.output_directory, PathBuf::from("."));
        assert!(config.images.is_none());
    }

    #[test]
    fn build_args_are_parsed() {
        let cli = Cli::parse_from([
            "tripleo-ctl",
            "image",
            "build",
            "--config-file",
            "config1.yaml",
            "--config-file",
            "config2.yaml",
            "--no-skip",
            "--output-directory",
            "/tmp/abc",
        ]);
        let Commands::Image(ImageCommands::Build(args)) = cli.command else {
            panic!("expected image build");
        };
        let config = args.into_config();
        assert_eq!(config.config_files, vec![PathBuf::from("config1.yaml"), PathBuf::from("config2.yaml")]);
        assert!(!config.skip);
        assert_eq!(config.output_directory, PathBuf::from("/tmp/abc"));
    }

    #[test]
    #[serial]
    fn upload_flags_win_over_environment() {
        std::env::set_var("IMAGE_PATH", "/from/env");
        let cli = Cli::parse_from(["tripleo-ctl", "image", "upload", "--image-path", "/from/flag", "--arch", "ppc64le"]);
        let Commands::Image(ImageCommands::Upload(args)) = cli.command else {
            panic!("expected image upload");
        };
        let config = args.into_config();
        std::env::remove_var("IMAGE_PATH");
        assert_eq!(config.image_path, PathBuf::from("/from/flag"));
        assert_eq!(config.architecture.as_deref(), Some("ppc64le"));
    }

    #[test]
    #[serial]
    fn upload_falls_back_to_deprecated_environment() {
        for key in ["OS_IMAGE_NAME", "IRONIC_PYTHON_AGENT_NAME", "HTTP_BOOT", "IMAGE_PATH"] {
            std::env::remove_var(key);
        }
        std::env::set_var("OS_IMAGE", "custom.qcow2");
        std::env::set_var("AGENT_NAME", "agent");
        std::env::set_var("HTTP_BOOT", "/srv/a,/srv/b");

        let config = UploadArgs::default().into_config();

        for key in ["OS_IMAGE", "AGENT_NAME", "HTTP_BOOT"] {
            std::env::remove_var(key);
        }
        assert_eq!(config.os_image_name, "custom.qcow2");
        assert_eq!(config.ipa_name, "agent");
        assert_eq!(config.http_boot, vec![PathBuf::from("/srv/a"), PathBuf::from("/srv/b")]);
        assert_eq!(config.image_path, PathBuf::from("./"));
    }

    #[test]
    fn image_type_and_verbosity_parse() {
        let cli = Cli::parse_from(["tripleo-ctl", "-vv", "image", "upload", "--image-type", "ironic-python-agent"]);
        assert_eq!(cli.verbose, 2);
        let Commands::Image(ImageCommands::Upload(args)) = cli.command else {
            panic!("expected image upload");
        };
        assert_eq!(args.image_type, Some(ImageTypeArg::IronicPythonAgent));
    }

    #[test]
    fn undercloud_flags_parse() {
        let cli = Cli::parse_from(["tripleo-ctl", "undercloud", "upgrade", "--use-heat", "--no-validations"]);
        let Commands::Undercloud(UndercloudCommands::Upgrade(args)) = cli.command else {
            panic!("expected undercloud upgrade");
        };
        assert!(args.use_heat && args.no_validations);
        assert!(args.config.is_none());
    }
}
