//! Boot-agent files: copied into HTTP-boot directories rather than uploaded.

use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::contract::CommandRunner;
use crate::detect::{self, Reference};
use crate::error::{DetectError, UploadError};
use crate::process::sudo_copy;

/// Name of the boot-agent kernel inside an HTTP-boot directory.
pub const AGENT_KERNEL: &str = "agent.kernel";
/// Name of the boot-agent ramdisk inside an HTTP-boot directory.
pub const AGENT_RAMDISK: &str = "agent.ramdisk";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOutcome {
    Copied,
    UpToDate,
    StaleKept,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootFileReport {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub outcome: FileOutcome,
}

/// Local source files of the boot agent: `(kernel, initramfs)`.
pub fn agent_sources(image_path: &Path, ipa_name: &str) -> (PathBuf, PathBuf) {
    (
        image_path.join(format!("{ipa_name}.kernel")),
        image_path.join(format!("{ipa_name}.initramfs")),
    )
}

/// Fails when a required local file is absent.
pub fn check_file_exists(path: &Path) -> Result<(), DetectError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(DetectError::MissingFile(path.to_path_buf()))
    }
}

/// Copies `src` over `dest` when `dest` is missing, or when it differs and
/// `update_existing` is set.
pub fn file_create_or_update<R: CommandRunner + ?Sized>(
    runner: &R,
    src: &Path,
    dest: &Path,
    update_existing: bool,
) -> Result<BootFileReport, UploadError> {
    let outcome = if dest.is_file() {
        if !detect::changed(src, Reference::File(dest))? {
            println!("Image file \"{}\" is up-to-date, skipping.", dest.display());
            info!(destination = %dest.display(), "Boot file up to date");
            FileOutcome::UpToDate
        } else if update_existing {
            runner.run(&sudo_copy(src, dest))?;
            FileOutcome::Copied
        } else {
            println!(
                "Image file \"{}\" already exists and can be updated with --update-existing.",
                dest.display()
            );
            warn!(destination = %dest.display(), "Boot file is stale, leaving it untouched");
            FileOutcome::StaleKept
        }
    } else {
        runner.run(&sudo_copy(src, dest))?;
        FileOutcome::Copied
    };

    Ok(BootFileReport {
        source: src.to_path_buf(),
        destination: dest.to_path_buf(),
        outcome,
    })
}
