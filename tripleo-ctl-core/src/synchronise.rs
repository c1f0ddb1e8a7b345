//! High-level pipeline: brings the registry and the HTTP-boot directories in
//! line with the images found under the configured image path.
//!
//! The pipeline:
//!   - Validates the configuration before touching anything
//!   - Enumerates the OS artifacts (kernel, ramdisk, disk image, or a single
//!     whole-disk image) with architecture/platform aware names
//!   - Reconciles them one at a time, kernel and ramdisk first so the disk
//!     image can reference their ids
//!   - Relinks a kept disk image to a replaced kernel/ramdisk when updating is
//!     allowed
//!   - Copies the boot-agent kernel/ramdisk into every HTTP-boot directory
//!   - Returns a report of what happened to each artifact
//!
//! # Error Handling
//! The first failure ends the run. Registry changes already made stay in
//! place; re-running is safe because unchanged artifacts are skipped.
//!
//! # Navigation
//! - Main entrypoint: [`synchronise_images`]
//! - Supporting types: [`UploadReport`], [`ImageReport`].

use tracing::{error, info};

use crate::artifact::{base_image_name, kernel_arch, naming_architecture, Artifact, ArtifactKind};
use crate::boot::{agent_sources, check_file_exists, file_create_or_update, BootFileReport, AGENT_KERNEL, AGENT_RAMDISK};
use crate::config::UploadConfig;
use crate::contract::{CommandRunner, EntryProperties, EntryUpdate, RegistryClient, RegistryEntry};
use crate::error::UploadError;
use crate::reconcile::{Outcome, Reconciled, Reconciler, RunResult};

#[derive(Debug, Clone, PartialEq)]
pub struct UploadReport {
    pub images: Vec<ImageReport>,
    pub boot_files: Vec<BootFileReport>,
    /// Ids of registry entries archived during this run.
    pub updated: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageReport {
    pub name: String,
    pub kind: ArtifactKind,
    pub id: String,
    pub outcome: Outcome,
}

impl ImageReport {
    fn new(artifact: &Artifact, reconciled: &Reconciled) -> Self {
        ImageReport {
            name: artifact.name.clone(),
            kind: artifact.kind,
            id: reconciled.entry.id.clone(),
            outcome: reconciled.outcome.clone(),
        }
    }
}

pub async fn synchronise_images<C, R>(
    config: &UploadConfig,
    client: &C,
    runner: &R,
) -> Result<UploadReport, UploadError>
where
    C: RegistryClient + ?Sized,
    R: CommandRunner + ?Sized,
{
    info!("[UPLOAD] Starting image upload");
    config.validate()?;
    config.trace_loaded();

    let platform = config.platform.as_deref();
    // Only an explicit architecture shows up in names; the host's is metadata.
    let name_arch = config
        .architecture
        .as_deref()
        .and_then(|arch| naming_architecture(arch, platform));
    let properties = EntryProperties {
        hw_architecture: Some(config.architecture.clone().unwrap_or_else(kernel_arch)),
        tripleo_platform: platform.map(str::to_owned),
        ..EntryProperties::default()
    };

    let reconciler = Reconciler::new(client, config.update_existing);
    let mut run = RunResult::new();
    let mut images = Vec::new();

    if config.uploads_os() {
        let base = base_image_name(&config.os_image_name);
        let disk = Artifact::for_os_image(base, &config.image_path, ArtifactKind::DiskImage, name_arch, platform);
        check_file_exists(&disk.local_path)?;

        if config.whole_disk {
            info!(image = %disk.name, "[UPLOAD] Reconciling whole-disk image");
            let reconciled = reconciler.reconcile(&disk, &properties, &mut run).await?;
            images.push(ImageReport::new(&disk, &reconciled));
        } else {
            let kernel = Artifact::for_os_image(base, &config.image_path, ArtifactKind::Kernel, name_arch, platform);
            let ramdisk = Artifact::for_os_image(base, &config.image_path, ArtifactKind::Ramdisk, name_arch, platform);

            info!(image = %kernel.name, "[UPLOAD] Reconciling kernel");
            let kernel_entry = reconciler.reconcile(&kernel, &properties, &mut run).await?;
            images.push(ImageReport::new(&kernel, &kernel_entry));

            info!(image = %ramdisk.name, "[UPLOAD] Reconciling ramdisk");
            let ramdisk_entry = reconciler.reconcile(&ramdisk, &properties, &mut run).await?;
            images.push(ImageReport::new(&ramdisk, &ramdisk_entry));

            let disk_properties = EntryProperties {
                kernel_id: Some(kernel_entry.entry.id.clone()),
                ramdisk_id: Some(ramdisk_entry.entry.id.clone()),
                ..properties.clone()
            };
            info!(image = %disk.name, "[UPLOAD] Reconciling disk image");
            let mut disk_entry = reconciler.reconcile(&disk, &disk_properties, &mut run).await?;
            if !links_current(&disk_entry.entry, &kernel_entry.entry, &ramdisk_entry.entry) {
                if config.update_existing {
                    info!(
                        image = %disk.name,
                        id = %disk_entry.entry.id,
                        kernel_id = %kernel_entry.entry.id,
                        ramdisk_id = %ramdisk_entry.entry.id,
                        "[UPLOAD] Relinking disk image to the current kernel and ramdisk"
                    );
                    let links = EntryProperties {
                        kernel_id: Some(kernel_entry.entry.id.clone()),
                        ramdisk_id: Some(ramdisk_entry.entry.id.clone()),
                        ..EntryProperties::default()
                    };
                    disk_entry.entry = client
                        .update(&disk_entry.entry.id, EntryUpdate::properties(links))
                        .await?;
                } else {
                    error!(
                        image = %disk.name,
                        kernel_id = ?disk_entry.entry.properties.kernel_id,
                        ramdisk_id = ?disk_entry.entry.properties.ramdisk_id,
                        current_kernel = %kernel_entry.entry.id,
                        current_ramdisk = %ramdisk_entry.entry.id,
                        "Link of the disk image to its kernel and ramdisk is missing or leads to an old image. Re-run with --update-existing or fix it manually."
                    );
                }
            }
            images.push(ImageReport::new(&disk, &disk_entry));
        }
    }

    let mut boot_files = Vec::new();
    if config.uploads_agent() {
        let (kernel_src, ramdisk_src) = agent_sources(&config.image_path, &config.ipa_name);
        check_file_exists(&ramdisk_src)?;
        check_file_exists(&kernel_src)?;

        for http_boot in &config.http_boot {
            info!(http_boot = %http_boot.display(), "[UPLOAD] Syncing boot-agent files");
            boot_files.push(file_create_or_update(
                runner,
                &kernel_src,
                &http_boot.join(AGENT_KERNEL),
                config.update_existing,
            )?);
            boot_files.push(file_create_or_update(
                runner,
                &ramdisk_src,
                &http_boot.join(AGENT_RAMDISK),
                config.update_existing,
            )?);
        }
    }

    if !run.is_empty() {
        println!(
            "{} images have been updated, make sure to reconfigure the nodes so they boot the new images",
            run.len()
        );
    }
    info!(images = images.len(), updated = run.len(), "[UPLOAD] Image upload complete");

    Ok(UploadReport {
        images,
        boot_files,
        updated: run.updated().to_vec(),
    })
}

/// Whether the disk image points at the current kernel and ramdisk. A kept
/// disk image keeps the ids of whatever kernel/ramdisk it was uploaded with.
fn links_current(disk: &RegistryEntry, kernel: &RegistryEntry, ramdisk: &RegistryEntry) -> bool {
    disk.properties.kernel_id.as_deref() == Some(kernel.id.as_str())
        && disk.properties.ramdisk_id.as_deref() == Some(ramdisk.id.as_str())
}
