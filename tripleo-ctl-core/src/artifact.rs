//! Artifacts: the logical images kept in sync with local files, and the
//! naming rules that let several architecture/platform variants live side by
//! side in one registry.

use std::fmt;
use std::path::{Path, PathBuf};

/// Container format for every uploaded artifact.
pub const CONTAINER_FORMAT: &str = "bare";
/// Visibility for every uploaded artifact.
pub const VISIBILITY: &str = "public";
/// Architecture that never gets a name prefix unless a platform is given.
pub const DEFAULT_ARCHITECTURE: &str = "x86_64";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    Kernel,
    Ramdisk,
    DiskImage,
}

impl ArtifactKind {
    pub fn disk_format(self) -> &'static str {
        match self {
            ArtifactKind::Kernel => "aki",
            ArtifactKind::Ramdisk => "ari",
            ArtifactKind::DiskImage => "qcow2",
        }
    }

    /// Suffix appended to the base name in the registry.
    fn name_suffix(self) -> &'static str {
        match self {
            ArtifactKind::Kernel => "-vmlinuz",
            ArtifactKind::Ramdisk => "-initrd",
            ArtifactKind::DiskImage => "",
        }
    }

    /// Extension of the local file produced by the image build.
    fn file_extension(self) -> &'static str {
        match self {
            ArtifactKind::Kernel => "vmlinuz",
            ArtifactKind::Ramdisk => "initrd",
            ArtifactKind::DiskImage => "qcow2",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ArtifactKind::Kernel => "kernel",
            ArtifactKind::Ramdisk => "ramdisk",
            ArtifactKind::DiskImage => "disk-image",
        };
        f.write_str(s)
    }
}

/// A named image that must match a local file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Registry name, already prefixed with platform/architecture if needed.
    pub name: String,
    pub local_path: PathBuf,
    pub kind: ArtifactKind,
    pub architecture: Option<String>,
    pub platform: Option<String>,
}

impl Artifact {
    /// Builds the artifact of `kind` for the OS image `base_name` found under
    /// `image_path`. `architecture` and `platform` only feed the name prefix.
    pub fn for_os_image(
        base_name: &str,
        image_path: &Path,
        kind: ArtifactKind,
        architecture: Option<&str>,
        platform: Option<&str>,
    ) -> Self {
        let logical = format!("{}{}", base_name, kind.name_suffix());
        let file = format!("{}.{}", base_name, kind.file_extension());
        Artifact {
            name: registry_name(&logical, architecture, platform),
            local_path: image_path.join(file),
            kind,
            architecture: architecture.map(str::to_owned),
            platform: platform.map(str::to_owned),
        }
    }
}

/// Strips the extension from an OS image file name: `overcloud-full.qcow2`
/// becomes `overcloud-full`.
pub fn base_image_name(os_image_name: &str) -> &str {
    os_image_name.split('.').next().unwrap_or(os_image_name)
}

/// Returns the architecture that should appear in registry names, if any.
///
/// The default architecture stays unprefixed so single-arch deployments keep
/// plain names; any platform forces the prefix.
pub fn naming_architecture<'a>(architecture: &'a str, platform: Option<&str>) -> Option<&'a str> {
    if architecture == DEFAULT_ARCHITECTURE && platform.is_none() {
        None
    } else {
        Some(architecture)
    }
}

/// `<platform>-<arch>-<name>`, `<arch>-<name>` or `<name>`.
pub fn registry_name(name: &str, architecture: Option<&str>, platform: Option<&str>) -> String {
    match (platform, architecture) {
        (Some(platform), Some(arch)) => format!("{platform}-{arch}-{name}"),
        (None, Some(arch)) => format!("{arch}-{name}"),
        _ => name.to_owned(),
    }
}

/// Architecture of the running kernel, spelled the way image metadata
/// expects it (`ppc64le` rather than Rust's `powerpc64`).
pub fn kernel_arch() -> String {
    match std::env::consts::ARCH {
        "powerpc64" if cfg!(target_endian = "little") => "ppc64le".to_owned(),
        "powerpc64" => "ppc64".to_owned(),
        other => other.to_owned(),
    }
}
