use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use tracing::{debug, info};

use crate::error::UploadError;

pub const DEFAULT_IMAGE_PATH: &str = "./";
pub const DEFAULT_OS_IMAGE_NAME: &str = "overcloud-full.qcow2";
pub const DEFAULT_IPA_NAME: &str = "ironic-python-agent";
pub const DEFAULT_HTTP_BOOT: &str = "/var/lib/ironic/httpboot";
pub const DEFAULT_BUILD_OUTPUT_DIRECTORY: &str = ".";
pub const DEFAULT_BUILD_CONFIG_FILES: [&str; 2] = [
    "/usr/share/openstack-tripleo-common/image-yaml/overcloud-images.yaml",
    "/usr/share/openstack-tripleo-common/image-yaml/overcloud-images-centos7.yaml",
];

/// Restricts an upload to one half of the image set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageType {
    /// Overcloud OS image (kernel, ramdisk and disk, or a whole-disk image).
    Os,
    /// Boot-agent kernel and ramdisk only.
    IronicPythonAgent,
}

impl FromStr for ImageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "os" => Ok(ImageType::Os),
            "ironic-python-agent" => Ok(ImageType::IronicPythonAgent),
            other => Err(format!(
                "unknown image type {other:?}, expected \"os\" or \"ironic-python-agent\""
            )),
        }
    }
}

impl fmt::Display for ImageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageType::Os => f.write_str("os"),
            ImageType::IronicPythonAgent => f.write_str("ironic-python-agent"),
        }
    }
}

/// Everything `image upload` needs, resolved once at the CLI boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadConfig {
    pub image_path: PathBuf,
    /// File name of the OS image, e.g. `overcloud-full.qcow2`.
    pub os_image_name: String,
    /// Base file name of the boot-agent kernel/initramfs.
    pub ipa_name: String,
    /// Every directory the boot-agent files are copied into.
    pub http_boot: Vec<PathBuf>,
    pub whole_disk: bool,
    pub update_existing: bool,
    pub architecture: Option<String>,
    pub platform: Option<String>,
    /// `None` uploads both halves.
    pub image_type: Option<ImageType>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        UploadConfig {
            image_path: PathBuf::from(DEFAULT_IMAGE_PATH),
            os_image_name: DEFAULT_OS_IMAGE_NAME.to_owned(),
            ipa_name: DEFAULT_IPA_NAME.to_owned(),
            http_boot: vec![PathBuf::from(DEFAULT_HTTP_BOOT)],
            whole_disk: false,
            update_existing: false,
            architecture: None,
            platform: None,
            image_type: None,
        }
    }
}

impl UploadConfig {
    /// Rejects combinations that cannot be named unambiguously.
    pub fn validate(&self) -> Result<(), UploadError> {
        if self.platform.is_some() && self.architecture.is_none() {
            return Err(UploadError::Configuration(
                "a platform can only be specified together with an architecture".to_owned(),
            ));
        }
        if self.http_boot.is_empty() {
            return Err(UploadError::Configuration(
                "at least one http-boot directory is required".to_owned(),
            ));
        }
        Ok(())
    }

    pub fn uploads_os(&self) -> bool {
        matches!(self.image_type, None | Some(ImageType::Os))
    }

    pub fn uploads_agent(&self) -> bool {
        matches!(self.image_type, None | Some(ImageType::IronicPythonAgent))
    }

    pub fn trace_loaded(&self) {
        info!(
            image_path = %self.image_path.display(),
            os_image_name = %self.os_image_name,
            whole_disk = self.whole_disk,
            update_existing = self.update_existing,
            architecture = self.architecture.as_deref().unwrap_or("<host>"),
            platform = self.platform.as_deref().unwrap_or("<none>"),
            "Loaded upload config"
        );
        debug!(?self, "Upload config loaded (full debug)");
    }
}

/// Everything `image build` needs.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildConfig {
    pub config_files: Vec<PathBuf>,
    pub output_directory: PathBuf,
    /// Skip images whose output file already exists.
    pub skip: bool,
    /// Only build these image names; `None` builds everything defined.
    pub images: Option<Vec<String>>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        BuildConfig {
            config_files: DEFAULT_BUILD_CONFIG_FILES.iter().map(PathBuf::from).collect(),
            output_directory: PathBuf::from(DEFAULT_BUILD_OUTPUT_DIRECTORY),
            skip: true,
            images: None,
        }
    }
}

impl BuildConfig {
    pub fn trace_loaded(&self) {
        info!(
            config_files = self.config_files.len(),
            output_directory = %self.output_directory.display(),
            skip = self.skip,
            "Loaded build config"
        );
        debug!(?self, "Build config loaded (full debug)");
    }
}
