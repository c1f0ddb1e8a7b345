//! Error taxonomy shared by the workflows in this crate.
//!
//! A registry lookup that finds nothing is not an error (see
//! [`crate::contract::RegistryClient::find_by_name`]). Everything here is fatal
//! for the current run: nothing is retried and nothing already applied is
//! rolled back.

use std::path::PathBuf;
use thiserror::Error;

/// Failures talking to the image registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("image \"{name}\" already exists in the registry more than once, delete all except one and try again")]
    Ambiguous { name: String },
    #[error("image {id} no longer exists in the registry")]
    NotFound { id: String },
    #[error("registry request failed: {0}")]
    Transport(String),
    #[error("registry rejected the request ({status}): {detail}")]
    Api { status: u16, detail: String },
    #[error("failed to read image data from {}: {source}", path.display())]
    Data {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failures of an external command (copy, build or deploy).
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to launch `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{command}` exited with {status}")]
    Exit { command: String, status: String },
}

/// Failures comparing a local file against its reference.
#[derive(Debug, Error)]
pub enum DetectError {
    #[error("required file \"{}\" does not exist", .0.display())]
    MissingFile(PathBuf),
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Everything that can end an `image upload` run.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("invalid upload configuration: {0}")]
    Configuration(String),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Process(#[from] ProcessError),
    #[error(transparent)]
    Detect(#[from] DetectError),
}

/// Everything that can end an `image build` run.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("failed to read image build config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse image build config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("image \"{0}\" is not defined in any build config")]
    UnknownImage(String),
    #[error(transparent)]
    Process(#[from] ProcessError),
}

/// Everything that can end an `undercloud install` or `undercloud upgrade` run.
#[derive(Debug, Error)]
pub enum UndercloudError {
    #[error("undercloud configuration is invalid: {0}")]
    Configuration(String),
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to render undercloud parameters: {0}")]
    Render(#[from] serde_yaml::Error),
    #[error(transparent)]
    Process(#[from] ProcessError),
}
