#![allow(unused)]

//! # contract: boundaries to the outside world
//!
//! This module defines the traits the workflows are written against, and the
//! plain data that crosses them:
//!
//! - [`RegistryClient`]: the remote image registry (find, create, upload data,
//!   update, get, delete).
//! - [`CommandRunner`]: external commands (`sudo cp`, `disk-image-create`,
//!   the undercloud deploy command).
//! - [`ImageBuilder`]: turns image build definitions into image files.
//!
//! ## Mocking & Testing
//! - Every trait is annotated for `mockall`, so tests can set strict call
//!   expectations.
//! - [`crate::memory::InMemoryRegistry`] is a stateful fake for tests that
//!   care about what ends up in the registry rather than individual calls.
//!
//! ## Adding New Registries
//! - Implement [`RegistryClient`] and map "no such name" to `Ok(None)`.
//! - Every other failure is a [`RegistryError`]; callers treat it as fatal.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use mockall::{automock, predicate::*};

use crate::config::BuildConfig;
use crate::error::{BuildError, ProcessError, RegistryError};
use crate::image_build::BuildReport;
use crate::process::Invocation;

/// Typed view of the registry properties this tool reads and writes.
///
/// Anything else the registry returns is kept in `extra` untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryProperties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kernel_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ramdisk_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hw_architecture: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tripleo_platform: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl EntryProperties {
    pub fn is_empty(&self) -> bool {
        self.kernel_id.is_none()
            && self.ramdisk_id.is_none()
            && self.hw_architecture.is_none()
            && self.tripleo_platform.is_none()
            && self.extra.is_empty()
    }

    /// Overlays every property set in `other` onto `self`.
    pub fn merge(&mut self, other: &EntryProperties) {
        if other.kernel_id.is_some() {
            self.kernel_id = other.kernel_id.clone();
        }
        if other.ramdisk_id.is_some() {
            self.ramdisk_id = other.ramdisk_id.clone();
        }
        if other.hw_architecture.is_some() {
            self.hw_architecture = other.hw_architecture.clone();
        }
        if other.tripleo_platform.is_some() {
            self.tripleo_platform = other.tripleo_platform.clone();
        }
        for (key, value) in &other.extra {
            self.extra.insert(key.clone(), value.clone());
        }
    }

    /// Flattens the properties into `(key, value)` pairs, known keys first.
    pub fn pairs(&self) -> Vec<(String, serde_json::Value)> {
        let known = [
            ("kernel_id", &self.kernel_id),
            ("ramdisk_id", &self.ramdisk_id),
            ("hw_architecture", &self.hw_architecture),
            ("tripleo_platform", &self.tripleo_platform),
        ];
        let mut pairs: Vec<(String, serde_json::Value)> = known
            .into_iter()
            .filter_map(|(key, value)| {
                value
                    .as_ref()
                    .map(|v| (key.to_owned(), serde_json::Value::String(v.clone())))
            })
            .collect();
        pairs.extend(self.extra.iter().map(|(k, v)| (k.clone(), v.clone())));
        pairs
    }
}

/// An image as the registry reports it.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistryEntry {
    pub id: String,
    pub name: String,
    pub status: Option<String>,
    pub created_at: String,
    /// Legacy md5 checksum, compared when no sha512 hash is recorded.
    pub checksum: Option<String>,
    pub os_hash_algo: Option<String>,
    pub os_hash_value: Option<String>,
    pub properties: EntryProperties,
}

/// Core attributes for a new registry entry. Properties are applied later
/// through [`RegistryClient::update`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEntry {
    pub name: String,
    pub disk_format: String,
    pub container_format: String,
    pub visibility: String,
}

/// Partial update of an existing entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntryUpdate {
    pub name: Option<String>,
    pub properties: EntryProperties,
}

impl EntryUpdate {
    pub fn rename(name: impl Into<String>) -> Self {
        EntryUpdate {
            name: Some(name.into()),
            properties: EntryProperties::default(),
        }
    }

    pub fn properties(properties: EntryProperties) -> Self {
        EntryUpdate {
            name: None,
            properties,
        }
    }
}

/// Operations against the remote image registry.
///
/// Implementations are used strictly sequentially: one call completes before
/// the next is issued.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Looks an entry up by exact name. `Ok(None)` when nothing matches.
    async fn find_by_name(&self, name: &str) -> Result<Option<RegistryEntry>, RegistryError>;

    /// Creates an empty entry.
    async fn create(&self, req: NewEntry) -> Result<RegistryEntry, RegistryError>;

    /// Streams the content of `path` into the entry `id`.
    async fn upload_data(&self, id: &str, path: &Path) -> Result<(), RegistryError>;

    /// Applies a partial update. Fails with [`RegistryError::NotFound`] if the
    /// entry vanished.
    async fn update(&self, id: &str, req: EntryUpdate) -> Result<RegistryEntry, RegistryError>;

    /// Fetches the current state of the entry `id`.
    async fn get(&self, id: &str) -> Result<RegistryEntry, RegistryError>;

    /// Deletes the entry `id`. Reconciliation never calls this.
    async fn delete(&self, id: &str) -> Result<(), RegistryError>;
}

/// Runs external commands to completion.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
pub trait CommandRunner: Send + Sync {
    /// Runs `invocation`, failing on spawn errors and nonzero exit codes.
    fn run(&self, invocation: &Invocation) -> Result<(), ProcessError>;
}

/// Produces image files from build definitions.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
pub trait ImageBuilder {
    fn build(&self, config: &BuildConfig) -> Result<BuildReport, BuildError>;
}
