#![doc = "tripleo-ctl-core: core logic library for tripleo-ctl."]

//! This crate contains the image reconciliation workflow, the boot-agent file
//! sync, the image build boundary and the undercloud deploy command assembly.
//! Transport to a real image registry lives in the CLI crate; this crate only
//! knows the [`contract::RegistryClient`] trait.
//!
//! # Usage
//! Build an [`config::UploadConfig`], pick a registry client and a
//! [`contract::CommandRunner`], then call [`synchronise::synchronise_images`].

pub mod artifact;
pub mod boot;
pub mod config;
pub mod contract;
pub mod detect;
pub mod env;
pub mod error;
pub mod image_build;
#[cfg(any(test, feature = "test-export-mocks"))]
pub mod memory;
pub mod process;
pub mod reconcile;
pub mod synchronise;
pub mod undercloud;
