//! Per-artifact reconciliation against the registry.
//!
//! | entry exists | changed | update-existing | outcome            |
//! |--------------|---------|-----------------|--------------------|
//! | no           | -       | -               | [`Outcome::Created`]   |
//! | yes          | no      | -               | [`Outcome::Skipped`]   |
//! | yes          | yes     | no              | [`Outcome::StaleKept`] |
//! | yes          | yes     | yes             | [`Outcome::Updated`]   |
//!
//! An update archives the stale entry under a timestamped name (one update
//! call on its id) and uploads a fresh entry under the live name, so nodes
//! still booting from the old image keep a valid reference.

use tracing::{info, warn};

use crate::artifact::{Artifact, CONTAINER_FORMAT, VISIBILITY};
use crate::contract::{EntryProperties, EntryUpdate, NewEntry, RegistryClient, RegistryEntry};
use crate::detect::{self, Reference};
use crate::error::{DetectError, UploadError};

/// Registry ids archived during one invocation. Append-only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunResult {
    updated: Vec<String>,
}

impl RunResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, id: impl Into<String>) {
        self.updated.push(id.into());
    }

    pub fn updated(&self) -> &[String] {
        &self.updated
    }

    pub fn is_empty(&self) -> bool {
        self.updated.is_empty()
    }

    pub fn len(&self) -> usize {
        self.updated.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Created,
    Skipped,
    /// Local file differs but updating was not allowed.
    StaleKept,
    Updated { archived_id: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled {
    pub outcome: Outcome,
    /// The entry now carrying the artifact's name.
    pub entry: RegistryEntry,
}

pub struct Reconciler<'a, C: RegistryClient + ?Sized> {
    client: &'a C,
    update_existing: bool,
}

impl<'a, C: RegistryClient + ?Sized> Reconciler<'a, C> {
    pub fn new(client: &'a C, update_existing: bool) -> Self {
        Reconciler {
            client,
            update_existing,
        }
    }

    /// Brings the registry entry for `artifact` in line with its local file.
    ///
    /// `properties` are only written when a new entry is uploaded; skipped
    /// entries keep whatever they carry.
    pub async fn reconcile(
        &self,
        artifact: &Artifact,
        properties: &EntryProperties,
        run: &mut RunResult,
    ) -> Result<Reconciled, UploadError> {
        let outcome = match self.client.find_by_name(&artifact.name).await? {
            None => Outcome::Created,
            Some(existing) => {
                if !detect::changed(&artifact.local_path, Reference::Entry(&existing))? {
                    println!("Image \"{}\" is up-to-date, skipping.", artifact.name);
                    info!(image = %artifact.name, id = %existing.id, "Registry entry up to date");
                    return Ok(Reconciled {
                        outcome: Outcome::Skipped,
                        entry: existing,
                    });
                }
                if !self.update_existing {
                    println!(
                        "Image \"{}\" already exists and can be updated with --update-existing.",
                        artifact.name
                    );
                    warn!(image = %artifact.name, id = %existing.id, "Registry entry is stale, leaving it untouched");
                    return Ok(Reconciled {
                        outcome: Outcome::StaleKept,
                        entry: existing,
                    });
                }
                let archived = archive_name(&existing.name, &existing.created_at);
                info!(image = %artifact.name, id = %existing.id, archived = %archived, "Archiving stale registry entry");
                self.client
                    .update(&existing.id, EntryUpdate::rename(archived))
                    .await?;
                run.record(existing.id.clone());
                Outcome::Updated {
                    archived_id: existing.id,
                }
            }
        };

        let entry = self.upload(artifact, properties).await?;
        Ok(Reconciled { outcome, entry })
    }

    /// Creates the entry, streams the file into it, then attaches properties.
    async fn upload(
        &self,
        artifact: &Artifact,
        properties: &EntryProperties,
    ) -> Result<RegistryEntry, UploadError> {
        if !artifact.local_path.is_file() {
            return Err(DetectError::MissingFile(artifact.local_path.clone()).into());
        }

        let created = self
            .client
            .create(NewEntry {
                name: artifact.name.clone(),
                disk_format: artifact.kind.disk_format().to_owned(),
                container_format: CONTAINER_FORMAT.to_owned(),
                visibility: VISIBILITY.to_owned(),
            })
            .await?;
        info!(image = %artifact.name, id = %created.id, kind = %artifact.kind, "Created registry entry");

        self.client
            .upload_data(&created.id, &artifact.local_path)
            .await?;

        if !properties.is_empty() {
            self.client
                .update(&created.id, EntryUpdate::properties(properties.clone()))
                .await?;
        }

        let entry = self.client.get(&created.id).await?;
        println!("Image \"{}\" was uploaded.", entry.name);
        Ok(entry)
    }
}

/// Name a stale entry is moved to: `<name>_<created_at>` with trailing zeros
/// of the timestamp dropped and `-`, `:` and `.` removed.
pub fn archive_name(name: &str, created_at: &str) -> String {
    let stamp: String = created_at
        .trim_end_matches('0')
        .chars()
        .filter(|c| !matches!(c, '-' | ':' | '.'))
        .collect();
    format!("{name}_{stamp}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archive_name_compacts_timestamp() {
        assert_eq!(
            archive_name("overcloud-full", "2015-07-31T14:37:22.000000"),
            "overcloud-full_20150731T143722"
        );
        assert_eq!(
            archive_name("overcloud-full", "2015-07-31T14:37:20Z"),
            "overcloud-full_20150731T143720Z"
        );
        assert_eq!(
            archive_name("overcloud-full", "2015-07-31T14:37:20.500000"),
            "overcloud-full_20150731T1437205"
        );
    }

    #[test]
    fn run_result_is_append_only() {
        let mut run = RunResult::new();
        assert!(run.is_empty());
        run.record("10");
        run.record("11");
        assert_eq!(run.updated().to_vec(), vec!["10".to_owned(), "11".to_owned()]);
        assert_eq!(run.len(), 2);
    }
}
