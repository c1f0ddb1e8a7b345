//! In-memory [`RegistryClient`] for tests.
//!
//! Behaves like the real registry where the workflows can observe it: ids are
//! assigned on create, uploads record an md5 checksum and a sha512
//! fingerprint, duplicate names make lookups ambiguous and updates of unknown
//! ids fail. Every call is recorded so tests can count mutations.

use async_trait::async_trait;
use md5::Md5;
use sha2::{Digest, Sha512};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::contract::{EntryProperties, EntryUpdate, NewEntry, RegistryClient, RegistryEntry};
use crate::detect::HASH_ALGO;
use crate::error::RegistryError;

#[derive(Debug, Clone, PartialEq)]
pub enum RegistryCall {
    FindByName(String),
    Create(NewEntry),
    UploadData { id: String, path: PathBuf },
    Update { id: String, update: EntryUpdate },
    Get(String),
    Delete(String),
}

impl RegistryCall {
    /// Create, update and delete change registry metadata; uploads only fill
    /// an entry created in the same step.
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            RegistryCall::Create(_) | RegistryCall::Update { .. } | RegistryCall::Delete(_)
        )
    }
}

#[derive(Default)]
struct State {
    entries: Vec<RegistryEntry>,
    calls: Vec<RegistryCall>,
    next_id: u64,
}

#[derive(Default)]
pub struct InMemoryRegistry {
    state: Mutex<State>,
    /// Only the md5 `checksum` is recorded, no `os_hash_*`.
    legacy_checksums: bool,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry that predates multihash and only reports md5 checksums.
    pub fn with_legacy_checksums() -> Self {
        InMemoryRegistry {
            legacy_checksums: true,
            ..Self::default()
        }
    }

    fn fingerprint(&self, entry: &mut RegistryEntry, content: &[u8]) {
        entry.checksum = Some(format!("{:x}", Md5::digest(content)));
        if self.legacy_checksums {
            entry.os_hash_algo = None;
            entry.os_hash_value = None;
        } else {
            entry.os_hash_algo = Some(HASH_ALGO.to_owned());
            entry.os_hash_value = Some(format!("{:x}", Sha512::digest(content)));
        }
    }

    /// Seeds an entry without recording a call.
    pub fn insert(&self, entry: RegistryEntry) {
        self.lock().entries.push(entry);
    }

    /// Seeds an active entry whose fingerprint matches `content`.
    pub fn insert_with_content(&self, name: &str, content: &[u8], properties: EntryProperties) -> String {
        let mut state = self.lock();
        state.next_id += 1;
        let id = format!("seed-{}", state.next_id);
        let mut entry = RegistryEntry {
            id: id.clone(),
            name: name.to_owned(),
            status: Some("active".to_owned()),
            created_at: timestamp(state.next_id),
            checksum: None,
            os_hash_algo: None,
            os_hash_value: None,
            properties,
        };
        self.fingerprint(&mut entry, content);
        state.entries.push(entry);
        id
    }

    pub fn calls(&self) -> Vec<RegistryCall> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    pub fn creates(&self) -> Vec<NewEntry> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                RegistryCall::Create(req) => Some(req),
                _ => None,
            })
            .collect()
    }

    pub fn updates(&self) -> Vec<(String, EntryUpdate)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                RegistryCall::Update { id, update } => Some((id, update)),
                _ => None,
            })
            .collect()
    }

    pub fn deletes(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, RegistryCall::Delete(_)))
            .count()
    }

    pub fn mutating_calls(&self) -> usize {
        self.calls().iter().filter(|c| c.is_mutating()).count()
    }

    pub fn entries(&self) -> Vec<RegistryEntry> {
        self.lock().entries.clone()
    }

    /// The single entry called `name`, if exactly one exists.
    pub fn entry_named(&self, name: &str) -> Option<RegistryEntry> {
        let state = self.lock();
        let mut matches = state.entries.iter().filter(|e| e.name == name);
        match (matches.next(), matches.next()) {
            (Some(entry), None) => Some(entry.clone()),
            _ => None,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn timestamp(n: u64) -> String {
    format!("2024-05-01T12:{:02}:{:02}Z", (n / 60) % 60, n % 60)
}

#[async_trait]
impl RegistryClient for InMemoryRegistry {
    async fn find_by_name(&self, name: &str) -> Result<Option<RegistryEntry>, RegistryError> {
        let mut state = self.lock();
        state.calls.push(RegistryCall::FindByName(name.to_owned()));
        let found: Vec<&RegistryEntry> = state.entries.iter().filter(|e| e.name == name).collect();
        match found.as_slice() {
            [] => Ok(None),
            [entry] => Ok(Some((*entry).clone())),
            _ => Err(RegistryError::Ambiguous {
                name: name.to_owned(),
            }),
        }
    }

    async fn create(&self, req: NewEntry) -> Result<RegistryEntry, RegistryError> {
        let mut state = self.lock();
        state.calls.push(RegistryCall::Create(req.clone()));
        state.next_id += 1;
        let entry = RegistryEntry {
            id: format!("img-{}", state.next_id),
            name: req.name,
            status: Some("queued".to_owned()),
            created_at: timestamp(state.next_id),
            checksum: None,
            os_hash_algo: None,
            os_hash_value: None,
            properties: EntryProperties::default(),
        };
        state.entries.push(entry.clone());
        Ok(entry)
    }

    async fn upload_data(&self, id: &str, path: &Path) -> Result<(), RegistryError> {
        self.lock().calls.push(RegistryCall::UploadData {
            id: id.to_owned(),
            path: path.to_path_buf(),
        });
        let data = tokio::fs::read(path).await.map_err(|source| RegistryError::Data {
            path: path.to_path_buf(),
            source,
        })?;
        let mut state = self.lock();
        let entry = state
            .entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| RegistryError::NotFound { id: id.to_owned() })?;
        entry.status = Some("active".to_owned());
        self.fingerprint(entry, &data);
        Ok(())
    }

    async fn update(&self, id: &str, req: EntryUpdate) -> Result<RegistryEntry, RegistryError> {
        let mut state = self.lock();
        state.calls.push(RegistryCall::Update {
            id: id.to_owned(),
            update: req.clone(),
        });
        let entry = state
            .entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| RegistryError::NotFound { id: id.to_owned() })?;
        if let Some(name) = req.name {
            entry.name = name;
        }
        entry.properties.merge(&req.properties);
        Ok(entry.clone())
    }

    async fn get(&self, id: &str) -> Result<RegistryEntry, RegistryError> {
        let mut state = self.lock();
        state.calls.push(RegistryCall::Get(id.to_owned()));
        state
            .entries
            .iter()
            .find(|e| e.id == id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound { id: id.to_owned() })
    }

    async fn delete(&self, id: &str) -> Result<(), RegistryError> {
        let mut state = self.lock();
        state.calls.push(RegistryCall::Delete(id.to_owned()));
        let before = state.entries.len();
        state.entries.retain(|e| e.id != id);
        if state.entries.len() == before {
            return Err(RegistryError::NotFound { id: id.to_owned() });
        }
        Ok(())
    }
}
