//! Profile stores: on-disk and in-memory
//!
//! Both stores keep encoded documents, so checksums and structural checks
//! run on every load regardless of where the bytes live.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use combat_rl_core::{AgentClass, BehaviorProfile, Result};

use crate::codec::{decode_profile, encode_profile, ProfileCompression};

const PROFILE_SUFFIX: &str = "profile.json";
const DEFAULTS_DIR: &str = "defaults";

/// Store configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Root directory of the file store
    pub root: PathBuf,
    /// Parameter array encoding
    pub compression: ProfileCompression,
    /// Keep the previous document as a backup on every overwrite
    pub keep_backup: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("profiles"),
            compression: ProfileCompression::Gzip,
            keep_backup: true,
        }
    }
}

/// Persistent storage for behavior profiles.
///
/// Loads return `Ok(None)` when nothing is stored and `Err` when something is
/// stored but unusable, so callers can tell "first run" from "corruption".
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Save a profile as the primary copy for its class and owner, keeping
    /// the previous copy as backup. Identity and creation time carry over
    /// from the previous copy. Returns the stored revision.
    async fn save(&self, profile: &BehaviorProfile) -> Result<u64>;

    /// Load the primary copy
    async fn load(&self, class: AgentClass, owner_id: &str) -> Result<Option<BehaviorProfile>>;

    /// Load the backup copy
    async fn load_backup(&self, class: AgentClass, owner_id: &str) -> Result<Option<BehaviorProfile>>;

    /// Load the class-default template
    async fn load_class_default(&self, class: AgentClass) -> Result<Option<BehaviorProfile>>;

    /// Store a class-default template
    async fn save_class_default(&self, profile: &BehaviorProfile) -> Result<()>;

    /// Delete primary and backup copies. Returns whether anything existed.
    async fn delete(&self, class: AgentClass, owner_id: &str) -> Result<bool>;

    /// Owners with a primary copy for `class`
    async fn list(&self, class: AgentClass) -> Result<Vec<String>>;
}

/// Copy identity from the previously stored revision. The flag tells
/// whether that revision was intact and is worth keeping as a backup.
fn next_revision(profile: &BehaviorProfile, previous: Option<&str>) -> (BehaviorProfile, bool) {
    let mut next = profile.clone();
    next.updated_at = Utc::now();
    match previous.map(decode_profile) {
        Some(Ok(prev)) => {
            if prev.agent_class == profile.agent_class {
                next.succeed(&prev);
            }
            (next, true)
        }
        Some(Err(e)) => {
            warn!(owner = %profile.owner_id, error = %e, "overwriting unreadable profile, backup left untouched");
            (next, false)
        }
        None => (next, false),
    }
}

fn is_plain(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_'
}

/// Percent-encode every byte outside `[A-Za-z0-9_-]`, so distinct owners
/// never share a file
fn file_safe(owner_id: &str) -> String {
    let mut name = String::with_capacity(owner_id.len());
    for &byte in owner_id.as_bytes() {
        if is_plain(byte) {
            name.push(char::from(byte));
        } else {
            let _ = write!(name, "%{byte:02X}");
        }
    }
    name
}

/// Inverse of [`file_safe`]; `None` for names this store did not write
fn owner_from_file(name: &str) -> Option<String> {
    let bytes = name.as_bytes();
    let mut owner = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let hex = std::str::from_utf8(bytes.get(i + 1..i + 3)?).ok()?;
                owner.push(u8::from_str_radix(hex, 16).ok()?);
                i += 3;
            }
            byte if is_plain(byte) => {
                owner.push(byte);
                i += 1;
            }
            _ => return None,
        }
    }
    String::from_utf8(owner).ok()
}

/// One file per class and owner under a root directory:
///
/// ```text
/// <root>/<class>/<owner>.profile.json      primary
/// <root>/<class>/<owner>.profile.json.bak  previous revision
/// <root>/defaults/<class>.profile.json     class template
/// ```
///
/// Writes go to a temporary file that is renamed into place, so a reader
/// sees either the old or the new document, never a partial one.
#[derive(Debug, Clone)]
pub struct FileProfileStore {
    root: PathBuf,
    compression: ProfileCompression,
    keep_backup: bool,
}

impl FileProfileStore {
    /// Create a store rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            compression: ProfileCompression::default(),
            keep_backup: true,
        }
    }

    /// Create a store from configuration
    #[must_use]
    pub fn from_config(config: &StoreConfig) -> Self {
        Self {
            root: config.root.clone(),
            compression: config.compression,
            keep_backup: config.keep_backup,
        }
    }

    /// Use a different parameter encoding
    #[must_use]
    pub fn with_compression(mut self, compression: ProfileCompression) -> Self {
        self.compression = compression;
        self
    }

    /// Root directory
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the primary copy
    #[must_use]
    pub fn primary_path(&self, class: AgentClass, owner_id: &str) -> PathBuf {
        self.root
            .join(class.as_str())
            .join(format!("{}.{PROFILE_SUFFIX}", file_safe(owner_id)))
    }

    /// Path of the backup copy
    #[must_use]
    pub fn backup_path(&self, class: AgentClass, owner_id: &str) -> PathBuf {
        let mut path = self.primary_path(class, owner_id).into_os_string();
        path.push(".bak");
        PathBuf::from(path)
    }

    /// Path of the class template
    #[must_use]
    pub fn default_path(&self, class: AgentClass) -> PathBuf {
        self.root
            .join(DEFAULTS_DIR)
            .join(format!("{}.{PROFILE_SUFFIX}", class.as_str()))
    }

    async fn read_optional(path: &Path) -> Result<Option<String>> {
        match fs::read_to_string(path).await {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(anyhow::Error::new(e)
                .context(format!("reading {}", path.display()))
                .into()),
        }
    }

    async fn load_path(path: &Path) -> Result<Option<BehaviorProfile>> {
        match Self::read_optional(path).await? {
            Some(text) => decode_profile(&text).map(Some),
            None => Ok(None),
        }
    }

    /// Write `text` next to `path` and rename it into place
    async fn write_atomic(path: &Path, text: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let mut file = fs::File::create(&tmp)
            .await
            .with_context(|| format!("creating {}", tmp.display()))?;
        file.write_all(text.as_bytes()).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&tmp, path)
            .await
            .with_context(|| format!("renaming {} into place", tmp.display()))?;
        Ok(())
    }
}

#[async_trait]
impl ProfileStore for FileProfileStore {
    async fn save(&self, profile: &BehaviorProfile) -> Result<u64> {
        let primary = self.primary_path(profile.agent_class, &profile.owner_id);
        let previous = Self::read_optional(&primary).await?;
        let (next, previous_intact) = next_revision(profile, previous.as_deref());
        let text = encode_profile(&next, self.compression)?;

        if self.keep_backup && previous_intact {
            let backup = self.backup_path(profile.agent_class, &profile.owner_id);
            fs::copy(&primary, &backup)
                .await
                .with_context(|| format!("backing up {}", primary.display()))?;
        }
        Self::write_atomic(&primary, &text).await?;

        debug!(
            owner = %profile.owner_id,
            class = %profile.agent_class,
            revision = next.revision,
            path = %primary.display(),
            "profile saved"
        );
        Ok(next.revision)
    }

    async fn load(&self, class: AgentClass, owner_id: &str) -> Result<Option<BehaviorProfile>> {
        Self::load_path(&self.primary_path(class, owner_id)).await
    }

    async fn load_backup(&self, class: AgentClass, owner_id: &str) -> Result<Option<BehaviorProfile>> {
        Self::load_path(&self.backup_path(class, owner_id)).await
    }

    async fn load_class_default(&self, class: AgentClass) -> Result<Option<BehaviorProfile>> {
        Self::load_path(&self.default_path(class)).await
    }

    async fn save_class_default(&self, profile: &BehaviorProfile) -> Result<()> {
        let path = self.default_path(profile.agent_class);
        let text = encode_profile(profile, self.compression)?;
        Self::write_atomic(&path, &text).await?;
        info!(class = %profile.agent_class, path = %path.display(), "class default saved");
        Ok(())
    }

    async fn delete(&self, class: AgentClass, owner_id: &str) -> Result<bool> {
        let mut existed = false;
        for path in [self.primary_path(class, owner_id), self.backup_path(class, owner_id)] {
            match fs::remove_file(&path).await {
                Ok(()) => existed = true,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to delete profile");
                    return Err(e.into());
                }
            }
        }
        Ok(existed)
    }

    async fn list(&self, class: AgentClass) -> Result<Vec<String>> {
        let dir = self.root.join(class.as_str());
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let suffix = format!(".{PROFILE_SUFFIX}");
        let mut owners = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if let Some(owner) = name
                .to_str()
                .and_then(|n| n.strip_suffix(&suffix))
                .and_then(owner_from_file)
            {
                owners.push(owner);
            }
        }
        owners.sort();
        Ok(owners)
    }
}

#[derive(Debug, Default)]
struct Slot {
    primary: Option<String>,
    backup: Option<String>,
}

/// In-memory store for tests and hosts without a filesystem
#[derive(Debug, Default)]
pub struct MemoryProfileStore {
    compression: ProfileCompression,
    slots: RwLock<HashMap<(AgentClass, String), Slot>>,
    defaults: RwLock<HashMap<AgentClass, String>>,
}

impl MemoryProfileStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different parameter encoding
    #[must_use]
    pub fn with_compression(mut self, compression: ProfileCompression) -> Self {
        self.compression = compression;
        self
    }

    /// Replace the primary document with raw text, bypassing encoding.
    /// The current primary becomes the backup.
    pub async fn put_raw(&self, class: AgentClass, owner_id: &str, text: impl Into<String>) {
        let mut slots = self.slots.write().await;
        let slot = slots.entry((class, owner_id.to_string())).or_default();
        slot.backup = slot.primary.take();
        slot.primary = Some(text.into());
    }

    /// Raw primary document
    pub async fn raw(&self, class: AgentClass, owner_id: &str) -> Option<String> {
        let slots = self.slots.read().await;
        slots
            .get(&(class, owner_id.to_string()))
            .and_then(|slot| slot.primary.clone())
    }
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn save(&self, profile: &BehaviorProfile) -> Result<u64> {
        let mut slots = self.slots.write().await;
        let slot = slots
            .entry((profile.agent_class, profile.owner_id.clone()))
            .or_default();
        let (next, previous_intact) = next_revision(profile, slot.primary.as_deref());
        let text = encode_profile(&next, self.compression)?;
        let previous = slot.primary.replace(text);
        if previous_intact {
            slot.backup = previous;
        }
        Ok(next.revision)
    }

    async fn load(&self, class: AgentClass, owner_id: &str) -> Result<Option<BehaviorProfile>> {
        let slots = self.slots.read().await;
        slots
            .get(&(class, owner_id.to_string()))
            .and_then(|slot| slot.primary.as_deref())
            .map(decode_profile)
            .transpose()
    }

    async fn load_backup(&self, class: AgentClass, owner_id: &str) -> Result<Option<BehaviorProfile>> {
        let slots = self.slots.read().await;
        slots
            .get(&(class, owner_id.to_string()))
            .and_then(|slot| slot.backup.as_deref())
            .map(decode_profile)
            .transpose()
    }

    async fn load_class_default(&self, class: AgentClass) -> Result<Option<BehaviorProfile>> {
        let defaults = self.defaults.read().await;
        defaults.get(&class).map(|text| decode_profile(text)).transpose()
    }

    async fn save_class_default(&self, profile: &BehaviorProfile) -> Result<()> {
        let text = encode_profile(profile, self.compression)?;
        self.defaults.write().await.insert(profile.agent_class, text);
        Ok(())
    }

    async fn delete(&self, class: AgentClass, owner_id: &str) -> Result<bool> {
        Ok(self
            .slots
            .write()
            .await
            .remove(&(class, owner_id.to_string()))
            .is_some())
    }

    async fn list(&self, class: AgentClass) -> Result<Vec<String>> {
        let slots = self.slots.read().await;
        let mut owners: Vec<String> = slots
            .iter()
            .filter(|((c, _), slot)| *c == class && slot.primary.is_some())
            .map(|((_, owner), _)| owner.clone())
            .collect();
        owners.sort();
        Ok(owners)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use combat_rl_core::{LearningMetrics, NetworkArchitecture};
    use tempfile::TempDir;

    fn profile(owner: &str, bias: f32) -> BehaviorProfile {
        let arch = NetworkArchitecture::dense(2, vec![3], 2);
        let weights = vec![0.25; arch.weight_count()];
        let biases = vec![bias; arch.bias_count()];
        BehaviorProfile::new(AgentClass::Melee, owner, arch, weights, biases, LearningMetrics::default())
    }

    #[tokio::test]
    async fn test_file_store_save_load() {
        let dir = TempDir::new().unwrap();
        let store = FileProfileStore::new(dir.path());

        assert!(store.load(AgentClass::Melee, "orc").await.unwrap().is_none());
        let revision = store.save(&profile("orc", 0.1)).await.unwrap();
        assert_eq!(revision, 0);

        let loaded = store.load(AgentClass::Melee, "orc").await.unwrap().unwrap();
        assert_eq!(loaded.biases, vec![0.1; 5]);
        assert!(store.primary_path(AgentClass::Melee, "orc").exists());
        assert!(!store.backup_path(AgentClass::Melee, "orc").exists());
    }

    #[tokio::test]
    async fn test_file_store_keeps_backup_and_identity() {
        let dir = TempDir::new().unwrap();
        let store = FileProfileStore::new(dir.path());

        store.save(&profile("orc", 0.1)).await.unwrap();
        let first = store.load(AgentClass::Melee, "orc").await.unwrap().unwrap();
        let revision = store.save(&profile("orc", 0.2)).await.unwrap();
        assert_eq!(revision, 1);

        let primary = store.load(AgentClass::Melee, "orc").await.unwrap().unwrap();
        let backup = store.load_backup(AgentClass::Melee, "orc").await.unwrap().unwrap();
        assert_eq!(primary.biases, vec![0.2; 5]);
        assert_eq!(backup.biases, vec![0.1; 5]);
        assert_eq!(primary.profile_id, first.profile_id);
        assert_eq!(primary.created_at, first.created_at);

        let tmp_files = std::fs::read_dir(dir.path().join("melee"))
            .unwrap()
            .filter(|e| e.as_ref().unwrap().path().extension().is_some_and(|x| x == "tmp"))
            .count();
        assert_eq!(tmp_files, 0);
    }

    #[tokio::test]
    async fn test_file_store_reports_corruption() {
        let dir = TempDir::new().unwrap();
        let store = FileProfileStore::new(dir.path());
        store.save(&profile("orc", 0.1)).await.unwrap();
        std::fs::write(store.primary_path(AgentClass::Melee, "orc"), "{ truncated").unwrap();
        assert!(store.load(AgentClass::Melee, "orc").await.is_err());

        // the corrupt primary must not replace the good backup
        store.save(&profile("orc", 0.3)).await.unwrap();
        store.save(&profile("orc", 0.4)).await.unwrap();
        std::fs::write(store.primary_path(AgentClass::Melee, "orc"), "junk").unwrap();
        store.save(&profile("orc", 0.5)).await.unwrap();
        let backup = store.load_backup(AgentClass::Melee, "orc").await.unwrap().unwrap();
        assert_eq!(backup.biases, vec![0.3; 5]);
    }

    #[tokio::test]
    async fn test_file_store_list_and_delete() {
        let dir = TempDir::new().unwrap();
        let store = FileProfileStore::new(dir.path());
        store.save(&profile("b", 0.0)).await.unwrap();
        store.save(&profile("a", 0.0)).await.unwrap();
        store.save(&profile("a", 0.0)).await.unwrap();
        assert_eq!(store.list(AgentClass::Melee).await.unwrap(), vec!["a", "b"]);
        assert!(store.list(AgentClass::Tank).await.unwrap().is_empty());

        assert!(store.delete(AgentClass::Melee, "a").await.unwrap());
        assert!(!store.delete(AgentClass::Melee, "a").await.unwrap());
        assert_eq!(store.list(AgentClass::Melee).await.unwrap(), vec!["b"]);
    }

    #[test]
    fn test_owner_ids_are_sanitised() {
        let dir = TempDir::new().unwrap();
        let store = FileProfileStore::new(dir.path());
        let path = store.primary_path(AgentClass::Melee, "../boss 1");
        assert!(path.starts_with(dir.path().join("melee")));
        assert!(path.ends_with("%2E%2E%2Fboss%201.profile.json"));
        assert_eq!(owner_from_file("%2E%2E%2Fboss%201").as_deref(), Some("../boss 1"));
        assert_eq!(owner_from_file("bad%2"), None);
    }

    #[tokio::test]
    async fn test_similar_owners_get_separate_files() {
        let dir = TempDir::new().unwrap();
        let store = FileProfileStore::new(dir.path());
        assert_ne!(
            store.primary_path(AgentClass::Melee, "grunt.a"),
            store.primary_path(AgentClass::Melee, "grunt_a")
        );

        store.save(&profile("grunt.a", 0.1)).await.unwrap();
        store.save(&profile("grunt_a", 0.9)).await.unwrap();

        let dotted = store.load(AgentClass::Melee, "grunt.a").await.unwrap().unwrap();
        assert_eq!(dotted.owner_id, "grunt.a");
        assert_eq!(dotted.biases[0], 0.1);
        assert_eq!(store.list(AgentClass::Melee).await.unwrap(), vec!["grunt.a", "grunt_a"]);
    }

    #[tokio::test]
    async fn test_memory_store_mirrors_file_store() {
        let store = MemoryProfileStore::new();
        store.save(&profile("orc", 0.1)).await.unwrap();
        store.save(&profile("orc", 0.2)).await.unwrap();
        let primary = store.load(AgentClass::Melee, "orc").await.unwrap().unwrap();
        let backup = store.load_backup(AgentClass::Melee, "orc").await.unwrap().unwrap();
        assert_eq!(primary.revision, 1);
        assert_eq!(backup.revision, 0);

        store.put_raw(AgentClass::Melee, "orc", "garbage").await;
        assert!(store.load(AgentClass::Melee, "orc").await.is_err());
        assert_eq!(
            store.load_backup(AgentClass::Melee, "orc").await.unwrap().unwrap().revision,
            1
        );
    }
}
