//! Persistent activation records
//!
//! Remembers, per SIM (ICCID) or per device (MEID), how far post-payment
//! activation has progressed. One TOML file per profile directory:
//!
//! ```toml
//! # Identifiers pending cellular activation.
//!
//! [iccid_list]
//! 89014104279439603259 = 1
//!
//! [meid_list]
//! ```
//!
//! Every mutation is written and flushed before the call returns.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

/// File name of the store inside a profile directory
pub const STORE_FILE_NAME: &str = "activating_iccid_store.profile";

const STORE_HEADER: &str = "# Identifiers pending cellular activation.\n";
const CORRUPTED_SUFFIX: &str = ".corrupted";

/// Store handle shared by every modem in one profile
pub type SharedActivationStore = Arc<Mutex<ActivationStore>>;

/// Which identifier a record is keyed by
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierType {
    Iccid,
    Meid,
}

impl IdentifierType {
    pub fn group_name(self) -> &'static str {
        match self {
            Self::Iccid => "iccid_list",
            Self::Meid => "meid_list",
        }
    }
}

/// Stored activation progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActivationRecordState {
    #[default]
    Unknown,
    Pending,
    Activated,
    FailureRetry,
}

impl ActivationRecordState {
    /// Returns `Unknown` for anything outside the storable range.
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => Self::Pending,
            2 => Self::Activated,
            3 => Self::FailureRetry,
            _ => Self::Unknown,
        }
    }

    pub fn code(self) -> i64 {
        match self {
            Self::Unknown => 0,
            Self::Pending => 1,
            Self::Activated => 2,
            Self::FailureRetry => 3,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreContents {
    #[serde(default)]
    iccid_list: BTreeMap<String, i64>,
    #[serde(default)]
    meid_list: BTreeMap<String, i64>,
}

impl StoreContents {
    fn group(&self, id_type: IdentifierType) -> &BTreeMap<String, i64> {
        match id_type {
            IdentifierType::Iccid => &self.iccid_list,
            IdentifierType::Meid => &self.meid_list,
        }
    }

    fn group_mut(&mut self, id_type: IdentifierType) -> &mut BTreeMap<String, i64> {
        match id_type {
            IdentifierType::Iccid => &mut self.iccid_list,
            IdentifierType::Meid => &mut self.meid_list,
        }
    }
}

#[derive(Debug)]
struct OpenStore {
    path: PathBuf,
    header: String,
    contents: StoreContents,
}

impl OpenStore {
    fn flush(&self) -> bool {
        match self.write() {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to flush activation store {}: {}", self.path.display(), e);
                false
            }
        }
    }

    fn write(&self) -> std::io::Result<()> {
        let body = toml::to_string(&self.contents)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        let mut tmp_name = self.path.clone().into_os_string();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(self.header.as_bytes())?;
        if !self.header.is_empty() {
            file.write_all(b"\n")?;
        }
        file.write_all(body.as_bytes())?;
        file.sync_all()?;
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

/// Activation record store for one profile directory
#[derive(Debug, Default)]
pub struct ActivationStore {
    store: Option<OpenStore>,
}

impl ActivationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(self) -> SharedActivationStore {
        Arc::new(Mutex::new(self))
    }

    /// Open (or create) the store in `directory`.
    ///
    /// Any previously open store is flushed and closed first. When an existing
    /// file cannot be read it is moved aside as `<file>.corrupted` so the next
    /// open starts fresh.
    pub fn open(&mut self, directory: &Path) -> bool {
        if let Some(previous) = self.store.take() {
            debug!("Closing activation store {}", previous.path.display());
            previous.flush();
        }

        if directory.as_os_str().is_empty() {
            error!("Activation store directory is empty");
            return false;
        }

        if let Err(e) = fs::create_dir_all(directory) {
            error!("Failed to create activation store directory {}: {}", directory.display(), e);
            return false;
        }

        let path = directory.join(STORE_FILE_NAME);
        let already_exists = fs::metadata(&path).map(|m| m.len() > 0).unwrap_or(false);

        let (header, contents) = if already_exists {
            match load(&path) {
                Ok(loaded) => loaded,
                Err(reason) => {
                    error!("Failed to open activation store {}: {}", path.display(), reason);
                    mark_as_corrupted(&path);
                    return false;
                }
            }
        } else {
            (STORE_HEADER.to_string(), StoreContents::default())
        };

        let store = OpenStore {
            path,
            header,
            contents,
        };
        if !already_exists && !store.flush() {
            return false;
        }

        info!("Opened activation store {}", store.path.display());
        self.store = Some(store);
        true
    }

    pub fn is_open(&self) -> bool {
        self.store.is_some()
    }

    /// Stored state for `id`, `Unknown` when absent or unreadable.
    pub fn get(&self, id_type: IdentifierType, id: &str) -> ActivationRecordState {
        let Some(store) = &self.store else {
            debug!("Activation store not open");
            return ActivationRecordState::Unknown;
        };

        match store.contents.group(id_type).get(id) {
            Some(code) => {
                let state = ActivationRecordState::from_code(*code);
                if state == ActivationRecordState::Unknown {
                    warn!("Ignoring out-of-range activation state {} for {}", code, id);
                }
                state
            }
            None => ActivationRecordState::Unknown,
        }
    }

    /// Persist `state` for `id`. `Unknown` is not storable.
    pub fn set(&mut self, id_type: IdentifierType, id: &str, state: ActivationRecordState) -> bool {
        let Some(store) = &mut self.store else {
            error!("Cannot set activation state: store not open");
            return false;
        };
        if state == ActivationRecordState::Unknown {
            error!("Refusing to store activation state Unknown for {}", id);
            return false;
        }

        let previous = store
            .contents
            .group_mut(id_type)
            .insert(id.to_string(), state.code());
        if store.flush() {
            debug!("Stored activation state {:?} for {} in {}", state, id, id_type.group_name());
            return true;
        }

        // Keep memory consistent with what is on disk.
        let group = store.contents.group_mut(id_type);
        match previous {
            Some(code) => {
                group.insert(id.to_string(), code);
            }
            None => {
                group.remove(id);
            }
        }
        false
    }

    /// Delete the record for `id`. Removing an absent record succeeds.
    pub fn remove(&mut self, id_type: IdentifierType, id: &str) -> bool {
        let Some(store) = &mut self.store else {
            error!("Cannot remove activation state: store not open");
            return false;
        };

        let Some(previous) = store.contents.group_mut(id_type).remove(id) else {
            return true;
        };
        if store.flush() {
            debug!("Removed activation state for {} from {}", id, id_type.group_name());
            return true;
        }

        store.contents.group_mut(id_type).insert(id.to_string(), previous);
        false
    }

    /// Path of the open store file
    pub fn path(&self) -> Option<&Path> {
        self.store.as_ref().map(|s| s.path.as_path())
    }
}

impl Drop for ActivationStore {
    fn drop(&mut self) {
        if let Some(store) = self.store.take() {
            store.flush();
        }
    }
}

fn load(path: &Path) -> Result<(String, StoreContents), String> {
    let text = fs::read_to_string(path).map_err(|e| e.to_string())?;
    let contents: StoreContents = toml::from_str(&text).map_err(|e| e.to_string())?;

    let mut header = String::new();
    for line in text.lines() {
        if !line.starts_with('#') {
            break;
        }
        header.push_str(line);
        header.push('\n');
    }
    Ok((header, contents))
}

fn mark_as_corrupted(path: &Path) {
    let mut corrupted = path.as_os_str().to_os_string();
    corrupted.push(CORRUPTED_SUFFIX);
    match fs::rename(path, &corrupted) {
        Ok(()) => warn!("Moved corrupted activation store to {:?}", corrupted),
        Err(e) => error!("Failed to mark {} as corrupted: {}", path.display(), e),
    }
}
