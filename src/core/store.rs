/// User Record Store
///
/// Persists user records as a single pretty-printed JSON array on disk. Every
/// mutation is a full read-modify-write of the file: load the array, push the
/// new record, write the whole array back.
///
/// Existing entries are kept as opaque JSON values. Only the record being
/// appended has a fixed shape, so keys written by other tools survive a
/// rewrite and arrays holding non-record entries can still be appended to.
///
/// The `UserStore` trait is the seam between tool handlers and persistence so
/// the flat file can be replaced by a transactional backend later.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::core::error::{StoreError, StoreResult};

/// Field set accepted by the `create-user` tool.
///
/// Fields are only required to be strings; no format checking is done on
/// email or phone.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub address: String,
    pub phone: String,
}

/// Shape of an entry written by `append`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserRecord {
    pub id: u64,
    pub name: String,
    pub email: String,
    pub address: String,
    pub phone: String,
}

impl UserRecord {
    fn new(id: u64, user: NewUser) -> Self {
        Self {
            id,
            name: user.name,
            email: user.email,
            address: user.address,
            phone: user.phone,
        }
    }
}

/// Storage interface for user records.
pub trait UserStore: Send + Sync {
    /// Load every entry in append order.
    ///
    /// # Returns
    /// The stored entries, untouched. A store that does not exist yet is empty.
    fn load(&self) -> StoreResult<Vec<Value>>;

    /// Replace the stored sequence with `entries`.
    fn save(&self, entries: &[Value]) -> StoreResult<()>;

    /// Append a new user and return the id assigned to it.
    ///
    /// # Arguments
    /// * `user` - Validated field set for the new record
    ///
    /// # Returns
    /// The new id, `(entries before the call) + 1`
    fn append(&self, user: NewUser) -> StoreResult<u64> {
        append_record(self, user)
    }
}

/// Next id for a store holding `entries`: its length plus one.
///
/// Ids are positional. Removing entries by hand would let a later append
/// reuse an id.
pub fn next_id(entries: &[Value]) -> u64 {
    entries.len() as u64 + 1
}

fn append_record<S: UserStore + ?Sized>(store: &S, user: NewUser) -> StoreResult<u64> {
    let mut entries = store.load()?;
    let id = next_id(&entries);
    let record = serde_json::to_value(UserRecord::new(id, user)).map_err(StoreError::Encode)?;
    entries.push(record);
    store.save(&entries)?;
    Ok(id)
}

/// Flat JSON file implementation of `UserStore`.
///
/// The file and its parent directories are created lazily on the first append.
/// Writes overwrite the file in place, so an interrupted write can leave it
/// truncated.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    // Serializes read-modify-write cycles between worker threads of this process.
    append_lock: Mutex<()>,
}

impl JsonFileStore {
    /// Create a store backed by `path`. Nothing touches the disk until used.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            append_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl UserStore for JsonFileStore {
    /// Read the backing file.
    ///
    /// A missing file is empty; unreadable or non-JSON content is an error;
    /// JSON that is not an array is treated as empty.
    fn load(&self) -> StoreResult<Vec<Value>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StoreError::Read {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        let value: Value = serde_json::from_str(&raw).map_err(|source| StoreError::Parse {
            path: self.path.clone(),
            source,
        })?;

        match value {
            Value::Array(entries) => Ok(entries),
            _ => {
                tracing::warn!(
                    path = %self.path.display(),
                    "user store does not hold a JSON array, treating it as empty"
                );
                Ok(Vec::new())
            }
        }
    }

    fn save(&self, entries: &[Value]) -> StoreResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| StoreError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let body = serde_json::to_string_pretty(entries).map_err(StoreError::Encode)?;
        fs::write(&self.path, body).map_err(|source| StoreError::Write {
            path: self.path.clone(),
            source,
        })
    }

    fn append(&self, user: NewUser) -> StoreResult<u64> {
        // A poisoned lock only means another append panicked; the file is the state.
        let _guard = self.append_lock.lock().unwrap_or_else(|e| e.into_inner());
        append_record(self, user)
    }
}
