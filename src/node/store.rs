use super::state::NodeState;
use crate::util::error::StateStoreError;
use parking_lot::Mutex;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const STATE_FILE_NAME: &str = "node-state.json";

/// Durable home of a node's [`NodeState`].
pub trait NodeStateStore: Send + Sync {
    /// Returns `None` when nothing has been persisted yet.
    fn load(&self) -> Result<Option<NodeState>, StateStoreError>;
    fn persist(&self, state: &NodeState) -> Result<(), StateStoreError>;
}

impl<T: NodeStateStore + ?Sized> NodeStateStore for Arc<T> {
    fn load(&self) -> Result<Option<NodeState>, StateStoreError> {
        (**self).load()
    }

    fn persist(&self, state: &NodeState) -> Result<(), StateStoreError> {
        (**self).persist(state)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    slot: Mutex<Option<NodeState>>,
    fail_next_persist: Mutex<bool>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `persist` call fail with an I/O error.
    pub fn fail_next_persist(&self) {
        *self.fail_next_persist.lock() = true;
    }

    pub fn stored(&self) -> Option<NodeState> {
        self.slot.lock().clone()
    }
}

impl NodeStateStore for InMemoryStateStore {
    fn load(&self) -> Result<Option<NodeState>, StateStoreError> {
        Ok(self.slot.lock().clone())
    }

    fn persist(&self, state: &NodeState) -> Result<(), StateStoreError> {
        if std::mem::take(&mut *self.fail_next_persist.lock()) {
            return Err(StateStoreError::Io(io::Error::new(
                io::ErrorKind::Other,
                "injected persist failure",
            )));
        }
        *self.slot.lock() = Some(state.clone());
        Ok(())
    }
}

/// Pretty JSON in `<dir>/node-state.json`, replaced atomically on every persist.
#[derive(Debug)]
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(STATE_FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl NodeStateStore for FileStateStore {
    fn load(&self) -> Result<Option<NodeState>, StateStoreError> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(StateStoreError::Io(err)),
        }
    }

    fn persist(&self, state: &NodeState) -> Result<(), StateStoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let tmp_path = self.path.with_extension("tmp");
        let mut tmp_file = fs::File::create(&tmp_path)?;
        let payload = serde_json::to_vec_pretty(state)?;
        tmp_file.write_all(&payload)?;
        tmp_file.sync_all()?;
        fs::rename(tmp_path, &self.path)?;
        Ok(())
    }
}
