//! Connection registry / 连接注册表
//!
//! An explicitly owned map from connection identifier to session. Whoever
//! creates sessions holds the registry; there is no process-wide state.
//! Sessions unregister themselves when closed.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{FsError, Result};
use crate::session::{BucketFs, SessionConfig};
use crate::store::ObjectStore;

pub(crate) struct RegistryInner {
    sessions: RwLock<HashMap<String, BucketFs>>,
}

impl RegistryInner {
    pub(crate) fn remove_session(&self, key: &str) {
        if self.sessions.write().remove(key).is_some() {
            tracing::info!("file system unregistered: {}", key);
        }
    }
}

/// Registry of live bucket sessions / 存活会话注册表
#[derive(Clone)]
pub struct FsRegistry {
    inner: Arc<RegistryInner>,
}

impl FsRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                sessions: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Create and register a session / 创建并注册会话
    ///
    /// The identifier is `scheme:address[?options]`; the canonical
    /// `scheme:address` part is the registry key. Registering a key twice
    /// is an error.
    pub fn create(&self, conn: &str, store: ObjectStore) -> Result<BucketFs> {
        let config = SessionConfig::parse(conn)?;
        let key = config.key();
        let mut sessions = self.inner.sessions.write();
        if sessions.contains_key(&key) {
            return Err(FsError::AlreadyExists(key));
        }
        let fs = BucketFs::open_store(config, store)?;
        fs.attach_registry(Arc::downgrade(&self.inner), key.clone());
        sessions.insert(key.clone(), fs.clone());
        tracing::info!("file system registered: {}", key);
        Ok(fs)
    }

    /// Look up a registered session / 查找已注册会话
    pub fn lookup(&self, conn: &str) -> Result<BucketFs> {
        let key = SessionConfig::parse(conn)?.key();
        self.inner
            .sessions
            .read()
            .get(&key)
            .cloned()
            .ok_or(FsError::NotFound(key))
    }

    /// Unregister without closing / 仅注销，不关闭
    ///
    /// The session itself stays usable; closing a session also
    /// unregisters it.
    pub fn remove(&self, conn: &str) -> Result<BucketFs> {
        let key = SessionConfig::parse(conn)?.key();
        self.inner
            .sessions
            .write()
            .remove(&key)
            .ok_or(FsError::NotFound(key))
    }

    pub fn len(&self) -> usize {
        self.inner.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for FsRegistry {
    fn default() -> Self {
        Self::new()
    }
}
