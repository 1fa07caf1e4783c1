//! Bucket session / 存储桶会话
//!
//! One session per bucket connection: path factory, listing facade, open
//! channel bookkeeping and lifecycle. The session is a cheap-clone handle;
//! all shared state lives behind one `Arc`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::attrs::FileAttributes;
use crate::channel::{ChannelCore, RangeChannel, DEFAULT_BUFFER_SIZE};
use crate::error::{FsError, Result};
use crate::listing::ListScanner;
use crate::path::BucketPath;
use crate::registry::RegistryInner;
use crate::store::ObjectStore;

/// Session configuration / 会话配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Connection scheme / 连接协议名
    #[serde(default = "default_scheme")]
    pub scheme: String,
    /// Bucket base address, no trailing separator / 存储桶基础地址
    pub address: String,
    /// Path separator, doubles as the listing delimiter / 路径分隔符
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
    /// Channel skip window in bytes / 通道缓冲大小（字节）
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

fn default_scheme() -> String {
    "s3".to_string()
}

fn default_delimiter() -> String {
    "/".to_string()
}

fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

impl SessionConfig {
    pub fn new(scheme: &str, address: &str) -> Self {
        Self {
            scheme: scheme.to_string(),
            address: address.to_string(),
            delimiter: default_delimiter(),
            buffer_size: default_buffer_size(),
        }
    }

    /// Build from a JSON value / 从 JSON 配置构造
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value(value)
            .map_err(|e| FsError::InvalidArgument(format!("bad session config: {}", e)))
    }

    /// Parse a `scheme:address[?options]` connection identifier / 解析连接标识
    ///
    /// Recognized options: `delimiter` and `buffer-size`. Unknown options
    /// are ignored with a warning.
    pub fn parse(conn: &str) -> Result<Self> {
        let (scheme, rest) = conn.split_once(':').ok_or_else(|| {
            FsError::InvalidArgument(format!(
                "connection identifier {:?} is not of the form scheme:address",
                conn
            ))
        })?;
        if scheme.is_empty() {
            return Err(FsError::InvalidArgument(format!(
                "connection identifier {:?} has an empty scheme",
                conn
            )));
        }
        let (address, query) = rest.split_once('?').unwrap_or((rest, ""));
        if address.is_empty() {
            return Err(FsError::InvalidArgument(format!(
                "connection identifier {:?} has an empty address",
                conn
            )));
        }
        let mut config = Self::new(scheme, address);
        for pair in query.split('&').filter(|pair| !pair.is_empty()) {
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                FsError::InvalidArgument(format!("malformed connection option {:?}", pair))
            })?;
            let value = urlencoding::decode(value)
                .map_err(|e| {
                    FsError::InvalidArgument(format!("malformed connection option {:?}: {}", pair, e))
                })?
                .into_owned();
            match key {
                "delimiter" => config.delimiter = value,
                "buffer-size" => {
                    config.buffer_size = value.parse().map_err(|_| {
                        FsError::InvalidArgument(format!("bad buffer-size value {:?}", value))
                    })?;
                }
                other => {
                    tracing::warn!("ignoring unknown connection option: {}", other);
                }
            }
        }
        Ok(config)
    }

    /// Canonical registry key; options do not participate / 注册表键
    pub fn key(&self) -> String {
        format!("{}:{}", self.scheme, self.address)
    }
}

/// Shared session state / 会话共享状态
pub(crate) struct FsInner {
    pub(crate) scheme: String,
    pub(crate) address: String,
    pub(crate) separator: String,
    pub(crate) buffer_size: usize,
    pub(crate) store: ObjectStore,
    pub(crate) closed: AtomicBool,
    /// Open channels, tracked only for the close cascade / 打开的通道集合
    pub(crate) channels: Mutex<Vec<Weak<ChannelCore>>>,
    /// Built on first listing, reused for the session lifetime / 惰性扫描器
    pub(crate) scanner: OnceCell<ListScanner>,
    pub(crate) registry: OnceCell<(Weak<RegistryInner>, String)>,
}

impl FsInner {
    pub(crate) fn remove_channel(&self, core: &Arc<ChannelCore>) {
        let target = Arc::downgrade(core);
        self.channels.lock().retain(|weak| !weak.ptr_eq(&target));
    }
}

/// Read-only filesystem over one bucket / 针对单个存储桶的只读文件系统
#[derive(Clone)]
pub struct BucketFs {
    inner: Arc<FsInner>,
}

impl BucketFs {
    /// Open a session over the given capability pair / 基于能力对打开会话
    pub fn open_store(config: SessionConfig, store: ObjectStore) -> Result<BucketFs> {
        if config.address.is_empty() {
            return Err(FsError::InvalidArgument("address is empty".to_string()));
        }
        if config.scheme.is_empty() {
            return Err(FsError::InvalidArgument("scheme is empty".to_string()));
        }
        if config.delimiter.is_empty() {
            return Err(FsError::InvalidArgument("delimiter is empty".to_string()));
        }
        Ok(BucketFs {
            inner: Arc::new(FsInner {
                scheme: config.scheme,
                address: config.address,
                separator: config.delimiter,
                buffer_size: config.buffer_size,
                store,
                closed: AtomicBool::new(false),
                channels: Mutex::new(Vec::new()),
                scanner: OnceCell::new(),
                registry: OnceCell::new(),
            }),
        })
    }

    /// Open from a `scheme:address[?options]` identifier / 按连接标识打开
    pub fn connect(conn: &str, store: ObjectStore) -> Result<BucketFs> {
        Self::open_store(SessionConfig::parse(conn)?, store)
    }

    pub(crate) fn from_inner(inner: Arc<FsInner>) -> Self {
        BucketFs { inner }
    }

    pub(crate) fn attach_registry(&self, registry: Weak<RegistryInner>, key: String) {
        let _ = self.inner.registry.set((registry, key));
    }

    pub fn scheme(&self) -> &str {
        &self.inner.scheme
    }

    pub fn address(&self) -> &str {
        &self.inner.address
    }

    pub fn separator(&self) -> &str {
        &self.inner.separator
    }

    /// Always true; every mutating operation is unsupported / 恒为只读
    pub fn is_read_only(&self) -> bool {
        true
    }

    pub fn is_open(&self) -> bool {
        !self.inner.closed.load(Ordering::SeqCst)
    }

    fn assert_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(FsError::ClosedFileSystem)
        }
    }

    fn assert_same_session(&self, path: &BucketPath) -> Result<()> {
        if Arc::ptr_eq(path.fs(), &self.inner) {
            Ok(())
        } else {
            Err(FsError::InvalidArgument(
                "path belongs to a different file system".to_string(),
            ))
        }
    }

    /// The root path / 根路径
    pub fn root(&self) -> BucketPath {
        BucketPath::root_of(&self.inner)
    }

    /// The empty path / 空路径
    pub fn empty_path(&self) -> BucketPath {
        BucketPath::empty_of(&self.inner)
    }

    /// Join the pieces with the separator and parse / 拼接并解析路径
    pub fn get_path(&self, first: &str, more: &[&str]) -> Result<BucketPath> {
        self.assert_open()?;
        let mut raw = first.to_string();
        if !more.is_empty() {
            let separator = self.inner.separator.as_str();
            raw.push_str(separator);
            raw.push_str(&more.join(separator));
        }
        Ok(BucketPath::parse(&self.inner, &raw))
    }

    /// Open a read channel on a file path / 打开文件读取通道
    ///
    /// The path must be absolute and must not be a directory. The channel
    /// is tracked by the session and closed with it.
    pub async fn open(&self, path: &BucketPath) -> Result<RangeChannel> {
        self.assert_open()?;
        self.assert_same_session(path)?;
        if path.is_directory() {
            return Err(FsError::InvalidArgument(format!(
                "cannot open directory {} for reading",
                path
            )));
        }
        if !path.is_absolute() {
            return Err(FsError::InvalidArgument(format!(
                "cannot open relative path {}",
                path
            )));
        }
        let channel = RangeChannel::open(
            self.inner.store.objects.clone(),
            path.location(),
            self.inner.buffer_size,
            Arc::downgrade(&self.inner),
        )
        .await?;
        self.inner.channels.lock().push(Arc::downgrade(channel.core()));
        Ok(channel)
    }

    /// List the immediate children of a directory path / 列出目录直接子项
    ///
    /// Listings are never cached; every call re-runs the protocol.
    pub async fn list(&self, dir: &BucketPath) -> Result<Vec<BucketPath>> {
        self.list_with(dir, |_| Ok(true)).await
    }

    /// List with a filter predicate / 带过滤条件的列表
    ///
    /// A predicate failure excludes the entry instead of failing the call.
    pub async fn list_with<F>(&self, dir: &BucketPath, filter: F) -> Result<Vec<BucketPath>>
    where
        F: Fn(&BucketPath) -> Result<bool>,
    {
        self.assert_open()?;
        self.assert_same_session(dir)?;
        let dir = dir.to_absolute()?;
        let separator = self.inner.separator.as_str();
        let prefix = dir.to_string()[separator.len()..].to_string();
        let scanner = self
            .inner
            .scanner
            .get_or_init(|| ListScanner::new(self.inner.store.listing.clone()));
        let items = scanner
            .scan(&self.inner.address, &prefix, separator)
            .await?;
        let mut paths = Vec::with_capacity(items.len());
        for item in items {
            let path = BucketPath::from_item(&self.inner, item);
            match filter(&path) {
                Ok(true) => paths.push(path),
                Ok(false) => {}
                Err(e) => {
                    tracing::debug!("listing filter dropped {}: {}", path, e);
                }
            }
        }
        Ok(paths)
    }

    /// Directory entries directly under the root / 根目录下的目录
    pub async fn root_directories(&self) -> Result<Vec<BucketPath>> {
        self.list_with(&self.root(), |path| Ok(path.is_directory())).await
    }

    /// Attributes of a path, fetched once and cached on the path / 读取属性
    ///
    /// Directories synthesize a record locally; files issue one un-ranged
    /// object fetch for the content-length and last-modified headers.
    pub async fn read_attributes(&self, path: &BucketPath) -> Result<FileAttributes> {
        self.assert_open()?;
        self.assert_same_session(path)?;
        if let Some(attrs) = path.attributes() {
            return Ok(attrs.clone());
        }
        if !path.is_absolute() {
            return Err(FsError::InvalidArgument(format!(
                "relative path {} has no attributes",
                path
            )));
        }
        let attrs = if path.is_directory() {
            let separator = self.inner.separator.as_str();
            FileAttributes::new_dir(path.to_string()[separator.len()..].to_string())
        } else {
            let response = self
                .inner
                .store
                .objects
                .fetch(&path.location(), None)
                .await?;
            FileAttributes::new_file(path.to_string(), response.length, response.last_modified)
        };
        Ok(path.attrs_cell().get_or_init(|| attrs).clone())
    }

    /// Close the session and every channel it opened / 关闭会话
    ///
    /// Idempotent. Channel close failures are logged and skipped so the
    /// rest of the set still gets closed; afterwards the session removes
    /// itself from its registry, if any.
    pub async fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let snapshot: Vec<Weak<ChannelCore>> = {
            let mut channels = self.inner.channels.lock();
            channels.drain(..).collect()
        };
        for weak in snapshot {
            if let Some(core) = weak.upgrade() {
                if let Err(e) = core.shutdown().await {
                    tracing::warn!("closing channel failed: {}", e);
                }
            }
        }
        if let Some((registry, key)) = self.inner.registry.get() {
            if let Some(registry) = registry.upgrade() {
                registry.remove_session(key);
            }
        }
        tracing::info!(
            "file system closed: {}:{}",
            self.inner.scheme,
            self.inner.address
        );
        Ok(())
    }

    /// 只读文件系统，所有修改操作均不支持
    pub async fn create_dir(&self, _dir: &BucketPath) -> Result<()> {
        Err(FsError::Unsupported("create_dir on a read-only file system"))
    }

    pub async fn delete(&self, _path: &BucketPath) -> Result<()> {
        Err(FsError::Unsupported("delete on a read-only file system"))
    }

    pub async fn move_item(&self, _from: &BucketPath, _to: &BucketPath) -> Result<()> {
        Err(FsError::Unsupported("move on a read-only file system"))
    }

    pub async fn copy_item(&self, _from: &BucketPath, _to: &BucketPath) -> Result<()> {
        Err(FsError::Unsupported("copy on a read-only file system"))
    }

    pub async fn set_attributes(&self, _path: &BucketPath, _attrs: FileAttributes) -> Result<()> {
        Err(FsError::Unsupported(
            "attribute update on a read-only file system",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MemoryStore;

    fn fs_over(store: &Arc<MemoryStore>) -> BucketFs {
        BucketFs::open_store(
            SessionConfig::new("test", store.address()),
            store.store(),
        )
        .unwrap()
    }

    fn seeded_store() -> Arc<MemoryStore> {
        let store = MemoryStore::new("http://bucket.test");
        store.insert("a/x", b"xx".to_vec());
        store.insert("a/y", b"yyyy".to_vec());
        store.insert("b", b"bbb".to_vec());
        store
    }

    #[tokio::test]
    async fn test_list_groups_keys_by_delimiter() {
        let store = seeded_store();
        let fs = fs_over(&store);

        let mut names: Vec<String> = fs
            .list(&fs.root())
            .await
            .unwrap()
            .iter()
            .map(|path| path.to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec!["/a/", "/b"]);

        let children = fs.list(&fs.get_path("/a/", &[]).unwrap()).await.unwrap();
        let names: Vec<String> = children.iter().map(|path| path.to_string()).collect();
        assert_eq!(names, vec!["/a/x", "/a/y"]);
        assert!(children.iter().all(|path| !path.is_directory()));
        assert_eq!(
            children[0].attributes().unwrap().size(),
            Some(2),
        );
    }

    #[tokio::test]
    async fn test_paginated_listing_matches_single_page() {
        let store = seeded_store();
        let fs = fs_over(&store);
        let single: Vec<String> = fs
            .list(&fs.root())
            .await
            .unwrap()
            .iter()
            .map(|p| p.to_string())
            .collect();
        assert_eq!(store.list_calls(), 1);

        let paged_store = seeded_store();
        paged_store.set_page_size(1);
        let paged_fs = fs_over(&paged_store);
        let paged: Vec<String> = paged_fs
            .list(&paged_fs.root())
            .await
            .unwrap()
            .iter()
            .map(|p| p.to_string())
            .collect();
        assert_eq!(paged, single);
        assert_eq!(paged_store.list_calls(), 2);
    }

    #[tokio::test]
    async fn test_list_filter_failure_excludes_entry() {
        let store = seeded_store();
        let fs = fs_over(&store);
        let paths = fs
            .list_with(&fs.root(), |path| {
                if path.to_string() == "/b" {
                    Err(FsError::InvalidArgument("boom".to_string()))
                } else {
                    Ok(true)
                }
            })
            .await
            .unwrap();
        let names: Vec<String> = paths.iter().map(|p| p.to_string()).collect();
        assert_eq!(names, vec!["/a/"]);
    }

    #[tokio::test]
    async fn test_root_directories() {
        let store = seeded_store();
        let fs = fs_over(&store);
        let dirs = fs.root_directories().await.unwrap();
        let names: Vec<String> = dirs.iter().map(|p| p.to_string()).collect();
        assert_eq!(names, vec!["/a/"]);
    }

    #[tokio::test]
    async fn test_open_rejects_directories_and_relative_paths() {
        let store = seeded_store();
        let fs = fs_over(&store);
        let dir = fs.get_path("/a/", &[]).unwrap();
        assert!(matches!(
            fs.open(&dir).await,
            Err(FsError::InvalidArgument(_))
        ));
        let relative = fs.get_path("b", &[]).unwrap();
        assert!(matches!(
            fs.open(&relative).await,
            Err(FsError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_open_reads_object_bytes() -> anyhow::Result<()> {
        let store = seeded_store();
        let fs = fs_over(&store);
        let path = fs.get_path("/a", &["y"])?;
        let channel = fs.open(&path).await?;
        assert_eq!(channel.size(), 4);
        let mut buf = [0u8; 4];
        channel.read_exact(&mut buf).await?;
        assert_eq!(&buf, b"yyyy");
        channel.close().await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_close_cascades_to_channels() {
        crate::testutil::init_tracing();
        let store = seeded_store();
        let fs = fs_over(&store);
        let first = fs.open(&fs.get_path("/a/x", &[]).unwrap()).await.unwrap();
        let second = fs.open(&fs.get_path("/b", &[]).unwrap()).await.unwrap();
        assert!(fs.is_open());

        fs.close().await.unwrap();
        assert!(!fs.is_open());
        assert!(!first.is_open());
        assert!(!second.is_open());

        // idempotent
        fs.close().await.unwrap();

        assert!(matches!(fs.list(&fs.root()).await, Err(FsError::ClosedFileSystem)));
        assert!(matches!(
            fs.get_path("/a", &[]),
            Err(FsError::ClosedFileSystem)
        ));
    }

    #[tokio::test]
    async fn test_channel_close_unregisters_from_session() {
        let store = seeded_store();
        let fs = fs_over(&store);
        let channel = fs.open(&fs.get_path("/b", &[]).unwrap()).await.unwrap();
        channel.close().await.unwrap();
        // 会话关闭时已没有可关闭的通道
        fs.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_read_attributes_of_file_and_directory() {
        let store = seeded_store();
        let fs = fs_over(&store);

        let file = fs.get_path("/b", &[]).unwrap();
        let attrs = fs.read_attributes(&file).await.unwrap();
        assert!(attrs.is_regular_file());
        assert_eq!(attrs.size(), Some(3));
        assert_eq!(store.fetch_calls(), 1);

        // second read comes from the path's cell
        fs.read_attributes(&file).await.unwrap();
        assert_eq!(store.fetch_calls(), 1);

        let dir = fs.get_path("/a/", &[]).unwrap();
        let attrs = fs.read_attributes(&dir).await.unwrap();
        assert!(attrs.is_directory());
        assert_eq!(attrs.file_key(), "a/");
        assert_eq!(store.fetch_calls(), 1);
    }

    #[tokio::test]
    async fn test_listing_paths_carry_attributes() {
        let store = seeded_store();
        let fs = fs_over(&store);
        let paths = fs.list(&fs.get_path("/a/", &[]).unwrap()).await.unwrap();
        let attrs = fs.read_attributes(&paths[0]).await.unwrap();
        assert_eq!(attrs.size(), Some(2));
        // attributes came with the listing, no object fetch happened
        assert_eq!(store.fetch_calls(), 0);
    }

    #[tokio::test]
    async fn test_foreign_path_rejected() {
        let store = seeded_store();
        let fs = fs_over(&store);
        let other = fs_over(&store);
        let foreign = other.get_path("/b", &[]).unwrap();
        assert!(matches!(
            fs.open(&foreign).await,
            Err(FsError::InvalidArgument(_))
        ));
        assert!(matches!(
            fs.list(&other.root()).await,
            Err(FsError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_mutating_operations_unsupported() {
        let store = seeded_store();
        let fs = fs_over(&store);
        assert!(fs.is_read_only());
        let path = fs.get_path("/b", &[]).unwrap();
        assert!(matches!(
            fs.create_dir(&path).await,
            Err(FsError::Unsupported(_))
        ));
        assert!(matches!(fs.delete(&path).await, Err(FsError::Unsupported(_))));
        assert!(matches!(
            fs.move_item(&path, &path).await,
            Err(FsError::Unsupported(_))
        ));
        assert!(matches!(
            fs.copy_item(&path, &path).await,
            Err(FsError::Unsupported(_))
        ));
    }

    #[test]
    fn test_config_parse_connection_identifier() {
        let config = SessionConfig::parse("s3:https://demo.s3.eu-west-1.amazonaws.com").unwrap();
        assert_eq!(config.scheme, "s3");
        assert_eq!(config.address, "https://demo.s3.eu-west-1.amazonaws.com");
        assert_eq!(config.delimiter, "/");
        assert_eq!(config.buffer_size, DEFAULT_BUFFER_SIZE);
        assert_eq!(config.key(), "s3:https://demo.s3.eu-west-1.amazonaws.com");

        let config =
            SessionConfig::parse("s3:http://localhost:9000/demo?delimiter=%7C&buffer-size=1024")
                .unwrap();
        assert_eq!(config.delimiter, "|");
        assert_eq!(config.buffer_size, 1024);
        // options are not part of the identity
        assert_eq!(config.key(), "s3:http://localhost:9000/demo");
    }

    #[test]
    fn test_config_parse_rejects_malformed_identifiers() {
        assert!(matches!(
            SessionConfig::parse("no-scheme-or-address"),
            Err(FsError::InvalidArgument(_))
        ));
        assert!(matches!(
            SessionConfig::parse(":address"),
            Err(FsError::InvalidArgument(_))
        ));
        assert!(matches!(
            SessionConfig::parse("s3:"),
            Err(FsError::InvalidArgument(_))
        ));
        assert!(matches!(
            SessionConfig::parse("s3:addr?buffer-size=lots"),
            Err(FsError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_config_from_value() {
        let config = SessionConfig::from_value(serde_json::json!({
            "address": "http://localhost:9000/demo",
            "delimiter": "|",
        }))
        .unwrap();
        assert_eq!(config.scheme, "s3");
        assert_eq!(config.delimiter, "|");
        assert_eq!(config.buffer_size, DEFAULT_BUFFER_SIZE);

        assert!(matches!(
            SessionConfig::from_value(serde_json::json!({ "delimiter": "/" })),
            Err(FsError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_custom_delimiter_listing() {
        let store = MemoryStore::new("http://bucket.test");
        store.insert("a|x", b"1".to_vec());
        store.insert("b", b"2".to_vec());
        let fs = BucketFs::connect(
            &format!("test:{}?delimiter=%7C", store.address()),
            store.store(),
        )
        .unwrap();
        assert_eq!(fs.separator(), "|");
        let mut names: Vec<String> = fs
            .list(&fs.root())
            .await
            .unwrap()
            .iter()
            .map(|p| p.to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec!["|a|", "|b"]);
    }
}
