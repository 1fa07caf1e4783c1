//! In-memory object store for tests / 测试用内存对象存储
//!
//! Renders real paginated ListBucketResult pages from a sorted key map and
//! serves ranged object reads in small chunks, counting calls so tests can
//! observe connection behavior.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;

use crate::error::{FsError, Result};
use crate::session::{BucketFs, SessionConfig};
use crate::store::{ByteRange, ListingFetcher, ObjectBody, ObjectFetcher, ObjectResponse, ObjectStore};

const LISTING_TIMESTAMP: &str = "2018-05-22T13:45:12.000Z";
const HEADER_TIMESTAMP: &str = "Tue, 22 May 2018 13:45:12 GMT";

/// Install a log subscriber once so `RUST_LOG=debug` works under tests.
pub(crate) fn init_tracing() {
    use once_cell::sync::OnceCell;
    static INIT: OnceCell<()> = OnceCell::new();
    INIT.get_or_init(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}

/// A session over an empty in-memory bucket.
pub(crate) fn empty_fs() -> BucketFs {
    let store = MemoryStore::new("http://bucket.test");
    BucketFs::open_store(SessionConfig::new("test", "http://bucket.test"), store.store()).unwrap()
}

pub(crate) struct MemoryStore {
    address: String,
    objects: RwLock<BTreeMap<String, Bytes>>,
    page_size: AtomicUsize,
    chunk_size: usize,
    list_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
    ranged_fetches: AtomicUsize,
}

impl MemoryStore {
    pub(crate) fn new(address: &str) -> Arc<Self> {
        Arc::new(Self {
            address: address.to_string(),
            objects: RwLock::new(BTreeMap::new()),
            page_size: AtomicUsize::new(1000),
            // small chunks so read loops see short reads
            chunk_size: 7,
            list_calls: AtomicUsize::new(0),
            fetch_calls: AtomicUsize::new(0),
            ranged_fetches: AtomicUsize::new(0),
        })
    }

    pub(crate) fn address(&self) -> &str {
        &self.address
    }

    pub(crate) fn insert(&self, key: &str, data: Vec<u8>) {
        self.objects.write().insert(key.to_string(), Bytes::from(data));
    }

    pub(crate) fn set_page_size(&self, page_size: usize) {
        self.page_size.store(page_size, Ordering::SeqCst);
    }

    pub(crate) fn store(self: &Arc<Self>) -> ObjectStore {
        ObjectStore {
            listing: self.clone(),
            objects: self.clone(),
        }
    }

    /// Listing page requests served so far.
    pub(crate) fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Object connections opened so far, ranged or not.
    pub(crate) fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn ranged_fetches(&self) -> usize {
        self.ranged_fetches.load(Ordering::SeqCst)
    }
}

enum ListEntry {
    File { key: String, size: usize },
    Dir { prefix: String },
}

#[async_trait]
impl ListingFetcher for MemoryStore {
    async fn fetch_page(&self, url: &str) -> Result<Bytes> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);

        let query = url.split_once('?').map(|(_, q)| q).unwrap_or("");
        let mut prefix = String::new();
        let mut delimiter = String::new();
        let mut token = 0usize;
        for pair in query.split('&').filter(|pair| !pair.is_empty()) {
            let (key, value) = pair.split_once('=').expect("malformed query pair");
            let value = urlencoding::decode(value).expect("bad query encoding").into_owned();
            match key {
                "prefix" => prefix = value,
                "delimiter" => delimiter = value,
                "continuation-token" => token = value.parse().expect("bad continuation token"),
                other => panic!("unexpected query parameter {other}"),
            }
        }

        let objects = self.objects.read();
        let mut entries: Vec<ListEntry> = Vec::new();
        let mut seen = HashSet::new();
        for (key, data) in objects.iter() {
            if !key.starts_with(&prefix) {
                continue;
            }
            let rest = &key[prefix.len()..];
            if !delimiter.is_empty() {
                if let Some(i) = rest.find(&delimiter) {
                    let dir = format!("{}{}{}", prefix, &rest[..i], delimiter);
                    if seen.insert(dir.clone()) {
                        entries.push(ListEntry::Dir { prefix: dir });
                    }
                    continue;
                }
            }
            entries.push(ListEntry::File {
                key: key.clone(),
                size: data.len(),
            });
        }

        let page_size = self.page_size.load(Ordering::SeqCst);
        let end = (token + page_size).min(entries.len());
        let truncated = end < entries.len();

        let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        xml.push_str("<ListBucketResult xmlns=\"http://s3.amazonaws.com/doc/2006-03-01/\">\n");
        xml.push_str("  <Name>memory</Name>\n");
        xml.push_str(&format!("  <Prefix>{}</Prefix>\n", prefix));
        xml.push_str(&format!("  <IsTruncated>{}</IsTruncated>\n", truncated));
        for entry in &entries[token..end] {
            match entry {
                ListEntry::File { key, size } => xml.push_str(&format!(
                    "  <Contents><Key>{}</Key><LastModified>{}</LastModified><Size>{}</Size></Contents>\n",
                    key, LISTING_TIMESTAMP, size
                )),
                ListEntry::Dir { prefix } => xml.push_str(&format!(
                    "  <CommonPrefixes><Prefix>{}</Prefix></CommonPrefixes>\n",
                    prefix
                )),
            }
        }
        if truncated {
            xml.push_str(&format!("  <NextContinuationToken>{}</NextContinuationToken>\n", end));
        }
        xml.push_str("</ListBucketResult>\n");
        Ok(Bytes::from(xml))
    }
}

#[async_trait]
impl ObjectFetcher for MemoryStore {
    async fn fetch(&self, url: &str, range: Option<ByteRange>) -> Result<ObjectResponse> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if range.is_some() {
            self.ranged_fetches.fetch_add(1, Ordering::SeqCst);
        }

        let base = format!("{}/", self.address);
        let data = url
            .strip_prefix(&base)
            .and_then(|key| self.objects.read().get(key).cloned())
            .ok_or_else(|| FsError::Status {
                url: url.to_string(),
                status: 404,
            })?;

        let full_length = data.len() as u64;
        let body = match range {
            None => data,
            Some(range) => {
                if range.start > range.end || range.start >= full_length {
                    return Err(FsError::Status {
                        url: url.to_string(),
                        status: 416,
                    });
                }
                let end = ((range.end + 1).min(full_length)) as usize;
                data.slice(range.start as usize..end)
            }
        };
        let length = body.len() as u64;
        Ok(ObjectResponse {
            length: Some(length),
            last_modified: Some(HEADER_TIMESTAMP.to_string()),
            body: Box::new(MemoryBody {
                data: body,
                chunk_size: self.chunk_size,
            }),
        })
    }
}

struct MemoryBody {
    data: Bytes,
    chunk_size: usize,
}

#[async_trait]
impl ObjectBody for MemoryBody {
    async fn chunk(&mut self) -> Result<Option<Bytes>> {
        if self.data.is_empty() {
            return Ok(None);
        }
        let take = self.chunk_size.min(self.data.len());
        Ok(Some(self.data.split_to(take)))
    }
}
