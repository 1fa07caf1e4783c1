//! Backend capability pair / 后端能力接口
//!
//! A session never talks to the wire directly. It is handed two
//! capabilities at construction time: one that fetches listing pages and
//! one that fetches object bytes. The HTTP implementation below covers any
//! S3-compatible endpoint; tests substitute an in-memory store.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use reqwest::Client;

use crate::error::{FsError, Result};

/// Inclusive byte range of a ranged object fetch / 对象读取的闭区间字节范围
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Render as a Range header value / 生成 Range 请求头的值
    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

/// One chunk-at-a-time object body / 按块读取的对象响应体
///
/// `None` marks the orderly end of the body. Dropping the value releases
/// the underlying connection.
#[async_trait]
pub trait ObjectBody: Send {
    async fn chunk(&mut self) -> Result<Option<Bytes>>;
}

/// Decoded header part of an object fetch / 对象读取响应的头部信息
pub struct ObjectResponse {
    /// Content length reported by the store / 存储端报告的内容长度
    pub length: Option<u64>,
    /// Raw last-modified header value, if any / 原始 Last-Modified 头
    pub last_modified: Option<String>,
    pub body: Box<dyn ObjectBody>,
}

/// Fetches one listing page / 获取单页列表响应
#[async_trait]
pub trait ListingFetcher: Send + Sync {
    /// GET the given listing URL and return the whole response body.
    async fn fetch_page(&self, url: &str) -> Result<Bytes>;
}

/// Fetches object bytes, optionally ranged / 获取对象字节（可带范围）
#[async_trait]
pub trait ObjectFetcher: Send + Sync {
    /// GET the object at `url`. A non-2xx status is a failure, never an
    /// empty body.
    async fn fetch(&self, url: &str, range: Option<ByteRange>) -> Result<ObjectResponse>;
}

/// The capability pair a session is built from / 会话依赖的能力对
#[derive(Clone)]
pub struct ObjectStore {
    pub listing: Arc<dyn ListingFetcher>,
    pub objects: Arc<dyn ObjectFetcher>,
}

impl ObjectStore {
    /// Both capabilities backed by one HTTP client / 两个能力共用一个 HTTP 客户端
    pub fn http() -> Self {
        let store = Arc::new(HttpObjectStore::new());
        ObjectStore {
            listing: store.clone(),
            objects: store,
        }
    }
}

/// HTTP implementation over an S3-compatible endpoint / 基于 HTTP 的实现
pub struct HttpObjectStore {
    client: Client,
}

impl HttpObjectStore {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

impl Default for HttpObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ListingFetcher for HttpObjectStore {
    async fn fetch_page(&self, url: &str) -> Result<Bytes> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FsError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response.bytes().await?)
    }
}

#[async_trait]
impl ObjectFetcher for HttpObjectStore {
    async fn fetch(&self, url: &str, range: Option<ByteRange>) -> Result<ObjectResponse> {
        let mut request = self.client.get(url);
        if let Some(range) = range {
            request = request.header(reqwest::header::RANGE, range.header_value());
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FsError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let length = response.content_length();
        let last_modified = response
            .headers()
            .get(reqwest::header::LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());
        tracing::debug!("object fetch: url={} status={} length={:?}", url, status, length);
        Ok(ObjectResponse {
            length,
            last_modified,
            body: Box::new(HttpBody {
                stream: Box::pin(response.bytes_stream()),
            }),
        })
    }
}

struct HttpBody {
    stream: std::pin::Pin<
        Box<dyn futures::Stream<Item = std::result::Result<Bytes, reqwest::Error>> + Send>,
    >,
}

#[async_trait]
impl ObjectBody for HttpBody {
    async fn chunk(&mut self) -> Result<Option<Bytes>> {
        match self.stream.next().await {
            Some(Ok(bytes)) => Ok(Some(bytes)),
            Some(Err(e)) => Err(e.into()),
            None => Ok(None),
        }
    }
}
