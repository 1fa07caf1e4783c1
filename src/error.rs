//! Crate error types / 错误类型定义
//!
//! One enum for the whole filesystem surface. Transport and XML decode
//! errors convert via `From`; everything else is constructed at the point
//! of failure.

use thiserror::Error;

/// Crate result alias / 统一 Result 别名
pub type Result<T> = std::result::Result<T, FsError>;

/// Filesystem error / 文件系统错误
#[derive(Debug, Error)]
pub enum FsError {
    /// Malformed argument to a path or channel operation / 参数错误
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// No session registered under this connection identifier / 连接未注册
    #[error("no file system registered for {0}")]
    NotFound(String),

    /// A session is already registered under this connection identifier / 连接已注册
    #[error("file system already registered for {0}")]
    AlreadyExists(String),

    /// Non-2xx response from the store / 存储端返回非 2xx 状态
    #[error("{url}: response code {status}")]
    Status { url: String, status: u16 },

    /// The opening response carried no usable content length / 响应缺少内容长度
    #[error("{0}: response has no content length")]
    MissingLength(String),

    /// The byte source ended before the requested count was delivered / 流提前结束
    #[error("{0}: unexpected end of stream")]
    EndOfStream(String),

    /// Read-only filesystem, or a capability this provider does not have / 不支持的操作
    #[error("operation not supported: {0}")]
    Unsupported(&'static str),

    /// Use of a channel after close / 通道已关闭
    #[error("channel is closed")]
    ClosedChannel,

    /// Use of a session after close / 文件系统已关闭
    #[error("file system is closed")]
    ClosedFileSystem,

    /// Listing response that does not decode / 列表响应解码失败
    #[error("malformed listing response: {0}")]
    Decode(String),

    #[error("malformed listing response: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}
