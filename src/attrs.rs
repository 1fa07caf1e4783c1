//! Basic file attributes / 基础文件属性
//!
//! Attribute records come from three places: listing items, the headers of
//! an object fetch, and local synthesis for directories. The raw
//! last-modified string is kept as delivered and only parsed on demand.

use chrono::{DateTime, NaiveDateTime, Utc};
use once_cell::sync::OnceCell;

/// Sentinel for a timestamp that is missing or does not parse / 未知时间戳
pub const UNKNOWN_TIME: DateTime<Utc> = DateTime::<Utc>::UNIX_EPOCH;

/// Millisecond ISO format used by listing responses / 列表响应使用的时间格式
const LISTING_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// Attribute record of one file or directory entry / 单个条目的属性记录
#[derive(Debug, Clone)]
pub struct FileAttributes {
    file_key: String,
    directory: bool,
    size: Option<u64>,
    last_modified: Option<String>,
    modified_time: OnceCell<DateTime<Utc>>,
}

impl FileAttributes {
    /// Attributes of a regular file / 普通文件属性
    pub fn new_file(
        file_key: impl Into<String>,
        size: Option<u64>,
        last_modified: Option<String>,
    ) -> Self {
        Self {
            file_key: file_key.into(),
            directory: false,
            size,
            last_modified,
            modified_time: OnceCell::new(),
        }
    }

    /// Attributes of a virtual directory / 虚拟目录属性
    pub fn new_dir(prefix: impl Into<String>) -> Self {
        Self {
            file_key: prefix.into(),
            directory: true,
            size: None,
            last_modified: None,
            modified_time: OnceCell::new(),
        }
    }

    /// Attributes of the empty path, neither file nor directory / 空路径属性
    pub fn empty() -> Self {
        Self {
            file_key: String::new(),
            directory: false,
            size: None,
            last_modified: None,
            modified_time: OnceCell::new(),
        }
    }

    pub fn file_key(&self) -> &str {
        &self.file_key
    }

    pub fn is_directory(&self) -> bool {
        self.directory
    }

    pub fn is_regular_file(&self) -> bool {
        !self.directory && self.size.is_some()
    }

    /// Size in bytes; directories carry none / 字节大小（目录无大小）
    pub fn size(&self) -> Option<u64> {
        self.size
    }

    /// Raw provider timestamp string / 原始时间戳字符串
    pub fn last_modified_raw(&self) -> Option<&str> {
        self.last_modified.as_deref()
    }

    /// Parsed modification time, cached after the first call / 解析后的修改时间
    ///
    /// A missing or malformed timestamp yields [`UNKNOWN_TIME`], never an
    /// error.
    pub fn last_modified_time(&self) -> DateTime<Utc> {
        *self.modified_time.get_or_init(|| {
            self.last_modified
                .as_deref()
                .and_then(parse_timestamp)
                .unwrap_or(UNKNOWN_TIME)
        })
    }
}

/// Listing responses use millisecond ISO, HTTP headers use RFC 2822.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, LISTING_TIME_FORMAT) {
        return Some(naive.and_utc());
    }
    DateTime::parse_from_rfc2822(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}
