//! Bucket listing protocol / 存储桶列表协议
//!
//! This module handles:
//! - Query assembly for delimiter-grouped listings / 组装列表查询参数
//! - Cursor-driven pagination over `continuation-token` / 基于续传令牌的分页
//! - Event-stream decoding of ListBucketResult pages / 流式解码响应页
//!
//! Items are returned in wire order. Files and common prefixes are not
//! re-sorted here; any ordering is a property of the listing service.

use std::sync::Arc;

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::{FsError, Result};
use crate::store::ListingFetcher;

/// One listing item / 单个列表条目
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemRef {
    /// An object key with its byte size / 对象条目
    File {
        key: String,
        size: u64,
        last_modified: Option<String>,
    },
    /// A delimiter-grouped common prefix, i.e. a virtual directory / 公共前缀
    Dir { prefix: String },
}

impl ItemRef {
    /// Full key from the bucket root; directory keys end with the
    /// delimiter.
    pub fn key(&self) -> &str {
        match self {
            ItemRef::File { key, .. } => key,
            ItemRef::Dir { prefix } => prefix,
        }
    }

    pub fn is_directory(&self) -> bool {
        matches!(self, ItemRef::Dir { .. })
    }
}

/// Decoded content of one listing page / 解码后的单页内容
pub(crate) struct ListPage {
    pub(crate) items: Vec<ItemRef>,
    pub(crate) truncated: bool,
    pub(crate) next_token: Option<String>,
}

/// Paginated listing of one prefix / 针对单个前缀的分页列表
///
/// One scanner per session, reused across calls. Each `scan` issues its
/// pages strictly in sequence since every continuation token comes out of
/// the previous page.
pub struct ListScanner {
    fetcher: Arc<dyn ListingFetcher>,
}

impl ListScanner {
    pub fn new(fetcher: Arc<dyn ListingFetcher>) -> Self {
        Self { fetcher }
    }

    /// List the immediate children of `prefix` under `address` / 列出直接子项
    ///
    /// Any transport or decode failure aborts the whole call; pages read so
    /// far are discarded.
    pub async fn scan(&self, address: &str, prefix: &str, delimiter: &str) -> Result<Vec<ItemRef>> {
        let mut base = String::new();
        push_param(&mut base, "prefix", prefix);
        push_param(&mut base, "delimiter", delimiter);

        let mut items = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let mut params = base.clone();
            if let Some(token) = &token {
                push_param(&mut params, "continuation-token", token);
            }
            let url = if params.is_empty() {
                address.to_string()
            } else {
                format!("{}?{}", address, params)
            };

            let body = self.fetcher.fetch_page(&url).await?;
            let page = decode_page(&body)?;
            tracing::debug!(
                "listing page: url={} items={} truncated={}",
                url,
                page.items.len(),
                page.truncated
            );
            items.extend(page.items);
            token = page.next_token;
            if !page.truncated {
                break;
            }
        }
        Ok(items)
    }
}

/// Append one query parameter, skipping empty values / 追加查询参数（空值省略）
fn push_param(params: &mut String, name: &str, value: &str) {
    if value.is_empty() {
        return;
    }
    if !params.is_empty() {
        params.push('&');
    }
    params.push_str(name);
    params.push('=');
    params.push_str(&urlencoding::encode(value));
}

/// Decode one ListBucketResult page / 解码单页 ListBucketResult
///
/// Depth-tracked over the event stream: a `Contents` close at depth 1
/// emits a file from the most recently seen key/size/last-modified text, a
/// `Prefix` close at depth 2 under `CommonPrefixes` emits a directory. A
/// malformed `IsTruncated` value decodes as `false`.
pub(crate) fn decode_page(xml: &[u8]) -> Result<ListPage> {
    let mut reader = Reader::from_reader(xml);
    let mut decoder = PageDecoder::default();
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                decoder.open(local_name(e.local_name().as_ref()));
            }
            Event::End(_) => {
                decoder.close()?;
            }
            Event::Empty(e) => {
                // 自闭合元素等价于开标签紧跟闭标签
                decoder.open(local_name(e.local_name().as_ref()));
                decoder.close()?;
            }
            Event::Text(t) => {
                let text = t.unescape()?;
                decoder.text(text.trim())?;
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(ListPage {
        items: decoder.items,
        truncated: decoder.truncated,
        next_token: decoder.next_token,
    })
}

fn local_name(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).into_owned()
}

/// State machine fields hold the most recently seen leaf values; they are
/// deliberately not reset between records.
#[derive(Default)]
struct PageDecoder {
    stack: Vec<String>,
    items: Vec<ItemRef>,
    key: String,
    size: u64,
    last_modified: Option<String>,
    prefix: String,
    truncated: bool,
    next_token: Option<String>,
}

impl PageDecoder {
    fn open(&mut self, name: String) {
        self.stack.push(name);
    }

    fn close(&mut self) -> Result<()> {
        let name = self
            .stack
            .pop()
            .ok_or_else(|| FsError::Decode("unbalanced close tag".to_string()))?;
        if name == "Prefix" && self.stack.len() == 2 && self.stack[1] == "CommonPrefixes" {
            self.items.push(ItemRef::Dir {
                prefix: self.prefix.clone(),
            });
        } else if name == "Contents" && self.stack.len() == 1 {
            self.items.push(ItemRef::File {
                key: self.key.clone(),
                size: self.size,
                last_modified: self.last_modified.clone(),
            });
        }
        Ok(())
    }

    fn text(&mut self, value: &str) -> Result<()> {
        let Some(current) = self.stack.last() else {
            return Ok(());
        };
        match current.as_str() {
            "Key" => self.key = value.to_string(),
            "Size" => {
                self.size = value
                    .parse()
                    .map_err(|_| FsError::Decode(format!("bad size value: {value:?}")))?;
            }
            "LastModified" => self.last_modified = Some(value.to_string()),
            "IsTruncated" => self.truncated = value.eq_ignore_ascii_case("true"),
            "NextContinuationToken" => self.next_token = Some(value.to_string()),
            "Prefix" => self.prefix = value.to_string(),
            _ => {}
        }
        Ok(())
    }
}
