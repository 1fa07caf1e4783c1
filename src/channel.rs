//! Range read channel / 范围读取通道
//!
//! A positionable, read-only byte stream over HTTP range GETs. The size is
//! captured once from the opening response and never re-queried. Small
//! forward seeks are served by reading and discarding bytes on the live
//! connection; everything else closes the connection and reopens it with a
//! Range header.
//!
//! Calls on one channel must be serialized by the caller. The interior
//! mutex keeps the state consistent under the session close cascade, it is
//! not an invitation to share a channel across tasks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use tokio::sync::Mutex;

use crate::error::{FsError, Result};
use crate::session::FsInner;
use crate::store::{ByteRange, ObjectBody, ObjectFetcher};

/// Default skip window, also the skip-vs-reconnect threshold / 默认缓冲大小
pub const DEFAULT_BUFFER_SIZE: usize = 16 * 1024;

/// Read-only seekable channel over one object / 针对单个对象的可定位只读通道
pub struct RangeChannel {
    core: Arc<ChannelCore>,
}

pub(crate) struct ChannelCore {
    url: String,
    size: u64,
    buffer_size: usize,
    objects: Arc<dyn ObjectFetcher>,
    session: Weak<FsInner>,
    open: AtomicBool,
    state: Mutex<ChannelState>,
}

struct ChannelState {
    position: u64,
    body: Option<Box<dyn ObjectBody>>,
    /// Leftover of the last chunk taken from the body / 上个数据块的剩余部分
    pending: Bytes,
}

impl RangeChannel {
    /// Open with an initial un-ranged GET to learn the object size / 打开通道
    pub(crate) async fn open(
        objects: Arc<dyn ObjectFetcher>,
        url: String,
        buffer_size: usize,
        session: Weak<FsInner>,
    ) -> Result<RangeChannel> {
        let response = objects.fetch(&url, None).await?;
        let size = response
            .length
            .ok_or_else(|| FsError::MissingLength(url.clone()))?;
        tracing::debug!("channel opened: url={} size={}", url, size);
        let core = Arc::new(ChannelCore {
            url,
            size,
            buffer_size,
            objects,
            session,
            open: AtomicBool::new(true),
            state: Mutex::new(ChannelState {
                position: 0,
                body: Some(response.body),
                pending: Bytes::new(),
            }),
        });
        Ok(RangeChannel { core })
    }

    pub(crate) fn core(&self) -> &Arc<ChannelCore> {
        &self.core
    }

    /// Object size captured at open time / 打开时确定的对象大小
    pub fn size(&self) -> u64 {
        self.core.size
    }

    pub fn url(&self) -> &str {
        &self.core.url
    }

    pub fn is_open(&self) -> bool {
        self.core.open.load(Ordering::SeqCst)
    }

    fn assert_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(FsError::ClosedChannel)
        }
    }

    /// Current cursor / 当前位置
    pub async fn position(&self) -> Result<u64> {
        self.assert_open()?;
        Ok(self.core.state.lock().await.position)
    }

    /// Move the cursor / 移动位置
    ///
    /// A forward move smaller than the buffer size discards bytes on the
    /// live connection; any other move drops the connection and issues a
    /// fresh ranged GET. Positions past the size are rejected.
    pub async fn seek(&self, new_position: u64) -> Result<()> {
        self.assert_open()?;
        if new_position > self.core.size {
            return Err(FsError::InvalidArgument(format!(
                "position {} beyond size {}",
                new_position, self.core.size
            )));
        }
        let mut state = self.core.state.lock().await;
        let position = state.position;
        if new_position == position {
            return Ok(());
        }
        if new_position > position
            && new_position - position < self.core.buffer_size as u64
        {
            let delta = (new_position - position) as usize;
            tracing::debug!(
                "seek: skipping {} bytes on live connection: url={}",
                delta,
                self.core.url
            );
            self.consume(&mut state, delta, None).await?;
            state.position = new_position;
            return Ok(());
        }
        tracing::debug!(
            "seek: reconnecting at {}: url={}",
            new_position,
            self.core.url
        );
        state.body = None;
        state.pending = Bytes::new();
        state.position = new_position;
        if new_position < self.core.size {
            let range = (new_position > 0).then(|| ByteRange {
                start: new_position,
                end: self.core.size - 1,
            });
            // a failed reconnect leaves no live connection, the channel is done
            match self.core.objects.fetch(&self.core.url, range).await {
                Ok(response) => state.body = Some(response.body),
                Err(e) => {
                    self.core.open.store(false, Ordering::SeqCst);
                    return Err(e);
                }
            }
        }
        // 定位到末尾时不再发起请求，后续读取直接报流结束
        Ok(())
    }

    /// Fill `dst` completely or fail / 完整填充缓冲区，否则报错
    ///
    /// On success the cursor advances by exactly `dst.len()`. A source that
    /// ends early fails with end-of-stream; a partial fill is never
    /// reported as success.
    pub async fn read_exact(&self, dst: &mut [u8]) -> Result<()> {
        self.assert_open()?;
        let mut state = self.core.state.lock().await;
        if state.position >= self.core.size {
            return Err(FsError::EndOfStream(self.core.url.clone()));
        }
        let wanted = dst.len();
        self.consume(&mut state, wanted, Some(dst)).await?;
        state.position += wanted as u64;
        Ok(())
    }

    /// Read-only filesystem / 只读文件系统
    pub async fn write(&self, _src: &[u8]) -> Result<usize> {
        Err(FsError::Unsupported("write on a read-only channel"))
    }

    /// Read-only filesystem / 只读文件系统
    pub async fn truncate(&self, _size: u64) -> Result<()> {
        Err(FsError::Unsupported("truncate on a read-only channel"))
    }

    /// Disconnect and unregister from the owning session / 关闭通道
    ///
    /// A second close is a no-op.
    pub async fn close(&self) -> Result<()> {
        self.core.shutdown().await?;
        if let Some(fs) = self.core.session.upgrade() {
            fs.remove_channel(&self.core);
        }
        Ok(())
    }

    /// Take `count` bytes off the live body, into `dst` or discarded.
    async fn consume(
        &self,
        state: &mut ChannelState,
        count: usize,
        mut dst: Option<&mut [u8]>,
    ) -> Result<()> {
        let mut written = 0usize;
        let mut remaining = count;
        while remaining > 0 {
            if state.pending.is_empty() {
                let body = state.body.as_mut().ok_or(FsError::ClosedChannel)?;
                match body.chunk().await? {
                    Some(chunk) => state.pending = chunk,
                    None => return Err(FsError::EndOfStream(self.core.url.clone())),
                }
                continue;
            }
            let take = remaining.min(state.pending.len());
            let bytes = state.pending.split_to(take);
            if let Some(dst) = dst.as_deref_mut() {
                dst[written..written + take].copy_from_slice(&bytes);
            }
            written += take;
            remaining -= take;
        }
        Ok(())
    }
}

impl ChannelCore {
    /// Drop the connection and mark the channel closed; idempotent.
    pub(crate) async fn shutdown(&self) -> Result<()> {
        if !self.open.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let mut state = self.state.lock().await;
        state.body = None;
        state.pending = Bytes::new();
        tracing::debug!("channel closed: url={}", self.url);
        Ok(())
    }
}
