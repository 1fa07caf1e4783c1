//! bucketfs: read-only virtual filesystem over S3-compatible object storage
//! / 基于 S3 兼容对象存储的只读虚拟文件系统
//!
//! A flat, prefix-keyed bucket is presented as a hierarchy: directory
//! listings come from delimiter-grouped key listings, random-access reads
//! from HTTP range GETs. No local state, no metadata service.
//!
//! ```no_run
//! use bucketfs::{FsRegistry, ObjectStore};
//!
//! # async fn demo() -> bucketfs::Result<()> {
//! let registry = FsRegistry::new();
//! let fs = registry.create("s3:https://demo.s3.amazonaws.com", ObjectStore::http())?;
//!
//! for entry in fs.list(&fs.root()).await? {
//!     println!("{}", entry);
//! }
//!
//! let channel = fs.open(&fs.get_path("/data/report.csv", &[])?).await?;
//! let mut header = vec![0u8; 64];
//! channel.read_exact(&mut header).await?;
//! fs.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod attrs;
pub mod channel;
pub mod error;
pub mod listing;
pub mod path;
pub mod registry;
pub mod session;
pub mod store;

#[cfg(test)]
pub(crate) mod testutil;

pub use attrs::{FileAttributes, UNKNOWN_TIME};
pub use channel::{RangeChannel, DEFAULT_BUFFER_SIZE};
pub use error::{FsError, Result};
pub use listing::{ItemRef, ListScanner};
pub use path::BucketPath;
pub use registry::FsRegistry;
pub use session::{BucketFs, SessionConfig};
pub use store::{
    ByteRange, HttpObjectStore, ListingFetcher, ObjectBody, ObjectFetcher, ObjectResponse,
    ObjectStore,
};
