//! Path model / 路径模型
//!
//! Pure path algebra over a configurable separator; nothing in here touches
//! the network. A path value is immutable apart from its set-once attribute
//! cell. Directory paths render with a trailing separator, non-directory
//! paths never do.
//!
//! 路径是不可变值，目录路径字符串以分隔符结尾。

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::attrs::FileAttributes;
use crate::error::{FsError, Result};
use crate::listing::ItemRef;
use crate::session::{BucketFs, FsInner};

/// A location inside one bucket session / 会话内的一个位置
///
/// Two paths are equal iff they belong to the same session and agree on
/// absoluteness, directory flag and raw name. The attribute cache never
/// participates in equality.
#[derive(Clone)]
pub struct BucketPath {
    fs: Arc<FsInner>,
    absolute: bool,
    directory: bool,
    name: String,
    attrs: OnceCell<FileAttributes>,
}

impl BucketPath {
    pub(crate) fn new(
        fs: Arc<FsInner>,
        absolute: bool,
        directory: bool,
        name: String,
        attrs: Option<FileAttributes>,
    ) -> Self {
        let cell = OnceCell::new();
        if let Some(attrs) = attrs {
            let _ = cell.set(attrs);
        }
        Self {
            fs,
            absolute,
            directory,
            name,
            attrs: cell,
        }
    }

    /// The root path: absolute directory with no segments / 根路径
    pub(crate) fn root_of(fs: &Arc<FsInner>) -> Self {
        let attrs = FileAttributes::new_dir(fs.separator.clone());
        Self::new(fs.clone(), true, true, String::new(), Some(attrs))
    }

    /// The empty path: relative, neither file nor directory / 空路径
    pub(crate) fn empty_of(fs: &Arc<FsInner>) -> Self {
        Self::new(
            fs.clone(),
            false,
            false,
            String::new(),
            Some(FileAttributes::empty()),
        )
    }

    /// Parse a raw path string / 解析原始路径字符串
    ///
    /// Any string is a legal path: a single leading separator marks the
    /// path absolute, a single trailing separator marks it a directory,
    /// the middle is kept verbatim.
    pub(crate) fn parse(fs: &Arc<FsInner>, raw: &str) -> Self {
        let separator = fs.separator.as_str();
        if raw.is_empty() {
            return Self::empty_of(fs);
        }
        if raw == separator {
            return Self::root_of(fs);
        }
        let mut absolute = false;
        let mut directory = false;
        let mut rest = raw;
        if let Some(stripped) = rest.strip_prefix(separator) {
            absolute = true;
            rest = stripped;
        }
        if let Some(stripped) = rest.strip_suffix(separator) {
            directory = true;
            rest = stripped;
        }
        Self::new(fs.clone(), absolute, directory, rest.to_string(), None)
    }

    /// Lift a listing item into an absolute path / 由列表条目构造绝对路径
    pub(crate) fn from_item(fs: &Arc<FsInner>, item: ItemRef) -> Self {
        match item {
            ItemRef::File {
                key,
                size,
                last_modified,
            } => {
                let attrs = FileAttributes::new_file(key.clone(), Some(size), last_modified);
                Self::new(fs.clone(), true, false, key, Some(attrs))
            }
            ItemRef::Dir { prefix } => {
                let separator = fs.separator.as_str();
                let name = prefix
                    .strip_suffix(separator)
                    .unwrap_or(prefix.as_str())
                    .to_string();
                let attrs = FileAttributes::new_dir(prefix);
                Self::new(fs.clone(), true, true, name, Some(attrs))
            }
        }
    }

    pub(crate) fn fs(&self) -> &Arc<FsInner> {
        &self.fs
    }

    /// The owning session / 所属会话
    pub fn session(&self) -> BucketFs {
        BucketFs::from_inner(self.fs.clone())
    }

    pub fn is_absolute(&self) -> bool {
        self.absolute
    }

    /// Whether the trailing-separator marker is set / 是否为目录路径
    pub fn is_directory(&self) -> bool {
        self.directory
    }

    /// Separator-joined segments, no leading or trailing separator / 原始名称
    pub fn raw_name(&self) -> &str {
        &self.name
    }

    /// Cached attributes, if any have been attached / 已缓存的属性
    pub fn attributes(&self) -> Option<&FileAttributes> {
        self.attrs.get()
    }

    pub(crate) fn attrs_cell(&self) -> &OnceCell<FileAttributes> {
        &self.attrs
    }

    /// Path segments in root-to-leaf order / 路径分段
    pub fn segments(&self) -> Vec<&str> {
        if self.name.is_empty() {
            Vec::new()
        } else {
            self.name.split(self.fs.separator.as_str()).collect()
        }
    }

    pub fn name_count(&self) -> usize {
        self.segments().len()
    }

    /// Segment at `index` as a relative, non-directory path / 第 index 段
    pub fn name_at(&self, index: usize) -> Result<BucketPath> {
        let segments = self.segments();
        let name = segments.get(index).ok_or_else(|| {
            FsError::InvalidArgument(format!(
                "segment index {} out of bounds for {} segments",
                index,
                segments.len()
            ))
        })?;
        Ok(Self::new(
            self.fs.clone(),
            false,
            false,
            (*name).to_string(),
            None,
        ))
    }

    /// Last segment, directory flag preserved / 最后一段
    pub fn file_name(&self) -> Option<BucketPath> {
        let segments = self.segments();
        let name = (*segments.last()?).to_string();
        Some(Self::new(
            self.fs.clone(),
            false,
            self.directory,
            name,
            self.attrs.get().cloned(),
        ))
    }

    /// Root of this path, present only for absolute paths / 根路径
    pub fn root(&self) -> Option<BucketPath> {
        self.absolute.then(|| Self::root_of(&self.fs))
    }

    /// Segment slice without bounds checks; callers validate first.
    fn slice(&self, begin: usize, end: usize) -> BucketPath {
        let segments = self.segments();
        let name = segments[begin..end].join(self.fs.separator.as_str());
        Self::new(
            self.fs.clone(),
            begin == 0 && self.absolute,
            end < segments.len() || self.directory,
            name,
            None,
        )
    }

    /// Segment subsequence `[begin, end)` / 分段子序列
    pub fn subpath(&self, begin: usize, end: usize) -> Result<BucketPath> {
        let count = self.name_count();
        if begin > end || end > count {
            return Err(FsError::InvalidArgument(format!(
                "subpath range {}..{} out of bounds for {} segments",
                begin, end, count
            )));
        }
        Ok(self.slice(begin, end))
    }

    /// All segments but the last; none for zero segments / 父路径
    pub fn parent(&self) -> Option<BucketPath> {
        let count = self.name_count();
        if count == 0 {
            None
        } else {
            Some(self.slice(0, count - 1))
        }
    }

    /// Raw-name prefix test against a path of the same session / 前缀判断
    pub fn starts_with(&self, other: &BucketPath) -> bool {
        self.name.starts_with(&other.name)
    }

    pub fn starts_with_str(&self, other: &str) -> bool {
        self.starts_with(&Self::parse(&self.fs, other))
    }

    /// Raw-name suffix test / 后缀判断
    pub fn ends_with(&self, other: &BucketPath) -> bool {
        self.name.ends_with(&other.name)
    }

    pub fn ends_with_str(&self, other: &str) -> bool {
        self.ends_with(&Self::parse(&self.fs, other))
    }

    /// No `.`/`..` support, so every path is already normal / 恒等
    pub fn normalize(&self) -> BucketPath {
        self.clone()
    }

    /// Resolve `other` against this path / 解析相对路径
    ///
    /// An absolute `other` wins outright; an empty `other` yields this
    /// path; otherwise this path must be a directory and `other` is joined
    /// onto it.
    pub fn resolve(&self, other: &BucketPath) -> Result<BucketPath> {
        if other.absolute || self.to_string().is_empty() {
            return Ok(other.clone());
        }
        if other.to_string().is_empty() {
            return Ok(self.clone());
        }
        if self.directory {
            return Ok(Self::parse(&self.fs, &format!("{}{}", self, other)));
        }
        Err(FsError::InvalidArgument(format!(
            "cannot resolve against non-directory path {}",
            self
        )))
    }

    pub fn resolve_str(&self, other: &str) -> Result<BucketPath> {
        self.resolve(&Self::parse(&self.fs, other))
    }

    /// Resolve `other` against this path's parent / 针对父路径解析
    pub fn resolve_sibling(&self, other: &BucketPath) -> Result<BucketPath> {
        if other.to_string().is_empty() {
            return Ok(self.clone());
        }
        match self.parent() {
            Some(parent) if !other.absolute => parent.resolve(other),
            _ => Ok(other.clone()),
        }
    }

    pub fn resolve_sibling_str(&self, other: &str) -> Result<BucketPath> {
        self.resolve_sibling(&Self::parse(&self.fs, other))
    }

    /// Relative path from this path to `other` / 求相对路径
    ///
    /// Equal paths yield the empty path. Differing absoluteness is an
    /// error. When the two paths share no leading segments at all, `other`
    /// is returned unchanged; kept for compatibility, see the unit test.
    pub fn relativize(&self, other: &BucketPath) -> Result<BucketPath> {
        if self == other {
            return Ok(Self::empty_of(&self.fs));
        }
        if self.absolute != other.absolute {
            return Err(FsError::InvalidArgument(
                "cannot relativize paths with differing absoluteness".to_string(),
            ));
        }
        let segments1 = self.segments();
        let segments2 = other.segments();
        for (i, segment) in segments1.iter().enumerate() {
            if i >= segments2.len() || *segment != segments2[i] {
                return Ok(other.clone());
            }
        }
        Ok(other.slice(segments1.len(), segments2.len()))
    }

    /// Lexicographic segment comparison / 按分段字典序比较
    ///
    /// Shared segments compare as plain strings; when they all match, the
    /// path with fewer segments sorts first.
    pub fn compare(&self, other: &BucketPath) -> Ordering {
        let segments1 = self.segments();
        let segments2 = other.segments();
        let shared = segments1.len().min(segments2.len());
        for i in 0..shared {
            match segments1[i].cmp(segments2[i]) {
                Ordering::Equal => {}
                delta => return delta,
            }
        }
        match (segments1.get(shared), segments2.get(shared)) {
            (None, None) => Ordering::Equal,
            (Some(&name), _) => name.cmp(""),
            (None, Some(&name)) => "".cmp(name),
        }
    }

    /// This path if absolute, an error otherwise / 转为绝对路径
    ///
    /// There is no default directory to resolve a relative path against.
    pub fn to_absolute(&self) -> Result<BucketPath> {
        if self.absolute {
            Ok(self.clone())
        } else {
            Err(FsError::InvalidArgument(format!(
                "relative path {} has no absolute form",
                self
            )))
        }
    }

    /// Request URL of the object behind this path / 对象请求地址
    pub(crate) fn location(&self) -> String {
        format!("{}{}", self.fs.address, self)
    }

    /// URI form with percent-encoded segments / 分段编码后的 URI
    pub fn to_uri(&self) -> String {
        let separator = self.fs.separator.as_str();
        let mut tail = self
            .segments()
            .iter()
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join(separator);
        if self.directory {
            tail.push_str(separator);
        }
        format!("{}:{}/{}", self.fs.scheme, self.fs.address, tail)
    }
}

impl fmt::Display for BucketPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let separator = self.fs.separator.as_str();
        if self.name.is_empty() {
            if self.absolute {
                f.write_str(separator)?;
            }
            return Ok(());
        }
        if self.absolute {
            f.write_str(separator)?;
        }
        f.write_str(&self.name)?;
        if self.directory {
            f.write_str(separator)?;
        }
        Ok(())
    }
}

impl fmt::Debug for BucketPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BucketPath({})", self)
    }
}

impl PartialEq for BucketPath {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.fs, &other.fs)
            && self.absolute == other.absolute
            && self.directory == other.directory
            && self.name == other.name
    }
}

impl Eq for BucketPath {}

impl Hash for BucketPath {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.fs) as usize).hash(state);
        self.absolute.hash(state);
        self.directory.hash(state);
        self.name.hash(state);
    }
}
