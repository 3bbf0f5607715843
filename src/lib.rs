#![deny(unsafe_code)]
//! Reader for MCRAW raw video containers.
//!
//! An MCRAW file holds a header, an index of timestamped frames, a
//! container-level metadata record, and one metadata record per frame. This
//! crate parses the header and index once, when the file is opened, and then
//! decodes per-frame metadata on demand. Pixel data is never touched.
//!
//! ```no_run
//! use mcraw_parse::Decoder;
//!
//! let decoder = Decoder::open("clip.mcraw")?;
//! println!("{:?}", decoder.container_metadata().get("make"));
//! if let Some(&first) = decoder.frame_timestamps().first() {
//!     let metadata = decoder.load_frame_metadata(first)?;
//!     println!("{:?}", metadata.get("iso"));
//! }
//! # Ok::<(), mcraw_parse::Error>(())
//! ```

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use byteorder::ReadBytesExt;
use fallible_collections::TryReserveError;
use log::debug;
use parking_lot::Mutex;

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

mod container;
mod document;
mod record;

pub use crate::container::{CONTAINER_VERSION, Container, FrameEntry, HEADER_SIZE, INDEX_ENTRY_SIZE, Index, MAGIC};
pub use crate::document::{MetadataDocument, Value};
pub use crate::record::decode_record;

/// A trait to indicate a type can be infallibly converted to `u64`.
/// This should only be implemented for infallible conversions, so only unsigned types are valid.
trait ToU64 {
    fn to_u64(self) -> u64;
}

/// Statically verify that the platform `usize` can fit within a `u64`.
/// If the size won't fit on the given platform, this will fail at compile time, but if a type
/// which can fail `TryInto<usize>` is used, it may panic.
impl ToU64 for usize {
    fn to_u64(self) -> u64 {
        const _: () = assert!(std::mem::size_of::<usize>() <= std::mem::size_of::<u64>());
        self.try_into().ok().unwrap()
    }
}

/// A trait to indicate a type can be infallibly converted to `usize`.
/// This should only be implemented for infallible conversions, so only unsigned types are valid.
pub(crate) trait ToUsize {
    fn to_usize(self) -> usize;
}

macro_rules! impl_to_usize_from {
    ( $from_type:ty ) => {
        impl ToUsize for $from_type {
            fn to_usize(self) -> usize {
                const _: () = assert!(std::mem::size_of::<$from_type>() <= std::mem::size_of::<usize>());
                self.try_into().ok().unwrap()
            }
        }
    };
}

impl_to_usize_from!(u32);

#[doc(hidden)]
pub type TryVec<T> = fallible_collections::TryVec<T>;

/// Why a metadata record could not be decoded.
///
/// Offsets are relative to the start of the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// A length prefix disagrees with the bytes actually available: the
    /// record prefix against the byte range from the index, the root value
    /// against the record, or a value body against its enclosing body.
    LengthMismatch { declared: u64, actual: u64 },
    /// Tag byte outside the known set.
    UnknownTag { tag: u8, offset: u64 },
    /// A value is framed correctly but its body is invalid.
    MalformedValue { reason: &'static str, offset: u64 },
    /// Arrays and objects nested deeper than [`ParseOptions::max_depth`].
    NestingTooDeep { offset: u64 },
}

impl DecodeError {
    /// Whether lenient mode may drop the offending field and continue.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::NestingTooDeep { .. })
    }
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LengthMismatch { declared, actual } => {
                write!(f, "length mismatch: {declared} bytes declared, {actual} available")
            },
            Self::UnknownTag { tag, offset } => write!(f, "unknown tag {tag:#04x} at offset {offset}"),
            Self::MalformedValue { reason, offset } => write!(f, "{reason} at offset {offset}"),
            Self::NestingTooDeep { offset } => write!(f, "values nested too deeply at offset {offset}"),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Describes reader failures.
#[derive(Debug)]
pub enum Error {
    /// The file could not be opened: missing, unreadable, or permission denied.
    Open { path: PathBuf, source: std::io::Error },
    /// Not an MCRAW container, or a version this crate does not read.
    InvalidFormat(&'static str),
    /// The header declares a longer index than the file holds.
    TruncatedIndex { declared: u64, available: u64 },
    /// The index is internally inconsistent. `entry` is the position, in
    /// container order, of the offending entry when there is one.
    CorruptIndex { entry: Option<u32>, reason: &'static str },
    /// No frame has exactly this timestamp.
    FrameNotFound(i64),
    /// A metadata record failed to decode.
    Decode(DecodeError),
    /// Propagate underlying errors from `std::io`.
    Io(std::io::Error),
    /// Out of memory
    OutOfMemory,
    /// Resource limit exceeded during parsing
    ResourceLimitExceeded(&'static str),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open { path, source } => write!(f, "cannot open {}: {source}", path.display()),
            Self::InvalidFormat(s) => write!(f, "not a readable MCRAW container: {s}"),
            Self::TruncatedIndex { declared, available } => {
                write!(f, "truncated index: {declared} bytes declared, {available} bytes in file")
            },
            Self::CorruptIndex { entry: Some(entry), reason } => write!(f, "corrupt index entry {entry}: {reason}"),
            Self::CorruptIndex { entry: None, reason } => write!(f, "corrupt index: {reason}"),
            Self::FrameNotFound(timestamp) => write!(f, "no frame with timestamp {timestamp}"),
            Self::Decode(err) => std::fmt::Display::fmt(err, f),
            Self::Io(err) => std::fmt::Display::fmt(err, f),
            Self::OutOfMemory => f.write_str("OOM"),
            Self::ResourceLimitExceeded(s) => f.write_str(s),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Open { source, .. } => Some(source),
            Self::Decode(err) => Some(err),
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<DecodeError> for Error {
    #[cold]
    fn from(err: DecodeError) -> Self {
        Self::Decode(err)
    }
}

impl From<TryReserveError> for Error {
    #[cold]
    fn from(_: TryReserveError) -> Self {
        Self::OutOfMemory
    }
}

/// Result shorthand using our Error enum.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Options for decoding a single metadata record.
///
/// [`Decoder`] derives these from its [`DecodeConfig`]; use them directly
/// with [`decode_record`].
#[derive(Debug, Clone, Copy)]
pub struct ParseOptions {
    /// Drop array elements and object fields that fail to decode instead of
    /// failing the record.
    ///
    /// Default: false (strict validation)
    pub lenient: bool,
    /// Maximum nesting of arrays and objects, counting the root object.
    ///
    /// Default: 64
    pub max_depth: u32,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self { lenient: false, max_depth: DecodeConfig::DEFAULT_MAX_DEPTH }
    }
}

impl ParseOptions {
    pub fn lenient(mut self, lenient: bool) -> Self {
        self.lenient = lenient;
        self
    }
}

/// Configuration for opening containers, with resource limits and the
/// per-frame decoding mode.
///
/// Limits are checked **before** allocations occur, so a header that claims
/// absurd sizes fails cleanly instead of exhausting memory.
///
/// # Examples
///
/// ```rust
/// use mcraw_parse::DecodeConfig;
///
/// // Default limits
/// let config = DecodeConfig::default();
///
/// // Tolerate damaged per-frame metadata, cap record size
/// let config = DecodeConfig::default()
///     .lenient(true)
///     .with_max_record_size(1 << 20);
///
/// // No limits
/// let config = DecodeConfig::unlimited();
/// ```
#[derive(Debug, Clone)]
pub struct DecodeConfig {
    /// Maximum number of index entries.
    /// Default: 10,000,000
    pub max_frames: Option<u32>,

    /// Maximum size of a single metadata record, container or frame.
    /// Checked for every index entry when the container is opened, so a
    /// container that opens never lists a frame too large to load.
    /// Default: 16 MiB
    pub max_record_size: Option<u32>,

    /// Maximum nesting of metadata values.
    /// Default: 64
    pub max_depth: u32,

    /// Lenient decoding of per-frame metadata. The header, the index, and the
    /// container metadata are always strict.
    /// Default: false
    pub lenient: bool,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            max_frames: Some(10_000_000),
            max_record_size: Some(16 * 1024 * 1024),
            max_depth: Self::DEFAULT_MAX_DEPTH,
            lenient: false,
        }
    }
}

impl DecodeConfig {
    const DEFAULT_MAX_DEPTH: u32 = 64;

    /// Create a configuration with no frame count or record size limits.
    pub fn unlimited() -> Self {
        Self {
            max_frames: None,
            max_record_size: None,
            max_depth: Self::DEFAULT_MAX_DEPTH,
            lenient: false,
        }
    }

    /// Set the maximum number of frames
    pub fn with_max_frames(mut self, frames: u32) -> Self {
        self.max_frames = Some(frames);
        self
    }

    /// Set the maximum metadata record size in bytes
    pub fn with_max_record_size(mut self, bytes: u32) -> Self {
        self.max_record_size = Some(bytes);
        self
    }

    /// Set the maximum nesting depth of metadata values
    pub fn with_max_depth(mut self, depth: u32) -> Self {
        self.max_depth = depth;
        self
    }

    /// Enable lenient per-frame metadata decoding
    pub fn lenient(mut self, lenient: bool) -> Self {
        self.lenient = lenient;
        self
    }

    pub fn parse_options(&self) -> ParseOptions {
        ParseOptions { lenient: self.lenient, max_depth: self.max_depth }
    }

    fn check_record_size(&self, length: u32) -> Result<()> {
        if let Some(limit) = self.max_record_size {
            if length > limit {
                return Err(Error::ResourceLimitExceeded("metadata record size limit exceeded"));
            }
        }
        Ok(())
    }
}

/// An open MCRAW container.
///
/// The header and index are parsed by [`Decoder::open`]; frame metadata is
/// read and decoded per call. All queries take `&self`, and a
/// `Decoder<File>` is `Send + Sync`, so frames can be loaded from several
/// threads at once. The source is locked only for the seek and read of a
/// record, never while decoding it.
///
/// The file handle is closed when the decoder is dropped.
#[derive(Debug)]
pub struct Decoder<R = File> {
    path: Option<PathBuf>,
    source: Mutex<R>,
    container: Container,
    config: DecodeConfig,
}

impl Decoder<File> {
    /// Open a container with default limits and strict decoding.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_config(path, &DecodeConfig::default())
    }

    /// Open a container with the given configuration.
    pub fn open_with_config<P: AsRef<Path>>(path: P, config: &DecodeConfig) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| Error::Open { path: path.to_path_buf(), source })?;
        debug!("opened {}", path.display());
        let mut decoder = Self::from_reader_with_config(file, config)?;
        decoder.path = Some(path.to_path_buf());
        Ok(decoder)
    }
}

impl<R: Read + Seek> Decoder<R> {
    /// Read a container from any seekable source.
    pub fn from_reader(reader: R) -> Result<Self> {
        Self::from_reader_with_config(reader, &DecodeConfig::default())
    }

    /// Read a container from any seekable source with the given configuration.
    ///
    /// On failure the reader is dropped before this returns.
    pub fn from_reader_with_config(mut reader: R, config: &DecodeConfig) -> Result<Self> {
        let container = Container::read(&mut reader, config)?;
        Ok(Self {
            path: None,
            source: Mutex::new(reader),
            container,
            config: config.clone(),
        })
    }

    /// Frame timestamps in container order. Empty for a container without
    /// frames.
    pub fn frame_timestamps(&self) -> &[i64] {
        self.container.index().timestamps()
    }

    /// Decode the metadata of the frame with exactly this timestamp.
    pub fn load_frame_metadata(&self, timestamp: i64) -> Result<MetadataDocument> {
        let entry = self.frame(timestamp).ok_or(Error::FrameNotFound(timestamp))?;
        self.load_entry(entry)
    }

    /// Metadata describing the whole container. Empty if the container has
    /// no metadata record.
    pub fn container_metadata(&self) -> &MetadataDocument {
        self.container.metadata()
    }

    /// Index entries in container order.
    pub fn frames(&self) -> &[FrameEntry] {
        self.container.index().entries()
    }

    pub fn frame(&self, timestamp: i64) -> Option<&FrameEntry> {
        self.container.index().find(timestamp)
    }

    pub fn frame_count(&self) -> usize {
        self.container.index().len()
    }

    pub fn version(&self) -> u8 {
        self.container.version()
    }

    /// The path given to [`Decoder::open`], if opened from a path.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn container(&self) -> &Container {
        &self.container
    }

    /// Metadata of the first frame in container order.
    pub fn first_frame_metadata(&self) -> Option<Result<MetadataDocument>> {
        self.frames().first().map(|entry| self.load_entry(entry))
    }

    /// Metadata of the last frame in container order.
    pub fn last_frame_metadata(&self) -> Option<Result<MetadataDocument>> {
        self.frames().last().map(|entry| self.load_entry(entry))
    }

    /// Iterate over every frame's metadata in container order.
    ///
    /// A frame that fails to decode yields its error; iteration continues
    /// with the next frame.
    pub fn frame_metadata(&self) -> FrameMetadataIter<'_, R> {
        FrameMetadataIter { decoder: self, index: 0 }
    }

    fn load_entry(&self, entry: &FrameEntry) -> Result<MetadataDocument> {
        let bytes = {
            let mut source = self.source.lock();
            source.seek(SeekFrom::Start(entry.offset))?;
            read_exact_fallible(&mut *source, entry.length.to_usize())?
        };

        debug!("frame {}: {} byte record at {}", entry.timestamp, entry.length, entry.offset);
        decode_record(&bytes, &self.config.parse_options()).map_err(From::from)
    }
}

/// Iterator over frame metadata.
///
/// Created by [`Decoder::frame_metadata()`]. Yields `(timestamp, metadata)`
/// pairs, decoding each record on demand.
pub struct FrameMetadataIter<'a, R> {
    decoder: &'a Decoder<R>,
    index: usize,
}

impl<R: Read + Seek> Iterator for FrameMetadataIter<'_, R> {
    type Item = (i64, Result<MetadataDocument>);

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.decoder.frames().get(self.index)?;
        self.index += 1;
        Some((entry.timestamp, self.decoder.load_entry(entry)))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.decoder.frame_count().saturating_sub(self.index);
        (remaining, Some(remaining))
    }
}

impl<R: Read + Seek> ExactSizeIterator for FrameMetadataIter<'_, R> {}

/// Read exactly `len` bytes into a freshly allocated buffer, failing
/// with [`Error::OutOfMemory`] instead of aborting when the allocation can't
/// be satisfied.
fn read_exact_fallible<R: Read + ?Sized>(src: &mut R, len: usize) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)?;
    buf.resize(len, 0);
    src.read_exact(&mut buf)?;
    Ok(buf)
}

fn le_u32<T: ReadBytesExt>(src: &mut T) -> Result<u32> {
    src.read_u32::<byteorder::LittleEndian>().map_err(From::from)
}

fn le_u64<T: ReadBytesExt>(src: &mut T) -> Result<u64> {
    src.read_u64::<byteorder::LittleEndian>().map_err(From::from)
}

fn le_i64<T: ReadBytesExt>(src: &mut T) -> Result<i64> {
    src.read_i64::<byteorder::LittleEndian>().map_err(From::from)
}

#[test]
fn decoder_is_send_and_sync() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<Decoder>();
    assert_send_sync::<Decoder<std::io::Cursor<Vec<u8>>>>();
    assert_send_sync::<Error>();
}

#[test]
fn decode_error_messages() {
    let err = Error::from(DecodeError::UnknownTag { tag: 0x42, offset: 13 });
    assert_eq!(err.to_string(), "unknown tag 0x42 at offset 13");
    assert!(std::error::Error::source(&err).is_some());

    let err = Error::TruncatedIndex { declared: 48, available: 24 };
    assert_eq!(err.to_string(), "truncated index: 48 bytes declared, 24 bytes in file");

    let err = Error::CorruptIndex { entry: Some(3), reason: "frame records overlap" };
    assert_eq!(err.to_string(), "corrupt index entry 3: frame records overlap");
}

#[test]
fn only_depth_errors_are_fatal_in_lenient_mode() {
    assert!(DecodeError::UnknownTag { tag: 9, offset: 0 }.is_recoverable());
    assert!(DecodeError::MalformedValue { reason: "x", offset: 0 }.is_recoverable());
    assert!(DecodeError::LengthMismatch { declared: 1, actual: 0 }.is_recoverable());
    assert!(!DecodeError::NestingTooDeep { offset: 0 }.is_recoverable());
}

#[test]
fn allocation_failure_is_out_of_memory() {
    let mut buf: Vec<u8> = Vec::new();
    let err = Error::from(buf.try_reserve_exact(usize::MAX).unwrap_err());
    assert!(matches!(err, Error::OutOfMemory));
    assert!(TryVec::<u64>::with_capacity(usize::MAX).map_err(Error::from).is_err_and(|e| matches!(e, Error::OutOfMemory)));
}

#[test]
fn parse_options_follow_config() {
    let options = DecodeConfig::default().lenient(true).with_max_depth(8).parse_options();
    assert!(options.lenient);
    assert_eq!(options.max_depth, 8);
    assert!(!options.lenient(false).lenient);
}
