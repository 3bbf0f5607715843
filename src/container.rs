// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Container header, frame index, and container-level metadata.
//!
//! Layout (all integers little-endian):
//!
//! ```text
//! header   magic "MOTION " | version u8 | frame_count u32 | reserved u32
//!          | metadata_offset u64 | metadata_length u32 | index_length u32
//! index    frame_count × (timestamp i64 | offset u64 | length u32 | flags u32)
//! records  container metadata record and one metadata record per frame,
//!          each addressed by (offset, length)
//! ```

use std::io::{Read, Seek, SeekFrom};
use std::ops::Range;

use byteorder::ReadBytesExt;
use log::{debug, warn};

use crate::document::MetadataDocument;
use crate::record::decode_record;
use crate::{le_i64, le_u32, le_u64, read_exact_fallible, DecodeConfig, Error, Result, ToU64, ToUsize, TryVec};

/// Identifier at offset 0 of every MCRAW file.
pub const MAGIC: [u8; 7] = *b"MOTION ";
/// The only container version this crate reads.
pub const CONTAINER_VERSION: u8 = 1;
/// Fixed header size; the index block starts here.
pub const HEADER_SIZE: u64 = 32;
/// Size of one index entry.
pub const INDEX_ENTRY_SIZE: u64 = 24;

/// Location of one frame's metadata record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameEntry {
    /// Unique within a container.
    pub timestamp: i64,
    /// Absolute file offset of the record.
    pub offset: u64,
    /// Record length in bytes, never zero.
    pub length: u32,
    /// Carried through from the index unchanged.
    pub flags: u32,
}

impl FrameEntry {
    /// The half-open byte range `[offset, offset + length)` of the record.
    pub fn byte_range(&self) -> Range<u64> {
        self.offset..self.offset + u64::from(self.length)
    }
}

#[derive(Debug)]
struct Header {
    version: u8,
    frame_count: u32,
    metadata_offset: u64,
    metadata_length: u32,
    index_length: u32,
}

/// Parse the fixed header. Always strict.
fn read_header<R: Read>(src: &mut R) -> Result<Header> {
    let mut magic = [0u8; 7];
    src.read_exact(&mut magic)?;
    if magic != MAGIC {
        return Err(Error::InvalidFormat("missing 'MOTION ' magic"));
    }

    let version = src.read_u8()?;
    if version != CONTAINER_VERSION {
        warn!("container version: {version}");
        return Err(Error::InvalidFormat("unsupported container version"));
    }

    let frame_count = le_u32(src)?;
    if le_u32(src)? != 0 {
        return Err(Error::InvalidFormat("reserved header field is not zero"));
    }

    Ok(Header {
        version,
        frame_count,
        metadata_offset: le_u64(src)?,
        metadata_length: le_u32(src)?,
        index_length: le_u32(src)?,
    })
}

/// Frame entries in container order, with a sorted side table for lookup.
#[derive(Debug)]
pub struct Index {
    entries: TryVec<FrameEntry>,
    timestamps: TryVec<i64>,
    /// `(timestamp, position in entries)`, sorted by timestamp.
    lookup: TryVec<(i64, u32)>,
}

impl Index {
    /// Parse an index block holding `frame_count` entries.
    ///
    /// Checks the block size and timestamp uniqueness only; where the entries
    /// point is checked by [`Index::validate`].
    pub fn parse(block: &[u8], frame_count: u32) -> Result<Self> {
        let expected = u64::from(frame_count) * INDEX_ENTRY_SIZE;
        if block.len().to_u64() != expected {
            warn!("index is {} bytes, {frame_count} entries need {expected}", block.len());
            return Err(Error::CorruptIndex { entry: None, reason: "index length does not match frame count" });
        }

        let count = frame_count.to_usize();
        let mut entries = TryVec::with_capacity(count)?;
        let mut timestamps = TryVec::with_capacity(count)?;
        let mut lookup = TryVec::with_capacity(count)?;

        let mut src = block;
        for position in 0..frame_count {
            let entry = FrameEntry {
                timestamp: le_i64(&mut src)?,
                offset: le_u64(&mut src)?,
                length: le_u32(&mut src)?,
                flags: le_u32(&mut src)?,
            };
            entries.push(entry)?;
            timestamps.push(entry.timestamp)?;
            lookup.push((entry.timestamp, position))?;
        }

        lookup.sort_unstable_by_key(|&(timestamp, _)| timestamp);
        if let Some(pair) = lookup.windows(2).find(|pair| pair[0].0 == pair[1].0) {
            warn!("timestamp {} appears more than once", pair[0].0);
            return Err(Error::CorruptIndex {
                entry: Some(pair[0].1.max(pair[1].1)),
                reason: "duplicate frame timestamp",
            });
        }

        Ok(Self { entries, timestamps, lookup })
    }

    /// Check every entry against the file: records must be non-empty, lie in
    /// `[data_start, file_len)`, and not overlap each other or `reserved`.
    pub fn validate(&self, data_start: u64, file_len: u64, reserved: Option<Range<u64>>) -> Result<()> {
        let mut ranges = TryVec::with_capacity(self.entries.len() + 1)?;
        if let Some(range) = reserved {
            ranges.push((range.start, range.end, None))?;
        }

        for (position, entry) in (0u32..).zip(self.entries.iter()) {
            let corrupt = |reason| Error::CorruptIndex { entry: Some(position), reason };
            if entry.length == 0 {
                return Err(corrupt("zero-length frame record"));
            }
            if entry.offset < data_start {
                return Err(corrupt("frame record overlaps the header or index"));
            }
            let end = entry
                .offset
                .checked_add(u64::from(entry.length))
                .filter(|&end| end <= file_len)
                .ok_or_else(|| corrupt("frame record extends past end of file"))?;
            ranges.push((entry.offset, end, Some(position)))?;
        }

        ranges.sort_unstable_by_key(|&(start, end, _)| (start, end));
        for pair in ranges.windows(2) {
            let ((_, prev_end, prev), (next_start, _, next)) = (pair[0], pair[1]);
            if prev_end > next_start {
                return Err(match (prev, next) {
                    (Some(a), Some(b)) => Error::CorruptIndex { entry: Some(a.max(b)), reason: "frame records overlap" },
                    (entry, None) | (None, entry) => {
                        Error::CorruptIndex { entry, reason: "frame record overlaps the container metadata" }
                    },
                });
            }
        }
        Ok(())
    }

    /// Entries in container order.
    pub fn entries(&self) -> &[FrameEntry] {
        &self.entries
    }

    /// Timestamps in container order.
    pub fn timestamps(&self) -> &[i64] {
        &self.timestamps
    }

    /// Exact-match lookup.
    pub fn find(&self, timestamp: i64) -> Option<&FrameEntry> {
        let at = self.lookup.binary_search_by_key(&timestamp, |&(t, _)| t).ok()?;
        self.entries.get(self.lookup[at].1.to_usize())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Everything learned from a container at open time. Immutable afterwards.
#[derive(Debug)]
pub struct Container {
    version: u8,
    file_len: u64,
    index: Index,
    metadata: MetadataDocument,
}

impl Container {
    /// Parse header, index, and container metadata in one forward pass.
    ///
    /// The container metadata is always decoded strictly, whatever
    /// `config.lenient` says.
    pub fn read<R: Read + Seek>(src: &mut R, config: &DecodeConfig) -> Result<Self> {
        let file_len = src.seek(SeekFrom::End(0))?;
        if file_len < HEADER_SIZE {
            return Err(Error::InvalidFormat("file is too short for an MCRAW header"));
        }
        src.seek(SeekFrom::Start(0))?;

        let header = read_header(src)?;
        debug!("{header:?}");

        if let Some(limit) = config.max_frames {
            if header.frame_count > limit {
                return Err(Error::ResourceLimitExceeded("frame count limit exceeded"));
            }
        }

        let index_length = u64::from(header.index_length);
        let available = file_len - HEADER_SIZE;
        if index_length > available {
            return Err(Error::TruncatedIndex { declared: index_length, available });
        }
        let data_start = HEADER_SIZE + index_length;

        let block = read_exact_fallible(src, header.index_length.to_usize())?;
        let index = Index::parse(&block, header.frame_count)?;
        drop(block);
        for entry in index.entries() {
            config.check_record_size(entry.length)?;
        }

        let metadata_range = if header.metadata_length == 0 {
            None
        } else {
            let start = header.metadata_offset;
            let end = start
                .checked_add(u64::from(header.metadata_length))
                .filter(|&end| start >= data_start && end <= file_len)
                .ok_or(Error::InvalidFormat("container metadata record out of bounds"))?;
            Some(start..end)
        };
        index.validate(data_start, file_len, metadata_range.clone())?;

        let metadata = match metadata_range {
            None => MetadataDocument::new(),
            Some(range) => {
                config.check_record_size(header.metadata_length)?;
                src.seek(SeekFrom::Start(range.start))?;
                let bytes = read_exact_fallible(src, header.metadata_length.to_usize())?;
                decode_record(&bytes, &config.parse_options().lenient(false))?
            },
        };

        debug!("MCRAW v{}: {} frames, {} metadata fields", header.version, index.len(), metadata.len());
        Ok(Self { version: header.version, file_len, index, metadata })
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    /// Size of the container in bytes, as seen at open time.
    pub fn file_len(&self) -> u64 {
        self.file_len
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    pub fn metadata(&self) -> &MetadataDocument {
        &self.metadata
    }
}

#[cfg(test)]
fn index_block(entries: &[(i64, u64, u32)]) -> Vec<u8> {
    use byteorder::{LittleEndian, WriteBytesExt};
    let mut out = Vec::new();
    for &(timestamp, offset, length) in entries {
        out.write_i64::<LittleEndian>(timestamp).unwrap();
        out.write_u64::<LittleEndian>(offset).unwrap();
        out.write_u32::<LittleEndian>(length).unwrap();
        out.write_u32::<LittleEndian>(0).unwrap();
    }
    out
}

#[cfg(test)]
fn header_bytes(magic: &[u8; 7], version: u8, frame_count: u32, metadata: (u64, u32), index_length: u32) -> Vec<u8> {
    use byteorder::{LittleEndian, WriteBytesExt};
    let mut out = magic.to_vec();
    out.push(version);
    out.write_u32::<LittleEndian>(frame_count).unwrap();
    out.write_u32::<LittleEndian>(0).unwrap();
    out.write_u64::<LittleEndian>(metadata.0).unwrap();
    out.write_u32::<LittleEndian>(metadata.1).unwrap();
    out.write_u32::<LittleEndian>(index_length).unwrap();
    out
}

#[test]
fn index_keeps_container_order() {
    let block = index_block(&[(250, 200, 10), (100, 100, 10), (175, 300, 10)]);
    let index = Index::parse(&block, 3).unwrap();
    assert_eq!(index.timestamps(), &[250, 100, 175]);
    assert_eq!(index.entries()[1].offset, 100);
    assert_eq!(index.find(175).map(|e| e.offset), Some(300));
    assert_eq!(index.find(100).map(FrameEntry::byte_range), Some(100..110));
    assert!(index.find(101).is_none());
    assert!(index.validate(80, 310, None).is_ok());
}

#[test]
fn empty_index() {
    let index = Index::parse(&[], 0).unwrap();
    assert!(index.is_empty());
    assert!(index.timestamps().is_empty());
    assert!(index.find(0).is_none());
    assert!(index.validate(HEADER_SIZE, HEADER_SIZE, None).is_ok());
}

#[test]
fn index_size_must_match_frame_count() {
    let block = index_block(&[(1, 100, 10)]);
    assert!(matches!(
        Index::parse(&block, 2),
        Err(Error::CorruptIndex { entry: None, reason: "index length does not match frame count" })
    ));
    assert!(matches!(Index::parse(&block[..20], 1), Err(Error::CorruptIndex { entry: None, .. })));
}

#[test]
fn duplicate_timestamps_rejected() {
    let block = index_block(&[(5, 100, 10), (6, 110, 10), (5, 120, 10)]);
    assert!(matches!(
        Index::parse(&block, 3),
        Err(Error::CorruptIndex { entry: Some(2), reason: "duplicate frame timestamp" })
    ));
}

#[test]
fn validate_rejects_bad_ranges() {
    let cases: [(&[(i64, u64, u32)], Option<u32>, &str); 5] = [
        (&[(1, 100, 0)], Some(0), "zero-length frame record"),
        (&[(1, 40, 10)], Some(0), "frame record overlaps the header or index"),
        (&[(1, 195, 10)], Some(0), "frame record extends past end of file"),
        (&[(1, u64::MAX - 2, 10)], Some(0), "frame record extends past end of file"),
        (&[(1, 100, 20), (2, 150, 10), (3, 110, 5)], Some(2), "frame records overlap"),
    ];
    for (entries, entry, reason) in cases {
        let index = Index::parse(&index_block(entries), entries.len() as u32).unwrap();
        match index.validate(80, 200, None) {
            Err(Error::CorruptIndex { entry: e, reason: r }) => {
                assert_eq!((e, r), (entry, reason));
            },
            other => panic!("{reason}: unexpected {other:?}"),
        }
    }
}

#[test]
fn validate_rejects_overlap_with_container_metadata() {
    let index = Index::parse(&index_block(&[(1, 100, 20)]), 1).unwrap();
    assert!(index.validate(80, 200, Some(120..140)).is_ok());
    assert!(matches!(
        index.validate(80, 200, Some(110..140)),
        Err(Error::CorruptIndex { entry: Some(0), reason: "frame record overlaps the container metadata" })
    ));
    assert!(matches!(
        index.validate(80, 200, Some(90..101)),
        Err(Error::CorruptIndex { entry: Some(0), reason: "frame record overlaps the container metadata" })
    ));
}

#[test]
fn header_rejections() {
    let config = DecodeConfig::default();
    let read = |bytes: Vec<u8>| Container::read(&mut std::io::Cursor::new(bytes), &config);

    assert!(matches!(read(b"MOTION".to_vec()), Err(Error::InvalidFormat(_))));
    assert!(matches!(
        read(header_bytes(b"MOTIOM ", 1, 0, (0, 0), 0)),
        Err(Error::InvalidFormat("missing 'MOTION ' magic"))
    ));
    assert!(matches!(
        read(header_bytes(&MAGIC, 2, 0, (0, 0), 0)),
        Err(Error::InvalidFormat("unsupported container version"))
    ));

    let mut reserved = header_bytes(&MAGIC, 1, 0, (0, 0), 0);
    reserved[12] = 1;
    assert!(matches!(read(reserved), Err(Error::InvalidFormat("reserved header field is not zero"))));
}

#[test]
fn truncated_index_reports_sizes() {
    let mut bytes = header_bytes(&MAGIC, 1, 2, (0, 0), 48);
    bytes.extend_from_slice(&index_block(&[(1, 100, 10)]));
    match Container::read(&mut std::io::Cursor::new(bytes), &DecodeConfig::default()) {
        Err(Error::TruncatedIndex { declared, available }) => assert_eq!((declared, available), (48, 24)),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn container_metadata_must_follow_index() {
    let bytes = header_bytes(&MAGIC, 1, 0, (8, 8), 0);
    assert!(matches!(
        Container::read(&mut std::io::Cursor::new(bytes), &DecodeConfig::default()),
        Err(Error::InvalidFormat("container metadata record out of bounds"))
    ));
}

#[test]
fn zero_frames_without_metadata() {
    let bytes = header_bytes(&MAGIC, 1, 0, (0, 0), 0);
    let container = Container::read(&mut std::io::Cursor::new(bytes), &DecodeConfig::default()).unwrap();
    assert_eq!(container.version(), 1);
    assert_eq!(container.file_len(), HEADER_SIZE);
    assert!(container.index().is_empty());
    assert!(container.metadata().is_empty());
}

#[test]
fn oversized_frame_record_fails_open() {
    let mut bytes = header_bytes(&MAGIC, 1, 1, (0, 0), 24);
    bytes.extend_from_slice(&index_block(&[(1, 56, 64)]));
    bytes.resize(56 + 64, 0);
    let config = DecodeConfig::default().with_max_record_size(63);
    assert!(matches!(
        Container::read(&mut std::io::Cursor::new(bytes.clone()), &config),
        Err(Error::ResourceLimitExceeded("metadata record size limit exceeded"))
    ));
    let config = DecodeConfig::default().with_max_record_size(64);
    assert!(Container::read(&mut std::io::Cursor::new(bytes), &config).is_ok());
}

#[test]
fn frame_count_limit() {
    let bytes = header_bytes(&MAGIC, 1, 1_000, (0, 0), 24_000);
    let config = DecodeConfig::default().with_max_frames(10);
    assert!(matches!(
        Container::read(&mut std::io::Cursor::new(bytes), &config),
        Err(Error::ResourceLimitExceeded("frame count limit exceeded"))
    ));
}
