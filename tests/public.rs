// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
use mcraw_parse::{DecodeConfig, DecodeError, Decoder, Error, HEADER_SIZE, INDEX_ENTRY_SIZE, MAGIC, Value};
use std::io::{Cursor, Write};
use test_assembler::{Endian, Section};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn value(tag: u8, body: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    leb128::write::unsigned(&mut out, body.len() as u64).unwrap();
    out.extend_from_slice(body);
    out
}

fn int(i: i64) -> Vec<u8> {
    value(2, &i.to_le_bytes())
}

fn string(s: &str) -> Vec<u8> {
    value(4, s.as_bytes())
}

fn object(fields: &[(&str, Vec<u8>)]) -> Vec<u8> {
    let mut body = Vec::new();
    for (key, field) in fields {
        leb128::write::unsigned(&mut body, key.len() as u64).unwrap();
        body.extend_from_slice(key.as_bytes());
        body.extend_from_slice(field);
    }
    value(6, &body)
}

fn record(root: &[u8]) -> Vec<u8> {
    Section::with_endian(Endian::Little)
        .L32((root.len() + 4) as u32)
        .append_bytes(root)
        .get_contents()
        .unwrap()
}

fn iso_record(iso: i64) -> Vec<u8> {
    record(&object(&[("iso", int(iso))]))
}

/// Header, index, container metadata, then frame records in index order.
fn container(metadata: Option<&[u8]>, frames: &[(i64, Vec<u8>)]) -> Vec<u8> {
    let index_length = frames.len() as u64 * INDEX_ENTRY_SIZE;
    let data_start = HEADER_SIZE + index_length;
    let metadata_length = metadata.map_or(0, |m| m.len() as u64);

    let mut section = Section::with_endian(Endian::Little)
        .append_bytes(&MAGIC)
        .D8(1u8)
        .L32(frames.len() as u32)
        .L32(0u32)
        .L64(if metadata.is_some() { data_start } else { 0 })
        .L32(metadata_length as u32)
        .L32(index_length as u32);

    let mut offset = data_start + metadata_length;
    for (timestamp, frame) in frames {
        section = section.L64(*timestamp as u64).L64(offset).L32(frame.len() as u32).L32(0u32);
        offset += frame.len() as u64;
    }
    if let Some(metadata) = metadata {
        section = section.append_bytes(metadata);
    }
    for (_, frame) in frames {
        section = section.append_bytes(frame);
    }
    section.get_contents().unwrap()
}

fn two_frames() -> Vec<u8> {
    container(None, &[(100, iso_record(100)), (250, iso_record(200))])
}

fn write_temp(bytes: &[u8]) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(bytes).unwrap();
    file.flush().unwrap();
    file
}

fn iso(decoder: &Decoder<impl std::io::Read + std::io::Seek>, timestamp: i64) -> Option<i64> {
    decoder.load_frame_metadata(timestamp).unwrap().get("iso").and_then(Value::as_i64)
}

#[test]
fn zero_frame_container_with_metadata() {
    init_logger();
    let metadata = record(&value(7, br#"{"make":"X"}"#));
    let file = write_temp(&container(Some(&metadata), &[]));

    let decoder = Decoder::open(file.path()).expect("open failed");
    assert_eq!(decoder.path(), Some(file.path()));
    assert_eq!(decoder.version(), 1);
    assert!(decoder.frame_timestamps().is_empty());
    assert_eq!(decoder.frame_count(), 0);
    assert!(decoder.first_frame_metadata().is_none());
    assert!(decoder.last_frame_metadata().is_none());
    assert_eq!(decoder.frame_metadata().len(), 0);

    let metadata = decoder.container_metadata();
    assert_eq!(metadata.len(), 1);
    assert_eq!(metadata.get("make").and_then(Value::as_str), Some("X"));
    assert_eq!(metadata.to_json(), serde_json::json!({ "make": "X" }));
}

#[test]
fn two_frames_by_timestamp() {
    init_logger();
    let file = write_temp(&two_frames());
    let decoder = Decoder::open(file.path()).unwrap();

    assert_eq!(decoder.frame_timestamps(), &[100, 250]);
    assert!(decoder.container_metadata().is_empty());
    assert_eq!(iso(&decoder, 100), Some(100));
    assert_eq!(iso(&decoder, 250), Some(200));
    assert!(matches!(decoder.load_frame_metadata(999), Err(Error::FrameNotFound(999))));
    // Exact match only.
    assert!(matches!(decoder.load_frame_metadata(101), Err(Error::FrameNotFound(101))));
}

#[test]
fn queries_are_repeatable() {
    let decoder = Decoder::from_reader(Cursor::new(two_frames())).unwrap();

    let first = decoder.frame_timestamps().to_vec();
    assert_eq!(decoder.frame_timestamps(), first.as_slice());

    let a = decoder.load_frame_metadata(250).unwrap();
    let b = decoder.load_frame_metadata(250).unwrap();
    assert_eq!(a, b);
    assert_eq!(decoder.container_metadata(), decoder.container_metadata());
}

#[test]
fn timestamps_keep_container_order() {
    let bytes = container(None, &[(250, iso_record(2)), (100, iso_record(1)), (175, iso_record(3))]);
    let decoder = Decoder::from_reader(Cursor::new(bytes)).unwrap();

    assert_eq!(decoder.frame_timestamps(), &[250, 100, 175]);
    assert_eq!(iso(&decoder, 100), Some(1));
    assert_eq!(iso(&decoder, 175), Some(3));

    let first = decoder.first_frame_metadata().unwrap().unwrap();
    assert_eq!(first.get("iso").and_then(Value::as_i64), Some(2));
    let last = decoder.last_frame_metadata().unwrap().unwrap();
    assert_eq!(last.get("iso").and_then(Value::as_i64), Some(3));

    let frames: Vec<(i64, i64)> = decoder
        .frame_metadata()
        .map(|(timestamp, metadata)| (timestamp, metadata.unwrap().get("iso").and_then(Value::as_i64).unwrap()))
        .collect();
    assert_eq!(frames, [(250, 2), (100, 1), (175, 3)]);
}

#[test]
fn index_entries_are_exposed() {
    let decoder = Decoder::from_reader(Cursor::new(two_frames())).unwrap();
    let data_start = HEADER_SIZE + 2 * INDEX_ENTRY_SIZE;
    let frame = decoder.frame(250).unwrap();
    assert_eq!(frame.offset, data_start + iso_record(100).len() as u64);
    assert_eq!(frame.length as usize, iso_record(200).len());
    assert_eq!(decoder.frames()[0].offset, data_start);
    assert!(decoder.frame(999).is_none());
    assert_eq!(decoder.container().file_len(), two_frames().len() as u64);
}

#[test]
fn missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing.mcraw");
    match Decoder::open(&path) {
        Err(Error::Open { path: p, source }) => {
            assert_eq!(p, path);
            assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
        },
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn corrupted_magic() {
    let mut bytes = two_frames();
    bytes[0] = b'X';
    let file = write_temp(&bytes);
    assert!(matches!(Decoder::open(file.path()), Err(Error::InvalidFormat(_))));
}

#[test]
fn file_shorter_than_header() {
    let bytes = two_frames();
    assert!(matches!(
        Decoder::from_reader(Cursor::new(bytes[..20].to_vec())),
        Err(Error::InvalidFormat(_))
    ));
    assert!(matches!(Decoder::from_reader(Cursor::new(Vec::new())), Err(Error::InvalidFormat(_))));
}

#[test]
fn truncated_index() {
    let bytes = two_frames();
    let cut = (HEADER_SIZE + INDEX_ENTRY_SIZE) as usize;
    let file = write_temp(&bytes[..cut]);
    match Decoder::open(file.path()) {
        Err(Error::TruncatedIndex { declared, available }) => {
            assert_eq!(declared, 2 * INDEX_ENTRY_SIZE);
            assert_eq!(available, INDEX_ENTRY_SIZE);
        },
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn frame_record_past_end_of_file() {
    let bytes = two_frames();
    let short = bytes[..bytes.len() - 1].to_vec();
    assert!(matches!(
        Decoder::from_reader(Cursor::new(short)),
        Err(Error::CorruptIndex { entry: Some(1), reason: "frame record extends past end of file" })
    ));
}

#[test]
fn overlapping_frame_records() {
    let mut bytes = two_frames();
    let first_offset = HEADER_SIZE + 2 * INDEX_ENTRY_SIZE;
    // Second entry's offset field.
    let at = (HEADER_SIZE + INDEX_ENTRY_SIZE + 8) as usize;
    bytes[at..at + 8].copy_from_slice(&first_offset.to_le_bytes());
    assert!(matches!(
        Decoder::from_reader(Cursor::new(bytes)),
        Err(Error::CorruptIndex { entry: Some(1), reason: "frame records overlap" })
    ));
}

#[test]
fn duplicate_timestamps() {
    let mut bytes = two_frames();
    let at = (HEADER_SIZE + INDEX_ENTRY_SIZE) as usize;
    bytes[at..at + 8].copy_from_slice(&100i64.to_le_bytes());
    assert!(matches!(
        Decoder::from_reader(Cursor::new(bytes)),
        Err(Error::CorruptIndex { entry: Some(1), reason: "duplicate frame timestamp" })
    ));
}

#[test]
fn strict_and_lenient_frame_decoding() {
    init_logger();
    let damaged = record(&object(&[("future", value(0x42, b"??")), ("iso", int(400))]));
    let bytes = container(None, &[(1, iso_record(100)), (2, damaged)]);

    // Index problems are independent of frame contents.
    let strict = Decoder::from_reader(Cursor::new(bytes.clone())).unwrap();
    assert_eq!(iso(&strict, 1), Some(100));
    assert!(matches!(
        strict.load_frame_metadata(2),
        Err(Error::Decode(DecodeError::UnknownTag { tag: 0x42, .. }))
    ));

    let results: Vec<bool> = strict.frame_metadata().map(|(_, metadata)| metadata.is_ok()).collect();
    assert_eq!(results, [true, false]);

    let lenient = Decoder::from_reader_with_config(Cursor::new(bytes), &DecodeConfig::default().lenient(true)).unwrap();
    let frame = lenient.load_frame_metadata(2).unwrap();
    assert!(frame.get("future").is_none());
    assert_eq!(frame.get("iso").and_then(Value::as_i64), Some(400));
}

#[test]
fn container_metadata_is_always_strict() {
    let metadata = record(&object(&[("make", string("X")), ("future", value(0x42, &[]))]));
    let bytes = container(Some(&metadata), &[(1, iso_record(100))]);
    let config = DecodeConfig::default().lenient(true);
    assert!(matches!(
        Decoder::from_reader_with_config(Cursor::new(bytes), &config),
        Err(Error::Decode(DecodeError::UnknownTag { tag: 0x42, .. }))
    ));
}

#[test]
fn frame_length_prefix_mismatch() {
    let mut frame = iso_record(100);
    let len = frame.len() as u64;
    frame[0] += 1;
    let bytes = container(None, &[(7, frame)]);
    let decoder = Decoder::from_reader_with_config(Cursor::new(bytes), &DecodeConfig::default().lenient(true)).unwrap();
    match decoder.load_frame_metadata(7) {
        Err(Error::Decode(DecodeError::LengthMismatch { declared, actual })) => {
            assert_eq!((declared, actual), (len + 1, len));
        },
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn record_size_limit() {
    let metadata = record(&object(&[("make", string("a fairly long manufacturer name"))]));
    let bytes = container(Some(&metadata), &[(1, iso_record(100))]);

    let config = DecodeConfig::default().with_max_record_size(metadata.len() as u32 - 1);
    assert!(matches!(
        Decoder::from_reader_with_config(Cursor::new(bytes.clone()), &config),
        Err(Error::ResourceLimitExceeded(_))
    ));

    let config = DecodeConfig::default().with_max_record_size(metadata.len() as u32);
    let decoder = Decoder::from_reader_with_config(Cursor::new(bytes.clone()), &config).unwrap();
    assert!(decoder.load_frame_metadata(1).is_ok());

    // Every listed frame stays loadable: an oversized frame record fails open.
    let frame = iso_record(100);
    let bytes = container(None, &[(1, frame.clone()), (2, iso_record(1_000))]);
    let config = DecodeConfig::default().with_max_record_size(frame.len() as u32 - 1);
    assert!(matches!(
        Decoder::from_reader_with_config(Cursor::new(bytes.clone()), &config),
        Err(Error::ResourceLimitExceeded(_))
    ));
    let config = DecodeConfig::default().with_max_record_size(frame.len() as u32);
    let decoder = Decoder::from_reader_with_config(Cursor::new(bytes), &config).unwrap();
    for (_, metadata) in decoder.frame_metadata() {
        assert!(metadata.is_ok());
    }
}

#[test]
fn unlimited_config() {
    let decoder = Decoder::from_reader_with_config(Cursor::new(two_frames()), &DecodeConfig::unlimited()).unwrap();
    assert_eq!(decoder.frame_count(), 2);
}

#[test]
fn concurrent_frame_loads() {
    init_logger();
    let frames: Vec<(i64, Vec<u8>)> = (0..64).map(|i| (i * 1000, iso_record(i))).collect();
    let file = write_temp(&container(None, &frames));
    let decoder = Decoder::open(file.path()).unwrap();

    std::thread::scope(|scope| {
        for worker in 0..4 {
            let decoder = &decoder;
            scope.spawn(move || {
                for &timestamp in decoder.frame_timestamps().iter().rev().skip(worker) {
                    assert_eq!(iso(decoder, timestamp), Some(timestamp / 1000));
                }
            });
        }
    });
}
