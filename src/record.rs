// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Self-describing metadata records.
//!
//! A record is a `u32` little-endian length prefix (counting itself) followed
//! by exactly one framed root value. Every value is framed the same way:
//!
//! ```text
//! value := tag:u8 body_length:uleb128 body[body_length]
//! ```
//!
//! Because each body carries its own length, a value that fails to decode can
//! be stepped over without losing sync with its siblings. Lenient mode relies
//! on that to drop individual fields.

use std::collections::{BTreeMap, BTreeSet};

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, warn};
use serde::de::{self, Deserialize, Deserializer, MapAccess, SeqAccess, Visitor};

use crate::document::{MetadataDocument, Value};
use crate::{DecodeError, ParseOptions, ToU64};

/// Size of the length prefix at the start of every record.
pub(crate) const RECORD_PREFIX_SIZE: usize = 4;

/// Value kinds, as found in the tag byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tag {
    Null,
    Bool,
    Int,
    Float,
    String,
    Array,
    Object,
    /// UTF-8 JSON text, parsed into the same tree.
    Json,
}

impl Tag {
    const fn from_u8(tag: u8) -> Option<Self> {
        Some(match tag {
            0 => Self::Null,
            1 => Self::Bool,
            2 => Self::Int,
            3 => Self::Float,
            4 => Self::String,
            5 => Self::Array,
            6 => Self::Object,
            7 => Self::Json,
            _ => return None,
        })
    }
}

/// A value whose framing has been read but whose body is still undecoded.
#[derive(Debug)]
struct Framed<'a> {
    tag: u8,
    /// Record offset of the tag byte.
    offset: u64,
    body: &'a [u8],
    /// Record offset of `body[0]`.
    body_offset: u64,
}

/// Forward-only reader over a slice of a record. Never looks past `buf`.
struct Cursor<'a> {
    buf: &'a [u8],
    /// Record offset of `buf[0]`.
    pos: u64,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8], pos: u64) -> Self {
        Self { buf, pos }
    }

    fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn offset(&self) -> u64 {
        self.pos
    }

    fn take(&mut self, len: u64) -> Result<&'a [u8], DecodeError> {
        let available = self.buf.len().to_u64();
        let mismatch = DecodeError::LengthMismatch { declared: len, actual: available };
        let len = usize::try_from(len).map_err(|_| mismatch)?;
        if len > self.buf.len() {
            return Err(mismatch);
        }
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        self.pos += len.to_u64();
        Ok(head)
    }

    fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    fn read_length(&mut self) -> Result<u64, DecodeError> {
        let offset = self.pos;
        let mut rest = self.buf;
        let len = leb128::read::unsigned(&mut rest)
            .map_err(|_| DecodeError::MalformedValue { reason: "unreadable uleb128 length", offset })?;
        let used = self.buf.len() - rest.len();
        self.buf = rest;
        self.pos += used.to_u64();
        Ok(len)
    }

    fn next_value(&mut self) -> Result<Framed<'a>, DecodeError> {
        let offset = self.pos;
        let tag = self.read_u8()?;
        let len = self.read_length()?;
        let body_offset = self.pos;
        let body = self.take(len)?;
        Ok(Framed { tag, offset, body, body_offset })
    }
}

/// Decode one metadata record.
///
/// `bytes` must be exactly the record: the length prefix is checked against
/// `bytes.len()` and nothing outside the slice is ever read. Offsets reported
/// in errors are relative to `bytes[0]`.
///
/// In lenient mode, array elements and object fields that fail to decode are
/// dropped with a warning. The root value, the length prefix, and the nesting
/// limit are enforced in both modes.
pub fn decode_record(bytes: &[u8], options: &ParseOptions) -> Result<MetadataDocument, DecodeError> {
    let actual = bytes.len().to_u64();
    let Some((prefix, rest)) = bytes.split_first_chunk::<RECORD_PREFIX_SIZE>() else {
        return Err(DecodeError::LengthMismatch { declared: RECORD_PREFIX_SIZE.to_u64(), actual });
    };
    let declared = u64::from(LittleEndian::read_u32(prefix));
    if declared != actual {
        return Err(DecodeError::LengthMismatch { declared, actual });
    }

    let mut cursor = Cursor::new(rest, RECORD_PREFIX_SIZE.to_u64());
    let root = cursor.next_value()?;
    if !cursor.is_empty() {
        // The root value ends before the record does.
        return Err(DecodeError::LengthMismatch { declared: root.body_offset + root.body.len().to_u64(), actual });
    }

    match decode_value(&root, 0, options)? {
        Value::Object(map) => {
            debug!("decoded {actual} byte record with {} fields", map.len());
            Ok(MetadataDocument::from_map(map))
        },
        _ => Err(DecodeError::MalformedValue { reason: "record root is not an object", offset: root.offset }),
    }
}

fn decode_value(v: &Framed<'_>, depth: u32, options: &ParseOptions) -> Result<Value, DecodeError> {
    let tag = Tag::from_u8(v.tag).ok_or(DecodeError::UnknownTag { tag: v.tag, offset: v.offset })?;
    let malformed = |reason| DecodeError::MalformedValue { reason, offset: v.offset };

    match tag {
        Tag::Null if v.body.is_empty() => Ok(Value::Null),
        Tag::Null => Err(malformed("null value has a body")),
        Tag::Bool => match v.body {
            [0] => Ok(Value::Bool(false)),
            [1] => Ok(Value::Bool(true)),
            _ => Err(malformed("bool must be a single 0 or 1 byte")),
        },
        Tag::Int if v.body.len() == 8 => Ok(Value::Int(LittleEndian::read_i64(v.body))),
        Tag::Int => Err(malformed("int must be 8 bytes")),
        Tag::Float if v.body.len() == 8 => {
            let f = LittleEndian::read_f64(v.body);
            if f.is_finite() {
                Ok(Value::Float(f))
            } else {
                Err(malformed("float is not finite"))
            }
        },
        Tag::Float => Err(malformed("float must be 8 bytes")),
        Tag::String => std::str::from_utf8(v.body)
            .map(|s| Value::String(s.to_owned()))
            .map_err(|_| malformed("string is not UTF-8")),
        Tag::Array => decode_array(v, depth + 1, options),
        Tag::Object => decode_object(v, depth + 1, options),
        Tag::Json => {
            let json: serde_json::Value =
                serde_json::from_slice(v.body).map_err(|_| malformed("invalid JSON text"))?;
            // `serde_json::Map` keeps the last of repeated keys, so they are caught on the raw text.
            serde_json::from_slice::<UniqueKeys>(v.body).map_err(|_| malformed("duplicate object key"))?;
            from_json(json, v.offset, depth, options)
        },
    }
}

fn check_depth(offset: u64, depth: u32, options: &ParseOptions) -> Result<(), DecodeError> {
    if depth > options.max_depth {
        return Err(DecodeError::NestingTooDeep { offset });
    }
    Ok(())
}

/// Drop a failed child in lenient mode, otherwise pass the error on.
fn skip_or_fail(err: DecodeError, options: &ParseOptions, what: std::fmt::Arguments<'_>) -> Result<(), DecodeError> {
    if options.lenient && err.is_recoverable() {
        warn!("skipping {what}: {err}");
        Ok(())
    } else {
        Err(err)
    }
}

fn decode_array(v: &Framed<'_>, depth: u32, options: &ParseOptions) -> Result<Value, DecodeError> {
    check_depth(v.offset, depth, options)?;

    let mut items = Vec::new();
    let mut body = Cursor::new(v.body, v.body_offset);
    while !body.is_empty() {
        let item = body.next_value()?;
        match decode_value(&item, depth, options) {
            Ok(value) => items.push(value),
            Err(err) => skip_or_fail(err, options, format_args!("array element at {}", item.offset))?,
        }
    }
    Ok(Value::Array(items))
}

fn decode_object(v: &Framed<'_>, depth: u32, options: &ParseOptions) -> Result<Value, DecodeError> {
    check_depth(v.offset, depth, options)?;

    let mut map = BTreeMap::new();
    let mut body = Cursor::new(v.body, v.body_offset);
    while !body.is_empty() {
        let key_offset = body.offset();
        let key_len = body.read_length()?;
        let key = body.take(key_len)?;
        let value = body.next_value()?;

        let field = std::str::from_utf8(key)
            .map_err(|_| DecodeError::MalformedValue { reason: "object key is not UTF-8", offset: key_offset })
            .and_then(|key| {
                if map.contains_key(key) {
                    return Err(DecodeError::MalformedValue { reason: "duplicate object key", offset: key_offset });
                }
                Ok((key, decode_value(&value, depth, options)?))
            });
        match field {
            Ok((key, value)) => {
                map.insert(key.to_owned(), value);
            },
            Err(err) => skip_or_fail(err, options, format_args!("object field at {key_offset}"))?,
        }
    }
    Ok(Value::Object(map))
}

/// Convert an embedded JSON document. Failures here take out the whole
/// JSON value; lenient mode does not reach inside it.
fn from_json(json: serde_json::Value, offset: u64, depth: u32, options: &ParseOptions) -> Result<Value, DecodeError> {
    Ok(match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => {
            // Numbers keep their source text, so integer literals are told
            // apart from floats even when they overflow every native type.
            if n.to_string().contains(['.', 'e', 'E']) {
                n.as_f64()
                    .filter(|f| f.is_finite())
                    .map(Value::Float)
                    .ok_or(DecodeError::MalformedValue { reason: "JSON number is not finite", offset })?
            } else {
                n.as_i64()
                    .map(Value::Int)
                    .ok_or(DecodeError::MalformedValue { reason: "JSON integer out of range", offset })?
            }
        },
        serde_json::Value::String(s) => Value::String(s),
        serde_json::Value::Array(items) => {
            check_depth(offset, depth + 1, options)?;
            items
                .into_iter()
                .map(|item| from_json(item, offset, depth + 1, options))
                .collect::<Result<_, _>>()
                .map(Value::Array)?
        },
        serde_json::Value::Object(fields) => {
            check_depth(offset, depth + 1, options)?;
            let mut map = BTreeMap::new();
            for (key, item) in fields {
                let item = from_json(item, offset, depth + 1, options)?;
                map.insert(key, item);
            }
            Value::Object(map)
        },
    })
}

/// Walks embedded JSON text and fails on the first object that repeats a key.
struct UniqueKeys;

impl<'de> Deserialize<'de> for UniqueKeys {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(UniqueKeysVisitor)
    }
}

struct UniqueKeysVisitor;

impl<'de> Visitor<'de> for UniqueKeysVisitor {
    type Value = UniqueKeys;

    fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("a JSON value")
    }

    fn visit_bool<E: de::Error>(self, _: bool) -> Result<UniqueKeys, E> {
        Ok(UniqueKeys)
    }

    fn visit_i64<E: de::Error>(self, _: i64) -> Result<UniqueKeys, E> {
        Ok(UniqueKeys)
    }

    fn visit_u64<E: de::Error>(self, _: u64) -> Result<UniqueKeys, E> {
        Ok(UniqueKeys)
    }

    fn visit_f64<E: de::Error>(self, _: f64) -> Result<UniqueKeys, E> {
        Ok(UniqueKeys)
    }

    fn visit_str<E: de::Error>(self, _: &str) -> Result<UniqueKeys, E> {
        Ok(UniqueKeys)
    }

    fn visit_unit<E: de::Error>(self) -> Result<UniqueKeys, E> {
        Ok(UniqueKeys)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<UniqueKeys, A::Error> {
        while seq.next_element::<UniqueKeys>()?.is_some() {}
        Ok(UniqueKeys)
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<UniqueKeys, A::Error> {
        let mut seen = BTreeSet::new();
        while let Some(key) = map.next_key::<String>()? {
            if !seen.insert(key) {
                return Err(de::Error::custom("duplicate object key"));
            }
            map.next_value::<UniqueKeys>()?;
        }
        Ok(UniqueKeys)
    }
}

#[cfg(test)]
fn framed(tag: u8, body: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    leb128::write::unsigned(&mut out, body.len() as u64).unwrap();
    out.extend_from_slice(body);
    out
}

#[cfg(test)]
fn object(fields: &[(&str, Vec<u8>)]) -> Vec<u8> {
    let mut body = Vec::new();
    for (key, value) in fields {
        leb128::write::unsigned(&mut body, key.len() as u64).unwrap();
        body.extend_from_slice(key.as_bytes());
        body.extend_from_slice(value);
    }
    framed(6, &body)
}

#[cfg(test)]
fn int(i: i64) -> Vec<u8> {
    framed(2, &i.to_le_bytes())
}

#[cfg(test)]
fn record(root: &[u8]) -> Vec<u8> {
    let mut out = ((root.len() + RECORD_PREFIX_SIZE) as u32).to_le_bytes().to_vec();
    out.extend_from_slice(root);
    out
}

#[cfg(test)]
fn lenient() -> ParseOptions {
    ParseOptions { lenient: true, ..ParseOptions::default() }
}

#[test]
fn decodes_flat_object() {
    let bytes = record(&object(&[("iso", int(100))]));
    let doc = decode_record(&bytes, &ParseOptions::default()).unwrap();
    assert_eq!(doc.len(), 1);
    assert_eq!(doc.get("iso"), Some(&Value::Int(100)));
}

#[test]
fn decodes_every_kind() {
    let array = [int(1), int(2), framed(0, &[])].concat();
    let nested = object(&[("model", framed(4, b"Pixel"))]);
    let bytes = record(&object(&[
        ("null", framed(0, &[])),
        ("yes", framed(1, &[1])),
        ("no", framed(1, &[0])),
        ("exposure", framed(3, &0.5f64.to_le_bytes())),
        ("name", framed(4, "caf\u{e9}".as_bytes())),
        ("list", framed(5, &array)),
        ("device", nested),
        ("empty", object(&[])),
    ]));
    let doc = decode_record(&bytes, &ParseOptions::default()).unwrap();

    assert!(doc.get("null").unwrap().is_null());
    assert_eq!(doc.get("yes").and_then(Value::as_bool), Some(true));
    assert_eq!(doc.get("no").and_then(Value::as_bool), Some(false));
    assert_eq!(doc.get("exposure").and_then(Value::as_f64), Some(0.5));
    assert_eq!(doc.get("name").and_then(Value::as_str), Some("caf\u{e9}"));
    assert_eq!(
        doc.get("list"),
        Some(&Value::Array(vec![Value::Int(1), Value::Int(2), Value::Null]))
    );
    let device = doc.get("device").and_then(Value::as_object).unwrap();
    assert_eq!(device.get("model").and_then(Value::as_str), Some("Pixel"));
    assert_eq!(doc.get("empty").and_then(Value::as_object).map(BTreeMap::len), Some(0));
}

#[test]
fn decodes_embedded_json() {
    let bytes = record(&framed(7, br#"{"make":"X","iso":100,"wb":[1.5,2],"af":{"locked":true}}"#));
    let doc = decode_record(&bytes, &ParseOptions::default()).unwrap();
    assert_eq!(doc.get("make").and_then(Value::as_str), Some("X"));
    assert_eq!(doc.get("iso"), Some(&Value::Int(100)));
    assert_eq!(doc.get("wb"), Some(&Value::Array(vec![Value::Float(1.5), Value::Int(2)])));
    let af = doc.get("af").and_then(Value::as_object).unwrap();
    assert_eq!(af.get("locked"), Some(&Value::Bool(true)));
}

#[test]
fn json_field_inside_object() {
    let bytes = record(&object(&[("extra", framed(7, b"[1,null]"))]));
    let doc = decode_record(&bytes, &ParseOptions::default()).unwrap();
    assert_eq!(doc.get("extra"), Some(&Value::Array(vec![Value::Int(1), Value::Null])));
}

#[test]
fn length_prefix_must_match_range() {
    let mut bytes = record(&object(&[("iso", int(100))]));
    let len = bytes.len() as u64;
    bytes.push(0);
    assert_eq!(
        decode_record(&bytes, &ParseOptions::default()),
        Err(DecodeError::LengthMismatch { declared: len, actual: len + 1 })
    );
    assert_eq!(
        decode_record(&bytes[..len as usize - 1], &lenient()),
        Err(DecodeError::LengthMismatch { declared: len, actual: len - 1 })
    );
    assert_eq!(
        decode_record(&[1, 0], &ParseOptions::default()),
        Err(DecodeError::LengthMismatch { declared: 4, actual: 2 })
    );
}

#[test]
fn root_must_fill_record() {
    let mut root = object(&[("iso", int(100))]);
    let root_len = root.len() as u64;
    root.extend_from_slice(&framed(0, &[]));
    let bytes = record(&root);
    assert_eq!(
        decode_record(&bytes, &lenient()),
        Err(DecodeError::LengthMismatch { declared: 4 + root_len, actual: bytes.len() as u64 })
    );
}

#[test]
fn body_overrunning_parent_is_length_mismatch() {
    // Object body declares 50 bytes but only 3 follow.
    let root = [6u8, 50, 0, 0, 0];
    let bytes = record(&root);
    assert_eq!(
        decode_record(&bytes, &ParseOptions::default()),
        Err(DecodeError::LengthMismatch { declared: 50, actual: 3 })
    );
}

#[test]
fn root_must_be_object() {
    let bytes = record(&int(1));
    assert_eq!(
        decode_record(&bytes, &lenient()),
        Err(DecodeError::MalformedValue { reason: "record root is not an object", offset: 4 })
    );
    let bytes = record(&framed(7, b"[1,2]"));
    assert!(matches!(decode_record(&bytes, &lenient()), Err(DecodeError::MalformedValue { .. })));
}

#[test]
fn unknown_tag_strict_and_lenient() {
    let bytes = record(&object(&[("future", framed(0x42, b"??")), ("iso", int(200))]));
    // Root object body starts at 4 + tag + one-byte length; the field key is
    // one length byte plus "future", so the value tag sits at 4 + 2 + 1 + 6.
    assert_eq!(
        decode_record(&bytes, &ParseOptions::default()),
        Err(DecodeError::UnknownTag { tag: 0x42, offset: 13 })
    );

    let doc = decode_record(&bytes, &lenient()).unwrap();
    assert_eq!(doc.len(), 1);
    assert_eq!(doc.get("iso"), Some(&Value::Int(200)));
}

#[test]
fn unknown_root_tag_is_fatal_in_lenient_mode() {
    let bytes = record(&framed(0x42, &[]));
    assert_eq!(decode_record(&bytes, &lenient()), Err(DecodeError::UnknownTag { tag: 0x42, offset: 4 }));
}

#[test]
fn malformed_values_strict_and_lenient() {
    let cases: [(&str, Vec<u8>, &str); 7] = [
        ("bool", framed(1, &[2]), "bool must be a single 0 or 1 byte"),
        ("int", framed(2, &[1, 2, 3]), "int must be 8 bytes"),
        ("nan", framed(3, &f64::NAN.to_le_bytes()), "float is not finite"),
        ("short", framed(3, &[0; 4]), "float must be 8 bytes"),
        ("text", framed(4, &[0xff, 0xfe]), "string is not UTF-8"),
        ("null", framed(0, &[0]), "null value has a body"),
        ("json", framed(7, b"{not json"), "invalid JSON text"),
    ];
    for (key, value, reason) in cases {
        let bytes = record(&object(&[(key, value), ("ok", int(1))]));
        match decode_record(&bytes, &ParseOptions::default()) {
            Err(DecodeError::MalformedValue { reason: got, .. }) => assert_eq!(got, reason, "{key}"),
            other => panic!("{key}: unexpected {other:?}"),
        }
        let doc = decode_record(&bytes, &lenient()).unwrap();
        assert!(doc.get(key).is_none(), "{key}");
        assert_eq!(doc.get("ok"), Some(&Value::Int(1)), "{key}");
    }
}

#[test]
fn json_integer_out_of_range() {
    let bytes = record(&object(&[("big", framed(7, b"18446744073709551615"))]));
    assert!(matches!(
        decode_record(&bytes, &ParseOptions::default()),
        Err(DecodeError::MalformedValue { reason: "JSON integer out of range", .. })
    ));
}

#[test]
fn json_integers_beyond_every_native_type() {
    for text in ["-99999999999999999999", "184467440737095516150", "[1,9223372036854775808]"] {
        let bytes = record(&object(&[("v", framed(7, text.as_bytes()))]));
        assert!(
            matches!(
                decode_record(&bytes, &ParseOptions::default()),
                Err(DecodeError::MalformedValue { reason: "JSON integer out of range", .. })
            ),
            "{text}"
        );
    }
}

#[test]
fn json_numbers_at_the_edges() {
    let bytes = record(&framed(7, br#"{"min":-9223372036854775808,"max":9223372036854775807,"sci":1e2,"neg":-0.5}"#));
    let doc = decode_record(&bytes, &ParseOptions::default()).unwrap();
    assert_eq!(doc.get("min"), Some(&Value::Int(i64::MIN)));
    assert_eq!(doc.get("max"), Some(&Value::Int(i64::MAX)));
    assert_eq!(doc.get("sci"), Some(&Value::Float(100.0)));
    assert_eq!(doc.get("neg"), Some(&Value::Float(-0.5)));
}

#[test]
fn json_duplicate_keys() {
    for text in [&br#"{"iso":1,"iso":2}"#[..], br#"[{"a":{"iso":1,"iso":2}}]"#] {
        let bytes = record(&object(&[("v", framed(7, text)), ("ok", int(1))]));
        assert!(matches!(
            decode_record(&bytes, &ParseOptions::default()),
            Err(DecodeError::MalformedValue { reason: "duplicate object key", .. })
        ));
        // Lenient mode drops the embedded JSON value as a whole.
        let doc = decode_record(&bytes, &lenient()).unwrap();
        assert!(doc.get("v").is_none());
        assert_eq!(doc.get("ok"), Some(&Value::Int(1)));
    }

    // Equal keys in sibling objects are fine.
    let bytes = record(&framed(7, br#"{"a":{"iso":1},"b":{"iso":2}}"#));
    assert!(decode_record(&bytes, &ParseOptions::default()).is_ok());
}

#[test]
fn duplicate_keys() {
    let bytes = record(&object(&[("iso", int(100)), ("iso", int(200))]));
    assert!(matches!(
        decode_record(&bytes, &ParseOptions::default()),
        Err(DecodeError::MalformedValue { reason: "duplicate object key", .. })
    ));
    // Lenient keeps the first occurrence.
    let doc = decode_record(&bytes, &lenient()).unwrap();
    assert_eq!(doc.get("iso"), Some(&Value::Int(100)));
}

#[test]
fn lenient_skips_inside_nested_containers() {
    let list = [int(1), framed(9, &[]), int(3)].concat();
    let inner = object(&[("bad", framed(1, &[7])), ("good", framed(4, b"yes"))]);
    let bytes = record(&object(&[("list", framed(5, &list)), ("inner", inner)]));

    assert!(decode_record(&bytes, &ParseOptions::default()).is_err());

    let doc = decode_record(&bytes, &lenient()).unwrap();
    assert_eq!(doc.get("list"), Some(&Value::Array(vec![Value::Int(1), Value::Int(3)])));
    let inner = doc.get("inner").and_then(Value::as_object).unwrap();
    assert_eq!(inner.len(), 1);
    assert_eq!(inner.get("good").and_then(Value::as_str), Some("yes"));
}

#[test]
fn lenient_drops_child_with_broken_framing() {
    // The inner object claims a 9-byte child with nothing left in its body;
    // its parent still knows where the inner object ends.
    let broken = framed(6, &[1, b'k', 2, 9]);
    let bytes = record(&object(&[("broken", broken), ("iso", int(100))]));
    assert!(matches!(
        decode_record(&bytes, &ParseOptions::default()),
        Err(DecodeError::LengthMismatch { .. })
    ));
    let doc = decode_record(&bytes, &lenient()).unwrap();
    assert!(doc.get("broken").is_none());
    assert_eq!(doc.get("iso"), Some(&Value::Int(100)));
}

#[test]
fn nesting_limit() {
    let mut value = int(1);
    for _ in 0..4 {
        value = framed(5, &value);
    }
    let bytes = record(&object(&[("deep", value)]));

    let tight = ParseOptions { max_depth: 4, ..lenient() };
    assert!(matches!(decode_record(&bytes, &tight), Err(DecodeError::NestingTooDeep { .. })));

    let roomy = ParseOptions { max_depth: 5, ..ParseOptions::default() };
    assert!(decode_record(&bytes, &roomy).is_ok());
}

#[test]
fn json_nesting_limit() {
    let bytes = record(&framed(7, br#"{"a":{"b":{"c":[1]}}}"#));
    let tight = ParseOptions { max_depth: 3, ..ParseOptions::default() };
    assert!(matches!(decode_record(&bytes, &tight), Err(DecodeError::NestingTooDeep { offset: 4 })));
    let roomy = ParseOptions { max_depth: 4, ..ParseOptions::default() };
    assert!(decode_record(&bytes, &roomy).is_ok());
}

#[test]
fn decoding_is_pure() {
    let bytes = record(&object(&[("iso", int(100)), ("make", framed(4, b"X"))]));
    let a = decode_record(&bytes, &ParseOptions::default()).unwrap();
    let b = decode_record(&bytes, &ParseOptions::default()).unwrap();
    assert_eq!(a, b);
}
