// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Decoded metadata trees.

use std::collections::BTreeMap;

/// A single node of a decoded metadata record.
///
/// Objects are keyed maps with unique keys; iteration is in key order, which
/// is also the order a presentation layer is expected to print them in.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    /// Always finite.
    Float(f64),
    String(String),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Self::Bool(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Self::Int(i) => Some(i),
            _ => None,
        }
    }

    /// Integers are widened, so `{"iso": 100}` reads back as `100.0` here too.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Self::Int(i) => Some(i as f64),
            Self::Float(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Self::Object(map) => Some(map),
            _ => None,
        }
    }

    /// Convert into a `serde_json` tree for display or re-serialization.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(i) => serde_json::Value::from(*i),
            // Finite by construction, so `from_f64` cannot return `None`.
            Self::Float(f) => serde_json::Number::from_f64(*f).map_or(serde_json::Value::Null, serde_json::Value::Number),
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::Array(items) => serde_json::Value::Array(items.iter().map(Self::to_json).collect()),
            Self::Object(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }
}

/// Structured metadata for a whole container or a single frame.
///
/// The root is always an object. A document is owned by whoever asked for
/// it; decoding the same record twice yields two equal, independent documents.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataDocument {
    root: BTreeMap<String, Value>,
}

impl MetadataDocument {
    /// An empty document, used when a container carries no metadata record.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_map(root: BTreeMap<String, Value>) -> Self {
        Self { root }
    }

    /// Look up a top-level field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.root.get(key)
    }

    /// Top-level fields in key order.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = (&str, &Value)> + '_ {
        self.root.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.root.len()
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    pub fn as_map(&self) -> &BTreeMap<String, Value> {
        &self.root
    }

    /// Give up the document wrapper and return the root as a [`Value::Object`].
    pub fn into_value(self) -> Value {
        Value::Object(self.root)
    }

    /// Convert into a `serde_json` object.
    ///
    /// Keys come out sorted, so `serde_json::to_string_pretty` on the result
    /// gives stable, key-sorted text.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(self.root.iter().map(|(k, v)| (k.clone(), v.to_json())).collect())
    }
}

#[cfg(test)]
fn sample() -> MetadataDocument {
    let mut lens = BTreeMap::new();
    lens.insert("focalLength".to_owned(), Value::Float(4.25));
    let mut root = BTreeMap::new();
    root.insert("make".to_owned(), Value::String("X".to_owned()));
    root.insert("iso".to_owned(), Value::Int(100));
    root.insert("hdr".to_owned(), Value::Bool(false));
    root.insert("lens".to_owned(), Value::Object(lens));
    root.insert("blackLevel".to_owned(), Value::Array(vec![Value::Int(64), Value::Int(64)]));
    root.insert("gps".to_owned(), Value::Null);
    MetadataDocument::from_map(root)
}

#[test]
fn document_accessors() {
    let doc = sample();
    assert_eq!(doc.len(), 6);
    assert_eq!(doc.get("make").and_then(Value::as_str), Some("X"));
    assert_eq!(doc.get("iso").and_then(Value::as_i64), Some(100));
    assert_eq!(doc.get("iso").and_then(Value::as_f64), Some(100.0));
    assert_eq!(doc.get("hdr").and_then(Value::as_bool), Some(false));
    assert!(doc.get("gps").is_some_and(Value::is_null));
    assert!(doc.get("missing").is_none());

    let lens = doc.get("lens").and_then(Value::as_object).unwrap();
    assert_eq!(lens.get("focalLength").and_then(Value::as_f64), Some(4.25));
    assert_eq!(doc.get("blackLevel").and_then(Value::as_array).map(<[Value]>::len), Some(2));
}

#[test]
fn document_iterates_in_key_order() {
    let doc = sample();
    let keys: Vec<&str> = doc.iter().map(|(k, _)| k).collect();
    assert_eq!(keys, ["blackLevel", "gps", "hdr", "iso", "lens", "make"]);
}

#[test]
fn document_to_json() {
    let json = sample().to_json();
    assert_eq!(json["make"], "X");
    assert_eq!(json["iso"], 100);
    assert_eq!(json["lens"]["focalLength"], 4.25);
    assert_eq!(json["blackLevel"][1], 64);
    assert!(json["gps"].is_null());

    let text = serde_json::to_string(&json).unwrap();
    assert!(text.starts_with(r#"{"blackLevel":[64,64],"gps":null"#), "{text}");
}

#[test]
fn empty_document() {
    let doc = MetadataDocument::new();
    assert!(doc.is_empty());
    assert_eq!(doc.into_value(), Value::Object(BTreeMap::new()));
}
