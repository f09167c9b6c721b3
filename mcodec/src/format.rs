//! Media format descriptors.
//!
//! A [`MediaFormat`] is a typed key/value property bag describing a stream:
//! mime type, resolution, bitrate, codec specific data and so on. The key
//! vocabulary is open, [`keys`] only names the keys this crate reads itself.
//!
//! Getters return `None` both for missing keys and for keys stored with a
//! different type, absence is never an error.
//!
//! ```
//! use mcodec::format::{keys, MediaFormat};
//!
//! let mut format = MediaFormat::new();
//! format.set_string(keys::MIME, "video/avc");
//! format.set_int32(keys::WIDTH, 1920);
//!
//! assert_eq!(format.get_int32(keys::WIDTH), Some(1920));
//! assert_eq!(format.get_int64(keys::WIDTH), None);
//! assert_eq!(format.to_string(), "mime: string(video/avc), width: int32(1920)");
//! ```

use crate::{Error, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{collections::BTreeMap, fmt};

/// Well known format keys.
pub mod keys {
    pub const MIME: &str = "mime";
    pub const WIDTH: &str = "width";
    pub const HEIGHT: &str = "height";
    pub const BIT_RATE: &str = "bitrate";
    pub const FRAME_RATE: &str = "frame-rate";
    pub const COLOR_FORMAT: &str = "color-format";
    pub const SAMPLE_RATE: &str = "sample-rate";
    pub const CHANNEL_COUNT: &str = "channel-count";
    pub const DURATION: &str = "durationUs";
    pub const CROP: &str = "crop";
    pub const CSD_0: &str = "csd-0";
    pub const MAX_INPUT_SIZE: &str = "max-input-size";
    pub const FEATURE_SECURE_PLAYBACK: &str = "feature-secure-playback";

    pub const CRYPTO_MODE: &str = "crypto-mode";
    pub const CRYPTO_KEY: &str = "crypto-key";
    pub const CRYPTO_IV: &str = "crypto-iv";
    pub const CRYPTO_PLAIN_SIZES: &str = "crypto-plain-sizes";
    pub const CRYPTO_ENCRYPTED_SIZES: &str = "crypto-encrypted-sizes";
    pub const CRYPTO_ENCRYPTED_BYTE_BLOCK: &str = "crypto-encrypted-byte-block";
    pub const CRYPTO_SKIP_BYTE_BLOCK: &str = "crypto-skip-byte-block";
}

/// Rectangle value, edges are inclusive like crop windows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }
}

/// A single typed entry of a [`MediaFormat`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum FormatValue {
    Int32(i32),
    Int64(i64),
    Float(f32),
    Double(f64),
    Size(usize),
    Rect(Rect),
    String(String),
    Buffer(#[serde(with = "base64_bytes")] Vec<u8>),
}

impl fmt::Display for FormatValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int32(x) => write!(f, "int32({})", x),
            Self::Int64(x) => write!(f, "int64({})", x),
            Self::Float(x) => write!(f, "float({})", x),
            Self::Double(x) => write!(f, "double({})", x),
            Self::Size(x) => write!(f, "size({})", x),
            Self::Rect(r) => write!(
                f,
                "rect({}, {}, {}, {})",
                r.left, r.top, r.right, r.bottom
            ),
            Self::String(x) => write!(f, "string({})", x),
            Self::Buffer(x) => write!(f, "data({} bytes)", x.len()),
        }
    }
}

/// Typed key/value description of a media stream.
///
/// Keys are case-sensitive and unique. Setters insert or overwrite and cannot fail.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(
    from = "BTreeMap<String, FormatValue>",
    into = "BTreeMap<String, FormatValue>"
)]
pub struct MediaFormat {
    entries: BTreeMap<String, FormatValue>,
    released: bool,
}

impl From<BTreeMap<String, FormatValue>> for MediaFormat {
    fn from(entries: BTreeMap<String, FormatValue>) -> Self {
        Self {
            entries,
            released: false,
        }
    }
}

impl From<MediaFormat> for BTreeMap<String, FormatValue> {
    fn from(format: MediaFormat) -> Self {
        format.entries
    }
}

impl MediaFormat {
    /// Create an empty format.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a format from its generic message representation.
    ///
    /// The message is a json object mapping every key to `{"type": .., "value": ..}`,
    /// as produced by [`MediaFormat::to_message`].
    pub fn from_message(message: &Value) -> Result<Self> {
        if !message.is_object() {
            return Err(Error::InvalidMessage(format!(
                "expected an object, found {}",
                message
            )));
        }

        Ok(serde_json::from_value(message.clone())?)
    }

    /// Serialize the format to its generic message representation.
    pub fn to_message(&self) -> Value {
        Value::Object(
            self.entries
                .iter()
                .filter_map(|(key, value)| {
                    serde_json::to_value(value).ok().map(|x| (key.clone(), x))
                })
                .collect(),
        )
    }

    /// Drop all entries. Safe to call any number of times.
    ///
    /// A released format answers every query with `None` and ignores setters.
    pub fn release(&mut self) {
        self.entries.clear();
        self.released = true;
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&FormatValue> {
        self.entries.get(name)
    }

    /// Iterate over all entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FormatValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn remove(&mut self, name: &str) -> Option<FormatValue> {
        self.entries.remove(name)
    }

    /// Shortcut for the `mime` string entry.
    pub fn mime(&self) -> Option<&str> {
        self.get_string(keys::MIME)
    }

    pub fn get_int32(&self, name: &str) -> Option<i32> {
        match self.entries.get(name) {
            Some(FormatValue::Int32(x)) => Some(*x),
            _ => None,
        }
    }

    pub fn get_int64(&self, name: &str) -> Option<i64> {
        match self.entries.get(name) {
            Some(FormatValue::Int64(x)) => Some(*x),
            _ => None,
        }
    }

    pub fn get_float(&self, name: &str) -> Option<f32> {
        match self.entries.get(name) {
            Some(FormatValue::Float(x)) => Some(*x),
            _ => None,
        }
    }

    pub fn get_double(&self, name: &str) -> Option<f64> {
        match self.entries.get(name) {
            Some(FormatValue::Double(x)) => Some(*x),
            _ => None,
        }
    }

    pub fn get_size(&self, name: &str) -> Option<usize> {
        match self.entries.get(name) {
            Some(FormatValue::Size(x)) => Some(*x),
            _ => None,
        }
    }

    pub fn get_rect(&self, name: &str) -> Option<Rect> {
        match self.entries.get(name) {
            Some(FormatValue::Rect(x)) => Some(*x),
            _ => None,
        }
    }

    /// Borrow a buffer entry. The slice lives only until the next mutation.
    pub fn get_buffer(&self, name: &str) -> Option<&[u8]> {
        match self.entries.get(name) {
            Some(FormatValue::Buffer(x)) => Some(x),
            _ => None,
        }
    }

    pub fn get_string(&self, name: &str) -> Option<&str> {
        match self.entries.get(name) {
            Some(FormatValue::String(x)) => Some(x),
            _ => None,
        }
    }

    /// Insert or overwrite an entry of any type.
    pub fn set(&mut self, name: &str, value: FormatValue) {
        if self.released {
            warn!("ignoring '{}' on a released format", name);
            return;
        }

        self.entries.insert(name.to_owned(), value);
    }

    pub fn set_int32(&mut self, name: &str, value: i32) {
        self.set(name, FormatValue::Int32(value));
    }

    pub fn set_int64(&mut self, name: &str, value: i64) {
        self.set(name, FormatValue::Int64(value));
    }

    pub fn set_float(&mut self, name: &str, value: f32) {
        self.set(name, FormatValue::Float(value));
    }

    pub fn set_double(&mut self, name: &str, value: f64) {
        self.set(name, FormatValue::Double(value));
    }

    pub fn set_size(&mut self, name: &str, value: usize) {
        self.set(name, FormatValue::Size(value));
    }

    pub fn set_rect(&mut self, name: &str, left: i32, top: i32, right: i32, bottom: i32) {
        self.set(name, FormatValue::Rect(Rect::new(left, top, right, bottom)));
    }

    pub fn set_string(&mut self, name: &str, value: impl Into<String>) {
        self.set(name, FormatValue::String(value.into()));
    }

    /// Copies `data` into the format.
    pub fn set_buffer(&mut self, name: &str, data: &[u8]) {
        self.set(name, FormatValue::Buffer(data.to_vec()));
    }

    /// Overwrite entries of `self` that also exist in `other`.
    ///
    /// Returns the keys of `other` that were not present and were therefore skipped.
    pub fn update_existing(&mut self, other: &MediaFormat) -> Vec<String> {
        let mut skipped = vec![];

        for (key, value) in &other.entries {
            match self.entries.get_mut(key) {
                Some(x) => *x = value.clone(),
                None => skipped.push(key.clone()),
            }
        }

        skipped
    }
}

impl fmt::Display for MediaFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (key, value)) in self.entries.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", key, value)?;
        }
        Ok(())
    }
}

mod base64_bytes {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_are_absent() {
        let format = MediaFormat::new();

        assert_eq!(format.get_int32("width"), None);
        assert_eq!(format.get_int64("width"), None);
        assert_eq!(format.get_float("width"), None);
        assert_eq!(format.get_double("width"), None);
        assert_eq!(format.get_size("width"), None);
        assert_eq!(format.get_rect("width"), None);
        assert_eq!(format.get_buffer("width"), None);
        assert_eq!(format.get_string("width"), None);
    }

    #[test]
    fn typed_values_round_trip() {
        let mut format = MediaFormat::new();
        format.set_int32("a", -7);
        format.set_int64("b", 1 << 40);
        format.set_float("c", 29.97);
        format.set_double("d", 0.125);
        format.set_size("e", 4096);
        format.set_rect("f", 0, 0, 1919, 1079);
        format.set_string("g", "video/avc");
        format.set_buffer("h", &[0, 0, 0, 1, 0x67]);

        assert_eq!(format.get_int32("a"), Some(-7));
        assert_eq!(format.get_int64("b"), Some(1 << 40));
        assert_eq!(format.get_float("c"), Some(29.97));
        assert_eq!(format.get_double("d"), Some(0.125));
        assert_eq!(format.get_size("e"), Some(4096));
        assert_eq!(format.get_rect("f"), Some(Rect::new(0, 0, 1919, 1079)));
        assert_eq!(format.get_string("g"), Some("video/avc"));
        assert_eq!(format.get_buffer("h"), Some(&[0, 0, 0, 1, 0x67][..]));
    }

    #[test]
    fn keys_are_case_sensitive() {
        let mut format = MediaFormat::new();
        format.set_int32("Width", 640);

        assert_eq!(format.get_int32("width"), None);
        assert_eq!(format.get_int32("Width"), Some(640));
    }

    #[test]
    fn setter_overwrites_type() {
        let mut format = MediaFormat::new();
        format.set_int32("bitrate", 1);
        format.set_int64("bitrate", 2);

        assert_eq!(format.get_int32("bitrate"), None);
        assert_eq!(format.get_int64("bitrate"), Some(2));
        assert_eq!(format.len(), 1);
    }

    #[test]
    fn message_round_trip() {
        let mut format = MediaFormat::new();
        format.set_string(keys::MIME, "audio/opus");
        format.set_int32(keys::SAMPLE_RATE, 48000);
        format.set_buffer(keys::CSD_0, b"OpusHead");
        format.set_rect(keys::CROP, 0, 0, 9, 9);

        let message = format.to_message();
        assert_eq!(message["mime"]["type"], "string");
        assert_eq!(message["csd-0"]["value"], "T3B1c0hlYWQ=");

        let parsed = MediaFormat::from_message(&message).unwrap();
        assert_eq!(parsed, format);
    }

    #[test]
    fn message_must_be_an_object() {
        let err = MediaFormat::from_message(&Value::from(3)).unwrap_err();
        assert!(matches!(err, Error::InvalidMessage(_)));
    }

    #[test]
    fn release_is_idempotent() {
        let mut format = MediaFormat::new();
        format.set_int32(keys::WIDTH, 1);
        format.release();
        format.release();

        assert!(format.is_released());
        assert_eq!(format.get_int32(keys::WIDTH), None);

        format.set_int32(keys::WIDTH, 2);
        assert!(format.is_empty());
    }

    #[test]
    fn update_existing_skips_unknown_keys() {
        let mut format = MediaFormat::new();
        format.set_int32(keys::BIT_RATE, 1_000_000);

        let mut params = MediaFormat::new();
        params.set_int32(keys::BIT_RATE, 2_000_000);
        params.set_int32("vendor.unknown", 1);

        let skipped = format.update_existing(&params);
        assert_eq!(skipped, vec!["vendor.unknown".to_owned()]);
        assert_eq!(format.get_int32(keys::BIT_RATE), Some(2_000_000));
    }

    #[test]
    fn display_is_sorted() {
        let mut format = MediaFormat::new();
        format.set_int32(keys::WIDTH, 1280);
        format.set_string(keys::MIME, "video/hevc");
        format.set_buffer(keys::CSD_0, &[1, 2, 3]);

        assert_eq!(
            format.to_string(),
            "csd-0: data(3 bytes), mime: string(video/hevc), width: int32(1280)"
        );
    }
}
