//! Cache payload codec.
//!
//! Every value written to the store is a JSON-compatible tree
//! ([`serde_json::Value`]). The codec turns it into tagged bytes and back:
//!
//! ```text
//! COMPRESSED:<gzip(postcard(tree))>   preferred encoding
//! JSON:<utf-8 json text>              fallback when the binary path fails
//! <untagged>                          legacy entries, gzip+binary or raw json
//! ```
//!
//! Decoding never fails loudly: anything unreadable comes back as `None` so the
//! caller can treat the entry as corrupted and drop it.

use crate::error::{Error, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::io::{Read, Write};

/// Prefix of compressed binary entries.
pub const COMPRESSED_TAG: &[u8] = b"COMPRESSED:";

/// Prefix of plain JSON entries.
pub const JSON_TAG: &[u8] = b"JSON:";

/// Default gzip level.
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 6;

/// Storage format of an encoded entry, detected from its prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatTag {
    Compressed,
    Json,
    Legacy,
}

impl FormatTag {
    /// Detect the format of a stored payload.
    pub fn detect(bytes: &[u8]) -> Self {
        if bytes.starts_with(COMPRESSED_TAG) {
            FormatTag::Compressed
        } else if bytes.starts_with(JSON_TAG) {
            FormatTag::Json
        } else {
            FormatTag::Legacy
        }
    }

    /// Prefix written in front of payloads of this format.
    pub fn prefix(&self) -> &'static [u8] {
        match self {
            FormatTag::Compressed => COMPRESSED_TAG,
            FormatTag::Json => JSON_TAG,
            FormatTag::Legacy => b"",
        }
    }
}

/// Deepest container nesting accepted when reading a payload, matching
/// serde_json's own recursion limit.
pub const MAX_DEPTH: usize = 128;

/// Largest decompressed payload accepted when reading.
pub const MAX_DECOMPRESSED_BYTES: u64 = 32 * 1024 * 1024;

/// One step of a flattened JSON tree.
///
/// Postcard is not self-describing, so `serde_json::Value` cannot be read back
/// from it directly. The tree is written as a pre-order token stream instead;
/// containers carry their length and object members are preceded by a `Key`.
/// A flat stream keeps both directions free of recursion.
#[derive(Debug, Serialize, Deserialize)]
enum Token {
    Null,
    Bool(bool),
    Unsigned(u64),
    Signed(i64),
    Float(f64),
    Text(String),
    Key(String),
    List(u64),
    Object(u64),
}

enum Frame<'a> {
    Value(&'a Value, usize),
    Key(&'a str),
}

fn flatten(root: &Value) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut pending = vec![Frame::Value(root, 0)];

    while let Some(frame) = pending.pop() {
        let (value, depth) = match frame {
            Frame::Key(k) => {
                tokens.push(Token::Key(k.to_string()));
                continue;
            }
            Frame::Value(value, depth) => (value, depth),
        };
        if depth > MAX_DEPTH {
            return Err(Error::SerializationError(format!(
                "value nested deeper than {} levels",
                MAX_DEPTH
            )));
        }

        tokens.push(match value {
            Value::Null => Token::Null,
            Value::Bool(b) => Token::Bool(*b),
            Value::Number(n) => {
                if let Some(u) = n.as_u64() {
                    Token::Unsigned(u)
                } else if let Some(i) = n.as_i64() {
                    Token::Signed(i)
                } else {
                    Token::Float(n.as_f64().unwrap_or_default())
                }
            }
            Value::String(s) => Token::Text(s.clone()),
            Value::Array(items) => {
                pending.extend(items.iter().rev().map(|v| Frame::Value(v, depth + 1)));
                Token::List(items.len() as u64)
            }
            Value::Object(map) => {
                for (k, v) in map.iter().rev() {
                    pending.push(Frame::Value(v, depth + 1));
                    pending.push(Frame::Key(k));
                }
                Token::Object(map.len() as u64)
            }
        });
    }
    Ok(tokens)
}

/// A container still collecting its members.
enum Partial {
    List {
        items: Vec<Value>,
        remaining: u64,
    },
    Object {
        map: Map<String, Value>,
        remaining: u64,
        key: Option<String>,
    },
}

impl Partial {
    fn into_value(self) -> Value {
        match self {
            Partial::List { items, .. } => Value::Array(items),
            Partial::Object { map, .. } => Value::Object(map),
        }
    }
}

fn malformed(reason: &str) -> Error {
    Error::SerializationError(format!("malformed payload: {}", reason))
}

fn rebuild(tokens: Vec<Token>) -> Result<Value> {
    let mut tokens = tokens.into_iter();
    let mut open: Vec<Partial> = Vec::new();

    loop {
        let token = tokens.next().ok_or_else(|| malformed("truncated"))?;

        let awaiting_key = matches!(open.last(), Some(Partial::Object { key: None, .. }));
        if let Token::Key(k) = token {
            match open.last_mut() {
                Some(Partial::Object { key, .. }) if key.is_none() => *key = Some(k),
                _ => return Err(malformed("unexpected key")),
            }
            continue;
        }
        if awaiting_key {
            return Err(malformed("object member without key"));
        }

        let mut value = match token {
            Token::Null => Value::Null,
            Token::Bool(b) => Value::Bool(b),
            Token::Unsigned(u) => Value::Number(u.into()),
            Token::Signed(i) => Value::Number(i.into()),
            Token::Float(f) => Value::Number(Number::from_f64(f).ok_or_else(|| {
                Error::SerializationError(format!("non-finite float {} in payload", f))
            })?),
            Token::Text(s) => Value::String(s),
            Token::Key(_) => return Err(malformed("unexpected key")),
            Token::List(0) => Value::Array(Vec::new()),
            Token::Object(0) => Value::Object(Map::new()),
            Token::List(_) | Token::Object(_) if open.len() >= MAX_DEPTH => {
                return Err(malformed("nesting too deep"));
            }
            Token::List(n) => {
                open.push(Partial::List {
                    items: Vec::with_capacity(n.min(1024) as usize),
                    remaining: n,
                });
                continue;
            }
            Token::Object(n) => {
                open.push(Partial::Object {
                    map: Map::new(),
                    remaining: n,
                    key: None,
                });
                continue;
            }
        };

        // attach to the enclosing container, closing every container it fills
        loop {
            let filled = match open.last_mut() {
                None => {
                    return match tokens.next() {
                        None => Ok(value),
                        Some(_) => Err(malformed("trailing data")),
                    };
                }
                Some(Partial::List { items, remaining }) => {
                    items.push(value);
                    *remaining -= 1;
                    *remaining == 0
                }
                Some(Partial::Object { map, remaining, key }) => {
                    let k = key.take().ok_or_else(|| malformed("object member without key"))?;
                    map.insert(k, value);
                    *remaining -= 1;
                    *remaining == 0
                }
            };
            if !filled {
                break;
            }
            value = match open.pop() {
                Some(partial) => partial.into_value(),
                None => return Err(malformed("unbalanced containers")),
            };
        }
    }
}

/// Encoder/decoder for stored payloads.
#[derive(Debug, Clone, Copy)]
pub struct Codec {
    level: Compression,
}

impl Default for Codec {
    fn default() -> Self {
        Codec::new(DEFAULT_COMPRESSION_LEVEL)
    }
}

impl Codec {
    /// Create a codec with the given gzip level (clamped to 0..=9).
    pub fn new(level: u32) -> Self {
        Codec {
            level: Compression::new(level.min(9)),
        }
    }

    /// Encode a value for storage. Always succeeds.
    ///
    /// The compressed binary form is tried first; any failure there falls back
    /// to tagged JSON text.
    pub fn encode(&self, value: &Value) -> Vec<u8> {
        match self.encode_compressed(value) {
            Ok(body) => [COMPRESSED_TAG, body.as_slice()].concat(),
            Err(e) => {
                warn!("Binary encoding failed, storing JSON instead: {}", e);
                encode_json(value)
            }
        }
    }

    fn encode_compressed(&self, value: &Value) -> Result<Vec<u8>> {
        let binary = postcard::to_allocvec(&flatten(value)?)
            .map_err(|e| Error::SerializationError(format!("postcard: {}", e)))?;

        let mut encoder = GzEncoder::new(Vec::with_capacity(binary.len() / 2), self.level);
        encoder
            .write_all(&binary)
            .and_then(|_| encoder.finish())
            .map_err(|e| Error::SerializationError(format!("gzip: {}", e)))
    }

    /// Decode a stored payload, text or bytes.
    ///
    /// Returns `None` for anything that cannot be read back.
    pub fn decode(&self, data: impl AsRef<[u8]>) -> Option<Value> {
        let bytes = data.as_ref();
        match FormatTag::detect(bytes) {
            FormatTag::Compressed => {
                match decode_compressed(&bytes[COMPRESSED_TAG.len()..]) {
                    Ok(value) => Some(value),
                    Err(e) => {
                        warn!("Failed to decompress/deserialize compressed data: {}", e);
                        None
                    }
                }
            }
            FormatTag::Json => match serde_json::from_slice(&bytes[JSON_TAG.len()..]) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!("Failed to parse JSON data: {}", e);
                    None
                }
            },
            FormatTag::Legacy => decode_compressed(bytes)
                .or_else(|_| serde_json::from_slice::<Value>(bytes))
                .map_err(|_| warn!("Failed to deserialize legacy data"))
                .ok(),
        }
    }
}

fn encode_json(value: &Value) -> Vec<u8> {
    let text = serde_json::to_vec(value).unwrap_or_else(|e| {
        error!("JSON encoding failed: {}", e);
        b"null".to_vec()
    });
    [JSON_TAG, text.as_slice()].concat()
}

fn decode_compressed(body: &[u8]) -> Result<Value> {
    let mut binary = Vec::new();
    GzDecoder::new(body)
        .take(MAX_DECOMPRESSED_BYTES + 1)
        .read_to_end(&mut binary)
        .map_err(|e| Error::SerializationError(format!("gzip: {}", e)))?;
    if binary.len() as u64 > MAX_DECOMPRESSED_BYTES {
        return Err(Error::SerializationError(format!(
            "decompressed payload exceeds {} bytes",
            MAX_DECOMPRESSED_BYTES
        )));
    }

    let tokens: Vec<Token> = postcard::from_bytes(&binary)
        .map_err(|e| Error::SerializationError(format!("postcard: {}", e)))?;
    rebuild(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "symbol": "AAPL",
            "marketCap": 3_400_000_000_000u64,
            "beta": 1.24,
            "change": -3,
            "tags": ["tech", null, true],
            "nested": {"empty": {}, "list": []}
        })
    }

    #[test]
    fn test_encode_uses_compressed_tag() {
        let bytes = Codec::default().encode(&sample());
        assert!(bytes.starts_with(COMPRESSED_TAG));
        assert_eq!(FormatTag::detect(&bytes), FormatTag::Compressed);
    }

    #[test]
    fn test_roundtrip_compressed() {
        let codec = Codec::default();
        let value = sample();
        assert_eq!(codec.decode(codec.encode(&value)), Some(value));
    }

    #[test]
    fn test_decode_tagged_json() {
        let codec = Codec::default();
        let decoded = codec.decode(br#"JSON:{"symbol":"MSFT"}"#);
        assert_eq!(decoded, Some(json!({"symbol": "MSFT"})));
    }

    #[test]
    fn test_decode_accepts_text_input() {
        let codec = Codec::default();
        let decoded = codec.decode(r#"JSON:[1,2,3]"#);
        assert_eq!(decoded, Some(json!([1, 2, 3])));
    }

    #[test]
    fn test_decode_legacy_json() {
        let codec = Codec::default();
        assert_eq!(codec.decode(br#"{"a":1}"#), Some(json!({"a": 1})));
    }

    #[test]
    fn test_decode_legacy_compressed() {
        let codec = Codec::default();
        let tagged = codec.encode(&sample());
        let untagged = &tagged[COMPRESSED_TAG.len()..];
        assert_eq!(codec.decode(untagged), Some(sample()));
    }

    #[test]
    fn test_decode_corrupted_compressed_returns_none() {
        let codec = Codec::default();
        assert_eq!(codec.decode(b"COMPRESSED:not gzip at all"), None);
    }

    #[test]
    fn test_decode_truncated_compressed_returns_none() {
        let codec = Codec::default();
        let bytes = codec.encode(&sample());
        assert_eq!(codec.decode(&bytes[..bytes.len() - 8]), None);
    }

    #[test]
    fn test_decode_bad_json_returns_none() {
        let codec = Codec::default();
        assert_eq!(codec.decode(b"JSON:{\"unterminated\""), None);
        assert_eq!(codec.decode(b"\xff\xfe garbage"), None);
        assert_eq!(codec.decode(b""), None);
    }

    #[test]
    fn test_json_fallback_is_decodable() {
        let codec = Codec::default();
        let bytes = encode_json(&sample());
        assert!(bytes.starts_with(JSON_TAG));
        assert_eq!(codec.decode(bytes), Some(sample()));
    }

    #[test]
    fn test_compression_level_zero_still_roundtrips() {
        let codec = Codec::new(0);
        assert_eq!(codec.decode(codec.encode(&sample())), Some(sample()));
    }

    fn gzip(raw: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
        encoder.write_all(raw).expect("Failed to compress");
        encoder.finish().expect("Failed to finish gzip stream")
    }

    fn tagged_tokens(tokens: &[Token]) -> Vec<u8> {
        let binary = postcard::to_allocvec(tokens).expect("Failed to serialize tokens");
        [COMPRESSED_TAG, gzip(&binary).as_slice()].concat()
    }

    #[test]
    fn test_deeply_nested_payload_is_rejected() {
        let codec = Codec::default();
        let mut tokens: Vec<Token> = (0..20_000).map(|_| Token::List(1)).collect();
        tokens.push(Token::Null);

        let tagged = tagged_tokens(&tokens);
        assert!(tagged.len() < 1024);
        assert_eq!(codec.decode(&tagged), None);
        assert_eq!(codec.decode(&tagged[COMPRESSED_TAG.len()..]), None);
    }

    #[test]
    fn test_nesting_up_to_limit_roundtrips() {
        let codec = Codec::default();
        let mut value = Value::Null;
        for _ in 0..MAX_DEPTH {
            value = Value::Array(vec![value]);
        }
        let bytes = codec.encode(&value);
        assert!(bytes.starts_with(COMPRESSED_TAG));
        assert_eq!(codec.decode(&bytes), Some(value.clone()));

        let deeper = Value::Array(vec![value]);
        assert!(codec.encode(&deeper).starts_with(JSON_TAG));
    }

    #[test]
    fn test_oversized_decompression_is_rejected() {
        let codec = Codec::default();
        let bomb = gzip(&vec![0u8; MAX_DECOMPRESSED_BYTES as usize + 1]);
        let tagged = [COMPRESSED_TAG, bomb.as_slice()].concat();
        assert_eq!(codec.decode(&tagged), None);
    }

    #[test]
    fn test_malformed_token_streams_are_rejected() {
        let codec = Codec::default();
        let cases: Vec<Vec<Token>> = vec![
            vec![Token::List(2), Token::Null],
            vec![Token::Key("a".to_string())],
            vec![Token::Object(1), Token::Null],
            vec![Token::List(1), Token::Key("a".to_string()), Token::Null],
            vec![Token::Null, Token::Null],
            vec![Token::Float(f64::NAN)],
            vec![],
        ];
        for tokens in cases {
            assert_eq!(codec.decode(tagged_tokens(&tokens)), None, "{:?}", tokens);
        }

        let ok = vec![
            Token::Object(2),
            Token::Key("s".to_string()),
            Token::Text("AAPL".to_string()),
            Token::Key("v".to_string()),
            Token::List(0),
        ];
        assert_eq!(
            codec.decode(tagged_tokens(&ok)),
            Some(json!({"s": "AAPL", "v": []}))
        );
    }

    fn arb_json() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(|i| json!(i)),
            any::<u64>().prop_map(|u| json!(u)),
            (-1.0e12f64..1.0e12).prop_map(|f| json!(f)),
            ".{0,12}".prop_map(Value::String),
        ];
        leaf.prop_recursive(3, 32, 6, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
                prop::collection::btree_map("[a-z]{1,6}", inner, 0..6)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    proptest! {
        #[test]
        fn prop_roundtrip(value in arb_json()) {
            let codec = Codec::default();
            prop_assert_eq!(codec.decode(codec.encode(&value)), Some(value));
        }

        #[test]
        fn prop_decode_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
            let codec = Codec::default();
            let _ = codec.decode(&bytes);
            let mut tagged = COMPRESSED_TAG.to_vec();
            tagged.extend_from_slice(&bytes);
            prop_assert_eq!(codec.decode(&tagged), None);
        }
    }
}
