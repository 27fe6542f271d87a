// ABOUTME: HTSMSG binary message codec — the self-describing tagged-union wire format HTSP uses
// ABOUTME: Pure encode/decode with no I/O; a framed reader lives in `transport`

use std::collections::TryReserveError;
use num_enum::TryFromPrimitive;
use thiserror::Error;

/// Wire type tag. `Map` keys are required and unique by convention (not
/// enforced on decode); `List` entries are unnamed and any name present on
/// the wire is discarded.
#[derive(TryFromPrimitive)]
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum WireType {
    Map = 1,
    S64 = 2,
    Str = 3,
    Bin = 4,
    List = 5,
}

/// Maximum single-field value length accepted on decode. HTSP messages are
/// small RPC envelopes and file-read chunks; this bounds how much a
/// malformed or hostile length header can make us allocate.
const MAX_FIELD_LEN: usize = 64 * 1024 * 1024;

/// A value carried inside an HTSMSG message.
///
/// `Str` and `Bin` are kept distinct even though both are byte strings on
/// the wire, so binary payloads (the auth digest, file-read chunks) survive
/// a round trip without being forced through UTF-8 validation.
///
/// `S64` is widened to `i128` because the wire format reinterprets its
/// bytes as unsigned: the legal range is -1 (the all-ones sentinel) and
/// 0..=2^64-2, which overflows `i64` at the top end.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Map(Vec<(String, Value)>),
    List(Vec<Value>),
    S64(i128),
    Str(String),
    Bin(Vec<u8>),
}

impl Value {
    pub fn map(fields: impl IntoIterator<Item = (impl Into<String>, Value)>) -> Value {
        Value::Map(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn str(s: impl Into<String>) -> Value {
        Value::Str(s.into())
    }

    pub fn as_map(&self) -> Option<&[(String, Value)]> {
        match self {
            Value::Map(fields) => Some(fields),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// The full wire range as-is. Prefer this over [`Value::as_i64`] for
    /// fields that can legally carry values above `i64::MAX` on the wire
    /// (the reinterpreted-unsigned range up to 2^64-2).
    pub fn as_i128(&self) -> Option<i128> {
        match self {
            Value::S64(n) => Some(*n),
            _ => None,
        }
    }

    /// Fails (`None`) for values outside `i64`'s range. Most HTSP fields
    /// (ids, seqs, timestamps) fit comfortably; use [`Value::as_i128`] for
    /// the few that can legitimately exceed it.
    pub fn as_i64(&self) -> Option<i64> {
        self.as_i128().and_then(|n| i64::try_from(n).ok())
    }

    pub fn as_u32(&self) -> Option<u32> {
        self.as_i64().and_then(|n| u32::try_from(n).ok())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bin(&self) -> Option<&[u8]> {
        match self {
            Value::Bin(b) => Some(b),
            _ => None,
        }
    }

    /// Looks up a field by name inside a `Map`. Returns `None` for any
    /// other variant, or if the key is absent.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_map()?.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }
}

/// Errors from encoding or decoding an HTSMSG message or field.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("message shorter than its length prefix")]
    Incomplete,

    #[error("declared length {declared} does not match body length {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("field header truncated")]
    TruncatedHeader,

    #[error("field body truncated: need {need} more bytes")]
    TruncatedBody { need: usize },

    #[error("unknown field type {0}")]
    UnknownType(u8),

    #[error("map field has an empty name")]
    EmptyMapKey,

    #[error("field is not valid UTF-8")]
    InvalidUtf8,

    #[error("S64 value out of the representable -1..=2^64-2 range")]
    ValueOutOfRange,

    #[error("S64 wire value wider than 8 bytes")]
    S64TooWide,

    #[error("top-level message must be a Map")]
    NotAMap,

    #[error("field length {0} exceeds the maximum accepted size")]
    FieldTooLarge(usize),

    #[error("allocation failed while decoding: {0}")]
    Alloc(String),
}

impl From<TryReserveError> for CodecError {
    fn from(err: TryReserveError) -> Self {
        CodecError::Alloc(err.to_string())
    }
}

/// Encodes `message` (which must be a `Value::Map`) as a length-prefixed
/// HTSMSG frame: 4-byte big-endian length followed by the concatenated
/// field encodings of the map.
pub fn encode(message: &Value) -> Result<Vec<u8>, CodecError> {
    let Value::Map(fields) = message else {
        return Err(CodecError::NotAMap);
    };

    let mut body = Vec::new();
    for (name, value) in fields {
        encode_field(&mut body, Some(name), value)?;
    }

    let mut framed = Vec::with_capacity(body.len() + 4);
    framed.extend_from_slice(&(body.len() as u32).to_be_bytes());
    framed.extend_from_slice(&body);
    Ok(framed)
}

/// Decodes a length-prefixed HTSMSG frame previously produced by
/// [`encode`]. `buf` must contain exactly one frame (length prefix plus
/// body); use the framed reader in `transport` to carve frames out of a
/// byte stream first.
pub fn decode(buf: &[u8]) -> Result<Value, CodecError> {
    if buf.len() < 4 {
        return Err(CodecError::Incomplete);
    }
    let declared = u32::from_be_bytes(buf[0..4].try_into().unwrap()) as usize;
    let body = &buf[4..];
    if body.len() != declared {
        return Err(CodecError::LengthMismatch {
            declared,
            actual: body.len(),
        });
    }

    decode_value(WireType::Map, body)
}

fn encode_field(out: &mut Vec<u8>, name: Option<&str>, value: &Value) -> Result<(), CodecError> {
    let name_bytes = name.unwrap_or("").as_bytes();
    let value_bytes = encode_value_body(value)?;

    out.push(type_tag(value) as u8);
    out.push(name_bytes.len() as u8);
    out.extend_from_slice(&(value_bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(name_bytes);
    out.extend_from_slice(&value_bytes);
    Ok(())
}

fn type_tag(value: &Value) -> WireType {
    match value {
        Value::Map(_) => WireType::Map,
        Value::S64(_) => WireType::S64,
        Value::Str(_) => WireType::Str,
        Value::Bin(_) => WireType::Bin,
        Value::List(_) => WireType::List,
    }
}

fn encode_value_body(value: &Value) -> Result<Vec<u8>, CodecError> {
    match value {
        Value::Map(fields) => {
            let mut body = Vec::new();
            for (name, v) in fields {
                encode_field(&mut body, Some(name), v)?;
            }
            Ok(body)
        }
        Value::List(items) => {
            let mut body = Vec::new();
            for v in items {
                encode_field(&mut body, None, v)?;
            }
            Ok(body)
        }
        Value::S64(n) => encode_s64(*n),
        Value::Str(s) => Ok(s.as_bytes().to_vec()),
        Value::Bin(b) => Ok(b.clone()),
    }
}

/// Minimal big-endian encoding of the unsigned 64-bit reinterpretation of
/// `v`, leading zero bytes stripped, then byte-reversed into wire order.
/// Zero encodes as a single zero byte; -1 is the all-ones sentinel. Legal
/// range is -1 and 0..=2^64-2 (`u64::MAX` is reserved for the sentinel).
fn encode_s64(v: i128) -> Result<Vec<u8>, CodecError> {
    let bits: u64 = match v {
        -1 => u64::MAX,
        v if (0..=(u64::MAX as i128 - 1)).contains(&v) => v as u64,
        _ => return Err(CodecError::ValueOutOfRange),
    };

    if bits == 0 {
        return Ok(vec![0]);
    }

    let be = bits.to_be_bytes();
    let first_nonzero = be.iter().position(|&b| b != 0).unwrap();
    let mut trimmed = be[first_nonzero..].to_vec();
    trimmed.reverse();
    Ok(trimmed)
}

/// Inverse of [`encode_s64`]: reverse the wire bytes back into big-endian
/// order, right-pad with zeros to 8 bytes, then read as an unsigned
/// 64-bit integer. The all-ones pattern decodes to -1; every other value
/// decodes to its own unsigned bit pattern (up to 2^64-2).
fn decode_s64(wire: &[u8]) -> Result<i128, CodecError> {
    if wire.len() > 8 {
        return Err(CodecError::S64TooWide);
    }

    let mut be = wire.to_vec();
    be.reverse();

    let mut full = [0u8; 8];
    full[8 - be.len()..].copy_from_slice(&be);
    let bits = u64::from_be_bytes(full);

    if bits == u64::MAX {
        Ok(-1)
    } else {
        Ok(bits as i128)
    }
}

fn decode_value(ty: WireType, raw: &[u8]) -> Result<Value, CodecError> {
    match ty {
        WireType::Map => {
            let mut fields = Vec::new();
            for (field_type, name, value) in parse_fields(raw)? {
                if name.is_empty() {
                    return Err(CodecError::EmptyMapKey);
                }
                let key = String::from_utf8(name).map_err(|_| CodecError::InvalidUtf8)?;
                fields.push((key, decode_value(field_type, &value)?));
            }
            Ok(Value::Map(fields))
        }
        WireType::List => {
            let mut items = Vec::new();
            for (field_type, _name, value) in parse_fields(raw)? {
                items.push(decode_value(field_type, &value)?);
            }
            Ok(Value::List(items))
        }
        WireType::S64 => Ok(Value::S64(decode_s64(raw)?)),
        WireType::Str => Ok(Value::Str(
            String::from_utf8(raw.to_vec()).map_err(|_| CodecError::InvalidUtf8)?,
        )),
        WireType::Bin => Ok(Value::Bin(raw.to_vec())),
    }
}

/// Walks a Map/List body once, splitting it into `(type, name, value)`
/// triples. The caller decides whether an empty name is an error (Map) or
/// simply unused (List).
fn parse_fields(buf: &[u8]) -> Result<Vec<(WireType, Vec<u8>, Vec<u8>)>, CodecError> {
    const HEADER_LEN: usize = 6; // type(1) + namelen(1) + valuelen(4)

    let mut fields = Vec::new();
    let mut pos = 0;

    while pos < buf.len() {
        if buf.len() - pos < HEADER_LEN {
            return Err(CodecError::TruncatedHeader);
        }

        let raw_type = buf[pos];
        let field_type = WireType::try_from(raw_type).map_err(|_| CodecError::UnknownType(raw_type))?;
        let name_len = buf[pos + 1] as usize;
        let value_len = u32::from_be_bytes(buf[pos + 2..pos + 6].try_into().unwrap()) as usize;
        pos += HEADER_LEN;

        if value_len > MAX_FIELD_LEN {
            return Err(CodecError::FieldTooLarge(value_len));
        }

        let remaining = buf.len().saturating_sub(pos);
        if remaining < name_len + value_len {
            return Err(CodecError::TruncatedBody {
                need: name_len + value_len - remaining,
            });
        }

        let name = buf[pos..pos + name_len].to_vec();
        pos += name_len;
        let value = buf[pos..pos + value_len].to_vec();
        pos += value_len;

        fields.push((field_type, name, value));
    }

    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(v: Value) {
        let encoded = encode(&v).expect("encode");
        let decoded = decode(&encoded).expect("decode");
        assert_eq!(v, decoded);
    }

    #[test]
    fn roundtrips_scalars_and_nesting() {
        roundtrip(Value::map([
            ("method", Value::str("hello")),
            ("seq", Value::S64(0)),
        ]));
        roundtrip(Value::map([("neg", Value::S64(-1))]));
        roundtrip(Value::map([("i64_max", Value::S64(i64::MAX as i128))]));
        roundtrip(Value::map([("wire_max", Value::S64(u64::MAX as i128 - 1))]));
        roundtrip(Value::map([("empty_str", Value::str(""))]));
        roundtrip(Value::map([("empty_bin", Value::Bin(vec![]))]));
        roundtrip(Value::map([(
            "multibyte",
            Value::str("caf\u{e9} \u{1f4fa}"),
        )]));
        roundtrip(Value::map([(
            "nested",
            Value::map([("inner", Value::List(vec![Value::S64(1), Value::S64(2)]))]),
        )]));
    }

    #[test]
    fn s64_sentinel_round_trips_to_minus_one() {
        let encoded = encode_s64(-1).unwrap();
        assert_eq!(encoded, vec![0xFF; 8]);
        assert_eq!(decode_s64(&encoded).unwrap(), -1);
        assert_eq!(decode_s64(&[0xFF; 8]).unwrap(), -1);
    }

    #[test]
    fn zero_encodes_as_single_byte() {
        let encoded = encode_s64(0).unwrap();
        assert_eq!(encoded, vec![0]);
    }

    #[test]
    fn max_legal_value_round_trips_and_is_distinct_from_the_sentinel() {
        let max_legal = u64::MAX as i128 - 1;
        let encoded = encode_s64(max_legal).unwrap();
        assert_eq!(encoded, vec![0xFE, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(decode_s64(&encoded).unwrap(), max_legal);
        assert_ne!(decode_s64(&encoded).unwrap(), -1);
    }

    #[test]
    fn value_above_max_legal_is_rejected() {
        assert_eq!(encode_s64(u64::MAX as i128), Err(CodecError::ValueOutOfRange));
        assert_eq!(encode_s64(-2), Err(CodecError::ValueOutOfRange));
    }

    #[test]
    fn length_prefix_matches_remaining_bytes() {
        let msg = Value::map([("method", Value::str("hello")), ("seq", Value::S64(0))]);
        let framed = encode(&msg).unwrap();
        let declared = u32::from_be_bytes(framed[0..4].try_into().unwrap()) as usize;
        assert_eq!(declared, framed.len() - 4);
    }

    #[test]
    fn matches_concrete_hello_vector() {
        // method->"hello": 6-byte header + 6-byte name + 5-byte value = 17
        // seq->0: 6-byte header + 3-byte name + 1-byte value = 10
        // body = 27 bytes total
        let msg = Value::map([("method", Value::str("hello")), ("seq", Value::S64(0))]);
        let framed = encode(&msg).unwrap();
        assert_eq!(&framed[0..4], &[0x00, 0x00, 0x00, 0x1B]);
    }

    #[test]
    fn matches_concrete_negative_one_vector() {
        let msg = Value::map([("v", Value::S64(-1))]);
        let framed = encode(&msg).unwrap();
        // type(1)=S64, namelen=1, valuelen=8, name="v", value=8 bytes of 0xFF
        let body = &framed[4..];
        assert_eq!(body[0], WireType::S64 as u8);
        assert_eq!(body[1], 1);
        assert_eq!(&body[2..6], &8u32.to_be_bytes());
        assert_eq!(body[6], b'v');
        assert_eq!(&body[7..15], &[0xFF; 8]);
    }

    #[test]
    fn rejects_unknown_type_tag() {
        let mut framed = vec![0u8, 0, 0, 8];
        framed.extend_from_slice(&[0x00, 1, 0, 0, 0, 1, b'x', 0]); // type 0
        assert_eq!(decode(&framed), Err(CodecError::UnknownType(0)));
    }

    #[test]
    fn rejects_zero_length_map_key() {
        let mut framed = vec![0u8, 0, 0, 7];
        framed.extend_from_slice(&[WireType::S64 as u8, 0, 0, 0, 0, 1, 0]); // namelen=0
        assert_eq!(decode(&framed), Err(CodecError::EmptyMapKey));
    }

    #[test]
    fn rejects_short_body() {
        let mut framed = vec![0u8, 0, 0, 20]; // declares 20 bytes, supplies fewer
        framed.extend_from_slice(&[WireType::Str as u8, 1, 0, 0, 0, 1, b'x', b'y']);
        assert!(matches!(decode(&framed), Err(CodecError::LengthMismatch { .. })));
    }

    #[test]
    fn tolerates_named_list_entries_by_discarding_the_name() {
        let mut body = Vec::new();
        encode_field(&mut body, Some("ignored"), &Value::S64(7)).unwrap();
        let decoded = decode_value(WireType::List, &body).unwrap();
        assert_eq!(decoded, Value::List(vec![Value::S64(7)]));
    }
}
