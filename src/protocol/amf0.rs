use byteorder::{BigEndian, ByteOrder};

use crate::error::RtmpError;

pub const NUMBER_MARKER: u8 = 0x00;
pub const BOOLEAN_MARKER: u8 = 0x01;
pub const STRING_MARKER: u8 = 0x02;
pub const OBJECT_MARKER: u8 = 0x03;
pub const NULL_MARKER: u8 = 0x05;
pub const ECMA_ARRAY_MARKER: u8 = 0x08;

/// A zero-length key followed by the object-end marker byte.
pub const OBJECT_END: [u8; 3] = [0x00, 0x00, 0x09];

/// An AMF0 value as carried by RTMP command and data messages.
///
/// `Object` keys are ordered for encoding and treated as a mapping for
/// lookup; `EcmaArray` preserves insertion order and permits duplicates.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(f64),
    Boolean(bool),
    String(String),
    Object(Vec<Pair>),
    Null,
    EcmaArray(Vec<Pair>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Pair {
    pub key: String,
    pub value: Value,
}

impl Pair {
    pub fn new(key: &str, value: Value) -> Self {
        Pair {
            key: key.to_string(),
            value,
        }
    }
}

impl Value {
    pub fn try_as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn try_as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn try_as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Mapping-style lookup over `Object` and `EcmaArray` entries. The
    /// first entry with a matching key wins.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Object(entries) | Value::EcmaArray(entries) => {
                entries.iter().find(|p| p.key == key).map(|p| &p.value)
            }
            _ => None,
        }
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        match self {
            Value::Number(n) => {
                out.push(NUMBER_MARKER);
                let mut buf = [0u8; 8];
                BigEndian::write_f64(&mut buf, *n);
                out.extend_from_slice(&buf);
            }
            Value::Boolean(b) => {
                out.push(BOOLEAN_MARKER);
                out.push(if *b { 0x01 } else { 0x00 });
            }
            Value::String(s) => {
                out.push(STRING_MARKER);
                write_raw_string(out, s);
            }
            Value::Object(entries) => {
                out.push(OBJECT_MARKER);
                write_pairs(out, entries);
            }
            Value::Null => out.push(NULL_MARKER),
            Value::EcmaArray(entries) => {
                out.push(ECMA_ARRAY_MARKER);
                let mut count = [0u8; 4];
                BigEndian::write_u32(&mut count, entries.len() as u32);
                out.extend_from_slice(&count);
                write_pairs(out, entries);
            }
        }
    }
}

fn write_raw_string(out: &mut Vec<u8>, s: &str) {
    let mut len = [0u8; 2];
    BigEndian::write_u16(&mut len, s.len() as u16);
    out.extend_from_slice(&len);
    out.extend_from_slice(s.as_bytes());
}

fn write_pairs(out: &mut Vec<u8>, entries: &[Pair]) {
    for pair in entries {
        write_raw_string(out, &pair.key);
        pair.value.write_to(out);
    }
    out.extend_from_slice(&OBJECT_END);
}

/// Encode a flat sequence of values, e.g. an AMF command payload.
pub fn encode_all(values: &[Value]) -> Vec<u8> {
    let mut out = Vec::new();
    for value in values {
        value.write_to(&mut out);
    }
    out
}

/// Decode values one after another until the buffer is exhausted. An empty
/// buffer yields an empty sequence; a truncated or unknown encoding fails.
pub fn decode_all(bytes: &[u8]) -> Result<Vec<Value>, RtmpError> {
    let mut cursor = Cursor::new(bytes);
    let mut values = Vec::new();
    while cursor.remaining() > 0 {
        values.push(decode_value(&mut cursor)?);
    }
    Ok(values)
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Cursor { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn peek(&self, len: usize) -> Option<&'a [u8]> {
        self.data.get(self.pos..self.pos + len)
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], RtmpError> {
        let slice = self
            .data
            .get(self.pos..self.pos + len)
            .ok_or(RtmpError::NotEnoughData)?;
        self.pos += len;
        Ok(slice)
    }

    fn take_u8(&mut self) -> Result<u8, RtmpError> {
        Ok(self.take(1)?[0])
    }
}

fn decode_value(cursor: &mut Cursor) -> Result<Value, RtmpError> {
    let marker = cursor.take_u8()?;
    match marker {
        NUMBER_MARKER => Ok(Value::Number(BigEndian::read_f64(cursor.take(8)?))),
        BOOLEAN_MARKER => Ok(Value::Boolean(cursor.take_u8()? == 0x01)),
        STRING_MARKER => Ok(Value::String(read_raw_string(cursor)?)),
        OBJECT_MARKER => Ok(Value::Object(read_pairs(cursor)?)),
        NULL_MARKER => Ok(Value::Null),
        ECMA_ARRAY_MARKER => {
            // the associative count is informational; decoding stops at the
            // end sentinel
            cursor.take(4)?;
            Ok(Value::EcmaArray(read_pairs(cursor)?))
        }
        other => Err(RtmpError::UnknownAmfMarker(other)),
    }
}

fn read_raw_string(cursor: &mut Cursor) -> Result<String, RtmpError> {
    let len = BigEndian::read_u16(cursor.take(2)?) as usize;
    let bytes = cursor.take(len)?;
    Ok(String::from_utf8_lossy(bytes).into_owned())
}

fn read_pairs(cursor: &mut Cursor) -> Result<Vec<Pair>, RtmpError> {
    let mut pairs = Vec::new();
    loop {
        match cursor.peek(3) {
            None => return Err(RtmpError::NotEnoughData),
            Some(end) if end == OBJECT_END => {
                cursor.take(3)?;
                return Ok(pairs);
            }
            Some(_) => {
                let key = read_raw_string(cursor)?;
                let value = decode_value(cursor)?;
                pairs.push(Pair { key, value });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_number() {
        let payload = [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
        assert_eq!(decode_all(&payload).unwrap(), vec![Value::Number(0.0)]);
    }

    #[test]
    fn decodes_boolean() {
        assert_eq!(
            decode_all(&[0x01, 0x01]).unwrap(),
            vec![Value::Boolean(true)]
        );
        assert_eq!(
            decode_all(&[0x01, 0x00]).unwrap(),
            vec![Value::Boolean(false)]
        );
    }

    #[test]
    fn decodes_string() {
        let payload = [0x02, 0x00, 0x05, 0x68, 0x65, 0x6c, 0x6c, 0x6f];
        assert_eq!(
            decode_all(&payload).unwrap(),
            vec![Value::String("hello".to_string())]
        );
        assert_eq!(
            decode_all(&[0x02, 0x00, 0x00]).unwrap(),
            vec![Value::String(String::new())]
        );
    }

    #[test]
    fn decodes_object() {
        let payload = [0x03, 0x00, 0x00, 0x09];
        assert_eq!(decode_all(&payload).unwrap(), vec![Value::Object(vec![])]);

        let payload = [
            0x03, // marker
            0x00, 0x05, 0x68, 0x65, 0x6c, 0x6c, 0x6f, // key
            0x02, 0x00, 0x05, 0x77, 0x6f, 0x72, 0x6c, 0x64, // value
            0x00, 0x00, 0x09, // end
        ];
        let values = decode_all(&payload).unwrap();
        assert_eq!(
            values[0].get("hello").and_then(Value::try_as_str),
            Some("world")
        );
    }

    #[test]
    fn decodes_null() {
        assert_eq!(decode_all(&[0x05]).unwrap(), vec![Value::Null]);
    }

    #[test]
    fn decodes_ecma_array() {
        let payload = [0x08, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x09];
        assert_eq!(
            decode_all(&payload).unwrap(),
            vec![Value::EcmaArray(vec![])]
        );

        let payload = [
            0x08, // marker
            0x00, 0x00, 0x00, 0x01, // associative count
            0x00, 0x05, 0x68, 0x65, 0x6c, 0x6c, 0x6f, // key
            0x02, 0x00, 0x05, 0x77, 0x6f, 0x72, 0x6c, 0x64, // value
            0x00, 0x00, 0x09, // end
        ];
        let values = decode_all(&payload).unwrap();
        assert_eq!(
            values,
            vec![Value::EcmaArray(vec![Pair::new(
                "hello",
                Value::String("world".to_string())
            )])]
        );
    }

    #[test]
    fn decodes_empty_buffer_to_empty_sequence() {
        assert_eq!(decode_all(&[]).unwrap(), vec![]);
    }

    #[test]
    fn rejects_unknown_marker() {
        match decode_all(&[0x0b]) {
            Err(RtmpError::UnknownAmfMarker(0x0b)) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn rejects_truncated_encodings() {
        // number missing payload bytes
        assert!(matches!(
            decode_all(&[0x00, 0x01, 0x02]),
            Err(RtmpError::NotEnoughData)
        ));
        // string shorter than its length prefix
        assert!(matches!(
            decode_all(&[0x02, 0x00, 0x05, 0x68]),
            Err(RtmpError::NotEnoughData)
        ));
        // object without an end marker
        assert!(matches!(
            decode_all(&[0x03, 0x00, 0x01, 0x61, 0x05]),
            Err(RtmpError::NotEnoughData)
        ));
    }

    #[test]
    fn encodes_number() {
        let mut out = Vec::new();
        Value::Number(15.0).write_to(&mut out);
        assert_eq!(out, [0x00, 0x40, 0x2e, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn encodes_boolean() {
        let mut out = Vec::new();
        Value::Boolean(true).write_to(&mut out);
        assert_eq!(out, [0x01, 0x01]);

        out.clear();
        Value::Boolean(false).write_to(&mut out);
        assert_eq!(out, [0x01, 0x00]);
    }

    #[test]
    fn encodes_string() {
        let mut out = Vec::new();
        Value::String("hello".to_string()).write_to(&mut out);
        assert_eq!(out, [0x02, 0x00, 0x05, 0x68, 0x65, 0x6c, 0x6c, 0x6f]);

        out.clear();
        Value::String(String::new()).write_to(&mut out);
        assert_eq!(out, [0x02, 0x00, 0x00]);
    }

    #[test]
    fn encodes_null() {
        let mut out = Vec::new();
        Value::Null.write_to(&mut out);
        assert_eq!(out, [0x05]);
    }

    #[test]
    fn encodes_object() {
        let mut out = Vec::new();
        Value::Object(vec![Pair::new("hello", Value::Number(0.0))]).write_to(&mut out);
        assert_eq!(
            out,
            [
                0x03, // marker
                0x00, 0x05, 0x68, 0x65, 0x6c, 0x6c, 0x6f, // key
                0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // value
                0x00, 0x00, 0x09, // end
            ]
        );

        out.clear();
        Value::Object(vec![]).write_to(&mut out);
        assert_eq!(out, [0x03, 0x00, 0x00, 0x09]);
    }

    #[test]
    fn encodes_ecma_array() {
        let mut out = Vec::new();
        Value::EcmaArray(vec![Pair::new("hello", Value::String("world".to_string()))])
            .write_to(&mut out);
        assert_eq!(
            out,
            [
                0x08, // marker
                0x00, 0x00, 0x00, 0x01, // associative count
                0x00, 0x05, 0x68, 0x65, 0x6c, 0x6c, 0x6f, // key
                0x02, 0x00, 0x05, 0x77, 0x6f, 0x72, 0x6c, 0x64, // value
                0x00, 0x00, 0x09, // end
            ]
        );

        out.clear();
        Value::EcmaArray(vec![]).write_to(&mut out);
        assert_eq!(out, [0x08, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x09]);
    }

    #[test]
    fn round_trips_command_payloads() {
        let values = vec![
            Value::String("@setDataFrame".to_string()),
            Value::String("onMetaData".to_string()),
            Value::EcmaArray(vec![
                Pair::new("width", Value::Number(1920.0)),
                Pair::new("height", Value::Number(1080.0)),
                Pair::new("stereo", Value::Boolean(true)),
                Pair::new("encoder", Value::String("obs-output module".to_string())),
                Pair::new("nested", Value::Object(vec![Pair::new("x", Value::Null)])),
                // duplicate keys survive in insertion order
                Pair::new("width", Value::Number(1280.0)),
            ]),
        ];

        let encoded = encode_all(&values);
        assert_eq!(decode_all(&encoded).unwrap(), values);
    }
}
