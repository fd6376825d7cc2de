//! Binary document codec
//!
//! Length-prefixed frames used by the WAL and snapshot files. All integers
//! are little-endian on the wire so files read the same on any host.
//!
//! Frame layout:
//!
//! ```text
//! u32 field_count
//! repeat field_count times:
//!   u16 key_len, key_bytes
//!   u8  type_tag
//!   payload:
//!     Int    : i64
//!     Double : f64
//!     Bool   : u8 (0|1)
//!     String : u16 len + bytes
//!     Object : recursive document frame
//!     Array  : u16 count, then (u8 type_tag + payload) per element
//! ```

use crate::{Document, FluxError, Result, Value};
use bytes::{Buf, BufMut, Bytes, BytesMut};

const TAG_INT: u8 = 0;
const TAG_DOUBLE: u8 = 1;
const TAG_BOOL: u8 = 2;
const TAG_STRING: u8 = 3;
const TAG_OBJECT: u8 = 4;
const TAG_ARRAY: u8 = 5;

/// Serialize a document into its binary frame
pub fn encode_document(doc: &Document) -> Result<Bytes> {
    let mut buf = BytesMut::new();
    put_document(doc, &mut buf)?;
    Ok(buf.freeze())
}

/// Deserialize a document from its binary frame
pub fn decode_document(data: &[u8]) -> Result<Document> {
    let mut reader = Reader { buf: data };
    reader.document()
}

fn put_document(doc: &Document, buf: &mut BytesMut) -> Result<()> {
    buf.put_u32_le(doc.len() as u32);
    for (key, val) in doc {
        put_string(key, buf)?;
        put_value(val, buf)?;
    }
    Ok(())
}

fn put_value(val: &Value, buf: &mut BytesMut) -> Result<()> {
    match val {
        Value::Int(v) => {
            buf.put_u8(TAG_INT);
            buf.put_i64_le(*v);
        }
        Value::Double(v) => {
            buf.put_u8(TAG_DOUBLE);
            buf.put_f64_le(*v);
        }
        Value::Bool(v) => {
            buf.put_u8(TAG_BOOL);
            buf.put_u8(u8::from(*v));
        }
        Value::String(s) => {
            buf.put_u8(TAG_STRING);
            put_string(s, buf)?;
        }
        Value::Object(doc) => {
            buf.put_u8(TAG_OBJECT);
            put_document(doc, buf)?;
        }
        Value::Array(items) => {
            if items.len() > u16::MAX as usize {
                return Err(FluxError::Protocol("array exceeds 65535 elements".into()));
            }
            buf.put_u8(TAG_ARRAY);
            buf.put_u16_le(items.len() as u16);
            for item in items {
                put_value(item, buf)?;
            }
        }
    }
    Ok(())
}

fn put_string(s: &str, buf: &mut BytesMut) -> Result<()> {
    if s.len() > u16::MAX as usize {
        return Err(FluxError::Protocol("string exceeds 65535 bytes".into()));
    }
    buf.put_u16_le(s.len() as u16);
    buf.put_slice(s.as_bytes());
    Ok(())
}

struct Reader<'a> {
    buf: &'a [u8],
}

impl Reader<'_> {
    fn need(&self, n: usize) -> Result<()> {
        if self.buf.remaining() < n {
            return Err(FluxError::Corruption("truncated document frame".into()));
        }
        Ok(())
    }

    fn document(&mut self) -> Result<Document> {
        self.need(4)?;
        let count = self.buf.get_u32_le();
        let mut doc = Document::new();
        for _ in 0..count {
            let key = self.string()?;
            let val = self.value()?;
            doc.insert(key, val);
        }
        Ok(doc)
    }

    fn value(&mut self) -> Result<Value> {
        self.need(1)?;
        let tag = self.buf.get_u8();
        match tag {
            TAG_INT => {
                self.need(8)?;
                Ok(Value::Int(self.buf.get_i64_le()))
            }
            TAG_DOUBLE => {
                self.need(8)?;
                Ok(Value::Double(self.buf.get_f64_le()))
            }
            TAG_BOOL => {
                self.need(1)?;
                Ok(Value::Bool(self.buf.get_u8() != 0))
            }
            TAG_STRING => Ok(Value::String(self.string()?)),
            TAG_OBJECT => Ok(Value::Object(self.document()?)),
            TAG_ARRAY => {
                self.need(2)?;
                let count = self.buf.get_u16_le();
                let mut items = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    items.push(self.value()?);
                }
                Ok(Value::Array(items))
            }
            other => Err(FluxError::Corruption(format!("unknown type tag: {other}"))),
        }
    }

    fn string(&mut self) -> Result<String> {
        self.need(2)?;
        let len = self.buf.get_u16_le() as usize;
        self.need(len)?;
        let bytes = self.buf[..len].to_vec();
        self.buf.advance(len);
        String::from_utf8(bytes).map_err(|e| FluxError::Corruption(e.to_string()))
    }
}
