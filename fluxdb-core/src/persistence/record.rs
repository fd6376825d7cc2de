//! WAL record framing
//!
//! ```text
//! u8  op  (0x01 UPSERT, 0x02 DELETE)
//! u64 id  (little-endian)
//! if UPSERT:
//!   u32 payload_len
//!   payload_len bytes (serialized document)
//! ```

use crate::codec::{decode_document, encode_document};
use crate::{Document, FluxError, Id, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// WAL operation code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WalOp {
    /// Insert or replace a document
    Upsert = 0x01,
    /// Remove a document
    Delete = 0x02,
}

impl TryFrom<u8> for WalOp {
    type Error = FluxError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x01 => Ok(WalOp::Upsert),
            0x02 => Ok(WalOp::Delete),
            other => Err(FluxError::Corruption(format!("invalid WAL op: {other:#04x}"))),
        }
    }
}

/// A single WAL record
#[derive(Debug, Clone)]
pub struct WalRecord {
    pub op: WalOp,
    pub id: Id,
    payload: Bytes,
}

impl WalRecord {
    /// Create an upsert record carrying the serialized document
    pub fn upsert(id: Id, doc: &Document) -> Result<Self> {
        Ok(Self {
            op: WalOp::Upsert,
            id,
            payload: encode_document(doc)?,
        })
    }

    /// Create a delete record
    pub fn delete(id: Id) -> Self {
        Self {
            op: WalOp::Delete,
            id,
            payload: Bytes::new(),
        }
    }

    /// Decode the carried document of an upsert record
    pub fn document(&self) -> Result<Document> {
        if self.op != WalOp::Upsert {
            return Err(FluxError::Internal("delete records carry no document".into()));
        }
        decode_document(&self.payload)
    }

    /// Serialize the record for appending
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(1 + 8 + 4 + self.payload.len());
        buf.put_u8(self.op as u8);
        buf.put_u64_le(self.id);
        if self.op == WalOp::Upsert {
            buf.put_u32_le(self.payload.len() as u32);
            buf.put_slice(&self.payload);
        }
        buf.freeze()
    }

    /// Decode one record from the head of `data`
    ///
    /// Returns the record and its encoded length, `None` for a torn tail
    /// (crash mid-append), or `Corruption` for bytes that can never have
    /// been a record.
    pub fn decode(data: &[u8]) -> Result<Option<(WalRecord, usize)>> {
        let mut buf = data;
        if buf.remaining() < 1 + 8 {
            return Ok(None);
        }
        let op = WalOp::try_from(buf.get_u8())?;
        let id = buf.get_u64_le();

        match op {
            WalOp::Delete => Ok(Some((WalRecord::delete(id), 9))),
            WalOp::Upsert => {
                if buf.remaining() < 4 {
                    return Ok(None);
                }
                let len = buf.get_u32_le() as usize;
                if buf.remaining() < len {
                    return Ok(None);
                }
                let payload = Bytes::copy_from_slice(&buf[..len]);
                Ok(Some((WalRecord { op, id, payload }, 13 + len)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Value;

    fn sample_doc() -> Document {
        let mut doc = Document::new();
        doc.insert("name".into(), Value::String("a".into()));
        doc
    }

    #[test]
    fn test_upsert_round_trip() {
        let doc = sample_doc();
        let record = WalRecord::upsert(7, &doc).unwrap();
        let encoded = record.encode();

        let (decoded, len) = WalRecord::decode(&encoded).unwrap().unwrap();
        assert_eq!(len, encoded.len());
        assert_eq!(decoded.op, WalOp::Upsert);
        assert_eq!(decoded.id, 7);
        assert_eq!(decoded.document().unwrap(), doc);
    }

    #[test]
    fn test_delete_round_trip() {
        let encoded = WalRecord::delete(9).encode();
        assert_eq!(encoded.len(), 9);

        let (decoded, len) = WalRecord::decode(&encoded).unwrap().unwrap();
        assert_eq!(len, 9);
        assert_eq!(decoded.op, WalOp::Delete);
        assert_eq!(decoded.id, 9);
        assert!(decoded.document().is_err());
    }

    #[test]
    fn test_torn_tail_is_none() {
        let encoded = WalRecord::upsert(1, &sample_doc()).unwrap().encode();
        for cut in [1, 8, 10, encoded.len() - 1] {
            assert!(WalRecord::decode(&encoded[..cut]).unwrap().is_none());
        }
    }

    #[test]
    fn test_invalid_op_is_corruption() {
        let bytes = [0xFFu8; 16];
        assert!(WalRecord::decode(&bytes).unwrap_err().is_corruption());
    }
}
