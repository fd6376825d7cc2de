//! Durability pipeline: WAL append, snapshot write, recovery replay
//!
//! Every mutation is appended to the write-ahead log and pushed to the OS
//! before the in-memory state changes. A checkpoint serializes the whole
//! engine into the snapshot file and truncates the WAL, bounding replay
//! work on the next open.

mod record;

pub use record::{WalOp, WalRecord};

use crate::codec::{decode_document, encode_document};
use crate::storage::StorageEngine;
use crate::{FluxError, Id, Result};
use bytes::{Buf, BufMut, BytesMut};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// WAL append handle plus snapshot/recovery logic for one collection
pub struct PersistenceManager {
    wal_path: PathBuf,
    snapshot_path: PathBuf,
    wal: Option<BufWriter<File>>,
    wal_len: u64,
}

impl PersistenceManager {
    /// Open (creating if needed) the WAL in append mode
    pub fn open(wal_path: impl Into<PathBuf>, snapshot_path: impl Into<PathBuf>) -> Result<Self> {
        let wal_path = wal_path.into();
        let file = open_append(&wal_path)?;
        let wal_len = file.metadata()?.len();
        Ok(Self {
            wal_path,
            snapshot_path: snapshot_path.into(),
            wal: Some(BufWriter::new(file)),
            wal_len,
        })
    }

    /// Append a record and flush it to the OS before returning
    pub fn append(&mut self, record: &WalRecord) -> Result<()> {
        let wal = self
            .wal
            .as_mut()
            .ok_or_else(|| FluxError::Internal("WAL is closed".into()))?;
        let encoded = record.encode();
        wal.write_all(&encoded)?;
        wal.flush()?;
        self.wal_len += encoded.len() as u64;
        Ok(())
    }

    /// Current on-disk length of the WAL
    pub fn wal_size(&self) -> u64 {
        self.wal_len
    }

    /// Serialize the engine into the snapshot file
    ///
    /// ```text
    /// u64 next_id
    /// u64 count
    /// repeat count times: u64 id, u32 len, len bytes
    /// ```
    pub fn save_snapshot(&self, engine: &StorageEngine) -> Result<()> {
        let file = File::create(&self.snapshot_path)?;
        let mut writer = BufWriter::new(file);

        let mut header = BytesMut::with_capacity(16);
        header.put_u64_le(engine.next_id());
        header.put_u64_le(engine.len() as u64);
        writer.write_all(&header)?;

        for (id, doc) in engine.iter() {
            let bytes = encode_document(doc)?;
            let mut frame = BytesMut::with_capacity(12);
            frame.put_u64_le(id);
            frame.put_u32_le(bytes.len() as u32);
            writer.write_all(&frame)?;
            writer.write_all(&bytes)?;
        }

        writer.flush()?;
        writer.get_ref().sync_all()?;
        info!("snapshot saved: {} documents to {:?}", engine.len(), self.snapshot_path);
        Ok(())
    }

    /// Close, truncate, and reopen the WAL in append mode
    pub fn truncate_wal(&mut self) -> Result<()> {
        self.wal = None;
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.wal_path)?;
        drop(file);
        self.wal = Some(BufWriter::new(open_append(&self.wal_path)?));
        self.wal_len = 0;
        Ok(())
    }

    /// Rebuild the engine from the snapshot (if any) plus the WAL tail
    ///
    /// A torn or undecodable trailing record terminates replay;
    /// everything before it stands.
    pub fn recover(&self, engine: &mut StorageEngine) -> Result<()> {
        if self.snapshot_path.exists() {
            self.load_snapshot(engine)?;
        }
        self.replay_wal(engine)
    }

    /// Flush and release the WAL handle; appends fail afterwards
    pub fn close(&mut self) {
        if let Some(mut wal) = self.wal.take() {
            let _ = wal.flush();
        }
    }

    fn load_snapshot(&self, engine: &mut StorageEngine) -> Result<()> {
        let mut data = Vec::new();
        File::open(&self.snapshot_path)?.read_to_end(&mut data)?;
        let mut buf = data.as_slice();

        engine.clear();

        if buf.remaining() < 16 {
            return Err(FluxError::Corruption("snapshot header too short".into()));
        }
        let next_id = buf.get_u64_le();
        let count = buf.get_u64_le();
        engine.set_next_id(next_id);

        for _ in 0..count {
            if buf.remaining() < 12 {
                return Err(FluxError::Corruption("snapshot entry truncated".into()));
            }
            let id: Id = buf.get_u64_le();
            let len = buf.get_u32_le() as usize;
            if buf.remaining() < len {
                return Err(FluxError::Corruption("snapshot entry truncated".into()));
            }
            let doc = decode_document(&buf[..len])?;
            buf.advance(len);
            engine.insert_with_id(id, doc);
        }

        info!("snapshot loaded: {} documents", count);
        Ok(())
    }

    fn replay_wal(&self, engine: &mut StorageEngine) -> Result<()> {
        if !self.wal_path.exists() {
            return Ok(());
        }
        let mut data = Vec::new();
        File::open(&self.wal_path)?.read_to_end(&mut data)?;
        if data.is_empty() {
            return Ok(());
        }

        let mut offset = 0;
        let mut ops = 0usize;
        while offset < data.len() {
            match WalRecord::decode(&data[offset..]) {
                Ok(Some((record, consumed))) => {
                    match record.op {
                        WalOp::Upsert => match record.document() {
                            Ok(doc) => {
                                engine.note_id(record.id);
                                engine.insert_with_id(record.id, doc);
                            }
                            Err(e) => {
                                warn!(
                                    "corrupt WAL payload at offset {}: {}, truncating replay",
                                    offset, e
                                );
                                break;
                            }
                        },
                        // deleting an absent id is a no-op on replay
                        WalOp::Delete => {
                            engine.note_id(record.id);
                            let _ = engine.remove(record.id);
                        }
                    }
                    offset += consumed;
                    ops += 1;
                }
                Ok(None) => {
                    warn!("torn WAL record at offset {}, truncating replay", offset);
                    break;
                }
                Err(e) => {
                    warn!("corrupt WAL record at offset {}: {}, truncating replay", offset, e);
                    break;
                }
            }
        }

        info!("replayed {} WAL ops", ops);
        Ok(())
    }
}

fn open_append(path: &Path) -> Result<File> {
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}
