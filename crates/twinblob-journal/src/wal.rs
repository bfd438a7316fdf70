use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{JournalError, Result};

/// Flush/sync strategy for the log.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncMode {
    /// `fsync` after every write (safest, highest latency).
    EveryWrite,
    /// Rely on OS page-cache buffering.
    #[default]
    OsDefault,
}

/// Header size: 4 bytes length + 4 bytes CRC.
const HEADER_SIZE: usize = 8;

struct WalWriter {
    writer: BufWriter<File>,
    /// End of the last complete record.
    offset: u64,
    /// A failed write may have left part of a record after `offset`.
    torn: bool,
}

/// Append-only log of serde records.
///
/// On-disk format, repeated per record:
/// ```text
/// [4 bytes: payload length (little-endian u32)]
/// [4 bytes: CRC32 of payload (little-endian u32)]
/// [N bytes: payload (bincode-serialized record)]
/// ```
///
/// On recovery the file is read front-to-back; records failing the CRC check
/// are skipped, and reading stops at a truncated tail. Opening the log cuts
/// such a tail off so later appends stay readable.
pub struct WriteAheadLog<R> {
    path: PathBuf,
    writer: Mutex<WalWriter>,
    sync_mode: SyncMode,
    _record: PhantomData<fn() -> R>,
}

impl<R> WriteAheadLog<R>
where
    R: Serialize + DeserializeOwned,
{
    /// Open (or create) the log file at `path`.
    pub fn open(path: &Path, sync_mode: SyncMode) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;
        let file_len = file.metadata()?.len();
        let (_, offset) = scan::<R>(path)?;
        if offset < file_len {
            warn!(
                path = %path.display(),
                valid_len = offset,
                file_len,
                "truncating unreadable WAL tail"
            );
            file.set_len(offset)?;
            file.sync_all()?;
        }

        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(WalWriter {
                writer: BufWriter::new(file),
                offset,
                torn: false,
            }),
            sync_mode,
            _record: PhantomData,
        })
    }

    /// Append one record. Returns its byte offset.
    ///
    /// A failed append leaves no partial record behind: the log is cut back
    /// to the end of the previous record before the next write.
    pub fn append(&self, record: &R) -> Result<u64> {
        let payload = encode(record)?;
        let mut w = self.writer.lock()?;
        if w.torn {
            self.discard_partial(&mut w)?;
        }
        let entry_offset = w.offset;

        if let Err(e) = self.write_durably(&mut w.writer, &payload) {
            w.torn = true;
            if let Err(repair) = self.discard_partial(&mut w) {
                warn!(offset = entry_offset, error = %repair, "could not discard partial WAL record");
            }
            return Err(e);
        }

        w.offset += (HEADER_SIZE + payload.len()) as u64;
        debug!(offset = entry_offset, len = payload.len(), "WAL append");
        Ok(entry_offset)
    }

    fn write_durably(&self, writer: &mut BufWriter<File>, payload: &[u8]) -> Result<()> {
        write_frame(writer, payload)?;
        writer.flush()?;
        if self.sync_mode == SyncMode::EveryWrite {
            writer.get_ref().sync_all()?;
        }
        Ok(())
    }

    /// Drop buffered bytes and cut the file back to the last complete record.
    fn discard_partial(&self, w: &mut WalWriter) -> Result<()> {
        let file = OpenOptions::new().read(true).append(true).open(&self.path)?;
        let stale = std::mem::replace(&mut w.writer, BufWriter::new(file));
        // `into_parts` hands back the unwritten buffer instead of flushing it.
        let (_, _unwritten) = stale.into_parts();
        let file = w.writer.get_ref();
        file.set_len(w.offset)?;
        file.sync_all()?;
        w.torn = false;
        warn!(offset = w.offset, "discarded partial WAL record");
        Ok(())
    }

    /// Read back every intact record.
    pub fn recover(&self) -> Result<Vec<R>> {
        read_records(&self.path)
    }

    /// Atomically replace the log contents with `records`.
    ///
    /// The records are written to a sibling temporary file which is synced
    /// and renamed over the log, so a crash leaves either the old or the new
    /// log in place.
    pub fn rewrite(&self, records: &[R]) -> Result<()> {
        let tmp_path = self.path.with_extension("compact");
        let mut w = self.writer.lock()?;

        let mut tmp = BufWriter::new(File::create(&tmp_path)?);
        for record in records {
            write_frame(&mut tmp, &encode(record)?)?;
        }
        tmp.flush()?;
        tmp.get_ref().sync_all()?;
        drop(tmp);

        fs::rename(&tmp_path, &self.path)?;
        if let Some(dir) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            // Persist the rename itself; not every platform allows opening a
            // directory, so failure here is not fatal.
            if let Ok(dir) = File::open(dir) {
                let _ = dir.sync_all();
            }
        }

        let file = OpenOptions::new().read(true).append(true).open(&self.path)?;
        w.offset = file.metadata()?.len();
        let (_, _unwritten) = std::mem::replace(&mut w.writer, BufWriter::new(file)).into_parts();
        w.torn = false;

        debug!(records = records.len(), bytes = w.offset, "WAL rewritten");
        Ok(())
    }

    /// Current write offset (file length in bytes).
    pub fn offset(&self) -> u64 {
        self.writer.lock().map(|w| w.offset).unwrap_or_default()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Read every intact record from the log at `path` without opening it for
/// writing.
pub fn read_records<R: DeserializeOwned>(path: &Path) -> Result<Vec<R>> {
    let (records, _) = scan(path)?;
    Ok(records)
}

/// Read intact records and return them with the end offset of the last
/// complete frame. Bytes past that offset can never be read back.
fn scan<R: DeserializeOwned>(path: &Path) -> Result<(Vec<R>, u64)> {
    let mut file = BufReader::new(File::open(path)?);
    let file_len = file.get_ref().metadata()?.len();
    let mut records = Vec::new();
    let mut offset: u64 = 0;

    while offset + HEADER_SIZE as u64 <= file_len {
        file.seek(SeekFrom::Start(offset))?;

        let mut header = [0u8; HEADER_SIZE];
        match file.read_exact(&mut header) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
        let length = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let expected_crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

        if length == 0 || offset + HEADER_SIZE as u64 + u64::from(length) > file_len {
            warn!(offset, length, file_len, "invalid WAL record length; stopping recovery");
            break;
        }

        let mut payload = vec![0u8; length as usize];
        match file.read_exact(&mut payload) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                warn!(offset, "truncated WAL record; stopping recovery");
                break;
            }
            Err(e) => return Err(e.into()),
        }
        let record_offset = offset;
        offset += HEADER_SIZE as u64 + u64::from(length);

        let actual_crc = crc32fast::hash(&payload);
        if actual_crc != expected_crc {
            warn!(
                offset = record_offset,
                expected = expected_crc,
                actual = actual_crc,
                "CRC mismatch; skipping WAL record"
            );
            continue;
        }

        match bincode::deserialize::<R>(&payload) {
            Ok(record) => records.push(record),
            Err(e) => warn!(offset = record_offset, error = %e, "failed to decode WAL record; skipping"),
        }
    }

    debug!(recovered = records.len(), valid_len = offset, "WAL recovery complete");
    Ok((records, offset))
}

fn encode<R: Serialize>(record: &R) -> Result<Vec<u8>> {
    bincode::serialize(record).map_err(|e| JournalError::Serialization(e.to_string()))
}

fn write_frame<W: Write>(w: &mut W, payload: &[u8]) -> Result<()> {
    let length = u32::try_from(payload.len())
        .map_err(|_| JournalError::Serialization(format!("record too large: {} bytes", payload.len())))?;
    w.write_all(&length.to_le_bytes())?;
    w.write_all(&crc32fast::hash(payload).to_le_bytes())?;
    w.write_all(payload)?;
    Ok(())
}
