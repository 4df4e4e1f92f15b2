use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};

/// Flush/sync strategy for the journal.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncMode {
    /// `fsync` after every record.
    EveryWrite,
    /// Flush to the OS page cache only.
    #[default]
    OsDefault,
}

#[derive(Clone, Debug, Default)]
pub struct WalConfig {
    pub sync_mode: SyncMode,
}

/// 4 bytes payload length + 4 bytes CRC32, both little-endian.
const FRAME_HEADER: usize = 8;

/// Frames claiming more than this are treated as garbage.
const MAX_FRAME: u32 = 64 * 1024 * 1024;

enum Frame {
    Payload(Vec<u8>),
    Corrupt { len: u32 },
    Torn,
    End,
}

fn encode_frame(payload: &[u8]) -> StoreResult<Vec<u8>> {
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|len| *len <= MAX_FRAME)
        .ok_or_else(|| StoreError::Serialization(format!("record of {} bytes", payload.len())))?;
    let mut frame = Vec::with_capacity(FRAME_HEADER + payload.len());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&crc32fast::hash(payload).to_le_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Read until `buf` is full or the input ends; returns the bytes read.
fn fill<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut read = 0;
    while read < buf.len() {
        match reader.read(&mut buf[read..]) {
            Ok(0) => break,
            Ok(n) => read += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(read)
}

fn read_frame<R: Read>(reader: &mut R) -> io::Result<Frame> {
    let mut header = [0u8; FRAME_HEADER];
    match fill(reader, &mut header)? {
        0 => return Ok(Frame::End),
        n if n < FRAME_HEADER => return Ok(Frame::Torn),
        _ => {}
    }
    let [l0, l1, l2, l3, c0, c1, c2, c3] = header;
    let len = u32::from_le_bytes([l0, l1, l2, l3]);
    let crc = u32::from_le_bytes([c0, c1, c2, c3]);
    if len == 0 || len > MAX_FRAME {
        return Ok(Frame::Torn);
    }

    let mut payload = vec![0u8; len as usize];
    if fill(reader, &mut payload)? < payload.len() {
        return Ok(Frame::Torn);
    }
    if crc32fast::hash(&payload) != crc {
        return Ok(Frame::Corrupt { len });
    }
    Ok(Frame::Payload(payload))
}

/// Destination of journal frames that can drop a partially written one.
trait FrameSink: Write {
    fn truncate_to(&mut self, len: u64) -> io::Result<()>;
}

impl FrameSink for File {
    fn truncate_to(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

/// Write `frame` at offset `at`, cutting the sink back to `at` on failure
/// so a later frame never follows a partial one.
fn write_frame<W: FrameSink>(sink: &mut W, at: u64, frame: &[u8]) -> io::Result<()> {
    if let Err(e) = sink.write_all(frame).and_then(|()| sink.flush()) {
        if let Err(cut) = sink.truncate_to(at) {
            warn!(offset = at, error = %cut, "could not drop partial journal frame");
        }
        return Err(e);
    }
    Ok(())
}

/// Records read back when a journal is opened.
#[derive(Debug)]
pub struct Replay<T> {
    pub records: Vec<T>,
    /// Frames dropped for a CRC mismatch or an undecodable payload.
    pub skipped: usize,
    /// Bytes of torn tail cut off the end of the file.
    pub truncated: u64,
}

/// Append-only journal of bincode records.
///
/// On disk every record is one frame:
/// ```text
/// [u32 LE payload length][u32 LE CRC32 of payload][payload]
/// ```
///
/// Opening the journal replays it front to back. A frame with a bad CRC is
/// skipped; an incomplete frame is a torn write and is truncated away so
/// new records never land behind garbage.
pub struct WriteAheadLog {
    path: PathBuf,
    file: Mutex<File>,
    config: WalConfig,
}

impl WriteAheadLog {
    /// Open (or create) the journal at `path` and replay its records.
    pub fn open<T: DeserializeOwned>(path: &Path, config: WalConfig) -> StoreResult<(Self, Replay<T>)> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;

        let mut replay = Replay {
            records: Vec::new(),
            skipped: 0,
            truncated: 0,
        };
        let mut valid_len = 0u64;
        let mut reader = BufReader::new(&file);
        loop {
            match read_frame(&mut reader)? {
                Frame::End | Frame::Torn => break,
                Frame::Corrupt { len } => {
                    warn!(offset = valid_len, len, "journal frame failed CRC; skipping");
                    replay.skipped += 1;
                    valid_len += (FRAME_HEADER as u64) + u64::from(len);
                }
                Frame::Payload(payload) => {
                    match bincode::deserialize::<T>(&payload) {
                        Ok(record) => replay.records.push(record),
                        Err(e) => {
                            warn!(offset = valid_len, error = %e, "undecodable journal record; skipping");
                            replay.skipped += 1;
                        }
                    }
                    valid_len += (FRAME_HEADER + payload.len()) as u64;
                }
            }
        }
        drop(reader);

        let file_len = file.metadata()?.len();
        if valid_len < file_len {
            replay.truncated = file_len - valid_len;
            warn!(
                path = %path.display(),
                valid_len,
                dropped = replay.truncated,
                "torn journal tail; truncating"
            );
            file.set_len(valid_len)?;
            file.sync_all()?;
        }
        debug!(records = replay.records.len(), skipped = replay.skipped, "journal replayed");

        let wal = Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            config,
        };
        Ok((wal, replay))
    }

    /// Append one record as a single write.
    pub fn append<T: Serialize>(&self, record: &T) -> StoreResult<()> {
        let payload =
            bincode::serialize(record).map_err(|e| StoreError::Serialization(e.to_string()))?;
        let frame = encode_frame(&payload)?;

        let mut file = self.file.lock().map_err(|_| StoreError::LockPoisoned)?;
        let at = file.metadata()?.len();
        write_frame(&mut *file, at, &frame)?;
        if self.config.sync_mode == SyncMode::EveryWrite {
            if let Err(e) = file.sync_data() {
                file.truncate_to(at)?;
                return Err(e.into());
            }
        }
        debug!(bytes = frame.len(), "journal append");
        Ok(())
    }

    /// Size of the journal file in bytes.
    pub fn len(&self) -> StoreResult<u64> {
        let file = self.file.lock().map_err(|_| StoreError::LockPoisoned)?;
        Ok(file.metadata()?.len())
    }

    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
