use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{BackendError, BackendResult};
use crate::pool::{ConnectionFactory, ConnectionPool, PoolConfig, PoolStats};
use crate::record::StoredEntry;
use crate::traits::{check_continuity, Backend};

/// Header size: 4 bytes length + 4 bytes CRC.
pub const HEADER_SIZE: usize = 8;

/// Frames larger than this are treated as a corrupt header.
const MAX_FRAME_LEN: u32 = 256 * 1024 * 1024;

/// Flush/sync strategy for the log file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// `fsync` after every write (safest, highest latency).
    EveryWrite,
    /// Rely on OS page-cache buffering (fastest, least durable).
    #[default]
    OsDefault,
}

/// Configuration for [`FileBackend`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FileBackendConfig {
    pub sync_mode: SyncMode,
    /// Upper bound on concurrently open read handles.
    pub max_read_handles: usize,
    /// How long a read waits for a free handle.
    pub acquire_timeout_ms: u64,
}

impl Default for FileBackendConfig {
    fn default() -> Self {
        Self {
            sync_mode: SyncMode::default(),
            max_read_handles: 4,
            acquire_timeout_ms: 5_000,
        }
    }
}

/// What [`FileBackend::open`] found while scanning the log.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub frames: u64,
    pub entries: u64,
    /// Frames dropped for a bad checksum, undecodable body, or bad ordering.
    pub skipped_frames: u64,
    /// Bytes cut from an incomplete final frame.
    pub truncated_bytes: u64,
}

#[derive(Clone, Copy, Debug)]
struct FrameLoc {
    offset: u64,
    len: u32,
    first_seq: u64,
    count: u32,
}

impl FrameLoc {
    fn end_seq(&self) -> u64 {
        self.first_seq + u64::from(self.count)
    }
}

#[derive(Default)]
struct FrameIndex {
    /// Keyed by the first sequence in each frame.
    frames: BTreeMap<u64, FrameLoc>,
    count: u64,
    first: Option<StoredEntry>,
    last: Option<StoredEntry>,
}

impl FrameIndex {
    fn insert(&mut self, loc: FrameLoc, entries: &[StoredEntry]) {
        self.frames.insert(loc.first_seq, loc);
        self.count += entries.len() as u64;
        if self.first.is_none() {
            self.first = entries.first().cloned();
        }
        if let Some(last) = entries.last() {
            self.last = Some(last.clone());
        }
    }

    fn next_sequence(&self) -> u64 {
        self.last.as_ref().map_or(0, |e| e.sequence + 1)
    }

    /// Frames holding sequences `>= start`, enough to cover `limit` records.
    fn frames_from(&self, start: u64, limit: usize) -> Vec<FrameLoc> {
        let covering = self
            .frames
            .range(..=start)
            .next_back()
            .map(|(_, loc)| *loc)
            .filter(|loc| loc.end_seq() > start);
        let following = self
            .frames
            .range((Bound::Excluded(start), Bound::Unbounded))
            .map(|(_, loc)| *loc);

        let mut out = Vec::new();
        let mut covered = 0usize;
        for loc in covering.into_iter().chain(following) {
            if covered >= limit {
                break;
            }
            covered += (loc.end_seq() - loc.first_seq.max(start)) as usize;
            out.push(loc);
        }
        out
    }
}

struct LogWriter {
    file: File,
    offset: u64,
}

/// Opens read-only handles on the log file.
struct ReadHandles {
    path: PathBuf,
}

impl ConnectionFactory for ReadHandles {
    type Connection = File;

    fn connect(&self) -> BackendResult<File> {
        Ok(File::open(&self.path)?)
    }
}

/// Append-only file backend.
///
/// Each `append_one`/`append_many` call writes exactly one frame:
///
/// ```text
/// [4 bytes: body length (little-endian u32)]
/// [4 bytes: CRC32 of body (little-endian u32)]
/// [N bytes: body (bincode-serialized Vec<StoredEntry>)]
/// ```
///
/// so a batch torn by a crash is discarded as a unit. On open the file is
/// scanned front to back: an incomplete final frame is truncated, and a
/// frame that fails its CRC is skipped with a warning. A sequence index of
/// frame offsets is kept in memory; reads go through a bounded pool of
/// read-only handles.
pub struct FileBackend {
    path: PathBuf,
    config: FileBackendConfig,
    writer: Mutex<LogWriter>,
    index: RwLock<FrameIndex>,
    readers: ConnectionPool<ReadHandles>,
    closed: AtomicBool,
    recovery: RecoveryReport,
}

impl FileBackend {
    /// Open (or create) a log file at `path` and recover its index.
    pub fn open(path: impl AsRef<Path>, config: FileBackendConfig) -> BackendResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)?;

        let (index, mut recovery, valid_end) = scan(&file)?;
        let file_len = file.metadata()?.len();
        if valid_end < file_len {
            recovery.truncated_bytes = file_len - valid_end;
            warn!(
                path = %path.display(),
                offset = valid_end,
                bytes = recovery.truncated_bytes,
                "truncating incomplete frame at end of log"
            );
            file.set_len(valid_end)?;
            file.sync_all()?;
        }

        info!(
            path = %path.display(),
            frames = recovery.frames,
            entries = recovery.entries,
            skipped = recovery.skipped_frames,
            "opened file backend"
        );

        let readers = ConnectionPool::new(
            ReadHandles { path: path.clone() },
            PoolConfig {
                max_connections: config.max_read_handles,
                acquire_timeout: Duration::from_millis(config.acquire_timeout_ms),
            },
        );

        Ok(Self {
            path,
            config,
            writer: Mutex::new(LogWriter {
                file,
                offset: valid_end,
            }),
            index: RwLock::new(index),
            readers,
            closed: AtomicBool::new(false),
            recovery,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Summary of the scan performed by [`open`](Self::open).
    pub fn recovery(&self) -> &RecoveryReport {
        &self.recovery
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.readers.stats()
    }

    /// Current end of the log in bytes.
    pub fn offset(&self) -> u64 {
        self.writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .offset
    }

    fn ensure_open(&self) -> BackendResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BackendError::Closed);
        }
        Ok(())
    }

    fn index(&self) -> std::sync::RwLockReadGuard<'_, FrameIndex> {
        self.index.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn append_frame(&self, entries: &[StoredEntry]) -> BackendResult<()> {
        self.ensure_open()?;
        if entries.is_empty() {
            return Ok(());
        }

        let body = bincode::serialize(entries)?;
        let len = u32::try_from(body.len())
            .ok()
            .filter(|len| *len <= MAX_FRAME_LEN)
            .ok_or_else(|| {
                BackendError::Serialization(format!("frame of {} bytes is too large", body.len()))
            })?;

        let mut frame = Vec::with_capacity(HEADER_SIZE + body.len());
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
        frame.extend_from_slice(&body);

        let mut w = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        check_continuity(self.index().next_sequence(), entries)?;

        let frame_offset = w.offset;
        if let Err(e) = write_at(&mut w.file, frame_offset, &frame, self.config.sync_mode) {
            // Nothing of this frame may survive a failed write.
            if let Err(rollback) = w.file.set_len(frame_offset) {
                warn!(offset = frame_offset, error = %rollback, "failed to roll back partial frame");
            }
            return Err(e.into());
        }
        w.offset += frame.len() as u64;

        let loc = FrameLoc {
            offset: frame_offset,
            len,
            first_seq: entries[0].sequence,
            count: entries.len() as u32,
        };
        self.index
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(loc, entries);

        debug!(
            offset = frame_offset,
            first = loc.first_seq,
            count = loc.count,
            "frame written"
        );
        Ok(())
    }

    fn read_frames(&self, locs: &[FrameLoc]) -> BackendResult<Vec<StoredEntry>> {
        if locs.is_empty() {
            return Ok(Vec::new());
        }
        let mut handle = self.readers.acquire()?;
        let mut out = Vec::new();
        for loc in locs {
            out.extend(read_frame(&mut handle, loc)?);
        }
        Ok(out)
    }
}

impl Backend for FileBackend {
    fn append_one(&self, entry: &StoredEntry) -> BackendResult<()> {
        self.append_frame(std::slice::from_ref(entry))
    }

    fn append_many(&self, entries: &[StoredEntry]) -> BackendResult<()> {
        self.append_frame(entries)
    }

    fn read_range(&self, start: u64, limit: usize) -> BackendResult<Vec<StoredEntry>> {
        self.ensure_open()?;
        if limit == 0 {
            return Ok(Vec::new());
        }
        let locs = self.index().frames_from(start, limit);
        Ok(self
            .read_frames(&locs)?
            .into_iter()
            .filter(|e| e.sequence >= start)
            .take(limit)
            .collect())
    }

    fn read_by_predicate(
        &self,
        predicate: &dyn Fn(&StoredEntry) -> bool,
    ) -> BackendResult<Vec<StoredEntry>> {
        self.ensure_open()?;
        let locs: Vec<FrameLoc> = self.index().frames.values().copied().collect();
        let mut matched = Vec::new();
        for chunk in locs.chunks(64) {
            matched.extend(self.read_frames(chunk)?.into_iter().filter(|e| predicate(e)));
        }
        Ok(matched)
    }

    fn count(&self) -> BackendResult<u64> {
        self.ensure_open()?;
        Ok(self.index().count)
    }

    fn first(&self) -> BackendResult<Option<StoredEntry>> {
        self.ensure_open()?;
        Ok(self.index().first.clone())
    }

    fn last(&self) -> BackendResult<Option<StoredEntry>> {
        self.ensure_open()?;
        Ok(self.index().last.clone())
    }

    fn close(&self) -> BackendResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.readers.close();
        let w = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        w.file.sync_all()?;
        debug!(path = %self.path.display(), "file backend closed");
        Ok(())
    }
}

impl std::fmt::Debug for FileBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileBackend")
            .field("path", &self.path)
            .field("entry_count", &self.index().count)
            .finish()
    }
}

fn write_at(file: &mut File, offset: u64, frame: &[u8], sync: SyncMode) -> io::Result<()> {
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(frame)?;
    file.flush()?;
    if sync == SyncMode::EveryWrite {
        file.sync_data()?;
    }
    Ok(())
}

fn read_frame(file: &mut File, loc: &FrameLoc) -> BackendResult<Vec<StoredEntry>> {
    file.seek(SeekFrom::Start(loc.offset))?;
    let mut header = [0u8; HEADER_SIZE];
    file.read_exact(&mut header)?;
    let (len, crc) = parse_header(&header);
    if len != loc.len {
        return Err(BackendError::Corrupt {
            offset: loc.offset,
            reason: format!("frame length changed from {} to {len}", loc.len),
        });
    }
    let mut body = vec![0u8; len as usize];
    file.read_exact(&mut body)?;
    if crc32fast::hash(&body) != crc {
        return Err(BackendError::Corrupt {
            offset: loc.offset,
            reason: "CRC mismatch".into(),
        });
    }
    Ok(bincode::deserialize(&body)?)
}

fn parse_header(header: &[u8; HEADER_SIZE]) -> (u32, u32) {
    let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    let crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    (len, crc)
}

/// Scan the log front to back. Returns the index, the report, and the offset
/// just past the last complete frame.
fn scan(file: &File) -> BackendResult<(FrameIndex, RecoveryReport, u64)> {
    let file_len = file.metadata()?.len();
    let mut reader = BufReader::new(file);
    let mut index = FrameIndex::default();
    let mut report = RecoveryReport::default();
    let mut offset: u64 = 0;

    while offset + HEADER_SIZE as u64 <= file_len {
        reader.seek(SeekFrom::Start(offset))?;
        let mut header = [0u8; HEADER_SIZE];
        reader.read_exact(&mut header)?;
        let (len, crc) = parse_header(&header);

        let frame_end = offset + HEADER_SIZE as u64 + u64::from(len);
        if len == 0 || len > MAX_FRAME_LEN || frame_end > file_len {
            break;
        }

        let mut body = vec![0u8; len as usize];
        reader.read_exact(&mut body)?;

        if crc32fast::hash(&body) != crc {
            warn!(offset, len, "CRC mismatch; skipping frame");
            report.skipped_frames += 1;
            offset = frame_end;
            continue;
        }

        let entries: Vec<StoredEntry> = match bincode::deserialize(&body) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(offset, error = %e, "undecodable frame; skipping");
                report.skipped_frames += 1;
                offset = frame_end;
                continue;
            }
        };

        let Some(first) = entries.first() else {
            offset = frame_end;
            continue;
        };
        let expected_min = index.next_sequence();
        let ordered = index.last.is_none() || first.sequence >= expected_min;
        if !ordered || check_continuity(first.sequence, &entries).is_err() {
            warn!(
                offset,
                sequence = first.sequence,
                "frame out of sequence order; skipping"
            );
            report.skipped_frames += 1;
            offset = frame_end;
            continue;
        }

        let loc = FrameLoc {
            offset,
            len,
            first_seq: first.sequence,
            count: entries.len() as u32,
        };
        index.insert(loc, &entries);
        report.frames += 1;
        report.entries += entries.len() as u64;
        offset = frame_end;
    }

    debug!(frames = report.frames, entries = report.entries, "log scan complete");
    Ok((index, report, offset))
}
