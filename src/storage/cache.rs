//! Disk-backed row cache
//!
//! A write-once/read-many spill file for query results. Rows are written
//! sequentially, then the cache is finalized and every row can be read back
//! independently through a shared memory map.
//!
//! Data file layout (one block per row, rows back to back):
//! ```text
//! ┌─────────────────────────────────────────┐
//! │ ROW BLOCK                               │
//! │   For each entry:                       │
//! │     varint(zigzag(ts - prev_ts))        │
//! │     varint(local_type_id)               │
//! │     codec payload                       │
//! ├─────────────────────────────────────────┤
//! │ ROW BLOCK ...                           │
//! └─────────────────────────────────────────┘
//! ```
//!
//! Sidecar index (`<path>.idx`), written on finalize:
//! ```text
//! ┌─────────────────────────────────────────┐
//! │   magic: [u8; 4] = "STRX"               │
//! │   version: u16                          │
//! │   payload_size: u32                     │
//! │   payload: bincode(CacheIndex)          │
//! │   payload_checksum: u32                 │
//! └─────────────────────────────────────────┘
//! ```

use crate::datapoints::{varint, CodecError, CodecRegistry, DataPoint, TagSet};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::reader::RowReader;
use memmap2::Mmap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Entries buffered per row before the buffer is written out
pub const DEFAULT_WRITE_BUFFER_ENTRIES: usize = 500;

/// Magic bytes for cache index identification
const INDEX_MAGIC: [u8; 4] = *b"STRX";

/// Current index format version
const INDEX_VERSION: u16 = 1;

/// magic + version + payload size
const INDEX_HEADER_SIZE: usize = 10;

/// Directory entry for one finished row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowMeta {
    /// Type tag declared when the row was started
    pub type_tag: String,
    pub tags: TagSet,
    /// Byte offset of the row block in the data file
    pub offset: u64,
    /// Byte length of the row block
    pub length: u64,
    pub point_count: u64,
}

/// Serialized form of the sidecar index
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheIndex {
    name: String,
    type_tags: Vec<String>,
    rows: Vec<RowMeta>,
}

/// Row currently being written
struct OpenRow {
    meta: RowMeta,
    buffer: Vec<u8>,
    buffered: usize,
    prev_timestamp: i64,
}

enum CacheState {
    Writing {
        writer: BufWriter<File>,
        open_row: Option<OpenRow>,
    },
    Reading {
        /// `None` when the data file is empty
        mmap: Option<Arc<Mmap>>,
        type_tags: Arc<[String]>,
    },
    /// Finalization failed; only `close` is valid
    Failed,
    Closed,
}

/// Spill file holding the rows of one query or group partition
pub struct RowCache {
    name: Arc<str>,
    path: PathBuf,
    registry: Arc<CodecRegistry>,
    buffer_entries: usize,
    keep_on_close: bool,
    type_ids: HashMap<String, u64>,
    type_tags: Vec<String>,
    rows: Vec<RowMeta>,
    bytes_written: u64,
    state: CacheState,
}

impl RowCache {
    /// Create a fresh cache file for writing
    pub fn create(
        name: impl Into<String>,
        path: impl AsRef<Path>,
        registry: Arc<CodecRegistry>,
    ) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;

        debug!(path = %path.display(), "Created row cache");

        Ok(Self {
            name: Arc::from(name.into()),
            path,
            registry,
            buffer_entries: DEFAULT_WRITE_BUFFER_ENTRIES,
            keep_on_close: false,
            type_ids: HashMap::new(),
            type_tags: Vec::new(),
            rows: Vec::new(),
            bytes_written: 0,
            state: CacheState::Writing {
                writer: BufWriter::new(file),
                open_row: None,
            },
        })
    }

    /// Reopen a finalized cache for reading
    ///
    /// `estimated_row_count` only sizes the row directory.
    pub fn open(
        name: impl Into<String>,
        path: impl AsRef<Path>,
        estimated_row_count: usize,
        registry: Arc<CodecRegistry>,
    ) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        let index = read_index(&index_path(&path))?;

        let mut rows = Vec::with_capacity(estimated_row_count.max(index.rows.len()));
        rows.extend(index.rows);

        let type_ids = index
            .type_tags
            .iter()
            .enumerate()
            .map(|(id, tag)| (tag.clone(), id as u64))
            .collect();

        let file = File::open(&path)?;
        let bytes_written = file.metadata()?.len();
        let mmap = map_file(&file, bytes_written)?;

        let name = name.into();
        if name != index.name {
            debug!(requested = %name, stored = %index.name, "Cache name differs from index");
        }
        debug!(path = %path.display(), rows = rows.len(), "Opened row cache");

        Ok(Self {
            name: Arc::from(name),
            path,
            registry,
            buffer_entries: DEFAULT_WRITE_BUFFER_ENTRIES,
            keep_on_close: false,
            type_ids,
            type_tags: index.type_tags.clone(),
            rows,
            bytes_written,
            state: CacheState::Reading {
                mmap,
                type_tags: Arc::from(index.type_tags),
            },
        })
    }

    /// Builder method: set how many entries are buffered before a write
    pub fn with_buffer_entries(mut self, entries: usize) -> Self {
        self.buffer_entries = entries.max(1);
        self
    }

    /// Builder method: leave the files on disk when the cache is closed
    pub fn keep_on_close(mut self) -> Self {
        self.keep_on_close = true;
        self
    }

    /// Begin a new row and return a writer for it
    pub fn start_row(&mut self, type_tag: &str, tags: TagSet) -> StorageResult<RowWriter<'_>> {
        self.begin_row(type_tag, tags)?;
        Ok(RowWriter {
            cache: self,
            finished: false,
        })
    }

    /// Begin a new row without a scoped writer
    ///
    /// The caller must pair this with [`finish_row`](Self::finish_row).
    pub fn begin_row(&mut self, type_tag: &str, tags: TagSet) -> StorageResult<()> {
        let offset = self.bytes_written;
        let CacheState::Writing { open_row, .. } = &mut self.state else {
            return Err(StorageError::InvalidState(
                "cannot start a row on a cache that is not writable".into(),
            ));
        };
        if open_row.is_some() {
            return Err(StorageError::InvalidState(
                "previous row has not been finished".into(),
            ));
        }

        *open_row = Some(OpenRow {
            meta: RowMeta {
                type_tag: type_tag.to_string(),
                tags,
                offset,
                length: 0,
                point_count: 0,
            },
            buffer: Vec::with_capacity(self.buffer_entries * 4),
            buffered: 0,
            prev_timestamp: 0,
        });
        Ok(())
    }

    /// Union `tags` into the open row's tag set
    pub fn merge_row_tags(&mut self, tags: &TagSet) -> StorageResult<()> {
        let CacheState::Writing {
            open_row: Some(row),
            ..
        } = &mut self.state
        else {
            return Err(StorageError::InvalidState("no row has been started".into()));
        };
        row.meta.tags.merge(tags);
        Ok(())
    }

    /// Append a point to the open row
    pub fn append(&mut self, point: &DataPoint) -> StorageResult<()> {
        let type_tag = point.data_store_type();
        if !self.registry.contains(type_tag) {
            return Err(CodecError::UnknownTypeTag(type_tag.to_string()).into());
        }

        let CacheState::Writing { writer, open_row } = &mut self.state else {
            return Err(StorageError::InvalidState(
                "cannot append to a cache that is not writable".into(),
            ));
        };
        let Some(row) = open_row.as_mut() else {
            return Err(StorageError::InvalidState("no row has been started".into()));
        };

        let type_id = match self.type_ids.get(type_tag) {
            Some(id) => *id,
            None => {
                let id = self.type_tags.len() as u64;
                self.type_tags.push(type_tag.to_string());
                self.type_ids.insert(type_tag.to_string(), id);
                id
            }
        };

        let mark = row.buffer.len();
        varint::write_signed(
            &mut row.buffer,
            point.timestamp().wrapping_sub(row.prev_timestamp),
        );
        varint::write_unsigned(&mut row.buffer, type_id);
        if let Err(e) = self.registry.encode(point, &mut row.buffer) {
            row.buffer.truncate(mark);
            return Err(e.into());
        }

        row.prev_timestamp = point.timestamp();
        row.meta.point_count += 1;
        row.buffered += 1;

        if row.buffered >= self.buffer_entries {
            self.bytes_written += flush_row_buffer(writer, row, &self.path)?;
        }
        Ok(())
    }

    /// Flush the open row and record it in the row directory
    pub fn finish_row(&mut self) -> StorageResult<()> {
        let CacheState::Writing { writer, open_row } = &mut self.state else {
            return Err(StorageError::InvalidState(
                "cannot finish a row on a cache that is not writable".into(),
            ));
        };
        let Some(mut row) = open_row.take() else {
            return Err(StorageError::InvalidState("no row has been started".into()));
        };

        self.bytes_written += flush_row_buffer(writer, &mut row, &self.path)?;
        debug!(
            cache = %self.name,
            points = row.meta.point_count,
            bytes = row.meta.length,
            "Finished cache row"
        );
        self.rows.push(row.meta);
        Ok(())
    }

    /// Switch to read mode if needed and return one reader per row, in
    /// insertion order
    pub fn get_rows(&mut self) -> StorageResult<Vec<RowReader>> {
        if matches!(self.state, CacheState::Writing { .. }) {
            self.finalize()?;
        }

        match &self.state {
            CacheState::Reading { mmap, type_tags } => Ok(self
                .rows
                .iter()
                .map(|meta| {
                    RowReader::new(
                        Arc::clone(&self.name),
                        meta.clone(),
                        mmap.clone(),
                        Arc::clone(&self.registry),
                        Arc::clone(type_tags),
                    )
                })
                .collect()),
            CacheState::Failed => Err(StorageError::InvalidState(
                "cache failed to finalize".into(),
            )),
            _ => Err(StorageError::InvalidState("cache is closed".into())),
        }
    }

    fn finalize(&mut self) -> StorageResult<()> {
        if let CacheState::Writing {
            open_row: Some(_), ..
        } = &self.state
        {
            return Err(StorageError::InvalidState(
                "cannot read a cache while a row is still open".into(),
            ));
        }

        let writer = match std::mem::replace(&mut self.state, CacheState::Failed) {
            CacheState::Writing { writer, .. } => writer,
            other => {
                self.state = other;
                return Ok(());
            }
        };

        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_data()?;
        drop(file);

        let index = CacheIndex {
            name: self.name.to_string(),
            type_tags: self.type_tags.clone(),
            rows: self.rows.clone(),
        };
        write_index(&self.index_path(), &index).map_err(|e| {
            error!(path = %self.path.display(), error = %e, "Failed to write cache index");
            e
        })?;

        let file = File::open(&self.path)?;
        let mmap = map_file(&file, self.bytes_written)?;

        self.state = CacheState::Reading {
            mmap,
            type_tags: Arc::from(self.type_tags.clone()),
        };
        debug!(
            path = %self.path.display(),
            rows = self.rows.len(),
            bytes = self.bytes_written,
            "Finalized row cache"
        );
        Ok(())
    }

    /// Release the cache and delete its files
    ///
    /// Safe to call more than once. Readers already handed out keep their
    /// mapping alive until they are dropped.
    pub fn close(&mut self) -> StorageResult<()> {
        if matches!(self.state, CacheState::Closed) {
            return Ok(());
        }

        if self.keep_on_close {
            if let CacheState::Writing { open_row: None, .. } = self.state {
                self.finalize()?;
            }
        }

        self.state = CacheState::Closed;

        if self.keep_on_close {
            debug!(path = %self.path.display(), "Closed row cache, files kept");
            return Ok(());
        }

        remove_if_exists(&self.path)?;
        remove_if_exists(&self.index_path())?;
        debug!(path = %self.path.display(), "Deleted row cache");
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the sidecar index
    pub fn index_path(&self) -> PathBuf {
        index_path(&self.path)
    }

    /// Finished rows
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Points across all finished rows
    pub fn point_count(&self) -> u64 {
        self.rows.iter().map(|r| r.point_count).sum()
    }

    /// Bytes of row data written to the data file
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Per-cache type table; the position of a tag is its local type id
    pub fn type_tags(&self) -> &[String] {
        &self.type_tags
    }

    pub fn rows(&self) -> &[RowMeta] {
        &self.rows
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, CacheState::Closed)
    }
}

impl Drop for RowCache {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(path = %self.path.display(), error = %e, "Failed to close row cache");
        }
    }
}

impl std::fmt::Debug for RowCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowCache")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("rows", &self.rows.len())
            .field("bytes_written", &self.bytes_written)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Scoped writer for one row
///
/// Dropping an unclosed writer finishes the row and logs any error.
pub struct RowWriter<'a> {
    cache: &'a mut RowCache,
    finished: bool,
}

impl RowWriter<'_> {
    pub fn append(&mut self, point: &DataPoint) -> StorageResult<()> {
        self.cache.append(point)
    }

    /// Flush the row and record it in the cache's row directory
    pub fn close(mut self) -> StorageResult<()> {
        self.finished = true;
        self.cache.finish_row()
    }
}

impl Drop for RowWriter<'_> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.cache.finish_row() {
                warn!(cache = %self.cache.name, error = %e, "Failed to finish row on drop");
            }
        }
    }
}

/// Write out a row's buffered entries, returning the bytes written
fn flush_row_buffer(
    writer: &mut BufWriter<File>,
    row: &mut OpenRow,
    path: &Path,
) -> StorageResult<u64> {
    if row.buffer.is_empty() {
        return Ok(0);
    }

    if let Err(e) = writer.write_all(&row.buffer) {
        error!(path = %path.display(), error = %e, "Failed to write cache row");
        return Err(e.into());
    }

    let written = row.buffer.len() as u64;
    row.meta.length += written;
    row.buffer.clear();
    row.buffered = 0;
    Ok(written)
}

fn index_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".idx");
    PathBuf::from(name)
}

fn map_file(file: &File, len: u64) -> StorageResult<Option<Arc<Mmap>>> {
    if len == 0 {
        return Ok(None);
    }
    // SAFETY: the data file is private to this cache and is never written
    // once it has been finalized.
    let mmap = unsafe { Mmap::map(file)? };
    Ok(Some(Arc::new(mmap)))
}

fn write_index(path: &Path, index: &CacheIndex) -> StorageResult<()> {
    let payload = bincode::serialize(index)?;
    let payload_size = u32::try_from(payload.len())
        .map_err(|_| StorageError::Serialization("cache index too large".into()))?;

    let mut buf = Vec::with_capacity(INDEX_HEADER_SIZE + payload.len() + 4);
    buf.extend_from_slice(&INDEX_MAGIC);
    buf.extend_from_slice(&INDEX_VERSION.to_le_bytes());
    buf.extend_from_slice(&payload_size.to_le_bytes());
    buf.extend_from_slice(&payload);
    buf.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());

    let mut file = File::create(path)?;
    file.write_all(&buf)?;
    file.sync_data()?;
    Ok(())
}

fn read_index(path: &Path) -> StorageResult<CacheIndex> {
    let buf = std::fs::read(path)?;
    if buf.len() < INDEX_HEADER_SIZE + 4 {
        return Err(StorageError::Corruption("cache index truncated".into()));
    }

    if buf[0..4] != INDEX_MAGIC {
        return Err(StorageError::Corruption("invalid cache index magic".into()));
    }

    let version = u16::from_le_bytes([buf[4], buf[5]]);
    if version != INDEX_VERSION {
        return Err(StorageError::Corruption(format!(
            "unsupported cache index version: {}",
            version
        )));
    }

    let payload_size = u32::from_le_bytes([buf[6], buf[7], buf[8], buf[9]]) as usize;
    let payload_end = INDEX_HEADER_SIZE + payload_size;
    if buf.len() < payload_end + 4 {
        return Err(StorageError::Corruption("cache index truncated".into()));
    }

    let payload = &buf[INDEX_HEADER_SIZE..payload_end];
    let stored_checksum = u32::from_le_bytes([
        buf[payload_end],
        buf[payload_end + 1],
        buf[payload_end + 2],
        buf[payload_end + 3],
    ]);
    if stored_checksum != crc32fast::hash(payload) {
        return Err(StorageError::Corruption("cache index checksum mismatch".into()));
    }

    Ok(bincode::deserialize(payload)?)
}

fn remove_if_exists(path: &Path) -> StorageResult<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datapoints::{LONG_TYPE, STRING_TYPE};
    use tempfile::tempdir;

    fn registry() -> Arc<CodecRegistry> {
        Arc::new(CodecRegistry::with_defaults())
    }

    #[test]
    fn test_row_preserves_write_order() {
        let dir = tempdir().unwrap();
        let mut cache = RowCache::create("cpu", dir.path().join("q.cache"), registry()).unwrap();

        let points = vec![
            DataPoint::long(300, 3),
            DataPoint::long(100, 1),
            DataPoint::long(200, 2),
        ];
        let mut writer = cache
            .start_row(LONG_TYPE, TagSet::new().with("host", "a"))
            .unwrap();
        for p in &points {
            writer.append(p).unwrap();
        }
        writer.close().unwrap();

        let mut rows = cache.get_rows().unwrap();
        assert_eq!(rows.len(), 1);
        let read: Vec<DataPoint> = rows.remove(0).collect();
        assert_eq!(read, points);
    }

    #[test]
    fn test_rows_in_insertion_order_with_shared_type_ids() {
        let dir = tempdir().unwrap();
        let mut cache = RowCache::create("cpu", dir.path().join("q.cache"), registry())
            .unwrap()
            .with_buffer_entries(2);

        for (host, base) in [("a", 0), ("b", 100), ("c", 200)] {
            let mut writer = cache
                .start_row(LONG_TYPE, TagSet::new().with("host", host))
                .unwrap();
            for i in 0..5 {
                writer.append(&DataPoint::long(base + i, i)).unwrap();
            }
            writer.append(&DataPoint::string(base + 9, "x")).unwrap();
        }

        assert_eq!(cache.row_count(), 3);
        assert_eq!(cache.point_count(), 18);
        assert_eq!(cache.type_tags(), &[LONG_TYPE.to_string(), STRING_TYPE.to_string()]);

        let rows = cache.get_rows().unwrap();
        let hosts: Vec<_> = rows
            .iter()
            .map(|r| r.tags().first("host").unwrap().to_string())
            .collect();
        assert_eq!(hosts, vec!["a", "b", "c"]);

        // Rows of one cache can be consumed interleaved
        let mut iters: Vec<_> = rows.into_iter().collect();
        let first_a = iters[0].next().unwrap();
        let first_c = iters[2].next().unwrap();
        let second_a = iters[0].next().unwrap();
        assert_eq!(first_a, DataPoint::long(0, 0));
        assert_eq!(first_c, DataPoint::long(200, 0));
        assert_eq!(second_a, DataPoint::long(1, 1));
        assert_eq!(iters[1].by_ref().count(), 6);
    }

    #[test]
    fn test_failed_encode_leaves_row_intact() {
        let dir = tempdir().unwrap();
        let mut empty = CodecRegistry::new();
        empty.register(LONG_TYPE, Arc::new(crate::datapoints::LongCodec));
        let mut cache =
            RowCache::create("cpu", dir.path().join("q.cache"), Arc::new(empty)).unwrap();

        cache.begin_row(LONG_TYPE, TagSet::new()).unwrap();
        cache.append(&DataPoint::long(1, 1)).unwrap();
        assert!(matches!(
            cache.append(&DataPoint::string(2, "nope")),
            Err(StorageError::Codec(CodecError::UnknownTypeTag(_)))
        ));
        cache.append(&DataPoint::long(3, 3)).unwrap();
        cache.finish_row().unwrap();

        assert_eq!(cache.type_tags().len(), 1);
        let read: Vec<_> = cache.get_rows().unwrap().remove(0).collect();
        assert_eq!(read, vec![DataPoint::long(1, 1), DataPoint::long(3, 3)]);
    }

    #[test]
    fn test_state_errors() {
        let dir = tempdir().unwrap();
        let mut cache = RowCache::create("cpu", dir.path().join("q.cache"), registry()).unwrap();

        assert!(matches!(
            cache.append(&DataPoint::long(1, 1)),
            Err(StorageError::InvalidState(_))
        ));
        assert!(cache.finish_row().is_err());

        cache.begin_row(LONG_TYPE, TagSet::new()).unwrap();
        assert!(cache.begin_row(LONG_TYPE, TagSet::new()).is_err());
        assert!(cache.get_rows().is_err());
        cache.finish_row().unwrap();

        let mut rows = cache.get_rows().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].remaining(), 0);
        assert_eq!(rows[0].next(), None);
        assert!(!rows[0].is_corrupt());
        assert!(cache.begin_row(LONG_TYPE, TagSet::new()).is_err());

        cache.close().unwrap();
        assert!(cache.get_rows().is_err());
    }

    #[test]
    fn test_merge_row_tags_unions_into_open_row() {
        let dir = tempdir().unwrap();
        let mut cache = RowCache::create("cpu", dir.path().join("q.cache"), registry()).unwrap();
        assert!(cache.merge_row_tags(&TagSet::new().with("host", "a")).is_err());

        cache
            .begin_row(LONG_TYPE, TagSet::new().with("host", "a"))
            .unwrap();
        cache.append(&DataPoint::long(1, 1)).unwrap();
        cache
            .merge_row_tags(&TagSet::new().with("host", "b").with("dc", "west"))
            .unwrap();
        cache.finish_row().unwrap();

        let tags = &cache.rows()[0].tags;
        assert!(tags.contains("host", "a"));
        assert!(tags.contains("host", "b"));
        assert_eq!(tags.first("dc"), Some("west"));
    }

    #[test]
    fn test_writer_drop_finishes_row() {
        let dir = tempdir().unwrap();
        let mut cache = RowCache::create("cpu", dir.path().join("q.cache"), registry()).unwrap();
        {
            let mut writer = cache.start_row(LONG_TYPE, TagSet::new()).unwrap();
            writer.append(&DataPoint::long(1, 1)).unwrap();
        }
        assert_eq!(cache.row_count(), 1);
        assert_eq!(cache.point_count(), 1);
    }

    #[test]
    fn test_close_is_idempotent_and_deletes_files() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("q.cache");
        let mut cache = RowCache::create("cpu", &path, registry()).unwrap();
        cache.begin_row(LONG_TYPE, TagSet::new()).unwrap();
        cache.append(&DataPoint::long(1, 1)).unwrap();
        cache.finish_row().unwrap();

        let mut rows = cache.get_rows().unwrap();
        assert!(path.exists());
        assert!(cache.index_path().exists());

        cache.close().unwrap();
        cache.close().unwrap();
        assert!(cache.is_closed());
        assert!(!path.exists());
        assert!(!cache.index_path().exists());

        // An outstanding reader keeps its mapping
        assert_eq!(rows.remove(0).next(), Some(DataPoint::long(1, 1)));
    }

    #[test]
    fn test_drop_deletes_unfinalized_cache() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("q.cache");
        {
            let mut cache = RowCache::create("cpu", &path, registry()).unwrap();
            cache.begin_row(LONG_TYPE, TagSet::new()).unwrap();
            cache.append(&DataPoint::long(1, 1)).unwrap();
        }
        assert!(!path.exists());
    }

    #[test]
    fn test_reopen_finalized_cache() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("saved.cache");
        {
            let mut cache = RowCache::create("mem", &path, registry())
                .unwrap()
                .keep_on_close();
            let mut writer = cache
                .start_row(LONG_TYPE, TagSet::new().with("host", "a").with("host", "b"))
                .unwrap();
            writer.append(&DataPoint::long(-5, 1)).unwrap();
            writer.append(&DataPoint::double(10, 2.5)).unwrap();
            writer.close().unwrap();
            cache.close().unwrap();
        }

        let mut cache = RowCache::open("mem", &path, 4, registry()).unwrap();
        assert_eq!(cache.row_count(), 1);
        assert_eq!(cache.rows()[0].tags.get("host").map(|v| v.len()), Some(2));

        let read: Vec<_> = cache.get_rows().unwrap().remove(0).collect();
        assert_eq!(read, vec![DataPoint::long(-5, 1), DataPoint::double(10, 2.5)]);

        cache.close().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_open_rejects_corrupt_index() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("saved.cache");
        {
            let mut cache = RowCache::create("mem", &path, registry())
                .unwrap()
                .keep_on_close();
            cache.begin_row(LONG_TYPE, TagSet::new()).unwrap();
            cache.append(&DataPoint::long(1, 1)).unwrap();
            cache.finish_row().unwrap();
        }

        let idx = index_path(&path);
        let mut bytes = std::fs::read(&idx).unwrap();
        let last = bytes.len() - 5;
        bytes[last] ^= 0xff;
        std::fs::write(&idx, bytes).unwrap();

        assert!(matches!(
            RowCache::open("mem", &path, 1, registry()),
            Err(StorageError::Corruption(_))
        ));

        std::fs::write(&idx, b"JUNK").unwrap();
        assert!(RowCache::open("mem", &path, 1, registry()).is_err());
    }

    #[test]
    fn test_index_path_appends_extension() {
        assert_eq!(
            index_path(Path::new("/tmp/q.cache")),
            PathBuf::from("/tmp/q.cache.idx")
        );
    }
}
