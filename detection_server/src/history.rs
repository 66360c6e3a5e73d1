use chrono::{DateTime, Local};
use detection_wire::HistoryRecord;
use parking_lot::Mutex;
use std::{
    fs::{self, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
};
use thiserror::Error;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const MEDIA_EXTENSIONS: [&str; 6] = ["mp4", "avi", "mov", "mkv", "jpg", "png"];
const MAX_NAME_ATTEMPTS: usize = 10_000;

#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("Media storage error: {0}")]
    Io(#[from] io::Error),
    #[error("Invalid file name: {0:?}")]
    InvalidName(String),
}

/// Uploaded media and the list of known recordings.
pub trait HistoryStore: Send + Sync + 'static {
    /// Picks up files present on disk but not yet recorded. Returns how
    /// many were added.
    fn sync(&self) -> Result<usize, HistoryError>;

    /// All records, newest first, after a sync.
    fn list(&self) -> Result<Vec<HistoryRecord>, HistoryError>;

    /// Reserves a stored name for `file_name` and opens the file for
    /// writing. Dropping the returned upload without committing it removes
    /// the partial file.
    fn begin_upload(&self, file_name: &str) -> Result<PendingUpload, HistoryError>;

    fn commit_upload(&self, upload: PendingUpload) -> Result<HistoryRecord, HistoryError>;

    fn save_upload(&self, file_name: &str, data: &[u8]) -> Result<HistoryRecord, HistoryError> {
        let mut upload = self.begin_upload(file_name)?;
        upload.write_chunk(data)?;
        self.commit_upload(upload)
    }

    /// Removes the record and its file. Unknown ids are not an error.
    fn delete(&self, id: u64) -> Result<Option<HistoryRecord>, HistoryError>;
}

/// An upload being written to disk.
pub struct PendingUpload {
    name: String,
    path: PathBuf,
    file: Option<fs::File>,
    written: u64,
}

impl PendingUpload {
    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn write_chunk(&mut self, data: &[u8]) -> Result<(), HistoryError> {
        if let Some(file) = self.file.as_mut() {
            file.write_all(data)?;
            self.written += data.len() as u64;
        }
        Ok(())
    }

    /// Flushes the file to disk and hands back its stored name.
    fn finish(mut self) -> Result<String, HistoryError> {
        if let Some(file) = self.file.take() {
            if let Err(e) = file.sync_all() {
                let _ = fs::remove_file(&self.path);
                return Err(e.into());
            }
        }
        Ok(std::mem::take(&mut self.name))
    }
}

impl Drop for PendingUpload {
    fn drop(&mut self) {
        if self.file.take().is_some() {
            tracing::debug!("Discarding unfinished upload {}", self.name);
            let _ = fs::remove_file(&self.path);
        }
    }
}

#[derive(Default)]
struct Records {
    entries: Vec<HistoryRecord>,
    last_id: u64,
}

impl Records {
    fn push(&mut self, name: String, time: String) -> HistoryRecord {
        self.last_id += 1;
        let record = HistoryRecord {
            id: self.last_id,
            name,
            time,
        };
        self.entries.push(record.clone());
        record
    }
}

/// History backed by a media directory on local disk.
pub struct MediaHistoryStore {
    media_dir: PathBuf,
    records: Mutex<Records>,
}

impl MediaHistoryStore {
    pub fn open(media_dir: impl Into<PathBuf>) -> Result<Self, HistoryError> {
        let media_dir = media_dir.into();
        fs::create_dir_all(&media_dir)?;

        let store = Self {
            media_dir,
            records: Mutex::new(Records::default()),
        };
        let found = store.sync()?;
        tracing::info!("Loaded {} media files from {:?}", found, store.media_dir);

        Ok(store)
    }

    /// Creates the target file without overwriting an existing upload,
    /// suffixing `_1`, `_2`, ... to the stem until a free name is found.
    fn create_unique(&self, name: &str) -> Result<(String, fs::File), HistoryError> {
        let path = Path::new(name);
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(name)
            .to_string();
        let extension = path.extension().and_then(|s| s.to_str());

        for attempt in 0..MAX_NAME_ATTEMPTS {
            let candidate = match (attempt, extension) {
                (0, _) => name.to_string(),
                (n, Some(ext)) => format!("{}_{}.{}", stem, n, ext),
                (n, None) => format!("{}_{}", stem, n),
            };
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(self.media_dir.join(&candidate))
            {
                Ok(file) => return Ok((candidate, file)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Err(HistoryError::InvalidName(name.to_string()))
    }
}

fn is_media_file(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| MEDIA_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Keeps only the final path component, turns spaces into underscores and
/// drops anything outside `[A-Za-z0-9._-]`.
pub fn sanitize_file_name(raw: &str) -> Result<String, HistoryError> {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or_default().trim();
    let cleaned: String = base
        .chars()
        .map(|c| if c == ' ' { '_' } else { c })
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect();

    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        return Err(HistoryError::InvalidName(raw.to_string()));
    }
    Ok(cleaned)
}

fn format_time(time: DateTime<Local>) -> String {
    time.format(TIME_FORMAT).to_string()
}

impl HistoryStore for MediaHistoryStore {
    fn sync(&self) -> Result<usize, HistoryError> {
        fs::create_dir_all(&self.media_dir)?;

        let mut on_disk = Vec::new();
        for entry in fs::read_dir(&self.media_dir)? {
            let entry = entry?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if !is_media_file(&name) {
                continue;
            }
            match entry.metadata().and_then(|m| m.modified()) {
                Ok(modified) => on_disk.push((name, format_time(modified.into()))),
                Err(e) => tracing::warn!("Cannot read file info for {}: {}", name, e),
            }
        }
        on_disk.sort();

        let mut records = self.records.lock();
        let mut added = 0;
        for (name, time) in on_disk {
            if records.entries.iter().any(|r| r.name == name) {
                continue;
            }
            tracing::info!("Discovered media file {}", name);
            records.push(name, time);
            added += 1;
        }

        Ok(added)
    }

    fn list(&self) -> Result<Vec<HistoryRecord>, HistoryError> {
        self.sync()?;
        let mut entries = self.records.lock().entries.clone();
        entries.sort_by(|a, b| b.time.cmp(&a.time).then(b.id.cmp(&a.id)));
        Ok(entries)
    }

    fn begin_upload(&self, file_name: &str) -> Result<PendingUpload, HistoryError> {
        let name = sanitize_file_name(file_name)?;
        let (stored_name, file) = self.create_unique(&name)?;
        Ok(PendingUpload {
            path: self.media_dir.join(&stored_name),
            name: stored_name,
            file: Some(file),
            written: 0,
        })
    }

    fn commit_upload(&self, upload: PendingUpload) -> Result<HistoryRecord, HistoryError> {
        let written = upload.written();
        let stored_name = upload.finish()?;

        // A concurrent sync may already have picked the new file up.
        let mut records = self.records.lock();
        let record = match records.entries.iter().find(|r| r.name == stored_name) {
            Some(existing) => existing.clone(),
            None => records.push(stored_name, format_time(Local::now())),
        };
        tracing::info!("Stored upload {} ({} bytes)", record.name, written);

        Ok(record)
    }

    fn delete(&self, id: u64) -> Result<Option<HistoryRecord>, HistoryError> {
        let mut records = self.records.lock();
        let Some(position) = records.entries.iter().position(|r| r.id == id) else {
            return Ok(None);
        };

        let path = self.media_dir.join(&records.entries[position].name);
        match fs::remove_file(&path) {
            Ok(()) => tracing::info!("Deleted media file {:?}", path),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Failed to delete media file {:?}: {}", path, e),
        }

        Ok(Some(records.entries.remove(position)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_discovers_existing_media() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("clip.MP4"), b"video").unwrap();
        fs::write(dir.path().join("notes.txt"), b"text").unwrap();

        let store = MediaHistoryStore::open(dir.path()).unwrap();
        let history = store.list().unwrap();

        assert_eq!(history.len(), 1);
        assert_eq!(history[0].name, "clip.MP4");
        assert_eq!(history[0].id, 1);
        assert_eq!(history[0].time.len(), "2024-01-01 00:00:00".len());
    }

    #[test]
    fn test_open_creates_media_dir() {
        let dir = tempfile::tempdir().unwrap();
        let media = dir.path().join("nested").join("media");

        let store = MediaHistoryStore::open(&media).unwrap();

        assert!(media.is_dir());
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_sync_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = MediaHistoryStore::open(dir.path()).unwrap();

        fs::write(dir.path().join("a.mkv"), b"1").unwrap();
        assert_eq!(store.sync().unwrap(), 1);
        assert_eq!(store.sync().unwrap(), 0);
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn test_upload_deduplicates_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = MediaHistoryStore::open(dir.path()).unwrap();

        let first = store.save_upload("my clip.mp4", b"one").unwrap();
        let second = store.save_upload("my clip.mp4", b"two").unwrap();

        assert_eq!(first.name, "my_clip.mp4");
        assert_eq!(second.name, "my_clip_1.mp4");
        assert_ne!(first.id, second.id);
        assert_eq!(fs::read(dir.path().join("my_clip_1.mp4")).unwrap(), b"two");
        assert_eq!(store.list().unwrap().len(), 2);
    }

    #[test]
    fn test_upload_written_in_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let store = MediaHistoryStore::open(dir.path()).unwrap();

        let mut upload = store.begin_upload("long.mp4").unwrap();
        upload.write_chunk(b"first-").unwrap();
        upload.write_chunk(b"second").unwrap();
        assert_eq!(upload.written(), 12);
        let record = store.commit_upload(upload).unwrap();

        assert_eq!(record.name, "long.mp4");
        assert_eq!(fs::read(dir.path().join("long.mp4")).unwrap(), b"first-second");
    }

    #[test]
    fn test_abandoned_upload_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = MediaHistoryStore::open(dir.path()).unwrap();

        let mut upload = store.begin_upload("partial.mp4").unwrap();
        upload.write_chunk(b"half a video").unwrap();
        drop(upload);

        assert!(!dir.path().join("partial.mp4").exists());
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_delete_removes_record_and_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = MediaHistoryStore::open(dir.path()).unwrap();
        let record = store.save_upload("gone.avi", b"bytes").unwrap();

        let removed = store.delete(record.id).unwrap();

        assert_eq!(removed, Some(record));
        assert!(!dir.path().join("gone.avi").exists());
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_delete_unknown_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = MediaHistoryStore::open(dir.path()).unwrap();
        assert_eq!(store.delete(42).unwrap(), None);
    }

    #[test]
    fn test_ids_not_reused_after_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = MediaHistoryStore::open(dir.path()).unwrap();

        let first = store.save_upload("a.mp4", b"a").unwrap();
        store.delete(first.id).unwrap();
        let second = store.save_upload("b.mp4", b"b").unwrap();

        assert!(second.id > first.id);
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("../../etc/passwd").unwrap(), "passwd");
        assert_eq!(sanitize_file_name("C:\\videos\\run 1.mov").unwrap(), "run_1.mov");
        assert_eq!(sanitize_file_name("clip<>|.mp4").unwrap(), "clip.mp4");
        assert!(sanitize_file_name("..").is_err());
        assert!(sanitize_file_name("dir/").is_err());
    }
}
