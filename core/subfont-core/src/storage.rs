//! Storage gateway (made by FontLab https://www.fontlab.com/)
//!
//! Everything else in the crate reads and writes through [`Storage`], so the
//! cache can live on disk, in memory, or anywhere a caller cares to implement
//! four methods. Keys are paths relative to the store's root.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufReader, Cursor, Read};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::error::StorageError;

/// Raw bytes flowing out of a store.
pub type ByteStream = Box<dyn Read + Send>;

/// A readable artifact plus its size when the store knows it.
pub struct ArtifactStream {
    pub reader: ByteStream,
    pub len: Option<u64>,
}

impl fmt::Debug for ArtifactStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArtifactStream")
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}

impl ArtifactStream {
    /// Drain the stream into memory.
    pub fn read_all(mut self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.len.unwrap_or(0) as usize);
        self.reader.read_to_end(&mut buf)?;
        Ok(buf)
    }
}

/// Backing store for source fonts and cached artifacts.
pub trait Storage: Send + Sync {
    /// Whether `key` exists. Missing keys are `Ok(false)`, never an error.
    fn has(&self, key: &Path) -> Result<bool, StorageError>;

    /// Open a stored artifact, or `None` when it does not exist.
    fn open_read(&self, key: &Path) -> Result<Option<ArtifactStream>, StorageError>;

    /// Open the un-subset source font.
    fn open_source(&self, key: &Path) -> Result<ByteStream, StorageError>;

    /// Start writing a batch of files into the directory `dir`.
    fn open_write_sink(&self, dir: &Path) -> Result<Box<dyn WriteSink>, StorageError>;
}

/// Receives the files produced by one pipeline run.
///
/// Nothing written is visible to readers until [`finish`](WriteSink::finish)
/// succeeds; a sink dropped before that discards what it staged.
pub trait WriteSink: Send {
    /// Stage `bytes` as `<dir>/<name>` and return the key it will live under.
    fn write(&mut self, name: &str, bytes: &[u8]) -> Result<PathBuf, StorageError>;

    /// Publish every staged file.
    fn finish(self: Box<Self>) -> Result<(), StorageError>;
}

fn check_key(key: &Path) -> Result<(), StorageError> {
    if key.as_os_str().is_empty() {
        return Err(StorageError::invalid(key, "empty key"));
    }
    if !key
        .components()
        .all(|component| matches!(component, Component::Normal(_)))
    {
        return Err(StorageError::invalid(
            key,
            "key must be relative without `..`",
        ));
    }
    Ok(())
}

fn check_file_name(dir: &Path, name: &str) -> Result<(), StorageError> {
    if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
        return Err(StorageError::invalid(dir.join(name), "invalid file name"));
    }
    Ok(())
}

/// Filesystem store rooted at a directory.
#[derive(Debug, Clone)]
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, key: &Path) -> Result<PathBuf, StorageError> {
        check_key(key)?;
        Ok(self.root.join(key))
    }
}

impl Storage for FsStorage {
    fn has(&self, key: &Path) -> Result<bool, StorageError> {
        let path = self.resolve(key)?;
        path.try_exists().map_err(|err| StorageError::io(path, err))
    }

    fn open_read(&self, key: &Path) -> Result<Option<ArtifactStream>, StorageError> {
        let path = self.resolve(key)?;
        let meta = match fs::metadata(&path) {
            Ok(meta) => meta,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(StorageError::io(path, err)),
        };
        if meta.is_dir() {
            return Err(StorageError::IsDirectory(key.to_path_buf()));
        }

        match File::open(&path) {
            Ok(file) => Ok(Some(ArtifactStream {
                reader: Box::new(BufReader::new(file)),
                len: Some(meta.len()),
            })),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(StorageError::io(path, err)),
        }
    }

    fn open_source(&self, key: &Path) -> Result<ByteStream, StorageError> {
        let path = self.resolve(key)?;
        match File::open(&path) {
            Ok(file) => Ok(Box::new(BufReader::new(file))),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_path_buf()))
            }
            Err(err) => Err(StorageError::io(path, err)),
        }
    }

    fn open_write_sink(&self, dir: &Path) -> Result<Box<dyn WriteSink>, StorageError> {
        let path = self.resolve(dir)?;
        fs::create_dir_all(&path).map_err(|err| StorageError::io(&path, err))?;
        Ok(Box::new(FsWriteSink {
            key: dir.to_path_buf(),
            path,
            staged: Vec::new(),
        }))
    }
}

/// Distinguishes staged files of sinks open at the same time.
static SINK_SEQ: AtomicU64 = AtomicU64::new(0);

/// Writes each file under a hidden temporary name and renames on finish.
#[derive(Debug)]
struct FsWriteSink {
    key: PathBuf,
    path: PathBuf,
    staged: Vec<(PathBuf, PathBuf)>,
}

impl WriteSink for FsWriteSink {
    fn write(&mut self, name: &str, bytes: &[u8]) -> Result<PathBuf, StorageError> {
        check_file_name(&self.key, name)?;
        let target = self.path.join(name);
        let seq = SINK_SEQ.fetch_add(1, Ordering::Relaxed);
        let partial = self
            .path
            .join(format!(".{name}.{}-{seq}.partial", std::process::id()));

        fs::write(&partial, bytes).map_err(|err| StorageError::io(&partial, err))?;
        self.staged.push((partial, target));
        Ok(self.key.join(name))
    }

    /// All or nothing: when one rename fails, targets already published by
    /// this commit are removed again and the rest stay staged for `Drop`.
    fn finish(mut self: Box<Self>) -> Result<(), StorageError> {
        let mut published: Vec<PathBuf> = Vec::with_capacity(self.staged.len());
        let mut pending = std::mem::take(&mut self.staged).into_iter();

        while let Some((partial, target)) = pending.next() {
            if let Err(err) = fs::rename(&partial, &target) {
                for done in &published {
                    if let Err(err) = fs::remove_file(done) {
                        warn!(file = %done.display(), error = %err, "failed to roll back artifact");
                    }
                }
                self.staged.push((partial, target.clone()));
                self.staged.extend(pending);
                return Err(StorageError::io(target, err));
            }
            published.push(target);
        }

        debug!(dir = %self.path.display(), "write sink committed");
        Ok(())
    }
}

impl Drop for FsWriteSink {
    fn drop(&mut self) {
        for (partial, _) in self.staged.drain(..) {
            if let Err(err) = fs::remove_file(&partial) {
                warn!(file = %partial.display(), error = %err, "failed to discard staged artifact");
            }
        }
    }
}

/// In-memory store; clones share the same contents.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    files: Arc<RwLock<BTreeMap<PathBuf, Arc<[u8]>>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: impl Into<PathBuf>, bytes: impl Into<Vec<u8>>) {
        self.files
            .write()
            .insert(key.into(), Arc::from(bytes.into()));
    }

    pub fn get(&self, key: impl AsRef<Path>) -> Option<Vec<u8>> {
        let files = self.files.read();
        files.get(key.as_ref()).map(|bytes| bytes.to_vec())
    }

    /// Every stored key, sorted.
    pub fn keys(&self) -> Vec<PathBuf> {
        self.files.read().keys().cloned().collect()
    }

    fn is_dir(&self, key: &Path) -> bool {
        self.files
            .read()
            .keys()
            .any(|stored| stored != key && stored.starts_with(key))
    }
}

impl Storage for MemoryStorage {
    fn has(&self, key: &Path) -> Result<bool, StorageError> {
        check_key(key)?;
        Ok(self.files.read().contains_key(key) || self.is_dir(key))
    }

    fn open_read(&self, key: &Path) -> Result<Option<ArtifactStream>, StorageError> {
        check_key(key)?;
        let bytes = self.files.read().get(key).cloned();
        match bytes {
            Some(bytes) => Ok(Some(ArtifactStream {
                len: Some(bytes.len() as u64),
                reader: Box::new(Cursor::new(bytes)),
            })),
            None if self.is_dir(key) => Err(StorageError::IsDirectory(key.to_path_buf())),
            None => Ok(None),
        }
    }

    fn open_source(&self, key: &Path) -> Result<ByteStream, StorageError> {
        check_key(key)?;
        match self.files.read().get(key).cloned() {
            Some(bytes) => Ok(Box::new(Cursor::new(bytes))),
            None => Err(StorageError::NotFound(key.to_path_buf())),
        }
    }

    fn open_write_sink(&self, dir: &Path) -> Result<Box<dyn WriteSink>, StorageError> {
        check_key(dir)?;
        Ok(Box::new(MemoryWriteSink {
            storage: self.clone(),
            dir: dir.to_path_buf(),
            staged: Vec::new(),
        }))
    }
}

#[derive(Debug)]
struct MemoryWriteSink {
    storage: MemoryStorage,
    dir: PathBuf,
    staged: Vec<(PathBuf, Vec<u8>)>,
}

impl WriteSink for MemoryWriteSink {
    fn write(&mut self, name: &str, bytes: &[u8]) -> Result<PathBuf, StorageError> {
        check_file_name(&self.dir, name)?;
        let key = self.dir.join(name);
        self.staged.push((key.clone(), bytes.to_vec()));
        Ok(key)
    }

    fn finish(self: Box<Self>) -> Result<(), StorageError> {
        let mut files = self.storage.files.write();
        for (key, bytes) in self.staged {
            files.insert(key, Arc::from(bytes));
        }
        Ok(())
    }
}
