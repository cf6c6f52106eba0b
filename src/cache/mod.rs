//! Content addressed store of measured durations.
//!
//! The whole cache lives in memory for a run. It is loaded once at startup
//! from one of two binary layouts and saved once when all measurements are
//! done. Loading never fails the run: whatever could be read is kept.

pub mod compact;
pub mod legacy;

use std::collections::HashMap;
use std::fs::File;
use std::hash::Hash;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use log::{info, warn};
use parking_lot::Mutex;
use thiserror::Error;

pub use compact::CompactKey;
pub use legacy::LegacyKey;

pub(crate) const MAGIC_LEN: usize = 32;

/// Persisted projection of an envelope measurement.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Durations {
    pub ms_sound_kon: i64,
    pub ms_sound_koff: i64,
    pub nosound: bool,
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("file {0} does not exist")]
    Missing(PathBuf),
    #[error("can't read magic")]
    ShortMagic,
    #[error("magic mismatch")]
    MagicMismatch,
    #[error("can't read cache size value")]
    ShortCount,
    #[error("unexpected end of file after {loaded} records")]
    Truncated { loaded: usize },
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

/// One mutex around the whole map. Entries are cheap to compare and the
/// lock is only ever held for a single lookup or insert.
pub struct DurationCache<K> {
    entries: Mutex<HashMap<K, Durations>>,
}

impl<K: Eq + Hash + Clone> DurationCache<K> {
    pub fn new() -> DurationCache<K> {
        DurationCache {
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn lookup(&self, key: &K) -> Option<Durations> {
        self.entries.lock().get(key).copied()
    }

    pub fn insert(&self, key: K, durations: Durations) {
        self.entries.lock().insert(key, durations);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of every entry, for saving.
    pub fn entries(&self) -> Vec<(K, Durations)> {
        self.entries
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }
}

impl<K: Eq + Hash + Clone> Default for DurationCache<K> {
    fn default() -> Self {
        DurationCache::new()
    }
}

pub(crate) fn open_reader(path: &Path) -> Result<BufReader<File>, CacheError> {
    match File::open(path) {
        Ok(file) => Ok(BufReader::new(file)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(CacheError::Missing(path.to_owned())),
        Err(e) => Err(e.into()),
    }
}

pub(crate) fn create_writer(path: &Path) -> Result<BufWriter<File>, CacheError> {
    Ok(BufWriter::new(File::create(path)?))
}

pub(crate) fn read_magic<R: Read>(r: &mut R, expected: &[u8; MAGIC_LEN]) -> Result<(), CacheError> {
    let mut magic = [0u8; MAGIC_LEN];
    r.read_exact(&mut magic).map_err(|_| CacheError::ShortMagic)?;
    if &magic != expected {
        return Err(CacheError::MagicMismatch);
    }
    Ok(())
}

pub(crate) fn write_magic<W: Write>(w: &mut W, magic: &[u8; MAGIC_LEN]) -> io::Result<()> {
    w.write_all(magic)
}

/// Fills `buf` completely, or reports `false` if the reader was already at
/// its end. Running dry part way through is an error.
pub(crate) fn read_or_eof<R: Read>(r: &mut R, buf: &mut [u8]) -> io::Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(false),
            Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(true)
}

/// Logs the outcome of a cache load. Failures only cost the cached data.
pub(crate) fn report_load(kind: &str, path: &Path, result: Result<usize, CacheError>, kept: usize) {
    match result {
        Ok(loaded) => info!("{} loaded from {}: {} entries", kind, path.display(), loaded),
        Err(err) if kept > 0 => warn!(
            "Failed to load {} from {}: {}. Keeping {} entries read before the error",
            kind,
            path.display(),
            err,
            kept
        ),
        Err(err) => warn!(
            "Failed to load {} from {}: {}. Complete data will be generated from scratch",
            kind,
            path.display(),
            err
        ),
    }
}
