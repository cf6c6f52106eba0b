//! Compact V2 layout keyed by the indexed instrument fields.
//!
//! ```text
//! magic   "ADLMIDI-DURATION-CACHE-FILE-V2.0"
//! count   u32
//! record  10 x i32 key, u16 kon ms, u16 koff ms, u8 nosound
//! ```
//! All integers are little-endian.

use std::io::{self, Read, Write};
use std::path::Path;

use log::info;

use super::{
    create_writer, open_reader, read_magic, report_load, write_magic, CacheError, DurationCache,
    Durations, MAGIC_LEN,
};
use crate::bank::InstrumentEntry;
use crate::instrument::InstrumentFlags;

pub const MAGIC: &[u8; MAGIC_LEN] = b"ADLMIDI-DURATION-CACHE-FILE-V2.0";

pub const KEY_LEN: usize = 10;

const RECORD_LEN: usize = KEY_LEN * 4 + 5;

/// Operator indices 0-3, fb/conn, note offsets 1 and 2, percussion key,
/// instrument flags without the blank bit, second voice detune.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CompactKey(pub [i32; KEY_LEN]);

impl From<&InstrumentEntry> for CompactKey {
    fn from(e: &InstrumentEntry) -> CompactKey {
        // the blank bit is the measurement's own output
        let flags = e.inst_flags & !InstrumentFlags::IS_BLANK.bits();
        CompactKey([
            e.ops[0] as i32,
            e.ops[1] as i32,
            e.ops[2] as i32,
            e.ops[3] as i32,
            e.fb_conn as i32,
            e.note_offset1 as i32,
            e.note_offset2 as i32,
            e.percussion_key as i32,
            flags as i32,
            e.second_voice_detune as i32,
        ])
    }
}

/// Loads the cache at `path`, falling back to whatever could be read.
pub fn load(path: &Path) -> DurationCache<CompactKey> {
    let cache = DurationCache::new();
    let result = open_reader(path).and_then(|mut r| read_from(&mut r, &cache));
    report_load("duration cache", path, result, cache.len());
    cache
}

/// Reads records into `cache` as they are decoded, so a short file keeps
/// every complete record before the damage.
pub fn read_from<R: Read>(r: &mut R, cache: &DurationCache<CompactKey>) -> Result<usize, CacheError> {
    read_magic(r, MAGIC)?;
    let mut count = [0u8; 4];
    r.read_exact(&mut count).map_err(|_| CacheError::ShortCount)?;
    let count = u32::from_le_bytes(count) as usize;

    let mut record = [0u8; RECORD_LEN];
    for loaded in 0..count {
        r.read_exact(&mut record).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => CacheError::Truncated { loaded },
            _ => CacheError::Io(e),
        })?;
        let (key, value) = decode(&record);
        cache.insert(key, value);
    }
    Ok(count)
}

fn decode(record: &[u8; RECORD_LEN]) -> (CompactKey, Durations) {
    let mut key = [0i32; KEY_LEN];
    for (slot, b) in key.iter_mut().zip(record.chunks_exact(4)) {
        *slot = i32::from_le_bytes([b[0], b[1], b[2], b[3]]);
    }
    let tail = &record[KEY_LEN * 4..];
    let value = Durations {
        ms_sound_kon: u16::from_le_bytes([tail[0], tail[1]]) as i64,
        ms_sound_koff: u16::from_le_bytes([tail[2], tail[3]]) as i64,
        nosound: tail[4] == 0x01,
    };
    (CompactKey(key), value)
}

pub fn save(cache: &DurationCache<CompactKey>, path: &Path) -> Result<(), CacheError> {
    let mut w = create_writer(path)?;
    let written = write_to(&mut w, cache)?;
    w.flush()?;
    info!("duration cache saved to {}: {} entries", path.display(), written);
    Ok(())
}

/// Durations are stored truncated to 16 bits.
pub fn write_to<W: Write>(w: &mut W, cache: &DurationCache<CompactKey>) -> Result<usize, CacheError> {
    let mut entries = cache.entries();
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    write_magic(w, MAGIC)?;
    w.write_all(&(entries.len() as u32).to_le_bytes())?;
    for (key, value) in &entries {
        for k in key.0 {
            w.write_all(&k.to_le_bytes())?;
        }
        w.write_all(&(value.ms_sound_kon as u16).to_le_bytes())?;
        w.write_all(&(value.ms_sound_koff as u16).to_le_bytes())?;
        w.write_all(&[value.nosound as u8])?;
    }
    Ok(entries.len())
}

#[cfg(test)]
#[path = "./compact_test.rs"]
mod compact_test;
