use std::io::Cursor;

use super::*;

fn entry(op: i64, flags: u8) -> InstrumentEntry {
    InstrumentEntry {
        ops: [op, op + 1, -1, -1],
        fb_conn: 0x0e,
        note_offset1: -12,
        percussion_key: 35,
        inst_flags: flags,
        second_voice_detune: -3,
        ..InstrumentEntry::default()
    }
}

fn durations(kon: i64, koff: i64, nosound: bool) -> Durations {
    Durations {
        ms_sound_kon: kon,
        ms_sound_koff: koff,
        nosound,
    }
}

#[test]
fn test_key_fields() {
    let key = CompactKey::from(&entry(4, 0x01));
    assert_eq!(key.0, [4, 5, -1, -1, 0x0e, -12, 0, 35, 0x01, -3]);
}

#[test]
fn test_key_ignores_blank_bit() {
    let plain = CompactKey::from(&entry(4, 0x01));
    let blank = CompactKey::from(&entry(4, 0x01 | InstrumentFlags::IS_BLANK.bits()));
    assert_eq!(plain, blank);
}

#[test]
fn test_save_and_load_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("durations.cache");

    let cache = DurationCache::new();
    cache.insert(CompactKey::from(&entry(0, 0)), durations(1200, 340, false));
    cache.insert(CompactKey::from(&entry(2, 0)), durations(0, 0, true));
    save(&cache, &path).unwrap();

    let loaded = load(&path);
    assert_eq!(loaded.len(), 2);
    assert_eq!(
        loaded.lookup(&CompactKey::from(&entry(0, 0))),
        Some(durations(1200, 340, false))
    );
    assert_eq!(
        loaded.lookup(&CompactKey::from(&entry(2, 0))),
        Some(durations(0, 0, true))
    );
}

#[test]
fn test_layout() {
    let cache = DurationCache::new();
    cache.insert(CompactKey([1, 2, 3, 4, 5, 6, 7, 8, 9, 10]), durations(0x0102, 0x0304, true));
    let mut buf = Vec::new();
    assert_eq!(write_to(&mut buf, &cache).unwrap(), 1);

    assert_eq!(buf.len(), MAGIC_LEN + 4 + RECORD_LEN);
    assert_eq!(&buf[..MAGIC_LEN], MAGIC);
    assert_eq!(&buf[MAGIC_LEN..MAGIC_LEN + 4], &[1, 0, 0, 0]);
    let record = &buf[MAGIC_LEN + 4..];
    assert_eq!(&record[..4], &[1, 0, 0, 0]);
    assert_eq!(&record[36..40], &[10, 0, 0, 0]);
    assert_eq!(&record[40..], &[0x02, 0x01, 0x04, 0x03, 0x01]);
}

#[test]
fn test_durations_truncated_to_16_bits() {
    let cache = DurationCache::new();
    let key = CompactKey([0; KEY_LEN]);
    cache.insert(key, durations(70000, 65535, false));
    let mut buf = Vec::new();
    write_to(&mut buf, &cache).unwrap();

    let loaded = DurationCache::new();
    read_from(&mut Cursor::new(buf), &loaded).unwrap();
    assert_eq!(loaded.lookup(&key), Some(durations(70000 - 65536, 65535, false)));
}

#[test]
fn test_records_sorted_by_key() {
    let cache = DurationCache::new();
    for first in [30, 10, 20] {
        let mut key = [0; KEY_LEN];
        key[0] = first;
        cache.insert(CompactKey(key), durations(first as i64, 0, false));
    }
    let mut buf = Vec::new();
    write_to(&mut buf, &cache).unwrap();

    let firsts: Vec<u8> = buf[MAGIC_LEN + 4..]
        .chunks_exact(RECORD_LEN)
        .map(|r| r[0])
        .collect();
    assert_eq!(firsts, vec![10, 20, 30]);
}

#[test]
fn test_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let cache = load(&dir.path().join("nothing-here"));
    assert!(cache.is_empty());
}

#[test]
fn test_magic_mismatch() {
    let mut buf = b"ADLMIDI-DURATION-CACHE-FILE-V1.0".to_vec();
    buf.extend_from_slice(&[0, 0, 0, 0]);
    let cache = DurationCache::new();
    let err = read_from(&mut Cursor::new(buf), &cache).unwrap_err();
    assert!(matches!(err, CacheError::MagicMismatch));
    assert!(cache.is_empty());
}

#[test]
fn test_short_header() {
    let cache = DurationCache::new();
    let err = read_from(&mut Cursor::new(b"ADLMIDI".to_vec()), &cache).unwrap_err();
    assert!(matches!(err, CacheError::ShortMagic));

    let err = read_from(&mut Cursor::new(MAGIC.to_vec()), &cache).unwrap_err();
    assert!(matches!(err, CacheError::ShortCount));
}

#[test]
fn test_truncated_file_keeps_complete_records() {
    let cache = DurationCache::new();
    for n in 0..3 {
        cache.insert(CompactKey([n; KEY_LEN]), durations(n as i64 * 100, 0, false));
    }
    let mut buf = Vec::new();
    write_to(&mut buf, &cache).unwrap();
    // cut the last record in half
    buf.truncate(buf.len() - RECORD_LEN / 2);

    let loaded = DurationCache::new();
    let err = read_from(&mut Cursor::new(buf), &loaded).unwrap_err();
    assert!(matches!(err, CacheError::Truncated { loaded: 2 }));
    assert_eq!(loaded.len(), 2);
    assert_eq!(loaded.lookup(&CompactKey([1; KEY_LEN])), Some(durations(100, 0, false)));
    assert_eq!(loaded.lookup(&CompactKey([2; KEY_LEN])), None);
}
