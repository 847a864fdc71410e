//! Tests of appending, segment rotation, archiving and reopening.

use std::io;
use std::io::Write;
use std::sync::Arc;

use indoc::indoc;
use pretty_assertions::assert_eq;

use crate::tests::context::new_testing;
use crate::tests::context::TestContext;
use crate::Dump;
use crate::SegmentIndex;
use crate::WalEngine;
use crate::WalMode;
use crate::WalPointer;
use crate::WalRecord;

/// Size of a data record with a 4 byte key and a 200 byte value.
const REC_SIZE: u64 = 224;

fn put_n(engine: &WalEngine, start: usize, n: usize) -> Result<Vec<WalPointer>, io::Error> {
    let mut pointers = vec![];
    for i in start..start + n {
        let p = engine.put(format!("k{:03}", i), vec![b'v'; 200])?;
        pointers.push(p);
    }
    Ok(pointers)
}

fn data_keys(recs: &[(WalPointer, WalRecord)]) -> Vec<String> {
    recs.iter()
        .filter_map(|(_, r)| match r {
            WalRecord::Data { key, .. } => Some(String::from_utf8_lossy(key).to_string()),
            _ => None,
        })
        .collect()
}

#[test]
fn test_append_rotate_archive() -> Result<(), io::Error> {
    let (_ctx, engine, _ps) = new_testing(|_| {})?;

    let pointers = put_n(&engine, 0, 100)?;

    assert_eq!(WalPointer::new(0, 20), pointers[0]);
    assert_eq!(WalPointer::new(0, 20 + REC_SIZE), pointers[1]);
    // 18 records fit in a 4096 byte segment after the header.
    assert_eq!(WalPointer::new(1, 20), pointers[18]);
    assert!(pointers.windows(2).all(|w| w[0] < w[1]));

    engine.sync_archive()?;

    let archived = engine.wal_archive_files();
    assert_eq!(
        (0..5).map(SegmentIndex).collect::<Vec<_>>(),
        archived.iter().map(|d| d.index).collect::<Vec<_>>()
    );
    assert!(archived.iter().all(|d| d.size == 20 + 18 * REC_SIZE));
    assert_eq!(engine.total_archive_size(), 5 * (20 + 18 * REC_SIZE));
    assert_eq!(
        engine.current_pointer()?,
        WalPointer::new(5, 20 + 10 * REC_SIZE)
    );
    assert_eq!(engine.last_truncated_segment(), None);

    let recs = engine.replay_from(WalPointer::new(0, 0))?.read_all()?;
    assert_eq!(106, recs.len());
    assert_eq!(
        (0..100).map(|i| format!("k{:03}", i)).collect::<Vec<_>>(),
        data_keys(&recs)
    );

    // Replay from the middle of a segment.
    let recs = engine.replay_from(pointers[50])?.read_all()?;
    assert_eq!(pointers[50], recs[0].0);
    assert_eq!(50, data_keys(&recs).len());

    Ok(())
}

#[test]
fn test_record_too_large() -> Result<(), io::Error> {
    let (_ctx, engine, _ps) = new_testing(|_| {})?;

    let res = engine.put("big", vec![0u8; 4096]);
    assert_eq!(io::ErrorKind::InvalidInput, res.unwrap_err().kind());

    // Largest record that fits an empty segment: 4096 - 20 byte header.
    let p = engine.put("", vec![0u8; 4096 - 20 - 20])?;
    assert_eq!(WalPointer::new(1, 20), p);

    engine.put("a", "b")?;
    assert_eq!(SegmentIndex(2), engine.current_pointer()?.index);
    Ok(())
}

#[test]
fn test_reopen_archives_active_segment() -> Result<(), io::Error> {
    let ctx = TestContext::new()?;

    {
        let (engine, _ps) = ctx.new_engine()?;
        put_n(&engine, 0, 30)?;
        assert_eq!(SegmentIndex(1), engine.current_pointer()?.index);
    }

    let (engine, _ps) = ctx.new_engine()?;
    engine.sync_archive()?;

    assert_eq!(
        vec![SegmentIndex(0), SegmentIndex(1)],
        engine.wal_archive_files().iter().map(|d| d.index).collect::<Vec<_>>()
    );
    assert_eq!(WalPointer::new(2, 20), engine.current_pointer()?);

    put_n(&engine, 30, 5)?;
    let recs = engine.replay_from(WalPointer::new(0, 0))?.read_all()?;
    assert_eq!(
        (0..35).map(|i| format!("k{:03}", i)).collect::<Vec<_>>(),
        data_keys(&recs)
    );
    Ok(())
}

#[test]
fn test_reopen_truncates_incomplete_record() -> Result<(), io::Error> {
    let ctx = TestContext::new()?;

    {
        let (engine, _ps) = ctx.new_engine()?;
        put_n(&engine, 0, 3)?;
    }

    // Half written record at the end of the active segment.
    let path = ctx.config.work_segment_path(SegmentIndex(0));
    {
        let mut f = std::fs::OpenOptions::new().append(true).open(&path)?;
        f.write_all(&[0, 0, 0, 1, 0, 0, 1])?;
    }

    let (engine, _ps) = ctx.new_engine()?;
    let archived = engine.wal_archive_files();
    assert_eq!(1, archived.len());
    assert_eq!(20 + 3 * REC_SIZE, archived[0].size);

    let recs = engine.replay_from(WalPointer::new(0, 0))?.read_all()?;
    assert_eq!(3, data_keys(&recs).len());
    Ok(())
}

#[test]
fn test_reopen_rejects_damaged_record() -> Result<(), io::Error> {
    let mut ctx = TestContext::new()?;
    ctx.config.truncate_incomplete_record = Some(false);

    {
        let (engine, _ps) = ctx.new_engine()?;
        put_n(&engine, 0, 3)?;
    }

    let path = ctx.config.work_segment_path(SegmentIndex(0));
    {
        let mut f = std::fs::OpenOptions::new().append(true).open(&path)?;
        f.write_all(&[0, 0, 0, 1, 0, 0, 1])?;
    }

    let res = ctx.new_engine();
    assert!(res.is_err());
    Ok(())
}

#[test]
fn test_invalid_config_creates_nothing() -> Result<(), io::Error> {
    let ctx = TestContext::new()?;

    let mut config = ctx.config.clone();
    config.dir = format!("{}/sub", ctx.config.dir);
    config.wal_history_size = Some(12);
    config.max_wal_archive_size = Some(9 * 1024 * 1024);

    let res = WalEngine::open(Arc::new(config.clone()), Arc::new(crate::NoPages));
    let err = res.err().unwrap();
    assert_eq!(io::ErrorKind::InvalidInput, err.kind());
    assert!(err
        .to_string()
        .starts_with("Should be used only one of wal history size or max wal archive size"));

    assert!(!std::path::Path::new(&config.dir).exists());
    Ok(())
}

#[test]
fn test_dir_is_locked() -> Result<(), io::Error> {
    let ctx = TestContext::new()?;
    let (_engine, _ps) = ctx.new_engine()?;

    let res = ctx.new_engine();
    assert_eq!(io::ErrorKind::WouldBlock, res.err().unwrap().kind());
    Ok(())
}

#[test]
fn test_background_mode_buffers_until_flush() -> Result<(), io::Error> {
    let (ctx, engine, _ps) = new_testing(|c| c.wal_mode = Some(WalMode::Background))?;

    let path = ctx.config.work_segment_path(SegmentIndex(0));

    engine.put("a", "1")?;
    assert_eq!(20, std::fs::metadata(&path)?.len());

    engine.flush()?;
    assert_eq!(20 + 22, std::fs::metadata(&path)?.len());
    Ok(())
}

#[test]
fn test_dump() -> Result<(), io::Error> {
    let (ctx, engine, _ps) = new_testing(|_| {})?;

    engine.put("a", "1")?;
    engine.put("b", "2")?;
    engine.flush()?;

    let dump = Dump::new(ctx.arc_config()).write_to_string()?;
    println!("{}", dump);

    assert_eq!(
        indoc! {r#"
        WAL:
        Segment(0000000000000000)
          R-00000: [000_000_000, 000_000_020) 20: SegmentHeader(0)
          R-00001: [000_000_020, 000_000_042) 22: Data(a, 1)
          R-00002: [000_000_042, 000_000_064) 22: Data(b, 2)
        "#},
        dump
    );
    Ok(())
}

#[test]
fn test_stat() -> Result<(), io::Error> {
    let (_ctx, engine, _ps) = new_testing(|_| {})?;

    put_n(&engine, 0, 20)?;
    engine.sync_archive()?;

    let stat = engine.stat()?;
    assert_eq!(1, stat.archived_segments.len());
    assert_eq!(SegmentIndex(1), stat.active_segment.index);
    assert_eq!(20 + 2 * REC_SIZE, stat.active_segment.size);
    assert_eq!(20 * REC_SIZE, stat.bytes_since_checkpoint);
    assert_eq!(Some(1024 * 1024 * 1024), stat.max_archive_size);
    assert_eq!(None, stat.archive_failure);

    let s = format!("{:#}", stat);
    println!("{}", s);
    assert!(s.starts_with("Stat{\n archived_segments: [\n  SegmentStat(Segment(0000000000000000))"));
    Ok(())
}

#[test]
fn test_archive_failure_stops_appends() -> Result<(), io::Error> {
    let (ctx, engine, _ps) = new_testing(|_| {})?;

    std::fs::remove_dir_all(ctx.config.archive_dir())?;

    // The 19th record seals segment 0, which can not be archived.
    put_n(&engine, 0, 19)?;
    let err = engine.sync_archive().unwrap_err();
    assert_eq!(io::ErrorKind::NotFound, err.kind());

    let err = engine.put("k", "v").unwrap_err();
    assert!(
        err.to_string()
            .contains("failed to archive Segment(0000000000000000)"),
        "{}",
        err
    );

    // No more segments are sealed into the work dir.
    for i in 0..200 {
        assert!(engine.put(format!("k{}", i), vec![b'v'; 200]).is_err());
    }

    let stat = engine.stat()?;
    assert_eq!(SegmentIndex(1), stat.active_segment.index);
    assert_eq!(20 + REC_SIZE, stat.active_segment.size);
    assert!(stat
        .archive_failure
        .as_deref()
        .unwrap()
        .starts_with("failed to archive Segment(0000000000000000)"));
    assert!(stat.to_string().contains("failure: failed to archive"));

    let work_segments = std::fs::read_dir(ctx.config.work_dir())?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".wal"))
        .count();
    assert_eq!(2, work_segments);
    Ok(())
}
