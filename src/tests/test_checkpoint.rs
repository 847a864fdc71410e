//! Tests of checkpoint scheduling, execution, history and markers.

use std::io;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;

use crate::errors::CheckpointError;
use crate::testing::wait_for;
use crate::tests::context::new_testing;
use crate::tests::context::TestContext;
use crate::CheckpointReason;
use crate::CheckpointState;
use crate::WalPointer;
use crate::WalRecord;

const WAIT: Duration = Duration::from_secs(10);

#[test]
fn test_force_checkpoint() -> Result<(), io::Error> {
    let (_ctx, engine, ps) = new_testing(|_| {})?;

    let p = engine.put("a", "1")?;
    let entry = engine.force_checkpoint("test")?;

    assert_eq!(1, entry.id);
    assert_eq!("test", entry.reason);
    assert_eq!(WalPointer::new(0, p.offset + 22), entry.floor);
    assert_eq!(vec![entry.floor], ps.marks());
    assert_eq!(vec![1], ps.completed());

    assert_eq!(vec![entry.clone()], engine.checkpoint_history().entries());
    assert_eq!(0, engine.stat()?.bytes_since_checkpoint);

    // The begin record is at the mark.
    let recs = engine.replay_from(entry.floor)?.read_all()?;
    assert_eq!(WalRecord::CheckpointBegin { id: 1 }, recs[0].1);

    let files = engine.checkpoint_marker_files()?;
    assert_eq!(3, files.len());
    assert!(files.contains(&format!("{}-1-START.bin", entry.timestamp)));
    assert!(files.contains(&format!("{}-1-END.bin", entry.timestamp)));
    assert!(files.iter().any(|f| f.ends_with("-node-started.bin")));

    let progress = engine.checkpointer().progress();
    assert_eq!(Some(1), progress.id);
    assert_eq!(Some("test".to_string()), progress.reason);
    Ok(())
}

#[test]
fn test_checkpoint_ids_and_floors_increase() -> Result<(), io::Error> {
    let (_ctx, engine, _ps) = new_testing(|_| {})?;

    for i in 0..5 {
        engine.put(format!("k{}", i), vec![0u8; 1000])?;
        engine.force_checkpoint(format!("cp-{}", i))?;
    }

    let entries = engine.checkpoint_history().entries();
    assert_eq!(vec![1, 2, 3, 4, 5], entries.iter().map(|e| e.id).collect::<Vec<_>>());
    assert!(entries.windows(2).all(|w| w[0].floor < w[1].floor));
    assert_eq!(5, engine.checkpointer().completed_count());
    Ok(())
}

#[test]
fn test_page_flush_failure() -> Result<(), io::Error> {
    let (_ctx, engine, ps) = new_testing(|_| {})?;

    ps.fail_next.store(true, Ordering::Relaxed);
    let err = engine.force_checkpoint("fail").unwrap_err();
    assert!(matches!(err, CheckpointError::PageFlush { id: 1, .. }));

    assert!(engine.checkpoint_history().is_empty());
    assert_eq!(1, engine.checkpointer().consecutive_failures());
    assert_eq!(Some(err), engine.checkpointer().last_error());
    assert!(ps.completed().is_empty());

    // Only the node-started marker is left.
    assert_eq!(1, engine.checkpoint_marker_files()?.len());

    // Ids of failed checkpoints are not reused.
    let entry = engine.force_checkpoint("ok")?;
    assert_eq!(2, entry.id);
    assert_eq!(0, engine.checkpointer().consecutive_failures());
    Ok(())
}

#[test]
fn test_floor_is_clamped() -> Result<(), io::Error> {
    let (_ctx, engine, ps) = new_testing(|_| {})?;

    engine.put("a", "1")?;

    // Above the mark
    ps.set_floor(Some(WalPointer::new(100, 0)));
    let e1 = engine.force_checkpoint("high")?;
    assert_eq!(ps.marks()[0], e1.floor);

    // Below the previous floor
    engine.put("b", "2")?;
    ps.set_floor(Some(WalPointer::new(0, 0)));
    let e2 = engine.force_checkpoint("low")?;
    assert_eq!(e1.floor, e2.floor);

    // In between
    engine.put("c", "3")?;
    let between = ps.marks()[1];
    ps.set_floor(Some(between));
    let e3 = engine.force_checkpoint("mid")?;
    assert_eq!(between, e3.floor);
    Ok(())
}

#[test]
fn test_wal_size_threshold_triggers_checkpoint() -> Result<(), io::Error> {
    let (_ctx, engine, _ps) = new_testing(|c| {
        // 16KB since the last checkpoint triggers one.
        c.max_wal_archive_size = Some(64 * 1024);
    })?;

    for i in 0..100 {
        engine.put(format!("k{:03}", i), vec![b'v'; 200])?;
    }

    assert!(wait_for(WAIT, || !engine.checkpoint_history().is_empty()));

    let entry = engine.checkpoint_history().first().unwrap();
    assert_eq!(CheckpointReason::WAL_SIZE_THRESHOLD, entry.reason);
    assert_eq!(
        Some(CheckpointReason::WAL_SIZE_THRESHOLD.to_string()),
        engine.checkpointer().progress().reason
    );
    Ok(())
}

#[test]
fn test_timer_triggers_checkpoint() -> Result<(), io::Error> {
    let (_ctx, engine, _ps) = new_testing(|c| {
        c.checkpoint_frequency = Some(Duration::from_millis(50));
    })?;

    assert!(wait_for(WAIT, || engine.checkpointer().completed_count() >= 2));

    let entry = engine.checkpoint_history().first().unwrap();
    assert_eq!("timeout", entry.reason);
    Ok(())
}

#[test]
fn test_history_cap() -> Result<(), io::Error> {
    let (_ctx, engine, _ps) = new_testing(|c| {
        c.max_checkpoint_memory_history_size = Some(3);
    })?;

    for i in 0..6 {
        engine.put(format!("k{}", i), "v")?;
        engine.force_checkpoint("test")?;
    }

    let history = engine.checkpoint_history();
    assert_eq!(
        vec![4, 5, 6],
        history.entries().iter().map(|e| e.id).collect::<Vec<_>>()
    );
    assert_eq!(3 * 2 + 1, engine.checkpoint_marker_files()?.len());
    Ok(())
}

#[test]
fn test_force_joins_running_checkpoint() -> Result<(), io::Error> {
    let (_ctx, engine, ps) = new_testing(|_| {})?;
    let engine = Arc::new(engine);

    ps.set_delay(Some(Duration::from_millis(300)));

    let e = engine.clone();
    let first = std::thread::spawn(move || e.force_checkpoint("first"));

    assert!(wait_for(WAIT, || {
        engine.checkpointer().state() == CheckpointState::Running
    }));

    let second = engine.force_checkpoint("second")?;
    let first = first.join().unwrap()?;

    assert_eq!(first, second);
    assert_eq!("first", second.reason);
    assert_eq!(1, ps.marks().len());
    Ok(())
}

#[test]
fn test_force_checkpoint_timeout() -> Result<(), io::Error> {
    let (_ctx, engine, ps) = new_testing(|_| {})?;

    ps.set_delay(Some(Duration::from_millis(300)));

    let res = engine.force_checkpoint_timeout("slow", Duration::from_millis(10));
    assert_eq!(
        Err(CheckpointError::Timeout {
            waited: Duration::from_millis(10)
        }),
        res
    );

    assert!(wait_for(WAIT, || engine.checkpointer().completed_count() == 1));
    assert_eq!(1, engine.checkpoint_history().len());
    Ok(())
}

#[test]
fn test_reopen_restores_history() -> Result<(), io::Error> {
    let ctx = TestContext::new()?;

    let before = {
        let (engine, _ps) = ctx.new_engine()?;
        for i in 0..3 {
            engine.put(format!("k{}", i), "v")?;
            engine.force_checkpoint("test")?;
        }
        engine.checkpoint_history().entries()
    };

    // A checkpoint interrupted by a crash leaves only a START marker.
    let incomplete = format!("{}/999-9-START.bin", ctx.config.checkpoint_dir());
    std::fs::write(&incomplete, b"partial")?;

    let (engine, _ps) = ctx.new_engine()?;
    assert_eq!(before, engine.checkpoint_history().entries());
    assert!(!std::path::Path::new(&incomplete).exists());

    let entry = engine.force_checkpoint("after reopen")?;
    assert_eq!(4, entry.id);
    assert!(entry.floor > before[2].floor);

    let reader = engine.replay_from_earliest_checkpoint()?.unwrap();
    let recs = reader.read_all()?;
    assert_eq!(WalRecord::CheckpointBegin { id: 1 }, recs[0].1);
    Ok(())
}

#[test]
fn test_reopen_prunes_history_to_cap() -> Result<(), io::Error> {
    let mut ctx = TestContext::new()?;

    {
        let (engine, _ps) = ctx.new_engine()?;
        for _ in 0..4 {
            engine.force_checkpoint("test")?;
        }
    }

    ctx.config.max_checkpoint_memory_history_size = Some(2);
    let (engine, _ps) = ctx.new_engine()?;
    assert_eq!(
        vec![3, 4],
        engine
            .checkpoint_history()
            .entries()
            .iter()
            .map(|e| e.id)
            .collect::<Vec<_>>()
    );
    assert_eq!(2 * 2 + 1, engine.checkpoint_marker_files()?.len());
    Ok(())
}

#[test]
fn test_reason_too_large_keeps_reopen_working() -> Result<(), io::Error> {
    let ctx = TestContext::new()?;
    let large = "r".repeat(70 * 1024);

    let before = {
        let (engine, ps) = ctx.new_engine()?;
        engine.put("a", "1")?;
        engine.force_checkpoint("small")?;

        let res = engine.force_checkpoint(&large);
        assert_eq!(
            Err(CheckpointError::ReasonTooLarge {
                size: 70 * 1024,
                max: CheckpointReason::MAX_SIZE,
            }),
            res
        );
        let err: io::Error = res.unwrap_err().into();
        assert_eq!(io::ErrorKind::InvalidInput, err.kind());

        engine.request_checkpoint(&large);
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(1, engine.checkpointer().completed_count());
        assert_eq!(vec![1], ps.completed());

        engine.checkpoint_history().entries()
    };
    assert_eq!(1, before.len());

    let (engine, _ps) = ctx.new_engine()?;
    assert_eq!(before, engine.checkpoint_history().entries());
    assert_eq!(3, engine.checkpoint_marker_files()?.len());

    let entry = engine.force_checkpoint("after reopen")?;
    assert_eq!(2, entry.id);
    Ok(())
}

#[test]
fn test_bytes_since_checkpoint_with_concurrent_appends() -> Result<(), io::Error> {
    let (_ctx, engine, _ps) = new_testing(|c| {
        // No rotation.
        c.wal_segment_size = Some(4 * 1024 * 1024);
    })?;

    std::thread::scope(|s| -> Result<(), io::Error> {
        let writers = (0..4)
            .map(|w| {
                let engine = &engine;
                s.spawn(move || -> Result<(), io::Error> {
                    for i in 0..500 {
                        engine.put(format!("{}-{:03}", w, i), vec![b'v'; 100])?;
                    }
                    Ok(())
                })
            })
            .collect::<Vec<_>>();

        for i in 0..20 {
            engine.force_checkpoint(format!("cp-{}", i))?;
        }

        for h in writers {
            h.join().unwrap()?;
        }
        Ok(())
    })?;

    // Every byte after the last begin record is counted exactly once.
    let last = engine.last_checkpoint().unwrap();
    let end = engine.current_pointer()?;
    let begin_size = WalRecord::CheckpointBegin { id: last.id }.encoded_size();

    assert_eq!(last.floor.index, end.index);
    assert_eq!(
        end.offset - last.floor.offset - begin_size,
        engine.stat()?.bytes_since_checkpoint
    );
    Ok(())
}
