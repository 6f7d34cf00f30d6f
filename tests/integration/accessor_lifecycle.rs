#![allow(missing_docs)]

use std::sync::Arc;
use std::thread;

use trama::{CounterMetrics, DataType, Group, GroupOptions, LinkType, Result, TramaError};

#[test]
fn handles_count_their_siblings() -> Result<()> {
    let group = Group::new();
    let t = group.add_table("t")?;
    assert_eq!(t.handle_count(), 1);
    let again = group.get_table("t")?;
    let by_key = group.get_table_by_key(t.key())?;
    let cloned = by_key.clone();
    assert_eq!(t.handle_count(), 4);
    assert_eq!(t, cloned);
    drop(again);
    drop(by_key);
    assert_eq!(cloned.handle_count(), 2);
    drop(cloned);
    assert_eq!(t.handle_count(), 1);
    Ok(())
}

#[test]
fn a_fresh_handle_after_release_starts_over() -> Result<()> {
    let group = Group::new();
    let t = group.add_table("t")?;
    t.add_column(DataType::Int, "v")?;
    t.create_object()?.set(0, 3_i64)?;
    drop(t);

    let t = group.get_table("t")?;
    assert_eq!(t.handle_count(), 1);
    assert!(t.is_attached());
    assert_eq!(t.sum_int(0)?, 3);
    Ok(())
}

#[test]
fn detach_is_terminal_for_every_dependent() -> Result<()> {
    let metrics = Arc::new(CounterMetrics::default());
    let group = Group::with_options(GroupOptions::new().metrics(metrics.clone()))?;
    let t = group.add_table("t")?;
    t.add_column(DataType::Int, "v")?;
    let objs = (0..3).map(|_| t.create_object()).collect::<Result<Vec<_>>>()?;
    let col = t.column(0)?;
    let other = t.clone();

    group.remove_table("t")?;
    assert!(!t.is_attached());
    assert!(!other.is_attached());
    assert!(objs.iter().all(|o| !o.is_valid()));
    assert!(!col.is_attached());
    assert_eq!(CounterMetrics::get(&metrics.accessors_detached), 5);

    assert!(matches!(t.column_count(), Err(TramaError::Detached)));
    assert!(matches!(t.create_object(), Err(TramaError::Detached)));
    assert!(matches!(objs[0].set(0, 1_i64), Err(TramaError::Detached)));
    assert!(matches!(col.name(), Err(TramaError::Detached)));
    assert!(matches!(t.column(0), Err(TramaError::Detached)));
    assert!(!t.is_valid(objs[1].key()));

    // A detached handle stays detached when a table of the same name returns.
    let back = group.add_table("t")?;
    assert_ne!(back.key(), t.key());
    assert!(!t.is_attached());
    assert!(matches!(t.size(), Err(TramaError::Detached)));
    Ok(())
}

#[test]
fn row_handles_report_removed_objects() -> Result<()> {
    let group = Group::new();
    let t = group.add_table("t")?;
    t.add_column(DataType::Int, "v")?;
    let obj = t.create_object()?;
    let twin = t.get_object(obj.key())?;
    assert_eq!(obj, twin);

    obj.remove()?;
    assert!(!obj.is_valid());
    assert!(!twin.is_valid());
    assert!(matches!(twin.get::<i64>(0), Err(TramaError::KeyNotFound(k)) if k == obj.key()));
    assert!(matches!(twin.remove(), Err(TramaError::KeyNotFound(_))));

    // The key can be taken again, and the old handle sees the new object.
    let reborn = t.create_object_with_key(obj.key())?;
    assert!(twin.is_valid());
    assert_eq!(reborn.get::<i64>(0)?, Some(0));
    Ok(())
}

#[test]
fn removing_a_column_detaches_only_its_handles() -> Result<()> {
    let group = Group::new();
    let t = group.add_table("t")?;
    t.add_column(DataType::Int, "a")?;
    t.add_column(DataType::Int, "b")?;
    let a = t.column(0)?;
    let a_too = a.clone();
    let b = t.column(1)?;
    t.remove_column(0)?;
    assert!(!a.is_attached());
    assert!(!a_too.is_attached());
    assert!(b.is_attached());
    assert_eq!(b.index()?, 0);
    assert_eq!(b.table(), &t);
    Ok(())
}

#[test]
fn iteration_ends_when_the_table_detaches() -> Result<()> {
    let group = Group::new();
    let t = group.add_table("t")?;
    t.create_objects(5)?;
    let mut iter = t.iter();
    assert!(iter.next().is_some());
    assert!(iter.next().is_some());
    group.remove_table("t")?;
    assert!(iter.next().is_none());
    assert!(iter.next().is_none());
    Ok(())
}

#[test]
fn handles_outlive_their_group() -> Result<()> {
    let group = Group::new();
    let t = group.add_table("t")?;
    let obj = t.create_object()?;
    let col = {
        t.add_column(DataType::Bool, "flag")?;
        t.column(0)?
    };
    drop(group);
    assert!(!t.is_attached());
    assert!(!obj.is_valid());
    assert!(!col.is_attached());
    assert!(t.iter().next().is_none());
    Ok(())
}

#[test]
fn link_targets_hand_out_the_shared_accessor() -> Result<()> {
    let group = Group::new();
    let target = group.add_table("target")?;
    let origin = group.add_table("origin")?;
    origin.add_column_link(DataType::Link, "to", &target, LinkType::Weak)?;
    let resolved = origin.link_target(0)?;
    assert_eq!(resolved, target);
    assert_eq!(target.handle_count(), 2);
    drop(resolved);
    assert_eq!(target.handle_count(), 1);
    Ok(())
}

#[test]
fn concurrent_acquire_and_release_keep_one_accessor() -> Result<()> {
    let group = Group::new();
    let keeper = group.add_table("shared")?;
    keeper.add_column(DataType::Int, "n")?;
    let transient = group.add_table("transient")?;
    let transient_key = transient.key();
    drop(transient);

    thread::scope(|s| {
        let workers: Vec<_> = (0..8_i64)
            .map(|i| {
                let group = &group;
                s.spawn(move || -> Result<()> {
                    for _ in 0..200 {
                        let t = group.get_table("shared")?;
                        t.create_object()?.set(0, i)?;
                        let u = group.get_table_by_key(transient_key)?;
                        let again = u.clone();
                        drop(u);
                        assert!(again.is_attached());
                    }
                    Ok(())
                })
            })
            .collect();
        workers
            .into_iter()
            .try_for_each(|w| w.join().expect("worker panicked"))
    })?;

    assert_eq!(keeper.size()?, 1600);
    assert_eq!(keeper.handle_count(), 1);
    let transient = group.get_table_by_key(transient_key)?;
    assert_eq!(transient.handle_count(), 1);
    group.verify()?;
    Ok(())
}

#[test]
fn concurrent_removal_detaches_cleanly() -> Result<()> {
    let group = Group::new();
    let t = group.add_table("t")?;
    t.create_objects(100)?;

    thread::scope(|s| {
        let reader = s.spawn(|| {
            let mut seen = 0;
            for _ in 0..50 {
                match group.get_table("t") {
                    Ok(handle) => {
                        seen += handle.iter().count();
                    }
                    Err(TramaError::NoSuchTable) => break,
                    Err(other) => panic!("unexpected error {other}"),
                }
            }
            seen
        });
        group.remove_table("t")?;
        reader.join().expect("reader panicked");
        Ok::<_, TramaError>(())
    })?;

    assert!(!t.is_attached());
    assert!(!group.has_table("t"));
    Ok(())
}

#[test]
fn no_live_handle_is_issued_for_a_removed_table() -> Result<()> {
    let group = Group::new();
    let t = group.add_table("t")?;
    let key = t.key();

    let handles = thread::scope(|s| {
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let group = &group;
                s.spawn(move || {
                    let mut taken = Vec::new();
                    loop {
                        match group.get_table_by_key(key) {
                            Ok(handle) => taken.push(handle),
                            Err(TramaError::NoSuchTable) => break,
                            Err(other) => panic!("unexpected error {other}"),
                        }
                        if let Ok(linked) = group.get_table("t") {
                            taken.push(linked);
                        }
                    }
                    taken
                })
            })
            .collect();
        group.remove_table_by_key(key)?;
        let mut handles = Vec::new();
        for w in workers {
            handles.extend(w.join().expect("worker panicked"));
        }
        Ok::<_, TramaError>(handles)
    })?;

    assert!(!t.is_attached());
    assert!(handles.iter().all(|h| !h.is_attached()));
    assert!(matches!(group.get_table_by_key(key), Err(TramaError::NoSuchTable)));
    Ok(())
}
