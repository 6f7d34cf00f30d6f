#![allow(missing_docs)]

use std::sync::Arc;

use trama::{CounterMetrics, DataType, Group, GroupOptions, LinkType, ObjKey, Result, SlabAlloc, TramaError, Value};

fn people_and_dogs(group: &Group) -> Result<()> {
    let dogs = group.add_table("dogs")?;
    dogs.add_column(DataType::String, "name")?;
    let people = group.add_table("people")?;
    people.add_column(DataType::String, "name")?;
    people.add_column_nullable(DataType::Double, "height")?;
    people.add_column_link(DataType::LinkList, "dogs", &dogs, LinkType::Strong)?;

    let rex = dogs.create_object()?;
    rex.set(0, "rex".to_owned())?;
    let ann = people.create_object()?;
    ann.set(0, "ann".to_owned())?;
    ann.set(1, 1.7_f64)?;
    ann.list_add(2, rex.key())?;
    Ok(())
}

#[test]
fn rollback_restores_schema_objects_and_links() -> Result<()> {
    let group = Group::new();
    people_and_dogs(&group)?;
    group.commit()?;

    let people = group.get_table("people")?;
    let dogs = group.get_table("dogs")?;
    let ann = people.get_object(ObjKey(0))?;
    let rex = dogs.get_object(ObjKey(0))?;

    ann.list_clear(2)?;
    assert!(!rex.is_valid());
    people.add_column(DataType::Int, "age")?;
    people.rename_column(0, "full_name")?;
    people.create_objects(3)?;

    group.rollback()?;
    assert!(people.is_attached());
    assert!(dogs.is_attached());
    assert_eq!(people.column_count()?, 3);
    assert_eq!(people.column_name(0)?, "name");
    assert_eq!(people.size()?, 1);
    assert!(ann.is_valid());
    assert!(rex.is_valid());
    assert_eq!(ann.list_get_all(2)?, vec![rex.key()]);
    assert_eq!(rex.backlinks(&people, 2)?, vec![ann.key()]);
    assert_eq!(ann.get_value(1)?, Value::Double(1.7));
    assert_eq!(rex.get::<String>(0)?.as_deref(), Some("rex"));
    group.verify()?;
    Ok(())
}

#[test]
fn rollback_detaches_handles_to_what_vanished() -> Result<()> {
    let metrics = Arc::new(CounterMetrics::default());
    let group = Group::with_options(GroupOptions::new().metrics(metrics.clone()))?;
    let t = group.add_table("t")?;
    t.add_column(DataType::Int, "kept")?;
    let kept_obj = t.create_object()?;
    group.commit()?;

    let new_col = {
        t.add_column(DataType::Int, "added")?;
        t.column(1)?
    };
    let kept_col = t.column(0)?;
    let new_obj = t.create_object()?;
    let new_table = group.add_table("later")?;

    group.rollback()?;
    assert!(!new_table.is_attached());
    assert!(!new_obj.is_valid());
    assert!(!new_col.is_attached());
    assert!(kept_col.is_attached());
    assert!(kept_obj.is_valid());
    assert!(matches!(new_obj.get::<i64>(0), Err(TramaError::Detached)));
    assert_eq!(CounterMetrics::get(&metrics.accessors_detached), 3);
    assert!(!t.is_marked());
    Ok(())
}

#[test]
fn removed_tables_come_back_under_a_fresh_handle() -> Result<()> {
    let group = Group::new();
    people_and_dogs(&group)?;
    group.commit()?;

    let people = group.get_table("people")?;
    let key = people.key();
    group.remove_table("people")?;
    assert!(!group.has_table("people"));

    group.rollback()?;
    assert!(!people.is_attached());
    let back = group.get_table("people")?;
    assert_eq!(back.key(), key);
    assert_eq!(back.size()?, 1);
    assert_eq!(back.link_target(2)?.name()?, "dogs");
    group.verify()?;
    Ok(())
}

#[test]
fn rollback_advances_every_version() -> Result<()> {
    let group = Group::new();
    let a = group.add_table("a")?;
    let b = group.add_table("b")?;
    group.commit()?;
    let (va, vb, global) = (a.version()?, b.version()?, group.global_version());
    group.rollback()?;
    assert!(a.version()? > va);
    assert!(b.version()? > vb);
    assert!(group.global_version() > global);
    Ok(())
}

#[test]
fn keys_issued_after_rollback_stay_fresh() -> Result<()> {
    let group = Group::new();
    group.add_table("a")?;
    group.commit()?;
    let dropped = group.add_table("b")?.key();
    group.rollback()?;
    let next = group.add_table("c")?.key();
    assert_ne!(next, dropped);
    Ok(())
}

#[test]
fn repeated_commits_keep_a_constant_footprint() -> Result<()> {
    let alloc = Arc::new(SlabAlloc::new());
    let group = Group::with_options(GroupOptions::new().alloc(alloc.clone()))?;
    people_and_dogs(&group)?;
    let people = group.get_table("people")?;
    group.commit()?;
    let live = alloc.live_blocks();
    for round in 0..5 {
        let obj = people.create_object()?;
        obj.set(0, format!("p{round}"))?;
        group.commit()?;
        assert_eq!(alloc.live_blocks(), live);
    }
    group.rollback()?;
    assert_eq!(people.size()?, 6);
    Ok(())
}

#[test]
fn refresh_is_scoped_to_marked_tables() -> Result<()> {
    let group = Group::new();
    let a = group.add_table("a")?;
    let b = group.add_table("b")?;
    let in_a = a.create_object()?;
    let in_b = b.create_object()?;
    a.remove_object(in_a.key())?;
    b.remove_object(in_b.key())?;

    group.mark_table(a.key());
    assert!(a.is_marked());
    assert!(!b.is_marked());
    group.refresh();
    assert!(matches!(in_a.get_value(0), Err(TramaError::Detached)));
    // Unmarked, so the stale row handle was not visited.
    assert!(matches!(in_b.remove(), Err(TramaError::KeyNotFound(_))));

    group.mark_all();
    assert!(a.is_marked() && b.is_marked());
    group.refresh();
    assert!(!a.is_marked() && !b.is_marked());
    assert!(matches!(in_b.remove(), Err(TramaError::Detached)));
    Ok(())
}

#[test]
fn a_released_table_handle_is_not_refreshed() -> Result<()> {
    let group = Group::new();
    let t = group.add_table("t")?;
    let key = t.key();
    drop(t);
    group.mark_table(key);
    group.refresh();
    let t = group.get_table_by_key(key)?;
    assert!(!t.is_marked());
    assert!(t.is_attached());
    Ok(())
}

#[test]
fn non_finite_floats_survive_rollback() -> Result<()> {
    let group = Group::new();
    let t = group.add_table("readings")?;
    t.add_column(DataType::Double, "exact")?;
    t.add_column_nullable(DataType::Float, "rough")?;
    let cells = [f64::NAN, f64::INFINITY, f64::NEG_INFINITY];
    let objs = cells
        .iter()
        .map(|&x| {
            let obj = t.create_object()?;
            obj.set(0, x)?;
            obj.set(1, x as f32)?;
            Ok(obj)
        })
        .collect::<Result<Vec<_>>>()?;
    group.commit()?;

    for obj in &objs {
        obj.set(0, 1.0_f64)?;
        obj.set_null(1)?;
    }
    group.rollback()?;

    let exact = objs.iter().map(|o| o.get::<f64>(0)).collect::<Result<Vec<_>>>()?;
    let rough = objs.iter().map(|o| o.get::<f32>(1)).collect::<Result<Vec<_>>>()?;
    assert!(exact[0].is_some_and(f64::is_nan));
    assert_eq!(exact[1..], [Some(f64::INFINITY), Some(f64::NEG_INFINITY)]);
    assert!(rough[0].is_some_and(f32::is_nan));
    assert_eq!(rough[1..], [Some(f32::INFINITY), Some(f32::NEG_INFINITY)]);
    assert_eq!(objs[1].get_value(0)?, Value::Double(f64::INFINITY));
    Ok(())
}
