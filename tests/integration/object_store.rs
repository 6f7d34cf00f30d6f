#![allow(missing_docs)]

use std::ops::ControlFlow;

use trama::{DataType, Group, GroupOptions, ObjKey, Result, Timestamp, TramaError, Value};

fn small_cluster_group() -> Result<Group> {
    Group::with_options(GroupOptions::new().max_cluster_size(4))
}

#[test]
fn created_objects_are_valid_with_schema_defaults() -> Result<()> {
    let group = Group::new();
    let t = group.add_table("items")?;
    t.add_column(DataType::Int, "count")?;
    t.add_column(DataType::Bool, "flag")?;
    t.add_column(DataType::Double, "ratio")?;
    t.add_column(DataType::String, "name")?;
    t.add_column(DataType::Binary, "blob")?;
    t.add_column(DataType::Timestamp, "at")?;
    t.add_column_nullable(DataType::Int, "maybe")?;

    let obj = t.create_object()?;
    assert!(t.is_valid(obj.key()));
    assert_eq!(obj.get::<i64>(0)?, Some(0));
    assert_eq!(obj.get::<bool>(1)?, Some(false));
    assert_eq!(obj.get::<f64>(2)?, Some(0.0));
    assert_eq!(obj.get::<String>(3)?, Some(String::new()));
    assert_eq!(obj.get::<Vec<u8>>(4)?, Some(Vec::new()));
    assert_eq!(obj.get::<Timestamp>(5)?, Some(Timestamp::default()));
    assert_eq!(obj.get::<i64>(6)?, None);
    assert!(obj.is_null(6)?);
    assert!(!obj.is_null(0)?);
    Ok(())
}

#[test]
fn existing_objects_receive_defaults_for_new_columns() -> Result<()> {
    let group = Group::new();
    let t = group.add_table("items")?;
    let keys = t.create_objects(3)?;
    t.add_column(DataType::String, "name")?;
    t.add_column_nullable(DataType::Double, "score")?;
    for key in keys {
        let obj = t.get_object(key)?;
        assert_eq!(obj.get_value(0)?, Value::String(String::new()));
        assert_eq!(obj.get_value(1)?, Value::Null);
    }
    Ok(())
}

#[test]
fn explicit_and_counter_keys() -> Result<()> {
    let group = Group::new();
    let t = group.add_table("items")?;
    assert_eq!(t.create_object()?.key(), ObjKey(0));
    assert_eq!(t.create_object_with_key(ObjKey(10))?.key(), ObjKey(10));
    assert_eq!(t.create_object()?.key(), ObjKey(11));
    assert!(matches!(
        t.create_object_with_key(ObjKey(10)),
        Err(TramaError::DuplicateKey(ObjKey(10)))
    ));
    assert!(matches!(t.get_object(ObjKey(5)), Err(TramaError::KeyNotFound(ObjKey(5)))));
    assert!(!t.is_valid(ObjKey(5)));
    assert!(!t.is_valid(ObjKey::NULL));
    assert_eq!(t.size()?, 3);
    Ok(())
}

#[test]
fn batch_creation_with_keys_is_atomic() -> Result<()> {
    let group = Group::new();
    let t = group.add_table("items")?;
    t.create_object_with_key(ObjKey(4))?;
    let err = t.create_objects_with_keys(&[ObjKey(1), ObjKey(4)]);
    assert!(matches!(err, Err(TramaError::DuplicateKey(ObjKey(4)))));
    assert_eq!(t.size()?, 1);

    assert!(t.create_objects_with_keys(&[ObjKey(2), ObjKey(2)]).is_err());
    assert_eq!(t.size()?, 1);

    t.create_objects_with_keys(&[ObjKey(9), ObjKey(1)])?;
    assert_eq!(t.object_keys()?, vec![ObjKey(1), ObjKey(4), ObjKey(9)]);
    assert_eq!(t.create_object()?.key(), ObjKey(10));
    Ok(())
}

#[test]
fn iteration_is_ordered_across_leaves() -> Result<()> {
    let group = small_cluster_group()?;
    let t = group.add_table("items")?;
    t.add_column(DataType::Int, "v")?;
    let keys = [40, 3, 17, 8, 25, 1, 33, 12, 29, 5, 21];
    for &k in &keys {
        t.create_object_with_key(ObjKey(k))?.set(0, k * 2)?;
    }
    let mut sorted = keys.to_vec();
    sorted.sort_unstable();

    let seen: Vec<i64> = t.iter().map(|obj| obj.key().0).collect();
    assert_eq!(seen, sorted);
    for obj in t.iter() {
        assert_eq!(obj.get::<i64>(0)?, Some(obj.key().0 * 2));
    }
    Ok(())
}

#[test]
fn iteration_skips_objects_removed_mid_way() -> Result<()> {
    let group = small_cluster_group()?;
    let t = group.add_table("items")?;
    t.create_objects(10)?;
    let mut seen = Vec::new();
    for obj in t.iter() {
        seen.push(obj.key());
        if obj.key() == ObjKey(2) {
            t.remove_object(ObjKey(3))?;
            t.remove_object(ObjKey(7))?;
        }
    }
    let expected: Vec<ObjKey> = [0, 1, 2, 4, 5, 6, 8, 9].into_iter().map(ObjKey).collect();
    assert_eq!(seen, expected);
    Ok(())
}

#[test]
fn traverse_stops_early() -> Result<()> {
    let group = Group::new();
    let t = group.add_table("items")?;
    t.create_objects(5)?;
    let mut visited = 0;
    let stopped = t.traverse(|key| {
        visited += 1;
        if key == ObjKey(2) {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    })?;
    assert!(stopped);
    assert_eq!(visited, 3);
    assert!(!t.traverse(|_| ControlFlow::Continue(()))?);
    Ok(())
}

#[test]
fn traverse_walks_every_leaf_and_allows_reentry() -> Result<()> {
    let group = small_cluster_group()?;
    let t = group.add_table("items")?;
    t.create_objects(11)?;
    let mut seen = Vec::new();
    let stopped = t.traverse(|key| {
        assert!(t.is_valid(key));
        seen.push(key);
        ControlFlow::Continue(())
    })?;
    assert!(!stopped);
    assert_eq!(seen, t.object_keys()?);
    assert_eq!(seen.len(), 11);
    Ok(())
}

#[test]
fn the_largest_key_exhausts_the_counter() -> Result<()> {
    let group = Group::new();
    let t = group.add_table("items")?;
    t.create_object_with_key(ObjKey(i64::MAX - 1))?;
    assert_eq!(t.create_object()?.key(), ObjKey(i64::MAX));
    assert!(matches!(t.create_object(), Err(TramaError::Invalid(_))));
    assert!(matches!(t.create_objects(1), Err(TramaError::Invalid(_))));
    assert_eq!(t.size()?, 2);
    assert!(t.is_valid(ObjKey(i64::MAX)));
    Ok(())
}

#[test]
fn bulk_creation_past_the_last_key_creates_nothing() -> Result<()> {
    let group = Group::new();
    let t = group.add_table("items")?;
    t.create_object_with_key(ObjKey(i64::MAX - 2))?;
    let version = t.version()?;
    assert!(matches!(t.create_objects(3), Err(TramaError::Invalid(_))));
    assert_eq!(t.size()?, 1);
    assert_eq!(t.version()?, version);
    assert_eq!(t.create_objects(2)?, vec![ObjKey(i64::MAX - 1), ObjKey(i64::MAX)]);
    Ok(())
}

#[test]
fn typed_access_checks_column_types() -> Result<()> {
    let group = Group::new();
    let t = group.add_table("items")?;
    t.add_column(DataType::Int, "n")?;
    t.add_column(DataType::String, "s")?;
    let obj = t.create_object()?;

    assert!(matches!(
        obj.get::<String>(0),
        Err(TramaError::TypeMismatch {
            column: 0,
            expected: DataType::String,
            actual: DataType::Int
        })
    ));
    assert!(matches!(
        obj.set(1, 5_i64),
        Err(TramaError::TypeMismatch { column: 1, .. })
    ));
    assert!(matches!(
        obj.set_value(0, Value::Null),
        Err(TramaError::ColumnNotNullable(0))
    ));
    assert!(matches!(obj.get::<i64>(2), Err(TramaError::ColumnIndexOutOfRange(2))));

    obj.set(1, "hello".to_owned())?;
    obj.set_value(0, Value::Int(-4))?;
    assert_eq!(obj.get::<String>(1)?.as_deref(), Some("hello"));
    assert_eq!(obj.get_value(0)?, Value::Int(-4));
    Ok(())
}

#[test]
fn nullable_columns_accept_null() -> Result<()> {
    let group = Group::new();
    let t = group.add_table("items")?;
    t.add_column_nullable(DataType::String, "s")?;
    let obj = t.create_object()?;
    obj.set(0, "x".to_owned())?;
    assert!(!obj.is_null(0)?);
    obj.set_null(0)?;
    assert!(obj.is_null(0)?);
    assert_eq!(obj.get::<String>(0)?, None);
    Ok(())
}

#[test]
fn removal_invalidates_the_key() -> Result<()> {
    let group = Group::new();
    let t = group.add_table("items")?;
    t.add_column(DataType::Int, "v")?;
    let obj = t.create_object()?;
    let key = obj.key();
    t.remove_object(key)?;
    assert!(!t.is_valid(key));
    assert!(!obj.is_valid());
    assert!(matches!(obj.get::<i64>(0), Err(TramaError::KeyNotFound(_))));
    assert!(matches!(t.remove_object(key), Err(TramaError::KeyNotFound(_))));
    Ok(())
}

#[test]
fn aggregates_skip_nulls() -> Result<()> {
    let group = small_cluster_group()?;
    let t = group.add_table("items")?;
    t.add_column_nullable(DataType::Int, "n")?;
    t.add_column(DataType::Double, "d")?;
    t.add_column(DataType::Float, "f")?;
    for (n, d) in [(Some(5_i64), 1.5_f64), (None, 2.5), (Some(-2), 0.5), (Some(5), 4.0), (Some(9), 1.0)] {
        let obj = t.create_object()?;
        match n {
            Some(n) => obj.set(0, n)?,
            None => obj.set_null(0)?,
        }
        obj.set(1, d)?;
        obj.set(2, d as f32)?;
    }

    assert_eq!(t.count_int(0, 5)?, 2);
    assert_eq!(t.count_null::<i64>(0)?, 1);
    assert_eq!(t.sum_int(0)?, 17);
    assert_eq!(t.minimum_int(0)?, Some(-2));
    assert_eq!(t.maximum_int(0)?, Some(9));
    assert_eq!(t.average_int(0)?, Some(17.0 / 4.0));
    assert_eq!(t.minimum::<i64>(0)?, Some((-2, ObjKey(2))));
    assert_eq!(t.maximum::<i64>(0)?, Some((9, ObjKey(4))));
    assert_eq!(t.sum_double(1)?, 9.5);
    assert_eq!(t.average_double(1)?, Some(1.9));
    assert_eq!(t.minimum_double(1)?, Some(0.5));
    assert_eq!(t.maximum_float(2)?, Some(4.0));
    assert_eq!(t.sum_float(2)?, 9.5);
    assert_eq!(t.count_double(1, 2.5)?, 1);
    Ok(())
}

#[test]
fn aggregates_on_empty_tables() -> Result<()> {
    let group = Group::new();
    let t = group.add_table("items")?;
    t.add_column(DataType::Int, "n")?;
    t.add_column(DataType::Timestamp, "at")?;
    assert_eq!(t.sum_int(0)?, 0);
    assert_eq!(t.average_int(0)?, None);
    assert_eq!(t.minimum_int(0)?, None);
    assert_eq!(t.maximum_timestamp(1)?, None);
    assert_eq!(t.lower_bound_int(0, 3)?, 0);
    Ok(())
}

#[test]
fn search_by_value() -> Result<()> {
    let group = small_cluster_group()?;
    let t = group.add_table("items")?;
    t.add_column(DataType::String, "name")?;
    t.add_column_nullable(DataType::Timestamp, "seen")?;
    t.add_column(DataType::Binary, "tag")?;
    t.add_column(DataType::Bool, "active")?;
    let names = ["ann", "bob", "cy", "bob", "dee", "bob"];
    for (i, name) in names.iter().enumerate() {
        let obj = t.create_object()?;
        obj.set(0, (*name).to_owned())?;
        if i % 2 == 0 {
            obj.set(1, Timestamp::new(i as i64, 0))?;
        } else {
            obj.set_null(1)?;
        }
        obj.set(2, vec![i as u8])?;
        obj.set(3, i == 4)?;
    }

    assert_eq!(t.find_first_string(0, "bob")?, Some(ObjKey(1)));
    assert_eq!(
        t.find_all_string(0, "bob")?,
        vec![ObjKey(1), ObjKey(3), ObjKey(5)]
    );
    assert_eq!(t.count_string(0, "bob")?, 3);
    assert_eq!(t.find_first_string(0, "zed")?, None);
    assert_eq!(t.find_first_null(1)?, Some(ObjKey(1)));
    assert_eq!(t.find_first_null(0)?, None);
    assert_eq!(t.find_first_timestamp(1, Timestamp::new(4, 0))?, Some(ObjKey(4)));
    assert_eq!(t.minimum_timestamp(1)?, Some(Timestamp::new(0, 0)));
    assert_eq!(t.maximum_timestamp(1)?, Some(Timestamp::new(4, 0)));
    assert_eq!(t.find_first_binary(2, &[3])?, Some(ObjKey(3)));
    assert_eq!(t.find_first_bool(3, true)?, Some(ObjKey(4)));
    Ok(())
}

#[test]
fn bounds_on_sorted_columns() -> Result<()> {
    let group = small_cluster_group()?;
    let t = group.add_table("items")?;
    t.add_column(DataType::Int, "n")?;
    t.add_column(DataType::String, "s")?;
    for (n, s) in [(1, "a"), (3, "b"), (3, "b"), (3, "c"), (7, "d"), (9, "e"), (9, "f")] {
        let obj = t.create_object()?;
        obj.set(0, n as i64)?;
        obj.set(1, s.to_owned())?;
    }
    assert_eq!(t.lower_bound_int(0, 3)?, 1);
    assert_eq!(t.upper_bound_int(0, 3)?, 4);
    assert_eq!(t.lower_bound_int(0, 0)?, 0);
    assert_eq!(t.upper_bound_int(0, 9)?, 7);
    assert_eq!(t.lower_bound_int(0, 8)?, 5);
    assert_eq!(t.lower_bound_string(1, "c")?, 3);
    assert_eq!(t.upper_bound_string(1, "b")?, 3);
    Ok(())
}

#[test]
fn versions_advance_on_writes_only() -> Result<()> {
    let group = Group::new();
    let t = group.add_table("items")?;
    let v0 = t.version()?;
    t.add_column(DataType::Int, "n")?;
    let v1 = t.version()?;
    assert!(v1 > v0);

    let obj = t.create_object()?;
    let v2 = t.version()?;
    assert!(v2 > v1);

    let _ = t.size()?;
    let _ = obj.get::<i64>(0)?;
    let _ = t.find_first_int(0, 0)?;
    let _ = t.sum_int(0)?;
    let _ = t.iter().count();
    assert_eq!(t.version()?, v2);

    obj.set(0, 3_i64)?;
    assert!(t.version()? > v2);
    Ok(())
}

#[test]
fn clear_empties_the_table() -> Result<()> {
    let group = small_cluster_group()?;
    let t = group.add_table("items")?;
    t.add_column(DataType::Int, "n")?;
    t.create_objects(9)?;
    let before = t.version()?;
    t.clear()?;
    assert!(t.is_empty()?);
    assert!(t.version()? > before);
    assert_eq!(t.iter().count(), 0);
    assert_eq!(t.create_object()?.key(), ObjKey(9));
    Ok(())
}
