#![allow(missing_docs)]

use std::sync::Arc;

use trama::{CounterMetrics, DataType, Group, GroupOptions, LinkType, ObjKey, Result, TableRef};

/// Table `name` with one link column `to` into `target`.
fn linked(group: &Group, name: &str, target: &TableRef, ty: DataType, link: LinkType) -> Result<TableRef> {
    let t = group.add_table(name)?;
    t.add_column_link(ty, "to", target, link)?;
    Ok(t)
}

#[test]
fn weak_referents_are_nullified_without_cascade() -> Result<()> {
    let group = Group::new();
    let target = group.add_table("target")?;
    let single = linked(&group, "single", &target, DataType::Link, LinkType::Weak)?;
    let list = linked(&group, "list", &target, DataType::LinkList, LinkType::Weak)?;

    let victim = target.create_object()?;
    let other = target.create_object()?;
    let s = single.create_object()?;
    s.set_link(0, victim.key())?;
    let l = list.create_object()?;
    l.list_add(0, victim.key())?;
    l.list_add(0, other.key())?;
    l.list_add(0, victim.key())?;

    target.remove_object(victim.key())?;
    assert_eq!(target.size()?, 1);
    assert!(s.is_valid());
    assert!(l.is_valid());
    assert_eq!(s.get_link(0)?, ObjKey::NULL);
    assert!(s.is_null(0)?);
    assert_eq!(l.list_get_all(0)?, vec![other.key()]);
    group.verify()?;
    Ok(())
}

#[test]
fn recursive_removal_follows_sole_strong_owners() -> Result<()> {
    let group = Group::new();
    let c_table = group.add_table("c")?;
    let b_table = linked(&group, "b", &c_table, DataType::Link, LinkType::Strong)?;
    let a_table = linked(&group, "a", &b_table, DataType::Link, LinkType::Strong)?;

    let c = c_table.create_object()?;
    let bystander = c_table.create_object()?;
    let b = b_table.create_object()?;
    b.set_link(0, c.key())?;
    let a = a_table.create_object()?;
    a.set_link(0, b.key())?;

    a_table.remove_object_recursive(a.key())?;
    assert!(!a.is_valid());
    assert!(!b.is_valid());
    assert!(!c.is_valid());
    assert!(bystander.is_valid());
    assert_eq!(c_table.size()?, 1);
    group.verify()?;
    Ok(())
}

#[test]
fn plain_removal_never_cascades() -> Result<()> {
    let metrics = Arc::new(CounterMetrics::default());
    let group = Group::with_options(GroupOptions::new().metrics(metrics.clone()))?;
    let c_table = group.add_table("c")?;
    let b_table = linked(&group, "b", &c_table, DataType::Link, LinkType::Strong)?;
    let a_table = linked(&group, "a", &b_table, DataType::Link, LinkType::Strong)?;

    let c = c_table.create_object()?;
    let b = b_table.create_object()?;
    b.set_link(0, c.key())?;
    let a = a_table.create_object()?;
    a.set_link(0, b.key())?;

    a_table.remove_object(a.key())?;
    assert!(!a.is_valid());
    assert!(b.is_valid());
    assert!(c.is_valid());
    assert_eq!(b.total_backlink_count()?, 0);
    assert_eq!(c.total_backlink_count()?, 1);
    assert_eq!(CounterMetrics::get(&metrics.objects_removed), 1);
    assert_eq!(CounterMetrics::get(&metrics.cascade_removals), 0);
    assert_eq!(CounterMetrics::get(&metrics.strong_links_broken), 1);
    Ok(())
}

#[test]
fn owner_scenario() -> Result<()> {
    let group = Group::new();
    let u = group.add_table("U")?;
    let t = group.add_table("T")?;
    let owner = t.add_column_link(DataType::Link, "owner", &u, LinkType::Strong)?;

    let u1 = u.create_object()?;
    let t1 = t.create_object()?;
    t1.set_link(owner, u1.key())?;
    assert_eq!(u1.backlinks(&t, owner)?, vec![t1.key()]);

    t.remove_object(t1.key())?;
    assert!(!t1.is_valid());
    assert_eq!(u1.backlink_count(&t, owner)?, 0);
    assert!(u1.is_valid());

    let t2 = t.create_object()?;
    u.remove_object(u1.key())?;
    assert!(!u1.is_valid());
    assert!(t2.is_valid());
    assert_eq!(t.size()?, 1);
    assert_eq!(t2.get_link(owner)?, ObjKey::NULL);
    group.verify()?;
    Ok(())
}

#[test]
fn removing_a_referent_nullifies_remaining_owners() -> Result<()> {
    let group = Group::new();
    let u = group.add_table("U")?;
    let t = linked(&group, "T", &u, DataType::Link, LinkType::Strong)?;
    let u1 = u.create_object()?;
    let holders: Vec<_> = (0..3)
        .map(|_| -> Result<_> {
            let h = t.create_object()?;
            h.set_link(0, u1.key())?;
            Ok(h)
        })
        .collect::<Result<_>>()?;
    assert_eq!(u1.backlink_count(&t, 0)?, 3);
    assert_eq!(u1.backlink(&t, 0, 1)?, holders[1].key());

    u.remove_object(u1.key())?;
    for h in &holders {
        assert!(h.is_valid());
        assert_eq!(h.get_link(0)?, ObjKey::NULL);
    }
    Ok(())
}

#[test]
fn breaking_the_last_strong_link_removes_the_target() -> Result<()> {
    let metrics = Arc::new(CounterMetrics::default());
    let group = Group::with_options(GroupOptions::new().metrics(metrics.clone()))?;
    let u = group.add_table("U")?;
    let t = linked(&group, "T", &u, DataType::Link, LinkType::Strong)?;
    let first = u.create_object()?;
    let second = u.create_object()?;
    let holder = t.create_object()?;
    holder.set_link(0, first.key())?;

    // Same target again is not a break.
    holder.set_link(0, first.key())?;
    assert!(first.is_valid());

    holder.set_link(0, second.key())?;
    assert!(!first.is_valid());
    assert!(second.is_valid());
    assert_eq!(CounterMetrics::get(&metrics.cascade_removals), 1);

    holder.nullify_link(0)?;
    assert!(!second.is_valid());
    assert_eq!(u.size()?, 0);
    assert!(holder.is_valid());
    group.verify()?;
    Ok(())
}

#[test]
fn a_second_strong_owner_keeps_the_target() -> Result<()> {
    let group = Group::new();
    let u = group.add_table("U")?;
    let t = linked(&group, "T", &u, DataType::Link, LinkType::Strong)?;
    let shared = u.create_object()?;
    let a = t.create_object()?;
    let b = t.create_object()?;
    a.set_link(0, shared.key())?;
    b.set_link(0, shared.key())?;

    a.nullify_link(0)?;
    assert!(shared.is_valid());
    b.nullify_link(0)?;
    assert!(!shared.is_valid());
    Ok(())
}

#[test]
fn weak_breaks_never_remove() -> Result<()> {
    let group = Group::new();
    let u = group.add_table("U")?;
    let t = linked(&group, "T", &u, DataType::Link, LinkType::Weak)?;
    let target = u.create_object()?;
    let holder = t.create_object()?;
    holder.set_link(0, target.key())?;
    holder.nullify_link(0)?;
    assert!(target.is_valid());
    Ok(())
}

#[test]
fn strong_cycles_are_not_collected() -> Result<()> {
    let group = Group::new();
    let nodes = group.add_table("nodes")?;
    let next = nodes.add_column_link(DataType::Link, "next", &nodes, LinkType::Strong)?;
    let outside = linked(&group, "outside", &nodes, DataType::Link, LinkType::Strong)?;

    let a = nodes.create_object()?;
    let b = nodes.create_object()?;
    a.set_link(next, b.key())?;
    b.set_link(next, a.key())?;
    let x = outside.create_object()?;
    x.set_link(0, a.key())?;

    // Dropping the only external owner leaves the cycle alive.
    x.nullify_link(0)?;
    assert!(a.is_valid());
    assert!(b.is_valid());
    assert_eq!(nodes.size()?, 2);

    // An explicit recursive removal takes the whole cycle.
    nodes.remove_object_recursive(a.key())?;
    assert!(!a.is_valid());
    assert!(!b.is_valid());
    group.verify()?;
    Ok(())
}

#[test]
fn breaking_a_link_inside_a_cycle_removes_its_co_member() -> Result<()> {
    let group = Group::new();
    let nodes = group.add_table("nodes")?;
    let next = nodes.add_column_link(DataType::Link, "next", &nodes, LinkType::Strong)?;
    let a = nodes.create_object()?;
    let b = nodes.create_object()?;
    a.set_link(next, b.key())?;
    b.set_link(next, a.key())?;

    a.nullify_link(next)?;
    assert!(!b.is_valid());
    // `a` lost its owner with `b`, so it goes too.
    assert!(!a.is_valid());
    assert_eq!(nodes.size()?, 0);
    Ok(())
}

#[test]
fn list_edits_are_link_breaks() -> Result<()> {
    let group = Group::new();
    let items = group.add_table("items")?;
    let bags = linked(&group, "bags", &items, DataType::LinkList, LinkType::Strong)?;
    let keys = items.create_objects(4)?;
    let bag = bags.create_object()?;
    for &k in &keys {
        bag.list_add(0, k)?;
    }
    assert_eq!(bag.list_len(0)?, 4);
    assert_eq!(bag.list_get(0, 2)?, keys[2]);
    assert!(bag.list_get(0, 4).is_err());

    bag.list_remove(0, 0)?;
    assert!(!items.is_valid(keys[0]));

    bag.list_set(0, 0, keys[3])?;
    assert!(!items.is_valid(keys[1]));
    assert!(items.is_valid(keys[3]));
    assert_eq!(bag.list_get_all(0)?, vec![keys[3], keys[2], keys[3]]);

    // One of two entries for the same target goes; the other still owns it.
    bag.list_remove(0, 0)?;
    assert!(items.is_valid(keys[3]));

    bag.list_insert(0, 0, keys[2])?;
    bag.list_clear(0)?;
    assert_eq!(items.size()?, 0);
    assert!(bag.is_valid());
    group.verify()?;
    Ok(())
}

#[test]
fn cascade_crosses_tables_and_lists() -> Result<()> {
    let group = Group::new();
    let leaves = group.add_table("leaves")?;
    let branches = linked(&group, "branches", &leaves, DataType::LinkList, LinkType::Strong)?;
    let trees = linked(&group, "trees", &branches, DataType::LinkList, LinkType::Strong)?;

    let tree = trees.create_object()?;
    let mut all_leaves = Vec::new();
    for _ in 0..3 {
        let branch = branches.create_object()?;
        tree.list_add(0, branch.key())?;
        for _ in 0..2 {
            let leaf = leaves.create_object()?;
            branch.list_add(0, leaf.key())?;
            all_leaves.push(leaf.key());
        }
    }
    let shared_leaf = all_leaves[0];
    let keeper = branches.create_object()?;
    keeper.list_add(0, shared_leaf)?;

    trees.remove_object_recursive(tree.key())?;
    assert_eq!(trees.size()?, 0);
    assert_eq!(branches.object_keys()?, vec![keeper.key()]);
    assert_eq!(leaves.object_keys()?, vec![shared_leaf]);
    group.verify()?;
    Ok(())
}

#[test]
fn clear_behaves_like_plain_removal() -> Result<()> {
    let group = Group::new();
    let u = group.add_table("U")?;
    let t = linked(&group, "T", &u, DataType::Link, LinkType::Strong)?;
    let targets = u.create_objects(3)?;
    for &target in &targets {
        t.create_object()?.set_link(0, target)?;
    }
    t.clear()?;
    assert_eq!(t.size()?, 0);
    assert_eq!(u.size()?, 3);
    for &target in &targets {
        assert_eq!(u.get_object(target)?.total_backlink_count()?, 0);
    }
    group.verify()?;
    Ok(())
}

#[test]
fn removing_a_strong_link_column_keeps_targets() -> Result<()> {
    let group = Group::new();
    let u = group.add_table("U")?;
    let t = linked(&group, "T", &u, DataType::LinkList, LinkType::Strong)?;
    let target = u.create_object()?;
    t.create_object()?.list_add(0, target.key())?;
    t.remove_column(0)?;
    assert!(target.is_valid());
    assert_eq!(target.total_backlink_count()?, 0);
    group.verify()?;
    Ok(())
}

#[test]
fn links_must_point_at_live_objects() -> Result<()> {
    let group = Group::new();
    let u = group.add_table("U")?;
    let t = linked(&group, "T", &u, DataType::Link, LinkType::Weak)?;
    let holder = t.create_object()?;
    assert!(holder.set_link(0, ObjKey(42)).is_err());
    assert_eq!(holder.get_link(0)?, ObjKey::NULL);

    let l = linked(&group, "L", &u, DataType::LinkList, LinkType::Weak)?;
    let lh = l.create_object()?;
    assert!(lh.list_add(0, ObjKey(42)).is_err());
    assert!(lh.list_add(0, ObjKey::NULL).is_err());
    assert_eq!(lh.list_len(0)?, 0);
    group.verify()?;
    Ok(())
}

#[test]
fn link_searches() -> Result<()> {
    let group = Group::new();
    let u = group.add_table("U")?;
    let t = group.add_table("T")?;
    t.add_column_link(DataType::Link, "one", &u, LinkType::Weak)?;
    t.add_column_link(DataType::LinkList, "many", &u, LinkType::Weak)?;
    let targets = u.create_objects(2)?;
    let h0 = t.create_object()?;
    let h1 = t.create_object()?;
    let h2 = t.create_object()?;
    h1.set_link(0, targets[1])?;
    h2.set_link(0, targets[1])?;
    h0.list_add(1, targets[0])?;
    h2.list_add(1, targets[0])?;

    assert_eq!(t.find_first_link(0, targets[1])?, Some(h1.key()));
    assert_eq!(t.find_all_link(0, targets[1])?, vec![h1.key(), h2.key()]);
    assert_eq!(t.find_all_link(1, targets[0])?, vec![h0.key(), h2.key()]);
    assert_eq!(t.find_first_null(0)?, Some(h0.key()));
    assert_eq!(h1.get_linked_object(0)?.map(|o| o.key()), Some(targets[1]));
    assert!(h0.get_linked_object(0)?.is_none());
    Ok(())
}

#[test]
fn link_writes_bump_versions_on_both_sides() -> Result<()> {
    let group = Group::new();
    let u = group.add_table("U")?;
    let t = linked(&group, "T", &u, DataType::Link, LinkType::Weak)?;
    let lone = group.add_table("lone")?;
    let target = u.create_object()?;
    let holder = t.create_object()?;

    let (tv, uv, lv) = (t.version()?, u.version()?, lone.version()?);
    holder.set_link(0, target.key())?;
    assert!(t.version()? > tv);
    assert!(u.version()? > uv);
    assert_eq!(lone.version()?, lv);

    // A change in the target table reaches the linking table too.
    let tv = t.version()?;
    u.create_object()?;
    assert!(t.version()? > tv);
    Ok(())
}

#[test]
fn version_propagation_can_be_disabled() -> Result<()> {
    let group = Group::with_options(GroupOptions::new().propagate_versions(false))?;
    let u = group.add_table("U")?;
    let t = linked(&group, "T", &u, DataType::Link, LinkType::Weak)?;
    let tv = t.version()?;
    u.create_object()?;
    assert_eq!(t.version()?, tv);
    Ok(())
}
