use std::error::Error;
use std::ops::ControlFlow;

use pretty_assertions::assert_eq;

use xtypes::*;

fn temp_type() -> StructType {
    let mut temp = StructType::new("Temp");
    temp.add_member(Member::new("number", primitive_type::<u32>()))
        .unwrap()
        .add_member(Member::new("string", StringType::new(0)))
        .unwrap();
    temp
}

fn fixed_type() -> StructType {
    let mut fixed = StructType::new("Fixed");
    fixed
        .add_member(Member::new("number", primitive_type::<u32>()))
        .unwrap()
        .add_member(Member::new(
            "inner",
            SequenceType::unbounded(temp_type()).unwrap(),
        ))
        .unwrap();
    fixed
}

fn populated_fixed() -> Result<DynamicData, Box<dyn Error>> {
    let mut data = DynamicData::new(fixed_type());
    data.as_mut().member("number")?.set(42u32)?;
    for i in 0..2u32 {
        let mut temp = DynamicData::new(temp_type());
        temp.as_mut().member("number")?.set(i)?;
        temp.as_mut().member("string")?.set_string(&i.to_string())?;
        data.as_mut().member("inner")?.push_data(temp.as_ref())?;
    }
    Ok(data)
}

fn edge_label(access: Option<&NodeAccess<'_>>) -> String {
    match access {
        None => "[]".to_string(),
        Some(NodeAccess::Member(name)) => name.to_string(),
        Some(NodeAccess::Index(index)) => format!("[{index}]"),
    }
}

#[test]
fn value_preorder_edges_and_depths() -> Result<(), Box<dyn Error>> {
    let data = populated_fixed()?;

    let mut labels = Vec::new();
    let mut depths = Vec::new();
    data.for_each(|node| {
        labels.push(edge_label(node.access()));
        depths.push(node.depth());
        ControlFlow::Continue(())
    });

    assert_eq!(
        labels,
        vec!["[]", "number", "inner", "[0]", "number", "string", "[1]", "number", "string"]
    );
    assert_eq!(depths, vec![0, 1, 1, 2, 3, 3, 2, 3, 3]);
    Ok(())
}

#[test]
fn parent_cursors_and_member_edges() -> Result<(), Box<dyn Error>> {
    let data = populated_fixed()?;

    data.for_each(|node| {
        if let Some(parent) = node.parent() {
            // Aggregation parents label the edge by member name, collection
            // parents by index, exactly one of the two.
            let access = node.access().unwrap();
            if parent.ty().is_aggregation_type() {
                assert!(access.member_name().is_some());
                assert!(access.index().is_none());
            } else {
                assert!(access.index().is_some());
            }
        } else {
            assert_eq!(node.depth(), 0);
            assert!(node.access().is_none());
        }
        ControlFlow::Continue(())
    });
    Ok(())
}

#[test]
fn visit_count_matches_tree_size() -> Result<(), Box<dyn Error>> {
    let data = populated_fixed()?;

    let mut visits = 0usize;
    let flow = data.for_each(|_| {
        visits += 1;
        ControlFlow::Continue(())
    });
    assert_eq!(flow, ControlFlow::Continue(()));
    // Root + 2 members + 2 sequence elements with 2 members each.
    assert_eq!(visits, 9);

    // Leaf values are visited exactly once: the sum over per-node counts.
    let mut reads = 0u32;
    data.for_each(|node| {
        if node.data().ty().resolve().kind() == TypeKind::UInt32 {
            reads += node.data().value::<u32>().unwrap();
        }
        ControlFlow::Continue(())
    });
    assert_eq!(reads, 42 + 0 + 1);
    Ok(())
}

#[test]
fn early_break_unwinds() -> Result<(), Box<dyn Error>> {
    let data = populated_fixed()?;

    let mut visits = 0usize;
    let flow = data.for_each(|_| {
        visits += 1;
        if visits == 4 {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    });
    assert_eq!(flow, ControlFlow::Break(()));
    assert_eq!(visits, 4);
    Ok(())
}

#[test]
fn type_preorder_visits_descriptors() {
    let ty: DynamicType = fixed_type().into();

    let mut names = Vec::new();
    let mut depths = Vec::new();
    ty.for_each_type(
        |node| {
            names.push(node.ty().name().to_string());
            depths.push(node.depth());
            ControlFlow::Continue(())
        },
        true,
    );

    assert_eq!(
        names,
        vec!["Fixed", "u32", "sequence_Temp", "Temp", "u32", "string"]
    );
    assert_eq!(depths, vec![0, 1, 1, 2, 3, 3]);
}

#[test]
fn type_postorder_parents_follow_children() {
    let ty: DynamicType = fixed_type().into();

    let mut names = Vec::new();
    ty.for_each_type(
        |node| {
            names.push(node.ty().name().to_string());
            ControlFlow::Continue(())
        },
        false,
    );

    assert_eq!(
        names,
        vec!["u32", "u32", "string", "Temp", "sequence_Temp", "Fixed"]
    );
}

#[test]
fn type_nodes_expose_parent_chain() {
    let ty: DynamicType = fixed_type().into();

    ty.for_each_type(
        |node| {
            let mut depth = node.depth();
            let mut cursor = node.parent();
            while let Some(parent) = cursor {
                depth = depth.checked_sub(1).unwrap();
                assert_eq!(parent.depth(), depth);
                cursor = parent.parent();
            }
            assert_eq!(depth, 0);
            ControlFlow::Continue(())
        },
        true,
    );
}

#[test]
fn map_traversal_visits_keys_and_values() -> Result<(), Box<dyn Error>> {
    let map = MapType::new(primitive_type::<u32>(), StringType::new(0), 0).unwrap();
    let mut data = DynamicData::new(map);
    let mut key = DynamicData::new(primitive_type::<u32>());
    for i in 0..3u32 {
        key.as_mut().set(i)?;
        data.as_mut().insert(key.as_ref())?.set_string(&i.to_string())?;
    }

    let mut keys = 0usize;
    let mut values = 0usize;
    data.for_each(|node| {
        if let Some(index) = node.access().and_then(NodeAccess::index) {
            if index % 2 == 0 {
                keys += 1;
            } else {
                values += 1;
            }
        }
        ControlFlow::Continue(())
    });
    assert_eq!((keys, values), (3, 3));
    Ok(())
}

#[test]
fn optional_members_are_skipped_until_written() -> Result<(), Box<dyn Error>> {
    let mut st = StructType::new("Sparse");
    st.add_member(Member::new("always", primitive_type::<u32>()))
        .unwrap()
        .add_member(Member::new("maybe", primitive_type::<u32>()).optional(true))
        .unwrap();
    let mut data = DynamicData::new(st);

    let count = |data: &DynamicData| {
        let mut visits = 0usize;
        data.for_each(|_| {
            visits += 1;
            ControlFlow::Continue(())
        });
        visits
    };

    assert_eq!(count(&data), 2);
    data.as_mut().member("maybe")?.set(1u32)?;
    assert_eq!(count(&data), 3);
    Ok(())
}
