use std::error::Error;

use pretty_assertions::assert_eq;
use rand::Rng;

use xtypes::*;

fn inner_type() -> StructType {
    let mut inner = StructType::new("InnerType");
    inner
        .add_member(Member::new("im1", primitive_type::<u32>()))
        .unwrap()
        .add_member(Member::new("im2", primitive_type::<f32>()))
        .unwrap();
    inner
}

fn outer_type() -> StructType {
    let mut outer = StructType::new("OuterType");
    outer
        .add_member(Member::new("om1", primitive_type::<f64>()))
        .unwrap()
        .add_member(Member::new("om2", inner_type()))
        .unwrap()
        .add_member(Member::new(
            "om3",
            SequenceType::new(primitive_type::<u32>(), 5).unwrap(),
        ))
        .unwrap()
        .add_member(Member::new(
            "om4",
            SequenceType::unbounded(inner_type()).unwrap(),
        ))
        .unwrap()
        .add_member(Member::new(
            "om5",
            ArrayType::new(primitive_type::<u32>(), 4).unwrap(),
        ))
        .unwrap()
        .add_member(Member::new("om6", ArrayType::new(inner_type(), 4).unwrap()))
        .unwrap()
        .add_member(Member::new("om7", StringType::new(0)))
        .unwrap();
    outer
}

fn populated_outer() -> Result<DynamicData, Box<dyn Error>> {
    let mut data = DynamicData::new(outer_type());
    let mut root = data.as_mut();
    root.member("om1")?.set(6.7f64)?;
    {
        let mut om2 = root.member("om2")?;
        om2.member("im1")?.set(42u32)?;
        om2.member("im2")?.set(35.8f32)?;
    }
    {
        let mut om3 = root.member("om3")?;
        om3.push(12u32)?;
        om3.push(31u32)?;
        om3.push(50u32)?;
        om3.item(1)?.set(100u32)?;
    }
    root.member("om7")?.set_string("This is a string!")?;
    Ok(data)
}

#[test]
fn nested_write_read_round_trip() -> Result<(), Box<dyn Error>> {
    let data = populated_outer()?;
    let root = data.as_ref();

    assert_eq!(root.member("om1")?.value::<f64>()?, 6.7);
    assert_eq!(root.member("om2")?.member("im1")?.value::<u32>()?, 42);
    assert_eq!(root.member("om2")?.member("im2")?.value::<f32>()?, 35.8);

    let om3 = root.member("om3")?;
    assert_eq!(om3.size(), 3);
    assert_eq!(om3.item(0)?.value::<u32>()?, 12);
    assert_eq!(om3.item(1)?.value::<u32>()?, 100);
    assert_eq!(om3.item(2)?.value::<u32>()?, 50);

    assert_eq!(root.member("om7")?.string()?, "This is a string!");
    Ok(())
}

#[test]
fn bounded_sequence_exhaustion() -> Result<(), Box<dyn Error>> {
    let mut data = DynamicData::new(outer_type());
    let mut root = data.as_mut();
    let mut om3 = root.member("om3")?;
    for value in [1u32, 2, 3, 4] {
        om3.push(value)?;
    }
    // Fifth push reaches the bound, sixth is refused without touching it.
    om3.push(5u32)?;
    let err = om3.push(6u32).unwrap_err();
    assert!(matches!(err, DataError::BoundsExceeded { .. }));
    assert_eq!(om3.size(), 5);
    assert_eq!(om3.item(4)?.value::<u32>()?, 5);
    Ok(())
}

#[test]
fn array_slots_default_to_zero() -> Result<(), Box<dyn Error>> {
    let mut data = DynamicData::new(outer_type());
    data.as_mut().member("om5")?.item(1)?.set(123u32)?;

    let om5 = data.as_ref().member("om5")?;
    assert_eq!(om5.size(), 4);
    assert_eq!(om5.item(0)?.value::<u32>()?, 0);
    assert_eq!(om5.item(1)?.value::<u32>()?, 123);
    assert_eq!(om5.item(2)?.value::<u32>()?, 0);
    assert_eq!(om5.item(3)?.value::<u32>()?, 0);

    let err = om5.item(4).unwrap_err();
    assert!(matches!(err, DataError::OutOfBounds { .. }));
    Ok(())
}

#[test]
fn aggregate_push_and_assignment() -> Result<(), Box<dyn Error>> {
    let mut data = populated_outer()?;
    let om2 = DynamicData::from_ref(data.as_ref().member("om2")?);

    let mut root = data.as_mut();
    {
        let mut om4 = root.member("om4")?;
        om4.push_data(om2.as_ref())?;
        om4.push_data(om2.as_ref())?;
        om4.item(1)?.assign(om2.as_ref())?;
    }
    root.member("om6")?.item(1)?.assign(om2.as_ref())?;

    let root = data.as_ref();
    assert_eq!(root.member("om4")?.size(), 2);
    assert_eq!(
        root.member("om4")?.item(0)?.member("im1")?.value::<u32>()?,
        42
    );
    assert!(root.member("om4")?.item(1)? == om2.as_ref());
    assert_eq!(
        root.member("om6")?.item(1)?.member("im2")?.value::<f32>()?,
        35.8
    );
    assert_eq!(root.member("om6")?.item(0)?.member("im1")?.value::<u32>()?, 0);
    Ok(())
}

#[test]
fn copy_preserves_equality_and_hash() -> Result<(), Box<dyn Error>> {
    let source = populated_outer()?;
    let copy = source.clone();

    assert!(source == copy);
    assert_eq!(source.hash(), copy.hash());

    let mut source = source;
    source
        .as_mut()
        .member("om2")?
        .member("im1")?
        .set(43u32)?;
    assert!(source != copy);
    Ok(())
}

#[test]
fn from_ref_copies_a_subtree() -> Result<(), Box<dyn Error>> {
    let data = populated_outer()?;
    let om3 = DynamicData::from_ref(data.as_ref().member("om3")?);
    assert_eq!(om3.as_ref().size(), 3);
    assert_eq!(om3.as_ref().item(1)?.value::<u32>()?, 100);
    assert_eq!(om3.ty().name(), "sequence_5_u32");
    Ok(())
}

#[test]
fn copy_from_converts_across_compatible_types() -> Result<(), Box<dyn Error>> {
    // Same shape, renamed members, widened integer: compatible but not equal.
    let mut widened = StructType::new("WideInner");
    widened
        .add_member(Member::new("first", primitive_type::<u64>()))
        .unwrap()
        .add_member(Member::new("second", primitive_type::<f32>()))
        .unwrap();

    let data = populated_outer()?;
    let converted = DynamicData::copy_from(data.as_ref().member("om2")?, widened)?;
    assert_eq!(converted.as_ref().member("first")?.value::<u64>()?, 42);
    assert_eq!(converted.as_ref().member("second")?.value::<f32>()?, 35.8);

    let err = DynamicData::copy_from(data.as_ref().member("om2")?, StringType::new(0));
    assert!(matches!(err.unwrap_err(), DataError::TypeMismatch { .. }));
    Ok(())
}

#[test]
fn single_member_wrapper_is_transparent() -> Result<(), Box<dyn Error>> {
    let mut wrapper = StructType::new("Wrapper");
    wrapper
        .add_member(Member::new("value", primitive_type::<u32>()))
        .unwrap();

    let mut bare = DynamicData::new(primitive_type::<u32>());
    bare.as_mut().set(77u32)?;

    let mut wrapped = DynamicData::new(wrapper);
    wrapped.as_mut().assign(bare.as_ref())?;
    assert_eq!(wrapped.as_ref().member("value")?.value::<u32>()?, 77);

    let mut back = DynamicData::new(primitive_type::<u32>());
    back.as_mut().assign(wrapped.as_ref())?;
    assert_eq!(back.as_ref().value::<u32>()?, 77);
    Ok(())
}

#[test]
fn sequence_resize() -> Result<(), Box<dyn Error>> {
    let seq = SequenceType::new(primitive_type::<u32>(), 5).unwrap();
    let mut data = DynamicData::new(seq);
    data.as_mut().resize(3)?;
    assert_eq!(data.as_ref().size(), 3);
    assert_eq!(data.as_ref().item(2)?.value::<u32>()?, 0);

    data.as_mut().item(2)?.set(9u32)?;
    data.as_mut().resize(1)?;
    assert_eq!(data.as_ref().size(), 1);

    let err = data.as_mut().resize(6).unwrap_err();
    assert!(matches!(err, DataError::BoundsExceeded { .. }));
    assert_eq!(data.as_ref().size(), 1);
    Ok(())
}

#[test]
fn map_insert_lookup_and_bound() -> Result<(), Box<dyn Error>> {
    let map = MapType::new(primitive_type::<u32>(), StringType::new(0), 2).unwrap();
    let mut data = DynamicData::new(map);

    let mut key = DynamicData::new(primitive_type::<u32>());
    key.as_mut().set(1u32)?;
    data.as_mut().insert(key.as_ref())?.set_string("one")?;
    key.as_mut().set(2u32)?;
    data.as_mut().insert(key.as_ref())?.set_string("two")?;

    assert_eq!(data.as_ref().size(), 2);
    assert_eq!(
        data.as_ref().at(key.as_ref())?.unwrap().string()?,
        "two"
    );
    key.as_mut().set(9u32)?;
    assert!(data.as_ref().at(key.as_ref())?.is_none());

    // Re-inserting an existing key reuses its slot.
    key.as_mut().set(1u32)?;
    data.as_mut().insert(key.as_ref())?.set_string("uno")?;
    assert_eq!(data.as_ref().size(), 2);

    key.as_mut().set(3u32)?;
    let err = data.as_mut().insert(key.as_ref()).unwrap_err();
    assert!(matches!(err, DataError::BoundsExceeded { .. }));
    assert_eq!(data.as_ref().size(), 2);
    Ok(())
}

#[test]
fn map_copy_compare_hash() -> Result<(), Box<dyn Error>> {
    let map = MapType::new(StringType::new(0), primitive_type::<u64>(), 0).unwrap();
    let mut data = DynamicData::new(map);

    let mut key = DynamicData::new(StringType::new(0));
    for (name, value) in [("a", 1u64), ("b", 2), ("c", 3)] {
        key.as_mut().set_string(name)?;
        data.as_mut().insert(key.as_ref())?.set(value)?;
    }

    let copy = data.clone();
    assert!(data == copy);
    assert_eq!(data.hash(), copy.hash());

    key.as_mut().set_string("b")?;
    data.as_mut().at(key.as_ref())?.unwrap().set(20u64)?;
    assert!(data != copy);
    Ok(())
}

#[test]
fn optional_members_track_presence() -> Result<(), Box<dyn Error>> {
    let mut st = StructType::new("WithOptional");
    st.add_member(Member::new("required", primitive_type::<u32>()))
        .unwrap()
        .add_member(Member::new("extra", StringType::new(0)).optional(true))
        .unwrap();

    let mut a = DynamicData::new(st);
    a.as_mut().member("required")?.set(1u32)?;
    let b = a.clone();
    assert!(a == b);

    let err = a.as_ref().member("extra").unwrap_err();
    assert!(matches!(err, DataError::UninitializedAccess { .. }));

    a.as_mut().member("extra")?.set_string("present")?;
    assert_eq!(a.as_ref().member("extra")?.string()?, "present");
    assert!(a != b);
    Ok(())
}

#[test]
fn alias_is_transparent_to_navigation() -> Result<(), Box<dyn Error>> {
    let alias = AliasType::new("InnerAlias", inner_type())?;
    let mut st = StructType::new("Holder");
    st.add_member(Member::new("inner", alias)).unwrap();

    let mut data = DynamicData::new(st);
    data.as_mut().member("inner")?.member("im1")?.set(11u32)?;
    assert_eq!(
        data.as_ref().member("inner")?.member("im1")?.value::<u32>()?,
        11
    );
    assert_eq!(data.as_ref().member("inner")?.ty().name(), "InnerAlias");
    assert_eq!(data.as_ref().member("inner")?.kind(), TypeKind::Structure);
    Ok(())
}

#[test]
fn equal_random_values_hash_equal() -> Result<(), Box<dyn Error>> {
    let mut rng = rand::rng();
    for _ in 0..32 {
        let mut data = DynamicData::new(outer_type());
        let mut root = data.as_mut();
        root.member("om1")?.set(rng.random::<f64>())?;
        root.member("om2")?.member("im1")?.set(rng.random::<u32>())?;
        let count = rng.random_range(0..5usize);
        for _ in 0..count {
            root.member("om3")?.push(rng.random::<u32>())?;
        }
        drop(root);

        let copy = data.clone();
        assert!(data == copy);
        assert_eq!(data.hash(), copy.hash());
    }
    Ok(())
}
