/*!
Runtime self-describing type system in the style of OMG DDS-XTypes.

A program builds [type descriptors](DynamicType) at run time (primitives,
strings, arrays, sequences, maps, structures, aliases), instantiates
[dynamic values](DynamicData) conforming to them, and reads, writes, copies,
compares, hashes and traverses those values without any compile-time
knowledge of their shape:

```
use xtypes::*;

let mut inner = StructType::new("InnerType");
inner.add_member(Member::new("im1", primitive_type::<u32>()))?
     .add_member(Member::new("im2", primitive_type::<f32>()))?;

let mut outer = StructType::new("OuterType");
outer.add_member(Member::new("om1", primitive_type::<f64>()))?
     .add_member(Member::new("om2", inner))?
     .add_member(Member::new("om3", SequenceType::new(primitive_type::<u32>(), 5)?))?;

let mut data = DynamicData::new(outer);
let mut root = data.as_mut();
root.member("om1")?.set(6.7f64)?;
root.member("om2")?.member("im1")?.set(42u32)?;
root.member("om3")?.push(12u32)?;

assert_eq!(data.as_ref().member("om2")?.member("im1")?.value::<u32>()?, 42);
# Ok::<(), Box<dyn std::error::Error>>(())
```

Descriptors are plain values: cloneable, structurally comparable and
hashable. Instance bytes are owned by exactly one [DynamicData] root and are
reached only through cursors; compatibility between two descriptors is a
pure function returning a [TypeConsistency] bitset.
*/

mod data;
mod descriptors;
mod errors;
mod instance;
mod kind;
mod primitive;
mod visitor;

pub use data::{DynamicData, ReadableDynamicDataRef, WritableDynamicDataRef};
pub use descriptors::{
    AliasType, ArrayType, DynamicType, MapType, Member, SequenceType, StringType, StructMember,
    StructType,
};
pub use errors::{DataError, TypeError};
pub use kind::{TypeConsistency, TypeKind};
pub use primitive::{primitive_type, Primitive, PrimitiveType};
pub use visitor::{NodeAccess, ReadableNode, TypeNode};
