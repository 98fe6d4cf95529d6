/*!
Dynamic values and the navigation cursors over them.

A [DynamicData] owns one instance tree: the descriptor that governs it and
the aligned byte block holding the value. All reads and writes go through
the two cursor types, which remember the descriptor of the subtree they
point at:

```
# use xtypes::*;
let mut inner = StructType::new("InnerType");
inner.add_member(Member::new("im1", primitive_type::<u32>())).unwrap();
let mut data = DynamicData::new(inner);
data.as_mut().member("im1").unwrap().set(42u32).unwrap();
assert_eq!(data.as_ref().member("im1").unwrap().value::<u32>().unwrap(), 42);
```

A writable cursor borrows its parent mutably, so within one tree the
exclusive-write contract is enforced at compile time. Assigning between
subtrees of the *same* tree therefore goes through a temporary
[DynamicData::from_ref] copy.
*/

use std::marker::PhantomData;
use std::sync::Arc;

use snafu::{ensure, ResultExt};

use crate::descriptors::{resolve_arc, DynamicType};
use crate::errors::{
    BoundsExceeded, DataError, InvalidMember, InvalidUtf8, OutOfBounds, TypeMismatch,
    UninitializedAccess,
};
use crate::instance::{activate_member, member_present, InstanceBlock};
use crate::kind::{TypeConsistency, TypeKind};
use crate::primitive::Primitive;

/// An owned dynamic value: one descriptor plus the instance bytes it
/// governs.
pub struct DynamicData {
    ty: Arc<DynamicType>,
    block: InstanceBlock,
}

impl DynamicData {
    /// Default-construct a value of `ty`. Freezes the descriptor: from here
    /// on it is shared and immutable.
    pub fn new(ty: impl Into<DynamicType>) -> DynamicData {
        DynamicData::from_shared(Arc::new(ty.into()))
    }

    /// As [DynamicData::new], reusing an already shared descriptor.
    pub fn from_shared(ty: Arc<DynamicType>) -> DynamicData {
        let block = InstanceBlock::allocate(ty.memory_size(), ty.natural_alignment());
        unsafe { ty.construct(block.as_ptr()) };
        DynamicData { ty, block }
    }

    /// Deep copy of the subtree a cursor points at, under that subtree's
    /// own descriptor.
    pub fn from_ref(value: ReadableDynamicDataRef<'_>) -> DynamicData {
        let ty = Arc::clone(value.shared_ty());
        let block = InstanceBlock::allocate(ty.memory_size(), ty.natural_alignment());
        unsafe { ty.copy(block.as_ptr(), value.instance) };
        DynamicData { ty, block }
    }

    /// Build a value of `ty` from a cursor of a *compatible* descriptor,
    /// converting widths, signs and bounds on the way.
    pub fn copy_from(
        value: ReadableDynamicDataRef<'_>,
        ty: impl Into<DynamicType>,
    ) -> Result<DynamicData, DataError> {
        let ty = Arc::new(ty.into());
        ensure!(
            !ty.is_compatible(value.ty()).is_none(),
            TypeMismatch {
                expected: ty.resolve().kind(),
                found: value.ty().resolve().kind(),
            }
        );
        let block = InstanceBlock::allocate(ty.memory_size(), ty.natural_alignment());
        unsafe { ty.copy_from_type(block.as_ptr(), value.instance, value.ty()) };
        Ok(DynamicData { ty, block })
    }

    pub fn ty(&self) -> &DynamicType {
        &self.ty
    }

    /// Read-only cursor at the root of the tree.
    pub fn as_ref(&self) -> ReadableDynamicDataRef<'_> {
        ReadableDynamicDataRef {
            ty: &self.ty,
            instance: self.block.as_ptr(),
            _tree: PhantomData,
        }
    }

    /// Writable cursor at the root of the tree. Exclusive: no other cursor
    /// on this tree can be live while it is.
    pub fn as_mut(&mut self) -> WritableDynamicDataRef<'_> {
        WritableDynamicDataRef {
            ty: &self.ty,
            instance: self.block.as_ptr(),
            _tree: PhantomData,
        }
    }

    pub fn hash(&self) -> u64 {
        self.as_ref().hash()
    }
}

impl Drop for DynamicData {
    fn drop(&mut self) {
        unsafe { self.ty.destroy(self.block.as_ptr()) };
    }
}

impl Clone for DynamicData {
    fn clone(&self) -> DynamicData {
        DynamicData::from_ref(self.as_ref())
    }
}

impl PartialEq for DynamicData {
    fn eq(&self, other: &DynamicData) -> bool {
        self.as_ref() == other.as_ref()
    }
}

impl std::fmt::Debug for DynamicData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamicData")
            .field("type", &self.ty.name())
            .finish_non_exhaustive()
    }
}

/// Non-owning read cursor: a descriptor plus the bytes it governs, bounded
/// by the lifetime of the root instance it was navigated from.
#[derive(Clone, Copy, Debug)]
pub struct ReadableDynamicDataRef<'a> {
    ty: &'a Arc<DynamicType>,
    instance: *const u8,
    _tree: PhantomData<&'a InstanceBlock>,
}

impl<'a> ReadableDynamicDataRef<'a> {
    /// Descriptor of the value at this cursor (aliases not resolved).
    pub fn ty(&self) -> &'a DynamicType {
        self.ty
    }

    pub fn kind(&self) -> TypeKind {
        self.ty.resolve().kind()
    }

    pub(crate) fn shared_ty(&self) -> &'a Arc<DynamicType> {
        self.ty
    }

    pub(crate) fn instance_ptr(&self) -> *const u8 {
        self.instance
    }

    pub(crate) fn from_parts(ty: &'a Arc<DynamicType>, instance: *const u8) -> Self {
        ReadableDynamicDataRef {
            ty,
            instance,
            _tree: PhantomData,
        }
    }

    /// Child cursor at a named structure member.
    pub fn member(&self, name: &str) -> Result<ReadableDynamicDataRef<'a>, DataError> {
        let ty = resolve_arc(self.ty);
        let DynamicType::Structure(st) = &**ty else {
            return TypeMismatch {
                expected: TypeKind::Structure,
                found: self.kind(),
            }
            .fail();
        };
        let member = st.member(name).ok_or_else(|| {
            InvalidMember {
                type_name: st.name(),
                name,
            }
            .build()
        })?;
        ensure!(
            unsafe { member_present(member, self.instance) },
            UninitializedAccess { name }
        );
        Ok(ReadableDynamicDataRef {
            ty: member.shared_type(),
            instance: unsafe { self.instance.add(member.offset()) },
            _tree: PhantomData,
        })
    }

    /// Child cursor at a sequence or array element.
    pub fn item(&self, index: usize) -> Result<ReadableDynamicDataRef<'a>, DataError> {
        let ty = resolve_arc(self.ty);
        let content = match &**ty {
            DynamicType::Sequence(seq) => seq.shared_content(),
            DynamicType::Array(array) => array.shared_content(),
            _ => {
                return TypeMismatch {
                    expected: TypeKind::Sequence,
                    found: self.kind(),
                }
                .fail()
            }
        };
        let size = unsafe { ty.instance_len(self.instance) };
        ensure!(index < size, OutOfBounds { index, size });
        Ok(ReadableDynamicDataRef {
            ty: content,
            instance: unsafe { ty.get_at(self.instance as *mut u8, index) },
            _tree: PhantomData,
        })
    }

    /// Value slot stored under `key` in a map, if present.
    pub fn at(
        &self,
        key: ReadableDynamicDataRef<'_>,
    ) -> Result<Option<ReadableDynamicDataRef<'a>>, DataError> {
        let ty = resolve_arc(self.ty);
        let DynamicType::Map(map) = &**ty else {
            return TypeMismatch {
                expected: TypeKind::Map,
                found: self.kind(),
            }
            .fail();
        };
        ensure!(
            map.key().is_compatible(key.ty()).is_equals(),
            TypeMismatch {
                expected: map.key().resolve().kind(),
                found: key.kind(),
            }
        );
        let value = unsafe { map.find_instance(self.instance as *mut u8, key.instance) };
        Ok(value.map(|value| ReadableDynamicDataRef {
            ty: map.shared_value(),
            instance: value,
            _tree: PhantomData,
        }))
    }

    /// By-value read of a primitive leaf. The descriptor kind must match
    /// `T` exactly; promotion is the caller's duty.
    pub fn value<T: Primitive>(&self) -> Result<T, DataError> {
        let found = self.kind();
        ensure!(
            found == T::KIND,
            TypeMismatch {
                expected: T::KIND,
                found,
            }
        );
        Ok(unsafe { std::ptr::read(self.instance as *const T) })
    }

    /// Owned copy of a narrow string value.
    pub fn string(&self) -> Result<String, DataError> {
        let DynamicType::String(s) = self.ty.resolve() else {
            return TypeMismatch {
                expected: TypeKind::String,
                found: self.kind(),
            }
            .fail();
        };
        ensure!(
            !s.is_wide(),
            TypeMismatch {
                expected: TypeKind::String,
                found: TypeKind::WString,
            }
        );
        let bytes = unsafe { s.content_bytes(self.instance) };
        let text = std::str::from_utf8(bytes).context(InvalidUtf8)?;
        Ok(text.to_owned())
    }

    /// Owned copy of a wide string value, decoded from UTF-16.
    pub fn wstring(&self) -> Result<String, DataError> {
        let DynamicType::String(s) = self.ty.resolve() else {
            return TypeMismatch {
                expected: TypeKind::WString,
                found: self.kind(),
            }
            .fail();
        };
        ensure!(
            s.is_wide(),
            TypeMismatch {
                expected: TypeKind::WString,
                found: TypeKind::String,
            }
        );
        let units = unsafe { s.content_units(self.instance) };
        String::from_utf16(units).map_err(|_| crate::errors::InvalidUtf16.build())
    }

    /// Element count for collections, member count for structures.
    pub fn size(&self) -> usize {
        unsafe { self.ty.instance_len(self.instance) }
    }

    /// Structural hash of the subtree, stable within a process run.
    pub fn hash(&self) -> u64 {
        unsafe { self.ty.hash_instance(self.instance) }
    }
}

impl PartialEq for ReadableDynamicDataRef<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.ty == other.ty && unsafe { self.ty.compare(self.instance, other.instance) }
    }
}

// A readable cursor borrows its tree shared, which keeps every writable
// cursor out for its whole lifetime; concurrent reads are sound.
unsafe impl Send for ReadableDynamicDataRef<'_> {}
unsafe impl Sync for ReadableDynamicDataRef<'_> {}

/// Non-owning write cursor. Shares navigation with the readable variant and
/// adds the mutators; it can only be obtained through an exclusive borrow
/// of the owning [DynamicData].
#[derive(Debug)]
pub struct WritableDynamicDataRef<'a> {
    ty: &'a Arc<DynamicType>,
    instance: *mut u8,
    _tree: PhantomData<&'a mut InstanceBlock>,
}

impl<'a> WritableDynamicDataRef<'a> {
    pub fn ty(&self) -> &'a DynamicType {
        self.ty
    }

    pub fn kind(&self) -> TypeKind {
        self.ty.resolve().kind()
    }

    /// Read view of the same position. Borrows the writable cursor, so the
    /// two cannot be used to alias a mutation.
    pub fn as_readable(&self) -> ReadableDynamicDataRef<'_> {
        ReadableDynamicDataRef {
            ty: self.ty,
            instance: self.instance,
            _tree: PhantomData,
        }
    }

    pub fn value<T: Primitive>(&self) -> Result<T, DataError> {
        self.as_readable().value()
    }

    pub fn string(&self) -> Result<String, DataError> {
        self.as_readable().string()
    }

    pub fn wstring(&self) -> Result<String, DataError> {
        self.as_readable().wstring()
    }

    pub fn size(&self) -> usize {
        self.as_readable().size()
    }

    pub fn hash(&self) -> u64 {
        self.as_readable().hash()
    }

    /// Writable child cursor at a named structure member. Entering an
    /// absent optional member constructs it and marks it present.
    pub fn member(&mut self, name: &str) -> Result<WritableDynamicDataRef<'_>, DataError> {
        let ty = resolve_arc(self.ty);
        let DynamicType::Structure(st) = &**ty else {
            return TypeMismatch {
                expected: TypeKind::Structure,
                found: self.kind(),
            }
            .fail();
        };
        let member = st.member(name).ok_or_else(|| {
            InvalidMember {
                type_name: st.name(),
                name,
            }
            .build()
        })?;
        unsafe { activate_member(member, self.instance) };
        Ok(WritableDynamicDataRef {
            ty: member.shared_type(),
            instance: unsafe { self.instance.add(member.offset()) },
            _tree: PhantomData,
        })
    }

    /// Writable child cursor at a sequence or array element.
    pub fn item(&mut self, index: usize) -> Result<WritableDynamicDataRef<'_>, DataError> {
        let ty = resolve_arc(self.ty);
        let content = match &**ty {
            DynamicType::Sequence(seq) => seq.shared_content(),
            DynamicType::Array(array) => array.shared_content(),
            _ => {
                return TypeMismatch {
                    expected: TypeKind::Sequence,
                    found: self.kind(),
                }
                .fail()
            }
        };
        let size = unsafe { ty.instance_len(self.instance) };
        ensure!(index < size, OutOfBounds { index, size });
        Ok(WritableDynamicDataRef {
            ty: content,
            instance: unsafe { ty.get_at(self.instance, index) },
            _tree: PhantomData,
        })
    }

    /// Writable value slot stored under `key` in a map, if present.
    pub fn at(
        &mut self,
        key: ReadableDynamicDataRef<'_>,
    ) -> Result<Option<WritableDynamicDataRef<'_>>, DataError> {
        let ty = resolve_arc(self.ty);
        let DynamicType::Map(map) = &**ty else {
            return TypeMismatch {
                expected: TypeKind::Map,
                found: self.kind(),
            }
            .fail();
        };
        ensure!(
            map.key().is_compatible(key.ty()).is_equals(),
            TypeMismatch {
                expected: map.key().resolve().kind(),
                found: key.kind(),
            }
        );
        let value = unsafe { map.find_instance(self.instance, key.instance_ptr()) };
        Ok(value.map(|value| WritableDynamicDataRef {
            ty: map.shared_value(),
            instance: value,
            _tree: PhantomData,
        }))
    }

    /// Store a primitive leaf value. Exact-kind strict, like reads.
    pub fn set<T: Primitive>(&mut self, value: T) -> Result<(), DataError> {
        let found = self.kind();
        ensure!(
            found == T::KIND,
            TypeMismatch {
                expected: T::KIND,
                found,
            }
        );
        unsafe { std::ptr::write(self.instance as *mut T, value) };
        Ok(())
    }

    /// Replace a string value, narrow or wide, re-encoding as needed.
    /// Fails with `BoundsExceeded` when the encoded length breaks a bound.
    pub fn set_string(&mut self, value: &str) -> Result<(), DataError> {
        let DynamicType::String(s) = self.ty.resolve() else {
            return TypeMismatch {
                expected: TypeKind::String,
                found: self.kind(),
            }
            .fail();
        };
        ensure!(
            unsafe { s.assign_str(self.instance, value) },
            BoundsExceeded { bounds: s.bounds() }
        );
        Ok(())
    }

    /// Append one character to a string value.
    pub fn push_char(&mut self, value: char) -> Result<(), DataError> {
        let DynamicType::String(s) = self.ty.resolve() else {
            return TypeMismatch {
                expected: TypeKind::String,
                found: self.kind(),
            }
            .fail();
        };
        ensure!(
            unsafe { s.push_char(self.instance, value) },
            BoundsExceeded { bounds: s.bounds() }
        );
        Ok(())
    }

    /// Append a primitive value to a sequence, returning the new element
    /// cursor. Fails with `BoundsExceeded` on a full bounded sequence,
    /// leaving it untouched.
    pub fn push<T: Primitive>(&mut self, value: T) -> Result<WritableDynamicDataRef<'_>, DataError> {
        let ty = resolve_arc(self.ty);
        let DynamicType::Sequence(seq) = &**ty else {
            return TypeMismatch {
                expected: TypeKind::Sequence,
                found: self.kind(),
            }
            .fail();
        };
        let content_kind = seq.content().resolve().kind();
        ensure!(
            content_kind == T::KIND,
            TypeMismatch {
                expected: content_kind,
                found: T::KIND,
            }
        );
        let elem = unsafe {
            seq.push_instance(self.instance, &value as *const T as *const u8)
        };
        let elem = elem.ok_or_else(|| BoundsExceeded { bounds: seq.bounds() }.build())?;
        Ok(WritableDynamicDataRef {
            ty: seq.shared_content(),
            instance: elem,
            _tree: PhantomData,
        })
    }

    /// Append a copy of another value to a sequence. The value's descriptor
    /// must be compatible with the sequence content; widths, signs and
    /// single-member wrappers are converted on the way in.
    pub fn push_data(
        &mut self,
        value: ReadableDynamicDataRef<'_>,
    ) -> Result<WritableDynamicDataRef<'_>, DataError> {
        let ty = resolve_arc(self.ty);
        let DynamicType::Sequence(seq) = &**ty else {
            return TypeMismatch {
                expected: TypeKind::Sequence,
                found: self.kind(),
            }
            .fail();
        };
        let elem = if seq.content() == value.ty() {
            unsafe { seq.push_instance(self.instance, value.instance_ptr()) }
        } else {
            ensure!(
                !seq.content().is_compatible(value.ty()).is_none(),
                TypeMismatch {
                    expected: seq.content().resolve().kind(),
                    found: value.kind(),
                }
            );
            unsafe { seq.push_instance_from(self.instance, value.instance_ptr(), value.ty()) }
        };
        let elem = elem.ok_or_else(|| BoundsExceeded { bounds: seq.bounds() }.build())?;
        Ok(WritableDynamicDataRef {
            ty: seq.shared_content(),
            instance: elem,
            _tree: PhantomData,
        })
    }

    /// Resize a sequence: growth default-initializes new slots, shrinking
    /// destroys the removed ones.
    pub fn resize(&mut self, new_len: usize) -> Result<(), DataError> {
        let ty = resolve_arc(self.ty);
        let DynamicType::Sequence(seq) = &**ty else {
            return TypeMismatch {
                expected: TypeKind::Sequence,
                found: self.kind(),
            }
            .fail();
        };
        ensure!(
            unsafe { seq.resize_instance(self.instance, new_len) },
            BoundsExceeded { bounds: seq.bounds() }
        );
        Ok(())
    }

    /// Insert `key` into a map with a default-constructed value (or find
    /// the existing entry) and return the value cursor.
    pub fn insert(
        &mut self,
        key: ReadableDynamicDataRef<'_>,
    ) -> Result<WritableDynamicDataRef<'_>, DataError> {
        let ty = resolve_arc(self.ty);
        let DynamicType::Map(map) = &**ty else {
            return TypeMismatch {
                expected: TypeKind::Map,
                found: self.kind(),
            }
            .fail();
        };
        ensure!(
            map.key().is_compatible(key.ty()).is_equals(),
            TypeMismatch {
                expected: map.key().resolve().kind(),
                found: key.kind(),
            }
        );
        let inserted = unsafe { map.insert_instance(self.instance, key.instance_ptr()) };
        let (value, _) = inserted.ok_or_else(|| BoundsExceeded { bounds: map.bounds() }.build())?;
        Ok(WritableDynamicDataRef {
            ty: map.shared_value(),
            instance: value,
            _tree: PhantomData,
        })
    }

    /// Aggregate assignment: replace this subtree with a copy of `rhs`.
    ///
    /// Allowed when the two descriptors are compatible up to member names
    /// and collection bounds, or through the single-member-wrapper rule.
    /// Width or sign promotion outside a wrapper is rejected.
    pub fn assign(&mut self, rhs: ReadableDynamicDataRef<'_>) -> Result<(), DataError> {
        let flags = self.ty.is_compatible(rhs.ty());
        let relaxed = TypeConsistency::IGNORE_MEMBER_NAMES
            | TypeConsistency::IGNORE_SEQUENCE_BOUNDS
            | TypeConsistency::IGNORE_ARRAY_BOUNDS
            | TypeConsistency::IGNORE_STRING_BOUNDS;
        let allowed = !flags.is_none()
            && (relaxed.contains(flags) || wrapper_pair(self.ty, rhs.ty()));
        ensure!(
            allowed,
            TypeMismatch {
                expected: self.kind(),
                found: rhs.kind(),
            }
        );
        // Build the copy aside, then move it over the old value; the block
        // itself is freed without a destroy once its content moved out.
        let scratch = InstanceBlock::allocate(self.ty.memory_size(), self.ty.natural_alignment());
        unsafe {
            self.ty
                .copy_from_type(scratch.as_ptr(), rhs.instance_ptr(), rhs.ty());
            self.ty.move_instance(self.instance, scratch.as_ptr(), true);
        }
        Ok(())
    }
}

/// Exactly one side is a single-member structure wrapper.
fn wrapper_pair(a: &DynamicType, b: &DynamicType) -> bool {
    let single = |ty: &DynamicType| match ty.resolve() {
        DynamicType::Structure(st) => Some(st.members().len() == 1),
        _ => None,
    };
    match (single(a), single(b)) {
        (Some(one), None) | (None, Some(one)) => one,
        _ => false,
    }
}
