/*!
Raw instance storage.

An instance is an opaque byte block whose layout is fully determined by its
descriptor: the bytes carry no tag of their own. Every unsafe byte operation
of the crate is sealed inside this module; the public API reaches instances
only through descriptors, [DynamicData](crate::DynamicData) and the cursor
types.

Safety contract shared by everything here: a block passed to an operation
must have been produced by `construct` of the *same* descriptor (or be
uninitialized storage of `memory_size` bytes where the operation says so),
and must be aligned to the descriptor's natural alignment.
*/

use std::alloc::{alloc, dealloc, handle_alloc_error, Layout};
use std::hash::Hasher;
use std::ptr::{self, NonNull};

use fxhash::FxHasher64;
use tracing::trace;

use crate::descriptors::{
    DynamicType, MapType, SequenceType, StringType, StructMember, StructType,
};
use crate::primitive::Scalar;

pub(crate) fn align_up(offset: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (offset + align - 1) & !(align - 1)
}

fn hash_bytes(bytes: &[u8]) -> u64 {
    let mut hasher = FxHasher64::default();
    hasher.write(bytes);
    hasher.finish()
}

/// Owned, aligned allocation for one root instance.
pub(crate) struct InstanceBlock {
    ptr: NonNull<u8>,
    layout: Layout,
}

impl InstanceBlock {
    pub(crate) fn allocate(size: usize, align: usize) -> InstanceBlock {
        let layout = Layout::from_size_align(size, align.max(1)).expect("instance layout overflow");
        if layout.size() == 0 {
            return InstanceBlock {
                ptr: NonNull::dangling(),
                layout,
            };
        }
        let ptr = unsafe { alloc(layout) };
        let Some(ptr) = NonNull::new(ptr) else {
            handle_alloc_error(layout);
        };
        InstanceBlock { ptr, layout }
    }

    pub(crate) fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }
}

impl Drop for InstanceBlock {
    fn drop(&mut self) {
        if self.layout.size() != 0 {
            unsafe { dealloc(self.ptr.as_ptr(), self.layout) };
        }
    }
}

// The block itself carries no interior borrows; exclusivity is enforced by
// the cursor layer.
unsafe impl Send for InstanceBlock {}
unsafe impl Sync for InstanceBlock {}

/// Header of every variable-length container: a contiguous element buffer,
/// the live element count, and the buffer capacity. Stored inline inside the
/// parent instance block; element stride and alignment come from the
/// descriptor at each call.
#[repr(C)]
pub(crate) struct CollectionInstance {
    memory: *mut u8,
    size: u32,
    capacity: u32,
}

impl CollectionInstance {
    const fn empty() -> CollectionInstance {
        CollectionInstance {
            memory: ptr::null_mut(),
            size: 0,
            capacity: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.size as usize
    }

    unsafe fn slot(&self, index: usize, stride: usize) -> *mut u8 {
        debug_assert!(index < self.capacity as usize || stride == 0);
        self.memory.add(index * stride)
    }

    /// Ensure room for `min_cap` elements, doubling amortized. Element bytes
    /// are relocated with a flat move: nothing in an instance layout points
    /// into its own buffer.
    unsafe fn reserve(&mut self, min_cap: usize, stride: usize, align: usize) {
        if min_cap <= self.capacity as usize {
            return;
        }
        let new_cap = (self.capacity as usize * 2).max(min_cap).max(4);
        trace!(capacity = new_cap, "collection buffer grown");
        let bytes = new_cap
            .checked_mul(stride)
            .expect("collection layout overflow");
        let layout = Layout::from_size_align(bytes, align).expect("collection layout overflow");
        let fresh = alloc(layout);
        if fresh.is_null() {
            handle_alloc_error(layout);
        }
        if !self.memory.is_null() {
            ptr::copy_nonoverlapping(self.memory, fresh, self.size as usize * stride);
            self.release_buffer(stride, align);
        }
        self.memory = fresh;
        self.capacity = new_cap as u32;
    }

    unsafe fn release_buffer(&mut self, stride: usize, align: usize) {
        if !self.memory.is_null() {
            let layout = Layout::from_size_align_unchecked(self.capacity as usize * stride, align);
            dealloc(self.memory, layout);
            self.memory = ptr::null_mut();
            self.capacity = 0;
        }
    }

    unsafe fn at<'a>(slot: *mut u8) -> &'a mut CollectionInstance {
        &mut *(slot as *mut CollectionInstance)
    }

    unsafe fn at_ref<'a>(slot: *const u8) -> &'a CollectionInstance {
        &*(slot as *const CollectionInstance)
    }
}

/// Header of a map instance: pair slots plus a hash index from key hash to
/// slot positions. Slot indices stay valid across buffer growth, so the
/// index never needs rebuilding on reserve.
#[repr(C)]
pub(crate) struct MapInstance {
    pairs: CollectionInstance,
    index: *mut MapIndex,
}

type MapIndex = fxhash::FxHashMap<u64, Vec<u32>>;

impl MapInstance {
    unsafe fn at<'a>(slot: *mut u8) -> &'a mut MapInstance {
        &mut *(slot as *mut MapInstance)
    }

    unsafe fn at_ref<'a>(slot: *const u8) -> &'a MapInstance {
        &*(slot as *const MapInstance)
    }

    unsafe fn index(&self) -> &MapIndex {
        &*self.index
    }

    unsafe fn index_mut(&mut self) -> &mut MapIndex {
        &mut *self.index
    }
}

impl DynamicType {
    /// Default-initialize `memory_size` bytes at `p`.
    ///
    /// # Safety
    /// `p` is aligned, uninitialized storage of at least `memory_size` bytes.
    pub(crate) unsafe fn construct(&self, p: *mut u8) {
        match self.resolve() {
            DynamicType::Primitive(prim) => ptr::write_bytes(p, 0, prim.memory_size()),
            DynamicType::String(_) | DynamicType::Sequence(_) => {
                ptr::write(p as *mut CollectionInstance, CollectionInstance::empty());
            }
            DynamicType::Map(_) => {
                ptr::write(
                    p as *mut MapInstance,
                    MapInstance {
                        pairs: CollectionInstance::empty(),
                        index: Box::into_raw(Box::default()),
                    },
                );
            }
            DynamicType::Array(array) => {
                let stride = array.content().memory_size();
                for i in 0..array.dimension() as usize {
                    array.content().construct(p.add(i * stride));
                }
            }
            DynamicType::Structure(st) => {
                for member in st.members() {
                    match member.presence_offset() {
                        Some(presence) => *p.add(presence) = 0,
                        None => member.ty().construct(p.add(member.offset())),
                    }
                }
            }
            DynamicType::Alias(_) => unreachable!("resolved"),
        }
    }

    /// Deep-copy `src` into uninitialized `dst`, both governed by `self`.
    ///
    /// # Safety
    /// `dst` is aligned uninitialized storage; `src` is a live instance of
    /// `self`; the two do not overlap.
    pub(crate) unsafe fn copy(&self, dst: *mut u8, src: *const u8) {
        match self.resolve() {
            DynamicType::Primitive(prim) => {
                ptr::copy_nonoverlapping(src, dst, prim.memory_size());
            }
            DynamicType::String(s) => {
                let elem = s.element_size();
                let from = CollectionInstance::at_ref(src);
                let mut to = CollectionInstance::empty();
                if from.len() > 0 {
                    to.reserve(from.len(), elem, elem.max(1));
                    ptr::copy_nonoverlapping(from.memory, to.memory, from.len() * elem);
                    to.size = from.size;
                }
                ptr::write(dst as *mut CollectionInstance, to);
            }
            DynamicType::Sequence(seq) => {
                let content = seq.content();
                let stride = content.memory_size();
                let from = CollectionInstance::at_ref(src);
                let mut to = CollectionInstance::empty();
                to.reserve(from.len(), stride, content.natural_alignment());
                for i in 0..from.len() {
                    content.copy(to.slot(i, stride), from.slot_const(i, stride));
                }
                to.size = from.size;
                ptr::write(dst as *mut CollectionInstance, to);
            }
            DynamicType::Map(map) => {
                map.copy_instance(dst, src);
            }
            DynamicType::Array(array) => {
                let stride = array.content().memory_size();
                for i in 0..array.dimension() as usize {
                    array.content().copy(dst.add(i * stride), src.add(i * stride));
                }
            }
            DynamicType::Structure(st) => {
                for member in st.members() {
                    match member.presence_offset() {
                        Some(presence) => {
                            let set = *src.add(presence);
                            *dst.add(presence) = set;
                            if set != 0 {
                                member.ty().copy(dst.add(member.offset()), src.add(member.offset()));
                            }
                        }
                        None => {
                            member.ty().copy(dst.add(member.offset()), src.add(member.offset()));
                        }
                    }
                }
            }
            DynamicType::Alias(_) => unreachable!("resolved"),
        }
    }

    /// Deep-copy across descriptors: `dst` is governed by `self`, `src` by
    /// `other`, and `self.is_compatible(other)` is not `NONE`. Values are
    /// converted (width, sign), variable collections are truncated to the
    /// destination bound, and single-member structures are unwrapped on
    /// either side.
    ///
    /// # Safety
    /// Same as [DynamicType::copy], plus the compatibility precondition.
    pub(crate) unsafe fn copy_from_type(&self, dst: *mut u8, src: *const u8, other: &DynamicType) {
        let to = self.resolve();
        let from = other.resolve();
        if ptr::eq(to, from) || to == from {
            return to.copy(dst, src);
        }
        match (to, from) {
            (DynamicType::Structure(a), DynamicType::Structure(b)) => {
                struct_copy_from(a, b, dst, src);
            }
            // Single-member wrappers are transparent in either direction.
            (_, DynamicType::Structure(b)) if b.members().len() == 1 => {
                let member = &b.members()[0];
                if member_present(member, src) {
                    to.copy_from_type(dst, src.add(member.offset()), member.ty());
                } else {
                    to.construct(dst);
                }
            }
            (DynamicType::Structure(a), _) if a.members().len() == 1 => {
                let member = &a.members()[0];
                member.ty().copy_from_type(dst.add(member.offset()), src, from);
                if let Some(presence) = member.presence_offset() {
                    *dst.add(presence) = 1;
                }
            }
            (DynamicType::Primitive(a), DynamicType::Primitive(b)) => {
                Scalar::read(b.kind(), src).write(a.kind(), dst);
            }
            (DynamicType::String(a), DynamicType::String(b)) => {
                debug_assert_eq!(a.is_wide(), b.is_wide());
                let elem = a.element_size();
                let from_inst = CollectionInstance::at_ref(src);
                let mut keep = from_inst.len();
                if a.bounds() > 0 {
                    keep = keep.min(a.bounds() as usize);
                }
                let mut to_inst = CollectionInstance::empty();
                if keep > 0 {
                    to_inst.reserve(keep, elem, elem.max(1));
                    ptr::copy_nonoverlapping(from_inst.memory, to_inst.memory, keep * elem);
                    to_inst.size = keep as u32;
                }
                ptr::write(dst as *mut CollectionInstance, to_inst);
            }
            (DynamicType::Sequence(a), DynamicType::Sequence(b)) => {
                let content = a.content();
                let stride = content.memory_size();
                let from_inst = CollectionInstance::at_ref(src);
                let mut keep = from_inst.len();
                if a.bounds() > 0 {
                    keep = keep.min(a.bounds() as usize);
                }
                let mut to_inst = CollectionInstance::empty();
                to_inst.reserve(keep, stride, content.natural_alignment());
                let from_stride = b.content().memory_size();
                for i in 0..keep {
                    content.copy_from_type(
                        to_inst.slot(i, stride),
                        from_inst.slot_const(i, from_stride),
                        b.content(),
                    );
                }
                to_inst.size = keep as u32;
                ptr::write(dst as *mut CollectionInstance, to_inst);
            }
            (DynamicType::Array(a), DynamicType::Array(b)) => {
                let stride = a.content().memory_size();
                let from_stride = b.content().memory_size();
                let common = (a.dimension().min(b.dimension())) as usize;
                for i in 0..common {
                    a.content().copy_from_type(
                        dst.add(i * stride),
                        src.add(i * from_stride),
                        b.content(),
                    );
                }
                for i in common..a.dimension() as usize {
                    a.content().construct(dst.add(i * stride));
                }
            }
            (DynamicType::Map(a), DynamicType::Map(b)) => {
                a.copy_instance_from(dst, src, b);
            }
            _ => {
                debug_assert!(false, "copy between incompatible kinds");
                to.construct(dst);
            }
        }
    }

    /// Destructive move of one instance. Destroys `dst` first when it holds
    /// a live instance; afterwards `src` must be treated as uninitialized.
    ///
    /// # Safety
    /// Both pointers aligned for `self`; `src` live; `dst` live iff
    /// `dst_initialized`.
    pub(crate) unsafe fn move_instance(&self, dst: *mut u8, src: *mut u8, dst_initialized: bool) {
        if dst_initialized {
            self.destroy(dst);
        }
        // Instance layouts never point into themselves, so a flat byte move
        // transfers ownership of every nested buffer.
        ptr::copy_nonoverlapping(src, dst, self.memory_size());
    }

    /// Release everything owned by the instance at `p`. The bytes are dead
    /// afterwards; idempotent for zeroed primitive blocks.
    ///
    /// # Safety
    /// `p` is a live instance of `self` (or zeroed primitive storage).
    pub(crate) unsafe fn destroy(&self, p: *mut u8) {
        match self.resolve() {
            DynamicType::Primitive(_) => {}
            DynamicType::String(s) => {
                let elem = s.element_size();
                let inst = CollectionInstance::at(p);
                inst.release_buffer(elem, elem.max(1));
            }
            DynamicType::Sequence(seq) => {
                let content = seq.content();
                let stride = content.memory_size();
                let inst = CollectionInstance::at(p);
                for i in 0..inst.len() {
                    content.destroy(inst.slot(i, stride));
                }
                inst.release_buffer(stride, content.natural_alignment());
            }
            DynamicType::Map(map) => map.destroy_instance(p),
            DynamicType::Array(array) => {
                let stride = array.content().memory_size();
                for i in 0..array.dimension() as usize {
                    array.content().destroy(p.add(i * stride));
                }
            }
            DynamicType::Structure(st) => {
                for member in st.members().iter().rev() {
                    if member_present(member, p) {
                        member.ty().destroy(p.add(member.offset()));
                    }
                }
            }
            DynamicType::Alias(_) => unreachable!("resolved"),
        }
    }

    /// Pointer to element `index` of a collection instance, or to member
    /// `index` of a structure instance.
    ///
    /// # Safety
    /// `p` live for `self`; `index < instance_len(p)`.
    pub(crate) unsafe fn get_at(&self, p: *mut u8, index: usize) -> *mut u8 {
        match self.resolve() {
            DynamicType::String(s) => {
                CollectionInstance::at(p).slot(index, s.element_size())
            }
            DynamicType::Sequence(seq) => {
                CollectionInstance::at(p).slot(index, seq.content().memory_size())
            }
            DynamicType::Map(map) => {
                MapInstance::at(p).pairs.slot(index, map.pair_stride())
            }
            DynamicType::Array(array) => p.add(index * array.content().memory_size()),
            DynamicType::Structure(st) => p.add(st.members()[index].offset()),
            _ => p,
        }
    }

    /// Element count for collections, member count for structures, 1 for
    /// leaves.
    ///
    /// # Safety
    /// `p` is a live instance of `self`.
    pub(crate) unsafe fn instance_len(&self, p: *const u8) -> usize {
        match self.resolve() {
            DynamicType::String(_) | DynamicType::Sequence(_) => {
                CollectionInstance::at_ref(p).len()
            }
            DynamicType::Map(_) => MapInstance::at_ref(p).pairs.len(),
            DynamicType::Array(array) => array.dimension() as usize,
            DynamicType::Structure(st) => st.members().len(),
            _ => 1,
        }
    }

    /// Structural equality of two instances of `self`.
    ///
    /// # Safety
    /// Both pointers are live instances of `self`.
    pub(crate) unsafe fn compare(&self, a: *const u8, b: *const u8) -> bool {
        match self.resolve() {
            DynamicType::Primitive(prim) => {
                let n = prim.memory_size();
                std::slice::from_raw_parts(a, n) == std::slice::from_raw_parts(b, n)
            }
            DynamicType::String(s) => {
                let elem = s.element_size();
                let (ia, ib) = (CollectionInstance::at_ref(a), CollectionInstance::at_ref(b));
                ia.len() == ib.len()
                    && (ia.len() == 0
                        || std::slice::from_raw_parts(ia.memory, ia.len() * elem)
                            == std::slice::from_raw_parts(ib.memory, ib.len() * elem))
            }
            DynamicType::Sequence(seq) => {
                let content = seq.content();
                let stride = content.memory_size();
                let (ia, ib) = (CollectionInstance::at_ref(a), CollectionInstance::at_ref(b));
                ia.len() == ib.len()
                    && (0..ia.len()).all(|i| {
                        content.compare(ia.slot_const(i, stride), ib.slot_const(i, stride))
                    })
            }
            DynamicType::Map(map) => map.compare_instance(a, b),
            DynamicType::Array(array) => {
                let stride = array.content().memory_size();
                (0..array.dimension() as usize)
                    .all(|i| array.content().compare(a.add(i * stride), b.add(i * stride)))
            }
            DynamicType::Structure(st) => st.members().iter().all(|member| {
                let (pa, pb) = (member_present(member, a), member_present(member, b));
                pa == pb
                    && (!pa || member.ty().compare(a.add(member.offset()), b.add(member.offset())))
            }),
            DynamicType::Alias(_) => unreachable!("resolved"),
        }
    }

    /// Structural hash, stable within a process run. Equal instances of the
    /// same descriptor hash equal.
    ///
    /// # Safety
    /// `p` is a live instance of `self`.
    pub(crate) unsafe fn hash_instance(&self, p: *const u8) -> u64 {
        match self.resolve() {
            DynamicType::Primitive(prim) => {
                hash_bytes(std::slice::from_raw_parts(p, prim.memory_size()))
            }
            DynamicType::String(s) => {
                let inst = CollectionInstance::at_ref(p);
                if inst.len() == 0 {
                    hash_bytes(&[])
                } else {
                    hash_bytes(std::slice::from_raw_parts(
                        inst.memory,
                        inst.len() * s.element_size(),
                    ))
                }
            }
            DynamicType::Sequence(seq) => {
                let content = seq.content();
                let stride = content.memory_size();
                let inst = CollectionInstance::at_ref(p);
                let mut hasher = FxHasher64::default();
                hasher.write_usize(inst.len());
                for i in 0..inst.len() {
                    hasher.write_u64(content.hash_instance(inst.slot_const(i, stride)));
                }
                hasher.finish()
            }
            DynamicType::Map(map) => map.hash_instance_bytes(p),
            DynamicType::Array(array) => {
                let stride = array.content().memory_size();
                let mut hasher = FxHasher64::default();
                for i in 0..array.dimension() as usize {
                    hasher.write_u64(array.content().hash_instance(p.add(i * stride)));
                }
                hasher.finish()
            }
            DynamicType::Structure(st) => {
                let mut hasher = FxHasher64::default();
                for member in st.members() {
                    let present = member_present(member, p);
                    if member.is_optional() {
                        hasher.write_u8(present as u8);
                    }
                    if present {
                        hasher.write_u64(member.ty().hash_instance(p.add(member.offset())));
                    }
                }
                hasher.finish()
            }
            DynamicType::Alias(_) => unreachable!("resolved"),
        }
    }
}

impl CollectionInstance {
    unsafe fn slot_const(&self, index: usize, stride: usize) -> *const u8 {
        self.memory.add(index * stride) as *const u8
    }
}

/// Presence of a member inside its structure instance. Non-optional members
/// are always present.
pub(crate) unsafe fn member_present(member: &StructMember, base: *const u8) -> bool {
    member
        .presence_offset()
        .map_or(true, |presence| *base.add(presence) != 0)
}

/// First-write activation of an optional member: construct the content and
/// set the presence byte. No-op for present or non-optional members.
pub(crate) unsafe fn activate_member(member: &StructMember, base: *mut u8) {
    if let Some(presence) = member.presence_offset() {
        if *base.add(presence) == 0 {
            member.ty().construct(base.add(member.offset()));
            *base.add(presence) = 1;
        }
    }
}

unsafe fn struct_copy_from(to: &StructType, from: &StructType, dst: *mut u8, src: *const u8) {
    let common = to.members().len().min(from.members().len());
    for i in 0..common {
        let (ma, mb) = (&to.members()[i], &from.members()[i]);
        let src_present = member_present(mb, src);
        if let Some(presence) = ma.presence_offset() {
            *dst.add(presence) = src_present as u8;
            if src_present {
                ma.ty()
                    .copy_from_type(dst.add(ma.offset()), src.add(mb.offset()), mb.ty());
            }
        } else if src_present {
            ma.ty()
                .copy_from_type(dst.add(ma.offset()), src.add(mb.offset()), mb.ty());
        } else {
            ma.ty().construct(dst.add(ma.offset()));
        }
    }
    for member in &to.members()[common..] {
        match member.presence_offset() {
            Some(presence) => *dst.add(presence) = 0,
            None => member.ty().construct(dst.add(member.offset())),
        }
    }
}

impl SequenceType {
    /// Append a copy of `value` (an instance of the sequence content type).
    /// Returns the new element slot, or `None` when a non-zero bound is
    /// already reached; the sequence is untouched in that case.
    ///
    /// # Safety
    /// `slot` is a live sequence instance; `value` a live content instance.
    pub(crate) unsafe fn push_instance(&self, slot: *mut u8, value: *const u8) -> Option<*mut u8> {
        self.push_with(slot, |content, elem| content.copy(elem, value))
    }

    /// Append a value held by a *compatible* descriptor, converting on the
    /// way in.
    ///
    /// # Safety
    /// As [SequenceType::push_instance]; `value_ty.is_compatible(content)`
    /// must not be `NONE`.
    pub(crate) unsafe fn push_instance_from(
        &self,
        slot: *mut u8,
        value: *const u8,
        value_ty: &DynamicType,
    ) -> Option<*mut u8> {
        self.push_with(slot, |content, elem| {
            content.copy_from_type(elem, value, value_ty)
        })
    }

    unsafe fn push_with(
        &self,
        slot: *mut u8,
        fill: impl FnOnce(&DynamicType, *mut u8),
    ) -> Option<*mut u8> {
        let content = self.content();
        let stride = content.memory_size();
        let inst = CollectionInstance::at(slot);
        if self.bounds() > 0 && inst.len() >= self.bounds() as usize {
            return None;
        }
        inst.reserve(inst.len() + 1, stride, content.natural_alignment());
        let elem = inst.slot(inst.len(), stride);
        fill(content, elem);
        inst.size += 1;
        Some(elem)
    }

    /// Grow with default-constructed slots or shrink destroying removed
    /// slots. Returns `false` when `new_len` exceeds a non-zero bound.
    ///
    /// # Safety
    /// `slot` is a live sequence instance.
    pub(crate) unsafe fn resize_instance(&self, slot: *mut u8, new_len: usize) -> bool {
        if self.bounds() > 0 && new_len > self.bounds() as usize {
            return false;
        }
        let content = self.content();
        let stride = content.memory_size();
        let inst = CollectionInstance::at(slot);
        let old_len = inst.len();
        if new_len > old_len {
            inst.reserve(new_len, stride, content.natural_alignment());
            for i in old_len..new_len {
                content.construct(inst.slot(i, stride));
            }
        } else {
            for i in new_len..old_len {
                content.destroy(inst.slot(i, stride));
            }
        }
        inst.size = new_len as u32;
        true
    }
}

impl StringType {
    /// Replace the whole content. Returns `false` when the encoded length
    /// exceeds a non-zero bound; the instance is untouched in that case.
    ///
    /// # Safety
    /// `slot` is a live string instance of matching wideness.
    pub(crate) unsafe fn assign_str(&self, slot: *mut u8, value: &str) -> bool {
        if self.is_wide() {
            let units: Vec<u16> = value.encode_utf16().collect();
            self.assign_units(slot, units.len(), 2, units.as_ptr() as *const u8)
        } else {
            self.assign_units(slot, value.len(), 1, value.as_ptr())
        }
    }

    unsafe fn assign_units(&self, slot: *mut u8, len: usize, elem: usize, bytes: *const u8) -> bool {
        if self.bounds() > 0 && len > self.bounds() as usize {
            return false;
        }
        let inst = CollectionInstance::at(slot);
        if len > 0 {
            inst.reserve(len, elem, elem.max(1));
            ptr::copy_nonoverlapping(bytes, inst.memory, len * elem);
        }
        inst.size = len as u32;
        true
    }

    /// Append one character, re-encoded for the element kind. Returns
    /// `false` on bound exhaustion.
    ///
    /// # Safety
    /// `slot` is a live string instance of matching wideness.
    pub(crate) unsafe fn push_char(&self, slot: *mut u8, c: char) -> bool {
        let inst = CollectionInstance::at(slot);
        if self.is_wide() {
            let mut units = [0u16; 2];
            let units = c.encode_utf16(&mut units);
            if self.bounds() > 0 && inst.len() + units.len() > self.bounds() as usize {
                return false;
            }
            inst.reserve(inst.len() + units.len(), 2, 2);
            ptr::copy_nonoverlapping(
                units.as_ptr() as *const u8,
                inst.slot(inst.len(), 2),
                units.len() * 2,
            );
            inst.size += units.len() as u32;
        } else {
            let mut bytes = [0u8; 4];
            let encoded = c.encode_utf8(&mut bytes).as_bytes();
            if self.bounds() > 0 && inst.len() + encoded.len() > self.bounds() as usize {
                return false;
            }
            inst.reserve(inst.len() + encoded.len(), 1, 1);
            ptr::copy_nonoverlapping(encoded.as_ptr(), inst.slot(inst.len(), 1), encoded.len());
            inst.size += encoded.len() as u32;
        }
        true
    }

    /// Borrow the narrow content as raw bytes.
    ///
    /// # Safety
    /// `slot` is a live narrow string instance; the borrow must not outlive
    /// it or overlap a mutation.
    pub(crate) unsafe fn content_bytes<'a>(&self, slot: *const u8) -> &'a [u8] {
        debug_assert!(!self.is_wide());
        let inst = CollectionInstance::at_ref(slot);
        if inst.len() == 0 {
            return &[];
        }
        std::slice::from_raw_parts(inst.memory.cast_const().cast(), inst.len())
    }

    /// Borrow the wide content as UTF-16 code units.
    ///
    /// # Safety
    /// As [StringType::content_bytes], for wide instances.
    pub(crate) unsafe fn content_units<'a>(&self, slot: *const u8) -> &'a [u16] {
        debug_assert!(self.is_wide());
        let inst = CollectionInstance::at_ref(slot);
        if inst.len() == 0 {
            return &[];
        }
        std::slice::from_raw_parts(inst.memory as *const u16, inst.len())
    }
}

impl MapType {
    /// Look up the value slot stored under `key`.
    ///
    /// # Safety
    /// `slot` is a live map instance; `key` a live instance of the key type.
    pub(crate) unsafe fn find_instance(&self, slot: *mut u8, key: *const u8) -> Option<*mut u8> {
        let map = MapInstance::at(slot);
        let hash = self.key().hash_instance(key);
        let stride = self.pair_stride();
        for &pos in map.index().get(&hash)?.iter() {
            let pair = map.pairs.slot(pos as usize, stride);
            if self.key().compare(pair, key) {
                return Some(pair.add(self.value_offset()));
            }
        }
        None
    }

    /// Insert `key` with a default-constructed value, or find the existing
    /// entry. Returns the value slot and whether a new pair was created;
    /// `None` when a non-zero bound is already reached.
    ///
    /// # Safety
    /// As [MapType::find_instance].
    pub(crate) unsafe fn insert_instance(
        &self,
        slot: *mut u8,
        key: *const u8,
    ) -> Option<(*mut u8, bool)> {
        if let Some(value) = self.find_instance(slot, key) {
            return Some((value, false));
        }
        let map = MapInstance::at(slot);
        if self.bounds() > 0 && map.pairs.len() >= self.bounds() as usize {
            return None;
        }
        let stride = self.pair_stride();
        let pos = map.pairs.len();
        map.pairs.reserve(pos + 1, stride, self.pair_align());
        let pair = map.pairs.slot(pos, stride);
        self.key().copy(pair, key);
        let value = pair.add(self.value_offset());
        self.value().construct(value);
        map.pairs.size += 1;
        let hash = self.key().hash_instance(key);
        map.index_mut().entry(hash).or_default().push(pos as u32);
        Some((value, true))
    }

    unsafe fn copy_instance(&self, dst: *mut u8, src: *const u8) {
        let from = MapInstance::at_ref(src);
        let stride = self.pair_stride();
        let mut pairs = CollectionInstance::empty();
        pairs.reserve(from.pairs.len(), stride, self.pair_align());
        let mut index = MapIndex::default();
        for i in 0..from.pairs.len() {
            let src_pair = from.pairs.slot_const(i, stride);
            let dst_pair = pairs.slot(i, stride);
            self.key().copy(dst_pair, src_pair);
            self.value().copy(
                dst_pair.add(self.value_offset()),
                src_pair.add(self.value_offset()),
            );
            let hash = self.key().hash_instance(src_pair);
            index.entry(hash).or_default().push(i as u32);
        }
        pairs.size = from.pairs.size;
        ptr::write(
            dst as *mut MapInstance,
            MapInstance {
                pairs,
                index: Box::into_raw(Box::new(index)),
            },
        );
    }

    unsafe fn copy_instance_from(&self, dst: *mut u8, src: *const u8, other: &MapType) {
        self.construct_map(dst);
        let from = MapInstance::at_ref(src);
        let from_stride = other.pair_stride();
        // Keys cross descriptors, so convert through a scratch slot.
        let mut scratch = [0u64; 4];
        debug_assert!(self.key().memory_size() <= std::mem::size_of_val(&scratch));
        let scratch = scratch.as_mut_ptr() as *mut u8;
        for i in 0..from.pairs.len() {
            let src_pair = from.pairs.slot_const(i, from_stride);
            self.key().copy_from_type(scratch, src_pair, other.key());
            let Some((value, _)) = self.insert_instance(dst, scratch) else {
                self.key().destroy(scratch);
                break;
            };
            self.value().destroy(value);
            self.value().copy_from_type(
                value,
                src_pair.add(other.value_offset()),
                other.value(),
            );
            self.key().destroy(scratch);
        }
    }

    unsafe fn construct_map(&self, dst: *mut u8) {
        ptr::write(
            dst as *mut MapInstance,
            MapInstance {
                pairs: CollectionInstance::empty(),
                index: Box::into_raw(Box::default()),
            },
        );
    }

    unsafe fn destroy_instance(&self, slot: *mut u8) {
        let map = MapInstance::at(slot);
        let stride = self.pair_stride();
        for i in 0..map.pairs.len() {
            let pair = map.pairs.slot(i, stride);
            self.key().destroy(pair);
            self.value().destroy(pair.add(self.value_offset()));
        }
        map.pairs.release_buffer(stride, self.pair_align());
        drop(Box::from_raw(map.index));
        map.index = ptr::null_mut();
    }

    unsafe fn compare_instance(&self, a: *const u8, b: *const u8) -> bool {
        let (ia, ib) = (MapInstance::at_ref(a), MapInstance::at_ref(b));
        if ia.pairs.len() != ib.pairs.len() {
            return false;
        }
        let stride = self.pair_stride();
        (0..ia.pairs.len()).all(|i| {
            let pair = ia.pairs.slot_const(i, stride);
            // Iteration order is unspecified, so match by key.
            match self.find_instance(b as *mut u8, pair) {
                Some(value) => self.value().compare(pair.add(self.value_offset()), value),
                None => false,
            }
        })
    }

    unsafe fn hash_instance_bytes(&self, p: *const u8) -> u64 {
        let map = MapInstance::at_ref(p);
        let stride = self.pair_stride();
        // Order-independent combine over pairs.
        let mut acc = 0u64;
        for i in 0..map.pairs.len() {
            let pair = map.pairs.slot_const(i, stride);
            let mut hasher = FxHasher64::default();
            hasher.write_u64(self.key().hash_instance(pair));
            hasher.write_u64(self.value().hash_instance(pair.add(self.value_offset())));
            acc ^= hasher.finish();
        }
        let mut hasher = FxHasher64::default();
        hasher.write_usize(map.pairs.len());
        hasher.write_u64(acc);
        hasher.finish()
    }

    /// Value slot inside the pair at `index`.
    ///
    /// # Safety
    /// `p` is a live map instance; `index < instance_len(p)`.
    pub(crate) unsafe fn pair_value(&self, p: *mut u8, index: usize) -> *mut u8 {
        MapInstance::at(p)
            .pairs
            .slot(index, self.pair_stride())
            .add(self.value_offset())
    }
}
