/*!
Type descriptors.

A [DynamicType] is a value describing a type: its kind, its name, and its
structure. Descriptors are cloneable, comparable by structural identity and
hashable; they own no instance bytes. Shared subtrees are held through
`Arc`, so cloning a large descriptor tree is cheap while the observable
semantics stay value-like.

The raw instance operations each descriptor provides over its byte layout
live in the sealed `instance` module; this module holds the descriptor data
model, layout computation and the structural compatibility algorithm.
*/

use std::sync::Arc;

use tracing::trace;

use crate::errors::{
    CyclicAlias, DuplicateMember, EmptyDimensions, OversizedType, TypeError, UnsupportedKeyType,
    ZeroSizedContent,
};
use crate::instance::{align_up, CollectionInstance, MapInstance};
use crate::kind::{TypeConsistency, TypeKind};
use crate::primitive::PrimitiveType;

/// A runtime type descriptor.
///
/// The hierarchy is a closed sum over [TypeKind]: the set of kinds is fixed,
/// and all operations dispatch by matching on it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, derive_more::Display)]
pub enum DynamicType {
    #[display("{}", _0.name())]
    Primitive(PrimitiveType),
    #[display("{}", _0.name())]
    String(StringType),
    #[display("{}", _0.name())]
    Array(ArrayType),
    #[display("{}", _0.name())]
    Sequence(SequenceType),
    #[display("{}", _0.name())]
    Map(MapType),
    #[display("{}", _0.name())]
    Structure(StructType),
    #[display("{}", _0.name())]
    Alias(AliasType),
}

impl DynamicType {
    pub fn kind(&self) -> TypeKind {
        match self {
            DynamicType::Primitive(p) => p.kind(),
            DynamicType::String(s) => s.kind(),
            DynamicType::Array(_) => TypeKind::Array,
            DynamicType::Sequence(_) => TypeKind::Sequence,
            DynamicType::Map(_) => TypeKind::Map,
            DynamicType::Structure(_) => TypeKind::Structure,
            DynamicType::Alias(_) => TypeKind::Alias,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            DynamicType::Primitive(p) => p.name(),
            DynamicType::String(s) => s.name(),
            DynamicType::Array(a) => a.name(),
            DynamicType::Sequence(s) => s.name(),
            DynamicType::Map(m) => m.name(),
            DynamicType::Structure(s) => s.name(),
            DynamicType::Alias(a) => a.name(),
        }
    }

    /// Follow alias indirections to the first non-alias descriptor.
    pub fn resolve(&self) -> &DynamicType {
        let mut ty = self;
        while let DynamicType::Alias(a) = ty {
            ty = a.target();
        }
        ty
    }

    pub fn is_primitive_type(&self) -> bool {
        self.resolve().kind().is_primitive()
    }

    pub fn is_collection_type(&self) -> bool {
        self.resolve().kind().is_collection()
    }

    /// Children reached by member name (structures).
    pub fn is_aggregation_type(&self) -> bool {
        self.resolve().kind().is_aggregation()
    }

    /// Structures, arrays, sequences and maps.
    pub fn is_constructed_type(&self) -> bool {
        self.resolve().kind().is_constructed()
    }

    /// Stride of this type in bytes, independent of instance content.
    pub fn memory_size(&self) -> usize {
        match self {
            DynamicType::Primitive(p) => p.memory_size(),
            DynamicType::String(_) | DynamicType::Sequence(_) => {
                std::mem::size_of::<CollectionInstance>()
            }
            DynamicType::Map(_) => std::mem::size_of::<MapInstance>(),
            DynamicType::Array(a) => a.content().memory_size() * a.dimension() as usize,
            DynamicType::Structure(s) => s.memory_size(),
            DynamicType::Alias(a) => a.target().memory_size(),
        }
    }

    pub(crate) fn natural_alignment(&self) -> usize {
        match self {
            DynamicType::Primitive(p) => p.memory_size(),
            DynamicType::String(_) | DynamicType::Sequence(_) => {
                std::mem::align_of::<CollectionInstance>()
            }
            DynamicType::Map(_) => std::mem::align_of::<MapInstance>(),
            DynamicType::Array(a) => a.content().natural_alignment(),
            DynamicType::Structure(s) => s.alignment(),
            DynamicType::Alias(a) => a.target().natural_alignment(),
        }
    }

    /// Structural compatibility with `other`.
    ///
    /// Returns [TypeConsistency::EQUALS] for structurally identical types,
    /// [TypeConsistency::NONE] for unassignable ones, and a set of
    /// `IGNORE_*` bits describing every tolerated difference otherwise.
    /// Never fails.
    pub fn is_compatible(&self, other: &DynamicType) -> TypeConsistency {
        let a = self.resolve();
        let b = other.resolve();
        match (a, b) {
            (DynamicType::Structure(sa), DynamicType::Structure(sb)) => struct_compat(sa, sb),
            // One side is a single-member structure: unwrap and inherit.
            (DynamicType::Structure(sa), _) if sa.members().len() == 1 => {
                sa.members()[0].ty().is_compatible(b)
            }
            (_, DynamicType::Structure(sb)) if sb.members().len() == 1 => {
                a.is_compatible(sb.members()[0].ty())
            }
            (DynamicType::Primitive(pa), DynamicType::Primitive(pb)) => {
                primitive_compat(pa.kind(), pb.kind())
            }
            (DynamicType::String(qa), DynamicType::String(qb)) => {
                if qa.is_wide() != qb.is_wide() {
                    TypeConsistency::NONE
                } else if qa.bounds() != qb.bounds() {
                    TypeConsistency::IGNORE_STRING_BOUNDS
                } else {
                    TypeConsistency::EQUALS
                }
            }
            (DynamicType::Sequence(qa), DynamicType::Sequence(qb)) => {
                let mut flags = qa.content().is_compatible(qb.content());
                if flags.is_none() {
                    return TypeConsistency::NONE;
                }
                if qa.bounds() != qb.bounds() {
                    flags |= TypeConsistency::IGNORE_SEQUENCE_BOUNDS;
                }
                flags
            }
            (DynamicType::Array(qa), DynamicType::Array(qb)) => array_compat(qa, qb),
            (DynamicType::Map(qa), DynamicType::Map(qb)) => {
                let mut flags = qa
                    .key()
                    .is_compatible(qb.key())
                    .join(qa.value().is_compatible(qb.value()));
                if flags.is_none() {
                    return TypeConsistency::NONE;
                }
                if qa.bounds() != qb.bounds() {
                    flags |= TypeConsistency::IGNORE_SEQUENCE_BOUNDS;
                }
                flags
            }
            _ => TypeConsistency::NONE,
        }
    }
}

fn primitive_compat(a: TypeKind, b: TypeKind) -> TypeConsistency {
    if a == b {
        return TypeConsistency::EQUALS;
    }
    if a.is_integer() && b.is_integer() {
        let mut flags = TypeConsistency::EQUALS;
        if a.is_signed_integer() != b.is_signed_integer() {
            flags |= TypeConsistency::IGNORE_TYPE_SIGN;
        }
        if a.width() != b.width() {
            flags |= TypeConsistency::IGNORE_TYPE_WIDTH;
        }
        return flags;
    }
    if (a.is_float() && b.is_float()) || (a.is_char() && b.is_char()) {
        return TypeConsistency::IGNORE_TYPE_WIDTH;
    }
    TypeConsistency::NONE
}

fn array_compat(a: &ArrayType, b: &ArrayType) -> TypeConsistency {
    let (dims_a, content_a) = a.flattened();
    let (dims_b, content_b) = b.flattened();
    if dims_a.len() != dims_b.len() {
        return TypeConsistency::NONE;
    }
    let mut flags = content_a.is_compatible(content_b);
    if flags.is_none() {
        return TypeConsistency::NONE;
    }
    if dims_a != dims_b {
        flags |= TypeConsistency::IGNORE_ARRAY_BOUNDS;
    }
    flags
}

fn struct_compat(a: &StructType, b: &StructType) -> TypeConsistency {
    let mut flags = TypeConsistency::EQUALS;
    let common = a.members().len().min(b.members().len());
    for i in 0..common {
        let (ma, mb) = (&a.members()[i], &b.members()[i]);
        flags = flags.join(ma.ty().is_compatible(mb.ty()));
        if flags.is_none() {
            return TypeConsistency::NONE;
        }
        if ma.name() != mb.name() {
            flags |= TypeConsistency::IGNORE_MEMBER_NAMES;
        }
    }
    if a.members().len() != b.members().len() {
        flags |= TypeConsistency::IGNORE_MEMBERS;
    }
    flags
}

/// Follow alias indirections at the shared-handle level.
pub(crate) fn resolve_arc(ty: &Arc<DynamicType>) -> &Arc<DynamicType> {
    let mut ty = ty;
    while let DynamicType::Alias(a) = &**ty {
        ty = a.shared_target();
    }
    ty
}

/// Unbounded or bounded character sequence. Narrow strings hold UTF-8 bytes
/// (char8 elements), wide strings hold UTF-16 code units (char16 elements);
/// a bound limits the element count, 0 means unbounded.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct StringType {
    name: String,
    bounds: u32,
    wide: bool,
}

impl StringType {
    pub fn new(bounds: u32) -> StringType {
        let name = match bounds {
            0 => "string".to_string(),
            b => format!("string_{b}"),
        };
        StringType {
            name,
            bounds,
            wide: false,
        }
    }

    pub fn wide(bounds: u32) -> StringType {
        let name = match bounds {
            0 => "wstring".to_string(),
            b => format!("wstring_{b}"),
        };
        StringType {
            name,
            bounds,
            wide: true,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bounds(&self) -> u32 {
        self.bounds
    }

    pub fn is_wide(&self) -> bool {
        self.wide
    }

    pub fn kind(&self) -> TypeKind {
        if self.wide {
            TypeKind::WString
        } else {
            TypeKind::String
        }
    }

    pub(crate) fn element_size(&self) -> usize {
        if self.wide {
            2
        } else {
            1
        }
    }
}

/// Fixed-length collection. Multi-dimensional arrays nest: the outermost
/// descriptor owns `dims[0]`, its content the next dimension, and so on.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ArrayType {
    name: String,
    content: Arc<DynamicType>,
    dimension: u32,
}

impl ArrayType {
    pub fn new(content: impl Into<DynamicType>, dimension: u32) -> Result<ArrayType, TypeError> {
        let content = content.into();
        if dimension == 0 {
            return EmptyDimensions.fail();
        }
        if content.memory_size() == 0 {
            return ZeroSizedContent {
                name: content.name(),
            }
            .fail();
        }
        let name = format!("array_{}_{}", dimension, content.name());
        // memory_size reports this product; it must fit a usize.
        if content
            .memory_size()
            .checked_mul(dimension as usize)
            .is_none()
        {
            return OversizedType { name }.fail();
        }
        Ok(ArrayType {
            name,
            content: Arc::new(content),
            dimension,
        })
    }

    /// Build nested array descriptors from outermost to innermost dimension.
    pub fn multi_dimensional(
        content: impl Into<DynamicType>,
        dimensions: &[u32],
    ) -> Result<ArrayType, TypeError> {
        let (&innermost, outer) = dimensions.split_last().ok_or_else(|| {
            EmptyDimensions.build()
        })?;
        let mut array = ArrayType::new(content, innermost)?;
        for &dim in outer.iter().rev() {
            array = ArrayType::new(DynamicType::Array(array), dim)?;
        }
        Ok(array)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn content(&self) -> &DynamicType {
        &self.content
    }

    pub(crate) fn shared_content(&self) -> &Arc<DynamicType> {
        &self.content
    }

    /// Element count of this dimension.
    pub fn dimension(&self) -> u32 {
        self.dimension
    }

    /// All dimensions of the (possibly nested) array, outermost first.
    pub fn dimensions(&self) -> Vec<u32> {
        self.flattened().0
    }

    /// Dimension list plus the innermost non-array content.
    fn flattened(&self) -> (Vec<u32>, &DynamicType) {
        let mut dims = vec![self.dimension];
        let mut content = self.content().resolve();
        while let DynamicType::Array(inner) = content {
            dims.push(inner.dimension);
            content = inner.content().resolve();
        }
        (dims, content)
    }
}

/// Variable-length collection with an optional bound (0 means unbounded).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SequenceType {
    name: String,
    content: Arc<DynamicType>,
    bounds: u32,
}

impl SequenceType {
    pub fn new(content: impl Into<DynamicType>, bounds: u32) -> Result<SequenceType, TypeError> {
        let content = content.into();
        if content.memory_size() == 0 {
            return ZeroSizedContent {
                name: content.name(),
            }
            .fail();
        }
        let name = match bounds {
            0 => format!("sequence_{}", content.name()),
            b => format!("sequence_{}_{}", b, content.name()),
        };
        Ok(SequenceType {
            name,
            content: Arc::new(content),
            bounds,
        })
    }

    pub fn unbounded(content: impl Into<DynamicType>) -> Result<SequenceType, TypeError> {
        SequenceType::new(content, 0)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn content(&self) -> &DynamicType {
        &self.content
    }

    pub(crate) fn shared_content(&self) -> &Arc<DynamicType> {
        &self.content
    }

    pub fn bounds(&self) -> u32 {
        self.bounds
    }
}

/// Variable-length associative collection. The key must resolve to a
/// hashable kind: an integer, boolean, character, or string.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MapType {
    name: String,
    key: Arc<DynamicType>,
    value: Arc<DynamicType>,
    bounds: u32,
}

impl MapType {
    pub fn new(
        key: impl Into<DynamicType>,
        value: impl Into<DynamicType>,
        bounds: u32,
    ) -> Result<MapType, TypeError> {
        let key = key.into();
        let value = value.into();
        let key_kind = key.resolve().kind();
        let hashable = key_kind.is_integer()
            || key_kind.is_char()
            || matches!(key_kind, TypeKind::Boolean | TypeKind::String | TypeKind::WString);
        if !hashable {
            return UnsupportedKeyType { kind: key_kind }.fail();
        }
        if value.memory_size() == 0 {
            return ZeroSizedContent { name: value.name() }.fail();
        }
        let name = match bounds {
            0 => format!("map_{}_{}", key.name(), value.name()),
            b => format!("map_{}_{}_{}", b, key.name(), value.name()),
        };
        // Upper bound on pair_stride: key + value + both alignment paddings.
        let pair_align = key.natural_alignment().max(value.natural_alignment());
        if key
            .memory_size()
            .checked_add(value.memory_size())
            .and_then(|pair| pair.checked_add(2 * pair_align))
            .is_none()
        {
            return OversizedType { name }.fail();
        }
        Ok(MapType {
            name,
            key: Arc::new(key),
            value: Arc::new(value),
            bounds,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key(&self) -> &DynamicType {
        &self.key
    }

    pub fn value(&self) -> &DynamicType {
        &self.value
    }

    pub(crate) fn shared_key(&self) -> &Arc<DynamicType> {
        &self.key
    }

    pub(crate) fn shared_value(&self) -> &Arc<DynamicType> {
        &self.value
    }

    pub fn bounds(&self) -> u32 {
        self.bounds
    }

    /// Offset of the value inside one key/value pair slot.
    pub(crate) fn value_offset(&self) -> usize {
        align_up(self.key.memory_size(), self.value.natural_alignment())
    }

    pub(crate) fn pair_align(&self) -> usize {
        self.key
            .natural_alignment()
            .max(self.value.natural_alignment())
    }

    pub(crate) fn pair_stride(&self) -> usize {
        align_up(
            self.value_offset() + self.value.memory_size(),
            self.pair_align(),
        )
    }
}

/// One structure member: a name, an owned type, optional metadata, and the
/// byte offset assigned when the member is added to its structure.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct StructMember {
    name: String,
    ty: Arc<DynamicType>,
    id: i32,
    key: bool,
    optional: bool,
    bitset: bool,
    offset: usize,
    presence_offset: Option<usize>,
}

/// Alias kept for call sites building members inline.
pub type Member = StructMember;

impl StructMember {
    pub fn new(name: impl Into<String>, ty: impl Into<DynamicType>) -> StructMember {
        StructMember {
            name: name.into(),
            ty: Arc::new(ty.into()),
            id: -1,
            key: false,
            optional: false,
            bitset: false,
            offset: 0,
            presence_offset: None,
        }
    }

    /// Set the member id.
    pub fn id(mut self, value: i32) -> StructMember {
        self.id = value;
        self
    }

    /// Mark the member as part of the key.
    pub fn key(mut self, value: bool) -> StructMember {
        self.key = value;
        self
    }

    /// Mark the member as optional: its storage starts unset and reads fail
    /// until the first write.
    pub fn optional(mut self, value: bool) -> StructMember {
        self.optional = value;
        self
    }

    /// Mark the member as belonging to a bitset.
    pub fn bitset(mut self, value: bool) -> StructMember {
        self.bitset = value;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ty(&self) -> &DynamicType {
        &self.ty
    }

    pub(crate) fn shared_type(&self) -> &Arc<DynamicType> {
        &self.ty
    }

    pub fn member_id(&self) -> Option<i32> {
        (self.id >= 0).then_some(self.id)
    }

    pub fn is_key(&self) -> bool {
        self.key
    }

    pub fn is_optional(&self) -> bool {
        self.optional
    }

    pub fn is_bitset(&self) -> bool {
        self.bitset
    }

    /// Byte offset of the member content within its structure instance.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Offset of the presence byte, for optional members.
    pub(crate) fn presence_offset(&self) -> Option<usize> {
        self.presence_offset
    }
}

/// Ordered list of named members with natural-alignment layout.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct StructType {
    name: String,
    members: Vec<StructMember>,
    end: usize,
    alignment: usize,
}

impl StructType {
    pub fn new(name: impl Into<String>) -> StructType {
        StructType {
            name: name.into(),
            members: Vec::new(),
            end: 0,
            alignment: 1,
        }
    }

    /// Append a member, assigning its offset left-to-right with natural
    /// alignment. Fails on a duplicate member name.
    pub fn add_member(&mut self, member: StructMember) -> Result<&mut StructType, TypeError> {
        if self.members.iter().any(|m| m.name == member.name) {
            return DuplicateMember { name: member.name }.fail();
        }
        let align = member.ty.natural_alignment().max(1);
        let start = if member.optional {
            self.end.checked_add(1)
        } else {
            Some(self.end)
        };
        let offset = start
            .and_then(|start| start.checked_add(align - 1))
            .map(|padded| padded & !(align - 1));
        let end = offset.and_then(|offset| offset.checked_add(member.ty.memory_size()));
        let (Some(offset), Some(end)) = (offset, end) else {
            return OversizedType { name: member.name }.fail();
        };
        let mut member = member;
        member.presence_offset = member.optional.then_some(self.end);
        member.offset = offset;
        self.end = end;
        self.alignment = self.alignment.max(align);
        trace!(
            structure = %self.name,
            member = %member.name,
            offset = member.offset,
            "member placed"
        );
        self.members.push(member);
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn members(&self) -> &[StructMember] {
        &self.members
    }

    pub fn member(&self, name: &str) -> Option<&StructMember> {
        self.members.iter().find(|m| m.name == name)
    }

    /// Aligned end offset: the stride of one structure instance.
    pub fn memory_size(&self) -> usize {
        align_up(self.end, self.alignment)
    }

    pub(crate) fn alignment(&self) -> usize {
        self.alignment
    }
}

/// A named indirection to another descriptor, transparent under
/// [DynamicType::resolve].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct AliasType {
    name: String,
    target: Arc<DynamicType>,
}

impl AliasType {
    /// Wrap `target` under a new name. The alias chain below `target` is
    /// checked for cycles; a cyclic chain is refused outright so that
    /// `resolve` is total on every constructed descriptor.
    pub fn new(name: impl Into<String>, target: impl Into<DynamicType>) -> Result<AliasType, TypeError> {
        let name = name.into();
        let target = target.into();
        let mut seen: Vec<*const DynamicType> = Vec::new();
        let mut cursor = &target;
        while let DynamicType::Alias(a) = cursor {
            let id = Arc::as_ptr(&a.target);
            if seen.contains(&id) {
                return CyclicAlias { name }.fail();
            }
            seen.push(id);
            cursor = a.target();
        }
        Ok(AliasType {
            name,
            target: Arc::new(target),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The aliased descriptor (one level; use [DynamicType::resolve] to
    /// follow chains).
    pub fn target(&self) -> &DynamicType {
        &self.target
    }

    pub(crate) fn shared_target(&self) -> &Arc<DynamicType> {
        &self.target
    }
}

macro_rules! impl_from_descriptor {
    ($($variant:ident($ty:ty)),* $(,)?) => {
        $(
            impl From<$ty> for DynamicType {
                fn from(value: $ty) -> DynamicType {
                    DynamicType::$variant(value)
                }
            }
        )*
    };
}

impl_from_descriptor! {
    Primitive(PrimitiveType),
    String(StringType),
    Array(ArrayType),
    Sequence(SequenceType),
    Map(MapType),
    Structure(StructType),
    Alias(AliasType),
}
