/*!
[TypeKind] tags for every kind of dynamic type, and the [TypeConsistency]
bitset returned by structural compatibility checks.
*/

/// Tag naming the kind of a dynamic type.
///
/// The set is closed: every descriptor carries exactly one of these tags,
/// and instance operations dispatch on it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum TypeKind {
    Boolean,
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float32,
    Float64,
    Char8,
    Char16,
    String,
    WString,
    Array,
    Sequence,
    Map,
    Structure,
    Alias,
}

impl TypeKind {
    /// Fixed-width POD leaf: integers, floats, booleans, characters.
    pub fn is_primitive(self) -> bool {
        use TypeKind::*;
        matches!(
            self,
            Boolean
                | Int8
                | UInt8
                | Int16
                | UInt16
                | Int32
                | UInt32
                | Int64
                | UInt64
                | Float32
                | Float64
                | Char8
                | Char16
        )
    }

    /// Anything with an element buffer: strings, arrays, sequences, maps.
    pub fn is_collection(self) -> bool {
        use TypeKind::*;
        matches!(self, String | WString | Array | Sequence | Map)
    }

    /// Types whose children are reached by member name.
    pub fn is_aggregation(self) -> bool {
        matches!(self, TypeKind::Structure)
    }

    /// Aggregates in the glossary sense: structures, arrays, sequences, maps.
    pub fn is_constructed(self) -> bool {
        use TypeKind::*;
        matches!(self, Structure | Array | Sequence | Map)
    }

    pub fn is_signed_integer(self) -> bool {
        use TypeKind::*;
        matches!(self, Int8 | Int16 | Int32 | Int64)
    }

    pub fn is_unsigned_integer(self) -> bool {
        use TypeKind::*;
        matches!(self, UInt8 | UInt16 | UInt32 | UInt64)
    }

    pub fn is_integer(self) -> bool {
        self.is_signed_integer() || self.is_unsigned_integer()
    }

    pub fn is_float(self) -> bool {
        matches!(self, TypeKind::Float32 | TypeKind::Float64)
    }

    pub fn is_char(self) -> bool {
        matches!(self, TypeKind::Char8 | TypeKind::Char16)
    }

    /// Native width in bytes for primitive kinds, `None` otherwise.
    pub fn width(self) -> Option<usize> {
        use TypeKind::*;
        match self {
            Boolean | Int8 | UInt8 | Char8 => Some(1),
            Int16 | UInt16 | Char16 => Some(2),
            Int32 | UInt32 | Float32 => Some(4),
            Int64 | UInt64 | Float64 => Some(8),
            _ => None,
        }
    }
}

bitflags::bitflags! {
    /// Result of a structural compatibility check between two descriptors.
    ///
    /// An empty set means the types are structurally identical
    /// ([TypeConsistency::EQUALS]). Each `IGNORE_*` bit records one way the
    /// two differ while remaining assignable. [TypeConsistency::NONE] is its
    /// own bit and absorbs everything it is combined with.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct TypeConsistency: u16 {
        const IGNORE_TYPE_SIGN       = 0b0000_0001;
        const IGNORE_TYPE_WIDTH      = 0b0000_0010;
        const IGNORE_SEQUENCE_BOUNDS = 0b0000_0100;
        const IGNORE_ARRAY_BOUNDS    = 0b0000_1000;
        const IGNORE_STRING_BOUNDS   = 0b0001_0000;
        const IGNORE_MEMBER_NAMES    = 0b0010_0000;
        const IGNORE_MEMBERS         = 0b0100_0000;
        const NONE                   = 0b1000_0000;
    }
}

impl TypeConsistency {
    /// Structural identity: no `IGNORE_*` bit set.
    pub const EQUALS: TypeConsistency = TypeConsistency::empty();

    /// The two types are not assignable at all.
    pub fn is_none(self) -> bool {
        self.contains(TypeConsistency::NONE)
    }

    /// The two types are structurally identical.
    pub fn is_equals(self) -> bool {
        self == TypeConsistency::EQUALS
    }

    /// Combine the consistency of two subtrees. `NONE` on either side
    /// poisons the result to exactly `NONE`.
    pub(crate) fn join(self, other: TypeConsistency) -> TypeConsistency {
        if self.is_none() || other.is_none() {
            TypeConsistency::NONE
        } else {
            self | other
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_absorbs_none() {
        let flags = TypeConsistency::IGNORE_TYPE_WIDTH.join(TypeConsistency::NONE);
        assert_eq!(flags, TypeConsistency::NONE);
        assert!(flags.is_none());
    }

    #[test]
    fn join_accumulates_flags() {
        let flags = TypeConsistency::IGNORE_TYPE_SIGN.join(TypeConsistency::IGNORE_MEMBER_NAMES);
        assert!(flags.contains(TypeConsistency::IGNORE_TYPE_SIGN));
        assert!(flags.contains(TypeConsistency::IGNORE_MEMBER_NAMES));
        assert!(!flags.is_none());
    }

    #[test]
    fn equals_is_empty() {
        assert_eq!(TypeConsistency::EQUALS, TypeConsistency::empty());
        assert!(TypeConsistency::EQUALS.is_equals());
        assert!(!TypeConsistency::NONE.is_equals());
    }

    #[test]
    fn primitive_classification() {
        assert!(TypeKind::UInt32.is_primitive());
        assert!(TypeKind::UInt32.is_unsigned_integer());
        assert!(!TypeKind::UInt32.is_signed_integer());
        assert_eq!(TypeKind::UInt32.width(), Some(4));
        assert!(TypeKind::Sequence.is_collection());
        assert!(TypeKind::Structure.is_aggregation());
        assert!(!TypeKind::String.is_constructed());
        assert_eq!(TypeKind::String.width(), None);
    }
}
