use std::str;

use snafu::{Backtrace, Snafu};

use crate::kind::TypeKind;

/// Errors raised while building a type descriptor. Instances are never
/// produced from a malformed descriptor tree.
#[derive(Snafu, Debug)]
#[snafu(visibility(pub(crate)), context(suffix(false)))]
#[non_exhaustive]
pub enum TypeError {
    #[snafu(display("duplicate member name: {name}"))]
    DuplicateMember { backtrace: Backtrace, name: String },
    #[snafu(display("alias chain through {name} is cyclic"))]
    CyclicAlias { backtrace: Backtrace, name: String },
    #[snafu(display("collection content {name} has zero memory size"))]
    ZeroSizedContent { backtrace: Backtrace, name: String },
    #[snafu(display("map key kind {kind:?} is not hashable"))]
    UnsupportedKeyType { backtrace: Backtrace, kind: TypeKind },
    #[snafu(display("array must have at least one non-zero dimension"))]
    EmptyDimensions { backtrace: Backtrace },
    #[snafu(display("type {name} exceeds addressable memory"))]
    OversizedType { backtrace: Backtrace, name: String },
}

/// Errors raised by cursor operations. The instance tree is left unchanged
/// whenever one of these is returned.
#[derive(Snafu, Debug)]
#[snafu(visibility(pub(crate)), context(suffix(false)))]
#[non_exhaustive]
pub enum DataError {
    #[snafu(display("structure {type_name} has no member {name}"))]
    InvalidMember {
        backtrace: Backtrace,
        type_name: String,
        name: String,
    },
    #[snafu(display("index {index} is out of bounds (size {size})"))]
    OutOfBounds {
        backtrace: Backtrace,
        index: usize,
        size: usize,
    },
    #[snafu(display("collection bound {bounds} exhausted"))]
    BoundsExceeded { backtrace: Backtrace, bounds: u32 },
    #[snafu(display("cannot access {found:?} value as {expected:?}"))]
    TypeMismatch {
        backtrace: Backtrace,
        expected: TypeKind,
        found: TypeKind,
    },
    #[snafu(display("optional member {name} was never written"))]
    UninitializedAccess { backtrace: Backtrace, name: String },
    #[snafu(display("invalid utf8 in string instance: {source}"))]
    InvalidUtf8 {
        backtrace: Backtrace,
        source: str::Utf8Error,
    },
    #[snafu(display("invalid utf16 in wstring instance"))]
    InvalidUtf16 { backtrace: Backtrace },
}
