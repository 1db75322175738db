#![forbid(unsafe_code)]

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use keel_ast::{Qualifier, Span};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IntType {
    pub bits: u16,
    pub signed: bool,
}

impl IntType {
    pub const U8: IntType = IntType { bits: 8, signed: false };
    pub const U32: IntType = IntType { bits: 32, signed: false };
    pub const U64: IntType = IntType { bits: 64, signed: false };
    pub const I32: IntType = IntType { bits: 32, signed: true };
    pub const I64: IntType = IntType { bits: 64, signed: true };

    /// Parse a primitive integer name; `usize`/`isize` take the target width.
    pub fn from_name(name: &str, pointer_width: u16) -> Option<IntType> {
        let (signed, bits) = match name {
            "usize" => return Some(IntType { bits: pointer_width, signed: false }),
            "isize" => return Some(IntType { bits: pointer_width, signed: true }),
            _ => match name.split_at_checked(1)? {
                ("u", rest) => (false, rest),
                ("i", rest) => (true, rest),
                _ => return None,
            },
        };
        let bits: u16 = bits.parse().ok()?;
        matches!(bits, 8 | 16 | 32 | 64).then_some(IntType { bits, signed })
    }

    pub fn min_value(&self) -> i128 {
        if self.signed {
            -(1i128 << (self.bits - 1))
        } else {
            0
        }
    }

    pub fn max_value(&self) -> i128 {
        if self.signed {
            (1i128 << (self.bits - 1)) - 1
        } else {
            (1i128 << self.bits) - 1
        }
    }

    pub fn contains(&self, value: i128) -> bool {
        value >= self.min_value() && value <= self.max_value()
    }

    /// Reduce `value` modulo 2^bits into this type's range (two's complement).
    pub fn wrap(&self, value: i128) -> i128 {
        let modulus = 1i128 << self.bits;
        let low = value.rem_euclid(modulus);
        if self.signed && low > self.max_value() {
            low - modulus
        } else {
            low
        }
    }

    pub fn bytes(&self) -> u64 {
        u64::from(self.bits / 8)
    }
}

impl fmt::Display for IntType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", if self.signed { "i" } else { "u" }, self.bits)
    }
}

/// A member of an error set. Equality is by name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ErrorTag(pub String);

impl ErrorTag {
    pub fn new(name: impl Into<String>) -> Self {
        ErrorTag(name.into())
    }
}

impl fmt::Display for ErrorTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub type ErrorSet = BTreeSet<ErrorTag>;

pub fn display_error_set(set: &ErrorSet) -> String {
    let names = set.iter().map(|t| t.0.as_str()).collect::<Vec<_>>().join(", ");
    format!("Error{{{names}}}")
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StructId(pub u32);

impl StructId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Type {
    Int(IntType),
    Bool,
    Void,
    Pointer { target: Box<Type>, nullable: bool },
    Slice(Box<Type>),
    Array { elem: Box<Type>, len: u64 },
    Struct { id: StructId, name: Arc<str> },
    ErrorUnion { success: Box<Type>, errors: ErrorSet },
}

impl Type {
    pub fn display(&self) -> String {
        match self {
            Type::Int(it) => it.to_string(),
            Type::Bool => "bool".to_string(),
            Type::Void => "void".to_string(),
            Type::Pointer { target, nullable } => {
                format!("*{}{}", if *nullable { "?" } else { "" }, target.display())
            }
            Type::Slice(elem) => format!("[]{}", elem.display()),
            Type::Array { elem, len } => format!("[{len}]{}", elem.display()),
            Type::Struct { name, .. } => name.to_string(),
            Type::ErrorUnion { success, errors } => {
                format!("{} | {}", success.display(), display_error_set(errors))
            }
        }
    }

    pub fn is_nullable_pointer(&self) -> bool {
        matches!(self, Type::Pointer { nullable: true, .. })
    }

    pub fn pointee(&self) -> Option<&Type> {
        match self {
            Type::Pointer { target, .. } => Some(target),
            _ => None,
        }
    }

    pub fn error_set(&self) -> Option<&ErrorSet> {
        match self {
            Type::ErrorUnion { errors, .. } => Some(errors),
            _ => None,
        }
    }

    /// The payload of an error union, or the type itself.
    pub fn success(&self) -> &Type {
        match self {
            Type::ErrorUnion { success, .. } => success,
            other => other,
        }
    }

    /// The same pointer with the null case ruled out.
    pub fn narrowed(&self) -> Type {
        match self {
            Type::Pointer { target, .. } => Type::Pointer {
                target: target.clone(),
                nullable: false,
            },
            other => other.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldLayout {
    pub name: String,
    pub ty: Type,
    pub offset: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StructLayout {
    pub id: StructId,
    pub name: String,
    pub span: Span,
    pub fields: Vec<FieldLayout>,
    pub packed: bool,
    /// Alignment requested with `align(N)`.
    pub explicit_align: Option<u64>,
    pub size: u64,
    pub align: u64,
}

impl StructLayout {
    pub fn field(&self, name: &str) -> Option<&FieldLayout> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn offset_of(&self, name: &str) -> Option<u64> {
        self.field(name).map(|f| f.offset)
    }
}

pub fn round_up(value: u64, align: u64) -> u64 {
    if align <= 1 {
        return value;
    }
    value.div_ceil(align).saturating_mul(align)
}

/// Struct layouts and target facts; immutable once the resolver finishes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeTable {
    pub(crate) structs: Vec<StructLayout>,
    pub(crate) by_name: HashMap<String, StructId>,
    pub pointer_width: u16,
}

const ERROR_TAG_BYTES: u64 = 2;

impl TypeTable {
    pub fn new(pointer_width: u16) -> Self {
        TypeTable {
            structs: Vec::new(),
            by_name: HashMap::new(),
            pointer_width,
        }
    }

    pub fn structs(&self) -> &[StructLayout] {
        &self.structs
    }

    pub fn struct_layout(&self, id: StructId) -> &StructLayout {
        &self.structs[id.index()]
    }

    pub fn lookup_struct(&self, name: &str) -> Option<&StructLayout> {
        self.by_name.get(name).map(|id| self.struct_layout(*id))
    }

    pub fn struct_type(&self, name: &str) -> Option<Type> {
        self.by_name.get(name).map(|id| Type::Struct {
            id: *id,
            name: Arc::from(name),
        })
    }

    pub fn pointer_bytes(&self) -> u64 {
        u64::from(self.pointer_width / 8)
    }

    /// Type of `base.field`, looking through one level of pointer.
    pub fn field_type(&self, base: &Type, field: &str) -> Option<Type> {
        match base {
            Type::Struct { id, .. } => self.struct_layout(*id).field(field).map(|f| f.ty.clone()),
            Type::Pointer { target, .. } => self.field_type(target, field),
            _ => None,
        }
    }

    pub fn size_of(&self, ty: &Type) -> u64 {
        self.size_align(ty).0
    }

    pub fn align_of(&self, ty: &Type) -> u64 {
        self.size_align(ty).1
    }

    pub fn size_align(&self, ty: &Type) -> (u64, u64) {
        match ty {
            Type::Int(it) => (it.bytes(), it.bytes()),
            Type::Bool => (1, 1),
            Type::Void => (0, 1),
            Type::Pointer { .. } => (self.pointer_bytes(), self.pointer_bytes()),
            Type::Slice(_) => (2 * self.pointer_bytes(), self.pointer_bytes()),
            Type::Array { elem, len } => {
                let (size, align) = self.size_align(elem);
                (size.saturating_mul(*len), align)
            }
            Type::Struct { id, .. } => {
                let layout = self.struct_layout(*id);
                (layout.size, layout.align)
            }
            Type::ErrorUnion { success, .. } => {
                let (size, align) = self.size_align(success);
                let align = align.max(ERROR_TAG_BYTES);
                let payload = round_up(ERROR_TAG_BYTES, align);
                (round_up(payload + size, align), align)
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParamSig {
    pub name: String,
    pub ty: Type,
    pub qual: Qualifier,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FnSig {
    pub name: String,
    pub span: Span,
    pub params: Vec<ParamSig>,
    pub ret: Type,
    pub release: bool,
    /// Extern declarations have no body and are never comptime-callable.
    pub has_body: bool,
}

impl FnSig {
    pub fn error_set(&self) -> Option<&ErrorSet> {
        self.ret.error_set()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_type_ranges() {
        assert_eq!(IntType::U8.max_value(), 255);
        assert_eq!(IntType::U8.min_value(), 0);
        let i8t = IntType { bits: 8, signed: true };
        assert_eq!(i8t.min_value(), -128);
        assert_eq!(i8t.max_value(), 127);
        assert!(IntType::U64.contains(u64::MAX as i128));
    }

    #[test]
    fn wrap_is_twos_complement() {
        let i8t = IntType { bits: 8, signed: true };
        assert_eq!(IntType::U8.wrap(256), 0);
        assert_eq!(IntType::U8.wrap(-1), 255);
        assert_eq!(i8t.wrap(128), -128);
        assert_eq!(i8t.wrap(-129), 127);
    }

    #[test]
    fn parses_primitive_names() {
        assert_eq!(IntType::from_name("u32", 64), Some(IntType::U32));
        assert_eq!(IntType::from_name("usize", 32), Some(IntType { bits: 32, signed: false }));
        assert_eq!(IntType::from_name("u7", 64), None);
        assert_eq!(IntType::from_name("Conn", 64), None);
    }

    #[test]
    fn error_union_layout_pads_payload() {
        let table = TypeTable::new(64);
        let ty = Type::ErrorUnion {
            success: Box::new(Type::Int(IntType::U64)),
            errors: ErrorSet::new(),
        };
        assert_eq!(table.size_align(&ty), (16, 8));
        let small = Type::ErrorUnion {
            success: Box::new(Type::Void),
            errors: ErrorSet::new(),
        };
        assert_eq!(table.size_align(&small), (2, 2));
    }

    #[test]
    fn display_nested_types() {
        let ty = Type::ErrorUnion {
            success: Box::new(Type::Pointer {
                target: Box::new(Type::Int(IntType::U8)),
                nullable: true,
            }),
            errors: [ErrorTag::new("Closed"), ErrorTag::new("BufferFull")].into_iter().collect(),
        };
        assert_eq!(ty.display(), "*?u8 | Error{BufferFull, Closed}");
    }
}
