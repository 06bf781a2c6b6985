//! Schema representation (component D): FieldDef/MessageDef/EnumDef/OneofDef
//! /FileDef plus the [`pool::SymbolTable`] that resolves names to defs.
//!
//! Every def lives as plain data inside a [`pool::DefPoolBuilder`] (mutable
//! phase) and is addressed by a small index newtype (`FieldId`, `MessageId`,
//! ...) rather than a pointer, per Design Notes item 1. `...Builder` handle
//! types expose mutation against the builder; once [`pool::DefPoolBuilder::freeze`]
//! runs, the same indices are read through a [`pool::DefPool`] via
//! zero-sized `...Def<'p>` view wrappers that only expose getters — the
//! "cannot mutate after freeze" rule lives in which methods a type offers,
//! not in a runtime check (Design Notes item 2).

mod field;
mod file;
mod message;
mod oneof;
mod pool;
mod enum_;

pub use field::{FieldDef, FieldDefBuilder, FieldId};
pub use file::{FileDef, FileId};
pub use message::{MessageDef, MessageDefBuilder, MessageId, INTERNAL_HEADER_SIZE};
pub use oneof::{OneofDef, OneofId};
pub use pool::{DefPool, DefPoolBuilder, SymbolTable};
pub use enum_::{EnumDef, EnumDefBuilder, EnumId};

/// The 18 protobuf wire-level field types (descriptor.proto's `TYPE_*`),
/// plus the group/message/enum kinds that carry a subdef.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Double,
    Float,
    Int64,
    Uint64,
    Int32,
    Fixed64,
    Fixed32,
    Bool,
    String,
    Group,
    Message,
    Bytes,
    Uint32,
    Enum,
    Sfixed32,
    Sfixed64,
    Sint32,
    Sint64,
}

impl FieldType {
    /// Whether this type requires a subdef (message, group, or enum).
    pub const fn has_subdef(self) -> bool {
        matches!(self, FieldType::Message | FieldType::Group | FieldType::Enum)
    }

    pub const fn wire_type(self) -> crate::wire::WireType {
        use crate::wire::WireType;
        match self {
            FieldType::Double | FieldType::Fixed64 | FieldType::Sfixed64 => WireType::Fixed64,
            FieldType::Float | FieldType::Fixed32 | FieldType::Sfixed32 => WireType::Fixed32,
            FieldType::Int64
            | FieldType::Uint64
            | FieldType::Int32
            | FieldType::Bool
            | FieldType::Uint32
            | FieldType::Enum
            | FieldType::Sint32
            | FieldType::Sint64 => WireType::Varint,
            FieldType::String | FieldType::Bytes | FieldType::Message => WireType::LengthDelimited,
            FieldType::Group => WireType::StartGroup,
        }
    }

    /// In-memory size of a single (non-repeated) scalar slot, per spec.md's
    /// in-memory layout contract (§3: "1/4/8/16 bytes by wire-type").
    pub const fn memory_size(self) -> usize {
        match self {
            FieldType::Bool => 1,
            FieldType::Float
            | FieldType::Fixed32
            | FieldType::Sfixed32
            | FieldType::Int32
            | FieldType::Uint32
            | FieldType::Sint32
            | FieldType::Enum => 4,
            FieldType::Double
            | FieldType::Fixed64
            | FieldType::Sfixed64
            | FieldType::Int64
            | FieldType::Uint64
            | FieldType::Sint64 => 8,
            FieldType::String | FieldType::Bytes => 16,
            FieldType::Message | FieldType::Group => 8,
        }
    }

    pub fn memory_align(self) -> usize {
        self.memory_size().min(8).max(1)
    }

    pub const fn is_zigzag(self) -> bool {
        matches!(self, FieldType::Sint32 | FieldType::Sint64)
    }

    /// Inverse of the implicit `as u8` discriminant, used by
    /// `crate::minitable::FastFuncData` to pack a field's type into the
    /// fasttable slot's otherwise-unused `submsg_index` byte for non-message
    /// fields (see that type's doc comment).
    pub const fn from_u8(v: u8) -> Option<FieldType> {
        Some(match v {
            0 => FieldType::Double,
            1 => FieldType::Float,
            2 => FieldType::Int64,
            3 => FieldType::Uint64,
            4 => FieldType::Int32,
            5 => FieldType::Fixed64,
            6 => FieldType::Fixed32,
            7 => FieldType::Bool,
            8 => FieldType::String,
            9 => FieldType::Group,
            10 => FieldType::Message,
            11 => FieldType::Bytes,
            12 => FieldType::Uint32,
            13 => FieldType::Enum,
            14 => FieldType::Sfixed32,
            15 => FieldType::Sfixed64,
            16 => FieldType::Sint32,
            17 => FieldType::Sint64,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Label {
    Optional,
    Required,
    Repeated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syntax {
    Proto2,
    Proto3,
}

/// A fully-qualified-name lookup result, returned by [`SymbolTable::resolve`]
/// and used internally by symbolic subdef resolution (spec.md §4.D).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefId {
    Message(MessageId),
    Enum(EnumId),
    Field(FieldId),
    Oneof(OneofId),
    File(FileId),
}
