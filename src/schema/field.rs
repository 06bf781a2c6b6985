extern crate alloc;
use alloc::string::String;

use super::{FieldType, Label, MessageId};
use crate::schema::pool::{DefPool, DefPoolBuilder};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldId(pub(super) u32);

/// Unresolved or resolved reference to a field's subdef (spec.md §3: "optional
/// subdef... or symbolic subdef name awaiting resolution").
#[derive(Debug, Clone)]
pub(super) enum SubDefRef {
    None,
    /// `.x.y.z` (absolute) or `x.y.z` (scoped); resolved during freeze.
    Symbolic(String),
    Message(MessageId),
    Enum(super::EnumId),
}

pub(super) struct FieldDefData {
    pub(super) name: String,
    pub(super) number: u32,
    pub(super) label: Label,
    pub(super) field_type: FieldType,
    pub(super) packed: bool,
    pub(super) subdef: SubDefRef,
    pub(super) is_extension: bool,
    pub(super) is_lazy: bool,
    pub(super) oneof: Option<super::OneofId>,
    pub(super) index_in_parent: u32,
    pub(super) message: MessageId,
    // Populated by MessageDefBuilder::compute_layout at freeze time.
    pub(super) offset: u32,
    /// -1 until layout assigns one; fields in a oneof never get a hasbit
    /// (presence is the oneof case slot instead).
    pub(super) hasbit: i32,
    pub(super) selector_base: u32,
}

/// Handle used while a [`DefPoolBuilder`] is still mutable to set the
/// optional properties of a field (everything beyond name/number/type/label,
/// which are fixed at `MessageDefBuilder::add_field` time).
pub struct FieldDefBuilder<'b> {
    pub(super) pool: &'b mut DefPoolBuilder,
    pub(super) id: FieldId,
}

impl<'b> FieldDefBuilder<'b> {
    pub fn set_packed(self, packed: bool) -> Self {
        self.pool.fields[self.id.0 as usize].packed = packed;
        self
    }

    pub fn set_subdef_name(self, name: impl Into<String>) -> Self {
        self.pool.fields[self.id.0 as usize].subdef = SubDefRef::Symbolic(name.into());
        self
    }

    pub fn set_extension(self, is_extension: bool) -> Self {
        self.pool.fields[self.id.0 as usize].is_extension = is_extension;
        self
    }

    pub fn set_lazy(self, is_lazy: bool) -> Self {
        self.pool.fields[self.id.0 as usize].is_lazy = is_lazy;
        self
    }

    /// Assigns this field to `oneof` (spec.md §3: "oneof membership...
    /// exclusive: a field is in at most one oneof"). Also registers the
    /// field on the oneof's member list.
    pub fn set_oneof(self, oneof: super::OneofId) -> Self {
        self.pool.fields[self.id.0 as usize].oneof = Some(oneof);
        self.pool.oneofs[oneof.0 as usize].fields.push(self.id);
        self
    }

    pub fn id(&self) -> FieldId {
        self.id
    }
}

/// A frozen view of a field definition, borrowed from a frozen [`DefPool`].
#[derive(Clone, Copy)]
pub struct FieldDef<'p> {
    pub(crate) pool: &'p DefPool,
    pub(crate) id: FieldId,
}

impl<'p> FieldDef<'p> {
    fn data(&self) -> &'p FieldDefData {
        &self.pool.fields[self.id.0 as usize]
    }

    pub fn id(&self) -> FieldId {
        self.id
    }

    pub fn name(&self) -> &'p str {
        &self.data().name
    }

    pub fn number(&self) -> u32 {
        self.data().number
    }

    pub fn label(&self) -> Label {
        self.data().label
    }

    pub fn is_repeated(&self) -> bool {
        self.label() == Label::Repeated
    }

    pub fn field_type(&self) -> FieldType {
        self.data().field_type
    }

    pub fn packed(&self) -> bool {
        self.data().packed
    }

    pub fn is_extension(&self) -> bool {
        self.data().is_extension
    }

    pub fn is_lazy(&self) -> bool {
        self.data().is_lazy
    }

    pub fn oneof(&self) -> Option<super::OneofDef<'p>> {
        self.data().oneof.map(|id| super::OneofDef { pool: self.pool, id })
    }

    pub fn containing_message(&self) -> super::MessageDef<'p> {
        super::MessageDef { pool: self.pool, id: self.data().message }
    }

    /// `Some` for message/group/enum fields; `None` otherwise. Per spec.md
    /// §3: "a frozen FieldDef either has a set subdef... or has no subdef
    /// requirement" — every reachable field here is guaranteed resolved,
    /// because freeze fails outright if it isn't (see `DefError::UnresolvedReference`).
    pub fn message_subdef(&self) -> Option<super::MessageDef<'p>> {
        match &self.data().subdef {
            SubDefRef::Message(id) => Some(super::MessageDef { pool: self.pool, id: *id }),
            _ => None,
        }
    }

    pub fn enum_subdef(&self) -> Option<super::EnumDef<'p>> {
        match &self.data().subdef {
            SubDefRef::Enum(id) => Some(super::EnumDef { pool: self.pool, id: *id }),
            _ => None,
        }
    }

    pub fn offset(&self) -> u32 {
        self.data().offset
    }

    /// `None` for fields with no presence bit (oneof members, repeated
    /// fields), `Some(idx)` otherwise.
    pub fn hasbit_index(&self) -> Option<u32> {
        let h = self.data().hasbit;
        if h < 0 {
            None
        } else {
            Some(h as u32)
        }
    }

    pub fn selector_base(&self) -> u32 {
        self.data().selector_base
    }

    pub fn index_in_parent(&self) -> u32 {
        self.data().index_in_parent
    }
}

impl core::fmt::Debug for FieldDef<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FieldDef")
            .field("name", &self.name())
            .field("number", &self.number())
            .field("type", &self.field_type())
            .finish()
    }
}
