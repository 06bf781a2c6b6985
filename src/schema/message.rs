//! MessageDef and the layout pass that turns a set of fields into concrete
//! byte offsets (spec.md §4.D "Layout computation"), grounded in
//! `descriptor_pool.rs`'s `build_table_from_descriptor`: a `core::alloc::Layout`
//! is extended field-by-field so alignment and padding come out of the
//! standard library's own rules rather than being re-derived by hand.

extern crate alloc;
use alloc::string::String;
use alloc::vec::Vec;

use core::alloc::Layout;

use super::field::SubDefRef;
use super::{FieldId, FieldType, FileId, Label, OneofId, Syntax};
use crate::error::DefError;
use crate::schema::pool::{DefPool, DefPoolBuilder};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageId(pub(super) u32);

pub(super) struct MessageDefData {
    pub(super) full_name: String,
    pub(super) file: FileId,
    pub(super) fields: Vec<FieldId>,
    pub(super) oneofs: Vec<OneofId>,
    pub(super) syntax: Syntax,
    pub(super) is_map_entry: bool,
    pub(super) extension_ranges: Vec<(u32, u32)>,
    // Filled in by `compute_layout` during freeze.
    pub(super) instance_size: u32,
    pub(super) hasbit_bytes: u32,
    pub(super) hasbit_offset: u32,
    pub(super) submsg_field_count: u32,
    pub(super) required_count: u32,
}

/// Pointer-sized slot: repeated fields store a pointer to an arena-allocated
/// array, map fields a pointer to an arena-allocated map, and sub-message
/// fields a (possibly tagged) pointer (spec.md §3).
const PTR_SIZE: usize = 8;
const PTR_ALIGN: usize = 8;

/// Every instance reserves this much space up front for the runtime's
/// internal bookkeeping (currently: a pointer + length for the unknown-field
/// byte span) before any hasbit or field data, mirroring upb's
/// `upb_Message_Internal` trailer — except placed at the front, since this
/// layout is built bottom-up via `Layout::extend` rather than upb's
/// negative-offset trailer.
pub(crate) const INTERNAL_HEADER_SIZE: usize = 16;
const INTERNAL_HEADER_ALIGN: usize = 8;

pub struct MessageDefBuilder<'b> {
    pub(super) pool: &'b mut DefPoolBuilder,
    pub(super) id: MessageId,
}

impl<'b> MessageDefBuilder<'b> {
    pub fn id(&self) -> MessageId {
        self.id
    }

    pub fn add_field(
        &mut self,
        name: impl Into<String>,
        number: u32,
        label: Label,
        field_type: FieldType,
    ) -> super::FieldDefBuilder<'_> {
        let index_in_parent = self.pool.messages[self.id.0 as usize].fields.len() as u32;
        let field_id = FieldId(self.pool.fields.len() as u32);
        self.pool.fields.push(super::field::FieldDefData {
            name: name.into(),
            number,
            label,
            field_type,
            packed: false,
            subdef: SubDefRef::None,
            is_extension: false,
            is_lazy: false,
            oneof: None,
            index_in_parent,
            message: self.id,
            offset: 0,
            hasbit: -1,
            selector_base: index_in_parent,
        });
        self.pool.messages[self.id.0 as usize].fields.push(field_id);
        super::FieldDefBuilder { pool: self.pool, id: field_id }
    }

    pub fn add_oneof(&mut self, name: impl Into<String>, synthetic: bool) -> OneofId {
        let case_offset = self.pool.messages[self.id.0 as usize].oneofs.len() as u32;
        let oneof_id = OneofId(self.pool.oneofs.len() as u32);
        self.pool.oneofs.push(super::oneof::OneofDefData {
            name: name.into(),
            message: self.id,
            fields: Vec::new(),
            synthetic,
            case_offset,
        });
        self.pool.messages[self.id.0 as usize].oneofs.push(oneof_id);
        oneof_id
    }

    pub fn set_map_entry(&mut self, is_map_entry: bool) -> &mut Self {
        self.pool.messages[self.id.0 as usize].is_map_entry = is_map_entry;
        self
    }

    pub fn add_extension_range(&mut self, start: u32, end: u32) -> &mut Self {
        self.pool.messages[self.id.0 as usize].extension_ranges.push((start, end));
        self
    }
}

/// Whether `field` is presence-tracked via a hasbit (as opposed to a oneof
/// case slot or, for repeated fields, no presence tracking at all).
fn has_hasbit(field: &super::field::FieldDefData) -> bool {
    field.oneof.is_none() && field.label != Label::Repeated
}

/// Computes `offset`/`hasbit`/`selector_base` for every field of `message`
/// and the message's own `instance_size`/`hasbit_bytes`/counts (spec.md
/// §4.D). Runs once per message as part of `DefPoolBuilder::freeze`, after
/// all symbolic subdef references have been resolved (sizes don't depend on
/// subdefs, but `submsg_field_count` does depend on final field types).
pub(super) fn compute_layout(
    messages: &mut [MessageDefData],
    fields: &mut [super::field::FieldDefData],
    oneofs: &mut [super::oneof::OneofDefData],
    message_id: MessageId,
) -> Result<(), DefError> {
    let msg = &messages[message_id.0 as usize];
    let field_ids = msg.fields.clone();
    let oneof_ids = msg.oneofs.clone();

    // Hasbits assigned low-to-high in declaration order (spec.md §4.D).
    let mut next_hasbit = 0u32;
    for &fid in &field_ids {
        if has_hasbit(&fields[fid.0 as usize]) {
            fields[fid.0 as usize].hasbit = next_hasbit as i32;
            next_hasbit += 1;
        }
    }
    let hasbit_words = next_hasbit.div_ceil(32);
    let hasbit_bytes = hasbit_words * 4;

    let header_layout = Layout::from_size_align(INTERNAL_HEADER_SIZE, INTERNAL_HEADER_ALIGN)
        .expect("internal header layout is always valid");
    let hasbit_region = Layout::from_size_align(hasbit_bytes as usize, 4).expect("hasbit region layout is always valid");
    let (mut layout, hasbit_offset) = header_layout.extend(hasbit_region).unwrap();

    // One 4-byte case word per oneof, placed right after the hasbit region.
    if !oneof_ids.is_empty() {
        let oneof_words = Layout::array::<u32>(oneof_ids.len()).expect("oneof case words layout is always valid");
        let (new_layout, base_offset) = layout.extend(oneof_words).unwrap();
        layout = new_layout;
        for (slot, &oid) in oneof_ids.iter().enumerate() {
            oneofs[oid.0 as usize].case_offset = (base_offset + slot * 4) as u32;
        }
    }

    // Oneof member fields share a union slot per oneof, sized to the widest
    // member (mirrors `descriptor_pool.rs`'s `oneof_sizes` computation).
    let mut oneof_slot_layout: Vec<Option<Layout>> = alloc::vec![None; oneof_ids.len()];
    for (slot, &oid) in oneof_ids.iter().enumerate() {
        for &fid in &oneofs[oid.0 as usize].fields {
            let ft = fields[fid.0 as usize].field_type;
            let size = if fields[fid.0 as usize].label == Label::Repeated { PTR_SIZE } else { ft.memory_size() };
            let align = if fields[fid.0 as usize].label == Label::Repeated { PTR_ALIGN } else { ft.memory_align() };
            let candidate = Layout::from_size_align(size, align).unwrap();
            oneof_slot_layout[slot] = Some(match oneof_slot_layout[slot] {
                None => candidate,
                Some(prev) if prev.size() >= candidate.size() => prev,
                Some(_) => candidate,
            });
        }
    }
    let mut oneof_slot_offset: Vec<u32> = alloc::vec![0; oneof_ids.len()];
    for (slot, maybe_layout) in oneof_slot_layout.iter().enumerate() {
        if let Some(l) = maybe_layout {
            let (new_layout, offset) = layout.extend(*l).unwrap();
            layout = new_layout;
            oneof_slot_offset[slot] = offset as u32;
        }
    }

    // Non-oneof fields each get their own slot.
    for &fid in &field_ids {
        let f = &fields[fid.0 as usize];
        if f.oneof.is_some() {
            continue;
        }
        let is_container = f.label == Label::Repeated;
        let (size, align) = if is_container {
            (PTR_SIZE, PTR_ALIGN)
        } else {
            (f.field_type.memory_size(), f.field_type.memory_align())
        };
        let field_layout = Layout::from_size_align(size, align).unwrap();
        let (new_layout, offset) = layout.extend(field_layout).unwrap();
        layout = new_layout;
        fields[fid.0 as usize].offset = offset as u32;
    }
    // Oneof fields all share their oneof's slot offset.
    for (slot, &oid) in oneof_ids.iter().enumerate() {
        for &fid in &oneofs[oid.0 as usize].fields {
            fields[fid.0 as usize].offset = oneof_slot_offset[slot];
        }
    }

    let layout = layout.pad_to_align();
    let msg = &mut messages[message_id.0 as usize];
    msg.instance_size = layout.size() as u32;
    msg.hasbit_bytes = hasbit_bytes;
    msg.hasbit_offset = hasbit_offset as u32;
    msg.submsg_field_count =
        field_ids.iter().filter(|&&fid| matches!(fields[fid.0 as usize].field_type, FieldType::Message | FieldType::Group)).count() as u32;
    msg.required_count = field_ids.iter().filter(|&&fid| fields[fid.0 as usize].label == Label::Required).count() as u32;
    Ok(())
}

#[derive(Clone, Copy)]
pub struct MessageDef<'p> {
    pub(crate) pool: &'p DefPool,
    pub(crate) id: MessageId,
}

impl<'p> MessageDef<'p> {
    fn data(&self) -> &'p MessageDefData {
        &self.pool.messages[self.id.0 as usize]
    }

    pub fn id(&self) -> MessageId {
        self.id
    }

    pub fn full_name(&self) -> &'p str {
        &self.data().full_name
    }

    pub fn syntax(&self) -> Syntax {
        self.data().syntax
    }

    pub fn is_map_entry(&self) -> bool {
        self.data().is_map_entry
    }

    pub fn instance_size(&self) -> u32 {
        self.data().instance_size
    }

    pub fn hasbit_bytes(&self) -> u32 {
        self.data().hasbit_bytes
    }

    /// Byte offset of the hasbit region within an instance (always
    /// [`INTERNAL_HEADER_SIZE`], but kept as a real field rather than a
    /// hardcoded constant so message.rs's runtime code never needs to know
    /// the header's exact size).
    pub fn hasbit_offset(&self) -> u32 {
        self.data().hasbit_offset
    }

    pub fn submsg_field_count(&self) -> u32 {
        self.data().submsg_field_count
    }

    pub fn required_count(&self) -> u32 {
        self.data().required_count
    }

    pub fn extension_ranges(&self) -> &'p [(u32, u32)] {
        &self.data().extension_ranges
    }

    /// A field number decoded as unknown additionally gets checked against
    /// this, so the symbol table can register an extension and re-parse the
    /// unknown span later without a separate registry type in the core.
    pub fn number_is_extension_range(&self, number: u32) -> bool {
        self.extension_ranges().iter().any(|&(lo, hi)| number >= lo && number < hi)
    }

    pub fn fields(&self) -> impl Iterator<Item = super::FieldDef<'p>> + 'p {
        let pool = self.pool;
        self.data().fields.iter().map(move |&id| super::FieldDef { pool, id })
    }

    pub fn field_by_number(&self, number: u32) -> Option<super::FieldDef<'p>> {
        self.fields().find(|f| f.number() == number)
    }

    pub fn field_by_name(&self, name: &str) -> Option<super::FieldDef<'p>> {
        self.fields().find(|f| f.name() == name)
    }

    pub fn oneofs(&self) -> impl Iterator<Item = super::OneofDef<'p>> + 'p {
        let pool = self.pool;
        self.data().oneofs.iter().map(move |&id| super::OneofDef { pool, id })
    }

    pub fn file(&self) -> super::FileDef<'p> {
        super::FileDef { pool: self.pool, id: self.data().file }
    }
}

impl core::fmt::Debug for MessageDef<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MessageDef")
            .field("full_name", &self.full_name())
            .field("instance_size", &self.instance_size())
            .finish()
    }
}
