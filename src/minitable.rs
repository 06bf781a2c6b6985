//! Mini-table (component E): the decoder's compact, flat view of a frozen
//! [`crate::schema::MessageDef`].
//!
//! Grounded in `descriptor_pool.rs`'s `Table`/`TableEntry` (a packed `u32`
//! carrying kind/hasbit/offset) and `decoding.rs`'s `TableEntry::new`/`kind`/
//! `offset` accessors: [`MiniTableField`] is the same idea generalized from
//! the teacher's fixed field-kind enum to the full schema-driven field
//! descriptor spec.md §3 asks for (mode, presence, type, submsg index).
//! `fasttable` construction follows spec.md §4.E's four numbered steps.

extern crate alloc;
use alloc::vec::Vec;

use crate::schema::{FieldDef, FieldType, Label, MessageDef};
use crate::wire::{make_tag, WireType};

/// How a field's bytes are found at decode time: a single scalar slot, a
/// `upb_Array`-style repeated slot, or a map slot (mirrors spec.md §3's
/// "mode (scalar/array/map)").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldMode {
    Scalar,
    Array,
    Map,
}

/// A field's presence tracking: a hasbit index, a oneof case-slot byte
/// offset (set to the field number when that member is active), or none
/// (repeated fields have no presence bit).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    None,
    Hasbit(u32),
    OneofCase { case_offset: u32 },
}

/// One row of the mini-table's `fields[]` (spec.md §3 "Mini-table"): field
/// number, presence, offset, mode, type, and an index into `subs[]` for
/// message/group/enum fields.
#[derive(Debug, Clone, Copy)]
pub struct MiniTableField {
    pub number: u32,
    pub offset: u32,
    pub presence: Presence,
    pub mode: FieldMode,
    pub field_type: FieldType,
    pub packed: bool,
    /// `Some(i)` indexes `MiniTable::subs()[i]` for message/group/enum types.
    pub sub_index: Option<u32>,
}

/// An entry in `subs[]`: a handle to the sub-message's own mini-table
/// (lazily resolved by the caller, since the sub's mini-table itself may
/// not exist yet — see [`MiniTable::sub_message`]) or an enum def.
#[derive(Clone, Copy)]
pub enum SubEntry<'p> {
    Message(MessageDef<'p>),
    Enum(crate::schema::EnumDef<'p>),
}

/// Packed 64-bit fast-path function-data record (spec.md §4.E step 3):
/// `offset:16 | oneof_case_offset:16 | presence:8 | aux:8 | expected_tag:16`.
/// A field that doesn't fit any of these widths is skipped from the fast
/// table entirely (falls back to the mini-table decoder, same idea as
/// `TableEntry`'s packed-`u32` fields in `descriptor_pool.rs` but one tier
/// wider since the fast path also needs the raw expected tag for its
/// one-branch tag check).
///
/// The `aux` byte does double duty depending on `func`: for
/// [`FastFunc::SubMessage`] it's an index into `subs[]` ([`Self::submsg_index`]);
/// for every other variant the sub index is meaningless (no subdef), so
/// `crate::fastdecode` instead packs the field's [`crate::schema::FieldType`]
/// there ([`Self::type_code`]) — cheaper than growing this record past 64
/// bits just to carry a tag neither use needs at the same time.
#[derive(Debug, Clone, Copy)]
pub struct FastFuncData(pub u64);

impl FastFuncData {
    fn pack(offset: u16, presence_field: u16, presence_kind: u8, submsg_index: u8, expected_tag: u16) -> Self {
        let v = (offset as u64)
            | (presence_field as u64) << 16
            | (presence_kind as u64) << 32
            | (submsg_index as u64) << 40
            | (expected_tag as u64) << 48;
        FastFuncData(v)
    }

    pub fn offset(self) -> u16 {
        self.0 as u16
    }

    pub fn presence_field(self) -> u16 {
        (self.0 >> 16) as u16
    }

    pub fn presence_kind(self) -> u8 {
        (self.0 >> 32) as u8
    }

    pub fn submsg_index(self) -> u8 {
        (self.0 >> 40) as u8
    }

    /// Reads the `aux` byte as a packed [`crate::schema::FieldType`]
    /// discriminant. Only meaningful for non-[`FastFunc::SubMessage`] funcs
    /// (see the type's doc comment); the fast-path dispatcher is the only
    /// caller, and only ever calls this for such a slot.
    pub fn type_code(self) -> u8 {
        (self.0 >> 40) as u8
    }

    pub fn expected_tag(self) -> u16 {
        (self.0 >> 48) as u16
    }
}

/// Which fast-path specialized shape a field matches, selected from
/// (type, cardinality, tag-size) per spec.md §4.E step 2. `crate::fastdecode`
/// matches on this to run the specialized inline parse; anything not
/// covered here never gets a fast slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FastFunc {
    Varint,
    Fixed32,
    Fixed64,
    StringView,
    SubMessage,
    RepeatedVarint,
    RepeatedFixed32,
    RepeatedFixed64,
    RepeatedStringView,
}

#[derive(Debug, Clone, Copy)]
pub struct FastTableSlot {
    pub func: Option<FastFunc>,
    pub data: FastFuncData,
}

impl FastTableSlot {
    const EMPTY: FastTableSlot = FastTableSlot { func: None, data: FastFuncData(0) };
}

/// Number of fasttable slots (spec.md §4.E: "`fasttable[32]`").
const FASTTABLE_SIZE: usize = 32;

/// The decoder's compact, flat view of `message` (spec.md §3 "Mini-table").
///
/// `MiniTable::build` is cheap relative to a full decode but is not free:
/// `subs[]` holds the sub-message/map-entry/group's [`MessageDef`], not a
/// cached table, so every occurrence of a sub-message during decode or
/// encode calls `MiniTable::build` again for it (see the call sites in
/// `decode.rs`, `fastdecode.rs`, and `encode.rs`). A schema with deep
/// nesting or highly repeated sub-messages rebuilds the same fasttable once
/// per occurrence rather than once per type.
pub struct MiniTable<'p> {
    message: MessageDef<'p>,
    fields: Vec<MiniTableField>,
    subs: Vec<SubEntry<'p>>,
    fasttable: [FastTableSlot; FASTTABLE_SIZE],
    table_mask: u8,
    /// Number of leading fields (by field number 1, 2, 3, ...) covered by a
    /// dense, directly-indexed prefix before the decoder falls back to a
    /// linear/binary search over `fields[]` (spec.md §3 "dense_below").
    dense_below: u32,
}

impl<'p> MiniTable<'p> {
    /// Builds a mini-table from a frozen `MessageDef` (spec.md §4.E).
    pub fn build(message: MessageDef<'p>) -> Self {
        let mut fields = Vec::with_capacity(message.fields().count());
        let mut subs = Vec::new();

        for field in message.fields() {
            let mode = if field.is_repeated() {
                FieldMode::Array
            } else if field.message_subdef().is_some_and(|m| m.is_map_entry()) {
                FieldMode::Map
            } else {
                FieldMode::Scalar
            };
            let presence = if let Some(oneof) = field.oneof() {
                Presence::OneofCase { case_offset: oneof.case_offset() }
            } else if let Some(idx) = field.hasbit_index() {
                Presence::Hasbit(idx)
            } else {
                Presence::None
            };
            let sub_index = if field.field_type().has_subdef() {
                let entry = if let Some(m) = field.message_subdef() {
                    SubEntry::Message(m)
                } else if let Some(e) = field.enum_subdef() {
                    SubEntry::Enum(e)
                } else {
                    // Symbol resolution guarantees one of the two at freeze
                    // time; unreachable for a genuinely frozen `MessageDef`.
                    unreachable!("subdef-requiring field without a resolved subdef")
                };
                subs.push(entry);
                Some((subs.len() - 1) as u32)
            } else {
                None
            };
            fields.push(MiniTableField {
                number: field.number(),
                offset: field.offset(),
                presence,
                mode,
                field_type: field.field_type(),
                packed: field.packed(),
                sub_index,
            });
        }

        fields.sort_by_key(|f| f.number);
        let dense_below = fields
            .iter()
            .enumerate()
            .take_while(|(i, f)| f.number == (i + 1) as u32)
            .count() as u32;

        let (fasttable, table_mask) = build_fasttable(&fields);

        MiniTable { message, fields, subs, fasttable, table_mask, dense_below }
    }

    pub fn message(&self) -> MessageDef<'p> {
        self.message
    }

    pub fn fields(&self) -> &[MiniTableField] {
        &self.fields
    }

    pub fn subs(&self) -> &[SubEntry<'p>] {
        &self.subs
    }

    pub fn dense_below(&self) -> u32 {
        self.dense_below
    }

    pub fn required_count(&self) -> u32 {
        self.message.required_count()
    }

    pub fn submsg_field_count(&self) -> u32 {
        self.message.submsg_field_count()
    }

    /// Looks up a field row by number: a direct index for the dense prefix,
    /// else a linear scan of the remainder (spec.md §4.I step 2: "the
    /// encoded field number is searched in the `field_numbers` table").
    /// Fields are few enough per message that a linear scan beats a binary
    /// search's branch overhead for the common case; this mirrors the
    /// teacher's own `Table::entry` dense-prefix shortcut in
    /// `descriptor_pool.rs`.
    pub fn field_by_number(&self, number: u32) -> Option<&MiniTableField> {
        if number >= 1 && number <= self.dense_below {
            return self.fields.get((number - 1) as usize);
        }
        self.fields[self.dense_below as usize..].iter().find(|f| f.number == number)
    }

    /// Resolves a message-typed field's sub-mini-table lazily: the caller
    /// passes a `build` closure (typically a cache keyed by `MessageId`) so
    /// mutually-recursive message types don't require building every
    /// mini-table in a schema up front.
    pub fn sub_message(&self, sub_index: u32) -> Option<MessageDef<'p>> {
        match self.subs.get(sub_index as usize)? {
            SubEntry::Message(m) => Some(*m),
            SubEntry::Enum(_) => None,
        }
    }

    pub fn sub_enum(&self, sub_index: u32) -> Option<crate::schema::EnumDef<'p>> {
        match self.subs.get(sub_index as usize)? {
            SubEntry::Enum(e) => Some(*e),
            SubEntry::Message(_) => None,
        }
    }

    pub fn fasttable(&self) -> &[FastTableSlot; FASTTABLE_SIZE] {
        &self.fasttable
    }

    pub fn table_mask(&self) -> u8 {
        self.table_mask
    }
}

/// (type, cardinality, tag-size) → fast function, or `None` if the
/// combination has no fast-path specialization (spec.md §4.E step 2: "Some
/// combinations are not implemented in the fast path and are skipped").
fn fast_func_for(field: &MiniTableField, packed_inline: bool) -> Option<FastFunc> {
    use FieldMode::*;
    let wt = field.field_type.wire_type();
    match (field.mode, wt, packed_inline) {
        (Scalar, WireType::Varint, _) => Some(FastFunc::Varint),
        (Scalar, WireType::Fixed32, _) => Some(FastFunc::Fixed32),
        (Scalar, WireType::Fixed64, _) => Some(FastFunc::Fixed64),
        (Scalar, WireType::LengthDelimited, _) if field.field_type.has_subdef() => Some(FastFunc::SubMessage),
        (Scalar, WireType::LengthDelimited, _) => Some(FastFunc::StringView),
        // Packed repeated scalars still arrive on the wire as a single
        // length-delimited record; the fast path only specializes the
        // common *unpacked* repeated shape and defers packed parsing to the
        // mini-table decoder.
        (Array, WireType::Varint, false) => Some(FastFunc::RepeatedVarint),
        (Array, WireType::Fixed32, false) => Some(FastFunc::RepeatedFixed32),
        (Array, WireType::Fixed64, false) => Some(FastFunc::RepeatedFixed64),
        (Array, WireType::LengthDelimited, false) if !field.field_type.has_subdef() => {
            Some(FastFunc::RepeatedStringView)
        }
        _ => None,
    }
}

fn build_fasttable(fields: &[MiniTableField]) -> ([FastTableSlot; FASTTABLE_SIZE], u8) {
    let mut table = [FastTableSlot::EMPTY; FASTTABLE_SIZE];
    let mut any_placed = false;

    for field in fields {
        // Step 1: encoded tag, skip field numbers too large for a 1/2-byte
        // tag (> 2047, spec.md §4.E step 1).
        if field.number > 2047 {
            continue;
        }
        let wt = field.field_type.wire_type() as u8;
        let encoded_tag = make_tag(field.number, wt);
        let tag_size = if encoded_tag < 128 { 1 } else { 2 };
        let expected_tag: u16 = match u16::try_from(encoded_tag) {
            Ok(v) => v,
            Err(_) => continue,
        };

        let func = match fast_func_for(field, field.packed) {
            Some(f) => f,
            None => continue,
        };
        let _ = tag_size; // selects `func` variant above; kept for clarity.

        // Step 3: pack the function-data record; skip on overflow.
        let Ok(offset) = u16::try_from(field.offset) else { continue };
        let (presence_kind, presence_field): (u8, u16) = match field.presence {
            Presence::None => (0, 0),
            Presence::Hasbit(idx) => match u16::try_from(idx) {
                Ok(v) => (1, v),
                Err(_) => continue,
            },
            Presence::OneofCase { case_offset } => match u16::try_from(case_offset) {
                Ok(v) => (2, v),
                Err(_) => continue,
            },
        };
        // `aux`: a subs[] index for FastFunc::SubMessage (the only variant
        // that needs one), else the field's own type code so the fast-path
        // dispatcher can pick the right width/zigzag handling without a
        // second `fields[]` lookup.
        let aux = if func == FastFunc::SubMessage {
            match field.sub_index {
                Some(i) => match u8::try_from(i) {
                    Ok(v) => v,
                    Err(_) => continue,
                },
                None => continue,
            }
        } else {
            field.field_type as u8
        };
        let data = FastFuncData::pack(offset, presence_field, presence_kind, aux, expected_tag);

        // Step 4: claim the slot if free.
        let slot = ((encoded_tag & 0xf8) >> 3) as usize % FASTTABLE_SIZE;
        if table[slot].func.is_none() {
            table[slot] = FastTableSlot { func: Some(func), data };
            any_placed = true;
        }
    }

    let table_mask = if any_placed { ((FASTTABLE_SIZE as u8) - 1) << 3 } else { 0xff };
    (table, table_mask)
}

/// Whether `field_type`/`label` pair is consistent with `mode` — used by
/// tests and by `crate::decode`'s negative-scenario checks rather than the
/// builder itself (a well-formed `MessageDef` can't produce a contradiction).
pub fn mode_of(label: Label) -> FieldMode {
    if label == Label::Repeated {
        FieldMode::Array
    } else {
        FieldMode::Scalar
    }
}
