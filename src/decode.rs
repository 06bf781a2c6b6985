//! Mini-table decoder (component I): the general-purpose decode loop that
//! interprets a [`crate::minitable::MiniTable`] against an
//! [`crate::wire::EpsCopyInputStream`], writing into an arena-backed
//! [`crate::message::Message`].
//!
//! Grounded in `decoding.rs`'s `DecodeObjectState`/field-kind dispatch shape
//! (read tag → look up table entry → dispatch by kind → write through the
//! object's offset), generalized from the teacher's fixed `FieldKind` enum
//! driven by codegen'd tables to this crate's schema-interpreted
//! `MiniTableField`s. `crate::fastdecode` consults the same mini-table's
//! `fasttable` before falling into the generic loop here, per spec.md
//! §4.I/§4.J's two-tier design.

extern crate alloc;
use alloc::vec::Vec;

use crate::arena::Arena;
use crate::error::DecodeStatus;
use crate::message::{Message, StrView};
use crate::minitable::{FieldMode, MiniTable, Presence};
use crate::schema::{FieldType, Label};
use crate::wire::{self, EpsCopyInputStream, WireType};

/// Decode options bitmask (spec.md §6 "Options / configuration").
#[derive(Debug, Clone, Copy)]
pub struct DecodeOptions {
    bits: u16,
    max_depth: u16,
}

const ALIAS_STRING: u16 = 1 << 0;
const CHECK_REQUIRED: u16 = 1 << 1;
const EXPERIMENTAL_ALLOW_UNLINKED: u16 = 1 << 2;
const ALWAYS_VALIDATE_UTF8: u16 = 1 << 3;
/// Forces `decode()` through the general-purpose mini-table loop even when a
/// fast slot would otherwise apply (spec.md §4.I: component I is "forceable"
/// independent of the fast path). Mainly exists so a caller — typically a
/// test or benchmark — can decode the same bytes both ways and assert
/// the results agree (spec.md §8 "fast-path/mini-table equivalence").
const FORCE_MINITABLE: u16 = 1 << 4;

impl DecodeOptions {
    pub const DEFAULT_MAX_DEPTH: u16 = 100;

    pub const fn new() -> Self {
        DecodeOptions { bits: 0, max_depth: Self::DEFAULT_MAX_DEPTH }
    }

    pub const fn alias_string(mut self, v: bool) -> Self {
        self.bits = if v { self.bits | ALIAS_STRING } else { self.bits & !ALIAS_STRING };
        self
    }

    pub const fn check_required(mut self, v: bool) -> Self {
        self.bits = if v { self.bits | CHECK_REQUIRED } else { self.bits & !CHECK_REQUIRED };
        self
    }

    pub const fn allow_unlinked(mut self, v: bool) -> Self {
        self.bits =
            if v { self.bits | EXPERIMENTAL_ALLOW_UNLINKED } else { self.bits & !EXPERIMENTAL_ALLOW_UNLINKED };
        self
    }

    pub const fn always_validate_utf8(mut self, v: bool) -> Self {
        self.bits = if v { self.bits | ALWAYS_VALIDATE_UTF8 } else { self.bits & !ALWAYS_VALIDATE_UTF8 };
        self
    }

    pub const fn max_depth(mut self, n: u16) -> Self {
        self.max_depth = n;
        self
    }

    pub const fn force_mini_table(mut self, v: bool) -> Self {
        self.bits = if v { self.bits | FORCE_MINITABLE } else { self.bits & !FORCE_MINITABLE };
        self
    }

    fn has(self, flag: u16) -> bool {
        self.bits & flag != 0
    }

    pub(crate) fn flag_alias_string(self) -> bool {
        self.has(ALIAS_STRING)
    }

    pub(crate) fn flag_check_required(self) -> bool {
        self.has(CHECK_REQUIRED)
    }

    pub(crate) fn flag_allow_unlinked(self) -> bool {
        self.has(EXPERIMENTAL_ALLOW_UNLINKED)
    }

    pub(crate) fn flag_always_validate_utf8(self) -> bool {
        self.has(ALWAYS_VALIDATE_UTF8)
    }

    pub(crate) fn flag_force_mini_table(self) -> bool {
        self.has(FORCE_MINITABLE)
    }

    pub(crate) fn max_depth_limit(self) -> u16 {
        self.max_depth
    }
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Entry point (spec.md §4.I: `upb_Decode(buf, size, msg, mini_table,
/// extreg, options, arena) → status`). Extension registries are out of
/// scope here (reflection-level concern, spec.md §1 Non-goals); unknown
/// extension fields are simply captured like any other unknown field.
pub fn decode(buf: &[u8], msg: &mut Message, table: &MiniTable<'_>, arena: &Arena<'_>, options: DecodeOptions) -> DecodeStatus {
    let mut stream = EpsCopyInputStream::new(buf);
    let status = if options.flag_force_mini_table() {
        decode_message(&mut stream, msg, table, arena, options, 0, None)
    } else {
        crate::fastdecode::decode_message_fast(&mut stream, msg, table, arena, options, 0, None)
    };
    if !status.is_ok() {
        return status;
    }
    if stream.is_error() {
        return DecodeStatus::Malformed;
    }
    if options.flag_check_required() {
        return check_required(msg, table);
    }
    DecodeStatus::Ok
}

/// Recursively verifies that every required field's hasbit is set,
/// descending into every linked sub-message reachable from `msg` (spec.md
/// §4.I "Required-fields check").
fn check_required(msg: &Message, table: &MiniTable<'_>) -> DecodeStatus {
    let message_def = table.message();
    if table.required_count() > 0 {
        for field_def in message_def.fields() {
            if field_def.label() == Label::Required {
                if let Some(idx) = field_def.hasbit_index() {
                    if !msg.hasbit(message_def.hasbit_offset(), idx) {
                        return DecodeStatus::MissingRequired;
                    }
                }
            }
        }
    }
    if table.submsg_field_count() > 0 {
        for field in table.fields() {
            if field.field_type != FieldType::Message && field.field_type != FieldType::Group {
                continue;
            }
            let Some(sub_index) = field.sub_index else { continue };
            let Some(sub_def) = table.sub_message(sub_index) else { continue };
            let sub_table = MiniTable::build(sub_def);
            match field.mode {
                FieldMode::Scalar => {
                    if let Some(crate::message::SubMessage::Linked(p)) = msg.sub_message(field.offset).get() {
                        let status = check_required(unsafe { p.as_ref() }, &sub_table);
                        if !status.is_ok() {
                            return status;
                        }
                    }
                }
                FieldMode::Array => {
                    if let Some(arr) = msg.array_ptr(field.offset) {
                        let arr = unsafe { arr.as_ref() };
                        for ptr in arr.as_typed_slice::<*mut Message>() {
                            let status = check_required(unsafe { &**ptr }, &sub_table);
                            if !status.is_ok() {
                                return status;
                            }
                        }
                    }
                }
                FieldMode::Map => {}
            }
        }
    }
    DecodeStatus::Ok
}

/// The main per-message loop (spec.md §4.I steps 1-5). `group_number` is
/// `Some(n)` while decoding the body of a group started by field `n`;
/// encountering its matching end-group tag returns normally instead of
/// erroring.
///
/// `crate::fastdecode::decode_message_fast` runs the same loop shape but
/// tries a 32-slot fasttable lookup before falling back to
/// [`decode_one_field`] for anything that doesn't match — this function
/// never itself consults the fasttable, so a field that falls off the fast
/// path the decoder never climbs back onto it for the rest of that message
/// (matching upb's own generic-decoder-takes-over-for-good behavior once the
/// fast path misses).
pub(crate) fn decode_message(
    stream: &mut EpsCopyInputStream<'_>,
    msg: &mut Message,
    table: &MiniTable<'_>,
    arena: &Arena<'_>,
    options: DecodeOptions,
    depth: u16,
    group_number: Option<u32>,
) -> DecodeStatus {
    if depth > options.max_depth_limit() {
        return DecodeStatus::MaxDepthExceeded;
    }
    loop {
        if stream.is_done() {
            return if group_number.is_some() { DecodeStatus::Malformed } else { DecodeStatus::Ok };
        }
        let tag_start = stream.position();
        let Some(tag) = stream.read_tag() else { return DecodeStatus::Malformed };
        match decode_one_field(stream, msg, table, arena, options, depth, group_number, tag_start, tag) {
            FieldOutcome::Continue => continue,
            FieldOutcome::Done(status) => return status,
        }
    }
}

/// Result of processing one already-tagged field: either the caller's loop
/// should read another tag, or decoding of this message is finished (cleanly
/// or with an error). Shared between [`decode_message`] and
/// `crate::fastdecode::decode_message_fast`'s per-field fallback so both
/// tiers dispatch a miscellaneous/unknown/nested field identically.
pub(crate) enum FieldOutcome {
    Continue,
    Done(DecodeStatus),
}

/// Processes one field whose tag (`tag`, starting at byte `tag_start`) has
/// already been consumed from `stream` (spec.md §4.I steps 2-5): end-group
/// detection, unknown-field capture, and dispatch through the mini-table row
/// for `tag`'s field number.
pub(crate) fn decode_one_field(
    stream: &mut EpsCopyInputStream<'_>,
    msg: &mut Message,
    table: &MiniTable<'_>,
    arena: &Arena<'_>,
    options: DecodeOptions,
    depth: u16,
    group_number: Option<u32>,
    tag_start: usize,
    tag: u64,
) -> FieldOutcome {
    let (field_number, wt_raw) = wire::split_tag(tag);
    let Some(wire_type) = WireType::from_u8(wt_raw) else { return FieldOutcome::Done(DecodeStatus::Malformed) };

    if wire_type == WireType::EndGroup {
        return FieldOutcome::Done(match group_number {
            Some(n) if n == field_number => DecodeStatus::Ok,
            _ => DecodeStatus::Malformed,
        });
    }

    let Some(field) = table.field_by_number(field_number).copied() else {
        if !skip_field(stream, wire_type, field_number, depth, options) {
            return FieldOutcome::Done(DecodeStatus::Malformed);
        }
        let end = stream.position();
        if let Err(_) = msg.append_unknown(arena, &stream.raw_buf()[tag_start..end]) {
            return FieldOutcome::Done(DecodeStatus::OutOfMemory);
        }
        return FieldOutcome::Continue;
    };

    let status = dispatch_field(stream, msg, table, arena, options, depth, &field, wire_type, tag_start);
    if !status.is_ok() {
        return FieldOutcome::Done(status);
    }
    FieldOutcome::Continue
}

/// Skips a field whose value doesn't match any mini-table row, per its
/// wire type (spec.md §4.H "Skipping a field").
pub(crate) fn skip_field(stream: &mut EpsCopyInputStream<'_>, wire_type: WireType, field_number: u32, depth: u16, options: DecodeOptions) -> bool {
    match wire_type {
        WireType::Varint => stream.read_varint().is_some(),
        WireType::Fixed32 => stream.read_fixed32().is_some(),
        WireType::Fixed64 => stream.read_fixed64().is_some(),
        WireType::LengthDelimited => {
            let Some(size) = stream.read_size() else { return false };
            if !stream.check_size(size) {
                return false;
            }
            stream.skip(size as usize).is_some()
        }
        WireType::StartGroup => {
            if depth + 1 > options.max_depth {
                return false;
            }
            loop {
                if stream.is_done() {
                    return false;
                }
                let Some(inner_tag) = stream.read_tag() else { return false };
                let (inner_number, inner_wt) = wire::split_tag(inner_tag);
                let Some(inner_wt) = WireType::from_u8(inner_wt) else { return false };
                if inner_wt == WireType::EndGroup {
                    return inner_number == field_number;
                }
                if !skip_field(stream, inner_wt, inner_number, depth + 1, options) {
                    return false;
                }
            }
        }
        WireType::EndGroup => false,
    }
}

pub(crate) fn dispatch_field(
    stream: &mut EpsCopyInputStream<'_>,
    msg: &mut Message,
    table: &MiniTable<'_>,
    arena: &Arena<'_>,
    options: DecodeOptions,
    depth: u16,
    field: &crate::minitable::MiniTableField,
    wire_type: WireType,
    tag_start: usize,
) -> DecodeStatus {
    use crate::minitable::MiniTableField;

    let set_presence = |msg: &mut Message, table: &MiniTable<'_>, field: &MiniTableField| match field.presence {
        Presence::Hasbit(idx) => msg.set_hasbit(table.message().hasbit_offset(), idx),
        Presence::OneofCase { case_offset } => msg.set_oneof_case(case_offset, field.number),
        Presence::None => {}
    };

    match field.mode {
        FieldMode::Scalar => match field.field_type {
            FieldType::Message | FieldType::Group => {
                decode_submessage_scalar(stream, msg, table, arena, options, depth, field, wire_type)
            }
            FieldType::String | FieldType::Bytes => {
                if wire_type != WireType::LengthDelimited {
                    return DecodeStatus::Malformed;
                }
                match decode_string_view(stream, arena, field.field_type, table, options) {
                    Ok(view) => {
                        msg.set_string_view(field.offset, view);
                        set_presence(msg, table, field);
                        DecodeStatus::Ok
                    }
                    Err(status) => status,
                }
            }
            _ => {
                if wire_type != field.field_type.wire_type() {
                    return DecodeStatus::Malformed;
                }
                match read_scalar(stream, field.field_type) {
                    Some(Scalar::U32(v)) => msg.set(field.offset, v),
                    Some(Scalar::U64(v)) => msg.set(field.offset, v),
                    Some(Scalar::F32(v)) => msg.set(field.offset, v),
                    Some(Scalar::F64(v)) => msg.set(field.offset, v),
                    Some(Scalar::Bool(v)) => msg.set(field.offset, v),
                    None => return DecodeStatus::Malformed,
                }
                set_presence(msg, table, field);
                DecodeStatus::Ok
            }
        },
        FieldMode::Array => decode_repeated(stream, msg, table, arena, options, depth, field, wire_type),
        FieldMode::Map => decode_map_entry(stream, msg, table, arena, options, depth, field, wire_type, tag_start),
    }
}

pub(crate) enum Scalar {
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    Bool(bool),
}

pub(crate) fn read_scalar(stream: &mut EpsCopyInputStream<'_>, ty: FieldType) -> Option<Scalar> {
    Some(match ty {
        FieldType::Bool => Scalar::Bool(stream.read_varint()? != 0),
        FieldType::Int32 | FieldType::Uint32 | FieldType::Enum => Scalar::U32(stream.read_varint()? as u32),
        FieldType::Sint32 => Scalar::U32(wire::zigzag_decode_32(stream.read_varint()? as u32) as u32),
        FieldType::Int64 | FieldType::Uint64 => Scalar::U64(stream.read_varint()?),
        FieldType::Sint64 => Scalar::U64(wire::zigzag_decode_64(stream.read_varint()?) as u64),
        FieldType::Fixed32 | FieldType::Sfixed32 => Scalar::U32(stream.read_fixed32()?),
        FieldType::Fixed64 | FieldType::Sfixed64 => Scalar::U64(stream.read_fixed64()?),
        FieldType::Float => Scalar::F32(f32::from_bits(stream.read_fixed32()?)),
        FieldType::Double => Scalar::F64(f64::from_bits(stream.read_fixed64()?)),
        FieldType::String | FieldType::Bytes | FieldType::Message | FieldType::Group => return None,
    })
}

pub(crate) fn decode_string_view(
    stream: &mut EpsCopyInputStream<'_>,
    arena: &Arena<'_>,
    ty: FieldType,
    table: &MiniTable<'_>,
    options: DecodeOptions,
) -> Result<StrView, DecodeStatus> {
    let size = stream.read_size().ok_or(DecodeStatus::Malformed)?;
    if !stream.check_size(size) {
        return Err(DecodeStatus::Malformed);
    }
    let bytes = stream.read_string_aliased(size as usize).ok_or(DecodeStatus::Malformed)?;

    let must_validate = ty == FieldType::String
        && (options.has(ALWAYS_VALIDATE_UTF8) || table.message().syntax() == crate::schema::Syntax::Proto3);
    if must_validate && core::str::from_utf8(bytes).is_err() {
        return Err(DecodeStatus::BadUtf8);
    }

    if options.has(ALIAS_STRING) {
        Ok(StrView::new(bytes))
    } else {
        let copy = arena_copy(arena, bytes).map_err(|_| DecodeStatus::OutOfMemory)?;
        Ok(StrView::new(copy))
    }
}

fn arena_copy<'a>(arena: &Arena<'a>, bytes: &[u8]) -> Result<&'a [u8], crate::error::ArenaError> {
    if bytes.is_empty() {
        return Ok(&[]);
    }
    let ptr = arena.alloc_raw(core::alloc::Layout::from_size_align(bytes.len(), 1).unwrap())?;
    unsafe {
        core::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.as_ptr(), bytes.len());
        Ok(core::slice::from_raw_parts(ptr.as_ptr(), bytes.len()))
    }
}

pub(crate) fn decode_submessage_scalar(
    stream: &mut EpsCopyInputStream<'_>,
    msg: &mut Message,
    table: &MiniTable<'_>,
    arena: &Arena<'_>,
    options: DecodeOptions,
    depth: u16,
    field: &crate::minitable::MiniTableField,
    wire_type: WireType,
) -> DecodeStatus {
    let Some(sub_index) = field.sub_index else { return DecodeStatus::Malformed };
    let Some(sub_def) = table.sub_message(sub_index) else {
        if !options.has(EXPERIMENTAL_ALLOW_UNLINKED) {
            return DecodeStatus::UnlinkedSubMessage;
        }
        return decode_unlinked(stream, msg, arena, field, wire_type, depth, options);
    };

    let sub_table = MiniTable::build(sub_def);
    let child = match msg.get_or_create_sub_message(arena, field.offset, sub_def.instance_size()) {
        Ok(p) => p,
        Err(_) => return DecodeStatus::OutOfMemory,
    };
    let child_ref = unsafe { &mut *child.as_ptr() };

    let status = if wire_type == WireType::StartGroup {
        decode_message(stream, child_ref, &sub_table, arena, options, depth + 1, Some(field.number))
    } else {
        let size = match stream.read_size() {
            Some(s) => s,
            None => return DecodeStatus::Malformed,
        };
        let Some(delta) = stream.push_limit(size) else { return DecodeStatus::Malformed };
        let inner = decode_message(stream, child_ref, &sub_table, arena, options, depth + 1, None);
        if inner.is_ok() && !stream.is_done() {
            return DecodeStatus::Malformed;
        }
        stream.pop_limit(delta);
        inner
    };
    if status.is_ok() {
        if let Presence::OneofCase { case_offset } = field.presence {
            msg.set_oneof_case(case_offset, field.number);
        }
    }
    status
}

fn decode_unlinked(
    stream: &mut EpsCopyInputStream<'_>,
    msg: &mut Message,
    arena: &Arena<'_>,
    field: &crate::minitable::MiniTableField,
    wire_type: WireType,
    depth: u16,
    options: DecodeOptions,
) -> DecodeStatus {
    // Opaque message: every byte of its body becomes unknown data on a
    // minimal zero-field placeholder (spec.md §4.I "Unknown sub-messages").
    let child = match crate::message::Message::new_in(arena, crate::schema::INTERNAL_HEADER_SIZE as u32) {
        Ok(c) => c,
        Err(_) => return DecodeStatus::OutOfMemory,
    };
    let start = stream.position();
    let ok = if wire_type == WireType::StartGroup {
        skip_field(stream, wire_type, field.number, depth, options)
    } else {
        match stream.read_size() {
            Some(size) if stream.check_size(size) => stream.skip(size as usize).is_some(),
            _ => false,
        }
    };
    if !ok {
        return DecodeStatus::Malformed;
    }
    let end = stream.position();
    if child.append_unknown(arena, &stream.raw_buf()[start..end]).is_err() {
        return DecodeStatus::OutOfMemory;
    }
    let ptr = core::ptr::NonNull::from(child);
    msg.set_sub_message(field.offset, crate::message::SubMessagePtr::unlinked(ptr));
    DecodeStatus::Ok
}

fn decode_repeated(
    stream: &mut EpsCopyInputStream<'_>,
    msg: &mut Message,
    table: &MiniTable<'_>,
    arena: &Arena<'_>,
    options: DecodeOptions,
    depth: u16,
    field: &crate::minitable::MiniTableField,
    wire_type: WireType,
) -> DecodeStatus {
    match field.field_type {
        FieldType::Message | FieldType::Group => {
            let Some(sub_index) = field.sub_index else { return DecodeStatus::Malformed };
            let Some(sub_def) = table.sub_message(sub_index) else {
                return if options.has(EXPERIMENTAL_ALLOW_UNLINKED) {
                    decode_unlinked_repeated(stream, msg, arena, field, wire_type, depth, options)
                } else {
                    DecodeStatus::UnlinkedSubMessage
                };
            };
            let sub_table = MiniTable::build(sub_def);
            let child = match crate::message::Message::new_in(arena, sub_def.instance_size()) {
                Ok(c) => c,
                Err(_) => return DecodeStatus::OutOfMemory,
            };
            let status = if wire_type == WireType::StartGroup {
                decode_message(stream, child, &sub_table, arena, options, depth + 1, Some(field.number))
            } else {
                let size = match stream.read_size() {
                    Some(s) => s,
                    None => return DecodeStatus::Malformed,
                };
                let Some(delta) = stream.push_limit(size) else { return DecodeStatus::Malformed };
                let status = decode_message(stream, child, &sub_table, arena, options, depth + 1, None);
                stream.pop_limit(delta);
                status
            };
            if !status.is_ok() {
                return status;
            }
            let arr = match msg.get_or_create_array(arena, field.offset, 3) {
                Ok(a) => a,
                Err(_) => return DecodeStatus::OutOfMemory,
            };
            let ptr: *mut Message = child;
            if arr.push(arena, ptr).is_err() {
                return DecodeStatus::OutOfMemory;
            }
            DecodeStatus::Ok
        }
        FieldType::String | FieldType::Bytes => {
            if wire_type != WireType::LengthDelimited {
                return DecodeStatus::Malformed;
            }
            let view = match decode_string_view(stream, arena, field.field_type, table, options) {
                Ok(v) => v,
                Err(status) => return status,
            };
            let arr = match msg.get_or_create_array(arena, field.offset, 4) {
                Ok(a) => a,
                Err(_) => return DecodeStatus::OutOfMemory,
            };
            if arr.push(arena, view).is_err() {
                return DecodeStatus::OutOfMemory;
            }
            DecodeStatus::Ok
        }
        scalar_ty => {
            let elem_lg2 = scalar_type_lg2(scalar_ty);
            if wire_type == WireType::LengthDelimited {
                // Packed form: inner loop of bare values until the sub-limit
                // is exhausted (spec.md §4.I step 4).
                let size = match stream.read_size() {
                    Some(s) => s,
                    None => return DecodeStatus::Malformed,
                };
                let Some(delta) = stream.push_limit(size) else { return DecodeStatus::Malformed };
                while !stream.is_done() {
                    match push_scalar(stream, msg, arena, field.offset, scalar_ty, elem_lg2) {
                        Ok(()) => {}
                        Err(status) => return status,
                    }
                }
                stream.pop_limit(delta);
                DecodeStatus::Ok
            } else if wire_type == scalar_ty.wire_type() {
                match push_scalar(stream, msg, arena, field.offset, scalar_ty, elem_lg2) {
                    Ok(()) => DecodeStatus::Ok,
                    Err(status) => status,
                }
            } else {
                DecodeStatus::Malformed
            }
        }
    }
}

fn decode_unlinked_repeated(
    stream: &mut EpsCopyInputStream<'_>,
    msg: &mut Message,
    arena: &Arena<'_>,
    field: &crate::minitable::MiniTableField,
    wire_type: WireType,
    depth: u16,
    options: DecodeOptions,
) -> DecodeStatus {
    let child = match crate::message::Message::new_in(arena, crate::schema::INTERNAL_HEADER_SIZE as u32) {
        Ok(c) => c,
        Err(_) => return DecodeStatus::OutOfMemory,
    };
    let start = stream.position();
    let ok = if wire_type == WireType::StartGroup {
        skip_field(stream, wire_type, field.number, depth, options)
    } else {
        match stream.read_size() {
            Some(size) if stream.check_size(size) => stream.skip(size as usize).is_some(),
            _ => false,
        }
    };
    if !ok {
        return DecodeStatus::Malformed;
    }
    let end = stream.position();
    if child.append_unknown(arena, &stream.raw_buf()[start..end]).is_err() {
        return DecodeStatus::OutOfMemory;
    }
    let arr = match msg.get_or_create_array(arena, field.offset, 3) {
        Ok(a) => a,
        Err(_) => return DecodeStatus::OutOfMemory,
    };
    let ptr: *mut Message = child;
    if arr.push(arena, ptr).is_err() {
        return DecodeStatus::OutOfMemory;
    }
    DecodeStatus::Ok
}

pub(crate) fn scalar_type_lg2(ty: FieldType) -> u8 {
    match ty.memory_size() {
        1 => 0,
        4 => 2,
        8 => 3,
        _ => unreachable!("scalar field types are 1/4/8 bytes"),
    }
}

pub(crate) fn push_scalar(
    stream: &mut EpsCopyInputStream<'_>,
    msg: &mut Message,
    arena: &Arena<'_>,
    offset: u32,
    ty: FieldType,
    elem_lg2: u8,
) -> Result<(), DecodeStatus> {
    let arr = msg.get_or_create_array(arena, offset, elem_lg2).map_err(|_| DecodeStatus::OutOfMemory)?;
    let scalar = read_scalar(stream, ty).ok_or(DecodeStatus::Malformed)?;
    let result = match scalar {
        Scalar::U32(v) => arr.push(arena, v),
        Scalar::U64(v) => arr.push(arena, v),
        Scalar::F32(v) => arr.push(arena, v),
        Scalar::F64(v) => arr.push(arena, v),
        Scalar::Bool(v) => arr.push(arena, v),
    };
    result.map_err(|_| DecodeStatus::OutOfMemory)
}

/// Decodes a `upb_Map`-style wire entry: a length-delimited record shaped
/// like a two-field `{key=1, value=2}` message (spec.md §1 map fields are
/// sugar over this on the wire). Builds the entry's own tiny mini-table on
/// the fly — cheap, since a map-entry message has exactly two fields — and
/// copies its key/value bytes into the target [`crate::message::Map`].
fn decode_map_entry(
    stream: &mut EpsCopyInputStream<'_>,
    msg: &mut Message,
    table: &MiniTable<'_>,
    arena: &Arena<'_>,
    options: DecodeOptions,
    depth: u16,
    field: &crate::minitable::MiniTableField,
    wire_type: WireType,
    _tag_start: usize,
) -> DecodeStatus {
    if wire_type != WireType::LengthDelimited {
        return DecodeStatus::Malformed;
    }
    let Some(sub_index) = field.sub_index else { return DecodeStatus::Malformed };
    let Some(entry_def) = table.sub_message(sub_index) else { return DecodeStatus::UnlinkedSubMessage };
    let entry_table = MiniTable::build(entry_def);

    let size = match stream.read_size() {
        Some(s) => s,
        None => return DecodeStatus::Malformed,
    };
    let Some(delta) = stream.push_limit(size) else { return DecodeStatus::Malformed };

    let entry_msg = match crate::message::Message::new_in(arena, entry_def.instance_size()) {
        Ok(m) => m,
        Err(_) => return DecodeStatus::OutOfMemory,
    };
    let status = decode_message(stream, entry_msg, &entry_table, arena, options, depth + 1, None);
    stream.pop_limit(delta);
    if !status.is_ok() {
        return status;
    }

    let Some(key_field) = entry_table.field_by_number(1) else { return DecodeStatus::Malformed };
    let Some(value_field) = entry_table.field_by_number(2) else { return DecodeStatus::Malformed };

    let key_bytes: Vec<u8> = raw_field_bytes(entry_msg, key_field);
    let value_bytes: Vec<u8> = raw_field_bytes(entry_msg, value_field);

    let map = match msg.get_or_create_map(arena, field.offset) {
        Ok(m) => m,
        Err(_) => return DecodeStatus::OutOfMemory,
    };
    if map.insert_raw(arena, &key_bytes, &value_bytes).is_err() {
        return DecodeStatus::OutOfMemory;
    }
    DecodeStatus::Ok
}

/// Raw byte image of a scalar/string map-entry field's current value, used
/// only to move key/value bytes from the temporary entry message into the
/// map's own storage.
fn raw_field_bytes(msg: &Message, field: &crate::minitable::MiniTableField) -> Vec<u8> {
    match field.field_type {
        FieldType::String | FieldType::Bytes => {
            let view = msg.string_view(field.offset);
            unsafe { view.as_slice() }.to_vec()
        }
        ty => {
            let size = ty.memory_size();
            let ptr = unsafe { msg.field_ptr::<u8>(field.offset) };
            unsafe { core::slice::from_raw_parts(ptr, size) }.to_vec()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::StandaloneArena;
    use crate::schema::{DefPoolBuilder, FieldType as FT, Label as L, Syntax};

    fn int32_field_pool() -> crate::schema::DefPool {
        let mut b = DefPoolBuilder::new();
        let file = b.add_file("t.proto", "pkg", Syntax::Proto3).unwrap();
        let mut m = b.add_message(file, "pkg.M").unwrap();
        m.add_field("a", 1, L::Optional, FT::Int32);
        m.add_field("name", 2, L::Optional, FT::String);
        m.add_field("tags", 3, L::Repeated, FT::Int32);
        b.freeze().unwrap()
    }

    #[test]
    fn decodes_scalar_varint_and_sets_hasbit() {
        let pool = int32_field_pool();
        let msg_def = pool.symbol_table().lookup_message("pkg.M").unwrap();
        let table = MiniTable::build(msg_def);
        let owner = StandaloneArena::new();
        let arena = owner.arena();
        let instance = Message::new_in(&arena, msg_def.instance_size()).unwrap();

        // field 1 varint, value 150 (spec.md §8 scenario: 0x96 0x01).
        let buf = [0x08, 0x96, 0x01];
        let status = decode(&buf, instance, &table, &arena, DecodeOptions::new());
        assert!(status.is_ok());
        let field = table.field_by_number(1).unwrap();
        assert!(instance.hasbit(table.message().hasbit_offset(), match field.presence {
            Presence::Hasbit(i) => i,
            _ => panic!(),
        }));
        assert_eq!(instance.get::<u32>(field.offset), 150);
    }

    #[test]
    fn decodes_string_field() {
        let pool = int32_field_pool();
        let msg_def = pool.symbol_table().lookup_message("pkg.M").unwrap();
        let table = MiniTable::build(msg_def);
        let owner = StandaloneArena::new();
        let arena = owner.arena();
        let instance = Message::new_in(&arena, msg_def.instance_size()).unwrap();

        // field 2, length-delimited "hi"
        let buf = [0x12, 0x02, b'h', b'i'];
        let status = decode(&buf, instance, &table, &arena, DecodeOptions::new());
        assert!(status.is_ok());
        let field = table.field_by_number(2).unwrap();
        let view = instance.string_view(field.offset);
        assert_eq!(unsafe { view.as_slice() }, b"hi");
    }

    #[test]
    fn unknown_field_is_preserved_verbatim() {
        let pool = int32_field_pool();
        let msg_def = pool.symbol_table().lookup_message("pkg.M").unwrap();
        let table = MiniTable::build(msg_def);
        let owner = StandaloneArena::new();
        let arena = owner.arena();
        let instance = Message::new_in(&arena, msg_def.instance_size()).unwrap();

        // field 99, varint wire type, value 5: tag = 99<<3|0 = 792.
        let tag = wire::make_tag(99, 0);
        let mut buf = Vec::new();
        wire::write_varint(tag, &mut |b| buf.push(b));
        wire::write_varint(5, &mut |b| buf.push(b));
        let status = decode(&buf, instance, &table, &arena, DecodeOptions::new());
        assert!(status.is_ok());
        assert_eq!(instance.unknown_fields(), buf.as_slice());
    }

    #[test]
    fn merge_is_concatenation_for_scalar_overwrite_and_repeated_append() {
        let pool = int32_field_pool();
        let msg_def = pool.symbol_table().lookup_message("pkg.M").unwrap();
        let table = MiniTable::build(msg_def);
        let owner = StandaloneArena::new();
        let arena = owner.arena();
        let instance = Message::new_in(&arena, msg_def.instance_size()).unwrap();

        let buf1 = [0x08, 0x01, 0x18, 0x02]; // a=1, tags+=2
        let buf2 = [0x08, 0x03, 0x18, 0x04]; // a=3 (overwrite), tags+=4 (append)
        assert!(decode(&buf1, instance, &table, &arena, DecodeOptions::new()).is_ok());
        assert!(decode(&buf2, instance, &table, &arena, DecodeOptions::new()).is_ok());

        let a_field = table.field_by_number(1).unwrap();
        assert_eq!(instance.get::<u32>(a_field.offset), 3);
        let tags_field = table.field_by_number(3).unwrap();
        let arr = instance.array_ptr(tags_field.offset).unwrap();
        assert_eq!(unsafe { arr.as_ref() }.as_typed_slice::<u32>(), &[2, 4]);
    }

    #[test]
    fn missing_required_field_is_reported() {
        let mut b = DefPoolBuilder::new();
        let file = b.add_file("r.proto", "pkg", Syntax::Proto2).unwrap();
        let mut m = b.add_message(file, "pkg.R").unwrap();
        m.add_field("must_have", 1, L::Required, FT::Int32);
        let pool = b.freeze().unwrap();
        let msg_def = pool.symbol_table().lookup_message("pkg.R").unwrap();
        let table = MiniTable::build(msg_def);
        let owner = StandaloneArena::new();
        let arena = owner.arena();
        let instance = Message::new_in(&arena, msg_def.instance_size()).unwrap();

        let status = decode(&[], instance, &table, &arena, DecodeOptions::new().check_required(true));
        assert_eq!(status, DecodeStatus::MissingRequired);
    }

    #[test]
    fn decodes_packed_repeated_int32() {
        let pool = int32_field_pool();
        let msg_def = pool.symbol_table().lookup_message("pkg.M").unwrap();
        let table = MiniTable::build(msg_def);
        let owner = StandaloneArena::new();
        let arena = owner.arena();
        let instance = Message::new_in(&arena, msg_def.instance_size()).unwrap();

        // spec.md §8 scenario 4 values ([3, 270, 86942]), packed onto this
        // pool's repeated field 3 (tag = 3<<3|2 = 0x1a).
        let buf = [0x1a, 0x06, 0x03, 0x8e, 0x02, 0x9e, 0xa7, 0x05];
        let status = decode(&buf, instance, &table, &arena, DecodeOptions::new());
        assert!(status.is_ok());
        let field = table.field_by_number(3).unwrap();
        let arr = instance.array_ptr(field.offset).unwrap();
        assert_eq!(unsafe { arr.as_ref() }.as_typed_slice::<u32>(), &[3, 270, 86942]);
    }

    fn nested_message_pool() -> crate::schema::DefPool {
        let mut b = DefPoolBuilder::new();
        let file = b.add_file("g.proto", "pkg", Syntax::Proto2).unwrap();
        let mut inner = b.add_message(file, "pkg.Inner").unwrap();
        inner.add_field("v", 1, L::Optional, FT::Int32);
        let mut outer = b.add_message(file, "pkg.Outer").unwrap();
        outer.add_field("child", 5, L::Optional, FT::Group).set_subdef_name("pkg.Inner");
        b.freeze().unwrap()
    }

    #[test]
    fn decodes_group_delimited_submessage() {
        let pool = nested_message_pool();
        let msg_def = pool.symbol_table().lookup_message("pkg.Outer").unwrap();
        let table = MiniTable::build(msg_def);
        let owner = StandaloneArena::new();
        let arena = owner.arena();
        let instance = Message::new_in(&arena, msg_def.instance_size()).unwrap();

        // spec.md §8 scenario 5: start-group 5, field 1 = 5, end-group 5.
        let start = wire::make_tag(5, wire::WireType::StartGroup as u8);
        let end = wire::make_tag(5, wire::WireType::EndGroup as u8);
        let mut buf = Vec::new();
        wire::write_varint(start, &mut |b| buf.push(b));
        buf.push(0x08);
        buf.push(5);
        wire::write_varint(end, &mut |b| buf.push(b));

        let status = decode(&buf, instance, &table, &arena, DecodeOptions::new());
        assert!(status.is_ok());

        let child_field = table.field_by_number(5).unwrap();
        let sub_index = child_field.sub_index.unwrap();
        let inner_def = table.sub_message(sub_index).unwrap();
        let inner_table = MiniTable::build(inner_def);
        let sub = instance.sub_message(child_field.offset).get().unwrap();
        let crate::message::SubMessage::Linked(child) = sub else { panic!("expected linked child") };
        let v_field = inner_table.field_by_number(1).unwrap();
        assert_eq!(unsafe { child.as_ref() }.get::<u32>(v_field.offset), 5);
    }

    #[test]
    fn overlong_varint_is_malformed() {
        let pool = int32_field_pool();
        let msg_def = pool.symbol_table().lookup_message("pkg.M").unwrap();
        let table = MiniTable::build(msg_def);
        let owner = StandaloneArena::new();
        let arena = owner.arena();
        let instance = Message::new_in(&arena, msg_def.instance_size()).unwrap();

        // field 1 tag, then 11 bytes with the continuation bit set.
        let mut buf = vec![0x08];
        buf.extend(core::iter::repeat(0x80u8).take(11));
        let status = decode(&buf, instance, &table, &arena, DecodeOptions::new());
        assert_eq!(status, DecodeStatus::Malformed);
    }

    #[test]
    fn invalid_utf8_string_is_rejected_in_proto3() {
        let pool = int32_field_pool();
        let msg_def = pool.symbol_table().lookup_message("pkg.M").unwrap();
        let table = MiniTable::build(msg_def);
        let owner = StandaloneArena::new();
        let arena = owner.arena();
        let instance = Message::new_in(&arena, msg_def.instance_size()).unwrap();

        // field 2 (string), one invalid byte.
        let buf = [0x12, 0x01, 0xff];
        let status = decode(&buf, instance, &table, &arena, DecodeOptions::new());
        assert_eq!(status, DecodeStatus::BadUtf8);
    }

    #[test]
    fn deeply_nested_message_exceeds_default_max_depth() {
        let mut b = DefPoolBuilder::new();
        let file = b.add_file("rec.proto", "pkg", Syntax::Proto2).unwrap();
        let mut m = b.add_message(file, "pkg.Rec").unwrap();
        m.add_field("child", 1, L::Optional, FT::Message).set_subdef_name("pkg.Rec");
        let pool = b.freeze().unwrap();
        let msg_def = pool.symbol_table().lookup_message("pkg.Rec").unwrap();
        let table = MiniTable::build(msg_def);
        let owner = StandaloneArena::new();
        let arena = owner.arena();
        let instance = Message::new_in(&arena, msg_def.instance_size()).unwrap();

        // 101 levels of field-1 length-delimited nesting, innermost empty.
        let mut buf: Vec<u8> = Vec::new();
        for _ in 0..101 {
            let mut next = vec![0x0a];
            wire::write_varint(buf.len() as u64, &mut |b| next.push(b));
            next.extend_from_slice(&buf);
            buf = next;
        }
        let status = decode(&buf, instance, &table, &arena, DecodeOptions::new());
        assert_eq!(status, DecodeStatus::MaxDepthExceeded);
    }
}
