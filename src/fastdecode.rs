//! Fast-path decoder (component J): a 32-slot dispatch table checked before
//! falling into the general mini-table loop, per spec.md §4.E/§4.J's
//! two-tier design.
//!
//! Grounded in `decoding.rs`'s tag-dispatch loop generalized one step
//! further: where the mini-table decoder (`crate::decode`) always resolves a
//! field by searching `MiniTable::fields()`, this module first checks
//! whether the just-read tag matches the single fasttable slot its low bits
//! select (`crate::minitable::MiniTable::fasttable`/`table_mask`). A match
//! runs a specialized inline parser for that field's shape directly; a miss
//! — wrong tag, no func, or a shape the fast path doesn't specialize —
//! drops straight into [`crate::decode::decode_one_field`], the exact same
//! per-field logic the mini-table decoder itself uses, so the two tiers can
//! never disagree on anything the fast path declines to handle.
//!
//! Unlike upb's C fast tables, a slot here doesn't carry enough to fully
//! resolve a scalar field's width/zigzag-ness on its own (see
//! `FastFuncData`'s doc comment on its packed `aux` byte) — this
//! implementation has no codegen'd per-type function pointers to specialize
//! against, only a schema-interpreted one, so the aux byte stores a type
//! code instead. That's still enough to skip the unknown-field check and the
//! broader `FieldMode`/`FieldType` match `crate::decode::dispatch_field`
//! does, just with one extra type-code decode per hit.
//!
//! This implementation also doesn't reproduce upb's raw-pointer/slop cursor
//! (`crate::wire::eps_copy` already documents why: that trick only pays for
//! itself with unchecked pointer arithmetic, which this crate's safe-Rust
//! design deliberately avoids) or its tight same-field repeat loop — each
//! element of a repeated fast-path field re-enters the 32-slot check rather
//! than looping inside one matched slot. Both are recorded as deliberate
//! simplifications in DESIGN.md.

extern crate alloc;

use crate::arena::Arena;
use crate::decode::{self, DecodeOptions, FieldOutcome, Scalar};
use crate::error::DecodeStatus;
use crate::message::Message;
use crate::minitable::{FastFunc, FastFuncData, MiniTable};
use crate::schema::FieldType;
use crate::wire::{self, EpsCopyInputStream, WireType};

/// Entry point for a message body, used by `crate::decode::decode` in place
/// of `crate::decode::decode_message` unless the caller forced the
/// mini-table-only path (spec.md §4.I `DecodeOptions`: "forceable").
pub(crate) fn decode_message_fast(
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

        let slot_index = ((tag as usize) & (table.table_mask() as usize)) >> 3;
        let hit = table.fasttable().get(slot_index).and_then(|slot| {
            let func = slot.func?;
            crate::utils::likely(slot.data.expected_tag() as u64 == tag).then_some((func, slot.data))
        });

        let outcome = match hit {
            Some((func, data)) => run_fast_func(func, data, tag, stream, msg, table, arena, options, depth),
            None => decode::decode_one_field(stream, msg, table, arena, options, depth, group_number, tag_start, tag),
        };
        match outcome {
            FieldOutcome::Continue => continue,
            FieldOutcome::Done(status) => return status,
        }
    }
}

/// Sets a matched field's presence bit (hasbit or oneof case), mirroring
/// `crate::decode::dispatch_field`'s `set_presence` closure but driven off
/// the packed slot data instead of a `MiniTableField`.
fn set_presence(msg: &mut Message, table: &MiniTable<'_>, data: FastFuncData, field_number: u32) {
    match data.presence_kind() {
        1 => msg.set_hasbit(table.message().hasbit_offset(), data.presence_field() as u32),
        2 => msg.set_oneof_case(data.presence_field() as u32, field_number),
        _ => {}
    }
}

/// Runs the specialized inline parse for a matched fasttable slot. `tag` has
/// already been consumed from `stream`.
#[allow(clippy::too_many_arguments)]
fn run_fast_func(
    func: FastFunc,
    data: FastFuncData,
    tag: u64,
    stream: &mut EpsCopyInputStream<'_>,
    msg: &mut Message,
    table: &MiniTable<'_>,
    arena: &Arena<'_>,
    options: DecodeOptions,
    depth: u16,
) -> FieldOutcome {
    let (field_number, _) = wire::split_tag(tag);

    match func {
        FastFunc::Varint | FastFunc::Fixed32 | FastFunc::Fixed64 => {
            let Some(ty) = FieldType::from_u8(data.type_code()) else {
                return FieldOutcome::Done(DecodeStatus::Malformed);
            };
            let Some(scalar) = decode::read_scalar(stream, ty) else {
                return FieldOutcome::Done(DecodeStatus::Malformed);
            };
            write_scalar(msg, data.offset() as u32, scalar);
            set_presence(msg, table, data, field_number);
            FieldOutcome::Continue
        }
        FastFunc::StringView => {
            let Some(ty) = FieldType::from_u8(data.type_code()) else {
                return FieldOutcome::Done(DecodeStatus::Malformed);
            };
            match decode::decode_string_view(stream, arena, ty, table, options) {
                Ok(view) => {
                    msg.set_string_view(data.offset() as u32, view);
                    set_presence(msg, table, data, field_number);
                    FieldOutcome::Continue
                }
                Err(status) => FieldOutcome::Done(status),
            }
        }
        FastFunc::RepeatedVarint | FastFunc::RepeatedFixed32 | FastFunc::RepeatedFixed64 => {
            let Some(ty) = FieldType::from_u8(data.type_code()) else {
                return FieldOutcome::Done(DecodeStatus::Malformed);
            };
            let elem_lg2 = decode::scalar_type_lg2(ty);
            match decode::push_scalar(stream, msg, arena, data.offset() as u32, ty, elem_lg2) {
                Ok(()) => FieldOutcome::Continue,
                Err(status) => FieldOutcome::Done(status),
            }
        }
        FastFunc::RepeatedStringView => {
            let Some(ty) = FieldType::from_u8(data.type_code()) else {
                return FieldOutcome::Done(DecodeStatus::Malformed);
            };
            let view = match decode::decode_string_view(stream, arena, ty, table, options) {
                Ok(v) => v,
                Err(status) => return FieldOutcome::Done(status),
            };
            // A StrView is a ptr+len pair (16 bytes, lg2 == 4).
            let arr = match msg.get_or_create_array(arena, data.offset() as u32, 4) {
                Ok(a) => a,
                Err(_) => return FieldOutcome::Done(DecodeStatus::OutOfMemory),
            };
            match arr.push(arena, view) {
                Ok(()) => FieldOutcome::Continue,
                Err(_) => FieldOutcome::Done(DecodeStatus::OutOfMemory),
            }
        }
        FastFunc::SubMessage => decode_submessage_fast(data, tag, stream, msg, table, arena, options, depth, field_number),
    }
}

fn write_scalar(msg: &mut Message, offset: u32, scalar: Scalar) {
    match scalar {
        Scalar::U32(v) => msg.set(offset, v),
        Scalar::U64(v) => msg.set(offset, v),
        Scalar::F32(v) => msg.set(offset, v),
        Scalar::F64(v) => msg.set(offset, v),
        Scalar::Bool(v) => msg.set(offset, v),
    }
}

/// Fast-path handling of a non-repeated message/group field: same shape as
/// `crate::decode::decode_submessage_scalar`, but recurses back into the
/// fast dispatcher for the child rather than the generic loop, since a
/// message that earned a fasttable slot at all is exactly the common case
/// the fast path exists for.
#[allow(clippy::too_many_arguments)]
fn decode_submessage_fast(
    data: FastFuncData,
    tag: u64,
    stream: &mut EpsCopyInputStream<'_>,
    msg: &mut Message,
    table: &MiniTable<'_>,
    arena: &Arena<'_>,
    options: DecodeOptions,
    depth: u16,
    field_number: u32,
) -> FieldOutcome {
    let offset = data.offset() as u32;
    let Some(sub_def) = table.sub_message(data.submsg_index() as u32) else {
        // Guaranteed resolved by the def pool for any field that made it
        // into the fasttable at all; kept as a safe terminal outcome rather
        // than an `unreachable!()` since the slot's aux byte is untyped data
        // from the caller's point of view.
        return FieldOutcome::Done(DecodeStatus::UnlinkedSubMessage);
    };
    let sub_table = MiniTable::build(sub_def);
    let child = match msg.get_or_create_sub_message(arena, offset, sub_def.instance_size()) {
        Ok(p) => p,
        Err(_) => return FieldOutcome::Done(DecodeStatus::OutOfMemory),
    };
    let child_ref = unsafe { &mut *child.as_ptr() };

    let (_, wt_raw) = wire::split_tag(tag);
    let Some(wire_type) = WireType::from_u8(wt_raw) else {
        return FieldOutcome::Done(DecodeStatus::Malformed);
    };

    let status = if wire_type == WireType::StartGroup {
        decode_message_fast(stream, child_ref, &sub_table, arena, options, depth + 1, Some(field_number))
    } else {
        let Some(size) = stream.read_size() else { return FieldOutcome::Done(DecodeStatus::Malformed) };
        let Some(delta) = stream.push_limit(size) else { return FieldOutcome::Done(DecodeStatus::Malformed) };
        let inner = decode_message_fast(stream, child_ref, &sub_table, arena, options, depth + 1, None);
        let status = if inner.is_ok() && !stream.is_done() { DecodeStatus::Malformed } else { inner };
        stream.pop_limit(delta);
        status
    };
    if !status.is_ok() {
        return FieldOutcome::Done(status);
    }
    // Matches `crate::decode::decode_submessage_scalar`: a singular
    // message-typed field's presence is the linked pointer's non-nullness,
    // not a hasbit, so only a oneof member case gets recorded here.
    if data.presence_kind() == 2 {
        msg.set_oneof_case(data.presence_field() as u32, field_number);
    }
    FieldOutcome::Continue
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::StandaloneArena;
    use crate::schema::{DefPoolBuilder, FieldType as FT, Label as L, Syntax};

    fn pool_with_nested_message() -> crate::schema::DefPool {
        let mut b = DefPoolBuilder::new();
        let file = b.add_file("t.proto", "pkg", Syntax::Proto3).unwrap();
        let mut inner = b.add_message(file, "pkg.Inner").unwrap();
        inner.add_field("x", 1, L::Optional, FT::Int32);
        let mut outer = b.add_message(file, "pkg.Outer").unwrap();
        outer.add_field("a", 1, L::Optional, FT::Int32);
        outer.add_field("name", 2, L::Optional, FT::String);
        outer.add_field("tags", 3, L::Repeated, FT::Int32);
        outer.add_field("child", 4, L::Optional, FT::Message).set_subdef_name("pkg.Inner");
        b.freeze().unwrap()
    }

    #[test]
    fn fast_path_and_forced_mini_table_agree_on_scalar_and_repeated() {
        let pool = pool_with_nested_message();
        let msg_def = pool.symbol_table().lookup_message("pkg.Outer").unwrap();
        let table = MiniTable::build(msg_def);
        let owner = StandaloneArena::new();
        let arena = owner.arena();

        let buf = [0x08, 0x96, 0x01, 0x12, 0x02, b'h', b'i', 0x18, 0x05, 0x18, 0x07];

        let fast = Message::new_in(&arena, msg_def.instance_size()).unwrap();
        let status = decode::decode(&buf, fast, &table, &arena, DecodeOptions::new());
        assert!(status.is_ok());

        let slow = Message::new_in(&arena, msg_def.instance_size()).unwrap();
        let status = decode::decode(&buf, slow, &table, &arena, DecodeOptions::new().force_mini_table(true));
        assert!(status.is_ok());

        let a_field = table.field_by_number(1).unwrap();
        assert_eq!(fast.get::<u32>(a_field.offset), 150);
        assert_eq!(fast.get::<u32>(a_field.offset), slow.get::<u32>(a_field.offset));

        let name_field = table.field_by_number(2).unwrap();
        assert_eq!(unsafe { fast.string_view(name_field.offset).as_slice() }, b"hi");

        let tags_field = table.field_by_number(3).unwrap();
        let fast_tags = unsafe { fast.array_ptr(tags_field.offset).unwrap().as_ref() }.as_typed_slice::<u32>().to_vec();
        let slow_tags = unsafe { slow.array_ptr(tags_field.offset).unwrap().as_ref() }.as_typed_slice::<u32>().to_vec();
        assert_eq!(fast_tags, alloc::vec![5, 7]);
        assert_eq!(fast_tags, slow_tags);
    }

    #[test]
    fn fast_path_decodes_nested_submessage() {
        let pool = pool_with_nested_message();
        let msg_def = pool.symbol_table().lookup_message("pkg.Outer").unwrap();
        let table = MiniTable::build(msg_def);
        let owner = StandaloneArena::new();
        let arena = owner.arena();
        let instance = Message::new_in(&arena, msg_def.instance_size()).unwrap();

        // field 4 (child), length-delimited, inner message field 1 = 42.
        let buf = [0x22, 0x02, 0x08, 0x2a];
        let status = decode::decode(&buf, instance, &table, &arena, DecodeOptions::new());
        assert!(status.is_ok());

        let child_field = table.field_by_number(4).unwrap();
        let sub = instance.sub_message(child_field.offset).get().unwrap();
        let crate::message::SubMessage::Linked(child) = sub else { panic!("expected linked child") };
        let inner_def = pool.symbol_table().lookup_message("pkg.Inner").unwrap();
        let inner_table = MiniTable::build(inner_def);
        let x_field = inner_table.field_by_number(1).unwrap();
        assert_eq!(unsafe { child.as_ref() }.get::<u32>(x_field.offset), 42);
    }

    #[test]
    fn fast_path_falls_back_for_unknown_fields() {
        let pool = pool_with_nested_message();
        let msg_def = pool.symbol_table().lookup_message("pkg.Outer").unwrap();
        let table = MiniTable::build(msg_def);
        let owner = StandaloneArena::new();
        let arena = owner.arena();
        let instance = Message::new_in(&arena, msg_def.instance_size()).unwrap();

        let tag = wire::make_tag(99, 0);
        let mut buf = alloc::vec::Vec::new();
        wire::write_varint(tag, &mut |b| buf.push(b));
        wire::write_varint(7, &mut |b| buf.push(b));
        let status = decode::decode(&buf, instance, &table, &arena, DecodeOptions::new());
        assert!(status.is_ok());
        assert_eq!(instance.unknown_fields(), buf.as_slice());
    }
}
