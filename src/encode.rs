//! Encoder: serializes an arena-backed [`crate::message::Message`] back to
//! protobuf wire format, driven by the same [`crate::minitable::MiniTable`]
//! the decoder reads.
//!
//! Grounded in `decode.rs`'s per-field dispatch: the same three axes that
//! drive every read there (`FieldMode`, `Presence`, `FieldType`) drive every
//! write here, field by field, in mini-table order. `wire::write_varint` is
//! the only primitive this module needs that the decoder doesn't already.

extern crate alloc;
use alloc::vec::Vec;

use crate::arena::Arena;
use crate::message::{Map, Message, SubMessage, SubMessagePtr};
use crate::minitable::{FieldMode, MiniTable, MiniTableField, Presence};
use crate::schema::FieldType;
use crate::wire::{self, WireType};

/// Serializes `msg` per `table` into a freshly allocated buffer (spec.md §6
/// external interface). `arena` mirrors `decode`'s signature; a plain `Vec`
/// sink needs none of its own, since every byte written here is either
/// copied out of `msg` or computed from it, never newly allocated in `msg`'s
/// arena.
pub fn encode(msg: &Message, table: &MiniTable<'_>, arena: &Arena<'_>) -> Vec<u8> {
    let _ = arena;
    let mut out = Vec::new();
    encode_message(&mut out, msg, table);
    out
}

/// Appends every present field of `msg`, in ascending field-number order
/// (`table.fields()` is already sorted that way), followed by `msg`'s
/// unknown-field span verbatim (spec.md §8 "Unknown fields preservation").
fn encode_message(out: &mut Vec<u8>, msg: &Message, table: &MiniTable<'_>) {
    for field in table.fields() {
        encode_field(out, msg, table, field);
    }
    out.extend_from_slice(msg.unknown_fields());
}

fn encode_field(out: &mut Vec<u8>, msg: &Message, table: &MiniTable<'_>, field: &MiniTableField) {
    match field.mode {
        FieldMode::Scalar => encode_scalar_mode(out, msg, table, field),
        FieldMode::Array => encode_array_mode(out, msg, table, field),
        FieldMode::Map => encode_map_mode(out, msg, table, field),
    }
}

/// Whether a non-repeated field should be emitted at all. Message/group
/// fields never consult this — their presence is the linked pointer's
/// non-nullness, not a hasbit, matching the asymmetry already present in
/// `crate::decode::decode_submessage_scalar` (see that function's callers
/// here for the oneof-case check they still need).
fn field_present(msg: &Message, table: &MiniTable<'_>, field: &MiniTableField) -> bool {
    match field.presence {
        Presence::Hasbit(idx) => msg.hasbit(table.message().hasbit_offset(), idx),
        Presence::OneofCase { case_offset } => msg.oneof_case(case_offset) == field.number,
        Presence::None => true,
    }
}

fn encode_scalar_mode(out: &mut Vec<u8>, msg: &Message, table: &MiniTable<'_>, field: &MiniTableField) {
    match field.field_type {
        FieldType::Message | FieldType::Group => {
            if let Presence::OneofCase { case_offset } = field.presence {
                if msg.oneof_case(case_offset) != field.number {
                    return;
                }
            }
            let Some(sub) = msg.sub_message(field.offset).get() else { return };
            let Some(sub_index) = field.sub_index else { return };
            let Some(sub_def) = table.sub_message(sub_index) else { return };
            let sub_table = MiniTable::build(sub_def);
            encode_submessage(out, field.number, field.field_type == FieldType::Group, &sub_table, sub);
        }
        FieldType::String | FieldType::Bytes => {
            if !field_present(msg, table, field) {
                return;
            }
            let view = msg.string_view(field.offset);
            encode_bytes_field(out, field.number, unsafe { view.as_slice() });
        }
        ty => {
            if !field_present(msg, table, field) {
                return;
            }
            let raw = unsafe { core::slice::from_raw_parts(msg.field_ptr::<u8>(field.offset), ty.memory_size()) };
            encode_scalar_with_tag(out, field.number, ty, raw);
        }
    }
}

fn encode_array_mode(out: &mut Vec<u8>, msg: &Message, table: &MiniTable<'_>, field: &MiniTableField) {
    let Some(arr_ptr) = msg.array_ptr(field.offset) else { return };
    let arr = unsafe { arr_ptr.as_ref() };

    match field.field_type {
        FieldType::Message | FieldType::Group => {
            let Some(sub_index) = field.sub_index else { return };
            let Some(sub_def) = table.sub_message(sub_index) else { return };
            let sub_table = MiniTable::build(sub_def);
            let is_group = field.field_type == FieldType::Group;
            for &ptr in arr.as_typed_slice::<*mut Message>() {
                let child = unsafe { &*ptr };
                let mut body = Vec::new();
                encode_message(&mut body, child, &sub_table);
                write_framed(out, field.number, is_group, &body);
            }
        }
        FieldType::String | FieldType::Bytes => {
            for view in arr.as_typed_slice::<crate::message::StrView>() {
                encode_bytes_field(out, field.number, unsafe { view.as_slice() });
            }
        }
        ty => {
            if field.packed {
                if arr.is_empty() {
                    return;
                }
                let mut body = Vec::new();
                for i in 0..arr.len() {
                    write_scalar_value(&mut body, ty, arr.get_raw(i));
                }
                encode_bytes_field(out, field.number, &body);
            } else {
                for i in 0..arr.len() {
                    encode_scalar_with_tag(out, field.number, ty, arr.get_raw(i));
                }
            }
        }
    }
}

fn encode_map_mode(out: &mut Vec<u8>, msg: &Message, table: &MiniTable<'_>, field: &MiniTableField) {
    let Some(map_ptr) = msg.map_ptr(field.offset) else { return };
    let map: &Map = unsafe { map_ptr.as_ref() };
    let Some(sub_index) = field.sub_index else { return };
    let Some(entry_def) = table.sub_message(sub_index) else { return };
    let entry_table = MiniTable::build(entry_def);
    let Some(key_field) = entry_table.field_by_number(1) else { return };
    let Some(value_field) = entry_table.field_by_number(2) else { return };

    for (key_bytes, value_bytes) in map.iter_raw() {
        let mut body = Vec::new();
        encode_map_entry_field(&mut body, &entry_table, key_field, key_bytes);
        encode_map_entry_field(&mut body, &entry_table, value_field, value_bytes);
        encode_bytes_field(out, field.number, &body);
    }
}

/// Encodes one map-entry field (key=1 or value=2) from its raw stored bytes
/// (`crate::message::Map` stores every value as a byte span regardless of
/// type, copied in by `crate::decode::raw_field_bytes`).
fn encode_map_entry_field(out: &mut Vec<u8>, entry_table: &MiniTable<'_>, f: &MiniTableField, raw: &[u8]) {
    match f.field_type {
        FieldType::String | FieldType::Bytes => encode_bytes_field(out, f.number, raw),
        FieldType::Message | FieldType::Group => {
            let Ok(bits) = raw.try_into().map(usize::from_ne_bytes) else { return };
            let Some(sub) = SubMessagePtr::from_raw(bits).get() else { return };
            let Some(sub_index) = f.sub_index else { return };
            let Some(sub_def) = entry_table.sub_message(sub_index) else { return };
            let sub_table = MiniTable::build(sub_def);
            encode_submessage(out, f.number, f.field_type == FieldType::Group, &sub_table, sub);
        }
        ty => encode_scalar_with_tag(out, f.number, ty, raw),
    }
}

/// Encodes a linked-or-unlinked sub-message pointer. An unlinked child (see
/// `crate::decode::decode_unlinked`) never got any field written into it
/// beyond its unknown-field span, so its "body" is just that span; a frozen
/// schema never actually produces one in practice (every subdef resolves at
/// freeze time), but this mirrors the decoder's own defensive handling of
/// the case rather than assuming it away.
fn encode_submessage(out: &mut Vec<u8>, number: u32, is_group: bool, sub_table: &MiniTable<'_>, sub: SubMessage) {
    let body = match sub {
        SubMessage::Linked(p) => {
            let mut buf = Vec::new();
            encode_message(&mut buf, unsafe { p.as_ref() }, sub_table);
            buf
        }
        SubMessage::Unlinked(p) => unsafe { p.as_ref() }.unknown_fields().to_vec(),
    };
    write_framed(out, number, is_group, &body);
}

/// Wraps an already-encoded sub-message body with its framing: start/end
/// group tags for `FieldType::Group`, or a tag plus length prefix for an
/// ordinary length-delimited message.
fn write_framed(out: &mut Vec<u8>, number: u32, is_group: bool, body: &[u8]) {
    if is_group {
        write_tag(out, number, WireType::StartGroup);
        out.extend_from_slice(body);
        write_tag(out, number, WireType::EndGroup);
    } else {
        encode_bytes_field(out, number, body);
    }
}

fn encode_bytes_field(out: &mut Vec<u8>, number: u32, bytes: &[u8]) {
    write_tag(out, number, WireType::LengthDelimited);
    wire::write_varint(bytes.len() as u64, &mut |b| out.push(b));
    out.extend_from_slice(bytes);
}

fn write_tag(out: &mut Vec<u8>, number: u32, wt: WireType) {
    wire::write_varint(wire::make_tag(number, wt as u8), &mut |b| out.push(b));
}

fn encode_scalar_with_tag(out: &mut Vec<u8>, number: u32, ty: FieldType, raw: &[u8]) {
    write_tag(out, number, ty.wire_type());
    write_scalar_value(out, ty, raw);
}

/// Writes just the value bytes for a scalar field (no tag): shared between
/// the tagged single-value path and packed-repeated encoding, which writes
/// one tag for the whole run. `raw` holds the field's native in-memory
/// representation — the same bytes `crate::message::Message::get`/
/// `crate::message::Array::get_raw` would hand back — not yet-encoded wire
/// bytes.
fn write_scalar_value(out: &mut Vec<u8>, ty: FieldType, raw: &[u8]) {
    match ty {
        FieldType::Bool => {
            wire::write_varint(if raw[0] != 0 { 1 } else { 0 }, &mut |b| out.push(b));
        }
        FieldType::Int32 => {
            let v = u32::from_ne_bytes(raw.try_into().expect("4-byte scalar slot"));
            wire::write_varint((v as i32) as i64 as u64, &mut |b| out.push(b));
        }
        FieldType::Uint32 | FieldType::Enum => {
            let v = u32::from_ne_bytes(raw.try_into().expect("4-byte scalar slot"));
            wire::write_varint(v as u64, &mut |b| out.push(b));
        }
        FieldType::Sint32 => {
            let v = u32::from_ne_bytes(raw.try_into().expect("4-byte scalar slot"));
            wire::write_varint(wire::zigzag_encode_32(v as i32) as u64, &mut |b| out.push(b));
        }
        FieldType::Int64 | FieldType::Uint64 => {
            let v = u64::from_ne_bytes(raw.try_into().expect("8-byte scalar slot"));
            wire::write_varint(v, &mut |b| out.push(b));
        }
        FieldType::Sint64 => {
            let v = u64::from_ne_bytes(raw.try_into().expect("8-byte scalar slot"));
            wire::write_varint(wire::zigzag_encode_64(v as i64), &mut |b| out.push(b));
        }
        FieldType::Fixed32 | FieldType::Sfixed32 | FieldType::Float => {
            let v = u32::from_ne_bytes(raw.try_into().expect("4-byte scalar slot"));
            out.extend_from_slice(&v.to_le_bytes());
        }
        FieldType::Fixed64 | FieldType::Sfixed64 | FieldType::Double => {
            let v = u64::from_ne_bytes(raw.try_into().expect("8-byte scalar slot"));
            out.extend_from_slice(&v.to_le_bytes());
        }
        FieldType::String | FieldType::Bytes | FieldType::Message | FieldType::Group => {
            unreachable!("string/bytes/message fields are framed by their caller, not written as a scalar value")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::StandaloneArena;
    use crate::decode::{decode, DecodeOptions};
    use crate::schema::{DefPoolBuilder, FieldType as FT, Label as L, Syntax};

    fn scalar_pool() -> crate::schema::DefPool {
        let mut b = DefPoolBuilder::new();
        let file = b.add_file("t.proto", "pkg", Syntax::Proto3).unwrap();
        let mut m = b.add_message(file, "pkg.M").unwrap();
        m.add_field("a", 1, L::Optional, FT::Int32);
        m.add_field("name", 2, L::Optional, FT::String);
        m.add_field("tags", 3, L::Repeated, FT::Int32);
        b.freeze().unwrap()
    }

    #[test]
    fn round_trips_scalar_string_and_repeated_fields() {
        let pool = scalar_pool();
        let msg_def = pool.symbol_table().lookup_message("pkg.M").unwrap();
        let table = MiniTable::build(msg_def);
        let owner = StandaloneArena::new();
        let arena = owner.arena();
        let instance = Message::new_in(&arena, msg_def.instance_size()).unwrap();

        let buf = [
            0x08, 0x96, 0x01, // a = 150
            0x12, 0x02, b'h', b'i', // name = "hi"
            0x18, 0x01, 0x18, 0x02, // tags += 1, tags += 2
        ];
        assert!(decode(&buf, instance, &table, &arena, DecodeOptions::new()).is_ok());

        let encoded = encode(instance, &table, &arena);

        let roundtrip = Message::new_in(&arena, msg_def.instance_size()).unwrap();
        assert!(decode(&encoded, roundtrip, &table, &arena, DecodeOptions::new()).is_ok());

        let a_field = table.field_by_number(1).unwrap();
        assert_eq!(roundtrip.get::<u32>(a_field.offset), 150);
        let name_field = table.field_by_number(2).unwrap();
        assert_eq!(unsafe { roundtrip.string_view(name_field.offset).as_slice() }, b"hi");
        let tags_field = table.field_by_number(3).unwrap();
        let arr = roundtrip.array_ptr(tags_field.offset).unwrap();
        assert_eq!(unsafe { arr.as_ref() }.as_typed_slice::<u32>(), &[1, 2]);
    }

    #[test]
    fn unset_scalar_field_is_not_emitted() {
        let pool = scalar_pool();
        let msg_def = pool.symbol_table().lookup_message("pkg.M").unwrap();
        let table = MiniTable::build(msg_def);
        let owner = StandaloneArena::new();
        let arena = owner.arena();
        let instance = Message::new_in(&arena, msg_def.instance_size()).unwrap();

        let encoded = encode(instance, &table, &arena);
        assert!(encoded.is_empty());
    }

    #[test]
    fn preserves_unknown_fields_verbatim() {
        let pool = scalar_pool();
        let msg_def = pool.symbol_table().lookup_message("pkg.M").unwrap();
        let table = MiniTable::build(msg_def);
        let owner = StandaloneArena::new();
        let arena = owner.arena();
        let instance = Message::new_in(&arena, msg_def.instance_size()).unwrap();

        // field 99, varint wire type, value 5.
        let tag = wire::make_tag(99, 0);
        let mut buf = Vec::new();
        wire::write_varint(tag, &mut |b| buf.push(b));
        wire::write_varint(5, &mut |b| buf.push(b));
        assert!(decode(&buf, instance, &table, &arena, DecodeOptions::new()).is_ok());

        let encoded = encode(instance, &table, &arena);
        assert_eq!(encoded, buf);
    }

    #[test]
    fn round_trips_nested_message_field() {
        let mut b = DefPoolBuilder::new();
        let file = b.add_file("nested.proto", "pkg", Syntax::Proto3).unwrap();
        {
            let mut inner = b.add_message(file, "pkg.Inner").unwrap();
            inner.add_field("x", 1, L::Optional, FT::Int32);
        }
        {
            let mut outer = b.add_message(file, "pkg.Outer").unwrap();
            outer.add_field("child", 1, L::Optional, FT::Message).set_subdef_name("pkg.Inner");
        }
        let pool = b.freeze().unwrap();
        let msg_def = pool.symbol_table().lookup_message("pkg.Outer").unwrap();
        let table = MiniTable::build(msg_def);
        let owner = StandaloneArena::new();
        let arena = owner.arena();
        let instance = Message::new_in(&arena, msg_def.instance_size()).unwrap();

        // child (field 1, length-delimited) { x = 7 }
        let buf = [0x0a, 0x02, 0x08, 0x07];
        assert!(decode(&buf, instance, &table, &arena, DecodeOptions::new()).is_ok());

        let encoded = encode(instance, &table, &arena);
        assert_eq!(encoded, buf);
    }
}
