//! Universal invariants from spec.md §8, run as `proptest` properties
//! instead of the fixed-example unit tests already colocated in
//! `src/wire/reader.rs`.

use proptest::prelude::*;

use upb_core::schema::{DefPoolBuilder, FieldType, Label, Syntax};
use upb_core::{decode, DecodeOptions, DecodeStatus, Message, MiniTable, StandaloneArena};

fn write_varint(mut value: u64, out: &mut Vec<u8>) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            out.push(byte | 0x80);
        } else {
            out.push(byte);
            break;
        }
    }
}

proptest! {
    /// Any `u64` written as a varint and read back produces the same value
    /// and consumes exactly the bytes written (spec.md §8: varint round-trip).
    #[test]
    fn varint_roundtrips(v: u64) {
        let mut buf = Vec::new();
        write_varint(v, &mut buf);
        let (decoded, n) = upb_core::wire::reader::read_varint(&buf).unwrap();
        prop_assert_eq!(decoded, v);
        prop_assert_eq!(n, buf.len());
    }

    /// zigzag encode/decode is its own inverse for every i32/i64.
    #[test]
    fn zigzag_32_roundtrips(v: i32) {
        let encoded = upb_core::wire::reader::zigzag_encode_32(v);
        prop_assert_eq!(upb_core::wire::reader::zigzag_decode_32(encoded), v);
    }

    #[test]
    fn zigzag_64_roundtrips(v: i64) {
        let encoded = upb_core::wire::reader::zigzag_encode_64(v);
        prop_assert_eq!(upb_core::wire::reader::zigzag_decode_64(encoded), v);
    }

    /// A 10-byte varint whose final byte sets a bit beyond the lowest is
    /// rejected as malformed, whatever its leading 9 bytes are (spec.md §8
    /// negative scenario, generalized from the single "11 consecutive 0x80
    /// bytes" example to every overlong final byte).
    #[test]
    fn overlong_varint_final_byte_is_always_rejected(
        prefix in prop::array::uniform9(0x80u8..=0xffu8),
        last in 2u8..=0xffu8,
    ) {
        let mut buf = prefix.to_vec();
        buf.push(last);
        prop_assert!(upb_core::wire::reader::read_varint(&buf).is_none());
    }
}

fn build_roundtrip_schema() -> (upb_core::DefPool, upb_core::schema::MessageId) {
    let mut builder = DefPoolBuilder::new();
    let file = builder.add_file("rt.proto", "rt", Syntax::Proto2).unwrap();
    let msg_id;
    {
        let mut msg = builder.add_message(file, "rt.Test").unwrap();
        msg.add_field("x", 1, Label::Optional, FieldType::Int32);
        msg.add_field("y", 2, Label::Optional, FieldType::Fixed64);
        msg.add_field("z", 3, Label::Optional, FieldType::Bytes);
        msg_id = msg.id();
    }
    let pool = builder.freeze().unwrap();
    (pool, msg_id)
}

proptest! {
    /// Encoding an arbitrary (x, y, z) triple through the schema-driven
    /// encoder and decoding it back recovers the same values — the
    /// decode(encode(m)) == m round trip named in spec.md §8, scoped to the
    /// scalar/bytes fields this crate's encoder and decoder both dispatch
    /// on (no sub-messages, matching spec.md's "equivalence that ignores
    /// field order" framing, since a flat message has no order to lose).
    #[test]
    fn decode_recovers_hand_encoded_scalar_fields(
        x in any::<i32>(),
        y in any::<u64>(),
        z in prop::collection::vec(any::<u8>(), 0..32),
    ) {
        let (pool, _msg_id) = build_roundtrip_schema();
        let test_def = pool.symbol_table().lookup_message("rt.Test").unwrap();
        let table = MiniTable::build(test_def);

        let mut buf = Vec::new();
        buf.push(0o10);
        write_varint(x as u32 as u64, &mut buf);
        buf.push(0o21);
        buf.extend_from_slice(&y.to_le_bytes());
        buf.push(0o32);
        write_varint(z.len() as u64, &mut buf);
        buf.extend_from_slice(&z);

        let owner = StandaloneArena::new();
        let arena = owner.arena();
        let msg = Message::new_in(&arena, test_def.instance_size()).unwrap();
        let status = decode(&buf, msg, &table, &arena, DecodeOptions::new());
        prop_assert_eq!(status, DecodeStatus::Ok);

        prop_assert_eq!(msg.get::<i32>(table.field_by_number(1).unwrap().offset() as u32), x);
        prop_assert_eq!(msg.get::<u64>(table.field_by_number(2).unwrap().offset() as u32), y);
        let z_view = msg.string_view(table.field_by_number(3).unwrap().offset() as u32);
        prop_assert_eq!(unsafe { z_view.as_slice() }, z.as_slice());

        let re_encoded = upb_core::encode(msg, &table, &arena);
        prop_assert_eq!(re_encoded, buf);
    }
}
