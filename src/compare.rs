//! Unknown-field equality comparison, grounded in
//! `upb/message/internal/compare_unknown.c`.
//!
//! A decoder preserves unknown bytes verbatim and in arrival order
//! (`crate::message::Message::append_unknown`), so two messages that a
//! producer would consider equal can still differ byte-for-byte in their
//! unknown-field spans whenever the wire bytes were re-ordered or re-encoded
//! in between (the round-trip testable property requires comparing "under
//! an equivalence that ignores field order"). This module parses each span
//! into a flat list of `(tag, payload)` entries, recursing into groups, sorts
//! both lists by tag with a stable sort, and compares the sorted lists.
//!
//! Unlike the upstream C this has no `longjmp`: a malformed span or a depth
//! overrun just returns the matching [`UnknownCompareResult`] variant.
//! Known-field comparison (schema-aware message equality) is out of scope
//! here — see DESIGN.md.

extern crate alloc;

use alloc::vec::Vec;

use crate::wire::{eps_copy::EpsCopyInputStream, reader, WireType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnknownCompareResult {
    Equal,
    NotEqual,
    Malformed,
    MaxDepthExceeded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum FieldData<'a> {
    Varint(u64),
    Fixed64(u64),
    Fixed32(u32),
    Delimited(&'a [u8]),
    Group(Vec<UnknownField<'a>>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct UnknownField<'a> {
    tag: u64,
    data: FieldData<'a>,
}

const DEFAULT_MAX_DEPTH: u32 = 100;

/// Compares the unknown-field spans of two messages for equality, ignoring
/// the order unknown fields happened to arrive in (but not the order of
/// repeated occurrences of the *same* tag, since a stable sort preserves
/// relative order among equal keys, matching upb's merge sort).
pub fn unknown_fields_equal(msg1: &crate::message::Message, msg2: &crate::message::Message) -> UnknownCompareResult {
    unknown_fields_equal_with_depth(msg1.unknown_fields(), msg2.unknown_fields(), DEFAULT_MAX_DEPTH)
}

fn unknown_fields_equal_with_depth(buf1: &[u8], buf2: &[u8], max_depth: u32) -> UnknownCompareResult {
    if buf1.is_empty() && buf2.is_empty() {
        return UnknownCompareResult::Equal;
    }
    let mut fields1 = match parse_fields(buf1, max_depth) {
        Ok(f) => f,
        Err(e) => return e,
    };
    let mut fields2 = match parse_fields(buf2, max_depth) {
        Ok(f) => f,
        Err(e) => return e,
    };
    fields1.sort_by_key(|f| f.tag);
    fields2.sort_by_key(|f| f.tag);
    if fields1 == fields2 {
        UnknownCompareResult::Equal
    } else {
        UnknownCompareResult::NotEqual
    }
}

fn parse_fields(buf: &[u8], max_depth: u32) -> Result<Vec<UnknownField<'_>>, UnknownCompareResult> {
    if max_depth == 0 {
        return Err(UnknownCompareResult::MaxDepthExceeded);
    }
    let mut stream = EpsCopyInputStream::new(buf);
    let mut out = Vec::new();
    while !stream.is_done() {
        let Some(tag) = stream.read_tag() else { return Err(UnknownCompareResult::Malformed) };
        let (_, wire_bits) = reader::split_tag(tag);
        let Some(wire_type) = WireType::from_u8(wire_bits) else {
            return Err(UnknownCompareResult::Malformed);
        };
        let data = match wire_type {
            WireType::Varint => {
                let Some(v) = stream.read_varint() else { return Err(UnknownCompareResult::Malformed) };
                FieldData::Varint(v)
            }
            WireType::Fixed64 => {
                let Some(v) = stream.read_fixed64() else { return Err(UnknownCompareResult::Malformed) };
                FieldData::Fixed64(v)
            }
            WireType::Fixed32 => {
                let Some(v) = stream.read_fixed32() else { return Err(UnknownCompareResult::Malformed) };
                FieldData::Fixed32(v)
            }
            WireType::LengthDelimited => {
                let Some(size) = stream.read_size() else { return Err(UnknownCompareResult::Malformed) };
                let Some(bytes) = stream.read_string_aliased(size as usize) else {
                    return Err(UnknownCompareResult::Malformed);
                };
                FieldData::Delimited(bytes)
            }
            WireType::StartGroup => FieldData::Group(parse_group_body(&mut stream, max_depth - 1)?),
            WireType::EndGroup => return Err(UnknownCompareResult::Malformed),
        };
        out.push(UnknownField { tag, data });
    }
    Ok(out)
}

fn parse_group_body<'a>(
    stream: &mut EpsCopyInputStream<'a>,
    max_depth: u32,
) -> Result<Vec<UnknownField<'a>>, UnknownCompareResult> {
    if max_depth == 0 {
        return Err(UnknownCompareResult::MaxDepthExceeded);
    }
    let mut out = Vec::new();
    loop {
        if stream.is_done() {
            return Err(UnknownCompareResult::Malformed);
        }
        let Some(tag) = stream.read_tag() else { return Err(UnknownCompareResult::Malformed) };
        let (_, wire_bits) = reader::split_tag(tag);
        let Some(wire_type) = WireType::from_u8(wire_bits) else {
            return Err(UnknownCompareResult::Malformed);
        };
        if wire_type == WireType::EndGroup {
            return Ok(out);
        }
        let data = match wire_type {
            WireType::Varint => {
                let Some(v) = stream.read_varint() else { return Err(UnknownCompareResult::Malformed) };
                FieldData::Varint(v)
            }
            WireType::Fixed64 => {
                let Some(v) = stream.read_fixed64() else { return Err(UnknownCompareResult::Malformed) };
                FieldData::Fixed64(v)
            }
            WireType::Fixed32 => {
                let Some(v) = stream.read_fixed32() else { return Err(UnknownCompareResult::Malformed) };
                FieldData::Fixed32(v)
            }
            WireType::LengthDelimited => {
                let Some(size) = stream.read_size() else { return Err(UnknownCompareResult::Malformed) };
                let Some(bytes) = stream.read_string_aliased(size as usize) else {
                    return Err(UnknownCompareResult::Malformed);
                };
                FieldData::Delimited(bytes)
            }
            WireType::StartGroup => FieldData::Group(parse_group_body(stream, max_depth - 1)?),
            WireType::EndGroup => unreachable!(),
        };
        out.push(UnknownField { tag, data });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::{Arena, StandaloneArena};
    use crate::message::Message;
    use crate::schema::INTERNAL_HEADER_SIZE;

    fn msg_with_unknown<'a>(arena: &Arena<'a>, bytes: &[u8]) -> &'a mut Message {
        let m = Message::new_in(arena, INTERNAL_HEADER_SIZE as u32).unwrap();
        m.append_unknown(arena, bytes).unwrap();
        m
    }

    #[test]
    fn reordered_unknown_fields_compare_equal() {
        let owner = StandaloneArena::new();
        let arena = owner.arena();
        // field 1 varint 1, field 2 varint 2 vs. the same fields reversed.
        let a = msg_with_unknown(&arena, &[0x08, 0x01, 0x10, 0x02]);
        let b = msg_with_unknown(&arena, &[0x10, 0x02, 0x08, 0x01]);
        assert_eq!(unknown_fields_equal(a, b), UnknownCompareResult::Equal);
    }

    #[test]
    fn different_values_compare_not_equal() {
        let owner = StandaloneArena::new();
        let arena = owner.arena();
        let a = msg_with_unknown(&arena, &[0x08, 0x01]);
        let b = msg_with_unknown(&arena, &[0x08, 0x02]);
        assert_eq!(unknown_fields_equal(a, b), UnknownCompareResult::NotEqual);
    }

    #[test]
    fn both_empty_is_equal() {
        let owner = StandaloneArena::new();
        let arena = owner.arena();
        let a = msg_with_unknown(&arena, &[]);
        let b = msg_with_unknown(&arena, &[]);
        assert_eq!(unknown_fields_equal(a, b), UnknownCompareResult::Equal);
    }
}
