use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use upb_core::schema::{DefPool, DefPoolBuilder, FieldType, Label, Syntax};
use upb_core::{decode, DecodeOptions, DecodeStatus, Message, MiniTable, StandaloneArena};

// Self-referential message: two scalars, a bytes field, one optional child
// of the same type. Mirrors the fixed-byte smoke test in `src/lib.rs`.
fn build_schema() -> DefPool {
    let mut builder = DefPoolBuilder::new();
    let file = builder.add_file("bench.proto", "bench", Syntax::Proto2).unwrap();

    let mut msg = builder.add_message(file, "bench.Test").unwrap();
    msg.add_field("x", 1, Label::Optional, FieldType::Int32);
    msg.add_field("y", 2, Label::Optional, FieldType::Fixed64);
    msg.add_field("z", 3, Label::Optional, FieldType::Bytes);
    msg.add_field("child1", 4, Label::Optional, FieldType::Message)
        .set_subdef_name("bench.Test");

    builder.freeze().unwrap()
}

fn make_small() -> Vec<u8> {
    vec![0o10, 42, 0o21, 0xEF, 0xBE, 0xAD, 0xDE, 0, 0, 0, 0]
}

fn make_medium() -> Vec<u8> {
    let mut buf = vec![0o10, 42, 0o21, 0xEF, 0xBE, 0xAD, 0xDE, 0, 0, 0, 0];
    let z = b"Hello World! This is a test string with some content.";
    buf.push(0o32);
    buf.push(z.len() as u8);
    buf.extend_from_slice(z);
    let child = [0o10u8, 123, 0o21, 200, 1, 0, 0, 0, 0, 0];
    buf.push(0o42);
    buf.push(child.len() as u8);
    buf.extend_from_slice(&child);
    buf
}

/// Decodes `buf` once via the fast path and once forced through the
/// mini-table-only path and asserts the two agree, before the timed loop
/// below ever runs — cheap enough to check unconditionally, not just under
/// `--bench`, since the two tiers must never disagree.
fn assert_fast_and_mini_table_agree(buf: &[u8], table: &MiniTable<'_>, instance_size: u32) {
    let owner_a = StandaloneArena::new();
    let arena_a = owner_a.arena();
    let msg_a = Message::new_in(&arena_a, instance_size).unwrap();
    let status_a = decode(buf, msg_a, table, &arena_a, DecodeOptions::new());

    let owner_b = StandaloneArena::new();
    let arena_b = owner_b.arena();
    let msg_b = Message::new_in(&arena_b, instance_size).unwrap();
    let status_b = decode(buf, msg_b, table, &arena_b, DecodeOptions::new().force_mini_table(true));

    assert_eq!(status_a, DecodeStatus::Ok);
    assert_eq!(status_a, status_b);
    assert_eq!(upb_core::encode(msg_a, table, &arena_a), upb_core::encode(msg_b, table, &arena_b));
}

fn decode_benchmarks(c: &mut Criterion) {
    let pool = build_schema();
    let test_def = pool.symbol_table().lookup_message("bench.Test").unwrap();
    let table = MiniTable::build(test_def);
    let instance_size = test_def.instance_size();

    let small = make_small();
    let medium = make_medium();

    assert_fast_and_mini_table_agree(&small, &table, instance_size);
    assert_fast_and_mini_table_agree(&medium, &table, instance_size);

    let mut group = c.benchmark_group("decode");
    for (name, buf) in [("small", &small), ("medium", &medium)] {
        group.throughput(Throughput::Bytes(buf.len() as u64));
        group.bench_function(format!("{name}_fast_path"), |b| {
            b.iter(|| {
                let owner = StandaloneArena::new();
                let arena = owner.arena();
                let msg = Message::new_in(&arena, instance_size).unwrap();
                black_box(decode(black_box(buf), msg, &table, &arena, DecodeOptions::new()))
            })
        });
        group.bench_function(format!("{name}_forced_mini_table"), |b| {
            b.iter(|| {
                let owner = StandaloneArena::new();
                let arena = owner.arena();
                let msg = Message::new_in(&arena, instance_size).unwrap();
                black_box(decode(
                    black_box(buf),
                    msg,
                    &table,
                    &arena,
                    DecodeOptions::new().force_mini_table(true),
                ))
            })
        });
    }
    group.finish();
}

criterion_group!(benches, decode_benchmarks);
criterion_main!(benches);
