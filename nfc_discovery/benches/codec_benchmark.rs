//! Codec benchmarks.
//!
//! The pure frame builders and parsers run once per anticollision step or
//! inventory slot; they must stay far below the RF frame time (~100 µs).

use criterion::{Criterion, criterion_group, criterion_main};
use nfc_discovery::codec::i18000p3m3::{self, SlotResults};
use nfc_discovery::codec::type_a;
use nfc_discovery::codec::type_v::{self, InventoryMask};
use std::hint::black_box;

fn bench_type_a(c: &mut Criterion) {
    let uid = [0x04, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99];

    c.bench_function("type_a_cascade_fields_10b", |b| {
        b.iter(|| type_a::cascade_fields(black_box(&uid)).unwrap());
    });

    let cl = [0x88, 0x04, 0x11, 0x22, 0x88 ^ 0x04 ^ 0x11 ^ 0x22];
    c.bench_function("type_a_anticollision_frame", |b| {
        b.iter(|| type_a::anticollision_frame(1, black_box(&cl), black_box(19)).unwrap());
    });
}

fn bench_type_v(c: &mut Criterion) {
    let mask = InventoryMask {
        value: 0x0123_4567,
        len: 28,
    };
    c.bench_function("type_v_inventory_frame", |b| {
        b.iter(|| type_v::inventory(Some(0x07), false, black_box(&mask)).unwrap());
    });
}

fn bench_i18000p3m3(c: &mut Criterion) {
    let reply = [0x0A, 0x00, 0x80, 0x01, 0x00, 0x02, 0x12, 0x34];
    c.bench_function("i18000p3m3_parse_tag_reply_xpc", |b| {
        b.iter(|| i18000p3m3::parse_tag_reply(black_box(&reply)).unwrap().uii.len());
    });

    // 16 slots: timeouts, collisions and 4-byte UII replies
    let mut stream = Vec::new();
    for slot in 0..16u8 {
        match slot % 4 {
            0 => stream.push(2),
            1 => stream.push(3),
            _ => stream.extend_from_slice(&[0, 6, 0, 0x10, 0x00, slot, 1, 2, 3]),
        }
    }
    c.bench_function("i18000p3m3_slot_results_16", |b| {
        b.iter(|| SlotResults::new(black_box(&stream)).filter(Result::is_ok).count());
    });

    let uii: Vec<u8> = (0..62).collect();
    c.bench_function("i18000p3m3_select_chain_62b", |b| {
        b.iter(|| {
            let mask = i18000p3m3::uii_mask(0xF800, black_box(&uii)).unwrap();
            i18000p3m3::select_chunks(&mask).count()
        });
    });
}

criterion_group!(benches, bench_type_a, bench_type_v, bench_i18000p3m3);
criterion_main!(benches);
