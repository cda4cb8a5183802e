//! Benchmarks for the protocol hot paths.
//!
//! Run with: `cargo bench --bench proto_bench`

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use uuid::Uuid;

use edgewire::codec::{build_codec, CodecRegistry, ScalarKind};
use edgewire::proto::messages::parse_server_message;
use edgewire::proto::{server_tag, PacketReader, PacketWriter};

/// Generate a Data message carrying one row of the given size.
fn make_data_payload(row_size: usize) -> Bytes {
    let mut w = PacketWriter::new();
    w.put_u16(1);
    w.put_len_bytes(&vec![0x42u8; row_size]);
    w.finish()
}

/// Generate a realistic error response payload.
fn make_error_payload() -> Bytes {
    let mut w = PacketWriter::new();
    w.put_u8(120);
    w.put_u32(0x0503_0101);
    w.put_str("could not serialize access due to concurrent update");
    w.put_headers(&[
        (0x0001, b"serialization failure detail"),
        (0x0002, b"retry the transaction"),
    ]);
    w.finish()
}

/// Descriptor blob for an object shape over three scalars.
fn make_shape_blob() -> Bytes {
    let mut w = PacketWriter::new();
    for kind in [ScalarKind::Uuid, ScalarKind::Str, ScalarKind::Int64] {
        w.put_u8(2);
        w.put_uuid(kind.well_known_id());
    }
    w.put_u8(1); // object shape
    w.put_uuid(Uuid::from_u128(0xBE11C4));
    w.put_u16(3);
    w.put_str("id");
    w.put_u8(1);
    w.put_u16(0);
    w.put_str("name");
    w.put_u8(0);
    w.put_u16(1);
    w.put_str("count");
    w.put_u8(0);
    w.put_u16(2);
    w.finish()
}

/// Row payload matching the shape above.
fn make_shape_row() -> Bytes {
    let mut w = PacketWriter::new();
    w.put_u32(3);
    w.put_i32(0);
    w.put_i32(16);
    w.put_uuid(Uuid::from_u128(0x1234));
    w.put_i32(0);
    let name = b"a moderately sized name";
    w.put_i32(name.len() as i32);
    w.put_raw(name);
    w.put_i32(0);
    w.put_i32(8);
    w.put_i64(123_456_789);
    w.finish()
}

fn bench_parse_data(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_data");

    for size in [64, 256, 1024, 4096, 16384] {
        let payload = make_data_payload(size);
        group.throughput(Throughput::Bytes(payload.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &payload, |b, payload| {
            b.iter(|| parse_server_message(server_tag::DATA, black_box(payload.clone())));
        });
    }

    group.finish();
}

fn bench_parse_error_response(c: &mut Criterion) {
    let payload = make_error_payload();

    c.bench_function("parse_error_response", |b| {
        b.iter(|| parse_server_message(server_tag::ERROR_RESPONSE, black_box(payload.clone())));
    });
}

fn bench_build_codec(c: &mut Criterion) {
    let blob = make_shape_blob();
    let root = Uuid::from_u128(0xBE11C4);

    c.bench_function("build_codec_shape", |b| {
        b.iter(|| {
            // Fresh registry per iteration so the build is not a cache hit.
            let registry = CodecRegistry::new();
            build_codec(&registry, black_box(root), black_box(blob.clone())).unwrap()
        });
    });
}

fn bench_decode_row(c: &mut Criterion) {
    let registry = CodecRegistry::new();
    let codec = build_codec(&registry, Uuid::from_u128(0xBE11C4), make_shape_blob()).unwrap();
    let row = make_shape_row();

    c.bench_function("decode_object_row", |b| {
        b.iter(|| {
            codec
                .decode(&mut PacketReader::new(black_box(row.clone())))
                .unwrap()
        });
    });
}

criterion_group!(
    benches,
    bench_parse_data,
    bench_parse_error_response,
    bench_build_codec,
    bench_decode_row,
);
criterion_main!(benches);
