//! Throughput benchmarks for frame encoding and response reassembly.
//!
//! ## Running the benchmarks
//!
//! ```bash
//! cargo bench -p nanos-apdu
//! ```
//!
//! ## Benchmarks included
//!
//! - `encode_command` - Encode each command with a typical payload
//! - `reassemble_N_bytes` - Reassemble a response of N data bytes

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use nanos_apdu::{Command, OutboundFrame, ResponseAssembler, ResponseFrames, HASH_SIZE, SW_OK};

fn bench_encode_command(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_command");

    let index = 7u32.to_be_bytes();
    let mut sign_payload = index.to_vec();
    sign_payload.extend_from_slice(&[0x5A; HASH_SIZE]);

    let cases: [(Command, &[u8]); 3] = [
        (Command::GetVersion, &[]),
        (Command::GetAddress, &index),
        (Command::SignHash, &sign_payload),
    ];

    for (command, payload) in cases {
        group.bench_with_input(
            BenchmarkId::from_parameter(command.as_str()),
            &payload,
            |b, payload| {
                b.iter(|| {
                    let frame = OutboundFrame::encode(command, black_box(payload))
                        .expect("payload fits");
                    black_box(frame)
                });
            },
        );
    }

    group.finish();
}

fn bench_reassemble(c: &mut Criterion) {
    let mut group = c.benchmark_group("reassemble");

    for size in [3usize, 20, 65, 512].iter() {
        let data = vec![0xC3u8; *size];
        let frames = ResponseFrames::encode(&data, SW_OK).expect("response fits");

        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(
            BenchmarkId::new("reassemble_bytes", size),
            &frames,
            |b, frames| {
                b.iter(|| {
                    let mut assembler = ResponseAssembler::new();
                    let mut result = None;
                    for frame in frames {
                        result = assembler.push(black_box(frame)).expect("valid frame");
                    }
                    black_box(result)
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_encode_command, bench_reassemble);
criterion_main!(benches);
