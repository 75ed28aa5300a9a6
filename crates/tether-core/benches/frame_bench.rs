use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use tether_core::{FRAME_HEADER_SIZE, Frame, FrameHeader, MAX_BODY_SIZE, PeerId};

fn bench_frame_parse_sizes(c: &mut Criterion) {
    let sizes: Vec<(usize, &str)> = vec![
        (0, "empty"),
        (64, "64_bytes"),
        (1024, "1024_bytes"),
        (16 * 1024, "16_kib"),
        (MAX_BODY_SIZE, "max_body"),
    ];

    let mut group = c.benchmark_group("frame_parse_by_size");

    for (size, name) in sizes {
        let frame_data = Frame::data(PeerId::generate(), vec![0x42; size])
            .encode()
            .unwrap();

        group.throughput(Throughput::Bytes(frame_data.len() as u64));
        group.bench_function(name, |b| b.iter(|| Frame::parse(black_box(&frame_data))));
    }

    group.finish();
}

fn bench_frame_encode_sizes(c: &mut Criterion) {
    let sizes: Vec<(usize, &str)> = vec![
        (64, "64_bytes"),
        (1024, "1024_bytes"),
        (16 * 1024, "16_kib"),
        (MAX_BODY_SIZE, "max_body"),
    ];

    let mut group = c.benchmark_group("frame_encode_by_size");
    let id = PeerId::generate();

    for (size, name) in sizes {
        let frame = Frame::data(id, vec![0x42; size]);

        group.throughput(Throughput::Bytes((FRAME_HEADER_SIZE + size) as u64));
        group.bench_function(name, |b| b.iter(|| black_box(&frame).encode()));
    }

    group.finish();
}

fn bench_header_parse(c: &mut Criterion) {
    let header = Frame::keepalive(PeerId::ZERO)
        .header()
        .to_bytes()
        .unwrap();

    c.bench_function("header_parse", |b| {
        b.iter(|| FrameHeader::parse(black_box(&header)))
    });
}

fn bench_stream_roundtrip(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();
    let frame = Frame::data(PeerId::generate(), vec![0xCC; 1200]);

    let mut group = c.benchmark_group("frame_stream_roundtrip");
    group.throughput(Throughput::Bytes(frame.encoded_len() as u64));

    group.bench_function("write_and_read_1200_bytes", |b| {
        b.iter(|| {
            runtime.block_on(async {
                let mut wire = Vec::with_capacity(frame.encoded_len());
                tether_core::write_frame(&mut wire, black_box(&frame))
                    .await
                    .unwrap();
                let mut reader = &wire[..];
                let parsed = tether_core::read_frame(&mut reader).await.unwrap();
                black_box(parsed.body().len())
            })
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_frame_parse_sizes,
    bench_frame_encode_sizes,
    bench_header_parse,
    bench_stream_roundtrip
);
criterion_main!(benches);
