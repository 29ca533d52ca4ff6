// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use criterion::{criterion_group, criterion_main, Criterion};
use edgefirst_still::{
    format::{PixelFormat, StreamConfig},
    sink::{encode_png, FrameView},
    virt::test_pattern,
};

fn benchmark_png(frame: &[u8], config: &StreamConfig) {
    let view = FrameView::new(
        frame,
        config.width,
        config.height,
        config.stride,
        config.pixel_format,
    )
    .unwrap();
    let _ = encode_png(&view).unwrap();
}

pub fn benchmark_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("png");
    group.sample_size(10);
    for dim in [(320, 240), (640, 480), (1280, 720), (2028, 1520)].iter() {
        let mut config = StreamConfig::new(dim.0, dim.1, PixelFormat::Bgr888);
        config.stride = (dim.0 * 3).div_ceil(64) * 64;
        let frame = test_pattern(&config);
        group.bench_with_input(format!("{}x{}", dim.0, dim.1), &frame, |b, frame| {
            b.iter(|| benchmark_png(frame, &config))
        });
    }
}

criterion_group!(benches, benchmark_encode);
criterion_main!(benches);
