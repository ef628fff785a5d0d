use std::io::Cursor;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use image::{ImageFormat, Rgba, RgbaImage};
use tac_map::entity::{StreamMessage, TrackedEntity};
use tac_map::geo::{haversine_m, LatLon};
use tac_map::map::tiles::decode_tile;
use tac_map::sync::SyncEngine;

const ORIGIN: LatLon = LatLon::new(28.5471, 77.1946);

/// `n` units scattered around the origin, shifted by `step`
fn units(n: usize, step: usize) -> Vec<TrackedEntity> {
    (0..n)
        .map(|i| {
            let d = (i + step) as f64 * 1e-5;
            TrackedEntity::new((i + 1).to_string(), Some(LatLon::new(ORIGIN.lat + d, ORIGIN.lon - d)))
                .with_orientation((i * 15) as f64)
        })
        .collect()
}

fn bench_sync_apply(c: &mut Criterion) {
    let mut group = c.benchmark_group("sync_apply");
    for n in [10usize, 100, 1000] {
        group.bench_with_input(BenchmarkId::new("moving_units", n), &n, |b, &n| {
            let mut engine = SyncEngine::new(500);
            let mut step = 0;
            b.iter(|| {
                step += 1;
                black_box(engine.apply(units(n, step), ORIGIN));
            });
        });
    }
    group.finish();
}

fn bench_haversine(c: &mut Criterion) {
    let targets: Vec<LatLon> = units(1000, 0).into_iter().filter_map(|u| u.position).collect();
    c.bench_function("haversine_1000", |b| {
        b.iter(|| {
            for &t in &targets {
                black_box(haversine_m(black_box(ORIGIN), t));
            }
        });
    });
}

fn bench_tile_decode(c: &mut Criterion) {
    let img = RgbaImage::from_fn(256, 256, |x, y| Rgba([(x % 256) as u8, (y % 256) as u8, 90, 255]));
    let mut png = Cursor::new(Vec::new());
    if img.write_to(&mut png, ImageFormat::Png).is_err() {
        return;
    }
    let png = png.into_inner();
    c.bench_function("decode_png_256", |b| {
        b.iter(|| black_box(decode_tile(black_box(&png))))
    });
}

fn bench_stream_parse(c: &mut Criterion) {
    let line = br#"{"type":"soldier_movement","soldier_id":"7","team":"blue","gps":{"latitude":28.5481,"longitude":77.1956},"imu":{"yaw":45},"hit_status":false}"#;
    c.bench_function("parse_movement", |b| {
        b.iter(|| {
            let mut bytes = line.to_vec();
            black_box(StreamMessage::parse(&mut bytes))
        })
    });
}

criterion_group!(benches, bench_sync_apply, bench_haversine, bench_tile_decode, bench_stream_parse);
criterion_main!(benches);
