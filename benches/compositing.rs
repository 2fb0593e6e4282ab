//! Compositing Performance Benchmarks
//!
//! Transform computation, frame delivery and software snapshot rendering

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ontop_capture::*;
use std::time::{Duration, Instant};

fn wait_for_presented(compositor: &CaptureCompositor<SoftwareBackend>, count: u64) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        let presented = compositor
            .session_stats()
            .map(|stats| stats.frames_presented)
            .unwrap_or(0);
        if presented >= count {
            return true;
        }
        std::thread::yield_now();
    }
    false
}

fn bench_area_transform(c: &mut Criterion) {
    let mut group = c.benchmark_group("area_transform");

    let source = Size::new(1920, 1080);
    let display = Size::new(800, 600);
    let area = CaptureArea::new(960, 540, 960, 540);

    group.bench_function("compute", |b| {
        b.iter(|| AreaTransform::compute(black_box(Some(&area)), black_box(source), display))
    });
    group.bench_function("effective_and_invert", |b| {
        b.iter(|| {
            AreaTransform::effective(black_box(Some(&area)), black_box(source), display)
                .ok()
                .and_then(|t| t.invert())
        })
    });

    group.finish();
}

fn bench_frame_delivery(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_delivery");
    group.measurement_time(Duration::from_secs(10));

    for (name, width, height) in [("720p", 1280, 720), ("1080p", 1920, 1080)] {
        let size = Size::new(width, height);
        group.throughput(Throughput::Elements(size.pixel_count() as u64));

        group.bench_with_input(BenchmarkId::new("push_to_present", name), &size, |b, &size| {
            let backend = SoftwareBackend::with_pool(BufferPool::new());
            let source = CaptureSource::monitor(1);
            let feeder = backend.register_source(source, size);
            let mut compositor = match CaptureCompositor::new(
                backend,
                SoftwareVisual::new(),
                size,
                CaptureConfig::default(),
            ) {
                Ok(compositor) => compositor,
                Err(_) => {
                    b.iter(|| {});
                    return;
                }
            };
            if compositor.set_source(source, None).is_err() {
                b.iter(|| {});
                return;
            }

            let frame = RawImage::filled(size, PixelFormat::BGRA8, [64, 128, 192, 255]);
            let mut target = 0;
            b.iter(|| {
                target += 1;
                let _ = feeder.push_image(&frame);
                wait_for_presented(&compositor, target)
            })
        });
    }

    group.finish();
}

fn bench_snapshot(c: &mut Criterion) {
    let mut group = c.benchmark_group("software_snapshot");

    for (name, width, height) in [("small", 320, 240), ("medium", 800, 600)] {
        let display = Size::new(width, height);
        group.throughput(Throughput::Elements(display.pixel_count() as u64));

        group.bench_with_input(BenchmarkId::new("cropped", name), &display, |b, &display| {
            let backend = SoftwareBackend::with_pool(BufferPool::new());
            let source = CaptureSource::monitor(2);
            let source_size = Size::new(1920, 1080);
            let feeder = backend.register_source(source, source_size);
            let mut compositor = match CaptureCompositor::new(
                backend,
                SoftwareVisual::new(),
                display,
                CaptureConfig::default(),
            ) {
                Ok(compositor) => compositor,
                Err(_) => {
                    b.iter(|| {});
                    return;
                }
            };

            let area = CaptureArea::new(960, 540, 960, 540);
            let ready = compositor.set_source(source, Some(area)).is_ok()
                && feeder
                    .push_frame(source_size, [10, 20, 30, 255])
                    .unwrap_or(false)
                && wait_for_presented(&compositor, 1);
            if !ready {
                b.iter(|| {});
                return;
            }

            b.iter(|| black_box(compositor.visual().snapshot()))
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_area_transform,
    bench_frame_delivery,
    bench_snapshot
);
criterion_main!(benches);
