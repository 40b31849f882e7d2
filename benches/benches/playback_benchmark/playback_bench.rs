//! Чтение wire-блоков из трёх раскладок записи.
//!
//! Запуск: cargo bench -p rhx-benchmark

use std::{hint::black_box, path::PathBuf};

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rhx_core::{
    open_format_manager, wire_block_size, ManagerOptions, RecordingLayout, RetryPolicy,
    SampleFrame, SessionWriter,
};
use rhx_types::{
    AcquisitionDescriptor, ChannelDescriptor, ChannelGroup, ControllerType, FileVersion,
    HeaderFamily, SignalType,
};
use tempfile::TempDir;

const CHANNELS: i16 = 32;
const BLOCKS: usize = 200;

fn descriptor() -> AcquisitionDescriptor {
    let mut d = AcquisitionDescriptor::new(
        HeaderFamily::Rhd,
        ControllerType::RecordUsb3,
        FileVersion::new(3, 0),
        30_000.0,
    );
    let channels = (0..CHANNELS)
        .map(|i| {
            ChannelDescriptor::new(&format!("A-{i:03}"), SignalType::Amplifier, 0, i)
        })
        .collect();
    d.groups.push(ChannelGroup::new("Port A", "A", channels));
    d.refresh_data_streams();
    d
}

fn write_recording(
    dir: &TempDir,
    desc: &AcquisitionDescriptor,
    layout: RecordingLayout,
) -> PathBuf {
    let sub = dir.path().join(layout.to_string());
    std::fs::create_dir_all(&sub).unwrap();
    let path = sub.join("bench.rhd");
    let mut writer = SessionWriter::create(&path, desc, layout).unwrap();
    let mut frame = SampleFrame::new(desc);

    for i in 0..BLOCKS * desc.samples_per_block {
        frame.timestamp = i as i32;
        for ch in desc.channels() {
            frame.set(ch.signal_type, ch, (i as u16).wrapping_mul(31) ^ ch.chip_channel as u16);
        }
        writer.write_frame(&frame).unwrap();
    }

    writer.finish().unwrap()
}

fn bench_read_layouts(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let desc = descriptor();
    let mut group = c.benchmark_group("read_raw_blocks");

    group.throughput(Throughput::Bytes((BLOCKS * wire_block_size(&desc)) as u64));

    for layout in [
        RecordingLayout::Traditional,
        RecordingLayout::PerSignalType,
        RecordingLayout::PerChannel,
    ] {
        let path = write_recording(&dir, &desc, layout);
        let options = ManagerOptions {
            retry: RetryPolicy::immediate(),
            ..ManagerOptions::default()
        };
        let mut manager = open_format_manager(&path, options).unwrap();
        let mut frame = SampleFrame::new(manager.descriptor());
        let mut out = Vec::with_capacity(BLOCKS * wire_block_size(&desc));
        let first = manager.first_timestamp();

        group.bench_with_input(BenchmarkId::from_parameter(layout), &layout, |b, _| {
            b.iter(|| {
                manager.jump_to_timestamp(first).unwrap();
                out.clear();
                while manager.read_raw_blocks(8, &mut frame, &mut out).unwrap() > 0 {}
                black_box(out.len());
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_read_layouts);
criterion_main!(benches);
