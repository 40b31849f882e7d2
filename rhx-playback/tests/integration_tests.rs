use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    sync::atomic::Ordering,
    time::{Duration, Instant},
};

use rhx_core::{wire_block_size, RecordingLayout, SampleFrame, SessionWriter};
use rhx_playback::{
    PlaybackConfig, PlaybackError, PlaybackEvent, PlaybackReader, PlaybackTransport,
};
use rhx_types::{
    AcquisitionDescriptor, ChannelDescriptor, ChannelGroup, CodecError, ControllerType,
    FileVersion, HeaderFamily, SignalType,
};
use tempfile::TempDir;

// ===========================================================================
// Helpers
// ===========================================================================

/// RHD v1, два канала усилителя, блок = 60 выборок.
fn rhd_v1(sample_rate: f32) -> AcquisitionDescriptor {
    let mut d = AcquisitionDescriptor::new(
        HeaderFamily::Rhd,
        ControllerType::RecordUsb2,
        FileVersion::new(1, 0),
        sample_rate,
    );
    d.groups.push(ChannelGroup::new(
        "Port A",
        "A",
        vec![
            ChannelDescriptor::new("A-000", SignalType::Amplifier, 0, 0),
            ChannelDescriptor::new("A-001", SignalType::Amplifier, 0, 1),
        ],
    ));
    d.refresh_data_streams();
    d
}

fn write_recording(
    dir: &Path,
    desc: &AcquisitionDescriptor,
    layout: RecordingLayout,
    samples: usize,
) -> PathBuf {
    let path = dir.join("session.rhd");
    let mut writer = SessionWriter::create(&path, desc, layout).unwrap();
    let mut frame = SampleFrame::new(desc);

    for i in 0..samples {
        frame.timestamp = i as i32;
        for ch in desc.channels().filter(|c| c.enabled) {
            frame.set(ch.signal_type, ch, (i * 7) as u16 + ch.chip_channel as u16);
        }
        writer.write_frame(&frame).unwrap();
    }

    writer.finish().unwrap()
}

/// Быстрая конфигурация: почти без ожидания в конце файла.
fn fast_config(path: &Path) -> PlaybackConfig {
    PlaybackConfig {
        speed: 1_000_000.0,
        ..PlaybackConfig::new(path)
    }
    .with_retry_ms(1, 10)
}

/// Читает по одному блоку, пока читатель не дойдёт до конца.
fn play_to_end(reader: &mut PlaybackReader) -> Vec<u8> {
    let mut out = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(10);

    while !reader.is_at_end() && !reader.is_stopped() {
        assert!(Instant::now() < deadline, "playback did not finish");
        reader.read_raw_blocks(1, &mut out).unwrap();
    }

    out
}

// ===========================================================================
// Воспроизведение
// ===========================================================================

#[test]
fn test_fast_playback_delivers_every_block() {
    let dir = TempDir::new().unwrap();
    let desc = rhd_v1(20_000.0);
    let path = write_recording(dir.path(), &desc, RecordingLayout::Traditional, 600);

    let mut reader = PlaybackReader::open(fast_config(&path)).unwrap();
    let events = reader.subscribe();

    let out = play_to_end(&mut reader);

    assert_eq!(out.len(), 10 * wire_block_size(&desc));
    assert_eq!(reader.metrics().blocks_delivered.load(Ordering::Relaxed), 10);
    assert!(reader.metrics().eof_retries.load(Ordering::Relaxed) > 0);

    let received: Vec<_> = events.try_iter().collect();
    assert!(matches!(
        received.first(),
        Some(PlaybackEvent::Opened {
            layout: RecordingLayout::Traditional,
            ..
        })
    ));
    assert!(received
        .iter()
        .any(|e| matches!(e, PlaybackEvent::EndOfFile { .. })));
}

#[test]
fn test_end_of_file_stops_further_reads() {
    let dir = TempDir::new().unwrap();
    let desc = rhd_v1(20_000.0);
    let path = write_recording(dir.path(), &desc, RecordingLayout::PerChannel, 120);

    let mut reader = PlaybackReader::open(fast_config(&path)).unwrap();
    play_to_end(&mut reader);

    let mut out = Vec::new();
    assert_eq!(reader.read_raw_blocks(1, &mut out).unwrap(), 0);
    assert!(out.is_empty());
    assert!(reader.cursor().at_end);
}

#[test]
fn test_pacing_rejects_early_request() {
    let dir = TempDir::new().unwrap();
    // 60 мс на блок
    let desc = rhd_v1(1_000.0);
    let path = write_recording(dir.path(), &desc, RecordingLayout::Traditional, 600);

    let mut reader = PlaybackReader::open(PlaybackConfig::new(&path)).unwrap();
    let mut out = Vec::new();

    assert!(reader.read_raw_blocks(1, &mut out).unwrap() > 0);
    assert_eq!(reader.read_raw_blocks(1, &mut out).unwrap(), 0);

    assert_eq!(out.len(), wire_block_size(&desc));
    assert!(reader.metrics().not_ready_polls.load(Ordering::Relaxed) >= 1);
    assert!(!reader.is_at_end());
}

#[test]
fn test_cancel_stops_reading() {
    let dir = TempDir::new().unwrap();
    let desc = rhd_v1(20_000.0);
    let path = write_recording(dir.path(), &desc, RecordingLayout::Traditional, 600);

    let mut reader = PlaybackReader::open(fast_config(&path)).unwrap();
    let events = reader.subscribe();
    reader.cancel_token().cancel();

    let mut out = Vec::new();
    assert_eq!(reader.read_raw_blocks(1, &mut out).unwrap(), 0);
    assert!(!reader.is_at_end());
    assert!(!events
        .try_iter()
        .any(|e| matches!(e, PlaybackEvent::EndOfFile { .. })));
}

#[test]
fn test_live_mode_catches_up() {
    let dir = TempDir::new().unwrap();
    let desc = rhd_v1(20_000.0);
    let path = write_recording(dir.path(), &desc, RecordingLayout::PerSignalType, 600);

    // Порог 200 выборок, доступно 600
    let config = PlaybackConfig {
        live: true,
        speed: 3.0,
        catch_up_threshold_secs: 0.01,
        ..PlaybackConfig::new(&path)
    }
    .with_retry_ms(1, 10);

    let mut reader = PlaybackReader::open(config).unwrap();
    let events = reader.subscribe();
    assert_eq!(reader.speed(), 1.0);

    let mut out = Vec::new();
    assert!(reader.read_raw_blocks(1, &mut out).unwrap() > 0);

    assert_eq!(reader.speed(), 5.0);
    assert_eq!(reader.metrics().catch_up_events.load(Ordering::Relaxed), 1);
    assert!(events
        .try_iter()
        .any(|e| e == PlaybackEvent::SpeedChanged(5.0)));
}

#[test]
fn test_tiny_speed_never_panics() {
    let dir = TempDir::new().unwrap();
    let desc = rhd_v1(20_000.0);
    let path = write_recording(dir.path(), &desc, RecordingLayout::Traditional, 120);

    let config = PlaybackConfig {
        speed: 1e-30,
        ..PlaybackConfig::new(&path)
    };
    let mut reader = PlaybackReader::open(config).unwrap();
    let mut out = Vec::new();

    assert_eq!(
        reader.read_raw_blocks(1, &mut out).unwrap(),
        wire_block_size(&desc)
    );
    assert_eq!(reader.read_raw_blocks(1, &mut out).unwrap(), 0);
    assert!(!reader.is_at_end());
}

#[test]
fn test_traditional_resumes_when_file_grows_during_wait() {
    let dir = TempDir::new().unwrap();
    let desc = rhd_v1(20_000.0);
    let block = wire_block_size(&desc);

    // Третий блок берётся из такой же записи подлиннее
    let longer_dir = TempDir::new().unwrap();
    let longer = write_recording(longer_dir.path(), &desc, RecordingLayout::Traditional, 180);
    let longer_bytes = fs::read(&longer).unwrap();
    let third = longer_bytes[longer_bytes.len() - block..].to_vec();

    let path = write_recording(dir.path(), &desc, RecordingLayout::Traditional, 120);
    let config = PlaybackConfig {
        speed: 1_000_000.0,
        ..PlaybackConfig::new(&path)
    }
    .with_retry_ms(5, 5_000);

    let mut reader = PlaybackReader::open(config).unwrap();
    let mut out = Vec::new();

    assert_eq!(reader.read_raw_blocks(2, &mut out).unwrap(), 2 * block);

    let appender = std::thread::spawn({
        let path = path.clone();
        move || {
            std::thread::sleep(Duration::from_millis(100));
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&third).unwrap();
        }
    });

    // Тот же вызов дожидается дописанного блока
    let mut tail = Vec::new();
    assert_eq!(reader.read_raw_blocks(1, &mut tail).unwrap(), block);
    appender.join().unwrap();

    assert!(!reader.is_at_end());
    assert!(!reader.is_stopped());
    assert_eq!(reader.cursor().timestamp, 180);
    assert_eq!(tail, longer_bytes[longer_bytes.len() - block..]);
    assert!(reader.metrics().eof_retries.load(Ordering::Relaxed) > 0);
}

// ===========================================================================
// Навигация
// ===========================================================================

#[test]
fn test_jump_apis_move_cursor() {
    let dir = TempDir::new().unwrap();
    let desc = rhd_v1(20_000.0);
    let path = write_recording(dir.path(), &desc, RecordingLayout::PerChannel, 600);

    let mut reader = PlaybackReader::open(fast_config(&path)).unwrap();
    let events = reader.subscribe();

    // 10 мс при 20 кГц = 200 выборок
    assert_eq!(reader.jump_to_position("0.01").unwrap(), 200);
    assert_eq!(reader.cursor().timestamp, 200);

    assert_eq!(reader.jump_relative(-0.005).unwrap(), 100);
    assert_eq!(reader.jump_to_end().unwrap(), 599);
    assert_eq!(reader.jump_to_start().unwrap(), 0);

    assert!(events.try_iter().any(|e| e
        == PlaybackEvent::Jumped {
            target: 200,
            reached: 200
        }));
}

#[test]
fn test_jump_resets_end_of_file() {
    let dir = TempDir::new().unwrap();
    let desc = rhd_v1(20_000.0);
    let path = write_recording(dir.path(), &desc, RecordingLayout::Traditional, 300);

    let mut reader = PlaybackReader::open(fast_config(&path)).unwrap();
    play_to_end(&mut reader);
    assert!(reader.is_at_end());

    // Traditional: переход к началу блока
    assert_eq!(reader.jump_to_timestamp(130).unwrap(), 120);
    assert!(!reader.is_at_end());

    let out = play_to_end(&mut reader);
    assert_eq!(out.len(), 3 * wire_block_size(&desc));
}

#[test]
fn test_huge_jumps_clamp_to_recording() {
    let dir = TempDir::new().unwrap();
    let desc = rhd_v1(20_000.0);
    let path = write_recording(dir.path(), &desc, RecordingLayout::PerChannel, 600);

    let mut reader = PlaybackReader::open(fast_config(&path)).unwrap();

    assert_eq!(reader.jump_relative(1e300).unwrap(), 599);
    assert_eq!(reader.jump_relative(-1e300).unwrap(), 0);
    assert_eq!(reader.jump_to_position("1e300").unwrap(), 599);
    assert_eq!(reader.jump_relative(f64::MAX).unwrap(), 599);
    assert_eq!(reader.jump_relative(f64::MIN).unwrap(), 0);
}

#[test]
fn test_invalid_position_rejected() {
    let dir = TempDir::new().unwrap();
    let desc = rhd_v1(20_000.0);
    let path = write_recording(dir.path(), &desc, RecordingLayout::Traditional, 120);

    let mut reader = PlaybackReader::open(fast_config(&path)).unwrap();

    assert!(matches!(
        reader.jump_to_position("1:99"),
        Err(PlaybackError::InvalidPosition(_))
    ));
}

// ===========================================================================
// Транспорт
// ===========================================================================

#[test]
fn test_transport_lifecycle_and_decode() {
    let dir = TempDir::new().unwrap();
    let desc = rhd_v1(20_000.0);
    let path = write_recording(dir.path(), &desc, RecordingLayout::Traditional, 600);

    let transport = PlaybackTransport::from_config(fast_config(&path)).unwrap();

    assert!(transport.open());
    transport.run();
    assert!(!transport.is_running());
    assert_eq!(transport.sample_rate(), 20_000.0);
    assert_eq!(transport.num_data_streams(), 1);
    assert_eq!(
        transport.num_words_in_fifo(),
        10 * wire_block_size(&desc) as u64 / 2
    );

    let blocks = transport.read_data_blocks(2).unwrap();

    assert_eq!(blocks.len(), 2);
    assert_eq!(blocks[0].timestamps[0], 0);
    assert_eq!(blocks[1].timestamps[0], 60);
    // A-001 на выборке 61: 61 * 7 + 1
    assert_eq!(blocks[1].amplifier_at(1, 0, 1), Some(428));
}

#[test]
fn test_transport_shadow_registers() {
    let dir = TempDir::new().unwrap();
    let desc = rhd_v1(20_000.0);
    let path = write_recording(dir.path(), &desc, RecordingLayout::Traditional, 120);

    let transport = PlaybackTransport::from_config(fast_config(&path)).unwrap();

    transport.set_cable_delay(1, 3);
    transport.set_cable_delay(42, 7);
    transport.enable_data_stream(0, false);
    transport.enable_data_stream(5, true);
    transport.enable_dac(2, true);
    transport.select_dac_source(2, 0, 1);
    transport.set_ttl_out(0x00F0);
    transport.set_continuous_run_mode(false);

    let regs = transport.registers();

    assert_eq!(regs.cable_delays[1], 3);
    assert_eq!(regs.stream_enabled, vec![false]);
    assert!(regs.dac_enabled[2]);
    assert_eq!(regs.dac_source[2], (0, 1));
    assert_eq!(regs.ttl_out, 0x00F0);
    assert!(!regs.continuous_run);

    assert!(transport.set_sample_rate(20_000.0));
    assert!(!transport.set_sample_rate(30_000.0));

    // Регистры не влияют на поток данных
    let mut out = Vec::new();
    assert_eq!(
        transport.read_data_blocks_raw(1, &mut out).unwrap(),
        wire_block_size(&desc)
    );
}

#[test]
fn test_setters_do_not_wait_for_blocked_read() {
    let dir = TempDir::new().unwrap();
    let desc = rhd_v1(20_000.0);
    let path = write_recording(dir.path(), &desc, RecordingLayout::Traditional, 60);

    let config = PlaybackConfig {
        speed: 1_000_000.0,
        ..PlaybackConfig::new(&path)
    }
    .with_retry_ms(5, 1_500);
    let transport = PlaybackTransport::from_config(config).unwrap();

    let mut out = Vec::new();
    assert_eq!(
        transport.read_data_blocks_raw(1, &mut out).unwrap(),
        wire_block_size(&desc)
    );

    std::thread::scope(|s| {
        // Блоков больше нет: чтение ждёт до таймаута повтора
        let read = s.spawn(|| {
            let mut buf = Vec::new();
            transport.read_data_blocks_raw(1, &mut buf).unwrap()
        });

        std::thread::sleep(Duration::from_millis(100));

        let started = Instant::now();
        transport.set_ttl_out(0x0F0F);
        transport.set_cable_delay(0, 2);
        assert_eq!(transport.registers().ttl_out, 0x0F0F);
        assert_eq!(transport.sample_rate(), 20_000.0);
        assert!(started.elapsed() < Duration::from_millis(500));

        assert_eq!(read.join().unwrap(), 0);
    });

    assert!(transport.with_reader(|r| r.is_at_end()));
}

#[test]
fn test_transport_rejects_bad_config() {
    let dir = TempDir::new().unwrap();

    let zero_speed = PlaybackConfig {
        speed: 0.0,
        ..PlaybackConfig::new(dir.path().join("x.rhd"))
    };
    assert!(matches!(
        PlaybackTransport::from_config(zero_speed),
        Err(PlaybackError::Config(_))
    ));

    let missing = PlaybackConfig::new(dir.path().join("absent.rhd"));
    assert!(matches!(
        PlaybackTransport::from_config(missing),
        Err(PlaybackError::Codec(CodecError::MissingFile(_)))
    ));
}
