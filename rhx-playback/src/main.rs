use std::{
    fs::File,
    io::{BufWriter, Write},
    path::PathBuf,
    time::{Duration, Instant},
};

use clap::Parser;
use log::{error, info, warn};
use rhx_playback::{PlaybackConfig, PlaybackEvent, PlaybackReader, PlaybackTransport};

#[derive(Parser, Debug)]
#[command(
    name = "rhx-play",
    version = env!("CARGO_PKG_VERSION"),
    about = "Play back an RHD/RHS recording as a live controller would deliver it",
    long_about = None,
)]
struct Cli {
    /// Файл заголовка записи (.rhd / .rhs)
    input: PathBuf,
    /// Множитель скорости воспроизведения
    #[arg(short, long, default_value = "1.0")]
    speed: f64,
    /// Запись ещё пишется: 1x с догоном
    #[arg(long)]
    live: bool,
    /// Начальная позиция (HH:MM:SS.sss, MM:SS, SS)
    #[arg(long)]
    start: Option<String>,
    /// Ограничение по времени записи (секунды)
    #[arg(short, long)]
    duration: Option<f64>,
    /// Блоков за один запрос
    #[arg(short, long, default_value = "1")]
    blocks: usize,
    /// Файл для wire-блоков (по умолчанию данные не сохраняются)
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Пауза между проверками растущего файла, мс
    #[arg(long, default_value = "2")]
    retry_interval_ms: u64,
    /// Сколько ждать новых данных в конце файла, мс
    #[arg(long, default_value = "2000")]
    retry_timeout_ms: u64,
    /// Не склеивать последовательные файлы
    #[arg(long)]
    no_chain: bool,
    /// Вывести описание записи в JSON и выйти
    #[arg(long)]
    info: bool,
    /// Интервал вывода прогресса (секунды)
    #[arg(long, default_value = "5")]
    stats_interval: u64,
    /// Тихий режим (только ошибки)
    #[arg(short, long)]
    quiet: bool,
}

fn print_info(reader: &PlaybackReader) -> Result<(), serde_json::Error> {
    let json = serde_json::json!({
        "layout": reader.layout().to_string(),
        "descriptor": reader.descriptor(),
        "cursor": reader.cursor(),
        "warnings": reader.report().warnings.iter().map(|w| w.to_string()).collect::<Vec<_>>(),
    });

    println!("{}", serde_json::to_string_pretty(&json)?);

    Ok(())
}

fn main() {
    let cli = Cli::parse();
    let level = if cli.quiet {
        log::LevelFilter::Error
    } else {
        log::LevelFilter::Info
    };

    env_logger::Builder::new()
        .filter_level(level)
        .format_target(false)
        .format_timestamp_secs()
        .init();

    let config = PlaybackConfig {
        speed: cli.speed,
        live: cli.live,
        follow_chain: !cli.no_chain,
        stats_interval_secs: cli.stats_interval,
        ..PlaybackConfig::new(cli.input.clone())
    }
    .with_retry_ms(cli.retry_interval_ms, cli.retry_timeout_ms);

    let mut reader = match PlaybackReader::open(config) {
        Ok(r) => r,
        Err(e) => {
            error!("Failed to open {}: {e}", cli.input.display());
            std::process::exit(1);
        }
    };

    if cli.info {
        if let Err(e) = print_info(&reader) {
            error!("Failed to render info: {e}");
            std::process::exit(1);
        }
        return;
    }

    if cli.blocks == 0 {
        error!("--blocks must be > 0");
        std::process::exit(1);
    }

    if let Some(start) = &cli.start {
        match reader.jump_to_position(start) {
            Ok(t) => info!("Starting at timestamp {t}"),
            Err(e) => {
                error!("--start: {e}");
                std::process::exit(1);
            }
        }
    }

    let events = reader.subscribe();
    let cancel = reader.cancel_token();
    let metrics = reader.metrics();
    let desc = reader.descriptor().clone();

    let stop_ctrlc = cancel.as_flag();
    if let Err(e) = ctrlc::set_handler(move || {
        if stop_ctrlc.swap(true, std::sync::atomic::Ordering::SeqCst) {
            warn!("Force exit");
            std::process::exit(130);
        }
        warn!("Ctrl+C received, stopping playback");
    }) {
        warn!("Failed to set Ctrl+C handler: {e}");
    }

    let mut sink = match &cli.output {
        Some(path) => match File::create(path) {
            Ok(f) => Some(BufWriter::new(f)),
            Err(e) => {
                error!("--output {}: {e}", path.display());
                std::process::exit(1);
            }
        },
        None => None,
    };

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("  Input         : {:?}", cli.input);
    info!("  Layout        : {}", reader.layout());
    info!("  Controller    : {:?} v{}", desc.controller, desc.version);
    info!("  Sample rate   : {} Hz", desc.sample_rate);
    info!("  Streams       : {}", desc.num_data_streams);
    info!("  Speed         : {}x{}", reader.speed(), if cli.live { " (live)" } else { "" });
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let transport = PlaybackTransport::new(reader);
    transport.open();
    transport.run();

    let sample_limit = cli
        .duration
        .map(|secs| (secs * desc.sample_rate as f64).max(0.0) as u64);
    let samples_per_read = (cli.blocks * desc.samples_per_block) as u64;
    let stats_interval = Duration::from_secs(cli.stats_interval.max(1));

    let session_start = Instant::now();
    let mut last_stats = Instant::now();
    let mut samples_played = 0u64;
    let mut buf = Vec::new();

    loop {
        if cancel.is_cancelled() {
            break;
        }

        if sample_limit.is_some_and(|limit| samples_played >= limit) {
            info!("Duration limit reached");
            break;
        }

        buf.clear();
        let bytes = match transport.read_data_blocks_raw(cli.blocks, &mut buf) {
            Ok(b) => b,
            Err(e) => {
                error!("Playback failed: {e}");
                std::process::exit(1);
            }
        };

        for event in events.try_iter() {
            match event {
                PlaybackEvent::Warning(w) => warn!("{w}"),
                PlaybackEvent::StimulationDetected {
                    channel,
                    current_ua,
                } => info!("Stimulation on {channel}: {current_ua:.1} µA"),
                PlaybackEvent::SegmentOpened { index, path } => {
                    info!("Chain file {}: {}", index + 1, path.display())
                }
                other => log::debug!("{other:?}"),
            }
        }

        if bytes == 0 {
            let (at_end, stopped) = transport.with_reader(|r| (r.is_at_end(), r.is_stopped()));
            if at_end || stopped {
                break;
            }
            std::thread::sleep(Duration::from_micros(500));
            continue;
        }

        samples_played += samples_per_read;

        if let Some(w) = sink.as_mut() {
            if let Err(e) = w.write_all(&buf) {
                error!("Write failed: {e}");
                std::process::exit(1);
            }
        }

        if last_stats.elapsed() >= stats_interval {
            let cursor = transport.with_reader(|r| r.cursor());
            info!(
                "[ {:.0}s ] timestamp={} / {} blocks={}",
                session_start.elapsed().as_secs_f64(),
                cursor.timestamp,
                cursor.last_timestamp,
                metrics.blocks_delivered.load(std::sync::atomic::Ordering::Relaxed),
            );
            last_stats = Instant::now();
        }
    }

    if let Some(mut w) = sink {
        if let Err(e) = w.flush() {
            error!("Write failed: {e}");
            std::process::exit(1);
        }
    }

    info!("\n{}", metrics.summary(&session_start));

    if transport.with_reader(|r| r.is_stopped()) {
        std::process::exit(1);
    }
}
