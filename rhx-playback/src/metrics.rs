use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Instant,
};

/// Счётчики воспроизведения (lock-free, читаются из любого потока).
#[derive(Debug, Default)]
pub struct PlaybackMetrics {
    pub blocks_delivered: AtomicU64,
    pub bytes_delivered: AtomicU64,
    /// Запросы, отклонённые темпом реального времени
    pub not_ready_polls: AtomicU64,
    /// Повторные попытки чтения в конце файла
    pub eof_retries: AtomicU64,
    /// Сколько раз включался догон растущей записи
    pub catch_up_events: AtomicU64,
    pub read_errors: AtomicU64,
}

/// Snapshot метрик для вывода / тестов.
#[derive(Debug, Clone)]
pub struct PlaybackSummary {
    pub duration_secs: f64,
    pub blocks_delivered: u64,
    pub bytes_delivered: u64,
    pub not_ready_polls: u64,
    pub eof_retries: u64,
    pub catch_up_events: u64,
    pub read_errors: u64,
    pub blocks_per_sec: f64,
}

impl PlaybackMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_delivery(
        &self,
        blocks: u64,
        bytes: u64,
    ) {
        self.blocks_delivered.fetch_add(blocks, Ordering::Relaxed);
        self.bytes_delivered.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn blocks_per_sec(
        &self,
        elapsed: &Instant,
    ) -> f64 {
        let secs = elapsed.elapsed().as_secs_f64();

        if secs < 1e-9 {
            return 0.0;
        }

        self.blocks_delivered.load(Ordering::Relaxed) as f64 / secs
    }

    pub fn summary(
        &self,
        elapsed: &Instant,
    ) -> PlaybackSummary {
        PlaybackSummary {
            duration_secs: elapsed.elapsed().as_secs_f64(),
            blocks_delivered: self.blocks_delivered.load(Ordering::Relaxed),
            bytes_delivered: self.bytes_delivered.load(Ordering::Relaxed),
            not_ready_polls: self.not_ready_polls.load(Ordering::Relaxed),
            eof_retries: self.eof_retries.load(Ordering::Relaxed),
            catch_up_events: self.catch_up_events.load(Ordering::Relaxed),
            read_errors: self.read_errors.load(Ordering::Relaxed),
            blocks_per_sec: self.blocks_per_sec(elapsed),
        }
    }
}

impl std::fmt::Display for PlaybackSummary {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        writeln!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
        writeln!(f, "  Duration      : {:.1}s", self.duration_secs)?;
        writeln!(
            f,
            "  Blocks        : {} ({:.1}/s)",
            self.blocks_delivered, self.blocks_per_sec
        )?;
        writeln!(
            f,
            "  Bytes         : {:.1} MB",
            self.bytes_delivered as f64 / 1e6
        )?;
        writeln!(f, "  Not ready     : {}", self.not_ready_polls)?;
        writeln!(f, "  EOF retries   : {}", self.eof_retries)?;
        writeln!(f, "  Catch-ups     : {}", self.catch_up_events)?;
        writeln!(f, "  Read errors   : {}", self.read_errors)?;
        write!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")
    }
}
