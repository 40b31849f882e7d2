use std::{
    sync::{atomic::Ordering, Arc},
    time::Instant,
};

use crossbeam_channel::Receiver;
use log::{debug, error, info};
use rhx_core::{
    open_format_manager, CancelToken, FormatManager, ManagerOptions, OpenReport,
    RecordingLayout, SampleFrame,
};
use rhx_types::{AcquisitionDescriptor, CodecResult};
use serde::Serialize;

use crate::{
    pacing::{target_duration, PacingClock},
    EventBus, PlaybackConfig, PlaybackError, PlaybackEvent, PlaybackMetrics, PlaybackResult,
};

/// Снимок навигационного состояния.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaybackCursor {
    /// Номер следующей выборки
    pub position: u64,
    /// Метка времени следующей выборки
    pub timestamp: i64,
    pub first_timestamp: i64,
    pub last_timestamp: i64,
    pub total_samples: u64,
    pub at_end: bool,
    pub live: bool,
    /// Файл цепочки (traditional)
    pub segment: Option<usize>,
}

/// Разбирает позицию `HH:MM:SS.sss`, `MM:SS` или `SS` в секунды.
pub fn parse_time_position(s: &str) -> PlaybackResult<f64> {
    let invalid = || PlaybackError::InvalidPosition(s.to_string());
    let parts: Vec<&str> = s.trim().split(':').collect();

    if parts.is_empty() || parts.len() > 3 {
        return Err(invalid());
    }

    let (whole, last) = parts.split_at(parts.len() - 1);

    let seconds: f64 = last[0].trim().parse().map_err(|_| invalid())?;
    if !seconds.is_finite() || seconds < 0.0 || (!whole.is_empty() && seconds >= 60.0) {
        return Err(invalid());
    }

    let mut units = Vec::with_capacity(whole.len());
    for p in whole {
        units.push(p.trim().parse::<u64>().map_err(|_| invalid())?);
    }

    let total = match units.as_slice() {
        [] => 0.0,
        [m] => *m as f64 * 60.0,
        [h, m] if *m < 60 => *h as f64 * 3_600.0 + *m as f64 * 60.0,
        _ => return Err(invalid()),
    };

    Ok(total + seconds)
}

/// Метка времени через `delta_samples` выборок от `base`. Огромные сдвиги
/// насыщаются, границы записи применяет менеджер.
fn offset_timestamp(
    base: i64,
    delta_samples: f64,
) -> i64 {
    base.saturating_add(delta_samples.round() as i64)
}

/// Воспроизведение записи в темпе реального времени.
///
/// Однопоточный, опросный: владелец вызывает [`PlaybackReader::read_raw_blocks`]
/// на каждом тике, неготовый запрос возвращает 0 без чтения данных.
pub struct PlaybackReader {
    config: PlaybackConfig,
    manager: Box<dyn FormatManager>,
    frame: SampleFrame,
    clock: PacingClock,
    speed: f64,
    catching_up: bool,
    cancel: CancelToken,
    metrics: Arc<PlaybackMetrics>,
    events: EventBus,
    at_end: bool,
    stopped: bool,
}

impl PlaybackReader {
    pub fn open(config: PlaybackConfig) -> PlaybackResult<Self> {
        config.validate()?;

        let cancel = CancelToken::new();
        let options = ManagerOptions {
            retry: config.retry,
            cancel: cancel.clone(),
            follow_chain: config.follow_chain,
        };

        let manager = open_format_manager(&config.input_path, options)?;
        let frame = SampleFrame::new(manager.descriptor());

        info!(
            "Playback of {} ({}), {} samples, timestamps {}..={}",
            config.input_path.display(),
            manager.layout(),
            manager.total_samples(),
            manager.first_timestamp(),
            manager.last_timestamp()
        );

        let mut reader = Self {
            speed: config.base_speed(),
            config,
            manager,
            frame,
            clock: PacingClock::new(),
            catching_up: false,
            cancel,
            metrics: PlaybackMetrics::new(),
            events: EventBus::new(),
            at_end: false,
            stopped: false,
        };

        reader.events.publish(PlaybackEvent::Opened {
            layout: reader.manager.layout(),
            files: reader.manager.report().files_opened,
        });
        reader.forward_notices();

        Ok(reader)
    }

    pub fn config(&self) -> &PlaybackConfig {
        &self.config
    }

    pub fn descriptor(&self) -> &AcquisitionDescriptor {
        self.manager.descriptor()
    }

    pub fn layout(&self) -> RecordingLayout {
        self.manager.layout()
    }

    pub fn report(&self) -> &OpenReport {
        self.manager.report()
    }

    pub fn subscribe(&mut self) -> Receiver<PlaybackEvent> {
        self.events.subscribe()
    }

    /// Токен остановки: прерывает ожидание данных и дальнейшее чтение.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn metrics(&self) -> Arc<PlaybackMetrics> {
        self.metrics.clone()
    }

    /// Текущий множитель скорости.
    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn set_speed(
        &mut self,
        speed: f64,
    ) -> PlaybackResult<()> {
        if !(speed.is_finite() && speed > 0.0) {
            return Err(PlaybackError::Config(format!("speed must be > 0, got {speed}")));
        }

        self.config.speed = speed;
        if !self.catching_up {
            self.speed = self.config.base_speed();
        }
        self.clock.reset();

        Ok(())
    }

    pub fn is_at_end(&self) -> bool {
        self.at_end
    }

    /// Остановлено ошибкой чтения.
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn blocks_available(&self) -> u64 {
        self.manager.blocks_available()
    }

    pub fn cursor(&self) -> PlaybackCursor {
        PlaybackCursor {
            position: self.manager.position(),
            timestamp: self.manager.current_timestamp(),
            first_timestamp: self.manager.first_timestamp(),
            last_timestamp: self.manager.last_timestamp(),
            total_samples: self.manager.total_samples(),
            at_end: self.at_end,
            live: self.config.live,
            segment: self.manager.current_segment(),
        }
    }

    ////////////////////////////////////////////////////////////////////////////
    // Навигация
    ////////////////////////////////////////////////////////////////////////////

    pub fn jump_to_start(&mut self) -> PlaybackResult<i64> {
        let t = self.manager.first_timestamp();
        self.jump_to_timestamp(t)
    }

    pub fn jump_to_end(&mut self) -> PlaybackResult<i64> {
        self.manager.update_end_of_data()?;
        let t = self.manager.last_timestamp();
        self.jump_to_timestamp(t)
    }

    /// Переход к времени от начала записи (`HH:MM:SS.sss`, `MM:SS`, `SS`).
    pub fn jump_to_position(
        &mut self,
        position: &str,
    ) -> PlaybackResult<i64> {
        let secs = parse_time_position(position)?;
        let rate = self.descriptor().sample_rate as f64;
        let t = offset_timestamp(self.manager.first_timestamp(), secs * rate);

        self.jump_to_timestamp(t)
    }

    /// Сдвиг относительно текущей позиции (секунды, может быть отрицательным).
    pub fn jump_relative(
        &mut self,
        delta_secs: f64,
    ) -> PlaybackResult<i64> {
        if !delta_secs.is_finite() {
            return Err(PlaybackError::InvalidPosition(delta_secs.to_string()));
        }

        let rate = self.descriptor().sample_rate as f64;
        let t = offset_timestamp(self.manager.current_timestamp(), delta_secs * rate);

        self.jump_to_timestamp(t)
    }

    /// Возвращает фактически достигнутую метку времени.
    pub fn jump_to_timestamp(
        &mut self,
        target: i64,
    ) -> PlaybackResult<i64> {
        let reached = self.manager.jump_to_timestamp(target)?;

        self.clock.reset();
        self.at_end = false;
        self.stopped = false;

        debug!("Jump to {target}: reached {reached}");
        self.events.publish(PlaybackEvent::Jumped { target, reached });
        self.forward_notices();

        Ok(reached)
    }

    ////////////////////////////////////////////////////////////////////////////
    // Чтение
    ////////////////////////////////////////////////////////////////////////////

    /// Выдаёт `n` wire-блоков в `out`, если пришло их время.
    ///
    /// Возвращает 0, если темп ещё не позволяет выдачу, если данные
    /// закончились (после ожидания, см. [`PlaybackConfig::retry`]) или после
    /// ошибки чтения. Ошибки чтения не возвращаются: воспроизведение
    /// останавливается, подписчики получают [`PlaybackEvent::ReadError`].
    pub fn read_raw_blocks(
        &mut self,
        n: usize,
        out: &mut Vec<u8>,
    ) -> PlaybackResult<usize> {
        if n == 0 || self.at_end || self.stopped || self.cancel.is_cancelled() {
            return Ok(0);
        }

        if self.config.live {
            if let Err(e) = self.update_live_speed() {
                self.fail(e.into());
                return Ok(0);
            }
        }

        let period = self.descriptor().block_period_secs();
        let target = target_duration(n, period, self.speed);

        if !self.clock.ready(Instant::now(), target) {
            self.metrics.not_ready_polls.fetch_add(1, Ordering::Relaxed);
            return Ok(0);
        }

        let bytes = match self.read_with_retry(n, out) {
            Ok(b) => b,
            Err(e) => {
                self.fail(e.into());
                return Ok(0);
            }
        };

        self.forward_notices();

        if bytes == 0 {
            if !self.cancel.is_cancelled() {
                let timestamp = self.manager.current_timestamp();
                info!("End of recording at timestamp {timestamp}");
                self.at_end = true;
                self.events.publish(PlaybackEvent::EndOfFile { timestamp });
            }
            return Ok(0);
        }

        self.clock.deliver(Instant::now(), target);
        self.metrics.record_delivery(n as u64, bytes as u64);

        Ok(bytes)
    }

    /// Чтение с ожиданием данных в конце файла. Менеджеры, которые сами
    /// следят за растущими файлами, уже подождали внутри.
    fn read_with_retry(
        &mut self,
        n: usize,
        out: &mut Vec<u8>,
    ) -> CodecResult<usize> {
        let bytes = self.manager.read_raw_blocks(n, &mut self.frame, out)?;

        if bytes > 0 || self.manager.tails_live() {
            return Ok(bytes);
        }

        let retry = self.config.retry;
        let manager = &mut self.manager;
        let frame = &mut self.frame;
        let metrics = &self.metrics;

        let found = retry.poll(&self.cancel, || {
            metrics.eof_retries.fetch_add(1, Ordering::Relaxed);
            let b = manager.read_raw_blocks(n, frame, out)?;
            Ok((b > 0).then_some(b))
        })?;

        Ok(found.unwrap_or(0))
    }

    /// Догон растущей записи: ускорение при отставании больше порога.
    fn update_live_speed(&mut self) -> CodecResult<()> {
        self.manager.update_end_of_data()?;

        let rate = self.descriptor().sample_rate as f64;
        let threshold = (self.config.catch_up_threshold_secs * rate) as u64;
        let catching_up = self.manager.samples_available() > threshold;

        if catching_up == self.catching_up {
            return Ok(());
        }

        self.catching_up = catching_up;
        self.speed = if catching_up {
            self.metrics.catch_up_events.fetch_add(1, Ordering::Relaxed);
            self.config.catch_up_multiplier
        } else {
            self.config.base_speed()
        };

        info!("Playback speed {}x", self.speed);
        self.events.publish(PlaybackEvent::SpeedChanged(self.speed));

        Ok(())
    }

    fn fail(
        &mut self,
        e: PlaybackError,
    ) {
        error!("Playback stopped: {e}");
        self.metrics.read_errors.fetch_add(1, Ordering::Relaxed);
        self.stopped = true;
        self.events.publish(PlaybackEvent::ReadError(e.to_string()));
    }

    fn forward_notices(&mut self) {
        for notice in self.manager.drain_notices() {
            self.events.publish(notice.into());
        }
    }
}
