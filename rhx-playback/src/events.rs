use std::path::PathBuf;

use crossbeam_channel::{unbounded, Receiver, Sender};
use rhx_core::{FormatNotice, RecordingLayout};

/// Событие воспроизведения для подписчиков (строка состояния, журнал).
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    Opened {
        layout: RecordingLayout,
        files: usize,
    },
    Warning(String),
    DcAmplifierDataFound,
    StimulationDetected {
        channel: String,
        current_ua: f64,
    },
    SegmentOpened {
        index: usize,
        path: PathBuf,
    },
    Jumped {
        target: i64,
        reached: i64,
    },
    /// Смена множителя скорости (догон растущей записи)
    SpeedChanged(f64),
    /// Данные закончились и не появились за время ожидания
    EndOfFile {
        timestamp: i64,
    },
    /// Воспроизведение остановлено из-за ошибки чтения
    ReadError(String),
}

impl From<FormatNotice> for PlaybackEvent {
    fn from(n: FormatNotice) -> Self {
        match n {
            FormatNotice::Warning(s) => PlaybackEvent::Warning(s),
            FormatNotice::DcAmplifierDataFound => PlaybackEvent::DcAmplifierDataFound,
            FormatNotice::StimulationDetected {
                channel,
                current_ua,
            } => PlaybackEvent::StimulationDetected {
                channel,
                current_ua,
            },
            FormatNotice::SegmentOpened { index, path } => {
                PlaybackEvent::SegmentOpened { index, path }
            }
        }
    }
}

/// Предел событий, ожидающих первого подписчика.
pub const MAX_BACKLOG: usize = 256;

/// Рассылка событий всем подписчикам. Отключившиеся подписчики удаляются.
///
/// События, опубликованные до появления первого подписчика (например, при
/// открытии записи), копятся и достаются ему. Накопитель ограничен
/// [`MAX_BACKLOG`] событиями; сверх него события без подписчиков
/// отбрасываются, ранние события сохраняются.
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Vec<Sender<PlaybackEvent>>,
    backlog: Vec<PlaybackEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self) -> Receiver<PlaybackEvent> {
        let (tx, rx) = unbounded();

        for event in self.backlog.drain(..) {
            let _ = tx.send(event);
        }

        self.subscribers.push(tx);
        rx
    }

    pub fn publish(
        &mut self,
        event: PlaybackEvent,
    ) {
        if self.subscribers.is_empty() {
            if self.backlog.len() < MAX_BACKLOG {
                self.backlog.push(event);
            }
            return;
        }

        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}
