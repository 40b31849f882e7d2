use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use rhx_types::CodecResult;

/// Интервал повторного опроса растущего файла по умолчанию
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(2);

/// Сколько ждать новых данных, прежде чем считать поток закончившимся
pub const DEFAULT_RETRY_TIMEOUT: Duration = Duration::from_millis(2_000);

/// Флаг внешней остановки. Клоны разделяют одно состояние.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// Снимает флаг (например, перед повторным запуском воспроизведения).
    pub fn reset(&self) {
        self.flag.store(false, Ordering::Relaxed);
    }

    /// Общий флаг для кода, который работает с `Arc<AtomicBool>` напрямую
    /// (обработчик Ctrl+C).
    pub fn as_flag(&self) -> Arc<AtomicBool> {
        self.flag.clone()
    }
}

/// Ограниченный по времени опрос с паузами.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_RETRY_INTERVAL,
            timeout: DEFAULT_RETRY_TIMEOUT,
        }
    }
}

impl RetryPolicy {
    /// Без ожидания: одна попытка.
    pub fn immediate() -> Self {
        Self {
            interval: Duration::ZERO,
            timeout: Duration::ZERO,
        }
    }

    /// Вызывает `attempt`, пока тот не вернёт `Some`, не истечёт `timeout`
    /// или не сработает `cancel`. Первая попытка выполняется всегда.
    ///
    /// Ошибка `attempt` прерывает опрос сразу.
    pub fn poll<T, F>(
        &self,
        cancel: &CancelToken,
        mut attempt: F,
    ) -> CodecResult<Option<T>>
    where
        F: FnMut() -> CodecResult<Option<T>>,
    {
        let start = Instant::now();

        loop {
            if let Some(v) = attempt()? {
                return Ok(Some(v));
            }

            let elapsed = start.elapsed();

            if cancel.is_cancelled() || elapsed >= self.timeout {
                return Ok(None);
            }

            std::thread::sleep(self.interval.min(self.timeout - elapsed));
        }
    }
}
