use std::{path::PathBuf, time::Duration};

use rhx_core::{RetryPolicy, DEFAULT_RETRY_INTERVAL, DEFAULT_RETRY_TIMEOUT};

use crate::{PlaybackError, PlaybackResult};

/// Множитель скорости при отставании от растущей записи
pub const DEFAULT_CATCH_UP_MULTIPLIER: f64 = 5.0;

/// Отставание (секунды записи), после которого включается догон
pub const DEFAULT_CATCH_UP_THRESHOLD_SECS: f64 = 1.0;

/// Конфигурация сессии воспроизведения.
#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    /// Файл заголовка (`.rhd` / `.rhs`)
    pub input_path: PathBuf,
    /// Множитель скорости относительно реального времени
    pub speed: f64,
    /// Запись ещё пишется: скорость 1x с догоном
    pub live: bool,
    /// Ожидание новых данных в конце файла
    pub retry: RetryPolicy,
    pub catch_up_multiplier: f64,
    pub catch_up_threshold_secs: f64,
    /// Склеивать последовательные traditional-файлы
    pub follow_chain: bool,
    /// Интервал вывода прогресса (секунды)
    pub stats_interval_secs: u64,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl PlaybackConfig {
    pub fn new<P: Into<PathBuf>>(input_path: P) -> Self {
        Self {
            input_path: input_path.into(),
            speed: 1.0,
            live: false,
            retry: RetryPolicy {
                interval: DEFAULT_RETRY_INTERVAL,
                timeout: DEFAULT_RETRY_TIMEOUT,
            },
            catch_up_multiplier: DEFAULT_CATCH_UP_MULTIPLIER,
            catch_up_threshold_secs: DEFAULT_CATCH_UP_THRESHOLD_SECS,
            follow_chain: true,
            stats_interval_secs: 5,
        }
    }

    /// Паузы опроса в миллисекундах (для CLI).
    pub fn with_retry_ms(
        mut self,
        interval_ms: u64,
        timeout_ms: u64,
    ) -> Self {
        self.retry = RetryPolicy {
            interval: Duration::from_millis(interval_ms),
            timeout: Duration::from_millis(timeout_ms),
        };
        self
    }

    /// Базовая скорость: в live-режиме всегда 1x.
    pub fn base_speed(&self) -> f64 {
        if self.live {
            1.0
        } else {
            self.speed
        }
    }

    pub fn validate(&self) -> PlaybackResult<()> {
        if !(self.speed.is_finite() && self.speed > 0.0) {
            return Err(PlaybackError::Config(format!(
                "speed must be > 0, got {}",
                self.speed
            )));
        }

        if !(self.catch_up_multiplier.is_finite() && self.catch_up_multiplier >= 1.0) {
            return Err(PlaybackError::Config(format!(
                "catch-up multiplier must be >= 1, got {}",
                self.catch_up_multiplier
            )));
        }

        if !(self.catch_up_threshold_secs.is_finite() && self.catch_up_threshold_secs >= 0.0) {
            return Err(PlaybackError::Config(format!(
                "catch-up threshold must be >= 0, got {}",
                self.catch_up_threshold_secs
            )));
        }

        if self.retry.interval > self.retry.timeout && !self.retry.timeout.is_zero() {
            return Err(PlaybackError::Config(format!(
                "retry interval {:?} exceeds timeout {:?}",
                self.retry.interval, self.retry.timeout
            )));
        }

        Ok(())
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self::new("recording.rhd")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = PlaybackConfig::default();

        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.retry.interval, Duration::from_millis(2));
        assert_eq!(cfg.retry.timeout, Duration::from_millis(2_000));
        assert_eq!(cfg.catch_up_multiplier, 5.0);
    }

    #[test]
    fn test_rejects_bad_speed() {
        for speed in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let cfg = PlaybackConfig {
                speed,
                ..PlaybackConfig::default()
            };
            assert!(matches!(cfg.validate(), Err(PlaybackError::Config(_))), "{speed}");
        }
    }

    #[test]
    fn test_rejects_slow_catch_up() {
        let cfg = PlaybackConfig {
            catch_up_multiplier: 0.5,
            ..PlaybackConfig::default()
        };

        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_retry_interval_longer_than_timeout() {
        let cfg = PlaybackConfig::default().with_retry_ms(50, 10);
        assert!(cfg.validate().is_err());

        // Нулевой таймаут = одна попытка, интервал не важен
        let cfg = PlaybackConfig::default().with_retry_ms(50, 0);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_live_forces_real_time() {
        let cfg = PlaybackConfig {
            speed: 8.0,
            live: true,
            ..PlaybackConfig::default()
        };

        assert_eq!(cfg.base_speed(), 1.0);
    }
}
