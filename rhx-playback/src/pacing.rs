//! Выдача блоков в темпе реального времени.
//!
//! Запрос на `n` блоков разрешается, если с прошлой выдачи прошло не меньше
//! `target - deficit`, где `target = n * block_period / speed`. Излишек
//! времени переносится в `deficit`, но не больше одного `target`: джиттер
//! планировщика компенсируется, а после долгой паузы выдаётся не больше
//! одного лишнего запроса.

use std::time::{Duration, Instant};

/// Длительность выдачи `blocks` блоков при множителе скорости `speed`.
///
/// Значения вне диапазона `Duration` (крошечная скорость) дают
/// `Duration::MAX`: такой запрос просто никогда не станет готов.
pub fn target_duration(
    blocks: usize,
    block_period_secs: f64,
    speed: f64,
) -> Duration {
    let secs = (blocks as f64 * block_period_secs / speed).max(0.0);

    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

#[derive(Debug, Clone, Default)]
pub struct PacingClock {
    last: Option<Instant>,
    deficit: Duration,
}

impl PacingClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Сбрасывает привязку (после перехода или смены скорости).
    pub fn reset(&mut self) {
        self.last = None;
        self.deficit = Duration::ZERO;
    }

    pub fn deficit(&self) -> Duration {
        self.deficit
    }

    /// Прошло ли достаточно времени для выдачи. Состояние не меняется.
    pub fn ready(
        &self,
        now: Instant,
        target: Duration,
    ) -> bool {
        match self.last {
            None => true,
            Some(last) => {
                now.saturating_duration_since(last)
                    .saturating_add(self.deficit)
                    >= target
            }
        }
    }

    /// Фиксирует выдачу в момент `now`.
    pub fn deliver(
        &mut self,
        now: Instant,
        target: Duration,
    ) {
        let elapsed = match self.last {
            None => target,
            Some(last) => now.saturating_duration_since(last),
        };

        self.deficit = elapsed
            .saturating_add(self.deficit)
            .saturating_sub(target)
            .min(target);
        self.last = Some(now);
    }

    /// `ready` + `deliver` одним вызовом.
    pub fn poll_at(
        &mut self,
        now: Instant,
        target: Duration,
    ) -> bool {
        if !self.ready(now, target) {
            return false;
        }

        self.deliver(now, target);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 128 выборок при 20 кГц
    const BLOCK: Duration = Duration::from_micros(6_400);

    #[test]
    fn test_target_duration_scales_with_speed() {
        let period = 128.0 / 20_000.0;

        for (blocks, speed) in [(1, 1.0), (2, 2.0), (5, 5.0)] {
            let d = target_duration(blocks, period, speed);
            assert!(d.abs_diff(BLOCK) < Duration::from_micros(1), "{d:?}");
        }
        assert!(target_duration(1, period, 4.0) < BLOCK);
    }

    #[test]
    fn test_tiny_speed_saturates_instead_of_panicking() {
        let period = 128.0 / 20_000.0;

        assert_eq!(target_duration(1, period, 1e-30), Duration::MAX);
        assert_eq!(target_duration(1, period, f64::MIN_POSITIVE), Duration::MAX);

        let start = Instant::now();
        let mut clock = PacingClock::new();

        assert!(clock.poll_at(start, Duration::MAX));
        assert!(!clock.poll_at(start + Duration::from_secs(3_600), Duration::MAX));
        assert_eq!(clock.deficit(), Duration::ZERO);
    }

    #[test]
    fn test_first_request_is_immediate() {
        let mut clock = PacingClock::new();

        assert!(clock.poll_at(Instant::now(), BLOCK));
        assert_eq!(clock.deficit(), Duration::ZERO);
    }

    #[test]
    fn test_not_ready_does_not_consume() {
        let start = Instant::now();
        let mut clock = PacingClock::new();

        assert!(clock.poll_at(start, BLOCK));
        assert!(!clock.poll_at(start + Duration::from_millis(3), BLOCK));
        assert!(!clock.poll_at(start + Duration::from_millis(6), BLOCK));
        assert!(clock.poll_at(start + Duration::from_millis(7), BLOCK));
    }

    #[test]
    fn test_rate_converges_over_long_run() {
        let start = Instant::now();
        let mut clock = PacingClock::new();
        let mut delivered = 0u64;

        // 10 секунд опроса с шагом 1 мс
        for tick in 0..10_000u64 {
            if clock.poll_at(start + Duration::from_millis(tick), BLOCK) {
                delivered += 1;
            }
            assert!(clock.deficit() <= BLOCK);
        }

        // 20000 / 128 = 156.25 блоков в секунду
        assert!((1_560..=1_564).contains(&delivered), "{delivered}");
    }

    #[test]
    fn test_stall_gives_at_most_one_extra_block() {
        let start = Instant::now();
        let mut clock = PacingClock::new();

        assert!(clock.poll_at(start, BLOCK));

        let after_stall = start + Duration::from_millis(500);
        assert!(clock.poll_at(after_stall, BLOCK));
        assert_eq!(clock.deficit(), BLOCK);

        assert!(clock.poll_at(after_stall, BLOCK));
        assert!(!clock.poll_at(after_stall, BLOCK));
    }

    #[test]
    fn test_reset_makes_next_request_immediate() {
        let start = Instant::now();
        let mut clock = PacingClock::new();

        clock.poll_at(start, BLOCK);
        clock.reset();

        assert!(clock.poll_at(start + Duration::from_micros(10), BLOCK));
    }
}
