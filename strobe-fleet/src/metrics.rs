use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Метрики захвата. Обновляются lock-free из контекста драйвера,
/// потоков сессий и координатора.
#[derive(Debug, Default)]
pub struct CaptureMetrics {
    /// Блоков передано сессиям
    pub blocks_emitted: AtomicU64,
    /// Выборок на канал передано сессиям
    pub samples_emitted: AtomicU64,
    /// Блоков отброшено на переполненных очередях
    pub blocks_dropped: AtomicU64,
    /// Ошибок вызовов драйвера
    pub hw_errors: AtomicU64,
}

impl CaptureMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Доля отброшенных блоков в процентах.
    pub fn drop_rate_pct(&self) -> f64 {
        let emitted = self.blocks_emitted.load(Ordering::Relaxed);
        let dropped = self.blocks_dropped.load(Ordering::Relaxed);
        let total = emitted + dropped;
        if total == 0 {
            return 0.0;
        }
        dropped as f64 / total as f64 * 100.0
    }

    /// Снимок метрик с начала сессии.
    pub fn summary(&self, started: &Instant) -> MetricsSummary {
        let duration_secs = started.elapsed().as_secs_f64();
        let samples = self.samples_emitted.load(Ordering::Relaxed);
        let throughput_msps = if duration_secs > 0.0 {
            samples as f64 / duration_secs / 1e6
        } else {
            0.0
        };

        MetricsSummary {
            duration_secs,
            blocks_emitted: self.blocks_emitted.load(Ordering::Relaxed),
            samples_emitted: samples,
            blocks_dropped: self.blocks_dropped.load(Ordering::Relaxed),
            hw_errors: self.hw_errors.load(Ordering::Relaxed),
            drop_rate_pct: self.drop_rate_pct(),
            throughput_msps,
        }
    }
}

/// Итог сессии захвата для журнала.
#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub duration_secs: f64,
    pub blocks_emitted: u64,
    pub samples_emitted: u64,
    pub blocks_dropped: u64,
    pub hw_errors: u64,
    pub drop_rate_pct: f64,
    pub throughput_msps: f64,
}

impl fmt::Display for MetricsSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
        writeln!(f, "  Capture session summary")?;
        writeln!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
        writeln!(f, "  Duration        : {:.1} s", self.duration_secs)?;
        writeln!(f, "  Blocks emitted  : {}", self.blocks_emitted)?;
        writeln!(f, "  Samples/channel : {}", self.samples_emitted)?;
        writeln!(
            f,
            "  Blocks dropped  : {} ({:.2}%)",
            self.blocks_dropped, self.drop_rate_pct
        )?;
        writeln!(f, "  Hardware errors : {}", self.hw_errors)?;
        writeln!(f, "  Throughput      : {:.2} Msps", self.throughput_msps)?;
        write!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drop_rate_empty() {
        let metrics = CaptureMetrics::new();
        assert_eq!(metrics.drop_rate_pct(), 0.0);
    }

    #[test]
    fn test_drop_rate() {
        let metrics = CaptureMetrics::new();
        metrics.blocks_emitted.store(90, Ordering::Relaxed);
        metrics.blocks_dropped.store(10, Ordering::Relaxed);
        assert!((metrics.drop_rate_pct() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_summary_contains_counters() {
        let metrics = CaptureMetrics::new();
        metrics.blocks_emitted.store(5, Ordering::Relaxed);
        metrics.samples_emitted.store(5 * 16384, Ordering::Relaxed);
        metrics.hw_errors.store(1, Ordering::Relaxed);

        let summary = metrics.summary(&Instant::now());
        assert_eq!(summary.blocks_emitted, 5);
        assert_eq!(summary.hw_errors, 1);

        let text = summary.to_string();
        assert!(text.contains("Blocks emitted  : 5"));
        assert!(text.contains("Hardware errors : 1"));
    }
}
