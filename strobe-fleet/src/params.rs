use std::path::PathBuf;
use std::time::Duration;

use strobe_types::DEFAULT_OPEN_ATTEMPTS;

/// Тайминги и бюджеты флота. Боевые значения в `Default`; тесты
/// уменьшают интервалы, чтобы не ждать настоящих пауз железа.
#[derive(Debug, Clone)]
pub struct FleetParams {
    /// Попыток открытия устройства
    pub open_attempts: u32,
    /// Пауза между попытками схождения тактовой цепочки
    pub clock_retry: Duration,
    /// Пауза после открытия устройства
    pub open_settle: Duration,
    /// Пауза после запуска потока до пометки сессии запущенной
    pub start_settle: Duration,
    /// Пауза между последним стартом и выстрелом триггера
    pub fire_settle: Duration,
    /// Каталог с образами FPGA
    pub fpga_dir: PathBuf,
    /// Ёмкость канала блоков от движка к сессии
    pub stream_capacity: usize,
}

impl Default for FleetParams {
    fn default() -> Self {
        Self {
            open_attempts: DEFAULT_OPEN_ATTEMPTS,
            clock_retry: Duration::from_secs(1),
            open_settle: Duration::from_millis(500),
            start_settle: Duration::from_millis(500),
            fire_settle: Duration::from_secs(1),
            fpga_dir: PathBuf::from("bladeRF/fpga"),
            stream_capacity: 64,
        }
    }
}
