use thiserror::Error;

use crate::{HwStatus, RfModule};

/// Результат для операций флота захвата.
pub type StrobeResult<T> = std::result::Result<T, StrobeError>;

/// Типы ошибок системы синхронного захвата.
#[derive(Debug, Error)]
pub enum StrobeError {
    /// Конфигурация миссии не прошла валидацию
    #[error("Invalid mission config: {0}")]
    ConfigInvalid(String),

    /// Устройств найдено меньше, чем требует миссия
    #[error("No bladeRF devices found: {found} of {expected}")]
    NoDevice { found: usize, expected: usize },

    /// Устройство не открылось за выделенный бюджет попыток
    #[error("Failed to open device {serial}: {status}")]
    DeviceOpen { serial: String, status: HwStatus },

    /// Образ FPGA не найден или не загрузился
    #[error("FPGA load failed: {0}")]
    FpgaLoad(String),

    /// Настройка RF модуля прервана на одном из шагов
    #[error("[{module}] Failed to set {step}: {status}")]
    ModuleConfig {
        module: RfModule,
        step: &'static str,
        status: HwStatus,
    },

    /// Вызов драйвера вернул ненулевой статус
    #[error("{operation}: {status}")]
    HardwareCall {
        operation: &'static str,
        status: HwStatus,
    },

    /// Устройство не сопоставлено ни с одной ролью флота
    #[error("Unknown device: {serial}")]
    UnknownDevice { serial: String },

    /// Поток обмена с драйвером не инициализировался
    #[error("Stream init failed: {status}")]
    StreamInit { status: HwStatus },

    /// Ошибки ввода/вывода
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_config_display() {
        let err = StrobeError::ModuleConfig {
            module: RfModule::Rx2,
            step: "samplerate",
            status: HwStatus::IO,
        };
        assert_eq!(
            err.to_string(),
            "[RX2] Failed to set samplerate: File or device I/O failure (-5)"
        );
    }

    #[test]
    fn test_no_device_display() {
        let err = StrobeError::NoDevice {
            found: 1,
            expected: 3,
        };
        assert_eq!(err.to_string(), "No bladeRF devices found: 1 of 3");
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: StrobeError = io.into();
        assert!(matches!(err, StrobeError::Io(_)));
    }
}
