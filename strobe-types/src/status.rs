use std::fmt;

/// Результат сырого вызова драйвера: `Ok` либо ненулевой код возврата.
pub type HwResult<T> = std::result::Result<T, HwStatus>;

/// Ненулевой код возврата libbladeRF. Отрицательные значения — ошибки
/// из заголовка libbladerf.h, сохраняются как есть.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HwStatus(pub i32);

impl HwStatus {
    /// Неожиданная ошибка.
    pub const UNEXPECTED: HwStatus = HwStatus(-1);
    /// Недопустимый параметр вызова.
    pub const INVAL: HwStatus = HwStatus(-3);
    /// Ошибка обмена с устройством.
    pub const IO: HwStatus = HwStatus(-5);
    /// Истёк таймаут операции.
    pub const TIMEOUT: HwStatus = HwStatus(-6);
    /// Устройство не найдено.
    pub const NODEV: HwStatus = HwStatus(-7);
    /// Операция не поддерживается прошивкой.
    pub const UNSUPPORTED: HwStatus = HwStatus(-8);
    /// Устройство или поток не инициализированы.
    pub const NOT_INIT: HwStatus = HwStatus(-19);

    /// Сырой код возврата.
    pub fn code(&self) -> i32 {
        self.0
    }
}

impl fmt::Display for HwStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match *self {
            HwStatus::UNEXPECTED => "An unexpected failure occurred",
            HwStatus::INVAL => "Invalid operation or parameter",
            HwStatus::IO => "File or device I/O failure",
            HwStatus::TIMEOUT => "Operation timed out",
            HwStatus::NODEV => "No devices available",
            HwStatus::UNSUPPORTED => "Operation not supported",
            HwStatus::NOT_INIT => "Device insufficiently initialized for operation",
            _ => "Unknown error code",
        };
        write!(f, "{} ({})", text, self.0)
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_known_code() {
        assert_eq!(HwStatus::TIMEOUT.to_string(), "Operation timed out (-6)");
    }

    #[test]
    fn test_display_unknown_code() {
        assert_eq!(HwStatus(-99).to_string(), "Unknown error code (-99)");
    }

    #[test]
    fn test_code_roundtrip() {
        assert_eq!(HwStatus(-7).code(), -7);
        assert_eq!(HwStatus::NODEV, HwStatus(-7));
    }
}
