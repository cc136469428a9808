use strobe_types::StrobeError;
use thiserror::Error;

pub type CaptureResult<T> = std::result::Result<T, CaptureError>;

#[derive(Debug, Error)]
pub enum CaptureError {
    /// Настройки миссии не читаются или не проходят проверку
    #[error("{0}")]
    Config(String),

    /// Запуск с реальным железом без прав суперпользователя
    #[error("This program needs to be started with superuser permissions")]
    Privilege,

    /// Ошибка флота устройств
    #[error(transparent)]
    Fleet(#[from] StrobeError),

    /// Ошибка ввода-вывода
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CaptureError {
    /// Код возврата процесса для этой ошибки.
    pub fn exit_code(&self) -> i32 {
        match self {
            CaptureError::Privilege => 2,
            _ => 1,
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_privilege_exit_code() {
        assert_eq!(CaptureError::Privilege.exit_code(), 2);
        assert_eq!(CaptureError::Config("x".to_string()).exit_code(), 1);
        assert_eq!(
            CaptureError::Fleet(StrobeError::ConfigInvalid("x".to_string())).exit_code(),
            1
        );
    }

    #[test]
    fn test_privilege_message() {
        assert_eq!(
            CaptureError::Privilege.to_string(),
            "This program needs to be started with superuser permissions"
        );
    }
}
