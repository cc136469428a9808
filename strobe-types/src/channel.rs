use std::fmt;

/// RF модуль устройства: отдельный приёмный или передающий тракт.
///
/// Устройство несёт по два тракта на направление; модуль адресует один
/// из них в вызовах настройки и управления.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RfModule {
    Rx1,
    Rx2,
    Tx1,
    Tx2,
}

impl RfModule {
    /// Модуль относится к приёмному направлению.
    pub fn is_rx(&self) -> bool {
        matches!(self, RfModule::Rx1 | RfModule::Rx2)
    }
}

impl fmt::Display for RfModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RfModule::Rx1 => "RX1",
            RfModule::Rx2 => "RX2",
            RfModule::Tx1 => "TX1",
            RfModule::Tx2 => "TX2",
        };
        f.write_str(name)
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_names() {
        assert_eq!(RfModule::Rx1.to_string(), "RX1");
        assert_eq!(RfModule::Tx2.to_string(), "TX2");
    }

    #[test]
    fn test_direction_predicate() {
        assert!(RfModule::Rx2.is_rx());
        assert!(!RfModule::Tx1.is_rx());
    }
}
