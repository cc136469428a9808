use std::fmt;

/// Идентичность устройства, полученная при перечислении.
///
/// Серийный номер — единственный стабильный ключ: по нему устройство
/// открывается повторно после тихого переподключения.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    /// Серийный номер платы
    pub serial: String,
    /// Производитель
    pub manufacturer: String,
    /// Название продукта
    pub product: String,
}

/// Логическая роль устройства во флоте. Роли назначаются по порядку
/// перечисления начиная с единицы; роль 1 — мастер.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceRole(pub u8);

impl DeviceRole {
    /// Роль мастера: раздаёт опорную частоту и стреляет триггером.
    pub const MASTER: DeviceRole = DeviceRole(1);

    /// Устройство с этой ролью — мастер флота.
    pub fn is_master(&self) -> bool {
        self.0 == 1
    }

    /// Следующая роль в цепочке.
    pub fn next(&self) -> DeviceRole {
        DeviceRole(self.0 + 1)
    }
}

impl fmt::Display for DeviceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_master_role() {
        assert!(DeviceRole::MASTER.is_master());
        assert!(!DeviceRole(2).is_master());
    }

    #[test]
    fn test_role_ordering() {
        assert!(DeviceRole(1) < DeviceRole(2));
        assert_eq!(DeviceRole(1).next(), DeviceRole(2));
    }
}
