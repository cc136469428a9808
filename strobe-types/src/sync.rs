/// Роль устройства в схеме аппаратного триггера.
///
/// Все потоки флота взводятся на одну линию; мастер стреляет, остальные
/// ждут фронт на той же линии.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TriggerRole {
    /// Триггер не участвует в запуске
    #[default]
    Disabled,
    /// Формирует фронт запуска
    Master,
    /// Ждёт фронт от мастера
    Slave,
}

/// Роль устройства в цепочке распределения опорной частоты.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockRole {
    /// Бортовой опорный генератор: внутренний источник плюс PLL,
    /// захваченный на 10 МГц. Роль одиночного устройства.
    Onboard,
    /// Первое устройство цепочки: раздаёт свой клок по кабелю дальше.
    BroadcastMaster,
    /// Принимает внешний клок; `downstream` — ретранслирует его
    /// следующему устройству цепочки.
    ListenRebroadcast {
        downstream: bool,
    },
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_role_default() {
        assert_eq!(TriggerRole::default(), TriggerRole::Disabled);
    }

    #[test]
    fn test_clock_role_tail_of_chain() {
        let tail = ClockRole::ListenRebroadcast { downstream: false };
        let middle = ClockRole::ListenRebroadcast { downstream: true };
        assert_ne!(tail, middle);
    }
}
