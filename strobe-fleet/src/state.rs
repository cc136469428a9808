use std::collections::BTreeMap;

use strobe_types::DeviceRole;

/// Флаги состояния устройств флота по ролям.
///
/// Мутируется только потоком координатора, поэтому обходится без
/// синхронизации. Запись появляется при первом событии роли и исчезает,
/// когда устройство закрылось.
#[derive(Debug, Default)]
pub struct FleetState {
    members: BTreeMap<DeviceRole, MemberState>,
}

#[derive(Debug, Default, Clone, Copy)]
struct MemberState {
    opened: bool,
    started: bool,
}

impl FleetState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Отмечает устройство открытым.
    pub fn mark_opened(&mut self, role: DeviceRole) {
        self.members.entry(role).or_default().opened = true;
    }

    /// Количество открытых устройств.
    pub fn opened_count(&self) -> usize {
        self.members.values().filter(|member| member.opened).count()
    }

    /// Отмечает сессию запущенной. Возвращает true, когда запущены все
    /// `expected` сессий — момент выстрела триггера.
    pub fn mark_started(&mut self, role: DeviceRole, expected: usize) -> bool {
        self.members.entry(role).or_default().started = true;
        self.started_count() == expected
    }

    /// Отмечает сессию остановленной. Возвращает true только на переходе
    /// "хотя бы одна запущена" -> "ни одной запущенной".
    pub fn mark_stopped(&mut self, role: DeviceRole) -> bool {
        let was_any = self.any_started();
        if let Some(member) = self.members.get_mut(&role) {
            member.started = false;
        }
        was_any && !self.any_started()
    }

    /// Удаляет запись устройства. Возвращает true, когда флот опустел.
    pub fn remove(&mut self, role: DeviceRole) -> bool {
        self.members.remove(&role);
        self.members.is_empty()
    }

    pub fn any_started(&self) -> bool {
        self.members.values().any(|member| member.started)
    }

    pub fn started_count(&self) -> usize {
        self.members.values().filter(|member| member.started).count()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_started_threshold() {
        let mut state = FleetState::new();
        assert!(!state.mark_started(DeviceRole(1), 3));
        assert!(!state.mark_started(DeviceRole(2), 3));
        assert!(state.mark_started(DeviceRole(3), 3));
    }

    #[test]
    fn test_stopped_transition_fires_once() {
        let mut state = FleetState::new();
        state.mark_started(DeviceRole(1), 3);
        state.mark_started(DeviceRole(2), 3);
        state.mark_started(DeviceRole(3), 3);

        assert!(!state.mark_stopped(DeviceRole(1)));
        assert!(!state.mark_stopped(DeviceRole(2)));
        assert!(state.mark_stopped(DeviceRole(3)));
        // Повторная остановка уже без перехода.
        assert!(!state.mark_stopped(DeviceRole(3)));
    }

    #[test]
    fn test_stop_of_never_started_role() {
        let mut state = FleetState::new();
        state.mark_opened(DeviceRole(1));
        state.mark_started(DeviceRole(2), 3);

        // Роль 1 не стартовала, её остановка перехода не даёт.
        assert!(!state.mark_stopped(DeviceRole(1)));
        assert!(state.mark_stopped(DeviceRole(2)));
    }

    #[test]
    fn test_remove_until_empty() {
        let mut state = FleetState::new();
        state.mark_opened(DeviceRole(1));
        state.mark_opened(DeviceRole(2));
        assert_eq!(state.opened_count(), 2);

        assert!(!state.remove(DeviceRole(1)));
        assert!(state.remove(DeviceRole(2)));
        assert!(state.is_empty());
    }
}
