use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use log::debug;
use strobe_types::{DeviceDescriptor, Direction, HwResult, HwStatus, RfModule, TriggerRole};

use crate::driver::{
    ChannelLayout, ClockSelect, DeviceHandle, HwTrigger, RadioDriver, StreamArena, StreamParams,
    StreamToken, TransferAction, TransferHandler, TriggerSignal,
};

/// Сценарий ответов одной операции имитатора.
#[derive(Debug, Clone, Copy)]
enum Script {
    /// Вернуть статус первые `left` вызовов, дальше успех
    FailTimes { left: u32, status: HwStatus },
    /// Возвращать статус всегда
    FailAlways { status: HwStatus },
}

#[derive(Debug)]
struct MockDevice {
    descriptor: DeviceDescriptor,
    fpga_configured: bool,
    fpga_bytes: u64,
    frequency: HashMap<RfModule, u64>,
    sample_rate: HashMap<RfModule, u64>,
    bandwidth: HashMap<RfModule, u64>,
    failures: HashMap<&'static str, Script>,
    delays: HashMap<&'static str, Duration>,
}

impl MockDevice {
    /// Применяет сценарий сбоев операции: возвращает статус, который
    /// должен вернуть этот вызов, либо `None` для успеха.
    fn script_outcome(&mut self, op: &'static str) -> Option<HwStatus> {
        match self.failures.get_mut(op) {
            Some(Script::FailTimes { left, status }) => {
                if *left > 0 {
                    *left -= 1;
                    Some(*status)
                } else {
                    None
                }
            }
            Some(Script::FailAlways { status }) => Some(*status),
            None => None,
        }
    }
}

struct MockStream {
    device: usize,
    direction: Direction,
    arena: Arc<MockArena>,
}

struct MockState {
    devices: Vec<MockDevice>,
    handles: HashMap<u64, usize>,
    streams: HashMap<u64, MockStream>,
    next_handle: u64,
    next_token: u64,
}

/// Имитатор драйвера для тестов и работы без железа.
///
/// Поведение каждого устройства программируется сценариями: операции
/// можно заставить сбоить заданное число раз или всегда, а также
/// задержать. Все вызовы журналируются в порядке поступления, что
/// позволяет тестам проверять протокол обращений к драйверу.
pub struct MockRadio {
    state: Mutex<MockState>,
    calls: Mutex<Vec<(String, String)>>,
    transfer_interval: Mutex<Duration>,
}

impl MockRadio {
    /// Создаёт имитатор с заданным числом подключённых устройств.
    pub fn new(devices: usize) -> Self {
        let devices = (0..devices)
            .map(|index| MockDevice {
                descriptor: DeviceDescriptor {
                    serial: format!("mock-{:04}", index + 1),
                    manufacturer: "Nuand".to_string(),
                    product: "bladeRF 2.0".to_string(),
                },
                fpga_configured: true,
                fpga_bytes: 0,
                frequency: HashMap::new(),
                sample_rate: HashMap::new(),
                bandwidth: HashMap::new(),
                failures: HashMap::new(),
                delays: HashMap::new(),
            })
            .collect();

        Self {
            state: Mutex::new(MockState {
                devices,
                handles: HashMap::new(),
                streams: HashMap::new(),
                next_handle: 0,
                next_token: 0,
            }),
            calls: Mutex::new(Vec::new()),
            transfer_interval: Mutex::new(Duration::ZERO),
        }
    }

    ////////////////////////////////////////////////////////////////////////////////
    // Сценарии
    ////////////////////////////////////////////////////////////////////////////////

    /// Операция `op` устройства сбоит первые `times` вызовов.
    pub fn fail_times(&self, serial: &str, op: &'static str, times: u32, status: HwStatus) {
        self.with_device(serial, |device| {
            device.failures.insert(op, Script::FailTimes { left: times, status });
        });
    }

    /// Операция `op` устройства сбоит на каждом вызове.
    pub fn fail_always(&self, serial: &str, op: &'static str, status: HwStatus) {
        self.with_device(serial, |device| {
            device.failures.insert(op, Script::FailAlways { status });
        });
    }

    /// Операция `op` устройства выполняется с задержкой.
    pub fn delay_op(&self, serial: &str, op: &'static str, delay: Duration) {
        self.with_device(serial, |device| {
            device.delays.insert(op, delay);
        });
    }

    /// Помечает FPGA устройства загруженной или пустой.
    pub fn set_fpga_configured(&self, serial: &str, configured: bool) {
        self.with_device(serial, |device| device.fpga_configured = configured);
    }

    /// Размер образа FPGA, который "ожидает" устройство.
    pub fn set_fpga_bytes(&self, serial: &str, bytes: u64) {
        self.with_device(serial, |device| device.fpga_bytes = bytes);
    }

    /// Пауза между транзакциями цикла обмена. Ноль — без темпа.
    pub fn set_transfer_interval(&self, interval: Duration) {
        *self
            .transfer_interval
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = interval;
    }

    ////////////////////////////////////////////////////////////////////////////////
    // Наблюдение
    ////////////////////////////////////////////////////////////////////////////////

    /// Серийный номер устройства по его порядковому индексу.
    pub fn serial(&self, index: usize) -> String {
        self.lock().devices[index].descriptor.serial.clone()
    }

    /// Журнал всех вызовов: пары (серийный номер, вызов).
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Журнал вызовов одного устройства.
    pub fn calls_for(&self, serial: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|(owner, _)| owner == serial)
            .map(|(_, call)| call)
            .collect()
    }

    /// Арена последнего инициализированного потока устройства.
    pub fn stream_arena(&self, serial: &str) -> Option<Arc<MockArena>> {
        let state = self.lock();
        let index = state
            .devices
            .iter()
            .position(|device| device.descriptor.serial == serial)?;
        state
            .streams
            .iter()
            .filter(|(_, stream)| stream.device == index)
            .max_by_key(|(token, _)| **token)
            .map(|(_, stream)| stream.arena.clone())
    }

    ////////////////////////////////////////////////////////////////////////////////
    // Собственные методы
    ////////////////////////////////////////////////////////////////////////////////

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, serial: &str, call: String) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((serial.to_string(), call));
    }

    fn with_device(&self, serial: &str, apply: impl FnOnce(&mut MockDevice)) {
        let mut state = self.lock();
        if let Some(device) = state
            .devices
            .iter_mut()
            .find(|device| device.descriptor.serial == serial)
        {
            apply(device);
        }
    }

    /// Разрешает handle в устройство, журналирует вызов и применяет
    /// сценарии сбоев и задержек. Возвращает индекс устройства.
    fn device_call(&self, handle: DeviceHandle, op: &'static str, detail: String) -> HwResult<usize> {
        let (index, serial, outcome, delay) = {
            let mut state = self.lock();
            let Some(&index) = state.handles.get(&handle.0) else {
                return Err(HwStatus::NOT_INIT);
            };
            let device = &mut state.devices[index];
            (
                index,
                device.descriptor.serial.clone(),
                device.script_outcome(op),
                device.delays.get(op).copied(),
            )
        };

        let call = if detail.is_empty() {
            op.to_string()
        } else {
            format!("{op} {detail}")
        };
        self.record(&serial, call);

        if let Some(delay) = delay {
            thread::sleep(delay);
        }
        match outcome {
            Some(status) => Err(status),
            None => Ok(index),
        }
    }
}

impl RadioDriver for MockRadio {
    fn enumerate(&self) -> HwResult<Vec<DeviceDescriptor>> {
        Ok(self
            .lock()
            .devices
            .iter()
            .map(|device| device.descriptor.clone())
            .collect())
    }

    fn open(&self, descriptor: &DeviceDescriptor) -> HwResult<DeviceHandle> {
        let (serial, outcome, handle, delay) = {
            let mut state = self.lock();
            let Some(index) = state
                .devices
                .iter()
                .position(|device| device.descriptor.serial == descriptor.serial)
            else {
                return Err(HwStatus::NODEV);
            };

            let device = &mut state.devices[index];
            let serial = device.descriptor.serial.clone();
            let outcome = device.script_outcome("open");
            let delay = device.delays.get("open").copied();

            let handle = if outcome.is_none() {
                state.next_handle += 1;
                let next_handle = state.next_handle;
                state.handles.insert(next_handle, index);
                Some(DeviceHandle(next_handle))
            } else {
                None
            };
            (serial, outcome, handle, delay)
        };

        self.record(&serial, "open".to_string());
        if let Some(delay) = delay {
            thread::sleep(delay);
        }
        match (outcome, handle) {
            (Some(status), _) => Err(status),
            (None, Some(handle)) => {
                debug!("mock device {serial} opened");
                Ok(handle)
            }
            (None, None) => Err(HwStatus::UNEXPECTED),
        }
    }

    fn close(&self, handle: DeviceHandle) {
        let serial = {
            let mut state = self.lock();
            match state.handles.remove(&handle.0) {
                Some(index) => state.devices[index].descriptor.serial.clone(),
                None => return,
            }
        };
        self.record(&serial, "close".to_string());
    }

    fn fpga_configured(&self, handle: DeviceHandle) -> HwResult<bool> {
        let index = self.device_call(handle, "fpga_configured", String::new())?;
        Ok(self.lock().devices[index].fpga_configured)
    }

    fn fpga_expected_bytes(&self, handle: DeviceHandle) -> HwResult<u64> {
        let index = self.device_call(handle, "fpga_expected_bytes", String::new())?;
        Ok(self.lock().devices[index].fpga_bytes)
    }

    fn fpga_load(&self, handle: DeviceHandle, image: &Path) -> HwResult<()> {
        let name = image
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let index = self.device_call(handle, "fpga_load", name)?;
        self.lock().devices[index].fpga_configured = true;
        Ok(())
    }

    fn set_frequency(&self, handle: DeviceHandle, module: RfModule, hz: u64) -> HwResult<()> {
        let index = self.device_call(handle, "set_frequency", format!("{module} {hz}"))?;
        self.lock().devices[index].frequency.insert(module, hz);
        Ok(())
    }

    fn frequency(&self, handle: DeviceHandle, module: RfModule) -> HwResult<u64> {
        let index = self.device_call(handle, "frequency", module.to_string())?;
        Ok(self.lock().devices[index].frequency.get(&module).copied().unwrap_or(0))
    }

    fn set_sample_rate(&self, handle: DeviceHandle, module: RfModule, hz: u64) -> HwResult<()> {
        let index = self.device_call(handle, "set_sample_rate", format!("{module} {hz}"))?;
        self.lock().devices[index].sample_rate.insert(module, hz);
        Ok(())
    }

    fn sample_rate(&self, handle: DeviceHandle, module: RfModule) -> HwResult<u64> {
        let index = self.device_call(handle, "sample_rate", module.to_string())?;
        Ok(self.lock().devices[index].sample_rate.get(&module).copied().unwrap_or(0))
    }

    fn set_bandwidth(&self, handle: DeviceHandle, module: RfModule, hz: u64) -> HwResult<()> {
        let index = self.device_call(handle, "set_bandwidth", format!("{module} {hz}"))?;
        self.lock().devices[index].bandwidth.insert(module, hz);
        Ok(())
    }

    fn bandwidth(&self, handle: DeviceHandle, module: RfModule) -> HwResult<u64> {
        let index = self.device_call(handle, "bandwidth", module.to_string())?;
        Ok(self.lock().devices[index].bandwidth.get(&module).copied().unwrap_or(0))
    }

    fn set_rx_fir_decimation(&self, handle: DeviceHandle) -> HwResult<()> {
        self.device_call(handle, "set_rx_fir_decimation", String::new())?;
        Ok(())
    }

    fn set_tx_fir_interpolation(&self, handle: DeviceHandle) -> HwResult<()> {
        self.device_call(handle, "set_tx_fir_interpolation", String::new())?;
        Ok(())
    }

    fn set_manual_gain_mode(&self, handle: DeviceHandle, module: RfModule) -> HwResult<()> {
        self.device_call(handle, "set_gain_mode", format!("{module} manual"))?;
        Ok(())
    }

    fn set_gain(&self, handle: DeviceHandle, module: RfModule, db: i32) -> HwResult<()> {
        self.device_call(handle, "set_gain", format!("{module} {db}"))?;
        Ok(())
    }

    fn enable_module(
        &self,
        handle: DeviceHandle,
        module: RfModule,
        enabled: bool,
    ) -> HwResult<()> {
        let detail = format!("{module} {}", if enabled { "on" } else { "off" });
        self.device_call(handle, "enable_module", detail)?;
        Ok(())
    }

    fn set_clock_output(&self, handle: DeviceHandle, enabled: bool) -> HwResult<()> {
        let detail = if enabled { "on" } else { "off" };
        self.device_call(handle, "set_clock_output", detail.to_string())?;
        Ok(())
    }

    fn set_clock_select(&self, handle: DeviceHandle, select: ClockSelect) -> HwResult<()> {
        let detail = match select {
            ClockSelect::Onboard => "onboard",
            ClockSelect::External => "external",
        };
        self.device_call(handle, "set_clock_select", detail.to_string())?;
        Ok(())
    }

    fn set_pll_enable(&self, handle: DeviceHandle, enabled: bool) -> HwResult<()> {
        let detail = if enabled { "on" } else { "off" };
        self.device_call(handle, "set_pll_enable", detail.to_string())?;
        Ok(())
    }

    fn set_pll_refclk(&self, handle: DeviceHandle, hz: u64) -> HwResult<()> {
        self.device_call(handle, "set_pll_refclk", hz.to_string())?;
        Ok(())
    }

    fn trigger_init(
        &self,
        handle: DeviceHandle,
        module: RfModule,
        signal: TriggerSignal,
    ) -> HwResult<HwTrigger> {
        self.device_call(handle, "trigger_init", module.to_string())?;
        Ok(HwTrigger {
            module,
            role: TriggerRole::Disabled,
            signal,
        })
    }

    fn trigger_arm(&self, handle: DeviceHandle, trigger: &HwTrigger, arm: bool) -> HwResult<()> {
        let detail = format!("{:?} {}", trigger.role, if arm { "on" } else { "off" });
        self.device_call(handle, "trigger_arm", detail)?;
        Ok(())
    }

    fn trigger_fire(&self, handle: DeviceHandle, _trigger: &HwTrigger) -> HwResult<()> {
        self.device_call(handle, "trigger_fire", String::new())?;
        Ok(())
    }

    fn stream_init(
        &self,
        handle: DeviceHandle,
        params: StreamParams,
    ) -> HwResult<(StreamToken, Arc<dyn StreamArena>)> {
        let detail = format!(
            "{} {}x{}",
            params.direction, params.slots, params.samples_per_slot
        );
        let index = self.device_call(handle, "stream_init", detail)?;

        let arena = Arc::new(MockArena::new(params.slots, params.samples_per_slot));
        let mut state = self.lock();
        state.next_token += 1;
        let token = StreamToken(state.next_token);
        state.streams.insert(
            token.0,
            MockStream {
                device: index,
                direction: params.direction,
                arena: arena.clone(),
            },
        );
        Ok((token, arena))
    }

    fn stream_run(
        &self,
        token: StreamToken,
        _layout: ChannelLayout,
        handler: Arc<dyn TransferHandler>,
    ) -> HwResult<()> {
        let (serial, direction, arena, outcome, delay) = {
            let mut state = self.lock();
            let (device_index, direction, arena) = match state.streams.get(&token.0) {
                Some(stream) => (stream.device, stream.direction, stream.arena.clone()),
                None => return Err(HwStatus::NOT_INIT),
            };
            let device = &mut state.devices[device_index];
            (
                device.descriptor.serial.clone(),
                direction,
                arena,
                device.script_outcome("stream_run"),
                device.delays.get("stream_run").copied(),
            )
        };

        self.record(&serial, format!("stream_run {direction}"));
        if let Some(delay) = delay {
            thread::sleep(delay);
        }
        if let Some(status) = outcome {
            return Err(status);
        }

        let interval = *self
            .transfer_interval
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut current = 0usize;
        let mut transfer = 0u64;
        loop {
            if direction == Direction::Rx {
                arena.fill(current, transfer);
            }
            match handler.on_transfer(current) {
                TransferAction::Next(next) => current = next,
                TransferAction::Shutdown => break,
            }
            transfer += 1;
            if !interval.is_zero() {
                thread::sleep(interval);
            }
        }
        debug!("mock stream of {serial} finished after {transfer} transfers");
        Ok(())
    }

    fn stream_deinit(&self, token: StreamToken) {
        let serial = {
            let mut state = self.lock();
            match state.streams.remove(&token.0) {
                Some(stream) => state.devices[stream.device].descriptor.serial.clone(),
                None => return,
            }
        };
        self.record(&serial, "stream_deinit".to_string());
    }
}

/// Арена имитатора: слоты в памяти под мьютексами.
pub struct MockArena {
    slots: Vec<Mutex<Vec<i16>>>,
    samples_per_slot: usize,
}

impl MockArena {
    pub fn new(slots: usize, samples_per_slot: usize) -> Self {
        Self {
            slots: (0..slots)
                .map(|_| Mutex::new(vec![0i16; samples_per_slot * 2]))
                .collect(),
            samples_per_slot,
        }
    }

    /// Детерминированное значение выборки `offset` транзакции `transfer`.
    pub fn pattern(transfer: u64, offset: usize) -> i16 {
        (transfer as i16).wrapping_mul(31).wrapping_add(offset as i16)
    }

    /// Заполняет слот синтетическим шаблоном приёмной транзакции.
    fn fill(&self, index: usize, transfer: u64) {
        let mut slot = self.slots[index].lock().unwrap_or_else(PoisonError::into_inner);
        for (offset, sample) in slot.iter_mut().enumerate() {
            *sample = Self::pattern(transfer, offset);
        }
    }
}

impl StreamArena for MockArena {
    fn slots(&self) -> usize {
        self.slots.len()
    }

    fn samples_per_slot(&self) -> usize {
        self.samples_per_slot
    }

    fn read(&self, index: usize) -> Vec<i16> {
        self.slots[index]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn write(&self, index: usize, samples: &[i16]) {
        let mut slot = self.slots[index].lock().unwrap_or_else(PoisonError::into_inner);
        let count = samples.len().min(slot.len());
        slot[..count].copy_from_slice(&samples[..count]);
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn open_first(radio: &MockRadio) -> DeviceHandle {
        let devices = radio.enumerate().unwrap();
        radio.open(&devices[0]).unwrap()
    }

    #[test]
    fn test_enumerate_reports_all_devices() {
        let radio = MockRadio::new(3);
        let devices = radio.enumerate().unwrap();
        assert_eq!(devices.len(), 3);
        assert_eq!(devices[0].serial, "mock-0001");
        assert_eq!(devices[2].serial, "mock-0003");
    }

    #[test]
    fn test_open_unknown_serial() {
        let radio = MockRadio::new(1);
        let ghost = DeviceDescriptor {
            serial: "nope".to_string(),
            manufacturer: String::new(),
            product: String::new(),
        };
        assert_eq!(radio.open(&ghost), Err(HwStatus::NODEV));
    }

    #[test]
    fn test_scripted_failures_then_success() {
        let radio = MockRadio::new(1);
        let serial = radio.serial(0);
        radio.fail_times(&serial, "open", 2, HwStatus::IO);

        let devices = radio.enumerate().unwrap();
        assert_eq!(radio.open(&devices[0]), Err(HwStatus::IO));
        assert_eq!(radio.open(&devices[0]), Err(HwStatus::IO));
        assert!(radio.open(&devices[0]).is_ok());
        assert_eq!(radio.calls_for(&serial).len(), 3);
    }

    #[test]
    fn test_calls_recorded_in_order() {
        let radio = MockRadio::new(1);
        let serial = radio.serial(0);
        let handle = open_first(&radio);

        radio.set_frequency(handle, RfModule::Rx1, 1_602_000_000).unwrap();
        radio.set_gain(handle, RfModule::Rx1, 40).unwrap();
        radio.close(handle);

        assert_eq!(
            radio.calls_for(&serial),
            vec![
                "open".to_string(),
                "set_frequency RX1 1602000000".to_string(),
                "set_gain RX1 40".to_string(),
                "close".to_string(),
            ]
        );
    }

    #[test]
    fn test_setters_feed_getters() {
        let radio = MockRadio::new(1);
        let handle = open_first(&radio);

        radio.set_sample_rate(handle, RfModule::Rx2, 2_000_000).unwrap();
        assert_eq!(radio.sample_rate(handle, RfModule::Rx2), Ok(2_000_000));
        assert_eq!(radio.sample_rate(handle, RfModule::Rx1), Ok(0));
    }

    #[test]
    fn test_stale_handle_rejected() {
        let radio = MockRadio::new(1);
        let handle = open_first(&radio);
        radio.close(handle);
        assert_eq!(
            radio.set_gain(handle, RfModule::Rx1, 10),
            Err(HwStatus::NOT_INIT)
        );
    }

    #[test]
    fn test_fpga_load_marks_configured() {
        let radio = MockRadio::new(1);
        let serial = radio.serial(0);
        radio.set_fpga_configured(&serial, false);
        let handle = open_first(&radio);

        assert_eq!(radio.fpga_configured(handle), Ok(false));
        radio.fpga_load(handle, Path::new("/tmp/image.rbf")).unwrap();
        assert_eq!(radio.fpga_configured(handle), Ok(true));
        assert!(radio
            .calls_for(&serial)
            .contains(&"fpga_load image.rbf".to_string()));
    }

    struct CountingHandler {
        remaining: AtomicUsize,
        seen: Mutex<Vec<usize>>,
        slots: usize,
    }

    impl TransferHandler for CountingHandler {
        fn on_transfer(&self, completed: usize) -> TransferAction {
            self.seen
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(completed);
            if self.remaining.fetch_sub(1, Ordering::SeqCst) <= 1 {
                return TransferAction::Shutdown;
            }
            TransferAction::Next((completed + 1) % self.slots)
        }
    }

    #[test]
    fn test_stream_follows_handler_protocol() {
        let radio = MockRadio::new(1);
        let handle = open_first(&radio);
        let params = StreamParams {
            direction: Direction::Rx,
            slots: 4,
            samples_per_slot: 16,
            transfers: 2,
        };
        let (token, arena) = radio.stream_init(handle, params).unwrap();
        assert_eq!(arena.slots(), 4);

        let handler = Arc::new(CountingHandler {
            remaining: AtomicUsize::new(3),
            seen: Mutex::new(Vec::new()),
            slots: 4,
        });
        radio
            .stream_run(token, ChannelLayout::RxX2, handler.clone())
            .unwrap();

        let seen = handler.seen.lock().unwrap().clone();
        assert_eq!(seen, vec![0, 1, 2]);

        // Последняя транзакция заполнила слот 2 шаблоном третьей передачи.
        let slot = arena.read(2);
        assert_eq!(slot[0], MockArena::pattern(2, 0));
        assert_eq!(slot[5], MockArena::pattern(2, 5));

        radio.stream_deinit(token);
        assert!(radio.stream_arena(&radio.serial(0)).is_none());
    }
}
