//! Драйвер поверх установленной libbladeRF 2.x.

use std::collections::HashMap;
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int, c_uint, c_void};
use std::path::Path;
use std::ptr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use strobe_types::{DeviceDescriptor, HwResult, HwStatus, RfModule, TriggerRole};

use crate::driver::{
    ChannelLayout, ClockSelect, DeviceHandle, HwTrigger, RadioDriver, StreamArena, StreamParams,
    StreamToken, TransferAction, TransferHandler, TriggerSignal,
};
use crate::ffi;

/// Контекст, который драйвер проносит в callback через user_data.
struct CallbackContext {
    handler: RwLock<Option<Arc<dyn TransferHandler>>>,
    /// Адреса слотов в порядке таблицы буферов, для поиска индекса
    buffers: Vec<usize>,
}

/// Callback цикла обмена. Восстанавливает контекст из user_data, находит
/// индекс завершённого слота по адресу буфера и транслирует ответ
/// обработчика обратно в протокол драйвера.
unsafe extern "C" fn stream_callback(
    _dev: *mut ffi::bladerf,
    _stream: *mut ffi::bladerf_stream,
    _meta: *mut c_void,
    samples: *mut c_void,
    _num_samples: usize,
    user_data: *mut c_void,
) -> *mut c_void {
    let context = &*(user_data as *const CallbackContext);
    let guard = match context.handler.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    let Some(handler) = guard.as_ref() else {
        return ffi::BLADERF_STREAM_SHUTDOWN;
    };

    let address = samples as usize;
    let Some(completed) = context.buffers.iter().position(|&slot| slot == address) else {
        return ffi::BLADERF_STREAM_SHUTDOWN;
    };

    match handler.on_transfer(completed) {
        TransferAction::Next(next) => match context.buffers.get(next) {
            Some(&slot) => slot as *mut c_void,
            None => ffi::BLADERF_STREAM_SHUTDOWN,
        },
        TransferAction::Shutdown => ffi::BLADERF_STREAM_SHUTDOWN,
    }
}

/// Арена поверх таблицы буферов, выделенной libbladeRF.
///
/// Слоты живут в памяти драйвера и действительны до деинициализации
/// потока; протокол движка гарантирует, что слот, отданный драйверу,
/// не читается и не пишется до его возврата в callback.
pub struct FfiArena {
    buffers: Vec<usize>,
    samples_per_slot: usize,
}

impl StreamArena for FfiArena {
    fn slots(&self) -> usize {
        self.buffers.len()
    }

    fn samples_per_slot(&self) -> usize {
        self.samples_per_slot
    }

    fn read(&self, index: usize) -> Vec<i16> {
        let Some(&address) = self.buffers.get(index) else {
            return Vec::new();
        };
        let length = self.samples_per_slot * 2;
        unsafe { std::slice::from_raw_parts(address as *const i16, length) }.to_vec()
    }

    fn write(&self, index: usize, samples: &[i16]) {
        let Some(&address) = self.buffers.get(index) else {
            return;
        };
        let length = samples.len().min(self.samples_per_slot * 2);
        unsafe { ptr::copy_nonoverlapping(samples.as_ptr(), address as *mut i16, length) };
    }
}

struct DevPtr(*mut ffi::bladerf);

// Указатель устройства гоняется между потоком координатора и потоками
// сессий, но каждым устройством владеет ровно одна сессия.
unsafe impl Send for DevPtr {}

struct StreamState {
    stream: *mut ffi::bladerf_stream,
    context: *mut CallbackContext,
    arena: Arc<FfiArena>,
}

unsafe impl Send for StreamState {}

/// Драйвер поверх libbladeRF.
pub struct LibbladerfDriver {
    devices: Mutex<HashMap<u64, DevPtr>>,
    infos: Mutex<HashMap<String, ffi::bladerf_devinfo>>,
    streams: Mutex<HashMap<u64, StreamState>>,
    next_handle: AtomicU64,
    next_token: AtomicU64,
}

impl LibbladerfDriver {
    pub fn new() -> Self {
        Self {
            devices: Mutex::new(HashMap::new()),
            infos: Mutex::new(HashMap::new()),
            streams: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(0),
            next_token: AtomicU64::new(0),
        }
    }

    fn dev(&self, handle: DeviceHandle) -> HwResult<*mut ffi::bladerf> {
        self.lock_devices()
            .get(&handle.0)
            .map(|dev| dev.0)
            .ok_or(HwStatus::NOT_INIT)
    }

    fn lock_devices(&self) -> MutexGuard<'_, HashMap<u64, DevPtr>> {
        self.devices.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_streams(&self) -> MutexGuard<'_, HashMap<u64, StreamState>> {
        self.streams.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for LibbladerfDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl RadioDriver for LibbladerfDriver {
    fn enumerate(&self) -> HwResult<Vec<DeviceDescriptor>> {
        let mut list: *mut ffi::bladerf_devinfo = ptr::null_mut();
        let count = unsafe { ffi::bladerf_get_device_list(&mut list) };
        if count == HwStatus::NODEV.code() {
            return Ok(Vec::new());
        }
        if count < 0 {
            return Err(HwStatus(count));
        }

        let mut devices = Vec::with_capacity(count as usize);
        let mut infos = self.infos.lock().unwrap_or_else(PoisonError::into_inner);
        for index in 0..count as usize {
            let info = unsafe { *list.add(index) };
            let descriptor = DeviceDescriptor {
                serial: text(&info.serial),
                manufacturer: text(&info.manufacturer),
                product: text(&info.product),
            };
            infos.insert(descriptor.serial.clone(), info);
            devices.push(descriptor);
        }
        unsafe { ffi::bladerf_free_device_list(list) };
        Ok(devices)
    }

    fn open(&self, descriptor: &DeviceDescriptor) -> HwResult<DeviceHandle> {
        let info = self
            .infos
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&descriptor.serial)
            .copied();
        let Some(mut info) = info else {
            return Err(HwStatus::NODEV);
        };

        let mut dev: *mut ffi::bladerf = ptr::null_mut();
        check(unsafe { ffi::bladerf_open_with_devinfo(&mut dev, &mut info) })?;

        let id = self.next_handle.fetch_add(1, Ordering::Relaxed) + 1;
        self.lock_devices().insert(id, DevPtr(dev));
        Ok(DeviceHandle(id))
    }

    fn close(&self, handle: DeviceHandle) {
        let dev = self.lock_devices().remove(&handle.0);
        if let Some(dev) = dev {
            unsafe { ffi::bladerf_close(dev.0) };
        }
    }

    fn fpga_configured(&self, handle: DeviceHandle) -> HwResult<bool> {
        let dev = self.dev(handle)?;
        let code = unsafe { ffi::bladerf_is_fpga_configured(dev) };
        match code {
            code if code < 0 => Err(HwStatus(code)),
            0 => Ok(false),
            _ => Ok(true),
        }
    }

    fn fpga_expected_bytes(&self, handle: DeviceHandle) -> HwResult<u64> {
        let dev = self.dev(handle)?;
        let mut size: usize = 0;
        check(unsafe { ffi::bladerf_get_fpga_bytes(dev, &mut size) })?;
        Ok(size as u64)
    }

    fn fpga_load(&self, handle: DeviceHandle, image: &Path) -> HwResult<()> {
        let dev = self.dev(handle)?;
        let path = CString::new(image.to_string_lossy().into_owned())
            .map_err(|_| HwStatus::INVAL)?;
        check(unsafe { ffi::bladerf_load_fpga(dev, path.as_ptr()) })
    }

    fn set_frequency(&self, handle: DeviceHandle, module: RfModule, hz: u64) -> HwResult<()> {
        let dev = self.dev(handle)?;
        check(unsafe { ffi::bladerf_set_frequency(dev, channel_code(module), hz) })
    }

    fn frequency(&self, handle: DeviceHandle, module: RfModule) -> HwResult<u64> {
        let dev = self.dev(handle)?;
        let mut hz: u64 = 0;
        check(unsafe { ffi::bladerf_get_frequency(dev, channel_code(module), &mut hz) })?;
        Ok(hz)
    }

    fn set_sample_rate(&self, handle: DeviceHandle, module: RfModule, hz: u64) -> HwResult<()> {
        let dev = self.dev(handle)?;
        let mut actual: c_uint = 0;
        check(unsafe {
            ffi::bladerf_set_sample_rate(dev, channel_code(module), hz as c_uint, &mut actual)
        })
    }

    fn sample_rate(&self, handle: DeviceHandle, module: RfModule) -> HwResult<u64> {
        let dev = self.dev(handle)?;
        let mut rate: c_uint = 0;
        check(unsafe { ffi::bladerf_get_sample_rate(dev, channel_code(module), &mut rate) })?;
        Ok(u64::from(rate))
    }

    fn set_bandwidth(&self, handle: DeviceHandle, module: RfModule, hz: u64) -> HwResult<()> {
        let dev = self.dev(handle)?;
        let mut actual: c_uint = 0;
        check(unsafe {
            ffi::bladerf_set_bandwidth(dev, channel_code(module), hz as c_uint, &mut actual)
        })
    }

    fn bandwidth(&self, handle: DeviceHandle, module: RfModule) -> HwResult<u64> {
        let dev = self.dev(handle)?;
        let mut bandwidth: c_uint = 0;
        check(unsafe { ffi::bladerf_get_bandwidth(dev, channel_code(module), &mut bandwidth) })?;
        Ok(u64::from(bandwidth))
    }

    fn set_rx_fir_decimation(&self, handle: DeviceHandle) -> HwResult<()> {
        let dev = self.dev(handle)?;
        check(unsafe { ffi::bladerf_set_rfic_rx_fir(dev, ffi::BLADERF_RFIC_RXFIR_DEC4) })
    }

    fn set_tx_fir_interpolation(&self, handle: DeviceHandle) -> HwResult<()> {
        let dev = self.dev(handle)?;
        check(unsafe { ffi::bladerf_set_rfic_tx_fir(dev, ffi::BLADERF_RFIC_TXFIR_INT4) })
    }

    fn set_manual_gain_mode(&self, handle: DeviceHandle, module: RfModule) -> HwResult<()> {
        let dev = self.dev(handle)?;
        check(unsafe {
            ffi::bladerf_set_gain_mode(dev, channel_code(module), ffi::BLADERF_GAIN_MGC)
        })
    }

    fn set_gain(&self, handle: DeviceHandle, module: RfModule, db: i32) -> HwResult<()> {
        let dev = self.dev(handle)?;
        check(unsafe { ffi::bladerf_set_gain(dev, channel_code(module), db) })
    }

    fn enable_module(
        &self,
        handle: DeviceHandle,
        module: RfModule,
        enabled: bool,
    ) -> HwResult<()> {
        let dev = self.dev(handle)?;
        check(unsafe { ffi::bladerf_enable_module(dev, channel_code(module), enabled) })
    }

    fn set_clock_output(&self, handle: DeviceHandle, enabled: bool) -> HwResult<()> {
        let dev = self.dev(handle)?;
        check(unsafe { ffi::bladerf_set_clock_output(dev, enabled) })
    }

    fn set_clock_select(&self, handle: DeviceHandle, select: ClockSelect) -> HwResult<()> {
        let dev = self.dev(handle)?;
        let code = match select {
            ClockSelect::Onboard => ffi::CLOCK_SELECT_ONBOARD,
            ClockSelect::External => ffi::CLOCK_SELECT_EXTERNAL,
        };
        check(unsafe { ffi::bladerf_set_clock_select(dev, code) })
    }

    fn set_pll_enable(&self, handle: DeviceHandle, enabled: bool) -> HwResult<()> {
        let dev = self.dev(handle)?;
        check(unsafe { ffi::bladerf_set_pll_enable(dev, enabled) })
    }

    fn set_pll_refclk(&self, handle: DeviceHandle, hz: u64) -> HwResult<()> {
        let dev = self.dev(handle)?;
        check(unsafe { ffi::bladerf_set_pll_refclk(dev, hz) })
    }

    fn trigger_init(
        &self,
        handle: DeviceHandle,
        module: RfModule,
        signal: TriggerSignal,
    ) -> HwResult<HwTrigger> {
        let dev = self.dev(handle)?;
        let mut raw = ffi::bladerf_trigger {
            channel: 0,
            role: 0,
            signal: 0,
            options: 0,
        };
        check(unsafe {
            ffi::bladerf_trigger_init(dev, channel_code(module), signal_code(signal), &mut raw)
        })?;
        Ok(HwTrigger {
            module,
            role: role_from_code(raw.role),
            signal,
        })
    }

    fn trigger_arm(&self, handle: DeviceHandle, trigger: &HwTrigger, arm: bool) -> HwResult<()> {
        let dev = self.dev(handle)?;
        let raw = raw_trigger(trigger);
        check(unsafe { ffi::bladerf_trigger_arm(dev, &raw, arm, 0, 0) })
    }

    fn trigger_fire(&self, handle: DeviceHandle, trigger: &HwTrigger) -> HwResult<()> {
        let dev = self.dev(handle)?;
        let raw = raw_trigger(trigger);
        check(unsafe { ffi::bladerf_trigger_fire(dev, &raw) })
    }

    fn stream_init(
        &self,
        handle: DeviceHandle,
        params: StreamParams,
    ) -> HwResult<(StreamToken, Arc<dyn StreamArena>)> {
        let dev = self.dev(handle)?;
        let context = Box::into_raw(Box::new(CallbackContext {
            handler: RwLock::new(None),
            buffers: Vec::new(),
        }));

        let mut stream: *mut ffi::bladerf_stream = ptr::null_mut();
        let mut buffers: *mut *mut c_void = ptr::null_mut();
        let code = unsafe {
            ffi::bladerf_init_stream(
                &mut stream,
                dev,
                stream_callback,
                &mut buffers,
                params.slots,
                ffi::BLADERF_FORMAT_SC16_Q11,
                params.samples_per_slot,
                params.transfers,
                context as *mut c_void,
            )
        };
        if code != 0 {
            // Поток не создан, контекст снова наш.
            drop(unsafe { Box::from_raw(context) });
            return Err(HwStatus(code));
        }

        // Таблица адресов заполняется до первого bladerf_stream, callback
        // её только читает.
        let table: Vec<usize> = (0..params.slots)
            .map(|slot| unsafe { *buffers.add(slot) } as usize)
            .collect();
        unsafe { (*context).buffers = table.clone() };

        let arena = Arc::new(FfiArena {
            buffers: table,
            samples_per_slot: params.samples_per_slot,
        });

        let id = self.next_token.fetch_add(1, Ordering::Relaxed) + 1;
        self.lock_streams().insert(
            id,
            StreamState {
                stream,
                context,
                arena: arena.clone(),
            },
        );
        Ok((StreamToken(id), arena))
    }

    fn stream_run(
        &self,
        token: StreamToken,
        layout: ChannelLayout,
        handler: Arc<dyn TransferHandler>,
    ) -> HwResult<()> {
        let (stream, context) = {
            let streams = self.lock_streams();
            match streams.get(&token.0) {
                Some(state) => (state.stream, state.context),
                None => return Err(HwStatus::NOT_INIT),
            }
        };

        // Контекст жив до stream_deinit; движок не деинициализирует поток,
        // пока этот вызов не вернулся.
        let context = unsafe { &*context };
        *context.handler.write().unwrap_or_else(PoisonError::into_inner) = Some(handler);
        let code = unsafe { ffi::bladerf_stream(stream, layout_code(layout)) };
        *context.handler.write().unwrap_or_else(PoisonError::into_inner) = None;

        check(code)
    }

    fn stream_deinit(&self, token: StreamToken) {
        let state = self.lock_streams().remove(&token.0);
        let Some(state) = state else {
            return;
        };
        unsafe {
            ffi::bladerf_deinit_stream(state.stream);
            drop(Box::from_raw(state.context));
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Трансляция типов
////////////////////////////////////////////////////////////////////////////////

fn check(code: c_int) -> HwResult<()> {
    if code == 0 {
        Ok(())
    } else {
        Err(HwStatus(code))
    }
}

fn text(raw: &[c_char]) -> String {
    unsafe { CStr::from_ptr(raw.as_ptr()) }
        .to_string_lossy()
        .into_owned()
}

fn channel_code(module: RfModule) -> ffi::bladerf_channel {
    match module {
        RfModule::Rx1 => ffi::BLADERF_CHANNEL_RX1,
        RfModule::Rx2 => ffi::BLADERF_CHANNEL_RX2,
        RfModule::Tx1 => ffi::BLADERF_CHANNEL_TX1,
        RfModule::Tx2 => ffi::BLADERF_CHANNEL_TX2,
    }
}

fn layout_code(layout: ChannelLayout) -> c_int {
    match layout {
        ChannelLayout::RxX1 => ffi::BLADERF_RX_X1,
        ChannelLayout::TxX1 => ffi::BLADERF_TX_X1,
        ChannelLayout::RxX2 => ffi::BLADERF_RX_X2,
        ChannelLayout::TxX2 => ffi::BLADERF_TX_X2,
    }
}

fn signal_code(signal: TriggerSignal) -> c_int {
    match signal {
        TriggerSignal::J714 => ffi::BLADERF_TRIGGER_J71_4,
        TriggerSignal::J511 => ffi::BLADERF_TRIGGER_J51_1,
        TriggerSignal::MiniExp1 => ffi::BLADERF_TRIGGER_MINI_EXP_1,
    }
}

fn role_code(role: TriggerRole) -> c_int {
    match role {
        TriggerRole::Disabled => ffi::BLADERF_TRIGGER_ROLE_DISABLED,
        TriggerRole::Master => ffi::BLADERF_TRIGGER_ROLE_MASTER,
        TriggerRole::Slave => ffi::BLADERF_TRIGGER_ROLE_SLAVE,
    }
}

fn role_from_code(code: c_int) -> TriggerRole {
    match code {
        ffi::BLADERF_TRIGGER_ROLE_MASTER => TriggerRole::Master,
        ffi::BLADERF_TRIGGER_ROLE_SLAVE => TriggerRole::Slave,
        _ => TriggerRole::Disabled,
    }
}

fn raw_trigger(trigger: &HwTrigger) -> ffi::bladerf_trigger {
    ffi::bladerf_trigger {
        channel: channel_code(trigger.module),
        role: role_code(trigger.role),
        signal: signal_code(trigger.signal),
        options: 0,
    }
}
