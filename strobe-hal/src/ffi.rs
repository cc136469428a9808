//! Объявления вызовов libbladeRF 2.x, используемых драйвером.
//!
//! Сигнатуры и константы сверены с libbladeRF.h; структуры повторяют
//! раскладку C один в один.

#![allow(non_camel_case_types)]

use std::os::raw::{c_char, c_int, c_uint, c_void};

pub type bladerf = c_void;
pub type bladerf_stream = c_void;
pub type bladerf_channel = c_int;

/// Callback цикла обмена: возвращает адрес следующего буфера либо
/// `BLADERF_STREAM_SHUTDOWN`.
pub type bladerf_stream_cb = unsafe extern "C" fn(
    dev: *mut bladerf,
    stream: *mut bladerf_stream,
    meta: *mut c_void,
    samples: *mut c_void,
    num_samples: usize,
    user_data: *mut c_void,
) -> *mut c_void;

pub const BLADERF_SERIAL_LENGTH: usize = 33;
pub const BLADERF_DESCRIPTION_LENGTH: usize = 33;

/// bladerf_devinfo
#[repr(C)]
#[derive(Clone, Copy)]
pub struct bladerf_devinfo {
    pub backend: c_int,
    pub serial: [c_char; BLADERF_SERIAL_LENGTH],
    pub usb_bus: u8,
    pub usb_addr: u8,
    pub instance: c_uint,
    pub manufacturer: [c_char; BLADERF_DESCRIPTION_LENGTH],
    pub product: [c_char; BLADERF_DESCRIPTION_LENGTH],
}

/// bladerf_trigger
#[repr(C)]
#[derive(Clone, Copy)]
pub struct bladerf_trigger {
    pub channel: bladerf_channel,
    pub role: c_int,
    pub signal: c_int,
    pub options: u64,
}

// bladerf_channel: ((num << 1) | dir), приём — 0, передача — 1.
pub const BLADERF_CHANNEL_RX1: bladerf_channel = 0;
pub const BLADERF_CHANNEL_TX1: bladerf_channel = 1;
pub const BLADERF_CHANNEL_RX2: bladerf_channel = 2;
pub const BLADERF_CHANNEL_TX2: bladerf_channel = 3;

// bladerf_channel_layout
pub const BLADERF_RX_X1: c_int = 0;
pub const BLADERF_TX_X1: c_int = 1;
pub const BLADERF_RX_X2: c_int = 2;
pub const BLADERF_TX_X2: c_int = 3;

// bladerf_format
pub const BLADERF_FORMAT_SC16_Q11: c_int = 0;

// bladerf_gain_mode
pub const BLADERF_GAIN_MGC: c_int = 1;

// bladerf_rfic_rxfir / bladerf_rfic_txfir
pub const BLADERF_RFIC_RXFIR_DEC4: c_int = 4;
pub const BLADERF_RFIC_TXFIR_INT4: c_int = 4;

// bladerf_clock_select
pub const CLOCK_SELECT_ONBOARD: c_int = 0;
pub const CLOCK_SELECT_EXTERNAL: c_int = 1;

// bladerf_trigger_role
pub const BLADERF_TRIGGER_ROLE_DISABLED: c_int = 0;
pub const BLADERF_TRIGGER_ROLE_MASTER: c_int = 1;
pub const BLADERF_TRIGGER_ROLE_SLAVE: c_int = 2;

// bladerf_trigger_signal
pub const BLADERF_TRIGGER_J71_4: c_int = 0;
pub const BLADERF_TRIGGER_J51_1: c_int = 1;
pub const BLADERF_TRIGGER_MINI_EXP_1: c_int = 2;

/// Возврат callback-а, прекращающий поток.
pub const BLADERF_STREAM_SHUTDOWN: *mut c_void = std::ptr::null_mut();

#[link(name = "bladeRF")]
extern "C" {
    pub fn bladerf_get_device_list(devices: *mut *mut bladerf_devinfo) -> c_int;
    pub fn bladerf_free_device_list(devices: *mut bladerf_devinfo);
    pub fn bladerf_open_with_devinfo(
        dev: *mut *mut bladerf,
        devinfo: *mut bladerf_devinfo,
    ) -> c_int;
    pub fn bladerf_close(dev: *mut bladerf);

    pub fn bladerf_is_fpga_configured(dev: *mut bladerf) -> c_int;
    pub fn bladerf_get_fpga_bytes(dev: *mut bladerf, size: *mut usize) -> c_int;
    pub fn bladerf_load_fpga(dev: *mut bladerf, fpga: *const c_char) -> c_int;

    pub fn bladerf_set_frequency(
        dev: *mut bladerf,
        ch: bladerf_channel,
        frequency: u64,
    ) -> c_int;
    pub fn bladerf_get_frequency(
        dev: *mut bladerf,
        ch: bladerf_channel,
        frequency: *mut u64,
    ) -> c_int;
    pub fn bladerf_set_sample_rate(
        dev: *mut bladerf,
        ch: bladerf_channel,
        rate: c_uint,
        actual: *mut c_uint,
    ) -> c_int;
    pub fn bladerf_get_sample_rate(
        dev: *mut bladerf,
        ch: bladerf_channel,
        rate: *mut c_uint,
    ) -> c_int;
    pub fn bladerf_set_bandwidth(
        dev: *mut bladerf,
        ch: bladerf_channel,
        bandwidth: c_uint,
        actual: *mut c_uint,
    ) -> c_int;
    pub fn bladerf_get_bandwidth(
        dev: *mut bladerf,
        ch: bladerf_channel,
        bandwidth: *mut c_uint,
    ) -> c_int;

    pub fn bladerf_set_rfic_rx_fir(dev: *mut bladerf, rxfir: c_int) -> c_int;
    pub fn bladerf_set_rfic_tx_fir(dev: *mut bladerf, txfir: c_int) -> c_int;
    pub fn bladerf_set_gain_mode(dev: *mut bladerf, ch: bladerf_channel, mode: c_int) -> c_int;
    pub fn bladerf_set_gain(dev: *mut bladerf, ch: bladerf_channel, gain: c_int) -> c_int;
    pub fn bladerf_enable_module(dev: *mut bladerf, ch: bladerf_channel, enable: bool) -> c_int;

    pub fn bladerf_set_clock_output(dev: *mut bladerf, enable: bool) -> c_int;
    pub fn bladerf_set_clock_select(dev: *mut bladerf, sel: c_int) -> c_int;
    pub fn bladerf_set_pll_enable(dev: *mut bladerf, enable: bool) -> c_int;
    pub fn bladerf_set_pll_refclk(dev: *mut bladerf, frequency: u64) -> c_int;

    pub fn bladerf_trigger_init(
        dev: *mut bladerf,
        ch: bladerf_channel,
        signal: c_int,
        trigger: *mut bladerf_trigger,
    ) -> c_int;
    pub fn bladerf_trigger_arm(
        dev: *mut bladerf,
        trigger: *const bladerf_trigger,
        arm: bool,
        resv1: u64,
        resv2: u64,
    ) -> c_int;
    pub fn bladerf_trigger_fire(dev: *mut bladerf, trigger: *const bladerf_trigger) -> c_int;

    pub fn bladerf_init_stream(
        stream: *mut *mut bladerf_stream,
        dev: *mut bladerf,
        callback: bladerf_stream_cb,
        buffers: *mut *mut *mut c_void,
        num_buffers: usize,
        format: c_int,
        samples_per_buffer: usize,
        num_transfers: usize,
        user_data: *mut c_void,
    ) -> c_int;
    pub fn bladerf_stream(stream: *mut bladerf_stream, layout: c_int) -> c_int;
    pub fn bladerf_deinit_stream(stream: *mut bladerf_stream);

    pub fn bladerf_strerror(error: c_int) -> *const c_char;
}
