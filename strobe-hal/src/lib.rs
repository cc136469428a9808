//! Поверхность вызовов драйвера SDR: трейт `RadioDriver`, имитатор для
//! тестов и отладки без железа, и привязка к libbladeRF за фичей
//! `libbladerf`.

pub mod driver;
pub mod mock;

#[cfg(feature = "libbladerf")]
pub mod bladerf;
#[cfg(feature = "libbladerf")]
pub mod ffi;

pub use driver::*;
pub use mock::*;

#[cfg(feature = "libbladerf")]
pub use bladerf::LibbladerfDriver;
