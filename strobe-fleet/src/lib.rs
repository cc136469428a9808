//! Ядро системы синхронного захвата: движок потоков обмена, сессии
//! устройств и координатор флота.
//!
//! Иерархия повторяет железо. `StreamEngine` обслуживает один поток
//! обмена буферами, `DeviceSession` владеет одним устройством и живёт на
//! своём потоке, `FleetCoordinator` собирает сессии во флот: назначает
//! роли, выстраивает цепочку опорной частоты и стреляет общим триггером.

pub mod fleet;
pub mod metrics;
pub mod params;
pub mod session;
pub mod state;
pub mod stream;

pub use fleet::*;
pub use metrics::*;
pub use params::*;
pub use session::*;
pub use state::*;
pub use stream::*;

use strobe_types::{HwResult, StrobeError, StrobeResult};

/// Оборачивает ненулевой статус драйвера в ошибку с именем операции.
pub(crate) fn hw<T>(operation: &'static str, result: HwResult<T>) -> StrobeResult<T> {
    result.map_err(|status| StrobeError::HardwareCall { operation, status })
}
