//! Общие типы системы синхронного захвата: конфигурация миссии, блоки
//! выборок, идентичность устройств, роли синхронизации и таксономия ошибок.

pub mod channel;
pub mod device;
pub mod error;
pub mod mission;
pub mod sample_block;
pub mod status;
pub mod sync;

pub use channel::*;
pub use device::*;
pub use error::*;
pub use mission::*;
pub use sample_block::*;
pub use status::*;
pub use sync::*;
