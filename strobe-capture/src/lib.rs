//! Утилита синхронного захвата: настройки миссии, файловый сток каналов
//! и обвязка процесса вокруг координатора флота.

pub mod error;
pub mod mission;
pub mod sink;

pub use error::*;
pub use mission::*;
pub use sink::*;
