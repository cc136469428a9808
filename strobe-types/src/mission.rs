use std::fmt;

use serde::{Deserialize, Serialize};

use crate::RfModule;

/// Бюджет попыток открытия устройства, когда миссия его не задаёт.
pub const DEFAULT_OPEN_ATTEMPTS: u32 = 3;

/// Направление сессии захвата.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Direction {
    /// Приём: оба тракта устройства пишут выборки
    Rx = 1,
    /// Передача: один тракт проигрывает файл источника
    Tx = 2,
}

impl Default for Direction {
    fn default() -> Self {
        Direction::Rx
    }
}

impl TryFrom<u8> for Direction {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Direction::Rx),
            2 => Ok(Direction::Tx),
            other => Err(format!("invalid direction {other}, expected 1 (RX) or 2 (TX)")),
        }
    }
}

impl From<Direction> for u8 {
    fn from(direction: Direction) -> u8 {
        direction as u8
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Rx => f.write_str("RX"),
            Direction::Tx => f.write_str("TX"),
        }
    }
}

/// Номер тракта для передающей миссии.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Channel {
    One = 1,
    Two = 2,
}

impl Channel {
    /// Передающий модуль, соответствующий номеру тракта.
    pub fn tx_module(self) -> RfModule {
        match self {
            Channel::One => RfModule::Tx1,
            Channel::Two => RfModule::Tx2,
        }
    }
}

impl Default for Channel {
    fn default() -> Self {
        Channel::One
    }
}

impl TryFrom<u8> for Channel {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Channel::One),
            2 => Ok(Channel::Two),
            other => Err(format!("invalid channel {other}, expected 1 or 2")),
        }
    }
}

impl From<Channel> for u8 {
    fn from(channel: Channel) -> u8 {
        channel as u8
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", *self as u8)
    }
}

/// Конфигурация миссии захвата, файл `settings.json`.
///
/// Числовые поля исторически записываются строками; при чтении
/// принимается и число, и строка.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionConfig {
    /// Выборок в одном блоке на канал
    #[serde(with = "stringly")]
    pub samples_count: u64,
    /// Частота дискретизации, Гц
    #[serde(with = "stringly")]
    pub samplerate: u64,
    /// Несущая частота, Гц
    #[serde(with = "stringly")]
    pub frequency: u64,
    /// Полоса пропускания, Гц
    #[serde(with = "stringly")]
    pub bandwidth: u64,
    /// Направление: 1 — приём, 2 — передача
    #[serde(default)]
    pub direction: Direction,
    /// Номер тракта передачи
    #[serde(default)]
    pub channel: Channel,
    /// Попыток открытия устройства, 0 — значение по умолчанию
    #[serde(default)]
    pub tryes: u32,
    /// Усиление, дБ
    #[serde(default)]
    pub gain: i32,
    /// Файл с выборками для передачи
    #[serde(default)]
    pub file_name: String,
    /// Ожидаемое число устройств, 0 — все найденные
    #[serde(default)]
    pub devices: usize,
}

impl MissionConfig {
    /// Миссия пригодна для запуска: ключевые параметры ненулевые.
    pub fn valid(&self) -> bool {
        self.samples_count != 0
            && self.samplerate != 0
            && self.frequency != 0
            && self.bandwidth != 0
    }

    /// Бюджет попыток открытия устройства.
    pub fn open_attempts(&self) -> u32 {
        if self.tryes == 0 {
            DEFAULT_OPEN_ATTEMPTS
        } else {
            self.tryes
        }
    }
}

impl Default for MissionConfig {
    fn default() -> Self {
        Self {
            samples_count: 16384,
            samplerate: 2_000_000,
            frequency: 1_602_000_000,
            bandwidth: 1_500_000,
            direction: Direction::Rx,
            channel: Channel::One,
            tryes: 0,
            gain: 40,
            file_name: String::new(),
            devices: 0,
        }
    }
}

/// (Де)сериализация u64, записанного в JSON строкой.
mod stringly {
    use std::fmt;

    use serde::{de, Deserializer, Serializer};

    pub fn serialize<S>(value: &u64, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<u64, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct StringlyVisitor;

        impl<'de> de::Visitor<'de> for StringlyVisitor {
            type Value = u64;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("u64 or decimal string")
            }

            fn visit_u64<E>(self, value: u64) -> Result<u64, E> {
                Ok(value)
            }

            fn visit_i64<E>(self, value: i64) -> Result<u64, E>
            where
                E: de::Error,
            {
                u64::try_from(value).map_err(de::Error::custom)
            }

            fn visit_str<E>(self, value: &str) -> Result<u64, E>
            where
                E: de::Error,
            {
                value.trim().parse().map_err(de::Error::custom)
            }
        }

        deserializer.deserialize_any(StringlyVisitor)
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> MissionConfig {
        MissionConfig::default()
    }

    #[test]
    fn test_valid_default() {
        assert!(test_config().valid());
    }

    #[test]
    fn test_invalid_when_any_key_field_is_zero() {
        for field in 0..4 {
            let mut config = test_config();
            match field {
                0 => config.samples_count = 0,
                1 => config.samplerate = 0,
                2 => config.frequency = 0,
                _ => config.bandwidth = 0,
            }
            assert!(!config.valid(), "field {field} must invalidate config");
        }
    }

    #[test]
    fn test_valid_ignores_optional_fields() {
        let mut config = test_config();
        config.gain = 0;
        config.tryes = 0;
        config.file_name = String::new();
        config.direction = Direction::Tx;
        assert!(config.valid());
    }

    #[test]
    fn test_open_attempts_default() {
        let mut config = test_config();
        assert_eq!(config.open_attempts(), DEFAULT_OPEN_ATTEMPTS);
        config.tryes = 7;
        assert_eq!(config.open_attempts(), 7);
    }

    #[test]
    fn test_deserialize_stringly_numbers() {
        let raw = r#"{
            "samples_count": "16384",
            "samplerate": "2000000",
            "frequency": "1602000000",
            "bandwidth": "1500000",
            "direction": 1,
            "channel": 2,
            "tryes": 5,
            "gain": 30,
            "file_name": "tx.bin"
        }"#;
        let config: MissionConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(config.samples_count, 16384);
        assert_eq!(config.frequency, 1_602_000_000);
        assert_eq!(config.channel, Channel::Two);
        assert_eq!(config.tryes, 5);
        assert_eq!(config.devices, 0);
    }

    #[test]
    fn test_deserialize_plain_numbers() {
        let raw = r#"{
            "samples_count": 1024,
            "samplerate": 1000000,
            "frequency": 1602000000,
            "bandwidth": 1500000
        }"#;
        let config: MissionConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(config.samples_count, 1024);
        assert_eq!(config.direction, Direction::Rx);
        assert_eq!(config.channel, Channel::One);
    }

    #[test]
    fn test_serialize_numbers_as_strings() {
        let config = test_config();
        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["samples_count"], serde_json::json!("16384"));
        assert_eq!(value["frequency"], serde_json::json!("1602000000"));
        assert_eq!(value["direction"], serde_json::json!(1));
    }

    #[test]
    fn test_roundtrip() {
        let mut config = test_config();
        config.direction = Direction::Tx;
        config.channel = Channel::Two;
        config.file_name = "signal.bin".to_string();
        config.devices = 3;
        let json = serde_json::to_string(&config).unwrap();
        let parsed: MissionConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_invalid_direction_rejected() {
        let raw = r#"{
            "samples_count": "1024",
            "samplerate": "1000000",
            "frequency": "1602000000",
            "bandwidth": "1500000",
            "direction": 3
        }"#;
        assert!(serde_json::from_str::<MissionConfig>(raw).is_err());
    }

    #[test]
    fn test_tx_module_mapping() {
        assert_eq!(Channel::One.tx_module(), RfModule::Tx1);
        assert_eq!(Channel::Two.tx_module(), RfModule::Tx2);
    }
}
