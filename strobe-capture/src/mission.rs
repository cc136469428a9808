use std::fs;
use std::path::Path;

use strobe_types::MissionConfig;

use crate::error::{CaptureError, CaptureResult};

/// Загружает настройки миссии из JSON файла.
///
/// Числовые параметры в файле исторически записаны строками, разбор
/// принимает оба варианта. После разбора миссия проверяется на полноту:
/// запускать флот с нулевой частотой или пустым блоком бессмысленно.
pub fn load_mission(path: &Path) -> CaptureResult<MissionConfig> {
    let text = fs::read_to_string(path).map_err(|error| {
        CaptureError::Config(format!(
            "can't open settings file {}: {error}",
            path.display()
        ))
    })?;

    let config: MissionConfig = serde_json::from_str(&text)
        .map_err(|error| CaptureError::Config(format!("settings file invalid: {error}")))?;

    if !config.valid() {
        return Err(CaptureError::Config(
            "settings file incomplete: samples_count, samplerate, frequency and bandwidth must be non-zero"
                .to_string(),
        ));
    }
    Ok(config)
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::io::Write;

    use strobe_types::{Channel, Direction};
    use tempfile::NamedTempFile;

    use super::*;

    fn settings_file(raw: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(raw.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_load_legacy_settings() {
        let file = settings_file(
            r#"{
                "samples_count": "16384",
                "samplerate": "2000000",
                "frequency": "1602000000",
                "bandwidth": "1500000",
                "direction": 2,
                "channel": 2,
                "tryes": 5,
                "gain": 30,
                "file_name": "tx.bin",
                "devices": 2
            }"#,
        );

        let config = load_mission(file.path()).unwrap();
        assert_eq!(config.samples_count, 16384);
        assert_eq!(config.frequency, 1_602_000_000);
        assert_eq!(config.direction, Direction::Tx);
        assert_eq!(config.channel, Channel::Two);
        assert_eq!(config.open_attempts(), 5);
        assert_eq!(config.devices, 2);
    }

    #[test]
    fn test_missing_file() {
        let error = load_mission(Path::new("/no/such/settings.json")).unwrap_err();
        assert!(matches!(error, CaptureError::Config(_)));
        assert!(error.to_string().contains("can't open settings file"));
    }

    #[test]
    fn test_malformed_json() {
        let file = settings_file("{ this is not json");
        let error = load_mission(file.path()).unwrap_err();
        assert!(error.to_string().contains("settings file invalid"));
    }

    #[test]
    fn test_incomplete_mission_rejected() {
        let file = settings_file(
            r#"{
                "samples_count": "0",
                "samplerate": "2000000",
                "frequency": "1602000000",
                "bandwidth": "1500000"
            }"#,
        );
        let error = load_mission(file.path()).unwrap_err();
        assert!(error.to_string().contains("settings file incomplete"));
    }
}
