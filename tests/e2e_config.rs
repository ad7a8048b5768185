//! E2E tests for configuration files
//!
//! Tests legacy key names, fatal validation errors, and file naming derived
//! from the configured output path.

use soundtrap::config::{CaptureMode, ConfigError, DeviceSelector, FileNaming};
use soundtrap::server::{Settings, SettingsError};
use soundtrap::CaptureConfig;
use std::path::{Path, PathBuf};

fn write(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

#[test]
fn test_legacy_settings_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(
        dir.path(),
        "legacy.json",
        r#"{
            "ws_port": 5678,
            "device_index": 2,
            "samplerate_hz": 48000,
            "nr_buffers": 10,
            "nr_records": 3,
            "nr_cycles": 50,
            "out_audio_file_wav": "captures/event.wav",
            "len_recent_events": 8
        }"#,
    );

    let settings = Settings::load(&path).unwrap();
    assert_eq!(settings.server.port, 5678);
    assert_eq!(settings.server.bind_addr, "0.0.0.0");
    let capture = &settings.capture;
    assert_eq!(capture.device, Some(DeviceSelector::Index(2)));
    assert_eq!(capture.sample_rate, 48000);
    assert_eq!(capture.buffer_count, 10);
    assert_eq!(capture.record_count, 3);
    assert_eq!(capture.max_runs, 50);
    assert_eq!(capture.recent_events, 8);
    assert_eq!(capture.mode, CaptureMode::Triggered);
    assert_eq!(
        capture.window_file(7, 12),
        PathBuf::from("captures/event_run_12.wav")
    );
}

#[test]
fn test_device_by_name() {
    let config: CaptureConfig =
        serde_json::from_str(r#"{"device": "USB Microphone", "channels": 2}"#).unwrap();
    assert_eq!(
        config.device,
        Some(DeviceSelector::Name("USB Microphone".to_string()))
    );
    assert_eq!(config.channels, 2);
}

#[test]
fn test_record_count_exceeding_buffers_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(
        dir.path(),
        "bad.json",
        r#"{"buffer_count": 3, "record_count": 4}"#,
    );

    assert!(matches!(
        CaptureConfig::load(&path),
        Err(ConfigError::RecordCountExceedsBuffers {
            record_count: 4,
            buffer_count: 3
        })
    ));
    assert!(matches!(
        Settings::load(&path),
        Err(SettingsError::Config(ConfigError::RecordCountExceedsBuffers { .. }))
    ));
}

#[test]
fn test_unreadable_and_malformed_files_are_fatal() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        CaptureConfig::load(&dir.path().join("missing.json")),
        Err(ConfigError::Io { .. })
    ));

    let path = write(dir.path(), "broken.json", "{ not json");
    assert!(matches!(
        CaptureConfig::load(&path),
        Err(ConfigError::Parse(_))
    ));
}

#[test]
fn test_invalid_values_are_rejected() {
    let cases = [
        r#"{"sample_rate": 100}"#,
        r#"{"channels": 0}"#,
        r#"{"buffer_count": 0, "record_count": 0}"#,
        r#"{"record_count": 0}"#,
        r#"{"activity_threshold": -1.0}"#,
        r#"{"buffer_duration_s": 0.0}"#,
        r#"{"max_runs": 0}"#,
    ];
    for case in cases {
        let config: CaptureConfig = serde_json::from_str(case).unwrap();
        assert!(config.validate().is_err(), "accepted {}", case);
    }
}

#[test]
fn test_slot_and_run_naming() {
    let config = CaptureConfig {
        output_file: PathBuf::from("out/trap.wav"),
        file_naming: FileNaming::SlotAndRun,
        ..Default::default()
    };
    assert_eq!(config.window_file(3, 9), PathBuf::from("out/trap_3_9.wav"));
    assert_eq!(config.dump_file(9), PathBuf::from("out/trap_dump_9.wav"));
}

#[test]
fn test_save_then_serve_settings() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("capture.json");
    let config = CaptureConfig {
        buffer_count: 6,
        record_count: 6,
        mode: CaptureMode::Continuous,
        ..Default::default()
    };
    config.save(&path).unwrap();

    // A plain capture file is a valid settings file with server defaults
    let settings = Settings::load(&path).unwrap();
    assert_eq!(settings.server.port, 8765);
    assert_eq!(settings.server.max_sessions, 1);
    assert_eq!(settings.capture.record_count, 6);
    assert_eq!(settings.capture.mode, CaptureMode::Continuous);
}
