use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::Builder;

use camstream::config::StreamerConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "CAMSTREAM_CONFIG",
        "CAMERA_SOURCE",
        "CSI_WIDTH",
        "CSI_HEIGHT",
        "CSI_FPS",
        "CSI_FLIP",
        "CSI_SENSOR_ID",
        "CSI_SENSOR_MODE",
        "STREAM_TARGET_FPS",
        "JPEG_QUALITY",
        "STREAM_BIND",
        "STREAM_PORT",
        "STREAM_LOG_REQUESTS",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn defaults_without_file_or_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = StreamerConfig::load().expect("load defaults");

    assert_eq!(cfg.capture.source, "csi");
    assert_eq!((cfg.capture.width, cfg.capture.height), (1280, 720));
    assert_eq!(cfg.capture.fps, 30);
    assert_eq!(cfg.capture.jpeg_quality, 80);
    assert_eq!(cfg.capture.backoff, Duration::from_millis(10));
    assert_eq!(cfg.capture.stop_timeout, Duration::from_secs(2));
    assert_eq!(cfg.server.bind, "0.0.0.0");
    assert_eq!(cfg.server.port, 8080);
    assert!(!cfg.server.log_requests);
}

#[test]
fn loads_json_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = Builder::new().suffix(".json").tempfile().expect("temp config");
    let json = r#"{
        "capture": {
            "source": "csi://1",
            "width": 1920,
            "height": 1080,
            "fps": 60,
            "jpeg_quality": 70,
            "sensor_mode": 2
        },
        "server": {
            "bind": "127.0.0.1",
            "port": 9000,
            "keepalive_ms": 250
        }
    }"#;
    file.write_all(json.as_bytes()).expect("write config");

    std::env::set_var("CAMSTREAM_CONFIG", file.path());
    std::env::set_var("CSI_FLIP", "2");
    std::env::set_var("JPEG_QUALITY", "55");
    std::env::set_var("STREAM_PORT", "8181");
    std::env::set_var("STREAM_LOG_REQUESTS", "yes");

    let cfg = StreamerConfig::load().expect("load config");

    assert_eq!(cfg.capture.source, "csi://1");
    assert_eq!((cfg.capture.width, cfg.capture.height), (1920, 1080));
    assert_eq!(cfg.capture.fps, 60);
    assert_eq!(cfg.capture.sensor_mode, Some(2));
    assert_eq!(cfg.capture.flip, 2);
    assert_eq!(cfg.capture.jpeg_quality, 55);
    assert_eq!(
        cfg.capture.frame_interval(),
        Some(Duration::from_nanos(1_000_000_000 / 30))
    );
    assert_eq!(cfg.server.bind, "127.0.0.1");
    assert_eq!(cfg.server.port, 8181);
    assert_eq!(cfg.server.keepalive_interval, Duration::from_millis(250));
    assert!(cfg.server.log_requests);

    clear_env();
}

#[test]
fn loads_toml_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = Builder::new().suffix(".toml").tempfile().expect("temp config");
    let toml = r#"
        [capture]
        source = "/dev/video2"
        target_fps = 0
        backoff_ms = 50

        [server]
        port = 0
        shutdown_timeout_ms = 500
    "#;
    file.write_all(toml.as_bytes()).expect("write config");

    let cfg = StreamerConfig::load_from(Some(file.path())).expect("load config");

    assert_eq!(cfg.capture.source, "/dev/video2");
    assert_eq!(cfg.capture.frame_interval(), None);
    assert_eq!(cfg.capture.backoff, Duration::from_millis(50));
    assert_eq!(cfg.server.port, 0);
    assert_eq!(cfg.server.shutdown_timeout, Duration::from_millis(500));
}

#[test]
fn rejects_out_of_range_quality_from_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("JPEG_QUALITY", "0");
    assert!(StreamerConfig::load().is_err());
    std::env::set_var("JPEG_QUALITY", "101");
    assert!(StreamerConfig::load().is_err());

    clear_env();
}

#[test]
fn rejects_malformed_env_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("CSI_WIDTH", "wide");
    let err = StreamerConfig::load().expect_err("malformed width");
    assert!(err.to_string().contains("CSI_WIDTH"));

    clear_env();
    std::env::set_var("STREAM_PORT", "70000");
    assert!(StreamerConfig::load().is_err());

    clear_env();
}

#[test]
fn overflowing_env_value_reports_the_parse_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("JPEG_QUALITY", "300");
    let err = StreamerConfig::load().expect_err("quality does not fit in a byte");
    let message = err.to_string();
    assert!(message.contains("JPEG_QUALITY"), "{}", message);
    assert!(message.contains("'300'"), "{}", message);
    assert!(message.contains("too large"), "{}", message);
    assert!(!message.contains("non-negative"), "{}", message);

    clear_env();
}

#[test]
fn rejects_missing_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let dir = tempfile::tempdir().expect("temp dir");
    let missing = dir.path().join("absent.json");
    assert!(StreamerConfig::load_from(Some(&missing)).is_err());
}
