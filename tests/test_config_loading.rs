use spatial_view::config::ServerConfig;
use spatial_view::{MemorySpatialEngine, SpatialError, SpatialIndexEngine, Staleness};
use std::io::Write;
use tempfile::NamedTempFile;

fn write_config(yaml: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(yaml.as_bytes()).unwrap();
    file
}

#[test]
fn test_load_shipped_config() {
    let config = ServerConfig::from_file("spatial_view.yaml");
    assert!(config.is_ok(), "Failed to load shipped config: {:?}", config.err());

    let config = config.unwrap();
    assert_eq!(config.listen_address, "127.0.0.1:5985");
    assert_eq!(config.stream_buffer, 16);
    assert_eq!(config.seed_file.as_deref(), Some("demos/places.json"));
    assert!(config.expose_metrics);
}

#[test]
fn test_load_minimal_config() {
    let file = write_config("listen_address: \"0.0.0.0:8080\"\n");

    let config = ServerConfig::from_file(file.path()).unwrap();
    assert_eq!(config.listen_address, "0.0.0.0:8080");
    // Check defaults are applied
    assert_eq!(config.stream_buffer, 16);
    assert_eq!(config.log_level, "info");
    assert!(config.seed_file.is_none());
    assert!(config.expose_metrics);
}

#[test]
fn test_load_invalid_config() {
    let file = write_config("stream_buffer: 0\n");
    let config = ServerConfig::from_file(file.path());
    assert!(
        matches!(config, Err(SpatialError::ConfigError(_))),
        "Should fail validation for stream_buffer = 0"
    );

    let file = write_config("log_level: loud\n");
    assert!(ServerConfig::from_file(file.path()).is_err());
}

#[test]
fn test_load_malformed_yaml() {
    let file = write_config("stream_buffer: [not, a, number\n");
    assert!(matches!(
        ServerConfig::from_file(file.path()),
        Err(SpatialError::ConfigError(_))
    ));
}

#[test]
fn test_load_nonexistent_file() {
    let config = ServerConfig::from_file("nonexistent.yaml");
    assert!(config.is_err(), "Should fail when file doesn't exist");
}

#[test]
fn test_load_or_default() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("spatial_view.yaml");

    let config = ServerConfig::load_or_default(&missing, true).unwrap();
    assert_eq!(config, ServerConfig::default());

    assert!(ServerConfig::load_or_default(&missing, false).is_err());

    let file = write_config("stream_buffer: 8\n");
    let config = ServerConfig::load_or_default(file.path(), true).unwrap();
    assert_eq!(config.stream_buffer, 8);
}

#[tokio::test]
async fn test_load_demo_seed() {
    let engine = MemorySpatialEngine::from_seed_file("demos/places.json").unwrap();

    let (handle, group) = engine
        .get_index("places", "_design/geo", "points", Staleness::AllowStale)
        .await
        .unwrap();
    assert_eq!(handle.len(), 5);
    assert_eq!(group.current_generation, 7);
}

#[test]
fn test_load_malformed_seed() {
    let file = write_config("{\"databases\": 3}");
    assert!(matches!(
        MemorySpatialEngine::from_seed_file(file.path()),
        Err(SpatialError::ConfigError(_))
    ));
}
