#[cfg(test)]
mod tests {
    use fanout_events::{Bus, BusConfig, BusError, CancellationToken};
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn toml_file(contents: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_from_file_with_defaults() {
        let file = toml_file("inbound_capacity = 4\n");

        let config = BusConfig::load(file.path()).unwrap();

        assert_eq!(config.inbound_capacity, 4);
        assert_eq!(config.subscriber_capacity, BusConfig::default().subscriber_capacity);
    }

    #[test]
    fn test_load_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();

        let err = BusConfig::load(dir.path().join("absent.toml")).unwrap_err();

        assert!(matches!(err, BusError::Config { .. }));
    }

    #[test]
    fn test_load_rejects_zero_capacity() {
        let file = toml_file("inbound_capacity = 8\nsubscriber_capacity = 0\n");

        let err = BusConfig::load(file.path()).unwrap_err();

        assert!(matches!(err, BusError::InvalidCapacity { .. }));
        assert!(err.to_string().contains("subscriber_capacity"));
    }

    #[test]
    fn test_load_rejects_malformed_values() {
        let file = toml_file("inbound_capacity = \"lots\"\n");

        let err = BusConfig::load(file.path()).unwrap_err();

        assert!(matches!(err, BusError::Config { .. }));
    }

    #[test]
    fn test_deserialize_partial_json() {
        let config: BusConfig = serde_json::from_str(r#"{ "subscriber_capacity": 16 }"#).unwrap();

        assert_eq!(config, BusConfig { subscriber_capacity: 16, ..BusConfig::default() });
    }

    #[tokio::test]
    async fn test_loaded_config_drives_the_bus() {
        let file = toml_file("inbound_capacity = 3\nsubscriber_capacity = 5\n");
        let config = BusConfig::load(file.path()).unwrap();
        let scope = CancellationToken::new();

        let bus = Bus::<u8>::builder().config(config).scope(&scope).build().unwrap();

        assert_eq!(bus.config(), config);
        scope.cancel();
        bus.terminated().await;
    }
}
