use forgekit::logging::{init_logging_with_config, LogConfig, LogFormat};

#[test]
fn test_file_log_flushed_when_guard_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let config = LogConfig {
        log_level: "info".to_string(),
        format: LogFormat::Json,
        target_filter: None,
        include_location: false,
        log_dir: Some(dir.path().join("logs")),
    };

    let guard = init_logging_with_config(&config).unwrap();
    tracing::error!(project = "acme", "deployment failed");
    drop(guard);

    let written: String = std::fs::read_dir(dir.path().join("logs"))
        .unwrap()
        .map(|entry| std::fs::read_to_string(entry.unwrap().path()).unwrap())
        .collect();
    assert!(written.contains("deployment failed"), "{written}");
    assert!(written.contains("\"project\":\"acme\""), "{written}");

    assert!(init_logging_with_config(&config).is_err());
}
