use crate::config::{Config, ConfigError};

fn temp_dir() -> tempfile::TempDir {
    tempfile::tempdir().unwrap()
}

#[test]
fn test_missing_config_is_created() {
    let dir = temp_dir();
    let config = Config::load_with(dir.path()).unwrap();

    assert!(dir.path().join("config.yaml").exists());
    assert_eq!(config.search.min_similarity, 0.5);
    assert_eq!(config.base_path(), dir.path());
}

#[test]
fn test_no_resave_on_second_load() {
    let dir = temp_dir();
    let path = dir.path().join("config.yaml");
    std::fs::write(&path, "search:\n  min_similarity: 0.4\n").unwrap();

    // first load adds the missing defaults
    let config = Config::load_with(dir.path()).unwrap();
    assert_eq!(config.search.min_similarity, 0.4);
    let after = std::fs::read_to_string(&path).unwrap();
    assert!(after.contains("candidate_limit"));

    let _again = Config::load_with(dir.path()).unwrap();
    let after2 = std::fs::read_to_string(&path).unwrap();
    assert_eq!(after, after2, "second load should not trigger another resave");
}

#[test]
fn test_secrets_in_file_are_kept() {
    let dir = temp_dir();
    std::fs::write(
        dir.path().join("config.yaml"),
        "embedding:\n  api_token: file-token\nindex:\n  api_key: file-key\n",
    )
    .unwrap();

    let config = Config::load_with(dir.path()).unwrap();
    assert_eq!(config.embedding.api_token.as_deref(), Some("file-token"));
    assert_eq!(config.index.api_key.as_deref(), Some("file-key"));
}

#[test]
fn test_invalid_values_are_rejected() {
    let dir = temp_dir();
    std::fs::write(
        dir.path().join("config.yaml"),
        "search:\n  keyword_weight: 3.0\n",
    )
    .unwrap();

    let result = Config::load_with(dir.path());
    assert!(matches!(result, Err(ConfigError::Invalid(_))));
}

#[test]
fn test_malformed_yaml_is_an_error() {
    let dir = temp_dir();
    std::fs::write(dir.path().join("config.yaml"), "search: [not, a, map").unwrap();

    let result = Config::load_with(dir.path());
    assert!(matches!(result, Err(ConfigError::Malformed(_))));
}
