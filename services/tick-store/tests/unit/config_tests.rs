//! Configuration loading from disk

use anyhow::Result;
use pretty_assertions::assert_eq;
use rstest::*;
use std::io::Write;
use tempfile::NamedTempFile;
use tick_store::{ConfigError, Mode, TickStoreConfig};

#[fixture]
fn config_file() -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp file");
    writeln!(
        file,
        r#"
[feed]
api_key = "kite_key"
access_token = "kite_token"
instruments = [408065, 884737]
mode = "ltp"

[store]
url = "postgres://ticks@localhost/market"
table = "nse_ticks"

[pipeline]
batch_threshold = 500
buffer_multiplier = 2
"#
    )
    .expect("write config");
    file
}

#[rstest]
fn test_load_from_file(config_file: NamedTempFile) -> Result<()> {
    let config = TickStoreConfig::from_file(config_file.path())?;
    config.validate()?;

    assert_eq!(config.feed.mode, Mode::Ltp);
    assert_eq!(config.feed.instruments, vec![408_065, 884_737]);
    assert_eq!(config.store.table, "nse_ticks");
    assert_eq!(config.pipeline.buffer_capacity(), 1000);
    assert_eq!(config.pipeline.write_timeout_secs, 30);
    Ok(())
}

#[test]
fn test_missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().expect("temp dir");
    let err = TickStoreConfig::from_file(&dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Io(_)));
}

#[rstest]
#[case::no_credentials("", "token", "tickdata", 100)]
#[case::unsafe_table("key", "token", "ticks; DROP TABLE x", 100)]
#[case::zero_threshold("key", "token", "tickdata", 0)]
#[case::oversized_buffer("key", "token", "tickdata", 10_000_000)]
fn test_validation_rejects(
    #[case] api_key: &str,
    #[case] access_token: &str,
    #[case] table: &str,
    #[case] threshold: usize,
) {
    let mut config = TickStoreConfig::default();
    config.feed.api_key = api_key.to_string();
    config.feed.access_token = access_token.to_string();
    config.feed.instruments = vec![408_065];
    config.store.table = table.to_string();
    config.pipeline.batch_threshold = threshold;

    assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
}
