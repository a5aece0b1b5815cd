//! Loading the shipped `config/sheetguard.yaml` and building a core from it

mod common;

use common::*;
use sheetguard_core::config::ConfigManager;
use sheetguard_core::constants::environments;
use sheetguard_core::remote::InMemoryDocumentService;
use sheetguard_core::{MutationCore, SubmitOptions};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

fn shipped_config_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config")
}

#[test]
fn every_environment_of_the_shipped_config_validates() {
    for environment in environments::ALL {
        let manager =
            ConfigManager::load_from_directory_with_env(Some(shipped_config_dir()), environment)
                .unwrap_or_else(|e| panic!("{environment}: {e}"));
        assert_eq!(manager.environment(), environment);
        assert_eq!(manager.config().execution.environment, environment);
    }
}

#[test]
fn environment_sections_override_the_base() {
    let test = ConfigManager::load_from_directory_with_env(Some(shipped_config_dir()), "test")
        .unwrap();
    assert!(test.config().is_test_environment());
    assert!(!test.config().rate_limiter.enabled);
    assert_eq!(test.config().retry.base_delay_ms, 10);

    let production =
        ConfigManager::load_from_directory_with_env(Some(shipped_config_dir()), "production")
            .unwrap();
    let config = production.config();
    assert!(config.is_production_environment());
    assert!(config.rate_limiter.enabled);
    assert_eq!(config.policy.default_max_cells_affected, 20_000);
    assert_eq!(config.policy.absolute_max_cells_affected, 1_000_000);
    assert_eq!(
        config
            .circuit_breakers
            .config_for_component("read_values")
            .failure_threshold,
        8
    );
}

#[test]
fn inconsistent_configuration_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(
        temp_dir.path().join("sheetguard.yaml"),
        "retry:\n  jitter_factor: 0.5\n",
    )
    .unwrap();

    let err = ConfigManager::load_from_directory_with_env(
        Some(temp_dir.path().to_path_buf()),
        "development",
    )
    .unwrap_err();
    assert!(err.to_string().contains("jitter_factor"));
}

#[tokio::test]
async fn core_builds_from_loaded_configuration() {
    init_test_logging();
    let manager =
        ConfigManager::load_from_directory_with_env(Some(shipped_config_dir()), "test").unwrap();
    let remote = Arc::new(InMemoryDocumentService::new());
    let core = MutationCore::from_config(remote.clone(), &manager).unwrap();

    assert_eq!(core.config(), manager.config());

    let summary = core
        .submit(vec![format_cells("Sheet1!A1:C3")], SubmitOptions::default())
        .await
        .unwrap();
    assert_eq!(summary.cells_affected, 9);
    assert_eq!(remote.batch_update_calls(), 1);
    core.shutdown();
}
