//! Configuration Tests
//!
//! Members built from TOML files.

use crate::*;
use std::io::Write;
use tempfile::NamedTempFile;

fn config_file(text: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(text.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_member_built_from_file() {
    init_tracing();
    let file = config_file(
        r#"
        [clustering]
        mode = "replicated"

        [locking]
        acquisition_timeout_ms = 500

        [transaction]
        one_phase_commit = true
        "#,
    );
    let cluster = LocalCluster::new();
    let grids: Vec<Grid> = ["a", "b"]
        .into_iter()
        .map(|name| {
            Grid::builder()
                .config_file(file.path())
                .unwrap()
                .transport(cluster.transport(name))
                .build()
                .unwrap()
        })
        .collect();
    cluster.install_view(&["a", "b"], false);

    let config = grids[0].node().config();
    assert_eq!(config.clustering.mode, CacheMode::Replicated);
    assert_eq!(config.locking.acquisition_timeout_ms, 500);
    assert!(config.transaction.one_phase_commit);

    let tx = grids[1].begin().unwrap();
    tx.put("k", 1i64).unwrap();
    tx.commit().unwrap();
    assert_eq!(grids[0].get("k").unwrap(), int(1));
}

#[test]
fn test_invalid_file_is_rejected() {
    let file = config_file(
        r#"
        [clustering]
        mode = "distributed"
        num_owners = 0
        "#,
    );
    let err = Grid::builder().config_file(file.path()).unwrap_err();
    assert!(matches!(err, Error::Config(_)), "unexpected error {}", err);
}

#[test]
fn test_missing_file_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let err = Grid::builder()
        .config_file(dir.path().join("absent.toml"))
        .unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[test]
fn test_write_skew_check_implies_versioning() {
    let file = config_file(
        r#"
        [transaction]
        write_skew_check = true
        one_phase_commit = true
        "#,
    );
    let grid = Grid::builder()
        .config_file(file.path())
        .unwrap()
        .build()
        .unwrap();

    let config = grid.node().config();
    assert!(config.versioning.enabled);
    assert!(!config.transaction.one_phase_commit);
    assert!(grid.node().stages().contains(&"versioning"));
}

#[test]
fn test_transactions_can_be_disabled() {
    let file = config_file(
        r#"
        [transaction]
        enabled = false
        "#,
    );
    let grid = Grid::builder()
        .config_file(file.path())
        .unwrap()
        .build()
        .unwrap();

    assert!(matches!(grid.begin(), Err(Error::IllegalState(_))));
    grid.put("k", 1i64).unwrap();
    assert_eq!(grid.get("k").unwrap(), int(1));
}
