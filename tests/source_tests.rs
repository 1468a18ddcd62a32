use std::io::Write;

use exclusive_dispatch::config::{ExclusiveSourceConfig, MissingSourcePolicy};
use exclusive_dispatch::error::SchedulerError;
use exclusive_dispatch::source::{load_collection, load_exclusive_set};
use tempfile::{NamedTempFile, TempDir};

#[tokio::test]
async fn test_load_exclusive_set_from_file() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "# tests that must run alone").unwrap();
    writeln!(file, "tests/test_db.py::test_migrations").unwrap();
    writeln!(file).unwrap();
    writeln!(file, "   tests/test_net.py::test_port_bind   ").unwrap();

    let config = ExclusiveSourceConfig {
        path: file.path().to_path_buf(),
        missing: MissingSourcePolicy::Fail,
    };
    let set = load_exclusive_set(&config).await.unwrap();

    assert_eq!(
        set.iter().collect::<Vec<_>>(),
        vec![
            "tests/test_db.py::test_migrations",
            "tests/test_net.py::test_port_bind"
        ]
    );
}

#[tokio::test]
async fn test_missing_exclusive_source_fails() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("exclusive_tests.txt");
    let config = ExclusiveSourceConfig {
        path: path.clone(),
        missing: MissingSourcePolicy::Fail,
    };

    match load_exclusive_set(&config).await {
        Err(SchedulerError::MissingExclusiveSource(reported)) => assert_eq!(reported, path),
        other => panic!("expected missing source, got {:?}", other.map(|s| s.len())),
    }
}

#[tokio::test]
async fn test_missing_exclusive_source_allowed() {
    let dir = TempDir::new().unwrap();
    let config = ExclusiveSourceConfig {
        path: dir.path().join("absent.txt"),
        missing: MissingSourcePolicy::Empty,
    };
    let set = load_exclusive_set(&config).await.unwrap();
    assert!(set.is_empty());
}

#[tokio::test]
async fn test_load_collection_keeps_order() {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "b.py::t1\na.py::t1\n\n# skipped\na.py::t2\n").unwrap();

    let items = load_collection(file.path()).await.unwrap();
    assert_eq!(items, vec!["b.py::t1", "a.py::t1", "a.py::t2"]);
}

#[tokio::test]
async fn test_load_collection_missing_file_is_io_error() {
    let dir = TempDir::new().unwrap();
    let err = load_collection(&dir.path().join("nope.txt"))
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::Io(_)));
}
