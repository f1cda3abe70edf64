//! Routes through real backend libraries built from the `sample-backend` crate.
#![cfg(unix)]

use router::config::{ConfigSources, DEFAULT_FILE_NAME};
use router::{ConnectError, DylibLoader, PropertyBag, RegistryBuilder, Router, RoutingDriver};
use std::env::consts::{DLL_PREFIX, DLL_SUFFIX};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, OnceLock};

const V1: &str = "proxy:jdbc:sample://h/db?dbversion=1_0";
const V2: &str = "proxy:jdbc:sample://h/db?dbversion=2_0";

/// Builds the sample backend once per test binary and returns its path.
fn sample_library() -> &'static Path {
    static LIBRARY: OnceLock<PathBuf> = OnceLock::new();
    LIBRARY.get_or_init(|| {
        let manifest = Path::new(env!("CARGO_MANIFEST_DIR")).join("../sample-backend/Cargo.toml");
        let target_dir = Path::new(env!("CARGO_TARGET_TMPDIR")).join("sample-backend");
        let status = Command::new(env!("CARGO"))
            .args(["build", "--quiet", "--offline", "--manifest-path"])
            .arg(&manifest)
            .arg("--target-dir")
            .arg(&target_dir)
            .status()
            .expect("run cargo");
        assert!(status.success(), "building sample-backend failed");
        target_dir
            .join("debug")
            .join(format!("{DLL_PREFIX}sample_backend{DLL_SUFFIX}"))
    })
}

fn artifact(version: &str) -> String {
    format!("sample/{version}/{DLL_PREFIX}sample{DLL_SUFFIX}")
}

/// Installs one copy of the library per version and routes to them.
fn setup(dir: &Path) -> RoutingDriver {
    for version in ["1_0", "2_0"] {
        let path = dir.join(artifact(version));
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::copy(sample_library(), &path).unwrap();
    }
    let config = format!(
        r#"
backends:
  sample.1_0: {}
  sample.2_0: {}
capabilities:
  - backend_type: sample
    version: "1.0"
    entry_point: sample_backend_entry
  - backend_type: sample
    version: "2.0"
    entry_point: sample_backend_entry
"#,
        artifact("1_0"),
        artifact("2_0")
    );
    fs::write(dir.join(DEFAULT_FILE_NAME), config).unwrap();

    let builder = RegistryBuilder::new(ConfigSources::new().push(dir)).capabilities(Vec::new());
    RoutingDriver::new(Router::new(builder, Arc::new(DylibLoader)))
}

#[test]
fn test_versions_load_into_separate_libraries() {
    let dir = tempfile::tempdir().unwrap();
    let driver = setup(dir.path());

    let first = driver.connect(V1, &PropertyBag::new()).unwrap().unwrap();
    let second = driver.connect(V1, &PropertyBag::new()).unwrap().unwrap();
    let other = driver.connect(V2, &PropertyBag::new()).unwrap().unwrap();

    // Both versions export the same symbol, yet each copy keeps its own counter.
    assert_eq!(first.target(), "jdbc:sample://h/db#1");
    assert_eq!(second.target(), "jdbc:sample://h/db#2");
    assert_eq!(other.target(), "jdbc:sample://h/db#1");

    let v1 = driver.try_route(V1, &PropertyBag::new()).unwrap().unwrap();
    let v2 = driver.try_route(V2, &PropertyBag::new()).unwrap().unwrap();
    assert!(!Arc::ptr_eq(&v1.backend, &v2.backend));
    assert!(v1.backend.context().describe().contains("1_0"));
    assert!(v2.backend.context().describe().contains("2_0"));

    let supplied: PropertyBag = [("refuse", "maintenance")].into_iter().collect();
    match driver.connect(V2, &supplied) {
        Err(ConnectError::Backend(e)) => {
            assert_eq!(e.to_string(), "sample backend refused: maintenance")
        }
        Err(e) => panic!("unexpected error: {e}"),
        Ok(_) => panic!("backend accepted a refused request"),
    }
}

#[test]
fn test_connections_outlive_the_driver() {
    let dir = tempfile::tempdir().unwrap();
    let driver = setup(dir.path());

    let connection = driver.connect(V1, &PropertyBag::new()).unwrap().unwrap();
    let backend = driver
        .try_route(V2, &PropertyBag::new())
        .unwrap()
        .unwrap()
        .backend
        .instance()
        .clone();
    drop(driver);

    assert_eq!(connection.backend_name(), "sample");
    assert_eq!(connection.target(), "jdbc:sample://h/db#1");
    connection.close().unwrap();

    let again = backend
        .connect("jdbc:sample://h/other", &PropertyBag::new())
        .unwrap();
    assert_eq!(again.target(), "jdbc:sample://h/other#1");
    again.close().unwrap();
}
