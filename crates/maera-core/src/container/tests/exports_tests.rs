use std::collections::BTreeMap;
use std::sync::Arc;

use semver::Version;

use super::common::bundle_jar;
use crate::container::cache::BundleCache;
use crate::container::error::ContainerError;
use crate::container::exports::{
    DEFAULT_RUNTIME_PACKAGES, PackageFilter, compute_exports, export_string, runtime_packages,
};
use crate::container::framework::{FrameworkFactories, bootstrap_factory_name};
use crate::container::manifest::PackageExport;
use crate::container::scanner::{ManifestPackageSource, PackageSource, StaticPackageSource};
use crate::storage::config::PackageScannerConfig;

fn names(exports: &[PackageExport]) -> Vec<&str> {
    exports.iter().map(|e| e.name.as_str()).collect()
}

#[test]
fn test_runtime_packages_are_gated_by_version() {
    let old = runtime_packages(DEFAULT_RUNTIME_PACKAGES, &Version::new(0, 9, 0)).unwrap();
    assert_eq!(names(&old), vec!["maera.runtime", "maera.runtime.io", "maera.runtime.collections"]);

    let current = runtime_packages(DEFAULT_RUNTIME_PACKAGES, &Version::new(1, 1, 0)).unwrap();
    assert!(names(&current).contains(&"maera.runtime.net"));
    assert!(!names(&current).contains(&"maera.runtime.foreign"));
    assert!(current.iter().all(|e| e.version.as_deref() == Some("1.1.0")));

    let err = runtime_packages("[not a requirement]\nfoo", &Version::new(1, 0, 0)).unwrap_err();
    assert!(matches!(err, ContainerError::InvalidRuntimePackages(_)));
}

#[test]
fn test_scanned_packages_are_filtered_and_versioned() {
    let config = PackageScannerConfig {
        includes: vec!["com.acme.*".to_string(), "javax.*".to_string()],
        excludes: vec!["com.acme.internal*".to_string()],
        package_versions: BTreeMap::from([("com.acme.legacy".to_string(), "0.9".to_string())]),
        ..PackageScannerConfig::default()
    };
    let filter = PackageFilter::new(&config).unwrap();
    let source: Arc<dyn PackageSource> = Arc::new(StaticPackageSource::new(vec![
        PackageExport::new("com.acme.api", Some("1.2".to_string())),
        PackageExport::new("com.acme.internal.impl", Some("1.2".to_string())),
        PackageExport::new("com.acme.legacy", None),
        PackageExport::new("org.other", Some("3.0".to_string())),
        PackageExport::new("javax.xml.parsers", Some("1.4".to_string())),
    ]));

    let exports = compute_exports(&filter, Vec::new(), &[source], &["host.api".to_string()]).unwrap();

    let exported = export_string(&exports);
    assert!(exported.contains("com.acme.api;version=1.2"));
    assert!(exported.contains("com.acme.legacy;version=0.9"));
    assert!(exported.contains("javax.xml.parsers;version=1.4"));
    assert!(exported.contains("maera.plugin;version=1.0.0"));
    assert!(!exported.contains("com.acme.internal"));
    assert!(!exported.contains("org.other"));
    assert!(names(&exports).contains(&"host.api"));

    let mut sorted = names(&exports);
    sorted.sort();
    assert_eq!(names(&exports), sorted);
}

#[test]
fn test_guarded_package_without_version_fails() {
    let filter = PackageFilter::new(&PackageScannerConfig::default()).unwrap();
    let source: Arc<dyn PackageSource> = Arc::new(StaticPackageSource::new(vec![PackageExport::new(
        "javax.xml.parsers",
        None,
    )]));

    let err = compute_exports(&filter, Vec::new(), &[source.clone()], &[]).unwrap_err();
    assert!(matches!(err, ContainerError::UnversionedOverride { ref package } if package == "javax.xml.parsers"));

    // An override supplies the version
    let config = PackageScannerConfig {
        package_versions: BTreeMap::from([("javax.xml.*".to_string(), "1.0".to_string())]),
        ..PackageScannerConfig::default()
    };
    let exports = compute_exports(&PackageFilter::new(&config).unwrap(), Vec::new(), &[source], &[]).unwrap();
    assert!(export_string(&exports).contains("javax.xml.parsers;version=1.0"));
}

#[test]
fn test_invalid_pattern_is_reported() {
    let config = PackageScannerConfig {
        includes: vec!["com.[acme".to_string()],
        ..PackageScannerConfig::default()
    };
    assert!(matches!(
        PackageFilter::new(&config).unwrap_err(),
        ContainerError::InvalidPattern { .. }
    ));
}

#[test]
fn test_manifest_source_reads_jar_exports() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("lib.jar"),
        bundle_jar(&[("Bundle-SymbolicName", "lib"), ("Export-Package", "com.lib;version=2.0,com.lib.util")]),
    )
    .unwrap();
    std::fs::write(dir.path().join("broken.jar"), b"not a zip").unwrap();

    let packages = ManifestPackageSource::new(dir.path()).packages().unwrap();

    assert_eq!(
        packages,
        vec![
            PackageExport::new("com.lib", Some("2.0".to_string())),
            PackageExport::new("com.lib.util", None),
        ]
    );
    assert!(ManifestPackageSource::new(dir.path().join("absent")).packages().unwrap().is_empty());
}

#[test]
fn test_cache_is_cleared_when_exports_change() {
    let dir = tempfile::tempdir().unwrap();
    let cache = BundleCache::new(dir.path().join("bundles"));

    assert!(cache.validate("a;version=1").unwrap());
    std::fs::write(cache.directory().join("bundle-1.jar"), b"cached").unwrap();
    assert!(!cache.validate("a;version=1").unwrap());
    assert!(cache.directory().join("bundle-1.jar").exists());

    assert!(cache.validate("a;version=2").unwrap());
    assert!(!cache.directory().join("bundle-1.jar").exists());
    assert_eq!(cache.stored_key(), Some(BundleCache::key_for("a;version=2")));
}

#[test]
fn test_bootstrap_resource_names_factory() {
    assert_eq!(
        bootstrap_factory_name("# comment\n\n  maera.embedded  \nignored").unwrap(),
        "maera.embedded"
    );
    assert!(matches!(
        bootstrap_factory_name("# only comments\n").unwrap_err(),
        ContainerError::InvalidBootstrap(_)
    ));

    let factories = FrameworkFactories::with_defaults();
    assert_eq!(factories.from_bootstrap("maera.embedded").unwrap().name(), "maera.embedded");
    assert!(matches!(
        factories.from_bootstrap("org.unknown").unwrap_err(),
        ContainerError::FactoryNotFound(_)
    ));
}
