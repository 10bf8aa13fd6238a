use std::sync::Arc;

use serde_json::json;

use super::common::{Recorder, descriptor, descriptor_jar, jar_bytes, module_factory, write_descriptor, write_file};
use crate::kernel::constants::DEFAULT_DESCRIPTOR_FILE_NAME;
use crate::kernel::error::Result;
use crate::plugin_system::artifact::{ArtifactKind, BytesPluginArtifact, PluginArtifact};
use crate::plugin_system::factory::default_plugin_factories;
use crate::plugin_system::loader::{
    BundledPluginLoader, DirectoryPluginLoader, DirectoryScanner, PluginLoader, SinglePluginLoader, create_plugin,
};
use crate::plugin_system::plugin::PluginKind;

#[tokio::test]
async fn test_bad_descriptor_becomes_unloadable_plugin() -> Result<()> {
    let dir = tempfile::tempdir()?;
    write_file(dir.path(), "good.jar", &descriptor_jar(&descriptor("test.good", &["m"])));
    write_descriptor(dir.path(), "bad.json", &json!({ "key": "test:bad" }));
    let modules = module_factory(&Arc::new(Recorder::default()));
    let loader = DirectoryPluginLoader::new(dir.path(), default_plugin_factories(DEFAULT_DESCRIPTOR_FILE_NAME));

    let plugins = loader.load_all_plugins(&modules).await?;

    assert_eq!(plugins.len(), 2);
    let bad = plugins.iter().find(|p| p.key() == "test:bad").unwrap();
    assert!(bad.is_unloadable());
    let reason = bad.unloadable_reason().unwrap();
    assert!(reason.ends_with("Key is 'test:bad'"), "reason was: {}", reason);

    let good = plugins.iter().find(|p| p.key() == "test.good").unwrap();
    assert_eq!(good.kind(), &PluginKind::Artifact);
    assert_eq!(good.module_descriptors().len(), 1);
    assert!(good.is_uninstallable());
    Ok(())
}

#[tokio::test]
async fn test_scanner_tracks_deployment_units() -> Result<()> {
    let dir = tempfile::tempdir()?;
    write_descriptor(dir.path(), "a.json", &descriptor("test.a", &[]));
    write_file(dir.path(), "b.jar", &descriptor_jar(&descriptor("test.b", &[])));
    write_file(dir.path(), ".hidden.jar", b"ignored");
    write_file(dir.path(), "notes.txt", b"ignored");
    std::fs::create_dir(dir.path().join("nested.jar"))?;

    let mut scanner = DirectoryScanner::new(dir.path());
    let delta = scanner.scan().await?;
    assert_eq!(delta.added.len(), 2);
    assert_eq!(scanner.len(), 2);

    let added = write_descriptor(dir.path(), "c.json", &descriptor("test.c", &[]));
    let delta = scanner.scan().await?;
    assert_eq!(delta.added.len(), 1);
    assert!(delta.removed.is_empty());
    assert_eq!(scanner.len(), 3);

    std::fs::remove_file(&added)?;
    let delta = scanner.scan().await?;
    assert_eq!(delta.removed.len(), 1);
    assert_eq!(scanner.len(), 2);

    assert!(scanner.scan().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_missing_directory_is_a_loading_error() {
    let dir = tempfile::tempdir().unwrap();
    let modules = module_factory(&Arc::new(Recorder::default()));
    let loader = DirectoryPluginLoader::new(
        dir.path().join("absent"),
        default_plugin_factories(DEFAULT_DESCRIPTOR_FILE_NAME),
    );

    assert!(loader.load_all_plugins(&modules).await.is_err());
}

#[tokio::test]
async fn test_directory_loader_reports_changes() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let a = write_descriptor(dir.path(), "a.json", &descriptor("test.a", &[]));
    let modules = module_factory(&Arc::new(Recorder::default()));
    let loader = DirectoryPluginLoader::new(dir.path(), default_plugin_factories(DEFAULT_DESCRIPTOR_FILE_NAME));
    assert_eq!(loader.load_all_plugins(&modules).await?.len(), 1);

    write_descriptor(dir.path(), "b.json", &descriptor("test.b", &[]));
    assert!(loader.remove_missing_plugins().await?.is_empty());
    let found = loader.load_found_plugins(&modules).await?;
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].key(), "test.b");
    assert!(loader.load_found_plugins(&modules).await?.is_empty());

    std::fs::remove_file(&a)?;
    assert_eq!(loader.remove_missing_plugins().await?, vec!["test.a"]);
    assert_eq!(loader.deployment_unit_count().await, 1);
    Ok(())
}

#[tokio::test]
async fn test_remove_plugin_deletes_owned_artifact() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = write_descriptor(dir.path(), "a.json", &descriptor("test.a", &[]));
    let modules = module_factory(&Arc::new(Recorder::default()));
    let loader = DirectoryPluginLoader::new(dir.path(), default_plugin_factories(DEFAULT_DESCRIPTOR_FILE_NAME));
    let plugins = loader.load_all_plugins(&modules).await?;

    loader.remove_plugin(&plugins[0]).await?;
    assert!(!path.exists());
    assert!(loader.remove_missing_plugins().await?.is_empty());

    // A plugin this loader never loaded is refused
    let other = tempfile::tempdir()?;
    write_descriptor(other.path(), "x.json", &descriptor("test.x", &[]));
    let foreign = DirectoryPluginLoader::new(other.path(), default_plugin_factories(DEFAULT_DESCRIPTOR_FILE_NAME))
        .load_all_plugins(&modules)
        .await?;
    assert!(loader.remove_plugin(&foreign[0]).await.is_err());
    Ok(())
}

#[tokio::test]
async fn test_bundled_plugins_cannot_be_removed() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let descriptor_bytes = serde_json::to_vec(&descriptor("test.bundled", &["m"])).unwrap();
    let zip = write_file(
        dir.path(),
        "bundled-plugins.zip",
        &jar_bytes(&[("bundled.json", &descriptor_bytes)]),
    );
    let modules = module_factory(&Arc::new(Recorder::default()));
    let loader = BundledPluginLoader::new(
        &zip,
        dir.path().join("bundled"),
        default_plugin_factories(DEFAULT_DESCRIPTOR_FILE_NAME),
    );

    let plugins = loader.load_all_plugins(&modules).await?;
    assert_eq!(plugins.len(), 1);
    assert!(plugins[0].is_bundled());
    assert!(!plugins[0].is_uninstallable());
    assert!(!loader.supports_addition());
    assert!(!loader.supports_removal());
    assert!(loader.remove_plugin(&plugins[0]).await.is_err());

    // A second load reuses the extraction
    assert_eq!(loader.load_all_plugins(&modules).await?.len(), 1);
    assert!(dir.path().join("bundled").join("bundled.json").exists());
    Ok(())
}

#[tokio::test]
async fn test_single_loader_from_resource() -> Result<()> {
    let bytes = serde_json::to_vec(&descriptor("test.host", &["m"])).unwrap();
    let modules = module_factory(&Arc::new(Recorder::default()));
    let loader = SinglePluginLoader::from_resource("host-plugin.json", bytes);

    let plugins = loader.load_all_plugins(&modules).await?;
    assert_eq!(plugins.len(), 1);
    assert_eq!(plugins[0].kind(), &PluginKind::Static);
    assert!(!plugins[0].is_uninstallable());
    assert!(loader.load_found_plugins(&modules).await.is_err());
    Ok(())
}

#[test]
fn test_unclaimed_artifact_is_unloadable() {
    let modules = module_factory(&Arc::new(Recorder::default()));
    let artifact: Arc<dyn PluginArtifact> = Arc::new(BytesPluginArtifact::new(
        "empty.jar",
        ArtifactKind::Jar,
        jar_bytes(&[("readme.txt", b"nothing here")]),
    ));

    let plugin = create_plugin(&default_plugin_factories(DEFAULT_DESCRIPTOR_FILE_NAME), artifact, &modules);

    assert_eq!(plugin.key(), "empty.jar");
    assert_eq!(
        plugin.unloadable_reason(),
        Some("No plugin factory found for plugin file empty.jar")
    );
}

#[tokio::test]
async fn test_duplicate_key_is_shadowed_until_owner_is_removed() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let a = write_descriptor(dir.path(), "a.json", &descriptor("test.k", &[]));
    let b = write_descriptor(dir.path(), "b.json", &descriptor("test.k", &[]));
    let modules = module_factory(&Arc::new(Recorder::default()));
    let loader = DirectoryPluginLoader::new(dir.path(), default_plugin_factories(DEFAULT_DESCRIPTOR_FILE_NAME));

    let plugins = loader.load_all_plugins(&modules).await?;
    assert_eq!(plugins.len(), 1);
    let owner = plugins[0].artifact().and_then(|a| a.file()).unwrap();
    assert_eq!(owner.file_name().unwrap(), "a.json");
    // The shadowed file is not retried while its key is owned
    assert!(loader.load_found_plugins(&modules).await?.is_empty());

    std::fs::remove_file(&a)?;
    assert_eq!(loader.remove_missing_plugins().await?, vec!["test.k"]);
    let found = loader.load_found_plugins(&modules).await?;
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].key(), "test.k");
    assert_eq!(found[0].artifact().and_then(|a| a.file()).unwrap().file_name().unwrap(), "b.json");

    std::fs::remove_file(&b)?;
    assert_eq!(loader.remove_missing_plugins().await?, vec!["test.k"]);
    Ok(())
}

#[tokio::test]
async fn test_removing_shadowed_file_keeps_owner() -> Result<()> {
    let dir = tempfile::tempdir()?;
    write_descriptor(dir.path(), "a.json", &descriptor("test.k", &[]));
    let b = write_descriptor(dir.path(), "b.json", &descriptor("test.k", &[]));
    let modules = module_factory(&Arc::new(Recorder::default()));
    let loader = DirectoryPluginLoader::new(dir.path(), default_plugin_factories(DEFAULT_DESCRIPTOR_FILE_NAME));
    assert_eq!(loader.load_all_plugins(&modules).await?.len(), 1);

    std::fs::remove_file(&b)?;

    assert!(loader.remove_missing_plugins().await?.is_empty());
    assert!(loader.load_found_plugins(&modules).await?.is_empty());
    Ok(())
}

#[test]
fn test_jar_entries_are_read_in_full() -> Result<()> {
    let large = vec![7u8; 64 * 1024];
    let artifact = BytesPluginArtifact::new(
        "resources.jar",
        ArtifactKind::Jar,
        jar_bytes(&[("big.bin", large.as_slice()), ("empty.txt", &b""[..])]),
    );

    assert_eq!(artifact.resource_as_bytes("big.bin")?, Some(large));
    assert_eq!(artifact.resource_as_bytes("empty.txt")?, Some(Vec::new()));
    assert_eq!(artifact.resource_as_bytes("missing.txt")?, None);
    assert!(artifact.does_resource_exist("big.bin"));
    Ok(())
}
