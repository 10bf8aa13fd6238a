use std::sync::Arc;

use futures::future::join_all;
use serde_json::json;

use super::common::{EventLog, Harness, descriptor, module_factory, write_descriptor};
use crate::event::FrameworkEvent;
use crate::event::error::EventSystemError;
use crate::kernel::constants::DEFAULT_DESCRIPTOR_FILE_NAME;
use crate::kernel::error::{Error, Result};
use crate::plugin_system::artifact::{ArtifactKind, BytesPluginArtifact, PluginArtifact};
use crate::plugin_system::factory::default_plugin_factories;
use crate::plugin_system::installer::FilePluginInstaller;
use crate::plugin_system::loader::DirectoryPluginLoader;
use crate::plugin_system::manager::{DefaultPluginManager, PluginAccessor, PluginController, PluginLifecycle};
use crate::plugin_system::plugin::{PluginKind, PluginState};
use crate::storage::state::{MemoryPluginStateStore, PluginPersistentState, PluginStateStore};

fn descriptor_artifact(name: &str, value: &serde_json::Value) -> Arc<dyn PluginArtifact> {
    Arc::new(BytesPluginArtifact::new(
        name,
        ArtifactKind::Descriptor,
        serde_json::to_vec(value).unwrap(),
    ))
}

fn keys(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

#[tokio::test]
async fn test_init_enables_plugins_by_default() -> Result<()> {
    let h = Harness::new();
    h.add_descriptor("test.a", &descriptor("test.a", &["m1"]));

    h.manager.init().await?;

    assert!(h.manager.is_plugin_enabled("test.a").await);
    assert!(h.manager.is_plugin_module_enabled("test.a:m1").await);
    assert_eq!(h.recorder.calls(), vec!["enable:test.a:m1"]);
    Ok(())
}

#[tokio::test]
async fn test_init_twice_is_illegal_state() -> Result<()> {
    let h = Harness::new();
    h.manager.init().await?;

    let err = h.manager.init().await.unwrap_err();
    assert!(err.is_illegal_state(), "unexpected error: {}", err);
    Ok(())
}

#[tokio::test]
async fn test_operations_require_init() {
    let h = Harness::new();
    h.add_descriptor("test.a", &descriptor("test.a", &["m1"]));

    let err = h.manager.enable_plugins(&keys(&["test.a"])).await.unwrap_err();
    assert!(err.is_illegal_state());
    assert!(h.manager.scan_for_new_plugins().await.is_err());
    assert!(h.manager.shutdown().await.is_err());
}

#[tokio::test]
async fn test_transitions_are_idempotent() -> Result<()> {
    let h = Harness::new();
    h.add_descriptor("test.a", &descriptor("test.a", &["m1"]));
    let log = EventLog::attach(&h.events).await;
    h.manager.init().await?;
    log.clear();

    h.manager.enable_plugins(&keys(&["test.a"])).await?;
    assert_eq!(h.recorder.count("enable:test.a:m1"), 1);
    assert_eq!(log.count("plugin.enabled test.a"), 0);

    h.manager.disable_plugin("test.a").await?;
    h.manager.disable_plugin("test.a").await?;
    assert_eq!(h.recorder.count("disable:test.a:m1"), 1);
    assert_eq!(log.count("plugin.disabled test.a"), 1);
    assert_eq!(log.count("plugin.module_disabled test.a:m1"), 1);
    assert_eq!(h.manager.plugin_state("test.a").await, Some(PluginState::Disabled));
    Ok(())
}

#[tokio::test]
async fn test_modules_follow_declaration_order() -> Result<()> {
    let h = Harness::new();
    h.add_descriptor("test.yogi", &descriptor("test.yogi", &["yogi1", "yogi2", "yogi3"]));

    h.manager.init().await?;
    assert_eq!(
        h.recorder.calls(),
        vec![
            "enable:test.yogi:yogi1",
            "enable:test.yogi:yogi2",
            "enable:test.yogi:yogi3"
        ]
    );

    h.recorder.clear();
    h.manager.disable_plugin("test.yogi").await?;
    assert_eq!(
        h.recorder.calls(),
        vec![
            "disable:test.yogi:yogi3",
            "disable:test.yogi:yogi2",
            "disable:test.yogi:yogi1"
        ]
    );
    Ok(())
}

#[tokio::test]
async fn test_persisted_state_overrides_defaults() -> Result<()> {
    let mut state = PluginPersistentState::new();
    state.set_enabled("test.a", false, true);
    state.set_enabled("test.b", true, false);
    let h = Harness::with_store(MemoryPluginStateStore::with_state(state));

    h.add_descriptor("test.a", &descriptor("test.a", &["m"]));
    let mut b = descriptor("test.b", &["m"]);
    b["enabled-by-default"] = json!(false);
    h.add_descriptor("test.b", &b);
    let mut c = descriptor("test.c", &["m"]);
    c["enabled-by-default"] = json!(false);
    h.add_descriptor("test.c", &c);
    h.add_descriptor("test.d", &descriptor("test.d", &["m"]));

    h.manager.init().await?;

    assert!(!h.manager.is_plugin_enabled("test.a").await);
    assert!(h.manager.is_plugin_enabled("test.b").await);
    assert!(!h.manager.is_plugin_enabled("test.c").await);
    assert!(h.manager.is_plugin_enabled("test.d").await);
    Ok(())
}

#[tokio::test]
async fn test_disable_persists_only_when_asked() -> Result<()> {
    let h = Harness::new();
    h.add_descriptor("test.a", &descriptor("test.a", &["m"]));
    h.add_descriptor("test.b", &descriptor("test.b", &["m"]));
    h.manager.init().await?;

    h.manager.disable_plugin("test.a").await?;
    h.manager.disable_plugin_without_persisting("test.b").await?;

    let stored = h.store.load()?;
    assert_eq!(stored.get("test.a"), Some(false));
    assert_eq!(stored.get("test.b"), None);

    // Back to the default clears the stored override
    h.manager.enable_plugins(&keys(&["test.a"])).await?;
    assert_eq!(h.store.load()?.get("test.a"), None);
    Ok(())
}

#[tokio::test]
async fn test_disable_cascades_to_dependents() -> Result<()> {
    let h = Harness::new();
    h.add_descriptor("test.base", &descriptor("test.base", &["m"]));
    let mut mid = descriptor("test.mid", &["m"]);
    mid["dependencies"] = json!(["test.base"]);
    h.add_descriptor("test.mid", &mid);
    let mut top = descriptor("test.top", &["m"]);
    top["dependencies"] = json!(["test.mid"]);
    h.add_descriptor("test.top", &top);
    let mut loose = descriptor("test.loose", &["m"]);
    loose["dependencies"] = json!([{ "key": "test.base", "required": false }]);
    h.add_descriptor("test.loose", &loose);
    h.manager.init().await?;
    assert_eq!(h.manager.enabled_plugins().await.len(), 4);

    h.recorder.clear();
    h.manager.disable_plugin("test.base").await?;

    assert_eq!(
        h.recorder.calls(),
        vec!["disable:test.top:m", "disable:test.mid:m", "disable:test.base:m"]
    );
    assert!(h.manager.is_plugin_enabled("test.loose").await);
    assert_eq!(h.manager.dependent_plugins("test.base").await, vec!["test.mid"]);

    // Only the requested plugin is remembered as disabled
    let stored = h.store.load()?;
    assert_eq!(stored.get("test.base"), Some(false));
    assert_eq!(stored.get("test.mid"), None);
    Ok(())
}

#[tokio::test]
async fn test_enable_pulls_in_required_plugins() -> Result<()> {
    let h = Harness::new();
    let mut base = descriptor("test.base", &["m"]);
    base["enabled-by-default"] = json!(false);
    h.add_descriptor("test.base", &base);
    let mut top = descriptor("test.top", &["m"]);
    top["dependencies"] = json!([{ "key": "test.base", "version": ">=1.0" }]);
    h.add_descriptor("test.top", &top);

    h.manager.init().await?;
    // The stored state never drags a disabled dependency in
    assert!(!h.manager.is_plugin_enabled("test.base").await);
    assert!(!h.manager.is_plugin_enabled("test.top").await);

    h.manager.enable_plugins(&keys(&["test.top"])).await?;
    assert_eq!(h.recorder.calls(), vec!["enable:test.base:m", "enable:test.top:m"]);
    assert_eq!(h.store.load()?.get("test.base"), Some(true));
    Ok(())
}

#[tokio::test]
async fn test_unsatisfied_dependency_changes_nothing() -> Result<()> {
    let h = Harness::new();
    h.add_descriptor("test.a", &descriptor("test.a", &["m"]));
    let mut top = descriptor("test.top", &["m"]);
    top["dependencies"] = json!(["test.a", "test.absent"]);
    top["enabled-by-default"] = json!(false);
    h.add_descriptor("test.top", &top);
    h.manager.init().await?;
    h.manager.disable_plugin("test.a").await?;
    h.recorder.clear();

    let err = h.manager.enable_plugins(&keys(&["test.top"])).await.unwrap_err();
    assert!(matches!(err, Error::PluginSystem(_)), "unexpected error: {}", err);
    assert!(err.to_string().contains("test.absent"));
    assert!(h.recorder.calls().is_empty());
    assert!(!h.manager.is_plugin_enabled("test.a").await);
    Ok(())
}

#[tokio::test]
async fn test_failing_module_degrades_plugin() -> Result<()> {
    let h = Harness::new();
    h.add_descriptor(
        "test.bad",
        &json!({
            "key": "test.bad",
            "modules": [
                { "type": "recording", "key": "first" },
                { "type": "failing", "key": "second" }
            ]
        }),
    );
    h.add_descriptor("test.good", &descriptor("test.good", &["m"]));

    h.manager.init().await?;

    let bad = h.manager.plugin("test.bad").await.unwrap();
    assert_eq!(bad.state, PluginState::Disabled);
    match bad.kind {
        PluginKind::Unloadable { reason } => assert!(reason.contains("refusing to start"), "{}", reason),
        other => panic!("expected unloadable, got {:?}", other),
    }
    assert!(h.manager.is_plugin_enabled("test.good").await);
    // The module enabled before the failure was switched off again
    assert_eq!(h.recorder.count("enable:test.bad:first"), 1);
    assert_eq!(h.recorder.count("disable:test.bad:first"), 1);

    let err = h.manager.enable_plugins(&keys(&["test.bad"])).await.unwrap_err();
    assert!(err.to_string().contains("unloadable"));
    Ok(())
}

#[tokio::test]
async fn test_module_toggles_persist() -> Result<()> {
    let h = Harness::new();
    h.add_descriptor("test.a", &descriptor("test.a", &["m1", "m2"]));
    h.manager.init().await?;

    h.manager.disable_plugin_module("test.a:m2").await?;
    assert!(!h.manager.is_plugin_module_enabled("test.a:m2").await);
    assert_eq!(h.store.load()?.get("test.a:m2"), Some(false));
    assert_eq!(h.recorder.count("disable:test.a:m2"), 1);

    // A restart respects the module choice
    h.manager.warm_restart().await?;
    assert!(h.manager.is_plugin_module_enabled("test.a:m1").await);
    assert!(!h.manager.is_plugin_module_enabled("test.a:m2").await);

    h.manager.enable_plugin_module("test.a:m2").await?;
    assert!(h.manager.is_plugin_module_enabled("test.a:m2").await);
    assert_eq!(h.store.load()?.get("test.a:m2"), None);

    assert!(h.manager.disable_plugin_module("test.a:missing").await.is_err());
    assert!(h.manager.disable_plugin_module("no-colon").await.is_err());
    Ok(())
}

#[tokio::test]
async fn test_module_lookup_by_type() -> Result<()> {
    let h = Harness::new();
    h.add_descriptor(
        "test.a",
        &json!({
            "key": "test.a",
            "modules": [
                { "type": "recording", "key": "r1" },
                { "type": "plain", "key": "p1", "params": { "weight": 10 } },
                { "type": "plain", "key": "p2", "enabled-by-default": false }
            ]
        }),
    );
    h.manager.init().await?;

    let plain = h.manager.enabled_module_descriptors_by_type("plain").await;
    let plain_keys: Vec<String> = plain.iter().map(|m| m.complete_key()).collect();
    assert_eq!(plain_keys, vec!["test.a:p1"]);
    assert_eq!(plain[0].params.get("weight").map(String::as_str), Some("10"));

    let info = h.manager.module_descriptor("test.a:p2").await.unwrap();
    assert!(!info.enabled_by_default);
    let module_type = h
        .manager
        .with_module_descriptor("test.a:r1", |m| m.module_type().to_string())
        .await;
    assert_eq!(module_type.as_deref(), Some("recording"));
    Ok(())
}

#[tokio::test]
async fn test_install_is_all_or_nothing() -> Result<()> {
    let h = Harness::new();
    h.manager.init().await?;

    let good = descriptor_artifact("good.json", &descriptor("test.good", &["m"]));
    let bad: Arc<dyn PluginArtifact> = Arc::new(BytesPluginArtifact::new(
        "bad.json",
        ArtifactKind::Descriptor,
        b"{ not json".to_vec(),
    ));

    assert!(h.manager.install_plugins(vec![good.clone(), bad]).await.is_err());
    assert_eq!(std::fs::read_dir(h.plugin_dir())?.count(), 0);
    assert!(h.manager.plugins().await.is_empty());

    let duplicate = descriptor_artifact("again.json", &descriptor("test.good", &["m"]));
    assert!(h.manager.install_plugins(vec![good.clone(), duplicate]).await.is_err());
    assert_eq!(std::fs::read_dir(h.plugin_dir())?.count(), 0);

    let other = descriptor_artifact("other.json", &descriptor("test.other", &["m"]));
    let installed = h.manager.install_plugins(vec![good, other]).await?;
    assert_eq!(installed, vec!["test.good", "test.other"]);
    assert!(h.plugin_dir().join("good.json").exists());
    assert!(h.manager.is_plugin_enabled("test.good").await);
    assert!(h.manager.is_plugin_enabled("test.other").await);
    Ok(())
}

#[tokio::test]
async fn test_install_upgrade_replaces_plugin() -> Result<()> {
    let h = Harness::new();
    h.add_descriptor("test.a", &descriptor("test.a", &["m"]));
    let log = EventLog::attach(&h.events).await;
    h.manager.init().await?;

    let mut v2 = descriptor("test.a", &["m"]);
    v2["plugin-info"] = json!({ "version": "2.0.0" });
    h.manager
        .install_plugins(vec![descriptor_artifact("test.a-2.json", &v2)])
        .await?;

    let plugins = h.manager.plugins().await;
    assert_eq!(plugins.len(), 1);
    assert_eq!(plugins[0].version, "2.0.0");
    assert_eq!(plugins[0].state, PluginState::Enabled);
    assert!(!h.plugin_dir().join("test.a.json").exists());
    assert!(h.plugin_dir().join("test.a-2.json").exists());
    assert_eq!(log.count("plugin.installed test.a"), 1);
    assert_eq!(h.recorder.count("disable:test.a:m"), 1);
    assert_eq!(h.recorder.count("enable:test.a:m"), 2);
    Ok(())
}

#[tokio::test]
async fn test_uninstall_removes_artifact_and_state() -> Result<()> {
    let h = Harness::new();
    let path = h.add_descriptor("test.a", &descriptor("test.a", &["m1", "m2"]));
    let log = EventLog::attach(&h.events).await;
    h.manager.init().await?;
    h.manager.disable_plugin_module("test.a:m2").await?;

    h.manager.uninstall("test.a").await?;

    assert!(h.manager.plugin("test.a").await.is_none());
    assert!(!path.exists());
    assert!(h.store.load()?.is_empty());
    assert_eq!(log.count("plugin.uninstalled test.a"), 1);
    assert_eq!(h.recorder.count("disable:test.a:m1"), 1);

    let err = h.manager.uninstall("test.a").await.unwrap_err();
    assert!(err.to_string().contains("not found"));
    Ok(())
}

#[tokio::test]
async fn test_scan_tracks_added_and_removed_artifacts() -> Result<()> {
    let h = Harness::new();
    h.add_descriptor("test.a", &descriptor("test.a", &["m"]));
    let log = EventLog::attach(&h.events).await;
    h.manager.init().await?;

    assert_eq!(h.manager.scan_for_new_plugins().await?, 0);

    let added = h.add_descriptor("test.b", &descriptor("test.b", &["m"]));
    assert_eq!(h.manager.scan_for_new_plugins().await?, 1);
    assert!(h.manager.is_plugin_enabled("test.b").await);
    assert_eq!(log.count("plugin.installed test.b"), 1);

    std::fs::remove_file(added)?;
    assert_eq!(h.manager.scan_for_new_plugins().await?, 0);
    assert!(h.manager.plugin("test.b").await.is_none());
    assert_eq!(h.recorder.count("disable:test.b:m"), 1);
    assert_eq!(log.count("plugin.uninstalled test.b"), 1);
    assert!(h.manager.is_plugin_enabled("test.a").await);
    Ok(())
}

#[tokio::test]
async fn test_shutdown_disables_in_reverse_and_allows_reinit() -> Result<()> {
    let h = Harness::new();
    h.add_descriptor("test.a", &descriptor("test.a", &["m"]));
    let mut b = descriptor("test.b", &["m"]);
    b["dependencies"] = json!(["test.a"]);
    h.add_descriptor("test.b", &b);
    h.manager.init().await?;
    h.recorder.clear();

    h.manager.shutdown().await?;

    assert_eq!(h.recorder.calls(), vec!["disable:test.b:m", "disable:test.a:m"]);
    assert!(h.manager.plugins().await.is_empty());
    assert!(h.store.load()?.is_empty());

    h.manager.init().await?;
    assert_eq!(h.manager.enabled_plugins().await.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_warm_restart_cycles_enabled_plugins() -> Result<()> {
    let h = Harness::new();
    h.add_descriptor("test.a", &descriptor("test.a", &["m"]));
    h.add_descriptor("test.b", &descriptor("test.b", &["m"]));
    h.manager.init().await?;
    h.manager.disable_plugin("test.b").await?;
    h.recorder.clear();

    h.manager.warm_restart().await?;

    assert_eq!(h.recorder.calls(), vec!["disable:test.a:m", "enable:test.a:m"]);
    assert!(!h.manager.is_plugin_enabled("test.b").await);
    Ok(())
}

#[tokio::test]
async fn test_starting_veto_aborts_init() -> Result<()> {
    let h = Harness::new();
    h.add_descriptor("test.a", &descriptor("test.a", &["m"]));
    h.events
        .register_sync_handler(FrameworkEvent::STARTING, |_| {
            Err(EventSystemError::handler_failed(FrameworkEvent::STARTING, "container unavailable"))
        })
        .await;

    let err = h.manager.init().await.unwrap_err();
    assert!(matches!(err, Error::KernelLifecycleError { .. }), "unexpected error: {}", err);
    assert!(!h.manager.is_initialized().await);
    assert!(h.manager.plugins().await.is_empty());
    assert!(h.recorder.calls().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_failed_save_leaves_plugin_untouched() -> Result<()> {
    let h = Harness::new();
    h.add_descriptor("test.a", &descriptor("test.a", &["m"]));
    let log = EventLog::attach(&h.events).await;
    h.manager.init().await?;
    log.clear();
    h.store.fail_saves(true);

    let err = h.manager.disable_plugin("test.a").await.unwrap_err();

    assert!(matches!(err, Error::StorageSystem(_)), "unexpected error: {}", err);
    assert!(h.manager.is_plugin_enabled("test.a").await);
    assert_eq!(h.recorder.count("disable:test.a:m"), 0);
    assert!(log.entries().is_empty());

    h.store.fail_saves(false);
    h.manager.disable_plugin("test.a").await?;
    assert_eq!(h.store.load()?.get("test.a"), Some(false));
    assert_eq!(log.count("plugin.disabled test.a"), 1);
    Ok(())
}

#[tokio::test]
async fn test_failed_save_still_publishes_transitions() -> Result<()> {
    let h = Harness::new();
    h.add_descriptor("test.a", &descriptor("test.a", &["m"]));
    let log = EventLog::attach(&h.events).await;
    h.manager.init().await?;
    h.manager.disable_plugin("test.a").await?;
    log.clear();
    h.store.fail_saves(true);

    let err = h.manager.enable_plugins(&keys(&["test.a"])).await.unwrap_err();
    assert!(matches!(err, Error::StorageSystem(_)), "unexpected error: {}", err);
    assert!(h.manager.is_plugin_enabled("test.a").await);
    assert_eq!(log.count("plugin.enabled test.a"), 1);
    assert_eq!(h.store.load()?.get("test.a"), Some(false));

    assert!(h.manager.disable_plugin_module("test.a:m").await.is_err());
    assert!(!h.manager.is_plugin_module_enabled("test.a:m").await);
    assert_eq!(log.count("plugin.module_disabled test.a:m"), 1);
    assert_eq!(h.store.load()?.get("test.a:m"), None);

    // The in-memory state still matches the store, so a retry persists everything
    h.store.fail_saves(false);
    h.manager.enable_plugins(&keys(&["test.a"])).await?;
    h.manager.disable_plugin_module("test.a:m").await?;
    let stored = h.store.load()?;
    assert_eq!(stored.get("test.a"), None);
    assert_eq!(stored.get("test.a:m"), Some(false));
    Ok(())
}

#[tokio::test]
async fn test_uninstall_with_failed_save_still_reports_removal() -> Result<()> {
    let h = Harness::new();
    let path = h.add_descriptor("test.a", &descriptor("test.a", &["m"]));
    let log = EventLog::attach(&h.events).await;
    h.manager.init().await?;
    h.store.fail_saves(true);

    assert!(h.manager.uninstall("test.a").await.is_err());

    assert!(!path.exists());
    assert!(h.manager.plugin("test.a").await.is_none());
    assert_eq!(h.recorder.count("disable:test.a:m"), 1);
    assert_eq!(log.count("plugin.disabled test.a"), 1);
    assert_eq!(log.count("plugin.uninstalled test.a"), 1);
    Ok(())
}

#[tokio::test]
async fn test_install_rejects_names_no_scan_would_find() -> Result<()> {
    let h = Harness::new();
    h.manager.init().await?;

    for name in ["test.b.txt", "../test.b.json", "nested/test.b.json", ".test.b.json"] {
        let artifact = descriptor_artifact(name, &descriptor("test.b", &["m"]));
        let err = h.manager.install_plugins(vec![artifact]).await.unwrap_err();
        assert!(
            err.to_string().contains("Cannot install under this name"),
            "unexpected error for {}: {}",
            name,
            err
        );
    }

    assert_eq!(std::fs::read_dir(h.plugin_dir())?.count(), 0);
    assert!(!h.dir.path().join("test.b.json").exists());
    assert!(h.manager.plugin("test.b").await.is_none());
    Ok(())
}

#[tokio::test]
async fn test_install_fails_when_no_loader_picks_up_the_artifact() -> Result<()> {
    let h = Harness::new();
    let elsewhere = h.dir.path().join("elsewhere");
    std::fs::create_dir(&elsewhere)?;
    let factories = default_plugin_factories(DEFAULT_DESCRIPTOR_FILE_NAME);
    let manager = DefaultPluginManager::builder(h.store.clone(), module_factory(&h.recorder), h.events.clone())
        .loader(Arc::new(DirectoryPluginLoader::new(h.plugin_dir(), factories.clone())))
        .installer(Arc::new(FilePluginInstaller::new(&elsewhere)))
        .plugin_factories(factories)
        .build();
    manager.init().await?;

    let artifact = descriptor_artifact("test.b.json", &descriptor("test.b", &["m"]));
    let err = manager.install_plugins(vec![artifact]).await.unwrap_err();

    assert!(err.to_string().contains("not picked up"), "unexpected error: {}", err);
    assert!(!elsewhere.join("test.b.json").exists());
    assert!(manager.plugin("test.b").await.is_none());
    Ok(())
}

#[tokio::test]
async fn test_duplicate_key_survives_removal_of_either_file() -> Result<()> {
    let h = Harness::new();
    let a = write_descriptor(&h.plugin_dir(), "a.json", &descriptor("test.k", &["m"]));
    let b = write_descriptor(&h.plugin_dir(), "b.json", &descriptor("test.k", &["m"]));
    h.manager.init().await?;
    assert_eq!(h.manager.plugins().await.len(), 1);

    std::fs::remove_file(&b)?;
    assert_eq!(h.manager.scan_for_new_plugins().await?, 0);
    assert!(h.manager.is_plugin_enabled("test.k").await);

    write_descriptor(&h.plugin_dir(), "b.json", &descriptor("test.k", &["m"]));
    assert_eq!(h.manager.scan_for_new_plugins().await?, 0);

    std::fs::remove_file(&a)?;
    assert_eq!(h.manager.scan_for_new_plugins().await?, 1);
    assert!(h.manager.is_plugin_enabled("test.k").await);
    assert_eq!(h.recorder.count("enable:test.k:m"), 2);
    Ok(())
}

#[tokio::test]
async fn test_concurrent_lifecycle_calls_run_one_at_a_time() -> Result<()> {
    let h = Harness::new();
    h.add_descriptor("test.a", &descriptor("test.a", &["m"]));

    let started = join_all((0..2).map(|_| h.manager.init())).await;
    assert_eq!(started.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(started.iter().filter_map(|r| r.as_ref().err()).all(Error::is_illegal_state));
    assert_eq!(h.recorder.count("enable:test.a:m"), 1);

    let stopped = join_all((0..2).map(|_| h.manager.shutdown())).await;
    assert_eq!(stopped.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(h.recorder.count("disable:test.a:m"), 1);
    assert!(!h.manager.is_initialized().await);
    Ok(())
}
