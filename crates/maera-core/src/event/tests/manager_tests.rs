use std::sync::{Arc, Mutex};

use crate::event::manager::{DefaultEventManager, EventManager};
use crate::event::{Event, FrameworkEvent, PluginEvent};
use crate::kernel::component::KernelComponent;
use crate::kernel::error::Result;

#[tokio::test]
async fn test_sync_handlers_receive_framework_events() -> Result<()> {
    let manager = DefaultEventManager::new();
    let names = Arc::new(Mutex::new(Vec::new()));

    let names_clone = Arc::clone(&names);
    manager
        .register_sync_handler(FrameworkEvent::STARTING, move |event: &dyn Event| {
            names_clone.lock().unwrap().push(event.name());
            Ok(())
        })
        .await;

    manager.dispatch(&FrameworkEvent::Starting).await;
    manager.dispatch(&FrameworkEvent::Started).await;

    assert_eq!(*names.lock().unwrap(), vec![FrameworkEvent::STARTING]);
    Ok(())
}

#[tokio::test]
async fn test_typed_plugin_handler() -> Result<()> {
    let manager = DefaultEventManager::new();
    let keys = Arc::new(Mutex::new(Vec::new()));

    let keys_clone = Arc::clone(&keys);
    manager
        .register_sync_type_handler::<PluginEvent, _>(move |event: &PluginEvent| {
            keys_clone.lock().unwrap().push(event.subject().to_string());
            Ok(())
        })
        .await;

    manager
        .dispatch(&PluginEvent::Enabled { plugin_key: "p1".into() })
        .await;
    manager
        .dispatch(&PluginEvent::ModuleDisabled { complete_key: "p1:m".into() })
        .await;
    manager.dispatch(&FrameworkEvent::Shutdown).await;

    assert_eq!(*keys.lock().unwrap(), vec!["p1".to_string(), "p1:m".to_string()]);
    Ok(())
}

#[tokio::test]
async fn test_stop_releases_handlers() -> Result<()> {
    let manager = DefaultEventManager::new();
    manager
        .register_sync_handler(FrameworkEvent::STARTED, |_| Ok(()))
        .await;
    assert_eq!(manager.dispatcher().handler_count().await, 1);

    manager.stop().await?;
    manager.stop().await?;

    let report = manager.dispatch(&FrameworkEvent::Started).await;
    assert_eq!(report.delivered, 0);
    Ok(())
}
