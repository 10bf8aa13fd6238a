//! Periodic rescans of the plugin directory.
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;

use crate::kernel::component::KernelComponent;
use crate::kernel::error::Result;
use crate::plugin_system::manager::PluginController;

/// Calls [`PluginController::scan_for_new_plugins`] every `period` until
/// stopped. A zero period disables polling.
pub struct HotDeployer {
    controller: Arc<dyn PluginController>,
    period: Duration,
    shutdown: Arc<Notify>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for HotDeployer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HotDeployer")
            .field("period", &self.period)
            .finish_non_exhaustive()
    }
}

impl HotDeployer {
    pub fn new(controller: Arc<dyn PluginController>, period: Duration) -> Self {
        Self {
            controller,
            period,
            shutdown: Arc::new(Notify::new()),
            task: Mutex::new(None),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub async fn is_running(&self) -> bool {
        self.task.lock().await.as_ref().is_some_and(|t| !t.is_finished())
    }

    pub async fn start_polling(&self) {
        if self.period.is_zero() {
            info!("Hot deployment disabled");
            return;
        }
        let mut task = self.task.lock().await;
        if task.is_some() {
            return;
        }
        let controller = self.controller.clone();
        let shutdown = self.shutdown.clone();
        let period = self.period;
        info!("Hot deployment polling every {:?}", period);
        *task = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.notified() => break,
                    _ = tokio::time::sleep(period) => {
                        match controller.scan_for_new_plugins().await {
                            Ok(0) => {}
                            Ok(found) => info!("Hot deployment picked up {} plugin(s)", found),
                            Err(e) => warn!("Hot deployment scan failed: {}", e),
                        }
                    }
                }
            }
            debug!("Hot deployment loop finished");
        }));
    }

    /// Stops polling and waits for an in-flight scan to finish.
    pub async fn stop_polling(&self) {
        let Some(handle) = self.task.lock().await.take() else {
            return;
        };
        self.shutdown.notify_one();
        if let Err(e) = handle.await {
            warn!("Hot deployment task ended abnormally: {}", e);
        }
    }
}

#[async_trait]
impl KernelComponent for HotDeployer {
    fn name(&self) -> &'static str {
        "HotDeployer"
    }

    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        self.start_polling().await;
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.stop_polling().await;
        Ok(())
    }
}
