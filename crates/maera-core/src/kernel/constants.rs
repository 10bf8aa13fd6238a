/// Application name
pub const APP_NAME: &str = "Maera";

/// Application version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Descriptor file looked up inside jar artifacts (and the default name for bare descriptors)
pub const DEFAULT_DESCRIPTOR_FILE_NAME: &str = "maera-plugin.json";

/// Default plugins directory
pub const DEFAULT_PLUGINS_DIR: &str = "plugins";

/// Cache directory created inside the plugin directory (dot-prefixed so scans skip it)
pub const CACHE_DIR_NAME: &str = ".maera-cache";

/// Highest descriptor `plugins-version` understood by this build
pub const MAX_PLUGINS_VERSION: u32 = 2;

/// Default hot deploy poll period in seconds (0 disables polling)
pub const DEFAULT_HOT_DEPLOY_POLL_SECS: u64 = 0;

/// Default wait for the bundle framework to finish starting
pub const DEFAULT_CONTAINER_START_TIMEOUT_SECS: u64 = 60;

/// Default wait for the bundle framework to shut down
pub const DEFAULT_CONTAINER_STOP_TIMEOUT_SECS: u64 = 5;

/// Default wait for a package refresh to complete
pub const DEFAULT_REFRESH_TIMEOUT_SECS: u64 = 10;

/// Version of the host runtime used to gate the runtime package list
pub const DEFAULT_RUNTIME_VERSION: &str = "1.0.0";
