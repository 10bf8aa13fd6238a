use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use log::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use maera_core::plugin_system::PluginArtifactFactory;
use maera_core::{FrameworkConfig, KernelError, PluginAccessor, PluginController, PluginFramework};

/// Maera: a plugin framework host
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// Print "pong" and exit
    #[arg(long)]
    ping: bool,

    /// Framework configuration file (json, yaml or toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Plugin directory, overrides the configuration file
    #[arg(long, global = true)]
    plugin_dir: Option<PathBuf>,

    /// Disable the bundle container
    #[arg(long, global = true)]
    no_container: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the framework and run until interrupted
    Run {
        /// Shut down right after starting
        #[arg(long)]
        once: bool,
    },
    /// List loaded plugins and their state
    List,
    /// Enable plugins and persist the change
    Enable {
        #[arg(required = true)]
        keys: Vec<String>,
    },
    /// Disable a plugin and persist the change
    Disable { key: String },
    /// Copy a plugin artifact into the plugin directory and load it
    Install { path: PathBuf },
    /// Remove a plugin and its artifact
    Uninstall { key: String },
}

fn load_config(args: &CliArgs) -> Result<FrameworkConfig, KernelError> {
    let mut config = match &args.config {
        Some(path) => FrameworkConfig::load(path)?,
        None => FrameworkConfig::default(),
    };
    if let Some(dir) = &args.plugin_dir {
        config.plugin_directory = dir.clone();
    }
    if args.no_container {
        config.container.enabled = false;
    }
    Ok(config)
}

async fn execute(framework: &PluginFramework, command: Commands) -> Result<(), KernelError> {
    let plugins = framework.plugin_manager();
    match command {
        Commands::Run { once } => {
            if !once {
                info!("Running, press Ctrl-C to stop");
                tokio::signal::ctrl_c()
                    .await
                    .map_err(|e| KernelError::Other(format!("Failed to wait for Ctrl-C: {}", e)))?;
            }
        }
        Commands::List => {
            let all = plugins.plugins().await;
            if all.is_empty() {
                println!("No plugins loaded.");
            }
            for plugin in all {
                println!("{} {} [{}]", plugin.key, plugin.version, plugin.state);
                for module in plugin.modules {
                    let status = if module.enabled { "enabled" } else { "disabled" };
                    println!("  {} ({}) [{}]", module.complete_key, module.module_type, status);
                }
            }
        }
        Commands::Enable { keys } => {
            plugins.enable_plugins(&keys).await?;
            for key in keys {
                println!("Enabled {}", key);
            }
        }
        Commands::Disable { key } => {
            plugins.disable_plugin(&key).await?;
            println!("Disabled {}", key);
        }
        Commands::Install { path } => {
            let artifact = PluginArtifactFactory::new().from_path(&path)?;
            for key in plugins.install_plugins(vec![artifact]).await? {
                println!("Installed {}", key);
            }
        }
        Commands::Uninstall { key } => {
            plugins.uninstall(&key).await?;
            println!("Uninstalled {}", key);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();

    if args.ping {
        println!("pong");
        return ExitCode::SUCCESS;
    }

    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr))
        .try_init();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let framework = match PluginFramework::new(config) {
        Ok(framework) => framework,
        Err(e) => {
            eprintln!("Failed to initialize framework: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = framework.start().await {
        eprintln!("Failed to start framework: {}", e);
        return ExitCode::FAILURE;
    }

    let command = args.command.unwrap_or(Commands::Run { once: false });
    let outcome = execute(&framework, command).await;

    if let Err(e) = framework.shutdown().await {
        error!("Shutdown failed: {}", e);
    }
    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
