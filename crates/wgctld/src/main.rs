mod cli;
mod error;

use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use wgctl_config::{Config, ConfigError};
use wgctl_core::{
    BackendRegistry, ControllerBackend, JsonFileStore, LocalBackend, MikrotikBackend,
    Orchestrator, PfsenseBackend, RestBackendConfig,
};

use crate::cli::Args;
use crate::error::DaemonError;

#[tokio::main]
async fn main() {
    let args = Args::parse();

    init_tracing(args.verbose, args.json);

    if let Err(err) = run(args).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

fn init_tracing(verbosity: u8, json: bool) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(args: Args) -> Result<(), DaemonError> {
    let path = args.config.clone().unwrap_or_else(wgctl_config::config_path);
    let config = wgctl_config::load_config(Some(&path))
        .map_err(|source| DaemonError::Config {
            path: path.clone(),
            source,
        })?;

    let registry = build_registry(&config, &path)?;
    info!(backends = registry.len(), default = %registry.default_id(), "backends ready");

    let store_path = config.store_path();
    let orchestrator = Orchestrator::new(registry, Arc::new(JsonFileStore::new(store_path.clone())));
    orchestrator
        .hydrate()
        .await
        .map_err(|source| DaemonError::Store {
            path: store_path,
            source,
        })?;

    let report = orchestrator.reconcile().await;
    if report.failures > 0 || report.conflicts > 0 {
        warn!(%report, "startup reconciliation finished with failures or conflicts");
    } else {
        info!(%report, "startup reconciliation finished");
    }

    if args.once {
        return Ok(());
    }

    info!("running, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await.map_err(DaemonError::Signal)?;
    info!("shutting down");
    Ok(())
}

/// The local backend plus one backend per configured appliance.
fn build_registry(config: &Config, path: &Path) -> Result<BackendRegistry, DaemonError> {
    let config_error = |source: ConfigError| DaemonError::Config {
        path: path.to_path_buf(),
        source,
    };

    let local = LocalBackend::system(config.local_backend_config()).map_err(|source| {
        DaemonError::Backend {
            backend: "local".to_owned(),
            source,
        }
    })?;
    let mut registry = BackendRegistry::new(config.default_backend()).with(Arc::new(local));

    let mikrotik = config.mikrotik_backends().map_err(config_error)?;
    let pfsense = config.pfsense_backends().map_err(config_error)?;

    for cfg in mikrotik {
        registry.register(remote(cfg, MikrotikBackend::new)?);
    }
    for cfg in pfsense {
        registry.register(remote(cfg, PfsenseBackend::new)?);
    }
    Ok(registry)
}

fn remote<B, F>(cfg: RestBackendConfig, build: F) -> Result<Arc<dyn ControllerBackend>, DaemonError>
where
    B: ControllerBackend + 'static,
    F: FnOnce(RestBackendConfig) -> Result<B, wgctl_core::CoreError>,
{
    let backend = cfg.id.to_string();
    let built = build(cfg).map_err(|source| DaemonError::Backend { backend, source })?;
    Ok(Arc::new(built))
}
