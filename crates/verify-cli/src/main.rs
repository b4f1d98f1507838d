//! mesh-verify
//!
//! Runs a verification suite against a live service mesh: deploys each case
//! into a disposable namespace, waits for DNS, sidecar configuration and
//! routing to converge, validates retry timing and tears everything down.
//! Exits 0 only when every case passed.

mod config;
mod suite;

use config::{Config, ConfigError, DnsProviderKind, LogFormat};
use std::process::ExitCode;
use std::sync::Arc;
use suite::SuiteDefaults;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use verify_core::clients::exec::{ExecProbe, ExecProxyAdmin};
use verify_core::clients::http::{HttpProxyAdmin, ReqwestProbe};
use verify_core::clients::kubectl::{KubectlCluster, KubectlRunner};
use verify_core::clients::route53::Route53Dns;
use verify_core::dns::DnsProvider;
use verify_core::orchestrator::{Clients, Orchestrator};
use verify_core::probe::ProbeRouter;
use verify_core::proxy::{AdminError, ProxyAdmin};

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::from_env();
    init_tracing(config.as_ref().map(|c| c.log_format).unwrap_or_default());

    info!("Starting mesh-verify");

    match run(config).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!(error = %e, "Verification could not run");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "mesh_verify=info,verify=info".into());
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

async fn run(config: Result<Config, ConfigError>) -> Result<u8, Box<dyn std::error::Error>> {
    let config = config?;
    let suite_path = config.resolve_suite_path(std::env::args().nth(1))?;

    info!(
        suite = %suite_path.display(),
        kube_context = ?config.kube_context,
        parallel = config.parallel,
        skip_cleanup = config.skip_cleanup,
        "Configuration loaded successfully"
    );
    if config.skip_cleanup {
        warn!("Cleanup disabled, scopes will be left in the cluster");
    }

    let cases = suite::load(
        &suite_path,
        &SuiteDefaults {
            ready_timeout: config.ready_timeout(),
        },
    )?;
    info!(cases = cases.len(), "Suite loaded");

    let clients = build_clients(&config).await?;
    let orchestrator = Orchestrator::new(clients, config.orchestrator_config());
    let report = orchestrator.run(&cases).await;

    report.log_summary();
    Ok(report.exit_code())
}

async fn build_clients(config: &Config) -> Result<Clients, AdminError> {
    let runner = KubectlRunner::new(config.kubectl.as_str())
        .with_context(config.kube_context.clone())
        .with_timeout(config.command_timeout());

    let proxy: Arc<dyn ProxyAdmin> = match &config.proxy_admin_url {
        Some(url) => {
            info!(url = %url, "Using forwarded proxy admin endpoint");
            Arc::new(HttpProxyAdmin::new(url.as_str(), config.command_timeout())?)
        }
        None => Arc::new(ExecProxyAdmin::new(
            runner.clone(),
            config.proxy_container.as_str(),
            config.proxy_admin_port,
        )),
    };

    let dns: Option<Arc<dyn DnsProvider>> = match config.dns_provider {
        DnsProviderKind::Route53 => Some(Arc::new(Route53Dns::from_env().await)),
        DnsProviderKind::None => {
            info!("No DNS provider configured, DNS checks will fail as setup errors");
            None
        }
    };

    let probe = ProbeRouter::new(
        Arc::new(ReqwestProbe::new()),
        Some(Arc::new(ExecProbe::new(runner.clone()))),
    );

    Ok(Clients {
        cluster: Arc::new(KubectlCluster::new(runner)),
        dns,
        proxy: Some(proxy),
        probe: Arc::new(probe),
    })
}
