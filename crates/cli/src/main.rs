use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tfo_apply::Reconciler;
use tfo_kubehub::{KubeCluster, KubeJobLister};
use tfo_poll::{HttpPollClient, PollConfig};
use tfo_queue::WorkQueue;
use tfo_worker::{run_job_source, Worker, WorkerConfig, RELIST_INTERVAL};
use tokio::signal;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "tfo-remote-controller", version, about = "Poll terraform-operator jobs and apply their outputs to this cluster")]
struct Cli {
    /// Poll API scheme
    #[arg(long, env = "TFO_API_PROTOCOL", default_value = "http")]
    api_protocol: String,

    #[arg(long, env = "TFO_API_HOST")]
    api_host: String,

    #[arg(long, env = "TFO_API_PORT")]
    api_port: u16,

    #[arg(long, env = "TFO_API_LOGIN_USER")]
    api_user: String,

    #[arg(long, env = "TFO_API_LOGIN_PASSWORD", hide_env_values = true)]
    api_password: String,

    /// Only seed jobs from this namespace (default: all namespaces)
    #[arg(long, env = "TFO_NAMESPACE")]
    namespace: Option<String>,

    /// Re-list Terraform resources every N seconds; 0 lists once at startup
    #[arg(long, env = "TFO_RELIST_SECS", default_value_t = RELIST_INTERVAL.as_secs())]
    relist_secs: u64,

    /// Sleep between checks of an empty queue
    #[arg(long, env = "TFO_IDLE_SECS", default_value_t = 3)]
    idle_secs: u64,

    /// Delay before a pending or failed job is polled again
    #[arg(long, env = "TFO_REQUEUE_SECS", default_value_t = 30)]
    requeue_secs: u64,

    #[arg(long, env = "TFO_HTTP_TIMEOUT_SECS", default_value_t = 30)]
    http_timeout_secs: u64,
}

impl Cli {
    fn worker_config(&self) -> WorkerConfig {
        WorkerConfig { idle_interval: Duration::from_secs(self.idle_secs), requeue_delay: Duration::from_secs(self.requeue_secs) }
    }

    fn poll_config(&self) -> Result<PollConfig> {
        let base = tfo_poll::base_url(&self.api_protocol, &self.api_host, self.api_port).context("building poll api url")?;
        Ok(PollConfig::new(base, self.api_user.clone(), self.api_password.clone()).with_timeout(Duration::from_secs(self.http_timeout_secs)))
    }

    fn relist(&self) -> Option<Duration> {
        (self.relist_secs > 0).then(|| Duration::from_secs(self.relist_secs))
    }
}

fn init_tracing() {
    let env = std::env::var("TFO_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("TFO_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid TFO_METRICS_ADDR; expected host:port");
        }
    }
}

async fn build(cli: &Cli) -> Result<(Worker, KubeJobLister)> {
    let cluster = KubeCluster::try_default().await?;
    let lister = KubeJobLister::new(cluster.client(), cli.namespace.clone());
    let poll = HttpPollClient::new(cli.poll_config()?).context("building poll client")?;
    let worker = Worker::new(WorkQueue::new(), Arc::new(poll), Reconciler::new(Arc::new(cluster)), cli.worker_config());
    Ok((worker, lister))
}

#[tokio::main]
async fn main() {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    let (worker, lister) = match build(&cli).await {
        Ok(parts) => parts,
        Err(e) => {
            error!(error = ?e, "startup failed");
            std::process::exit(1);
        }
    };
    tokio::spawn(run_job_source(worker.queue().clone(), Arc::new(lister), cli.relist()));

    tokio::select! {
        _ = worker.run() => warn!("queue worker returned"),
        _ = signal::ctrl_c() => info!("interrupt received; stopping"),
    }
    // The worker is meant to run forever; any way out of it is an abnormal stop.
    std::process::exit(1);
}
