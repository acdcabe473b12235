use std::io::Write;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use kstate_core::{ListOptions, ListWatch, ObjectStore, Sharding, StopHandle};
use kstate_kubehub::{find_api_resource, namespaced_factory, parse_gvk_key, reflect, BuildConfig, StoreBuilder, StorePair};
use kstate_listwatch::is_all_namespaces;
use kstate_store::{AllowDenyList, ExpositionFormat, MetricsWriterList};
use tokio::signal;
use tracing::{error, info, warn};

mod families;

#[derive(Parser, Debug)]
#[command(name = "kstatectl", version, about = "Sharded list+watch of one resource into cached metrics")]
struct Cli {
    /// Namespaces to watch, comma separated (default: all)
    #[arg(long, global = true, env = "KSTATE_NAMESPACES", value_delimiter = ',')]
    namespaces: Vec<String>,

    /// Namespaces to skip; only honored when watching all namespaces
    #[arg(long = "namespaces-denylist", global = true, env = "KSTATE_NAMESPACES_DENYLIST", value_delimiter = ',')]
    namespaces_denylist: Vec<String>,

    /// Watch listed namespaces through one combined source and store
    #[arg(long = "combine-namespaces", global = true, env = "KSTATE_COMBINE_NAMESPACES", action = ArgAction::SetTrue)]
    combine_namespaces: bool,

    /// Ordinal of this replica
    #[arg(long, global = true, env = "KSTATE_SHARD", default_value_t = 0)]
    shard: u32,

    /// Number of replicas splitting the objects
    #[arg(long = "total-shards", global = true, env = "KSTATE_TOTAL_SHARDS", default_value_t = 1)]
    total_shards: u32,

    /// List with resourceVersion=0 so the apiserver may answer from its cache
    #[arg(long = "use-apiserver-cache", global = true, env = "KSTATE_USE_APISERVER_CACHE", action = ArgAction::SetTrue)]
    use_apiserver_cache: bool,

    /// Cap on listed objects (0: unlimited)
    #[arg(long = "object-limit", global = true, env = "KSTATE_OBJECT_LIMIT", default_value_t = 0)]
    object_limit: i64,

    /// Metric families to expose: exact names or regex patterns, comma separated
    #[arg(long = "metric-allowlist", global = true, env = "KSTATE_METRIC_ALLOWLIST", value_delimiter = ',')]
    metric_allowlist: Vec<String>,

    /// Metric families to hide; mutually exclusive with --metric-allowlist
    #[arg(long = "metric-denylist", global = true, env = "KSTATE_METRIC_DENYLIST", value_delimiter = ',')]
    metric_denylist: Vec<String>,

    /// Emit OpenMetrics instead of the Prometheus text format
    #[arg(long, global = true, env = "KSTATE_OPENMETRICS", action = ArgAction::SetTrue)]
    openmetrics: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List once and print the metrics
    Dump {
        /// GVK key, e.g. "v1/ConfigMap" or "apps/v1/Deployment"
        gvk: String,
    },
    /// Keep the cache in sync and print the metrics periodically
    Watch {
        /// GVK key, e.g. "v1/ConfigMap" or "apps/v1/Deployment"
        gvk: String,
        /// Seconds between expositions
        #[arg(long = "interval-secs", default_value_t = 10)]
        interval_secs: u64,
    },
}

fn init_tracing() {
    let env = std::env::var("KSTATE_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("KSTATE_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid KSTATE_METRICS_ADDR; expected host:port");
        }
    }
}

impl Cli {
    fn format(&self) -> ExpositionFormat {
        if self.openmetrics { ExpositionFormat::OpenMetrics } else { ExpositionFormat::PlainText }
    }

    fn metric_filter(&self) -> Result<AllowDenyList> {
        let filter = AllowDenyList::new(&self.metric_allowlist, &self.metric_denylist)
            .context("invalid --metric-allowlist/--metric-denylist")?;
        let patterns: Vec<_> = filter.patterns().collect();
        if !patterns.is_empty() {
            info!(allowlist = filter.is_allowlist(), patterns = ?patterns, "metric family filter");
        }
        Ok(filter)
    }

    fn build_config(&self, resource: &str, namespaced: bool) -> Result<BuildConfig> {
        let sharding = Sharding::new(self.shard, self.total_shards).context("invalid --shard/--total-shards")?;
        let namespaces = if namespaced {
            self.namespaces.clone()
        } else {
            if !is_all_namespaces(&self.namespaces) {
                warn!(resource = %resource, "cluster-scoped resource; ignoring --namespaces");
            }
            Vec::new()
        };
        Ok(BuildConfig {
            namespaces,
            denylist: self.namespaces_denylist.clone(),
            sharding,
            use_api_server_cache: self.use_apiserver_cache,
            object_limit: self.object_limit,
            resource: resource.to_string(),
            combine_namespaces: self.combine_namespaces,
        })
    }
}

/// Resolve the GVK and build the decorated sources, their stores and a sanitized writer list.
async fn build_stack(cli: &Cli, gvk_key: &str) -> Result<(MetricsWriterList, Vec<StorePair>)> {
    let gvk = parse_gvk_key(gvk_key)?;
    let client = kube::Client::try_default().await.context("building kube client")?;
    let (ar, namespaced) = find_api_resource(client.clone(), &gvk).await?;
    let cfg = cli.build_config(gvk_key, namespaced)?;
    let filter = cli.metric_filter()?;
    let generators = families::for_kind(&ar.kind);
    let (writer, pairs) = StoreBuilder::new(cfg, generators)
        .filter_families(|name| filter.is_included(name))
        .build(namespaced_factory(client, ar));
    let writers = MetricsWriterList::new(vec![writer]);
    writers.sanitize_headers(cli.format());
    Ok((writers, pairs))
}

/// Nothing reaches stdout unless the whole exposition serialized.
fn print_exposition(writers: &MetricsWriterList, format: ExpositionFormat) -> Result<()> {
    let mut buf = Vec::new();
    writers.write_all(format, &mut buf).context("serializing metrics")?;
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&buf)?;
    stdout.flush()?;
    Ok(())
}

async fn dump(cli: &Cli, gvk: &str) -> Result<()> {
    info!(gvk = %gvk, ns = ?cli.namespaces, "dump invoked");
    let (writers, pairs) = build_stack(cli, gvk).await?;
    let wait_secs = std::env::var("KSTATE_WAIT_SECS").ok().and_then(|s| s.parse::<u64>().ok()).unwrap_or(30);
    for (source, store) in &pairs {
        let list = tokio::time::timeout(Duration::from_secs(wait_secs), source.list(&ListOptions::default()))
            .await
            .with_context(|| format!("list did not finish within {wait_secs}s"))??;
        store.replace(&list.items, &list.resource_version)?;
        info!(items = list.items.len(), cached = store.len(), "listed");
    }
    print_exposition(&writers, cli.format())
}

/// Re-run the reflector until `stop` fires; each run starts with a fresh list.
async fn keep_reflecting(pair: StorePair, stop: StopHandle, resource: String) {
    let (source, store) = pair;
    while !stop.is_stopped() {
        match reflect(&*source, &*store, stop.clone()).await {
            Ok(()) => info!(resource = %resource, "reflector run ended"),
            Err(e) => warn!(resource = %resource, error = %format!("{e:#}"), "reflector run failed"),
        }
        tokio::select! {
            _ = stop.stopped() => break,
            _ = tokio::time::sleep(Duration::from_secs(1)) => {}
        }
    }
}

async fn watch(cli: &Cli, gvk: &str, interval_secs: u64) -> Result<()> {
    info!(gvk = %gvk, ns = ?cli.namespaces, interval_secs, "watch invoked");
    let (writers, pairs) = build_stack(cli, gvk).await?;
    let stop = StopHandle::new();
    let stores: Vec<_> = pairs.iter().map(|(_, s)| s.clone()).collect();
    let tasks: Vec<_> =
        pairs.into_iter().map(|pair| tokio::spawn(keep_reflecting(pair, stop.clone(), gvk.to_string()))).collect();

    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let cached: usize = stores.iter().map(|s| s.len()).sum();
                metrics::gauge!("kstate_cached_objects", cached as f64, "resource" => gvk.to_string());
                if let Err(e) = print_exposition(&writers, cli.format()) {
                    error!(error = ?e, "exposition failed");
                }
            }
            _ = signal::ctrl_c() => {
                info!("Ctrl-C received; stopping reflectors");
                break;
            }
        }
    }

    stop.stop();
    join_reflectors(tasks, gvk).await;
    Ok(())
}

/// Wait for every reflector task; returns how many panicked or were cancelled.
async fn join_reflectors(tasks: Vec<tokio::task::JoinHandle<()>>, resource: &str) -> usize {
    let mut failed = 0;
    for t in tasks {
        if let Err(e) = t.await {
            warn!(error = %e, resource = %resource, "reflector task did not finish cleanly");
            failed += 1;
        }
    }
    failed
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    match &cli.command {
        Commands::Dump { gvk } => dump(&cli, gvk).await,
        Commands::Watch { gvk, interval_secs } => watch(&cli, gvk, *interval_secs).await,
    }
}
