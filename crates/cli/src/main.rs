use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use spares_core::{LabelKeys, RetentionConfig, RetentionEngine, DEFAULT_ANNOTATION_PREFIX};
use spares_kubehub::{Cluster, ResourceKind};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "sparesctl", version, about = "Prune old deployed versions, keeping a few spares per app")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Kubernetes namespace (default: current context)
    #[arg(long = "ns", global = true, env = "SPARES_NAMESPACE")]
    namespace: Option<String>,

    /// Prefix of the `<prefix>/spares` annotation
    #[arg(long = "annotation-prefix", global = true, env = "SPARES_ANNOTATION_PREFIX", default_value = DEFAULT_ANNOTATION_PREFIX)]
    annotation_prefix: String,

    /// Log per-app retention details at info level
    #[arg(short = 'v', long = "verbose", global = true, action = ArgAction::SetTrue)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Args, Debug)]
struct PolicyArgs {
    /// Git ref being rolled out; its spares annotation overrides the default.
    /// Detected from the newest object when omitted; pass "" to disable overrides.
    #[arg(long = "git-ref", env = "SPARES_GIT_REF")]
    git_ref: Option<String>,

    /// Spare versions kept per app besides the live one
    #[arg(long = "spares", env = "SPARES_DEFAULT_RESERVE", default_value_t = 1)]
    spares: usize,

    /// Resource kinds to process (repeatable or comma separated; default: all)
    #[arg(long = "kind", value_delimiter = ',')]
    kinds: Vec<ResourceKind>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Delete objects beyond each app's retention window
    Cleanup {
        #[command(flatten)]
        policy: PolicyArgs,
        /// Log deletions without performing them
        #[arg(long = "dry-run", action = ArgAction::SetTrue)]
        dry_run: bool,
    },
    /// Show what cleanup would keep and delete
    Plan {
        #[command(flatten)]
        policy: PolicyArgs,
    },
    /// List deployed git refs, newest first
    Refs,
    /// Print the git ref of the most recently created object
    LatestRef,
    /// Delete every supported object deployed at a git ref
    DeleteRef {
        git_ref: String,
        #[arg(long = "dry-run", action = ArgAction::SetTrue)]
        dry_run: bool,
    },
}

fn init_tracing() {
    let env = std::env::var("SPARES_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("SPARES_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid SPARES_METRICS_ADDR; expected host:port");
        }
    }
}

fn selected_kinds(kinds: &[ResourceKind]) -> Vec<ResourceKind> {
    if kinds.is_empty() {
        return ResourceKind::ALL.to_vec();
    }
    // keep processing order stable regardless of flag order
    let mut out = kinds.to_vec();
    out.sort();
    out.dedup();
    out
}

async fn build_engine(cluster: &Cluster, policy: &PolicyArgs, verbose: bool) -> Result<RetentionEngine> {
    let current_git_ref = match &policy.git_ref {
        Some(r) => r.clone(),
        None => {
            let detected = cluster.latest_git_ref().await.context("detecting current git ref")?.unwrap_or_default();
            info!(git_ref = %detected, "detected current git ref");
            detected
        }
    };
    Ok(RetentionEngine::new(RetentionConfig { default_reserve: policy.spares, current_git_ref, verbose }))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let keys = LabelKeys::with_prefix(&cli.annotation_prefix);
    let cluster = Cluster::connect(cli.namespace.as_deref(), keys).await?;
    info!(ns = %cluster.namespace(), "connected");

    match cli.command {
        Commands::Cleanup { policy, dry_run } => {
            let engine = build_engine(&cluster, &policy, cli.verbose).await?;
            let kinds = selected_kinds(&policy.kinds);
            let outcomes = cluster.cleanup_all(&engine, &kinds, dry_run).await;
            let failed = outcomes.iter().filter(|(_, r)| r.is_err()).count();
            match cli.output {
                Output::Human => {
                    for (kind, res) in &outcomes {
                        match res {
                            Ok(report) if report.deleted.is_empty() => println!("{:<13} ok (nothing to delete)", kind),
                            Ok(report) => {
                                let verb = if dry_run { "would delete" } else { "deleted" };
                                println!("{:<13} {} {}: {}", kind, verb, report.deleted.len(), report.deleted.join(", "));
                            }
                            Err(e) => println!("{:<13} FAILED: {}", kind, error_chain(e)),
                        }
                    }
                }
                Output::Json => {
                    #[derive(serde::Serialize)]
                    struct Row<'a> { kind: ResourceKind, dry_run: bool, deleted: Option<&'a [String]>, error: Option<String> }
                    let rows: Vec<_> = outcomes
                        .iter()
                        .map(|(kind, res)| match res {
                            Ok(r) => Row { kind: *kind, dry_run, deleted: Some(r.deleted.as_slice()), error: None },
                            Err(e) => Row { kind: *kind, dry_run, deleted: None, error: Some(error_chain(e)) },
                        })
                        .collect();
                    println!("{}", serde_json::to_string_pretty(&rows)?);
                }
            }
            if failed > 0 {
                return Err(anyhow!("cleanup failed for {} of {} kinds", failed, outcomes.len()));
            }
        }
        Commands::Plan { policy } => {
            let engine = build_engine(&cluster, &policy, cli.verbose).await?;
            let mut plans = Vec::new();
            for kind in selected_kinds(&policy.kinds) {
                plans.push(cluster.plan_kind(&engine, kind).await?);
            }
            match cli.output {
                Output::Human => {
                    println!("git ref: {:?}  default spares: {}", engine.config().current_git_ref, engine.config().default_reserve);
                    for plan in &plans {
                        for app in &plan.apps {
                            println!("{} {} (keep {} of {})", plan.kind, app.application, app.total_allowed, app.keep.len() + app.delete.len());
                            for r in &app.keep {
                                println!("  keep   {:<40} {:<12} {}", r.identity, r.version, render_age(r.creation_timestamp));
                            }
                            for r in &app.delete {
                                println!("  delete {:<40} {:<12} {}", r.identity, r.version, render_age(r.creation_timestamp));
                            }
                        }
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&plans)?),
            }
        }
        Commands::Refs => {
            let refs = cluster.git_refs().await?;
            match cli.output {
                Output::Human => {
                    println!("REF          OBJECT                                   AGE");
                    for r in &refs {
                        println!("{:<12} {:<40} {}", r.version, r.identity, render_age(r.creation_timestamp));
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&refs)?),
            }
        }
        Commands::LatestRef => match cluster.latest_git_ref().await? {
            Some(r) => match cli.output {
                Output::Human => println!("{}", r),
                Output::Json => println!("{}", serde_json::json!({ "git_ref": r })),
            },
            None => {
                warn!(ns = %cluster.namespace(), "no versioned objects found");
                return Err(anyhow!("no versioned objects in namespace {}", cluster.namespace()));
            }
        },
        Commands::DeleteRef { git_ref, dry_run } => {
            let deleted = cluster.delete_git_ref(&git_ref, dry_run).await.map_err(|e| {
                error!(error = ?e, git_ref = %git_ref, "delete-ref failed");
                e
            })?;
            match cli.output {
                Output::Human => {
                    if deleted.is_empty() {
                        println!("no objects at {}", git_ref);
                    }
                    for (kind, name) in &deleted {
                        println!("{} {}/{}", if dry_run { "would delete" } else { "deleted" }, kind, name);
                    }
                }
                Output::Json => {
                    let rows: Vec<_> = deleted.iter().map(|(k, n)| serde_json::json!({ "kind": k, "name": n })).collect();
                    println!("{}", serde_json::to_string_pretty(&rows)?);
                }
            }
        }
    }

    Ok(())
}

/// Render an error with its source chain on one line.
fn error_chain(e: &(dyn std::error::Error + 'static)) -> String {
    let mut s = e.to_string();
    let mut cur = e.source();
    while let Some(src) = cur {
        s.push_str(": ");
        s.push_str(&src.to_string());
        cur = src.source();
    }
    s
}

fn render_age(created: DateTime<Utc>) -> String {
    if created == DateTime::<Utc>::MIN_UTC { return "-".to_string(); }
    let mut secs = (Utc::now() - created).num_seconds().max(0) as u64;
    let days = secs / 86_400; secs %= 86_400;
    let hours = secs / 3600; secs %= 3600;
    let mins = secs / 60; secs %= 60;
    if days > 0 { format!("{}d{}h", days, hours) }
    else if hours > 0 { format!("{}h{}m", hours, mins) }
    else if mins > 0 { format!("{}m", mins) }
    else { format!("{}s", secs) }
}
