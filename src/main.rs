use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use appsearch_core_types::{CallType, UserHandle};
use appsearch_policy_center::{
    load_snapshot, InMemoryPolicyCenter, PolicyCenter, RuntimeOverrideSpec,
};
use appsearch_registry::{Document, MemoryEngineFactory, SchemaType, SearchSpec, SetSchemaRequest};
use appsearch_service::{
    metrics, telemetry, AppSearchService, CallRequest, FakePlatform, ResultCallback,
    ServiceEnvironment, TransportIdentity,
};
use clap::{Args, Parser, Subcommand};
use tokio::runtime::Handle;
use tracing::info;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Service policy file (YAML or JSON)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect the effective service policy
    Policy(PolicyArgs),
    /// Ask whether the denylist blocks a call
    Denylist(DenylistArgs),
    /// Run a short in-memory session and print stats and metrics
    Simulate(SimulateArgs),
}

#[derive(Args)]
struct PolicyArgs {
    #[command(subcommand)]
    command: PolicyCommand,
}

#[derive(Subcommand)]
enum PolicyCommand {
    Show(PolicyShowArgs),
    Override(PolicyOverrideArgs),
}

#[derive(Args)]
struct PolicyShowArgs {
    /// Output JSON instead of YAML
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct PolicyOverrideArgs {
    /// Dot-path to override, e.g. rate_limit.enabled
    path: String,
    /// Override value as JSON literal (e.g. 4, true, "value")
    value: String,
    #[arg(long, default_value = "cli")]
    owner: String,
    #[arg(long, default_value = "manual override")]
    reason: String,
    /// Seconds until the override expires; 0 keeps it
    #[arg(long, default_value_t = 0)]
    ttl: u64,
}

#[derive(Args)]
struct DenylistArgs {
    #[arg(long)]
    package: String,
    #[arg(long)]
    database: Option<String>,
    /// Call wire name, e.g. localSetSchema or globalSearch
    #[arg(long)]
    api: String,
}

#[derive(Args)]
struct SimulateArgs {
    #[arg(long, default_value = "com.example.notes")]
    package: String,
    #[arg(long, default_value_t = 5)]
    documents: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    telemetry::init_tracing(&cli.log_level, cli.json_logs);

    let snapshot = load_snapshot(cli.config.as_deref())
        .with_context(|| format!("loading service policy from {:?}", cli.config))?;
    let policy = Arc::new(InMemoryPolicyCenter::new(snapshot));

    match cli.command {
        Commands::Policy(args) => cmd_policy(args, policy).await,
        Commands::Denylist(args) => cmd_denylist(args, policy),
        Commands::Simulate(args) => cmd_simulate(args, policy).await,
    }
}

async fn cmd_policy(args: PolicyArgs, policy: Arc<InMemoryPolicyCenter>) -> Result<()> {
    let show_json = match args.command {
        PolicyCommand::Show(show) => show.json,
        PolicyCommand::Override(spec) => {
            let value = serde_json::from_str(&spec.value)
                .with_context(|| format!("override value '{}' is not JSON", spec.value))?;
            policy
                .apply_override(RuntimeOverrideSpec {
                    path: spec.path,
                    value,
                    owner: spec.owner,
                    reason: spec.reason,
                    ttl_seconds: spec.ttl,
                })
                .await?;
            false
        }
    };
    let view = policy.current();
    if show_json {
        println!("{}", serde_json::to_string_pretty(&view.snapshot)?);
    } else {
        print!("{}", serde_yaml::to_string(&view.snapshot)?);
    }
    Ok(())
}

fn cmd_denylist(args: DenylistArgs, policy: Arc<InMemoryPolicyCenter>) -> Result<()> {
    let call: CallType = args.api.parse()?;
    let view = policy.current();
    let denied = view
        .denylist
        .is_denied(&args.package, args.database.as_deref(), call);
    println!(
        "{} {} {} -> {}",
        args.package,
        args.database.as_deref().unwrap_or("-"),
        call,
        if denied { "denied" } else { "allowed" }
    );
    Ok(())
}

async fn cmd_simulate(args: SimulateArgs, policy: Arc<InMemoryPolicyCenter>) -> Result<()> {
    const UID: u32 = 10_123;
    let user = UserHandle::of(0);
    let platform = Arc::new(FakePlatform::new());
    platform
        .install(user, &args.package, UID)
        .set_unlocked(user, true);

    let env = ServiceEnvironment::new(
        platform,
        policy,
        Arc::new(MemoryEngineFactory::new()),
        Handle::current(),
    );
    let service = AppSearchService::new(env);
    service.on_user_unlocking(user);

    let request = |call: CallType| {
        CallRequest::new(call, args.package.clone(), TransportIdentity::new(UID, 1), user)
            .with_database("simulation")
    };

    let (callback, answer) = ResultCallback::channel();
    service.set_schema(
        request(CallType::SetSchema),
        SetSchemaRequest {
            schemas: vec![SchemaType::new("Note")],
            ..SetSchemaRequest::default()
        },
        callback,
    );
    answer.await??;

    let documents = (0..args.documents)
        .map(|i| {
            Document::new("notes", format!("note-{i}"), "Note")
                .with_property("body", format!("note {i}"))
        })
        .collect();
    let (callback, answer) = ResultCallback::channel();
    service.put_documents(request(CallType::PutDocuments), documents, callback);
    let batch = answer.await??;
    info!(stored = batch.successes.len(), failed = batch.failures.len(), "documents put");

    let (callback, answer) = ResultCallback::channel();
    service.query(request(CallType::Search), SearchSpec::new("note"), callback);
    let hits = answer.await??;
    println!("query matched {} documents", hits.len());

    if let Some(instance) = service.registry().find(user) {
        println!("{}", serde_json::to_string_pretty(&instance.stats().summary())?);
    }
    service.on_user_stopping(user);
    print!("{}", metrics::render());
    Ok(())
}
