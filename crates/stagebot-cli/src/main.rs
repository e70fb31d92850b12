use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use stagebot_contracts::catalog::StyleCatalog;
use stagebot_contracts::events::{EventWriter, WorkerEvent};
use stagebot_engine::reference::ReferenceResolver;
use stagebot_engine::{
    default_generator_registry, DriveStore, Enhancer, EnvMap, LocalFolderStore, ObjectStore,
    Pipeline, PipelineConfig, Sleeper, ThreadSleeper, WatchLoop,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "stagebot", version, about = "Virtual staging worker")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Poll the inbox forever (or for --max-passes passes).
    Watch(WatchArgs),
    /// Run a single pass over the inbox.
    Once(WorkerArgs),
    /// Show which folder the inbox id points at and what it holds.
    CheckStore(ConfigArgs),
    /// Report reference coverage of the room/style catalog.
    Assets(ConfigArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StoreKind {
    Drive,
    Local,
}

#[derive(Debug, Args)]
struct ConfigArgs {
    #[arg(long, default_value = ".env")]
    env_file: PathBuf,
    #[arg(long, value_enum, default_value_t = StoreKind::Drive)]
    store: StoreKind,
    /// Root directory of the local store; folders are its sub-directories.
    #[arg(long, default_value = "stagebot-local")]
    local_root: PathBuf,
    #[arg(long)]
    assets: Option<PathBuf>,
    #[arg(long)]
    work_dir: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct WorkerArgs {
    #[command(flatten)]
    config: ConfigArgs,
    #[arg(long, default_value = "gemini")]
    generator: String,
    #[arg(long, default_value = "stagebot-events.jsonl")]
    events: PathBuf,
}

#[derive(Debug, Args)]
struct WatchArgs {
    #[command(flatten)]
    worker: WorkerArgs,
    #[arg(long)]
    max_passes: Option<u64>,
}

fn main() {
    init_tracing();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("stagebot error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Watch(args) => run_worker(args.worker, args.max_passes),
        Command::Once(args) => run_worker(args, Some(1)),
        Command::CheckStore(args) => run_check_store(args),
        Command::Assets(args) => run_assets(args),
    }
}

fn load_config(args: &ConfigArgs) -> Result<PipelineConfig> {
    let env = EnvMap::load(Some(args.env_file.as_path()));
    let mut config = PipelineConfig::from_env(&env)?;
    if let Some(assets) = &args.assets {
        config.assets_dir = assets.clone();
    }
    if let Some(work_dir) = &args.work_dir {
        config.work_dir = work_dir.clone();
    }
    Ok(config)
}

fn build_store(args: &ConfigArgs, config: &PipelineConfig) -> Result<Box<dyn ObjectStore>> {
    match args.store {
        StoreKind::Drive => {
            let Some(path) = config.service_account.path() else {
                bail!("{}", config.service_account.diagnostic());
            };
            info!(key = %path.display(), "using Google Drive store");
            Ok(Box::new(DriveStore::from_service_account_file(path)?))
        }
        StoreKind::Local => {
            let store = LocalFolderStore::new(&args.local_root);
            store.ensure_folders(&[
                config.folders.inbox.as_str(),
                config.folders.draft.as_str(),
                config.folders.archive.as_str(),
            ])?;
            info!(root = %args.local_root.display(), "using local folder store");
            Ok(Box::new(store))
        }
    }
}

fn run_worker(args: WorkerArgs, max_passes: Option<u64>) -> Result<i32> {
    let config = load_config(&args.config)?;
    let store = build_store(&args.config, &config)?;

    let mut generators = default_generator_registry(&config.generation);
    let available = generators.names();
    let generator = generators.take(&args.generator).ok_or_else(|| {
        anyhow!(
            "unknown generator {:?} (available: {})",
            args.generator,
            available.join(", ")
        )
    })?;
    if generator.name() == "gemini" && config.generation.api_key.is_none() {
        warn!("no Gemini API key set; every generation call will fail");
    }

    let sleeper: Arc<dyn Sleeper> = Arc::new(ThreadSleeper);
    let enhancer = Enhancer::from_config(&config.enhancement, sleeper.clone());
    if !enhancer.is_enabled() {
        warn!("MAGNIFIC_API_KEY not set; renders will be uploaded without upscaling");
    }

    let events = EventWriter::new(&args.events, format!("stagebot-{}", std::process::id()));
    let started = WorkerEvent::WorkerStarted {
        store: store.kind().to_string(),
        generator: generator.name().to_string(),
        inbox: config.folders.inbox.clone(),
        draft: config.folders.draft.clone(),
        archive: config.folders.archive.clone(),
        variants: config.variants,
        enhancement: enhancer.is_enabled(),
    };
    if let Err(err) = events.record(&started) {
        warn!(error = %err, "event write failed");
    }
    info!(
        store = store.kind(),
        generator = generator.name(),
        inbox = %config.folders.inbox,
        "worker started"
    );

    let pipeline = Pipeline::new(&config, store, generator, enhancer, events);
    let watch = WatchLoop::new(pipeline, config.watch, sleeper);
    let summary = watch.run(max_passes);
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(if summary.faulted_passes > 0 { 1 } else { 0 })
}

fn run_check_store(args: ConfigArgs) -> Result<i32> {
    let config = load_config(&args)?;
    println!("{}", config.service_account.diagnostic());
    let store = build_store(&args, &config)?;
    if let Some(account) = store.account() {
        println!("signed in as: {account}");
    }

    let inbox = &config.folders.inbox;
    match store.folder_name(inbox) {
        Ok(name) => println!("inbox folder: {name} ({inbox})"),
        Err(err) => {
            println!("cannot reach inbox folder {inbox}: {err:#}");
            println!("check the folder id and that it is shared with the account above");
            return Ok(1);
        }
    }

    let files = store.list(inbox)?;
    if files.is_empty() {
        println!("inbox is empty");
    }
    for file in &files {
        let marker = if file.is_image() { "image" } else { "skip " };
        println!("  [{marker}] {} ({}, {})", file.name, file.mime_type, file.id);
    }
    println!(
        "{} file(s), {} image(s)",
        files.len(),
        files.iter().filter(|file| file.is_image()).count()
    );
    Ok(0)
}

fn run_assets(args: ConfigArgs) -> Result<i32> {
    let config = load_config(&args)?;
    let resolver = ReferenceResolver::new(&config.assets_dir);
    let missing = print_coverage(&resolver, &StyleCatalog::default(), &config.assets_dir);
    Ok(if missing > 0 { 1 } else { 0 })
}

fn print_coverage(resolver: &ReferenceResolver, catalog: &StyleCatalog, root: &Path) -> usize {
    println!("assets: {}", root.display());
    let mut missing = 0;
    for entry in catalog.entries() {
        let count = resolver.candidates(&entry.room, &entry.style).len();
        if count == 0 {
            missing += 1;
        }
        println!(
            "  {:<12} {:<14} {}/{}  {}",
            entry.room,
            entry.style,
            entry.room_key,
            entry.style_key,
            if count == 0 {
                "MISSING".to_string()
            } else {
                format!("{count} reference(s)")
            }
        );
    }
    println!("{missing} room/style pair(s) without references");
    missing
}
