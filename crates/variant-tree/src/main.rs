/// 局面ツリーを少しずつ育てる。
///
/// 保存済みのツリーがあれば読み込んで続きから探索し、Ctrl-C で止めると
/// その時点のツリーを保存して終了する。
///
/// # 使用例
///
/// ```shell
/// cargo run -p variant-tree --release -- \
///   --engine /opt/fairy-stockfish --variant atomic --variants-file variants.ini \
///   --depth 24 --multipv 3 --threads 8 --hash-mb 4096 --dir trees
/// ```
///
/// 設定ファイル（TOML）を使う場合、コマンドライン引数が優先される:
/// ```shell
/// cargo run -p variant-tree --release -- --config atomic.toml --depth 20
/// ```
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::Parser as _;
use log::{info, warn};

use variant_tree::analysis_log::AnalysisLog;
use variant_tree::config::ExplorerConfig;
use variant_tree::engine::EngineSession;
use variant_tree::explorer::Explorer;
use variant_tree::lifecycle::{self, RunOptions, StopFlag};
use variant_tree::tree::TreeStore;

#[derive(clap::Parser, Debug)]
#[command(about = "incrementally build a position tree with a UCI engine")]
struct Cli {
    /// TOML config file (command line flags override it)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Variant name (UCI_Variant), also used for the tree file name
    #[arg(long)]
    variant: Option<String>,

    /// Engine binary path
    #[arg(long)]
    engine: Option<PathBuf>,

    /// Extra engine command line arguments (can be repeated)
    #[arg(long = "engine-arg", num_args = 1, allow_hyphen_values = true)]
    engine_args: Vec<String>,

    /// Threads for the engine
    #[arg(long)]
    threads: Option<usize>,

    /// Hash size (MiB)
    #[arg(long)]
    hash_mb: Option<u32>,

    /// New candidate moves requested per analysis
    #[arg(long)]
    multipv: Option<usize>,

    /// Search depth per analysis
    #[arg(long)]
    depth: Option<u32>,

    /// Directory holding <variant>/<variant>_<depth>.tree
    #[arg(long)]
    dir: Option<PathBuf>,

    /// Explicit tree file (overrides --dir)
    #[arg(long)]
    tree: Option<PathBuf>,

    /// Fairy-Stockfish variants.ini to load
    #[arg(long)]
    variants_file: Option<PathBuf>,

    /// NNUE eval file
    #[arg(long)]
    eval_file: Option<PathBuf>,

    /// Additional UCI options (format: "Name=Value", can be repeated)
    #[arg(long = "uci-option", num_args = 1)]
    uci_options: Vec<String>,

    /// Root position (defaults to the engine's startpos)
    #[arg(long)]
    start_fen: Option<String>,

    /// Autosave interval in seconds (0 disables)
    #[arg(long)]
    autosave_secs: Option<u64>,

    /// Save every N analyses (0 disables)
    #[arg(long)]
    autosave_every: Option<u64>,

    /// Do not append analysis records to <tree>.log
    #[arg(long)]
    no_analysis_log: bool,

    /// Append raw engine protocol lines to this file
    #[arg(long)]
    raw_log: Option<PathBuf>,
}

impl Cli {
    fn resolve_config(&self) -> Result<ExplorerConfig> {
        let mut cfg = match &self.config {
            Some(path) => ExplorerConfig::load(path)?,
            None => ExplorerConfig::default(),
        };
        if let Some(v) = &self.variant {
            cfg.variant = v.clone();
        }
        if let Some(v) = &self.engine {
            cfg.engine_path = v.clone();
        }
        if !self.engine_args.is_empty() {
            cfg.engine_args = self.engine_args.clone();
        }
        if let Some(v) = self.threads {
            cfg.threads = v;
        }
        if let Some(v) = self.hash_mb {
            cfg.hash_mb = v;
        }
        if let Some(v) = self.multipv {
            cfg.multipv = v;
        }
        if let Some(v) = self.depth {
            cfg.depth = v;
        }
        if let Some(v) = &self.dir {
            cfg.dir = v.clone();
        }
        if let Some(v) = &self.variants_file {
            cfg.variants_file = Some(v.clone());
        }
        if let Some(v) = &self.eval_file {
            cfg.eval_file = Some(v.clone());
        }
        cfg.extra_options.extend(self.uci_options.iter().cloned());
        if let Some(v) = &self.start_fen {
            cfg.start_fen = Some(v.clone());
        }
        if let Some(v) = self.autosave_secs {
            cfg.autosave_secs = v;
        }
        if let Some(v) = self.autosave_every {
            cfg.autosave_every = v;
        }
        if self.no_analysis_log {
            cfg.analysis_log = false;
        }
        if let Some(v) = &self.raw_log {
            cfg.raw_log = Some(v.clone());
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let cli = Cli::parse();
    let cfg = cli.resolve_config().context("invalid configuration")?;
    let tree_path = cli.tree.clone().unwrap_or_else(|| cfg.tree_path());

    let stop = StopFlag::new();
    // Ctrl-C ハンドラ
    {
        let stop = stop.clone();
        ctrlc::set_handler(move || {
            eprintln!("\nStopping after the current analysis...");
            stop.request_stop();
        })
        .ok();
    }

    let mut engine = EngineSession::start(&cfg.engine_options())
        .with_context(|| format!("failed to start engine {}", cfg.engine_path.display()))?;
    let tree = TreeStore::load(&tree_path, || match &cfg.start_fen {
        Some(fen) => Ok(fen.clone()),
        None => engine.start_fen(),
    })
    .with_context(|| format!("failed to load {}", tree_path.display()))?;
    if let Some(fen) = &cfg.start_fen {
        if &tree.root().fen != fen {
            warn!("{} was built from a different root: {}", tree_path.display(), tree.root().fen);
        }
    }
    info!(
        "{}: {} nodes, {} analyses, variant {} depth {} multipv {}",
        tree_path.display(),
        tree.len(),
        tree.analyses(),
        cfg.variant,
        cfg.depth,
        cfg.multipv
    );

    let tree = Arc::new(Mutex::new(tree));
    let mut explorer = Explorer::new(engine, cfg.explorer_settings());
    if cfg.analysis_log {
        let log_path = ExplorerConfig::analysis_log_path(&tree_path);
        let log = AnalysisLog::open(&log_path)
            .with_context(|| format!("failed to open {}", log_path.display()))?;
        explorer = explorer.with_analysis_log(log);
    }
    let opts = RunOptions {
        tree_path: tree_path.clone(),
        autosave_interval: cfg.autosave_interval(),
        autosave_every: cfg.autosave_every(),
    };
    let summary = lifecycle::run(&mut explorer, &tree, &opts, &stop)
        .with_context(|| format!("exploration of {} failed", tree_path.display()))?;
    println!(
        "{} nodes, {} analyses, pv {}",
        summary.nodes,
        summary.analyses,
        summary.principal_variation.join(" ")
    );
    Ok(())
}
