//! Codebook CLI: inspect and mutate a codebook snapshot.
//!
//! Usage:
//!   codebook [--snapshot path] [--config path] [-v...] <command>
//!   codebook init
//!   codebook stats [--json]
//!   codebook tree
//!   codebook prune [--dry-run]
//!   codebook apply <operations.json>
//!   codebook similar --label <text> --category <function> [--threshold t]
//!   codebook embed

use clap::{Parser, Subcommand};
use codebook::storage::{JsonFileStore, SnapshotStore};
use codebook::{Category, CodeDraft, CodeId, Codebook, CodebookConfig, Operation, SimilarityEngine};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::Level;

#[derive(Parser)]
#[command(name = "codebook", version, about = "Evolving qualitative-analysis codebook")]
struct Cli {
    /// Path to the codebook snapshot (JSON)
    #[arg(long, global = true)]
    snapshot: Option<PathBuf>,
    /// Path to a YAML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an empty codebook snapshot
    Init {
        /// Overwrite an existing snapshot
        #[arg(long)]
        force: bool,
    },
    /// Show aggregate statistics
    Stats {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the code hierarchy
    Tree,
    /// Remove codes with no evidence and no children
    Prune {
        /// Report orphans without removing them
        #[arg(long)]
        dry_run: bool,
    },
    /// Apply a JSON array of operations in order
    Apply {
        /// File containing the operations
        #[arg(required = true)]
        operations: PathBuf,
    },
    /// Find codes similar to a label
    Similar {
        #[arg(long)]
        label: String,
        /// Analytical function, e.g. PROBLEM_DEFINITION
        #[arg(long)]
        category: Category,
        /// Minimum cosine similarity (defaults to the configured threshold)
        #[arg(long)]
        threshold: Option<f32>,
    },
    /// Embed the labels of codes that have no embedding yet
    /// (requires the `embeddings` feature)
    Embed,
}

/// Get the default snapshot path (~/.local/share/codebook/codebook.json)
fn default_snapshot_path() -> PathBuf {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_default().join(".local/share"));
    data_dir.join("codebook").join("codebook.json")
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<CodebookConfig, String> {
    match path {
        Some(path) => CodebookConfig::load(path)
            .map_err(|e| format!("Failed to load config '{}': {}", path.display(), e)),
        None => Ok(CodebookConfig::default()),
    }
}

fn open_codebook(store: &JsonFileStore) -> Result<Codebook, String> {
    match store.load_codebook() {
        Ok(Some(book)) => Ok(book),
        Ok(None) => Err(format!(
            "no codebook at '{}' (run `codebook init` first)",
            store.path().display()
        )),
        Err(e) => Err(format!("Failed to load codebook: {}", e)),
    }
}

fn save_codebook(store: &JsonFileStore, book: &Codebook) -> i32 {
    match store.save_codebook(book) {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("Error: failed to save codebook: {}", e);
            1
        }
    }
}

fn cmd_init(store: &JsonFileStore, force: bool) -> i32 {
    if store.path().exists() && !force {
        eprintln!(
            "Error: '{}' already exists (use --force to overwrite)",
            store.path().display()
        );
        return 1;
    }
    let code = save_codebook(store, &Codebook::new());
    if code == 0 {
        println!("Created empty codebook at {}", store.path().display());
    }
    code
}

fn cmd_stats(book: &Codebook, json: bool) -> i32 {
    let stats = book.statistics();
    if json {
        match serde_json::to_string_pretty(&stats) {
            Ok(s) => {
                println!("{}", s);
                return 0;
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                return 1;
            }
        }
    }

    println!("Codes:            {}", stats.total_codes);
    println!("  roots:          {}", stats.root_codes);
    println!("  children:       {}", stats.child_codes);
    println!("  orphans:        {}", stats.orphan_codes);
    println!("  with embedding: {}", stats.codes_with_embedding);
    println!("Max depth:        {}", stats.max_depth);
    println!("Evidence quotes:  {}", stats.total_evidence_quotes);
    println!("Documents cited:  {}", stats.documents_cited);
    println!("Next id:          {}", stats.next_id);
    if !stats.function_distribution.is_empty() {
        println!();
        println!("{:<22}  {:>6}", "FUNCTION", "CODES");
        println!("{}", "-".repeat(30));
        for (category, count) in &stats.function_distribution {
            println!("{:<22}  {:>6}", category, count);
        }
    }
    0
}

fn print_subtree(book: &Codebook, id: CodeId, indent: usize, seen: &mut HashSet<CodeId>) {
    if !seen.insert(id) {
        return;
    }
    let Some(code) = book.get(id) else {
        return;
    };
    println!(
        "{}[{}] {} ({}, {} quotes)",
        "  ".repeat(indent),
        code.id,
        code.label,
        code.category,
        code.evidence.quote_count()
    );
    let children: Vec<CodeId> = book.children_of(id).map(|c| c.id).collect();
    for child in children {
        print_subtree(book, child, indent + 1, seen);
    }
}

fn cmd_tree(book: &Codebook) -> i32 {
    if book.is_empty() {
        println!("Codebook is empty.");
        return 0;
    }
    let mut seen = HashSet::new();
    let roots: Vec<CodeId> = book.roots().map(|c| c.id).collect();
    for root in roots {
        print_subtree(book, root, 0, &mut seen);
    }
    // codes whose parent is missing, or that sit on a cycle
    let unreached: Vec<CodeId> = book.ids().filter(|id| !seen.contains(id)).collect();
    if !unreached.is_empty() {
        println!();
        println!("Unreachable from any root:");
        for id in unreached {
            print_subtree(book, id, 1, &mut seen);
        }
    }
    0
}

fn cmd_prune(store: &JsonFileStore, mut book: Codebook, dry_run: bool) -> i32 {
    if dry_run {
        let orphans: Vec<CodeId> = book.ids().filter(|id| book.is_orphan(*id)).collect();
        println!("{} orphan code(s) would be removed", orphans.len());
        for id in orphans {
            if let Some(code) = book.get(id) {
                println!("  [{}] {}", code.id, code.label);
            }
        }
        return 0;
    }

    let removed = book.remove_orphans();
    println!("Removed {} orphan code(s)", removed.len());
    if removed.is_empty() {
        return 0;
    }
    save_codebook(store, &book)
}

fn cmd_apply(store: &JsonFileStore, mut book: Codebook, config: &CodebookConfig, path: &Path) -> i32 {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) => {
            eprintln!("Error: cannot read '{}': {}", path.display(), e);
            return 1;
        }
    };
    let operations: Vec<Operation> = match serde_json::from_str(&raw) {
        Ok(ops) => ops,
        Err(e) => {
            eprintln!("Error: invalid operations file: {}", e);
            return 1;
        }
    };

    let mut failed = 0;
    for (index, operation) in operations.iter().enumerate() {
        match book.try_execute(operation) {
            Ok(outcome) => println!("{:>4}  {:<20}  ok ({:?})", index, operation.kind, outcome),
            Err(e) => {
                failed += 1;
                println!("{:>4}  {:<20}  rejected: {}", index, operation.kind, e);
            }
        }
    }
    if config.exploration.prune_orphans_after_batch {
        let pruned = book.remove_orphans();
        println!("Pruned {} orphan code(s)", pruned.len());
    }
    println!(
        "Applied {} of {} operation(s)",
        operations.len() - failed,
        operations.len()
    );
    save_codebook(store, &book)
}

fn cmd_similar(
    book: &Codebook,
    config: &CodebookConfig,
    label: &str,
    category: Category,
    threshold: Option<f32>,
) -> i32 {
    let engine = SimilarityEngine::from_config(&config.similarity);
    let threshold = threshold.unwrap_or(engine.threshold());

    #[allow(unused_mut)]
    let mut query = CodeDraft::new(label, category);
    #[cfg(feature = "embeddings")]
    {
        use codebook::embedding::{Embedder, FastEmbedEmbedder};
        match FastEmbedEmbedder::default_model().and_then(|e| e.embed(label)) {
            Ok(vector) => query = query.with_embedding(vector),
            Err(e) => eprintln!("Warning: embedding failed, matching on labels: {}", e),
        }
    }

    let matches = engine.rank_with_threshold(book, &query, threshold);
    if matches.is_empty() {
        println!("No similar codes.");
        return 0;
    }
    println!("{:>6}  {:>6}  {}", "ID", "SCORE", "LABEL");
    println!("{}", "-".repeat(48));
    for m in matches {
        println!("{:>6}  {:>6.3}  {}", m.code.id, m.score, m.code.label);
    }
    0
}

#[cfg(not(feature = "embeddings"))]
fn cmd_embed(_store: &JsonFileStore, _book: Codebook) -> i32 {
    eprintln!("Error: codebook was built without the `embeddings` feature");
    1
}

#[cfg(feature = "embeddings")]
fn cmd_embed(store: &JsonFileStore, mut book: Codebook) -> i32 {
    use codebook::embedding::FastEmbedEmbedder;
    let embedder = match FastEmbedEmbedder::default_model() {
        Ok(e) => e,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    match book.embed_missing(&embedder) {
        Ok(count) => {
            println!("Embedded {} code(s)", count);
            save_codebook(store, &book)
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match load_config(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };
    let store = JsonFileStore::new(cli.snapshot.unwrap_or_else(default_snapshot_path));

    if let Commands::Init { force } = cli.command {
        std::process::exit(cmd_init(&store, force));
    }

    let book = match open_codebook(&store) {
        Ok(b) => b,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };
    let code = match cli.command {
        Commands::Init { .. } => 0,
        Commands::Stats { json } => cmd_stats(&book, json),
        Commands::Tree => cmd_tree(&book),
        Commands::Prune { dry_run } => cmd_prune(&store, book, dry_run),
        Commands::Apply { operations } => cmd_apply(&store, book, &config, &operations),
        Commands::Similar {
            label,
            category,
            threshold,
        } => cmd_similar(&book, &config, &label, category, threshold),
        Commands::Embed => cmd_embed(&store, book),
    };
    std::process::exit(code);
}
