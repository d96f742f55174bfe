//! Prompt-attack detection CLI.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use promptguard::{
    AttackLearner, Classifier, FeedbackStore, FileStore, Guardian, HashedNgramEmbedder, Label,
    LexiconClassifier, RuleMatcher, SemanticStore, Verdict,
};
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

/// Hybrid prompt-attack detection for LLM traffic
///
/// Normalizes obfuscated input, scores it against a rule set, a semantic
/// attack-fingerprint index, and a statistical classifier, and fuses the
/// signals into an ALLOW / REVIEW / BLOCK verdict.
#[derive(Parser, Debug)]
#[command(name = "promptguard")]
#[command(version, about, long_about = None)]
struct Args {
    /// Rule-set JSON file; failing to load it is a fatal error
    #[arg(long, env = "GUARD_RULES")]
    rules: PathBuf,

    /// Base attack corpus, one phrase per line
    #[arg(long, env = "GUARD_ATTACKS")]
    attacks: Option<PathBuf>,

    /// Durable file for learned attacks
    #[arg(long, env = "GUARD_LEARNED", default_value = "learned_attacks.txt")]
    learned: PathBuf,

    /// Maximum variants generated per approved attack
    #[arg(long, env = "GUARD_MAX_VARIANTS", default_value = "12")]
    max_variants: usize,

    /// Enable verbose debug logging
    #[arg(long, short, env = "VERBOSE", default_value = "false")]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Analyze a prompt (argument or stdin) and print the verdict as JSON
    Analyze {
        /// Prompt text; read from stdin when omitted
        prompt: Option<String>,
    },
    /// Bulk-import attack phrases from a file, bypassing the review queue
    Import {
        /// Plain-text file, one phrase per line, `#` comments ignored
        file: PathBuf,
    },
    /// Print the learned attack corpus
    Export,
    /// Retrain the classifier from a labeled feedback file and print metrics
    Retrain {
        /// JSON array of {"text": ..., "label": true|false} records;
        /// true = attack, false = benign
        feedback: PathBuf,
    },
}

/// Analyze output: the verdict plus the session learning state, so the
/// one-shot caller sees what a resident deployment would accumulate.
#[derive(Serialize)]
struct AnalysisReport {
    #[serde(flatten)]
    verdict: Verdict,
    probing: bool,
    queued_for_review: bool,
}

#[derive(Deserialize)]
struct FeedbackEntry {
    text: String,
    label: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    fmt().with_env_filter(filter).with_target(false).init();

    // Fatal if the rule set cannot be loaded: never start partially configured.
    let rules = RuleMatcher::from_file(&args.rules)
        .with_context(|| format!("loading rule set from {}", args.rules.display()))?;

    let store = Arc::new(SemanticStore::new(Arc::new(HashedNgramEmbedder::default())));
    let storage = Arc::new(FileStore::new(&args.learned));

    // Seed the index from the base corpus plus previously learned attacks.
    let mut base_count = 0;
    if let Some(ref path) = args.attacks {
        let corpus = std::fs::read_to_string(path)
            .with_context(|| format!("reading attack corpus from {}", path.display()))?;
        base_count = store.load_corpus(&corpus).await?;
    }
    let learned_corpus = std::fs::read_to_string(&args.learned).unwrap_or_default();
    let learned_count = store.load_corpus(&learned_corpus).await?;

    info!("Starting promptguard");
    info!("  Rules: {} ({})", args.rules.display(), rules.len());
    info!(
        "  Fingerprints: {} base + {} learned",
        base_count, learned_count
    );
    info!("  Learned file: {}", args.learned.display());
    info!("  Max variants: {}", args.max_variants);

    let feedback = Arc::new(FeedbackStore::new());
    let classifier = Arc::new(LexiconClassifier::new(feedback.clone()));
    let guardian = Guardian::new(rules, store.clone(), classifier.clone());
    let mut learner =
        AttackLearner::new(store, storage).with_max_variants(args.max_variants);

    match args.command {
        Command::Analyze { prompt } => {
            let prompt = match prompt {
                Some(p) => p,
                None => {
                    let mut buf = String::new();
                    std::io::stdin()
                        .read_to_string(&mut buf)
                        .context("reading prompt from stdin")?;
                    buf
                }
            };
            let verdict = guardian.analyze(prompt.trim_end()).await;
            let mut probing = false;
            if matches!(verdict.label, Label::Block | Label::Review) {
                probing = learner.record_verdict(verdict.label);
                let novelty = promptguard::novelty_score(verdict.semantic.score);
                learner.enqueue(prompt.trim_end(), verdict.risk_score, novelty);
            }
            let report = AnalysisReport {
                queued_for_review: !learner.candidates().is_empty(),
                probing,
                verdict,
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Import { file } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("reading import file {}", file.display()))?;
            let imported = learner.bulk_import(&text).await?;
            info!(
                "Imported {} phrases; collection size now {}",
                imported,
                learner.collection_size().await
            );
        }
        Command::Export => {
            print!("{}", learner.export_learned()?);
        }
        Command::Retrain { feedback: path } => {
            let json = std::fs::read_to_string(&path)
                .with_context(|| format!("reading feedback file {}", path.display()))?;
            let entries: Vec<FeedbackEntry> = serde_json::from_str(&json)
                .with_context(|| format!("parsing feedback file {}", path.display()))?;
            for entry in &entries {
                feedback.record(&entry.text, entry.label, "import").await;
            }
            let report = classifier.retrain().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}
