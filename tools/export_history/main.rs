//! Export learned history from a state database to JSON or CSV
//!
//! Usage:
//!   cargo run -p export_history -- --db state.redb --format json
//!   cargo run -p export_history -- --db state.redb --format csv --sort recent --output history.csv

use clap::{Parser, ValueEnum};
use libsuggest_core::store::keys;
use libsuggest_core::utils::Tokenizer;
use libsuggest_core::{EntryKind, FrequencyEntry, HistoryConfig, HistoryStore, StateStore};
use std::path::PathBuf;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Format {
    Json,
    Csv,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SortBy {
    /// Highest count first
    Count,
    /// Most recently used first
    Recent,
    /// Alphabetical
    Text,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Kind {
    Phrase,
    Word,
    Bigram,
    Trigram,
}

impl Kind {
    fn matches(self, kind: EntryKind) -> bool {
        matches!(
            (self, kind),
            (Kind::Phrase, EntryKind::Phrase)
                | (Kind::Word, EntryKind::Word)
                | (Kind::Bigram, EntryKind::Bigram)
                | (Kind::Trigram, EntryKind::Trigram)
        )
    }
}

#[derive(Parser, Debug)]
#[command(name = "export_history")]
#[command(about = "Export learned history entries to JSON or CSV format")]
struct Args {
    /// Path to the state database
    #[arg(short, long)]
    db: PathBuf,

    #[arg(short, long, value_enum, default_value = "json")]
    format: Format,

    /// Output file (defaults to stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    #[arg(long, value_enum, default_value = "count")]
    sort: SortBy,

    /// Only export entries of this kind
    #[arg(long, value_enum)]
    kind: Option<Kind>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let store = StateStore::open_redb(&args.db)
        .map_err(|e| anyhow::anyhow!("Failed to open state db {}: {}", args.db.display(), e))?;
    let Some(bytes) = store.get(keys::HISTORY)? else {
        anyhow::bail!("No history stored in {}", args.db.display());
    };
    let history = HistoryStore::from_bytes(&bytes, HistoryConfig::default(), Tokenizer::default())
        .map_err(|e| anyhow::anyhow!("Failed to decode history: {}", e))?;

    let mut entries: Vec<FrequencyEntry> = history
        .entries()
        .into_iter()
        .filter(|e| args.kind.map_or(true, |k| k.matches(e.kind)))
        .collect();

    match args.sort {
        SortBy::Count => {} // entries() is already count-descending
        SortBy::Recent => entries.sort_by(|a, b| b.last_used.cmp(&a.last_used)),
        SortBy::Text => entries.sort_by(|a, b| a.text.cmp(&b.text)),
    }

    let output = match args.format {
        Format::Json => export_json(&entries)?,
        Format::Csv => export_csv(&entries),
    };

    if let Some(path) = args.output {
        std::fs::write(path, output)?;
    } else {
        print!("{}", output);
    }

    Ok(())
}

fn export_json(entries: &[FrequencyEntry]) -> anyhow::Result<String> {
    let mut json = serde_json::to_string_pretty(entries)?;
    json.push('\n');
    Ok(json)
}

fn export_csv(entries: &[FrequencyEntry]) -> String {
    let mut output = String::from("text,kind,count,last_used\n");
    for e in entries {
        let escaped = e.text.replace('"', "\"\"");
        output.push_str(&format!(
            "\"{}\",{},{},{}\n",
            escaped,
            e.kind.as_str(),
            e.count,
            e.last_used
        ));
    }
    output
}
