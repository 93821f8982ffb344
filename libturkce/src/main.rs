use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use libsuggest_core::{CancelToken, RequestScheduler, Suggestion};
use libturkce::{Engine, TurkceConfig};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "libturkce")]
#[command(about = "Turkish chat reply suggestions")]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// redb database for learned state (overrides the config file)
    #[arg(long, global = true)]
    state: Option<PathBuf>,

    /// Directory with lexicon.json / templates.json / phrases.json overrides
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Suggestions for a partially typed reply
    Predict {
        text: String,

        /// Incoming message to classify before predicting
        #[arg(long)]
        incoming: Option<String>,

        /// Print suggestions as JSON
        #[arg(long)]
        json: bool,
    },

    /// Interactive session; plain lines are predicted, `:help` lists commands
    Repl,

    /// Learn every non-empty line of a file as a sent message
    Learn {
        #[arg(long)]
        file: PathBuf,
    },

    /// Spelling corrections for a word
    Check {
        word: String,

        #[arg(long)]
        json: bool,
    },

    /// List template categories, or the templates of one category
    Templates {
        #[arg(long)]
        category: Option<String>,
    },
}

fn load_config(cli: &Cli) -> Result<TurkceConfig> {
    let mut config = match &cli.config {
        Some(path) => TurkceConfig::load_toml(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => TurkceConfig::default(),
    };
    if let Some(state) = &cli.state {
        config.state_path = Some(state.clone());
    }
    if let Some(dir) = &cli.data_dir {
        config.data_dir = Some(dir.clone());
    }
    Ok(config)
}

fn print_suggestions(suggestions: &[Suggestion]) {
    if suggestions.is_empty() {
        println!("  (no suggestions)");
        return;
    }
    for (i, s) in suggestions.iter().enumerate() {
        let description = s.description.as_deref().unwrap_or("");
        println!(
            "  {}. {} [{} {:.2}] {}",
            i + 1,
            s.text,
            s.source,
            s.score,
            description
        );
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let engine = Engine::new(config).context("failed to build engine")?;

    match cli.command {
        Command::Predict {
            text,
            incoming,
            json,
        } => {
            if let Some(message) = incoming {
                engine.observe(&message);
            }
            let suggestions = engine.predict(&text);
            if json {
                println!("{}", serde_json::to_string_pretty(&suggestions)?);
            } else {
                print_suggestions(&suggestions);
            }
        }
        Command::Repl => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("failed to start runtime")?;
            runtime.block_on(repl(&engine))?;
        }
        Command::Learn { file } => {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let lines: Vec<&str> = content.lines().filter(|l| !l.trim().is_empty()).collect();
            for line in &lines {
                engine.fusion().learn_from_message(line);
            }
            engine.save().context("failed to save state")?;
            println!("learned {} messages", lines.len());
        }
        Command::Check { word, json } => {
            let corrections = engine.check(&word);
            if json {
                println!("{}", serde_json::to_string_pretty(&corrections)?);
            } else if corrections.is_empty() {
                println!("{}: ok", word);
            } else {
                for c in corrections {
                    println!(
                        "  {} (distance {}, confidence {:.2})",
                        c.word, c.distance, c.confidence
                    );
                }
            }
        }
        Command::Templates { category } => match category {
            Some(key) => {
                let templates = engine.templates(&key);
                if templates.is_empty() {
                    println!("no templates in category {}", key);
                }
                for t in templates {
                    println!("  {:<14} {}", t.trigger, t.body);
                }
            }
            None => {
                for c in engine.template_categories() {
                    println!("  {:<12} {} ({})", c.key, c.name, c.template_count);
                }
            }
        },
    }
    Ok(())
}

const REPL_HELP: &str = "\
  <text>          suggestions for <text>
  :send <text>    learn <text> as a sent message
  :in <text>      classify an incoming message
  :flow           conversation flow so far
  :stats          scheduler statistics
  :save           save learned state
  :quit           exit";

async fn repl(engine: &Engine) -> Result<()> {
    let scheduler = Arc::new(engine.scheduler());
    let shutdown = CancelToken::new();
    let worker = scheduler.spawn(shutdown.clone());

    println!("libturkce - type a reply, :help for commands");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim_end_matches(['\r', '\n']);
        if !handle_line(engine, &scheduler, line).await? {
            break;
        }
    }

    shutdown.cancel();
    if let Err(err) = worker.await {
        tracing::warn!(error = %err, "scheduler task failed");
    }
    engine.save().context("failed to save state")?;
    Ok(())
}

/// Returns false when the session should end.
async fn handle_line(engine: &Engine, scheduler: &RequestScheduler, line: &str) -> Result<bool> {
    let (command, rest) = match line.strip_prefix(':') {
        Some(cmd) => {
            let (name, rest) = cmd.split_once(' ').unwrap_or((cmd, ""));
            (Some(name), rest.trim())
        }
        None => (None, line),
    };

    match command {
        None => {
            let result = scheduler.predict(rest).result().await;
            print_suggestions(&result.suggestions);
        }
        Some("send") => {
            scheduler.learn(rest);
            if engine.config().autosave {
                engine.save()?;
            }
            println!("  learned");
        }
        Some("in") => match engine.observe(rest) {
            Some(analysis) => println!(
                "  intent {}, sentiment {:?} ({:.2}), question {}",
                analysis.intent, analysis.sentiment, analysis.sentiment_score, analysis.is_question
            ),
            None => println!("  context classification disabled"),
        },
        Some("flow") => match engine.conversation_flow() {
            Some(flow) => println!("  {}", serde_json::to_string(&flow)?),
            None => println!("  no messages yet"),
        },
        Some("stats") => println!("  {}", serde_json::to_string(&scheduler.stats())?),
        Some("save") => {
            engine.save()?;
            println!("  saved");
        }
        Some("quit") | Some("q") => return Ok(false),
        Some("help") => println!("{}", REPL_HELP),
        Some(other) => println!("  unknown command :{}", other),
    }
    Ok(true)
}
