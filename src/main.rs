use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use colored::Colorize;

use garage::auth::{AuthService, User};
use garage::config::GarageConfig;
use garage::evaluate::EvaluationUpdate;
use garage::session::{GarageContext, GarageSession};
use garage::store::{RecordStore, SqliteStore};
use garage::view::{rank_cell, SortSpec};

#[derive(Parser, Debug)]
#[command(name = "garage")]
#[command(author, version, about = "Collaborative prompt garage. Author branches, queue evaluations, browse scores.")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List the consolidated prompt branches
    List {
        /// Sort key: date, votes, score
        #[arg(short, long, default_value = "date")]
        sort: String,

        /// Direction for date sort: asc, desc
        #[arg(short, long)]
        dir: Option<String>,

        /// Case-insensitive title search
        #[arg(short = 'q', long)]
        search: Option<String>,
    },

    /// Show submission statistics (the landing counter)
    Stats,

    /// Queue a prompt for AI evaluation
    Evaluate {
        /// Prompt text; use --file to read from disk instead
        #[arg(conflicts_with = "file")]
        prompt: Option<String>,

        /// Read the prompt from a file
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Branch name for the submission
        #[arg(short, long)]
        name: String,

        /// Model to evaluate with
        #[arg(short, long, default_value = "Auto")]
        model: String,

        /// Existing prompt id being improved (defaults to a fresh draft)
        #[arg(long)]
        prompt_id: Option<String>,

        /// Follow the request until it finishes
        #[arg(short, long)]
        watch: bool,
    },

    /// List recent evaluation requests and their status
    Requests {
        /// Maximum number of requests to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Bulk-load prompt records from a JSON array file
    Import {
        /// Path to a JSON file containing an array of records
        file: PathBuf,

        /// Target collection
        #[arg(short, long, default_value = "prompts")]
        collection: String,
    },

    /// Start the HTTP relay (landing page, prompts API, /create_doc)
    Serve {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Browse the garage in the terminal
    Tui,

    /// Generate shell completions
    Completion {
        /// Shell to generate completions for
        shell: Shell,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::List { sort, dir, search } => cmd_list(&sort, dir.as_deref(), search.as_deref()),
        Commands::Stats => cmd_stats(),
        Commands::Evaluate {
            prompt,
            file,
            name,
            model,
            prompt_id,
            watch,
        } => cmd_evaluate(prompt, file, &name, &model, prompt_id, watch),
        Commands::Requests { limit } => cmd_requests(limit),
        Commands::Import { file, collection } => cmd_import(&file, &collection),
        Commands::Serve { port } => cmd_serve(port),
        Commands::Tui => cmd_tui(),
        Commands::Completion { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "garage", &mut std::io::stdout());
            Ok(())
        }
    };

    if let Err(message) = result {
        eprintln!("{} {}", "Error:".red().bold(), message);
        std::process::exit(1);
    }
}

/// Build the shared context: config, embedded store, CLI identity.
fn build_context() -> Result<GarageContext, String> {
    let config = GarageConfig::load();
    let store = open_store(&config)?;
    let auth = Arc::new(match identity_from_env() {
        Some(user) => AuthService::with_user(user),
        None => AuthService::new(),
    });
    Ok(GarageContext::new(store, auth, config))
}

fn open_store(config: &GarageConfig) -> Result<Arc<SqliteStore>, String> {
    // Priority: GARAGE_DB_PATH env var, then config, then .garage walk-up.
    let store = if std::env::var("GARAGE_DB_PATH").is_err() {
        if let Some(path) = &config.store.path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).ok();
            }
            SqliteStore::open_at(path)
        } else {
            SqliteStore::open()
        }
    } else {
        SqliteStore::open()
    };
    store.map_err(|e| e.to_string())
}

/// CLI identity from GARAGE_USER ("uid", "uid:username", or
/// "uid:username:email").
fn identity_from_env() -> Option<User> {
    let raw = std::env::var("GARAGE_USER").ok()?;
    let mut parts = raw.splitn(3, ':');
    let uid = parts.next()?.trim().to_string();
    if uid.is_empty() {
        return None;
    }
    Some(User {
        uid,
        username: parts.next().map(str::to_string).filter(|s| !s.is_empty()),
        email: parts.next().map(str::to_string).filter(|s| !s.is_empty()),
    })
}

fn cmd_list(sort: &str, dir: Option<&str>, search: Option<&str>) -> Result<(), String> {
    let sort = SortSpec::parse(sort, dir)
        .ok_or_else(|| format!("unknown sort '{}' (expected date, votes, or score)", sort))?;

    let ctx = build_context()?;
    let mut session = GarageSession::new(ctx);
    session.init();
    session.sort = sort;
    session.search = search.unwrap_or("").to_string();

    let entries = session.visible();
    if entries.is_empty() {
        println!("No prompts found in '{}'", session.collection());
        return Ok(());
    }

    println!(
        "{:<8} {:<45} {:<16}",
        sort.header_label().bold(),
        "Title".bold(),
        "Owner".bold()
    );
    for (index, entry) in entries.iter().enumerate() {
        let rank = rank_cell(&entry.record, sort, index + 1);
        let owner = entry.record.username.as_deref().unwrap_or("—");
        println!(
            "{:<8} {:<45} {:<16}",
            rank.green(),
            entry.record.display_title(),
            owner
        );
    }
    Ok(())
}

fn cmd_stats() -> Result<(), String> {
    let ctx = build_context()?;
    let mut session = GarageSession::new(ctx);
    session.init();
    let stats = session.stats();

    println!("{}", "Garage stats".bold());
    println!("  Collection:    {}", stats.collection);
    println!("  Submissions:   {}", stats.total);
    println!("  Scored:        {}", stats.scored);
    println!("  Average score: {}", stats.average_score);
    Ok(())
}

fn cmd_evaluate(
    prompt: Option<String>,
    file: Option<PathBuf>,
    name: &str,
    model: &str,
    prompt_id: Option<String>,
    watch: bool,
) -> Result<(), String> {
    let prompt_text = match (prompt, file) {
        (Some(text), None) => text,
        (None, Some(path)) => std::fs::read_to_string(&path)
            .map_err(|e| format!("failed to read {}: {}", path.display(), e))?,
        (None, None) => return Err("provide a prompt argument or --file".to_string()),
        (Some(_), Some(_)) => unreachable!("clap conflicts_with"),
    };

    let config = GarageConfig::load();
    let sqlite = open_store(&config)?;
    let auth = Arc::new(match identity_from_env() {
        Some(user) => AuthService::with_user(user),
        None => AuthService::new(),
    });
    let ctx = GarageContext::new(sqlite.clone(), auth, config);
    if !ctx.auth.is_authenticated() {
        return Err("sign in required: set GARAGE_USER=uid:username".to_string());
    }

    let slot = prompt_id.unwrap_or_else(|| "blank".to_string());
    let session = GarageSession::new(ctx);
    let (request_id, mut request_watch) = session
        .request_evaluation(prompt_text.trim(), model, &slot, name)
        .map_err(|e| e.to_string())?;

    println!(
        "{} evaluation request {}",
        "Created".green().bold(),
        request_id
    );

    if !watch {
        println!("Follow it with: garage requests");
        return Ok(());
    }

    println!("Waiting for the evaluation pipeline...");
    let started = Instant::now();
    let timeout = Duration::from_secs(300);
    loop {
        for update in request_watch.poll() {
            match update {
                EvaluationUpdate::Processing => println!("{}", "Processing...".yellow()),
                EvaluationUpdate::Done { result, .. } => {
                    let total = result
                        .score_total
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| "N/A".to_string());
                    println!("{} score_total = {}", "Done.".green().bold(), total);
                    return Ok(());
                }
                EvaluationUpdate::Failed(failure) => {
                    return Err(failure.message());
                }
                EvaluationUpdate::StreamError(message) => {
                    eprintln!("{} {}", "Stream error:".yellow(), message);
                }
            }
        }
        if started.elapsed() > timeout {
            return Err("timed out waiting for the evaluation pipeline".to_string());
        }
        // The pipeline writes from another process; pick up its changes.
        sqlite.resync();
        std::thread::sleep(Duration::from_millis(500));
    }
}

fn cmd_requests(limit: usize) -> Result<(), String> {
    let ctx = build_context()?;
    let collection = ctx.config.collections.evaluations.clone();
    let mut docs = ctx.store.fetch_all(&collection);
    docs.reverse(); // newest first; the store returns creation order
    docs.truncate(limit);

    if docs.is_empty() {
        println!("No evaluation requests in '{}'", collection);
        return Ok(());
    }

    println!(
        "{:<38} {:<12} {:<20} {}",
        "Request".bold(),
        "Status".bold(),
        "Branch".bold(),
        "Model".bold()
    );
    for doc in docs {
        let status = doc.fields["status"].as_str().unwrap_or("unknown");
        let branch = doc.fields["branch_name"].as_str().unwrap_or("(untitled)");
        let model = doc.fields["selected_model"].as_str().unwrap_or("-");
        let colored_status = match status {
            "done" => status.green(),
            "error" => status.red(),
            "processing" => status.yellow(),
            _ => status.normal(),
        };
        println!("{:<38} {:<12} {:<20} {}", doc.id, colored_status, branch, model);
    }
    Ok(())
}

fn cmd_import(file: &Path, collection: &str) -> Result<(), String> {
    let contents = std::fs::read_to_string(file)
        .map_err(|e| format!("failed to read {}: {}", file.display(), e))?;
    let records: Vec<serde_json::Value> =
        serde_json::from_str(&contents).map_err(|e| format!("invalid JSON: {}", e))?;

    let config = GarageConfig::load();
    let store = open_store(&config)?;

    let mut imported = 0usize;
    let mut skipped = 0usize;
    for mut record in records {
        if !record.is_object() {
            skipped += 1;
            continue;
        }
        // An explicit id is preserved so branch lineage survives the import.
        let explicit_id = record
            .get("id")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        if let Some(obj) = record.as_object_mut() {
            obj.remove("id");
        }
        let result = match explicit_id {
            Some(id) => store.insert_with_id(collection, &id, record),
            None => store.add(collection, record).map(|_| ()),
        };
        match result {
            Ok(()) => imported += 1,
            Err(e) => {
                log::warn!("import skipped a record: {}", e);
                skipped += 1;
            }
        }
    }

    println!(
        "{} {} record(s) into '{}' ({} skipped)",
        "Imported".green().bold(),
        imported,
        collection,
        skipped
    );
    Ok(())
}

fn cmd_serve(port: Option<u16>) -> Result<(), String> {
    let ctx = build_context()?;
    let port = port.unwrap_or(ctx.config.relay.port);
    let state = garage::serve::RelayState::new(ctx);
    garage::serve::start_relay(state, port).map_err(|e| e.to_string())
}

fn cmd_tui() -> Result<(), String> {
    let config = GarageConfig::load();
    let store = open_store(&config)?;

    // Keep the file watcher alive for the whole TUI run so changes written
    // by the evaluation pipeline show up live.
    let _watcher = store.start_watcher().map_err(|e| e.to_string())?;

    let auth = Arc::new(match identity_from_env() {
        Some(user) => AuthService::with_user(user),
        None => AuthService::new(),
    });
    let ctx = GarageContext::new(store, auth, config);
    let session = GarageSession::new(ctx);
    garage::tui::run(session).map_err(|e| e.to_string())
}
