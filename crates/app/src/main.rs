use std::fmt;
use std::net::SocketAddr;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use serde_json::{Value, json};
use tracing_subscriber::EnvFilter;

use api::{AppState, router};
use services::quiz::DEFAULT_SESSION_TTL_SECS;
use services::{
    AppServices, CategoryDraft, Clock, GroupDraft, SubjectDraft, TaxonomyServiceError,
};

/// How often `serve` sweeps expired quiz sessions.
const PURGE_INTERVAL: StdDuration = StdDuration::from_secs(60 * 60);

#[derive(Debug)]
enum ArgsError {
    InvalidDbUrl { raw: String },
    InvalidSessionTtl { raw: i64 },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
            ArgsError::InvalidSessionTtl { raw } => {
                write!(f, "invalid --session-ttl-secs value: {raw}")
            }
        }
    }
}

impl std::error::Error for ArgsError {}

#[derive(Parser, Debug)]
#[command(version, about = "Question bank HTTP service")]
struct Cli {
    /// SQLite database URL.
    #[arg(
        long = "db",
        env = "QBANK_DB_URL",
        default_value = "sqlite://qbank.sqlite3",
        global = true
    )]
    db_url: String,

    /// The address to bind to.
    #[arg(long, env = "QBANK_ADDR", default_value = "127.0.0.1:8000", global = true)]
    addr: String,

    /// Key expected in `X-Admin-Key`; admin endpoints are open without it.
    #[arg(long, env = "QBANK_ADMIN_KEY", global = true)]
    admin_key: Option<String>,

    /// Lifetime of an idle quiz session.
    #[arg(
        long,
        env = "QBANK_SESSION_TTL_SECS",
        default_value_t = DEFAULT_SESSION_TTL_SECS,
        global = true
    )]
    session_ttl_secs: i64,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Run the HTTP server (default).
    Serve,
    /// Load a small sample taxonomy with questions.
    Seed,
    /// Issue a new access token and print its key.
    CreateToken {
        #[arg(long)]
        description: Option<String>,
    },
    /// Delete expired quiz sessions.
    PurgeSessions,
}

/// A positive lifetime whose expiry, counted from now, is still a valid timestamp.
fn session_ttl(secs: i64) -> Result<Duration, ArgsError> {
    Duration::try_seconds(secs)
        .filter(|ttl| *ttl > Duration::zero())
        .filter(|ttl| Utc::now().checked_add_signed(*ttl).is_some())
        .ok_or(ArgsError::InvalidSessionTtl { raw: secs })
}

fn normalize_sqlite_url(raw: String) -> String {
    let trimmed = raw.trim().to_string();
    if trimmed == "sqlite::memory:" {
        return trimmed;
    }

    let path_str = trimmed
        .strip_prefix("sqlite://")
        .or_else(|| trimmed.strip_prefix("sqlite:"))
        .unwrap_or(trimmed.as_str())
        .to_string();
    let path = std::path::Path::new(&path_str);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| std::path::PathBuf::from("."))
            .join(path)
    };
    format!("sqlite://{}", absolute.display())
}

fn prepare_sqlite_file(db_url: &str) -> Result<(), Box<dyn std::error::Error>> {
    if db_url == "sqlite::memory:" {
        return Ok(());
    }

    let path = db_url
        .strip_prefix("sqlite://")
        .ok_or_else(|| ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        })?;
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() {
        return Err(ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        }
        .into());
    }

    let path = std::path::Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    if !path.exists() {
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;
    }

    Ok(())
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let ttl = session_ttl(cli.session_ttl_secs)?;

    // Open + migrate SQLite at startup. Keep this in the binary glue so the
    // library crates never touch the filesystem.
    let db_url = normalize_sqlite_url(cli.db_url);
    prepare_sqlite_file(&db_url)?;
    let services = AppServices::new_sqlite(&db_url, Clock::default_clock(), ttl).await?;
    tracing::debug!(db = %db_url, "storage ready");

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(services, &cli.addr, cli.admin_key).await,
        Command::Seed => seed(&services).await,
        Command::CreateToken { description } => {
            let token = services.tokens().issue(description).await?;
            println!("{}", token.key().as_str());
            Ok(())
        }
        Command::PurgeSessions => {
            let purged = services.quiz().purge_expired().await?;
            println!("purged {purged} expired session(s)");
            Ok(())
        }
    }
}

async fn serve(
    services: AppServices,
    addr: &str,
    admin_key: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let address = addr.parse::<SocketAddr>()?;

    let quiz = services.quiz();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(PURGE_INTERVAL);
        loop {
            ticker.tick().await;
            if let Err(err) = quiz.purge_expired().await {
                tracing::warn!(error = %err, "session purge failed");
            }
        }
    });

    let app = router(AppState::new(services, admin_key));
    let listener = tokio::net::TcpListener::bind(address).await?;
    tracing::info!(%address, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "could not listen for ctrl-c");
    }
}

async fn seed(services: &AppServices) -> Result<(), Box<dyn std::error::Error>> {
    let taxonomy = services.taxonomy();
    let groups = taxonomy
        .create_groups(vec![GroupDraft {
            name: "General Knowledge".into(),
            description: Some("Sample questions".into()),
        }])
        .await;
    match groups {
        Ok(_) => {}
        Err(TaxonomyServiceError::Rejected(_)) => {
            eprintln!("seed: sample data already present, nothing to do.");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    }

    taxonomy
        .create_subjects(vec![SubjectDraft {
            group: "General Knowledge".into(),
            name: "Science".into(),
            description: None,
        }])
        .await?;
    taxonomy
        .create_categories(
            ["Physics", "Chemistry"]
                .into_iter()
                .map(|name| CategoryDraft {
                    group: "General Knowledge".into(),
                    subject: "Science".into(),
                    name: name.into(),
                    description: None,
                })
                .collect(),
        )
        .await?;

    let samples = [
        ("Physics", "easy", "What is the SI unit of force?", "Newton"),
        ("Physics", "medium", "What is the speed of light in km/s (approx.)?", "300000"),
        ("Physics", "advance", "What quantity does Planck's constant relate to frequency?", "Energy"),
        ("Chemistry", "easy", "What is the chemical symbol of gold?", "Au"),
        ("Chemistry", "medium", "What is the pH of pure water at 25 °C?", "7"),
    ];
    let rows: Vec<Value> = samples
        .into_iter()
        .map(|(category, level, prompt, answer)| {
            json!({
                "group": "General Knowledge",
                "subject": "Science",
                "category": category,
                "level": level,
                "type": "writing",
                "metadata": {"prompt": prompt, "answer": answer},
            })
        })
        .collect();
    let created = services.import().import_json(rows).await?;
    println!("seed: created {created} questions.");
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,qbank=debug,services=debug")),
        )
        .init();

    if let Err(err) = run().await {
        // At this layer (binary glue), printing once is fine.
        eprintln!("{err}");
        std::process::exit(2);
    }
}
