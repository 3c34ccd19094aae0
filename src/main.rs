use anyhow::Context;
use axum::Router;
use clap::{Args, Parser, Subcommand};
use mailsort::api::{self, AppState};
use mailsort::classifier::HttpClassifier;
use mailsort::client::{DraftFile, FileStorage, MailsortClient, SubmissionDraft, TerminalPage};
use mailsort::config::{self, ServerConfig, UploadLimits};
use mailsort::poller::{PollState, Poller};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "mailsort")]
#[command(about = "Email classification front-end: submission server and polling client")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server
    Serve(ServeArgs),
    /// Submit text and/or files, then wait for the result
    Submit(SubmitArgs),
    /// Resume waiting for a previously submitted job
    Watch(ClientArgs),
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Server port
    #[arg(short, long, default_value_t = config::DEFAULT_PORT)]
    port: u16,

    /// Bind address
    #[arg(long, default_value = config::DEFAULT_HOST)]
    host: String,

    /// Base URL of the classification service
    #[arg(long, env = "FAST_API", default_value = config::DEFAULT_API_BASE)]
    api_base: String,

    /// Timeout for one classification call, in seconds
    #[arg(long, default_value_t = config::CLASSIFIER_TIMEOUT_SECS)]
    api_timeout_secs: u64,

    /// Maximum number of files per submission
    #[arg(long, default_value_t = config::MAX_UPLOAD_FILES)]
    max_files: usize,

    /// Maximum size of one uploaded file, in bytes
    #[arg(long, default_value_t = config::MAX_FILE_SIZE_BYTES)]
    max_file_size: usize,

    /// Also write logs to daily-rotated files in this directory
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ClientArgs {
    /// Base URL of a running mailsort server
    #[arg(short, long, default_value = "http://localhost:8080")]
    server: String,

    /// Where the in-flight job id is kept between runs
    #[arg(long, default_value = ".mailsort/state.json")]
    state_file: PathBuf,
}

#[derive(Args, Debug)]
struct SubmitArgs {
    #[command(flatten)]
    client: ClientArgs,

    #[arg(short, long)]
    author: String,

    /// Message text
    #[arg(short, long)]
    content: Option<String>,

    /// Files to attach (repeatable)
    #[arg(short, long = "file")]
    files: Vec<PathBuf>,
}

impl ServeArgs {
    fn into_config(self) -> (ServerConfig, Option<PathBuf>) {
        let config = ServerConfig {
            host: self.host,
            port: self.port,
            api_base: self.api_base,
            api_timeout: Duration::from_secs(self.api_timeout_secs),
            limits: UploadLimits {
                max_files: self.max_files,
                max_file_size: self.max_file_size,
            },
        };
        (config, self.log_dir)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve(args) => {
            let (config, log_dir) = args.into_config();
            let _guard = init_tracing(log_dir.as_deref());
            serve(config).await
        }
        Command::Submit(args) => {
            let _guard = init_tracing(None);
            submit(args).await
        }
        Command::Watch(args) => {
            let _guard = init_tracing(None);
            watch(args).await
        }
    }
}

fn init_tracing(log_dir: Option<&std::path::Path>) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "mailsort=info,tower_http=info".into());

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "mailsort.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    guard
}

async fn serve(config: ServerConfig) -> anyhow::Result<()> {
    info!("🚀 mailsort server");
    info!("🧠 Classifier: {} (timeout {:?})", config.classifier_url(), config.api_timeout);
    info!(
        "📎 Upload limits: {} files, {} bytes each",
        config.limits.max_files, config.limits.max_file_size
    );

    let classifier = HttpClassifier::new(config.classifier_url(), config.api_timeout)
        .context("failed to build classifier client")?;
    let state = AppState::new(Arc::new(classifier), config.api_timeout, config.limits);
    let runner = state.runner.clone();

    let app = Router::new()
        .merge(api::routes(state))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .with_context(|| format!("invalid bind address {}:{}", config.host, config.port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("🌐 Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    let aborted = runner.drain(Duration::from_secs(config::SHUTDOWN_GRACE_SECS)).await;
    info!("Shutdown complete ({} job(s) abandoned)", aborted);
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to create SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, shutting down gracefully..."),
        _ = terminate => info!("Received SIGTERM, shutting down gracefully..."),
    }
}

fn build_poller(args: &ClientArgs) -> anyhow::Result<Poller<MailsortClient, FileStorage, TerminalPage>> {
    let client = MailsortClient::new(&args.server)?;
    Ok(Poller::new(
        client.clone(),
        FileStorage::new(&args.state_file),
        TerminalPage::new(client),
    ))
}

async fn submit(args: SubmitArgs) -> anyhow::Result<()> {
    let mut draft = SubmissionDraft::new(args.author);
    if let Some(content) = args.content {
        draft = draft.with_content(content);
    }
    for path in &args.files {
        draft = draft.with_file(DraftFile::from_path(path)?);
    }

    let client = MailsortClient::new(&args.client.server)?;
    let accepted = client.submit(draft).await?;
    println!("📨 Job {} accepted ({} content block(s))", accepted.job_id, accepted.count);

    let mut poller = build_poller(&args.client)?;
    poller.on_submitted(&accepted.job_id).await?;
    report(poller.resume().await)
}

async fn watch(args: ClientArgs) -> anyhow::Result<()> {
    let mut poller = build_poller(&args)?;
    match poller.resume().await {
        PollState::Idle => {
            println!("No job in flight.");
            Ok(())
        }
        other => report(other),
    }
}

fn report(state: PollState) -> anyhow::Result<()> {
    match state {
        PollState::Failed { job_id, reason } => anyhow::bail!("job {} failed: {}", job_id, reason),
        _ => Ok(()),
    }
}
