use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use dotenv::dotenv;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use jukebot_common::models::{GuildId, MemberId, TransportFinished};
use jukebot_common::traits::{Recommender, Resolver, SessionRepository, Transport};
use jukebot_core::eventbus::EventBus;
use jukebot_core::repositories::{InMemorySessionRepository, PostgresSessionRepository};
use jukebot_core::services::{Collaborators, MusicService};
use jukebot_core::test_utils::fakes::{FakeResolver, FakeTransport};
use jukebot_core::{Database, EngineConfig};

mod console;
mod recommender;
mod resolver;
mod transport;

use console::{Console, ConsoleContext};
use recommender::{OpenAiConfig, OpenAiRecommender};
use resolver::YtDlpResolver;
use transport::FfmpegTransport;

#[derive(Parser, Debug, Clone)]
#[command(name = "jukebot")]
#[command(author, version, about = "JukeBot - per-guild music playback engine")]
struct Args {
    /// JSON engine configuration; defaults are used when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Postgres connection URL. Falls back to DATABASE_URL; without either,
    /// sessions are only kept in memory.
    #[arg(long)]
    db_url: Option<String>,

    /// File or FIFO receiving raw s16le 48 kHz stereo PCM.
    #[arg(long, default_value = "jukebot.pcm")]
    sink: PathBuf,

    #[arg(long, default_value = "yt-dlp")]
    ytdlp: String,

    #[arg(long, default_value = "ffmpeg")]
    ffmpeg: String,

    /// Seconds to wait for yt-dlp before giving up on a query.
    #[arg(long, default_value = "30")]
    resolve_timeout: u64,

    /// Guild the console starts out controlling.
    #[arg(long, default_value = "1")]
    guild: u64,

    /// Member the console acts as.
    #[arg(long, default_value = "1")]
    member: u64,

    /// Use in-process fakes instead of yt-dlp and ffmpeg.
    #[arg(long, default_value = "false")]
    offline: bool,
}

fn init_tracing() {
    let filter = EnvFilter::from_default_env()
        .add_directive("jukebot=info".parse().unwrap_or_default());
    let sub = fmt().with_env_filter(filter).finish();
    if let Err(e) = tracing::subscriber::set_global_default(sub) {
        eprintln!("Failed to set global subscriber: {e}");
    }
}

fn openai_config() -> OpenAiConfig {
    let defaults = OpenAiConfig::default();
    OpenAiConfig {
        api_key: std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty()),
        api_base: std::env::var("OPENAI_API_BASE").unwrap_or(defaults.api_base),
        model: std::env::var("OPENAI_MODEL").unwrap_or(defaults.model),
    }
}

async fn repository(db_url: Option<&str>) -> anyhow::Result<Arc<dyn SessionRepository>> {
    match db_url {
        Some(url) => {
            let db = Database::new(url).await?;
            db.migrate().await?;
            Ok(Arc::new(PostgresSessionRepository::new(db.pool().clone())))
        }
        None => {
            warn!("No database configured; queues will not survive a restart.");
            Ok(Arc::new(InMemorySessionRepository::default()))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    init_tracing();
    let args = Args::parse();
    info!("JukeBot starting. offline={}, sink={}", args.offline, args.sink.display());

    let config = match &args.config {
        Some(path) => EngineConfig::from_json_file(path)?,
        None => EngineConfig::default(),
    };

    let db_url = args.db_url.clone().or_else(|| std::env::var("DATABASE_URL").ok());
    let repository = repository(db_url.as_deref()).await?;

    let (resolver, transport, transport_rx): (
        Arc<dyn Resolver>,
        Arc<dyn Transport>,
        mpsc::Receiver<TransportFinished>,
    ) = if args.offline {
        let (transport, rx) = FakeTransport::with_channel();
        (Arc::new(FakeResolver::new()), Arc::new(transport), rx)
    } else {
        let (tx, rx) = mpsc::channel(64);
        (
            Arc::new(YtDlpResolver::new(&args.ytdlp, Duration::from_secs(args.resolve_timeout))),
            Arc::new(FfmpegTransport::new(&args.ffmpeg, args.sink.clone(), tx)),
            rx,
        )
    };
    let recommender: Arc<dyn Recommender> = Arc::new(OpenAiRecommender::new(openai_config()));

    let event_bus = Arc::new(EventBus::new());
    let collaborators = Collaborators {
        resolver,
        transport,
        repository,
        recommender,
    };
    let service = MusicService::start(collaborators, event_bus.clone(), config, transport_rx).await;

    let console = Arc::new(Console::new(service.clone(), event_bus.clone()));
    let notifier = console.spawn_notifier().await;
    let ctx = ConsoleContext {
        guild: GuildId::new_checked(args.guild).unwrap_or(GuildId::new(1)),
        member: MemberId::new_checked(args.member).unwrap_or(MemberId::new(1)),
        name: format!("member-{}", args.member),
    };
    console.clone().spawn_console_thread(tokio::runtime::Handle::current(), ctx);

    {
        let eb = event_bus.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for ctrl_c: {:?}", e);
                return;
            }
            info!("Ctrl-C detected; shutting down.");
            eb.shutdown();
        });
    }

    let mut shutdown_rx = event_bus.shutdown_rx.clone();
    loop {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(60)) => {
                info!("{} active sessions", service.registry().len());
            }
            res = shutdown_rx.changed() => {
                if res.is_err() || *shutdown_rx.borrow() {
                    info!("Shutting down main loop.");
                    break;
                }
            }
        }
    }

    service.shutdown().await;
    notifier.abort();
    info!("JukeBot stopped.");
    Ok(())
}
