use std::fs::OpenOptions;
use std::sync::Arc;

use anyhow::Context;
use secrecy::SecretString;
use tracing_appender::non_blocking::WorkerGuard;

use mail2chat::channels::{ChatClient, TelegramClient};
use mail2chat::config::{LogConfig, RelayConfig};
use mail2chat::mail::{FallbackRelay, SmtpRelay, SmtpServer};
use mail2chat::relay::{Dispatcher, IntakeHandler, per_destination};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    let config = match RelayConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let _log_guard = init_tracing(&config.log)?;

    eprintln!("📨 mail2chat v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   SMTP: {} ({})", config.smtp.listen, config.smtp.name);
    eprintln!("   Destinations: {}", config.registry.destinations().len());
    eprintln!(
        "   Send interval: {}s, queue capacity: {}",
        config.send_interval.as_secs(),
        config.queue_capacity
    );
    match &config.fallback {
        Some(fallback) => eprintln!("   Fallback: {}:{}", fallback.host, fallback.port),
        None => eprintln!("   Fallback: disabled"),
    }

    let RelayConfig {
        telegram_token,
        registry,
        smtp,
        queue_capacity,
        send_interval,
        suppress_phrase,
        fallback,
        log: _,
    } = config;

    let telegram = connect_telegram(telegram_token).await?;

    let registry = Arc::new(registry);
    let (queues, drain) = per_destination(registry.destinations(), queue_capacity);

    let fallback = match fallback {
        Some(cfg) => FallbackRelay::new(Arc::new(SmtpRelay::new(cfg))),
        None => FallbackRelay::disabled(),
    };

    let chat: Arc<dyn ChatClient> = Arc::new(telegram);
    tokio::spawn(Dispatcher::new(drain, chat, fallback, send_interval).run());

    let intake = Arc::new(IntakeHandler::new(Arc::clone(&registry), queues, suppress_phrase));
    let server = SmtpServer::bind(smtp, intake)
        .await
        .context("Failed to bind SMTP listener")?;
    eprintln!("   Listening on {}\n", server.local_addr()?);

    tokio::select! {
        result = server.run() => result.context("SMTP listener stopped")?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down");
        }
    }

    Ok(())
}

async fn connect_telegram(token: SecretString) -> anyhow::Result<TelegramClient> {
    let telegram = TelegramClient::new(token);
    let me = telegram
        .get_me()
        .await
        .context("Telegram bot initialization failed")?;
    tracing::info!(
        bot_id = me.id,
        username = me.username.as_deref().unwrap_or(&me.first_name),
        "Telegram bot ready"
    );
    Ok(telegram)
}

/// Set up the global subscriber. The returned guard flushes the file writer
/// on drop and must live as long as the process.
fn init_tracing(log: &LogConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(if log.debug { "debug" } else { "info" })
    });

    let Some(path) = &log.file else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
        return Ok(None);
    };

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file {}", path.display()))?;
    let (writer, guard) = tracing_appender::non_blocking(file);

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(false)
        .with_writer(writer)
        .init();

    Ok(Some(guard))
}
