use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::Context;
use tracing::info;

use inbox_listener::catalog::FileCatalogSource;
use inbox_listener::config::ListenerConfig;
use inbox_listener::dispatch::{Dispatcher, ReplyPipeline};
use inbox_listener::feed::{ImapExtractor, ImapFeed};
use inbox_listener::matcher::KeywordMatcher;
use inbox_listener::notify::{LogNotifier, Notifier, SmtpNotifier};
use inbox_listener::observer::InboxObserver;
use inbox_listener::reply::GeminiDrafter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = ListenerConfig::from_env().context("loading configuration")?;

    eprintln!("📬 Inbox Listener v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Mailbox: {}", config.mailbox.imap_host);
    eprintln!("   Catalog: {}", config.catalog_path.display());
    eprintln!(
        "   Auto-reply: {}",
        if config.auto_reply && config.drafter.is_some() {
            "on"
        } else {
            "off"
        }
    );

    let catalog = Arc::new(FileCatalogSource::new(config.catalog_path.clone()));
    let extractor = Arc::new(ImapExtractor::new(config.mailbox.clone()));

    let notifiers: Vec<Arc<dyn Notifier>> = vec![Arc::new(LogNotifier)];
    let mut dispatcher = Dispatcher::new(notifiers);

    if config.auto_reply
        && let Some(drafter_config) = &config.drafter
    {
        let drafter =
            GeminiDrafter::new(drafter_config.api_key.clone(), drafter_config.model.clone())
                .context("creating reply drafter")?;
        dispatcher = dispatcher.with_reply(ReplyPipeline {
            drafter: Arc::new(drafter),
            outbox: Arc::new(SmtpNotifier::new(config.mailbox.clone())),
        });
        info!(model = %drafter_config.model, "Reply drafting enabled");
    }

    let (batches, feed_handle, feed_shutdown) = ImapFeed::spawn(config.mailbox.clone());

    let mut observer = InboxObserver::new(catalog, extractor, dispatcher)
        .with_matcher(KeywordMatcher::new(config.max_distance))
        .with_throttle(config.throttle);

    // Ctrl-C stops the feed and lets the observer finish its current item.
    let stop = observer.stop_handle();
    let shutdown = Arc::clone(&feed_shutdown);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
            stop.store(true, Ordering::Relaxed);
            shutdown.store(true, Ordering::Relaxed);
        }
    });

    observer.run(batches).await;

    feed_shutdown.store(true, Ordering::Relaxed);
    feed_handle.abort();
    info!("Inbox listener stopped");
    Ok(())
}
