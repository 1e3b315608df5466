//! Inbox observer — turns feed batches into at-most-once match events.
//!
//! Per item: dedup against the seen set, gate on the unread flag, extract,
//! match against a fresh catalog, dispatch. Items are processed strictly
//! sequentially in feed order with a minimum delay between extractions, so
//! the mail source is never hit by racing extraction requests.
//!
//! No failure in extraction or matching for one item may block the items
//! after it; everything fallible inside the per-item step is caught, logged,
//! and converted into a fallback dispatch.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::{Stream, StreamExt};
use tracing::{debug, info, warn};

use crate::catalog::{Catalog, CatalogSource};
use crate::dispatch::Dispatcher;
use crate::feed::{MailExtractor, MailItem};
use crate::matcher::{KeywordMatcher, MatchOutcome};
use crate::observer::seen::SeenTracker;

/// Default minimum delay between successive item extractions.
pub const DEFAULT_THROTTLE: Duration = Duration::from_secs(1);

/// Watches a feed of mailbox items and processes each new unread one once.
pub struct InboxObserver<I: MailItem> {
    tracker: SeenTracker,
    matcher: KeywordMatcher,
    catalog: Arc<dyn CatalogSource>,
    extractor: Arc<dyn MailExtractor<I>>,
    dispatcher: Dispatcher,
    throttle: Duration,
    stop: Arc<AtomicBool>,
}

impl<I: MailItem> InboxObserver<I> {
    pub fn new(
        catalog: Arc<dyn CatalogSource>,
        extractor: Arc<dyn MailExtractor<I>>,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            tracker: SeenTracker::default(),
            matcher: KeywordMatcher::default(),
            catalog,
            extractor,
            dispatcher,
            throttle: DEFAULT_THROTTLE,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_matcher(mut self, matcher: KeywordMatcher) -> Self {
        self.matcher = matcher;
        self
    }

    pub fn with_throttle(mut self, throttle: Duration) -> Self {
        self.throttle = throttle;
        self
    }

    pub fn with_tracker(mut self, tracker: SeenTracker) -> Self {
        self.tracker = tracker;
        self
    }

    /// Flag that stops the observer between items when set.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Number of item identifiers processed so far.
    pub fn seen_count(&self) -> usize {
        self.tracker.len()
    }

    /// Drain the feed until it ends or the stop flag is set.
    pub async fn run<S>(&mut self, mut batches: S)
    where
        S: Stream<Item = Vec<I>> + Unpin,
    {
        while let Some(batch) = batches.next().await {
            if self.stop.load(Ordering::Relaxed) {
                info!("Observer stopped");
                return;
            }
            self.process_batch(batch).await;
        }
        info!("Feed ended; observer exiting");
    }

    /// Process one batch of simultaneously-reported items, in feed order.
    pub async fn process_batch(&mut self, items: Vec<I>) {
        for item in items {
            // Stop between items; an in-flight extraction always completes.
            if self.stop.load(Ordering::Relaxed) {
                info!("Observer stopping mid-batch");
                return;
            }

            let id = item.identifier();

            if id.is_empty() {
                // Not remembered: a later event may carry a usable
                // identifier for the same physical message.
                debug!(sender = %item.sender(), "Skipping item without identifier");
                continue;
            }

            if self.tracker.has_seen(id) {
                debug!(id = %id, "Skipping already-processed item");
                continue;
            }

            if !item.is_unread() {
                // Read items are ignored permanently, but not marked seen.
                debug!(id = %id, "Skipping item not flagged unread");
                continue;
            }

            self.tracker.mark_seen(id.to_owned());
            self.process_item(&item).await;

            tokio::time::sleep(self.throttle).await;
        }
    }

    /// Extract, match, and dispatch one new unread item.
    ///
    /// Never returns an error: extraction failure and catalog trouble both
    /// degrade to a fallback dispatch, and the item stays marked seen.
    async fn process_item(&self, item: &I) {
        info!(
            id = %item.identifier(),
            sender = %item.sender(),
            "Processing new unread item"
        );

        let extracted = match self.extractor.extract(item).await {
            Ok(mail) if !mail.body.trim().is_empty() => Some(mail),
            Ok(_) => {
                warn!(id = %item.identifier(), "Extraction returned an empty body");
                None
            }
            Err(e) => {
                warn!(id = %item.identifier(), error = %e, "Extraction failed");
                None
            }
        };

        let catalog = match self.catalog.load() {
            Ok(catalog) => catalog,
            Err(e) => {
                warn!(error = %e, "Catalog unavailable; falling back to default preview");
                Catalog::empty()
            }
        };

        let outcome = match &extracted {
            Some(mail) => {
                let text = format!("{} {}", mail.subject, mail.body);
                self.matcher.detect(&text, &catalog)
            }
            None => MatchOutcome::NoMatch,
        };

        debug!(
            id = %item.identifier(),
            outcome = outcome.label(),
            "Match pass complete"
        );

        self.dispatcher
            .dispatch(
                item.sender(),
                item.subject(),
                extracted.as_ref(),
                &outcome,
                &catalog,
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;

    use async_trait::async_trait;
    use rust_decimal_macros::dec;

    use crate::catalog::StaticCatalogSource;
    use crate::dispatch::Notification;
    use crate::error::{FeedError, NotifyError};
    use crate::feed::ExtractedMail;
    use crate::notify::Notifier;

    #[derive(Clone)]
    struct TestItem {
        id: String,
        unread: bool,
        sender: String,
        subject: String,
    }

    impl TestItem {
        fn unread(id: &str) -> Self {
            Self {
                id: id.into(),
                unread: true,
                sender: "alice@example.com".into(),
                subject: "Consulta".into(),
            }
        }

        fn read(id: &str) -> Self {
            Self {
                unread: false,
                ..Self::unread(id)
            }
        }
    }

    impl MailItem for TestItem {
        fn identifier(&self) -> &str {
            &self.id
        }
        fn is_unread(&self) -> bool {
            self.unread
        }
        fn sender(&self) -> &str {
            &self.sender
        }
        fn subject(&self) -> &str {
            &self.subject
        }
    }

    /// Extractor returning a canned body, counting invocations.
    struct FixedExtractor {
        body: String,
        calls: Arc<Mutex<usize>>,
    }

    impl FixedExtractor {
        fn new(body: &str) -> (Self, Arc<Mutex<usize>>) {
            let calls = Arc::new(Mutex::new(0));
            (
                Self {
                    body: body.into(),
                    calls: Arc::clone(&calls),
                },
                calls,
            )
        }
    }

    #[async_trait]
    impl MailExtractor<TestItem> for FixedExtractor {
        async fn extract(&self, item: &TestItem) -> Result<ExtractedMail, FeedError> {
            *self.calls.lock().unwrap() += 1;
            Ok(ExtractedMail {
                sender: item.sender.clone(),
                subject: item.subject.clone(),
                body: self.body.clone(),
            })
        }
    }

    /// Extractor that always fails.
    struct FailingExtractor;

    #[async_trait]
    impl MailExtractor<TestItem> for FailingExtractor {
        async fn extract(&self, item: &TestItem) -> Result<ExtractedMail, FeedError> {
            Err(FeedError::Extraction {
                id: item.id.clone(),
                reason: "boom".into(),
            })
        }
    }

    /// Notifier that records everything it is handed.
    #[derive(Clone, Default)]
    struct RecordingNotifier {
        sent: Arc<Mutex<Vec<Notification>>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
            self.sent.lock().unwrap().push(notification.clone());
            Ok(())
        }
    }

    fn catalog_source() -> Arc<dyn CatalogSource> {
        Arc::new(StaticCatalogSource::new(crate::catalog::Catalog::from_pairs([
            ("Tacho 20L".to_string(), dec!(50)),
        ])))
    }

    fn observer_with(
        extractor: Arc<dyn MailExtractor<TestItem>>,
    ) -> (InboxObserver<TestItem>, Arc<Mutex<Vec<Notification>>>) {
        let notifier = RecordingNotifier::default();
        let sent = Arc::clone(&notifier.sent);
        let dispatcher = Dispatcher::new(vec![Arc::new(notifier)]);
        let observer = InboxObserver::new(catalog_source(), extractor, dispatcher)
            .with_throttle(Duration::from_millis(0));
        (observer, sent)
    }

    #[tokio::test]
    async fn duplicate_identifier_is_processed_once() {
        let (extractor, calls) = FixedExtractor::new("quiero el tacho por favor");
        let (mut observer, sent) = observer_with(Arc::new(extractor));

        observer
            .process_batch(vec![TestItem::unread("<m1@x>"), TestItem::unread("<m1@x>")])
            .await;

        assert_eq!(*calls.lock().unwrap(), 1);
        assert_eq!(sent.lock().unwrap().len(), 1);

        // A later batch with the same identifier is also discarded.
        observer.process_batch(vec![TestItem::unread("<m1@x>")]).await;
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn read_items_are_never_extracted_nor_remembered() {
        let (extractor, calls) = FixedExtractor::new("tacho");
        let (mut observer, sent) = observer_with(Arc::new(extractor));

        observer.process_batch(vec![TestItem::read("<m2@x>")]).await;

        assert_eq!(*calls.lock().unwrap(), 0);
        assert!(sent.lock().unwrap().is_empty());
        assert_eq!(observer.seen_count(), 0);

        // The same item later observed unread still gets processed.
        observer.process_batch(vec![TestItem::unread("<m2@x>")]).await;
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn missing_identifier_skipped_without_marking() {
        let (extractor, calls) = FixedExtractor::new("tacho");
        let (mut observer, _sent) = observer_with(Arc::new(extractor));

        observer.process_batch(vec![TestItem::unread("")]).await;
        assert_eq!(*calls.lock().unwrap(), 0);
        assert_eq!(observer.seen_count(), 0);
    }

    #[tokio::test]
    async fn matching_body_dispatches_product_notification() {
        let (extractor, _calls) = FixedExtractor::new("hola, busco un tacho grande");
        let (mut observer, sent) = observer_with(Arc::new(extractor));

        observer.process_batch(vec![TestItem::unread("<m3@x>")]).await;

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].context.contains("Tacho 20L"));
    }

    #[tokio::test]
    async fn extraction_failure_falls_back_and_stays_seen() {
        let (mut observer, sent) = observer_with(Arc::new(FailingExtractor));

        observer.process_batch(vec![TestItem::unread("<m4@x>")]).await;

        {
            let sent = sent.lock().unwrap();
            assert_eq!(sent.len(), 1);
            assert!(sent[0].context.contains("no content"));
        }

        // Marked seen despite the failure: the item is never retried.
        assert_eq!(observer.seen_count(), 1);
        observer.process_batch(vec![TestItem::unread("<m4@x>")]).await;
        assert_eq!(sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn one_bad_item_does_not_block_the_next() {
        // First item fails extraction, second matches; both must dispatch.
        struct MixedExtractor;

        #[async_trait]
        impl MailExtractor<TestItem> for MixedExtractor {
            async fn extract(
                &self,
                item: &TestItem,
            ) -> Result<ExtractedMail, FeedError> {
                if item.id == "<bad@x>" {
                    Err(FeedError::Extraction {
                        id: item.id.clone(),
                        reason: "boom".into(),
                    })
                } else {
                    Ok(ExtractedMail {
                        sender: item.sender.clone(),
                        subject: item.subject.clone(),
                        body: "precio del tacho".into(),
                    })
                }
            }
        }

        let (mut observer, sent) = observer_with(Arc::new(MixedExtractor));
        observer
            .process_batch(vec![TestItem::unread("<bad@x>"), TestItem::unread("<ok@x>")])
            .await;

        assert_eq!(sent.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn stop_flag_halts_between_items() {
        let (extractor, calls) = FixedExtractor::new("tacho");
        let (mut observer, _sent) = observer_with(Arc::new(extractor));

        observer.stop_handle().store(true, Ordering::Relaxed);
        observer
            .process_batch(vec![TestItem::unread("<m5@x>"), TestItem::unread("<m6@x>")])
            .await;

        assert_eq!(*calls.lock().unwrap(), 0);
    }
}
