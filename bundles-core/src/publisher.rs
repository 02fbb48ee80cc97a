//! Publish runner.
//!
//! Invoked by the scheduler host on every tick: finds approved bundles
//! whose release date has passed and publishes them. Each bundle is
//! processed in isolation; one bundle's failure never prevents another
//! from publishing. A failed bundle stays `Approved` and is naturally
//! retried on the next tick, so a tick is safe to re-run (at-least-once).

use std::sync::Arc;
use std::time::Instant;

use anyhow::bail;
use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::error::BundleError;
use crate::events::BundleEvent;
use crate::notify::Notifier;
use crate::store::{BundleStore, ContentStore};
use crate::types::{Bundle, BundleStatus, CalendarEntry};

/// Outcome of one live runner tick.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub published: usize,
    pub failed: usize,
}

/// One bundle in a dry-run preview.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DryRunBundle {
    pub name: String,
    /// Member page title and type label, in publish order.
    pub pages: Vec<(String, String)>,
}

/// Read-only preview of what a live tick would act on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DryRunReport {
    pub bundles: Vec<DryRunBundle>,
}

impl std::fmt::Display for DryRunReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "---------------------------------")?;
        if self.bundles.is_empty() {
            return writeln!(f, "No bundles to go live.");
        }
        writeln!(f, "Bundles to be published:")?;
        for bundle in &self.bundles {
            writeln!(f, "- {}", bundle.name)?;
            let pages: Vec<String> = bundle
                .pages
                .iter()
                .map(|(title, kind)| format!("{title} ({kind})"))
                .collect();
            writeln!(f, "  Pages: {}", pages.join("\n\t "))?;
        }
        Ok(())
    }
}

pub struct PublishRunner {
    store: Arc<dyn BundleStore>,
    content: Arc<dyn ContentStore>,
    notifier: Arc<dyn Notifier>,
}

impl PublishRunner {
    pub fn new(
        store: Arc<dyn BundleStore>,
        content: Arc<dyn ContentStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            content,
            notifier,
        }
    }

    /// One live tick: publish every due bundle. Per-bundle failures are
    /// logged and counted, never raised.
    pub async fn run(&self, now: DateTime<Utc>) -> Result<RunReport, BundleError> {
        let due = self.store.find_due_bundles(now).await?;
        let mut report = RunReport::default();

        for bundle in due {
            match self.publish_bundle(&bundle).await {
                Ok(pages) => {
                    info!(bundle_id = %bundle.id, bundle = %bundle.name, pages, "bundle published");
                    report.published += 1;
                }
                Err(e) => {
                    error!(bundle_id = %bundle.id, bundle = %bundle.name, error = %e, "bundle publication failed");
                    if let Err(log_err) = self
                        .store
                        .append_event(
                            bundle.id,
                            &BundleEvent::PublishFailed {
                                error: e.to_string(),
                            },
                        )
                        .await
                    {
                        warn!(bundle_id = %bundle.id, error = %log_err, "could not record publish failure");
                    }
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    /// Publish one bundle: promote each member page's scheduled revision,
    /// refresh and publish the release calendar entry, then flip the bundle
    /// to `Released`.
    ///
    /// Page publishes are independently idempotent, so every page is
    /// attempted even when an earlier one fails; the bundle is only
    /// released when all of them succeeded.
    async fn publish_bundle(&self, bundle: &Bundle) -> anyhow::Result<usize> {
        let started = Instant::now();
        let rows = self.store.bundle_pages(bundle.id).await?;

        self.notifier.publish_started(bundle, rows.len()).await;

        let mut entries = Vec::with_capacity(rows.len());
        let mut failures: Vec<String> = Vec::new();
        for row in &rows {
            let Some(info) = self.content.page_info(row.page).await? else {
                failures.push(format!("page {} not found", row.page));
                continue;
            };
            if info.has_scheduled_revision {
                if let Err(e) = self.content.publish_scheduled_revision(row.page).await {
                    error!(bundle_id = %bundle.id, page = %row.page, error = %e, "page publish failed");
                    failures.push(format!("{}: {e}", info.title));
                    continue;
                }
            }
            entries.push(CalendarEntry {
                page: info.id,
                title: info.title,
                kind: info.kind,
            });
        }
        if !failures.is_empty() {
            bail!(
                "{} of {} pages failed to publish: {}",
                failures.len(),
                rows.len(),
                failures.join("; ")
            );
        }

        if let Some(calendar) = bundle.release_calendar_page {
            self.content
                .update_release_calendar(calendar, &entries, &bundle.datasets)
                .await?;
        }

        let mut released = bundle.clone();
        released.status = BundleStatus::Released;
        self.store.save_bundle(&released).await?;

        let elapsed = started.elapsed();
        self.store
            .append_event(
                bundle.id,
                &BundleEvent::Published {
                    pages: rows.len(),
                    elapsed_ms: elapsed.as_millis() as u64,
                },
            )
            .await?;

        self.notifier
            .publish_finished(&released, rows.len(), elapsed)
            .await;

        Ok(rows.len())
    }

    /// Preview what [`run`](Self::run) would act on, mutating nothing: no
    /// status changes, no notifications, no events.
    pub async fn dry_run(&self, now: DateTime<Utc>) -> Result<DryRunReport, BundleError> {
        let due = self.store.find_due_bundles(now).await?;
        let mut report = DryRunReport::default();

        for bundle in due {
            let mut pages = Vec::new();
            for row in self.store.bundle_pages(bundle.id).await? {
                match self.content.page_info(row.page).await? {
                    Some(info) => pages.push((info.title, info.kind)),
                    None => pages.push((row.page.to_string(), "unknown".to_string())),
                }
            }
            report.bundles.push(DryRunBundle {
                name: bundle.name.clone(),
                pages,
            });
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryContent, MemoryStore};
    use crate::notify::{RecordingNotifier, SentNotification};
    use crate::types::{BundlePage, PageInfo};
    use chrono::Duration;
    use uuid::Uuid;

    struct Fixture {
        store: Arc<MemoryStore>,
        content: Arc<MemoryContent>,
        notifier: Arc<RecordingNotifier>,
        runner: PublishRunner,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let content = Arc::new(MemoryContent::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let runner = PublishRunner::new(store.clone(), content.clone(), notifier.clone());
        Fixture {
            store,
            content,
            notifier,
            runner,
        }
    }

    fn pending_page(title: &str) -> PageInfo {
        PageInfo {
            id: Uuid::new_v4(),
            title: title.to_string(),
            kind: "BulletinPage".to_string(),
            live: false,
            go_live_at: Some(Utc::now() - Duration::hours(1)),
            expire_at: None,
            has_scheduled_revision: true,
            workflow_ready: true,
        }
    }

    async fn due_bundle(fx: &Fixture, name: &str, pages: &[PageInfo]) -> Bundle {
        let mut bundle = Bundle::new(name, None);
        bundle.status = BundleStatus::Approved;
        bundle.release_date = Some(Utc::now() - Duration::days(1));
        fx.store.save_bundle(&bundle).await.unwrap();
        for (order, info) in pages.iter().enumerate() {
            fx.content.insert_page(info.clone()).await;
            fx.store
                .add_page(&BundlePage {
                    bundle_id: bundle.id,
                    page: info.id,
                    sort_order: order as u32,
                })
                .await
                .unwrap();
        }
        bundle
    }

    #[tokio::test]
    async fn test_due_bundle_published_end_to_end() {
        let fx = fixture();
        let pages = [pending_page("Bulletin one"), pending_page("Bulletin two")];
        let bundle = due_bundle(&fx, "Labour market", &pages).await;

        let report = fx.runner.run(Utc::now()).await.unwrap();
        assert_eq!(report, RunReport { published: 1, failed: 0 });

        // Both pages live, in sort order.
        assert_eq!(
            fx.content.published().await,
            vec![pages[0].id, pages[1].id]
        );
        let stored = fx.store.load_bundle(bundle.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BundleStatus::Released);

        // Exactly one start and one finish notification.
        assert_eq!(
            fx.notifier.sent().await,
            vec![
                SentNotification::PublishStarted {
                    bundle: "Labour market".to_string(),
                    pages: 2,
                },
                SentNotification::PublishFinished {
                    bundle: "Labour market".to_string(),
                    pages: 2,
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_release_calendar_updated_and_published() {
        let fx = fixture();
        let pages = [pending_page("Bulletin")];
        let mut bundle = due_bundle(&fx, "With calendar", &pages).await;

        let calendar = Uuid::new_v4();
        fx.content
            .insert_calendar(calendar, Utc::now() - Duration::days(1))
            .await;
        bundle.release_calendar_page = Some(calendar);
        bundle.datasets = vec![crate::types::DatasetLink {
            url: "https://data.example/series".to_string(),
            title: "Series".to_string(),
            description: String::new(),
        }];
        fx.store.save_bundle(&bundle).await.unwrap();

        fx.runner.run(Utc::now()).await.unwrap();

        let cal = fx.content.calendar(calendar).await.unwrap();
        assert!(cal.live);
        assert_eq!(cal.status, crate::types::CalendarStatus::Published);
        assert_eq!(cal.entries.len(), 1);
        assert_eq!(cal.entries[0].title, "Bulletin");
        assert_eq!(cal.datasets.len(), 1);
    }

    #[tokio::test]
    async fn test_page_failure_leaves_bundle_approved() {
        let fx = fixture();
        let pages = [pending_page("Failing"), pending_page("Healthy")];
        let bundle = due_bundle(&fx, "Partial", &pages).await;
        fx.content.fail_page(pages[0].id).await;

        let report = fx.runner.run(Utc::now()).await.unwrap();
        assert_eq!(report, RunReport { published: 0, failed: 1 });

        // The healthy page still went out; the bundle stays approved for
        // retry on the next tick.
        assert_eq!(fx.content.published().await, vec![pages[1].id]);
        let stored = fx.store.load_bundle(bundle.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BundleStatus::Approved);

        let events = fx.store.read_events(bundle.id).await.unwrap();
        assert!(events
            .iter()
            .any(|r| matches!(r.event, BundleEvent::PublishFailed { .. })));
    }

    #[tokio::test]
    async fn test_failure_does_not_block_other_bundles() {
        let fx = fixture();
        let bad_pages = [pending_page("Broken")];
        let good_pages = [pending_page("Fine")];
        due_bundle(&fx, "Bad", &bad_pages).await;
        let good = due_bundle(&fx, "Good", &good_pages).await;
        fx.content.fail_page(bad_pages[0].id).await;

        let report = fx.runner.run(Utc::now()).await.unwrap();
        assert_eq!(report, RunReport { published: 1, failed: 1 });
        assert_eq!(
            fx.store
                .load_bundle(good.id)
                .await
                .unwrap()
                .unwrap()
                .status,
            BundleStatus::Released
        );
    }

    #[tokio::test]
    async fn test_second_run_is_idempotent() {
        let fx = fixture();
        let pages = [pending_page("Once")];
        due_bundle(&fx, "Once only", &pages).await;

        fx.runner.run(Utc::now()).await.unwrap();
        let report = fx.runner.run(Utc::now()).await.unwrap();
        assert_eq!(report, RunReport::default());
        // No second publish of the page either.
        assert_eq!(fx.content.published().await.len(), 1);
    }

    #[tokio::test]
    async fn test_dry_run_mutates_nothing() {
        let fx = fixture();
        let pages = [pending_page("Previewed")];
        let bundle = due_bundle(&fx, "Preview", &pages).await;

        let report = fx.runner.dry_run(Utc::now()).await.unwrap();
        assert_eq!(report.bundles.len(), 1);
        assert_eq!(
            report.bundles[0].pages,
            vec![("Previewed".to_string(), "BulletinPage".to_string())]
        );

        let stored = fx.store.load_bundle(bundle.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BundleStatus::Approved);
        assert!(stored.approved_at.is_none());
        assert!(fx.content.published().await.is_empty());
        assert!(fx.notifier.sent().await.is_empty());
        assert_eq!(fx.store.bundle_pages(bundle.id).await.unwrap().len(), 1);

        let rendered = report.to_string();
        assert!(rendered.contains("Bundles to be published:"));
        assert!(rendered.contains("- Preview"));
    }

    #[tokio::test]
    async fn test_dry_run_with_empty_due_set() {
        let fx = fixture();
        let report = fx.runner.dry_run(Utc::now()).await.unwrap();
        assert!(report.to_string().contains("No bundles to go live."));
    }
}
