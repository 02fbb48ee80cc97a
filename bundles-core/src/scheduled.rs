//! Standalone scheduled content runner.
//!
//! Handles scheduled content that is *not* part of any bundle: unpublishes
//! live pages whose expiry timestamp has passed, and publishes revisions
//! whose approved go-live time has arrived. Pages claimed by an active
//! bundle are left alone; the publish runner owns those.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info};

use crate::error::BundleError;
use crate::store::{BundleStore, ContentStore};
use crate::types::{PageInfo, RevisionInfo};

/// Outcome of one live standalone tick.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScheduledRunReport {
    pub unpublished: usize,
    pub published: usize,
    pub failed: usize,
}

/// Read-only preview of what a standalone tick would do.
#[derive(Debug, Default, Clone)]
pub struct ScheduledDryRun {
    pub expired: Vec<PageInfo>,
    pub revisions: Vec<RevisionInfo>,
}

impl std::fmt::Display for ScheduledDryRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "---------------------------------")?;
        if self.expired.is_empty() {
            writeln!(f, "No expired objects to be deactivated found.")?;
        } else {
            writeln!(f, "Expired objects to be deactivated:")?;
            writeln!(f, "Expiry datetime\t\tModel\t\tName")?;
            writeln!(f, "---------------\t\t-----\t\t----")?;
            for page in &self.expired {
                let expiry = page
                    .expire_at
                    .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_default();
                writeln!(f, "{expiry}\t{}\t{}", page.kind, page.title)?;
            }
        }
        writeln!(f, "---------------------------------")?;
        if self.revisions.is_empty() {
            writeln!(f, "No objects to go live.")?;
        } else {
            writeln!(f, "Revisions to be published:")?;
            writeln!(f, "Go live datetime\tModel\t\tSlug\t\tName")?;
            writeln!(f, "----------------\t-----\t\t----\t\t----")?;
            for rev in &self.revisions {
                writeln!(
                    f,
                    "{}\t{}\t{}\t\t{}",
                    rev.go_live_at.format("%Y-%m-%d %H:%M"),
                    rev.kind,
                    rev.slug,
                    rev.title
                )?;
            }
        }
        Ok(())
    }
}

pub struct ScheduledContentRunner {
    store: Arc<dyn BundleStore>,
    content: Arc<dyn ContentStore>,
}

impl ScheduledContentRunner {
    pub fn new(store: Arc<dyn BundleStore>, content: Arc<dyn ContentStore>) -> Self {
        Self { store, content }
    }

    /// One live tick: unpublish expired pages, then publish due revisions
    /// for pages outside any active bundle. Individual failures are logged
    /// and counted, never raised.
    pub async fn run(&self, now: DateTime<Utc>) -> Result<ScheduledRunReport, BundleError> {
        let mut report = ScheduledRunReport::default();

        for page in self.content.expired_pages(now).await? {
            match self.content.unpublish(page.id).await {
                Ok(()) => {
                    info!(page = %page.id, title = %page.title, "expired page unpublished");
                    report.unpublished += 1;
                }
                Err(e) => {
                    error!(page = %page.id, error = %e, "unpublish failed");
                    report.failed += 1;
                }
            }
        }

        for rev in self.due_standalone_revisions(now).await? {
            match self.content.publish_scheduled_revision(rev.page).await {
                Ok(()) => {
                    info!(page = %rev.page, title = %rev.title, "scheduled revision published");
                    report.published += 1;
                }
                Err(e) => {
                    error!(page = %rev.page, error = %e, "revision publish failed");
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    pub async fn dry_run(&self, now: DateTime<Utc>) -> Result<ScheduledDryRun, BundleError> {
        Ok(ScheduledDryRun {
            expired: self.content.expired_pages(now).await?,
            revisions: self.due_standalone_revisions(now).await?,
        })
    }

    /// Due revisions whose page is not claimed by an active bundle.
    async fn due_standalone_revisions(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<RevisionInfo>, BundleError> {
        let mut standalone = Vec::new();
        for rev in self.content.due_revisions(now).await? {
            if self
                .store
                .find_active_bundle_for_page(rev.page)
                .await?
                .is_none()
            {
                standalone.push(rev);
            }
        }
        Ok(standalone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryContent, MemoryStore};
    use crate::types::{Bundle, BundlePage, BundleStatus};
    use chrono::Duration;
    use uuid::Uuid;

    fn runner() -> (Arc<MemoryStore>, Arc<MemoryContent>, ScheduledContentRunner) {
        let store = Arc::new(MemoryStore::new());
        let content = Arc::new(MemoryContent::new());
        let runner = ScheduledContentRunner::new(store.clone(), content.clone());
        (store, content, runner)
    }

    fn live_page(title: &str, expire_at: Option<DateTime<Utc>>) -> PageInfo {
        PageInfo {
            id: Uuid::new_v4(),
            title: title.to_string(),
            kind: "ArticlePage".to_string(),
            live: true,
            go_live_at: None,
            expire_at,
            has_scheduled_revision: false,
            workflow_ready: true,
        }
    }

    fn revision(page: Uuid, title: &str, go_live_at: DateTime<Utc>) -> RevisionInfo {
        RevisionInfo {
            page,
            title: title.to_string(),
            kind: "ArticlePage".to_string(),
            slug: title.to_lowercase().replace(' ', "-"),
            go_live_at,
        }
    }

    #[tokio::test]
    async fn test_expired_pages_unpublished() {
        let (_store, content, runner) = runner();
        let now = Utc::now();
        let expired = live_page("Old article", Some(now - Duration::hours(2)));
        let current = live_page("Current article", Some(now + Duration::hours(2)));
        content.insert_page(expired.clone()).await;
        content.insert_page(current.clone()).await;

        let report = runner.run(now).await.unwrap();
        assert_eq!(report.unpublished, 1);
        assert_eq!(content.unpublished().await, vec![expired.id]);
        assert!(content.page(current.id).await.unwrap().live);
    }

    #[tokio::test]
    async fn test_bundled_pages_skipped() {
        let (store, content, runner) = runner();
        let now = Utc::now();

        let standalone = live_page("Standalone", None);
        let bundled = live_page("Bundled", None);
        content.insert_page(standalone.clone()).await;
        content.insert_page(bundled.clone()).await;
        content
            .insert_revision(revision(standalone.id, "Standalone", now - Duration::hours(1)))
            .await;
        content
            .insert_revision(revision(bundled.id, "Bundled", now - Duration::hours(1)))
            .await;

        let mut bundle = Bundle::new("Owns the page", None);
        bundle.status = BundleStatus::Approved;
        store.save_bundle(&bundle).await.unwrap();
        store
            .add_page(&BundlePage {
                bundle_id: bundle.id,
                page: bundled.id,
                sort_order: 0,
            })
            .await
            .unwrap();

        let report = runner.run(now).await.unwrap();
        assert_eq!(report.published, 1);
        assert_eq!(content.published().await, vec![standalone.id]);
    }

    #[tokio::test]
    async fn test_released_bundle_releases_its_pages() {
        let (store, content, runner) = runner();
        let now = Utc::now();
        let page = live_page("Freed", None);
        content.insert_page(page.clone()).await;
        content
            .insert_revision(revision(page.id, "Freed", now - Duration::hours(1)))
            .await;

        let mut bundle = Bundle::new("Done", None);
        bundle.status = BundleStatus::Released;
        store.save_bundle(&bundle).await.unwrap();
        store
            .add_page(&BundlePage {
                bundle_id: bundle.id,
                page: page.id,
                sort_order: 0,
            })
            .await
            .unwrap();

        let report = runner.run(now).await.unwrap();
        assert_eq!(report.published, 1);
    }

    #[tokio::test]
    async fn test_dry_run_reports_without_mutation() {
        let (_store, content, runner) = runner();
        let now = Utc::now();
        let expired = live_page("Expiring", Some(now - Duration::minutes(5)));
        content.insert_page(expired.clone()).await;
        let page = live_page("Pending rev", None);
        content.insert_page(page.clone()).await;
        content
            .insert_revision(revision(page.id, "Pending rev", now - Duration::minutes(5)))
            .await;

        let preview = runner.dry_run(now).await.unwrap();
        assert_eq!(preview.expired.len(), 1);
        assert_eq!(preview.revisions.len(), 1);
        assert!(content.unpublished().await.is_empty());
        assert!(content.published().await.is_empty());

        let rendered = preview.to_string();
        assert!(rendered.contains("Expired objects to be deactivated:"));
        assert!(rendered.contains("Revisions to be published:"));
    }
}
