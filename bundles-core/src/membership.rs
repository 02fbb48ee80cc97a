//! Bundle editing and page membership.
//!
//! The surface the editorial layer calls directly: creating and saving
//! bundles (with release-date resolution and go-live propagation onto
//! member pages) and managing which pages a bundle contains. A page may
//! belong to at most one active bundle at a time.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::error::BundleError;
use crate::events::BundleEvent;
use crate::store::{BundleStore, ContentStore};
use crate::types::{Bundle, BundlePage, BundleStatus, DatasetLink};

/// De-duplicate ancillary link selections, keeping the first occurrence of
/// each URL. This applies to dataset/topic style sub-forms only; page
/// membership hard-fails on duplicates instead.
pub fn dedupe_links(links: Vec<DatasetLink>) -> Vec<DatasetLink> {
    let mut seen = std::collections::HashSet::new();
    links
        .into_iter()
        .filter(|link| seen.insert(link.url.clone()))
        .collect()
}

pub struct BundleEditor {
    store: Arc<dyn BundleStore>,
    content: Arc<dyn ContentStore>,
}

impl BundleEditor {
    pub fn new(store: Arc<dyn BundleStore>, content: Arc<dyn ContentStore>) -> Self {
        Self { store, content }
    }

    pub async fn create(
        &self,
        name: impl Into<String>,
        created_by: Option<Uuid>,
    ) -> Result<Bundle, BundleError> {
        let bundle = Bundle::new(name, created_by);
        self.store.save_bundle(&bundle).await?;
        self.store
            .append_event(bundle.id, &BundleEvent::Created { by: created_by })
            .await?;
        Ok(bundle)
    }

    /// Persist an edited bundle. Refreshes the resolved release date and,
    /// when it lies in the future, propagates it to each member page's
    /// go-live time so the pages and the bundle stay in lockstep.
    pub async fn save(&self, bundle: &mut Bundle) -> Result<(), BundleError> {
        let calendar_date = match bundle.release_calendar_page {
            Some(calendar) => self.content.release_date(calendar).await?,
            None => None,
        };
        bundle.release_date = bundle.scheduled_publication_date(calendar_date);
        self.store.save_bundle(bundle).await?;

        if bundle.status == BundleStatus::Released {
            return Ok(());
        }
        let Some(date) = bundle.release_date.filter(|d| *d >= Utc::now()) else {
            return Ok(());
        };
        for row in self.store.bundle_pages(bundle.id).await? {
            let Some(info) = self.content.page_info(row.page).await? else {
                continue;
            };
            if info.go_live_at == Some(date) {
                continue;
            }
            self.content.set_go_live(row.page, date).await?;
        }
        Ok(())
    }

    /// Add a page to a bundle. The bundle must be editable, the page must
    /// not already be in it, and the page must not belong to any other
    /// active bundle.
    pub async fn add_page(&self, bundle_id: Uuid, page: Uuid) -> Result<BundlePage, BundleError> {
        let bundle = self.editable_bundle(bundle_id).await?;

        if let Some(other) = self.store.find_active_bundle_for_page(page).await? {
            if other.id != bundle_id {
                return Err(BundleError::AlreadyInActiveBundle {
                    page,
                    bundle_name: other.name,
                });
            }
            // The active bundle holding the page is this one.
            return Err(BundleError::DuplicatePage { page });
        }

        let rows = self.store.bundle_pages(bundle_id).await?;
        if rows.iter().any(|row| row.page == page) {
            return Err(BundleError::DuplicatePage { page });
        }

        let row = BundlePage {
            bundle_id,
            page,
            sort_order: rows.last().map_or(0, |last| last.sort_order + 1),
        };
        self.store.add_page(&row).await?;
        self.store
            .append_event(bundle_id, &BundleEvent::PageAdded { page })
            .await?;
        info!(bundle = %bundle.name, %page, "page added to bundle");
        Ok(row)
    }

    /// Remove a page from an editable bundle. Idempotent when absent.
    pub async fn remove_page(&self, bundle_id: Uuid, page: Uuid) -> Result<(), BundleError> {
        self.editable_bundle(bundle_id).await?;

        let present = self
            .store
            .bundle_pages(bundle_id)
            .await?
            .iter()
            .any(|row| row.page == page);
        if !present {
            return Ok(());
        }
        self.store.remove_page(bundle_id, page).await?;
        self.store
            .append_event(bundle_id, &BundleEvent::PageRemoved { page })
            .await?;
        Ok(())
    }

    /// Page-side capability: is this page claimed by an active bundle?
    pub async fn in_active_bundle(&self, page: Uuid) -> Result<bool, BundleError> {
        Ok(self.store.find_active_bundle_for_page(page).await?.is_some())
    }

    /// Page-side capability: the active bundle claiming this page, if any.
    pub async fn active_bundle(&self, page: Uuid) -> Result<Option<Bundle>, BundleError> {
        Ok(self.store.find_active_bundle_for_page(page).await?)
    }

    async fn editable_bundle(&self, bundle_id: Uuid) -> Result<Bundle, BundleError> {
        let bundle = self
            .store
            .load_bundle(bundle_id)
            .await?
            .ok_or(BundleError::NotFound(bundle_id))?;
        if !bundle.is_editable() {
            return Err(BundleError::BundleNotEditable {
                status: bundle.status,
            });
        }
        Ok(bundle)
    }
}
