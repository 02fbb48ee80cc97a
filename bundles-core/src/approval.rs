//! Approval gate.
//!
//! The bundle status state machine. All editorial status changes flow
//! through [`ApprovalGate::request_transition`], which enforces the allowed
//! edges, self-approval prevention and per-page readiness, then persists
//! and emits a best-effort notification.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::error::BundleError;
use crate::events::BundleEvent;
use crate::notify::Notifier;
use crate::store::{BundleStore, ContentStore};
use crate::types::{Bundle, BundleStatus};

/// Whether `from -> to` is a legal status edge. `Released` is terminal.
fn transition_allowed(from: BundleStatus, to: BundleStatus) -> bool {
    use BundleStatus::*;
    matches!(
        (from, to),
        (Pending, InReview)
            | (InReview, Approved)
            | (Approved, Released)
            | (Approved, Pending)
            | (Approved, InReview)
    )
}

pub struct ApprovalGate {
    store: Arc<dyn BundleStore>,
    content: Arc<dyn ContentStore>,
    notifier: Arc<dyn Notifier>,
}

impl ApprovalGate {
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

    /// Move a bundle to `new_status` on behalf of `actor`.
    ///
    /// No-op (returning the unchanged bundle) when the status is already
    /// `new_status`. On any validation failure the bundle is left untouched.
    pub async fn request_transition(
        &self,
        bundle_id: Uuid,
        new_status: BundleStatus,
        actor: Uuid,
    ) -> Result<Bundle, BundleError> {
        let mut bundle = self
            .store
            .load_bundle(bundle_id)
            .await?
            .ok_or(BundleError::NotFound(bundle_id))?;

        let old_status = bundle.status;
        if old_status == new_status {
            return Ok(bundle);
        }

        if !transition_allowed(old_status, new_status) {
            return Err(BundleError::InvalidTransition {
                from: old_status,
                to: new_status,
            });
        }

        if new_status == BundleStatus::Approved {
            if bundle.created_by == Some(actor) {
                return Err(BundleError::SelfApproval);
            }
            let not_ready = self.pages_not_ready(bundle_id).await?;
            if !not_ready.is_empty() {
                return Err(BundleError::PagesNotReady { pages: not_ready });
            }
            bundle.approved_by = Some(actor);
            bundle.approved_at = Some(Utc::now());
        } else if old_status == BundleStatus::Approved {
            // Reverting an approval withdraws the approval metadata.
            bundle.approved_by = None;
            bundle.approved_at = None;
        }

        bundle.status = new_status;
        self.store.save_bundle(&bundle).await?;
        self.store
            .append_event(
                bundle_id,
                &BundleEvent::StatusChanged {
                    from: old_status,
                    to: new_status,
                    actor: Some(actor),
                },
            )
            .await?;

        info!(bundle = %bundle.name, from = %old_status, to = %new_status, "bundle status changed");

        let actor_label = actor.to_string();
        self.notifier
            .status_changed(&bundle, old_status.label(), Some(&actor_label))
            .await;

        Ok(bundle)
    }

    /// Titles of member pages whose external workflow is not at the
    /// ready-to-publish task. Unknown pages count as not ready.
    async fn pages_not_ready(&self, bundle_id: Uuid) -> Result<Vec<String>, BundleError> {
        let mut not_ready = Vec::new();
        for row in self.store.bundle_pages(bundle_id).await? {
            match self.content.page_info(row.page).await? {
                Some(info) if info.workflow_ready => {}
                Some(info) => not_ready.push(info.title),
                None => not_ready.push(row.page.to_string()),
            }
        }
        Ok(not_ready)
    }
}
