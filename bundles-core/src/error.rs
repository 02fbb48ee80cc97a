//! Error types for the bundle workflow.
//!
//! Validation errors are surfaced synchronously to the editorial caller and
//! reject the operation with no partial state change. Storage and content
//! failures are wrapped so callers can distinguish them from rule violations.

use thiserror::Error;
use uuid::Uuid;

use crate::types::BundleStatus;

#[derive(Error, Debug)]
pub enum BundleError {
    #[error("bundle {0} not found")]
    NotFound(Uuid),

    #[error("cannot move bundle from {from} to {to}")]
    InvalidTransition {
        from: BundleStatus,
        to: BundleStatus,
    },

    #[error("a bundle cannot be approved by its creator")]
    SelfApproval,

    #[error("pages not ready for publishing: {}", .pages.join(", "))]
    PagesNotReady { pages: Vec<String> },

    #[error("bundle is not editable in status {status}")]
    BundleNotEditable { status: BundleStatus },

    #[error("page {page} is already in this bundle")]
    DuplicatePage { page: Uuid },

    #[error("page {page} is already in an active bundle ('{bundle_name}')")]
    AlreadyInActiveBundle { page: Uuid, bundle_name: String },

    #[error("storage error: {0}")]
    Store(#[from] anyhow::Error),
}
