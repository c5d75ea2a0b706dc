//! Content creation and the approval workflow

use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::db::Store;
use crate::error::{PostflowError, Result};
use crate::types::{ApprovalRecord, ContentItem, NewContent};
use crate::workflow::{ApprovalWorkflow, TransitionRequest};

/// Maximum title length in characters
pub const MAX_TITLE_LENGTH: usize = 500;

/// Content service
///
/// Creates drafts and moves them through review. Every accepted transition
/// leaves an approval record behind.
#[derive(Clone)]
pub struct ContentService {
    store: Arc<dyn Store>,
    workflow: Arc<ApprovalWorkflow>,
}

impl ContentService {
    pub fn new(store: Arc<dyn Store>, workflow: Arc<ApprovalWorkflow>) -> Self {
        Self { store, workflow }
    }

    /// Create a content item in `draft`
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for an empty or over-long title, or when no
    /// target platform is given.
    pub async fn create(&self, new: NewContent, created_by: Uuid) -> Result<ContentItem> {
        validate_new_content(&new)?;

        let content = ContentItem::new_draft(new, created_by);
        self.store.insert_content(&content).await?;

        info!(
            content_id = %content.id,
            client_id = %content.client_id,
            content_type = %content.content_type,
            "Content created"
        );
        Ok(content)
    }

    /// Get a content item by ID
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the content does not exist.
    pub async fn get(&self, id: Uuid) -> Result<ContentItem> {
        self.store
            .get_content(id)
            .await?
            .ok_or_else(|| PostflowError::NotFound(format!("content {}", id)))
    }

    /// Request a status change on behalf of an actor
    pub async fn request_transition(
        &self,
        content_id: Uuid,
        request: TransitionRequest,
    ) -> Result<ContentItem> {
        let (content, _record) = self
            .workflow
            .request_transition(content_id, request)
            .await?;
        Ok(content)
    }

    /// Approval history for a content item, newest first
    pub async fn approvals(&self, content_id: Uuid) -> Result<Vec<ApprovalRecord>> {
        self.get(content_id).await?;
        self.store.list_approvals(content_id).await
    }
}

fn validate_new_content(new: &NewContent) -> Result<()> {
    if new.title.trim().is_empty() {
        return Err(PostflowError::InvalidInput(
            "Title cannot be empty".to_string(),
        ));
    }

    let length = new.title.chars().count();
    if length > MAX_TITLE_LENGTH {
        return Err(PostflowError::InvalidInput(format!(
            "Title is {} characters, the maximum is {}",
            length, MAX_TITLE_LENGTH
        )));
    }

    if new.target_platforms.is_empty() {
        return Err(PostflowError::InvalidInput(
            "At least one target platform is required".to_string(),
        ));
    }

    if new.target_platforms.iter().any(|p| p.trim().is_empty()) {
        return Err(PostflowError::InvalidInput(
            "Target platform names cannot be empty".to_string(),
        ));
    }

    Ok(())
}
