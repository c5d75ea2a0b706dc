//! History service for querying publishing logs
//!
//! Read-only views for operators: the logs of one content item, the queue
//! of work not yet finished and the paginated history.

use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::db::{HistoryFilter, Store};
use crate::error::{PostflowError, Result};
use crate::types::PublishingLog;

/// Largest page the history views hand out
pub const MAX_PER_PAGE: u32 = 100;

/// One page of publishing logs
#[derive(Debug, Clone, Serialize)]
pub struct LogPage {
    pub logs: Vec<PublishingLog>,
    pub total: u64,
    pub page: u32,
    pub per_page: u32,
}

impl LogPage {
    pub fn total_pages(&self) -> u64 {
        self.total.div_ceil(u64::from(self.per_page))
    }
}

#[derive(Clone)]
pub struct HistoryService {
    store: Arc<dyn Store>,
}

impl HistoryService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Every log created for a content item
    pub async fn logs_for_content(&self, content_id: Uuid) -> Result<Vec<PublishingLog>> {
        self.store.logs_for_content(content_id).await
    }

    /// Pending and in-flight logs, soonest first
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for page 0 or a page size outside
    /// `1..=MAX_PER_PAGE`.
    pub async fn queue(&self, page: u32, per_page: u32) -> Result<LogPage> {
        validate_page(page, per_page)?;
        let (logs, total) = self.store.publishing_queue(page, per_page).await?;
        Ok(LogPage {
            logs,
            total,
            page,
            per_page,
        })
    }

    /// All logs matching `filter`, newest first
    pub async fn history(
        &self,
        filter: &HistoryFilter,
        page: u32,
        per_page: u32,
    ) -> Result<LogPage> {
        validate_page(page, per_page)?;
        let (logs, total) = self
            .store
            .publishing_history(filter, page, per_page)
            .await?;
        Ok(LogPage {
            logs,
            total,
            page,
            per_page,
        })
    }
}

fn validate_page(page: u32, per_page: u32) -> Result<()> {
    if page == 0 {
        return Err(PostflowError::InvalidInput(
            "Pages are numbered from 1".to_string(),
        ));
    }
    if per_page == 0 || per_page > MAX_PER_PAGE {
        return Err(PostflowError::InvalidInput(format!(
            "Page size must be between 1 and {}",
            MAX_PER_PAGE
        )));
    }
    Ok(())
}
