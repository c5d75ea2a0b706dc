//! Role-gated approval workflow
//!
//! Content moves `draft -> review -> client_review -> approved` with
//! `rejected` as the way back to `draft`. Which role may take which step is
//! fixed by [`TransitionTable`]. Managers and admins can push urgent content
//! past the table (the urgent override), but nobody moves content out of
//! `published` and nobody but the dispatcher moves it into `published`.

use chrono::Utc;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::Store;
use crate::error::{PostflowError, Result};
use crate::types::{Actor, ApprovalRecord, ContentItem, ContentStatus, Role};

/// `(role, from, [to...])` rows for the normal workflow
const RULES: &[(Role, ContentStatus, &[ContentStatus])] = &[
    (Role::Operator, ContentStatus::Draft, &[ContentStatus::Review]),
    (
        Role::Manager,
        ContentStatus::Review,
        &[ContentStatus::ClientReview, ContentStatus::Rejected],
    ),
    (Role::Manager, ContentStatus::ClientReview, &[ContentStatus::Rejected]),
    (Role::Manager, ContentStatus::Rejected, &[ContentStatus::Draft]),
    (
        Role::Client,
        ContentStatus::ClientReview,
        &[ContentStatus::Approved, ContentStatus::Rejected],
    ),
    (Role::Admin, ContentStatus::Draft, &[ContentStatus::Review]),
    (
        Role::Admin,
        ContentStatus::Review,
        &[ContentStatus::ClientReview, ContentStatus::Rejected],
    ),
    (Role::Admin, ContentStatus::ClientReview, &[ContentStatus::Rejected]),
    (Role::Admin, ContentStatus::Rejected, &[ContentStatus::Draft]),
];

/// Allowed transitions keyed by `(role, current status)`
#[derive(Debug, Clone)]
pub struct TransitionTable {
    allowed: HashMap<(Role, ContentStatus), BTreeSet<ContentStatus>>,
}

impl TransitionTable {
    /// Build the standard table and check it
    pub fn standard() -> Result<Self> {
        let mut allowed: HashMap<(Role, ContentStatus), BTreeSet<ContentStatus>> = HashMap::new();

        // Every pair gets an entry, even if empty, so lookups never miss
        for role in Role::ALL {
            for status in ContentStatus::ALL {
                allowed.insert((role, status), BTreeSet::new());
            }
        }

        for (role, from, targets) in RULES {
            let entry = allowed.entry((*role, *from)).or_default();
            for to in *targets {
                if !entry.insert(*to) {
                    return Err(PostflowError::InvalidState(format!(
                        "duplicate workflow rule: {} {} -> {}",
                        role, from, to
                    )));
                }
            }
        }

        let table = Self { allowed };
        table.validate()?;
        Ok(table)
    }

    /// Reject tables that are incomplete or that let a human publish
    pub fn validate(&self) -> Result<()> {
        for role in Role::ALL {
            for status in ContentStatus::ALL {
                let targets = self.allowed.get(&(role, status)).ok_or_else(|| {
                    PostflowError::InvalidState(format!(
                        "workflow table has no entry for {} in {}",
                        role, status
                    ))
                })?;

                if status.is_terminal() && !targets.is_empty() {
                    return Err(PostflowError::InvalidState(format!(
                        "workflow table lets {} leave terminal status {}",
                        role, status
                    )));
                }
                if targets.contains(&ContentStatus::Published) {
                    return Err(PostflowError::InvalidState(format!(
                        "workflow table lets {} publish directly from {}",
                        role, status
                    )));
                }
                if targets.contains(&status) {
                    return Err(PostflowError::InvalidState(format!(
                        "workflow table has a self-transition for {} in {}",
                        role, status
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn is_allowed(&self, role: Role, from: ContentStatus, to: ContentStatus) -> bool {
        self.allowed
            .get(&(role, from))
            .map(|targets| targets.contains(&to))
            .unwrap_or(false)
    }

    /// Targets reachable by `role` from `from` without the urgent override
    pub fn targets(&self, role: Role, from: ContentStatus) -> BTreeSet<ContentStatus> {
        self.allowed.get(&(role, from)).cloned().unwrap_or_default()
    }
}

/// A transition request from an authenticated actor
#[derive(Debug, Clone)]
pub struct TransitionRequest {
    pub actor: Actor,
    pub to_status: ContentStatus,
    pub comment: Option<String>,
    pub is_urgent: bool,
}

/// Decide a transition without touching storage
///
/// Returns the updated content and the audit record to append, or
/// `InvalidTransition` naming the role and status pair.
pub fn decide(
    table: &TransitionTable,
    content: &ContentItem,
    request: &TransitionRequest,
) -> Result<(ContentItem, ApprovalRecord)> {
    let from = content.status;
    let to = request.to_status;
    let role = request.actor.role;

    let rejected = PostflowError::InvalidTransition { role, from, to };

    // Published belongs to the dispatcher in both directions
    if from.is_terminal() || to == ContentStatus::Published {
        return Err(rejected);
    }

    let overridden = request.is_urgent && role.can_override();
    if !overridden && !table.is_allowed(role, from, to) {
        return Err(rejected);
    }

    let now = Utc::now();
    let mut updated = content.clone();
    updated.status = to;
    if to == ContentStatus::Approved {
        updated.approved_at = Some(now);
        updated.approved_by = Some(request.actor.id);
    }

    let record = ApprovalRecord {
        id: Uuid::new_v4(),
        content_id: content.id,
        from_status: from,
        to_status: to,
        reviewer_id: request.actor.id,
        comment: request.comment.clone(),
        is_urgent: request.is_urgent,
        created_at: now,
    };

    Ok((updated, record))
}

/// Applies transitions against a [`Store`]
pub struct ApprovalWorkflow {
    store: Arc<dyn Store>,
    table: TransitionTable,
}

impl ApprovalWorkflow {
    pub fn new(store: Arc<dyn Store>) -> Result<Self> {
        Ok(Self {
            store,
            table: TransitionTable::standard()?,
        })
    }

    pub fn table(&self) -> &TransitionTable {
        &self.table
    }

    /// Validate, apply and record a status transition
    ///
    /// # Errors
    ///
    /// - `NotFound` if the content does not exist
    /// - `InvalidTransition` if the role may not make this move
    /// - `InvalidState` if another reviewer changed the status first
    pub async fn request_transition(
        &self,
        content_id: Uuid,
        request: TransitionRequest,
    ) -> Result<(ContentItem, ApprovalRecord)> {
        let content = self
            .store
            .get_content(content_id)
            .await?
            .ok_or_else(|| PostflowError::NotFound(format!("content {}", content_id)))?;

        let (updated, record) = match decide(&self.table, &content, &request) {
            Ok(decision) => decision,
            Err(e) => {
                warn!(
                    content_id = %content_id,
                    role = %request.actor.role,
                    from = %content.status,
                    to = %request.to_status,
                    "Rejected workflow transition"
                );
                return Err(e);
            }
        };

        let applied = self
            .store
            .apply_transition(&updated, content.status, &record)
            .await?;
        if !applied {
            return Err(PostflowError::InvalidState(format!(
                "content {} changed status while the transition was being applied",
                content_id
            )));
        }

        let overridden = record.is_urgent
            && !self
                .table
                .is_allowed(request.actor.role, record.from_status, record.to_status);
        if overridden {
            warn!(
                content_id = %content_id,
                actor = %request.actor.id,
                role = %request.actor.role,
                from = %record.from_status,
                to = %record.to_status,
                "Urgent override bypassed the approval workflow"
            );
        } else {
            info!(
                content_id = %content_id,
                from = %record.from_status,
                to = %record.to_status,
                "Content status changed"
            );
        }

        Ok((updated, record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::types::{ContentType, NewContent};
    use tempfile::TempDir;

    fn content_in(status: ContentStatus) -> ContentItem {
        let mut content = ContentItem::new_draft(
            NewContent {
                client_id: Uuid::new_v4(),
                title: "Weekly roundup".to_string(),
                body: None,
                content_type: ContentType::CardNews,
                target_platforms: ["facebook".to_string()].into_iter().collect(),
                scheduled_at: None,
            },
            Uuid::new_v4(),
        );
        content.status = status;
        content
    }

    fn request(role: Role, to: ContentStatus, is_urgent: bool) -> TransitionRequest {
        TransitionRequest {
            actor: Actor::new(Uuid::new_v4(), role),
            to_status: to,
            comment: None,
            is_urgent,
        }
    }

    fn expected_allowed(role: Role, from: ContentStatus, to: ContentStatus) -> bool {
        use ContentStatus::*;
        let operator = matches!((from, to), (Draft, Review));
        let manager = matches!(
            (from, to),
            (Review, ClientReview) | (Review, Rejected) | (ClientReview, Rejected) | (Rejected, Draft)
        );
        let client = matches!((from, to), (ClientReview, Approved) | (ClientReview, Rejected));
        match role {
            Role::Operator => operator,
            Role::Manager => manager,
            Role::Client => client,
            Role::Admin => operator || manager,
        }
    }

    #[test]
    fn test_standard_table_is_valid() {
        let table = TransitionTable::standard().unwrap();
        assert!(table.validate().is_ok());
    }

    #[test]
    fn test_admin_is_union_of_operator_and_manager() {
        let table = TransitionTable::standard().unwrap();
        for status in ContentStatus::ALL {
            let mut union = table.targets(Role::Operator, status);
            union.extend(table.targets(Role::Manager, status));
            assert_eq!(table.targets(Role::Admin, status), union, "from {}", status);
        }
    }

    #[test]
    fn test_every_role_status_pair_matches_the_rules() {
        let table = TransitionTable::standard().unwrap();

        for role in Role::ALL {
            for from in ContentStatus::ALL {
                for to in ContentStatus::ALL {
                    let content = content_in(from);
                    let result = decide(&table, &content, &request(role, to, false));

                    if expected_allowed(role, from, to) {
                        let (updated, record) = result.unwrap_or_else(|e| {
                            panic!("{} {} -> {} should pass: {}", role, from, to, e)
                        });
                        assert_eq!(updated.status, to);
                        assert_eq!(record.from_status, from);
                        assert_eq!(record.to_status, to);
                        assert!(!record.is_urgent);
                    } else {
                        match result {
                            Err(PostflowError::InvalidTransition {
                                role: r,
                                from: f,
                                to: t,
                            }) => {
                                assert_eq!((r, f, t), (role, from, to));
                            }
                            other => panic!(
                                "{} {} -> {} should be rejected, got {:?}",
                                role, from, to, other
                            ),
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_urgent_override_for_manager_and_admin() {
        let table = TransitionTable::standard().unwrap();

        for role in [Role::Manager, Role::Admin] {
            for from in ContentStatus::ALL {
                for to in ContentStatus::ALL {
                    let result = decide(&table, &content_in(from), &request(role, to, true));
                    let blocked = from == ContentStatus::Published || to == ContentStatus::Published;
                    assert_eq!(
                        result.is_ok(),
                        !blocked,
                        "urgent {} {} -> {}",
                        role,
                        from,
                        to
                    );
                    if let Ok((_, record)) = result {
                        assert!(record.is_urgent);
                    }
                }
            }
        }
    }

    #[test]
    fn test_urgent_flag_does_not_help_operator_or_client() {
        let table = TransitionTable::standard().unwrap();
        let content = content_in(ContentStatus::Draft);

        for role in [Role::Operator, Role::Client] {
            let result = decide(&table, &content, &request(role, ContentStatus::Approved, true));
            assert!(matches!(result, Err(PostflowError::InvalidTransition { .. })));
        }
    }

    #[test]
    fn test_approval_stamps_approver() {
        let table = TransitionTable::standard().unwrap();
        let content = content_in(ContentStatus::ClientReview);
        let req = request(Role::Client, ContentStatus::Approved, false);

        let (updated, _) = decide(&table, &content, &req).unwrap();
        assert_eq!(updated.approved_by, Some(req.actor.id));
        assert!(updated.approved_at.is_some());
    }

    async fn setup_workflow() -> (TempDir, Arc<Database>, ApprovalWorkflow) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("workflow.db");
        let db = Arc::new(Database::new(db_path.to_str().unwrap()).await.unwrap());
        let workflow = ApprovalWorkflow::new(db.clone()).unwrap();
        (temp_dir, db, workflow)
    }

    #[tokio::test]
    async fn test_request_transition_persists_status_and_history() {
        let (_temp, db, workflow) = setup_workflow().await;
        let content = content_in(ContentStatus::Draft);
        db.insert_content(&content).await.unwrap();

        let mut req = request(Role::Operator, ContentStatus::Review, false);
        req.comment = Some("first cut".to_string());
        let (updated, record) = workflow.request_transition(content.id, req).await.unwrap();
        assert_eq!(updated.status, ContentStatus::Review);

        let stored = db.get_content(content.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ContentStatus::Review);

        let history = db.list_approvals(content.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, record.id);
        assert_eq!(history[0].comment.as_deref(), Some("first cut"));
    }

    #[tokio::test]
    async fn test_rejected_transition_leaves_content_unchanged() {
        let (_temp, db, workflow) = setup_workflow().await;
        let content = content_in(ContentStatus::Review);
        db.insert_content(&content).await.unwrap();

        let result = workflow
            .request_transition(content.id, request(Role::Client, ContentStatus::Approved, false))
            .await;
        let err = result.unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("role 'client'"));

        let stored = db.get_content(content.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ContentStatus::Review);
        assert!(db.list_approvals(content.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_urgent_approval_persists_approver() {
        let (_temp, db, workflow) = setup_workflow().await;
        let content = content_in(ContentStatus::Draft);
        db.insert_content(&content).await.unwrap();

        let req = request(Role::Manager, ContentStatus::Approved, true);
        let manager_id = req.actor.id;
        workflow.request_transition(content.id, req).await.unwrap();

        let stored = db.get_content(content.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ContentStatus::Approved);
        assert_eq!(stored.approved_by, Some(manager_id));

        let history = db.list_approvals(content.id).await.unwrap();
        assert!(history[0].is_urgent);
    }

    #[tokio::test]
    async fn test_unknown_content_is_not_found() {
        let (_temp, _db, workflow) = setup_workflow().await;
        let result = workflow
            .request_transition(Uuid::new_v4(), request(Role::Operator, ContentStatus::Review, false))
            .await;
        assert!(matches!(result, Err(PostflowError::NotFound(_))));
    }
}
