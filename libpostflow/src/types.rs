//! Core types for Postflow

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Role of an authenticated actor, as resolved by the identity layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Operator,
    Manager,
    Client,
    Admin,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Operator, Role::Manager, Role::Client, Role::Admin];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Operator => "operator",
            Role::Manager => "manager",
            Role::Client => "client",
            Role::Admin => "admin",
        }
    }

    /// Managers and admins may push urgent content past the normal gates
    pub fn can_override(&self) -> bool {
        matches!(self, Role::Manager | Role::Admin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "operator" => Ok(Role::Operator),
            "manager" => Ok(Role::Manager),
            "client" => Ok(Role::Client),
            "admin" => Ok(Role::Admin),
            other => Err(format!("Unknown role: '{}'", other)),
        }
    }
}

/// Workflow status of a content item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentStatus {
    Draft,
    Review,
    ClientReview,
    Approved,
    Published,
    Rejected,
}

impl ContentStatus {
    pub const ALL: [ContentStatus; 6] = [
        ContentStatus::Draft,
        ContentStatus::Review,
        ContentStatus::ClientReview,
        ContentStatus::Approved,
        ContentStatus::Published,
        ContentStatus::Rejected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentStatus::Draft => "draft",
            ContentStatus::Review => "review",
            ContentStatus::ClientReview => "client_review",
            ContentStatus::Approved => "approved",
            ContentStatus::Published => "published",
            ContentStatus::Rejected => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ContentStatus::Published)
    }
}

impl fmt::Display for ContentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ContentStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("Unknown content status: '{}'", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Feed,
    Reel,
    Story,
    Short,
    CardNews,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Feed => "feed",
            ContentType::Reel => "reel",
            ContentType::Story => "story",
            ContentType::Short => "short",
            ContentType::CardNews => "card_news",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "feed" => Ok(ContentType::Feed),
            "reel" => Ok(ContentType::Reel),
            "story" => Ok(ContentType::Story),
            "short" => Ok(ContentType::Short),
            "card_news" => Ok(ContentType::CardNews),
            other => Err(format!("Unknown content type: '{}'", other)),
        }
    }
}

/// Status of one publishing attempt lineage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishingStatus {
    Pending,
    Publishing,
    Success,
    Failed,
    Cancelled,
}

impl PublishingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublishingStatus::Pending => "pending",
            PublishingStatus::Publishing => "publishing",
            PublishingStatus::Success => "success",
            PublishingStatus::Failed => "failed",
            PublishingStatus::Cancelled => "cancelled",
        }
    }

    /// `failed` stays retryable, so only success and cancellation are final
    pub fn is_terminal(&self) -> bool {
        matches!(self, PublishingStatus::Success | PublishingStatus::Cancelled)
    }
}

impl fmt::Display for PublishingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PublishingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PublishingStatus::Pending),
            "publishing" => Ok(PublishingStatus::Publishing),
            "success" => Ok(PublishingStatus::Success),
            "failed" => Ok(PublishingStatus::Failed),
            "cancelled" => Ok(PublishingStatus::Cancelled),
            other => Err(format!("Unknown publishing status: '{}'", other)),
        }
    }
}

/// An authenticated caller of the workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub id: Uuid,
    pub role: Role,
}

impl Actor {
    pub fn new(id: Uuid, role: Role) -> Self {
        Self { id, role }
    }
}

/// A piece of creative content destined for one or more platforms
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContentItem {
    pub id: Uuid,
    pub client_id: Uuid,
    pub title: String,
    pub body: Option<String>,
    pub content_type: ContentType,
    pub status: ContentStatus,
    pub target_platforms: BTreeSet<String>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub published_at: Option<DateTime<Utc>>,
    pub approved_at: Option<DateTime<Utc>>,
    pub approved_by: Option<Uuid>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

/// Fields supplied when creating content; status always starts at `draft`
#[derive(Debug, Clone)]
pub struct NewContent {
    pub client_id: Uuid,
    pub title: String,
    pub body: Option<String>,
    pub content_type: ContentType,
    pub target_platforms: BTreeSet<String>,
    pub scheduled_at: Option<DateTime<Utc>>,
}

impl ContentItem {
    pub fn new_draft(new: NewContent, created_by: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            client_id: new.client_id,
            title: new.title,
            body: new.body,
            content_type: new.content_type,
            status: ContentStatus::Draft,
            target_platforms: new.target_platforms,
            scheduled_at: new.scheduled_at,
            published_at: None,
            approved_at: None,
            approved_by: None,
            created_by,
            created_at: Utc::now(),
        }
    }
}

/// Immutable audit entry for one accepted status transition
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApprovalRecord {
    pub id: Uuid,
    pub content_id: Uuid,
    pub from_status: ContentStatus,
    pub to_status: ContentStatus,
    pub reviewer_id: Uuid,
    pub comment: Option<String>,
    pub is_urgent: bool,
    pub created_at: DateTime<Utc>,
}

/// A connected social account owned by a client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlatformAccount {
    pub id: Uuid,
    pub client_id: Uuid,
    pub platform: String,
    pub account_name: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_expires_at: Option<DateTime<Utc>>,
    pub is_connected: bool,
}

/// One (content, platform account) publish attempt lineage
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublishingLog {
    pub id: Uuid,
    pub content_id: Uuid,
    pub platform_account_id: Uuid,
    pub status: PublishingStatus,
    pub platform_post_id: Option<String>,
    pub platform_post_url: Option<String>,
    pub error_message: Option<String>,
    pub retry_count: u32,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl PublishingLog {
    pub fn pending(
        content_id: Uuid,
        platform_account_id: Uuid,
        scheduled_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            content_id,
            platform_account_id,
            status: PublishingStatus::Pending,
            platform_post_id: None,
            platform_post_url: None,
            error_message: None,
            retry_count: 0,
            scheduled_at,
            published_at: None,
            created_at: Utc::now(),
        }
    }
}

/// Where a platform put the published post
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformPostRef {
    pub post_id: String,
    pub post_url: Option<String>,
}

/// Credentials returned by a successful token refresh
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshedToken {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_status_round_trips_through_str() {
        for status in ContentStatus::ALL {
            assert_eq!(status.as_str().parse::<ContentStatus>().unwrap(), status);
        }
        assert!("archived".parse::<ContentStatus>().is_err());
    }

    #[test]
    fn test_content_status_serializes_snake_case() {
        let json = serde_json::to_string(&ContentStatus::ClientReview).unwrap();
        assert_eq!(json, "\"client_review\"");
    }

    #[test]
    fn test_role_parsing() {
        assert_eq!("manager".parse::<Role>().unwrap(), Role::Manager);
        assert!("superuser".parse::<Role>().is_err());
        assert!(Role::Admin.can_override());
        assert!(Role::Manager.can_override());
        assert!(!Role::Operator.can_override());
        assert!(!Role::Client.can_override());
    }

    #[test]
    fn test_publishing_status_terminality() {
        assert!(PublishingStatus::Success.is_terminal());
        assert!(PublishingStatus::Cancelled.is_terminal());
        assert!(!PublishingStatus::Failed.is_terminal());
        assert!(!PublishingStatus::Pending.is_terminal());
        assert!(!PublishingStatus::Publishing.is_terminal());
    }

    #[test]
    fn test_content_type_card_news() {
        assert_eq!(ContentType::CardNews.to_string(), "card_news");
        assert_eq!("card_news".parse::<ContentType>().unwrap(), ContentType::CardNews);
    }

    #[test]
    fn test_new_draft_starts_unapproved() {
        let creator = Uuid::new_v4();
        let content = ContentItem::new_draft(
            NewContent {
                client_id: Uuid::new_v4(),
                title: "Launch teaser".to_string(),
                body: None,
                content_type: ContentType::Reel,
                target_platforms: ["instagram".to_string()].into_iter().collect(),
                scheduled_at: None,
            },
            creator,
        );
        assert_eq!(content.status, ContentStatus::Draft);
        assert_eq!(content.created_by, creator);
        assert!(content.approved_at.is_none());
        assert!(content.published_at.is_none());
    }

    #[test]
    fn test_pending_log_defaults() {
        let log = PublishingLog::pending(Uuid::new_v4(), Uuid::new_v4(), None);
        assert_eq!(log.status, PublishingStatus::Pending);
        assert_eq!(log.retry_count, 0);
        assert!(log.platform_post_id.is_none());
    }
}
