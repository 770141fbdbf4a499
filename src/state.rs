use serde::Serialize;
use sqlx::SqlitePool;
use tokio::sync::broadcast;

use crate::scheduling::SlotGrid;

#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub events: broadcast::Sender<ServerEvent>,
    pub push: PushConfig,
    pub slots: SlotGrid,
}

#[derive(Clone, Debug)]
pub struct PushConfig {
    pub public_key: String,
    pub private_key: String,
    pub subject: String,
}

impl PushConfig {
    pub fn enabled(&self) -> bool {
        !(self.public_key.trim().is_empty() || self.private_key.trim().is_empty())
    }

    pub fn disabled() -> Self {
        Self {
            public_key: String::new(),
            private_key: String::new(),
            subject: String::new(),
        }
    }
}

/// Broadcast payload for the SSE endpoints. One channel carries both
/// appointment and order updates; consumers filter by record id.
#[derive(Clone, Debug, Serialize)]
pub struct ServerEvent {
    pub kind: String,
    pub record_id: String,
    pub status: String,
    pub summary: String,
    pub scheduled_for: Option<String>,
    pub tracking_number: Option<String>,
}

impl ServerEvent {
    pub fn appointment(kind: &str, id: &str, status: &str, summary: String, when: String) -> Self {
        Self {
            kind: kind.to_string(),
            record_id: id.to_string(),
            status: status.to_string(),
            summary,
            scheduled_for: Some(when),
            tracking_number: None,
        }
    }

    pub fn order(kind: &str, id: &str, status: &str, summary: String, tracking: Option<String>) -> Self {
        Self {
            kind: kind.to_string(),
            record_id: id.to_string(),
            status: status.to_string(),
            summary,
            scheduled_for: None,
            tracking_number: tracking,
        }
    }
}
