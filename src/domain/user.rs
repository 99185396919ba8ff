//! User rows. Users are created via registration and only ever deactivated.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Opaque id; 6-digit numeric in current data.
    pub id: String,
    pub name: String,
    pub email: String,
    /// External identity-provider subject, when linked.
    pub external_id: Option<String>,
    pub active: bool,
    pub admin: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
