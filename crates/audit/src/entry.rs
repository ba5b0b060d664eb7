//! Audit record types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who performed the audited action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorType {
    /// Servicing staff acting through a screen
    User,
    /// The servicing core itself
    System,
    /// A servicing-cycle run
    Batch,
    /// Bank or transfer network callbacks
    External,
}

impl ActorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActorType::User => "user",
            ActorType::System => "system",
            ActorType::Batch => "batch",
            ActorType::External => "external",
        }
    }
}

/// The actor behind a state change, carried from the edge into every write
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Actor {
    pub actor_type: ActorType,
    pub id: String,
}

impl Actor {
    pub fn new(actor_type: ActorType, id: impl Into<String>) -> Self {
        Self {
            actor_type,
            id: id.into(),
        }
    }

    pub fn user(id: impl Into<String>) -> Self {
        Self::new(ActorType::User, id)
    }

    pub fn system() -> Self {
        Self::new(ActorType::System, "system")
    }

    pub fn batch(id: impl Into<String>) -> Self {
        Self::new(ActorType::Batch, id)
    }

    pub fn external(id: impl Into<String>) -> Self {
        Self::new(ActorType::External, id)
    }
}

/// A stored, hash-chained audit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Position in the global chain, starting at 1
    pub id: u64,
    pub correlation_id: String,
    pub actor_type: ActorType,
    pub actor_id: String,
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub resource_type: String,
    pub resource_id: String,
    pub payload: serde_json::Value,
    pub payload_hash: String,
    pub prev_hash: String,
    pub record_hash: String,
}

/// An audit entry before it is sequenced and hashed
#[derive(Debug, Clone)]
pub struct NewAuditEntry {
    pub correlation_id: String,
    pub actor_type: ActorType,
    pub actor_id: String,
    pub event_type: String,
    pub resource_type: String,
    pub resource_id: String,
    pub payload: serde_json::Value,
}

impl NewAuditEntry {
    /// System-actor entry with a fresh correlation id and empty payload
    pub fn new(
        event_type: impl Into<String>,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
    ) -> Self {
        Self {
            correlation_id: uuid::Uuid::new_v4().to_string(),
            actor_type: ActorType::System,
            actor_id: "system".to_string(),
            event_type: event_type.into(),
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
            payload: serde_json::Value::Null,
        }
    }

    pub fn actor(mut self, actor_type: ActorType, actor_id: impl Into<String>) -> Self {
        self.actor_type = actor_type;
        self.actor_id = actor_id.into();
        self
    }

    pub fn by(self, actor: &Actor) -> Self {
        self.actor(actor.actor_type, actor.id.clone())
    }

    pub fn correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    pub fn payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}
