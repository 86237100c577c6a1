//! Identity gate: bearer credential → `{name, role}`.
//!
//! Only the SHA-256 hex digest of a credential is ever stored. The resolved
//! identity is used to attribute leases (`locked_by`); it does not restrict
//! which operations a caller may use.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::QueueError;
use crate::queue::store::JobStore;

/// Caller roles. Recorded on the credential but not enforced by the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Admin,
    User,
    Node,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "ADMIN",
            Role::User => "USER",
            Role::Node => "NODE",
        }
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
        match s.to_ascii_uppercase().as_str() {
            "ADMIN" => Ok(Role::Admin),
            "USER" => Ok(Role::User),
            "NODE" => Ok(Role::Node),
            _ => Err(format!("Invalid role: {s}")),
        }
    }
}

/// The resolved caller principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    pub role: Role,
}

/// Hex-encoded SHA-256 of a credential.
pub fn hash_credential(secret: &str) -> String {
    format!("{:x}", Sha256::digest(secret.as_bytes()))
}

/// Extract the token from an `Authorization: Bearer <token>` header value.
pub fn parse_bearer(header: &str) -> Option<&str> {
    let mut parts = header.split_whitespace();
    let scheme = parts.next()?;
    let token = parts.next()?;
    if parts.next().is_some() || !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    Some(token)
}

/// Resolves credentials against the `api_keys` table.
#[derive(Clone)]
pub struct IdentityGate {
    store: JobStore,
}

impl IdentityGate {
    pub fn new(store: JobStore) -> Self {
        Self { store }
    }

    /// Resolve a credential or fail with `Unauthorized`.
    pub fn resolve(&self, credential: Option<&str>) -> Result<Identity, QueueError> {
        let secret = match credential.map(str::trim) {
            Some(secret) if !secret.is_empty() => secret,
            _ => return Err(QueueError::Unauthorized),
        };

        match self.store.find_credential(&hash_credential(secret))? {
            Some(identity) => Ok(identity),
            None => {
                tracing::debug!("Rejected unknown credential");
                Err(QueueError::Unauthorized)
            }
        }
    }

    /// Generate a fresh credential, store its hash and return the plaintext once.
    pub fn issue(&self, name: &str, role: Role) -> Result<String, QueueError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(QueueError::InvalidInput("key name must not be empty".into()));
        }
        let secret = format!("sk-{}", Uuid::new_v4().simple());
        self.store
            .insert_credential(&hash_credential(&secret), name, role)?;
        tracing::info!(name, role = %role, "Issued API key");
        Ok(secret)
    }

    /// Register a caller-chosen secret (tests and scripted setups).
    pub fn register(&self, secret: &str, name: &str, role: Role) -> Result<(), QueueError> {
        self.store
            .insert_credential(&hash_credential(secret), name, role)?;
        Ok(())
    }
}
