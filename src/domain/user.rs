//! User Records
//!
//! Value objects describing an enrolled proxy user and its credential payload.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Encryption mode assigned to records loaded from storage.
pub const DEFAULT_ENCRYPTION: &str = "none";

/// VLESS credential material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VlessAccount {
    /// Primary identifier
    pub id: Uuid,
    /// Flow control tag (e.g. `xtls-rprx-vision`), empty for none
    #[serde(default)]
    pub flow: String,
    /// Encryption mode
    #[serde(default = "default_encryption")]
    pub encryption: String,
}

fn default_encryption() -> String {
    DEFAULT_ENCRYPTION.to_string()
}

impl VlessAccount {
    pub fn new(id: Uuid, flow: impl Into<String>) -> Self {
        Self {
            id,
            flow: flow.into(),
            encryption: default_encryption(),
        }
    }
}

/// Credential payload attached to a user.
///
/// Only [`Account::Vless`] is accepted by the registry; other kinds exist so
/// that records enrolled through a different protocol are recognised and
/// rejected instead of being stored under a bogus identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "protocol", rename_all = "lowercase")]
pub enum Account {
    Vless(VlessAccount),
    Trojan { password: String },
}

impl Account {
    /// Protocol name of this account kind
    pub fn protocol(&self) -> &'static str {
        match self {
            Account::Vless(_) => "vless",
            Account::Trojan { .. } => "trojan",
        }
    }
}

/// A user known to the proxy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    /// Alias, unique among live records
    pub email: String,
    /// Policy level
    #[serde(default)]
    pub level: u32,
    /// Credential payload
    pub account: Account,
}

impl UserRecord {
    /// Create a VLESS user at level 0.
    pub fn vless(id: Uuid, email: impl Into<String>, flow: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            level: 0,
            account: Account::Vless(VlessAccount::new(id, flow)),
        }
    }

    /// The VLESS account, if this record carries one.
    pub fn vless_account(&self) -> Option<&VlessAccount> {
        match &self.account {
            Account::Vless(account) => Some(account),
            _ => None,
        }
    }

    /// Primary identifier from the VLESS account.
    pub fn vless_id(&self) -> Option<Uuid> {
        self.vless_account().map(|a| a.id)
    }

    /// Canonical text form of the primary identifier, used as the cache key.
    pub fn id_key(&self) -> Option<String> {
        self.vless_id().map(|id| id.to_string())
    }
}
