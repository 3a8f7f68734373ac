//! Key-share custody interface
//!
//! The engine never persists key shares itself. A finished keygen hands its
//! [`KeygenOutput`] to a custodian, and presign loads it back by handle.

use crate::keygen::KeygenOutput;
use crate::types::UserId;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque reference to a stored key share
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WalletHandle(pub String);

impl fmt::Display for WalletHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Durable store for this party's key shares
#[async_trait]
pub trait KeyCustodian: Send + Sync {
    /// Store a fresh share for `user`, replacing the user's current wallet
    async fn store(&self, user: &UserId, output: &KeygenOutput) -> Result<WalletHandle>;

    /// Load a share by handle
    async fn load(&self, handle: &WalletHandle) -> Result<KeygenOutput>;

    /// Current wallet of `user`, if any
    async fn wallet_for(&self, user: &UserId) -> Result<Option<WalletHandle>>;
}
