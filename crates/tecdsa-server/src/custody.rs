//! Sealed in-memory key custody
//!
//! Each share is stored as ChaCha20-Poly1305 sealed JSON under a per-wallet
//! key derived from the master key with HMAC-SHA256. The user id is bound
//! as associated data.

use async_trait::async_trait;
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce,
};
use dashmap::DashMap;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use tecdsa_core::custody::{KeyCustodian, WalletHandle};
use tecdsa_core::keygen::KeygenOutput;
use tecdsa_core::{Error, Result, UserId};
use tracing::info;
use uuid::Uuid;
use zeroize::Zeroizing;

type HmacSha256 = Hmac<Sha256>;

struct Sealed {
    user: UserId,
    nonce: [u8; 12],
    ciphertext: Vec<u8>,
}

pub struct SealedCustodian {
    master_key: Zeroizing<[u8; 32]>,
    wallets: DashMap<WalletHandle, Sealed>,
    current: DashMap<UserId, WalletHandle>,
}

impl SealedCustodian {
    pub fn new(master_key: [u8; 32]) -> Self {
        Self {
            master_key: Zeroizing::new(master_key),
            wallets: DashMap::new(),
            current: DashMap::new(),
        }
    }

    /// Custodian with a random master key; shares do not survive a restart
    pub fn ephemeral() -> Self {
        let mut key = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);
        Self::new(key)
    }

    fn cipher(&self, wallet: &WalletHandle) -> Result<ChaCha20Poly1305> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.master_key[..])
            .map_err(|e| Error::Custody(e.to_string()))?;
        mac.update(b"tecdsa-wallet-key");
        mac.update(wallet.0.as_bytes());
        let key: Zeroizing<[u8; 32]> = Zeroizing::new(mac.finalize().into_bytes().into());
        Ok(ChaCha20Poly1305::new(Key::from_slice(&key[..])))
    }
}

#[async_trait]
impl KeyCustodian for SealedCustodian {
    async fn store(&self, user: &UserId, output: &KeygenOutput) -> Result<WalletHandle> {
        let wallet = WalletHandle(Uuid::new_v4().to_string());
        let plaintext = Zeroizing::new(serde_json::to_vec(output)?);

        let mut nonce = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut nonce);
        let ciphertext = self
            .cipher(&wallet)?
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext.as_slice(),
                    aad: user.0.as_bytes(),
                },
            )
            .map_err(|_| Error::Custody("sealing failed".into()))?;

        self.wallets.insert(
            wallet.clone(),
            Sealed {
                user: user.clone(),
                nonce,
                ciphertext,
            },
        );
        self.current.insert(user.clone(), wallet.clone());
        info!(%user, %wallet, "Key share sealed");
        Ok(wallet)
    }

    async fn load(&self, wallet: &WalletHandle) -> Result<KeygenOutput> {
        let sealed = self
            .wallets
            .get(wallet)
            .ok_or_else(|| Error::Custody(format!("unknown wallet {wallet}")))?;
        let plaintext = Zeroizing::new(
            self.cipher(wallet)?
                .decrypt(
                    Nonce::from_slice(&sealed.nonce),
                    Payload {
                        msg: sealed.ciphertext.as_slice(),
                        aad: sealed.user.0.as_bytes(),
                    },
                )
                .map_err(|_| Error::Custody(format!("wallet {wallet} failed to unseal")))?,
        );
        serde_json::from_slice(&plaintext).map_err(|e| Error::Deserialization(e.to_string()))
    }

    async fn wallet_for(&self, user: &UserId) -> Result<Option<WalletHandle>> {
        Ok(self.current.get(user).map(|w| w.value().clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k256::Scalar;
    use tecdsa_core::keygen::deal_key_shares;

    #[tokio::test]
    async fn test_store_and_load() {
        let custodian = SealedCustodian::ephemeral();
        let user = UserId("alice".into());
        let (share, _) = deal_key_shares(&Scalar::from(42u64)).unwrap();

        let wallet = custodian.store(&user, &share).await.unwrap();
        assert_eq!(custodian.wallet_for(&user).await.unwrap(), Some(wallet.clone()));

        let loaded = custodian.load(&wallet).await.unwrap();
        assert_eq!(loaded.public_key, share.public_key);
        assert_eq!(loaded.private_share, share.private_share);
        assert!(custodian
            .wallet_for(&UserId("bob".into()))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_tampered_record_fails() {
        let custodian = SealedCustodian::new([7u8; 32]);
        let user = UserId("alice".into());
        let (share, _) = deal_key_shares(&Scalar::from(42u64)).unwrap();
        let wallet = custodian.store(&user, &share).await.unwrap();

        if let Some(mut sealed) = custodian.wallets.get_mut(&wallet) {
            sealed.user = UserId("mallory".into());
        }
        assert!(matches!(
            custodian.load(&wallet).await,
            Err(Error::Custody(_))
        ));
        assert!(custodian
            .load(&WalletHandle("missing".into()))
            .await
            .is_err());
    }
}
