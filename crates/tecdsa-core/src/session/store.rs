//! Consume-once stores for triples and presignatures
//!
//! A taken entry stays behind as a tombstone so a second use reports
//! "already consumed" rather than "not found".

use crate::presign::PresignOutput;
use crate::triples::{GeneratedTriple, TriplePub, TripleShare, TriplesOutput};
use crate::types::{point_hex, SessionKey, UserId};
use crate::{Error, Result};
use dashmap::{mapref::entry::Entry, DashMap};
use k256::ProjectivePoint;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Address of one stored triple: the triples session and the batch position
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TripleHandle {
    pub session: SessionKey,
    pub index: usize,
}

impl fmt::Display for TripleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.session, self.index)
    }
}

/// Address of a presignature: the presign session that produced it
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PresignHandle(pub SessionKey);

impl fmt::Display for PresignHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

enum Slot<T> {
    Fresh(T),
    Consumed,
}

/// Exported triple, for persisting a party's own store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredTriple {
    pub handle: TripleHandle,
    pub public: TriplePub,
    pub share: TripleShare,
}

/// Triples of finished sessions, each usable once
#[derive(Default)]
pub struct TripleStore {
    entries: DashMap<TripleHandle, Slot<(TriplePub, TripleShare)>>,
}

impl TripleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a finished batch; returns the handles of complete pairs
    pub fn insert_batch(
        &self,
        session: &SessionKey,
        output: &TriplesOutput,
    ) -> Vec<[TripleHandle; 2]> {
        let handle = |t: &GeneratedTriple| TripleHandle {
            session: session.clone(),
            index: t.index,
        };
        for triple in &output.triples {
            self.entries.insert(
                handle(triple),
                Slot::Fresh((triple.public.clone(), triple.share.clone())),
            );
        }
        debug!(%session, stored = output.triples.len(), "Triples stored");
        output
            .pairs()
            .into_iter()
            .map(|(first, second)| [handle(first), handle(second)])
            .collect()
    }

    fn check(&self, handle: &TripleHandle) -> Result<()> {
        match self.entries.get(handle).as_deref() {
            Some(Slot::Fresh(_)) => Ok(()),
            Some(Slot::Consumed) => Err(Error::TripleAlreadyConsumed(handle.to_string())),
            None => Err(Error::TripleNotFound(handle.to_string())),
        }
    }

    /// Take one triple, leaving a tombstone
    pub fn take(&self, handle: &TripleHandle) -> Result<(TriplePub, TripleShare)> {
        match self.entries.entry(handle.clone()) {
            Entry::Vacant(_) => Err(Error::TripleNotFound(handle.to_string())),
            Entry::Occupied(mut entry) => match entry.insert(Slot::Consumed) {
                Slot::Fresh(triple) => Ok(triple),
                Slot::Consumed => Err(Error::TripleAlreadyConsumed(handle.to_string())),
            },
        }
    }

    /// Take two distinct triples.
    ///
    /// Both handles are checked before either is consumed, so a bad second
    /// handle does not burn the first triple.
    pub fn take_pair(
        &self,
        handles: &[TripleHandle; 2],
    ) -> Result<[(TriplePub, TripleShare); 2]> {
        if handles[0] == handles[1] {
            return Err(Error::InvalidConfig(format!(
                "triple {} given twice",
                handles[0]
            )));
        }
        self.check(&handles[0])?;
        self.check(&handles[1])?;
        Ok([self.take(&handles[0])?, self.take(&handles[1])?])
    }

    /// Unused triples of `user`
    pub fn available(&self, user: &UserId) -> Vec<TripleHandle> {
        let mut handles: Vec<TripleHandle> = self
            .entries
            .iter()
            .filter(|e| &e.key().session.user_id == user && matches!(e.value(), Slot::Fresh(_)))
            .map(|e| e.key().clone())
            .collect();
        handles.sort();
        handles
    }

    /// Copy out every unused triple of `user`
    pub fn export(&self, user: &UserId) -> Vec<StoredTriple> {
        self.available(user)
            .into_iter()
            .filter_map(|handle| match self.entries.get(&handle).as_deref() {
                Some(Slot::Fresh((public, share))) => Some(StoredTriple {
                    handle: handle.clone(),
                    public: public.clone(),
                    share: share.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    /// Load previously exported triples; handles already present are skipped
    pub fn import(&self, triples: Vec<StoredTriple>) -> usize {
        let mut added = 0;
        for t in triples {
            if let Entry::Vacant(slot) = self.entries.entry(t.handle) {
                slot.insert(Slot::Fresh((t.public, t.share)));
                added += 1;
            }
        }
        added
    }
}

/// A presignature together with the wallet it was made for
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredPresign {
    pub handle: PresignHandle,
    #[serde(with = "point_hex")]
    pub public_key: ProjectivePoint,
    pub output: PresignOutput,
}

/// Presignatures of finished sessions, each usable once
#[derive(Default)]
pub struct PresignStore {
    entries: DashMap<PresignHandle, Slot<StoredPresign>>,
}

impl PresignStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, presign: StoredPresign) {
        debug!(handle = %presign.handle, "Presignature stored");
        self.entries
            .insert(presign.handle.clone(), Slot::Fresh(presign));
    }

    /// Take a presignature, leaving a tombstone
    pub fn take(&self, handle: &PresignHandle) -> Result<StoredPresign> {
        match self.entries.entry(handle.clone()) {
            Entry::Vacant(_) => Err(Error::PresignNotFound(handle.to_string())),
            Entry::Occupied(mut entry) => match entry.insert(Slot::Consumed) {
                Slot::Fresh(presign) => Ok(presign),
                Slot::Consumed => Err(Error::PresignAlreadyConsumed(handle.to_string())),
            },
        }
    }

    pub fn available(&self, user: &UserId) -> Vec<PresignHandle> {
        let mut handles: Vec<PresignHandle> = self
            .entries
            .iter()
            .filter(|e| &e.key().0.user_id == user && matches!(e.value(), Slot::Fresh(_)))
            .map(|e| e.key().clone())
            .collect();
        handles.sort();
        handles
    }

    pub fn export(&self, user: &UserId) -> Vec<StoredPresign> {
        self.entries
            .iter()
            .filter(|e| &e.key().0.user_id == user)
            .filter_map(|e| match e.value() {
                Slot::Fresh(presign) => Some(presign.clone()),
                Slot::Consumed => None,
            })
            .collect()
    }

    pub fn import(&self, presigns: Vec<StoredPresign>) -> usize {
        let mut added = 0;
        for p in presigns {
            if let Entry::Vacant(slot) = self.entries.entry(p.handle.clone()) {
                slot.insert(Slot::Fresh(p));
                added += 1;
            }
        }
        added
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::triples::deal_triple;

    fn batch(indices: &[usize]) -> TriplesOutput {
        TriplesOutput {
            triples: indices
                .iter()
                .map(|&index| {
                    let ((public, share), _) = deal_triple();
                    GeneratedTriple {
                        index,
                        public,
                        share,
                    }
                })
                .collect(),
            dropped: Vec::new(),
        }
    }

    #[test]
    fn test_triple_consumed_once() {
        let store = TripleStore::new();
        let key = SessionKey::new("alice", "t1");
        let pairs = store.insert_batch(&key, &batch(&[0, 1]));
        assert_eq!(pairs.len(), 1);

        store.take_pair(&pairs[0]).unwrap();
        assert!(matches!(
            store.take_pair(&pairs[0]),
            Err(Error::TripleAlreadyConsumed(_))
        ));
        assert!(store.available(&key.user_id).is_empty());
    }

    #[test]
    fn test_bad_second_handle_keeps_first() {
        let store = TripleStore::new();
        let key = SessionKey::new("alice", "t1");
        store.insert_batch(&key, &batch(&[0, 1]));
        let first = TripleHandle {
            session: key.clone(),
            index: 0,
        };
        let missing = TripleHandle {
            session: key.clone(),
            index: 9,
        };

        assert!(matches!(
            store.take_pair(&[first.clone(), missing]),
            Err(Error::TripleNotFound(_))
        ));
        assert!(matches!(
            store.take_pair(&[first.clone(), first.clone()]),
            Err(Error::InvalidConfig(_))
        ));
        assert!(store.take(&first).is_ok());
    }

    #[test]
    fn test_dropped_triple_breaks_pair() {
        let store = TripleStore::new();
        let key = SessionKey::new("bob", "t2");
        let pairs = store.insert_batch(&key, &batch(&[0, 1, 3]));
        assert_eq!(pairs.len(), 1);
        assert_eq!(store.available(&key.user_id).len(), 3);
    }

    #[test]
    fn test_export_import_skips_consumed() {
        let store = TripleStore::new();
        let key = SessionKey::new("carol", "t3");
        let pairs = store.insert_batch(&key, &batch(&[0, 1, 2, 3]));
        store.take_pair(&pairs[0]).unwrap();

        let exported = store.export(&key.user_id);
        assert_eq!(exported.len(), 2);
        let json = serde_json::to_string(&exported).unwrap();

        let other = TripleStore::new();
        assert_eq!(other.import(serde_json::from_str(&json).unwrap()), 2);
        assert_eq!(other.import(serde_json::from_str(&json).unwrap()), 0);
        assert!(other.take_pair(&pairs[1]).is_ok());
        assert!(other.export(&UserId("dave".into())).is_empty());
    }

    #[test]
    fn test_presign_consumed_once() {
        let store = PresignStore::new();
        let handle = PresignHandle(SessionKey::new("alice", "p1"));
        assert!(matches!(store.take(&handle), Err(Error::PresignNotFound(_))));

        store.insert(StoredPresign {
            handle: handle.clone(),
            public_key: ProjectivePoint::GENERATOR,
            output: PresignOutput {
                big_r: ProjectivePoint::GENERATOR,
                k: k256::Scalar::ONE,
                sigma: k256::Scalar::ONE,
            },
        });
        assert_eq!(store.export(&handle.0.user_id).len(), 1);
        assert!(store.take(&handle).is_ok());
        assert!(matches!(
            store.take(&handle),
            Err(Error::PresignAlreadyConsumed(_))
        ));
        assert!(store.available(&handle.0.user_id).is_empty());
    }
}
