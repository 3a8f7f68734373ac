//! Session registry
//!
//! Maps [`SessionKey`]s to live protocol sessions and owns the triple and
//! presignature stores. The map shard lock is held only for lookup, insert
//! and remove; rounds run under the per-session mutex.

use super::envelope::{Envelope, PhaseMessage};
use super::machine::{Machine, Step};
use super::store::{PresignHandle, PresignStore, StoredPresign, TripleHandle, TripleStore};
use crate::config::RegistryConfig;
use crate::keygen::{KeygenOutput, KeygenParty};
use crate::presign::{PresignOutput, PresignParty};
use crate::protocol::Protocol;
use crate::sign::{SignOutput, SignParty};
use crate::triples::{TriplesOutput, TriplesParty};
use crate::types::{hex32, point_hex, Phase, Role, SessionId, SessionKey};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use k256::ProjectivePoint;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, TryLockError};
use tracing::{debug, info, instrument, warn};

/// Parameters for opening a phase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum PhaseRequest {
    Keygen {
        threshold: usize,
    },
    /// `count` presign-ready pairs
    Triples {
        count: usize,
    },
    /// Nonce triple first, mask triple second
    Presign {
        triples: [TripleHandle; 2],
    },
    Sign {
        /// Session id of the presign run
        presign: SessionId,
        #[serde(with = "hex32")]
        digest: [u8; 32],
    },
}

impl PhaseRequest {
    pub fn phase(&self) -> Phase {
        match self {
            PhaseRequest::Keygen { .. } => Phase::Keygen,
            PhaseRequest::Triples { .. } => Phase::Triples,
            PhaseRequest::Presign { .. } => Phase::Presign,
            PhaseRequest::Sign { .. } => Phase::Sign,
        }
    }
}

/// Result of a finished phase for this party
#[derive(Debug, Clone)]
pub enum Completed {
    /// Contains the private share; hand it to the custodian
    Keygen(KeygenOutput),
    /// Stored triples as presign-ready pairs
    Triples {
        pairs: Vec<[TripleHandle; 2]>,
        dropped: Vec<usize>,
    },
    /// Stored presignature
    Presign {
        handle: PresignHandle,
        big_r: ProjectivePoint,
    },
    Sign(SignOutput),
}

impl Completed {
    /// The part of the result both parties may see
    pub fn public(&self) -> PublicOutput {
        match self {
            Completed::Keygen(out) => PublicOutput::Keygen {
                public_key: out.public_key,
            },
            Completed::Triples { pairs, dropped } => PublicOutput::Triples {
                pairs: pairs.clone(),
                dropped: dropped.clone(),
            },
            Completed::Presign { handle, big_r } => PublicOutput::Presign {
                handle: handle.clone(),
                big_r: *big_r,
            },
            Completed::Sign(out) => PublicOutput::Sign {
                signature: *out,
                recoverable: hex::encode(out.to_recoverable()),
            },
        }
    }
}

/// Secret-free view of [`Completed`] for the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum PublicOutput {
    Keygen {
        #[serde(with = "point_hex")]
        public_key: ProjectivePoint,
    },
    Triples {
        pairs: Vec<[TripleHandle; 2]>,
        dropped: Vec<usize>,
    },
    Presign {
        handle: PresignHandle,
        #[serde(with = "point_hex")]
        big_r: ProjectivePoint,
    },
    Sign {
        signature: SignOutput,
        /// `r || s || v`, hex
        recoverable: String,
    },
}

/// What opening a session or delivering to it produced
#[derive(Debug, Clone)]
pub struct Advance {
    /// Rounds this party has completed
    pub round: u8,
    pub outbound: Option<Envelope>,
    pub completed: Option<Completed>,
}

enum Finished {
    Keygen(KeygenOutput),
    Triples(TriplesOutput),
    Presign(PresignOutput),
    Sign(SignOutput),
}

enum PhaseSession {
    Keygen(Machine<KeygenParty>),
    Triples(Machine<TriplesParty>),
    Presign {
        machine: Machine<PresignParty>,
        public_key: ProjectivePoint,
    },
    Sign(Machine<SignParty>),
}

type Raw = (u8, Option<PhaseMessage>, Option<Finished>);

fn lift<P: Protocol>(
    machine: &Machine<P>,
    step: Step<P>,
    finish: impl FnOnce(P::Output) -> Finished,
) -> Raw
where
    P::Inbox: Into<PhaseMessage>,
{
    // the closing check of the last round counts as part of that round
    (
        machine.rounds_completed().min(P::ROUNDS),
        step.outbound.map(Into::into),
        step.output.map(finish),
    )
}

impl PhaseSession {
    fn phase(&self) -> Phase {
        match self {
            PhaseSession::Keygen(_) => Phase::Keygen,
            PhaseSession::Triples(_) => Phase::Triples,
            PhaseSession::Presign { .. } => Phase::Presign,
            PhaseSession::Sign(_) => Phase::Sign,
        }
    }

    fn role(&self) -> Role {
        match self {
            PhaseSession::Keygen(m) => m.role(),
            PhaseSession::Triples(m) => m.role(),
            PhaseSession::Presign { machine, .. } => machine.role(),
            PhaseSession::Sign(m) => m.role(),
        }
    }

    fn deliver(&mut self, message: PhaseMessage, max_queued: usize) -> Result<Raw> {
        match (self, message) {
            (PhaseSession::Keygen(m), PhaseMessage::Keygen(msg)) => {
                let step = m.deliver(msg, max_queued)?;
                Ok(lift(m, step, Finished::Keygen))
            }
            (PhaseSession::Triples(m), PhaseMessage::Triples(msg)) => {
                let step = m.deliver(msg, max_queued)?;
                Ok(lift(m, step, Finished::Triples))
            }
            (PhaseSession::Presign { machine, .. }, PhaseMessage::Presign(msg)) => {
                let step = machine.deliver(msg, max_queued)?;
                Ok(lift(machine, step, Finished::Presign))
            }
            (PhaseSession::Sign(m), PhaseMessage::Sign(msg)) => {
                let step = m.deliver(msg, max_queued)?;
                Ok(lift(m, step, Finished::Sign))
            }
            (session, message) => Err(Error::UnexpectedMessage(format!(
                "{} message for a {} session",
                message.phase(),
                session.phase()
            ))),
        }
    }
}

/// A live session of one party
struct ProtocolSession {
    state: PhaseSession,
    created_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
}

impl ProtocolSession {
    fn new(state: PhaseSession) -> Self {
        let now = Utc::now();
        Self {
            state,
            created_at: now,
            last_activity: now,
        }
    }

    fn expired(&self, now: DateTime<Utc>, ttl: chrono::Duration) -> bool {
        now - self.last_activity > ttl
    }
}

/// Summary of a live session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub key: SessionKey,
    pub phase: Phase,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

/// Owner of every live session and stored output of one party
pub struct Registry {
    config: RegistryConfig,
    sessions: DashMap<SessionKey, Arc<Mutex<ProtocolSession>>>,
    triples: TripleStore,
    presigns: PresignStore,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

fn poisoned<T>(_: T) -> Error {
    Error::Internal("session lock poisoned".into())
}

impl Registry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            sessions: DashMap::new(),
            triples: TripleStore::new(),
            presigns: PresignStore::new(),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn triples(&self) -> &TripleStore {
        &self.triples
    }

    pub fn presigns(&self) -> &PresignStore {
        &self.presigns
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Open a phase and run its first step.
    ///
    /// `wallet` is this party's key share and is required for presign only.
    /// Presign and sign consume their stored inputs here; they are not
    /// returned if a later round fails.
    #[instrument(skip_all, fields(session = %key, %role, phase = %request.phase()), err(Debug))]
    pub fn begin(
        &self,
        key: SessionKey,
        role: Role,
        request: PhaseRequest,
        wallet: Option<&KeygenOutput>,
    ) -> Result<Advance> {
        if self.sessions.contains_key(&key) {
            return Err(Error::SessionExists(key.to_string()));
        }

        let (state, raw) = self.open_phase(&key, role, request, wallet)?;
        let session = Arc::new(Mutex::new(ProtocolSession::new(state)));
        match self.sessions.entry(key.clone()) {
            Entry::Occupied(_) => return Err(Error::SessionExists(key.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(session);
            }
        }
        info!("Session opened");
        self.advance(&key, role, raw, wallet.map(|w| w.public_key))
    }

    fn open_phase(
        &self,
        key: &SessionKey,
        role: Role,
        request: PhaseRequest,
        wallet: Option<&KeygenOutput>,
    ) -> Result<(PhaseSession, Raw)> {
        Ok(match request {
            PhaseRequest::Keygen { threshold } => {
                let (party, first) = KeygenParty::new(role, threshold)?;
                let (machine, step) = Machine::open(party, first)?;
                let raw = lift(&machine, step, Finished::Keygen);
                (PhaseSession::Keygen(machine), raw)
            }
            PhaseRequest::Triples { count } => {
                if count > self.config.max_triples_per_session {
                    return Err(Error::InvalidConfig(format!(
                        "{count} triple pairs requested, at most {} allowed",
                        self.config.max_triples_per_session
                    )));
                }
                let (party, first) = TriplesParty::new(role, count)?;
                let (machine, step) = Machine::open(party, first)?;
                let raw = lift(&machine, step, Finished::Triples);
                (PhaseSession::Triples(machine), raw)
            }
            PhaseRequest::Presign { triples } => {
                let wallet = wallet.ok_or_else(|| {
                    Error::InvalidConfig("presign needs this party's key share".into())
                })?;
                if let Some(foreign) = triples.iter().find(|h| h.session.user_id != key.user_id) {
                    return Err(Error::InvalidConfig(format!(
                        "triple {foreign} belongs to another user"
                    )));
                }
                let [nonce, mask] = self.triples.take_pair(&triples)?;
                let (party, first) = PresignParty::new(role, wallet, nonce, mask)?;
                let (machine, step) = Machine::open(party, first)?;
                let raw = lift(&machine, step, Finished::Presign);
                let state = PhaseSession::Presign {
                    machine,
                    public_key: wallet.public_key,
                };
                (state, raw)
            }
            PhaseRequest::Sign { presign, digest } => {
                let handle = PresignHandle(SessionKey {
                    user_id: key.user_id.clone(),
                    session_id: presign,
                });
                let stored = self.presigns.take(&handle)?;
                let (party, first) =
                    SignParty::new(role, &stored.output, &stored.public_key, digest)?;
                let (machine, step) = Machine::open(party, first)?;
                let raw = lift(&machine, step, Finished::Sign);
                (PhaseSession::Sign(machine), raw)
            }
        })
    }

    /// Deliver peer payloads to a live session.
    ///
    /// Fatal errors and completion remove the session. An expired session is
    /// purged and reported as not found.
    #[instrument(skip_all, fields(session = %key, phase = %envelope.phase()), err(Debug))]
    pub fn deliver(&self, key: &SessionKey, envelope: Envelope) -> Result<Advance> {
        self.deliver_at(key, envelope, Utc::now())
    }

    fn deliver_at(
        &self,
        key: &SessionKey,
        envelope: Envelope,
        now: DateTime<Utc>,
    ) -> Result<Advance> {
        let handle = self
            .sessions
            .get(key)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| Error::SessionNotFound(key.to_string()))?;
        let mut session = handle.lock().map_err(poisoned)?;

        if session.expired(now, self.config.ttl()) {
            drop(session);
            self.sessions.remove(key);
            warn!("Delivery to expired session; purged");
            return Err(Error::SessionNotFound(key.to_string()));
        }

        let role = session.state.role();
        if envelope.to != role {
            return Err(Error::UnexpectedMessage(format!(
                "envelope for the {} delivered to the {role}",
                envelope.to
            )));
        }

        match session
            .state
            .deliver(envelope.message, self.config.max_queued_messages)
        {
            Ok(raw) => {
                session.last_activity = now;
                let public_key = match &session.state {
                    PhaseSession::Presign { public_key, .. } => Some(*public_key),
                    _ => None,
                };
                drop(session);
                self.advance(key, role, raw, public_key)
            }
            Err(e) => {
                if e.is_fatal() {
                    drop(session);
                    self.sessions.remove(key);
                    warn!(error = %e, "Session aborted");
                } else {
                    session.last_activity = now;
                }
                Err(e)
            }
        }
    }

    fn advance(
        &self,
        key: &SessionKey,
        role: Role,
        (round, outbound, finished): Raw,
        public_key: Option<ProjectivePoint>,
    ) -> Result<Advance> {
        let outbound = outbound.map(|message| Envelope {
            to: role.peer(),
            message,
        });
        let completed = match finished {
            None => None,
            Some(finished) => {
                self.sessions.remove(key);
                Some(self.store(key, finished, public_key)?)
            }
        };
        debug!(round, done = completed.is_some(), "Session advanced");
        Ok(Advance {
            round,
            outbound,
            completed,
        })
    }

    fn store(
        &self,
        key: &SessionKey,
        finished: Finished,
        public_key: Option<ProjectivePoint>,
    ) -> Result<Completed> {
        let completed = match finished {
            Finished::Keygen(output) => Completed::Keygen(output),
            Finished::Triples(output) => {
                let pairs = self.triples.insert_batch(key, &output);
                Completed::Triples {
                    pairs,
                    dropped: output.dropped.clone(),
                }
            }
            Finished::Presign(output) => {
                let public_key = public_key
                    .ok_or_else(|| Error::Internal("presign session without wallet".into()))?;
                let handle = PresignHandle(key.clone());
                let big_r = output.big_r;
                self.presigns.insert(StoredPresign {
                    handle: handle.clone(),
                    public_key,
                    output,
                });
                Completed::Presign { handle, big_r }
            }
            Finished::Sign(output) => Completed::Sign(output),
        };
        info!(session = %key, "Session completed");
        Ok(completed)
    }

    /// Drop a session regardless of its state
    pub fn abort(&self, key: &SessionKey) -> bool {
        self.sessions.remove(key).is_some()
    }

    /// Live session summary
    pub fn info(&self, key: &SessionKey) -> Result<SessionInfo> {
        let handle = self
            .sessions
            .get(key)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| Error::SessionNotFound(key.to_string()))?;
        let session = handle.lock().map_err(poisoned)?;
        Ok(SessionInfo {
            key: key.clone(),
            phase: session.state.phase(),
            role: session.state.role(),
            created_at: session.created_at,
            last_activity: session.last_activity,
        })
    }

    /// Remove sessions idle longer than the TTL; returns how many went.
    ///
    /// Sessions busy running a round are kept.
    pub fn purge_expired(&self) -> usize {
        self.purge_idle_since(Utc::now())
    }

    fn purge_idle_since(&self, now: DateTime<Utc>) -> usize {
        let ttl = self.config.ttl();
        let before = self.sessions.len();
        self.sessions.retain(|key, session| match session.try_lock() {
            Ok(s) if s.expired(now, ttl) => {
                info!(session = %key, phase = %s.state.phase(), "Purging expired session");
                false
            }
            Ok(_) | Err(TryLockError::WouldBlock) => true,
            Err(TryLockError::Poisoned(_)) => false,
        });
        before.saturating_sub(self.sessions.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keygen::KEYGEN_THRESHOLD;
    use std::collections::VecDeque;
    use std::time::Duration;

    /// Deliver envelopes back and forth until both sides finish
    fn exchange(
        server: &Registry,
        client: &Registry,
        key: &SessionKey,
        first: [Advance; 2],
    ) -> (Completed, Completed) {
        let mut queue: VecDeque<Envelope> = VecDeque::new();
        let mut done: [Option<Completed>; 2] = [None, None];
        for (i, adv) in first.into_iter().enumerate() {
            queue.extend(adv.outbound);
            if adv.completed.is_some() {
                done[i] = adv.completed;
            }
        }
        while let Some(env) = queue.pop_front() {
            let (registry, slot) = match env.to {
                Role::Server => (server, 0),
                Role::Client => (client, 1),
            };
            let adv = registry.deliver(key, env).unwrap();
            queue.extend(adv.outbound);
            if adv.completed.is_some() {
                done[slot] = adv.completed;
            }
        }
        let [s, c] = done;
        (s.unwrap(), c.unwrap())
    }

    fn begin_both(
        server: &Registry,
        client: &Registry,
        key: &SessionKey,
        request: PhaseRequest,
        wallets: (Option<&KeygenOutput>, Option<&KeygenOutput>),
    ) -> (Completed, Completed) {
        let s = server
            .begin(key.clone(), Role::Server, request.clone(), wallets.0)
            .unwrap();
        let c = client
            .begin(key.clone(), Role::Client, request, wallets.1)
            .unwrap();
        exchange(server, client, key, [s, c])
    }

    fn keygen(server: &Registry, client: &Registry, user: &str) -> (KeygenOutput, KeygenOutput) {
        let key = SessionKey::new(user, "keygen");
        let request = PhaseRequest::Keygen {
            threshold: KEYGEN_THRESHOLD,
        };
        match begin_both(server, client, &key, request, (None, None)) {
            (Completed::Keygen(s), Completed::Keygen(c)) => (s, c),
            _ => panic!("keygen produced another phase"),
        }
    }

    #[test]
    fn test_keygen_public_keys_match() {
        let (server, client) = (Registry::default(), Registry::default());
        let (s, c) = keygen(&server, &client, "alice");
        assert_eq!(s.public_key, c.public_key);
        assert_ne!(s.private_share, c.private_share);
        assert!(server.is_empty() && client.is_empty());
    }

    #[test]
    fn test_full_wallet_flow() {
        let (server, client) = (Registry::default(), Registry::default());
        let (ws, wc) = keygen(&server, &client, "alice");

        let tkey = SessionKey::new("alice", "triples");
        let (ts, tc) = begin_both(
            &server,
            &client,
            &tkey,
            PhaseRequest::Triples { count: 1 },
            (None, None),
        );
        let pair = match (ts, tc) {
            (Completed::Triples { pairs: ps, .. }, Completed::Triples { pairs: pc, .. }) => {
                assert_eq!(ps, pc);
                assert_eq!(ps.len(), 1);
                ps[0].clone()
            }
            _ => panic!("triples produced another phase"),
        };

        let pkey = SessionKey::new("alice", "presign");
        let presign = PhaseRequest::Presign {
            triples: pair.clone(),
        };
        let (ps, pc) = begin_both(
            &server,
            &client,
            &pkey,
            presign.clone(),
            (Some(&ws), Some(&wc)),
        );
        match (&ps, &pc) {
            (Completed::Presign { big_r: rs, .. }, Completed::Presign { big_r: rc, .. }) => {
                assert_eq!(rs, rc)
            }
            _ => panic!("presign produced another phase"),
        }

        // the pair is spent
        let again = server.begin(
            SessionKey::new("alice", "presign-2"),
            Role::Server,
            presign,
            Some(&ws),
        );
        assert!(matches!(again, Err(Error::TripleAlreadyConsumed(_))));

        let digest = [0xab; 32];
        let sign = PhaseRequest::Sign {
            presign: pkey.session_id.clone(),
            digest,
        };
        let skey = SessionKey::new("alice", "sign");
        let (ss, sc) = begin_both(&server, &client, &skey, sign.clone(), (None, None));
        match (ss, sc) {
            (Completed::Sign(a), Completed::Sign(b)) => {
                assert_eq!(a, b);
                assert!(a.signature.verify(&ws.public_key, &digest));
            }
            _ => panic!("sign produced another phase"),
        }

        let again = client.begin(
            SessionKey::new("alice", "sign-2"),
            Role::Client,
            sign,
            None,
        );
        assert!(matches!(again, Err(Error::PresignAlreadyConsumed(_))));
    }

    #[test]
    fn test_presign_checks_inputs() {
        let registry = Registry::default();
        let handle = |user: &str, index| TripleHandle {
            session: SessionKey::new(user, "t"),
            index,
        };
        let key = SessionKey::new("alice", "p");

        let missing_wallet = registry.begin(
            key.clone(),
            Role::Server,
            PhaseRequest::Presign {
                triples: [handle("alice", 0), handle("alice", 1)],
            },
            None,
        );
        assert!(matches!(missing_wallet, Err(Error::InvalidConfig(_))));

        let (wallet, _) = crate::keygen::deal_key_shares(&k256::Scalar::from(7u64)).unwrap();
        let foreign = registry.begin(
            key.clone(),
            Role::Server,
            PhaseRequest::Presign {
                triples: [handle("alice", 0), handle("mallory", 1)],
            },
            Some(&wallet),
        );
        assert!(matches!(foreign, Err(Error::InvalidConfig(_))));

        let unknown = registry.begin(
            key,
            Role::Server,
            PhaseRequest::Presign {
                triples: [handle("alice", 0), handle("alice", 1)],
            },
            Some(&wallet),
        );
        assert!(matches!(unknown, Err(Error::TripleNotFound(_))));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_duplicate_session_and_wrong_phase() {
        let registry = Registry::default();
        let key = SessionKey::new("bob", "s1");
        let request = PhaseRequest::Keygen {
            threshold: KEYGEN_THRESHOLD,
        };
        registry
            .begin(key.clone(), Role::Server, request.clone(), None)
            .unwrap();
        assert!(matches!(
            registry.begin(key.clone(), Role::Server, request, None),
            Err(Error::SessionExists(_))
        ));

        let peer = Registry::default();
        let triples_env = peer
            .begin(
                SessionKey::new("bob", "tr"),
                Role::Client,
                PhaseRequest::Triples { count: 1 },
                None,
            )
            .unwrap()
            .outbound
            .unwrap();
        assert!(matches!(
            registry.deliver(&key, triples_env),
            Err(Error::UnexpectedMessage(_))
        ));
        // non-fatal: the session survives
        assert_eq!(registry.info(&key).unwrap().phase, Phase::Keygen);
    }

    #[test]
    fn test_too_many_triples_rejected() {
        let registry = Registry::new(RegistryConfig::new(Duration::from_secs(60), 4, 2).unwrap());
        let result = registry.begin(
            SessionKey::new("bob", "t"),
            Role::Server,
            PhaseRequest::Triples { count: 3 },
            None,
        );
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_expired_session_is_not_resumed() {
        let config = RegistryConfig::new(Duration::from_secs(30), 4, 16).unwrap();
        let (server, client) = (Registry::new(config.clone()), Registry::new(config));
        let key = SessionKey::new("carol", "triples");
        let request = PhaseRequest::Triples { count: 1 };
        let s1 = server
            .begin(key.clone(), Role::Server, request.clone(), None)
            .unwrap()
            .outbound
            .unwrap();
        let c1 = client
            .begin(key.clone(), Role::Client, request, None)
            .unwrap()
            .outbound
            .unwrap();
        let c2 = client.deliver(&key, s1.clone()).unwrap().outbound.unwrap();

        // abandoned mid-run, then swept
        let later = Utc::now() + chrono::Duration::seconds(31);
        assert_eq!(client.purge_idle_since(later), 1);
        assert_eq!(client.purge_idle_since(later), 0);
        assert!(matches!(
            client.deliver(&key, s1),
            Err(Error::SessionNotFound(_))
        ));

        // found expired on delivery before any sweep
        assert!(matches!(
            server.deliver_at(&key, c1, later),
            Err(Error::SessionNotFound(_))
        ));
        assert!(server.is_empty());
        assert!(matches!(
            server.deliver(&key, c2),
            Err(Error::SessionNotFound(_))
        ));
    }

    /// Like [`exchange`], but runs `tamper` on every envelope and stops at the
    /// first delivery that fails, returning the receiving side and its error
    fn exchange_until_abort(
        server: &Registry,
        client: &Registry,
        key: &SessionKey,
        first: [Advance; 2],
        mut tamper: impl FnMut(&mut Envelope),
    ) -> (Role, Error) {
        let mut queue: VecDeque<Envelope> =
            first.into_iter().flat_map(|adv| adv.outbound).collect();
        while let Some(mut env) = queue.pop_front() {
            tamper(&mut env);
            let to = env.to;
            let registry = if to == Role::Server { server } else { client };
            match registry.deliver(key, env) {
                Ok(adv) => queue.extend(adv.outbound),
                Err(e) => return (to, e),
            }
        }
        panic!("every envelope was accepted");
    }

    fn begin_keygen(server: &Registry, client: &Registry, key: &SessionKey) -> [Advance; 2] {
        let request = PhaseRequest::Keygen {
            threshold: KEYGEN_THRESHOLD,
        };
        let s = server
            .begin(key.clone(), Role::Server, request.clone(), None)
            .unwrap();
        let c = client.begin(key.clone(), Role::Client, request, None).unwrap();
        [s, c]
    }

    #[test]
    fn test_tampered_ot_matrix_aborts() {
        let (server, client) = (Registry::default(), Registry::default());
        let key = SessionKey::new("dave", "triples");
        let request = PhaseRequest::Triples { count: 1 };
        let s = server
            .begin(key.clone(), Role::Server, request.clone(), None)
            .unwrap();
        let c = client.begin(key.clone(), Role::Client, request, None).unwrap();

        let (victim, error) = exchange_until_abort(&server, &client, &key, [s, c], |env| {
            if let PhaseMessage::Triples(msg) = &mut env.message {
                if let Some(matrices) = msg.correlated_ot_wait_0.as_mut() {
                    matrices.payload.pop();
                }
            }
        });

        assert_eq!(victim, Role::Client);
        assert!(matches!(error, Error::OtDesync(_)));
        assert!(matches!(
            client.info(&key),
            Err(Error::SessionNotFound(_))
        ));
        assert!(server.info(&key).is_ok());
    }

    #[test]
    fn test_forged_keygen_proof_aborts() {
        let (server, client) = (Registry::default(), Registry::default());
        let key = SessionKey::new("erin", "keygen");
        let first = begin_keygen(&server, &client, &key);

        // client's proof of its secret no longer verifies
        let (victim, error) = exchange_until_abort(&server, &client, &key, first, |env| {
            if let (Role::Server, PhaseMessage::Keygen(msg)) = (env.to, &mut env.message) {
                if let Some(proof) = msg.wait_2.as_mut() {
                    proof.payload.s += k256::Scalar::ONE;
                }
            }
        });

        assert_eq!(victim, Role::Server);
        assert!(error.is_fatal());
        assert!(matches!(error, Error::ProofVerificationFailed(_)));
        assert!(matches!(
            server.info(&key),
            Err(Error::SessionNotFound(_))
        ));
    }

    #[test]
    fn test_public_key_mismatch_aborts() {
        let (server, client) = (Registry::default(), Registry::default());
        let key = SessionKey::new("frank", "keygen");
        let first = begin_keygen(&server, &client, &key);

        let (victim, error) = exchange_until_abort(&server, &client, &key, first, |env| {
            if let (Role::Server, PhaseMessage::Keygen(msg)) = (env.to, &mut env.message) {
                if let Some(public_key) = msg.wait_4.as_mut() {
                    public_key.payload.0 = k256::ProjectivePoint::GENERATOR;
                }
            }
        });

        assert_eq!(victim, Role::Server);
        assert!(matches!(error, Error::PublicKeyMismatch));
        assert!(matches!(
            server.info(&key),
            Err(Error::SessionNotFound(_))
        ));
        assert!(server.is_empty());
    }
}
