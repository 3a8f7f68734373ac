//! # tecdsa-core
//!
//! Two-party threshold ECDSA over secp256k1.
//!
//! This crate provides the protocol engine for a client/server wallet:
//! - Distributed Key Generation (keygen)
//! - Beaver triple generation over OT-based multiplication (triples)
//! - Presignature computation (presign)
//! - One-round signing (sign)
//!
//! ## Protocol Overview
//!
//! Neither party ever holds the full private key. Keygen and triples run
//! independently; presign combines a key share with two unused triples into
//! a nonce before the message is known, and sign finishes in a single round.
//! Every phase is a round machine driven by a [`session::Registry`], which
//! enforces round order and one-shot use of triples and presignatures.
//!
//! ## Example
//!
//! ```rust,ignore
//! use tecdsa_core::{mpc, session::{PhaseRequest, Registry}, Role, SessionKey};
//!
//! let registry = Registry::default();
//! let key = SessionKey::new("alice", "keygen-1");
//! let request = PhaseRequest::Keygen { threshold: 2 };
//! let result = mpc::run_phase(&registry, &transport, &key, Role::Client, request, None).await?;
//! ```

pub mod api;
pub mod chain;
pub mod config;
pub mod crypto;
pub mod custody;
pub mod error;
pub mod keygen;
pub mod mpc;
pub mod oblivious;
pub mod presign;
pub mod protocol;
pub mod session;
pub mod sign;
pub mod triples;
pub mod types;

pub use config::RegistryConfig;
pub use error::{Error, ErrorClass, Result};
pub use types::{Phase, Role, SessionId, SessionKey, UserId};

/// Protocol version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
