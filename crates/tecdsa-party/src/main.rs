//! Two-party ECDSA client CLI
//!
//! Runs the client party of a wallet against a tecdsa server:
//! - Distributed Key Generation (keygen)
//! - Beaver triple batches (triples)
//! - Presignatures (presign)
//! - One-round signing (sign)

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tecdsa_client::{HttpTransport, ServerClient, ServerOutcome};
use tecdsa_core::chain;
use tecdsa_core::keygen::{KeygenOutput, KEYGEN_THRESHOLD};
use tecdsa_core::session::{
    Completed, PhaseRequest, PublicOutput, Registry, StoredPresign, StoredTriple, TripleHandle,
};
use tecdsa_core::{Phase, SessionId, SessionKey, UserId};
use tracing::{info, warn, Level};
use uuid::Uuid;

/// tecdsa party - client side of a two-party wallet
#[derive(Parser)]
#[command(name = "tecdsa-party")]
#[command(about = "Client party for two-party threshold ECDSA")]
#[command(version)]
struct Cli {
    /// Server URL
    #[arg(short, long, env = "TECDSA_SERVER_URL", default_value = "http://127.0.0.1:8080")]
    server: String,

    /// Wallet owner
    #[arg(short, long, env = "TECDSA_USER_ID")]
    user_id: String,

    /// Data directory for the key share and stored triples
    #[arg(short, long, env = "TECDSA_DEST", default_value = "./data")]
    dest: PathBuf,

    /// Log as JSON lines
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run distributed key generation
    Keygen,

    /// Generate presign-ready triple pairs
    Triples {
        /// Number of pairs
        #[arg(short, long, default_value = "1")]
        count: usize,
    },

    /// Turn one stored triple pair into a presignature
    Presign,

    /// Sign with a stored presignature
    Sign {
        /// Hex-encoded 32-byte digest
        #[arg(short, long, conflicts_with = "message", required_unless_present = "message")]
        digest: Option<String>,

        /// Message to hash before signing
        #[arg(short, long)]
        message: Option<String>,

        /// How `--message` is hashed
        #[arg(long, value_enum, default_value = "eth")]
        scheme: Scheme,

        /// Presign session id; the oldest unused one when absent
        #[arg(short, long)]
        presign: Option<String>,
    },

    /// Show wallet info
    Info,
}

#[derive(Clone, Copy, ValueEnum)]
enum Scheme {
    /// EIP-191 personal message
    Eth,
    /// SHA-256, as Cosmos signers use
    Cosmos,
}

/// Unused triples and presignatures kept between runs
#[derive(Default, Serialize, Deserialize)]
struct LocalState {
    /// Pairs both parties hold
    pairs: Vec<[TripleHandle; 2]>,
    triples: Vec<StoredTriple>,
    presigns: Vec<StoredPresign>,
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into());
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    // Ensure data directory exists
    std::fs::create_dir_all(&cli.dest)?;

    let transport = HttpTransport::new(ServerClient::new(&cli.server));

    match cli.command {
        Commands::Keygen => {
            run_keygen(&cli, &transport).await?;
        }
        Commands::Triples { count } => {
            run_triples(&cli, &transport, count).await?;
        }
        Commands::Presign => {
            run_presign(&cli, &transport).await?;
        }
        Commands::Sign {
            ref digest,
            ref message,
            scheme,
            ref presign,
        } => {
            let digest = parse_digest(digest.as_deref(), message.as_deref(), scheme)?;
            run_sign(&cli, &transport, digest, presign.as_deref()).await?;
        }
        Commands::Info => {
            show_info(&cli, &transport).await?;
        }
    }

    Ok(())
}

fn user(cli: &Cli) -> UserId {
    UserId(cli.user_id.clone())
}

fn new_session(cli: &Cli, phase: Phase) -> SessionKey {
    SessionKey::new(cli.user_id.clone(), format!("{phase}-{}", Uuid::new_v4()))
}

fn parse_digest(digest: Option<&str>, message: Option<&str>, scheme: Scheme) -> Result<[u8; 32]> {
    match (digest, message) {
        (Some(hex_digest), _) => hex::decode(hex_digest.trim_start_matches("0x"))?
            .try_into()
            .map_err(|_| anyhow::anyhow!("Digest must be 32 bytes")),
        (None, Some(message)) => Ok(match scheme {
            Scheme::Eth => chain::eip191_hash(message.as_bytes()),
            Scheme::Cosmos => chain::sha256(message.as_bytes()),
        }),
        (None, None) => bail!("Either --digest or --message is required"),
    }
}

fn key_share_path(cli: &Cli) -> PathBuf {
    cli.dest.join(format!("keyshare.{}.json", cli.user_id))
}

fn state_path(cli: &Cli) -> PathBuf {
    cli.dest.join(format!("state.{}.json", cli.user_id))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let json = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(serde_json::from_str(&json)?)
}

fn load_key_share(cli: &Cli) -> Result<KeygenOutput> {
    read_json(&key_share_path(cli)).context("no key share; run keygen first")
}

fn load_state(cli: &Cli) -> Result<LocalState> {
    let path = state_path(cli);
    if path.exists() {
        read_json(&path)
    } else {
        Ok(LocalState::default())
    }
}

/// A local registry holding the stored triples and presignatures
fn registry_with(state: &LocalState) -> Registry {
    let registry = Registry::default();
    registry.triples().import(state.triples.clone());
    registry.presigns().import(state.presigns.clone());
    registry
}

fn save_state(cli: &Cli, registry: &Registry, pairs: Vec<[TripleHandle; 2]>) -> Result<()> {
    let user = user(cli);
    let available = registry.triples().available(&user);
    let state = LocalState {
        pairs: pairs
            .into_iter()
            .filter(|pair| pair.iter().all(|h| available.contains(h)))
            .collect(),
        triples: registry.triples().export(&user),
        presigns: registry.presigns().export(&user),
    };
    write_json(&state_path(cli), &state)
}

/// Keep only pairs the server reported holding as well
fn agreed_pairs(local: Vec<[TripleHandle; 2]>, server: Option<&ServerOutcome>) -> Vec<[TripleHandle; 2]> {
    match server.map(|s| &s.output) {
        Some(PublicOutput::Triples { pairs, .. }) => {
            local.into_iter().filter(|p| pairs.contains(p)).collect()
        }
        _ => {
            warn!("Server did not report its pairs; keeping local ones");
            local
        }
    }
}

async fn run_keygen(cli: &Cli, transport: &HttpTransport) -> Result<()> {
    let key = new_session(cli, Phase::Keygen);
    info!(session = %key, "Starting keygen");

    let registry = Registry::default();
    let request = PhaseRequest::Keygen {
        threshold: KEYGEN_THRESHOLD,
    };
    let (result, outcome) = transport.run(&registry, &key, request, None).await?;
    let Completed::Keygen(key_share) = result.completed else {
        bail!("keygen finished with an unexpected output");
    };

    if let Some(ServerOutcome {
        output: PublicOutput::Keygen { public_key },
        wallet,
    }) = &outcome
    {
        if *public_key != key_share.public_key {
            bail!("server derived a different public key");
        }
        info!(wallet = ?wallet, "Server stored its share");
    }

    // Save key share; stored triples belong to the previous key
    let path = key_share_path(cli);
    write_json(&path, &key_share)?;
    write_json(&state_path(cli), &LocalState::default())?;

    let public_key = hex::encode(key_share.public_key_bytes());
    info!(public_key = %public_key, path = ?path, "Keygen completed, key share saved");

    println!("Public Key: {public_key}");
    println!(
        "Ethereum: {}",
        chain::eth_checksum(&chain::eth_address(&key_share.public_key))
    );
    Ok(())
}

async fn run_triples(cli: &Cli, transport: &HttpTransport, count: usize) -> Result<()> {
    let state = load_state(cli)?;
    let registry = registry_with(&state);
    let key = new_session(cli, Phase::Triples);
    info!(session = %key, count, "Starting triples");

    let (result, outcome) = transport
        .run(&registry, &key, PhaseRequest::Triples { count }, None)
        .await?;
    let Completed::Triples { pairs, dropped } = result.completed else {
        bail!("triples finished with an unexpected output");
    };
    if !dropped.is_empty() {
        warn!(?dropped, "Triple lanes dropped");
    }

    let agreed = agreed_pairs(pairs, outcome.as_ref());
    println!("Pairs ready: {}", agreed.len());

    let mut all = state.pairs;
    all.extend(agreed);
    save_state(cli, &registry, all)
}

async fn run_presign(cli: &Cli, transport: &HttpTransport) -> Result<()> {
    let key_share = load_key_share(cli)?;
    let mut state = load_state(cli)?;
    let registry = registry_with(&state);

    let available = registry.triples().available(&user(cli));
    let Some(position) = state
        .pairs
        .iter()
        .position(|pair| pair.iter().all(|h| available.contains(h)))
    else {
        bail!("no stored triple pair; run triples first");
    };
    let pair = state.pairs.remove(position);

    let key = new_session(cli, Phase::Presign);
    info!(session = %key, nonce = %pair[0], mask = %pair[1], "Starting presign");

    let request = PhaseRequest::Presign { triples: pair };
    let run = transport.run(&registry, &key, request, Some(&key_share)).await;
    // The pair is spent whether or not the run finished
    save_state(cli, &registry, state.pairs)?;

    let (result, _) = run?;
    let Completed::Presign { handle, big_r } = result.completed else {
        bail!("presign finished with an unexpected output");
    };

    println!("Presignature: {}", handle.0.session_id);
    println!("  R: {}", hex::encode(tecdsa_core::types::point_to_bytes(&big_r)));
    Ok(())
}

async fn run_sign(
    cli: &Cli,
    transport: &HttpTransport,
    digest: [u8; 32],
    presign: Option<&str>,
) -> Result<()> {
    let key_share = load_key_share(cli)?;
    let state = load_state(cli)?;
    let registry = registry_with(&state);

    let presign = match presign {
        Some(id) => SessionId(id.to_string()),
        None => match registry.presigns().available(&user(cli)).first() {
            Some(handle) => handle.0.session_id.clone(),
            None => bail!("no stored presignature; run presign first"),
        },
    };

    let key = new_session(cli, Phase::Sign);
    info!(session = %key, %presign, digest = %hex::encode(digest), "Starting sign");

    let request = PhaseRequest::Sign {
        presign: presign.clone(),
        digest,
    };
    let run = transport.run(&registry, &key, request, None).await;
    save_state(cli, &registry, state.pairs)?;

    let (result, _) = run?;
    let Completed::Sign(output) = result.completed else {
        bail!("sign finished with an unexpected output");
    };
    if !output.signature.verify(&key_share.public_key, &digest) {
        bail!("signature does not verify under the wallet key");
    }

    info!(presign = %presign, "Signature generated");

    // Print signature
    println!("Signature:");
    println!("  r: {}", hex::encode(output.signature.r().to_bytes()));
    println!("  s: {}", hex::encode(output.signature.s.to_bytes()));
    println!("  v: {}", output.recovery_id().to_byte());
    println!("  DER: {}", hex::encode(output.signature.to_der()?));
    println!("  r||s||v: {}", hex::encode(output.to_recoverable()));
    Ok(())
}

async fn show_info(cli: &Cli, transport: &HttpTransport) -> Result<()> {
    let key_share = load_key_share(cli)?;
    let state = load_state(cli)?;

    println!("Wallet Info:");
    println!("  User: {}", cli.user_id);
    println!("  Public Key: {}", hex::encode(key_share.public_key_bytes()));
    println!(
        "  Ethereum: {}",
        chain::eth_checksum(&chain::eth_address(&key_share.public_key))
    );
    println!(
        "  Cosmos: {}",
        hex::encode(chain::cosmos_address(&key_share.public_key))
    );
    println!("  Triple Pairs: {}", state.pairs.len());
    println!("  Presignatures: {}", state.presigns.len());

    match transport.server().wallet_info(&user(cli)).await {
        Ok(remote) => {
            println!("  Server Triples: {}", remote.triples_available);
            println!("  Server Presignatures: {}", remote.presigns_available);
            if remote.public_key.as_deref() != Some(hex::encode(key_share.public_key_bytes()).as_str()) {
                warn!("Server holds a different wallet for this user");
            }
        }
        Err(e) => warn!(error = %e, "Server unreachable"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tecdsa_core::session::PresignHandle;

    fn pair(session: &str, first: usize) -> [TripleHandle; 2] {
        let session = SessionKey::new("alice", session);
        [
            TripleHandle {
                session: session.clone(),
                index: first,
            },
            TripleHandle {
                session,
                index: first + 1,
            },
        ]
    }

    #[test]
    fn test_parse_digest() {
        let hex_digest = "ab".repeat(32);
        assert_eq!(
            parse_digest(Some(&hex_digest), None, Scheme::Eth).unwrap(),
            [0xab; 32]
        );
        assert_eq!(
            parse_digest(Some(&format!("0x{hex_digest}")), None, Scheme::Eth).unwrap(),
            [0xab; 32]
        );
        assert!(parse_digest(Some("abcd"), None, Scheme::Eth).is_err());
        assert_eq!(
            parse_digest(None, Some("hello world"), Scheme::Eth).unwrap(),
            chain::eip191_hash(b"hello world")
        );
        assert_eq!(
            parse_digest(None, Some("hello world"), Scheme::Cosmos).unwrap(),
            chain::sha256(b"hello world")
        );
        assert!(parse_digest(None, None, Scheme::Eth).is_err());
    }

    #[test]
    fn test_agreed_pairs() {
        let local = vec![pair("t", 0), pair("t", 2)];
        let server = ServerOutcome {
            output: PublicOutput::Triples {
                pairs: vec![pair("t", 2)],
                dropped: vec![0],
            },
            wallet: None,
        };
        assert_eq!(agreed_pairs(local.clone(), Some(&server)), vec![pair("t", 2)]);
        assert_eq!(agreed_pairs(local.clone(), None), local);

        let unrelated = ServerOutcome {
            output: PublicOutput::Presign {
                handle: PresignHandle(SessionKey::new("alice", "p")),
                big_r: k256::ProjectivePoint::GENERATOR,
            },
            wallet: None,
        };
        assert_eq!(agreed_pairs(local.clone(), Some(&unrelated)), local);
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from([
            "tecdsa-party",
            "--user-id",
            "alice",
            "sign",
            "--message",
            "hi",
            "--scheme",
            "cosmos",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Sign {
                scheme: Scheme::Cosmos,
                ..
            }
        ));
        assert!(Cli::try_parse_from(["tecdsa-party", "--user-id", "alice", "sign"]).is_err());
    }
}
