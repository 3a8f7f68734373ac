//! Chain-specific digests and addresses for a wallet public key

use k256::{elliptic_curve::sec1::ToEncodedPoint, ProjectivePoint};
use ripemd::Ripemd160;
use sha2::{Digest, Sha256};
use sha3::Keccak256;

/// Keccak-256 of `data`
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    Keccak256::digest(data).into()
}

/// EIP-191 `personal_sign` hash
pub fn eip191_hash(message: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(b"\x19Ethereum Signed Message:\n");
    hasher.update(message.len().to_string().as_bytes());
    hasher.update(message);
    hasher.finalize().into()
}

/// SHA-256 of `data`, the digest Cosmos signers sign
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// 20-byte Ethereum address: last 20 bytes of keccak(uncompressed x || y)
pub fn eth_address(public_key: &ProjectivePoint) -> [u8; 20] {
    let encoded = public_key.to_affine().to_encoded_point(false);
    let hash = keccak256(&encoded.as_bytes()[1..]);
    let mut address = [0u8; 20];
    address.copy_from_slice(&hash[12..]);
    address
}

/// EIP-55 mixed-case hex of an address, with `0x` prefix
pub fn eth_checksum(address: &[u8; 20]) -> String {
    let lower = hex::encode(address);
    let hash = keccak256(lower.as_bytes());
    let mixed: String = lower
        .chars()
        .enumerate()
        .map(|(i, c)| {
            let nibble = (hash[i / 2] >> (4 * (1 - i % 2))) & 0x0f;
            if c.is_ascii_alphabetic() && nibble >= 8 {
                c.to_ascii_uppercase()
            } else {
                c
            }
        })
        .collect();
    format!("0x{mixed}")
}

/// Cosmos account bytes: ripemd160(sha256(compressed key))
pub fn cosmos_address(public_key: &ProjectivePoint) -> [u8; 20] {
    let encoded = public_key.to_affine().to_encoded_point(true);
    Ripemd160::digest(sha256(encoded.as_bytes())).into()
}
