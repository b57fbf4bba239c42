//! ENS reverse resolution over raw JSON-RPC.
//!
//! We only need two `eth_call`s, so we hand-roll the minimal ABI instead of
//! pulling in a chain SDK:
//! 1. registry.resolver(node): find the resolver for `<addr>.addr.reverse`
//! 2. resolver.name(node): read the reverse record
//!
//! A zero resolver or an empty name both mean "no name registered".

use anyhow::{bail, Context};
use async_trait::async_trait;
use serde::Deserialize;
use tiny_keccak::{Hasher, Keccak};
use tracing::debug;

use super::NameResolver;

/// The ENS registry, same address on mainnet and the major testnets.
const ENS_REGISTRY: &str = "0x00000000000C2E074eC69A0dFb2997BA6C7d2e1e";

/// First four bytes of keccak256("resolver(bytes32)").
const RESOLVER_SELECTOR: [u8; 4] = [0x01, 0x78, 0xb8, 0xbf];

/// First four bytes of keccak256("name(bytes32)").
const NAME_SELECTOR: [u8; 4] = [0x69, 0x1f, 0x34, 0x31];

/// Compute keccak256 hash of a byte slice.
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    let mut output = [0u8; 32];
    hasher.update(data);
    hasher.finalize(&mut output);
    output
}

/// EIP-137 namehash.
pub fn namehash(name: &str) -> [u8; 32] {
    let mut node = [0u8; 32];
    if name.is_empty() {
        return node;
    }
    for label in name.rsplit('.') {
        let label_hash = keccak256(label.as_bytes());
        let mut buf = [0u8; 64];
        buf[..32].copy_from_slice(&node);
        buf[32..].copy_from_slice(&label_hash);
        node = keccak256(&buf);
    }
    node
}

// --- Wire types ---

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

/// Reverse resolver talking to an Ethereum JSON-RPC node.
pub struct RpcNameResolver {
    http: reqwest::Client,
    rpc_url: String,
}

impl RpcNameResolver {
    pub fn new(rpc_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            rpc_url: rpc_url.to_string(),
        }
    }

    async fn eth_call(&self, to: &str, data: &str) -> anyhow::Result<String> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "eth_call",
            "params": [{"to": to, "data": data}, "latest"],
        });

        let resp: RpcResponse = self
            .http
            .post(&self.rpc_url)
            .json(&body)
            .send()
            .await
            .context("rpc request failed")?
            .error_for_status()
            .context("rpc returned error status")?
            .json()
            .await
            .context("rpc returned unparseable body")?;

        if let Some(err) = resp.error {
            bail!("rpc error {}: {}", err.code, err.message);
        }
        resp.result
            .ok_or_else(|| anyhow::anyhow!("rpc response missing result"))
    }
}

#[async_trait]
impl NameResolver for RpcNameResolver {
    /// Reverse-resolve an address to its ENS name. `Ok(None)` means no name
    /// is registered; `Err` means the lookup itself failed.
    async fn lookup_address(&self, address: &str) -> anyhow::Result<Option<String>> {
        let addr = address.to_lowercase();
        let bare = addr.strip_prefix("0x").unwrap_or(&addr);
        let node = namehash(&format!("{}.addr.reverse", bare));

        let resolver_word = self
            .eth_call(ENS_REGISTRY, &abi_call(RESOLVER_SELECTOR, &node))
            .await
            .context("registry resolver() call failed")?;
        let Some(resolver) = decode_address_word(&resolver_word)? else {
            debug!(address = %addr, "no reverse resolver set");
            return Ok(None);
        };

        let name_word = self
            .eth_call(&resolver, &abi_call(NAME_SELECTOR, &node))
            .await
            .context("resolver name() call failed")?;
        let name = decode_abi_string(&name_word)?;

        Ok(name.filter(|n| !n.is_empty()))
    }
}

/// Build `eth_call` data: selector followed by one bytes32 argument.
fn abi_call(selector: [u8; 4], node: &[u8; 32]) -> String {
    format!("0x{}{}", hex::encode(selector), hex::encode(node))
}

fn strip_hex(raw: &str) -> &str {
    raw.strip_prefix("0x").unwrap_or(raw)
}

/// Decode a single ABI word holding an address. Returns `None` for the zero
/// address or an empty return (no code at the callee).
fn decode_address_word(raw: &str) -> anyhow::Result<Option<String>> {
    let bytes = hex::decode(strip_hex(raw)).context("invalid hex in rpc result")?;
    if bytes.len() < 32 {
        return Ok(None);
    }
    let addr = &bytes[12..32];
    if addr.iter().all(|b| *b == 0) {
        return Ok(None);
    }
    Ok(Some(format!("0x{}", hex::encode(addr))))
}

/// Decode an ABI-encoded dynamic string return value.
fn decode_abi_string(raw: &str) -> anyhow::Result<Option<String>> {
    let bytes = hex::decode(strip_hex(raw)).context("invalid hex in rpc result")?;
    if bytes.len() < 64 {
        return Ok(None);
    }

    let offset = word_as_usize(&bytes[..32]).context("abi string offset out of range")?;
    let len_end = offset
        .checked_add(32)
        .filter(|end| *end <= bytes.len())
        .context("abi string offset past end of data")?;
    let len = word_as_usize(&bytes[offset..len_end]).context("abi string length out of range")?;
    let data_end = len_end
        .checked_add(len)
        .filter(|end| *end <= bytes.len())
        .context("abi string length past end of data")?;

    let name = String::from_utf8(bytes[len_end..data_end].to_vec())
        .context("ens name is not valid utf-8")?;
    Ok(Some(name))
}

/// Interpret a 32-byte big-endian ABI word as a usize. Errors if any of the
/// high bytes are set.
fn word_as_usize(word: &[u8]) -> anyhow::Result<usize> {
    if word.len() != 32 || word[..24].iter().any(|b| *b != 0) {
        bail!("abi word does not fit in usize");
    }
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&word[24..]);
    Ok(u64::from_be_bytes(buf) as usize)
}
