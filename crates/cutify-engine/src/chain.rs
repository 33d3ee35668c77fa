use std::thread;
use std::time::Duration;

use alloy_primitives::{keccak256, U256};
use anyhow::{bail, Context, Result};
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Value};

use cutify_contracts::assets::{NftAttribute, NftReference};
use cutify_contracts::errors::{MintError, QueryError, WithdrawError};

use crate::fetch::http_url_for;
use crate::{error_chain_text, non_empty_env, truncate_text};

/// Read side of the source collection: which NFTs does this wallet own.
pub trait CollectionQuery: Send + Sync {
    fn fetch_owned_assets(&self, owner: &str) -> Result<Vec<NftReference>, QueryError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintReceipt {
    pub hash: String,
    /// Minted token id, when the receipt logs carry a Transfer for it.
    pub token_id: Option<u64>,
}

/// The mutant contract surface the app touches: three reads and two
/// payable/owner-gated writes.
pub trait MutationContract: Send + Sync {
    fn owner(&self) -> Result<String, QueryError>;
    fn mutation_fee(&self) -> Result<u128, QueryError>;
    fn treasury_balance(&self) -> Result<u128, QueryError>;
    fn mint(
        &self,
        origin_contract: &str,
        origin_token_id: &str,
        metadata_uri: &str,
    ) -> Result<MintReceipt, MintError>;
    fn withdraw(&self) -> Result<String, WithdrawError>;
}

const RECEIPT_POLL_ATTEMPTS: usize = 60;
const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(2);
const RPC_TIMEOUT: Duration = Duration::from_secs(30);

/// Minimal JSON-RPC 1-shot client over blocking HTTP.
struct RpcClient {
    endpoint: String,
    http: HttpClient,
}

impl RpcClient {
    fn new(endpoint: String) -> Self {
        Self {
            endpoint,
            http: HttpClient::new(),
        }
    }

    fn call(&self, method: &str, params: Value) -> Result<Value> {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        let response = self
            .http
            .post(&self.endpoint)
            .timeout(RPC_TIMEOUT)
            .json(&payload)
            .send()
            .with_context(|| format!("rpc request failed ({method})"))?;
        let status = response.status();
        let body = response.text().context("rpc response body read failed")?;
        if !status.is_success() {
            bail!(
                "rpc request failed ({method}, {}): {}",
                status.as_u16(),
                truncate_text(&body, 512)
            );
        }
        let parsed: Value =
            serde_json::from_str(&body).context("rpc returned invalid JSON payload")?;
        if let Some(error) = parsed.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown rpc error");
            bail!("rpc error ({method}): {message}");
        }
        Ok(parsed.get("result").cloned().unwrap_or(Value::Null))
    }
}

/// JSON-RPC implementation of both chain traits, bound to one source
/// collection and one mutant contract.
pub struct RpcChainClient {
    rpc: RpcClient,
    http: HttpClient,
    collection_address: String,
    contract_address: String,
    sender_override: Option<String>,
}

impl RpcChainClient {
    pub fn new(
        endpoint: impl Into<String>,
        collection_address: impl Into<String>,
        contract_address: impl Into<String>,
    ) -> Self {
        Self {
            rpc: RpcClient::new(endpoint.into()),
            http: HttpClient::new(),
            collection_address: collection_address.into(),
            contract_address: contract_address.into(),
            sender_override: non_empty_env("CUTIFY_ACCOUNT"),
        }
    }

    /// Reads `CUTIFY_RPC_URL` plus the contract addresses, with the
    /// source collection defaulting to the fixed Warplets contract.
    pub fn from_env() -> Result<Self> {
        let Some(endpoint) = non_empty_env("CUTIFY_RPC_URL") else {
            bail!("CUTIFY_RPC_URL not set");
        };
        let Some(contract_address) = non_empty_env("CUTIFY_CONTRACT_ADDRESS") else {
            bail!("CUTIFY_CONTRACT_ADDRESS not set");
        };
        let collection_address = non_empty_env("CUTIFY_COLLECTION_ADDRESS")
            .unwrap_or_else(|| cutify_contracts::assets::COLLECTION_CONTRACT.to_string());
        Ok(Self::new(endpoint, collection_address, contract_address))
    }

    fn eth_call(&self, to: &str, data: &str) -> Result<String> {
        let result = self
            .rpc
            .call("eth_call", json!([{ "to": to, "data": data }, "latest"]))?;
        Ok(result.as_str().unwrap_or_default().to_string())
    }

    /// The account writes are sent from: `CUTIFY_ACCOUNT` when set,
    /// otherwise the node's first managed account.
    fn sender(&self) -> Result<String> {
        if let Some(account) = &self.sender_override {
            return Ok(account.clone());
        }
        let accounts = self.rpc.call("eth_accounts", json!([]))?;
        let first = accounts
            .as_array()
            .and_then(|list| list.first())
            .and_then(Value::as_str)
            .unwrap_or_default();
        if first.is_empty() {
            bail!("no account available for sending transactions");
        }
        Ok(first.to_string())
    }

    fn send_transaction(&self, data: &str, value_wei: Option<u128>) -> Result<String> {
        let from = self.sender()?;
        let mut tx = json!({
            "from": from,
            "to": self.contract_address,
            "data": data,
        });
        if let Some(value) = value_wei {
            tx["value"] = Value::String(format!("{value:#x}"));
        }
        let result = self.rpc.call("eth_sendTransaction", json!([tx]))?;
        let hash = result.as_str().unwrap_or_default().to_string();
        if hash.is_empty() {
            bail!("eth_sendTransaction returned no hash");
        }
        Ok(hash)
    }

    fn wait_for_receipt(&self, hash: &str) -> Result<Value> {
        for _ in 0..RECEIPT_POLL_ATTEMPTS {
            let receipt = self
                .rpc
                .call("eth_getTransactionReceipt", json!([hash]))?;
            if !receipt.is_null() {
                let status = receipt
                    .get("status")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                if status == "0x0" {
                    bail!("transaction reverted ({hash})");
                }
                return Ok(receipt);
            }
            thread::sleep(RECEIPT_POLL_INTERVAL);
        }
        bail!("timed out waiting for transaction receipt ({hash})")
    }

    fn read_u256(&self, to: &str, data: &str) -> Result<U256> {
        let raw = self.eth_call(to, data)?;
        decode_u256(&raw)
    }

    fn fetch_token_metadata(&self, token_id: &str, token_uri: &str) -> Result<NftReference> {
        let url = http_url_for(token_uri);
        let response = self
            .http
            .get(&url)
            .timeout(RPC_TIMEOUT)
            .send()
            .with_context(|| format!("failed fetching token metadata ({url})"))?;
        if !response.status().is_success() {
            bail!(
                "token metadata fetch failed ({})",
                response.status().as_u16()
            );
        }
        let metadata: Value = response
            .json()
            .context("token metadata is not valid JSON")?;

        let attributes = metadata
            .get("attributes")
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|entry| {
                        let trait_type = entry.get("trait_type").and_then(Value::as_str)?;
                        let value = match entry.get("value")? {
                            Value::String(text) => text.clone(),
                            other => other.to_string(),
                        };
                        Some(NftAttribute::new(trait_type, value))
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(NftReference {
            token_id: token_id.to_string(),
            contract_address: self.collection_address.clone(),
            name: metadata
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            description: metadata
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            image: metadata
                .get("image")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            attributes,
        })
    }
}

impl CollectionQuery for RpcChainClient {
    fn fetch_owned_assets(&self, owner: &str) -> Result<Vec<NftReference>, QueryError> {
        let run = || -> Result<Vec<NftReference>> {
            let balance_data = encode_call("balanceOf(address)", &[abi_address(owner)?]);
            let count = self.read_u256(&self.collection_address, &balance_data)?;
            let count = u64::try_from(count).context("owned-token count out of range")?;

            let mut owned = Vec::new();
            for index in 0..count {
                let index_data = encode_call(
                    "tokenOfOwnerByIndex(address,uint256)",
                    &[abi_address(owner)?, abi_u256(U256::from(index))],
                );
                let token = self.read_u256(&self.collection_address, &index_data)?;
                let token_id = token.to_string();

                let uri_data = encode_call("tokenURI(uint256)", &[abi_u256(token)]);
                let raw_uri = self.eth_call(&self.collection_address, &uri_data)?;
                let token_uri = decode_abi_string(&raw_uri)?;

                // A single bad metadata record drops that asset, not the
                // whole gallery.
                match self.fetch_token_metadata(&token_id, &token_uri) {
                    Ok(reference) => owned.push(reference),
                    Err(_) => continue,
                }
            }
            Ok(owned)
        };
        run().map_err(|err| QueryError(error_chain_text(&err, 512)))
    }
}

impl MutationContract for RpcChainClient {
    fn owner(&self) -> Result<String, QueryError> {
        let run = || -> Result<String> {
            let raw = self.eth_call(&self.contract_address, &encode_call("owner()", &[]))?;
            decode_address(&raw)
        };
        run().map_err(|err| QueryError(error_chain_text(&err, 512)))
    }

    fn mutation_fee(&self) -> Result<u128, QueryError> {
        let run = || -> Result<u128> {
            let fee =
                self.read_u256(&self.contract_address, &encode_call("mutationFee()", &[]))?;
            u128::try_from(fee).context("mutation fee out of range")
        };
        run().map_err(|err| QueryError(error_chain_text(&err, 512)))
    }

    fn treasury_balance(&self) -> Result<u128, QueryError> {
        let run = || -> Result<u128> {
            let result = self.rpc.call(
                "eth_getBalance",
                json!([self.contract_address, "latest"]),
            )?;
            let balance = decode_u256(result.as_str().unwrap_or_default())?;
            u128::try_from(balance).context("balance out of range")
        };
        run().map_err(|err| QueryError(error_chain_text(&err, 512)))
    }

    fn mint(
        &self,
        origin_contract: &str,
        origin_token_id: &str,
        metadata_uri: &str,
    ) -> Result<MintReceipt, MintError> {
        let run = || -> Result<MintReceipt> {
            let fee = self
                .mutation_fee()
                .map_err(|err| anyhow::anyhow!(err.to_string()))?;
            let data = encode_mint_mutant(origin_contract, origin_token_id, metadata_uri)?;
            let hash = self.send_transaction(&data, Some(fee))?;
            let receipt = self.wait_for_receipt(&hash)?;
            let token_id = token_id_from_receipt(&receipt, &self.contract_address);
            Ok(MintReceipt { hash, token_id })
        };
        run().map_err(|err| MintError(error_chain_text(&err, 512)))
    }

    fn withdraw(&self) -> Result<String, WithdrawError> {
        let run = || -> Result<String> {
            let hash = self.send_transaction(&encode_call("withdraw()", &[]), None)?;
            self.wait_for_receipt(&hash)?;
            Ok(hash)
        };
        run().map_err(|err| WithdrawError(error_chain_text(&err, 512)))
    }
}

// --- ABI encoding / decoding -------------------------------------------

/// First four bytes of the keccak-256 of the canonical signature.
fn selector(signature: &str) -> String {
    let digest = keccak256(signature.as_bytes());
    hex::encode(&digest[..4])
}

fn encode_call(signature: &str, words: &[String]) -> String {
    let mut data = format!("0x{}", selector(signature));
    for word in words {
        data.push_str(word);
    }
    data
}

fn abi_address(address: &str) -> Result<String> {
    let stripped = address
        .strip_prefix("0x")
        .unwrap_or(address)
        .to_lowercase();
    if stripped.len() != 40 || !stripped.bytes().all(|b| b.is_ascii_hexdigit()) {
        bail!("invalid address: {address}");
    }
    Ok(format!("{stripped:0>64}"))
}

fn abi_u256(value: U256) -> String {
    format!("{:0>64}", format!("{value:x}"))
}

/// mintMutant(address,uint256,string): two static words, then the
/// dynamic string at offset 0x60.
fn encode_mint_mutant(
    origin_contract: &str,
    origin_token_id: &str,
    metadata_uri: &str,
) -> Result<String> {
    let token = U256::from_str_radix(origin_token_id, 10)
        .with_context(|| format!("invalid token id: {origin_token_id}"))?;
    let uri_bytes = metadata_uri.as_bytes();
    let mut padded_uri = hex::encode(uri_bytes);
    while padded_uri.len() % 64 != 0 {
        padded_uri.push('0');
    }
    Ok(encode_call(
        "mintMutant(address,uint256,string)",
        &[
            abi_address(origin_contract)?,
            abi_u256(token),
            abi_u256(U256::from(0x60u64)),
            abi_u256(U256::from(uri_bytes.len() as u64)),
            padded_uri,
        ],
    ))
}

fn decode_u256(raw: &str) -> Result<U256> {
    let stripped = raw.strip_prefix("0x").unwrap_or(raw);
    if stripped.is_empty() {
        return Ok(U256::ZERO);
    }
    U256::from_str_radix(stripped, 16).with_context(|| format!("invalid uint256 word: {raw}"))
}

fn decode_address(raw: &str) -> Result<String> {
    let stripped = raw.strip_prefix("0x").unwrap_or(raw);
    if stripped.len() < 40 {
        bail!("result too short for an address: {raw}");
    }
    Ok(format!("0x{}", &stripped[stripped.len() - 40..]))
}

/// Decode a solo `string` return value: offset word, length word, then
/// UTF-8 bytes.
fn decode_abi_string(raw: &str) -> Result<String> {
    let stripped = raw.strip_prefix("0x").unwrap_or(raw);
    if stripped.len() < 128 {
        bail!("result too short for a string: {raw}");
    }
    let length = usize::try_from(decode_u256(&stripped[64..128])?)
        .context("string length out of range")?;
    let data_hex = &stripped[128..];
    if data_hex.len() < length * 2 {
        bail!("string payload truncated");
    }
    let bytes = hex::decode(&data_hex[..length * 2]).context("invalid string payload hex")?;
    String::from_utf8(bytes).context("string payload is not UTF-8")
}

const TRANSFER_TOPIC: &str = "ddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

/// Pull the minted token id out of the receipt: the Transfer log emitted
/// by the mutant contract itself, third indexed topic. Absent or
/// oversized ids degrade to None.
fn token_id_from_receipt(receipt: &Value, contract_address: &str) -> Option<u64> {
    let logs = receipt.get("logs").and_then(Value::as_array)?;
    for log in logs {
        let emitter = log.get("address").and_then(Value::as_str).unwrap_or("");
        if !emitter.eq_ignore_ascii_case(contract_address) {
            continue;
        }
        let topics = log.get("topics").and_then(Value::as_array)?;
        if topics.len() != 4 {
            continue;
        }
        let topic0 = topics[0].as_str().unwrap_or("");
        if !topic0
            .strip_prefix("0x")
            .unwrap_or(topic0)
            .eq_ignore_ascii_case(TRANSFER_TOPIC)
        {
            continue;
        }
        let token = decode_u256(topics[3].as_str().unwrap_or("")).ok()?;
        return u64::try_from(token).ok();
    }
    None
}
