//! JSON-RPC client for the anchor registry contract
//!
//! Talks to any EVM node over plain JSON-RPC. Calls are ABI-encoded with
//! `alloy` and writes are signed locally as EIP-155 legacy transactions.
//! Every write is simulated with `eth_call` first, so reverts and duplicate
//! records are caught before gas is spent.

use alloy::consensus::{SignableTransaction, TxEnvelope, TxLegacy};
use alloy::eips::eip2718::Encodable2718;
use alloy::primitives::{Address, Bytes, TxKind, B256, U256};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::Signer;
use alloy::sol_types::SolCall;
use async_trait::async_trait;
use notary_core::Hash;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

use super::{
    AnchorContract, BatchOutcome, LedgerConfig, OnChainAnchor, RecordOutcome, TxOutcome, TxStatus,
};
use crate::error::AnchorError;

alloy::sol! {
    interface IAnchorRegistry {
        function recordAnchor(bytes32 anchorHash, string anchorType) external returns (bool);
        function recordAnchorStrict(bytes32 anchorHash, string anchorType) external;
        function recordAnchorBatch(bytes32[] anchorHashes, string[] anchorTypes) external returns (uint256);
        function verifyAnchor(bytes32 anchorHash) external view returns (bool exists, uint256 timestamp, string anchorType, address recorder);
        function anchorExists(bytes32 anchorHash) external view returns (bool);
        function totalAnchors() external view returns (uint256);
    }
}

/// JSON-RPC error code nodes use for execution reverts
const REVERT_CODE: i64 = 3;

#[derive(Serialize)]
struct JsonRpcRequest<'a, T: Serialize> {
    jsonrpc: &'a str,
    method: &'a str,
    params: T,
    id: u64,
}

#[derive(Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TxReceipt {
    status: Option<String>,
    block_number: Option<String>,
    gas_used: Option<String>,
}

/// Registry contract reached through a JSON-RPC endpoint
pub struct RpcAnchorContract {
    rpc_url: String,
    chain_id: u64,
    contract: Address,
    signer: Option<PrivateKeySigner>,
    client: reqwest::Client,
    gas_multiplier_percent: u64,
    poll_attempts: u32,
    poll_interval: Duration,
    /// Serialises nonce allocation and broadcast
    send_lock: Mutex<()>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for RpcAnchorContract {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcAnchorContract")
            .field("rpc_url", &self.rpc_url)
            .field("chain_id", &self.chain_id)
            .field("contract", &self.contract)
            .field("signer", &self.signer.as_ref().map(|s| s.address()))
            .finish()
    }
}

impl RpcAnchorContract {
    /// Build a client from ledger settings.
    ///
    /// The signing key is read from the environment variable named by
    /// `private_key_env`; without it the client is read-only.
    pub fn new(config: &LedgerConfig) -> Result<Self, AnchorError> {
        let rpc_url = config.rpc_url()?.to_string();
        let contract: Address = config.contract_address()?.trim().parse().map_err(|e| {
            AnchorError::Configuration(format!("invalid contract address: {}", e))
        })?;

        let signer = match config.signing_key() {
            Some(key) => Some(key.parse::<PrivateKeySigner>().map_err(|e| {
                AnchorError::Configuration(format!(
                    "invalid signing key in ${}: {}",
                    config.private_key_env, e
                ))
            })?),
            None => None,
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
            .user_agent(concat!("notary-anchor/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AnchorError::Configuration(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            rpc_url,
            chain_id: config.chain_id,
            contract,
            signer,
            client,
            gas_multiplier_percent: config.gas_limit_multiplier_percent.max(100),
            poll_attempts: config.receipt_poll_attempts.max(1),
            poll_interval: Duration::from_millis(config.receipt_poll_interval_ms),
            send_lock: Mutex::new(()),
            next_id: AtomicU64::new(1),
        })
    }

    /// Send one request; a JSON `null` result comes back as `None`
    async fn rpc_request<P, T>(&self, method: &str, params: P) -> Result<Option<T>, AnchorError>
    where
        P: Serialize + Send,
        T: serde::de::DeserializeOwned,
    {
        let req = JsonRpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
        };

        let resp = self
            .client
            .post(&self.rpc_url)
            .json(&req)
            .send()
            .await
            .map_err(|e| AnchorError::Network(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(AnchorError::Network(format!(
                "{} returned HTTP {}",
                method,
                resp.status()
            )));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| AnchorError::Network(e.to_string()))?;
        let resp: JsonRpcResponse<T> = serde_json::from_slice(&bytes)?;

        match resp.error {
            Some(err) => Err(rpc_error(err)),
            None => Ok(resp.result),
        }
    }

    async fn rpc_call<P, T>(&self, method: &str, params: P) -> Result<T, AnchorError>
    where
        P: Serialize + Send,
        T: serde::de::DeserializeOwned,
    {
        self.rpc_request(method, params)
            .await?
            .ok_or_else(|| AnchorError::Network(format!("{} returned no result", method)))
    }

    fn call_object(&self, data: &[u8]) -> serde_json::Value {
        let mut call = serde_json::json!({
            "to": self.contract.to_string(),
            "data": format!("0x{}", hex::encode(data)),
        });
        if let Some(signer) = &self.signer {
            call["from"] = serde_json::Value::String(signer.address().to_string());
        }
        call
    }

    /// Read-only contract call against the latest block
    async fn eth_call(&self, data: &[u8]) -> Result<Vec<u8>, AnchorError> {
        self.eth_call_at(data, "latest".to_string()).await
    }

    /// Read-only contract call against `block` (a number or tag)
    async fn eth_call_at(&self, data: &[u8], block: String) -> Result<Vec<u8>, AnchorError> {
        let raw: String = self
            .rpc_call("eth_call", serde_json::json!([self.call_object(data), block]))
            .await?;
        decode_hex(&raw)
    }

    fn signer(&self) -> Result<&PrivateKeySigner, AnchorError> {
        self.signer
            .as_ref()
            .ok_or_else(|| AnchorError::Configuration("no signing key configured".to_string()))
    }

    /// Sign, broadcast and wait for one contract transaction
    async fn send_transaction(&self, data: Vec<u8>) -> Result<TxOutcome, AnchorError> {
        let signer = self.signer()?;
        let from = signer.address().to_string();

        let estimate: String = self
            .rpc_call("eth_estimateGas", serde_json::json!([self.call_object(&data)]))
            .await?;
        let gas_limit =
            parse_quantity(&estimate)?.saturating_mul(self.gas_multiplier_percent as u128) / 100;
        let gas_limit = u64::try_from(gas_limit).unwrap_or(u64::MAX);

        let tx_hash: String = {
            let _guard = self.send_lock.lock().await;

            let nonce: String = self
                .rpc_call("eth_getTransactionCount", serde_json::json!([from, "pending"]))
                .await?;
            let nonce = u64::try_from(parse_quantity(&nonce)?)
                .map_err(|_| AnchorError::Network("nonce out of range".to_string()))?;
            let gas_price: String = self.rpc_call("eth_gasPrice", serde_json::json!([])).await?;
            let gas_price = parse_quantity(&gas_price)?;

            let tx = TxLegacy {
                chain_id: Some(self.chain_id),
                nonce,
                gas_price,
                gas_limit,
                to: TxKind::Call(self.contract),
                value: U256::ZERO,
                input: Bytes::from(data),
            };

            let sig = signer
                .sign_hash(&tx.signature_hash())
                .await
                .map_err(|e| AnchorError::Signing(e.to_string()))?;
            let signed = TxEnvelope::Legacy(tx.into_signed(sig));
            let mut raw = Vec::new();
            signed.encode_2718(&mut raw);

            tracing::debug!(nonce, gas_limit, gas_price, "Broadcasting anchor transaction");
            self.rpc_call(
                "eth_sendRawTransaction",
                serde_json::json!([format!("0x{}", hex::encode(&raw))]),
            )
            .await?
        };

        self.wait_for_receipt(tx_hash).await
    }

    async fn receipt(&self, tx_hash: &str) -> Result<Option<TxOutcome>, AnchorError> {
        let receipt: Option<TxReceipt> = self
            .rpc_request("eth_getTransactionReceipt", serde_json::json!([tx_hash]))
            .await?;
        receipt
            .map(|receipt| receipt_outcome(tx_hash, receipt))
            .transpose()
    }

    /// Poll for the receipt; a transaction still unmined after the last poll is [`AnchorError::Pending`]
    async fn wait_for_receipt(&self, tx_hash: String) -> Result<TxOutcome, AnchorError> {
        for attempt in 0..self.poll_attempts {
            if let Some(outcome) = self.receipt(&tx_hash).await? {
                return Ok(outcome);
            }
            tracing::trace!(%tx_hash, attempt, "Waiting for receipt");
            tokio::time::sleep(self.poll_interval).await;
        }

        tracing::warn!(%tx_hash, polls = self.poll_attempts, "Transaction broadcast but not mined yet");
        Err(AnchorError::Pending { tx_hash })
    }
}

fn receipt_outcome(tx_hash: &str, receipt: TxReceipt) -> Result<TxOutcome, AnchorError> {
    if receipt.status.as_deref() == Some("0x0") {
        return Err(AnchorError::Reverted(format!(
            "transaction {} reverted",
            tx_hash
        )));
    }
    let quantity = |q: Option<String>| {
        q.and_then(|q| parse_quantity(&q).ok())
            .and_then(|v| u64::try_from(v).ok())
    };
    Ok(TxOutcome {
        tx_hash: tx_hash.to_string(),
        block_number: quantity(receipt.block_number),
        gas_used: quantity(receipt.gas_used),
    })
}

fn rpc_error(err: JsonRpcError) -> AnchorError {
    let is_revert = err.code == REVERT_CODE || err.message.to_lowercase().contains("revert");
    if is_revert {
        let reason = match err.data {
            Some(serde_json::Value::String(data)) => format!("{} ({})", err.message, data),
            _ => err.message,
        };
        AnchorError::Reverted(reason)
    } else {
        AnchorError::Rpc {
            code: err.code,
            message: err.message,
        }
    }
}

fn parse_quantity(raw: &str) -> Result<u128, AnchorError> {
    u128::from_str_radix(raw.trim_start_matches("0x"), 16)
        .map_err(|e| AnchorError::Network(format!("invalid quantity '{}': {}", raw, e)))
}

fn decode_hex(raw: &str) -> Result<Vec<u8>, AnchorError> {
    hex::decode(raw.trim_start_matches("0x"))
        .map_err(|e| AnchorError::Network(format!("invalid hex data: {}", e)))
}

fn abi_error(e: alloy::sol_types::Error) -> AnchorError {
    AnchorError::Network(format!("unexpected contract return data: {}", e))
}

fn word(hash: &Hash) -> B256 {
    B256::from(*hash.as_bytes())
}

#[async_trait]
impl AnchorContract for RpcAnchorContract {
    async fn record_anchor(
        &self,
        hash: &Hash,
        anchor_type: &str,
    ) -> Result<RecordOutcome, AnchorError> {
        let call = IAnchorRegistry::recordAnchorCall {
            anchorHash: word(hash),
            anchorType: anchor_type.to_string(),
        };
        let data = call.abi_encode();

        let simulated = self.eth_call(&data).await?;
        let fresh =
            IAnchorRegistry::recordAnchorCall::abi_decode_returns(&simulated).map_err(abi_error)?;
        if !fresh {
            return Ok(RecordOutcome::AlreadyRecorded);
        }
        self.send_transaction(data).await.map(RecordOutcome::Recorded)
    }

    async fn record_anchor_strict(
        &self,
        hash: &Hash,
        anchor_type: &str,
    ) -> Result<TxOutcome, AnchorError> {
        let call = IAnchorRegistry::recordAnchorStrictCall {
            anchorHash: word(hash),
            anchorType: anchor_type.to_string(),
        };
        let data = call.abi_encode();
        // a duplicate surfaces here as a revert, before any gas is spent
        self.eth_call(&data).await?;
        self.send_transaction(data).await
    }

    async fn record_batch(
        &self,
        hashes: &[Hash],
        anchor_types: &[String],
    ) -> Result<BatchOutcome, AnchorError> {
        let call = IAnchorRegistry::recordAnchorBatchCall {
            anchorHashes: hashes.iter().map(word).collect(),
            anchorTypes: anchor_types.to_vec(),
        };
        let data = call.abi_encode();

        let simulated = self.eth_call(&data).await?;
        let recorded = IAnchorRegistry::recordAnchorBatchCall::abi_decode_returns(&simulated)
            .map_err(abi_error)?
            .saturating_to::<u64>();
        let tx = self.send_transaction(data).await?;
        Ok(BatchOutcome { tx, recorded })
    }

    async fn verify(&self, hash: &Hash) -> Result<OnChainAnchor, AnchorError> {
        let data = IAnchorRegistry::verifyAnchorCall {
            anchorHash: word(hash),
        }
        .abi_encode();
        let raw = self.eth_call(&data).await?;
        let ret = IAnchorRegistry::verifyAnchorCall::abi_decode_returns(&raw).map_err(abi_error)?;
        Ok(OnChainAnchor {
            exists: ret.exists,
            timestamp: ret.timestamp.saturating_to::<u64>(),
            anchor_type: ret.anchorType,
            recorder: ret.recorder.to_string(),
        })
    }

    async fn exists(&self, hash: &Hash) -> Result<bool, AnchorError> {
        let data = IAnchorRegistry::anchorExistsCall {
            anchorHash: word(hash),
        }
        .abi_encode();
        let raw = self.eth_call(&data).await?;
        IAnchorRegistry::anchorExistsCall::abi_decode_returns(&raw).map_err(abi_error)
    }

    async fn exists_at(&self, hash: &Hash, block: u64) -> Result<bool, AnchorError> {
        let data = IAnchorRegistry::anchorExistsCall {
            anchorHash: word(hash),
        }
        .abi_encode();
        let raw = self.eth_call_at(&data, format!("0x{:x}", block)).await?;
        IAnchorRegistry::anchorExistsCall::abi_decode_returns(&raw).map_err(abi_error)
    }

    async fn transaction_status(&self, tx_hash: &str) -> Result<TxStatus, AnchorError> {
        if let Some(outcome) = self.receipt(tx_hash).await? {
            return Ok(TxStatus::Mined(outcome));
        }
        let tx: Option<serde_json::Value> = self
            .rpc_request("eth_getTransactionByHash", serde_json::json!([tx_hash]))
            .await?;
        Ok(match tx {
            Some(_) => TxStatus::Pending,
            None => TxStatus::Unknown,
        })
    }

    async fn total_anchors(&self) -> Result<u64, AnchorError> {
        let data = IAnchorRegistry::totalAnchorsCall {}.abi_encode();
        let raw = self.eth_call(&data).await?;
        let total =
            IAnchorRegistry::totalAnchorsCall::abi_decode_returns(&raw).map_err(abi_error)?;
        Ok(total.saturating_to::<u64>())
    }

    async fn balance(&self) -> Result<u128, AnchorError> {
        let address = self.signer()?.address().to_string();
        let raw: String = self
            .rpc_call("eth_getBalance", serde_json::json!([address, "latest"]))
            .await?;
        parse_quantity(&raw)
    }

    fn contract_address(&self) -> String {
        self.contract.to_string()
    }

    fn signer_address(&self) -> Option<String> {
        self.signer.as_ref().map(|s| s.address().to_string())
    }

    async fn is_connected(&self) -> bool {
        match self.rpc_call::<_, String>("eth_chainId", serde_json::json!([])).await {
            Ok(raw) => match parse_quantity(&raw) {
                Ok(id) if id == self.chain_id as u128 => true,
                Ok(id) => {
                    tracing::warn!(expected = self.chain_id, actual = id as u64, "Node reports a different chain");
                    false
                }
                Err(_) => false,
            },
            Err(e) => {
                tracing::debug!(error = %e, "Ledger node not reachable");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> LedgerConfig {
        LedgerConfig {
            private_key_env: "NOTARY_TEST_RPC_KEY_UNSET".to_string(),
            ..LedgerConfig::testnet()
                .with_chain_id(31_337)
                .with_endpoint("http://127.0.0.1:1", "0x5FbDB2315678afecb367f032d93F642f64180aa3")
        }
    }

    #[test]
    fn test_new_is_read_only_without_key() {
        let contract = RpcAnchorContract::new(&config()).unwrap();
        assert!(contract.signer_address().is_none());
        assert_eq!(
            contract.contract_address().to_lowercase(),
            "0x5fbdb2315678afecb367f032d93f642f64180aa3"
        );
    }

    #[test]
    fn test_new_rejects_bad_contract_address() {
        let mut config = config();
        config.contract_address = Some("not-an-address".to_string());
        assert!(matches!(
            RpcAnchorContract::new(&config),
            Err(AnchorError::Configuration(_))
        ));
    }

    #[test]
    fn test_revert_errors_are_classified() {
        let revert = rpc_error(JsonRpcError {
            code: 3,
            message: "execution reverted: anchor exists".to_string(),
            data: None,
        });
        assert!(matches!(revert, AnchorError::Reverted(_)));
        assert!(!revert.is_retryable());

        let funds = rpc_error(JsonRpcError {
            code: -32000,
            message: "insufficient funds for gas".to_string(),
            data: None,
        });
        assert!(matches!(funds, AnchorError::Rpc { code: -32000, .. }));
        assert!(funds.is_retryable());
    }

    #[test]
    fn test_calldata_selectors() {
        let data = IAnchorRegistry::anchorExistsCall {
            anchorHash: word(&Hash::digest(b"x")),
        }
        .abi_encode();
        assert_eq!(data.len(), 4 + 32);
        assert_eq!(&data[4..], Hash::digest(b"x").as_bytes());
    }

    #[test]
    fn test_receipt_outcome() {
        let mined = receipt_outcome(
            "0xaa",
            TxReceipt {
                status: Some("0x1".to_string()),
                block_number: Some("0x10".to_string()),
                gas_used: Some("0x5208".to_string()),
            },
        )
        .unwrap();
        assert_eq!(mined.block_number, Some(16));
        assert_eq!(mined.gas_used, Some(21_000));

        let reverted = TxReceipt {
            status: Some("0x0".to_string()),
            block_number: None,
            gas_used: None,
        };
        assert!(matches!(
            receipt_outcome("0xbb", reverted),
            Err(AnchorError::Reverted(_))
        ));
    }

    #[test]
    fn test_null_result_is_none() {
        let resp: JsonRpcResponse<TxReceipt> =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"result":null}"#).unwrap();
        assert!(resp.error.is_none());
        assert!(resp.result.is_none());
    }

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity("0x2a").unwrap(), 42);
        assert!(parse_quantity("0xzz").is_err());
    }

    #[tokio::test]
    async fn test_unreachable_node_is_not_connected() {
        let contract = RpcAnchorContract::new(&config()).unwrap();
        assert!(!contract.is_connected().await);
        let err = contract.total_anchors().await.unwrap_err();
        assert!(err.is_retryable());
    }
}
