//! Blockchain collaborator.
//!
//! Vote records carry a transaction signature that must exist on chain and
//! be signed by the wallet the caller claims. That check is the only trust
//! extension outside our own database, so it sits behind the
//! [`ChainVerifier`] capability trait: the server injects an RPC-backed
//! implementation, tests inject a canned one.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::warn;

/// SPL memo program; transactions may attach a JSON vote payload through it.
const MEMO_PROGRAM_ID: &str = "MemoSq4gqABAXKb96qnH8TysNcWxMyWCqXgDLGmfcHr";

#[derive(Error, Debug)]
pub enum ChainError {
    #[error("Invalid transaction signature")]
    NotFound,

    #[error("Transaction not signed by claimed wallet")]
    WrongSigner,

    #[error("RPC error: {0}")]
    Rpc(String),
}

/// A confirmed-or-failed transaction as seen by the RPC node, reduced to
/// the parts the vote flow cares about.
#[derive(Debug, Clone)]
pub struct ChainTransaction {
    pub slot: u64,
    pub block_time: Option<i64>,
    pub confirmed: bool,
    /// Required signers, in account-key order.
    pub signers: Vec<String>,
    /// Decoded JSON memo payload, when the transaction carries one.
    pub memo: Option<Value>,
}

#[async_trait]
pub trait ChainVerifier: Send + Sync {
    async fn fetch_transaction(&self, signature: &str)
    -> Result<Option<ChainTransaction>, ChainError>;

    /// Confirms the transaction exists and that `expected_signer` is among
    /// its required signers. Attempted once per request, no retries.
    async fn verify_transaction(
        &self,
        signature: &str,
        expected_signer: &str,
    ) -> Result<(), ChainError> {
        match self.fetch_transaction(signature).await? {
            None => Err(ChainError::NotFound),
            Some(tx) if tx.signers.iter().any(|s| s == expected_signer) => Ok(()),
            Some(_) => Err(ChainError::WrongSigner),
        }
    }
}

pub struct RpcVerifier {
    client: reqwest::Client,
    url: String,
}

impl RpcVerifier {
    pub fn new(url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.to_string(),
        }
    }
}

#[derive(Deserialize)]
struct RpcResponse {
    result: Option<RpcTransaction>,
    error: Option<RpcErrorBody>,
}

#[derive(Deserialize)]
struct RpcErrorBody {
    message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcTransaction {
    slot: u64,
    block_time: Option<i64>,
    transaction: RpcInnerTransaction,
    meta: Option<RpcMeta>,
}

#[derive(Deserialize)]
struct RpcMeta {
    err: Option<Value>,
}

#[derive(Deserialize)]
struct RpcInnerTransaction {
    message: RpcMessage,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcMessage {
    account_keys: Vec<String>,
    header: RpcHeader,
    instructions: Vec<RpcInstruction>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcHeader {
    num_required_signatures: usize,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcInstruction {
    program_id_index: usize,
    data: String,
}

impl RpcTransaction {
    fn into_chain_transaction(self) -> ChainTransaction {
        let message = &self.transaction.message;

        let signers = message
            .account_keys
            .iter()
            .take(message.header.num_required_signatures)
            .cloned()
            .collect();

        let memo = message
            .instructions
            .iter()
            .filter(|ix| {
                message.account_keys.get(ix.program_id_index).map(String::as_str)
                    == Some(MEMO_PROGRAM_ID)
            })
            .find_map(|ix| decode_memo(&ix.data));

        ChainTransaction {
            slot: self.slot,
            block_time: self.block_time,
            confirmed: self.meta.as_ref().map(|m| m.err.is_none()).unwrap_or(true),
            signers,
            memo,
        }
    }
}

/// Instruction data arrives base58-encoded under the `json` transaction
/// encoding. Non-JSON memos are skipped.
fn decode_memo(data: &str) -> Option<Value> {
    let bytes = bs58::decode(data).into_vec().ok()?;
    serde_json::from_slice(&bytes).ok()
}

#[async_trait]
impl ChainVerifier for RpcVerifier {
    async fn fetch_transaction(
        &self,
        signature: &str,
    ) -> Result<Option<ChainTransaction>, ChainError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "getTransaction",
            "params": [signature, { "encoding": "json", "commitment": "confirmed" }],
        });

        let response: RpcResponse = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))?
            .json()
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))?;

        if let Some(err) = response.error {
            warn!("RPC rejected getTransaction: {}", err.message);
            return Err(ChainError::Rpc(err.message));
        }

        Ok(response.result.map(RpcTransaction::into_chain_transaction))
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;

    /// Canned verifier: returns the same transaction for every signature,
    /// or `None` to simulate an unknown signature.
    pub struct StaticVerifier {
        pub transaction: Option<ChainTransaction>,
    }

    impl StaticVerifier {
        pub fn signed_by(wallet: &str) -> Self {
            Self {
                transaction: Some(ChainTransaction {
                    slot: 42,
                    block_time: Some(1_700_000_000),
                    confirmed: true,
                    signers: vec![wallet.to_string()],
                    memo: None,
                }),
            }
        }

        pub fn unknown() -> Self {
            Self { transaction: None }
        }
    }

    #[async_trait]
    impl ChainVerifier for StaticVerifier {
        async fn fetch_transaction(
            &self,
            _signature: &str,
        ) -> Result<Option<ChainTransaction>, ChainError> {
            Ok(self.transaction.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{testing::StaticVerifier, *};

    #[tokio::test]
    async fn verify_accepts_listed_signer() {
        let verifier = StaticVerifier::signed_by("wallet-a");
        assert!(verifier.verify_transaction("sig", "wallet-a").await.is_ok());
    }

    #[tokio::test]
    async fn verify_rejects_wrong_signer() {
        let verifier = StaticVerifier::signed_by("wallet-a");
        let err = verifier
            .verify_transaction("sig", "wallet-b")
            .await
            .unwrap_err();
        assert!(matches!(err, ChainError::WrongSigner));
    }

    #[tokio::test]
    async fn verify_rejects_unknown_signature() {
        let verifier = StaticVerifier::unknown();
        let err = verifier
            .verify_transaction("sig", "wallet-a")
            .await
            .unwrap_err();
        assert!(matches!(err, ChainError::NotFound));
    }

    #[test]
    fn parses_rpc_transaction_with_memo() {
        let memo_payload = json!({ "pollId": "poll_1", "optionIndex": 2 });
        let data = bs58::encode(serde_json::to_vec(&memo_payload).unwrap()).into_string();

        let raw = json!({
            "slot": 7,
            "blockTime": 1_700_000_123,
            "meta": { "err": null },
            "transaction": {
                "message": {
                    "accountKeys": ["signer-wallet", "other-key", MEMO_PROGRAM_ID],
                    "header": { "numRequiredSignatures": 1 },
                    "instructions": [{ "programIdIndex": 2, "data": data }],
                }
            }
        });

        let parsed: RpcTransaction = serde_json::from_value(raw).unwrap();
        let tx = parsed.into_chain_transaction();

        assert!(tx.confirmed);
        assert_eq!(tx.signers, vec!["signer-wallet".to_string()]);
        assert_eq!(tx.memo, Some(memo_payload));
    }

    #[test]
    fn skips_non_json_memo() {
        let data = bs58::encode(b"plain text memo").into_string();

        let raw = json!({
            "slot": 7,
            "blockTime": null,
            "meta": { "err": null },
            "transaction": {
                "message": {
                    "accountKeys": ["signer-wallet", MEMO_PROGRAM_ID],
                    "header": { "numRequiredSignatures": 1 },
                    "instructions": [{ "programIdIndex": 1, "data": data }],
                }
            }
        });

        let parsed: RpcTransaction = serde_json::from_value(raw).unwrap();
        assert_eq!(parsed.into_chain_transaction().memo, None);
    }
}
