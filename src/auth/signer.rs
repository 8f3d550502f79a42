//! # auth::signer
//!
//! Signing capability ที่ handshake ใช้: local key หรือ wallet ภายนอก
//! (อาจต้องรอ user กด approve จึงเป็น async ทั้งหมด)
//!
//! Challenge ถูกเซ็นเป็น EIP-712 typed data:
//!
//! ```text
//! EIP712Domain { name }
//! Policy       { challenge, scope, wallet, application, participant, expire, allowances: Allowances[] }
//! Allowances   { asset, amount: uint256 }
//! ```

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::auth::frames::Allowance;
use crate::error::SignerError;

// ─── Trait ────────────────────────────────────────────────────────────────────

#[async_trait]
pub trait Signer: Send + Sync {
    /// Address ของ wallet ที่เซ็น (0x-prefixed)
    fn address(&self) -> String;

    /// เซ็น EIP-712 typed data (JSON รูปแบบ `eth_signTypedData_v4`)
    async fn sign_structured(&self, typed_data: &Value) -> Result<String, SignerError>;

    /// เซ็น keccak256 ของ payload ดิบ (ใช้กับ RPC request อย่าง create_app_session)
    async fn sign_payload(&self, payload: &[u8]) -> Result<String, SignerError>;
}

// ─── Policy ───────────────────────────────────────────────────────────────────

/// Message ที่ผูก challenge เข้ากับ scope / wallet / expiry
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyMessage {
    pub challenge:   String,
    pub scope:       String,
    pub wallet:      String,
    pub application: String,
    pub participant: String,
    pub expire:      u64,
    pub allowances:  Vec<Allowance>,
}

impl PolicyMessage {
    /// Typed data ครบชุด พร้อมส่งให้ [`Signer::sign_structured`]
    pub fn typed_data(&self, app_name: &str) -> Value {
        json!({
            "types": {
                "EIP712Domain": [
                    { "name": "name", "type": "string" }
                ],
                "Policy": [
                    { "name": "challenge",   "type": "string" },
                    { "name": "scope",       "type": "string" },
                    { "name": "wallet",      "type": "address" },
                    { "name": "application", "type": "address" },
                    { "name": "participant", "type": "address" },
                    { "name": "expire",      "type": "uint256" },
                    { "name": "allowances",  "type": "Allowances[]" }
                ],
                "Allowances": [
                    { "name": "asset",  "type": "string" },
                    { "name": "amount", "type": "uint256" }
                ]
            },
            "primaryType": "Policy",
            "domain": { "name": app_name },
            "message": {
                "challenge":   self.challenge,
                "scope":       self.scope,
                "wallet":      self.wallet,
                "application": self.application,
                "participant": self.participant,
                "expire":      self.expire,
                "allowances":  self.allowances,
            }
        })
    }
}

// ─── Local key ────────────────────────────────────────────────────────────────

#[cfg(feature = "signing")]
pub use local::LocalKeySigner;

#[cfg(feature = "signing")]
mod local {
    use async_trait::async_trait;
    use ethers::core::types::H256;
    use ethers::signers::{LocalWallet, Signer as _};
    use ethers::types::transaction::eip712::{Eip712, TypedData};
    use serde_json::Value;

    use super::Signer;
    use crate::error::SignerError;

    /// เซ็นด้วย private key ใน process (`PRIVATE_KEY`)
    pub struct LocalKeySigner {
        wallet:  LocalWallet,
        address: String,
    }

    impl LocalKeySigner {
        pub fn from_hex(key: &str) -> Result<Self, SignerError> {
            let bytes = hex::decode(key.trim().trim_start_matches("0x"))
                .map_err(|e| SignerError::InvalidKey(e.to_string()))?;
            if bytes.len() != 32 {
                return Err(SignerError::InvalidKey("private key must be 32 bytes".into()));
            }
            let wallet = LocalWallet::from_bytes(&bytes)
                .map_err(|e| SignerError::InvalidKey(e.to_string()))?;
            let address = format!("{:?}", wallet.address());
            Ok(Self { wallet, address })
        }

        fn sign_digest(&self, digest: [u8; 32]) -> Result<String, SignerError> {
            let signature = self
                .wallet
                .sign_hash(H256::from(digest))
                .map_err(|e| SignerError::Signing(e.to_string()))?;
            Ok(format!("0x{}", hex::encode(signature.to_vec())))
        }
    }

    #[async_trait]
    impl Signer for LocalKeySigner {
        fn address(&self) -> String {
            self.address.clone()
        }

        async fn sign_structured(&self, typed_data: &Value) -> Result<String, SignerError> {
            let typed: TypedData = serde_json::from_value(typed_data.clone())
                .map_err(|e| SignerError::Signing(format!("typed data: {e}")))?;
            let digest = typed
                .encode_eip712()
                .map_err(|e| SignerError::Signing(e.to_string()))?;
            self.sign_digest(digest)
        }

        async fn sign_payload(&self, payload: &[u8]) -> Result<String, SignerError> {
            self.sign_digest(ethers::utils::keccak256(payload))
        }
    }

}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_typed_data_shape() {
        let policy = PolicyMessage {
            challenge:   "c-1".into(),
            scope:       "trading".into(),
            wallet:      "0xabc".into(),
            application: "0xabc".into(),
            participant: "0xabc".into(),
            expire:      99,
            allowances:  vec![Allowance { asset: "usdc".into(), amount: "5".into() }],
        };
        let td = policy.typed_data("TokenSwiper");
        assert_eq!(td["primaryType"], "Policy");
        assert_eq!(td["domain"]["name"], "TokenSwiper");
        assert_eq!(td["types"]["Policy"].as_array().map(Vec::len), Some(7));
        assert_eq!(td["message"]["challenge"], "c-1");
        assert_eq!(td["message"]["expire"], 99);
        assert_eq!(td["message"]["allowances"][0]["asset"], "usdc");
    }
}
