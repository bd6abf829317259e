//! Transaction signing. Key material is read-only after load; signing is
//! serialized through the wallet's internal state.

use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, Signature, H256};

/// Signing wallet for trading transactions and relay authentication.
#[derive(Debug, Clone)]
pub struct SignerWallet {
    wallet: LocalWallet,
}

impl SignerWallet {
    /// Parse a hex-encoded private key, binding it to the given chain id so
    /// EIP-155 replay protection is always on.
    pub fn from_key(hex_key: &str, chain_id: u64) -> anyhow::Result<Self> {
        let wallet: LocalWallet = hex_key
            .trim_start_matches("0x")
            .parse::<LocalWallet>()
            .map_err(|e| anyhow::anyhow!("invalid private key: {e}"))?;
        Ok(Self {
            wallet: wallet.with_chain_id(chain_id),
        })
    }

    pub fn address(&self) -> Address {
        self.wallet.address()
    }

    /// Sign a transaction and return the raw RLP bytes ready for submission.
    ///
    /// Deterministic: signing the same transaction (same nonce and fields)
    /// twice yields identical payloads.
    pub async fn sign_transaction(&self, tx: &TypedTransaction) -> anyhow::Result<Bytes> {
        let signature = self
            .wallet
            .sign_transaction(tx)
            .await
            .map_err(|e| anyhow::anyhow!("signing failed: {e}"))?;
        Ok(tx.rlp_signed(&signature))
    }

    /// Sign a 32-byte digest directly (relay request authentication).
    pub fn sign_hash(&self, hash: H256) -> anyhow::Result<Signature> {
        self.wallet
            .sign_hash(hash)
            .map_err(|e| anyhow::anyhow!("hash signing failed: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::{Eip1559TransactionRequest, U256};

    const TEST_KEY: &str = "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

    #[tokio::test]
    async fn signing_is_deterministic() {
        let wallet = SignerWallet::from_key(TEST_KEY, 1).unwrap();
        let tx: TypedTransaction = Eip1559TransactionRequest::new()
            .to(Address::repeat_byte(0x42))
            .value(U256::from(1u64))
            .nonce(7u64)
            .gas(21_000u64)
            .max_fee_per_gas(U256::from(30_000_000_000u64))
            .max_priority_fee_per_gas(U256::from(1_000_000_000u64))
            .chain_id(1u64)
            .into();

        let first = wallet.sign_transaction(&tx).await.unwrap();
        let second = wallet.sign_transaction(&tx).await.unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn rejects_malformed_key() {
        assert!(SignerWallet::from_key("not-a-key", 1).is_err());
    }

    #[test]
    fn key_parses_with_or_without_prefix() {
        let a = SignerWallet::from_key(TEST_KEY, 1).unwrap();
        let b = SignerWallet::from_key(&format!("0x{TEST_KEY}"), 1).unwrap();
        assert_eq!(a.address(), b.address());
    }
}
