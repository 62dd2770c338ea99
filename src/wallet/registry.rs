//! Wallet and copayer registry
//!
//! A wallet is created with a fixed M-of-N shape and fills up as copayers
//! join. Once N copayers have joined the set is closed and addresses can be
//! derived.

use crate::core::{OutPoint, SignatureScheme, MAX_MONEY, MAX_SCRIPT_KEYS};
use crate::crypto::{copayer_id, generate_id, CurvePoint};
use crate::storage::{StorageError, Store};
use crate::utxo::Utxo;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use super::address::{address_path, derive_spend_script, AddressError, KeyDeriver};

/// Registry errors
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Invalid wallet configuration: {0}")]
    InvalidConfig(String),
    #[error("Wallet not found: {0}")]
    NotFound(String),
    #[error("Wallet {0} already has all its copayers")]
    WalletFull(String),
    #[error("Copayer already registered: {0}")]
    CopayerExists(String),
    #[error("Wallet {0} does not have all its copayers yet")]
    WalletNotComplete(String),
    #[error("Address {address} does not belong to wallet {wallet_id}")]
    UnknownAddress { wallet_id: String, address: String },
    #[error("Address error: {0}")]
    Address(#[from] AddressError),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

// =============================================================================
// Records
// =============================================================================

/// One of the N key-holders of a wallet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Copayer {
    /// Hex SHA-256 of the compressed public key
    pub id: String,
    pub name: String,
    /// Root key that addresses are derived from
    pub public_key: CurvePoint,
    /// Key authenticating this copayer's requests
    pub request_pub_key: CurvePoint,
    pub joined_at: DateTime<Utc>,
}

/// A derived wallet address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletAddress {
    pub address: String,
    pub path: String,
    pub is_change: bool,
    pub created_at: DateTime<Utc>,
}

/// M-of-N shared wallet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Wallet {
    pub id: String,
    pub name: String,
    /// Required signatures
    pub m: u8,
    /// Total copayers
    pub n: u8,
    pub scheme: SignatureScheme,
    pub copayers: Vec<Copayer>,
    #[serde(default)]
    pub addresses: Vec<WalletAddress>,
    #[serde(default)]
    pub receive_index: u32,
    #[serde(default)]
    pub change_index: u32,
    pub created_at: DateTime<Utc>,
}

impl Wallet {
    /// Create an empty wallet, checking `1 <= m <= n <= max_copayers`
    pub fn new(
        name: &str,
        m: u8,
        n: u8,
        scheme: SignatureScheme,
        max_copayers: u8,
    ) -> Result<Self, RegistryError> {
        let limit = (max_copayers as usize).min(MAX_SCRIPT_KEYS);
        if m == 0 {
            return Err(RegistryError::InvalidConfig(
                "required signatures must be at least 1".to_string(),
            ));
        }
        if m > n {
            return Err(RegistryError::InvalidConfig(format!(
                "required signatures {} exceed copayer count {}",
                m, n
            )));
        }
        if n as usize > limit {
            return Err(RegistryError::InvalidConfig(format!(
                "at most {} copayers allowed, got {}",
                limit, n
            )));
        }
        if name.trim().is_empty() {
            return Err(RegistryError::InvalidConfig("name is required".to_string()));
        }

        Ok(Self {
            id: generate_id(name),
            name: name.to_string(),
            m,
            n,
            scheme,
            copayers: Vec::with_capacity(n as usize),
            addresses: Vec::new(),
            receive_index: 0,
            change_index: 0,
            created_at: Utc::now(),
        })
    }

    /// Add a copayer; the set is closed once N have joined
    pub fn join(
        &mut self,
        name: &str,
        public_key: CurvePoint,
        request_pub_key: CurvePoint,
    ) -> Result<Copayer, RegistryError> {
        if self.is_complete() {
            return Err(RegistryError::WalletFull(self.id.clone()));
        }

        let id = copayer_id(&public_key);
        // Schnorr scripts use X-only keys, so a negated key is the same key
        let clash = self.copayers.iter().any(|c| match self.scheme {
            SignatureScheme::Ecdsa => c.public_key == public_key,
            SignatureScheme::Schnorr => c.public_key.x() == public_key.x(),
        });
        if clash {
            return Err(RegistryError::CopayerExists(id));
        }

        let copayer = Copayer {
            id,
            name: name.to_string(),
            public_key,
            request_pub_key,
            joined_at: Utc::now(),
        };
        self.copayers.push(copayer.clone());
        Ok(copayer)
    }

    pub fn is_complete(&self) -> bool {
        self.copayers.len() == self.n as usize
    }

    pub fn copayer(&self, copayer_id: &str) -> Option<&Copayer> {
        self.copayers.iter().find(|c| c.id == copayer_id)
    }

    pub fn is_copayer(&self, copayer_id: &str) -> bool {
        self.copayer(copayer_id).is_some()
    }

    pub fn address(&self, address: &str) -> Option<&WalletAddress> {
        self.addresses.iter().find(|a| a.address == address)
    }

    /// Get description like "2-of-3"
    pub fn description(&self) -> String {
        format!("{}-of-{}", self.m, self.n)
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Store-backed wallet registry
///
/// Wallet writes are read-modify-write sequences and run under one mutex.
pub struct WalletRegistry {
    store: Arc<dyn Store>,
    deriver: Arc<dyn KeyDeriver>,
    max_copayers: u8,
    write_lock: Mutex<()>,
}

impl WalletRegistry {
    pub fn new(store: Arc<dyn Store>, deriver: Arc<dyn KeyDeriver>, max_copayers: u8) -> Self {
        Self {
            store,
            deriver,
            max_copayers,
            write_lock: Mutex::new(()),
        }
    }

    pub fn deriver(&self) -> &dyn KeyDeriver {
        self.deriver.as_ref()
    }

    /// Register a new wallet
    pub fn register(
        &self,
        name: &str,
        m: u8,
        n: u8,
        scheme: SignatureScheme,
    ) -> Result<Wallet, RegistryError> {
        let wallet = Wallet::new(name, m, n, scheme, self.max_copayers)?;
        self.store.put_wallet(&wallet)?;
        log::info!(
            "Registered {} {:?} wallet {} ({})",
            wallet.description(),
            wallet.scheme,
            wallet.id,
            wallet.name
        );
        Ok(wallet)
    }

    pub fn get(&self, wallet_id: &str) -> Result<Wallet, RegistryError> {
        self.store
            .get_wallet(wallet_id)?
            .ok_or_else(|| RegistryError::NotFound(wallet_id.to_string()))
    }

    /// Join a copayer to a wallet
    pub fn join(
        &self,
        wallet_id: &str,
        name: &str,
        public_key: CurvePoint,
        request_pub_key: CurvePoint,
    ) -> Result<(Wallet, Copayer), RegistryError> {
        let _guard = self.write_lock.lock();
        let mut wallet = self.get(wallet_id)?;
        let copayer = wallet.join(name, public_key, request_pub_key)?;
        self.store.put_wallet(&wallet)?;

        log::info!(
            "Copayer {} joined wallet {} ({}/{})",
            copayer.id,
            wallet.id,
            wallet.copayers.len(),
            wallet.n
        );
        Ok((wallet, copayer))
    }

    /// Derive and record the next receive or change address
    pub fn create_address(
        &self,
        wallet_id: &str,
        change: bool,
    ) -> Result<WalletAddress, RegistryError> {
        let _guard = self.write_lock.lock();
        let mut wallet = self.get(wallet_id)?;
        if !wallet.is_complete() {
            return Err(RegistryError::WalletNotComplete(wallet.id));
        }

        let index = if change {
            wallet.change_index
        } else {
            wallet.receive_index
        };
        let path = address_path(change, index);
        let script = derive_spend_script(&wallet, self.deriver(), &path)?;

        let address = WalletAddress {
            address: script.address(),
            path,
            is_change: change,
            created_at: Utc::now(),
        };
        wallet.addresses.push(address.clone());
        if change {
            wallet.change_index += 1;
        } else {
            wallet.receive_index += 1;
        }
        self.store.put_wallet(&wallet)?;

        log::debug!(
            "Wallet {} address {} at {}",
            wallet.id,
            address.address,
            address.path
        );
        Ok(address)
    }

    /// Record a UTXO reported by the blockchain collaborator
    pub fn register_utxo(
        &self,
        wallet_id: &str,
        outpoint: OutPoint,
        amount: u64,
        address: &str,
    ) -> Result<Utxo, RegistryError> {
        let wallet = self.get(wallet_id)?;
        let owned = wallet
            .address(address)
            .ok_or_else(|| RegistryError::UnknownAddress {
                wallet_id: wallet.id.clone(),
                address: address.to_string(),
            })?;
        if amount == 0 {
            return Err(RegistryError::InvalidConfig(
                "UTXO amount must be positive".to_string(),
            ));
        }
        if amount > MAX_MONEY {
            return Err(RegistryError::InvalidConfig(format!(
                "UTXO amount {} exceeds the {} sat limit",
                amount, MAX_MONEY
            )));
        }

        let utxo = Utxo {
            outpoint,
            amount,
            address: owned.address.clone(),
            path: owned.path.clone(),
        };
        self.store.put_utxo(&wallet.id, &utxo)?;
        log::info!("Wallet {} received {} sat at {}", wallet.id, amount, outpoint);
        Ok(utxo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TxId;
    use crate::crypto::keys::test_keys::TestSigner;
    use crate::storage::MemoryStore;
    use crate::wallet::AdditiveDeriver;

    fn registry() -> WalletRegistry {
        WalletRegistry::new(Arc::new(MemoryStore::new()), Arc::new(AdditiveDeriver), 15)
    }

    #[test]
    fn test_wallet_shape_validation() {
        assert!(Wallet::new("w", 2, 3, SignatureScheme::Ecdsa, 15).is_ok());
        assert!(Wallet::new("w", 1, 1, SignatureScheme::Ecdsa, 15).is_ok());
        assert!(Wallet::new("w", 0, 3, SignatureScheme::Ecdsa, 15).is_err());
        assert!(Wallet::new("w", 4, 3, SignatureScheme::Ecdsa, 15).is_err());
        assert!(Wallet::new("w", 2, 16, SignatureScheme::Ecdsa, 15).is_err());
        assert!(Wallet::new(" ", 1, 2, SignatureScheme::Ecdsa, 15).is_err());
    }

    #[test]
    fn test_join_until_full() {
        let mut wallet = Wallet::new("w", 1, 2, SignatureScheme::Ecdsa, 15).unwrap();
        let a = TestSigner::generate();
        let b = TestSigner::generate();

        let copayer = wallet.join("a", a.point, a.point).unwrap();
        assert_eq!(copayer.id, copayer_id(&a.point));
        assert!(!wallet.is_complete());

        assert!(matches!(
            wallet.join("a again", a.point, a.point),
            Err(RegistryError::CopayerExists(_))
        ));

        wallet.join("b", b.point, b.point).unwrap();
        assert!(wallet.is_complete());
        assert!(matches!(
            wallet.join("c", TestSigner::generate().point, a.point),
            Err(RegistryError::WalletFull(_))
        ));
    }

    #[test]
    fn test_schnorr_wallet_refuses_negated_key() {
        let mut wallet = Wallet::new("w", 1, 2, SignatureScheme::Schnorr, 15).unwrap();
        let a = TestSigner::generate();
        wallet.join("a", a.point, a.point).unwrap();
        assert!(matches!(
            wallet.join("b", a.point.negate(), a.point),
            Err(RegistryError::CopayerExists(_))
        ));
    }

    #[test]
    fn test_registry_persists_joins() {
        let registry = registry();
        let wallet = registry.register("w", 2, 2, SignatureScheme::Ecdsa).unwrap();
        let a = TestSigner::generate();
        registry.join(&wallet.id, "a", a.point, a.point).unwrap();

        let stored = registry.get(&wallet.id).unwrap();
        assert_eq!(stored.copayers.len(), 1);
        assert!(matches!(
            registry.get("missing"),
            Err(RegistryError::NotFound(_))
        ));
    }

    #[test]
    fn test_addresses_need_complete_wallet() {
        let registry = registry();
        let wallet = registry.register("w", 1, 2, SignatureScheme::Ecdsa).unwrap();
        let a = TestSigner::generate();
        registry.join(&wallet.id, "a", a.point, a.point).unwrap();
        assert!(matches!(
            registry.create_address(&wallet.id, false),
            Err(RegistryError::WalletNotComplete(_))
        ));
    }

    #[test]
    fn test_address_indexes_advance() {
        let registry = registry();
        let wallet = registry.register("w", 1, 2, SignatureScheme::Ecdsa).unwrap();
        for name in ["a", "b"] {
            let s = TestSigner::generate();
            registry.join(&wallet.id, name, s.point, s.point).unwrap();
        }

        let r0 = registry.create_address(&wallet.id, false).unwrap();
        let r1 = registry.create_address(&wallet.id, false).unwrap();
        let c0 = registry.create_address(&wallet.id, true).unwrap();
        assert_eq!(r0.path, "m/0/0");
        assert_eq!(r1.path, "m/0/1");
        assert_eq!(c0.path, "m/1/0");
        assert!(c0.is_change);
        assert_ne!(r0.address, r1.address);

        let stored = registry.get(&wallet.id).unwrap();
        assert_eq!(stored.receive_index, 2);
        assert_eq!(stored.change_index, 1);
        assert_eq!(stored.addresses.len(), 3);
    }

    #[test]
    fn test_register_utxo_requires_wallet_address() {
        let registry = registry();
        let wallet = registry.register("w", 1, 1, SignatureScheme::Ecdsa).unwrap();
        let s = TestSigner::generate();
        registry.join(&wallet.id, "a", s.point, s.point).unwrap();
        let addr = registry.create_address(&wallet.id, false).unwrap();

        let outpoint = OutPoint::new(TxId([1; 32]), 0);
        let utxo = registry
            .register_utxo(&wallet.id, outpoint, 5_000, &addr.address)
            .unwrap();
        assert_eq!(utxo.path, addr.path);

        assert!(matches!(
            registry.register_utxo(&wallet.id, outpoint, 5_000, "3NotOurs"),
            Err(RegistryError::UnknownAddress { .. })
        ));
        assert!(registry
            .register_utxo(&wallet.id, outpoint, 0, &addr.address)
            .is_err());
    }

    #[test]
    fn test_register_utxo_rejects_amount_above_max_money() {
        let store = Arc::new(MemoryStore::new());
        let registry = WalletRegistry::new(store.clone(), Arc::new(AdditiveDeriver), 15);
        let wallet = registry.register("w", 1, 1, SignatureScheme::Ecdsa).unwrap();
        let s = TestSigner::generate();
        registry.join(&wallet.id, "a", s.point, s.point).unwrap();
        let addr = registry.create_address(&wallet.id, false).unwrap();
        let outpoint = OutPoint::new(TxId([2; 32]), 0);

        for amount in [MAX_MONEY + 1, u64::MAX] {
            assert!(matches!(
                registry.register_utxo(&wallet.id, outpoint, amount, &addr.address),
                Err(RegistryError::InvalidConfig(_))
            ));
        }
        assert!(store.get_utxos(&wallet.id).unwrap().is_empty());
        assert!(registry
            .register_utxo(&wallet.id, outpoint, MAX_MONEY, &addr.address)
            .is_ok());
    }
}
