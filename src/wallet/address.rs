//! Address derivation
//!
//! Every wallet address is the spend script over the copayers' keys derived
//! for one path (`m/0/i` receive, `m/1/i` change). Key derivation itself is a
//! collaborator behind [`KeyDeriver`]; this module only combines the derived
//! public keys into a script.

use crate::core::{ScriptError, SpendScript};
use crate::crypto::{sha256, CurvePoint};
use secp256k1::{Scalar, Secp256k1};
use thiserror::Error;

use super::registry::Wallet;

/// Address derivation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("Key derivation failed for {path}: {reason}")]
    Derivation { path: String, reason: String },
    #[error("Wallet {0} does not have all its copayers yet")]
    WalletNotComplete(String),
    #[error("Script error: {0}")]
    Script(#[from] ScriptError),
}

/// Public key derivation collaborator
pub trait KeyDeriver: Send + Sync {
    fn derive(&self, key: &CurvePoint, path: &str) -> Result<CurvePoint, AddressError>;
}

/// Public additive derivation: `child = P + H(P || path) · G`
///
/// The copayer holding `p` for `P` signs with `p + H(P || path)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AdditiveDeriver;

impl AdditiveDeriver {
    /// The scalar added to the parent key for `path`
    pub fn tweak(key: &CurvePoint, path: &str) -> Result<Scalar, AddressError> {
        let mut data = key.to_compressed().to_vec();
        data.extend_from_slice(path.as_bytes());
        Scalar::from_be_bytes(sha256(&data)).map_err(|_| AddressError::Derivation {
            path: path.to_string(),
            reason: "tweak exceeds curve order".to_string(),
        })
    }
}

impl KeyDeriver for AdditiveDeriver {
    fn derive(&self, key: &CurvePoint, path: &str) -> Result<CurvePoint, AddressError> {
        let secp = Secp256k1::verification_only();
        let tweak = Self::tweak(key, path)?;
        key.as_public_key()
            .add_exp_tweak(&secp, &tweak)
            .map(CurvePoint::from)
            .map_err(|e| AddressError::Derivation {
                path: path.to_string(),
                reason: e.to_string(),
            })
    }
}

/// Uses each registered key as-is for every path
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticDeriver;

impl KeyDeriver for StaticDeriver {
    fn derive(&self, key: &CurvePoint, _path: &str) -> Result<CurvePoint, AddressError> {
        Ok(*key)
    }
}

/// Derivation path for the `index`-th receive or change address
pub fn address_path(change: bool, index: u32) -> String {
    format!("m/{}/{}", if change { 1 } else { 0 }, index)
}

/// Derived key of every copayer for `path`, in copayer order
pub fn derive_keys(
    wallet: &Wallet,
    deriver: &dyn KeyDeriver,
    path: &str,
) -> Result<Vec<CurvePoint>, AddressError> {
    wallet
        .copayers
        .iter()
        .map(|c| deriver.derive(&c.public_key, path))
        .collect()
}

/// Spend script locking outputs sent to the wallet's `path` address
pub fn derive_spend_script(
    wallet: &Wallet,
    deriver: &dyn KeyDeriver,
    path: &str,
) -> Result<SpendScript, AddressError> {
    if !wallet.is_complete() {
        return Err(AddressError::WalletNotComplete(wallet.id.clone()));
    }
    let keys = derive_keys(wallet, deriver, path)?;
    Ok(SpendScript::new(wallet.scheme, wallet.m, keys)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SignatureScheme;
    use crate::crypto::keys::test_keys::TestSigner;

    fn complete_wallet(scheme: SignatureScheme) -> Wallet {
        let mut wallet = Wallet::new("shared", 2, 3, scheme, 15).unwrap();
        for i in 0..3 {
            let signer = TestSigner::generate();
            wallet
                .join(&format!("copayer {}", i), signer.point, signer.point)
                .unwrap();
        }
        wallet
    }

    #[test]
    fn test_additive_derivation_matches_private_tweak() {
        let signer = TestSigner::generate();
        let path = address_path(false, 7);

        let child = AdditiveDeriver.derive(&signer.point, &path).unwrap();
        let tweak = AdditiveDeriver::tweak(&signer.point, &path).unwrap();
        assert_eq!(signer.tweaked(&tweak).point, child);
        assert_ne!(child, signer.point);
    }

    #[test]
    fn test_paths_give_distinct_keys() {
        let signer = TestSigner::generate();
        let a = AdditiveDeriver.derive(&signer.point, "m/0/0").unwrap();
        let b = AdditiveDeriver.derive(&signer.point, "m/0/1").unwrap();
        let c = AdditiveDeriver.derive(&signer.point, "m/1/0").unwrap();
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(StaticDeriver.derive(&signer.point, "m/0/1").unwrap(), signer.point);
    }

    #[test]
    fn test_address_path_format() {
        assert_eq!(address_path(false, 0), "m/0/0");
        assert_eq!(address_path(true, 12), "m/1/12");
    }

    #[test]
    fn test_spend_script_per_path() {
        let wallet = complete_wallet(SignatureScheme::Ecdsa);
        let a = derive_spend_script(&wallet, &AdditiveDeriver, "m/0/0").unwrap();
        let b = derive_spend_script(&wallet, &AdditiveDeriver, "m/0/1").unwrap();
        assert_ne!(a.address(), b.address());
        assert_eq!(a.threshold, 2);
        assert_eq!(a.keys.len(), 3);
    }

    #[test]
    fn test_incomplete_wallet_has_no_addresses() {
        let wallet = Wallet::new("shared", 2, 3, SignatureScheme::Ecdsa, 15).unwrap();
        assert!(matches!(
            derive_spend_script(&wallet, &AdditiveDeriver, "m/0/0"),
            Err(AddressError::WalletNotComplete(_))
        ));
    }
}
