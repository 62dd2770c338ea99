//! Shared wallets: copayer registry and address derivation

pub mod address;
pub mod registry;

pub use address::{
    address_path, derive_keys, derive_spend_script, AdditiveDeriver, AddressError, KeyDeriver,
    StaticDeriver,
};
pub use registry::{Copayer, RegistryError, Wallet, WalletAddress, WalletRegistry};
