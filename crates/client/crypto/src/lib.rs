//! Wallet signature verification.
//!
//! Batched inputs may be signed by any of the supported wallet schemes. Each scheme is a [WalletVerifier], and
//! the [SignatureDispatcher] routes a subunit to the verifier of its [AddressType].

use std::collections::BTreeMap;

use fp_chain::AddressType;

mod algorand;
mod cardano;
mod error;
mod evm;
mod mina;
mod polkadot;

pub use algorand::AlgorandVerifier;
pub use cardano::CardanoVerifier;
pub use error::CryptoError;
pub use evm::EvmVerifier;
pub use mina::{MinaSignature, MinaVerifier};
pub use polkadot::PolkadotVerifier;

/// A single wallet signature scheme.
pub trait WalletVerifier: Send + Sync {
    fn address_type(&self) -> AddressType;

    /// Checks that `address` is well-formed for this scheme.
    fn verify_address(&self, address: &str) -> bool;

    /// Checks that `signature` was produced over `message` by the key behind `address`.
    fn check_signature(&self, address: &str, message: &str, signature: &str) -> Result<(), CryptoError>;

    fn verify_signature(&self, address: &str, message: &str, signature: &str) -> bool {
        match self.check_signature(address, message, signature) {
            Ok(()) => true,
            Err(err) => {
                tracing::debug!("Rejected {} signature: {err}", self.address_type());
                false
            }
        }
    }
}

/// Routes signature checks to the verifier registered for an address type.
pub struct SignatureDispatcher {
    verifiers: BTreeMap<AddressType, Box<dyn WalletVerifier>>,
}

impl Default for SignatureDispatcher {
    fn default() -> Self {
        Self::with_default_verifiers()
    }
}

impl SignatureDispatcher {
    /// A dispatcher with no verifiers: every signature is rejected.
    pub fn empty() -> Self {
        Self { verifiers: BTreeMap::new() }
    }

    /// All supported schemes.
    pub fn with_default_verifiers() -> Self {
        let mut dispatcher = Self::empty();
        dispatcher.register(Box::new(EvmVerifier));
        dispatcher.register(Box::new(CardanoVerifier));
        dispatcher.register(Box::new(PolkadotVerifier));
        dispatcher.register(Box::new(AlgorandVerifier));
        dispatcher.register(Box::new(MinaVerifier::default()));
        dispatcher
    }

    /// Registers a verifier, returning the one it replaces.
    pub fn register(&mut self, verifier: Box<dyn WalletVerifier>) -> Option<Box<dyn WalletVerifier>> {
        self.verifiers.insert(verifier.address_type(), verifier)
    }

    pub fn verify_address(&self, address_type: AddressType, address: &str) -> bool {
        self.verifiers.get(&address_type).is_some_and(|verifier| verifier.verify_address(address))
    }

    pub fn verify(&self, address_type: AddressType, address: &str, message: &str, signature: &str) -> bool {
        let Some(verifier) = self.verifiers.get(&address_type) else {
            tracing::debug!("{}", CryptoError::Unsupported(address_type));
            return false;
        };
        verifier.verify_address(address) && verifier.verify_signature(address, message, signature)
    }

    /// Returns true if `signature` is valid for any of `messages`.
    pub fn verify_any<'a>(
        &self,
        address_type: AddressType,
        address: &str,
        messages: impl IntoIterator<Item = &'a str>,
        signature: &str,
    ) -> bool {
        let Some(verifier) = self.verifiers.get(&address_type) else {
            tracing::debug!("{}", CryptoError::Unsupported(address_type));
            return false;
        };
        if !verifier.verify_address(address) {
            tracing::debug!("Rejected malformed {address_type} address `{address}`");
            return false;
        }
        messages.into_iter().any(|message| verifier.verify_signature(address, message, signature))
    }
}
