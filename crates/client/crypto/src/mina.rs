use std::str::FromStr;

use fp_chain::AddressType;
use mina_hasher::{Hashable, ROInput};
use mina_signer::{BaseField, NetworkId, PubKey, ScalarField, Signature, Signer};
use serde::{Deserialize, Serialize};

use crate::{CryptoError, WalletVerifier};

/// Signature as produced by `signMessage` in Auro wallet and `mina-signer`, field elements in decimal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinaSignature {
    pub field: String,
    pub scalar: String,
}

impl MinaSignature {
    fn to_signature(&self) -> Result<Signature, CryptoError> {
        let rx = BaseField::from_str(&self.field).map_err(|_| {
            CryptoError::malformed(AddressType::Mina, format!("`{}` is not a base field element", self.field))
        })?;
        let s = ScalarField::from_str(&self.scalar).map_err(|_| {
            CryptoError::malformed(AddressType::Mina, format!("`{}` is not a scalar field element", self.scalar))
        })?;
        Ok(Signature::new(rx, s))
    }
}

/// A UTF-8 string signed with the legacy (Poseidon 3w) Schnorr scheme.
#[derive(Debug, Clone)]
struct SignedMessage(String);

impl Hashable for SignedMessage {
    type D = NetworkId;

    fn to_roinput(&self) -> ROInput {
        // Wallets hash every byte most significant bit first, the hasher reads bytes least significant bit first.
        let bytes: Vec<u8> = self.0.bytes().map(u8::reverse_bits).collect();
        ROInput::new().append_bytes(&bytes)
    }

    fn domain_string(network_id: NetworkId) -> Option<String> {
        match network_id {
            NetworkId::MAINNET => "MinaSignatureMainnet",
            NetworkId::TESTNET => "CodaSignature",
        }
        .to_string()
        .into()
    }
}

/// Mina wallet signatures: `B62…` addresses, Schnorr over Pallas.
///
/// A signature is accepted if it verifies under the domain of any of the configured networks, since the wallet
/// signs with whichever network the user has selected.
pub struct MinaVerifier {
    networks: Vec<NetworkId>,
}

impl Default for MinaVerifier {
    fn default() -> Self {
        Self::new([NetworkId::MAINNET, NetworkId::TESTNET])
    }
}

impl MinaVerifier {
    pub fn new(networks: impl IntoIterator<Item = NetworkId>) -> Self {
        Self { networks: networks.into_iter().collect() }
    }
}

fn public_key(address: &str) -> Result<PubKey, CryptoError> {
    PubKey::from_address(address)
        .map_err(|e| CryptoError::invalid_address(AddressType::Mina, address, format!("{e:?}")))
}

impl WalletVerifier for MinaVerifier {
    fn address_type(&self) -> AddressType {
        AddressType::Mina
    }

    fn verify_address(&self, address: &str) -> bool {
        public_key(address).is_ok()
    }

    fn check_signature(&self, address: &str, message: &str, signature: &str) -> Result<(), CryptoError> {
        let public_key = public_key(address)?;
        let signature: MinaSignature =
            serde_json::from_str(signature).map_err(|e| CryptoError::malformed(AddressType::Mina, e))?;
        let signature = signature.to_signature()?;

        let message = SignedMessage(message.to_string());
        let verified = self.networks.iter().any(|network| {
            mina_signer::create_legacy::<SignedMessage>(network.clone()).verify(&signature, &public_key, &message)
        });
        if verified {
            Ok(())
        } else {
            Err(CryptoError::mismatch(AddressType::Mina, address))
        }
    }
}
