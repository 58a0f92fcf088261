use std::str::FromStr;

use alloy_primitives::{Address, Signature};
use fp_chain::AddressType;

use crate::{CryptoError, WalletVerifier};

/// EIP-191 `personal_sign` signatures from EVM wallets.
pub struct EvmVerifier;

impl WalletVerifier for EvmVerifier {
    fn address_type(&self) -> AddressType {
        AddressType::Evm
    }

    fn verify_address(&self, address: &str) -> bool {
        address.starts_with("0x") && Address::from_str(address).is_ok()
    }

    fn check_signature(&self, address: &str, message: &str, signature: &str) -> Result<(), CryptoError> {
        let expected = Address::from_str(address)
            .map_err(|e| CryptoError::invalid_address(AddressType::Evm, address, e))?;

        let bytes = hex::decode(signature.strip_prefix("0x").unwrap_or(signature))
            .map_err(|e| CryptoError::malformed(AddressType::Evm, e))?;
        if bytes.len() != 65 {
            return Err(CryptoError::malformed(AddressType::Evm, format!("expected 65 bytes, got {}", bytes.len())));
        }
        let signature =
            Signature::try_from(bytes.as_slice()).map_err(|e| CryptoError::malformed(AddressType::Evm, e))?;

        let recovered = signature
            .recover_address_from_msg(message.as_bytes())
            .map_err(|e| CryptoError::malformed(AddressType::Evm, e))?;

        // Address comparison is on the decoded bytes, so checksum casing does not matter.
        if recovered != expected {
            return Err(CryptoError::mismatch(AddressType::Evm, address));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::signers::{local::PrivateKeySigner, SignerSync};
    use assert_matches::assert_matches;

    fn sign(signer: &PrivateKeySigner, message: &str) -> String {
        let signature = signer.sign_message_sync(message.as_bytes()).unwrap();
        format!("0x{}", hex::encode(signature.as_bytes()))
    }

    #[test]
    fn accepts_personal_sign_with_any_address_casing() {
        let signer = PrivateKeySigner::random();
        let signature = sign(&signer, "dev1690000000000xp:5");
        let checksummed = signer.address().to_string();

        assert!(EvmVerifier.verify_signature(&checksummed, "dev1690000000000xp:5", &signature));
        assert!(EvmVerifier.verify_signature(&checksummed.to_lowercase(), "dev1690000000000xp:5", &signature));
    }

    #[test]
    fn rejects_other_signer_and_other_message() {
        let signer = PrivateKeySigner::random();
        let other = PrivateKeySigner::random();
        let signature = sign(&signer, "hello");

        assert_matches!(
            EvmVerifier.check_signature(&other.address().to_string(), "hello", &signature),
            Err(CryptoError::Mismatch { .. })
        );
        assert!(!EvmVerifier.verify_signature(&signer.address().to_string(), "hello!", &signature));
    }

    #[test]
    fn rejects_malformed_signatures() {
        let signer = PrivateKeySigner::random();
        let address = signer.address().to_string();
        assert_matches!(
            EvmVerifier.check_signature(&address, "hello", "0x1234"),
            Err(CryptoError::MalformedSignature { .. })
        );
        assert_matches!(
            EvmVerifier.check_signature(&address, "hello", "not hex"),
            Err(CryptoError::MalformedSignature { .. })
        );
    }

    #[test]
    fn validates_address_shape() {
        assert!(EvmVerifier.verify_address("0x00000000000000000000000000000000000000aa"));
        assert!(!EvmVerifier.verify_address("00000000000000000000000000000000000000aa"));
        assert!(!EvmVerifier.verify_address("0x1234"));
    }
}
