use base64::{engine::general_purpose::STANDARD, Engine};
use data_encoding::BASE32_NOPAD;
use ed25519_dalek::{Signature, VerifyingKey};
use fp_chain::AddressType;
use sha2::{Digest, Sha512_256};

use crate::{CryptoError, WalletVerifier};

/// Domain separation prefix for arbitrary bytes signed by Algorand wallets.
const MESSAGE_PREFIX: &[u8] = b"MX";

/// Ed25519 signatures from Algorand wallets, base64 encoded.
pub struct AlgorandVerifier;

impl WalletVerifier for AlgorandVerifier {
    fn address_type(&self) -> AddressType {
        AddressType::Algorand
    }

    fn verify_address(&self, address: &str) -> bool {
        decode_address(address).is_ok()
    }

    fn check_signature(&self, address: &str, message: &str, signature: &str) -> Result<(), CryptoError> {
        let public_key = decode_address(address)?;
        let public_key = VerifyingKey::from_bytes(&public_key)
            .map_err(|e| CryptoError::invalid_address(AddressType::Algorand, address, e))?;

        let signature = STANDARD.decode(signature).map_err(|e| CryptoError::malformed(AddressType::Algorand, e))?;
        let signature =
            Signature::from_slice(&signature).map_err(|e| CryptoError::malformed(AddressType::Algorand, e))?;

        let prefixed = [MESSAGE_PREFIX, message.as_bytes()].concat();
        if public_key.verify_strict(&prefixed, &signature).is_ok()
            || public_key.verify_strict(message.as_bytes(), &signature).is_ok()
        {
            Ok(())
        } else {
            Err(CryptoError::mismatch(AddressType::Algorand, address))
        }
    }
}

/// Decodes the base32 address into its public key, checking the trailing 4 byte checksum.
fn decode_address(address: &str) -> Result<[u8; 32], CryptoError> {
    let invalid = |reason: &str| CryptoError::invalid_address(AddressType::Algorand, address, reason);

    let bytes = BASE32_NOPAD.decode(address.as_bytes()).map_err(|_| invalid("not base32"))?;
    if bytes.len() != 36 {
        return Err(invalid("unexpected length"));
    }
    let (public_key, checksum) = bytes.split_at(32);
    if &Sha512_256::digest(public_key)[28..] != checksum {
        return Err(invalid("bad checksum"));
    }

    let mut out = [0u8; 32];
    out.copy_from_slice(public_key);
    Ok(out)
}
