use blake2::{Blake2b512, Digest};
use fp_chain::AddressType;

use crate::{CryptoError, WalletVerifier};

const SS58_PREFIX: &[u8] = b"SS58PRE";
/// Signing context used by substrate for sr25519.
const SUBSTRATE_CONTEXT: &[u8] = b"substrate";

/// Polkadot.js `signRaw` signatures, sr25519 or ed25519, over SS58 addresses.
///
/// Extension wallets wrap the message as `<Bytes>message</Bytes>` before signing, so both forms are accepted.
pub struct PolkadotVerifier;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scheme {
    Ed25519,
    Sr25519,
}

impl WalletVerifier for PolkadotVerifier {
    fn address_type(&self) -> AddressType {
        AddressType::Polkadot
    }

    fn verify_address(&self, address: &str) -> bool {
        decode_ss58(address).is_ok()
    }

    fn check_signature(&self, address: &str, message: &str, signature: &str) -> Result<(), CryptoError> {
        let public_key = decode_ss58(address)?;
        let bytes = hex::decode(signature.strip_prefix("0x").unwrap_or(signature))
            .map_err(|e| CryptoError::malformed(AddressType::Polkadot, e))?;

        // A 65 byte signature is a MultiSignature: the first byte selects the scheme.
        let (schemes, raw): (&[Scheme], &[u8]) = match bytes.as_slice() {
            [0, rest @ ..] if rest.len() == 64 => (&[Scheme::Ed25519][..], rest),
            [1, rest @ ..] if rest.len() == 64 => (&[Scheme::Sr25519][..], rest),
            raw if raw.len() == 64 => (&[Scheme::Sr25519, Scheme::Ed25519][..], raw),
            other => {
                return Err(CryptoError::malformed(
                    AddressType::Polkadot,
                    format!("unexpected signature length {}", other.len()),
                ))
            }
        };

        let wrapped = format!("<Bytes>{message}</Bytes>");
        let candidates = [message.as_bytes(), wrapped.as_bytes()];

        let valid = schemes
            .iter()
            .any(|scheme| candidates.iter().any(|candidate| verify_with(*scheme, &public_key, candidate, raw)));
        if valid {
            Ok(())
        } else {
            Err(CryptoError::mismatch(AddressType::Polkadot, address))
        }
    }
}

fn verify_with(scheme: Scheme, public_key: &[u8; 32], message: &[u8], signature: &[u8]) -> bool {
    match scheme {
        Scheme::Sr25519 => {
            let (Ok(public_key), Ok(signature)) =
                (schnorrkel::PublicKey::from_bytes(public_key), schnorrkel::Signature::from_bytes(signature))
            else {
                return false;
            };
            public_key.verify_simple(SUBSTRATE_CONTEXT, message, &signature).is_ok()
        }
        Scheme::Ed25519 => {
            let (Ok(public_key), Ok(signature)) =
                (ed25519_dalek::VerifyingKey::from_bytes(public_key), ed25519_dalek::Signature::from_slice(signature))
            else {
                return false;
            };
            public_key.verify_strict(message, &signature).is_ok()
        }
    }
}

/// Decodes an SS58 address into its 32 byte public key.
fn decode_ss58(address: &str) -> Result<[u8; 32], CryptoError> {
    let invalid = |reason: &str| CryptoError::invalid_address(AddressType::Polkadot, address, reason);

    let data = bs58::decode(address).into_vec().map_err(|_| invalid("not base58"))?;
    let prefix_len = match data.first() {
        Some(byte) if *byte < 64 => 1,
        Some(byte) if *byte < 128 => 2,
        _ => return Err(invalid("unsupported address prefix")),
    };
    if data.len() != prefix_len + 32 + 2 {
        return Err(invalid("unexpected length"));
    }

    let (body, checksum) = data.split_at(data.len() - 2);
    let hash = Blake2b512::new().chain_update(SS58_PREFIX).chain_update(body).finalize();
    if &hash[..2] != checksum {
        return Err(invalid("bad checksum"));
    }

    let mut public_key = [0u8; 32];
    public_key.copy_from_slice(&body[prefix_len..]);
    Ok(public_key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};
    use schnorrkel::{ExpansionMode, MiniSecretKey};

    fn encode_ss58(prefix: u8, public_key: &[u8; 32]) -> String {
        let mut data = vec![prefix];
        data.extend_from_slice(public_key);
        let hash = Blake2b512::new().chain_update(SS58_PREFIX).chain_update(&data).finalize();
        data.extend_from_slice(&hash[..2]);
        bs58::encode(data).into_string()
    }

    fn sr25519_keypair(seed: u8) -> schnorrkel::Keypair {
        MiniSecretKey::from_bytes(&[seed; 32]).unwrap().expand_to_keypair(ExpansionMode::Ed25519)
    }

    #[test]
    fn accepts_sr25519_over_wrapped_message() {
        let keypair = sr25519_keypair(9);
        let address = encode_ss58(0, &keypair.public.to_bytes());
        let signature = keypair.sign_simple(SUBSTRATE_CONTEXT, b"<Bytes>dev1690000000000move</Bytes>");

        let signature = format!("0x{}", hex::encode(signature.to_bytes()));
        PolkadotVerifier.check_signature(&address, "dev1690000000000move", &signature).unwrap();
    }

    #[test]
    fn accepts_ed25519_multisignature() {
        let key = SigningKey::from_bytes(&[3; 32]);
        let address = encode_ss58(42, key.verifying_key().as_bytes());
        let mut signature = vec![0u8];
        signature.extend_from_slice(&key.sign(b"hello").to_bytes());

        assert!(PolkadotVerifier.verify_signature(&address, "hello", &hex::encode(signature)));
    }

    #[test]
    fn rejects_other_key() {
        let keypair = sr25519_keypair(1);
        let other = sr25519_keypair(2);
        let address = encode_ss58(0, &other.public.to_bytes());
        let signature = hex::encode(keypair.sign_simple(SUBSTRATE_CONTEXT, b"hello").to_bytes());

        assert!(!PolkadotVerifier.verify_signature(&address, "hello", &signature));
    }

    #[test]
    fn validates_checksum() {
        let keypair = sr25519_keypair(4);
        let address = encode_ss58(0, &keypair.public.to_bytes());
        assert!(PolkadotVerifier.verify_address(&address));

        let mut tampered = bs58::decode(&address).into_vec().unwrap();
        tampered[5] ^= 0xff;
        assert!(!PolkadotVerifier.verify_address(&bs58::encode(tampered).into_string()));
    }
}
