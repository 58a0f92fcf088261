use std::collections::BTreeMap;

use blake2::{digest::consts::U28, Blake2b, Digest};
use ed25519_dalek::{Signature, VerifyingKey};
use fp_chain::AddressType;
use serde_cbor::Value;

use crate::{CryptoError, WalletVerifier};

type Blake2b224 = Blake2b<U28>;

/// Signature tag of a COSE_Sign1 structure.
const COSE_SIGN1_TAG: u64 = 18;
/// COSE_Key label of the public key bytes (`x`).
const COSE_KEY_X: i128 = -2;

/// CIP-30 `signData` signatures from Cardano wallets.
///
/// The signature is `<COSE_Key hex>+<COSE_Sign1 hex>`. The Ed25519 signature covers the COSE `Sig_structure`,
/// the signed payload must be the message, and the hash of the public key must be one of the credentials of the
/// bech32 address.
pub struct CardanoVerifier;

impl WalletVerifier for CardanoVerifier {
    fn address_type(&self) -> AddressType {
        AddressType::Cardano
    }

    fn verify_address(&self, address: &str) -> bool {
        decode_address(address).is_ok()
    }

    fn check_signature(&self, address: &str, message: &str, signature: &str) -> Result<(), CryptoError> {
        let address_bytes = decode_address(address)?;

        let (key_hex, sign1_hex) =
            signature.split_once('+').ok_or_else(|| malformed("expected `<COSE_Key>+<COSE_Sign1>`"))?;

        let public_key = cose_key_public_key(&decode_cbor(key_hex)?)?;
        let sign1 = CoseSign1::parse(decode_cbor(sign1_hex)?)?;

        if let Some(signed_address) = sign1.protected_address()? {
            if signed_address != address_bytes {
                return Err(CryptoError::mismatch(AddressType::Cardano, address));
            }
        }

        let expected_payload =
            if sign1.hashed { Blake2b224::digest(message.as_bytes()).to_vec() } else { message.as_bytes().to_vec() };
        if sign1.payload != expected_payload {
            return Err(malformed("signed payload is not the expected message"));
        }

        let key_hash = Blake2b224::digest(public_key.as_bytes());
        if !address_credentials(&address_bytes).contains(&key_hash.as_slice()) {
            return Err(CryptoError::mismatch(AddressType::Cardano, address));
        }

        public_key
            .verify_strict(&sign1.sig_structure()?, &sign1.signature)
            .map_err(|_| CryptoError::mismatch(AddressType::Cardano, address))
    }
}

fn malformed(reason: impl ToString) -> CryptoError {
    CryptoError::malformed(AddressType::Cardano, reason)
}

fn decode_address(address: &str) -> Result<Vec<u8>, CryptoError> {
    let (hrp, bytes) =
        bech32::decode(address).map_err(|e| CryptoError::invalid_address(AddressType::Cardano, address, e))?;
    let hrp = hrp.as_str();
    if !(hrp.starts_with("addr") || hrp.starts_with("stake")) {
        return Err(CryptoError::invalid_address(AddressType::Cardano, address, format!("unexpected prefix `{hrp}`")));
    }
    if bytes.len() < 29 {
        return Err(CryptoError::invalid_address(AddressType::Cardano, address, "address is too short"));
    }
    Ok(bytes)
}

/// Payment and stake credentials carried by a Shelley address, per CIP-19.
fn address_credentials(bytes: &[u8]) -> Vec<&[u8]> {
    let credential = |from: usize| bytes.get(from..from + 28);
    match bytes[0] >> 4 {
        // base addresses carry both a payment and a stake credential
        0..=3 => [credential(1), credential(29)].into_iter().flatten().collect(),
        // pointer, enterprise and reward addresses carry a single credential
        4..=7 | 14 | 15 => credential(1).into_iter().collect(),
        _ => Vec::new(),
    }
}

fn decode_cbor(hex_str: &str) -> Result<Value, CryptoError> {
    let bytes = hex::decode(hex_str.trim()).map_err(malformed)?;
    serde_cbor::from_slice(&bytes).map_err(malformed)
}

fn cose_key_public_key(key: &Value) -> Result<VerifyingKey, CryptoError> {
    let Value::Map(map) = key else {
        return Err(malformed("COSE_Key is not a map"));
    };
    let Some(Value::Bytes(x)) = map.get(&Value::Integer(COSE_KEY_X)) else {
        return Err(malformed("COSE_Key has no public key"));
    };
    VerifyingKey::try_from(x.as_slice()).map_err(malformed)
}

struct CoseSign1 {
    protected: Vec<u8>,
    hashed: bool,
    payload: Vec<u8>,
    signature: Signature,
}

impl CoseSign1 {
    fn parse(value: Value) -> Result<Self, CryptoError> {
        let value = match value {
            Value::Tag(COSE_SIGN1_TAG, inner) => *inner,
            other => other,
        };
        let Value::Array(items) = value else {
            return Err(malformed("COSE_Sign1 is not an array"));
        };
        let [protected, unprotected, payload, signature] = <[Value; 4]>::try_from(items)
            .map_err(|items| malformed(format!("COSE_Sign1 has {} items, expected 4", items.len())))?;

        let Value::Bytes(protected) = protected else {
            return Err(malformed("protected header is not a byte string"));
        };
        let hashed = match unprotected {
            Value::Map(map) => matches!(map.get(&Value::Text("hashed".to_string())), Some(Value::Bool(true))),
            _ => false,
        };
        let Value::Bytes(payload) = payload else {
            return Err(malformed("detached payloads are not supported"));
        };
        let Value::Bytes(signature) = signature else {
            return Err(malformed("signature is not a byte string"));
        };
        let signature = Signature::from_slice(&signature).map_err(malformed)?;

        Ok(Self { protected, hashed, payload, signature })
    }

    /// The `address` header of the protected bucket, if the wallet included one.
    fn protected_address(&self) -> Result<Option<Vec<u8>>, CryptoError> {
        if self.protected.is_empty() {
            return Ok(None);
        }
        let headers: BTreeMap<Value, Value> = serde_cbor::from_slice(&self.protected).map_err(malformed)?;
        match headers.get(&Value::Text("address".to_string())) {
            Some(Value::Bytes(address)) => Ok(Some(address.clone())),
            Some(_) => Err(malformed("address header is not a byte string")),
            None => Ok(None),
        }
    }

    /// `["Signature1", protected, external_aad, payload]`
    fn sig_structure(&self) -> Result<Vec<u8>, CryptoError> {
        let structure = Value::Array(vec![
            Value::Text("Signature1".to_string()),
            Value::Bytes(self.protected.clone()),
            Value::Bytes(Vec::new()),
            Value::Bytes(self.payload.clone()),
        ]);
        serde_cbor::to_vec(&structure).map_err(malformed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bech32::{Bech32, Hrp};
    use ed25519_dalek::{Signer, SigningKey};

    struct Wallet {
        key: SigningKey,
        address: String,
        address_bytes: Vec<u8>,
    }

    fn wallet(seed: u8) -> Wallet {
        let key = SigningKey::from_bytes(&[seed; 32]);
        let key_hash = Blake2b224::digest(key.verifying_key().as_bytes());
        // enterprise address on testnet: header 0b0110_0000
        let mut address_bytes = vec![0x60];
        address_bytes.extend_from_slice(&key_hash);
        let address = bech32::encode::<Bech32>(Hrp::parse("addr_test").unwrap(), &address_bytes).unwrap();
        Wallet { key, address, address_bytes }
    }

    fn sign_data(wallet: &Wallet, payload: &[u8], include_address: bool) -> String {
        let mut protected = BTreeMap::new();
        protected.insert(Value::Integer(1), Value::Integer(-8));
        if include_address {
            protected.insert(Value::Text("address".into()), Value::Bytes(wallet.address_bytes.clone()));
        }
        let protected = serde_cbor::to_vec(&Value::Map(protected)).unwrap();

        let sig_structure = serde_cbor::to_vec(&Value::Array(vec![
            Value::Text("Signature1".into()),
            Value::Bytes(protected.clone()),
            Value::Bytes(vec![]),
            Value::Bytes(payload.to_vec()),
        ]))
        .unwrap();
        let signature = wallet.key.sign(&sig_structure);

        let mut unprotected = BTreeMap::new();
        unprotected.insert(Value::Text("hashed".into()), Value::Bool(false));
        let sign1 = Value::Array(vec![
            Value::Bytes(protected),
            Value::Map(unprotected),
            Value::Bytes(payload.to_vec()),
            Value::Bytes(signature.to_bytes().to_vec()),
        ]);

        let mut cose_key = BTreeMap::new();
        cose_key.insert(Value::Integer(1), Value::Integer(1));
        cose_key.insert(Value::Integer(3), Value::Integer(-8));
        cose_key.insert(Value::Integer(-1), Value::Integer(6));
        cose_key.insert(Value::Integer(COSE_KEY_X), Value::Bytes(wallet.key.verifying_key().as_bytes().to_vec()));

        format!(
            "{}+{}",
            hex::encode(serde_cbor::to_vec(&Value::Map(cose_key)).unwrap()),
            hex::encode(serde_cbor::to_vec(&sign1).unwrap())
        )
    }

    #[test]
    fn accepts_cip30_sign_data() {
        let wallet = wallet(1);
        let signature = sign_data(&wallet, b"dev1690000000000join", true);
        assert!(CardanoVerifier.verify_address(&wallet.address));
        CardanoVerifier.check_signature(&wallet.address, "dev1690000000000join", &signature).unwrap();
    }

    #[test]
    fn accepts_without_address_header() {
        let wallet = wallet(2);
        let signature = sign_data(&wallet, b"hello", false);
        assert!(CardanoVerifier.verify_signature(&wallet.address, "hello", &signature));
    }

    #[test]
    fn rejects_other_payload() {
        let wallet = wallet(3);
        let signature = sign_data(&wallet, b"hello", true);
        assert!(!CardanoVerifier.verify_signature(&wallet.address, "goodbye", &signature));
    }

    #[test]
    fn rejects_key_of_another_address() {
        let signer = wallet(4);
        let victim = wallet(5);
        let signature = sign_data(&signer, b"hello", false);
        assert!(!CardanoVerifier.verify_signature(&victim.address, "hello", &signature));
    }

    #[test]
    fn rejects_garbage() {
        let wallet = wallet(6);
        assert!(!CardanoVerifier.verify_signature(&wallet.address, "hello", "deadbeef"));
        assert!(!CardanoVerifier.verify_signature(&wallet.address, "hello", "zz+zz"));
        assert!(!CardanoVerifier.verify_address("0x00000000000000000000000000000000000000aa"));
    }
}
