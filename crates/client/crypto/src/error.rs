use fp_chain::AddressType;

#[derive(thiserror::Error, Debug)]
pub enum CryptoError {
    #[error("Invalid {scheme} address `{address}`: {reason}")]
    InvalidAddress { scheme: AddressType, address: String, reason: String },

    #[error("Malformed {scheme} signature: {reason}")]
    MalformedSignature { scheme: AddressType, reason: String },

    #[error("{scheme} signature does not match address `{address}`")]
    Mismatch { scheme: AddressType, address: String },

    #[error("No verifier registered for address type {0}")]
    Unsupported(AddressType),
}

impl CryptoError {
    pub(crate) fn invalid_address(scheme: AddressType, address: &str, reason: impl ToString) -> Self {
        Self::InvalidAddress { scheme, address: address.to_string(), reason: reason.to_string() }
    }

    pub(crate) fn malformed(scheme: AddressType, reason: impl ToString) -> Self {
        Self::MalformedSignature { scheme, reason: reason.to_string() }
    }

    pub(crate) fn mismatch(scheme: AddressType, address: &str) -> Self {
        Self::Mismatch { scheme, address: address.to_string() }
    }
}
