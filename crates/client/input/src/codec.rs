//! Batch wire format.
//!
//! ```text
//! subunit := address_tag INNER address INNER signature INNER input INNER millisecond_timestamp
//! batch   := subunit (OUTER subunit)*
//! ```
//!
//! A payload without any outer divider is a direct command. A batch with a single subunit carries a trailing
//! outer divider so that it can be told apart from a direct command; the decoder strips one trailing divider.

use fp_chain::{AddressType, U256};
use serde::{Deserialize, Serialize};

pub const DEFAULT_OUTER_DIVIDER: char = '\u{7}';
pub const DEFAULT_INNER_DIVIDER: char = '\u{6}';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchDividers {
    pub outer: char,
    pub inner: char,
}

impl Default for BatchDividers {
    fn default() -> Self {
        Self { outer: DEFAULT_OUTER_DIVIDER, inner: DEFAULT_INNER_DIVIDER }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchedSubunit {
    /// Decimal address type ordinal, kept verbatim (`"01"` and unknown ordinals included).
    pub address_tag: String,
    pub user_address: String,
    pub user_signature: String,
    pub game_input: String,
    /// Kept verbatim so that the signed message can be rebuilt byte for byte.
    pub millisecond_timestamp: String,
}

impl BatchedSubunit {
    pub fn address_type(&self) -> AddressType {
        AddressType::from_tag(&self.address_tag).unwrap_or(AddressType::Unknown)
    }

    pub fn timestamp_ms(&self) -> Option<u64> {
        self.millisecond_timestamp.parse().ok()
    }
}

/// One element of a batch. Subunits that cannot be decoded are kept verbatim so that a batch always re-encodes
/// to the same bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subunit {
    Valid(BatchedSubunit),
    Invalid(String),
}

impl Subunit {
    pub fn is_valid(&self) -> bool {
        matches!(self, Subunit::Valid(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedInput {
    Direct(String),
    Batch(Vec<Subunit>),
}

pub fn decode_input(payload: &str, dividers: &BatchDividers) -> DecodedInput {
    if !payload.contains(dividers.outer) {
        return DecodedInput::Direct(payload.to_string());
    }
    let body = payload.strip_suffix(dividers.outer).unwrap_or(payload);
    DecodedInput::Batch(body.split(dividers.outer).map(|raw| decode_subunit(raw, dividers)).collect())
}

pub fn decode_subunit(raw: &str, dividers: &BatchDividers) -> Subunit {
    let fields: Vec<&str> = raw.split(dividers.inner).collect();
    let [tag, address, signature, input, timestamp] = fields.as_slice() else {
        return Subunit::Invalid(raw.to_string());
    };
    if AddressType::from_tag(tag).is_none() {
        return Subunit::Invalid(raw.to_string());
    }
    Subunit::Valid(BatchedSubunit {
        address_tag: tag.to_string(),
        user_address: address.to_string(),
        user_signature: signature.to_string(),
        game_input: input.to_string(),
        millisecond_timestamp: timestamp.to_string(),
    })
}

pub fn encode_subunit(subunit: &Subunit, dividers: &BatchDividers) -> String {
    match subunit {
        Subunit::Invalid(raw) => raw.clone(),
        Subunit::Valid(subunit) => [
            subunit.address_tag.as_str(),
            subunit.user_address.as_str(),
            subunit.user_signature.as_str(),
            subunit.game_input.as_str(),
            subunit.millisecond_timestamp.as_str(),
        ]
        .join(dividers.inner.to_string().as_str()),
    }
}

/// Encodes a batch so that [decode_input] gives back the same subunits.
///
/// An empty batch encodes to an empty string, which decodes as an empty direct command.
pub fn encode_batch(subunits: &[Subunit], dividers: &BatchDividers) -> String {
    let encoded: Vec<String> = subunits.iter().map(|subunit| encode_subunit(subunit, dividers)).collect();
    let mut out = encoded.join(dividers.outer.to_string().as_str());
    let needs_trailer = match subunits {
        [] => false,
        [_] => true,
        // the decoder strips one trailing divider, which would otherwise eat an empty last subunit
        [.., _] => encoded.last().is_some_and(String::is_empty),
    };
    if needs_trailer {
        out.push(dividers.outer);
    }
    out
}

/// The share of `total` carried by each subunit: the value is split evenly across every subunit that decoded,
/// rounding down. Shares of subunits rejected later are not redistributed.
pub fn apportion_value(total: U256, subunits: &[Subunit]) -> U256 {
    let decoded = subunits.iter().filter(|subunit| subunit.is_valid()).count();
    if decoded == 0 {
        return U256::ZERO;
    }
    total / U256::from(decoded)
}
