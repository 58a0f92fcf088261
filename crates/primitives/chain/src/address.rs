use std::fmt;

use serde::{Deserialize, Serialize};

/// Wallet scheme of an address, as tagged in a batched subunit.
///
/// The wire tag is the decimal ordinal of the variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum AddressType {
    Unknown = 0,
    Evm = 1,
    Cardano = 2,
    Polkadot = 3,
    Algorand = 4,
    Mina = 5,
}

impl AddressType {
    pub const ALL: [AddressType; 6] = [
        AddressType::Unknown,
        AddressType::Evm,
        AddressType::Cardano,
        AddressType::Polkadot,
        AddressType::Algorand,
        AddressType::Mina,
    ];

    pub fn ordinal(self) -> u8 {
        self as u8
    }

    /// Any integer that is not a known ordinal maps to [AddressType::Unknown].
    pub fn from_ordinal(ordinal: u64) -> Self {
        Self::ALL.into_iter().find(|ty| u64::from(ty.ordinal()) == ordinal).unwrap_or(AddressType::Unknown)
    }

    /// Parses a wire tag. Returns `None` unless the tag is made of ASCII digits only, so signs and blanks are
    /// rejected. Integers too large for any ordinal map to [AddressType::Unknown].
    pub fn from_tag(tag: &str) -> Option<Self> {
        if tag.is_empty() || !tag.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        Some(tag.parse::<u64>().map(Self::from_ordinal).unwrap_or(AddressType::Unknown))
    }
}

impl fmt::Display for AddressType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AddressType::Unknown => "unknown",
            AddressType::Evm => "evm",
            AddressType::Cardano => "cardano",
            AddressType::Polkadot => "polkadot",
            AddressType::Algorand => "algorand",
            AddressType::Mina => "mina",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("0", Some(AddressType::Unknown))]
    #[case("1", Some(AddressType::Evm))]
    #[case("2", Some(AddressType::Cardano))]
    #[case("3", Some(AddressType::Polkadot))]
    #[case("4", Some(AddressType::Algorand))]
    #[case("5", Some(AddressType::Mina))]
    #[case("01", Some(AddressType::Evm))]
    #[case("17", Some(AddressType::Unknown))]
    #[case("184467440737095516160", Some(AddressType::Unknown))]
    #[case("evm", None)]
    #[case("", None)]
    #[case("-1", None)]
    #[case("+1", None)]
    #[case(" 1", None)]
    fn parses_wire_tags(#[case] tag: &str, #[case] expected: Option<AddressType>) {
        assert_eq!(AddressType::from_tag(tag), expected);
    }

    #[test]
    fn ordinals_round_trip() {
        for ty in AddressType::ALL {
            assert_eq!(AddressType::from_ordinal(ty.ordinal().into()), ty);
        }
    }
}
