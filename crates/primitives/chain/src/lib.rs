//! Normalized chain data produced by the funnel.
//!
//! Every network the funnel reads from, whatever its native block or slot model, ends up expressed as these
//! types: one [ChainData] per main-chain block during sync, and [PresyncChainData] for the extension data that
//! predates the main chain start height.

mod address;
mod chain_data;
mod extension;
mod network;

pub use address::AddressType;
pub use chain_data::{ChainData, PresyncChainData, SubmittedData};
pub use extension::{CdeKind, CdePayload, ChainDataExtensionDatum};
pub use network::NetworkId;

pub use alloy_primitives::{Address, B256, U256};
