//! Turning raw on-chain payloads into validated [SubmittedData](fp_chain::SubmittedData).
//!
//! A payload is either a direct command, submitted by the wallet that sent the transaction, or a batch of
//! commands signed off-chain by many wallets and posted by a batcher. See [codec] for the wire format and
//! [extract] for the validation rules.

pub mod codec;
pub mod error;
pub mod extract;
pub mod guard;
pub mod mapping;
pub mod namespace;
pub mod scheduled;

pub use codec::{BatchDividers, BatchedSubunit, DecodedInput, Subunit};
pub use error::InputError;
pub use extract::{BlockContext, ExtractionOutcome, InputExtractor, RawInput};
pub use mapping::{AccountMapping, InMemoryAccountMapping, MappedAccount};
pub use namespace::{NamespaceConfig, NamespaceRoute};
pub use scheduled::{InMemoryScheduledStore, ScheduledDataStore, ScheduledInput};
