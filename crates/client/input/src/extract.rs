//! Extraction pipeline: raw on-chain payloads to [SubmittedData].

use std::sync::Arc;

use fc_crypto::SignatureDispatcher;
use fp_chain::{NetworkId, SubmittedData, U256};

use crate::{
    codec::{apportion_value, decode_input, BatchDividers, BatchedSubunit, DecodedInput, Subunit},
    guard::{batched_nonce, direct_nonce, is_timestamp_fresh},
    namespace::{subunit_message, NamespaceConfig},
    AccountMapping, InputError,
};

/// A game input as read from a chain, before validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawInput {
    pub tx_hash: Option<String>,
    /// The wallet which submitted the transaction.
    pub real_address: String,
    pub payload: Vec<u8>,
    pub value: U256,
}

/// The block an input landed in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockContext {
    pub network: NetworkId,
    pub block_number: u64,
    /// Unix seconds.
    pub timestamp: u64,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExtractionOutcome {
    pub submitted: Vec<SubmittedData>,
    /// Batched subunits that were dropped, either malformed or failing validation.
    pub rejected: usize,
}

impl ExtractionOutcome {
    pub fn extend(&mut self, other: ExtractionOutcome) {
        self.submitted.extend(other.submitted);
        self.rejected += other.rejected;
    }
}

pub struct InputExtractor {
    dispatcher: Arc<SignatureDispatcher>,
    namespaces: NamespaceConfig,
    dividers: BatchDividers,
    mapping: Arc<dyn AccountMapping>,
}

/// Payloads are UTF-8 text. Anything else is treated as an empty command.
pub fn decode_payload(bytes: &[u8]) -> String {
    String::from_utf8(bytes.to_vec()).unwrap_or_default()
}

/// Same as [decode_payload], for `0x` prefixed hex payloads.
pub fn decode_hex_payload(payload: &str) -> String {
    hex::decode(payload.strip_prefix("0x").unwrap_or(payload)).map(|bytes| decode_payload(&bytes)).unwrap_or_default()
}

impl InputExtractor {
    pub fn new(
        dispatcher: Arc<SignatureDispatcher>,
        namespaces: NamespaceConfig,
        dividers: BatchDividers,
        mapping: Arc<dyn AccountMapping>,
    ) -> Self {
        Self { dispatcher, namespaces, dividers, mapping }
    }

    pub async fn extract(&self, input: &RawInput, block: &BlockContext) -> Result<ExtractionOutcome, InputError> {
        let payload = decode_payload(&input.payload);
        match decode_input(&payload, &self.dividers) {
            DecodedInput::Direct(input_data) => {
                let account = self.resolve(&input.real_address).await?;
                let input_nonce = direct_nonce(block.block_number, &input.real_address, &input_data);
                Ok(ExtractionOutcome {
                    submitted: vec![SubmittedData {
                        real_address: input.real_address.clone(),
                        mapped_address: account.address,
                        user_id: account.user_id,
                        input_data,
                        input_nonce,
                        supplied_value: input.value,
                        scheduled: false,
                        tx_hash: input.tx_hash.clone(),
                        network: block.network.clone(),
                        extension_name: None,
                    }],
                    rejected: 0,
                })
            }
            DecodedInput::Batch(subunits) => self.extract_batch(input, block, &subunits).await,
        }
    }

    async fn extract_batch(
        &self,
        input: &RawInput,
        block: &BlockContext,
        subunits: &[Subunit],
    ) -> Result<ExtractionOutcome, InputError> {
        let share = apportion_value(input.value, subunits);
        let namespaces = self.namespaces.read_namespaces(block.block_number);

        let mut outcome = ExtractionOutcome::default();
        for subunit in subunits {
            let Subunit::Valid(subunit) = subunit else {
                tracing::debug!("Dropping malformed subunit in block #{}", block.block_number);
                outcome.rejected += 1;
                continue;
            };
            if !self.is_valid_subunit(subunit, block, &namespaces) {
                outcome.rejected += 1;
                continue;
            }

            let account = self.resolve(&subunit.user_address).await?;
            outcome.submitted.push(SubmittedData {
                real_address: subunit.user_address.clone(),
                mapped_address: account.address,
                user_id: account.user_id,
                input_data: subunit.game_input.clone(),
                input_nonce: batched_nonce(
                    &subunit.millisecond_timestamp,
                    &subunit.user_address,
                    &subunit.game_input,
                ),
                supplied_value: share,
                scheduled: false,
                tx_hash: input.tx_hash.clone(),
                network: block.network.clone(),
                extension_name: None,
            });
        }
        Ok(outcome)
    }

    fn is_valid_subunit(&self, subunit: &BatchedSubunit, block: &BlockContext, namespaces: &[&str]) -> bool {
        let Some(timestamp_ms) = subunit.timestamp_ms() else {
            tracing::debug!("Dropping subunit of {} with a non-numeric timestamp", subunit.user_address);
            return false;
        };
        if !is_timestamp_fresh(timestamp_ms, block.timestamp) {
            tracing::debug!(
                "Dropping stale subunit of {} ({timestamp_ms}ms, block at {}s)",
                subunit.user_address,
                block.timestamp
            );
            return false;
        }

        let messages: Vec<String> = namespaces
            .iter()
            .map(|namespace| subunit_message(namespace, &subunit.millisecond_timestamp, &subunit.game_input))
            .collect();
        let verified = self.dispatcher.verify_any(
            subunit.address_type(),
            &subunit.user_address,
            messages.iter().map(String::as_str),
            &subunit.user_signature,
        );
        if !verified {
            tracing::debug!("Dropping subunit of {} with an invalid signature", subunit.user_address);
        }
        verified
    }

    async fn resolve(&self, address: &str) -> Result<crate::MappedAccount, InputError> {
        self.mapping
            .resolve_main_address(address)
            .await
            .map_err(|source| InputError::AccountMapping { address: address.to_string(), source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{mapping::MockAccountMapping, InMemoryAccountMapping, MappedAccount};
    use alloy::signers::{local::PrivateKeySigner, SignerSync};
    use assert_matches::assert_matches;
    use rstest::{fixture, rstest};

    const BLOCK_TS: u64 = 1_690_000_000;
    const NAMESPACE: &str = "dev";

    struct Batcher {
        extractor: InputExtractor,
        dividers: BatchDividers,
    }

    #[fixture]
    fn batcher() -> Batcher {
        let dividers = BatchDividers { outer: '#', inner: '|' };
        let extractor = InputExtractor::new(
            Arc::new(SignatureDispatcher::with_default_verifiers()),
            NamespaceConfig::new(NAMESPACE),
            dividers,
            Arc::new(InMemoryAccountMapping::new()),
        );
        Batcher { extractor, dividers }
    }

    fn block() -> BlockContext {
        BlockContext { network: NetworkId::eip155(31337), block_number: 12, timestamp: BLOCK_TS }
    }

    fn subunit(signer: &PrivateKeySigner, input: &str, timestamp_ms: u64, dividers: &BatchDividers) -> String {
        let message = subunit_message(NAMESPACE, &timestamp_ms.to_string(), input);
        let signature = signer.sign_message_sync(message.as_bytes()).unwrap();
        let address = signer.address().to_string();
        let signature = format!("0x{}", hex::encode(signature.as_bytes()));
        [String::from("1"), address, signature, input.to_string(), timestamp_ms.to_string()]
            .join(dividers.inner.to_string().as_str())
    }

    fn raw(payload: String, value: u64) -> RawInput {
        RawInput {
            tx_hash: Some("0x01".into()),
            real_address: "0x00000000000000000000000000000000000000b7".into(),
            payload: payload.into_bytes(),
            value: U256::from(value),
        }
    }

    #[rstest]
    #[tokio::test]
    async fn direct_command(batcher: Batcher) {
        let outcome = batcher.extractor.extract(&raw("j|@3|1".into(), 7), &block()).await.unwrap();

        assert_eq!(outcome.rejected, 0);
        let [data] = outcome.submitted.as_slice() else { panic!("expected one command") };
        assert_eq!(data.input_data, "j|@3|1");
        assert_eq!(data.real_address, "0x00000000000000000000000000000000000000b7");
        assert_eq!(data.supplied_value, U256::from(7u64));
        assert_eq!(data.input_nonce, direct_nonce(12, "0x00000000000000000000000000000000000000b7", "j|@3|1"));
        assert!(!data.scheduled);
    }

    #[rstest]
    #[tokio::test]
    async fn bad_signature_excludes_only_that_subunit(batcher: Batcher) {
        let alice = PrivateKeySigner::random();
        let bob = PrivateKeySigner::random();
        let ts = BLOCK_TS * 1000;

        let forged = subunit(&alice, "xp:5", ts, &batcher.dividers).replace("xp:5", "xp:500");
        let honest = subunit(&bob, "xp:3", ts + 500, &batcher.dividers);
        let payload = format!("{forged}#{honest}");

        let outcome = batcher.extractor.extract(&raw(payload, 100), &block()).await.unwrap();

        assert_eq!(outcome.rejected, 1);
        let [data] = outcome.submitted.as_slice() else { panic!("expected one command") };
        assert_eq!(data.real_address, bob.address().to_string());
        assert_eq!(data.input_data, "xp:3");
        // the value is split across both decoded subunits, the rejected share is not redistributed
        assert_eq!(data.supplied_value, U256::from(50u64));
        assert_eq!(data.input_nonce, batched_nonce(&(ts + 500).to_string(), &bob.address().to_string(), "xp:3"));
    }

    #[rstest]
    #[tokio::test]
    async fn stale_subunit_is_dropped(batcher: Batcher) {
        let alice = PrivateKeySigner::random();
        let stale = BLOCK_TS * 1000 - 86_400_000;
        let payload = format!("{}#", subunit(&alice, "xp:1", stale, &batcher.dividers));

        let outcome = batcher.extractor.extract(&raw(payload, 0), &block()).await.unwrap();
        assert!(outcome.submitted.is_empty());
        assert_eq!(outcome.rejected, 1);
    }

    #[rstest]
    #[tokio::test]
    async fn any_active_namespace_is_accepted(batcher: Batcher) {
        let alice = PrivateKeySigner::random();
        let ts = BLOCK_TS * 1000;
        let payload = format!("{}#", subunit(&alice, "xp:1", ts, &batcher.dividers));

        let mut namespaces = NamespaceConfig::new("other");
        namespaces
            .routes
            .push(crate::NamespaceRoute { from_block_height: 10, namespaces: vec!["v2".into(), NAMESPACE.into()] });
        let extractor = InputExtractor::new(
            Arc::new(SignatureDispatcher::with_default_verifiers()),
            namespaces,
            batcher.dividers,
            Arc::new(InMemoryAccountMapping::new()),
        );

        let outcome = extractor.extract(&raw(payload, 0), &block()).await.unwrap();
        assert_eq!(outcome.submitted.len(), 1);
    }

    #[rstest]
    #[tokio::test]
    async fn delegated_wallet_is_mapped(batcher: Batcher) {
        let alice = PrivateKeySigner::random();
        let mapping = Arc::new(InMemoryAccountMapping::new());
        let main = mapping.link(&alice.address().to_string(), "0x00000000000000000000000000000000000000aa");
        let extractor = InputExtractor::new(
            Arc::new(SignatureDispatcher::with_default_verifiers()),
            NamespaceConfig::new(NAMESPACE),
            batcher.dividers,
            mapping,
        );

        let payload = format!("{}#", subunit(&alice, "xp:1", BLOCK_TS * 1000, &batcher.dividers));
        let outcome = extractor.extract(&raw(payload, 0), &block()).await.unwrap();

        assert_eq!(outcome.submitted[0].mapped_address, main.address);
        assert_eq!(outcome.submitted[0].user_id, main.user_id);
    }

    #[tokio::test]
    async fn mapping_failure_propagates() {
        let mut mapping = MockAccountMapping::new();
        mapping.expect_resolve_main_address().returning(|_| Err(anyhow::anyhow!("database unavailable")));
        let extractor = InputExtractor::new(
            Arc::new(SignatureDispatcher::with_default_verifiers()),
            NamespaceConfig::new(NAMESPACE),
            BatchDividers::default(),
            Arc::new(mapping),
        );

        assert_matches!(
            extractor.extract(&raw("join".into(), 0), &block()).await,
            Err(InputError::AccountMapping { address, .. }) if address == "0x00000000000000000000000000000000000000b7"
        );
    }

    #[tokio::test]
    async fn non_utf8_payload_is_an_empty_command() {
        let mut mapping = MockAccountMapping::new();
        mapping
            .expect_resolve_main_address()
            .returning(|address| Ok(MappedAccount { address: address.to_string(), user_id: 1 }));
        let extractor = InputExtractor::new(
            Arc::new(SignatureDispatcher::empty()),
            NamespaceConfig::new(NAMESPACE),
            BatchDividers::default(),
            Arc::new(mapping),
        );
        let input = RawInput { payload: vec![0xff, 0xfe], ..raw(String::new(), 0) };

        let outcome = extractor.extract(&input, &block()).await.unwrap();
        assert_eq!(outcome.submitted[0].input_data, "");
        assert_eq!(decode_hex_payload("0x6a6f696e"), "join");
        assert_eq!(decode_hex_payload("0xzz"), "");
    }
}
