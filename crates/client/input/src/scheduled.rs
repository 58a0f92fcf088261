use std::{
    collections::BTreeMap,
    sync::{Mutex, PoisonError},
};

use async_trait::async_trait;
use fp_chain::NetworkId;

/// An input that the state machine will process at `future_block_height`, without any wallet having
/// submitted it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledInput {
    pub future_block_height: u64,
    pub input_data: String,
    pub tx_hash: Option<String>,
    pub network: NetworkId,
    pub contract_address: Option<String>,
    pub cde_name: String,
}

#[async_trait]
pub trait ScheduledDataStore: Send + Sync {
    /// Appends an input and returns its id.
    async fn insert_scheduled(&self, input: ScheduledInput) -> anyhow::Result<u64>;

    /// Deleting an unknown id is not an error. Returns whether something was deleted.
    async fn delete_scheduled(&self, id: u64) -> anyhow::Result<bool>;

    async fn scheduled_at(&self, block_height: u64) -> anyhow::Result<Vec<(u64, ScheduledInput)>>;
}

#[derive(Default)]
pub struct InMemoryScheduledStore {
    inner: Mutex<StoreState>,
}

#[derive(Default)]
struct StoreState {
    inputs: BTreeMap<u64, ScheduledInput>,
    next_id: u64,
}

impl InMemoryScheduledStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ScheduledDataStore for InMemoryScheduledStore {
    async fn insert_scheduled(&self, input: ScheduledInput) -> anyhow::Result<u64> {
        let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        state.next_id += 1;
        let id = state.next_id;
        state.inputs.insert(id, input);
        Ok(id)
    }

    async fn delete_scheduled(&self, id: u64) -> anyhow::Result<bool> {
        Ok(self.inner.lock().unwrap_or_else(PoisonError::into_inner).inputs.remove(&id).is_some())
    }

    async fn scheduled_at(&self, block_height: u64) -> anyhow::Result<Vec<(u64, ScheduledInput)>> {
        let state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(state
            .inputs
            .iter()
            .filter(|(_, input)| input.future_block_height == block_height)
            .map(|(id, input)| (*id, input.clone()))
            .collect())
    }
}
