use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
};

use async_trait::async_trait;

/// The main account behind a wallet address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedAccount {
    pub address: String,
    pub user_id: u64,
}

/// Resolves delegated wallets to the main account they act for.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AccountMapping: Send + Sync {
    /// Unknown addresses are registered as their own main account.
    async fn resolve_main_address(&self, raw_address: &str) -> anyhow::Result<MappedAccount>;
}

/// Process-local account mapping.
#[derive(Default)]
pub struct InMemoryAccountMapping {
    inner: Mutex<MappingState>,
}

#[derive(Default)]
struct MappingState {
    accounts: HashMap<String, MappedAccount>,
    next_user_id: u64,
}

impl MappingState {
    fn resolve(&mut self, address: &str) -> MappedAccount {
        if let Some(account) = self.accounts.get(address) {
            return account.clone();
        }
        self.next_user_id += 1;
        let account = MappedAccount { address: address.to_string(), user_id: self.next_user_id };
        self.accounts.insert(address.to_string(), account.clone());
        account
    }
}

impl InMemoryAccountMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delegates `delegate` to the main account of `main_address`.
    pub fn link(&self, delegate: &str, main_address: &str) -> MappedAccount {
        let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let main = state.resolve(&normalize(main_address));
        state.accounts.insert(normalize(delegate), main.clone());
        main
    }
}

#[async_trait]
impl AccountMapping for InMemoryAccountMapping {
    async fn resolve_main_address(&self, raw_address: &str) -> anyhow::Result<MappedAccount> {
        let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(state.resolve(&normalize(raw_address)))
    }
}

/// Hex addresses are case-insensitive.
fn normalize(address: &str) -> String {
    if address.starts_with("0x") {
        address.to_lowercase()
    } else {
        address.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_addresses_get_fresh_ids() {
        let mapping = InMemoryAccountMapping::new();
        let a = mapping.resolve_main_address("0xAbC").await.unwrap();
        let b = mapping.resolve_main_address("0xdef").await.unwrap();
        assert_eq!(a, MappedAccount { address: "0xabc".into(), user_id: 1 });
        assert_eq!(b.user_id, 2);
        assert_eq!(mapping.resolve_main_address("0xabc").await.unwrap(), a);
    }

    #[tokio::test]
    async fn delegates_resolve_to_main_account() {
        let mapping = InMemoryAccountMapping::new();
        let main = mapping.link("addr_test1delegate", "0xMain");
        assert_eq!(mapping.resolve_main_address("addr_test1delegate").await.unwrap(), main);
        assert_eq!(main.address, "0xmain");
    }
}
