//! In-memory view of committed balances.
//!
//! Only the writer updates it, and only after a commit, so a cached value is
//! always a balance that exists in the store. A miss means "ask the store".

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use stakeflow_types::AccountId;

/// Last committed balance per account.
#[derive(Debug, Clone, Default)]
pub struct BalanceCache {
    inner: Arc<RwLock<HashMap<AccountId, i64>>>,
}

impl BalanceCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached balance, if this account has been touched since start-up.
    #[must_use]
    pub fn get(&self, account_id: AccountId) -> Option<i64> {
        let map = self.inner.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        map.get(&account_id).copied()
    }

    /// Record committed balances.
    pub fn apply<'a>(&self, balances: impl IntoIterator<Item = (&'a AccountId, &'a i64)>) {
        let mut map = self.inner.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        for (id, balance) in balances {
            map.insert(*id, *balance);
        }
    }

    pub fn set(&self, account_id: AccountId, balance: i64) {
        let mut map = self.inner.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        map.insert(account_id, balance);
    }
}
