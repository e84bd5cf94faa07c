//! Nonce allocation for transactions built during a run
//!
//! Each sender gets one allocator, seeded from the chain the first time the
//! sender is used and never re-synced afterwards. Re-querying mid-run would
//! race with our own in-flight transactions, so the allocator assumes no
//! other party sends from the account while the run is active.

use crate::chain::ChainClient;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::types::Address;

use std::collections::HashMap;
use tracing::debug;

/// Hands out strictly increasing nonces for one sender
#[derive(Debug)]
pub struct NonceAllocator {
    address: Address,
    base: u64,
    /// Next nonce to hand out
    current: u64,
}

impl NonceAllocator {
    /// Create an allocator starting at the account's on-chain nonce
    pub fn new(address: Address, base: u64) -> Self {
        Self {
            address,
            base,
            current: base,
        }
    }

    /// Allocate the next nonce
    pub fn next(&mut self) -> u64 {
        let nonce = self.current;
        self.current += 1;
        debug!("Allocated nonce {} for {}", nonce, self.address);
        nonce
    }

    /// Nonce the next call to [`next`](Self::next) will return
    pub fn peek(&self) -> u64 {
        self.current
    }

    /// Release a nonce whose transaction never reached the network.
    ///
    /// Only the most recently allocated nonce can be released; anything else
    /// would leave a gap. Returns whether the nonce was released.
    pub fn release(&mut self, nonce: u64) -> bool {
        if self.current > self.base && nonce == self.current - 1 {
            self.current = nonce;
            debug!("Released nonce {} for {}", nonce, self.address);
            true
        } else {
            false
        }
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    /// Number of nonces handed out so far
    pub fn allocated(&self) -> u64 {
        self.current - self.base
    }

    pub fn address(&self) -> &Address {
        &self.address
    }
}

/// Allocators for every sender touched during a run
#[derive(Debug, Default)]
pub struct NonceBook {
    allocators: HashMap<Address, NonceAllocator>,
}

impl NonceBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the allocator for a sender, querying its base nonce on first use
    pub async fn allocator(
        &mut self,
        client: &dyn ChainClient,
        address: &Address,
    ) -> OrchestratorResult<&mut NonceAllocator> {
        if !self.allocators.contains_key(address) {
            let account = client.get_account(address).await?;
            debug!(
                "Seeded nonce for {}: {} (balance {})",
                address, account.nonce, account.balance
            );
            self.seed(address.clone(), account.nonce);
        }

        self.allocators
            .get_mut(address)
            .ok_or_else(|| OrchestratorError::Internal(format!("No allocator for {}", address)))
    }

    /// Install an allocator with a known base nonce
    pub fn seed(&mut self, address: Address, base: u64) {
        self.allocators
            .insert(address.clone(), NonceAllocator::new(address, base));
    }

    pub fn get(&self, address: &Address) -> Option<&NonceAllocator> {
        self.allocators.get(address)
    }

    pub fn get_mut(&mut self, address: &Address) -> Option<&mut NonceAllocator> {
        self.allocators.get_mut(address)
    }

    /// Give back the nonces of transactions that never reached the network.
    ///
    /// Nonces are released newest first; returns how many were released.
    pub fn release_all(&mut self, released: &[(Address, u64)]) -> usize {
        released
            .iter()
            .rev()
            .filter(|(address, nonce)| {
                self.allocators
                    .get_mut(address)
                    .map(|allocator| allocator.release(*nonce))
                    .unwrap_or(false)
            })
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockChainClient;
    use crate::types::AccountState;
    use alloy_primitives::U256;

    #[test]
    fn test_sequence_has_no_gaps() {
        for base in [0u64, 1, 41, 1_000_000] {
            let mut allocator = NonceAllocator::new(Address::new("erd1a"), base);
            let nonces: Vec<u64> = (0..25).map(|_| allocator.next()).collect();
            let expected: Vec<u64> = (base..base + 25).collect();
            assert_eq!(nonces, expected);
            assert_eq!(allocator.allocated(), 25);
        }
    }

    #[test]
    fn test_release_only_last() {
        let mut allocator = NonceAllocator::new(Address::new("erd1a"), 10);
        assert!(!allocator.release(9));
        let first = allocator.next();
        let second = allocator.next();
        assert!(!allocator.release(first));
        assert!(allocator.release(second));
        assert!(allocator.release(first));
        assert_eq!(allocator.peek(), 10);
        assert_eq!(allocator.next(), 10);
    }

    #[tokio::test]
    async fn test_book_queries_base_once() {
        let mut client = MockChainClient::new();
        client.expect_get_account().times(1).returning(|address| {
            Ok(AccountState {
                address: address.clone(),
                nonce: 5,
                balance: U256::ZERO,
            })
        });

        let address = Address::new("erd1owner");
        let mut book = NonceBook::new();
        assert_eq!(book.allocator(&client, &address).await.unwrap().next(), 5);
        assert_eq!(book.allocator(&client, &address).await.unwrap().next(), 6);
        assert_eq!(book.get(&address).map(|a| a.allocated()), Some(2));
    }

    #[test]
    fn test_release_all_rewinds_newest_first() {
        let sponsor = Address::new("erd1sponsor");
        let owner = Address::new("erd1owner");
        let mut book = NonceBook::new();
        book.seed(sponsor.clone(), 3);
        book.seed(owner.clone(), 0);

        let mut issued = Vec::new();
        for address in [&sponsor, &sponsor, &owner] {
            let nonce = book.get_mut(address).unwrap().next();
            issued.push((address.clone(), nonce));
        }

        assert_eq!(book.release_all(&issued), 3);
        assert_eq!(book.get(&sponsor).unwrap().peek(), 3);
        assert_eq!(book.get(&owner).unwrap().peek(), 0);
    }
}
