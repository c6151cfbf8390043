//! Identity provider backed by a local wallet

use crate::error::{CoordinatorError, CoordinatorResult};

use async_trait::async_trait;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::Address;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

/// Who the local participant is
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Address of the logged-in account, if any
    fn current_address(&self) -> Option<Address>;

    /// Whether `login` can succeed without user interaction
    fn is_ready(&self) -> bool;

    async fn login(&self) -> CoordinatorResult<Address>;

    async fn logout(&self);
}

/// Load the signing wallet from the environment variable named `env_name`
pub fn load_wallet(env_name: &str) -> CoordinatorResult<LocalWallet> {
    match std::env::var(env_name) {
        Ok(key) => key
            .trim()
            .parse::<LocalWallet>()
            .map_err(|e| CoordinatorError::Wallet(format!("Invalid private key: {}", e))),
        Err(_) => Err(CoordinatorError::Wallet(format!(
            "No wallet configured. Set {}",
            env_name
        ))),
    }
}

/// Identity of a locally held wallet
pub struct WalletIdentity {
    wallet: Option<LocalWallet>,
    logged_in: AtomicBool,
}

impl WalletIdentity {
    pub fn new(wallet: Option<LocalWallet>) -> Self {
        Self {
            wallet,
            logged_in: AtomicBool::new(false),
        }
    }

    /// Wallet address, whether or not a session is active
    pub fn address(&self) -> Option<Address> {
        self.wallet.as_ref().map(|w| w.address())
    }
}

#[async_trait]
impl IdentityProvider for WalletIdentity {
    fn current_address(&self) -> Option<Address> {
        if self.logged_in.load(Ordering::SeqCst) {
            self.address()
        } else {
            None
        }
    }

    fn is_ready(&self) -> bool {
        self.wallet.is_some()
    }

    async fn login(&self) -> CoordinatorResult<Address> {
        let address = self
            .address()
            .ok_or_else(|| CoordinatorError::Wallet("No wallet loaded".to_string()))?;
        self.logged_in.store(true, Ordering::SeqCst);
        info!("Logged in as {:?}", address);
        Ok(address)
    }

    async fn logout(&self) {
        if self.logged_in.swap(false, Ordering::SeqCst) {
            info!("Logged out");
        }
    }
}

#[cfg(test)]
pub(crate) const TEST_KEY: &str =
    "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";
