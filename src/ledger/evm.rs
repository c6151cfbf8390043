//! EVM JSON-RPC ledger client with multi-RPC failover

use super::abi::{contract_abi, MATCH_CREATED};
use super::{ContractKind, LedgerClient, Mutation, ReadCall, SubmissionHandle};
use crate::config::LedgerConfig;
use crate::error::{CoordinatorError, CoordinatorResult};

use async_trait::async_trait;
use ethers::abi::{Abi, Function, Token};
use ethers::prelude::*;
use ethers::types::transaction::eip2718::TypedTransaction;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

struct DeployedContract {
    address: Address,
    abi: Abi,
}

/// Ledger client backed by one or more HTTP RPC endpoints
pub struct EvmLedgerClient {
    /// Ledger configuration
    config: LedgerConfig,
    /// HTTP providers (multiple for failover)
    http_providers: Vec<Provider<Http>>,
    /// Current active provider index
    current_provider: AtomicUsize,
    /// Signing middleware over the first provider, if a wallet is loaded
    signer: Option<SignerMiddleware<Provider<Http>, LocalWallet>>,
    profile_manager: DeployedContract,
    matchmaker: DeployedContract,
    escrow_chat: DeployedContract,
}

impl EvmLedgerClient {
    /// Create a new ledger client
    pub fn new(config: LedgerConfig, wallet: Option<LocalWallet>) -> CoordinatorResult<Self> {
        let mut http_providers = Vec::new();

        for url in &config.rpc_urls {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    let provider = provider.interval(Duration::from_millis(
                        config.receipt_poll_interval_ms,
                    ));
                    http_providers.push(provider);
                    debug!("Added HTTP provider for chain {}: {}", config.chain_id, url);
                }
                Err(e) => {
                    warn!("Failed to create provider for {}: {}", url, e);
                }
            }
        }

        if http_providers.is_empty() {
            return Err(CoordinatorError::Config(format!(
                "No valid RPC providers for chain {}",
                config.chain_id
            )));
        }

        let signer = wallet.map(|wallet| {
            SignerMiddleware::new(
                http_providers[0].clone(),
                wallet.with_chain_id(config.chain_id),
            )
        });

        let profile_manager = Self::deployed(
            ContractKind::ProfileManager,
            &config.profile_manager_address,
        )?;
        let matchmaker = Self::deployed(ContractKind::Matchmaker, &config.matchmaker_address)?;
        let escrow_chat = Self::deployed(ContractKind::EscrowChat, &config.escrow_chat_address)?;

        info!(
            "Ledger client ready for chain {} ({} RPC endpoint(s), signer: {})",
            config.chain_id,
            http_providers.len(),
            signer.is_some()
        );

        Ok(Self {
            config,
            http_providers,
            current_provider: AtomicUsize::new(0),
            signer,
            profile_manager,
            matchmaker,
            escrow_chat,
        })
    }

    fn deployed(kind: ContractKind, address: &str) -> CoordinatorResult<DeployedContract> {
        let address = address
            .parse::<Address>()
            .map_err(|e| CoordinatorError::Config(format!("Invalid {} address: {}", kind, e)))?;
        Ok(DeployedContract {
            address,
            abi: contract_abi(kind)?,
        })
    }

    fn contract(&self, kind: ContractKind) -> &DeployedContract {
        match kind {
            ContractKind::ProfileManager => &self.profile_manager,
            ContractKind::Matchmaker => &self.matchmaker,
            ContractKind::EscrowChat => &self.escrow_chat,
        }
    }

    fn function(&self, kind: ContractKind, name: &str) -> CoordinatorResult<(Address, &Function)> {
        let contract = self.contract(kind);
        let function = contract.abi.function(name).map_err(|e| {
            CoordinatorError::Internal(format!("{} has no function {}: {}", kind, name, e))
        })?;
        Ok((contract.address, function))
    }

    /// Get the active HTTP provider
    fn http(&self) -> &Provider<Http> {
        let idx = self.current_provider.load(Ordering::Relaxed);
        &self.http_providers[idx % self.http_providers.len()]
    }

    /// Switch to next available provider
    fn failover(&self) {
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.http_providers.len();
        self.current_provider.store(next, Ordering::Relaxed);
        warn!("Chain {} failover to provider {}", self.config.chain_id, next);
    }

    fn transport_error(&self, message: impl Into<String>) -> CoordinatorError {
        CoordinatorError::Ledger(format!(
            "chain {}: {}",
            self.config.chain_id,
            message.into()
        ))
    }

    async fn confirmations_reached(&self, receipt_block: u64) -> CoordinatorResult<bool> {
        let head = self.block_number().await?;
        Ok(head.saturating_sub(receipt_block) + 1 >= self.config.confirmation_blocks.max(1))
    }
}

#[async_trait]
impl LedgerClient for EvmLedgerClient {
    async fn call(&self, call: &ReadCall) -> CoordinatorResult<Vec<Token>> {
        let (address, function) = self.function(call.contract, call.function)?;
        let data = function
            .encode_input(&call.args)
            .map_err(|e| CoordinatorError::Internal(format!("Failed to encode {}: {}", call.function, e)))?;
        let tx: TypedTransaction = TransactionRequest::new().to(address).data(data).into();

        let mut last_error = String::new();
        for _ in 0..self.http_providers.len() {
            match self.http().call(&tx, None).await {
                Ok(output) => {
                    return function.decode_output(&output).map_err(|e| {
                        CoordinatorError::Ledger(format!(
                            "{}.{} returned undecodable output: {}",
                            call.contract, call.function, e
                        ))
                    });
                }
                Err(e) => {
                    warn!("Call {}.{} failed: {}", call.contract, call.function, e);
                    last_error = e.to_string();
                    self.failover();
                }
            }
        }

        Err(self.transport_error(last_error))
    }

    async fn submit(&self, mutation: &Mutation) -> CoordinatorResult<SubmissionHandle> {
        let signer = self
            .signer
            .as_ref()
            .ok_or_else(|| CoordinatorError::Wallet("No wallet loaded for signing".to_string()))?;

        let (address, function) = self.function(mutation.contract, mutation.function)?;
        let data = function.encode_input(&mutation.args).map_err(|e| {
            CoordinatorError::Internal(format!("Failed to encode {}: {}", mutation.function, e))
        })?;

        let mut tx = TransactionRequest::new().to(address).data(data);
        if let Some(value) = mutation.value {
            tx = tx.value(value);
        }

        // Gas estimation runs the call, so business-rule reverts surface here
        let pending = signer.send_transaction(tx, None).await.map_err(|e| {
            CoordinatorError::MutationRejected {
                kind: mutation.kind,
                message: e.to_string(),
            }
        })?;

        let handle = SubmissionHandle {
            kind: mutation.kind,
            correlation: Uuid::new_v4(),
            tx_hash: pending.tx_hash(),
        };
        info!(
            "{} submitted: {} (correlation {})",
            mutation.kind,
            handle.tx_hash_hex(),
            handle.correlation
        );
        Ok(handle)
    }

    async fn await_outcome(&self, handle: &SubmissionHandle) -> CoordinatorResult<()> {
        let poll_interval = Duration::from_millis(self.config.receipt_poll_interval_ms);

        loop {
            match self.http().get_transaction_receipt(handle.tx_hash).await {
                Ok(Some(receipt)) => {
                    if receipt.status != Some(U64::from(1)) {
                        return Err(CoordinatorError::MutationRejected {
                            kind: handle.kind,
                            message: format!("Transaction {} reverted", handle.tx_hash_hex()),
                        });
                    }

                    let included_at = receipt.block_number.map(|b| b.as_u64()).unwrap_or(0);
                    match self.confirmations_reached(included_at).await {
                        Ok(true) => return Ok(()),
                        Ok(false) => {
                            debug!("{} included at {}, waiting for depth", handle.tx_hash_hex(), included_at)
                        }
                        Err(e) => warn!("Failed to check confirmation depth: {}", e),
                    }
                }
                Ok(None) => {
                    debug!("{} still pending", handle.tx_hash_hex());
                }
                Err(e) => {
                    warn!("Failed to fetch receipt for {}: {}", handle.tx_hash_hex(), e);
                    self.failover();
                }
            }

            tokio::time::sleep(poll_interval).await;
        }
    }

    async fn block_number(&self) -> CoordinatorResult<u64> {
        for _ in 0..self.http_providers.len() {
            match self.http().get_block_number().await {
                Ok(block) => return Ok(block.as_u64()),
                Err(e) => {
                    warn!(
                        "Failed to get block number from chain {}: {}",
                        self.config.chain_id, e
                    );
                    self.failover();
                }
            }
        }

        Err(self.transport_error("All providers failed"))
    }

    async fn match_logs(&self, from_block: u64, to_block: u64) -> CoordinatorResult<Vec<Log>> {
        let filter = Filter::new()
            .address(self.matchmaker.address)
            .topic0(*MATCH_CREATED)
            .from_block(from_block)
            .to_block(to_block);

        for _ in 0..self.http_providers.len() {
            match self.http().get_logs(&filter).await {
                Ok(logs) => return Ok(logs),
                Err(e) => {
                    warn!(
                        "Failed to get logs from chain {}: {}",
                        self.config.chain_id, e
                    );
                    self.failover();
                }
            }
        }

        Err(self.transport_error("All providers failed to get logs"))
    }
}
