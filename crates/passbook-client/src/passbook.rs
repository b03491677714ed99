//! Passbook facade
//!
//! Wires the ledger, station, broker, splitter and credential lifecycle
//! from one [`PassbookConfig`]. This is the surface a UI talks to.

use crate::broker::{AccessBroker, AccessGrant, AccessParams};
use crate::cancel::CancelToken;
use crate::http::HttpStation;
use crate::lifecycle::CredentialLifecycle;
use crate::redeem::{BlindExchangeClient, RedeemOutcome};
use crate::split::{SplitOutcome, SplitService};
use crate::station::Station;
use passbook_core::{
    AccessCredential, Clock, ConfigError, PassbookConfig, PassbookError, ProgressObserver,
    RedeemError, SplitError, SystemClock, Ticket,
};
use passbook_store::{
    CredentialVault, FileStore, ImportSummary, KeyValueStore, LedgerCount, TokenStore,
    VaultTransfer,
};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// A fully wired client
pub struct Passbook {
    config: PassbookConfig,
    store: Arc<TokenStore>,
    redeemer: BlindExchangeClient,
    broker: Arc<AccessBroker>,
    splitter: SplitService,
    lifecycle: Arc<CredentialLifecycle>,
}

impl Passbook {
    /// Open the ledger in `config.data_dir` and talk to `config.station_url`
    pub fn open(config: PassbookConfig) -> Result<Self, PassbookError> {
        config.validate()?;
        let station = HttpStation::new(config.station_url.clone(), config.remote_timeout())
            .map_err(|e| ConfigError::Invalid(format!("station client: {e}")))?;
        let backend = FileStore::open(&config.data_dir)?;
        Self::with_parts(config, Arc::new(station), Arc::new(backend), Arc::new(SystemClock))
    }

    /// Build from explicit parts
    pub fn with_parts(
        config: PassbookConfig,
        station: Arc<dyn Station>,
        backend: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, PassbookError> {
        let store = Arc::new(TokenStore::open(Arc::clone(&backend))?);
        let timeout = config.remote_timeout();

        let redeemer =
            BlindExchangeClient::new(Arc::clone(&station), Arc::clone(&store)).with_timeout(timeout);
        let broker = Arc::new(
            AccessBroker::new(Arc::clone(&station), Arc::clone(&store))
                .with_timeout(timeout)
                .with_retry_margin(config.retry_margin),
        );
        let splitter = SplitService::new(station, Arc::clone(&store))
            .with_timeout(timeout)
            .with_max_split(config.max_split)
            .with_retry_margin(config.retry_margin);
        let lifecycle = Arc::new(CredentialLifecycle::new(
            Arc::clone(&broker),
            CredentialVault::new(backend),
            clock,
        ));
        lifecycle.restore()?;

        Ok(Self {
            config,
            store,
            redeemer,
            broker,
            splitter,
            lifecycle,
        })
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &PassbookConfig {
        &self.config
    }

    #[inline]
    #[must_use]
    pub fn store(&self) -> &Arc<TokenStore> {
        &self.store
    }

    #[inline]
    #[must_use]
    pub fn lifecycle(&self) -> &Arc<CredentialLifecycle> {
        &self.lifecycle
    }

    /// Mint tickets from a redemption code
    pub async fn redeem(
        &self,
        code: &str,
        progress: &dyn ProgressObserver,
    ) -> Result<RedeemOutcome, RedeemError> {
        self.redeemer.redeem(code, progress).await
    }

    /// Exchange a ticket and start tracking the resulting credential
    ///
    /// Once the exchange succeeds the credential is always returned; see
    /// [`CredentialLifecycle::has_unsaved_changes`] for vault write failures.
    pub async fn request_access(
        &self,
        params: AccessParams,
    ) -> Result<(Arc<AccessCredential>, AccessGrant), PassbookError> {
        let grant = self.broker.request_access(params).await?;
        let credential = self.lifecycle.track(grant.credential.clone());
        Ok((credential, grant))
    }

    /// Fold `n` tickets into one code
    pub async fn split(&self, n: usize) -> Result<SplitOutcome, SplitError> {
        self.splitter.split(n).await
    }

    /// Largest split currently allowed
    #[must_use]
    pub fn max_split(&self) -> usize {
        self.splitter.max_allowed()
    }

    #[must_use]
    pub fn count(&self) -> LedgerCount {
        self.store.count()
    }

    #[must_use]
    pub fn list_ready(&self) -> Vec<Ticket> {
        self.store.list_ready()
    }

    pub fn export_json(&self) -> Result<String, PassbookError> {
        Ok(self.store.export_json()?)
    }

    pub fn import_json(&self, json: &str) -> Result<ImportSummary, PassbookError> {
        Ok(self.store.import_json(json)?)
    }

    /// Start a whole-ledger transfer to another device
    pub fn begin_transfer(&self) -> Result<VaultTransfer<'_>, PassbookError> {
        Ok(self.store.begin_transfer()?)
    }

    /// Start the expiry ticker at the configured cadence
    pub fn start_ticker(&self, cancel: CancelToken) -> JoinHandle<()> {
        self.lifecycle
            .spawn_ticker(self.config.tick_interval(), cancel)
    }
}

impl std::fmt::Debug for Passbook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Passbook")
            .field("station", &self.config.station_url)
            .field("store", &self.store)
            .field("lifecycle", &self.lifecycle)
            .finish_non_exhaustive()
    }
}
