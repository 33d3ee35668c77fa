use std::time::Duration;

use anyhow::Result;
use reqwest::blocking::Client as HttpClient;
use serde_json::Value;

use cutify_contracts::errors::{classify_failure, user_message_for, FailureCategory};
use cutify_contracts::events::{EventPayload, EventWriter};
use cutify_contracts::mutation::MutationStatus;
use cutify_contracts::treasury::TreasuryState;
use cutify_contracts::workflow::Workflow;

use crate::chain::{CollectionQuery, MutationContract};
use crate::generate::MutationEngine;
use crate::host::{best_effort, HostRuntime};
use crate::mint::{run_mint, share_embeds, share_text, MintOutcome};
use crate::storage::ContentStorage;
use crate::wallet::{auto_connect, WalletProvider};
use crate::{error_chain_text, truncate_text};

/// User-facing message for a failed owned-asset query.
pub const LOAD_FAILURE_MESSAGE: &str = "Unable to load your Warplets. Please try again.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WithdrawOutcome {
    Completed { hash: String },
    Failed {
        user_message: String,
        category: FailureCategory,
    },
    NotReady,
}

/// One end-to-end app session: the workflow and treasury state plus the
/// external collaborators behind their trait boundaries. All methods
/// run on the caller's thread; staleness is handled by the generation
/// tokens, not by cancellation.
pub struct CutifySession {
    pub workflow: Workflow,
    pub treasury: TreasuryState,
    wallet: Box<dyn WalletProvider>,
    host: Box<dyn HostRuntime>,
    collection: Box<dyn CollectionQuery>,
    contract: Box<dyn MutationContract>,
    storage: Box<dyn ContentStorage>,
    mutation_engine: MutationEngine,
    http: HttpClient,
    events: EventWriter,
    connect_backoff: Duration,
}

impl CutifySession {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        wallet: Box<dyn WalletProvider>,
        host: Box<dyn HostRuntime>,
        collection: Box<dyn CollectionQuery>,
        contract: Box<dyn MutationContract>,
        storage: Box<dyn ContentStorage>,
        mutation_engine: MutationEngine,
        events: EventWriter,
        connect_backoff: Duration,
    ) -> Self {
        Self {
            workflow: Workflow::new(),
            treasury: TreasuryState::new(),
            wallet,
            host,
            collection,
            contract,
            storage,
            mutation_engine,
            http: HttpClient::new(),
            events,
            connect_backoff,
        }
    }

    pub fn events(&self) -> &EventWriter {
        &self.events
    }

    /// Startup sequence: resolve the environment (failing closed to
    /// standalone), signal readiness to a hosting shell, then attempt
    /// the bounded auto-connect and the first asset load.
    pub fn start(&mut self) -> Result<()> {
        match self.host.is_hosted() {
            Ok(hosted) => self.workflow.resolve_environment(hosted),
            Err(err) => {
                self.emit_error("environment_detection_failed", &err)?;
                self.workflow.fail_environment_detection();
            }
        }

        if self.workflow.environment() == cutify_contracts::workflow::Environment::HostedMiniApp {
            best_effort(&self.events, "signal_ready", self.host.signal_ready());
            best_effort(&self.events, "request_install", self.host.request_install());
            if auto_connect(
                &mut self.workflow,
                self.wallet.as_ref(),
                &self.events,
                self.connect_backoff,
            )? {
                self.load_owned_assets()?;
            }
        }
        Ok(())
    }

    /// Manual connect from the standalone surface.
    pub fn connect(&mut self, connector_id: &str) -> Result<bool> {
        match self.wallet.connect(connector_id) {
            Ok(address) => {
                self.workflow.set_connected(&address);
                self.load_owned_assets()?;
                Ok(true)
            }
            Err(err) => {
                let mut payload = EventPayload::new();
                payload.insert(
                    "connector".to_string(),
                    Value::String(connector_id.to_string()),
                );
                payload.insert("error".to_string(), Value::String(err.to_string()));
                self.events.emit("connect_failed", payload)?;
                Ok(false)
            }
        }
    }

    pub fn disconnect(&mut self) {
        self.wallet.disconnect();
        self.workflow.disconnect();
        self.treasury.reset();
    }

    /// Query owned assets for the connected address. A sole asset
    /// auto-activates and kicks off its first generation; a failure is
    /// presented with a retry affordance, never auto-retried.
    pub fn load_owned_assets(&mut self) -> Result<()> {
        let Some(address) = self.workflow.address().map(str::to_string) else {
            return Ok(());
        };
        self.workflow.begin_asset_load();

        match self.collection.fetch_owned_assets(&address) {
            Ok(assets) => {
                let mut payload = EventPayload::new();
                payload.insert("count".to_string(), Value::from(assets.len()));
                self.events.emit("assets_loaded", payload)?;
                if let Some(activated) = self.workflow.apply_owned_assets(assets) {
                    if !activated.image.trim().is_empty() {
                        self.cutify()?;
                    }
                }
            }
            Err(err) => {
                let mut payload = EventPayload::new();
                payload.insert("error".to_string(), Value::String(err.to_string()));
                self.events.emit("assets_load_failed", payload)?;
                self.workflow.fail_asset_load(LOAD_FAILURE_MESSAGE);
            }
        }
        Ok(())
    }

    /// Explicit selection. Activating an asset with a pending mutation
    /// starts its generation immediately.
    pub fn select(&mut self, token_id: &str) -> Result<bool> {
        if !self.workflow.select(token_id) {
            return Ok(false);
        }
        if self.workflow.mutation.status() == MutationStatus::Pending {
            self.cutify()?;
        }
        Ok(true)
    }

    /// First generation or retry for the active asset.
    pub fn cutify(&mut self) -> Result<bool> {
        let Some(source_url) = self
            .workflow
            .active()
            .map(|nft| nft.image.clone())
            .filter(|url| !url.trim().is_empty())
        else {
            return Ok(false);
        };
        self.mutation_engine
            .generate(&mut self.workflow.mutation, &source_url)
    }

    /// Remix: re-run generation against the current mutated image.
    pub fn remix(&mut self) -> Result<bool> {
        self.mutation_engine.remix(&mut self.workflow.mutation)
    }

    /// Current mint fee in wei, read from the contract for display.
    /// The contract enforces it; the client never does.
    pub fn mutation_fee(&self) -> std::result::Result<u128, cutify_contracts::errors::QueryError> {
        self.contract.mutation_fee()
    }

    pub fn mint(&mut self) -> Result<MintOutcome> {
        run_mint(
            &mut self.workflow,
            self.contract.as_ref(),
            self.storage.as_ref(),
            self.host.as_ref(),
            &self.http,
            &self.events,
        )
    }

    /// Open the host composer for the latest mint. Best-effort; returns
    /// whether there was anything to share.
    pub fn share(&self) -> Result<bool> {
        let Some(success) = self.workflow.mint_success() else {
            return Ok(false);
        };
        best_effort(
            &self.events,
            "compose_share",
            self.host
                .compose_share(&share_text(success), &share_embeds(success)),
        );
        Ok(true)
    }

    /// Resolve the admin panel: contract owner against the connected
    /// address, then the treasury balance. Both reads must land before
    /// the panel leaves its skeleton; a failed read leaves the
    /// corresponding field unresolved.
    pub fn treasury_open(&mut self) -> Result<()> {
        let Some(connected) = self.workflow.address().map(str::to_string) else {
            return Ok(());
        };
        match self.contract.owner() {
            Ok(owner) => self.treasury.resolve_owner(&owner, &connected),
            Err(err) => {
                let mut payload = EventPayload::new();
                payload.insert("error".to_string(), Value::String(err.to_string()));
                self.events.emit("owner_read_failed", payload)?;
            }
        }
        self.treasury_refresh_balance()?;
        Ok(())
    }

    pub fn treasury_refresh_balance(&mut self) -> Result<()> {
        match self.contract.treasury_balance() {
            Ok(wei) => self.treasury.set_balance(wei),
            Err(err) => {
                let mut payload = EventPayload::new();
                payload.insert("error".to_string(), Value::String(err.to_string()));
                self.events.emit("balance_read_failed", payload)?;
            }
        }
        Ok(())
    }

    /// Owner-only withdrawal. The guard is released on every path and
    /// the displayed balance is re-read from the contract afterwards,
    /// never decremented locally.
    pub fn treasury_withdraw(&mut self) -> Result<WithdrawOutcome> {
        if !self.treasury.begin_withdraw() {
            return Ok(WithdrawOutcome::NotReady);
        }

        let outcome = match self.contract.withdraw() {
            Ok(hash) => {
                let mut payload = EventPayload::new();
                payload.insert("hash".to_string(), Value::String(hash.clone()));
                self.events.emit("withdraw_succeeded", payload)?;
                self.treasury_refresh_balance()?;
                WithdrawOutcome::Completed { hash }
            }
            Err(err) => {
                let raw = err.0;
                let mut payload = EventPayload::new();
                payload.insert(
                    "error".to_string(),
                    Value::String(truncate_text(&raw, 512)),
                );
                self.events.emit("withdraw_failed", payload)?;
                WithdrawOutcome::Failed {
                    user_message: user_message_for(&raw),
                    category: classify_failure(&raw),
                }
            }
        };

        self.treasury.finish_withdraw();
        Ok(outcome)
    }

    fn emit_error(&self, event_type: &str, err: &anyhow::Error) -> Result<()> {
        let mut payload = EventPayload::new();
        payload.insert(
            "error".to_string(),
            Value::String(error_chain_text(err, 512)),
        );
        self.events.emit(event_type, payload)?;
        Ok(())
    }
}
