use crate::assets::{MintSuccess, NftReference};
use crate::mutation::MutationState;

/// Hosting environment, resolved once at startup. Detection failures
/// fail closed to `StandaloneBrowser`; the state is never left
/// `Unknown` after resolution completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Unknown,
    HostedMiniApp,
    StandaloneBrowser,
}

pub const AUTO_CONNECT_MAX_ATTEMPTS: u32 = 3;
pub const AUTO_CONNECT_BACKOFF_MS: u64 = 400;

/// What the frontend should be presenting right now. Derived from the
/// workflow fields, never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    /// Environment detection still in flight.
    Detecting,
    /// Hosted mini app, auto-connect running or pending.
    Connecting,
    /// Standalone browser, manual connect surface.
    ConnectPrompt,
    /// Connected, owned-asset query in flight.
    Loading,
    /// Owned-asset query failed; retry affordance, no silent auto-retry.
    LoadFailed(String),
    /// Connected, owns nothing from the collection.
    Empty,
    /// More than one owned asset and none active yet.
    Selecting,
    /// One active source NFT; the mutation flow runs against it.
    Active,
}

/// The single workflow-state object. Guard flags (auto-connect,
/// mint-in-flight) live here and are mutated only through these
/// transitions.
#[derive(Debug, Default)]
pub struct Workflow {
    environment: Environment,
    connected: bool,
    address: Option<String>,
    owned: Vec<NftReference>,
    owned_loaded: bool,
    load_error: Option<String>,
    active: Option<NftReference>,
    pub mutation: MutationState,
    auto_connecting: bool,
    auto_connect_attempts: u32,
    minting: bool,
    mint_success: Option<MintSuccess>,
}

impl Workflow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    pub fn owned(&self) -> &[NftReference] {
        &self.owned
    }

    pub fn active(&self) -> Option<&NftReference> {
        self.active.as_ref()
    }

    pub fn mint_success(&self) -> Option<&MintSuccess> {
        self.mint_success.as_ref()
    }

    pub fn is_minting(&self) -> bool {
        self.minting
    }

    pub fn phase(&self) -> Phase {
        if !self.connected {
            return match self.environment {
                Environment::Unknown => Phase::Detecting,
                Environment::HostedMiniApp => Phase::Connecting,
                Environment::StandaloneBrowser => Phase::ConnectPrompt,
            };
        }
        if self.active.is_some() {
            return Phase::Active;
        }
        if let Some(message) = &self.load_error {
            return Phase::LoadFailed(message.clone());
        }
        if !self.owned_loaded {
            return Phase::Loading;
        }
        if self.owned.is_empty() {
            return Phase::Empty;
        }
        Phase::Selecting
    }

    // Environment detection

    pub fn resolve_environment(&mut self, hosted: bool) {
        self.environment = if hosted {
            Environment::HostedMiniApp
        } else {
            Environment::StandaloneBrowser
        };
    }

    /// The detection call itself threw: fail closed to standalone
    /// browser semantics.
    pub fn fail_environment_detection(&mut self) {
        self.environment = Environment::StandaloneBrowser;
    }

    // Auto-connect bookkeeping

    pub fn should_auto_connect(&self) -> bool {
        self.environment == Environment::HostedMiniApp
            && !self.connected
            && !self.auto_connecting
            && self.auto_connect_attempts < AUTO_CONNECT_MAX_ATTEMPTS
    }

    /// In-flight guard: two auto-connect loops must never run
    /// concurrently.
    pub fn begin_auto_connect(&mut self) -> bool {
        if !self.should_auto_connect() {
            return false;
        }
        self.auto_connecting = true;
        true
    }

    pub fn record_auto_connect_attempt(&mut self) {
        self.auto_connect_attempts += 1;
    }

    pub fn auto_connect_attempts(&self) -> u32 {
        self.auto_connect_attempts
    }

    /// Always releases the guard. Exhaustion is silent: the workflow
    /// simply stays disconnected and the standard connect UI shows.
    pub fn finish_auto_connect(&mut self) {
        self.auto_connecting = false;
    }

    // Connection

    pub fn set_connected(&mut self, address: impl Into<String>) {
        self.connected = true;
        self.address = Some(address.into());
    }

    pub fn disconnect(&mut self) {
        self.connected = false;
        self.address = None;
        self.owned.clear();
        self.owned_loaded = false;
        self.load_error = None;
        self.active = None;
        self.mint_success = None;
        self.minting = false;
        self.mutation.invalidate();
    }

    // Ownership discovery and selection

    pub fn begin_asset_load(&mut self) {
        self.owned_loaded = false;
        self.load_error = None;
    }

    /// Apply a resolved owned-asset query. Exactly one element
    /// auto-activates without user interaction; zero presents the
    /// empty state; more than one waits for an explicit selection.
    /// Returns the auto-activated reference, if any.
    pub fn apply_owned_assets(&mut self, assets: Vec<NftReference>) -> Option<NftReference> {
        self.owned = assets;
        self.owned_loaded = true;
        self.load_error = None;
        if self.owned.len() == 1 {
            let only = self.owned[0].clone();
            self.activate(only.clone());
            return Some(only);
        }
        None
    }

    pub fn fail_asset_load(&mut self, message: impl Into<String>) {
        self.owned_loaded = true;
        self.load_error = Some(message.into());
    }

    /// Explicit selection from the selection surface. Activating a
    /// different reference invalidates any held mutation result and
    /// outstanding generation.
    pub fn select(&mut self, token_id: &str) -> bool {
        let Some(chosen) = self
            .owned
            .iter()
            .find(|nft| nft.token_id == token_id)
            .cloned()
        else {
            return false;
        };
        self.activate(chosen);
        true
    }

    fn activate(&mut self, nft: NftReference) {
        let switching = self
            .active
            .as_ref()
            .map(|current| current.token_id != nft.token_id)
            .unwrap_or(true);
        if switching {
            self.mutation.invalidate();
        }
        self.active = Some(nft);
    }

    // Mint single-flight guard

    pub fn can_mint(&self) -> bool {
        self.active.is_some() && self.mutation.can_mint() && !self.minting
    }

    pub fn begin_mint(&mut self) -> bool {
        if !self.can_mint() {
            return false;
        }
        self.minting = true;
        true
    }

    /// Always releases the guard so a failed mint is retryable.
    pub fn finish_mint(&mut self) {
        self.minting = false;
    }

    pub fn set_mint_success(&mut self, success: MintSuccess) {
        self.mint_success = Some(success);
    }

    /// Dismiss the success presentation.
    pub fn clear_mint_success(&mut self) {
        self.mint_success = None;
    }
}

#[cfg(test)]
mod tests {
    use crate::assets::{MintSuccess, NftAttribute, NftReference};
    use crate::mutation::{MutationResult, MutationStatus};

    use super::{Environment, Phase, Workflow, AUTO_CONNECT_MAX_ATTEMPTS};

    fn nft(token_id: &str) -> NftReference {
        NftReference {
            token_id: token_id.to_string(),
            contract_address: crate::assets::COLLECTION_CONTRACT.to_string(),
            name: format!("Warplet #{token_id}"),
            description: String::new(),
            image: format!("https://example.com/{token_id}.png"),
            attributes: vec![NftAttribute::new("Background", "Violet")],
        }
    }

    fn result(url: &str) -> MutationResult {
        MutationResult {
            mutated_image_url: url.to_string(),
            image_generation_service: "gemini".to_string(),
        }
    }

    fn connected_workflow() -> Workflow {
        let mut workflow = Workflow::new();
        workflow.resolve_environment(true);
        workflow.set_connected("0xabc");
        workflow
    }

    #[test]
    fn environment_detection_fails_closed() {
        let mut workflow = Workflow::new();
        assert_eq!(workflow.phase(), Phase::Detecting);
        workflow.fail_environment_detection();
        assert_eq!(workflow.environment(), Environment::StandaloneBrowser);
        assert_eq!(workflow.phase(), Phase::ConnectPrompt);
    }

    #[test]
    fn hosted_environment_shows_connecting_until_connected() {
        let mut workflow = Workflow::new();
        workflow.resolve_environment(true);
        assert_eq!(workflow.phase(), Phase::Connecting);
        workflow.set_connected("0xabc");
        assert_eq!(workflow.phase(), Phase::Loading);
    }

    #[test]
    fn auto_connect_guard_blocks_concurrent_runs_and_caps_attempts() {
        let mut workflow = Workflow::new();
        workflow.resolve_environment(true);

        assert!(workflow.begin_auto_connect());
        assert!(!workflow.begin_auto_connect());
        workflow.record_auto_connect_attempt();
        workflow.finish_auto_connect();

        for _ in 1..AUTO_CONNECT_MAX_ATTEMPTS {
            assert!(workflow.begin_auto_connect());
            workflow.record_auto_connect_attempt();
            workflow.finish_auto_connect();
        }
        // Exhausted: silent fallback, no further attempts.
        assert!(!workflow.begin_auto_connect());
        assert_eq!(workflow.phase(), Phase::Connecting);
    }

    #[test]
    fn auto_connect_never_runs_in_standalone_browser() {
        let mut workflow = Workflow::new();
        workflow.resolve_environment(false);
        assert!(!workflow.begin_auto_connect());
    }

    #[test]
    fn single_owned_asset_auto_activates() {
        let mut workflow = connected_workflow();
        let activated = workflow.apply_owned_assets(vec![nft("7")]);
        assert_eq!(activated.map(|a| a.token_id), Some("7".to_string()));
        assert_eq!(workflow.phase(), Phase::Active);
        assert_eq!(workflow.active().map(|a| a.token_id.as_str()), Some("7"));
    }

    #[test]
    fn zero_owned_assets_shows_empty_state() {
        let mut workflow = connected_workflow();
        assert!(workflow.apply_owned_assets(Vec::new()).is_none());
        assert_eq!(workflow.phase(), Phase::Empty);
        assert!(workflow.active().is_none());
    }

    #[test]
    fn multiple_owned_assets_require_explicit_selection() {
        let mut workflow = connected_workflow();
        assert!(workflow
            .apply_owned_assets(vec![nft("1"), nft("2")])
            .is_none());
        assert_eq!(workflow.phase(), Phase::Selecting);
        assert!(workflow.active().is_none());

        assert!(!workflow.select("99"));
        assert!(workflow.select("2"));
        assert_eq!(workflow.phase(), Phase::Active);
        assert_eq!(workflow.active().map(|a| a.token_id.as_str()), Some("2"));
    }

    #[test]
    fn switching_assets_discards_in_flight_generation() {
        let mut workflow = connected_workflow();
        workflow.apply_owned_assets(vec![nft("1"), nft("2")]);
        workflow.select("1");

        let token_for_a = workflow.mutation.begin_generation();
        workflow.select("2");

        // A's eventual result must be dropped, not applied to B.
        assert!(!workflow.mutation.complete(token_for_a, result("a.png")));
        assert!(workflow.mutation.result().is_none());
        assert_eq!(workflow.mutation.status(), MutationStatus::Pending);
    }

    #[test]
    fn reselecting_the_active_asset_keeps_the_result() {
        let mut workflow = connected_workflow();
        workflow.apply_owned_assets(vec![nft("1"), nft("2")]);
        workflow.select("1");
        let token = workflow.mutation.begin_generation();
        workflow.mutation.complete(token, result("b.png"));

        workflow.select("1");
        assert_eq!(workflow.mutation.status(), MutationStatus::Ready);
    }

    #[test]
    fn load_failure_presents_retry_affordance() {
        let mut workflow = connected_workflow();
        workflow.fail_asset_load("Unable to load your Warplets. Please try again.");
        assert_eq!(
            workflow.phase(),
            Phase::LoadFailed("Unable to load your Warplets. Please try again.".to_string())
        );
        workflow.begin_asset_load();
        assert_eq!(workflow.phase(), Phase::Loading);
    }

    #[test]
    fn mint_requires_ready_mutation_and_is_single_flight() {
        let mut workflow = connected_workflow();
        workflow.apply_owned_assets(vec![nft("7")]);
        assert!(!workflow.begin_mint());

        let token = workflow.mutation.begin_generation();
        workflow.mutation.complete(token, result("b.png"));
        assert!(workflow.begin_mint());
        assert!(!workflow.begin_mint());
        workflow.finish_mint();
        assert!(workflow.begin_mint());
    }

    #[test]
    fn mint_success_lifecycle() {
        let mut workflow = connected_workflow();
        workflow.set_mint_success(MintSuccess {
            hash: "0xhash".to_string(),
            token_id: Some(5),
            image_uri: "ipfs://image".to_string(),
            name: "Cutified Warplet #7".to_string(),
        });
        assert!(workflow.mint_success().is_some());
        workflow.clear_mint_success();
        assert!(workflow.mint_success().is_none());
    }

    #[test]
    fn disconnect_clears_session_state() {
        let mut workflow = connected_workflow();
        workflow.apply_owned_assets(vec![nft("7")]);
        let token = workflow.mutation.begin_generation();
        workflow.mutation.complete(token, result("b.png"));

        workflow.disconnect();
        assert!(!workflow.is_connected());
        assert!(workflow.active().is_none());
        assert!(workflow.owned().is_empty());
        assert_eq!(workflow.mutation.status(), MutationStatus::Pending);
        assert!(!workflow.mutation.complete(token, result("late.png")));
    }
}
