/// Output of one image-generation call. Wholly replaced on retry or
/// remix, never merged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationResult {
    /// Displayable image reference: a remote URI or an embedded data URI.
    pub mutated_image_url: String,
    /// Tag of the provider that produced it.
    pub image_generation_service: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MutationStatus {
    #[default]
    Pending,
    Generating,
    Ready,
    Error,
}

impl MutationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationStatus::Pending => "pending",
            MutationStatus::Generating => "generating",
            MutationStatus::Ready => "ready",
            MutationStatus::Error => "error",
        }
    }
}

/// Token captured when a generation starts. A completion is applied only
/// if its token is still the current one, so a result for a superseded
/// source is dropped instead of clobbering the active state.
pub type GenerationToken = u64;

/// State machine for the cutify/remix flow:
/// `Pending -> Generating -> Ready`, `Error` reachable from `Generating`,
/// and `Generating` re-enterable from `Error` (retry) and `Ready` (remix).
#[derive(Debug, Default)]
pub struct MutationState {
    status: MutationStatus,
    result: Option<MutationResult>,
    error: Option<String>,
    stashed: Option<MutationResult>,
    token: GenerationToken,
    remix_in_flight: bool,
}

impl MutationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> MutationStatus {
        self.status
    }

    pub fn result(&self) -> Option<&MutationResult> {
        self.result.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn current_token(&self) -> GenerationToken {
        self.token
    }

    /// The mint action is enabled only from a terminal-success mutation
    /// holding a result.
    pub fn can_mint(&self) -> bool {
        self.status == MutationStatus::Ready && self.result.is_some()
    }

    /// Start a first generation or a retry. Any earlier outstanding
    /// request becomes stale.
    pub fn begin_generation(&mut self) -> GenerationToken {
        self.token += 1;
        self.status = MutationStatus::Generating;
        self.error = None;
        self.remix_in_flight = false;
        self.stashed = None;
        self.token
    }

    /// Start a remix. Only callable from `Ready`; the current result is
    /// stashed so a failed remix can restore it, and returned as the new
    /// source image. The visible state reverts to `Generating`.
    pub fn begin_remix(&mut self) -> Option<(GenerationToken, String)> {
        if self.status != MutationStatus::Ready {
            return None;
        }
        let previous = self.result.take()?;
        let source = previous.mutated_image_url.clone();
        self.stashed = Some(previous);
        self.remix_in_flight = true;
        self.token += 1;
        self.status = MutationStatus::Generating;
        self.error = None;
        Some((self.token, source))
    }

    /// Apply a successful generation. Returns false (and drops the
    /// result) when the token is stale.
    pub fn complete(&mut self, token: GenerationToken, result: MutationResult) -> bool {
        if token != self.token {
            return false;
        }
        self.result = Some(result);
        self.status = MutationStatus::Ready;
        self.error = None;
        self.stashed = None;
        self.remix_in_flight = false;
        true
    }

    /// Apply a failed generation. A failed remix restores the stashed
    /// result and returns to `Ready` rather than stranding the user in
    /// `Error`; a failed first run or retry lands in `Error` with the
    /// user-safe message. Stale tokens are dropped.
    pub fn fail(&mut self, token: GenerationToken, user_safe_message: &str) -> bool {
        if token != self.token {
            return false;
        }
        if self.remix_in_flight {
            if let Some(previous) = self.stashed.take() {
                self.result = Some(previous);
                self.status = MutationStatus::Ready;
                self.error = None;
                self.remix_in_flight = false;
                return true;
            }
        }
        self.status = MutationStatus::Error;
        self.error = Some(user_safe_message.to_string());
        self.result = None;
        self.remix_in_flight = false;
        true
    }

    /// Discard everything and invalidate outstanding requests. Used when
    /// the active source NFT changes or the wallet disconnects.
    pub fn invalidate(&mut self) {
        self.token += 1;
        self.status = MutationStatus::Pending;
        self.result = None;
        self.error = None;
        self.stashed = None;
        self.remix_in_flight = false;
    }
}

#[cfg(test)]
mod tests {
    use super::{MutationResult, MutationState, MutationStatus};

    fn result(url: &str) -> MutationResult {
        MutationResult {
            mutated_image_url: url.to_string(),
            image_generation_service: "gemini".to_string(),
        }
    }

    #[test]
    fn generation_reaches_ready() {
        let mut state = MutationState::new();
        assert_eq!(state.status(), MutationStatus::Pending);
        let token = state.begin_generation();
        assert_eq!(state.status(), MutationStatus::Generating);
        assert!(state.complete(token, result("b.png")));
        assert_eq!(state.status(), MutationStatus::Ready);
        assert!(state.can_mint());
    }

    #[test]
    fn failure_lands_in_error_and_retry_recovers() {
        let mut state = MutationState::new();
        let token = state.begin_generation();
        assert!(state.fail(token, "Unable to create cutified version."));
        assert_eq!(state.status(), MutationStatus::Error);
        assert_eq!(
            state.error(),
            Some("Unable to create cutified version.")
        );
        assert!(!state.can_mint());

        let retry = state.begin_generation();
        assert!(state.complete(retry, result("b.png")));
        assert_eq!(state.status(), MutationStatus::Ready);
        assert!(state.error().is_none());
    }

    #[test]
    fn remix_uses_current_result_as_source() {
        let mut state = MutationState::new();
        let token = state.begin_generation();
        state.complete(token, result("b.png"));

        let (remix, source) = state.begin_remix().expect("remix from ready");
        assert_eq!(source, "b.png");
        assert_eq!(state.status(), MutationStatus::Generating);
        assert!(state.result().is_none());

        assert!(state.complete(remix, result("c.png")));
        assert_eq!(state.result().map(|r| r.mutated_image_url.as_str()), Some("c.png"));
    }

    #[test]
    fn failed_remix_restores_previous_result() {
        let mut state = MutationState::new();
        let token = state.begin_generation();
        state.complete(token, result("b.png"));

        let (remix, _) = state.begin_remix().expect("remix from ready");
        assert!(state.fail(remix, "Unable to create new cutified version."));

        // Post-failure state is ready holding the prior result unchanged.
        assert_eq!(state.status(), MutationStatus::Ready);
        assert_eq!(state.result(), Some(&result("b.png")));
        assert!(state.error().is_none());
        assert!(state.can_mint());
    }

    #[test]
    fn remix_is_only_callable_from_ready() {
        let mut state = MutationState::new();
        assert!(state.begin_remix().is_none());
        let token = state.begin_generation();
        assert!(state.begin_remix().is_none());
        state.fail(token, "boom");
        assert!(state.begin_remix().is_none());
    }

    #[test]
    fn stale_completion_is_discarded() {
        let mut state = MutationState::new();
        let stale = state.begin_generation();
        state.invalidate();
        let current = state.begin_generation();

        assert!(!state.complete(stale, result("stale.png")));
        assert_eq!(state.status(), MutationStatus::Generating);
        assert!(state.result().is_none());

        assert!(state.complete(current, result("fresh.png")));
        assert_eq!(
            state.result().map(|r| r.mutated_image_url.as_str()),
            Some("fresh.png")
        );
    }

    #[test]
    fn stale_failure_is_discarded() {
        let mut state = MutationState::new();
        let stale = state.begin_generation();
        state.invalidate();
        let current = state.begin_generation();

        assert!(!state.fail(stale, "stale error"));
        assert_eq!(state.status(), MutationStatus::Generating);

        state.complete(current, result("fresh.png"));
        assert_eq!(state.status(), MutationStatus::Ready);
    }

    #[test]
    fn invalidate_resets_to_pending() {
        let mut state = MutationState::new();
        let token = state.begin_generation();
        state.complete(token, result("b.png"));
        state.invalidate();
        assert_eq!(state.status(), MutationStatus::Pending);
        assert!(state.result().is_none());
        assert!(!state.can_mint());
    }
}
