use thiserror::Error;

/// Read-path failure (owned-asset lookup, owner/balance reads).
/// Recovered locally with a retry affordance, never fatal.
#[derive(Debug, Error)]
#[error("query failed: {0}")]
pub struct QueryError(pub String);

/// Wallet connection failure. Recovered via bounded auto-retry, then
/// silently falls back to the manual connect surface.
#[derive(Debug, Error)]
#[error("wallet connection failed: {0}")]
pub struct ConnectError(pub String);

/// Image provider failure. The raw detail is logged only; the user sees
/// a fixed safe message.
#[derive(Debug, Error)]
#[error("image generation failed: {0}")]
pub struct GenerationError(pub String);

/// Content-storage failure. Aborts the mint pipeline; no partial-upload
/// recovery, the caller restarts from the top.
#[derive(Debug, Error)]
#[error("upload failed: {0}")]
pub struct UploadError(pub String);

#[derive(Debug, Error)]
#[error("mint failed: {0}")]
pub struct MintError(pub String);

#[derive(Debug, Error)]
#[error("withdrawal failed: {0}")]
pub struct WithdrawError(pub String);

/// User-facing category for a write-path failure message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCategory {
    Cancelled,
    Unauthorized,
    Other,
}

/// Classify a failure message by the substrings the wallet and contract
/// stacks are known to produce. Anything unrecognized passes through
/// verbatim as `Other`.
pub fn classify_failure(message: &str) -> FailureCategory {
    let lowered = message.to_lowercase();
    if lowered.contains("user rejected") || lowered.contains("rejected") {
        return FailureCategory::Cancelled;
    }
    if lowered.contains("unauthorized") || lowered.contains("onlyowner") {
        return FailureCategory::Unauthorized;
    }
    FailureCategory::Other
}

/// The message shown for a classified failure.
pub fn user_message_for(message: &str) -> String {
    match classify_failure(message) {
        FailureCategory::Cancelled => "Transaction cancelled.".to_string(),
        FailureCategory::Unauthorized => "Only the owner can withdraw.".to_string(),
        FailureCategory::Other => message.to_string(),
    }
}
