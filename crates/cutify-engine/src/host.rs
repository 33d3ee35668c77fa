use anyhow::Result;
use serde_json::Value;

use cutify_contracts::events::{EventPayload, EventWriter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImpactKind {
    Light,
    Medium,
    Heavy,
}

impl ImpactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImpactKind::Light => "light",
            ImpactKind::Medium => "medium",
            ImpactKind::Heavy => "heavy",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Success,
    Warning,
    Error,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Success => "success",
            NotificationKind::Warning => "warning",
            NotificationKind::Error => "error",
        }
    }
}

/// Boundary to the hosting shell. Everything here is best-effort
/// garnish: a failing host call never fails the operation that
/// triggered it.
pub trait HostRuntime: Send + Sync {
    /// Whether the app is running inside the mini-app shell.
    fn is_hosted(&self) -> Result<bool>;
    /// Dismiss the host's splash once the first real surface is up.
    fn signal_ready(&self) -> Result<()>;
    /// Prompt the user to pin/install the app in the host.
    fn request_install(&self) -> Result<()>;
    fn haptic_impact(&self, kind: ImpactKind) -> Result<()>;
    fn haptic_notification(&self, kind: NotificationKind) -> Result<()>;
    /// Open the host's composer prefilled with text and embed URLs.
    fn compose_share(&self, text: &str, embeds: &[String]) -> Result<()>;
}

/// Host for standalone-browser runs: nothing to signal, nothing hosted.
pub struct NullHost;

impl HostRuntime for NullHost {
    fn is_hosted(&self) -> Result<bool> {
        Ok(false)
    }

    fn signal_ready(&self) -> Result<()> {
        Ok(())
    }

    fn request_install(&self) -> Result<()> {
        Ok(())
    }

    fn haptic_impact(&self, _kind: ImpactKind) -> Result<()> {
        Ok(())
    }

    fn haptic_notification(&self, _kind: NotificationKind) -> Result<()> {
        Ok(())
    }

    fn compose_share(&self, _text: &str, _embeds: &[String]) -> Result<()> {
        Ok(())
    }
}

/// Run a host call as garnish: a failure is logged and swallowed.
pub fn best_effort(events: &EventWriter, call: &str, outcome: Result<()>) {
    if let Err(err) = outcome {
        let mut payload = EventPayload::new();
        payload.insert("call".to_string(), Value::String(call.to_string()));
        payload.insert(
            "error".to_string(),
            Value::String(crate::error_chain_text(&err, 256)),
        );
        // The event write itself is also garnish here.
        let _ = events.emit("host_call_failed", payload);
    }
}
