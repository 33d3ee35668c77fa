use std::thread;
use std::time::Duration;

use indexmap::IndexMap;
use serde_json::Value;

use cutify_contracts::errors::ConnectError;
use cutify_contracts::events::{EventPayload, EventWriter};
use cutify_contracts::workflow::{
    Workflow, AUTO_CONNECT_BACKOFF_MS, AUTO_CONNECT_MAX_ATTEMPTS,
};

/// Connector id the host injects when the app runs inside the mini-app
/// shell. Auto-connect targets this one only.
pub const MINI_APP_CONNECTOR_ID: &str = "farcasterFrame";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectorInfo {
    pub id: String,
    pub name: String,
}

/// Boundary to the wallet layer. Connector registration can lag app
/// startup, which is why auto-connect retries instead of probing once.
pub trait WalletProvider: Send + Sync {
    /// Currently registered connectors, in registration order.
    fn connectors(&self) -> IndexMap<String, ConnectorInfo>;
    fn connect(&self, connector_id: &str) -> Result<String, ConnectError>;
    fn is_connected(&self) -> bool;
    fn address(&self) -> Option<String>;
    fn disconnect(&self);
}

pub fn default_backoff() -> Duration {
    Duration::from_millis(AUTO_CONNECT_BACKOFF_MS)
}

/// Wallet bound to one known address, for headless runs where the
/// transaction sender is a node-managed account rather than an
/// interactive wallet.
pub struct StaticWallet {
    address: String,
    connected: std::sync::Mutex<bool>,
}

impl StaticWallet {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            connected: std::sync::Mutex::new(false),
        }
    }
}

impl WalletProvider for StaticWallet {
    fn connectors(&self) -> IndexMap<String, ConnectorInfo> {
        let mut map = IndexMap::new();
        map.insert(
            MINI_APP_CONNECTOR_ID.to_string(),
            ConnectorInfo {
                id: MINI_APP_CONNECTOR_ID.to_string(),
                name: "Static".to_string(),
            },
        );
        map
    }

    fn connect(&self, _connector_id: &str) -> Result<String, ConnectError> {
        if self.address.trim().is_empty() {
            return Err(ConnectError("no address configured".to_string()));
        }
        *self.connected.lock().map_err(|_| {
            ConnectError("wallet state lock poisoned".to_string())
        })? = true;
        Ok(self.address.clone())
    }

    fn is_connected(&self) -> bool {
        self.connected.lock().map(|flag| *flag).unwrap_or(false)
    }

    fn address(&self) -> Option<String> {
        if self.is_connected() {
            Some(self.address.clone())
        } else {
            None
        }
    }

    fn disconnect(&self) {
        if let Ok(mut flag) = self.connected.lock() {
            *flag = false;
        }
    }
}

/// Bounded auto-connect loop for the hosted environment: up to the
/// attempt cap, waiting out the backoff between attempts while the
/// host registers its connector. Exhaustion is silent; the manual
/// connect surface stays available.
pub fn auto_connect(
    workflow: &mut Workflow,
    wallet: &dyn WalletProvider,
    events: &EventWriter,
    backoff: Duration,
) -> anyhow::Result<bool> {
    if !workflow.begin_auto_connect() {
        return Ok(false);
    }

    let mut connected = false;
    while workflow.auto_connect_attempts() < AUTO_CONNECT_MAX_ATTEMPTS {
        workflow.record_auto_connect_attempt();
        let attempt = workflow.auto_connect_attempts();

        let outcome = match wallet.connectors().get(MINI_APP_CONNECTOR_ID) {
            None => Err(ConnectError("mini-app connector not registered yet".to_string())),
            Some(connector) => wallet.connect(&connector.id),
        };

        match outcome {
            Ok(address) => {
                workflow.set_connected(&address);
                emit_attempt(events, attempt, true, None)?;
                connected = true;
                break;
            }
            Err(err) => {
                emit_attempt(events, attempt, false, Some(&err.to_string()))?;
                if workflow.auto_connect_attempts() < AUTO_CONNECT_MAX_ATTEMPTS {
                    thread::sleep(backoff);
                }
            }
        }
    }

    workflow.finish_auto_connect();
    Ok(connected)
}

fn emit_attempt(
    events: &EventWriter,
    attempt: u32,
    connected: bool,
    error: Option<&str>,
) -> anyhow::Result<()> {
    let mut payload = EventPayload::new();
    payload.insert("attempt".to_string(), Value::from(attempt));
    payload.insert("connected".to_string(), Value::Bool(connected));
    if let Some(message) = error {
        payload.insert("error".to_string(), Value::String(message.to_string()));
    }
    events.emit("auto_connect_attempt", payload)?;
    Ok(())
}
