/// Ownership gate for the admin panel. State-changing controls render
/// only after `Owner` is affirmatively confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Ownership {
    #[default]
    Unknown,
    Owner,
    NotOwner,
}

pub fn addresses_equal(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

const WEI_PER_TENTH_MILLI_ETH: u128 = 100_000_000_000_000;

/// Format a wei balance as ETH with fixed 4-decimal precision,
/// rounding half up.
pub fn format_eth_4dp(wei: u128) -> String {
    let rounded = (wei + WEI_PER_TENTH_MILLI_ETH / 2) / WEI_PER_TENTH_MILLI_ETH;
    format!("{}.{:04}", rounded / 10_000, rounded % 10_000)
}

/// Admin-panel state: owner gate, balance, and the withdraw-in-flight
/// guard. Balance is always re-read from the contract after a
/// withdrawal, never decremented locally.
#[derive(Debug, Default)]
pub struct TreasuryState {
    ownership: Ownership,
    owner_address: Option<String>,
    balance_wei: Option<u128>,
    withdrawing: bool,
}

impl TreasuryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ownership(&self) -> Ownership {
        self.ownership
    }

    pub fn owner_address(&self) -> Option<&str> {
        self.owner_address.as_deref()
    }

    pub fn balance_wei(&self) -> Option<u128> {
        self.balance_wei
    }

    pub fn balance_display(&self) -> String {
        format_eth_4dp(self.balance_wei.unwrap_or(0))
    }

    pub fn is_withdrawing(&self) -> bool {
        self.withdrawing
    }

    /// Establish the gate from the contract's recorded owner and the
    /// connected address.
    pub fn resolve_owner(&mut self, contract_owner: &str, connected: &str) {
        self.owner_address = Some(contract_owner.to_string());
        self.ownership = if addresses_equal(contract_owner, connected) {
            Ownership::Owner
        } else {
            Ownership::NotOwner
        };
    }

    pub fn set_balance(&mut self, wei: u128) {
        self.balance_wei = Some(wei);
    }

    /// The panel renders nothing for confirmed non-owners and a skeleton
    /// while ownership is unknown.
    pub fn panel_visible(&self) -> bool {
        self.ownership != Ownership::NotOwner
    }

    pub fn can_withdraw(&self) -> bool {
        self.ownership == Ownership::Owner
            && !self.withdrawing
            && self.balance_wei.unwrap_or(0) > 0
    }

    /// Single-flight guard for withdrawals. Returns false when a
    /// withdrawal is already in flight or the preconditions fail.
    pub fn begin_withdraw(&mut self) -> bool {
        if !self.can_withdraw() {
            return false;
        }
        self.withdrawing = true;
        true
    }

    /// Always releases the guard, success or failure.
    pub fn finish_withdraw(&mut self) {
        self.withdrawing = false;
    }

    /// Clear everything on disconnect.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
