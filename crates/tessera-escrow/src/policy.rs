// crates/tessera-escrow/src/policy.rs
//
// Fee policy that records every notification it receives.

use serde::{Deserialize, Serialize};

use tessera_core::{Address, FeePolicy, Period};

/// One notification sent to the fee policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PolicyEvent {
    Register { staker: Address, period: Period },
    UpdateFee { staker: Address, period: Period },
    DefaultFeeDelta { staker: Address, period: Period },
}

/// `FeePolicy` that keeps an ordered log of events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingFeePolicy {
    events: Vec<PolicyEvent>,
}

impl RecordingFeePolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[PolicyEvent] {
        &self.events
    }

    /// Events concerning a single staker, in order.
    pub fn events_for<'a>(&'a self, staker: &'a Address) -> impl Iterator<Item = &'a PolicyEvent> {
        self.events.iter().filter(move |e| match e {
            PolicyEvent::Register { staker: s, .. }
            | PolicyEvent::UpdateFee { staker: s, .. }
            | PolicyEvent::DefaultFeeDelta { staker: s, .. } => s == staker,
        })
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

impl FeePolicy for RecordingFeePolicy {
    fn register(&mut self, staker: &Address, period: Period) {
        self.events.push(PolicyEvent::Register {
            staker: *staker,
            period,
        });
    }

    fn update_fee(&mut self, staker: &Address, period: Period) {
        self.events.push(PolicyEvent::UpdateFee {
            staker: *staker,
            period,
        });
    }

    fn set_default_fee_delta(&mut self, staker: &Address, period: Period) {
        self.events.push(PolicyEvent::DefaultFeeDelta {
            staker: *staker,
            period,
        });
    }
}
