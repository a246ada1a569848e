//! Transition ids carried in the datagram service byte

use serde::{Deserialize, Serialize};
use std::fmt;

/// Service carried by a datagram.
///
/// Everything except [`TransitionId::L1Accept`] is a control transition that
/// signals a session state change rather than carrying event payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TransitionId {
    ClearReadout = 0,
    Reset = 1,
    Configure = 2,
    Unconfigure = 3,
    BeginRun = 4,
    EndRun = 5,
    BeginStep = 6,
    EndStep = 7,
    Enable = 8,
    Disable = 9,
    SlowUpdate = 10,
    L1Accept = 12,
}

impl TransitionId {
    /// All known services, in wire-id order.
    pub const ALL: [TransitionId; 12] = [
        TransitionId::ClearReadout,
        TransitionId::Reset,
        TransitionId::Configure,
        TransitionId::Unconfigure,
        TransitionId::BeginRun,
        TransitionId::EndRun,
        TransitionId::BeginStep,
        TransitionId::EndStep,
        TransitionId::Enable,
        TransitionId::Disable,
        TransitionId::SlowUpdate,
        TransitionId::L1Accept,
    ];

    /// Decode a wire service byte.
    pub fn from_u8(value: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| *t as u8 == value)
    }

    /// Wire representation.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// True for control transitions (anything but L1Accept).
    pub fn is_transition(self) -> bool {
        self != TransitionId::L1Accept
    }

    /// Ordering rank used when two datagrams share a timestamp:
    /// transitions sort ahead of events.
    pub(crate) fn order_rank(self) -> u8 {
        if self.is_transition() { 0 } else { 1 }
    }
}

impl fmt::Display for TransitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
