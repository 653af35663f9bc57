//! The combined bus model tying LIN and per-channel CAN models together
//! (spec §3, `BusModel`).

use std::collections::BTreeMap;
use std::fmt;

use crate::dbc::BusModelCAN;
use crate::ldf::BusModelLIN;

/// A physical network channel a log line can belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Channel {
    Lin,
    Can1,
    Can2,
    Can3,
    CanFd1,
    CanFd2,
    CanFd3,
}

impl Channel {
    /// Parses the channel token as it appears in log lines and gateway map
    /// entries (case-insensitive).
    pub fn parse(token: &str) -> Option<Self> {
        match token.to_ascii_uppercase().as_str() {
            "LIN" => Some(Channel::Lin),
            "CAN1" => Some(Channel::Can1),
            "CAN2" => Some(Channel::Can2),
            "CAN3" => Some(Channel::Can3),
            "CANFD1" => Some(Channel::CanFd1),
            "CANFD2" => Some(Channel::CanFd2),
            "CANFD3" => Some(Channel::CanFd3),
            _ => None,
        }
    }

    pub fn is_can(&self) -> bool {
        !matches!(self, Channel::Lin)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Channel::Lin => "LIN",
            Channel::Can1 => "CAN1",
            Channel::Can2 => "CAN2",
            Channel::Can3 => "CAN3",
            Channel::CanFd1 => "CANFD1",
            Channel::CanFd2 => "CANFD2",
            Channel::CanFd3 => "CANFD3",
        };
        f.write_str(s)
    }
}

/// The fully resolved, read-only bus description the analysis engine
/// consumes.
#[derive(Debug, Clone, Default)]
pub struct BusModel {
    pub lin: Option<BusModelLIN>,
    pub can: BTreeMap<Channel, BusModelCAN>,
}

impl BusModel {
    pub fn is_empty(&self) -> bool {
        self.lin.is_none() && self.can.is_empty()
    }
}
