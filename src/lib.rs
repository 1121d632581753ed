//! # Summary
//!
//! A Multi-Paxos replicated state machine: cooperating Acceptor,
//! Replica, Leader, Scout, and Commander roles reach agreement on a
//! totally ordered log of client commands over a lossy, reordering
//! message-passing network. Roles on a node share one dispatcher and
//! talk only in messages, themselves included; timing comes from a
//! deterministic simulated network whose seeded schedule makes whole
//! cluster runs reproducible.
//!
//! Library users implement the `State` trait for their application,
//! start one `Config` per member, and submit commands through
//! `Requester`.

#[macro_use]
extern crate derivative;
#[macro_use]
extern crate log;

pub mod config;
pub mod message;
pub mod network;
pub mod node;
pub mod role;
pub mod state;

#[cfg(test)]
mod testutil;

pub use crate::config::{Config, Member};
pub use crate::config::{ACCEPT_RETRANSMIT, INVOKE_RETRANSMIT, LEADER_TIMEOUT, PREPARE_RETRANSMIT};
pub use crate::message::{Ballot, Kind, Message, Proposal, RequestId, Slot};
pub use crate::network::{Network, Timer};
pub use crate::node::{Address, Node, Role, RoleId};
pub use crate::role::acceptor::Acceptor;
pub use crate::role::commander::Commander;
pub use crate::role::leader::Leader;
pub use crate::role::replica::Replica;
pub use crate::role::requester::Requester;
pub use crate::role::scout::Scout;
pub use crate::state::{Command, Response, State};
