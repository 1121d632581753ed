//! # Summary
//!
//! This module defines the protocol's tunable timing constants and the
//! assembly of a single participating member: one acceptor, one replica,
//! and one leader registered on a fresh node. The retransmission
//! intervals must sit well below the leader timeout so lost messages are
//! repaired without tripping failover.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use crate::network::Network;
use crate::node::{Address, Node};
use crate::role::acceptor::Acceptor;
use crate::role::leader::Leader;
use crate::role::replica::Replica;
use crate::state;

/// Interval between a scout's `Prepare` rebroadcasts.
pub const PREPARE_RETRANSMIT: Duration = Duration::from_millis(500);

/// Interval between a commander's `Accept` rebroadcasts.
pub const ACCEPT_RETRANSMIT: Duration = Duration::from_millis(500);

/// Interval between a requester's `Invoke` retries.
pub const INVOKE_RETRANSMIT: Duration = Duration::from_millis(500);

/// Silence after which a replica assumes its leader died and rotates
/// to the next peer. Active heartbeats go out at half this interval.
pub const LEADER_TIMEOUT: Duration = Duration::from_secs(3);

/// Defines one member of the cluster: its own address and the full
/// peer list, own address included. Peer order matters: replicas rotate
/// through it cyclically when probing for a live leader.
#[derive(Clone, Debug)]
pub struct Config {
    address: Address,
    peers: Vec<Address>,
}

impl Config {
    pub fn new(address: Address, peers: Vec<Address>) -> Self {
        Config { address, peers }
    }

    /// Attach this member to the network and start its roles.
    pub fn start<S: state::State>(&self, network: &Network<S>) -> Member<S> {
        let node = network.node(self.address);
        let acceptor = Acceptor::spawn(&node);
        let replica = Replica::spawn(&node, self.peers.clone());
        let leader = Leader::spawn(&node, self.peers.clone());
        info!("[{}] member started with peers {:?}", self.address, self.peers);
        Member {
            node,
            acceptor,
            replica,
            leader,
        }
    }
}

/// Handles to one running member's node and roles.
pub struct Member<S: state::State> {
    node: Node<S>,
    acceptor: Arc<RwLock<Acceptor<S>>>,
    replica: Arc<RwLock<Replica<S>>>,
    leader: Arc<RwLock<Leader<S>>>,
}

impl<S: state::State> Member<S> {
    pub fn node(&self) -> &Node<S> {
        &self.node
    }

    pub fn acceptor(&self) -> Arc<RwLock<Acceptor<S>>> {
        self.acceptor.clone()
    }

    pub fn replica(&self) -> Arc<RwLock<Replica<S>>> {
        self.replica.clone()
    }

    pub fn leader(&self) -> Arc<RwLock<Leader<S>>> {
        self.leader.clone()
    }
}
