//! # Summary
//!
//! This module implements the `Leader` role. A leader owns a ballot,
//! competes for adoption with a scout when a replica asks it to drive a
//! proposal, and once active spawns one commander per slot. Preemption
//! by a higher ballot deactivates it and advances its ballot past the
//! winner; the next `Propose` starts a fresh scout.

use std::sync::{Arc, Weak};

use hashbrown::{HashMap as Map, HashSet as Set};
use parking_lot::RwLock;

use crate::config::LEADER_TIMEOUT;
use crate::message::{Ballot, Kind, Message, Proposal, Slot};
use crate::node::{Address, Node, Role};
use crate::role::commander::Commander;
use crate::role::scout::Scout;
use crate::state;

pub struct Leader<S: state::State> {
    node: Node<S>,
    weak: Weak<RwLock<Self>>,
    ballot: Ballot,
    active: bool,
    scouting: bool,
    peers: Vec<Address>,

    /// Proposals this leader has driven or adopted, by slot
    proposals: Map<Slot, Proposal<S::Command>>,

    /// Slots a commander at the current ballot is already driving
    driving: Set<Slot>,

    /// Slots our commanders finished; never drive these again
    decided: Set<Slot>,
}

impl<S: state::State> Leader<S> {
    pub fn spawn(node: &Node<S>, peers: Vec<Address>) -> Arc<RwLock<Self>> {
        let leader = Arc::new_cyclic(|weak| {
            RwLock::new(Leader {
                node: node.clone(),
                weak: weak.clone(),
                ballot: Ballot::first(node.address()),
                active: false,
                scouting: false,
                peers,
                proposals: Map::default(),
                driving: Set::default(),
                decided: Set::default(),
            })
        });
        node.register(leader.clone());
        leader.write().heartbeat();
        leader
    }

    pub fn ballot(&self) -> Ballot {
        self.ballot
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Remind peer replicas we are alive before their leader timeout
    /// expires. The broadcast is conditional; the rescheduling is not.
    fn heartbeat(&mut self) {
        if self.active {
            self.node.send(&self.peers, Message::Active);
        }
        let weak = self.weak.clone();
        self.node.set_timer(LEADER_TIMEOUT / 2, move || {
            if let Some(leader) = weak.upgrade() {
                leader.write().heartbeat();
            }
        });
    }

    fn respond_propose(&mut self, slot: Slot, proposal: Proposal<S::Command>) {
        if self.decided.contains(&slot) || self.driving.contains(&slot) {
            debug!("[{}] slot {} is already spoken for", self.node.address(), slot);
            return;
        }
        if self.active {
            // a proposal salvaged during adoption outranks the incoming
            // one; the displaced replica re-proposes at a fresh slot
            // once it sees the decision
            let proposal = self.proposals.entry(slot).or_insert(proposal).clone();
            self.driving.insert(slot);
            debug!("[{}] spawning commander for slot {}", self.node.address(), slot);
            Commander::spawn(&self.node, self.ballot, slot, proposal, self.peers.clone());
        } else if !self.scouting {
            debug!("[{}] spawning scout for {:?}", self.node.address(), self.ballot);
            self.scouting = true;
            Scout::spawn(&self.node, self.ballot, self.peers.clone());
        } else {
            // already scouting; the replica re-proposes on retry
            debug!("[{}] got Propose while scouting", self.node.address());
        }
    }

    fn respond_adopted(&mut self, ballot: Ballot, accepted: Map<Slot, Proposal<S::Command>>) {
        self.scouting = false;
        if ballot != self.ballot {
            // adoption of a ballot we have since moved past
            return;
        }
        // quorum-accepted proposals override our own pending entries;
        // no commanders here, replicas re-issue anything undecided
        self.proposals.extend(accepted);
        self.driving.clear();
        self.active = true;
        info!("[{}] becoming active with {:?}", self.node.address(), self.ballot);
    }

    fn respond_preempted(&mut self, slot: Option<Slot>, preempted_by: Ballot) {
        if slot.is_none() {
            self.scouting = false;
        }
        if preempted_by <= self.ballot {
            // stale report from a sub-role we already out-ballot
            return;
        }
        info!("[{}] preempted by leader {}", self.node.address(), preempted_by.leader);
        self.active = false;
        self.driving.clear();
        self.ballot = Ballot {
            round: preempted_by.round + 1,
            leader: self.node.address(),
        };
    }

    fn respond_decided(&mut self, slot: Slot) {
        self.decided.insert(slot);
        self.driving.remove(&slot);
        self.proposals.remove(&slot);
    }
}

impl<S: state::State> Role<S> for Leader<S> {
    fn interests(&self) -> &'static [Kind] {
        &[Kind::Propose, Kind::Adopted, Kind::Preempted, Kind::Decided]
    }

    fn receive(&mut self, _sender: Address, message: Message<S>) {
        match message {
            Message::Propose { slot, proposal } => self.respond_propose(slot, proposal),
            Message::Adopted { ballot, accepted } => self.respond_adopted(ballot, accepted),
            Message::Preempted { slot, preempted_by } => self.respond_preempted(slot, preempted_by),
            Message::Decided { slot } => self.respond_decided(slot),
            _ => (),
        }
    }
}
