//! # Summary
//!
//! This module implements the `Replica` role: the client-facing face of
//! the protocol. A replica turns `Invoke` requests into slot proposals,
//! collects `Decision`s, commits them to the state machine strictly in
//! slot order with duplicate suppression, and answers callers with
//! `Invoked`. It also tracks which peer it believes is leading, rotating
//! to the next peer when the leader falls silent, and hands the log to
//! late joiners via `Welcome`.

use std::sync::{Arc, Weak};

use hashbrown::HashMap as Map;
use parking_lot::RwLock;

use crate::config::LEADER_TIMEOUT;
use crate::message::{Kind, Message, Proposal, RequestId, Slot};
use crate::network::Timer;
use crate::node::{Address, Node, Role};
use crate::state;

pub struct Replica<S: state::State> {
    node: Node<S>,
    weak: Weak<RwLock<Self>>,

    /// Application state, reflecting exactly slots 0..decision_slot
    state: S,

    /// Next slot to commit
    decision_slot: Slot,

    /// Next slot for a fresh proposal; never behind decision_slot
    proposal_slot: Slot,

    /// Chosen proposal per slot; append-only
    decisions: Map<Slot, Proposal<S::Command>>,

    /// Our outstanding originations per slot
    proposals: Map<Slot, Proposal<S::Command>>,

    peers: Vec<Address>,
    latest_leader: Option<Address>,
    leader_timer: Option<Timer>,
}

impl<S: state::State> Replica<S> {
    pub fn spawn(node: &Node<S>, peers: Vec<Address>) -> Arc<RwLock<Self>> {
        Self::recover(node, peers, S::default(), 0, Map::default())
    }

    /// Start a replica from a known log prefix, e.g. the contents of a
    /// `Welcome` received while joining.
    pub fn recover(
        node: &Node<S>,
        peers: Vec<Address>,
        state: S,
        slot: Slot,
        decisions: Map<Slot, Proposal<S::Command>>,
    ) -> Arc<RwLock<Self>> {
        let proposal_slot = decisions.keys()
            .max()
            .map_or(slot, |last| (last + 1).max(slot));
        let replica = Arc::new_cyclic(|weak| {
            RwLock::new(Replica {
                node: node.clone(),
                weak: weak.clone(),
                state,
                decision_slot: slot,
                proposal_slot,
                decisions,
                proposals: Map::default(),
                peers,
                latest_leader: None,
                leader_timer: None,
            })
        });
        node.register(replica.clone());
        replica.write().drain();
        replica
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    pub fn decisions(&self) -> &Map<Slot, Proposal<S::Command>> {
        &self.decisions
    }

    pub fn decision_slot(&self) -> Slot {
        self.decision_slot
    }

    pub fn latest_leader(&self) -> Option<Address> {
        self.latest_leader
    }

    fn respond_invoke(&mut self, caller: Address, client_id: RequestId, input: S::Command) {
        let proposal = Proposal::new(caller, client_id, input);
        // re-propose in place if this exact proposal already has a slot
        let slot = self.proposals
            .iter()
            .find_map(|(slot, existing)| (*existing == proposal).then_some(*slot));
        self.propose(proposal, slot);
    }

    /// Send (or resend, if `slot` is given) a proposal to the leader we
    /// believe in — or to ourselves, which may make us the leader.
    fn propose(&mut self, proposal: Proposal<S::Command>, slot: Option<Slot>) {
        let slot = slot.unwrap_or_else(|| {
            let fresh = self.proposal_slot;
            self.proposal_slot += 1;
            fresh
        });
        self.proposals.insert(slot, proposal.clone());
        let leader = self.latest_leader.unwrap_or_else(|| self.node.address());
        info!(
            "[{}] proposing {:?} at slot {} to {}",
            self.node.address(),
            proposal,
            slot,
            leader,
        );
        self.node.send(&[leader], Message::Propose { slot, proposal });
    }

    fn respond_decision(&mut self, slot: Slot, proposal: Proposal<S::Command>) {
        if let Some(existing) = self.decisions.get(&slot) {
            if *existing != proposal {
                panic!(
                    "slot {} decided twice: {:?} then {:?}",
                    slot, existing, proposal,
                );
            }
            return;
        }
        self.decisions.insert(slot, proposal.clone());
        self.proposal_slot = self.proposal_slot.max(slot + 1);

        // our proposal lost this slot to another proposer; move it to a
        // fresh slot unless it is a no-op
        if let Some(ours) = self.proposals.get(&slot).cloned() {
            if ours != proposal && !ours.is_noop() {
                self.proposals.remove(&slot);
                self.propose(ours, None);
            }
        }
        self.drain();
    }

    /// Commit every decided slot from decision_slot onward, in order.
    fn drain(&mut self) {
        while let Some(proposal) = self.decisions.get(&self.decision_slot).cloned() {
            let slot = self.decision_slot;
            self.decision_slot += 1;
            self.commit(slot, proposal);
        }
    }

    fn commit(&mut self, slot: Slot, proposal: Proposal<S::Command>) {
        let duplicate = self.decisions
            .iter()
            .any(|(earlier, decided)| *earlier < slot && *decided == proposal);
        if duplicate {
            info!(
                "[{}] skipping duplicate proposal {:?} at slot {}",
                self.node.address(),
                proposal,
                slot,
            );
            return;
        }
        info!("[{}] committing {:?} at slot {}", self.node.address(), proposal, slot);
        if let (Some(caller), Some(input)) = (proposal.caller, proposal.input) {
            let output = self.state.execute(input);
            self.node.send(&[caller], Message::Invoked {
                client_id: proposal.client_id,
                output,
            });
        }
    }

    // leader tracking

    fn respond_adopted(&mut self) {
        self.latest_leader = Some(self.node.address());
        self.leader_alive();
    }

    fn respond_accepting(&mut self, leader: Address) {
        self.latest_leader = Some(leader);
        self.leader_alive();
    }

    fn respond_active(&mut self, sender: Address) {
        if Some(sender) == self.latest_leader {
            self.leader_alive();
        }
    }

    /// Rearm the leader-alive timer; expiry rotates to the next peer.
    fn leader_alive(&mut self) {
        if let Some(timer) = self.leader_timer.take() {
            timer.cancel();
        }
        let weak = self.weak.clone();
        self.leader_timer = Some(self.node.set_timer(LEADER_TIMEOUT, move || {
            if let Some(replica) = weak.upgrade() {
                replica.write().reset_leader();
            }
        }));
    }

    fn reset_leader(&mut self) {
        let Some(current) = self.latest_leader else { return };
        let next = self.peers
            .iter()
            .position(|peer| *peer == current)
            .map_or(0, |index| (index + 1) % self.peers.len());
        self.latest_leader = Some(self.peers[next]);
        debug!(
            "[{}] leader timed out; trying the next one, {}",
            self.node.address(),
            self.peers[next],
        );
    }

    fn respond_join(&mut self, sender: Address) {
        if self.peers.contains(&sender) {
            self.node.send(&[sender], Message::Welcome {
                state: self.state.clone(),
                slot: self.decision_slot,
                decisions: self.decisions.clone(),
            });
        }
    }
}

impl<S: state::State> Role<S> for Replica<S> {
    fn interests(&self) -> &'static [Kind] {
        &[
            Kind::Invoke,
            Kind::Decision,
            Kind::Adopted,
            Kind::Accepting,
            Kind::Active,
            Kind::Join,
        ]
    }

    fn receive(&mut self, sender: Address, message: Message<S>) {
        match message {
            Message::Invoke { caller, client_id, input } => {
                self.respond_invoke(caller, client_id, input)
            }
            Message::Decision { slot, proposal } => self.respond_decision(slot, proposal),
            Message::Adopted { .. } => self.respond_adopted(),
            Message::Accepting { leader } => self.respond_accepting(leader),
            Message::Active => self.respond_active(sender),
            Message::Join => self.respond_join(sender),
            _ => (),
        }
    }
}
