//! # Summary
//!
//! This module implements the `Commander` sub-role, spawned by an active
//! leader to drive one proposal into one slot. It narrowcasts `Accept`
//! to the peers that have not yet answered, retransmitting until it
//! terminates. On a quorum of matching `Accepted` replies it broadcasts
//! the `Decision` to every peer and reports `Decided` to its own node;
//! a reply carrying a different ballot means preemption.

use std::sync::{Arc, Weak};

use hashbrown::HashSet as Set;
use parking_lot::RwLock;

use crate::config::ACCEPT_RETRANSMIT;
use crate::message::{Ballot, Kind, Message, Proposal, Slot};
use crate::network::Timer;
use crate::node::{Address, Node, Role, RoleId};
use crate::state;

pub struct Commander<S: state::State> {
    id: RoleId,
    node: Node<S>,
    weak: Weak<RwLock<Self>>,
    running: bool,
    ballot: Ballot,
    slot: Slot,
    proposal: Proposal<S::Command>,
    peers: Vec<Address>,
    quorum: usize,

    /// Acceptors that have accepted at this ballot
    accepted: Set<Address>,

    retransmit: Option<Timer>,
}

impl<S: state::State> Commander<S> {
    pub fn spawn(
        node: &Node<S>,
        ballot: Ballot,
        slot: Slot,
        proposal: Proposal<S::Command>,
        peers: Vec<Address>,
    ) -> Arc<RwLock<Self>> {
        let quorum = peers.len() / 2 + 1;
        let commander = Arc::new_cyclic(|weak| {
            RwLock::new(Commander {
                id: RoleId::default(),
                node: node.clone(),
                weak: weak.clone(),
                running: true,
                ballot,
                slot,
                proposal,
                peers,
                quorum,
                accepted: Set::default(),
                retransmit: None,
            })
        });
        let id = node.register(commander.clone());
        {
            let mut this = commander.write();
            this.id = id;
            debug!("[{}] commander starting for slot {} at {:?}", node.address(), slot, ballot);
            this.send_accept();
        }
        commander
    }

    /// Narrowcast `Accept` to peers that haven't answered yet and
    /// schedule the next round.
    fn send_accept(&mut self) {
        let pending = self.peers
            .iter()
            .copied()
            .filter(|peer| !self.accepted.contains(peer))
            .collect::<Vec<_>>();
        self.node.send(&pending, Message::Accept {
            slot: self.slot,
            ballot: self.ballot,
            proposal: self.proposal.clone(),
        });
        let weak = self.weak.clone();
        self.retransmit = Some(self.node.set_timer(ACCEPT_RETRANSMIT, move || {
            if let Some(commander) = weak.upgrade() {
                let mut commander = commander.write();
                if commander.running {
                    commander.send_accept();
                }
            }
        }));
    }

    fn respond_accepted(&mut self, sender: Address, slot: Slot, ballot: Ballot) {
        if slot != self.slot {
            return;
        }
        if ballot == self.ballot {
            self.accepted.insert(sender);
            if self.accepted.len() >= self.quorum {
                debug!("[{}] decided {:?} at slot {}", self.node.address(), self.proposal, self.slot);
                self.node.send(&self.peers, Message::Decision {
                    slot: self.slot,
                    proposal: self.proposal.clone(),
                });
                self.node.send(&[self.node.address()], Message::Decided { slot: self.slot });
                self.stop();
            }
        } else {
            self.node.send(&[self.node.address()], Message::Preempted {
                slot: Some(self.slot),
                preempted_by: ballot,
            });
            self.stop();
        }
    }

    fn stop(&mut self) {
        debug!("[{}] commander for slot {} stopping", self.node.address(), self.slot);
        self.running = false;
        if let Some(timer) = self.retransmit.take() {
            timer.cancel();
        }
        self.node.unregister(self.id);
    }
}

impl<S: state::State> Role<S> for Commander<S> {
    fn interests(&self) -> &'static [Kind] {
        &[Kind::Accepted]
    }

    fn receive(&mut self, sender: Address, message: Message<S>) {
        if let Message::Accepted { slot, ballot } = message {
            self.respond_accepted(sender, slot, ballot);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::network::Network;
    use crate::testutil::{Counter, Probe};

    fn harness() -> (Network<Counter>, Arc<RwLock<Probe>>, Arc<RwLock<Probe>>, Arc<RwLock<Probe>>) {
        let network = Network::new(5);
        let node = network.node(0);
        let local = Probe::spawn(&node);
        let one = Probe::spawn(&network.node(1));
        let two = Probe::spawn(&network.node(2));
        Commander::spawn(
            &node,
            Ballot { round: 1, leader: 0 },
            4,
            Proposal::new(7, 1, 5),
            vec![0, 1, 2],
        );
        (network, local, one, two)
    }

    #[test]
    fn decides_on_quorum_and_broadcasts() {
        let (network, local, one, two) = harness();
        let ballot = Ballot { round: 1, leader: 0 };
        network.run_for(Duration::from_millis(100));
        assert_eq!(1, one.read().count(Kind::Accept));

        network.send(1, &[0], Message::Accepted { slot: 4, ballot });
        network.send(2, &[0], Message::Accepted { slot: 4, ballot });
        network.run_for(Duration::from_millis(100));

        for probe in [&local, &one, &two] {
            let decisions = probe.read().inbox.iter()
                .filter_map(|(_, message)| match message {
                    Message::Decision { slot, proposal } => Some((*slot, proposal.clone())),
                    _ => None,
                })
                .collect::<Vec<_>>();
            assert_eq!(vec![(4, Proposal::new(7, 1, 5))], decisions);
        }
        let decided = local.read().inbox.iter()
            .filter_map(|(_, message)| match message {
                Message::Decided { slot } => Some(*slot),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(vec![4], decided);
    }

    #[test]
    fn preempted_by_higher_ballot_reply() {
        let (network, local, _, _) = harness();
        let competing = Ballot { round: 3, leader: 2 };
        network.run_for(Duration::from_millis(100));

        network.send(1, &[0], Message::Accepted { slot: 4, ballot: competing });
        network.run_for(Duration::from_millis(100));

        let preempts = local.read().inbox.iter()
            .filter_map(|(_, message)| match message {
                Message::Preempted { slot, preempted_by } => Some((*slot, *preempted_by)),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(vec![(Some(4), competing)], preempts);
        assert_eq!(0, local.read().count(Kind::Decided));
    }

    #[test]
    fn replies_for_other_slots_are_ignored() {
        let (network, local, _, _) = harness();
        let ballot = Ballot { round: 1, leader: 0 };
        network.run_for(Duration::from_millis(100));

        network.send(1, &[0], Message::Accepted { slot: 9, ballot });
        network.send(2, &[0], Message::Accepted { slot: 9, ballot });
        network.run_for(Duration::from_millis(100));

        assert_eq!(0, local.read().count(Kind::Decision));
        assert_eq!(0, local.read().count(Kind::Decided));
    }

    #[test]
    fn retransmits_only_to_silent_peers() {
        let (network, _, one, two) = harness();
        let ballot = Ballot { round: 1, leader: 0 };
        network.run_for(Duration::from_millis(100));
        network.send(1, &[0], Message::Accepted { slot: 4, ballot });
        network.run_for(ACCEPT_RETRANSMIT * 2);
        network.run_for(Duration::from_millis(100));

        // peer 1 answered and is left alone; peer 2 keeps being probed
        assert_eq!(1, one.read().count(Kind::Accept));
        assert!(two.read().count(Kind::Accept) >= 2);
    }
}
