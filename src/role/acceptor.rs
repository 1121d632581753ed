//! # Summary
//!
//! This module implements the `Acceptor` role, the protocol's
//! distributed memory. An acceptor stores the highest ballot it has
//! promised and, per slot, the highest-ballot proposal it has accepted.
//! It never retransmits and never fails; at worst it refuses by
//! replying with a higher promise.

use std::sync::Arc;

use hashbrown::HashMap as Map;
use parking_lot::RwLock;

use crate::message::{AcceptedMap, Ballot, Kind, Message, Proposal, Slot};
use crate::node::{Address, Node, Role};
use crate::state;

pub struct Acceptor<S: state::State> {
    node: Node<S>,

    /// Highest ballot promised so far; `None` until the first Prepare
    ballot: Option<Ballot>,

    /// Highest-ballot accepted proposal per slot
    accepted: AcceptedMap<S::Command>,
}

impl<S: state::State> Acceptor<S> {
    pub fn spawn(node: &Node<S>) -> Arc<RwLock<Self>> {
        let acceptor = Arc::new(RwLock::new(Acceptor {
            node: node.clone(),
            ballot: None,
            accepted: Map::default(),
        }));
        node.register(acceptor.clone());
        acceptor
    }

    pub fn promise(&self) -> Option<Ballot> {
        self.ballot
    }

    pub fn accepted(&self) -> &AcceptedMap<S::Command> {
        &self.accepted
    }

    /// Raise the promise if the scout's ballot beats it, then reply with
    /// the current promise and the entire accepted map.
    fn respond_prepare(&mut self, sender: Address, ballot: Ballot) {
        if self.ballot < Some(ballot) {
            self.ballot = Some(ballot);
            // the probing scout's node may be the next leader
            self.node.send(&[self.node.address()], Message::Accepting { leader: sender });
        }
        let promise = self.ballot.unwrap_or(ballot);
        trace!("[{}] promising {:?} to {}", self.node.address(), promise, sender);
        self.node.send(&[sender], Message::Promise {
            ballot: promise,
            accepted: self.accepted.clone(),
        });
    }

    /// Store the proposal if the ballot is not behind the promise and
    /// beats whatever this slot already holds. The reply always carries
    /// the current promise, which is how a commander learns it lost.
    fn respond_accept(&mut self, sender: Address, slot: Slot, ballot: Ballot, proposal: Proposal<S::Command>) {
        if Some(ballot) >= self.ballot {
            if Some(ballot) > self.ballot {
                self.ballot = Some(ballot);
            }
            let superseded = self.accepted
                .get(&slot)
                .map_or(false, |(stored, _)| *stored >= ballot);
            if !superseded {
                trace!("[{}] accepting {:?} at slot {}", self.node.address(), proposal, slot);
                self.accepted.insert(slot, (ballot, proposal));
            }
        }
        let promise = self.ballot.unwrap_or(ballot);
        self.node.send(&[sender], Message::Accepted { slot, ballot: promise });
    }
}

impl<S: state::State> Role<S> for Acceptor<S> {
    fn interests(&self) -> &'static [Kind] {
        &[Kind::Prepare, Kind::Accept]
    }

    fn receive(&mut self, sender: Address, message: Message<S>) {
        match message {
            Message::Prepare { ballot } => self.respond_prepare(sender, ballot),
            Message::Accept { slot, ballot, proposal } => {
                self.respond_accept(sender, slot, ballot, proposal)
            }
            _ => (),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::network::Network;
    use crate::testutil::{Counter, Probe};

    fn harness() -> (Network<Counter>, Arc<RwLock<Acceptor<Counter>>>, Arc<RwLock<Probe>>, Arc<RwLock<Probe>>) {
        let network = Network::new(11);
        let node = network.node(0);
        let acceptor = Acceptor::spawn(&node);
        let local = Probe::spawn(&node);
        let remote = Probe::spawn(&network.node(9));
        (network, acceptor, local, remote)
    }

    #[test]
    fn prepare_raises_promise_and_flags_new_leader() {
        let (network, acceptor, local, remote) = harness();
        let ballot = Ballot { round: 1, leader: 9 };

        network.send(9, &[0], Message::Prepare { ballot });
        network.run_for(Duration::from_secs(1));

        assert_eq!(Some(ballot), acceptor.read().promise());
        let leaders = local.read().inbox.iter()
            .filter_map(|(_, message)| match message {
                Message::Accepting { leader } => Some(*leader),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(vec![9], leaders);
        let promises = remote.read().inbox.iter()
            .filter_map(|(_, message)| match message {
                Message::Promise { ballot, accepted } => Some((*ballot, accepted.len())),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(vec![(ballot, 0)], promises);
    }

    #[test]
    fn stale_prepare_replies_with_higher_promise() {
        let (network, acceptor, local, remote) = harness();
        let high = Ballot { round: 2, leader: 9 };
        let low = Ballot { round: 1, leader: 9 };

        network.send(9, &[0], Message::Prepare { ballot: high });
        network.run_for(Duration::from_secs(1));
        network.send(9, &[0], Message::Prepare { ballot: low });
        network.run_for(Duration::from_secs(1));

        assert_eq!(Some(high), acceptor.read().promise());
        // only the first prepare raised the promise
        assert_eq!(1, local.read().count(Kind::Accepting));
        let promises = remote.read().inbox.iter()
            .filter_map(|(_, message)| match message {
                Message::Promise { ballot, .. } => Some(*ballot),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(vec![high, high], promises);
    }

    #[test]
    fn accept_stores_highest_ballot_per_slot() {
        let (network, acceptor, _, remote) = harness();
        let low = Ballot { round: 1, leader: 9 };
        let high = Ballot { round: 2, leader: 9 };
        let first = Proposal::new(7, 1, 5);
        let second = Proposal::new(7, 2, 6);

        network.send(9, &[0], Message::Accept { slot: 0, ballot: low, proposal: first.clone() });
        network.run_for(Duration::from_secs(1));
        network.send(9, &[0], Message::Accept { slot: 0, ballot: high, proposal: second.clone() });
        network.run_for(Duration::from_secs(1));

        let acceptor = acceptor.read();
        assert_eq!(Some(&(high, second)), acceptor.accepted().get(&0));
        let replies = remote.read().inbox.iter()
            .filter_map(|(_, message)| match message {
                Message::Accepted { slot, ballot } => Some((*slot, *ballot)),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(vec![(0, low), (0, high)], replies);
    }

    #[test]
    fn accept_at_ballot_equal_to_promise_is_stored() {
        let (network, acceptor, _, _) = harness();
        let ballot = Ballot { round: 1, leader: 9 };
        let proposal = Proposal::new(7, 1, 5);

        network.send(9, &[0], Message::Prepare { ballot });
        network.run_for(Duration::from_secs(1));
        network.send(9, &[0], Message::Accept { slot: 3, ballot, proposal: proposal.clone() });
        network.run_for(Duration::from_secs(1));

        assert_eq!(Some(&(ballot, proposal)), acceptor.read().accepted().get(&3));
    }

    #[test]
    fn stale_accept_is_refused_but_answered() {
        let (network, acceptor, _, _) = harness();
        let high = Ballot { round: 2, leader: 9 };
        let low = Ballot { round: 1, leader: 8 };
        let remote = Probe::spawn(&network.node(8));

        network.send(9, &[0], Message::Prepare { ballot: high });
        network.run_for(Duration::from_secs(1));
        network.send(8, &[0], Message::Accept { slot: 0, ballot: low, proposal: Proposal::new(7, 1, 5) });
        network.run_for(Duration::from_secs(1));

        assert!(acceptor.read().accepted().get(&0).is_none());
        let replies = remote.read().inbox.iter()
            .filter_map(|(_, message)| match message {
                Message::Accepted { slot, ballot } => Some((*slot, *ballot)),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(vec![(0, high)], replies);
    }
}
