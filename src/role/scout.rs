//! # Summary
//!
//! This module implements the `Scout` sub-role, spawned by a leader to
//! win a quorum of promises for one ballot. It broadcasts `Prepare` to
//! every peer, retransmitting until it terminates, and merges the
//! accepted maps carried by matching promises. It ends its life by
//! telling its own node either `Adopted` or `Preempted`.

use std::sync::{Arc, Weak};

use hashbrown::{HashMap as Map, HashSet as Set};
use parking_lot::RwLock;

use crate::config::PREPARE_RETRANSMIT;
use crate::message::{AcceptedMap, Ballot, Kind, Message};
use crate::network::Timer;
use crate::node::{Address, Node, Role, RoleId};
use crate::state;

pub struct Scout<S: state::State> {
    id: RoleId,
    node: Node<S>,
    weak: Weak<RwLock<Self>>,
    running: bool,
    ballot: Ballot,
    peers: Vec<Address>,
    quorum: usize,

    /// Acceptors that have promised this ballot
    promised: Set<Address>,

    /// Highest-ballot accepted proposal per slot, merged across promises
    accepted: AcceptedMap<S::Command>,

    retransmit: Option<Timer>,
}

impl<S: state::State> Scout<S> {
    pub fn spawn(node: &Node<S>, ballot: Ballot, peers: Vec<Address>) -> Arc<RwLock<Self>> {
        let quorum = peers.len() / 2 + 1;
        let scout = Arc::new_cyclic(|weak| {
            RwLock::new(Scout {
                id: RoleId::default(),
                node: node.clone(),
                weak: weak.clone(),
                running: true,
                ballot,
                peers,
                quorum,
                promised: Set::default(),
                accepted: Map::default(),
                retransmit: None,
            })
        });
        let id = node.register(scout.clone());
        {
            let mut this = scout.write();
            this.id = id;
            debug!("[{}] scout starting for {:?}", node.address(), ballot);
            this.send_prepare();
        }
        scout
    }

    pub fn ballot(&self) -> Ballot {
        self.ballot
    }

    /// Broadcast `Prepare` and schedule the next rebroadcast. The timer
    /// callback holds only a weak handle and re-checks `running`, so a
    /// fire after stop is a no-op.
    fn send_prepare(&mut self) {
        self.node.send(&self.peers, Message::Prepare { ballot: self.ballot });
        let weak = self.weak.clone();
        self.retransmit = Some(self.node.set_timer(PREPARE_RETRANSMIT, move || {
            if let Some(scout) = weak.upgrade() {
                let mut scout = scout.write();
                if scout.running {
                    scout.send_prepare();
                }
            }
        }));
    }

    fn respond_promise(&mut self, sender: Address, ballot: Ballot, accepted: AcceptedMap<S::Command>) {
        if ballot == self.ballot {
            self.merge(accepted);
            self.promised.insert(sender);
            debug!(
                "[{}] {} of {} promises for {:?}",
                self.node.address(),
                self.promised.len(),
                self.quorum,
                self.ballot,
            );
            if self.promised.len() >= self.quorum {
                let accepted = self.accepted
                    .drain()
                    .map(|(slot, (_, proposal))| (slot, proposal))
                    .collect();
                self.node.send(&[self.node.address()], Message::Adopted {
                    ballot: self.ballot,
                    accepted,
                });
                self.stop();
            }
        } else {
            // an acceptor promised a competing leader a higher ballot
            self.node.send(&[self.node.address()], Message::Preempted {
                slot: None,
                preempted_by: ballot,
            });
            self.stop();
        }
    }

    /// Keep the highest-ballot entry per slot.
    fn merge(&mut self, accepted: AcceptedMap<S::Command>) {
        for (slot, (ballot, proposal)) in accepted {
            let superseded = self.accepted
                .get(&slot)
                .map_or(false, |(known, _)| *known >= ballot);
            if !superseded {
                self.accepted.insert(slot, (ballot, proposal));
            }
        }
    }

    fn stop(&mut self) {
        debug!("[{}] scout for {:?} stopping", self.node.address(), self.ballot);
        self.running = false;
        if let Some(timer) = self.retransmit.take() {
            timer.cancel();
        }
        self.node.unregister(self.id);
    }
}

impl<S: state::State> Role<S> for Scout<S> {
    fn interests(&self) -> &'static [Kind] {
        &[Kind::Promise]
    }

    fn receive(&mut self, sender: Address, message: Message<S>) {
        if let Message::Promise { ballot, accepted } = message {
            self.respond_promise(sender, ballot, accepted);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::message::Proposal;
    use crate::network::Network;
    use crate::testutil::{Counter, Probe};

    fn harness() -> (Network<Counter>, Arc<RwLock<Scout<Counter>>>, Arc<RwLock<Probe>>, Arc<RwLock<Probe>>, Arc<RwLock<Probe>>) {
        let network = Network::new(3);
        let node = network.node(0);
        let local = Probe::spawn(&node);
        let one = Probe::spawn(&network.node(1));
        let two = Probe::spawn(&network.node(2));
        let scout = Scout::spawn(&node, Ballot { round: 1, leader: 0 }, vec![0, 1, 2]);
        (network, scout, local, one, two)
    }

    fn promise(slots: &[(usize, Ballot, i64)]) -> AcceptedMap<i64> {
        slots.iter()
            .map(|&(slot, ballot, input)| (slot, (ballot, Proposal::new(7, slot as u64, input))))
            .collect()
    }

    #[test]
    fn adopts_on_quorum_with_merged_proposals() {
        let (network, _scout, local, one, two) = harness();
        let ballot = Ballot { round: 1, leader: 0 };
        network.run_for(Duration::from_millis(100));
        assert_eq!(1, one.read().count(Kind::Prepare));
        assert_eq!(1, two.read().count(Kind::Prepare));

        let lower = Ballot { round: 0, leader: 1 };
        let higher = Ballot { round: 0, leader: 2 };
        network.send(1, &[0], Message::Promise { ballot, accepted: promise(&[(0, lower, 5)]) });
        network.send(2, &[0], Message::Promise { ballot, accepted: promise(&[(0, higher, 6)]) });
        network.run_for(Duration::from_millis(100));

        let adopted = local.read().inbox.iter()
            .filter_map(|(_, message)| match message {
                Message::Adopted { ballot, accepted } => Some((*ballot, accepted.clone())),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(1, adopted.len());
        assert_eq!(ballot, adopted[0].0);
        // slot 0 keeps the proposal accepted at the higher ballot
        assert_eq!(Some(&Proposal::new(7, 0, 6)), adopted[0].1.get(&0));
    }

    #[test]
    fn preempted_by_mismatched_promise() {
        let (network, _scout, local, _, _) = harness();
        network.run_for(Duration::from_millis(100));

        let competing = Ballot { round: 2, leader: 5 };
        network.send(1, &[0], Message::Promise { ballot: competing, accepted: promise(&[]) });
        network.run_for(Duration::from_millis(100));

        let preempts = local.read().inbox.iter()
            .filter_map(|(_, message)| match message {
                Message::Preempted { slot, preempted_by } => Some((*slot, *preempted_by)),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(vec![(None, competing)], preempts);
    }

    #[test]
    fn retransmits_until_stopped() {
        let (network, _scout, _, one, _) = harness();
        network.run_for(PREPARE_RETRANSMIT * 3);
        network.run_for(Duration::from_millis(100));
        let while_running = one.read().count(Kind::Prepare);
        assert!(while_running >= 3, "expected rebroadcasts, saw {}", while_running);

        let ballot = Ballot { round: 1, leader: 0 };
        network.send(1, &[0], Message::Promise { ballot, accepted: promise(&[]) });
        network.send(2, &[0], Message::Promise { ballot, accepted: promise(&[]) });
        network.run_for(Duration::from_millis(100));

        // quorum reached; the retransmit timer must stay quiet now
        network.run_for(PREPARE_RETRANSMIT * 3);
        assert_eq!(while_running, one.read().count(Kind::Prepare));
    }
}
