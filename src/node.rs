//! # Summary
//!
//! This module implements the per-node message dispatcher. A `Node` owns
//! a registry of the roles running on it; an inbound message is handed to
//! every registered role whose interest list contains the message's kind.
//! Roles communicate only by sending messages through their node, never
//! by calling each other directly, and messages a role addresses to its
//! own node are enqueued on the network like any other traffic rather
//! than dispatched re-entrantly.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time;

use parking_lot::RwLock;

use crate::message::{Kind, Message};
use crate::network::{Core, Network, Timer};
use crate::state;

/// Node identity on the simulated network.
pub type Address = usize;

/// Registry handle for one role on one node.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct RoleId(usize);

/// A protocol role hosted by a node.
///
/// `interests` names the message kinds this role handles; the dispatcher
/// consults it before every delivery, so a role that unregisters stops
/// receiving messages immediately.
pub trait Role<S: state::State> {
    fn interests(&self) -> &'static [Kind];
    fn receive(&mut self, sender: Address, message: Message<S>);
}

/// Cheaply cloneable handle to one node's dispatcher.
#[derive(Derivative)]
#[derivative(Clone(bound = ""))]
pub struct Node<S: state::State>(Arc<Inner<S>>);

struct Inner<S: state::State> {
    address: Address,
    network: Weak<RwLock<Core<S>>>,
    roles: RwLock<Vec<(RoleId, Arc<RwLock<dyn Role<S>>>)>>,
    counter: AtomicUsize,
}

impl<S: state::State> Node<S> {
    pub(crate) fn new(address: Address, network: Weak<RwLock<Core<S>>>) -> Self {
        Node(Arc::new(Inner {
            address,
            network,
            roles: RwLock::new(Vec::new()),
            counter: AtomicUsize::new(0),
        }))
    }

    pub fn address(&self) -> Address {
        self.0.address
    }

    /// Register a role to receive messages matching its interests.
    pub fn register(&self, role: Arc<RwLock<dyn Role<S>>>) -> RoleId {
        let id = RoleId(self.0.counter.fetch_add(1, Ordering::SeqCst));
        self.0.roles.write().push((id, role));
        id
    }

    /// Remove a role; no further messages reach it.
    pub fn unregister(&self, id: RoleId) {
        self.0.roles.write().retain(|(existing, _)| *existing != id);
    }

    /// Send a message to each destination through the network. The
    /// network attaches this node's address as the sender.
    pub fn send(&self, destinations: &[Address], message: Message<S>) {
        if let Some(core) = self.0.network.upgrade() {
            Network(core).send(self.0.address, destinations, message);
        }
    }

    /// Schedule a callback on the network's timer service.
    pub fn set_timer(&self, delay: time::Duration, callback: impl FnOnce() + 'static) -> Timer {
        match self.0.network.upgrade() {
            Some(core) => Network(core).set_timer(self.0.address, delay, callback),
            None => Timer::inert(),
        }
    }

    /// Hand an inbound message to every interested role.
    ///
    /// Dispatch runs over a snapshot of the registry so a handler may
    /// register or unregister roles (including itself) mid-delivery.
    pub(crate) fn deliver(&self, sender: Address, message: Message<S>) {
        let kind = message.kind();
        let snapshot = self.0.roles.read()
            .iter()
            .map(|(_, role)| role.clone())
            .collect::<Vec<_>>();
        for role in snapshot {
            let interested = role.read().interests().contains(&kind);
            if interested {
                role.write().receive(sender, message.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::testutil::Counter;

    struct Joiner {
        joins: usize,
    }

    impl Role<Counter> for Joiner {
        fn interests(&self) -> &'static [Kind] {
            &[Kind::Join]
        }

        fn receive(&mut self, _sender: Address, message: Message<Counter>) {
            if let Message::Join = message {
                self.joins += 1;
            }
        }
    }

    #[test]
    fn dispatch_respects_interests() {
        let network: Network<Counter> = Network::new(0);
        let node = network.node(0);
        let joiner = Arc::new(RwLock::new(Joiner { joins: 0 }));
        node.register(joiner.clone());

        network.send(9, &[0], Message::Join);
        network.send(9, &[0], Message::Active);
        network.send(9, &[0], Message::Join);
        network.run_for(Duration::from_secs(1));

        assert_eq!(2, joiner.read().joins);
    }

    #[test]
    fn unregister_stops_delivery() {
        let network: Network<Counter> = Network::new(0);
        let node = network.node(0);
        let joiner = Arc::new(RwLock::new(Joiner { joins: 0 }));
        let id = node.register(joiner.clone());

        network.send(9, &[0], Message::Join);
        network.run_for(Duration::from_secs(1));
        assert_eq!(1, joiner.read().joins);

        node.unregister(id);
        network.send(9, &[0], Message::Join);
        network.run_for(Duration::from_secs(1));
        assert_eq!(1, joiner.read().joins);
    }
}
