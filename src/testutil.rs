//! Shared fixtures for the in-crate unit tests: a trivial summing state
//! machine and a probe role that records everything its node receives.

use std::sync::Arc;

use parking_lot::RwLock;
use serde_derive::{Deserialize, Serialize};

use crate::message::{Kind, Message};
use crate::node::{Address, Node, Role};

#[derive(Serialize, Deserialize)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Counter(pub i64);

impl crate::state::State for Counter {
    type Command = i64;
    type Response = i64;

    fn execute(&mut self, input: i64) -> i64 {
        self.0 += input;
        self.0
    }
}

const ALL_KINDS: &[Kind] = &[
    Kind::Invoke,
    Kind::Invoked,
    Kind::Propose,
    Kind::Prepare,
    Kind::Promise,
    Kind::Accept,
    Kind::Accepted,
    Kind::Decision,
    Kind::Decided,
    Kind::Preempted,
    Kind::Adopted,
    Kind::Accepting,
    Kind::Active,
    Kind::Join,
    Kind::Welcome,
];

/// Records every message delivered to its node, in delivery order.
pub struct Probe {
    pub inbox: Vec<(Address, Message<Counter>)>,
}

impl Probe {
    pub fn spawn(node: &Node<Counter>) -> Arc<RwLock<Self>> {
        let probe = Arc::new(RwLock::new(Probe { inbox: Vec::new() }));
        node.register(probe.clone());
        probe
    }

    pub fn count(&self, kind: Kind) -> usize {
        self.inbox.iter().filter(|(_, message)| message.kind() == kind).count()
    }
}

impl Role<Counter> for Probe {
    fn interests(&self) -> &'static [Kind] {
        ALL_KINDS
    }

    fn receive(&mut self, sender: Address, message: Message<Counter>) {
        self.inbox.push((sender, message));
    }
}
