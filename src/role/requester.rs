//! # Summary
//!
//! This module implements the `Requester` role, the client-side half of
//! the invoke round trip. It submits one command to a replica and keeps
//! retransmitting the `Invoke` until the matching `Invoked` comes back,
//! then hands the output to its callback and stops. The retries are
//! what re-drive a proposal through leader churn.

use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::config::INVOKE_RETRANSMIT;
use crate::message::{Kind, Message, RequestId};
use crate::network::Timer;
use crate::node::{Address, Node, Role, RoleId};
use crate::state;

pub struct Requester<S: state::State> {
    id: RoleId,
    node: Node<S>,
    weak: Weak<RwLock<Self>>,
    running: bool,
    replica: Address,
    client_id: RequestId,
    input: S::Command,
    callback: Option<Box<dyn FnOnce(S::Response)>>,
    retransmit: Option<Timer>,
}

impl<S: state::State> Requester<S> {
    pub fn spawn(
        node: &Node<S>,
        replica: Address,
        client_id: RequestId,
        input: S::Command,
        callback: impl FnOnce(S::Response) + 'static,
    ) -> Arc<RwLock<Self>> {
        let requester = Arc::new_cyclic(|weak| {
            RwLock::new(Requester {
                id: RoleId::default(),
                node: node.clone(),
                weak: weak.clone(),
                running: true,
                replica,
                client_id,
                input,
                callback: Some(Box::new(callback)),
                retransmit: None,
            })
        });
        let id = node.register(requester.clone());
        {
            let mut this = requester.write();
            this.id = id;
            this.send_invoke();
        }
        requester
    }

    /// True once the reply has arrived and the callback has run.
    pub fn done(&self) -> bool {
        !self.running
    }

    fn send_invoke(&mut self) {
        self.node.send(&[self.replica], Message::Invoke {
            caller: self.node.address(),
            client_id: self.client_id,
            input: self.input.clone(),
        });
        let weak = self.weak.clone();
        self.retransmit = Some(self.node.set_timer(INVOKE_RETRANSMIT, move || {
            if let Some(requester) = weak.upgrade() {
                let mut requester = requester.write();
                if requester.running {
                    requester.send_invoke();
                }
            }
        }));
    }

    fn respond_invoked(&mut self, client_id: RequestId, output: S::Response) {
        if client_id != self.client_id {
            return;
        }
        debug!("[{}] request {} answered", self.node.address(), client_id);
        if let Some(callback) = self.callback.take() {
            callback(output);
        }
        self.stop();
    }

    fn stop(&mut self) {
        self.running = false;
        if let Some(timer) = self.retransmit.take() {
            timer.cancel();
        }
        self.node.unregister(self.id);
    }
}

impl<S: state::State> Role<S> for Requester<S> {
    fn interests(&self) -> &'static [Kind] {
        &[Kind::Invoked]
    }

    fn receive(&mut self, _sender: Address, message: Message<S>) {
        if let Message::Invoked { client_id, output } = message {
            self.respond_invoked(client_id, output);
        }
    }
}
