//! # Summary
//!
//! This module defines the ballot, proposal, and message types exchanged
//! between roles. Every message travels through a node's `send` primitive,
//! including messages a role addresses to its own node, and the dispatcher
//! attaches the sender's address on delivery rather than carrying it in
//! the payload.

use hashbrown::HashMap as Map;
use serde_derive::{Deserialize, Serialize};

use crate::node::Address;
use crate::state;

/// Position in the replicated log.
pub type Slot = usize;

/// Client-chosen request identifier, unique per in-flight request.
pub type RequestId = u64;

/// Mapping from slot to the highest-ballot proposal an acceptor has
/// accepted there. Sent whole in every `Promise`, never as a delta.
pub type AcceptedMap<C> = Map<Slot, (Ballot, Proposal<C>)>;

/// A ballot is uniquely determined by its round and the address of the
/// leader that owns it, compared in that order. The null ballot an
/// acceptor starts from is represented as `Option::<Ballot>::None`,
/// which orders below every real ballot.
#[derive(Serialize, Deserialize)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ballot {
    /// Adoption attempt number; bumped past a preempting ballot's round
    pub round: usize,
    /// Owning leader's node address
    pub leader: Address,
}

impl Ballot {
    /// The ballot a leader starts from before any preemption.
    pub fn first(leader: Address) -> Self {
        Ballot { round: 0, leader }
    }
}

/// A client command bound for some slot: who asked, which of their
/// requests this is, and the input to execute. A proposal with no
/// caller is a no-op and is never executed. Equality is structural
/// over all three fields.
#[derive(Serialize, Deserialize)]
#[serde(bound(serialize = "", deserialize = ""))]
#[derive(Derivative)]
#[derivative(
    Clone(bound = ""),
    Debug(bound = ""),
    PartialEq(bound = ""),
    Eq(bound = ""),
    Hash(bound = "")
)]
pub struct Proposal<C: state::Command> {
    pub caller: Option<Address>,
    pub client_id: RequestId,
    pub input: Option<C>,
}

impl<C: state::Command> Proposal<C> {
    pub fn new(caller: Address, client_id: RequestId, input: C) -> Self {
        Proposal {
            caller: Some(caller),
            client_id,
            input: Some(input),
        }
    }

    pub fn noop() -> Self {
        Proposal {
            caller: None,
            client_id: 0,
            input: None,
        }
    }

    pub fn is_noop(&self) -> bool {
        self.caller.is_none()
    }
}

/// Every message any role can send or receive.
#[derive(Serialize, Deserialize)]
#[serde(bound(serialize = "", deserialize = ""))]
#[derive(Derivative)]
#[derivative(Clone(bound = ""), Debug(bound = ""))]
pub enum Message<S: state::State> {
    /// Client request submitted to a replica.
    Invoke {
        caller: Address,
        client_id: RequestId,
        input: S::Command,
    },
    /// Reply carrying the output of an executed request.
    Invoked {
        client_id: RequestId,
        output: S::Response,
    },
    /// Replica asks a leader to drive a proposal at a slot.
    Propose {
        slot: Slot,
        proposal: Proposal<S::Command>,
    },
    /// Scout probes acceptors for promises on a ballot.
    Prepare { ballot: Ballot },
    /// Acceptor's reply: its current promise and full accepted map.
    Promise {
        ballot: Ballot,
        accepted: AcceptedMap<S::Command>,
    },
    /// Commander asks acceptors to accept a proposal at a slot.
    Accept {
        slot: Slot,
        ballot: Ballot,
        proposal: Proposal<S::Command>,
    },
    /// Acceptor's reply: the slot and its current promise.
    Accepted { slot: Slot, ballot: Ballot },
    /// A proposal was chosen at a slot.
    Decision {
        slot: Slot,
        proposal: Proposal<S::Command>,
    },
    /// Commander tells its own leader the slot is finished.
    Decided { slot: Slot },
    /// Scout (no slot) or commander (with slot) lost to a higher ballot.
    Preempted {
        slot: Option<Slot>,
        preempted_by: Ballot,
    },
    /// Scout secured a quorum: the ballot and the per-slot
    /// highest-ballot proposals the quorum had already accepted.
    Adopted {
        ballot: Ballot,
        accepted: Map<Slot, Proposal<S::Command>>,
    },
    /// Acceptor tells its local replica who is probably leading.
    Accepting { leader: Address },
    /// Leader heartbeat.
    Active,
    /// A joining node asks peers for the current log.
    Join,
    /// Catch-up payload for a joiner.
    Welcome {
        state: S,
        slot: Slot,
        decisions: Map<Slot, Proposal<S::Command>>,
    },
}

/// Discriminant of a `Message`, used by roles to declare which
/// messages they handle.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Kind {
    Invoke,
    Invoked,
    Propose,
    Prepare,
    Promise,
    Accept,
    Accepted,
    Decision,
    Decided,
    Preempted,
    Adopted,
    Accepting,
    Active,
    Join,
    Welcome,
}

impl<S: state::State> Message<S> {
    pub fn kind(&self) -> Kind {
        match self {
            Message::Invoke { .. } => Kind::Invoke,
            Message::Invoked { .. } => Kind::Invoked,
            Message::Propose { .. } => Kind::Propose,
            Message::Prepare { .. } => Kind::Prepare,
            Message::Promise { .. } => Kind::Promise,
            Message::Accept { .. } => Kind::Accept,
            Message::Accepted { .. } => Kind::Accepted,
            Message::Decision { .. } => Kind::Decision,
            Message::Decided { .. } => Kind::Decided,
            Message::Preempted { .. } => Kind::Preempted,
            Message::Adopted { .. } => Kind::Adopted,
            Message::Accepting { .. } => Kind::Accepting,
            Message::Active => Kind::Active,
            Message::Join => Kind::Join,
            Message::Welcome { .. } => Kind::Welcome,
        }
    }
}
