//! # Summary
//!
//! This module defines the traits that together describe the replicated
//! state machine. Library users implement `State` for their application,
//! and the replica roles invoke `execute` once per committed proposal,
//! in slot order.

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Operation that can be applied to a state machine.
///
/// Structural equality is load-bearing: replicas suppress duplicate
/// commits by comparing proposals, which compare their commands.
pub trait Command: Clone
    + std::fmt::Debug
    + Eq
    + std::hash::Hash
    + Serialize
    + DeserializeOwned
    + 'static
{
}

impl<T> Command for T where T: Clone
    + std::fmt::Debug
    + Eq
    + std::hash::Hash
    + Serialize
    + DeserializeOwned
    + 'static
{
}

/// Result of applying an operation to a state machine.
pub trait Response: Clone
    + std::fmt::Debug
    + Serialize
    + DeserializeOwned
    + 'static
{
}

impl<T> Response for T where T: Clone
    + std::fmt::Debug
    + Serialize
    + DeserializeOwned
    + 'static
{
}

/// Replicated state machine.
///
/// `execute` must be deterministic: every replica applies the same
/// commands in the same slot order and must arrive at the same state.
/// The `Clone` and serde bounds exist because a replica ships a
/// snapshot of its state to late joiners in a `Welcome` message.
pub trait State: Clone
    + std::fmt::Debug
    + Default
    + Serialize
    + DeserializeOwned
    + 'static
{
    type Command: Command;
    type Response: Response;
    fn execute(&mut self, input: Self::Command) -> Self::Response;
}
