//! # Summary
//!
//! This module contains the cooperating roles of the protocol. Every
//! participating node runs one `Acceptor`, one `Replica`, and one
//! `Leader`; the leader spawns short-lived `Scout` and `Commander`
//! sub-roles as it competes for adoption and drives individual slots.
//! `Requester` is the client-side counterpart that submits commands and
//! retries until answered.

/// Ballot promise and accepted-proposal storage.
pub mod acceptor;

/// Per-slot acceptance driver.
pub mod commander;

/// Ballot owner; spawns scouts and commanders.
pub mod leader;

/// Client-facing log replica and executor.
pub mod replica;

/// Client-side invoke-with-retry role.
pub mod requester;

/// Ballot adoption driver.
pub mod scout;
