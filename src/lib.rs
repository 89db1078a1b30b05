//! A coordinator and client library for federated learning rounds.
//!
//! The coordinator repeatedly runs rounds against a fleet of participants:
//! it selects a cohort from the registered participants, broadcasts the
//! current global model, collects model deltas within a deadline and folds
//! them into the next global model with calibrated noise. The round logic
//! lives in [`state_machine`], the networking front end in [`coordinator`]
//! and the client side in [`participant`].

pub mod context;
pub mod coordinator;
pub mod message;
pub mod model;
pub mod participant;
pub mod settings;
pub mod state_machine;
