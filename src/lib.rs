//! The Rust SDK for Autotune, a self-optimizing A/B testing service.
//!
//! # Overview
//!
//! The SDK revolves around a [`Client`] that picks one option per named experiment for the
//! current visitor. Picks are biased toward the option that performed best so far: the backend
//! trains a decision tree per experiment over the visitor's [`ClientContext`] (timezone offset and
//! language), and the client exploits the tree's best option with probability `1 - epsilon`,
//! exploring uniformly otherwise. Once the visitor converts, completing the experiment reports a
//! payoff that feeds the next round of training.
//!
//! Picks are remembered for the duration of a session, and starts and completions are reported in
//! batches.
//!
//! Everything host-specific (HTTP, durable storage, the source of the client context) goes
//! through the [`Environment`] trait. [`DefaultEnvironment`] covers native hosts.
//!
//! # Error Handling
//!
//! Errors are represented by the [`Error`] enum.
//!
//! Only client construction returns errors. Picking an option never fails: unavailable outcomes,
//! storage or network degrade to a uniformly random pick, and the failure is reported through
//! [`Environment::error`].
//!
//! # Logging
//!
//! The package uses the [`log`](https://docs.rs/log/latest/log/) crate for logging
//! messages under the `autotune` target. Consider integrating a `log`-compatible logger
//! implementation for better visibility into SDK operations.
//!
//! # Examples
//!
//! Examples can be found in the `demos` directory of the `autotune` crate repository.

#![warn(rustdoc::missing_crate_level_docs)]
#![warn(missing_docs)]

mod autotune;
mod client;
mod config;
mod context;
mod debounce;
mod decision_tree;
mod environment;
mod error;
mod experiment;
mod models;
mod state;

#[cfg(test)]
mod testing;

pub use crate::autotune::Autotune;
pub use client::Client;
pub use config::ClientConfig;
pub use context::{ClientContext, ContextValue, LANGUAGE, TIME_ZONE_OFFSET};
pub use decision_tree::{lookup_best_option, BestOption};
pub use environment::{DefaultEnvironment, Environment, HttpFuture, Method, PayoffCallback};
pub use error::{Error, Result};
pub use experiment::{CompletionCallback, Experiment, DEFAULT_PAYOFF};
pub use models::{Operator, Outcome, Outcomes, Tree, TryParse};
pub use state::SerializedState;
