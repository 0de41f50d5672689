//! Server-side handoff of vault-tokenized card references to a payment service provider.
//!
//! The card details a customer enters are captured by the vault's field-capture widget and
//! replaced by aliases. This crate takes those aliases and turns them into a PSP payment
//! method and subscription, without the real card data ever passing through this service:
//! requests carrying aliases go through the vault's outbound proxy, which swaps in the card
//! data on the way to the PSP.
//!
//! # Modules
//!
//! - [`config`] - JSON configuration with `$VAR` environment references.
//! - [`vault`] - Vault identity exchange ([`vault::auth`]) and the outbound proxy tunnel
//!   ([`vault::tunnel`]).
//! - [`psp`] - PSP REST calls, direct ([`psp::client`]) and tunneled
//!   ([`psp::payment_method`]).
//! - [`orchestrator`] - The [`CardHandoff`](orchestrator::CardHandoff) trait and the
//!   [`FlowOrchestrator`](orchestrator::FlowOrchestrator) that runs the handoff.
//! - [`handlers`] - HTTP endpoints.
//! - [`util`] - Request ids, telemetry, and signal handling.
//!
//! Wire types live in the `vault-handoff-types` crate.

pub mod config;
pub mod handlers;
pub mod orchestrator;
pub mod psp;
pub mod run;
pub mod util;
pub mod vault;
