#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Core types for the vault-to-PSP card tokenization handoff.
//!
//! A browser-side field-capture widget hands the server an opaque
//! [`TokenizedCardReference`](card::TokenizedCardReference): aliases that stand in for the
//! card number and CVC. The server routes those aliases through the vault's outbound proxy
//! to the payment service provider (PSP), which sees real card data only after the vault
//! rewrites the aliases in flight.
//!
//! This crate holds the wire format shared by the server and its callers. It performs
//! boundary validation but no I/O.
//!
//! # Modules
//!
//! - [`card`] - Tokenized card references and their validation
//! - [`config`] - Environment variable resolution for configuration values
//! - [`flow`] - Orchestration request, result and failure payloads
//! - [`timestamp`] - Unix timestamps for token expiry and billing periods
//!
//! # Wire Format
//!
//! All payloads serialize to JSON using camelCase field names. Inbound card references
//! additionally accept the snake_case attribute names emitted by the field-capture widget.

pub mod card;
pub mod config;
pub mod flow;
pub mod timestamp;
