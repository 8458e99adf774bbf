//! Cartório Registry Integration API Library
//!
//! Client for a registry office's back-office API (protocol tracking and
//! billing), plus the thin HTTP layer that exposes it.
//!
//! # Modules
//!
//! - `config`: Configuration management.
//! - `errors`: Route-layer error responses.
//! - `handlers`: HTTP request handlers and router.
//! - `models`: Registry data models.
//! - `registry`: Token manager, transport, error normalizer and the protocol
//!   and billing services.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod registry;
