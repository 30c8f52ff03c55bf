//! User service of the fitness platform: an HTTP front for user records whose
//! single outbound dependency, the database gateway, is guarded by a circuit
//! breaker.

pub mod circuit_breaker;
pub mod config;
pub mod error_reason;
pub mod gateway;
pub mod model;
pub mod relay;
pub mod service;
pub mod state;
