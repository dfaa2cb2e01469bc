//! Wrenchmode - maintenance-mode middleware driven by a remote switch
//!
//! This library provides an HTTP request-interception layer that:
//! - Polls a control-plane endpoint in the background for the switch status
//! - Passes requests through while maintenance mode is off
//! - Redirects clients to an external maintenance page when it is on
//! - Optionally serves a canned maintenance response instead of redirecting
//! - Exempts allow-listed client addresses from maintenance mode
//! - Fails open: its own errors never block application traffic

pub mod allowlist;
pub mod cache;
pub mod config;
pub mod decision;
pub mod error;
pub mod fetcher;
pub mod gateway;
pub mod identity;
pub mod middleware;
pub mod poller;
pub mod status;
pub mod upstream;

pub use decision::Decision;
pub use middleware::Wrenchmode;
