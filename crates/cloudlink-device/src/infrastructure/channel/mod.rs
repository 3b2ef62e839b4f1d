//! Channel adapters.
//!
//! A production deployment implements
//! [`crate::application::channel::Channel`] over its secure datagram
//! transport.  This module ships the scripted [`mock::MockChannel`] used by
//! tests and the exerciser.

pub mod mock;

pub use mock::MockChannel;
