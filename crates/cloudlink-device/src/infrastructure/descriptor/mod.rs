//! Descriptor adapters.
//!
//! A production firmware implements
//! [`crate::application::descriptor::Descriptor`] over its function and
//! variable registries.  This module ships [`mock::MockDescriptor`] and the
//! [`mock::SharedAppState`] store that links the descriptor's persisted
//! checksums to the mock channel's session cache.

pub mod mock;

pub use mock::{MockDescriptor, SharedAppState};
