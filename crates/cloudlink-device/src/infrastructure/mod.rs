//! Infrastructure layer for the device engine.
//!
//! Contains the adapters behind the application-layer ports plus
//! configuration storage.  The production secure transport lives outside
//! this repository; what ships here is the scripted mock stack used by the
//! test suites and the exerciser binary.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `cloudlink-core`, but MUST NOT be imported by the `application` layer.
//!
//! # Sub-modules
//!
//! - **`channel`**    – [`crate::application::channel::Channel`] adapters.
//! - **`platform`**   – [`crate::application::platform::Platform`] adapters.
//! - **`descriptor`** – [`crate::application::descriptor::Descriptor`]
//!   adapters, including the shared persisted-state store that links the
//!   mock descriptor and the mock channel's session cache.
//! - **`storage`**    – TOML configuration file read/write.

pub mod channel;
pub mod descriptor;
pub mod platform;
pub mod storage;
