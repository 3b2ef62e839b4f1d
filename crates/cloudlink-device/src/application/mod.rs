//! Application layer of the CloudLink device engine.
//!
//! This layer owns the protocol semantics and defines the traits
//! (*ports*) that the infrastructure layer implements:
//!
//! - [`channel::Channel`] – the secure framed transport with session
//!   resumption and opaque session-data commands.
//! - [`platform::Platform`] – clock, RNG, CRC, signalling, time set, and the
//!   firmware sink.
//! - [`descriptor::Descriptor`] – the device's registered functions,
//!   variables, event handlers, and persisted state selectors.
//!
//! **Dependency rule**: this layer depends only on `cloudlink-core` and its
//! own traits.  It MUST NOT import anything from `infrastructure`.
//!
//! # Scheduling model
//!
//! The whole engine is single-threaded and cooperative.  The outer system
//! loop repeatedly calls [`engine::Protocol::event_loop`]; the engine never
//! blocks indefinitely and never spawns threads, and every callback is
//! invoked synchronously from the calling context.  Timeouts are driven by
//! the platform's millisecond clock, not by timers.
//!
//! # Sub-modules
//!
//! - **`engine`**           – Dispatch engine and session orchestrator.
//! - **`ack_handlers`**     – Completion registry for outbound confirmable
//!   requests.
//! - **`describe`**         – Describe document builder and appenders.
//! - **`functions`**, **`variables`**, **`subscriptions`** – Request
//!   handlers for the application-level operations.
//! - **`chunked_transfer`** – Firmware update engine.
//! - **`pinger`**, **`timesync`** – Keepalive and time synchronisation.

pub mod ack_handlers;
pub mod channel;
pub mod chunked_transfer;
pub mod describe;
pub mod descriptor;
pub mod engine;
pub mod functions;
pub mod pinger;
pub mod platform;
pub mod subscriptions;
pub mod timesync;
pub mod variables;

pub use channel::{Channel, ProtocolError, SessionCommand, SessionOutcome};
pub use descriptor::Descriptor;
pub use engine::{Protocol, ProtocolConfig};
pub use platform::Platform;
