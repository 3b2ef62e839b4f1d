//! The descriptor port: the device's registered surface.
//!
//! The descriptor is how the engine sees the application: which functions
//! and variables are registered, how to invoke them, how to dispatch
//! subscribed events, and how to compute and persist the state checksums
//! that make describe elision possible.
//!
//! Optional capabilities (system info, metrics, state selectors) follow a
//! `supports_*` / operation pair so implementations without them keep the
//! default no-op bodies, the trait-level equivalent of a null-checked
//! callback table.

use crate::application::describe::Appender;

/// Wire type codes of registered variables, emitted into the describe
/// document as the ASCII digit `'0' + value`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum VariableType {
    Bool = 1,
    Int = 2,
    String = 4,
    Double = 9,
}

/// A variable value returned to the cloud.
#[derive(Debug, Clone, PartialEq)]
pub enum VariableValue {
    Bool(bool),
    Int(i32),
    Double(f64),
    Str(String),
}

impl VariableValue {
    /// The wire type code of this value.
    pub fn variable_type(&self) -> VariableType {
        match self {
            VariableValue::Bool(_) => VariableType::Bool,
            VariableValue::Int(_) => VariableType::Int,
            VariableValue::Double(_) => VariableType::Double,
            VariableValue::Str(_) => VariableType::String,
        }
    }
}

/// Which slice of persisted application state a selector call addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AppStateSelector {
    DescribeSystem,
    DescribeApp,
    Subscriptions,
    ProtocolFlags,
}

/// What a selector call should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppStateUpdate {
    /// Compute the current checksum without touching persisted state.
    Compute,
    /// Persist the supplied value.
    Persist,
    /// Compute the current checksum and persist it in one step.
    ComputeAndPersist,
}

/// The device application surface.
pub trait Descriptor {
    /// Number of registered cloud functions.
    fn num_functions(&self) -> usize;

    /// Key of the `index`-th registered function.
    fn function_key(&self, index: usize) -> &str;

    /// Invokes a registered function with its string argument.  Returns
    /// `None` for an unknown key.
    fn call_function(&mut self, key: &str, arg: &str) -> Option<i32>;

    /// Number of registered cloud variables.
    fn num_variables(&self) -> usize;

    /// Key of the `index`-th registered variable.
    fn variable_key(&self, index: usize) -> &str;

    /// Declared type of a registered variable.
    fn variable_type(&self, key: &str) -> VariableType;

    /// Reads a variable.  Returns `None` for an unknown key.
    fn variable_value(&self, key: &str) -> Option<VariableValue>;

    /// Delivers a subscribed event to the application.
    fn call_event_handler(&mut self, event: &str, data: &[u8]);

    /// Whether the previous OTA update completed successfully; reported in
    /// the HELLO flags.
    fn was_ota_upgrade_successful(&self) -> bool;

    /// Called once the cloud has acknowledged the OTA status carried in the
    /// HELLO exchange.
    fn ota_upgrade_status_sent(&mut self);

    /// Whether a system-info section can be appended to describe documents.
    fn supports_system_info(&self) -> bool {
        false
    }

    /// Appends the system-info fields (without surrounding braces) to the
    /// describe document.
    fn append_system_info(&self, _out: &mut dyn Appender) {}

    /// Whether a binary metrics document can be produced.
    fn supports_metrics(&self) -> bool {
        false
    }

    /// Appends the binary metrics blob.
    fn append_metrics(&self, _out: &mut dyn Appender, _flags: u32, _page: u32) {}

    /// Whether persisted state selectors are available.  Without them the
    /// engine cannot elide describes and always performs the full exchange.
    fn supports_state_selectors(&self) -> bool {
        false
    }

    /// Computes and/or persists one slice of application state, returning
    /// the resulting checksum (or the persisted `value` for plain persists).
    fn app_state_selector(
        &mut self,
        _selector: AppStateSelector,
        _op: AppStateUpdate,
        _value: u32,
    ) -> u32 {
        0
    }
}
