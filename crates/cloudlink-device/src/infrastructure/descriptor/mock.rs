//! Mock descriptor with a shareable persisted-state store.
//!
//! In a real device, persisted application state lives inside the channel's
//! session data: the descriptor callback writes it through the save/load
//! session envelope, and the channel reads it back when asked for the
//! cached state descriptor.  [`SharedAppState`] reproduces that link for
//! tests: hand the same store to a [`MockDescriptor`] and a
//! [`crate::infrastructure::channel::mock::MockChannel`], and persists
//! become visible to the session cache exactly as they do on hardware.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use cloudlink_core::AppStateDescriptor;

use crate::application::describe::Appender;
use crate::application::descriptor::{
    AppStateSelector, AppStateUpdate, Descriptor, VariableType, VariableValue,
};

/// Persisted application-state checksums shared between mock adapters.
#[derive(Clone, Default)]
pub struct SharedAppState {
    persisted: Arc<Mutex<HashMap<AppStateSelector, u32>>>,
}

impl SharedAppState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a checksum, as the descriptor callback would on persist.
    pub fn persist(&self, selector: AppStateSelector, value: u32) {
        self.persisted
            .lock()
            .expect("lock poisoned")
            .insert(selector, value);
    }

    /// Reads a persisted checksum.
    pub fn get(&self, selector: AppStateSelector) -> Option<u32> {
        self.persisted
            .lock()
            .expect("lock poisoned")
            .get(&selector)
            .copied()
    }

    /// Builds the descriptor a channel would report as its session cache:
    /// each field present iff a value was persisted.
    pub fn descriptor(&self) -> AppStateDescriptor {
        let persisted = self.persisted.lock().expect("lock poisoned");
        let mut descriptor = AppStateDescriptor::new();
        if let Some(&crc) = persisted.get(&AppStateSelector::DescribeSystem) {
            descriptor = descriptor.with_system_describe_crc(crc);
        }
        if let Some(&crc) = persisted.get(&AppStateSelector::DescribeApp) {
            descriptor = descriptor.with_app_describe_crc(crc);
        }
        if let Some(&crc) = persisted.get(&AppStateSelector::Subscriptions) {
            descriptor = descriptor.with_subscriptions_crc(crc);
        }
        if let Some(&flags) = persisted.get(&AppStateSelector::ProtocolFlags) {
            descriptor = descriptor.with_protocol_flags(flags);
        }
        descriptor
    }
}

/// A mock implementation of [`Descriptor`] with fixed tables and full call
/// recording.
pub struct MockDescriptor {
    functions: Vec<(String, i32)>,
    variables: Vec<(String, VariableValue)>,
    system_info: Option<String>,
    metrics: Option<Vec<u8>>,
    ota_successful: bool,
    ota_status_sent: bool,
    state: Option<SharedAppState>,
    compute_crcs: HashMap<AppStateSelector, u32>,
    function_calls: Vec<(String, String)>,
    events: Vec<(String, Vec<u8>)>,
    selector_calls: Vec<(AppStateSelector, AppStateUpdate, u32)>,
}

impl MockDescriptor {
    pub fn new() -> Self {
        Self {
            functions: Vec::new(),
            variables: Vec::new(),
            system_info: None,
            metrics: None,
            ota_successful: false,
            ota_status_sent: false,
            state: None,
            compute_crcs: HashMap::new(),
            function_calls: Vec::new(),
            events: Vec::new(),
            selector_calls: Vec::new(),
        }
    }

    /// Registers a function returning `result` when called.
    pub fn with_function(mut self, key: &str, result: i32) -> Self {
        self.functions.push((key.to_string(), result));
        self
    }

    /// Registers a variable.
    pub fn with_variable(mut self, key: &str, value: VariableValue) -> Self {
        self.variables.push((key.to_string(), value));
        self
    }

    /// Adds a system-info section (field list without surrounding braces).
    pub fn with_system_info(mut self, info: &str) -> Self {
        self.system_info = Some(info.to_string());
        self
    }

    /// Adds a binary metrics blob.
    pub fn with_metrics(mut self, blob: Vec<u8>) -> Self {
        self.metrics = Some(blob);
        self
    }

    /// Enables state selectors backed by `state`, with the given current
    /// (computed) describe checksums.
    pub fn with_state(mut self, state: SharedAppState, system_crc: u32, app_crc: u32) -> Self {
        self.state = Some(state);
        self.compute_crcs
            .insert(AppStateSelector::DescribeSystem, system_crc);
        self.compute_crcs
            .insert(AppStateSelector::DescribeApp, app_crc);
        self
    }

    pub fn with_ota_successful(mut self, successful: bool) -> Self {
        self.ota_successful = successful;
        self
    }

    /// Changes a current (computed) checksum, simulating a changed document.
    pub fn set_compute_crc(&mut self, selector: AppStateSelector, crc: u32) {
        self.compute_crcs.insert(selector, crc);
    }

    /// Recorded function invocations as `(key, argument)` pairs.
    pub fn function_calls(&self) -> &[(String, String)] {
        &self.function_calls
    }

    /// Recorded event deliveries as `(name, data)` pairs.
    pub fn events(&self) -> &[(String, Vec<u8>)] {
        &self.events
    }

    /// Recorded state-selector invocations.
    pub fn selector_calls(&self) -> &[(AppStateSelector, AppStateUpdate, u32)] {
        &self.selector_calls
    }

    pub fn ota_status_sent(&self) -> bool {
        self.ota_status_sent
    }
}

impl Default for MockDescriptor {
    fn default() -> Self {
        Self::new()
    }
}

impl Descriptor for MockDescriptor {
    fn num_functions(&self) -> usize {
        self.functions.len()
    }

    fn function_key(&self, index: usize) -> &str {
        &self.functions[index].0
    }

    fn call_function(&mut self, key: &str, arg: &str) -> Option<i32> {
        let result = self
            .functions
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, result)| *result)?;
        self.function_calls.push((key.to_string(), arg.to_string()));
        Some(result)
    }

    fn num_variables(&self) -> usize {
        self.variables.len()
    }

    fn variable_key(&self, index: usize) -> &str {
        &self.variables[index].0
    }

    fn variable_type(&self, key: &str) -> VariableType {
        self.variables
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, value)| value.variable_type())
            .unwrap_or(VariableType::Int)
    }

    fn variable_value(&self, key: &str) -> Option<VariableValue> {
        self.variables
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, value)| value.clone())
    }

    fn call_event_handler(&mut self, event: &str, data: &[u8]) {
        self.events.push((event.to_string(), data.to_vec()));
    }

    fn was_ota_upgrade_successful(&self) -> bool {
        self.ota_successful
    }

    fn ota_upgrade_status_sent(&mut self) {
        self.ota_status_sent = true;
    }

    fn supports_system_info(&self) -> bool {
        self.system_info.is_some()
    }

    fn append_system_info(&self, out: &mut dyn Appender) {
        if let Some(info) = &self.system_info {
            out.append_str(info);
        }
    }

    fn supports_metrics(&self) -> bool {
        self.metrics.is_some()
    }

    fn append_metrics(&self, out: &mut dyn Appender, _flags: u32, _page: u32) {
        if let Some(blob) = &self.metrics {
            out.append(blob);
        }
    }

    fn supports_state_selectors(&self) -> bool {
        self.state.is_some()
    }

    fn app_state_selector(
        &mut self,
        selector: AppStateSelector,
        op: AppStateUpdate,
        value: u32,
    ) -> u32 {
        self.selector_calls.push((selector, op, value));
        let Some(state) = &self.state else {
            return 0;
        };
        match op {
            AppStateUpdate::Compute => self.compute_crcs.get(&selector).copied().unwrap_or(0),
            AppStateUpdate::Persist => {
                state.persist(selector, value);
                value
            }
            AppStateUpdate::ComputeAndPersist => {
                let crc = self.compute_crcs.get(&selector).copied().unwrap_or(0);
                state.persist(selector, crc);
                crc
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_state_links_persist_to_cached_descriptor() {
        let state = SharedAppState::new();
        let mut descriptor = MockDescriptor::new().with_state(state.clone(), 0xAA, 0xBB);

        // Nothing persisted yet: cache is empty.
        assert_eq!(state.descriptor(), AppStateDescriptor::new());

        descriptor.app_state_selector(
            AppStateSelector::DescribeSystem,
            AppStateUpdate::ComputeAndPersist,
            0,
        );

        assert_eq!(state.descriptor().system_describe_crc(), Some(0xAA));
    }

    #[test]
    fn test_unknown_function_not_recorded() {
        let mut descriptor = MockDescriptor::new().with_function("led", 1);
        assert_eq!(descriptor.call_function("nope", ""), None);
        assert!(descriptor.function_calls().is_empty());
    }

    #[test]
    fn test_persist_stores_supplied_value() {
        let state = SharedAppState::new();
        let mut descriptor = MockDescriptor::new().with_state(state.clone(), 0, 0);
        descriptor.app_state_selector(
            AppStateSelector::ProtocolFlags,
            AppStateUpdate::Persist,
            0x02,
        );
        assert_eq!(state.get(AppStateSelector::ProtocolFlags), Some(0x02));
    }
}
