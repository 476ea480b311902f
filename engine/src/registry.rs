use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use mc6_storage::{BackendContract, LogPosition};

use crate::errors::EngineError;

/// A registered host function: `(handle, position, table, args) -> reply`.
/// Dynamic dispatch by `(module, function)` identifier, avoiding any need
/// for reflective runtime lookup.
pub type HostFunction<B> =
    Arc<dyn Fn(&mut B, LogPosition, &str, &[u8]) -> Result<Vec<u8>, EngineError> + Send + Sync>;

/// Maps `(module, function)` identifiers to host-provided functions
/// invoked by `Command::Execute`.
pub struct FunctionRegistry<B: BackendContract> {
    functions: HashMap<(String, String), HostFunction<B>>,
}

impl<B: BackendContract> Default for FunctionRegistry<B> {
    fn default() -> Self {
        Self {
            functions: HashMap::new(),
        }
    }
}

impl<B: BackendContract> FunctionRegistry<B> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        module: impl Into<String>,
        function: impl Into<String>,
        f: impl Fn(&mut B, LogPosition, &str, &[u8]) -> Result<Vec<u8>, EngineError> + Send + Sync + 'static,
    ) {
        self.functions
            .insert((module.into(), function.into()), Arc::new(f));
    }

    /// Invoke the named function, catching panics and converting them into
    /// `EngineError::ExecuteFailed`, matching the requirement that `Execute`
    /// never poisons the engine.
    pub fn invoke(
        &self,
        module: &str,
        function: &str,
        handle: &mut B,
        position: LogPosition,
        table: &str,
        args: &[u8],
    ) -> Result<Vec<u8>, EngineError> {
        let f = self
            .functions
            .get(&(module.to_string(), function.to_string()))
            .ok_or_else(|| EngineError::UnknownFunction {
                module: module.to_string(),
                function: function.to_string(),
            })?
            .clone();

        let result = catch_unwind(AssertUnwindSafe(|| f(handle, position, table, args)));
        match result {
            Ok(reply) => reply.map_err(|e| EngineError::ExecuteFailed {
                module: module.to_string(),
                function: function.to_string(),
                cause: e.to_string(),
            }),
            Err(panic) => {
                let cause = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "panic in host function".to_string());
                Err(EngineError::ExecuteFailed {
                    module: module.to_string(),
                    function: function.to_string(),
                    cause,
                })
            }
        }
    }
}
