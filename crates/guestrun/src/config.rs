//! Runtime configuration.

/// Names and limits shared by every instance a [`Runtime`](crate::Runtime)
/// creates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Instruction budget per instance. `None` runs unmetered.
    pub fuel: Option<u64>,
    /// Guest export used to reserve memory for buffers handed to the guest.
    pub allocator: String,
    /// Guest linear memory export.
    pub memory: String,
    /// Command entry point.
    pub start: String,
    /// Reactor entry point, used when there is no command entry point.
    pub initialize: String,
    /// Slots in a fresh handle table.
    pub handle_capacity: usize,
}

impl Config {
    pub fn new() -> Self {
        Self {
            fuel: None,
            allocator: "malloc".to_string(),
            memory: "memory".to_string(),
            start: "_start".to_string(),
            initialize: "_initialize".to_string(),
            handle_capacity: hostref::MIN_CAPACITY,
        }
    }

    pub fn fuel(mut self, fuel: u64) -> Self {
        self.fuel = Some(fuel);
        self
    }

    pub fn allocator(mut self, name: impl Into<String>) -> Self {
        self.allocator = name.into();
        self
    }

    pub fn memory(mut self, name: impl Into<String>) -> Self {
        self.memory = name.into();
        self
    }

    pub fn handle_capacity(mut self, capacity: usize) -> Self {
        self.handle_capacity = capacity;
        self
    }

    pub(crate) fn engine_config(&self) -> wasmtime::Config {
        let mut config = wasmtime::Config::new();
        config.consume_fuel(self.fuel.is_some());
        config
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}
