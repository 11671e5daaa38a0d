pub mod config;
pub mod context;
pub mod error;
pub mod registry;
pub mod state;
pub mod traits;
pub mod types;
pub mod unit;

pub use config::{AppConfig, StateBackendKind};
pub use context::ExecutionContext;
pub use error::{Result, SwitchyardError};
pub use registry::{UnitArgs, UnitFactory, UnitRegistry};
pub use state::{MemoryBackend, SessionHandle, StateStore};
pub use types::*;
pub use unit::{invoke, CapabilityUnit};
