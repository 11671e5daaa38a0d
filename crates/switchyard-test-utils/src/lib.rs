//! Mocks and fixtures shared by the Switchyard test suites.

pub mod fixtures;
pub mod llm;
pub mod units;

pub use fixtures::{test_context, write_domain, HELLO_DOMAIN, REFLECTION_DOMAIN};
pub use llm::ScriptedLlm;
pub use units::register_mocks;
