//! Session lifecycle: kernel controller, registry, and idle reclamation.

pub mod controller;
pub mod notebook;
pub mod reclaimer;
pub mod registry;

pub use controller::{KernelSession, Readiness};
pub use registry::SessionRegistry;
