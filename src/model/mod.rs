pub mod cache;
pub mod config;
pub mod controller;
pub mod discovery;
pub mod history;
pub mod registry;
pub mod runtime;

pub use controller::{ControllerDeps, LoadTrigger, ModelLifecycleController, ModelState};
