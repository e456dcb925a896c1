pub mod cleanup;
pub mod config_loader;
pub mod db;
pub mod deploy;
pub mod env_store;
pub mod health;
pub mod history;
pub mod locks;
pub mod ports;
pub mod probe;
pub mod projects;
pub mod promote;
pub mod proxy;
pub mod rollback;
pub mod runtime;
pub mod slot_manager;
pub mod state;
pub mod steps;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use slot_manager::{Collaborators, SlotManager};
