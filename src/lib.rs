//! ==============================================================================
//! sensor-hub - runtime sensor, alarm and webhook registry for a pi sensor hub
//! ==============================================================================
//!
//! the library half of the binary: main.rs wires these modules together, the
//! integration tests drive them through the rest router.
//!
//! ==============================================================================

pub mod alarms;
pub mod api;
pub mod config;
pub mod domain;
pub mod error;
pub mod hal;
pub mod hub;
pub mod notify;
pub mod onewire;
pub mod readings;
pub mod registry;
pub mod scheduler;
pub mod storage;
