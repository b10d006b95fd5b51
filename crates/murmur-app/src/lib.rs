//! Shared application plumbing for the murmur flock shell.

use std::sync::{Arc, Mutex};

use murmur_core::FlockWorld;

pub type SharedWorld = Arc<Mutex<FlockWorld>>;

pub mod command;
pub mod control;
pub mod runtime;

pub use command::{CommandReceiver, CommandSender, create_command_bus, drain_pending_commands};
pub use control::{ConfigSnapshot, ControlError, ControlHandle, KnobEntry, KnobKind, KnobUpdate};
pub use runtime::{RunnerSettings, TickRunner};
