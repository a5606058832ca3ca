//! Zone shards: the single-writer instance state and the actor that owns it.

pub mod actor;
pub mod command;
pub mod instance;

pub use actor::{ZoneActor, ZoneExit, ZoneHandle, ZoneMessage};
pub use command::ZoneCommand;
pub use instance::{ZoneEntry, ZoneInstance, ZoneLifecycle, ZoneSnapshot, ZoneStats};
