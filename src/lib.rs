pub mod cli;
pub mod clock;
pub mod cooldown;
pub mod forward;
pub mod http;
pub mod launch;
pub mod remote;
pub mod settings;
pub mod shortcut;

#[cfg(test)]
mod testing;

pub use cooldown::{Controller, Request, Status, TriggerSource, COOLDOWN};
pub use launch::{ExternalTrigger, LaunchContext};
pub use settings::Settings;
