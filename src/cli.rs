//! Command-line interface for door-trigger.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::launch::LaunchContext;

pub const DEFAULT_LISTEN: &str = "127.0.0.1:8839";

/// door-trigger - open a door by sending one HTTP GET
#[derive(Parser, Debug)]
#[command(name = "door-trigger")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Settings file (default: $DOOR_TRIGGER_SETTINGS or the user config dir)
    #[arg(long, value_name = "PATH", global = true)]
    pub settings: Option<PathBuf>,

    /// Log level sent to syslog
    #[arg(long, value_enum, value_name = "LEVEL", default_value = "info", global = true)]
    pub log_level: LogLevelArg,

    /// Address for the control page
    #[arg(long, value_name = "ADDR", default_value = DEFAULT_LISTEN)]
    pub listen: String,

    /// Fire the launch trigger (if any), print the result and exit without serving
    #[arg(long)]
    pub once: bool,

    /// Launch action; contains OPEN_APP_FEATURE to open the door at start
    #[arg(long, value_name = "ACTION")]
    pub action: Option<String>,

    /// Launch URI, e.g. doortrigger://openMainDoor
    #[arg(value_name = "URI")]
    pub uri: Option<String>,
}

impl Cli {
    pub fn launch_context(&self) -> LaunchContext {
        LaunchContext::new(self.action.clone(), self.uri.clone())
    }
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum LogLevelArg {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevelArg {
    pub fn to_level_filter(self) -> log::LevelFilter {
        match self {
            LogLevelArg::Off => log::LevelFilter::Off,
            LogLevelArg::Error => log::LevelFilter::Error,
            LogLevelArg::Warn => log::LevelFilter::Warn,
            LogLevelArg::Info => log::LevelFilter::Info,
            LogLevelArg::Debug => log::LevelFilter::Debug,
            LogLevelArg::Trace => log::LevelFilter::Trace,
        }
    }
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Save the URL that opens the door
    SetUrl {
        /// Stored verbatim, no validation
        url: String,
    },

    /// Print the saved URL
    GetUrl,

    /// Install a desktop shortcut that opens the door
    InstallShortcut {
        /// Target directory (default: the user's applications directory)
        dir: Option<PathBuf>,
    },

    /// Remove the desktop shortcut
    UninstallShortcut {
        /// Directory it was installed to (default: the user's applications directory)
        dir: Option<PathBuf>,
    },
}
