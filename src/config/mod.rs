//! Configuration loading and ceilings.

mod settings;

pub use settings::{
    CompilerSettings, ConnectionSettings, GovernorSettings, PoolSettings, Settings, SettingsError,
};
