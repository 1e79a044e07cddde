//! The `config` module loads settings and holds the immutable link
//! configuration shared by the connection manager, publisher and consumer.

mod link;
mod settings;

use crate::config::settings::PartialSettings;
use crate::utils::Result;
use config::{Config, Environment, File};

pub use link::LinkConfig;
pub use settings::{LinkSettings, LogSettings, Settings, WorkerSettings};

/// Environment variables are read as `BROKERLINK_<SECTION>__<KEY>`,
/// e.g. `BROKERLINK_LINK__TOPIC_PREFIX=orders`.
pub const ENV_PREFIX: &str = "BROKERLINK";

/// Loads the configuration from the default file and environment variables
/// Merges the configuration with default values
pub fn load_config() -> Result<Settings> {
    load_config_from("config/default")
}

/// Same as `load_config`, reading the optional file at `path` (extension
/// resolved by the `config` crate).
pub fn load_config_from(path: &str) -> Result<Settings> {
    let builder = Config::builder()
        .add_source(File::with_name(path).required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    Ok(partial.merge(Settings::default()))
}

#[cfg(test)]
mod tests;
