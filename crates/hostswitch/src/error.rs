use thiserror::Error;

/// A required setting is missing or malformed. Always fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting `{0}`")]
    Missing(&'static str),

    #[error("invalid value for `{field}`: {message}")]
    Invalid { field: &'static str, message: String },

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

/// An OS-level side effect could not be carried out.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("no command configured for {0}")]
    Unsupported(String),

    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{program}` exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: std::process::ExitStatus,
        stderr: String,
    },

    #[error("{0}")]
    Other(String),
}

/// The broker connection refused an operation.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("MQTT client not connected, call connect() first")]
    NotConnected,

    #[error("MQTT client error: {0}")]
    Client(#[from] rumqttc::ClientError),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Action(#[from] ActionError),

    #[error("failed to encode discovery document: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("entity topic prefix `{0}` registered twice")]
    DuplicateEntity(String),

    #[error("no entity or hub status handler for topic `{0}`")]
    UnroutableTopic(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
