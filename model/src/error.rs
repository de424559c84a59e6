use snafu::Snafu;
use std::path::PathBuf;

/// The error type for the model crate. Every variant is a configuration problem that is detected
/// before any deployment is attempted.
#[derive(Debug, Snafu)]
pub struct Error(OpaqueError);
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub(crate) enum OpaqueError {
    #[snafu(display("Invalid service kind '{}': {}", value, reason))]
    InvalidKind { value: String, reason: &'static str },

    #[snafu(display("Unable to read credentials file '{}': {}", path.display(), source))]
    ReadCredentials {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Unable to parse credentials file '{}': {}", path.display(), source))]
    ParseCredentials {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[snafu(display("No credentials with id '{}' in '{}'", id, path.display()))]
    MissingCredentials { id: String, path: PathBuf },

    #[snafu(display("Unable to deserialize credentials '{}': {}", id, source))]
    DeserializeCredentials {
        id: String,
        source: serde_yaml::Error,
    },

    #[snafu(display(
        "Credentials '{}' were requested but no credentials file is configured, set '{}'",
        id,
        env
    ))]
    NoCredentialsFile { id: String, env: &'static str },

    #[snafu(display("Unknown {} '{}'", what, name))]
    UnknownName { what: &'static str, name: String },

    #[snafu(display("Unable to read settings from the environment: {}", source))]
    Settings { source: envy::Error },
}
