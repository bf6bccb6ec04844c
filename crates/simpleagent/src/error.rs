/// Errors while assembling a session.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The configuration file is unusable.
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
    /// A tool server could not be started or restarted.
    #[error(transparent)]
    Remote(#[from] simpleagent_remote::Error),
    /// The tools or options do not fit together.
    #[error(transparent)]
    Registry(#[from] simpleagent_core::ConfigError),
}

impl Error {
    /// Returns `true` if the error is caused by the configuration rather
    /// than by the environment.
    pub fn is_config_error(&self) -> bool {
        match self {
            Error::Config(_) | Error::Registry(_) => true,
            Error::Remote(err) => err.is_config_error(),
        }
    }
}
