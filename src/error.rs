use thiserror::Error;

/// Library error type for daemon startup and platform access.
#[derive(Debug, Error)]
pub enum Error {
    /// The system sleep transport (logind) is unreachable. Without it the
    /// daemon cannot suspend, inhibit, or track sleep, so startup fails.
    #[error("system sleep transport unavailable: {0}")]
    NoSleepTransport(String),

    /// No readable input devices to watch for user activity.
    #[error("no input devices available for activity detection")]
    NoActivitySource,

    /// The display backlight rejected or lacks a brightness control.
    #[error("no display backlight control available")]
    NoBacklight,

    /// No keyboard backlight on this machine.
    #[error("no keyboard backlight available")]
    NoKeyboardBacklight,

    /// Underlying IO error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// YAML/serde configuration error.
    #[error(transparent)]
    Config(#[from] serde_yaml::Error),

    /// D-Bus call failure against a collaborator service.
    #[error("bus call failed: {0}")]
    Bus(#[from] zbus::Error),

    /// Any other contextual startup failure.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contextual_failures_convert_into_the_startup_taxonomy() {
        let err: Error = anyhow::anyhow!("session bus unreachable").into();
        assert!(err.to_string().contains("session bus unreachable"));
        let err: Error = zbus::Error::InvalidReply.into();
        assert!(matches!(err, Error::Bus(_)));
    }
}
