use std::fmt;

/// Progressive idle states, ordered from fully awake to asleep.
///
/// The ordering is load-bearing: a session only ever advances towards
/// deeper idleness, except for the explicit reset back to [`IdleMode::Normal`]
/// when the user touches an input device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum IdleMode {
    Normal,
    Dim,
    Blank,
    Sleep,
}

impl IdleMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Dim => "dim",
            Self::Blank => "blank",
            Self::Sleep => "sleep",
        }
    }
}

impl fmt::Display for IdleMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A transition is accepted only towards a strictly deeper idle state.
/// Resetting to `Normal` is always accepted; repeating the current state
/// or moving backwards (e.g. `Blank` to `Dim`) is not.
pub fn transition_allowed(current: IdleMode, target: IdleMode) -> bool {
    target == IdleMode::Normal || target > current
}
