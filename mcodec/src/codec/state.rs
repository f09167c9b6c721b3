use std::fmt;

/// Lifecycle state of a [`CodecSession`](super::CodecSession).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum CodecState {
    #[default]
    Uninitialized,
    Configured,
    Started,
    /// Transient state while the codec discards buffers during a flush.
    Flushed,
    Stopped,
    Released,
    /// Unrecoverable asynchronous failure, the session can only be released.
    Error,
}

impl CodecState {
    /// Whether buffers are exchanged in this state.
    pub fn is_executing(self) -> bool {
        self == Self::Started
    }

    /// Whether `configure` is accepted in this state.
    pub fn is_configurable(self) -> bool {
        matches!(self, Self::Uninitialized | Self::Stopped)
    }

    /// Whether a configuration is currently applied.
    pub fn is_configured(self) -> bool {
        matches!(self, Self::Configured | Self::Started | Self::Flushed)
    }
}

impl fmt::Display for CodecState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::Uninitialized => "uninitialized",
                Self::Configured => "configured",
                Self::Started => "started",
                Self::Flushed => "flushed",
                Self::Stopped => "stopped",
                Self::Released => "released",
                Self::Error => "in error",
            }
        )
    }
}
