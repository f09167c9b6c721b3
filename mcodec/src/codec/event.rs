use crate::{codec::BufferInfo, format::MediaFormat};
use std::fmt;

/// What the client has to do after an asynchronous codec error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionCode {
    /// Buffer exchange may continue.
    Recoverable,
    /// `stop()`, `configure()` and `start()` are required before exchanging buffers again.
    Reconfigure,
    /// The session must be released.
    Fatal,
}

impl fmt::Display for ActionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::Recoverable => "recoverable",
                Self::Reconfigure => "reconfigure",
                Self::Fatal => "fatal",
            }
        )
    }
}

/// Asynchronous failure reported by the native codec.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("codec error {code} ({action}): {detail}")]
pub struct CodecError {
    pub code: i32,
    pub action: ActionCode,
    pub detail: String,
}

impl CodecError {
    pub fn is_fatal(&self) -> bool {
        self.action == ActionCode::Fatal
    }
}

/// Notification delivered through a session's event channel.
#[derive(Debug, Clone, PartialEq)]
pub enum CodecEvent {
    /// Input slot `index` is owned by the client until queued.
    InputAvailable { index: usize },
    /// Output slot `index` is owned by the client until released.
    OutputAvailable { index: usize, info: BufferInfo },
    /// Output format changed, earlier output formats are stale.
    OutputFormatChanged { format: MediaFormat },
    Error(CodecError),
}

impl CodecEvent {
    /// Call the `sink` method matching this event.
    pub fn dispatch<S: EventSink + ?Sized>(self, sink: &mut S) {
        match self {
            Self::InputAvailable { index } => sink.on_input_available(index),
            Self::OutputAvailable { index, info } => sink.on_output_available(index, info),
            Self::OutputFormatChanged { format } => sink.on_output_format_changed(format),
            Self::Error(error) => sink.on_error(error),
        }
    }
}

/// Consumer side handler with one method per notification kind.
pub trait EventSink {
    fn on_input_available(&mut self, index: usize);
    fn on_output_available(&mut self, index: usize, info: BufferInfo);
    fn on_output_format_changed(&mut self, format: MediaFormat);
    fn on_error(&mut self, error: CodecError);
}
