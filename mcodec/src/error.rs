//! Error types for codec sessions and content protection.

use crate::{codec::CodecState, drm::SchemeId};
use thiserror::Error;

/// Errors returned synchronously by session, format and crypto operations.
///
/// Asynchronous codec failures never show up here, they are delivered as
/// [`CodecEvent::Error`](crate::codec::CodecEvent::Error) through the event channel.
#[derive(Debug, Error)]
pub enum Error {
    /// The session was released, no further operations are possible.
    #[error("session released")]
    Released,

    /// Operation is not legal in the current session state.
    #[error("cannot {operation} while session is {state}")]
    InvalidState {
        operation: &'static str,
        state: CodecState,
    },

    /// Input buffer index is not currently owned by the client.
    #[error("input buffer {0} is not owned by the client")]
    InputNotOwned(usize),

    /// Output buffer index is not currently owned by the client.
    #[error("output buffer {0} is not owned by the client")]
    OutputNotOwned(usize),

    /// Byte range does not fit into the buffer slot.
    #[error("byte range {offset}+{size} exceeds buffer capacity of {capacity} bytes")]
    InvalidRange {
        offset: usize,
        size: usize,
        capacity: usize,
    },

    /// A required format key is missing or has the wrong type.
    #[error("format is missing required key '{0}'")]
    MissingKey(&'static str),

    /// No event channel was registered before starting the session.
    #[error("no event channel registered - call events() before start()")]
    NoEventChannel,

    /// Secure input was queued but no crypto context is attached.
    #[error("no crypto context attached to the session")]
    NoCrypto,

    /// A codec error demanded stop, configure and start before more buffers are exchanged.
    #[error("codec requires reconfiguration after an asynchronous error")]
    ReconfigureRequired,

    /// Destination buffer handed to a copying getter is too small.
    #[error("destination too small: need {expected} elements, got {actual}")]
    DestinationTooSmall { expected: usize, actual: usize },

    /// The stream requires a secure decoder but the session is not a secure variant.
    #[error("'{0}' requires a secure decoder component")]
    SecureDecoderRequired(String),

    /// No registered codec has the given component name.
    #[error("no codec named '{0}'")]
    CodecNotFound(String),

    /// No registered decoder handles the given mime type.
    #[error("no decoder available for mime type '{0}'")]
    UnsupportedMime(String),

    /// The content protection platform does not support the scheme.
    #[error("unsupported crypto scheme {0}")]
    UnsupportedScheme(SchemeId),

    /// The DRM handle or crypto context was released.
    #[error("crypto object released")]
    CryptoReleased,

    /// Initialization data for a crypto session could not be parsed.
    #[error("invalid crypto init data: {0}")]
    InvalidInitData(String),

    /// No key is loaded for the key id of a sample.
    #[error("key not found for KID: {0}")]
    KeyNotFound(String),

    /// Subsample layout does not match the sample data.
    #[error("subsample data error: {0}")]
    Subsample(String),

    /// A message could not be converted to a format.
    #[error("invalid format message: {0}")]
    InvalidMessage(String),

    /// Invalid hex string.
    #[error("invalid hex string: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    /// Invalid json document.
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),

    /// Failure reported synchronously by the codec backend.
    #[error("codec backend failure: {0}")]
    Backend(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns true if the error was caused by incorrect use of the API.
    ///
    /// Usage errors never change session state and are fixed by the caller.
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            Self::Released
                | Self::InvalidState { .. }
                | Self::InputNotOwned(_)
                | Self::OutputNotOwned(_)
                | Self::InvalidRange { .. }
                | Self::MissingKey(_)
                | Self::NoEventChannel
                | Self::NoCrypto
                | Self::ReconfigureRequired
                | Self::DestinationTooSmall { .. }
                | Self::CryptoReleased
        )
    }

    /// Returns true if the error reports a missing or unsupported resource.
    pub fn is_resource_error(&self) -> bool {
        matches!(
            self,
            Self::SecureDecoderRequired(_)
                | Self::CodecNotFound(_)
                | Self::UnsupportedMime(_)
                | Self::UnsupportedScheme(_)
                | Self::Backend(_)
                | Self::Io(_)
        )
    }
}

/// A `Result` alias where the `Err` case is `mcodec::Error`.
pub type Result<T> = std::result::Result<T, Error>;
