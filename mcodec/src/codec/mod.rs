//! Codec sessions and their asynchronous buffer exchange.
//!
//! A [`CodecSession`] owns one native codec instance ([`CodecBackend`]) and
//! walks it through the state machine below. Buffers are exchanged by index:
//! an index announced through [`CodecEvent::InputAvailable`] or
//! [`CodecEvent::OutputAvailable`] belongs to the client until it is queued or
//! released, everything else belongs to the codec.
//!
//! ```text
//! Uninitialized --configure--> Configured --start--> Started --stop--> Stopped
//!                                                    |    ^             |
//!                                                 flush   |             configure
//!                                                    v    |             v
//!                                                   Flushed           Configured
//!
//! any --release--> Released      any --fatal error event--> Error
//! ```
//!
//! # Example
//!
//! ```
//! use mcodec::codec::{CodecEvent, CodecSession};
//! use mcodec::format::{keys, MediaFormat};
//!
//! let mut session = CodecSession::create_decoder_by_type("video/avc")?;
//! let mut format = MediaFormat::new();
//! format.set_string(keys::MIME, "video/avc");
//!
//! session.configure(&format, None, None, 0)?;
//! let events = session.events()?;
//! session.start()?;
//!
//! while let Some(event) = events.recv() {
//!     if let CodecEvent::InputAvailable { index } = event {
//!         session.get_input_buffer(index)?[..4].copy_from_slice(b"data");
//!         session.queue_input_buffer(index, 0, 4, 0, 0)?;
//!         break;
//!     }
//! }
//!
//! session.release();
//! # Ok::<(), mcodec::Error>(())
//! ```

mod backend;
mod bridge;
mod buffer;
mod event;
mod registry;
mod session;
mod software;
mod state;

pub use backend::{CodecBackend, NativeListener, RenderTarget, Surface};
pub use bridge::Events;
pub use buffer::{BufferInfo, BufferPool, SlotGuard, flags};
pub use event::{ActionCode, CodecError, CodecEvent, EventSink};
pub use registry::{CodecInfo, codecs, register_codec};
pub use session::CodecSession;
pub use software::{ERROR_DECRYPT, SoftwareCodec};
pub use state::CodecState;
