use crate::{
    Result,
    codec::{ActionCode, BufferInfo, SlotGuard},
    drm::{CryptoInfo, MediaCrypto},
    format::MediaFormat,
};
use std::{fmt, sync::Arc};

/// Receiver of raw notifications raised by a [`CodecBackend`].
///
/// Backends call these from their own threads, never from inside a call made by the session.
pub trait NativeListener: Send + Sync {
    fn on_input_available(&self, index: usize);
    fn on_output_available(&self, index: usize, info: BufferInfo);
    fn on_output_format_changed(&self, format: MediaFormat);
    fn on_error(&self, code: i32, action: ActionCode, detail: &str);
}

/// Something decoded frames can be presented on.
pub trait RenderTarget: Send + Sync {
    fn queue_frame(&self, frame: &[u8], presentation_time_ns: i64);
}

/// Render sink handed to a codec, sessions pass it through untouched.
#[derive(Clone)]
pub struct Surface(Arc<dyn RenderTarget>);

impl Surface {
    pub fn new(target: Arc<dyn RenderTarget>) -> Self {
        Self(target)
    }

    pub fn render(&self, frame: &[u8], presentation_time_ns: i64) {
        self.0.queue_frame(frame, presentation_time_ns);
    }
}

impl fmt::Debug for Surface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Surface({:p})", Arc::as_ptr(&self.0))
    }
}

/// Native codec instance driven by a [`CodecSession`](super::CodecSession).
///
/// The session validates state and buffer ownership before calling in, a
/// backend only checks what it alone knows about (slot ranges, its own resources).
pub trait CodecBackend: Send {
    /// Component name.
    fn name(&self) -> &str;

    fn set_listener(&mut self, listener: Option<Arc<dyn NativeListener>>);

    fn configure(
        &mut self,
        format: &MediaFormat,
        surface: Option<Surface>,
        crypto: Option<Arc<MediaCrypto>>,
        flags: u32,
    ) -> Result<()>;

    /// Begin or resume processing. Every free input slot is announced again.
    fn start(&mut self) -> Result<()>;

    /// Stop processing and drop the configuration. Returns once no more notifications follow.
    fn stop(&mut self) -> Result<()>;

    /// Discard all queued and pending buffers.
    ///
    /// Must not return before notifications raised ahead of the flush are delivered.
    /// Processing stays paused until the next [`start`](Self::start).
    fn flush(&mut self) -> Result<()>;

    fn input_buffer(&self, index: usize) -> Option<SlotGuard<'_>>;

    fn output_buffer(&self, index: usize) -> Option<SlotGuard<'_>>;

    fn queue_input(
        &mut self,
        index: usize,
        offset: usize,
        size: usize,
        presentation_time_us: i64,
        flags: u32,
    ) -> Result<()>;

    fn queue_secure_input(
        &mut self,
        index: usize,
        offset: usize,
        info: CryptoInfo,
        presentation_time_us: i64,
        flags: u32,
    ) -> Result<()>;

    /// Return an output slot, rendering it first when `render` is set.
    fn release_output(
        &mut self,
        index: usize,
        render: bool,
        timestamp_ns: Option<i64>,
    ) -> Result<()>;

    fn input_format(&self) -> Result<MediaFormat>;

    fn output_format(&self) -> Result<MediaFormat>;

    fn set_output_surface(&mut self, surface: Surface) -> Result<()>;

    /// Apply a live parameter update, unknown keys are ignored.
    fn set_parameters(&mut self, params: &MediaFormat) -> Result<()>;

    fn release_crypto(&mut self) -> Result<()>;

    /// Tear down all resources, blocking until internal threads have exited.
    fn release(&mut self);
}
