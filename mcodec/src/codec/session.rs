use crate::{
    Error, Result,
    codec::{
        BufferInfo, CodecBackend, CodecError, CodecEvent, CodecState, SlotGuard, Surface,
        bridge::{EventBridge, Events, SessionShared, Shared},
        registry,
    },
    drm::{CryptoInfo, MediaCrypto},
    format::{MediaFormat, keys},
};
use log::{debug, info, warn};
use std::sync::{Arc, MutexGuard};

/// A decoder instance and its buffer exchange state machine.
///
/// All calls are expected from one consumer thread. Notifications arrive
/// through the [`Events`] handle returned by [`events`](Self::events).
pub struct CodecSession {
    name: String,
    secure: bool,
    backend: Box<dyn CodecBackend>,
    shared: Shared,
    crypto: Option<Arc<MediaCrypto>>,
}

impl CodecSession {
    /// Create the registered component called `name`.
    pub fn create_by_name(name: &str) -> Result<Self> {
        let info = registry::find_by_name(name).ok_or_else(|| Error::CodecNotFound(name.to_owned()))?;
        Ok(Self::from_backend(info.create(), info.is_secure()))
    }

    /// Create the first non secure decoder registered for `mime`.
    pub fn create_decoder_by_type(mime: &str) -> Result<Self> {
        let info = registry::find_decoder(mime).ok_or_else(|| Error::UnsupportedMime(mime.to_owned()))?;
        Ok(Self::from_backend(info.create(), info.is_secure()))
    }

    /// Wrap a native codec instance. `secure` marks a secure decoder variant.
    pub fn from_backend(mut backend: Box<dyn CodecBackend>, secure: bool) -> Self {
        let name = backend.name().to_owned();
        let shared = Shared::default();
        backend.set_listener(Some(Arc::new(EventBridge::new(&name, shared.clone()))));

        debug!("{}: session created (secure: {})", name, secure);
        Self {
            name,
            secure,
            backend,
            shared,
            crypto: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    pub fn state(&self) -> CodecState {
        self.shared.lock().state
    }

    /// Detail of the most recent asynchronous error.
    pub fn last_error(&self) -> Option<CodecError> {
        self.shared.lock().last_error.clone()
    }

    /// The crypto context attached at configure time, if any.
    pub fn crypto(&self) -> Option<&Arc<MediaCrypto>> {
        self.crypto.as_ref()
    }

    fn check<F>(&self, operation: &'static str, allowed: F) -> Result<MutexGuard<'_, SessionShared>>
    where
        F: Fn(CodecState) -> bool,
    {
        let shared = self.shared.lock();

        match shared.state {
            CodecState::Released => Err(Error::Released),
            state if allowed(state) => Ok(shared),
            state => Err(Error::InvalidState { operation, state }),
        }
    }

    fn check_exchange(&self, operation: &'static str) -> Result<MutexGuard<'_, SessionShared>> {
        let shared = self.check(operation, CodecState::is_executing)?;

        if shared.reconfigure_pending {
            return Err(Error::ReconfigureRequired);
        }

        Ok(shared)
    }

    /// Apply a format and move to [`CodecState::Configured`].
    ///
    /// `surface` selects decode-to-surface mode, `crypto` must be given for
    /// encrypted streams. Fails without changing state when the format has no
    /// mime type or the stream needs a secure decoder this session is not.
    pub fn configure(
        &mut self,
        format: &MediaFormat,
        surface: Option<Surface>,
        crypto: Option<Arc<MediaCrypto>>,
        flags: u32,
    ) -> Result<()> {
        drop(self.check("configure", CodecState::is_configurable)?);

        let mime = format.mime().ok_or(Error::MissingKey(keys::MIME))?;
        let secure_required = format.get_int32(keys::FEATURE_SECURE_PLAYBACK) == Some(1)
            || match &crypto {
                Some(x) => x.requires_secure_decoder(mime)?,
                None => false,
            };

        if secure_required && !self.secure {
            return Err(Error::SecureDecoderRequired(mime.to_owned()));
        }

        self.backend
            .configure(format, surface, crypto.clone(), flags)?;
        self.crypto = crypto;

        let mut shared = self.shared.lock();
        shared.invalidate();
        shared.state = CodecState::Configured;
        shared.reconfigure_pending = false;
        shared.last_error = None;

        info!("{}: configured for {}", self.name, mime);
        Ok(())
    }

    /// Register the event channel and return its consumer handle.
    ///
    /// A handle returned earlier stops receiving new events. A fatal error
    /// that no handle received yet is delivered to the new one.
    pub fn events(&mut self) -> Result<Events> {
        let mut shared = self.check("register events", |_| true)?;
        let (sender, events) = Events::channel(self.shared.clone());
        shared.sender = Some(sender);

        if let Some(error) = shared.undelivered.take() {
            debug!("{}: delivering pending fatal error {}", self.name, error.code);
            shared.send(CodecEvent::Error(error));
        }

        Ok(events)
    }

    /// Begin buffer exchange. Requires an event channel from [`events`](Self::events).
    pub fn start(&mut self) -> Result<()> {
        let mut shared = self.check("start", |x| {
            matches!(x, CodecState::Configured | CodecState::Flushed)
        })?;

        if shared.sender.is_none() {
            return Err(Error::NoEventChannel);
        }

        let previous = shared.state;
        shared.state = CodecState::Started;
        drop(shared);

        if let Err(e) = self.backend.start() {
            self.restore_state(CodecState::Started, previous);
            return Err(e);
        }

        debug!("{}: started", self.name);
        Ok(())
    }

    /// End buffer exchange and discard the configuration.
    pub fn stop(&mut self) -> Result<()> {
        drop(self.check("stop", |x| {
            matches!(
                x,
                CodecState::Configured | CodecState::Started | CodecState::Flushed
            )
        })?);

        self.backend.stop()?;
        self.crypto = None;

        let mut shared = self.check("stop", |x| x != CodecState::Error)?;
        shared.invalidate();
        shared.state = CodecState::Stopped;
        shared.reconfigure_pending = false;

        debug!("{}: stopped", self.name);
        Ok(())
    }

    /// Discard every buffer owned by either side and resume exchange.
    ///
    /// Indices handed out before the flush are invalid afterwards. If resuming
    /// fails the session stays [`CodecState::Flushed`] and [`start`](Self::start) resumes it.
    pub fn flush(&mut self) -> Result<()> {
        let mut shared = self.check("flush", |x| {
            matches!(x, CodecState::Started | CodecState::Flushed)
        })?;
        shared.state = CodecState::Flushed;
        drop(shared);

        self.backend.flush()?;

        let mut shared = self.check("flush", |x| x != CodecState::Error)?;
        shared.invalidate();
        shared.state = CodecState::Started;
        drop(shared);

        if let Err(e) = self.backend.start() {
            self.restore_state(CodecState::Started, CodecState::Flushed);
            return Err(e);
        }

        debug!("{}: flushed", self.name);
        Ok(())
    }

    /// Free all resources, waiting for the codec's threads to exit.
    ///
    /// Calling this more than once is a no-op.
    pub fn release(&mut self) {
        let mut shared = self.shared.lock();

        if shared.state == CodecState::Released {
            return;
        }

        shared.state = CodecState::Released;
        shared.sender = None;
        shared.ledger.clear();
        drop(shared);

        self.backend.set_listener(None);
        self.backend.release();
        self.crypto = None;

        debug!("{}: released", self.name);
    }

    fn restore_state(&self, expected: CodecState, previous: CodecState) {
        let mut shared = self.shared.lock();

        if shared.state == expected {
            shared.state = previous;
        }
    }

    /// Writable region of a client owned input slot.
    pub fn get_input_buffer(&self, index: usize) -> Result<SlotGuard<'_>> {
        let shared = self.check_exchange("get input buffer")?;

        if !shared.ledger.owns_input(index) {
            return Err(Error::InputNotOwned(index));
        }
        drop(shared);

        self.backend
            .input_buffer(index)
            .ok_or(Error::InputNotOwned(index))
    }

    /// Readable region of a client owned output slot.
    pub fn get_output_buffer(&self, index: usize) -> Result<SlotGuard<'_>> {
        let shared = self.check_exchange("get output buffer")?;

        if shared.ledger.output(index).is_none() {
            return Err(Error::OutputNotOwned(index));
        }
        drop(shared);

        self.backend
            .output_buffer(index)
            .ok_or(Error::OutputNotOwned(index))
    }

    /// Metadata the output slot was announced with.
    pub fn output_buffer_info(&self, index: usize) -> Result<BufferInfo> {
        self.check_exchange("get output buffer info")?
            .ledger
            .output(index)
            .ok_or(Error::OutputNotOwned(index))
    }

    /// Hand ownership of an input index back to the codec.
    ///
    /// Returns the epoch so ownership can be restored if the backend rejects the buffer.
    fn take_input(&self, operation: &'static str, index: usize) -> Result<u64> {
        let mut shared = self.check_exchange(operation)?;

        if !shared.ledger.take_input(index) {
            return Err(Error::InputNotOwned(index));
        }

        Ok(shared.epoch)
    }

    fn restore_input(&self, index: usize, epoch: u64) {
        let mut shared = self.shared.lock();

        if shared.epoch == epoch && shared.state.is_executing() {
            shared.ledger.grant_input(index);
        }
    }

    /// Queue `size` bytes of clear data at `offset` in input slot `index`.
    pub fn queue_input_buffer(
        &mut self,
        index: usize,
        offset: usize,
        size: usize,
        presentation_time_us: i64,
        flags: u32,
    ) -> Result<()> {
        let epoch = self.take_input("queue input buffer", index)?;

        if let Err(e) = self
            .backend
            .queue_input(index, offset, size, presentation_time_us, flags)
        {
            self.restore_input(index, epoch);
            return Err(e);
        }

        Ok(())
    }

    /// Queue an encrypted sample described by `info`, decrypted by the attached crypto context.
    pub fn queue_secure_input_buffer(
        &mut self,
        index: usize,
        offset: usize,
        info: CryptoInfo,
        presentation_time_us: i64,
        flags: u32,
    ) -> Result<()> {
        drop(self.check_exchange("queue secure input buffer")?);

        if self.crypto.is_none() {
            return Err(Error::NoCrypto);
        }

        let epoch = self.take_input("queue secure input buffer", index)?;

        if let Err(e) =
            self.backend
                .queue_secure_input(index, offset, info, presentation_time_us, flags)
        {
            self.restore_input(index, epoch);
            return Err(e);
        }

        Ok(())
    }

    /// Return an output slot, presenting it on the surface when `render` is set.
    pub fn release_output_buffer(&mut self, index: usize, render: bool) -> Result<()> {
        self.release_output(index, render, None)
    }

    /// Return an output slot and present it at `timestamp_ns`.
    pub fn release_output_buffer_at_time(&mut self, index: usize, timestamp_ns: i64) -> Result<()> {
        self.release_output(index, true, Some(timestamp_ns))
    }

    fn release_output(&mut self, index: usize, render: bool, timestamp_ns: Option<i64>) -> Result<()> {
        let mut shared = self.check_exchange("release output buffer")?;
        let info = shared
            .ledger
            .take_output(index)
            .ok_or(Error::OutputNotOwned(index))?;
        let epoch = shared.epoch;
        drop(shared);

        if let Err(e) = self.backend.release_output(index, render, timestamp_ns) {
            let mut shared = self.shared.lock();
            if shared.epoch == epoch {
                shared.ledger.grant_output(index, info);
            }
            return Err(e);
        }

        Ok(())
    }

    /// Fresh copy of the current output format.
    pub fn output_format(&self) -> Result<MediaFormat> {
        drop(self.check("get output format", CodecState::is_configured)?);
        self.backend.output_format()
    }

    /// Fresh copy of the configured input format.
    pub fn input_format(&self) -> Result<MediaFormat> {
        drop(self.check("get input format", CodecState::is_configured)?);
        self.backend.input_format()
    }

    /// Redirect rendering to `surface` without reconfiguring.
    pub fn set_output_surface(&mut self, surface: Surface) -> Result<()> {
        drop(self.check("set output surface", CodecState::is_executing)?);
        self.backend.set_output_surface(surface)
    }

    /// Live parameter update. Keys the codec does not know are ignored.
    pub fn set_parameters(&mut self, params: &MediaFormat) -> Result<()> {
        drop(self.check("set parameters", CodecState::is_configured)?);
        self.backend.set_parameters(params)
    }

    /// Detach the crypto context, e.g. when the stream switches to clear content.
    pub fn release_crypto(&mut self) -> Result<()> {
        drop(self.check("release crypto", CodecState::is_configured)?);

        if self.crypto.is_none() {
            warn!("{}: no crypto context attached", self.name);
            return Ok(());
        }

        self.backend.release_crypto()?;
        self.crypto = None;
        Ok(())
    }
}

impl Drop for CodecSession {
    fn drop(&mut self) {
        self.release();
    }
}
