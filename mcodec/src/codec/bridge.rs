use crate::{
    codec::{
        ActionCode, BufferInfo, CodecError, CodecEvent, CodecState, EventSink, NativeListener,
        buffer::Ledger,
    },
    format::MediaFormat,
};
use log::{debug, error, trace, warn};
use std::{
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError},
    },
    time::{Duration, Instant},
};

pub(crate) type Envelope = (u64, CodecEvent);

/// State shared between a session and its bridge.
#[derive(Default)]
pub(crate) struct SessionShared {
    pub(crate) state: CodecState,
    pub(crate) ledger: Ledger,
    /// Bumped whenever outstanding buffer indices are invalidated.
    pub(crate) epoch: u64,
    pub(crate) sender: Option<Sender<Envelope>>,
    pub(crate) last_error: Option<CodecError>,
    /// Fatal error raised while no consumer could receive it.
    pub(crate) undelivered: Option<CodecError>,
    pub(crate) reconfigure_pending: bool,
}

impl SessionShared {
    /// Forget every client owned index and mark pending events stale.
    pub(crate) fn invalidate(&mut self) {
        self.ledger.clear();
        self.epoch += 1;
    }

    /// Returns false if no consumer received the event.
    pub(crate) fn send(&mut self, event: CodecEvent) -> bool {
        let Some(sender) = &self.sender else {
            warn!("no event channel registered, dropping {:?}", event);
            return false;
        };

        if sender.send((self.epoch, event)).is_err() {
            trace!("event consumer is gone");
            return false;
        }

        true
    }
}

#[derive(Clone, Default)]
pub(crate) struct Shared(Arc<Mutex<SessionShared>>);

impl Shared {
    pub(crate) fn lock(&self) -> MutexGuard<'_, SessionShared> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Translates native codec notifications into one ordered event channel.
///
/// Buffer notifications mark the index as client owned before the event is
/// sent. They are dropped while the session is not executing. After a fatal
/// error exactly one error event is sent and everything later is suppressed.
pub(crate) struct EventBridge {
    name: String,
    shared: Shared,
}

impl EventBridge {
    pub(crate) fn new(name: &str, shared: Shared) -> Self {
        Self {
            name: name.to_owned(),
            shared,
        }
    }

    fn executing(&self) -> Option<MutexGuard<'_, SessionShared>> {
        let shared = self.shared.lock();

        if shared.state.is_executing() {
            Some(shared)
        } else {
            debug!(
                "{}: dropping buffer notification while {}",
                self.name, shared.state
            );
            None
        }
    }
}

impl NativeListener for EventBridge {
    fn on_input_available(&self, index: usize) {
        if let Some(mut shared) = self.executing() {
            trace!("{}: input {} available", self.name, index);
            shared.ledger.grant_input(index);
            shared.send(CodecEvent::InputAvailable { index });
        }
    }

    fn on_output_available(&self, index: usize, info: BufferInfo) {
        if let Some(mut shared) = self.executing() {
            trace!("{}: output {} available {:?}", self.name, index, info);
            shared.ledger.grant_output(index, info);
            shared.send(CodecEvent::OutputAvailable { index, info });
        }
    }

    fn on_output_format_changed(&self, format: MediaFormat) {
        if let Some(mut shared) = self.executing() {
            debug!("{}: output format changed to {}", self.name, format);
            shared.send(CodecEvent::OutputFormatChanged { format });
        }
    }

    fn on_error(&self, code: i32, action: ActionCode, detail: &str) {
        let mut shared = self.shared.lock();

        match shared.state {
            CodecState::Released => {
                trace!("{}: error {} after release suppressed", self.name, code);
                return;
            }
            CodecState::Error => {
                warn!("{}: error {} after fatal error suppressed", self.name, code);
                return;
            }
            _ => (),
        }

        let codec_error = CodecError {
            code,
            action,
            detail: detail.to_owned(),
        };
        error!("{}: {}", self.name, codec_error);

        match action {
            ActionCode::Fatal => {
                shared.state = CodecState::Error;
                shared.ledger.clear();
            }
            ActionCode::Reconfigure => shared.reconfigure_pending = true,
            ActionCode::Recoverable => (),
        }

        shared.last_error = Some(codec_error.clone());

        if !shared.send(CodecEvent::Error(codec_error.clone())) && action == ActionCode::Fatal {
            shared.undelivered = Some(codec_error);
        }
    }
}

/// Consumer handle of a session's event channel.
///
/// Buffer availability events raised before the latest flush, stop or
/// configure are skipped since their indices are no longer owned. Format
/// changes and errors are always delivered.
///
/// Receiving methods return `None` once the session was released. After a
/// newer handle replaced this one, events already queued here can still be
/// read but nothing new arrives.
pub struct Events {
    receiver: Receiver<Envelope>,
    shared: Shared,
}

impl Events {
    pub(crate) fn channel(shared: Shared) -> (Sender<Envelope>, Self) {
        let (sender, receiver) = mpsc::channel();
        (sender, Self { receiver, shared })
    }

    fn current(&self, (epoch, event): Envelope) -> Option<CodecEvent> {
        let buffer = matches!(
            event,
            CodecEvent::InputAvailable { .. } | CodecEvent::OutputAvailable { .. }
        );

        if buffer && epoch != self.shared.lock().epoch {
            trace!("skipping stale {:?}", event);
            return None;
        }

        Some(event)
    }

    /// Block until the next event.
    pub fn recv(&self) -> Option<CodecEvent> {
        loop {
            let envelope = self.receiver.recv().ok()?;

            if let Some(event) = self.current(envelope) {
                return Some(event);
            }
        }
    }

    /// Next event if one is queued.
    pub fn try_recv(&self) -> Option<CodecEvent> {
        loop {
            let envelope = match self.receiver.try_recv() {
                Ok(x) => x,
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => return None,
            };

            if let Some(event) = self.current(envelope) {
                return Some(event);
            }
        }
    }

    /// Wait at most `timeout` for the next event.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<CodecEvent> {
        let deadline = Instant::now() + timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let envelope = match self.receiver.recv_timeout(remaining) {
                Ok(x) => x,
                Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => return None,
            };

            if let Some(event) = self.current(envelope) {
                return Some(event);
            }
        }
    }

    /// Dispatch every queued event to `sink` without blocking, returning how many were handled.
    pub fn dispatch_pending<S: EventSink + ?Sized>(&self, sink: &mut S) -> usize {
        let mut count = 0;

        while let Some(event) = self.try_recv() {
            event.dispatch(sink);
            count += 1;
        }

        count
    }

    /// Blocking iterator over events, ends when the channel closes.
    pub fn iter(&self) -> impl Iterator<Item = CodecEvent> + '_ {
        std::iter::from_fn(|| self.recv())
    }
}
