use mcodec::{
    Error as CodecSessionError,
    codec::{
        ActionCode, BufferInfo, BufferPool, CodecBackend, CodecError, CodecEvent, CodecSession,
        CodecState, EventSink, Events, NativeListener, RenderTarget, SlotGuard, Surface, flags,
    },
    drm::{CryptoInfo, CryptoSession, MediaCrypto, SchemeId},
    format::{MediaFormat, keys},
};
use std::{
    error::Error,
    sync::{Arc, Mutex},
    time::Duration,
};

const TIMEOUT: Duration = Duration::from_secs(5);

/// Handle used by tests to fire native notifications into a session.
#[derive(Clone, Default)]
struct Script {
    listener: Arc<Mutex<Option<Arc<dyn NativeListener>>>>,
    queued: Arc<Mutex<Vec<(usize, usize, usize, i64)>>>,
    parameters: Arc<Mutex<Vec<MediaFormat>>>,
    releases: Arc<Mutex<usize>>,
}

impl Script {
    fn listener(&self) -> Option<Arc<dyn NativeListener>> {
        self.listener.lock().unwrap().clone()
    }

    fn input(&self, index: usize) {
        if let Some(x) = self.listener() {
            x.on_input_available(index);
        }
    }

    fn output(&self, index: usize, size: usize) {
        if let Some(x) = self.listener() {
            x.on_output_available(index, BufferInfo::new(0, size, 0, 0));
        }
    }

    fn format_changed(&self, format: MediaFormat) {
        if let Some(x) = self.listener() {
            x.on_output_format_changed(format);
        }
    }

    fn error(&self, code: i32, action: ActionCode) {
        if let Some(x) = self.listener() {
            x.on_error(code, action, "scripted failure");
        }
    }
}

struct ScriptedBackend {
    script: Script,
    inputs: BufferPool,
    outputs: BufferPool,
    format: Option<MediaFormat>,
}

impl ScriptedBackend {
    fn new(script: &Script) -> Box<Self> {
        Box::new(Self {
            script: script.clone(),
            inputs: BufferPool::new(4, 256),
            outputs: BufferPool::new(4, 256),
            format: None,
        })
    }
}

impl CodecBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    fn set_listener(&mut self, listener: Option<Arc<dyn NativeListener>>) {
        *self.script.listener.lock().unwrap() = listener;
    }

    fn configure(
        &mut self,
        format: &MediaFormat,
        _: Option<Surface>,
        _: Option<Arc<MediaCrypto>>,
        _: u32,
    ) -> mcodec::Result<()> {
        self.format = Some(format.clone());
        Ok(())
    }

    fn start(&mut self) -> mcodec::Result<()> {
        Ok(())
    }

    fn stop(&mut self) -> mcodec::Result<()> {
        self.format = None;
        Ok(())
    }

    fn flush(&mut self) -> mcodec::Result<()> {
        Ok(())
    }

    fn input_buffer(&self, index: usize) -> Option<SlotGuard<'_>> {
        self.inputs.slot(index)
    }

    fn output_buffer(&self, index: usize) -> Option<SlotGuard<'_>> {
        self.outputs.slot(index)
    }

    fn queue_input(
        &mut self,
        index: usize,
        offset: usize,
        size: usize,
        presentation_time_us: i64,
        _: u32,
    ) -> mcodec::Result<()> {
        if offset + size > self.inputs.capacity() {
            return Err(CodecSessionError::InvalidRange {
                offset,
                size,
                capacity: self.inputs.capacity(),
            });
        }

        self.script
            .queued
            .lock()
            .unwrap()
            .push((index, offset, size, presentation_time_us));
        Ok(())
    }

    fn queue_secure_input(
        &mut self,
        index: usize,
        offset: usize,
        info: CryptoInfo,
        presentation_time_us: i64,
        flags: u32,
    ) -> mcodec::Result<()> {
        self.queue_input(index, offset, info.total_size()?, presentation_time_us, flags)
    }

    fn release_output(&mut self, _: usize, _: bool, _: Option<i64>) -> mcodec::Result<()> {
        Ok(())
    }

    fn input_format(&self) -> mcodec::Result<MediaFormat> {
        Ok(self.format.clone().unwrap_or_default())
    }

    fn output_format(&self) -> mcodec::Result<MediaFormat> {
        Ok(self.format.clone().unwrap_or_default())
    }

    fn set_output_surface(&mut self, _: Surface) -> mcodec::Result<()> {
        Ok(())
    }

    fn set_parameters(&mut self, params: &MediaFormat) -> mcodec::Result<()> {
        self.script.parameters.lock().unwrap().push(params.clone());
        Ok(())
    }

    fn release_crypto(&mut self) -> mcodec::Result<()> {
        Ok(())
    }

    fn release(&mut self) {
        *self.script.releases.lock().unwrap() += 1;
    }
}

fn avc() -> MediaFormat {
    let mut format = MediaFormat::new();
    format.set_string(keys::MIME, "video/avc");
    format.set_int32(keys::WIDTH, 1280);
    format.set_int32(keys::HEIGHT, 720);
    format
}

fn started(secure: bool) -> Result<(Script, CodecSession, Events), Box<dyn Error>> {
    let script = Script::default();
    let mut session = CodecSession::from_backend(ScriptedBackend::new(&script), secure);
    session.configure(&avc(), None, None, 0)?;
    let events = session.events()?;
    session.start()?;
    Ok((script, session, events))
}

#[test]
fn queue_returns_index_to_codec() -> Result<(), Box<dyn Error>> {
    let (script, mut session, events) = started(false)?;

    script.input(0);
    assert_eq!(events.try_recv(), Some(CodecEvent::InputAvailable { index: 0 }));

    session.get_input_buffer(0)?[..188].fill(0x47);
    session.queue_input_buffer(0, 0, 188, 0, 0)?;
    assert_eq!(*script.queued.lock().unwrap(), vec![(0, 0, 188, 0)]);

    let err = session.queue_input_buffer(0, 0, 188, 0, 0).unwrap_err();
    assert!(matches!(err, CodecSessionError::InputNotOwned(0)));
    assert!(err.is_usage_error());
    assert!(session.get_input_buffer(0).is_err());
    assert_eq!(session.state(), CodecState::Started);
    Ok(())
}

#[test]
fn unowned_indices_are_rejected() -> Result<(), Box<dyn Error>> {
    let (script, mut session, _events) = started(false)?;
    script.input(1);

    assert!(matches!(
        session.queue_input_buffer(2, 0, 10, 0, 0),
        Err(CodecSessionError::InputNotOwned(2))
    ));
    assert!(matches!(
        session.get_output_buffer(1),
        Err(CodecSessionError::OutputNotOwned(1))
    ));
    assert!(matches!(
        session.release_output_buffer(3, false),
        Err(CodecSessionError::OutputNotOwned(3))
    ));

    assert_eq!(session.state(), CodecState::Started);
    session.queue_input_buffer(1, 0, 10, 0, 0)?;
    Ok(())
}

#[test]
fn rejected_queue_keeps_ownership() -> Result<(), Box<dyn Error>> {
    let (script, mut session, _events) = started(false)?;
    script.input(0);

    let err = session.queue_input_buffer(0, 200, 100, 0, 0).unwrap_err();
    assert!(matches!(err, CodecSessionError::InvalidRange { .. }));

    session.queue_input_buffer(0, 0, 100, 0, 0)?;
    Ok(())
}

#[test]
fn flush_invalidates_indices() -> Result<(), Box<dyn Error>> {
    let (script, mut session, events) = started(false)?;
    script.input(0);
    script.output(1, 64);
    assert_eq!(session.output_buffer_info(1)?.size, 64);

    session.flush()?;
    assert_eq!(session.state(), CodecState::Started);

    assert!(session.get_input_buffer(0).is_err());
    assert!(session.queue_input_buffer(0, 0, 1, 0, 0).is_err());
    assert!(session.get_output_buffer(1).is_err());
    assert!(session.release_output_buffer(1, false).is_err());

    // events raised before the flush are stale
    script.input(2);
    assert_eq!(events.try_recv(), Some(CodecEvent::InputAvailable { index: 2 }));
    assert_eq!(events.try_recv(), None);
    Ok(())
}

#[test]
fn format_and_errors_survive_flush() -> Result<(), Box<dyn Error>> {
    let (script, mut session, events) = started(false)?;
    let mut format = avc();
    format.set_int32(keys::WIDTH, 1920);

    script.input(0);
    script.format_changed(format.clone());
    script.error(-10, ActionCode::Recoverable);
    script.output(1, 32);
    session.flush()?;

    assert_eq!(
        events.try_recv(),
        Some(CodecEvent::OutputFormatChanged { format })
    );
    assert!(matches!(
        events.try_recv(),
        Some(CodecEvent::Error(CodecError { code: -10, .. }))
    ));
    assert_eq!(events.try_recv(), None);
    Ok(())
}

#[derive(Default)]
struct Recorder(Vec<String>);

impl EventSink for Recorder {
    fn on_input_available(&mut self, index: usize) {
        self.0.push(format!("in {}", index));
    }

    fn on_output_available(&mut self, index: usize, info: BufferInfo) {
        self.0.push(format!("out {} {}", index, info.size));
    }

    fn on_output_format_changed(&mut self, format: MediaFormat) {
        self.0.push(format!("format {}", format.mime().unwrap_or_default()));
    }

    fn on_error(&mut self, error: CodecError) {
        self.0.push(format!("error {} {}", error.code, error.action));
    }
}

#[test]
fn event_sink_receives_every_kind_in_order() -> Result<(), Box<dyn Error>> {
    let (script, mut session, events) = started(false)?;
    let mut recorder = Recorder::default();

    script.input(2);
    script.format_changed(avc());
    script.output(0, 48);
    script.error(-7, ActionCode::Recoverable);

    assert_eq!(events.dispatch_pending(&mut recorder), 4);
    assert_eq!(
        recorder.0,
        vec![
            "in 2",
            "format video/avc",
            "out 0 48",
            "error -7 recoverable"
        ]
    );
    assert_eq!(events.dispatch_pending(&mut recorder), 0);

    // the channel closes on release, ending iteration after queued events
    script.input(3);
    session.release();
    assert_eq!(
        events.iter().collect::<Vec<_>>(),
        vec![CodecEvent::InputAvailable { index: 3 }]
    );
    Ok(())
}

#[test]
fn fatal_error_before_events_is_delivered_later() -> Result<(), Box<dyn Error>> {
    let script = Script::default();
    let mut session = CodecSession::from_backend(ScriptedBackend::new(&script), false);
    session.configure(&avc(), None, None, 0)?;

    script.error(-3, ActionCode::Recoverable);
    script.error(-4, ActionCode::Fatal);
    assert_eq!(session.state(), CodecState::Error);

    let events = session.events()?;
    assert!(matches!(
        events.try_recv(),
        Some(CodecEvent::Error(CodecError { code: -4, .. }))
    ));
    assert_eq!(events.try_recv(), None);

    let replaced = session.events()?;
    assert_eq!(replaced.try_recv(), None);
    Ok(())
}

#[test]
fn fatal_error_is_delivered_once() -> Result<(), Box<dyn Error>> {
    let (script, mut session, events) = started(false)?;
    script.input(0);
    script.error(-38, ActionCode::Fatal);
    script.error(-39, ActionCode::Fatal);
    script.input(1);
    script.output(0, 10);

    assert_eq!(events.try_recv(), Some(CodecEvent::InputAvailable { index: 0 }));
    let Some(CodecEvent::Error(error)) = events.try_recv() else {
        panic!("expected an error event");
    };
    assert_eq!(error.code, -38);
    assert!(error.is_fatal());
    assert_eq!(events.try_recv(), None);

    assert_eq!(session.state(), CodecState::Error);
    assert_eq!(session.last_error(), Some(error));
    assert!(matches!(
        session.queue_input_buffer(0, 0, 1, 0, 0),
        Err(CodecSessionError::InvalidState {
            state: CodecState::Error,
            ..
        })
    ));
    assert!(session.flush().is_err());

    session.release();
    assert_eq!(session.state(), CodecState::Released);
    Ok(())
}

#[test]
fn reconfigure_error_blocks_exchange_until_restarted() -> Result<(), Box<dyn Error>> {
    let (script, mut session, events) = started(false)?;
    script.input(0);
    script.error(7, ActionCode::Reconfigure);

    assert!(matches!(
        session.queue_input_buffer(0, 0, 1, 0, 0),
        Err(CodecSessionError::ReconfigureRequired)
    ));

    session.stop()?;
    session.configure(&avc(), None, None, 0)?;
    session.start()?;

    // the error is still delivered, the input announced before the restart is not
    script.input(3);
    let received: Vec<_> = std::iter::from_fn(|| events.try_recv()).collect();
    assert_eq!(received.len(), 2);
    assert!(matches!(
        &received[0],
        CodecEvent::Error(CodecError {
            code: 7,
            action: ActionCode::Reconfigure,
            ..
        })
    ));
    assert_eq!(received[1], CodecEvent::InputAvailable { index: 3 });
    session.queue_input_buffer(3, 0, 1, 0, 0)?;
    Ok(())
}

#[test]
fn recoverable_error_keeps_exchange() -> Result<(), Box<dyn Error>> {
    let (script, mut session, events) = started(false)?;
    script.input(0);
    script.error(1, ActionCode::Recoverable);

    assert!(events.try_recv().is_some());
    assert!(matches!(events.try_recv(), Some(CodecEvent::Error(_))));
    session.queue_input_buffer(0, 0, 1, 0, 0)?;
    assert_eq!(session.state(), CodecState::Started);
    Ok(())
}

#[test]
fn release_twice() -> Result<(), Box<dyn Error>> {
    let (script, mut session, events) = started(false)?;
    session.release();
    session.release();
    drop(session);

    assert_eq!(*script.releases.lock().unwrap(), 1);
    assert!(script.listener().is_none());
    assert_eq!(events.recv_timeout(TIMEOUT), None);
    Ok(())
}

#[test]
fn released_session_rejects_everything() {
    let script = Script::default();
    let mut session = CodecSession::from_backend(ScriptedBackend::new(&script), false);
    session.release();

    assert!(matches!(
        session.configure(&avc(), None, None, 0),
        Err(CodecSessionError::Released)
    ));
    assert!(matches!(session.start(), Err(CodecSessionError::Released)));
    assert!(matches!(session.events(), Err(CodecSessionError::Released)));
    assert!(session.output_format().is_err());
}

#[test]
fn configuration_usage_errors() -> Result<(), Box<dyn Error>> {
    let script = Script::default();
    let mut session = CodecSession::from_backend(ScriptedBackend::new(&script), false);

    assert!(matches!(
        session.start(),
        Err(CodecSessionError::InvalidState {
            state: CodecState::Uninitialized,
            ..
        })
    ));
    assert!(matches!(
        session.configure(&MediaFormat::new(), None, None, 0),
        Err(CodecSessionError::MissingKey("mime"))
    ));
    assert_eq!(session.state(), CodecState::Uninitialized);

    session.configure(&avc(), None, None, 0)?;
    assert!(matches!(
        session.configure(&avc(), None, None, 0),
        Err(CodecSessionError::InvalidState { .. })
    ));
    assert!(matches!(
        session.start(),
        Err(CodecSessionError::NoEventChannel)
    ));
    assert!(session.set_output_surface(Surface::new(Arc::new(Frames::default()))).is_err());
    Ok(())
}

#[test]
fn secure_decoder_requirement() -> Result<(), Box<dyn Error>> {
    let mut format = avc();
    format.set_int32(keys::FEATURE_SECURE_PLAYBACK, 1);

    let script = Script::default();
    let mut session = CodecSession::from_backend(ScriptedBackend::new(&script), false);
    let err = session.configure(&format, None, None, 0).unwrap_err();
    assert!(matches!(err, CodecSessionError::SecureDecoderRequired(_)));
    assert!(err.is_resource_error());
    assert_eq!(session.state(), CodecState::Uninitialized);

    let crypto = Arc::new(MediaCrypto::from_session(Arc::new(HardwareOnly)));
    assert!(matches!(
        session.configure(&avc(), None, Some(crypto.clone()), 0),
        Err(CodecSessionError::SecureDecoderRequired(_))
    ));

    let mut secure = CodecSession::from_backend(ScriptedBackend::new(&script), true);
    secure.configure(&avc(), None, Some(crypto.clone()), 0)?;
    assert!(secure.is_secure());
    assert!(Arc::ptr_eq(secure.crypto().unwrap(), &crypto));
    Ok(())
}

#[test]
fn secure_queue_needs_crypto() -> Result<(), Box<dyn Error>> {
    let (script, mut session, _events) = started(false)?;
    script.input(0);

    let info = CryptoInfo::new([0; 16], [0; 16], mcodec::drm::CryptoMode::AesCtr, &[0], &[16])?;
    assert!(matches!(
        session.queue_secure_input_buffer(0, 0, info, 0, 0),
        Err(CodecSessionError::NoCrypto)
    ));
    session.queue_input_buffer(0, 0, 16, 0, 0)?;
    Ok(())
}

#[test]
fn formats_and_parameters() -> Result<(), Box<dyn Error>> {
    let (script, mut session, _events) = started(false)?;

    let mut first = session.output_format()?;
    first.set_int32(keys::WIDTH, 1);
    assert_eq!(session.output_format()?.get_int32(keys::WIDTH), Some(1280));
    assert_eq!(session.input_format()?.mime(), Some("video/avc"));

    let mut params = MediaFormat::new();
    params.set_int32(keys::BIT_RATE, 2_000_000);
    session.set_parameters(&params)?;
    assert_eq!(*script.parameters.lock().unwrap(), vec![params]);

    session.set_output_surface(Surface::new(Arc::new(Frames::default())))?;
    session.release_crypto()?;
    Ok(())
}

#[test]
fn registry_lookups() {
    assert!(matches!(
        CodecSession::create_by_name("hw.video.decoder"),
        Err(CodecSessionError::CodecNotFound(_))
    ));
    assert!(matches!(
        CodecSession::create_decoder_by_type("text/vtt"),
        Err(CodecSessionError::UnsupportedMime(_))
    ));

    let session = CodecSession::create_by_name("sw.video.decoder.secure").unwrap();
    assert!(session.is_secure());
    assert_eq!(session.name(), "sw.video.decoder.secure");
}

#[test]
fn software_decoder_passthrough() -> Result<(), Box<dyn Error>> {
    let mut session = CodecSession::create_decoder_by_type("audio/opus")?;
    let mut format = MediaFormat::new();
    format.set_string(keys::MIME, "audio/opus");
    format.set_int32(keys::MAX_INPUT_SIZE, 4096);
    format.set_int32(keys::SAMPLE_RATE, 48000);

    let frames = Arc::new(Frames::default());
    session.configure(&format, Some(Surface::new(frames.clone())), None, 0)?;
    let events = session.events()?;
    session.start()?;

    let samples: Vec<Vec<u8>> = (0..6u8).map(|x| vec![x; 100 + x as usize]).collect();
    let mut next = 0;
    let mut decoded = vec![];
    let mut format_changed = false;

    loop {
        match events.recv_timeout(TIMEOUT).expect("codec stalled") {
            CodecEvent::InputAvailable { index } => {
                if next > samples.len() {
                    continue;
                }

                if next == samples.len() {
                    session.queue_input_buffer(index, 0, 0, 0, flags::END_OF_STREAM)?;
                } else {
                    let sample = &samples[next];
                    session.get_input_buffer(index)?[..sample.len()].copy_from_slice(sample);
                    session.queue_input_buffer(index, 0, sample.len(), next as i64 * 20_000, 0)?;
                }
                next += 1;
            }
            CodecEvent::OutputFormatChanged { format } => {
                assert!(decoded.is_empty());
                assert_eq!(format.get_int32(keys::SAMPLE_RATE), Some(48000));
                assert!(!format.contains(keys::MAX_INPUT_SIZE));
                format_changed = true;
            }
            CodecEvent::OutputAvailable { index, info } => {
                assert!(format_changed);
                if info.is_end_of_stream() {
                    session.release_output_buffer(index, false)?;
                    break;
                }

                let data = session.get_output_buffer(index)?[..info.size].to_vec();
                decoded.push(data);
                session.release_output_buffer_at_time(index, info.presentation_time_us * 1000 + 1)?;
            }
            CodecEvent::Error(error) => panic!("unexpected {}", error),
        }
    }

    assert_eq!(decoded, samples);

    session.stop()?;
    assert_eq!(session.state(), CodecState::Stopped);
    session.release();

    let frames = frames.0.lock().unwrap();
    assert_eq!(frames.len(), samples.len());
    assert_eq!(frames[1], (samples[1].clone(), 20_000_001));
    Ok(())
}

#[test]
fn software_decoder_flush_and_resume() -> Result<(), Box<dyn Error>> {
    let mut session = CodecSession::create_by_name("sw.video.decoder")?;
    session.configure(&avc(), None, None, 0)?;
    let events = session.events()?;
    session.start()?;

    let Some(CodecEvent::InputAvailable { index }) = events.recv_timeout(TIMEOUT) else {
        panic!("no input announced");
    };

    session.flush()?;
    assert!(session.get_input_buffer(index).is_err());

    // every input slot is announced again after resuming
    let mut announced = vec![];
    while announced.len() < 4 {
        match events.recv_timeout(TIMEOUT) {
            Some(CodecEvent::InputAvailable { index }) => announced.push(index),
            other => panic!("unexpected {:?}", other),
        }
    }

    announced.sort();
    assert_eq!(announced, vec![0, 1, 2, 3]);
    session.get_input_buffer(index)?;
    Ok(())
}

#[test]
fn software_decoder_reports_format_after_flush() -> Result<(), Box<dyn Error>> {
    let mut session = CodecSession::create_by_name("sw.video.decoder")?;
    session.configure(&avc(), None, None, 0)?;
    let events = session.events()?;
    session.start()?;

    let Some(CodecEvent::InputAvailable { index }) = events.recv_timeout(TIMEOUT) else {
        panic!("no input announced");
    };
    session.get_input_buffer(index)?[..3].copy_from_slice(b"abc");
    session.queue_input_buffer(index, 0, 3, 0, 0)?;
    session.flush()?;

    let mut format_changed = false;
    let mut queued = false;

    loop {
        match events.recv_timeout(TIMEOUT).expect("codec stalled") {
            CodecEvent::InputAvailable { index } if !queued => {
                session.get_input_buffer(index)?[..3].copy_from_slice(b"xyz");
                session.queue_input_buffer(index, 0, 3, 40_000, 0)?;
                queued = true;
            }
            CodecEvent::InputAvailable { .. } => (),
            CodecEvent::OutputFormatChanged { format } => {
                assert_eq!(format.mime(), Some("video/avc"));
                format_changed = true;
            }
            CodecEvent::OutputAvailable { index, info } => {
                assert!(format_changed);
                assert_eq!(info.presentation_time_us, 40_000);
                assert_eq!(&session.get_output_buffer(index)?[..info.size], b"xyz");
                break;
            }
            CodecEvent::Error(error) => panic!("unexpected {}", error),
        }
    }

    Ok(())
}

#[test]
fn render_time_saturates() -> Result<(), Box<dyn Error>> {
    let frames = Arc::new(Frames::default());
    let mut session = CodecSession::create_by_name("sw.video.decoder")?;
    session.configure(&avc(), Some(Surface::new(frames.clone())), None, 0)?;
    let events = session.events()?;
    session.start()?;
    let mut queued = false;

    loop {
        match events.recv_timeout(TIMEOUT).expect("codec stalled") {
            CodecEvent::InputAvailable { index } if !queued => {
                session.get_input_buffer(index)?[0] = 7;
                session.queue_input_buffer(index, 0, 1, i64::MAX / 10, 0)?;
                queued = true;
            }
            CodecEvent::OutputAvailable { index, .. } => {
                session.release_output_buffer(index, true)?;
                break;
            }
            _ => (),
        }
    }

    session.stop()?;
    assert_eq!(*frames.0.lock().unwrap(), vec![(vec![7], i64::MAX)]);
    Ok(())
}

#[derive(Default)]
struct Frames(Mutex<Vec<(Vec<u8>, i64)>>);

impl RenderTarget for Frames {
    fn queue_frame(&self, frame: &[u8], presentation_time_ns: i64) {
        self.0.lock().unwrap().push((frame.to_vec(), presentation_time_ns));
    }
}

struct HardwareOnly;

impl CryptoSession for HardwareOnly {
    fn scheme(&self) -> SchemeId {
        SchemeId::WIDEVINE
    }

    fn requires_secure_decoder(&self, _: &str) -> bool {
        true
    }

    fn decrypt(&self, _: &CryptoInfo, _: &[u8], _: &mut [u8]) -> mcodec::Result<usize> {
        Ok(0)
    }
}
