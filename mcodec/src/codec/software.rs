//! Software passthrough codec.
//!
//! Copies every queued input sample into an output slot, decrypting secure
//! samples through the attached [`MediaCrypto`] first. Processing happens on
//! a dedicated worker thread which raises all notifications.

use crate::{
    Error, Result,
    codec::{
        ActionCode, BufferInfo, BufferPool, CodecBackend, NativeListener, SlotGuard, Surface,
        flags,
    },
    drm::{CryptoInfo, MediaCrypto},
    format::{MediaFormat, keys},
};
use log::{debug, trace, warn};
use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Arc,
        mpsc::{self, Receiver, Sender},
    },
    thread::{self, JoinHandle},
};

/// Error code raised when a secure sample cannot be decrypted.
pub const ERROR_DECRYPT: i32 = -2000;

const SLOT_COUNT: usize = 4;
const DEFAULT_MAX_INPUT_SIZE: usize = 1024 * 1024;

struct Config {
    input_format: MediaFormat,
    output_format: MediaFormat,
    surface: Option<Surface>,
    crypto: Option<Arc<MediaCrypto>>,
    inputs: Arc<BufferPool>,
    outputs: Arc<BufferPool>,
}

struct Queued {
    index: usize,
    offset: usize,
    size: usize,
    presentation_time_us: i64,
    flags: u32,
    crypto: Option<CryptoInfo>,
}

enum Command {
    Resume,
    Queue(Queued),
    ReleaseOutput {
        index: usize,
        render: bool,
        timestamp_ns: Option<i64>,
    },
    SetSurface(Surface),
    SetCrypto(Option<Arc<MediaCrypto>>),
    Flush(Sender<()>),
    Stop,
}

struct Worker {
    commands: Sender<Command>,
    handle: JoinHandle<()>,
}

pub struct SoftwareCodec {
    name: String,
    listener: Option<Arc<dyn NativeListener>>,
    config: Option<Config>,
    worker: Option<Worker>,
}

impl SoftwareCodec {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            listener: None,
            config: None,
            worker: None,
        }
    }

    pub(crate) fn boxed(name: &str) -> Box<dyn CodecBackend> {
        Box::new(Self::new(name))
    }

    fn config(&self) -> Result<&Config> {
        self.config
            .as_ref()
            .ok_or_else(|| Error::Backend(format!("{} is not configured", self.name)))
    }

    fn config_mut(&mut self) -> Result<&mut Config> {
        self.config
            .as_mut()
            .ok_or_else(|| Error::Backend(format!("{} is not configured", self.name)))
    }

    fn send(&self, command: Command) -> Result<()> {
        let worker = self
            .worker
            .as_ref()
            .ok_or_else(|| Error::Backend(format!("{} is not started", self.name)))?;

        worker
            .commands
            .send(command)
            .map_err(|_| Error::Backend(format!("{} worker exited", self.name)))
    }

    fn check_input(&self, index: usize, offset: usize, size: usize) -> Result<()> {
        let inputs = &self.config()?.inputs;

        if index >= inputs.len() {
            return Err(Error::InputNotOwned(index));
        }

        match offset.checked_add(size) {
            Some(end) if end <= inputs.capacity() => Ok(()),
            _ => Err(Error::InvalidRange {
                offset,
                size,
                capacity: inputs.capacity(),
            }),
        }
    }

    fn shutdown(&mut self) -> Result<()> {
        if let Some(worker) = self.worker.take() {
            let _ = worker.commands.send(Command::Stop);
            worker
                .handle
                .join()
                .map_err(|_| Error::Backend(format!("{} worker panicked", self.name)))?;
        }

        Ok(())
    }
}

impl CodecBackend for SoftwareCodec {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_listener(&mut self, listener: Option<Arc<dyn NativeListener>>) {
        self.listener = listener;
    }

    fn configure(
        &mut self,
        format: &MediaFormat,
        surface: Option<Surface>,
        crypto: Option<Arc<MediaCrypto>>,
        flags: u32,
    ) -> Result<()> {
        if self.worker.is_some() {
            return Err(Error::Backend(format!("{} is running", self.name)));
        }

        let capacity = format
            .get_int32(keys::MAX_INPUT_SIZE)
            .and_then(|x| usize::try_from(x).ok())
            .filter(|x| *x > 0)
            .unwrap_or(DEFAULT_MAX_INPUT_SIZE);

        let mut output_format = format.clone();
        output_format.remove(keys::MAX_INPUT_SIZE);
        output_format.remove(keys::CSD_0);

        debug!(
            "{}: configured with {} (flags {:#x}, {} byte slots)",
            self.name, format, flags, capacity
        );

        self.config = Some(Config {
            input_format: format.clone(),
            output_format,
            surface,
            crypto,
            inputs: Arc::new(BufferPool::new(SLOT_COUNT, capacity)),
            outputs: Arc::new(BufferPool::new(SLOT_COUNT, capacity)),
        });
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        if self.worker.is_none() {
            let config = self.config()?;
            let processor = Processor {
                name: self.name.clone(),
                listener: self.listener.clone(),
                inputs: config.inputs.clone(),
                outputs: config.outputs.clone(),
                output_format: config.output_format.clone(),
                surface: config.surface.clone(),
                crypto: config.crypto.clone(),
                running: false,
                format_sent: false,
                end_of_stream: false,
                free_outputs: (0..config.outputs.len()).collect(),
                pending: VecDeque::new(),
                outstanding: HashMap::new(),
            };

            let (commands, receiver) = mpsc::channel();
            let handle = thread::Builder::new()
                .name(format!("{}-worker", self.name))
                .spawn(move || processor.run(receiver))?;

            self.worker = Some(Worker { commands, handle });
        }

        self.send(Command::Resume)
    }

    fn stop(&mut self) -> Result<()> {
        self.shutdown()?;
        self.config = None;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        let (ack, done) = mpsc::channel();
        self.send(Command::Flush(ack))?;
        done.recv()
            .map_err(|_| Error::Backend(format!("{} worker exited during flush", self.name)))
    }

    fn input_buffer(&self, index: usize) -> Option<SlotGuard<'_>> {
        self.config.as_ref()?.inputs.slot(index)
    }

    fn output_buffer(&self, index: usize) -> Option<SlotGuard<'_>> {
        self.config.as_ref()?.outputs.slot(index)
    }

    fn queue_input(
        &mut self,
        index: usize,
        offset: usize,
        size: usize,
        presentation_time_us: i64,
        flags: u32,
    ) -> Result<()> {
        self.check_input(index, offset, size)?;
        self.send(Command::Queue(Queued {
            index,
            offset,
            size,
            presentation_time_us,
            flags,
            crypto: None,
        }))
    }

    fn queue_secure_input(
        &mut self,
        index: usize,
        offset: usize,
        info: CryptoInfo,
        presentation_time_us: i64,
        flags: u32,
    ) -> Result<()> {
        if self.config()?.crypto.is_none() {
            return Err(Error::NoCrypto);
        }

        let size = info.total_size()?;
        self.check_input(index, offset, size)?;
        self.send(Command::Queue(Queued {
            index,
            offset,
            size,
            presentation_time_us,
            flags,
            crypto: Some(info),
        }))
    }

    fn release_output(
        &mut self,
        index: usize,
        render: bool,
        timestamp_ns: Option<i64>,
    ) -> Result<()> {
        if index >= self.config()?.outputs.len() {
            return Err(Error::OutputNotOwned(index));
        }

        self.send(Command::ReleaseOutput {
            index,
            render,
            timestamp_ns,
        })
    }

    fn input_format(&self) -> Result<MediaFormat> {
        Ok(self.config()?.input_format.clone())
    }

    fn output_format(&self) -> Result<MediaFormat> {
        Ok(self.config()?.output_format.clone())
    }

    fn set_output_surface(&mut self, surface: Surface) -> Result<()> {
        self.config_mut()?.surface = Some(surface.clone());
        self.send(Command::SetSurface(surface))
    }

    fn set_parameters(&mut self, params: &MediaFormat) -> Result<()> {
        let config = self.config_mut()?;
        config.output_format.update_existing(params);

        for key in config.input_format.update_existing(params) {
            debug!("{}: ignoring unsupported parameter {}", self.name, key);
        }

        Ok(())
    }

    fn release_crypto(&mut self) -> Result<()> {
        self.config_mut()?.crypto = None;

        if self.worker.is_some() {
            self.send(Command::SetCrypto(None))?;
        }

        Ok(())
    }

    fn release(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("{}: {}", self.name, e);
        }

        self.config = None;
        self.listener = None;
    }
}

impl Drop for SoftwareCodec {
    fn drop(&mut self) {
        self.release();
    }
}

struct Processor {
    name: String,
    listener: Option<Arc<dyn NativeListener>>,
    inputs: Arc<BufferPool>,
    outputs: Arc<BufferPool>,
    output_format: MediaFormat,
    surface: Option<Surface>,
    crypto: Option<Arc<MediaCrypto>>,
    running: bool,
    format_sent: bool,
    end_of_stream: bool,
    free_outputs: VecDeque<usize>,
    pending: VecDeque<Queued>,
    outstanding: HashMap<usize, BufferInfo>,
}

impl Processor {
    fn run(mut self, commands: Receiver<Command>) {
        while let Ok(command) = commands.recv() {
            match command {
                Command::Resume => self.resume(),
                Command::Queue(queued) => {
                    self.pending.push_back(queued);
                    self.drain();
                }
                Command::ReleaseOutput {
                    index,
                    render,
                    timestamp_ns,
                } => {
                    self.release_output(index, render, timestamp_ns);
                    self.drain();
                }
                Command::SetSurface(surface) => self.surface = Some(surface),
                Command::SetCrypto(crypto) => self.crypto = crypto,
                Command::Flush(ack) => {
                    self.flush();
                    let _ = ack.send(());
                }
                Command::Stop => break,
            }
        }

        debug!("{}: worker exited", self.name);
    }

    fn notify(&self, f: impl FnOnce(&dyn NativeListener)) {
        if let Some(listener) = &self.listener {
            f(listener.as_ref());
        }
    }

    fn resume(&mut self) {
        self.running = true;

        if !self.end_of_stream {
            for index in 0..self.inputs.len() {
                if !self.pending.iter().any(|x| x.index == index) {
                    self.notify(|x| x.on_input_available(index));
                }
            }
        }

        self.drain();
    }

    fn flush(&mut self) {
        trace!("{}: flushing {} pending inputs", self.name, self.pending.len());
        self.running = false;
        self.end_of_stream = false;
        self.format_sent = false;
        self.pending.clear();
        self.outstanding.clear();
        self.free_outputs = (0..self.outputs.len()).collect();
    }

    fn drain(&mut self) {
        while self.running && !self.free_outputs.is_empty() {
            let Some(queued) = self.pending.pop_front() else {
                break;
            };
            let Some(output) = self.free_outputs.pop_front() else {
                break;
            };

            self.process(queued, output);
        }
    }

    fn process(&mut self, queued: Queued, output: usize) {
        let result = match (self.inputs.slot(queued.index), self.outputs.slot(output)) {
            (Some(input), Some(mut out)) => {
                let src = &input[queued.offset..queued.offset + queued.size];
                let dst = &mut out[..queued.size];

                match (&queued.crypto, &self.crypto) {
                    (Some(info), Some(crypto)) => crypto.decrypt(info, src, dst),
                    (Some(_), None) => Err(Error::NoCrypto),
                    (None, _) => {
                        dst.copy_from_slice(src);
                        Ok(queued.size)
                    }
                }
            }
            _ => Err(Error::InputNotOwned(queued.index)),
        };

        if queued.flags & flags::END_OF_STREAM != 0 {
            self.end_of_stream = true;
        } else {
            self.notify(|x| x.on_input_available(queued.index));
        }

        let size = match result {
            Ok(x) => x,
            Err(e) => {
                self.free_outputs.push_front(output);
                self.notify(|x| {
                    x.on_error(ERROR_DECRYPT, ActionCode::Recoverable, &e.to_string())
                });
                return;
            }
        };

        if !self.format_sent {
            self.format_sent = true;
            let format = self.output_format.clone();
            self.notify(|x| x.on_output_format_changed(format));
        }

        let info = BufferInfo::new(
            0,
            size,
            queued.presentation_time_us,
            queued.flags & (flags::KEY_FRAME | flags::CODEC_CONFIG | flags::END_OF_STREAM),
        );
        self.outstanding.insert(output, info);
        self.notify(|x| x.on_output_available(output, info));
    }

    fn release_output(&mut self, index: usize, render: bool, timestamp_ns: Option<i64>) {
        let Some(info) = self.outstanding.remove(&index) else {
            warn!("{}: output {} released twice", self.name, index);
            return;
        };

        if render {
            match (&self.surface, self.outputs.slot(index)) {
                (Some(surface), Some(slot)) => surface.render(
                    &slot[info.offset..info.offset + info.size],
                    timestamp_ns.unwrap_or(info.presentation_time_us.saturating_mul(1000)),
                ),
                _ => debug!("{}: no surface to render output {}", self.name, index),
            }
        }

        self.free_outputs.push_back(index);
    }
}
