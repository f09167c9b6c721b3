use anyhow::{Context, Result, bail};
use clap::{Args, ValueEnum};
use log::{debug, info, warn};
use mcodec::{
    codec::{ActionCode, CodecEvent, CodecSession, flags},
    drm::{CryptoInfo, CryptoMode, MediaCrypto, Pattern, SchemeId},
    format::{MediaFormat, keys},
};
use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

/// Split a file into samples and push them through a codec session.
///
/// Every chunk of the input is queued as one sample. With --key each chunk is
/// treated as a separately encrypted sample using the same iv.
#[derive(Debug, Clone, Args)]
pub struct Decode {
    /// File holding the samples.
    #[arg(required = true)]
    input: PathBuf,

    /// Where to write decoded output.
    #[arg(short, long)]
    output: PathBuf,

    /// Mime type of the samples.
    #[arg(long, default_value = "video/avc")]
    mime: String,

    /// Use this codec component instead of the first decoder registered for --mime.
    #[arg(long)]
    codec: Option<String>,

    /// Json format message applied before --mime, e.g. {"width":{"type":"int32","value":1280}}.
    #[arg(long)]
    format: Option<PathBuf>,

    /// Sample size in bytes.
    #[arg(long, default_value_t = 4096, value_parser = clap::value_parser!(u32).range(1..))]
    chunk_size: u32,

    /// Decryption key as KID:KEY in hex.
    #[arg(short, long, help_heading = "Decrypt Options", value_name = "KID:KEY", value_parser = key_parser)]
    key: Option<([u8; 16], [u8; 16])>,

    /// Initialization vector in hex, 8 byte ivs are zero padded.
    #[arg(long, help_heading = "Decrypt Options", value_parser = iv_parser, default_value = "00000000000000000000000000000000")]
    iv: [u8; 16],

    /// Cipher mode of encrypted samples.
    #[arg(long, help_heading = "Decrypt Options", value_enum, default_value_t = Mode::Ctr)]
    mode: Mode,

    /// Number of clear bytes at the start of every sample.
    #[arg(long, help_heading = "Decrypt Options", default_value_t = 0)]
    clear_lead: usize,

    /// Encrypt:skip block pattern for cbcs.
    #[arg(long, help_heading = "Decrypt Options", value_name = "CRYPT:SKIP", value_parser = pattern_parser, default_value = "1:9")]
    pattern: Pattern,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum Mode {
    Ctr,
    Cbc,
    Cbcs,
}

impl From<Mode> for CryptoMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Ctr => CryptoMode::AesCtr,
            Mode::Cbc => CryptoMode::AesCbc,
            Mode::Cbcs => CryptoMode::AesCbcPattern,
        }
    }
}

const EVENT_TIMEOUT: Duration = Duration::from_secs(10);

impl Decode {
    pub fn execute(self) -> Result<()> {
        let data = fs::read(&self.input)
            .with_context(|| format!("could not read {}", self.input.display()))?;
        let chunk_size = self.chunk_size as usize;
        let samples = data.chunks(chunk_size).collect::<Vec<_>>();

        let mut format = match &self.format {
            Some(path) => MediaFormat::from_message(&serde_json::from_slice(&fs::read(path)?)?)?,
            None => MediaFormat::new(),
        };
        format.set_string(keys::MIME, self.mime.as_str());
        format.set_int32(keys::MAX_INPUT_SIZE, i32::try_from(chunk_size)?);

        let crypto = match &self.key {
            Some((kid, key)) => Some(Arc::new(MediaCrypto::new(
                SchemeId::CLEARKEY,
                format!("{}:{}", hex::encode(kid), hex::encode(key)).as_bytes(),
            )?)),
            None => None,
        };

        let mut session = match &self.codec {
            Some(name) => CodecSession::create_by_name(name)?,
            None => CodecSession::create_decoder_by_type(&self.mime)?,
        };

        info!("Decoding {} samples with {}", samples.len(), session.name());
        session.configure(&format, None, crypto, 0)?;
        let events = session.events()?;
        session.start()?;

        let mut writer = BufWriter::new(File::create(&self.output)?);
        let mut next = 0;
        let mut written = 0;

        loop {
            let Some(event) = events.recv_timeout(EVENT_TIMEOUT) else {
                bail!("codec {} stalled", session.name());
            };

            match event {
                CodecEvent::InputAvailable { index } => {
                    if next > samples.len() {
                        continue;
                    }

                    if next == samples.len() {
                        session.queue_input_buffer(index, 0, 0, 0, flags::END_OF_STREAM)?;
                        next += 1;
                        continue;
                    }

                    let sample = samples[next];
                    let time_us = next as i64 * 33_333;
                    session.get_input_buffer(index)?[..sample.len()].copy_from_slice(sample);

                    match self.crypto_info(sample.len())? {
                        Some(info) => {
                            session.queue_secure_input_buffer(index, 0, info, time_us, 0)?
                        }
                        None => session.queue_input_buffer(index, 0, sample.len(), time_us, 0)?,
                    }
                    next += 1;
                }
                CodecEvent::OutputAvailable { index, info } => {
                    if info.size > 0 {
                        let buffer = session.get_output_buffer(index)?;
                        writer.write_all(&buffer[info.offset..info.offset + info.size])?;
                        written += info.size;
                    }

                    session.release_output_buffer(index, false)?;

                    if info.is_end_of_stream() {
                        break;
                    }
                }
                CodecEvent::OutputFormatChanged { format } => {
                    debug!("output format: {}", format);
                }
                CodecEvent::Error(error) => match error.action {
                    ActionCode::Recoverable => warn!("{}", error),
                    _ => bail!(error),
                },
            }
        }

        writer.flush()?;
        session.stop()?;
        session.release();

        info!(
            "Decoded {} bytes into {}",
            written,
            self.output.display()
        );
        Ok(())
    }

    fn crypto_info(&self, size: usize) -> Result<Option<CryptoInfo>> {
        let Some((kid, _)) = self.key else {
            return Ok(None);
        };

        let clear = self.clear_lead.min(size);
        let mut info = CryptoInfo::new(kid, self.iv, self.mode.into(), &[clear], &[size - clear])?;

        if let Mode::Cbcs = self.mode {
            info.set_pattern(self.pattern);
        }

        Ok(Some(info))
    }
}

fn decode_16(value: &str) -> Result<[u8; 16], String> {
    let value = value.replace('-', "").to_ascii_lowercase();

    if value.len() != 32 || !value.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err("expected 32 hex characters.".to_owned());
    }

    let mut bytes = [0u8; 16];
    hex::decode_to_slice(&value, &mut bytes).map_err(|x| x.to_string())?;
    Ok(bytes)
}

fn key_parser(s: &str) -> Result<([u8; 16], [u8; 16]), String> {
    let (kid, key) = s
        .split_once(':')
        .ok_or_else(|| "invalid kid key format used.".to_owned())?;
    Ok((decode_16(kid)?, decode_16(key)?))
}

fn iv_parser(s: &str) -> Result<[u8; 16], String> {
    let s = s.strip_prefix("0x").unwrap_or(s);

    if s.len() == 16 {
        let mut iv = [0u8; 16];
        hex::decode_to_slice(s, &mut iv[..8]).map_err(|x| x.to_string())?;
        return Ok(iv);
    }

    decode_16(s)
}

fn pattern_parser(s: &str) -> Result<Pattern, String> {
    let (crypt, skip) = s
        .split_once(':')
        .ok_or_else(|| "expected CRYPT:SKIP.".to_owned())?;

    Ok(Pattern::new(
        crypt.trim().parse().map_err(|_| "invalid crypt block count.")?,
        skip.trim().parse().map_err(|_| "invalid skip block count.")?,
    ))
}
