//! Per-sample encryption metadata.

use crate::{
    Error, Result,
    format::{MediaFormat, keys},
};
use log::{debug, warn};

/// Cipher mode of an encrypted sample.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum CryptoMode {
    #[default]
    Unencrypted,
    /// AES-128-CTR, `cenc`.
    AesCtr,
    /// AES-128-CBC over whole blocks, `cbc1`.
    AesCbc,
    /// AES-128-CBC with an encrypt/skip block pattern, `cbcs`.
    AesCbcPattern,
}

impl CryptoMode {
    /// Map the integer stored under [`keys::CRYPTO_MODE`].
    pub fn from_raw(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::Unencrypted),
            1 => Some(Self::AesCtr),
            2 => Some(Self::AesCbc),
            3 => Some(Self::AesCbcPattern),
            _ => None,
        }
    }

    pub fn as_raw(self) -> i32 {
        match self {
            Self::Unencrypted => 0,
            Self::AesCtr => 1,
            Self::AesCbc => 2,
            Self::AesCbcPattern => 3,
        }
    }
}

/// Encrypt/skip pattern in 16 byte blocks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pattern {
    pub encrypt_blocks: u32,
    pub skip_blocks: u32,
}

impl Pattern {
    pub fn new(encrypt_blocks: u32, skip_blocks: u32) -> Self {
        Self {
            encrypt_blocks,
            skip_blocks,
        }
    }
}

/// Entry describing a subsample's cleartext and encrypted portions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Subsample {
    /// Number of cleartext bytes at the start of the subsample.
    pub clear: usize,
    /// Number of encrypted bytes following the cleartext.
    pub encrypted: usize,
}

impl Subsample {
    pub fn new(clear: usize, encrypted: usize) -> Self {
        Self { clear, encrypted }
    }
}

/// Encryption metadata of one secure sample.
///
/// The sum of all subsample sizes is expected to equal the size of the sample
/// it describes. This is the caller's contract and is not validated here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CryptoInfo {
    key: [u8; 16],
    iv: [u8; 16],
    mode: CryptoMode,
    subsamples: Vec<Subsample>,
    pattern: Option<Pattern>,
}

impl CryptoInfo {
    /// Create crypto info from parallel clear/encrypted byte count arrays.
    ///
    /// # Arguments
    ///
    /// * `key` - Key id (KID) the sample was encrypted with.
    /// * `iv` - Initialization vector, 8 byte IVs are zero padded by the caller.
    /// * `mode` - Cipher mode.
    /// * `clear_bytes` - Clear byte count of each subsample.
    /// * `encrypted_bytes` - Encrypted byte count of each subsample.
    pub fn new(
        key: [u8; 16],
        iv: [u8; 16],
        mode: CryptoMode,
        clear_bytes: &[usize],
        encrypted_bytes: &[usize],
    ) -> Result<Self> {
        if clear_bytes.len() != encrypted_bytes.len() {
            return Err(Error::Subsample(format!(
                "{} clear byte counts for {} encrypted byte counts",
                clear_bytes.len(),
                encrypted_bytes.len()
            )));
        }

        let subsamples = clear_bytes
            .iter()
            .zip(encrypted_bytes)
            .map(|(clear, encrypted)| Subsample::new(*clear, *encrypted))
            .collect();

        Ok(Self::from_subsamples(key, iv, mode, subsamples))
    }

    pub fn from_subsamples(
        key: [u8; 16],
        iv: [u8; 16],
        mode: CryptoMode,
        subsamples: Vec<Subsample>,
    ) -> Self {
        Self {
            key,
            iv,
            mode,
            subsamples,
            pattern: None,
        }
    }

    /// Convert a demuxer provided per-sample metadata record.
    ///
    /// Sizes are stored as little endian `u32` arrays under
    /// [`keys::CRYPTO_PLAIN_SIZES`] and [`keys::CRYPTO_ENCRYPTED_SIZES`].
    /// Returns `None` when the record carries no encryption metadata or is malformed.
    pub fn from_meta(meta: &MediaFormat) -> Option<Self> {
        let encrypted = read_sizes(meta.get_buffer(keys::CRYPTO_ENCRYPTED_SIZES)?)?;
        let clear = match meta.get_buffer(keys::CRYPTO_PLAIN_SIZES) {
            Some(data) => read_sizes(data)?,
            None => vec![0; encrypted.len()],
        };

        if clear.len() != encrypted.len() {
            warn!(
                "crypto record has {} plain sizes but {} encrypted sizes",
                clear.len(),
                encrypted.len()
            );
            return None;
        }

        let key = match meta.get_buffer(keys::CRYPTO_KEY) {
            Some(data) => data.try_into().ok()?,
            None => [0u8; 16],
        };

        let mut iv = [0u8; 16];
        if let Some(data) = meta.get_buffer(keys::CRYPTO_IV) {
            if data.len() > 16 {
                warn!("crypto record iv is {} bytes", data.len());
                return None;
            }
            iv[..data.len()].copy_from_slice(data);
        }

        let mode = match meta.get_int32(keys::CRYPTO_MODE) {
            Some(x) => CryptoMode::from_raw(x)?,
            None => CryptoMode::AesCtr,
        };

        let mut info = Self::new(key, iv, mode, &clear, &encrypted).ok()?;

        if let (Some(encrypt), Some(skip)) = (
            meta.get_int32(keys::CRYPTO_ENCRYPTED_BYTE_BLOCK),
            meta.get_int32(keys::CRYPTO_SKIP_BYTE_BLOCK),
        ) {
            info.set_pattern(Pattern::new(
                u32::try_from(encrypt).ok()?,
                u32::try_from(skip).ok()?,
            ));
        }

        Some(info)
    }

    /// Attach pattern encryption parameters.
    ///
    /// Only meaningful for [`CryptoMode::AesCbcPattern`], other modes ignore it.
    pub fn set_pattern(&mut self, pattern: Pattern) {
        if self.mode != CryptoMode::AesCbcPattern {
            debug!("pattern {:?} set on {:?} sample", pattern, self.mode);
        }
        self.pattern = Some(pattern);
    }

    pub fn num_subsamples(&self) -> usize {
        self.subsamples.len()
    }

    pub fn key(&self) -> &[u8; 16] {
        &self.key
    }

    pub fn iv(&self) -> &[u8; 16] {
        &self.iv
    }

    pub fn mode(&self) -> CryptoMode {
        self.mode
    }

    pub fn pattern(&self) -> Option<Pattern> {
        self.pattern
    }

    pub fn subsamples(&self) -> &[Subsample] {
        &self.subsamples
    }

    /// Total bytes described by all subsamples.
    ///
    /// Fails with [`Error::Subsample`] when the sizes do not fit in `usize`.
    pub fn total_size(&self) -> Result<usize> {
        self.subsamples
            .iter()
            .try_fold(0usize, |total, x| {
                total.checked_add(x.clear)?.checked_add(x.encrypted)
            })
            .ok_or_else(|| Error::Subsample("subsample sizes overflow".to_owned()))
    }

    /// Copy the key id into `dst`, which must hold at least 16 bytes.
    pub fn get_key(&self, dst: &mut [u8]) -> Result<()> {
        copy_into(&self.key, dst)
    }

    /// Copy the iv into `dst`, which must hold at least 16 bytes.
    pub fn get_iv(&self, dst: &mut [u8]) -> Result<()> {
        copy_into(&self.iv, dst)
    }

    /// Copy the clear byte counts into `dst`, which must hold one entry per subsample.
    pub fn get_clear_bytes(&self, dst: &mut [usize]) -> Result<()> {
        let clear: Vec<usize> = self.subsamples.iter().map(|x| x.clear).collect();
        copy_into(&clear, dst)
    }

    /// Copy the encrypted byte counts into `dst`, which must hold one entry per subsample.
    pub fn get_encrypted_bytes(&self, dst: &mut [usize]) -> Result<()> {
        let encrypted: Vec<usize> = self.subsamples.iter().map(|x| x.encrypted).collect();
        copy_into(&encrypted, dst)
    }
}

fn copy_into<T: Copy>(src: &[T], dst: &mut [T]) -> Result<()> {
    if dst.len() < src.len() {
        return Err(Error::DestinationTooSmall {
            expected: src.len(),
            actual: dst.len(),
        });
    }

    dst[..src.len()].copy_from_slice(src);
    Ok(())
}

fn read_sizes(data: &[u8]) -> Option<Vec<usize>> {
    if data.len() % 4 != 0 {
        return None;
    }

    Some(
        data.chunks_exact(4)
            .map(|x| u32::from_le_bytes([x[0], x[1], x[2], x[3]]) as usize)
            .collect(),
    )
}
