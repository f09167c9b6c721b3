use crate::{
    Error, Result,
    drm::info::{CryptoInfo, CryptoMode},
};
use aes::{
    Aes128,
    cipher::{BlockDecrypt, KeyInit, KeyIvInit, StreamCipher, generic_array::GenericArray},
};

type Aes128Ctr = ctr::Ctr128BE<Aes128>;

enum Cipher {
    Ctr(Aes128Ctr),
    Cbc {
        aes: Aes128,
        iv: [u8; 16],
    },
    CbcPattern {
        aes: Aes128,
        iv: [u8; 16],
        crypt_size: usize,
        skip_size: usize,
    },
    None,
}

impl Cipher {
    fn new(key: &[u8; 16], info: &CryptoInfo) -> Self {
        match info.mode() {
            CryptoMode::AesCtr => Self::Ctr(Aes128Ctr::new(
                GenericArray::from_slice(key),
                GenericArray::from_slice(info.iv()),
            )),
            CryptoMode::AesCbc => Self::Cbc {
                aes: Aes128::new(GenericArray::from_slice(key)),
                iv: *info.iv(),
            },
            CryptoMode::AesCbcPattern => {
                let pattern = info.pattern().unwrap_or_default();
                Self::CbcPattern {
                    aes: Aes128::new(GenericArray::from_slice(key)),
                    iv: *info.iv(),
                    crypt_size: pattern.encrypt_blocks as usize * 16,
                    skip_size: pattern.skip_blocks as usize * 16,
                }
            }
            CryptoMode::Unencrypted => Self::None,
        }
    }

    /// Called at the start of every subsample's encrypted region.
    fn begin_subsample(&mut self, sample_iv: &[u8; 16]) {
        if let Self::CbcPattern { iv, .. } = self {
            *iv = *sample_iv;
        }
    }

    fn process(&mut self, input: &[u8], output: &mut [u8]) {
        match self {
            Self::Ctr(cipher) => {
                output.copy_from_slice(input);
                cipher.apply_keystream(output);
            }

            Self::Cbc { aes, iv } => apply_cbc(aes, iv, input, output),

            Self::CbcPattern {
                aes,
                iv,
                crypt_size,
                skip_size,
            } => process_pattern(
                input,
                output,
                *crypt_size,
                *skip_size,
                |inp, out| apply_cbc(aes, iv, inp, out),
            ),

            Self::None => output.copy_from_slice(input),
        }
    }
}

/// Decrypt whole blocks, chaining `iv` to the last ciphertext block.
/// A trailing partial block is copied as is.
fn apply_cbc(aes: &Aes128, iv: &mut [u8; 16], input: &[u8], output: &mut [u8]) {
    let block_count = input.len() / 16;

    for i in 0..block_count {
        let (start, end) = (i * 16, (i + 1) * 16);
        let mut block = GenericArray::clone_from_slice(&input[start..end]);
        aes.decrypt_block(&mut block);

        for j in 0..16 {
            output[start + j] = block[j] ^ iv[j];
        }
        iv.copy_from_slice(&input[start..end]);
    }

    let partial_start = block_count * 16;
    if partial_start < input.len() {
        output[partial_start..].copy_from_slice(&input[partial_start..]);
    }
}

fn process_pattern<F>(
    input: &[u8],
    output: &mut [u8],
    crypt_size: usize,
    skip_size: usize,
    mut decrypt_fn: F,
) where
    F: FnMut(&[u8], &mut [u8]),
{
    if crypt_size == 0 && skip_size == 0 {
        decrypt_fn(input, output);
        return;
    }

    let mut offset = 0;
    while offset < input.len() {
        let remaining = input.len() - offset;

        // a crypt run shorter than one block is left in the clear
        let to_decrypt = if remaining < 16 {
            0
        } else {
            remaining.min(crypt_size)
        };
        if to_decrypt > 0 {
            decrypt_fn(
                &input[offset..offset + to_decrypt],
                &mut output[offset..offset + to_decrypt],
            );
            offset += to_decrypt;
        }

        let to_skip = if to_decrypt == 0 {
            input.len() - offset
        } else {
            (input.len() - offset).min(skip_size)
        };
        if to_skip > 0 {
            output[offset..offset + to_skip].copy_from_slice(&input[offset..offset + to_skip]);
            offset += to_skip;
        }
    }
}

/// Decrypt one sample from `src` into `dst` with the resolved content key.
///
/// Without subsamples the whole sample is one encrypted region.
/// Bytes past the last subsample are copied in the clear.
/// Returns the number of bytes written.
pub(crate) fn decrypt_sample(
    key: &[u8; 16],
    info: &CryptoInfo,
    src: &[u8],
    dst: &mut [u8],
) -> Result<usize> {
    if dst.len() < src.len() {
        return Err(Error::DestinationTooSmall {
            expected: src.len(),
            actual: dst.len(),
        });
    }

    let dst = &mut dst[..src.len()];
    let mut cipher = Cipher::new(key, info);

    if info.num_subsamples() == 0 {
        cipher.begin_subsample(info.iv());
        cipher.process(src, dst);
        return Ok(src.len());
    }

    let total = info.total_size()?;
    if total > src.len() {
        return Err(Error::Subsample(format!(
            "subsamples describe {} bytes but sample is {} bytes",
            total,
            src.len()
        )));
    }

    let mut offset = 0;

    for subsample in info.subsamples() {
        let clear_end = offset + subsample.clear;
        dst[offset..clear_end].copy_from_slice(&src[offset..clear_end]);

        let encrypted_end = clear_end + subsample.encrypted;
        if subsample.encrypted > 0 {
            cipher.begin_subsample(info.iv());
            cipher.process(
                &src[clear_end..encrypted_end],
                &mut dst[clear_end..encrypted_end],
            );
        }

        offset = encrypted_end;
    }

    if offset < src.len() {
        dst[offset..].copy_from_slice(&src[offset..]);
    }

    Ok(src.len())
}
