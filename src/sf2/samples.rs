//! Sample source formats and PCM transcoding
//!
//! Every sample entering the SoundFont is normalised to signed 16-bit
//! PCM here, whatever its on-cartridge encoding.

use crate::{Result, RipError};

/// On-cartridge encodings accepted by [`crate::sf2::Sf2Document::add_sample`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SampleFormat {
    /// One unsigned byte per sample, 0x80 is silence
    Unsigned8,
    /// One signed byte per sample
    Signed8,
    /// Little-endian signed 16-bit, passed through
    Signed16,
    /// 16 nibble-packed bytes holding one 32-step GameBoy channel-3
    /// waveform, expanded and repeated to the requested length
    GameBoyCh3,
    /// Block differential PCM: 33-byte blocks decoding to 64 samples
    Bdpcm,
}

/// Expansion of channel-3 waveform nibbles to 16-bit. The top entry
/// expands nibble 15 through 0xFF rather than 0xF0; this matches the
/// original conversion table and is kept verbatim.
const GB3_NIBBLE: [i16; 16] = [
    -32768, -28672, -24576, -20480, -16384, -12288, -8192, -4096, //
    0, 4096, 8192, 12288, 16384, 20480, 24576, 32512,
];

/// 4-bit delta lookup for BDPCM blocks.
const BDPCM_DELTA: [i8; 16] = [
    0, 1, 4, 9, 16, 25, 36, 49, -64, -49, -36, -25, -16, -9, -4, -1,
];

/// Decode `size` output samples from `raw` in the given format.
pub(crate) fn decode(format: SampleFormat, raw: &[u8], size: usize) -> Result<Vec<i16>> {
    match format {
        SampleFormat::Unsigned8 => {
            let raw = need(raw, size)?;
            Ok(raw.iter().map(|&b| (i16::from(b) - 128) << 8).collect())
        }
        SampleFormat::Signed8 => {
            let raw = need(raw, size)?;
            Ok(raw.iter().map(|&b| i16::from(b as i8) << 8).collect())
        }
        SampleFormat::Signed16 => {
            let raw = need(raw, size * 2)?;
            Ok(raw
                .chunks_exact(2)
                .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
                .collect())
        }
        SampleFormat::GameBoyCh3 => {
            let raw = need(raw, 16)?;
            let repeat = (size / 32).max(1);
            let mut out = Vec::with_capacity(32 * repeat);
            for &byte in raw {
                for nibble in [byte >> 4, byte & 0x0F] {
                    let value = GB3_NIBBLE[nibble as usize];
                    out.extend(std::iter::repeat(value).take(repeat));
                }
            }
            out.resize(size, 0);
            Ok(out)
        }
        SampleFormat::Bdpcm => {
            let blocks = size / 64;
            let raw = need(raw, blocks * 33)?;
            let mut out = Vec::with_capacity(size);
            for block in raw.chunks_exact(33) {
                let mut sample = block[0] as i8;
                for &byte in &block[1..] {
                    for nibble in [byte >> 4, byte & 0x0F] {
                        sample = sample.wrapping_add(BDPCM_DELTA[nibble as usize]);
                        out.push(i16::from(sample) << 8);
                    }
                }
            }
            // Residue past whole blocks is silence
            out.resize(size, 0);
            Ok(out)
        }
    }
}

fn need(raw: &[u8], count: usize) -> Result<&[u8]> {
    if raw.len() < count {
        return Err(RipError::SampleInvalid(format!(
            "sample data truncated: need {count} bytes, have {}",
            raw.len()
        )));
    }
    Ok(&raw[..count])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsigned8_boundaries() {
        let out = decode(SampleFormat::Unsigned8, &[0x80, 0x00, 0xFF], 3).unwrap();
        assert_eq!(out, [0x0000, -0x8000, 0x7F00]);
    }

    #[test]
    fn signed8_shifts_to_high_byte() {
        let out = decode(SampleFormat::Signed8, &[0x00, 0x7F, 0x80], 3).unwrap();
        assert_eq!(out, [0, 0x7F00, -0x8000]);
    }

    #[test]
    fn signed16_passthrough() {
        let out = decode(SampleFormat::Signed16, &[0x34, 0x12, 0xFF, 0xFF], 2).unwrap();
        assert_eq!(out, [0x1234, -1]);
    }

    #[test]
    fn gameboy_ch3_expands_nibbles_high_first() {
        let mut raw = [0u8; 16];
        raw[0] = 0x8F;
        let out = decode(SampleFormat::GameBoyCh3, &raw, 32).unwrap();
        assert_eq!(out[0], 0); // nibble 8
        assert_eq!(out[1], 32512); // nibble 15 through the 0xFF entry
        assert_eq!(out[2], -32768); // nibble 0
        assert_eq!(out.len(), 32);
    }

    #[test]
    fn gameboy_ch3_repeats_for_longer_sizes() {
        let mut raw = [0u8; 16];
        raw[0] = 0x8F;
        let out = decode(SampleFormat::GameBoyCh3, &raw, 128).unwrap();
        assert_eq!(out.len(), 128);
        // Each nibble now covers four output samples
        assert_eq!(&out[0..4], &[0, 0, 0, 0]);
        assert_eq!(&out[4..8], &[32512; 4]);
    }

    #[test]
    fn bdpcm_decodes_deltas_from_seed() {
        let mut block = [0u8; 33];
        block[0] = 5; // seed
        block[1] = 0x12; // +1 then +4
        block[2] = 0x8F; // -64 then -1
        let out = decode(SampleFormat::Bdpcm, &block, 64).unwrap();
        assert_eq!(out.len(), 64);
        assert_eq!(out[0], 6 << 8);
        assert_eq!(out[1], 10 << 8);
        assert_eq!(out[2], (10 - 64) << 8);
        assert_eq!(out[3], (10 - 64 - 1) << 8);
        // remaining deltas are zero
        assert_eq!(out[63], (10 - 64 - 1) << 8);
    }

    #[test]
    fn bdpcm_zeroes_residue_past_whole_blocks() {
        let block = [0u8; 33];
        let out = decode(SampleFormat::Bdpcm, &block, 100).unwrap();
        assert_eq!(out.len(), 100);
        assert!(out[64..].iter().all(|&v| v == 0));
    }

    #[test]
    fn truncated_input_is_rejected() {
        assert!(decode(SampleFormat::Signed8, &[0; 4], 8).is_err());
        assert!(decode(SampleFormat::Bdpcm, &[0; 32], 64).is_err());
    }
}
