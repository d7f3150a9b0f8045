//! Reference recordings for PSG and synthetic instruments
//!
//! Two process-wide blobs back the GameBoy-channel and Golden Sun
//! instrument builders: `psg_data` (band-limited pulse recordings and
//! per-key noise recordings) and `goldensun_synth` (single-cycle
//! square/saw/triangle tables). Both are streams of little-endian
//! signed 16-bit samples, synthesised deterministically on first use
//! and shared read-only for the rest of the process.
//!
//! Layout of `psg_data`, in samples:
//! - three pulse banks (12.5%, 25%, 50% duty), each the concatenation
//!   of five one-loop recordings of 689/344/172/86/43 samples;
//! - two noise banks (normal then metallic), one 16384-sample
//!   recording per MIDI key 42..=77.
//!
//! Layout of `goldensun_synth`, in samples: a 64-sample saw cycle, a
//! 64-sample triangle cycle, then 128 consecutive 64-sample square
//! cycles sweeping the duty from narrow to 50%.

use std::f64::consts::PI;

use once_cell::sync::Lazy;

/// Nominal recording rate of both blobs in Hz.
pub const RECORDING_RATE: u32 = 44_100;

/// Loop lengths of the five pulse recordings per duty bank.
pub const PULSE_LOOP_SIZES: [usize; 5] = [689, 344, 172, 86, 43];

/// Key ranges served by each pulse recording.
pub const PULSE_ZONES: [(u8, u8); 5] = [(0, 45), (46, 57), (58, 69), (70, 81), (82, 127)];

/// Loop lengths of the four channel-3 wavetable expansions.
pub const WAVE_LOOP_SIZES: [usize; 4] = [256, 128, 64, 32];

/// Key ranges served by each channel-3 expansion.
pub const WAVE_ZONES: [(u8, u8); 4] = [(0, 52), (53, 64), (65, 76), (77, 127)];

/// Lowest key with its own noise recording.
pub const NOISE_KEY_MIN: u8 = 42;
/// Highest key with its own noise recording.
pub const NOISE_KEY_MAX: u8 = 77;

const NOISE_RECORDING_LEN: usize = 16_384;
const NOISE_KEY_COUNT: usize = (NOISE_KEY_MAX - NOISE_KEY_MIN) as usize + 1;

const PULSE_DUTIES: [f64; 3] = [0.125, 0.25, 0.5];
const PULSE_BANK_LEN: usize = 689 + 344 + 172 + 86 + 43;

const SYNTH_CYCLE_LEN: usize = 64;
const SYNTH_SQUARE_CYCLES: usize = 128;
const SYNTH_SQUARE_OFFSET: usize = 2 * SYNTH_CYCLE_LEN;

const AMPLITUDE: f64 = 30_000.0;

static PSG_DATA: Lazy<Vec<u8>> = Lazy::new(build_psg_data);
static GOLDENSUN_SYNTH: Lazy<Vec<u8>> = Lazy::new(build_goldensun_synth);

/// The complete `psg_data` blob.
pub fn psg_data() -> &'static [u8] {
    &PSG_DATA
}

/// The complete `goldensun_synth` blob.
pub fn goldensun_synth() -> &'static [u8] {
    &GOLDENSUN_SYNTH
}

/// One pulse recording. `duty` must already be coerced into 0..=2.
pub fn pulse_region(duty: u8, zone: usize) -> &'static [u8] {
    assert!((duty as usize) < PULSE_DUTIES.len());
    assert!(zone < PULSE_LOOP_SIZES.len());
    let mut offset = duty as usize * PULSE_BANK_LEN;
    offset += PULSE_LOOP_SIZES[..zone].iter().sum::<usize>();
    slice_samples(psg_data(), offset, PULSE_LOOP_SIZES[zone])
}

/// The noise recording for one key in `NOISE_KEY_MIN..=NOISE_KEY_MAX`.
pub fn noise_region(metallic: bool, key: u8) -> &'static [u8] {
    assert!((NOISE_KEY_MIN..=NOISE_KEY_MAX).contains(&key));
    let mut offset = PULSE_DUTIES.len() * PULSE_BANK_LEN;
    if metallic {
        offset += NOISE_KEY_COUNT * NOISE_RECORDING_LEN;
    }
    offset += (key - NOISE_KEY_MIN) as usize * NOISE_RECORDING_LEN;
    slice_samples(psg_data(), offset, NOISE_RECORDING_LEN)
}

/// The 64-sample saw cycle.
pub fn synth_saw() -> &'static [u8] {
    slice_samples(goldensun_synth(), 0, SYNTH_CYCLE_LEN)
}

/// The 64-sample triangle cycle.
pub fn synth_triangle() -> &'static [u8] {
    slice_samples(goldensun_synth(), SYNTH_CYCLE_LEN, SYNTH_CYCLE_LEN)
}

/// The 64-sample square cycle selected by a duty byte.
pub fn synth_square_cycle(duty: u8) -> &'static [u8] {
    let cycle = (duty >> 2) as usize;
    slice_samples(
        goldensun_synth(),
        SYNTH_SQUARE_OFFSET + cycle * SYNTH_CYCLE_LEN,
        SYNTH_CYCLE_LEN,
    )
}

/// The full duty-sweep square region used by variable-duty voices.
pub fn synth_square_sweep() -> &'static [u8] {
    slice_samples(
        goldensun_synth(),
        SYNTH_SQUARE_OFFSET,
        SYNTH_SQUARE_CYCLES * SYNTH_CYCLE_LEN,
    )
}

fn slice_samples(blob: &[u8], offset: usize, len: usize) -> &[u8] {
    &blob[offset * 2..(offset + len) * 2]
}

fn push_samples(out: &mut Vec<u8>, samples: &[f64]) {
    for &value in samples {
        let clamped = value.clamp(-32767.0, 32767.0) as i16;
        out.extend_from_slice(&clamped.to_le_bytes());
    }
}

fn build_psg_data() -> Vec<u8> {
    let total =
        PULSE_DUTIES.len() * PULSE_BANK_LEN + 2 * NOISE_KEY_COUNT * NOISE_RECORDING_LEN;
    let mut out = Vec::with_capacity(total * 2);
    for &duty in &PULSE_DUTIES {
        for &len in &PULSE_LOOP_SIZES {
            push_samples(&mut out, &band_limited_pulse(len, duty));
        }
    }
    for metallic in [false, true] {
        for key in NOISE_KEY_MIN..=NOISE_KEY_MAX {
            push_samples(&mut out, &noise_recording(metallic, key));
        }
    }
    debug_assert_eq!(out.len(), total * 2);
    out
}

fn build_goldensun_synth() -> Vec<u8> {
    let mut out = Vec::with_capacity((2 + SYNTH_SQUARE_CYCLES) * SYNTH_CYCLE_LEN * 2);

    let mut cycle = [0.0f64; SYNTH_CYCLE_LEN];
    for (index, slot) in cycle.iter_mut().enumerate() {
        let phase = index as f64 / SYNTH_CYCLE_LEN as f64;
        *slot = (2.0 * phase - 1.0) * AMPLITUDE;
    }
    push_samples(&mut out, &cycle);

    for (index, slot) in cycle.iter_mut().enumerate() {
        let phase = index as f64 / SYNTH_CYCLE_LEN as f64;
        let tri = if phase < 0.5 {
            4.0 * phase - 1.0
        } else {
            3.0 - 4.0 * phase
        };
        *slot = tri * AMPLITUDE;
    }
    push_samples(&mut out, &cycle);

    for step in 0..SYNTH_SQUARE_CYCLES {
        let duty = (step as f64 + 1.0) / (2.0 * SYNTH_SQUARE_CYCLES as f64);
        for (index, slot) in cycle.iter_mut().enumerate() {
            let phase = index as f64 / SYNTH_CYCLE_LEN as f64;
            *slot = if phase < duty { AMPLITUDE } else { -AMPLITUDE };
        }
        push_samples(&mut out, &cycle);
    }
    out
}

/// One loop of a pulse wave, band-limited by summing harmonics up to
/// the Nyquist frequency of the recording rate.
fn band_limited_pulse(len: usize, duty: f64) -> Vec<f64> {
    let harmonics = (len - 1) / 2;
    let mut cycle = vec![0.0f64; len];
    for (index, slot) in cycle.iter_mut().enumerate() {
        let phase = index as f64 / len as f64;
        let mut acc = 0.0;
        for harmonic in 1..=harmonics {
            let n = harmonic as f64;
            acc += (2.0 / (n * PI)) * (PI * n * duty).sin() * (2.0 * PI * n * phase).cos();
        }
        *slot = acc;
    }
    let peak = cycle.iter().fold(0.0f64, |max, &v| max.max(v.abs()));
    if peak > 0.0 {
        let scale = AMPLITUDE / peak;
        for slot in &mut cycle {
            *slot *= scale;
        }
    }
    cycle
}

/// One looping LFSR noise recording for a key, clocked at eight times
/// the key's equal-tempered frequency and held between clocks.
fn noise_recording(metallic: bool, key: u8) -> Vec<f64> {
    let freq = 440.0 * 2.0f64.powf((f64::from(key) - 69.0) / 12.0);
    let step = freq * 8.0 / f64::from(RECORDING_RATE);
    let mut lfsr: u16 = if metallic { 0x7F } else { 0x7FFF };
    let mut phase = 0.0f64;
    let mut out = Vec::with_capacity(NOISE_RECORDING_LEN);
    for _ in 0..NOISE_RECORDING_LEN {
        phase += step;
        while phase >= 1.0 {
            phase -= 1.0;
            let feedback = (lfsr ^ (lfsr >> 1)) & 1;
            lfsr >>= 1;
            if metallic {
                lfsr |= feedback << 6;
            } else {
                lfsr |= feedback << 14;
            }
        }
        out.push(if lfsr & 1 != 0 { AMPLITUDE } else { -AMPLITUDE });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn psg_blob_has_documented_layout() {
        let expected = (3 * PULSE_BANK_LEN + 2 * 36 * NOISE_RECORDING_LEN) * 2;
        assert_eq!(psg_data().len(), expected);
    }

    #[test]
    fn goldensun_blob_has_documented_layout() {
        assert_eq!(goldensun_synth().len(), (64 + 64 + 8192) * 2);
    }

    #[test]
    fn pulse_regions_have_loop_lengths() {
        for duty in 0..3 {
            for (zone, &len) in PULSE_LOOP_SIZES.iter().enumerate() {
                assert_eq!(pulse_region(duty, zone).len(), len * 2);
            }
        }
    }

    #[test]
    fn pulse_banks_differ_by_duty() {
        assert_ne!(pulse_region(0, 0), pulse_region(2, 0));
    }

    #[test]
    fn noise_regions_are_distinct_per_key_and_kind() {
        assert_eq!(noise_region(false, 42).len(), NOISE_RECORDING_LEN * 2);
        assert_ne!(noise_region(false, 42), noise_region(false, 43));
        assert_ne!(noise_region(false, 60), noise_region(true, 60));
    }

    #[test]
    fn synth_regions_line_up() {
        assert_eq!(synth_saw().len(), 128);
        assert_eq!(synth_triangle().len(), 128);
        assert_eq!(synth_square_cycle(0).len(), 128);
        assert_eq!(synth_square_cycle(0xFF).len(), 128);
        assert_eq!(synth_square_sweep().len(), 8192 * 2);
    }

    #[test]
    fn square_cycles_sweep_duty() {
        // A wider duty keeps the waveform high for longer
        let narrow = synth_square_cycle(0);
        let wide = synth_square_cycle(0xFF);
        let high = |bytes: &[u8]| {
            bytes
                .chunks_exact(2)
                .filter(|pair| i16::from_le_bytes([pair[0], pair[1]]) > 0)
                .count()
        };
        assert!(high(wide) > high(narrow));
    }
}
