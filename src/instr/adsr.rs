//! GBA envelope to SoundFont volume-envelope conversion
//!
//! Sampled (DirectSound) channels run a rate-based envelope at 60 Hz;
//! PSG channels use the GameBoy's 4-bit envelope registers. Both are
//! mapped onto the SF2 volume envelope generators, times expressed in
//! timecents and sustain levels in centibels.

use crate::sf2::{GenAmount, GenOp, Sf2Document};
use crate::{Result, RipError};

/// Instant envelope phase, the SF2 minimum time.
const MIN_TIMECENTS: i16 = -12000;

/// An instrument's packed envelope bytes.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Adsr {
    pub attack: u8,
    pub decay: u8,
    pub sustain: u8,
    pub release: u8,
}

impl Adsr {
    /// Unpack from the third instrument word.
    pub fn from_word(word: u32) -> Self {
        Adsr {
            attack: word as u8,
            decay: (word >> 8) as u8,
            sustain: (word >> 16) as u8,
            release: (word >> 24) as u8,
        }
    }

    /// PSG envelopes only carry 4-bit components.
    pub fn validate_psg(&self) -> Result<()> {
        if self.attack > 15 || self.decay > 15 || self.sustain > 15 || self.release > 15 {
            return Err(RipError::InstrumentInvalid(format!(
                "PSG envelope out of range: {} {} {} {}",
                self.attack, self.decay, self.sustain, self.release
            )));
        }
        Ok(())
    }
}

fn timecents(seconds: f64) -> i16 {
    (1200.0 * seconds.log2()).round() as i16
}

/// Envelope generators for a sampled (DirectSound) zone.
pub(crate) fn apply_sampled(sf2: &mut Sf2Document, adsr: Adsr) {
    let ln256 = 256.0f64.ln();

    // attack rate 0 never reaches full level; no generator expresses that
    if adsr.attack != 0xFF && adsr.attack != 0 {
        let time = 256.0 / 60.0 / f64::from(adsr.attack);
        sf2.add_instrument_generator(GenOp::AttackVolEnv, GenAmount::Signed(timecents(time)));
    }
    if adsr.sustain != 0xFF {
        let level = if adsr.sustain == 0 {
            1000
        } else {
            (100.0 * (256.0 / f64::from(adsr.sustain)).ln()).round() as i16
        };
        sf2.add_instrument_generator(GenOp::SustainVolEnv, GenAmount::Signed(level));

        let decay = if adsr.decay == 0 {
            MIN_TIMECENTS
        } else {
            let time = ln256 / (ln256 - f64::from(adsr.decay).ln()) / 60.0 * (10.0 / ln256);
            timecents(time)
        };
        sf2.add_instrument_generator(GenOp::DecayVolEnv, GenAmount::Signed(decay));
    }
    if adsr.release != 0 {
        let time = ln256 / (ln256 - f64::from(adsr.release).ln()) / 60.0;
        sf2.add_instrument_generator(GenOp::ReleaseVolEnv, GenAmount::Signed(timecents(time)));
    }
}

/// Envelope generators for a PSG zone. The envelope must already have
/// passed [`Adsr::validate_psg`].
pub(crate) fn apply_psg(sf2: &mut Sf2Document, adsr: Adsr) {
    debug_assert!(adsr.validate_psg().is_ok());

    if adsr.attack != 0 {
        let time = f64::from(adsr.attack) / 5.0;
        sf2.add_instrument_generator(GenOp::AttackVolEnv, GenAmount::Signed(timecents(time)));
    }
    if adsr.sustain != 15 {
        let level = if adsr.sustain == 0 {
            1000
        } else {
            (100.0 * (15.0 / f64::from(adsr.sustain)).ln()).round() as i16
        };
        sf2.add_instrument_generator(GenOp::SustainVolEnv, GenAmount::Signed(level));

        let decay_time = f64::from(adsr.decay) / 5.0;
        let decay = (1200.0 * (decay_time + 1.0).log2()).round() as i16;
        sf2.add_instrument_generator(GenOp::DecayVolEnv, GenAmount::Signed(decay));
    }
    if adsr.release != 0 {
        let time = f64::from(adsr.release) / 5.0;
        sf2.add_instrument_generator(GenOp::ReleaseVolEnv, GenAmount::Signed(timecents(time)));
    }
}
