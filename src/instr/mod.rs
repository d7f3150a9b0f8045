//! GBA instrument records to SoundFont translation
//!
//! A sound bank is an array of 12-byte instrument records. The low
//! byte of the first word selects the voice kind: DirectSound sample,
//! GameBoy pulse/wavetable/noise channel, key-split, or per-key split
//! ("drum kit"). Each kind is expanded here into SF2 instrument zones;
//! samples are de-duplicated by their ROM offset so shared waveforms
//! are stored once.

mod adsr;
mod gm;

pub use gm::GM_PROGRAM_NAMES;

use std::collections::HashMap;

use log::debug;

use adsr::Adsr;

use crate::resources;
use crate::rom::{Rom, GBA_PTR_MASK};
use crate::sf2::{GenAmount, GenOp, SampleFormat, Sf2Document};
use crate::{Result, RipError};

/// Unused-slot sentinel found in real sound banks.
const EMPTY_SLOT: (u32, u32, u32) = (0x3C01, 0x02, 0x000F_0000);

const DUTY_NAMES: [&str; 3] = ["12.5%", "25%", "50%"];

/// Outcome of building one instrument record.
#[derive(Clone, Copy, Debug)]
pub struct BuiltInstrument {
    /// SF2 instrument index
    pub index: u16,
    /// Whether this is a GameBoy PSG voice (their presets carry no
    /// master-volume attenuation)
    pub psg: bool,
}

#[derive(Clone, Copy, Debug)]
struct BuiltSample {
    id: u16,
    looping: bool,
    root: u8,
}

#[derive(Clone, Copy, Debug)]
struct GbaSampleHeader {
    loop_word: u32,
    pitch: u32,
    loop_pos: u32,
    len: u32,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
enum SampleKey {
    Rom(usize),
    Pulse { duty: u8, zone: u8 },
    Wave { offset: usize, zone: u8 },
    Noise { metallic: bool, key: u8 },
}

/// Translates one sound bank's records into an [`Sf2Document`].
pub struct InstrumentBuilder<'a> {
    rom: &'a Rom,
    sample_rate: u32,
    instruments: HashMap<(u32, u32, u32), BuiltInstrument>,
    samples: HashMap<SampleKey, BuiltSample>,
    built_count: u32,
}

impl<'a> InstrumentBuilder<'a> {
    /// A builder for instruments mixed at the engine's `sample_rate`.
    pub fn new(rom: &'a Rom, sample_rate: u32) -> Self {
        InstrumentBuilder {
            rom,
            sample_rate,
            instruments: HashMap::new(),
            samples: HashMap::new(),
            built_count: 0,
        }
    }

    /// Number of distinct instruments built so far.
    pub fn instruments_built(&self) -> u32 {
        self.built_count
    }

    /// Translate the record at `bank + 12 * slot`. Returns `Ok(None)`
    /// for empty slots and unknown type tags (silently skipped), the
    /// built instrument otherwise. Identical records are built once.
    pub fn build_instrument(
        &mut self,
        sf2: &mut Sf2Document,
        bank: usize,
        slot: u8,
    ) -> Result<Option<BuiltInstrument>> {
        let mut cursor = self.rom.cursor_at(bank + 12 * usize::from(slot))?;
        let w0 = cursor.read_u32()?;
        let w1 = cursor.read_u32()?;
        let w2 = cursor.read_u32()?;
        if (w0, w1, w2) == EMPTY_SLOT {
            return Ok(None);
        }
        if let Some(&built) = self.instruments.get(&(w0, w1, w2)) {
            return Ok(Some(built));
        }

        let tag = (w0 & 0xFF) as u8;
        let built = if is_sampled_tag(tag) {
            BuiltInstrument {
                index: self.build_sampled(sf2, tag, w1, w2)?,
                psg: false,
            }
        } else {
            match tag {
                0x01 | 0x09 | 0x02 | 0x0A => BuiltInstrument {
                    index: self.build_pulse(sf2, w1, w2)?,
                    psg: true,
                },
                0x03 | 0x0B => BuiltInstrument {
                    index: self.build_wave(sf2, w1, w2)?,
                    psg: true,
                },
                0x04 | 0x0C => BuiltInstrument {
                    index: self.build_noise(sf2, w1, w2)?,
                    psg: true,
                },
                0x40 => BuiltInstrument {
                    index: self.build_key_split(sf2, w1, w2)?,
                    psg: false,
                },
                0x80 => BuiltInstrument {
                    index: self.build_every_key_split(sf2, w1)?,
                    psg: false,
                },
                _ => return Ok(None),
            }
        };
        self.instruments.insert((w0, w1, w2), built);
        self.built_count += 1;
        Ok(Some(built))
    }

    fn sample_header(&self, offset: usize) -> Result<GbaSampleHeader> {
        let mut cursor = self.rom.cursor_at(offset)?;
        Ok(GbaSampleHeader {
            loop_word: cursor.read_u32()?,
            pitch: cursor.read_u32()?,
            loop_pos: cursor.read_u32()?,
            len: cursor.read_u32()?,
        })
    }

    /// Root key and cent correction for a sample whose header claims
    /// `pitch` (frequency times 1024) at the engine's mixing rate.
    fn root_key(&self, pitch: u32) -> Result<(u8, i8)> {
        if pitch == 0 {
            return Err(RipError::SampleInvalid("sample pitch is zero".into()));
        }
        let delta = 12.0 * (f64::from(self.sample_rate) * 1024.0 / f64::from(pitch)).log2();
        let rounded = delta.round();
        let root = (60.0 + rounded).clamp(0.0, 127.0) as u8;
        let correction = ((rounded - delta) * 100.0).round() as i8;
        Ok((root, correction))
    }

    fn build_sampled(&mut self, sf2: &mut Sf2Document, tag: u8, w1: u32, w2: u32) -> Result<u16> {
        let pointer = (w1 & GBA_PTR_MASK) as usize;
        let fixed_pitch = tag & 0x08 != 0;
        let header = self.sample_header(pointer)?;
        if header.len == 0 && header.loop_pos == 0 {
            return self.build_goldensun(sf2, pointer, header.pitch, w2, fixed_pitch);
        }
        let sample = self.rom_sample(sf2, pointer)?;

        let index = sf2.add_instrument(&format!("Sample 0x{pointer:06X}"));
        sf2.add_instrument_bag();
        adsr::apply_sampled(sf2, Adsr::from_word(w2));
        if fixed_pitch {
            sf2.add_instrument_generator(GenOp::ScaleTuning, GenAmount::Unsigned(0));
        }
        sf2.add_instrument_generator(
            GenOp::SampleModes,
            GenAmount::Unsigned(u16::from(sample.looping)),
        );
        sf2.add_instrument_generator(GenOp::SampleId, GenAmount::Unsigned(sample.id));
        Ok(index)
    }

    /// A DirectSound sample record, decoded and de-duplicated by its
    /// ROM offset.
    fn rom_sample(&mut self, sf2: &mut Sf2Document, pointer: usize) -> Result<BuiltSample> {
        if let Some(&sample) = self.samples.get(&SampleKey::Rom(pointer)) {
            return Ok(sample);
        }
        let header = self.sample_header(pointer)?;
        let (looping, format) = match header.loop_word {
            0x4000_0000 => (true, SampleFormat::Signed8),
            0x0000_0000 => (false, SampleFormat::Signed8),
            0x0000_0001 => (false, SampleFormat::Bdpcm),
            word => {
                return Err(RipError::SampleInvalid(format!(
                    "loop flag word {word:#010x}"
                )))
            }
        };
        if header.len < 16 || header.len > 0x3F_FFFF {
            return Err(RipError::SampleInvalid(format!(
                "sample length {}",
                header.len
            )));
        }
        let raw_len = match format {
            SampleFormat::Bdpcm => (header.len / 64) as usize * 33,
            _ => header.len as usize,
        };
        let raw = self
            .rom
            .slice(pointer + 16, raw_len)
            .map_err(|_| RipError::SampleInvalid("sample data past end of ROM".into()))?;
        let (root, correction) = self.root_key(header.pitch)?;
        let id = sf2.add_sample(
            &format!("Sample 0x{pointer:06X}"),
            format,
            raw,
            header.len,
            looping.then_some(header.loop_pos),
            self.sample_rate,
            root,
            correction,
        )?;
        let sample = BuiltSample { id, looping, root };
        self.samples.insert(SampleKey::Rom(pointer), sample);
        Ok(sample)
    }

    /// A Golden Sun synthesiser voice: a sample record with zero
    /// length and loop point whose data starts with a 0x80 marker,
    /// a wave type, a duty byte and a duty-sweep flag.
    fn build_goldensun(
        &mut self,
        sf2: &mut Sf2Document,
        pointer: usize,
        pitch: u32,
        w2: u32,
        fixed_pitch: bool,
    ) -> Result<u16> {
        let mut cursor = self.rom.cursor_at(pointer + 16)?;
        let marker = cursor.read_u8()?;
        let kind = cursor.read_u8()?;
        let duty = cursor.read_u8()?;
        let sweep = cursor.read_u8()?;
        if marker != 0x80 {
            return Err(RipError::SampleInvalid(format!(
                "synth marker {marker:#04x}"
            )));
        }
        let (root, correction) = self.root_key(pitch)?;
        let sample = if let Some(&sample) = self.samples.get(&SampleKey::Rom(pointer)) {
            sample
        } else {
            let (name, raw, size) = match (kind, sweep) {
                (0, 0) => (
                    format!("GS square {}", duty >> 2),
                    resources::synth_square_cycle(duty),
                    64u32,
                ),
                (0, _) => ("GS square sweep".to_string(), resources::synth_square_sweep(), 8192),
                (1, _) => ("GS saw".to_string(), resources::synth_saw(), 64),
                (2, _) => ("GS triangle".to_string(), resources::synth_triangle(), 64),
                _ => {
                    return Err(RipError::SampleInvalid(format!(
                        "unknown synth wave {kind}"
                    )))
                }
            };
            let id = sf2.add_sample(
                &name,
                SampleFormat::Signed16,
                raw,
                size,
                Some(0),
                self.sample_rate,
                root,
                correction,
            )?;
            let sample = BuiltSample {
                id,
                looping: true,
                root,
            };
            self.samples.insert(SampleKey::Rom(pointer), sample);
            sample
        };

        let index = sf2.add_instrument(&format!("Synth 0x{pointer:06X}"));
        sf2.add_instrument_bag();
        adsr::apply_sampled(sf2, Adsr::from_word(w2));
        if fixed_pitch {
            sf2.add_instrument_generator(GenOp::ScaleTuning, GenAmount::Unsigned(0));
        }
        sf2.add_instrument_generator(GenOp::SampleModes, GenAmount::Unsigned(1));
        sf2.add_instrument_generator(GenOp::SampleId, GenAmount::Unsigned(sample.id));
        Ok(index)
    }

    fn build_pulse(&mut self, sf2: &mut Sf2Document, w1: u32, w2: u32) -> Result<u16> {
        let duty = coerce_duty(w1)?;
        let envelope = Adsr::from_word(w2);
        envelope.validate_psg()?;

        let index = sf2.add_instrument(&format!("Square {}", DUTY_NAMES[usize::from(duty)]));
        for (zone, &(low, high)) in resources::PULSE_ZONES.iter().enumerate() {
            let sample = self.pulse_sample(sf2, duty, zone)?;
            sf2.add_instrument_bag();
            sf2.add_instrument_generator(GenOp::KeyRange, GenAmount::Range(low, high));
            adsr::apply_psg(sf2, envelope);
            sf2.add_instrument_generator(GenOp::SampleModes, GenAmount::Unsigned(1));
            sf2.add_instrument_generator(GenOp::SampleId, GenAmount::Unsigned(sample.id));
        }
        Ok(index)
    }

    fn pulse_sample(&mut self, sf2: &mut Sf2Document, duty: u8, zone: usize) -> Result<BuiltSample> {
        let key = SampleKey::Pulse {
            duty,
            zone: zone as u8,
        };
        if let Some(&sample) = self.samples.get(&key) {
            return Ok(sample);
        }
        let size = resources::PULSE_LOOP_SIZES[zone];
        let (root, correction) = key_for_frequency(f64::from(resources::RECORDING_RATE) / size as f64);
        let id = sf2.add_sample(
            &format!("square {} {}", DUTY_NAMES[usize::from(duty)], zone),
            SampleFormat::Signed16,
            resources::pulse_region(duty, zone),
            size as u32,
            Some(0),
            resources::RECORDING_RATE,
            root,
            correction,
        )?;
        let sample = BuiltSample {
            id,
            looping: true,
            root,
        };
        self.samples.insert(key, sample);
        Ok(sample)
    }

    fn build_wave(&mut self, sf2: &mut Sf2Document, w1: u32, w2: u32) -> Result<u16> {
        let wave_offset = (w1 & GBA_PTR_MASK) as usize;
        // waveform RAM presence is checked up front so a bad pointer
        // rejects the instrument before any zone is created
        self.rom
            .slice(wave_offset, 16)
            .map_err(|_| RipError::InstrumentInvalid("waveform RAM past end of ROM".into()))?;
        let envelope = Adsr::from_word(w2);
        envelope.validate_psg()?;

        let index = sf2.add_instrument(&format!("Wavetable 0x{wave_offset:06X}"));
        for (zone, &(low, high)) in resources::WAVE_ZONES.iter().enumerate() {
            let sample = self.wave_sample(sf2, wave_offset, zone)?;
            sf2.add_instrument_bag();
            sf2.add_instrument_generator(GenOp::KeyRange, GenAmount::Range(low, high));
            adsr::apply_psg(sf2, envelope);
            sf2.add_instrument_generator(GenOp::SampleModes, GenAmount::Unsigned(1));
            sf2.add_instrument_generator(GenOp::SampleId, GenAmount::Unsigned(sample.id));
        }
        Ok(index)
    }

    fn wave_sample(
        &mut self,
        sf2: &mut Sf2Document,
        wave_offset: usize,
        zone: usize,
    ) -> Result<BuiltSample> {
        let key = SampleKey::Wave {
            offset: wave_offset,
            zone: zone as u8,
        };
        if let Some(&sample) = self.samples.get(&key) {
            return Ok(sample);
        }
        let size = resources::WAVE_LOOP_SIZES[zone];
        let raw = self.rom.slice(wave_offset, 16)?;
        let (root, correction) = key_for_frequency(f64::from(resources::RECORDING_RATE) / size as f64);
        let id = sf2.add_sample(
            &format!("GB3 0x{wave_offset:06X} {zone}"),
            SampleFormat::GameBoyCh3,
            raw,
            size as u32,
            Some(0),
            resources::RECORDING_RATE,
            root,
            correction,
        )?;
        let sample = BuiltSample {
            id,
            looping: true,
            root,
        };
        self.samples.insert(key, sample);
        Ok(sample)
    }

    fn build_noise(&mut self, sf2: &mut Sf2Document, w1: u32, w2: u32) -> Result<u16> {
        let metallic = noise_kind(w1)?;
        let envelope = Adsr::from_word(w2);
        envelope.validate_psg()?;

        let index = sf2.add_instrument(if metallic {
            "Noise metallic"
        } else {
            "Noise normal"
        });
        self.noise_zone(sf2, metallic, envelope, 0, 41, resources::NOISE_KEY_MIN, true)?;
        for key in resources::NOISE_KEY_MIN..=resources::NOISE_KEY_MAX {
            self.noise_zone(sf2, metallic, envelope, key, key, key, false)?;
        }
        self.noise_zone(sf2, metallic, envelope, 78, 127, 76, true)?;
        Ok(index)
    }

    #[allow(clippy::too_many_arguments)]
    fn noise_zone(
        &mut self,
        sf2: &mut Sf2Document,
        metallic: bool,
        envelope: Adsr,
        low: u8,
        high: u8,
        source_key: u8,
        clamped: bool,
    ) -> Result<()> {
        let sample = self.noise_sample(sf2, metallic, source_key)?;
        sf2.add_instrument_bag();
        sf2.add_instrument_generator(GenOp::KeyRange, GenAmount::Range(low, high));
        adsr::apply_psg(sf2, envelope);
        if clamped {
            sf2.add_instrument_generator(GenOp::ScaleTuning, GenAmount::Unsigned(0));
        }
        sf2.add_instrument_generator(GenOp::SampleModes, GenAmount::Unsigned(1));
        sf2.add_instrument_generator(GenOp::SampleId, GenAmount::Unsigned(sample.id));
        Ok(())
    }

    fn noise_sample(
        &mut self,
        sf2: &mut Sf2Document,
        metallic: bool,
        key: u8,
    ) -> Result<BuiltSample> {
        let cache_key = SampleKey::Noise { metallic, key };
        if let Some(&sample) = self.samples.get(&cache_key) {
            return Ok(sample);
        }
        let name = format!("noise {} {key}", if metallic { "m" } else { "n" });
        let id = sf2.add_sample(
            &name,
            SampleFormat::Signed16,
            resources::noise_region(metallic, key),
            16_384,
            Some(0),
            resources::RECORDING_RATE,
            key,
            0,
        )?;
        let sample = BuiltSample {
            id,
            looping: true,
            root: key,
        };
        self.samples.insert(cache_key, sample);
        Ok(sample)
    }

    /// A key-split instrument: a 128-byte key map selecting 12-byte
    /// sub-instruments from a table. Only sampled sub-types are
    /// supported; other ranges are skipped.
    fn build_key_split(&mut self, sf2: &mut Sf2Document, w1: u32, w2: u32) -> Result<u16> {
        let sub_table = (w1 & GBA_PTR_MASK) as usize;
        let map_offset = (w2 & GBA_PTR_MASK) as usize;
        let map = self
            .rom
            .slice(map_offset, 128)
            .map_err(|_| RipError::InstrumentInvalid("key map past end of ROM".into()))?
            .to_vec();

        let index = sf2.add_instrument(&format!("Split 0x{sub_table:06X}"));
        let mut low = 0usize;
        while low < 128 {
            let id = map[low];
            let mut high = low;
            while high + 1 < 128 && map[high + 1] == id {
                high += 1;
            }
            if let Err(error) = self.key_split_zone(sf2, sub_table, id, low as u8, high as u8) {
                if matches!(error, RipError::Io(_)) {
                    return Err(error);
                }
                debug!("key-split zone {low}..={high} skipped: {error}");
            }
            low = high + 1;
        }
        Ok(index)
    }

    fn key_split_zone(
        &mut self,
        sf2: &mut Sf2Document,
        sub_table: usize,
        id: u8,
        low: u8,
        high: u8,
    ) -> Result<()> {
        let mut cursor = self.rom.cursor_at(sub_table + 12 * usize::from(id))?;
        let s0 = cursor.read_u32()?;
        let s1 = cursor.read_u32()?;
        let s2 = cursor.read_u32()?;
        let tag = (s0 & 0xFF) as u8;
        if tag == 0x40 || tag == 0x80 {
            return Err(RipError::InstrumentInvalid(
                "recursive sub-instrument".into(),
            ));
        }
        if !is_sampled_tag(tag) {
            return Err(RipError::InstrumentInvalid(format!(
                "unsupported sub-type {tag:#04x}"
            )));
        }
        let sample = self.rom_sample(sf2, (s1 & GBA_PTR_MASK) as usize)?;

        sf2.add_instrument_bag();
        sf2.add_instrument_generator(GenOp::KeyRange, GenAmount::Range(low, high));
        adsr::apply_sampled(sf2, Adsr::from_word(s2));
        if tag & 0x08 != 0 {
            sf2.add_instrument_generator(GenOp::ScaleTuning, GenAmount::Unsigned(0));
        }
        sf2.add_instrument_generator(
            GenOp::SampleModes,
            GenAmount::Unsigned(u16::from(sample.looping)),
        );
        sf2.add_instrument_generator(GenOp::SampleId, GenAmount::Unsigned(sample.id));
        Ok(())
    }

    /// An every-key-split ("drum kit") instrument: 128 contiguous
    /// sub-records, one per MIDI key.
    fn build_every_key_split(&mut self, sf2: &mut Sf2Document, w1: u32) -> Result<u16> {
        let table = (w1 & GBA_PTR_MASK) as usize;
        let index = sf2.add_instrument(&format!("Drums 0x{table:06X}"));
        for key in 0u8..=127 {
            if let Err(error) = self.every_key_zone(sf2, table, key) {
                if matches!(error, RipError::Io(_)) {
                    return Err(error);
                }
                debug!("drum key {key} skipped: {error}");
            }
        }
        Ok(index)
    }

    fn every_key_zone(&mut self, sf2: &mut Sf2Document, table: usize, key: u8) -> Result<()> {
        let mut cursor = self.rom.cursor_at(table + 12 * usize::from(key))?;
        let s0 = cursor.read_u32()?;
        let s1 = cursor.read_u32()?;
        let s2 = cursor.read_u32()?;
        let tag = (s0 & 0xFF) as u8;
        let base_key = ((s0 >> 8) & 0xFF) as u8;
        let panning = (s0 >> 24) as u8;
        let envelope = Adsr::from_word(s2);

        if tag == 0x40 || tag == 0x80 {
            return Err(RipError::InstrumentInvalid(
                "recursive sub-instrument".into(),
            ));
        }
        if is_sampled_tag(tag) {
            let sample = self.rom_sample(sf2, (s1 & GBA_PTR_MASK) as usize)?;
            let root = i32::from(sample.root) - i32::from(base_key) + i32::from(key);
            sf2.add_instrument_bag();
            sf2.add_instrument_generator(GenOp::KeyRange, GenAmount::Range(key, key));
            sf2.add_instrument_generator(
                GenOp::OverridingRootKey,
                GenAmount::Signed(root.clamp(0, 127) as i16),
            );
            push_panning(sf2, panning);
            adsr::apply_sampled(sf2, envelope);
            if tag & 0x08 != 0 {
                sf2.add_instrument_generator(GenOp::ScaleTuning, GenAmount::Unsigned(0));
            }
            sf2.add_instrument_generator(
                GenOp::SampleModes,
                GenAmount::Unsigned(u16::from(sample.looping)),
            );
            sf2.add_instrument_generator(GenOp::SampleId, GenAmount::Unsigned(sample.id));
            return Ok(());
        }
        match tag {
            0x01 | 0x09 | 0x02 | 0x0A => {
                envelope.validate_psg()?;
                let duty = coerce_duty(s1)?;
                let zone = resources::PULSE_ZONES
                    .iter()
                    .position(|&(low, high)| (low..=high).contains(&key))
                    .unwrap_or(0);
                let sample = self.pulse_sample(sf2, duty, zone)?;
                let root = i32::from(sample.root) - i32::from(base_key) + i32::from(key);
                sf2.add_instrument_bag();
                sf2.add_instrument_generator(GenOp::KeyRange, GenAmount::Range(key, key));
                sf2.add_instrument_generator(
                    GenOp::OverridingRootKey,
                    GenAmount::Signed(root.clamp(0, 127) as i16),
                );
                push_panning(sf2, panning);
                adsr::apply_psg(sf2, envelope);
                sf2.add_instrument_generator(GenOp::SampleModes, GenAmount::Unsigned(1));
                sf2.add_instrument_generator(GenOp::SampleId, GenAmount::Unsigned(sample.id));
                Ok(())
            }
            0x04 | 0x0C => {
                envelope.validate_psg()?;
                let metallic = noise_kind(s1)?;
                let source = clamp_noise_key(key);
                let sample = self.noise_sample(sf2, metallic, source)?;
                sf2.add_instrument_bag();
                sf2.add_instrument_generator(GenOp::KeyRange, GenAmount::Range(key, key));
                push_panning(sf2, panning);
                adsr::apply_psg(sf2, envelope);
                if source != key {
                    sf2.add_instrument_generator(GenOp::ScaleTuning, GenAmount::Unsigned(0));
                }
                sf2.add_instrument_generator(GenOp::SampleModes, GenAmount::Unsigned(1));
                sf2.add_instrument_generator(GenOp::SampleId, GenAmount::Unsigned(sample.id));
                Ok(())
            }
            _ => Err(RipError::InstrumentInvalid(format!(
                "unsupported drum sub-type {tag:#04x}"
            ))),
        }
    }
}

fn is_sampled_tag(tag: u8) -> bool {
    matches!(tag, 0x00 | 0x08 | 0x10 | 0x18 | 0x20 | 0x28 | 0x30 | 0x38)
}

fn coerce_duty(word: u32) -> Result<u8> {
    match word {
        0..=2 => Ok(word as u8),
        3 => Ok(1), // 75% sounds identical to 25%
        _ => Err(RipError::InstrumentInvalid(format!("duty cycle {word}"))),
    }
}

fn noise_kind(word: u32) -> Result<bool> {
    match word {
        0 => Ok(false),
        1 => Ok(true),
        _ => Err(RipError::InstrumentInvalid(format!("noise mode {word}"))),
    }
}

/// Keys outside the recorded noise range reuse a boundary recording;
/// the upper bound deliberately lands on 76, as the original does.
fn clamp_noise_key(key: u8) -> u8 {
    if key > resources::NOISE_KEY_MAX {
        76
    } else if key < resources::NOISE_KEY_MIN {
        resources::NOISE_KEY_MIN
    } else {
        key
    }
}

/// Drum-zone panning byte: bit 7 enables it, the rest maps linearly
/// onto the SF2 pan range.
fn push_panning(sf2: &mut Sf2Document, panning: u8) {
    if panning != 0 {
        let pan = (i32::from(panning) - 192) * 500 / 128;
        sf2.add_instrument_generator(GenOp::Pan, GenAmount::Signed(pan as i16));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 13379;

    /// A little ROM with a sound bank at 0x100 and a sample at 0x200.
    fn test_rom(records: &[(u32, u32, u32)]) -> Rom {
        let mut image = vec![0u8; 0x1000];
        for (slot, &(w0, w1, w2)) in records.iter().enumerate() {
            let base = 0x100 + 12 * slot;
            image[base..base + 4].copy_from_slice(&w0.to_le_bytes());
            image[base + 4..base + 8].copy_from_slice(&w1.to_le_bytes());
            image[base + 8..base + 12].copy_from_slice(&w2.to_le_bytes());
        }
        // looping sample: rate·1024 pitch puts the root at middle C
        image[0x200..0x204].copy_from_slice(&0x4000_0000u32.to_le_bytes());
        image[0x204..0x208].copy_from_slice(&(RATE * 1024).to_le_bytes());
        image[0x208..0x20C].copy_from_slice(&4u32.to_le_bytes());
        image[0x20C..0x210].copy_from_slice(&16u32.to_le_bytes());
        Rom::new(image).unwrap()
    }

    #[test]
    fn empty_slot_is_skipped_silently() {
        let rom = test_rom(&[EMPTY_SLOT]);
        let mut sf2 = Sf2Document::new();
        let mut builder = InstrumentBuilder::new(&rom, RATE);
        assert!(builder.build_instrument(&mut sf2, 0x100, 0).unwrap().is_none());
        assert!(sf2.instruments().is_empty());
    }

    #[test]
    fn unknown_tag_is_skipped_silently() {
        let rom = test_rom(&[(0x7F, 0, 0)]);
        let mut sf2 = Sf2Document::new();
        let mut builder = InstrumentBuilder::new(&rom, RATE);
        assert!(builder.build_instrument(&mut sf2, 0x100, 0).unwrap().is_none());
    }

    #[test]
    fn sampled_instrument_and_root_key() {
        let rom = test_rom(&[(0x00, 0x0800_0200, 0x00FF_00FF)]);
        let mut sf2 = Sf2Document::new();
        let mut builder = InstrumentBuilder::new(&rom, RATE);
        let built = builder.build_instrument(&mut sf2, 0x100, 0).unwrap().unwrap();
        assert!(!built.psg);
        let header = &sf2.sample_headers()[0];
        assert_eq!(header.original_pitch, 60);
        assert_eq!(header.pitch_correction, 0);
        assert_eq!(header.loop_start, 4);
        assert_eq!(header.end, 16 + 8);
        // neutral envelope: sampleModes + sampleID only
        assert_eq!(sf2.instrument_generators().len(), 2);
    }

    #[test]
    fn root_key_and_correction_round_trip_within_a_cent() {
        let builder_rom = test_rom(&[]);
        let builder = InstrumentBuilder::new(&builder_rom, RATE);
        // fractional offsets across the usable range
        for cents in [-230.0f64, -30.0, 0.0, 47.0, 512.0] {
            let pitch = (f64::from(RATE) * 1024.0 / 2.0f64.powf(cents / 1200.0)) as u32;
            let (root, correction) = builder.root_key(pitch).unwrap();
            let delta = 12.0 * (f64::from(RATE) * 1024.0 / f64::from(pitch)).log2();
            let reconstructed = f64::from(root) - 60.0 - f64::from(correction) / 100.0;
            assert!(
                (reconstructed - delta).abs() <= 0.011,
                "pitch {pitch}: {reconstructed} vs {delta}"
            );
        }
    }

    #[test]
    fn zero_pitch_is_rejected() {
        let rom = test_rom(&[]);
        let builder = InstrumentBuilder::new(&rom, RATE);
        assert!(matches!(
            builder.root_key(0),
            Err(RipError::SampleInvalid(_))
        ));
    }

    #[test]
    fn identical_records_are_deduplicated() {
        let record = (0x00, 0x0800_0200, 0x00FF_00FF);
        let rom = test_rom(&[record, record]);
        let mut sf2 = Sf2Document::new();
        let mut builder = InstrumentBuilder::new(&rom, RATE);
        let first = builder.build_instrument(&mut sf2, 0x100, 0).unwrap().unwrap();
        let second = builder.build_instrument(&mut sf2, 0x100, 1).unwrap().unwrap();
        assert_eq!(first.index, second.index);
        assert_eq!(sf2.instruments().len(), 1);
        assert_eq!(builder.instruments_built(), 1);
    }

    #[test]
    fn fixed_pitch_sampled_gets_scale_tuning() {
        let rom = test_rom(&[(0x08, 0x0800_0200, 0x00FF_00FF)]);
        let mut sf2 = Sf2Document::new();
        let mut builder = InstrumentBuilder::new(&rom, RATE);
        builder.build_instrument(&mut sf2, 0x100, 0).unwrap().unwrap();
        let gens = sf2.instrument_generators();
        assert_eq!(gens[0].oper, GenOp::ScaleTuning as u16);
        assert_eq!(gens[0].amount, 0);
    }

    #[test]
    fn pulse_instrument_builds_five_zones() {
        let rom = test_rom(&[(0x01, 3, 0x000F_0000)]);
        let mut sf2 = Sf2Document::new();
        let mut builder = InstrumentBuilder::new(&rom, RATE);
        let built = builder.build_instrument(&mut sf2, 0x100, 0).unwrap().unwrap();
        assert!(built.psg);
        assert_eq!(sf2.instrument_bags().len(), 5);
        assert_eq!(sf2.sample_headers().len(), 5);
        // keyRange + sampleModes + sampleID per zone, neutral envelope
        assert_eq!(sf2.instrument_generators().len(), 15);
    }

    #[test]
    fn pulse_duty_three_shares_duty_one_samples() {
        let rom = test_rom(&[(0x01, 3, 0x000F_0000), (0x02, 1, 0x000F_0000)]);
        let mut sf2 = Sf2Document::new();
        let mut builder = InstrumentBuilder::new(&rom, RATE);
        builder.build_instrument(&mut sf2, 0x100, 0).unwrap().unwrap();
        builder.build_instrument(&mut sf2, 0x100, 1).unwrap().unwrap();
        // second instrument reuses the five duty-1 samples
        assert_eq!(sf2.sample_headers().len(), 5);
    }

    #[test]
    fn pulse_duty_above_three_rejects() {
        let rom = test_rom(&[(0x01, 4, 0x000F_0000)]);
        let mut sf2 = Sf2Document::new();
        let mut builder = InstrumentBuilder::new(&rom, RATE);
        assert!(matches!(
            builder.build_instrument(&mut sf2, 0x100, 0),
            Err(RipError::InstrumentInvalid(_))
        ));
    }

    #[test]
    fn noise_instrument_covers_the_keyboard() {
        let rom = test_rom(&[(0x04, 0, 0x000F_0000)]);
        let mut sf2 = Sf2Document::new();
        let mut builder = InstrumentBuilder::new(&rom, RATE);
        builder.build_instrument(&mut sf2, 0x100, 0).unwrap().unwrap();
        // one zone per recorded key plus the two clamped outer zones
        assert_eq!(sf2.instrument_bags().len(), 38);
        assert_eq!(sf2.sample_headers().len(), 36);
    }

    #[test]
    fn noise_mode_above_one_rejects() {
        let rom = test_rom(&[(0x04, 2, 0x000F_0000)]);
        let mut sf2 = Sf2Document::new();
        let mut builder = InstrumentBuilder::new(&rom, RATE);
        assert!(builder.build_instrument(&mut sf2, 0x100, 0).is_err());
    }

    #[test]
    fn noise_clamp_reuses_key_76_above_range() {
        assert_eq!(clamp_noise_key(78), 76);
        assert_eq!(clamp_noise_key(127), 76);
        assert_eq!(clamp_noise_key(77), 77);
        assert_eq!(clamp_noise_key(10), 42);
    }

    #[test]
    fn key_split_builds_ranges_and_skips_bad_zones() {
        // sub-instrument table at 0x300: slot 0 sampled, slot 1 noise
        // (unsupported in key splits)
        let rom = {
            let mut image = vec![0u8; 0x1000];
            let bank = 0x100;
            image[bank..bank + 4].copy_from_slice(&0x40u32.to_le_bytes());
            image[bank + 4..bank + 8].copy_from_slice(&0x0800_0300u32.to_le_bytes());
            image[bank + 8..bank + 12].copy_from_slice(&0x0800_0380u32.to_le_bytes());
            // slot 0: sampled, pointing at the sample below
            image[0x300..0x304].copy_from_slice(&0x00u32.to_le_bytes());
            image[0x304..0x308].copy_from_slice(&0x0800_0200u32.to_le_bytes());
            image[0x308..0x30C].copy_from_slice(&0x00FF_00FFu32.to_le_bytes());
            // slot 1: GB noise, skipped inside a key split
            image[0x30C..0x310].copy_from_slice(&0x04u32.to_le_bytes());
            image[0x310..0x314].copy_from_slice(&0u32.to_le_bytes());
            image[0x314..0x318].copy_from_slice(&0x000F_0000u32.to_le_bytes());
            // key map at 0x380: keys 0..=63 use slot 0, the rest slot 1
            for key in 0..128 {
                image[0x380 + key] = u8::from(key >= 64);
            }
            // sample record
            image[0x200..0x204].copy_from_slice(&0u32.to_le_bytes());
            image[0x204..0x208].copy_from_slice(&(RATE * 1024).to_le_bytes());
            image[0x208..0x20C].copy_from_slice(&0u32.to_le_bytes());
            image[0x20C..0x210].copy_from_slice(&32u32.to_le_bytes());
            Rom::new(image).unwrap()
        };
        let mut sf2 = Sf2Document::new();
        let mut builder = InstrumentBuilder::new(&rom, RATE);
        builder.build_instrument(&mut sf2, 0x100, 0).unwrap().unwrap();
        // only the sampled range produced a zone
        assert_eq!(sf2.instrument_bags().len(), 1);
        let gens = sf2.instrument_generators();
        assert_eq!(gens[0].oper, GenOp::KeyRange as u16);
        assert_eq!(gens[0].amount, 63u16 << 8);
        // one-shot sub-sample
        assert_eq!(gens[1].oper, GenOp::SampleModes as u16);
        assert_eq!(gens[1].amount, 0);
    }

    #[test]
    fn every_key_split_overrides_roots_and_pans() {
        let rom = {
            let mut image = vec![0u8; 0x1000];
            let bank = 0x100;
            image[bank..bank + 4].copy_from_slice(&0x80u32.to_le_bytes());
            image[bank + 4..bank + 8].copy_from_slice(&0x0800_0400u32.to_le_bytes());
            // drum record for key 0: sampled, base key 60, pan byte 192+32
            let record = 0x400;
            let s0 = 0x00u32 | (60 << 8) | (224u32 << 24);
            image[record..record + 4].copy_from_slice(&s0.to_le_bytes());
            image[record + 4..record + 8].copy_from_slice(&0x0800_0200u32.to_le_bytes());
            image[record + 8..record + 12].copy_from_slice(&0x00FF_00FFu32.to_le_bytes());
            // sample record
            image[0x200..0x204].copy_from_slice(&0x4000_0000u32.to_le_bytes());
            image[0x204..0x208].copy_from_slice(&(RATE * 1024).to_le_bytes());
            image[0x208..0x20C].copy_from_slice(&0u32.to_le_bytes());
            image[0x20C..0x210].copy_from_slice(&16u32.to_le_bytes());
            Rom::new(image).unwrap()
        };
        let mut sf2 = Sf2Document::new();
        let mut builder = InstrumentBuilder::new(&rom, RATE);
        builder.build_instrument(&mut sf2, 0x100, 0).unwrap().unwrap();
        let gens = sf2.instrument_generators();
        assert_eq!(gens[0].oper, GenOp::KeyRange as u16);
        assert_eq!(gens[0].amount, 0);
        assert_eq!(gens[1].oper, GenOp::OverridingRootKey as u16);
        // root 60, base key 60, map key 0
        assert_eq!(gens[1].amount as i16, 0);
        assert_eq!(gens[2].oper, GenOp::Pan as u16);
        assert_eq!(gens[2].amount as i16, (224 - 192) * 500 / 128);
    }
}
