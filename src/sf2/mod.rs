//! SoundFont 2.1 document model and writer
//!
//! The document is a set of append-only record lists (the "hydra")
//! plus a contiguous 16-bit sample arena. Bag indices are assigned at
//! record-creation time, pointing at the next generator/modulator
//! slot; records are never reordered or renumbered afterwards, which
//! is what keeps the format's monotonic-index invariant.

mod gen;
mod samples;
mod writer;

pub use gen::{GenAmount, GenOp, GeneratorRecord};
pub use samples::SampleFormat;

use crate::{Result, RipError};

/// Extra samples re-transmitted after a loop end so conforming
/// players can interpolate across the loop seam.
const LOOP_FOLLOW_THROUGH: usize = 8;
/// Zero samples terminating every sample in the arena.
const SAMPLE_TERMINATOR: usize = 46;

/// A preset header (phdr record, 38 bytes on disk).
#[derive(Clone, Debug)]
pub struct PresetHeader {
    /// Record name, NUL-padded
    pub name: [u8; 20],
    /// MIDI program number
    pub preset: u16,
    /// MIDI bank number
    pub bank: u16,
    /// Index of the first preset bag of this preset
    pub bag_index: u16,
}

/// An instrument header (inst record, 22 bytes on disk).
#[derive(Clone, Debug)]
pub struct InstrumentHeader {
    /// Record name, NUL-padded
    pub name: [u8; 20],
    /// Index of the first instrument bag of this instrument
    pub bag_index: u16,
}

/// A bag record (pbag/ibag, 4 bytes on disk).
#[derive(Clone, Copy, Debug)]
pub struct BagRecord {
    /// Index of the bag's first generator
    pub gen_index: u16,
    /// Index of the bag's first modulator
    pub mod_index: u16,
}

/// A modulator record. This tool never populates modulator fields, so
/// only the slot itself is modelled; it serialises as ten zero bytes.
#[derive(Clone, Copy, Debug, Default)]
pub struct ModulatorRecord;

/// A sample header (shdr record, 46 bytes on disk).
#[derive(Clone, Debug)]
pub struct SampleHeader {
    /// Record name, NUL-padded
    pub name: [u8; 20],
    /// First sample index in the arena
    pub start: u32,
    /// One past the last playable sample index
    pub end: u32,
    /// Loop start sample index (0 when one-shot)
    pub loop_start: u32,
    /// Loop end sample index (0 when one-shot)
    pub loop_end: u32,
    /// Recording rate in Hz
    pub sample_rate: u32,
    /// MIDI key at which the recording plays at pitch
    pub original_pitch: u8,
    /// Cents correction applied on top of the root key
    pub pitch_correction: i8,
    /// monoSample (1) for real entries, 0 for the terminator
    pub sample_type: u16,
}

impl SampleHeader {
    fn terminal() -> Self {
        SampleHeader {
            name: fixed_name("EOS"),
            start: 0,
            end: 0,
            loop_start: 0,
            loop_end: 0,
            sample_rate: 0,
            original_pitch: 0,
            pitch_correction: 0,
            sample_type: 0,
        }
    }
}

/// In-memory SoundFont document. Built incrementally by the
/// instrument builder, then written out exactly once.
#[derive(Default)]
pub struct Sf2Document {
    presets: Vec<PresetHeader>,
    preset_bags: Vec<BagRecord>,
    preset_mods: Vec<ModulatorRecord>,
    preset_gens: Vec<GeneratorRecord>,
    instruments: Vec<InstrumentHeader>,
    inst_bags: Vec<BagRecord>,
    inst_mods: Vec<ModulatorRecord>,
    inst_gens: Vec<GeneratorRecord>,
    sample_headers: Vec<SampleHeader>,
    smpl: Vec<i16>,
}

impl Sf2Document {
    /// Create an empty document.
    pub fn new() -> Self {
        Sf2Document::default()
    }

    /// Append a preset header. Its bag index points at the next preset
    /// bag slot; call [`Sf2Document::add_preset_bag`] to create it.
    pub fn add_preset(&mut self, name: &str, preset: u16, bank: u16) {
        self.presets.push(PresetHeader {
            name: fixed_name(name),
            preset,
            bank,
            bag_index: self.preset_bags.len() as u16,
        });
    }

    /// Append a preset bag pointing at the next generator and
    /// modulator slots.
    pub fn add_preset_bag(&mut self) {
        self.preset_bags.push(BagRecord {
            gen_index: self.preset_gens.len() as u16,
            mod_index: self.preset_mods.len() as u16,
        });
    }

    /// Append a generator to the most recent preset bag.
    pub fn add_preset_generator(&mut self, op: GenOp, amount: GenAmount) {
        self.preset_gens.push(GeneratorRecord::new(op, amount));
    }

    /// Append an instrument header and return its index. Its bag index
    /// points at the next instrument bag slot.
    pub fn add_instrument(&mut self, name: &str) -> u16 {
        self.instruments.push(InstrumentHeader {
            name: fixed_name(name),
            bag_index: self.inst_bags.len() as u16,
        });
        (self.instruments.len() - 1) as u16
    }

    /// Append an instrument bag pointing at the next generator and
    /// modulator slots.
    pub fn add_instrument_bag(&mut self) {
        self.inst_bags.push(BagRecord {
            gen_index: self.inst_gens.len() as u16,
            mod_index: self.inst_mods.len() as u16,
        });
    }

    /// Append a generator to the most recent instrument bag.
    pub fn add_instrument_generator(&mut self, op: GenOp, amount: GenAmount) {
        self.inst_gens.push(GeneratorRecord::new(op, amount));
    }

    /// Transcode `size` samples of `raw` into the arena and append a
    /// sample header. `loop_pos` marks a looping sample; one-shot
    /// samples pass `None`. Returns the sample index.
    #[allow(clippy::too_many_arguments)]
    pub fn add_sample(
        &mut self,
        name: &str,
        format: SampleFormat,
        raw: &[u8],
        size: u32,
        loop_pos: Option<u32>,
        sample_rate: u32,
        original_pitch: u8,
        pitch_correction: i8,
    ) -> Result<u16> {
        if let Some(pos) = loop_pos {
            if pos >= size {
                return Err(RipError::SampleInvalid(format!(
                    "loop point {pos} outside {size}-sample body"
                )));
            }
        }
        let pcm = samples::decode(format, raw, size as usize)?;

        // Directory offset: the sample index where this entry begins
        let start = self.smpl.len() as u32;
        self.smpl.extend_from_slice(&pcm);

        let (end, loop_start, loop_end) = match loop_pos {
            Some(pos) => {
                // Re-transmit the first samples after the loop point so
                // the loop seam survives interpolation
                for index in 0..LOOP_FOLLOW_THROUGH {
                    let value = self.smpl[(start + pos) as usize + index];
                    self.smpl.push(value);
                }
                (start + size + LOOP_FOLLOW_THROUGH as u32, start + pos, start + size)
            }
            None => (start + size, 0, 0),
        };
        self.smpl
            .extend(std::iter::repeat(0).take(SAMPLE_TERMINATOR));

        self.sample_headers.push(SampleHeader {
            name: fixed_name(name),
            start,
            end,
            loop_start,
            loop_end,
            sample_rate,
            original_pitch,
            pitch_correction,
            sample_type: 1, // monoSample
        });
        Ok((self.sample_headers.len() - 1) as u16)
    }

    /// Terminator records required by the format, appended exactly
    /// once just before writing.
    fn append_terminators(&mut self) {
        self.sample_headers.push(SampleHeader::terminal());

        self.add_instrument("EOI");
        self.add_instrument_bag();
        self.inst_gens.push(GeneratorRecord::default());
        self.inst_mods.push(ModulatorRecord);

        self.add_preset("EOP", 0, 0);
        self.add_preset_bag();
        self.preset_gens.push(GeneratorRecord::default());
        self.preset_mods.push(ModulatorRecord);
    }

    /// Preset headers added so far.
    pub fn presets(&self) -> &[PresetHeader] {
        &self.presets
    }

    /// Preset bags added so far.
    pub fn preset_bags(&self) -> &[BagRecord] {
        &self.preset_bags
    }

    /// Instrument headers added so far.
    pub fn instruments(&self) -> &[InstrumentHeader] {
        &self.instruments
    }

    /// Instrument bags added so far.
    pub fn instrument_bags(&self) -> &[BagRecord] {
        &self.inst_bags
    }

    /// Instrument generators added so far.
    pub fn instrument_generators(&self) -> &[GeneratorRecord] {
        &self.inst_gens
    }

    /// Sample headers added so far.
    pub fn sample_headers(&self) -> &[SampleHeader] {
        &self.sample_headers
    }

    /// The 16-bit sample arena.
    pub fn sample_data(&self) -> &[i16] {
        &self.smpl
    }
}

fn fixed_name(name: &str) -> [u8; 20] {
    let mut fixed = [0u8; 20];
    for (slot, &byte) in fixed.iter_mut().zip(name.as_bytes()).take(19) {
        *slot = byte;
    }
    fixed
}
