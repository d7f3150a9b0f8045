//! Top-level ripping driver
//!
//! Glues the subsystems together: locate the engine (or honour an
//! explicit song-table override), walk the song table, rip every song
//! to its own MIDI file, then translate the sound banks the songs
//! reference into one aggregated SoundFont or one per bank.

use std::fs;
use std::path::PathBuf;

use log::{debug, info, warn};

use crate::instr::{InstrumentBuilder, GM_PROGRAM_NAMES};
use crate::locator::{locate_engine, scan_song_table, EngineInfo};
use crate::midi::MidiFile;
use crate::rom::{Rom, GBA_PTR_MASK};
use crate::seq::{read_song_header, SeqOptions, Sequencer, SongHeader};
use crate::sf2::{GenAmount, GenOp, Sf2Document};
use crate::{Result, RipError};

/// MIDI division used for every ripped song, in ticks per beat.
pub const PPQN: u16 = 24;

/// Roland GS reset, sent when not in XG mode.
const GS_RESET: [u8; 9] = [0x41, 0x10, 0x42, 0x12, 0x40, 0x00, 0x7F, 0x00, 0x41];
/// Yamaha XG System On.
const XG_SYSTEM_ON: [u8; 7] = [0x43, 0x10, 0x4C, 0x00, 0x00, 0x7E, 0x00];

/// Run configuration, the contract between the CLI wrapper and the
/// core.
#[derive(Clone, Debug)]
pub struct RipConfig {
    /// Directory receiving the output files
    pub output_dir: PathBuf,
    /// Base name for SoundFont files (usually the ROM file stem)
    pub name: String,
    /// Explicit song-table offset or GBA pointer, bypassing the
    /// engine locator
    pub song_table: Option<usize>,
    /// Name presets after the General MIDI program list
    pub gm_preset_names: bool,
    /// Keep MIDI channel 10 free unless more than 15 tracks need it
    pub rearrange_channels: bool,
    /// Emit XG bank selects and reset instead of GS
    pub xg: bool,
    /// One SoundFont per sound bank in per-bank sub-directories
    pub sf2_per_bank: bool,
    /// Disable volume linearisation and vibrato simulation
    pub raw: bool,
}

impl RipConfig {
    /// A configuration with default flags.
    pub fn new(output_dir: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        RipConfig {
            output_dir: output_dir.into(),
            name: name.into(),
            song_table: None,
            gm_preset_names: false,
            rearrange_channels: false,
            xg: false,
            sf2_per_bank: false,
            raw: false,
        }
    }

    /// Whether volumes and velocities are square-root linearised.
    pub fn linearise_volume(&self) -> bool {
        !self.raw
    }

    /// Whether the engine LFO is simulated with MIDI events.
    pub fn simulate_vibrato(&self) -> bool {
        !self.raw
    }
}

/// What a completed run produced.
#[derive(Clone, Copy, Debug, Default)]
pub struct RipSummary {
    /// Songs written to disk
    pub songs_ripped: u32,
    /// Table entries skipped over errors
    pub songs_skipped: u32,
    /// Distinct sound banks encountered
    pub banks: usize,
    /// Distinct instruments translated
    pub instruments_built: u32,
    /// Bytes of 16-bit sample data across all SoundFonts
    pub sample_bytes: usize,
}

/// Engine parameters assumed when the song table is given explicitly
/// and the locator is bypassed.
fn overridden_engine(rom: &Rom, table: usize) -> Result<EngineInfo> {
    let offset = if table >= 0x0800_0000 {
        table & GBA_PTR_MASK as usize
    } else {
        table
    };
    if offset >= rom.len() {
        return Err(RipError::Structural(format!(
            "song table {offset:#x} past end of ROM"
        )));
    }
    Ok(EngineInfo {
        param_offset: 0,
        polyphony: 5,
        main_volume: 15,
        sample_rate_index: 4,
        sample_rate: 13379,
        dac_bits: 8,
        song_table: offset,
    })
}

/// Rip every song and sound bank of `rom` according to `config`.
pub fn rip(rom: &Rom, config: &RipConfig) -> Result<RipSummary> {
    let engine = match config.song_table {
        Some(table) => overridden_engine(rom, table)?,
        None => locate_engine(rom)?,
    };
    info!(
        "engine: {} Hz, volume {}/15, polyphony {}, {}-bit DAC",
        engine.sample_rate, engine.main_volume, engine.polyphony, engine.dac_bits
    );

    let table = scan_song_table(rom, engine.song_table)?;
    if table.songs.is_empty() {
        return Err(RipError::Structural(format!(
            "song table at {:#x} holds no songs",
            table.offset
        )));
    }
    info!(
        "song table at {:#x}: {} entries",
        table.offset,
        table.songs.len()
    );

    let mut summary = RipSummary::default();

    // Parse headers up front so the bank list is known before any
    // bank select is emitted
    let mut banks: Vec<usize> = Vec::new();
    let mut songs: Vec<(usize, SongHeader, usize)> = Vec::new();
    for (index, &offset) in table.songs.iter().enumerate() {
        match read_song_header(rom, offset) {
            Ok(header) => {
                let bank_index = match banks.iter().position(|&bank| bank == header.instr_bank) {
                    Some(found) => found,
                    None => {
                        banks.push(header.instr_bank);
                        banks.len() - 1
                    }
                };
                songs.push((index, header, bank_index));
            }
            Err(error) => {
                warn!("song {index} at {offset:#x} skipped: {error}");
                summary.songs_skipped += 1;
            }
        }
    }

    let force_bank = !config.sf2_per_bank && banks.len() > 1;
    for (index, header, bank_index) in &songs {
        let directory = if config.sf2_per_bank {
            bank_directory(config, banks[*bank_index])
        } else {
            config.output_dir.clone()
        };
        fs::create_dir_all(&directory)?;
        let path = directory.join(format!("song{index:03}.mid"));
        let options = SeqOptions {
            linearise_volume: config.linearise_volume(),
            simulate_vibrato: config.simulate_vibrato(),
            xg: config.xg,
            bank: force_bank.then_some(*bank_index as u16),
        };
        match rip_song(rom, header, config, options, &path) {
            Ok(()) => {
                summary.songs_ripped += 1;
                info!("song {index:03} -> {}", path.display());
            }
            Err(error) => {
                warn!("song {index:03} failed: {error}");
                summary.songs_skipped += 1;
            }
        }
    }

    summary.banks = banks.len();
    if config.sf2_per_bank {
        for &bank in &banks {
            let mut sf2 = Sf2Document::new();
            let mut builder = InstrumentBuilder::new(rom, engine.sample_rate);
            build_bank(&engine, config, &mut sf2, &mut builder, bank, 0)?;
            summary.instruments_built += builder.instruments_built();
            summary.sample_bytes += sf2.sample_data().len() * 2;

            let directory = bank_directory(config, bank);
            fs::create_dir_all(&directory)?;
            let mut file = fs::File::create(directory.join(format!("{}.sf2", config.name)))?;
            sf2.write(&mut file)?;
        }
    } else {
        let mut sf2 = Sf2Document::new();
        let mut builder = InstrumentBuilder::new(rom, engine.sample_rate);
        for (bank_number, &bank) in banks.iter().enumerate() {
            build_bank(&engine, config, &mut sf2, &mut builder, bank, bank_number as u16)?;
        }
        summary.instruments_built = builder.instruments_built();
        summary.sample_bytes = sf2.sample_data().len() * 2;

        fs::create_dir_all(&config.output_dir)?;
        let mut file =
            fs::File::create(config.output_dir.join(format!("{}.sf2", config.name)))?;
        sf2.write(&mut file)?;
    }

    info!(
        "{} songs ripped, {} skipped, {} instruments, {} sample bytes",
        summary.songs_ripped, summary.songs_skipped, summary.instruments_built, summary.sample_bytes
    );
    Ok(summary)
}

fn bank_directory(config: &RipConfig, bank: usize) -> PathBuf {
    config.output_dir.join(format!("bank_{bank:06X}"))
}

fn rip_song(
    rom: &Rom,
    header: &SongHeader,
    config: &RipConfig,
    options: SeqOptions,
    path: &std::path::Path,
) -> Result<()> {
    let mut midi = MidiFile::new(PPQN);
    if config.rearrange_channels {
        midi.rearrange_channels();
    }
    if config.xg {
        midi.sysex(&XG_SYSTEM_ON);
    } else {
        midi.sysex(&GS_RESET);
    }
    let sequencer = Sequencer::new(rom, midi, header, options)?;
    let midi = sequencer.process()?;
    let mut file = fs::File::create(path)?;
    midi.write(&mut file)?;
    Ok(())
}

/// Translate one sound bank's 128 slots into `sf2`, wiring a preset
/// per successfully built instrument.
fn build_bank(
    engine: &EngineInfo,
    config: &RipConfig,
    sf2: &mut Sf2Document,
    builder: &mut InstrumentBuilder<'_>,
    bank: usize,
    bank_number: u16,
) -> Result<()> {
    for patch in 0u8..=127 {
        match builder.build_instrument(sf2, bank, patch) {
            Ok(Some(built)) => {
                let name = if config.gm_preset_names {
                    GM_PROGRAM_NAMES[usize::from(patch)].to_string()
                } else {
                    format!("Instrument {patch:03}")
                };
                sf2.add_preset(&name, u16::from(patch), bank_number);
                sf2.add_preset_bag();
                if !built.psg && engine.main_volume > 0 && engine.main_volume < 15 {
                    let attenuation =
                        (100.0 * (15.0 / f64::from(engine.main_volume)).ln()).round() as i16;
                    sf2.add_preset_generator(
                        GenOp::InitialAttenuation,
                        GenAmount::Signed(attenuation),
                    );
                }
                sf2.add_preset_generator(GenOp::Instrument, GenAmount::Unsigned(built.index));
            }
            Ok(None) => {}
            Err(RipError::Io(error)) => return Err(RipError::Io(error)),
            Err(error) => {
                debug!("bank {bank:#x} patch {patch} skipped: {error}");
            }
        }
    }
    Ok(())
}
