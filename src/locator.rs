//! Sappy engine locator
//!
//! Pattern-scans a ROM image for the engine's "selectsong" routine,
//! validates each candidate against the song table it references, then
//! walks back to the engine's parameter block and decodes the mixing
//! configuration (polyphony, master volume, sample rate, DAC width).

use log::debug;

use crate::rom::{Rom, GBA_PTR_MASK};
use crate::{Result, RipError};

/// Thumb code of the selectsong routine, first engine revision.
pub const SELECTSONG_SIG_A: [u8; 30] = [
    0x00, 0xB5, 0x00, 0x04, 0x07, 0x4A, 0x08, 0x49, 0x40, 0x0B, //
    0x40, 0x18, 0x83, 0x88, 0x59, 0x00, 0xC9, 0x18, 0x89, 0x00, //
    0x89, 0x18, 0x0A, 0x68, 0x01, 0x68, 0x10, 0x1C, 0x00, 0xF0,
];

/// Thumb code of the selectsong routine, later engine revision.
pub const SELECTSONG_SIG_B: [u8; 30] = [
    0x00, 0xB5, 0x00, 0x04, 0x07, 0x4B, 0x08, 0x49, 0x40, 0x0B, //
    0x40, 0x18, 0x82, 0x88, 0x51, 0x00, 0x89, 0x18, 0x89, 0x00, //
    0xC9, 0x18, 0x0A, 0x68, 0x01, 0x68, 0x10, 0x1C, 0x00, 0xF0,
];

/// Offset of the song-table pointer relative to the selectsong code.
const SONG_TABLE_PTR_OFFSET: usize = 40;

/// How far back the engine-main prologue is searched for.
const MAIN_SCAN_RANGE: usize = 0x20;

/// Mixing rates selectable by the engine, indexed by `1..=12`.
pub const SAMPLE_RATES: [u32; 12] = [
    5734, 7884, 10512, 13379, 15768, 18157, 21024, 26758, 31536, 36314, 40137, 42048,
];

/// Decoded engine parameter block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EngineInfo {
    /// Offset of the parameter block inside the ROM
    pub param_offset: usize,
    /// Maximum simultaneous DirectSound voices
    pub polyphony: u8,
    /// Master volume, 1..=15
    pub main_volume: u8,
    /// Index into [`SAMPLE_RATES`], 1..=12
    pub sample_rate_index: u8,
    /// Mixing rate in Hz
    pub sample_rate: u32,
    /// DAC resolution in bits, 6..=9
    pub dac_bits: u8,
    /// Offset of the song table inside the ROM
    pub song_table: usize,
}

/// A scanned song table: its effective start offset and the song
/// header offsets of every entry.
#[derive(Clone, Debug)]
pub struct SongTable {
    /// Offset of the first real entry (leading zero words skipped)
    pub offset: usize,
    /// Song header offsets, in table order
    pub songs: Vec<usize>,
}

impl SongTable {
    /// Offset one past the last 8-byte entry.
    pub fn end_offset(&self) -> usize {
        self.offset + 8 * self.songs.len()
    }
}

/// Locate the sound engine inside a ROM image.
pub fn locate_engine(rom: &Rom) -> Result<EngineInfo> {
    let mut search = 0;
    while let Some(candidate) = find_signature(rom.bytes(), search) {
        debug!("selectsong candidate at {candidate:#x}");
        if probe_song_table(rom, candidate) {
            if let Some(info) = decode_engine(rom, candidate) {
                debug!(
                    "engine parameters at {:#x}, song table at {:#x}",
                    info.param_offset, info.song_table
                );
                return Ok(info);
            }
        }
        search = candidate + 1;
    }
    Err(RipError::NotFound(
        "no selectsong signature with a valid song table".to_string(),
    ))
}

/// Enumerate the song table starting at `offset`: leading zero words
/// are skipped four bytes at a time, then 8-byte entries are read
/// until the first song pointer that is zero or resolves outside the
/// ROM.
pub fn scan_song_table(rom: &Rom, mut offset: usize) -> Result<SongTable> {
    loop {
        let word = rom.cursor_at(offset)?.read_u32()?;
        if word != 0 {
            break;
        }
        offset += 4;
    }
    let mut songs = Vec::new();
    let mut cursor = rom.cursor_at(offset)?;
    loop {
        let Ok(pointer) = cursor.read_u32() else {
            break;
        };
        let song = (pointer & GBA_PTR_MASK) as usize;
        if song == 0 || song >= rom.len() {
            break;
        }
        songs.push(song);
        if cursor.skip(4).is_err() {
            // group word of the last entry ran off the image
            break;
        }
    }
    Ok(SongTable { offset, songs })
}

fn find_signature(data: &[u8], from: usize) -> Option<usize> {
    if from >= data.len() {
        return None;
    }
    data[from..]
        .windows(SELECTSONG_SIG_A.len())
        .position(|window| {
            window[0] == 0x00
                && window[1] == 0xB5
                && (window == SELECTSONG_SIG_A || window == SELECTSONG_SIG_B)
        })
        .map(|pos| pos + from)
}

/// A candidate is accepted when the word at `candidate + 40` points at
/// a table holding at least one valid song entry.
fn probe_song_table(rom: &Rom, candidate: usize) -> bool {
    let Ok(mut cursor) = rom.cursor_at(candidate + SONG_TABLE_PTR_OFFSET) else {
        return false;
    };
    let Ok(word) = cursor.read_u32() else {
        return false;
    };
    let top = word >> 24;
    if top != 0x08 && top != 0x09 {
        return false;
    }
    let table = (word & GBA_PTR_MASK) as usize;
    if table + 4 > rom.len() {
        return false;
    }
    match scan_song_table(rom, table) {
        Ok(table) => table
            .songs
            .first()
            .map(|&song| {
                // the probe additionally insists on a cartridge pointer
                let raw = rom
                    .cursor_at(table.offset)
                    .and_then(|mut c| c.read_u32())
                    .unwrap_or(0);
                rom.is_rom_pointer(raw) && song != 0
            })
            .unwrap_or(false),
        Err(_) => false,
    }
}

fn decode_engine(rom: &Rom, selectsong: usize) -> Option<EngineInfo> {
    let data = rom.bytes();
    // The engine's main routine starts with the same push {lr}
    // prologue; the nearest one before selectsong is taken.
    let low = selectsong.saturating_sub(MAIN_SCAN_RANGE);
    let main = (low..selectsong)
        .rev()
        .find(|&offset| data[offset] == 0x00 && data.get(offset + 1) == Some(&0xB5))?;
    for delta in [16usize, 32] {
        let Some(block) = main.checked_sub(delta) else {
            continue;
        };
        if let Some(info) = decode_param_block(rom, block) {
            return Some(info);
        }
    }
    None
}

fn decode_param_block(rom: &Rom, offset: usize) -> Option<EngineInfo> {
    let mut cursor = rom.cursor_at(offset).ok()?;
    let word0 = cursor.read_u32().ok()?;
    let word1 = cursor.read_u32().ok()?;
    let word2 = cursor.read_u32().ok()?;

    if word0 >> 24 != 0 {
        return None;
    }
    let polyphony = ((word0 >> 8) & 0xF) as u8;
    let main_volume = ((word0 >> 12) & 0xF) as u8;
    let sample_rate_index = ((word0 >> 16) & 0xF) as u8;
    let dac_bits = 17u8.checked_sub(((word0 >> 20) & 0xF) as u8)?;

    if main_volume == 0 || polyphony > 12 {
        return None;
    }
    if !(6..=9).contains(&dac_bits) {
        return None;
    }
    if !(1..=12).contains(&sample_rate_index) {
        return None;
    }
    if word1 >= 256 {
        return None;
    }
    let song_table = (word2 & GBA_PTR_MASK) as usize + 12 * word1 as usize;
    if song_table >= rom.len() {
        return None;
    }
    Some(EngineInfo {
        param_offset: offset,
        polyphony,
        main_volume,
        sample_rate_index,
        sample_rate: SAMPLE_RATES[usize::from(sample_rate_index) - 1],
        dac_bits,
        song_table,
    })
}
