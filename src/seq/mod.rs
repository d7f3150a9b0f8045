//! Sappy sequence interpreter
//!
//! A byte-code virtual machine that replays GBA track streams into
//! MIDI events. Each of the up-to-16 tracks carries its own cursor,
//! subroutine return slot, wait counter, sticky command/key/velocity
//! state and LFO simulation; one `tick` advances the whole song by a
//! single MIDI clock.

mod tables;

use log::{debug, warn};

use tables::LENGTH_TICKS;

use crate::midi::MidiFile;
use crate::rom::Rom;
use crate::{Result, RipError};

/// Track slots in a song header.
pub const MAX_TRACKS: usize = 16;

/// Hard cap on interpreter ticks, guaranteeing termination on
/// malformed data.
const MAX_TICKS: u32 = 100_000;

/// Hard cap on commands decoded per track within one tick, so a
/// degenerate subroutine cycle cannot stall a tick forever.
const MAX_COMMANDS_PER_TICK: u32 = 65_536;

/// Interpreter behaviour switches, derived from the run configuration.
#[derive(Clone, Copy, Debug, Default)]
pub struct SeqOptions {
    /// Square-root-linearise volumes and velocities
    pub linearise_volume: bool,
    /// Simulate the engine LFO with modulation/aftertouch events
    pub simulate_vibrato: bool,
    /// Emit XG two-byte bank selects instead of GS
    pub xg: bool,
    /// Bank number forced on every program change
    pub bank: Option<u16>,
}

/// A parsed song header.
#[derive(Clone, Debug)]
pub struct SongHeader {
    /// Offset of the header itself
    pub offset: usize,
    /// Number of tracks, 1..=16
    pub track_count: u8,
    /// Engine priority byte (unused by the ripper)
    pub priority: u8,
    /// Reverb byte; bit 7 enables CC#91 on every channel
    pub reverb: u8,
    /// Offset of the song's instrument bank
    pub instr_bank: usize,
    /// Track stream offsets
    pub track_ptrs: Vec<usize>,
}

/// Parse and validate the song header at `offset`.
pub fn read_song_header(rom: &Rom, offset: usize) -> Result<SongHeader> {
    let mut cursor = rom.cursor_at(offset)?;
    let track_count = cursor.read_u8()?;
    let _reserved = cursor.read_u8()?;
    let priority = cursor.read_u8()?;
    let reverb = cursor.read_u8()?;
    if track_count == 0 || track_count > MAX_TRACKS as u8 {
        return Err(RipError::Structural(format!(
            "song at {offset:#x} has {track_count} tracks"
        )));
    }
    let instr_bank = cursor.read_gba_pointer()?;
    let mut track_ptrs = Vec::with_capacity(usize::from(track_count));
    for _ in 0..track_count {
        let ptr = cursor.read_gba_pointer()?;
        if ptr >= rom.len() {
            return Err(RipError::Structural(format!(
                "track pointer {ptr:#x} outside ROM"
            )));
        }
        track_ptrs.push(ptr);
    }
    Ok(SongHeader {
        offset,
        track_count,
        priority,
        reverb,
        instr_bank,
        track_ptrs,
    })
}

struct PlayingNote {
    track: usize,
    key: u8,
    vel: u8,
    /// Ticks left; negative means held until an explicit key-off
    remaining: i32,
    /// Whether the note-on has been emitted yet
    event_made: bool,
}

/// Per-song interpreter. Owns the MIDI buffer for the duration of the
/// rip and hands it back from [`Sequencer::process`].
pub struct Sequencer<'a> {
    rom: &'a Rom,
    midi: MidiFile,
    opts: SeqOptions,
    track_count: usize,

    ptr: [Option<usize>; MAX_TRACKS],
    return_ptr: [usize; MAX_TRACKS],
    return_flag: [bool; MAX_TRACKS],
    counter: [i32; MAX_TRACKS],
    last_cmd: [u8; MAX_TRACKS],
    last_key: [u8; MAX_TRACKS],
    last_vel: [u8; MAX_TRACKS],
    key_shift: [i8; MAX_TRACKS],
    completed: [bool; MAX_TRACKS],

    lfo_depth: [u8; MAX_TRACKS],
    lfo_delay: [u8; MAX_TRACKS],
    lfo_delay_ctr: [u8; MAX_TRACKS],
    lfo_type: [u8; MAX_TRACKS],
    lfo_flag: [bool; MAX_TRACKS],
    lfo_hack: [bool; MAX_TRACKS],

    loop_flag: bool,
    loop_adr: usize,
    loop_started: bool,

    notes: Vec<PlayingNote>,
    simultaneous: u32,
    max_simultaneous: u32,
}

impl<'a> Sequencer<'a> {
    /// Set up the interpreter for one song. The MIDI buffer may
    /// already hold preamble events (reset sysex); reverb controllers
    /// are added here when the header requests them.
    pub fn new(rom: &'a Rom, mut midi: MidiFile, header: &SongHeader, opts: SeqOptions) -> Result<Self> {
        if header.reverb & 0x80 != 0 {
            for track in 0..header.track_count {
                midi.controller(track, 91, header.reverb & 0x7F);
            }
        }

        let mut ptr = [None; MAX_TRACKS];
        for (track, &offset) in header.track_ptrs.iter().enumerate() {
            ptr[track] = Some(offset);
        }

        // A 0xB2 jump just before track 1 (or before the header for a
        // single-track song) marks the song's loop point.
        let probe_end = if header.track_count > 1 {
            header.track_ptrs[1]
        } else {
            header.offset
        };
        let mut loop_flag = false;
        let mut loop_adr = 0;
        if probe_end >= 5 {
            for probe in probe_end - 5..probe_end {
                if rom.bytes()[probe] == 0xB2 {
                    if let Ok(address) = rom.cursor_at(probe + 1).and_then(|mut c| c.read_gba_pointer()) {
                        loop_flag = true;
                        loop_adr = address;
                    }
                    break;
                }
            }
        }

        Ok(Sequencer {
            rom,
            midi,
            opts,
            track_count: usize::from(header.track_count),
            ptr,
            return_ptr: [0; MAX_TRACKS],
            return_flag: [false; MAX_TRACKS],
            counter: [0; MAX_TRACKS],
            last_cmd: [0; MAX_TRACKS],
            last_key: [0; MAX_TRACKS],
            last_vel: [0; MAX_TRACKS],
            key_shift: [0; MAX_TRACKS],
            completed: [false; MAX_TRACKS],
            lfo_depth: [0; MAX_TRACKS],
            lfo_delay: [0; MAX_TRACKS],
            lfo_delay_ctr: [0; MAX_TRACKS],
            lfo_type: [0; MAX_TRACKS],
            lfo_flag: [false; MAX_TRACKS],
            lfo_hack: [false; MAX_TRACKS],
            loop_flag,
            loop_adr,
            loop_started: false,
            notes: Vec::new(),
            simultaneous: 0,
            max_simultaneous: 0,
        })
    }

    /// Run the song to completion and hand back the MIDI buffer.
    pub fn process(mut self) -> Result<MidiFile> {
        let mut ticks = 0u32;
        loop {
            if self.tick()? {
                break;
            }
            ticks += 1;
            if ticks >= MAX_TICKS {
                warn!("sequence did not terminate within {MAX_TICKS} ticks, output truncated");
                break;
            }
        }
        // Anything still sounding gets closed so the file is well
        // formed for strict players
        let leftovers: Vec<(usize, u8, u8, bool)> = self
            .notes
            .drain(..)
            .map(|note| (note.track, note.key, note.vel, note.event_made))
            .collect();
        for (track, key, vel, event_made) in leftovers {
            if event_made {
                self.midi.note_off(track as u8, key, vel);
            }
        }
        if self.loop_flag {
            self.midi.marker("loopEnd");
        }
        debug!("peak polyphony {}", self.max_simultaneous);
        Ok(self.midi)
    }

    /// Advance the song by one MIDI clock. Returns true when every
    /// track has completed and no timed note is pending.
    fn tick(&mut self) -> Result<bool> {
        // Age playing notes; timed notes reaching zero are released
        let mut index = 0;
        while index < self.notes.len() {
            if self.notes[index].remaining > 0 {
                self.notes[index].remaining -= 1;
                if self.notes[index].remaining == 0 {
                    let note = self.notes.remove(index);
                    self.midi.note_off(note.track as u8, note.key, note.vel);
                    self.lfo_stop(note.track);
                    self.simultaneous = self.simultaneous.saturating_sub(1);
                    continue;
                }
            }
            index += 1;
        }

        // Fetch and execute commands on every track that is due
        for track in 0..self.track_count {
            self.counter[track] -= 1;
            let mut budget = MAX_COMMANDS_PER_TICK;
            while let Some(position) = self.ptr[track] {
                if self.counter[track] > 0 {
                    break;
                }
                if track == 0 && self.loop_flag && !self.loop_started && position == self.loop_adr {
                    self.midi.marker("loopStart");
                    self.loop_started = true;
                }
                self.step(track)?;
                budget -= 1;
                if budget == 0 {
                    warn!("track {track} stalled mid-tick, abandoning it");
                    self.ptr[track] = None;
                    self.completed[track] = true;
                    break;
                }
            }
        }

        for track in 0..self.track_count {
            self.lfo_tick(track);
        }

        if self.all_done() {
            return Ok(true);
        }

        // Note-ons go out after everything else this tick
        for index in (0..self.notes.len()).rev() {
            if !self.notes[index].event_made {
                self.notes[index].event_made = true;
                let (track, key, vel) = {
                    let note = &self.notes[index];
                    (note.track, note.key, note.vel)
                };
                self.midi.note_on(track as u8, key, vel);
            }
        }

        self.midi.clock();
        Ok(false)
    }

    /// Completion requires every track done and every remaining note
    /// to be a held note whose note-on already went out; timed notes
    /// keep the clock running until their note-off.
    fn all_done(&self) -> bool {
        self.completed[..self.track_count].iter().all(|&done| done)
            && self
                .notes
                .iter()
                .all(|note| note.remaining < 0 && note.event_made)
    }

    /// Decode and execute one command on `track`.
    fn step(&mut self, track: usize) -> Result<()> {
        let Some(position) = self.ptr[track] else {
            return Ok(());
        };
        let mut cursor = self.rom.cursor_at(position)?;
        let first = cursor.read_u8()?;
        let command = if first < 0x80 {
            // Running status: the byte is the first argument of the
            // previous repeatable command
            cursor.seek(position)?;
            self.last_cmd[track]
        } else {
            if first >= 0xB5 {
                self.last_cmd[track] = first;
            }
            first
        };

        match command {
            0x80..=0xB0 => {
                self.counter[track] = LENGTH_TICKS[usize::from(command) - 0x80];
            }
            0xB1 => {
                self.ptr[track] = None;
                self.completed[track] = true;
                return Ok(());
            }
            0xB2 => {
                let target = cursor.read_gba_pointer()?;
                if target >= self.rom.len() {
                    return Err(RipError::Structural(format!(
                        "jump target {target:#x} outside ROM"
                    )));
                }
                // The jump ends the track for completion purposes even
                // though execution continues at the target; looped
                // songs terminate through this exact property
                self.ptr[track] = Some(target);
                self.completed[track] = true;
                return Ok(());
            }
            0xB3 => {
                let target = cursor.read_gba_pointer()?;
                if target >= self.rom.len() {
                    return Err(RipError::Structural(format!(
                        "call target {target:#x} outside ROM"
                    )));
                }
                self.return_ptr[track] = cursor.pos();
                self.return_flag[track] = true;
                self.ptr[track] = Some(target);
                return Ok(());
            }
            0xB4 => {
                if self.return_flag[track] {
                    self.return_flag[track] = false;
                    self.ptr[track] = Some(self.return_ptr[track]);
                    return Ok(());
                }
            }
            0xBB => {
                let tempo = cursor.read_u8()?;
                self.midi.tempo(f64::from(tempo) * 2.0);
            }
            0xBC => {
                self.key_shift[track] = cursor.read_i8()?;
            }
            0xBD => {
                let program = cursor.read_u8()?;
                self.program_change(track, program);
            }
            0xBE => {
                let volume = cursor.read_u8()?;
                let value = self.linearised(volume);
                self.midi.controller(track as u8, 7, value);
            }
            0xBF => {
                let pan = cursor.read_u8()?;
                self.midi.controller(track as u8, 10, pan);
            }
            0xC0 => {
                let bend = cursor.read_u8()?;
                self.midi.pitch_bend_msb(track as u8, bend);
            }
            0xC1 => {
                let range = cursor.read_u8()?;
                if self.opts.simulate_vibrato {
                    self.midi.rpn_msb(track as u8, 0, range);
                } else {
                    self.midi.controller(track as u8, 20, range);
                }
            }
            0xC2 => {
                let speed = cursor.read_u8()?;
                if self.opts.simulate_vibrato {
                    self.midi.nrpn_msb(track as u8, 136, speed);
                } else {
                    self.midi.controller(track as u8, 21, speed);
                }
            }
            0xC3 => {
                let delay = cursor.read_u8()?;
                if self.opts.simulate_vibrato {
                    self.lfo_delay[track] = delay;
                } else {
                    self.midi.controller(track as u8, 26, delay);
                }
            }
            0xC4 => {
                let depth = cursor.read_u8()?;
                if self.opts.simulate_vibrato {
                    // A depth change during an undelayed note takes
                    // effect immediately
                    if self.lfo_delay[track] == 0 && self.lfo_hack[track] {
                        self.lfo_emit(track, 10 * u32::from(depth));
                        self.lfo_flag[track] = true;
                    }
                    self.lfo_depth[track] = depth;
                    self.lfo_hack[track] = true;
                } else {
                    self.midi.controller(track as u8, 1, depth);
                }
            }
            0xC5 => {
                let kind = cursor.read_u8()?;
                if self.opts.simulate_vibrato {
                    self.lfo_type[track] = kind;
                } else {
                    self.midi.controller(track as u8, 22, kind);
                }
            }
            0xC8 => {
                let detune = cursor.read_u8()?;
                if self.opts.simulate_vibrato {
                    self.midi.rpn_msb(track as u8, 1, detune);
                } else {
                    self.midi.controller(track as u8, 24, detune);
                }
            }
            0xCE => {
                let save = cursor.pos();
                match cursor.read_u8() {
                    Ok(key) if key < 0x80 => self.last_key[track] = key,
                    _ => cursor.seek(save)?,
                }
                let key = self.transposed_key(track);
                self.stop_note(track, key);
            }
            0xCF => {
                self.read_note_args(track, &mut cursor)?;
                self.start_note(track, -1);
            }
            0xD0..=0xFF => {
                let mut length = LENGTH_TICKS[usize::from(command) - 0xD0 + 1];
                if let Some(extra) = self.read_note_args(track, &mut cursor)? {
                    length += extra;
                }
                self.start_note(track, length);
            }
            _ => {
                // Unknown command carrying one argument byte
                let _ = cursor.read_u8()?;
            }
        }
        self.ptr[track] = Some(cursor.pos());
        Ok(())
    }

    /// Sticky key/velocity argument parsing shared by timed and held
    /// key-ons. Returns the additive length offset when present.
    fn read_note_args(
        &mut self,
        track: usize,
        cursor: &mut crate::rom::RomCursor<'_>,
    ) -> Result<Option<i32>> {
        let save = cursor.pos();
        let Ok(first) = cursor.read_u8() else {
            return Ok(None);
        };
        if first >= 0x80 {
            // Not an argument; reuse the previous key and velocity
            cursor.seek(save)?;
            return Ok(None);
        }
        self.last_key[track] = first;
        let save = cursor.pos();
        let Ok(second) = cursor.read_u8() else {
            return Ok(None);
        };
        if second >= 0x80 {
            cursor.seek(save)?;
            return Ok(None);
        }
        self.last_vel[track] = second;
        let save = cursor.pos();
        let Ok(third) = cursor.read_u8() else {
            return Ok(None);
        };
        if third >= 0x80 {
            cursor.seek(save)?;
            return Ok(None);
        }
        Ok(Some(i32::from(third)))
    }

    fn transposed_key(&self, track: usize) -> u8 {
        (i32::from(self.last_key[track]) + i32::from(self.key_shift[track])).clamp(0, 127) as u8
    }

    fn linearised(&self, value: u8) -> u8 {
        if self.opts.linearise_volume {
            (127.0 * f64::from(value)).sqrt().floor() as u8
        } else {
            value
        }
    }

    fn start_note(&mut self, track: usize, length: i32) {
        let key = self.transposed_key(track);
        let vel = self.linearised(self.last_vel[track]);
        self.notes.insert(
            0,
            PlayingNote {
                track,
                key,
                vel,
                remaining: length,
                event_made: false,
            },
        );
        self.simultaneous += 1;
        self.max_simultaneous = self.max_simultaneous.max(self.simultaneous);
        self.lfo_start(track);
    }

    fn stop_note(&mut self, track: usize, key: u8) {
        if let Some(index) = self
            .notes
            .iter()
            .position(|note| note.track == track && note.key == key)
        {
            let note = self.notes.remove(index);
            if note.event_made {
                self.midi.note_off(track as u8, key, note.vel);
            }
            self.lfo_stop(track);
            self.simultaneous = self.simultaneous.saturating_sub(1);
        } else {
            debug!("key-off for silent note {key} on track {track}");
        }
    }

    fn program_change(&mut self, track: usize, program: u8) {
        if let Some(bank) = self.opts.bank {
            if self.opts.xg {
                self.midi.controller(track as u8, 0, (bank >> 7) as u8);
                self.midi.controller(track as u8, 32, (bank & 0x7F) as u8);
            } else {
                self.midi.controller(track as u8, 0, bank as u8);
            }
        }
        self.midi.program_change(track as u8, program);
    }

    fn lfo_emit(&mut self, track: usize, value: u32) {
        let value = value.min(127) as u8;
        if self.lfo_type[track] == 0 {
            self.midi.controller(track as u8, 1, value);
        } else {
            self.midi.channel_aftertouch(track as u8, value);
        }
    }

    fn lfo_start(&mut self, track: usize) {
        if self.lfo_delay[track] != 0 {
            self.lfo_delay_ctr[track] = self.lfo_delay[track];
        }
    }

    fn lfo_tick(&mut self, track: usize) {
        if self.lfo_delay_ctr[track] != 0 {
            self.lfo_delay_ctr[track] -= 1;
            if self.lfo_delay_ctr[track] == 0 {
                self.lfo_emit(track, 8 * u32::from(self.lfo_depth[track]));
                self.lfo_flag[track] = true;
            }
        }
    }

    fn lfo_stop(&mut self, track: usize) {
        if self.lfo_flag[track] {
            self.lfo_flag[track] = false;
            if self.lfo_type[track] == 0 {
                self.midi.controller(track as u8, 1, 0);
            } else {
                self.midi.channel_aftertouch(track as u8, 0);
            }
        } else {
            self.lfo_delay_ctr[track] = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A ROM holding one song: track data first, then the header at
    /// `header`, pointing back at the tracks.
    fn song_rom(tracks: &[&[u8]]) -> (Rom, usize) {
        let mut image = vec![0u8; 0x40];
        let mut offsets = Vec::new();
        for track in tracks {
            offsets.push(image.len());
            image.extend_from_slice(track);
        }
        let header = image.len();
        image.push(tracks.len() as u8);
        image.extend_from_slice(&[0, 0, 0]);
        image.extend_from_slice(&0x0800_0000u32.to_le_bytes()); // bank, unused here
        for &offset in &offsets {
            image.extend_from_slice(&(0x0800_0000 + offset as u32).to_le_bytes());
        }
        (Rom::new(image).unwrap(), header)
    }

    fn rip_tracks(tracks: &[&[u8]], opts: SeqOptions) -> Vec<u8> {
        let (rom, header_offset) = song_rom(tracks);
        let header = read_song_header(&rom, header_offset).unwrap();
        let seq = Sequencer::new(&rom, MidiFile::new(24), &header, opts).unwrap();
        let midi = seq.process().unwrap();
        midi.track_data().to_vec()
    }

    #[test]
    fn header_validation() {
        let (rom, header_offset) = song_rom(&[&[0xB1]]);
        let header = read_song_header(&rom, header_offset).unwrap();
        assert_eq!(header.track_count, 1);
        assert_eq!(header.track_ptrs, [0x40]);

        let bad = Rom::new(vec![17u8, 0, 0, 0, 0, 0, 0, 8]).unwrap();
        assert!(read_song_header(&bad, 0).is_err());
    }

    #[test]
    fn single_timed_note() {
        // key 60, velocity 96, length opcode 0xD4 (five ticks)
        let data = rip_tracks(&[&[0xD4, 0x3C, 0x60, 0xB1]], SeqOptions::default());
        assert_eq!(
            data,
            [0x00, 0x90, 0x3C, 0x60, 0x05, 0x80, 0x3C, 0x60]
        );
    }

    #[test]
    fn wait_then_note() {
        // 0x84 waits four ticks before the note
        let data = rip_tracks(&[&[0x84, 0xD4, 0x3C, 0x60, 0xB1]], SeqOptions::default());
        assert_eq!(
            data,
            [0x04, 0x90, 0x3C, 0x60, 0x05, 0x80, 0x3C, 0x60]
        );
    }

    #[test]
    fn running_status_repeats_note_command() {
        // After the wait, 0x3D is below 0x80 and repeats the previous
        // note command with a fresh key and the sticky velocity
        let data = rip_tracks(&[&[0xD4, 0x3C, 0x60, 0x84, 0x3D, 0xB1]], SeqOptions::default());
        assert_eq!(
            data,
            [
                0x00, 0x90, 0x3C, 0x60, // first note-on
                0x04, 0x3D, 0x60, // second note-on, status omitted
                0x01, 0x80, 0x3C, 0x60, // first note releases
                0x04, 0x3D, 0x60, // second note releases
            ]
        );
    }

    #[test]
    fn third_small_byte_extends_the_note() {
        // key, velocity, then a length offset: 5 + 3 ticks
        let data = rip_tracks(&[&[0xD4, 0x3C, 0x60, 0x03, 0xB1]], SeqOptions::default());
        assert_eq!(
            data,
            [0x00, 0x90, 0x3C, 0x60, 0x08, 0x80, 0x3C, 0x60]
        );
    }

    #[test]
    fn call_and_return() {
        // Subroutine at offset 0x40 plays key 48 then returns; the
        // main track at 0x45 calls it, plays key 60 and ends. A bare
        // 0xB4 with no pending call is a no-op.
        let sub: &[u8] = &[0xD4, 0x30, 0x60, 0xB4];
        let main: &[u8] = &[0xB3, 0x00, 0x00, 0x00, 0x08, 0xD4, 0x3C, 0x60, 0xB4, 0xB1];
        let mut image = vec![0u8; 0x40];
        image.extend_from_slice(sub); // 0x40..0x44
        let main_offset = image.len();
        image.extend_from_slice(main);
        let header = image.len();
        image.extend_from_slice(&[1, 0, 0, 0]);
        image.extend_from_slice(&0x0800_0000u32.to_le_bytes());
        image.extend_from_slice(&(0x0800_0000 + main_offset as u32).to_le_bytes());
        // patch the call target to the subroutine
        image[main_offset + 1..main_offset + 5]
            .copy_from_slice(&(0x0800_0000u32 + 0x40).to_le_bytes());

        let rom = Rom::new(image).unwrap();
        let song = read_song_header(&rom, header).unwrap();
        let seq = Sequencer::new(&rom, MidiFile::new(24), &song, SeqOptions::default()).unwrap();
        let midi = seq.process().unwrap();
        assert_eq!(
            midi.track_data(),
            [
                0x00, 0x90, 0x30, 0x60, 0x00, 0x3C, 0x60, //
                0x05, 0x80, 0x3C, 0x60, 0x00, 0x30, 0x60,
            ]
        );
    }

    #[test]
    fn tracks_map_to_their_own_channels() {
        // track 1's pan goes out before track 0's note-on: note-ons
        // follow all other events within a tick
        let data = rip_tracks(
            &[&[0xD4, 0x3C, 0x60, 0xB1], &[0xBF, 0x40, 0xB1]],
            SeqOptions::default(),
        );
        assert_eq!(
            data,
            [
                0x00, 0xB1, 10, 0x40, //
                0x00, 0x90, 0x3C, 0x60, //
                0x05, 0x80, 0x3C, 0x60,
            ]
        );
    }

    #[test]
    fn key_off_reuses_last_key_without_consuming() {
        // Held note, wait four ticks, bare key-off (next byte is the
        // end-of-track command, not an argument)
        let data = rip_tracks(&[&[0xCF, 0x3C, 0x60, 0x84, 0xCE, 0xB1]], SeqOptions::default());
        assert_eq!(
            data,
            [0x00, 0x90, 0x3C, 0x60, 0x04, 0x80, 0x3C, 0x60]
        );
    }

    #[test]
    fn key_shift_transposes_notes() {
        let data = rip_tracks(&[&[0xBC, 0x0C, 0xD4, 0x3C, 0x60, 0xB1]], SeqOptions::default());
        assert_eq!(
            data,
            [0x00, 0x90, 0x48, 0x60, 0x05, 0x80, 0x48, 0x60]
        );
    }

    #[test]
    fn tempo_command_doubles_byte() {
        let data = rip_tracks(&[&[0xBB, 0x4B, 0xB1]], SeqOptions::default());
        // 150 bpm → 400000 µs per quarter
        assert_eq!(data, [0x00, 0xFF, 0x51, 3, 0x06, 0x1A, 0x80]);
    }

    #[test]
    fn volume_linearisation() {
        let raw = rip_tracks(
            &[&[0xBE, 0x40, 0xB1]],
            SeqOptions {
                linearise_volume: false,
                ..Default::default()
            },
        );
        assert_eq!(raw, [0x00, 0xB0, 7, 0x40]);

        let lin = rip_tracks(
            &[&[0xBE, 0x40, 0xB1]],
            SeqOptions {
                linearise_volume: true,
                ..Default::default()
            },
        );
        // floor(sqrt(127 · 64)) = 90
        assert_eq!(lin, [0x00, 0xB0, 7, 90]);
    }

    #[test]
    fn vibrato_simulation_routes_to_rpn() {
        let opts = SeqOptions {
            simulate_vibrato: true,
            ..Default::default()
        };
        let data = rip_tracks(&[&[0xC1, 0x0C, 0xB1]], opts);
        // bend range through RPN 0
        assert_eq!(
            data,
            [0x00, 0xB0, 101, 0, 0x00, 100, 0, 0x00, 6, 12]
        );

        let plain = rip_tracks(&[&[0xC1, 0x0C, 0xB1]], SeqOptions::default());
        assert_eq!(plain, [0x00, 0xB0, 20, 12]);
    }

    #[test]
    fn lfo_delay_fires_after_countdown() {
        let opts = SeqOptions {
            simulate_vibrato: true,
            ..Default::default()
        };
        // delay 2, depth 10, held note, waits, key-off
        let track: &[u8] = &[0xC3, 0x02, 0xC4, 0x0A, 0xCF, 0x3C, 0x60, 0x90, 0xCE, 0xB1];
        let data = rip_tracks(&[track], opts);
        // note on at tick 0; modulation 8·depth once the delay
        // elapses; key-off resets modulation to zero
        assert_eq!(
            data,
            [
                0x00, 0x90, 0x3C, 0x60, //
                0x01, 0xB0, 1, 80, //
                0x0F, 0x80, 0x3C, 0x60, //
                0x00, 0xB0, 1, 0,
            ]
        );
    }

    #[test]
    fn program_change_with_forced_bank() {
        let gs = SeqOptions {
            bank: Some(3),
            ..Default::default()
        };
        let data = rip_tracks(&[&[0xBD, 0x05, 0xB1]], gs);
        assert_eq!(data, [0x00, 0xB0, 0, 3, 0x00, 0xC0, 0x05]);

        let xg = SeqOptions {
            bank: Some(0x83),
            xg: true,
            ..Default::default()
        };
        let data = rip_tracks(&[&[0xBD, 0x05, 0xB1]], xg);
        assert_eq!(
            data,
            [0x00, 0xB0, 0, 1, 0x00, 32, 3, 0x00, 0xC0, 0x05]
        );
    }

    #[test]
    fn loop_markers_and_jump_termination() {
        // Track: tempo, wait one tick, jump back to the start. The
        // jump sits right before the header so loop detection sees it.
        let track: &[u8] = &[0xBB, 0x60, 0x81, 0xB2, 0x40, 0x00, 0x00, 0x08];
        let (rom, header_offset) = song_rom(&[track]);
        let header = read_song_header(&rom, header_offset).unwrap();
        let seq = Sequencer::new(&rom, MidiFile::new(24), &header, SeqOptions::default()).unwrap();
        let midi = seq.process().unwrap();
        let data = midi.track_data();

        let start = b"loopStart";
        let end = b"loopEnd";
        let has = |needle: &[u8]| data.windows(needle.len()).any(|window| window == needle);
        assert!(has(start));
        assert!(has(end));
        // loopStart appears exactly once even though execution passes
        // the loop point again
        let count = data.windows(start.len()).filter(|w| *w == start).count();
        assert_eq!(count, 1);
    }

    #[test]
    fn runaway_song_hits_the_safety_cap() {
        // One-tick note, one-tick wait, jump back: a fresh timed note
        // exists at every completion check, so only the cap ends it
        let track: &[u8] = &[0xD0, 0x3C, 0x60, 0x81, 0xB2, 0x40, 0x00, 0x00, 0x08];
        let (rom, header_offset) = song_rom(&[track]);
        let header = read_song_header(&rom, header_offset).unwrap();
        let seq = Sequencer::new(&rom, MidiFile::new(24), &header, SeqOptions::default()).unwrap();
        let midi = seq.process().unwrap();
        // Partial output was produced
        assert!(!midi.track_data().is_empty());
    }

    #[test]
    fn reverb_preamble_on_all_tracks() {
        let (rom, header_offset) = song_rom(&[&[0xB1], &[0xB1]]);
        let mut header = read_song_header(&rom, header_offset).unwrap();
        header.reverb = 0x80 | 40;
        let seq = Sequencer::new(&rom, MidiFile::new(24), &header, SeqOptions::default()).unwrap();
        let midi = seq.process().unwrap();
        assert_eq!(
            midi.track_data(),
            [0x00, 0xB0, 91, 40, 0x00, 0xB1, 91, 40]
        );
    }
}
