//! Sappy/M4A music ripper for Game Boy Advance ROM images
//!
//! Extracts the musical content of GBA cartridges that embed Nintendo's
//! "Sappy" (M4A) sound engine and re-emits it as portable formats:
//! Standard MIDI Files (format 0) for the sequences and SoundFont 2.1
//! banks for the instruments and samples.
//!
//! # Subsystems
//! - Engine locator: pattern-scans the ROM for the sound-engine control
//!   block and the song table (`locator`)
//! - Sequence interpreter: a per-track byte-code VM that replays GBA
//!   track streams into MIDI events (`seq`)
//! - Instrument/sample builder: translates GBA instrument records into
//!   the SoundFont preset/instrument/sample hierarchy (`instr`)
//! - SoundFont writer: assembles the SF2 RIFF container (`sf2`)
//!
//! # Quick start
//! ```no_run
//! use sappy_ripper::ripper::{rip, RipConfig};
//! use sappy_ripper::rom::Rom;
//!
//! # fn main() -> sappy_ripper::Result<()> {
//! let data = std::fs::read("game.gba")?;
//! let rom = Rom::new(data)?;
//! let config = RipConfig::new("out", "game");
//! let summary = rip(&rom, &config)?;
//! println!("{} songs ripped", summary.songs_ripped);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod instr;
pub mod locator;
pub mod midi;
pub mod resources;
pub mod ripper;
pub mod rom;
pub mod seq;
pub mod sf2;

/// Error type for ripper operations
#[derive(thiserror::Error, Debug)]
pub enum RipError {
    /// The sound-engine code pattern was not located in the ROM
    #[error("engine not found: {0}")]
    NotFound(String),

    /// Structurally invalid data (bad pointer, bad track count, table past EOF)
    #[error("structural error: {0}")]
    Structural(String),

    /// A GBA sample record that cannot be translated
    #[error("invalid sample: {0}")]
    SampleInvalid(String),

    /// A GBA instrument record that cannot be translated
    #[error("invalid instrument: {0}")]
    InstrumentInvalid(String),

    /// A read ran off the end of the ROM image
    #[error("unexpected end of data at offset {0:#x}")]
    UnexpectedEof(usize),

    /// IO error from the filesystem
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<String> for RipError {
    fn from(msg: String) -> Self {
        RipError::Other(msg)
    }
}

impl From<&str> for RipError {
    fn from(msg: &str) -> Self {
        RipError::Other(msg.to_string())
    }
}

/// Result type for ripper operations
pub type Result<T> = std::result::Result<T, RipError>;

pub use locator::{locate_engine, EngineInfo};
pub use midi::MidiFile;
pub use ripper::{rip, RipConfig, RipSummary};
pub use rom::Rom;
pub use sf2::Sf2Document;
