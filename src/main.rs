//! Command-line wrapper around the ripper core.

use std::env;
use std::path::{Path, PathBuf};
use std::process::exit;

use sappy_ripper::ripper::{rip, RipConfig};
use sappy_ripper::{RipError, Rom};

struct CliArgs {
    rom_path: Option<String>,
    output_dir: Option<String>,
    song_table: Option<usize>,
    gm_preset_names: bool,
    rearrange_channels: bool,
    xg: bool,
    sf2_per_bank: bool,
    raw: bool,
    show_help: bool,
}

impl CliArgs {
    fn parse() -> Self {
        let mut args = CliArgs {
            rom_path: None,
            output_dir: None,
            song_table: None,
            gm_preset_names: false,
            rearrange_channels: false,
            xg: false,
            sf2_per_bank: false,
            raw: false,
            show_help: false,
        };
        let mut iter = env::args().skip(1);
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "-gm" => args.gm_preset_names = true,
                "-rc" => args.rearrange_channels = true,
                "-xg" => args.xg = true,
                "-sb" => args.sf2_per_bank = true,
                "-raw" => args.raw = true,
                "-o" => {
                    if let Some(dir) = iter.next() {
                        args.output_dir = Some(dir);
                    } else {
                        eprintln!("-o requires a directory argument");
                        args.show_help = true;
                    }
                }
                "--help" | "-h" => args.show_help = true,
                _ if arg.starts_with('-') => {
                    eprintln!("Unknown flag: {}", arg);
                    args.show_help = true;
                }
                _ => {
                    if args.rom_path.is_none() {
                        args.rom_path = Some(arg);
                    } else if let Some(table) = parse_number(&arg) {
                        args.song_table = Some(table);
                    } else {
                        eprintln!("Not a song table address: {}", arg);
                        args.show_help = true;
                    }
                }
            }
        }
        args
    }

    fn print_help() {
        eprintln!(
            "Usage:\n  sappy-ripper <in.gba> [-o <dir>] [<song_table>] [flags]\n\n\
             Arguments:\n\
             \x20 <in.gba>        GBA ROM image to rip\n\
             \x20 <song_table>    Explicit song table address (hex 0x... or decimal),\n\
             \x20                 bypassing the engine locator\n\n\
             Flags:\n\
             \x20 -o <dir>        Output directory (default: current directory)\n\
             \x20 -gm             Give presets General MIDI names\n\
             \x20 -rc             Rearrange channels to avoid MIDI channel 10\n\
             \x20 -xg             Emit XG bank selects and reset (default GS)\n\
             \x20 -sb             One SoundFont per bank, in per-bank directories\n\
             \x20 -raw            Disable volume linearisation and vibrato simulation\n\
             \x20 -h, --help      Show this help\n\n\
             Examples:\n\
             \x20 sappy-ripper game.gba -o rip\n\
             \x20 sappy-ripper game.gba 0x8F2F90 -o rip -rc -gm\n"
        );
    }
}

fn parse_number(text: &str) -> Option<usize> {
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        usize::from_str_radix(hex, 16).ok()
    } else {
        text.parse().ok()
    }
}

fn exit_code(error: &RipError) -> i32 {
    match error {
        // Structural failures around the song table are fatal
        RipError::Structural(message) if message.contains("song table") => -2,
        RipError::Structural(_) | RipError::UnexpectedEof(_) => -3,
        _ => -1,
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = CliArgs::parse();
    if args.show_help || args.rom_path.is_none() {
        CliArgs::print_help();
        if args.rom_path.is_none() && !args.show_help {
            exit(-1);
        }
        return;
    }
    let rom_path = args.rom_path.unwrap();

    let data = match std::fs::read(&rom_path) {
        Ok(data) => data,
        Err(error) => {
            eprintln!("Cannot read '{}': {}", rom_path, error);
            exit(-1);
        }
    };
    let rom = match Rom::new(data) {
        Ok(rom) => rom,
        Err(error) => {
            eprintln!("{}", error);
            exit(-1);
        }
    };

    let name = Path::new(&rom_path)
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_else(|| "soundbank".to_string());
    let output_dir = args
        .output_dir
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));

    let mut config = RipConfig::new(output_dir, name);
    config.song_table = args.song_table;
    config.gm_preset_names = args.gm_preset_names;
    config.rearrange_channels = args.rearrange_channels;
    config.xg = args.xg;
    config.sf2_per_bank = args.sf2_per_bank;
    config.raw = args.raw;

    match rip(&rom, &config) {
        Ok(summary) => {
            println!(
                "Ripped {} songs ({} skipped), {} instruments across {} banks, {} sample bytes.",
                summary.songs_ripped,
                summary.songs_skipped,
                summary.instruments_built,
                summary.banks,
                summary.sample_bytes
            );
        }
        Err(error) => {
            eprintln!("{}", error);
            exit(exit_code(&error));
        }
    }
}
