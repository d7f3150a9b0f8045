//! RIFF assembly for the SoundFont container
//!
//! Chunk sizes are computed after all contents are assembled; every
//! numeric field is little-endian. The layout is
//! `RIFF('sfbk', LIST INFO, LIST sdta, LIST pdta)` with the nine
//! hydra sub-chunks in their mandated order.

use std::io::{self, Write};

use super::{BagRecord, GeneratorRecord, Sf2Document};

const VERSION_MAJOR: u16 = 2;
const VERSION_MINOR: u16 = 1;
const SOUND_ENGINE: &str = "EMU8000";
const BANK_NAME: &str = "Unnamed";
const ENGINEER: &str = "Nintendo Game Boy Advance SoundFont";
const COPYRIGHT: &str = "Ripped with SF2Ripper v0.0 (c) 2012 by Bregalad";

impl Sf2Document {
    /// Finalise the document (terminator records) and serialise the
    /// complete SoundFont file.
    pub fn to_bytes(mut self) -> Vec<u8> {
        self.append_terminators();

        let info = self.info_list();
        let sdta = self.sdta_list();
        let pdta = self.pdta_list();

        let riff_len = 4 + (8 + info.len()) + (8 + sdta.len()) + (8 + pdta.len());
        let mut out = Vec::with_capacity(8 + riff_len);
        out.extend_from_slice(b"RIFF");
        push_u32(&mut out, riff_len as u32);
        out.extend_from_slice(b"sfbk");
        push_list(&mut out, &info);
        push_list(&mut out, &sdta);
        push_list(&mut out, &pdta);
        out
    }

    /// Finalise the document and write it to `out`.
    pub fn write<W: Write>(self, out: &mut W) -> io::Result<()> {
        out.write_all(&self.to_bytes())
    }

    fn info_list(&self) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(b"INFO");

        body.extend_from_slice(b"ifil");
        push_u32(&mut body, 4);
        push_u16(&mut body, VERSION_MAJOR);
        push_u16(&mut body, VERSION_MINOR);

        push_zstr_chunk(&mut body, b"isng", SOUND_ENGINE);
        push_zstr_chunk(&mut body, b"INAM", BANK_NAME);
        push_zstr_chunk(&mut body, b"IENG", ENGINEER);
        push_zstr_chunk(&mut body, b"ICOP", COPYRIGHT);
        body
    }

    fn sdta_list(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(12 + self.smpl.len() * 2);
        body.extend_from_slice(b"sdta");
        body.extend_from_slice(b"smpl");
        push_u32(&mut body, (self.smpl.len() * 2) as u32);
        for &sample in &self.smpl {
            body.extend_from_slice(&sample.to_le_bytes());
        }
        body
    }

    fn pdta_list(&self) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(b"pdta");

        sub_chunk(&mut body, b"phdr", self.presets.len() * 38, |out| {
            for preset in &self.presets {
                out.extend_from_slice(&preset.name);
                push_u16(out, preset.preset);
                push_u16(out, preset.bank);
                push_u16(out, preset.bag_index);
                // library, genre, morphology
                push_u32(out, 0);
                push_u32(out, 0);
                push_u32(out, 0);
            }
        });
        sub_chunk(&mut body, b"pbag", self.preset_bags.len() * 4, |out| {
            push_bags(out, &self.preset_bags);
        });
        sub_chunk(&mut body, b"pmod", self.preset_mods.len() * 10, |out| {
            out.extend(std::iter::repeat(0u8).take(self.preset_mods.len() * 10));
        });
        sub_chunk(&mut body, b"pgen", self.preset_gens.len() * 4, |out| {
            push_gens(out, &self.preset_gens);
        });
        sub_chunk(&mut body, b"inst", self.instruments.len() * 22, |out| {
            for instrument in &self.instruments {
                out.extend_from_slice(&instrument.name);
                push_u16(out, instrument.bag_index);
            }
        });
        sub_chunk(&mut body, b"ibag", self.inst_bags.len() * 4, |out| {
            push_bags(out, &self.inst_bags);
        });
        sub_chunk(&mut body, b"imod", self.inst_mods.len() * 10, |out| {
            out.extend(std::iter::repeat(0u8).take(self.inst_mods.len() * 10));
        });
        sub_chunk(&mut body, b"igen", self.inst_gens.len() * 4, |out| {
            push_gens(out, &self.inst_gens);
        });
        sub_chunk(&mut body, b"shdr", self.sample_headers.len() * 46, |out| {
            for header in &self.sample_headers {
                out.extend_from_slice(&header.name);
                push_u32(out, header.start);
                push_u32(out, header.end);
                push_u32(out, header.loop_start);
                push_u32(out, header.loop_end);
                push_u32(out, header.sample_rate);
                out.push(header.original_pitch);
                out.push(header.pitch_correction as u8);
                push_u16(out, 0); // sampleLink
                push_u16(out, header.sample_type);
            }
        });
        body
    }
}

fn push_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn push_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn push_list(out: &mut Vec<u8>, body: &[u8]) {
    out.extend_from_slice(b"LIST");
    push_u32(out, body.len() as u32);
    out.extend_from_slice(body);
}

/// A NUL-terminated ASCII string chunk; the size is the byte count
/// plus the terminator.
fn push_zstr_chunk(out: &mut Vec<u8>, tag: &[u8; 4], text: &str) {
    out.extend_from_slice(tag);
    push_u32(out, text.len() as u32 + 1);
    out.extend_from_slice(text.as_bytes());
    out.push(0);
}

fn sub_chunk(out: &mut Vec<u8>, tag: &[u8; 4], size: usize, fill: impl FnOnce(&mut Vec<u8>)) {
    out.extend_from_slice(tag);
    push_u32(out, size as u32);
    let before = out.len();
    fill(out);
    debug_assert_eq!(out.len() - before, size);
}

fn push_bags(out: &mut Vec<u8>, bags: &[BagRecord]) {
    for bag in bags {
        push_u16(out, bag.gen_index);
        push_u16(out, bag.mod_index);
    }
}

fn push_gens(out: &mut Vec<u8>, gens: &[GeneratorRecord]) {
    for generator in gens {
        push_u16(out, generator.oper);
        push_u16(out, generator.amount);
    }
}
