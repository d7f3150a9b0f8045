//! SMF output checked by decoding the written file back into events.

use sappy_ripper::midi::{read_vlq, MidiFile};

#[derive(Debug, PartialEq, Eq)]
struct DecodedEvent {
    delta: u32,
    status: u8,
    /// Whether the status byte was physically present
    explicit: bool,
    data: Vec<u8>,
}

/// Walk an SMF-0 file, resolving running status like a conforming
/// player would.
fn decode(file: &[u8]) -> Vec<DecodedEvent> {
    assert_eq!(&file[0..4], b"MThd");
    assert_eq!(&file[14..18], b"MTrk");
    let length = u32::from_be_bytes([file[18], file[19], file[20], file[21]]) as usize;
    let mut track = &file[22..22 + length];

    let mut events = Vec::new();
    let mut running: Option<u8> = None;
    while !track.is_empty() {
        let (delta, used) = read_vlq(track).expect("delta time");
        track = &track[used..];
        let first = track[0];
        let (status, explicit) = if first & 0x80 != 0 {
            track = &track[1..];
            (first, true)
        } else {
            (running.expect("running status with no prior status"), false)
        };
        let data: Vec<u8> = match status {
            0xFF => {
                let meta_type = track[0];
                let (len, used) = read_vlq(&track[1..]).unwrap();
                let body = &track[1 + used..1 + used + len as usize];
                let mut data = vec![meta_type];
                data.extend_from_slice(body);
                track = &track[1 + used + len as usize..];
                running = None;
                data
            }
            0xF0 => {
                let (len, used) = read_vlq(track).unwrap();
                let body = &track[used..used + len as usize];
                track = &track[used + len as usize..];
                running = None;
                body.to_vec()
            }
            _ => {
                let count = match status >> 4 {
                    0xC | 0xD => 1,
                    _ => 2,
                };
                let body = track[..count].to_vec();
                track = &track[count..];
                running = Some(status);
                body
            }
        };
        events.push(DecodedEvent {
            delta,
            status,
            explicit,
            data,
        });
    }
    events
}

fn write_to_bytes(midi: MidiFile) -> Vec<u8> {
    let mut out = Vec::new();
    midi.write(&mut out).unwrap();
    out
}

#[test]
fn status_bytes_appear_exactly_on_channel_or_type_changes() {
    let mut midi = MidiFile::new(24);
    midi.note_on(0, 60, 100);
    midi.note_on(0, 64, 100); // same type+channel: running
    midi.clock();
    midi.note_on(1, 60, 100); // channel change
    midi.note_off(1, 60, 100); // type change
    midi.note_off(1, 62, 100); // running again
    let events = decode(&write_to_bytes(midi));

    // last event is end-of-track
    assert_eq!(events.last().unwrap().data, [0x2F]);
    let body = &events[..events.len() - 1];
    let explicit: Vec<bool> = body.iter().map(|e| e.explicit).collect();
    assert_eq!(explicit, [true, false, true, true, false]);
    assert_eq!(body[2].delta, 1);
    assert_eq!(body[2].status, 0x91);
    assert_eq!(body[3].status, 0x81);
}

#[test]
fn meta_and_sysex_break_running_status() {
    let mut midi = MidiFile::new(24);
    midi.note_on(0, 60, 100);
    midi.tempo(120.0);
    midi.note_on(0, 62, 100);
    midi.sysex(&[0x7E, 0x7F, 0x09, 0x01]);
    midi.note_on(0, 64, 100);
    let events = decode(&write_to_bytes(midi));
    let body = &events[..events.len() - 1];
    assert!(body.iter().all(|e| e.explicit));
    assert_eq!(body[1].status, 0xFF);
    assert_eq!(body[1].data, [0x51, 0x07, 0xA1, 0x20]); // 500000 µs
    assert_eq!(body[3].status, 0xF0);
    assert_eq!(body[3].data, [0x7E, 0x7F, 0x09, 0x01, 0xF7]);
}

#[test]
fn long_delta_times_round_trip_through_the_file() {
    let mut midi = MidiFile::new(24);
    for _ in 0..300 {
        midi.clock();
    }
    midi.note_on(0, 60, 100);
    let events = decode(&write_to_bytes(midi));
    assert_eq!(events[0].delta, 300);
}

#[test]
fn marker_meta_carries_text() {
    let mut midi = MidiFile::new(24);
    midi.marker("loopStart");
    let events = decode(&write_to_bytes(midi));
    let mut expected = vec![0x06];
    expected.extend_from_slice(b"loopStart");
    assert_eq!(events[0].data, expected);
}

#[test]
fn rpn_pair_collapses_on_repeat_until_kind_changes() {
    let mut midi = MidiFile::new(24);
    midi.rpn_msb(2, 0, 12);
    midi.rpn_msb(2, 0, 2);
    midi.nrpn_msb(2, 136, 64);
    midi.rpn_msb(2, 0, 12);
    let events = decode(&write_to_bytes(midi));
    let controllers: Vec<(u8, u8)> = events[..events.len() - 1]
        .iter()
        .map(|e| (e.data[0], e.data[1]))
        .collect();
    assert_eq!(
        controllers,
        [
            (101, 0),
            (100, 0),
            (6, 12), // first RPN emits the selector
            (6, 2),  // repeat: data only
            (99, 1),
            (98, 8),
            (6, 64), // NRPN reselects
            (101, 0),
            (100, 0),
            (6, 12), // back to RPN: selector again
        ]
    );
}
