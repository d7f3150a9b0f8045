//! Timing tables for the sequence interpreter

/// Ticks for each wait/length opcode index at 24 pulses per quarter
/// note. Indices 0..=24 are linear; longer values step through the
/// musically useful subdivisions up to a whole bar.
pub(crate) const LENGTH_TICKS: [i32; 49] = [
    0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, //
    28, 30, 32, 36, 40, 42, 44, 48, 52, 54, 56, 60, 64, 66, 68, 72, 76, 78, 80, 84, 88, 90, 92, 96,
];
