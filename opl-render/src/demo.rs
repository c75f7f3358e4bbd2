//! Built-in arpeggio rendered when no script is given.

use opl_emulator::OPLRATE;

use crate::config::{RegWrite, RenderScript, ScriptEvent};

/// Seconds each note of the arpeggio is held
const NOTE_LENGTH: f32 = 0.25;

/// C4, E4, G4, C5
const ARPEGGIO: [f64; 4] = [261.63, 329.63, 392.0, 523.25];

/// A plucked 2-op voice for channel 0: (register, value)
const PATCH: [(u32, u8); 9] = [
    (0x01, 0x20),
    // modulator: sustain, mult 1 / level / attack+decay / sustain+release
    (0x20, 0x21),
    (0x40, 0x1a),
    (0x60, 0xf4),
    (0x80, 0x56),
    // carrier
    (0x23, 0x21),
    (0x43, 0x00),
    (0x63, 0xf3),
    (0x83, 0x56),
];

/// Feedback 7, FM connection, both OPL3 outputs enabled
const FEEDBACK_CONNECTION: u8 = 0x3e;

/// F-number and block for a note frequency
///
/// Picks the lowest block whose F-number fits in 10 bits, which keeps the
/// most pitch resolution.
pub fn note_registers(freq: f64) -> (u16, u8) {
    for block in 0..8u8 {
        let fnum = (freq * f64::from(1u32 << (20 - block)) / OPLRATE).round();
        if fnum < 1024.0 {
            return (fnum.max(0.0) as u16, block);
        }
    }
    (1023, 7)
}

fn key_writes(freq: f64, key_on: bool) -> [RegWrite; 2] {
    let (fnum, block) = note_registers(freq);
    let key = if key_on { 0x20 } else { 0x00 };
    [
        RegWrite {
            reg: 0xa0,
            val: (fnum & 0xff) as u8,
        },
        RegWrite {
            reg: 0xb0,
            val: key | (block << 2) | (fnum >> 8) as u8,
        },
    ]
}

pub fn script() -> RenderScript {
    let mut setup: Vec<RegWrite> = PATCH
        .iter()
        .map(|&(reg, val)| RegWrite { reg, val })
        .collect();
    setup.push(RegWrite {
        reg: 0xc0,
        val: FEEDBACK_CONNECTION,
    });

    let mut events = Vec::with_capacity(ARPEGGIO.len() + 1);
    let mut previous = None;
    for (i, &freq) in ARPEGGIO.iter().enumerate() {
        let mut writes = if i == 0 { setup.clone() } else { Vec::new() };
        if let Some(prev) = previous {
            writes.extend(key_writes(prev, false));
        }
        writes.extend(key_writes(freq, true));
        events.push(ScriptEvent {
            at: i as f32 * NOTE_LENGTH,
            writes,
            pans: Vec::new(),
        });
        previous = Some(freq);
    }
    if let Some(prev) = previous {
        events.push(ScriptEvent {
            at: ARPEGGIO.len() as f32 * NOTE_LENGTH,
            writes: key_writes(prev, false).to_vec(),
            pans: Vec::new(),
        });
    }

    RenderScript {
        events,
        ..Default::default()
    }
}
