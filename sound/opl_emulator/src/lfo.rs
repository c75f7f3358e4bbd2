//! Chip-wide vibrato and tremolo oscillators.

use crate::tables::{TREM_FREQ, TREMTAB_SIZE, VIBRATO_TABLE, VIBTAB_SIZE, tremolo_table};
use crate::{FIXEDPT_LFO, OPLRATE};

const VIB_WRAP: u32 = VIBTAB_SIZE as u32 * FIXEDPT_LFO;
const TREM_WRAP: u32 = TREMTAB_SIZE as u32 * FIXEDPT_LFO;

/// LFO values for one output sample
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LfoSample {
    /// Vibrato depth before scaling by the operator's frequency
    pub vibrato: i32,
    /// Tremolo gain in 16.16 fixed point
    pub tremolo: i32,
}

/// Both LFO positions in 8.24 fixed point, advanced once per output sample
#[derive(Debug, Clone)]
pub struct Lfo {
    vib_pos: u32,
    vib_add: u32,
    trem_pos: u32,
    trem_add: u32,
}

impl Lfo {
    pub fn new(sample_rate: u32) -> Self {
        let rate = f64::from(sample_rate.max(1));
        Self {
            vib_pos: 0,
            vib_add: (f64::from(VIBTAB_SIZE as u32 * FIXEDPT_LFO / 8192) * OPLRATE / rate) as u32,
            trem_pos: 0,
            trem_add: (TREMTAB_SIZE as f64 * TREM_FREQ * f64::from(FIXEDPT_LFO) / rate) as u32,
        }
    }

    pub fn reset(&mut self) {
        self.vib_pos = 0;
        self.trem_pos = 0;
    }

    /// Advance both oscillators by one sample
    ///
    /// # Arguments
    /// * `deep_vibrato` - `0xBD` bit 6, 14 cent instead of 7 cent depth
    /// * `deep_tremolo` - `0xBD` bit 7, 4.8 dB instead of 1.2 dB depth
    pub fn tick(&mut self, deep_vibrato: bool, deep_tremolo: bool) -> LfoSample {
        self.vib_pos = self.vib_pos.wrapping_add(self.vib_add);
        while self.vib_pos >= VIB_WRAP {
            self.vib_pos -= VIB_WRAP;
        }
        self.trem_pos = self.trem_pos.wrapping_add(self.trem_add);
        while self.trem_pos >= TREM_WRAP {
            self.trem_pos -= TREM_WRAP;
        }

        let vib_shift = if deep_vibrato { 0 } else { 1 };
        let trem_index = (self.trem_pos / FIXEDPT_LFO) as usize;
        let trem_index = if deep_tremolo {
            trem_index
        } else {
            trem_index + TREMTAB_SIZE
        };

        LfoSample {
            vibrato: VIBRATO_TABLE[(self.vib_pos / FIXEDPT_LFO) as usize] >> vib_shift,
            tremolo: tremolo_table()[trem_index],
        }
    }
}
