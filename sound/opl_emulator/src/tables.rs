//! # Lookup Tables
//!
//! Waveform, key scale level and tremolo tables. None of these depend on the
//! sample rate, so they are built once per process with `OnceLock` and shared
//! read-only by every chip instance.

use std::f64::consts::PI;
use std::sync::OnceLock;

use crate::{FIXEDPT, WAVEPREC};

/// Entries in the combined waveform table
pub const WAVE_TABLE_LEN: usize = WAVEPREC * 3;
/// Entries in one vibrato period
pub const VIBTAB_SIZE: usize = 8;
/// Entries in one tremolo period
pub const TREMTAB_SIZE: usize = 53;
/// Tremolo rate in Hz
pub const TREM_FREQ: f64 = 3.7;

/// Start of each waveform inside the waveform table
pub const WAVE_OFFSET: [usize; 8] = [
    WAVEPREC,
    WAVEPREC >> 1,
    WAVEPREC,
    (WAVEPREC * 3) >> 2,
    0,
    0,
    (WAVEPREC * 5) >> 2,
    WAVEPREC << 1,
];

/// Index mask applied to the phase of each waveform
pub const WAVE_MASK: [u32; 8] = [
    WAVEPREC as u32 - 1,
    WAVEPREC as u32 - 1,
    (WAVEPREC as u32 >> 1) - 1,
    (WAVEPREC as u32 >> 1) - 1,
    WAVEPREC as u32 - 1,
    ((WAVEPREC as u32 * 3) >> 2) - 1,
    WAVEPREC as u32 >> 1,
    WAVEPREC as u32 - 1,
];

/// Phase (in table entries) a waveform restarts from on key-on
pub const WAVE_START: [u32; 8] = [
    0,
    WAVEPREC as u32 >> 1,
    0,
    WAVEPREC as u32 >> 2,
    0,
    0,
    0,
    WAVEPREC as u32 >> 3,
];

/// Attenuation per octave for each KSL register value, in 0.75 dB units
pub const KSL_MUL: [f64; 4] = [0.0, 0.5, 0.25, 1.0];

/// Frequency multipliers selected by the MULT register field
pub const FREQ_MUL_TABLE: [f64; 16] = [
    0.5, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0, 10.0, 12.0, 12.0, 15.0, 15.0,
];

/// Attack time scaling for the four fractional rate steps
pub const ATTACK_CONST: [f64; 4] = [1.0 / 2.82624, 1.0 / 2.25280, 1.0 / 1.88416, 1.0 / 1.59744];

/// Decay and release time scaling for the four fractional rate steps
pub const DECREL_CONST: [f64; 4] = [
    1.0 / 39.28064,
    1.0 / 31.41608,
    1.0 / 26.17344,
    1.0 / 22.44608,
];

/// Which of eight envelope steps latch a new attack amplitude
pub const STEP_SKIP_MASK: [u8; 5] = [0xff, 0xfe, 0xee, 0xba, 0xaa];

/// One vibrato period, in 1/8ths of a cent step
pub const VIBRATO_TABLE: [i32; VIBTAB_SIZE] = [8, 4, 0, -4, -8, -4, 0, 4];

static WAVE_TABLE: OnceLock<[i16; WAVE_TABLE_LEN]> = OnceLock::new();

static KSL_TABLE: OnceLock<[[u8; 16]; 8]> = OnceLock::new();

/// Deep tremolo in the first half, shallow in the second
static TREMOLO_TABLE: OnceLock<[i32; TREMTAB_SIZE * 2]> = OnceLock::new();

/// Initialize all lookup tables
///
/// Called by `Chip::new`, safe to call any number of times from any thread.
pub fn init_tables() {
    wave_table();
    ksl_table();
    tremolo_table();
}

/// The shared waveform table
///
/// Full sine at `WAVEPREC`, a compressed double-speed sine at the start for
/// the OPL3 alternating sine, and the square/sawtooth derived ramps at the
/// end.
pub fn wave_table() -> &'static [i16; WAVE_TABLE_LEN] {
    WAVE_TABLE.get_or_init(|| {
        let mut table = [0i16; WAVE_TABLE_LEN];
        let step = 2.0 * PI / WAVEPREC as f64;

        for i in 0..(WAVEPREC >> 1) {
            table[(i << 1) + WAVEPREC] = (16384.0 * ((i << 1) as f64 * step).sin()) as i16;
            table[(i << 1) + 1 + WAVEPREC] =
                (16384.0 * (((i << 1) + 1) as f64 * step).sin()) as i16;
            table[i] = table[(i << 1) + WAVEPREC];
        }
        for i in 0..(WAVEPREC >> 3) {
            table[i + (WAVEPREC << 1)] = table[i + (WAVEPREC >> 3)] - 16384;
            table[i + ((WAVEPREC * 17) >> 3)] = table[i + (WAVEPREC >> 2)] + 16384;
        }

        table
    })
}

/// Key scale level attenuation indexed by `[block][fnum >> 6]`
pub fn ksl_table() -> &'static [[u8; 16]; 8] {
    KSL_TABLE.get_or_init(|| {
        let mut table = [[0u8; 16]; 8];
        let top = &mut table[7];
        let base = [0u8, 24, 32, 37, 40, 43, 45, 47, 48];
        top[..base.len()].copy_from_slice(&base);
        for (i, val) in top.iter_mut().enumerate().skip(base.len()) {
            *val = (i + 41) as u8;
        }

        for oct in (0..7).rev() {
            for i in 0..16 {
                table[oct][i] = table[oct + 1][i].saturating_sub(8);
            }
        }

        table
    })
}

/// Tremolo gain in 16.16 fixed point, indexed by LFO position
pub fn tremolo_table() -> &'static [i32; TREMTAB_SIZE * 2] {
    TREMOLO_TABLE.get_or_init(|| {
        let mut steps = [0i32; TREMTAB_SIZE];
        for (i, step) in steps.iter_mut().enumerate() {
            let i = i as i32;
            *step = match i {
                0..14 => i - 13,
                14..41 => -i + 14,
                _ => i - 40 - 26,
            };
        }

        let mut table = [0i32; TREMTAB_SIZE * 2];
        for (i, &step) in steps.iter().enumerate() {
            // 4.8 dB peak to peak
            let deep = f64::from(step) * 4.8 / 26.0 / 6.0;
            // 1.2 dB peak to peak
            let shallow = f64::from(step / 4) * 1.2 / 6.0 / 6.0;
            table[i] = (2f64.powf(deep) * f64::from(FIXEDPT)) as i32;
            table[TREMTAB_SIZE + i] = (2f64.powf(shallow) * f64::from(FIXEDPT)) as i32;
        }

        table
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tables_initialization() {
        init_tables();

        assert!(WAVE_TABLE.get().is_some());
        assert!(KSL_TABLE.get().is_some());
        assert!(TREMOLO_TABLE.get().is_some());
    }

    #[test]
    fn test_wave_table_sine() {
        let wave = wave_table();
        assert_eq!(wave[WAVEPREC], 0);
        // quarter period peaks at full scale
        assert_eq!(wave[WAVEPREC + WAVEPREC / 4], 16384);
        assert_eq!(wave[WAVEPREC + WAVEPREC * 3 / 4], -16384);
        // double speed sine reaches its peak in half the entries
        assert_eq!(wave[WAVEPREC / 8], 16384);
    }

    #[test]
    fn test_wave_selection_stays_in_table() {
        for sel in 0..8 {
            let last = WAVE_OFFSET[sel] + WAVE_MASK[sel] as usize;
            assert!(last < WAVE_TABLE_LEN, "waveform {sel} overruns the table");
        }
    }

    #[test]
    fn test_ksl_table() {
        let ksl = ksl_table();
        assert_eq!(ksl[7][15], 56);
        assert_eq!(ksl[7][8], 48);
        assert_eq!(ksl[6][8], 40);
        // low octaves floor at zero
        assert_eq!(ksl[0][1], 0);
        for oct in 0..8 {
            for i in 1..16 {
                assert!(ksl[oct][i] >= ksl[oct][i - 1]);
            }
        }
    }

    #[test]
    fn test_tremolo_table() {
        let trem = tremolo_table();
        // unity gain at the centre of the ramp
        assert_eq!(trem[13], FIXEDPT as i32);
        assert_eq!(trem[14], FIXEDPT as i32);
        // never amplifies
        assert!(trem.iter().all(|&t| t <= FIXEDPT as i32 && t > 0));
        // deep tremolo dips further than shallow
        let deep_min = trem[..TREMTAB_SIZE].iter().min().copied().unwrap_or_default();
        let shallow_min = trem[TREMTAB_SIZE..].iter().min().copied().unwrap_or_default();
        assert!(deep_min < shallow_min);
    }
}
