//! # Operator Implementation
//!
//! An operator is one oscillator of the chip: a 16.16 fixed point phase
//! accumulator reading the shared waveform table, scaled by a floating point
//! envelope. Operators are combined into voices by [`crate::channel`].
//!
//! Envelope progression is driven by standardized steps at the chip's native
//! rate. Each output sample adds `generator_add` to the operator's generator
//! position and every whole step it crosses is one tick of the envelope state
//! machine, so envelope timing is independent of the output sample rate.

use crate::registers::{ChannelFrequency, OperatorRegisters};
use crate::tables::{
    ATTACK_CONST, DECREL_CONST, KSL_MUL, STEP_SKIP_MASK, WAVE_MASK, WAVE_OFFSET, WAVE_START,
    ksl_table, wave_table,
};
use crate::{FIXEDPT, Timing};

/// Key-on source for register `0xB0` writes
pub const KEY_NORMAL: u8 = 0x01;
/// Key-on source for percussion triggers in register `0xBD`
pub const KEY_PERCUSSION: u8 = 0x02;

/// Amplitude at which a releasing envelope is considered silent
pub const SILENCE: f64 = 0.000_000_01;

/// Envelope generator state of an operator
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeStage {
    Attack,
    Decay,
    Release,
    /// Holding at the sustain level until key-off
    Sustain,
    /// Sustain bit clear, decaying at the release rate while still keyed
    SustainNoKeep,
    #[default]
    Off,
}

/// A single FM operator
#[derive(Debug, Clone)]
pub struct Operator {
    /// Current output
    cval: i32,
    /// Output of the previous sample, for feedback
    lastcval: i32,
    /// Phase accumulator, 16.16 fixed point table entries
    tcount: u32,
    /// Phase used for the current sample
    wfpos: u32,
    /// Phase increment per sample
    tinc: u32,
    /// Envelope amplitude in `[0, 1]`
    amp: f64,
    /// Amplitude applied to the output, latched on envelope steps
    step_amp: f64,
    /// Total level and key scale attenuation as a linear gain
    vol: f64,
    sustain_level: f64,
    /// Feedback scale, zero disables feedback
    mfbi: i32,
    /// Attack polynomial coefficients
    attack: [f64; 4],
    decay_mul: f64,
    release_mul: f64,
    stage: EnvelopeStage,
    /// Key scale rate offset
    toff: u32,
    /// Top three F-number bits, scales vibrato depth
    freq_high: i32,
    wave_offset: usize,
    wave_mask: u32,
    wave_start: u32,
    /// Bitmask of `KEY_NORMAL` and `KEY_PERCUSSION`
    key_on: u8,
    sus_keep: bool,
    vibrato: bool,
    tremolo: bool,
    generator_pos: u32,
    env_step: u32,
    env_step_a: u32,
    env_step_d: u32,
    env_step_r: u32,
    step_skip_pos_a: u8,
    env_step_skip_a: u8,
}

impl Default for Operator {
    fn default() -> Self {
        Self {
            cval: 0,
            lastcval: 0,
            tcount: 0,
            wfpos: 0,
            tinc: 0,
            amp: 0.0,
            step_amp: 0.0,
            vol: 0.0,
            sustain_level: 1.0,
            mfbi: 0,
            attack: [0.0, 1.0, 0.0, 0.0],
            decay_mul: 1.0,
            release_mul: 1.0,
            stage: EnvelopeStage::Off,
            toff: 0,
            freq_high: 0,
            wave_offset: WAVE_OFFSET[0],
            wave_mask: WAVE_MASK[0],
            wave_start: WAVE_START[0],
            key_on: 0,
            sus_keep: false,
            vibrato: false,
            tremolo: false,
            generator_pos: 0,
            env_step: 0,
            env_step_a: 0,
            env_step_d: 0,
            env_step_r: 0,
            step_skip_pos_a: 0,
            env_step_skip_a: 0,
        }
    }
}

/// `(1 << (12 - rate)) - 1`, the envelope step mask for an effective rate
fn step_mask(step_skip: u32) -> u32 {
    let steps = step_skip >> 2;
    (1 << if steps <= 12 { 12 - steps } else { 0 }) - 1
}

impl Operator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(&self) -> EnvelopeStage {
        self.stage
    }

    /// Envelope amplitude in `[0, 1]`
    pub fn amplitude(&self) -> f64 {
        self.amp
    }

    /// Phase increment per output sample in 16.16 fixed point
    pub fn phase_increment(&self) -> u32 {
        self.tinc
    }

    /// Output value of the last rendered sample
    pub fn output(&self) -> i32 {
        self.cval
    }

    /// Active key-on sources
    pub fn key_sources(&self) -> u8 {
        self.key_on
    }

    pub fn is_off(&self) -> bool {
        self.stage == EnvelopeStage::Off
    }

    /// Waveform table index read for the current phase and a modulation input
    ///
    /// Always inside the waveform table regardless of the inputs.
    pub fn wave_index(&self, modulator: i32) -> usize {
        let pos = self.wfpos.wrapping_add(modulator as u32) >> 16;
        self.wave_offset + (pos & self.wave_mask) as usize
    }

    /// Recalculate everything derived from the channel frequency
    ///
    /// Updates the key scale rate offset, phase increment and output volume,
    /// then the attack, decay and release rates that depend on them.
    ///
    /// # Arguments
    /// * `freq` - F-number and block of the owning channel
    /// * `regs` - This operator's `0x20`-`0x80` register values
    /// * `note_sel` - Register `0x08` bit 6
    /// * `timing` - Sample rate derived constants of the chip
    pub fn update_frequency(
        &mut self,
        freq: ChannelFrequency,
        regs: OperatorRegisters,
        note_sel: bool,
        timing: &Timing,
    ) {
        let frn = freq.fnum;
        let oct = freq.block;

        self.freq_high = ((frn >> 7) & 7) as i32;

        let ns = u32::from(note_sel);
        self.toff = ((frn >> 9) & (ns ^ 1)) | ((frn >> 8) & ns);
        self.toff += oct << 1;
        if !regs.key_scale_rate() {
            self.toff >>= 2;
        }

        self.tinc = (f64::from(frn << oct) * timing.freq_mul[regs.multiplier()]) as u32;

        let ksl = ksl_table()[oct as usize][(frn >> 6) as usize];
        let attenuation =
            f64::from(regs.total_level()) + KSL_MUL[regs.key_scale_level()] * f64::from(ksl);
        self.vol = 2f64.powf(attenuation * -0.125 - 14.0);

        self.update_attack_rate(regs.attack_rate(), timing);
        self.update_decay_rate(regs.decay_rate(), timing);
        self.update_release_rate(regs.release_rate(), timing);
    }

    pub fn update_attack_rate(&mut self, rate: u32, timing: &Timing) {
        if rate == 0 {
            self.attack = [0.0, 1.0, 0.0, 0.0];
            self.env_step_a = 0;
            self.env_step_skip_a = 0;
            return;
        }

        let f = 2f64.powf(f64::from(rate) + f64::from(self.toff >> 2) - 1.0)
            * ATTACK_CONST[(self.toff & 3) as usize]
            * timing.recip_rate;
        self.attack = [0.0377 * f, 10.73 * f + 1.0, -17.57 * f, 7.42 * f];

        let step_skip = rate * 4 + self.toff;
        self.env_step_a = step_mask(step_skip);

        let step_num = if step_skip <= 48 { 4 - (step_skip & 3) } else { 0 };
        self.env_step_skip_a = STEP_SKIP_MASK[step_num as usize];

        if step_skip >= timing.instant_attack() {
            self.attack = [2.0, 0.0, 0.0, 0.0];
        }
    }

    pub fn update_decay_rate(&mut self, rate: u32, timing: &Timing) {
        (self.decay_mul, self.env_step_d) = self.decrel_coefficients(rate, timing);
    }

    pub fn update_release_rate(&mut self, rate: u32, timing: &Timing) {
        (self.release_mul, self.env_step_r) = self.decrel_coefficients(rate, timing);
    }

    /// Per-sample multiplier and step mask shared by decay and release
    fn decrel_coefficients(&self, rate: u32, timing: &Timing) -> (f64, u32) {
        if rate == 0 {
            return (1.0, 0);
        }
        let f = -7.4493 * DECREL_CONST[(self.toff & 3) as usize] * timing.recip_rate;
        let mul = 2f64.powf(f * 2f64.powf(f64::from(rate + (self.toff >> 2))));
        (mul, step_mask(rate * 4 + self.toff))
    }

    /// Sustain level from its 4 bit register field, 3 dB per step
    pub fn update_sustain_level(&mut self, level: u32) {
        self.sustain_level = if level < 15 {
            2f64.powf(f64::from(level) * -0.5)
        } else {
            0.0
        };
    }

    /// Update the `0x20` register flags
    pub fn update_flags(&mut self, regs: OperatorRegisters) {
        self.tremolo = regs.tremolo();
        self.vibrato = regs.vibrato();
        self.set_keep_sustain(regs.sustain());
    }

    /// Switch between holding and releasing once the sustain level is reached
    fn set_keep_sustain(&mut self, keep: bool) {
        self.sus_keep = keep;
        self.stage = match (self.stage, keep) {
            (EnvelopeStage::Sustain, false) => EnvelopeStage::SustainNoKeep,
            (EnvelopeStage::SustainNoKeep, true) => EnvelopeStage::Sustain,
            (stage, _) => stage,
        };
    }

    /// Feedback scale from the `0xC0` FB field (bits 1-3)
    pub fn update_feedback(&mut self, fb: u8) {
        let fb = fb & 14;
        self.mfbi = if fb != 0 {
            2f64.powf(f64::from((fb >> 1) + 8)) as i32
        } else {
            0
        };
    }

    pub fn update_waveform(&mut self, sel: u8) {
        let sel = (sel & 7) as usize;
        self.wave_offset = WAVE_OFFSET[sel];
        self.wave_mask = WAVE_MASK[sel];
        self.wave_start = WAVE_START[sel];
    }

    /// Add a key-on source
    ///
    /// The first source restarts the phase and the attack. The amplitude is
    /// left where it is so a retrigger does not click.
    pub fn key_on(&mut self, source: u8) {
        if self.key_on == 0 {
            self.tcount = self.wave_start * FIXEDPT;
            self.stage = EnvelopeStage::Attack;
        }
        self.key_on |= source;
    }

    /// Remove a key-on source, releasing once none remain
    pub fn key_off(&mut self, source: u8) {
        if self.key_on == 0 {
            return;
        }
        self.key_on &= !source;
        if self.key_on == 0 && self.stage != EnvelopeStage::Off {
            self.stage = EnvelopeStage::Release;
        }
    }

    /// Vibrato offset of this operator for the current LFO value
    pub fn vibrato_offset(&self, lfo_vibrato: i32) -> i32 {
        if self.vibrato {
            (lfo_vibrato * self.freq_high / 8) * FIXEDPT as i32 * 70 / 50000
        } else {
            0
        }
    }

    /// Tremolo gain of this operator for the current LFO value
    pub fn tremolo_gain(&self, lfo_tremolo: i32) -> i32 {
        if self.tremolo {
            lfo_tremolo
        } else {
            FIXEDPT as i32
        }
    }

    /// Self-modulation input from the last two outputs
    pub fn feedback(&self) -> i32 {
        (self.lastcval + self.cval) * self.mfbi / 2
    }

    /// Phase position in whole table entries
    pub(crate) fn phase(&self) -> u32 {
        self.tcount >> 16
    }

    /// Latch the current phase for output and advance the accumulators
    pub fn advance(&mut self, vibrato: i32, generator_add: u32) {
        self.wfpos = self.tcount;
        self.advance_phase(vibrato, generator_add);
    }

    /// Advance with an externally generated output phase
    ///
    /// Used by the hi-hat, snare and cymbal, whose phase is derived from
    /// other operators and noise.
    pub fn advance_with_phase(&mut self, wfpos: u32, vibrato: i32, generator_add: u32) {
        self.wfpos = wfpos;
        self.advance_phase(vibrato, generator_add);
    }

    fn advance_phase(&mut self, vibrato: i32, generator_add: u32) {
        let vib = i64::from(self.tinc) * i64::from(vibrato) / i64::from(FIXEDPT);
        self.tcount = self.tcount.wrapping_add(self.tinc).wrapping_add(vib as u32);
        self.generator_pos = self.generator_pos.wrapping_add(generator_add);
    }

    /// Run the envelope over the steps accumulated by `advance`
    pub fn step_envelope(&mut self) {
        let steps = self.generator_pos / FIXEDPT;
        self.generator_pos -= steps * FIXEDPT;

        match self.stage {
            EnvelopeStage::Attack => self.envelope_attack(steps),
            EnvelopeStage::Decay => self.envelope_decay(steps),
            EnvelopeStage::Release | EnvelopeStage::SustainNoKeep => self.envelope_release(steps),
            EnvelopeStage::Sustain | EnvelopeStage::Off => {
                self.env_step = self.env_step.wrapping_add(steps);
            }
        }
    }

    fn envelope_attack(&mut self, steps: u32) {
        let [a0, a1, a2, a3] = self.attack;
        self.amp = (((a3 * self.amp + a2) * self.amp + a1) * self.amp + a0).min(1.0);

        for _ in 0..steps {
            self.env_step = self.env_step.wrapping_add(1);
            if self.env_step & self.env_step_a != 0 {
                continue;
            }
            if self.amp >= 1.0 {
                self.amp = 1.0;
                self.step_amp = 1.0;
                self.stage = EnvelopeStage::Decay;
            }
            self.step_skip_pos_a <<= 1;
            if self.step_skip_pos_a == 0 {
                self.step_skip_pos_a = 1;
            }
            if self.step_skip_pos_a & self.env_step_skip_a != 0 {
                self.step_amp = self.amp;
            }
        }
    }

    fn envelope_decay(&mut self, steps: u32) {
        if self.amp > self.sustain_level {
            self.amp *= self.decay_mul;
        }

        for _ in 0..steps {
            self.env_step = self.env_step.wrapping_add(1);
            if self.env_step & self.env_step_d != 0 {
                continue;
            }
            if self.amp <= self.sustain_level {
                if self.sus_keep {
                    self.stage = EnvelopeStage::Sustain;
                    self.amp = self.sustain_level;
                } else {
                    self.stage = EnvelopeStage::SustainNoKeep;
                }
            }
            self.step_amp = self.amp;
        }
    }

    fn envelope_release(&mut self, steps: u32) {
        if self.amp > SILENCE {
            self.amp *= self.release_mul;
        }

        for _ in 0..steps {
            self.env_step = self.env_step.wrapping_add(1);
            if self.env_step & self.env_step_r != 0 {
                continue;
            }
            if self.amp <= SILENCE {
                self.amp = 0.0;
                self.stage = EnvelopeStage::Off;
            }
            self.step_amp = self.amp;
        }
    }

    /// Compute this sample's output
    ///
    /// # Arguments
    /// * `modulator` - Phase modulation in 16.16 fixed point table entries
    /// * `tremolo` - Gain in 16.16 fixed point
    pub fn compute_output(&mut self, modulator: i32, tremolo: i32) {
        if self.stage == EnvelopeStage::Off {
            return;
        }
        self.lastcval = self.cval;
        let sample = f64::from(wave_table()[self.wave_index(modulator)]);
        self.cval = (self.step_amp * self.vol * sample * f64::from(tremolo) / 16.0) as i32;
    }
}
