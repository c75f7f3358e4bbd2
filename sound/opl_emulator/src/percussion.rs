//! # Rhythm Mode
//!
//! With `0xBD` bit 5 set, channels 6-8 become five drum voices:
//!
//! - Bass drum: channel 6 as an ordinary 2-op voice
//! - Tom-tom: operator 8 alone
//! - Hi-hat, snare and cymbal: operators 7, 16 and 17, whose phases are built
//!   from the hi-hat and cymbal phase bits plus noise
//!
//! All drum voices mix at double level.

use crate::channel::{Mix, Topology, tick};
use crate::lfo::LfoSample;
use crate::operator::Operator;
use crate::{Channel, FIXEDPT};

/// Key bits of register `0xBD`
pub const BASS_DRUM: u8 = 0x10;
pub const SNARE_DRUM: u8 = 0x08;
pub const TOM_TOM: u8 = 0x04;
pub const CYMBAL: u8 = 0x02;
pub const HI_HAT: u8 = 0x01;

/// Operators keyed by each drum
///
/// The bass drum keys both operators of channel 6.
pub const DRUM_OPERATORS: [(u8, &[usize]); 5] = [
    (BASS_DRUM, &[6, 15]),
    (SNARE_DRUM, &[16]),
    (TOM_TOM, &[8]),
    (CYMBAL, &[17]),
    (HI_HAT, &[7]),
];

const HI_HAT_OP: usize = 7;
const SNARE_OP: usize = 16;
const TOM_TOM_OP: usize = 8;
const CYMBAL_OP: usize = 17;

/// Noise source for the hi-hat and snare
///
/// 23 bit Galois LFSR, one bit per output sample.
#[derive(Debug, Clone)]
pub struct Noise {
    state: u32,
}

impl Default for Noise {
    fn default() -> Self {
        Self { state: 1 }
    }
}

impl Noise {
    pub fn reset(&mut self) {
        self.state = 1;
    }

    pub fn next_bit(&mut self) -> u32 {
        let bit = self.state & 1;
        self.state ^= 0x800302 & 0u32.wrapping_sub(bit);
        self.state >>= 1;
        bit
    }
}

/// Phase of the hi-hat, snare and cymbal for one sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DrumPhases {
    hi_hat: u32,
    snare: u32,
    cymbal: u32,
}

impl DrumPhases {
    /// Derive the drum phases from the hi-hat and cymbal oscillators
    fn new(hi_hat_phase: u32, cymbal_phase: u32, noise: u32) -> Self {
        let c1 = hi_hat_phase;
        let c3 = cymbal_phase;
        let phasebit =
            if (((c1 & 0x88) ^ ((c1 << 5) & 0x80)) | ((c3 ^ (c3 << 2)) & 0x20)) != 0 {
                2
            } else {
                0
            };
        let snare_bit = (c1 >> 8) & 1;

        Self {
            hi_hat: ((phasebit << 8) | (0x34 << (phasebit ^ (noise << 1)))) * FIXEDPT,
            snare: (((1 + snare_bit) ^ noise) << 8) * FIXEDPT,
            cymbal: ((1 + phasebit) << 8) * FIXEDPT,
        }
    }
}

/// Rhythm mode state of the chip
#[derive(Debug, Clone, Default)]
pub struct Percussion {
    noise: Noise,
}

impl Percussion {
    pub fn reset(&mut self) {
        self.noise.reset();
    }

    /// Render one block of all five drums
    ///
    /// # Arguments
    /// * `channels` - Channels 6, 7 and 8, which provide the drum pans
    /// * `bass_drum` - Topology of channel 6
    /// * `stereo` - Mix with channel pans instead of mono
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn render(
        &mut self,
        channels: &[Channel],
        bass_drum: Topology,
        stereo: bool,
        ops: &mut [Operator],
        lfo: &[LfoSample],
        generator_add: u32,
        left: &mut [i32],
        right: &mut [i32],
    ) {
        // bass drum: in AM mode only the carrier sounds
        if bass_drum == Topology::TwoOpAm {
            let carrier = channels[0].operator_slots()[1];
            if !ops[carrier].is_off() {
                let mut mix = drum_mix(&channels[0], stereo, left, right);
                for (i, sample) in lfo.iter().enumerate() {
                    mix.add(i, tick(&mut ops[carrier], *sample, 0, generator_add));
                }
            }
        } else {
            channels[0].render(
                bass_drum,
                ops,
                lfo,
                generator_add,
                &mut drum_mix(&channels[0], stereo, left, right),
            );
        }

        // tom-tom
        if !ops[TOM_TOM_OP].is_off() {
            let mut mix = drum_mix(&channels[2], stereo, left, right);
            for (i, sample) in lfo.iter().enumerate() {
                mix.add(i, tick(&mut ops[TOM_TOM_OP], *sample, 0, generator_add));
            }
        }

        // hi-hat, snare and cymbal share phase bits
        if [HI_HAT_OP, SNARE_OP, CYMBAL_OP]
            .iter()
            .any(|&op| !ops[op].is_off())
        {
            let mut mix = drum_mix(&channels[1], stereo, left, right);
            for (i, sample) in lfo.iter().enumerate() {
                let phases = DrumPhases::new(
                    ops[HI_HAT_OP].phase(),
                    ops[CYMBAL_OP].phase(),
                    self.noise.next_bit(),
                );

                let mut chanval = 0;
                for (op, wfpos) in [
                    (HI_HAT_OP, phases.hi_hat),
                    (SNARE_OP, phases.snare),
                    (CYMBAL_OP, phases.cymbal),
                ] {
                    let op = &mut ops[op];
                    op.advance_with_phase(wfpos, op.vibrato_offset(sample.vibrato), generator_add);
                    op.step_envelope();
                    op.compute_output(0, op.tremolo_gain(sample.tremolo));
                    chanval += op.output();
                }
                mix.add(i, chanval);
            }
        }
    }
}

fn drum_mix<'a>(
    channel: &Channel,
    stereo: bool,
    left: &'a mut [i32],
    right: &'a mut [i32],
) -> Mix<'a> {
    let mix = if stereo {
        Mix::stereo(left, right, channel.pan())
    } else {
        Mix::mono(left, right)
    };
    mix.with_gain(2)
}
