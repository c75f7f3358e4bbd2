//! # Channel Implementation
//!
//! A channel is one voice: two operators, or four when OPL3 4-op mode pairs
//! it with the channel three above. This module owns the signal flow between
//! a channel's operators and the mixing of its output into the block buffers.

use crate::FIXEDPT;
use crate::lfo::LfoSample;
use crate::operator::Operator;

/// Part a channel plays in OPL3 4-op mode
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum FourOpRole {
    /// Ordinary 2-op voice
    #[default]
    Single,
    /// First channel of a 4-op pair, owns the frequency and key-on
    Base,
    /// Second channel of a 4-op pair, supplies its operators to the base
    Donor,
}

/// 4-op algorithm, named by the connection bits of the base and donor channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FourOpAlgorithm {
    /// `1 -> 2 -> 3 -> 4`
    FmFm,
    /// `(1 -> 2) + (3 -> 4)`
    FmAm,
    /// `1 + (2 -> 3 -> 4)`
    AmFm,
    /// `1 + (2 -> 3) + 4`
    AmAm,
}

/// How a channel's operators are connected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topology {
    /// Modulator drives the carrier
    TwoOpFm,
    /// Both operators are summed
    TwoOpAm,
    FourOp(FourOpAlgorithm),
}

impl Topology {
    /// Topology from the `0xC0` connection bits
    ///
    /// # Arguments
    /// * `base` - Connection bit of the channel itself
    /// * `donor` - Connection bit of the donor channel when in 4-op mode
    pub fn from_connection(base: bool, donor: Option<bool>) -> Self {
        match (base, donor) {
            (false, None) => Topology::TwoOpFm,
            (true, None) => Topology::TwoOpAm,
            (false, Some(false)) => Topology::FourOp(FourOpAlgorithm::FmFm),
            (false, Some(true)) => Topology::FourOp(FourOpAlgorithm::FmAm),
            (true, Some(false)) => Topology::FourOp(FourOpAlgorithm::AmFm),
            (true, Some(true)) => Topology::FourOp(FourOpAlgorithm::AmAm),
        }
    }

    /// Operator chains summed into the output
    ///
    /// Positions index the channel's operator slots, see
    /// [`Channel::operator_slots`]. Each chain runs serially, every operator
    /// modulating the next. Position 0 always starts a chain and is the only
    /// operator with feedback.
    pub fn chains(self) -> &'static [&'static [usize]] {
        match self {
            Topology::TwoOpFm => &[&[0, 1]],
            Topology::TwoOpAm => &[&[0], &[1]],
            Topology::FourOp(FourOpAlgorithm::FmFm) => &[&[0, 1, 2, 3]],
            Topology::FourOp(FourOpAlgorithm::FmAm) => &[&[0, 1], &[2, 3]],
            Topology::FourOp(FourOpAlgorithm::AmFm) => &[&[0], &[1, 2, 3]],
            Topology::FourOp(FourOpAlgorithm::AmAm) => &[&[0], &[1, 2], &[3]],
        }
    }
}

/// Stereo gains of a channel
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pan {
    pub left: f32,
    pub right: f32,
}

impl Default for Pan {
    fn default() -> Self {
        Self {
            left: 1.0,
            right: 1.0,
        }
    }
}

impl Pan {
    /// Gains clamped to `[0, 1]`
    pub fn new(left: f32, right: f32) -> Self {
        Self {
            left: left.clamp(0.0, 1.0),
            right: right.clamp(0.0, 1.0),
        }
    }

    /// Gains from the OPL3 output enable bits of register `0xC0`
    pub fn from_enable_bits(val: u8) -> Self {
        Self {
            left: if val & 0x10 != 0 { 1.0 } else { 0.0 },
            right: if val & 0x20 != 0 { 1.0 } else { 0.0 },
        }
    }
}

/// One voice of the chip
#[derive(Debug, Clone, Default)]
pub struct Channel {
    index: usize,
    role: FourOpRole,
    pan: Pan,
}

impl Channel {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            ..Default::default()
        }
    }

    pub fn role(&self) -> FourOpRole {
        self.role
    }

    pub(crate) fn set_role(&mut self, role: FourOpRole) {
        self.role = role;
    }

    pub fn pan(&self) -> Pan {
        self.pan
    }

    pub(crate) fn set_pan(&mut self, pan: Pan) {
        self.pan = pan;
    }

    /// Operator indices in signal order
    ///
    /// The first two are the channel's own modulator and carrier, the last two
    /// belong to the channel three above and are only used in 4-op mode.
    pub fn operator_slots(&self) -> [usize; 4] {
        let base = if self.index < 9 {
            self.index
        } else {
            self.index + 9
        };
        [base, base + 9, base + 3, base + 12]
    }

    /// Render one block of this channel and mix it into `mix`
    ///
    /// A chain whose operators are all off when the block starts is skipped.
    pub(crate) fn render(
        &self,
        topology: Topology,
        ops: &mut [Operator],
        lfo: &[LfoSample],
        generator_add: u32,
        mix: &mut Mix,
    ) {
        let slots = self.operator_slots();
        for chain in topology.chains() {
            if chain.iter().all(|&pos| ops[slots[pos]].is_off()) {
                continue;
            }
            for (i, lfo) in lfo.iter().enumerate() {
                let mut modulator = None;
                for &pos in chain.iter() {
                    let op = &mut ops[slots[pos]];
                    let input = match modulator {
                        Some(prev) => prev,
                        None if pos == 0 => op.feedback(),
                        None => 0,
                    };
                    modulator = Some(tick(op, *lfo, input, generator_add) * FIXEDPT as i32);
                }
                if let Some(&last) = chain.last() {
                    mix.add(i, ops[slots[last]].output());
                }
            }
        }
    }
}

/// Advance an operator by one sample and return its output
pub(crate) fn tick(op: &mut Operator, lfo: LfoSample, modulator: i32, generator_add: u32) -> i32 {
    op.advance(op.vibrato_offset(lfo.vibrato), generator_add);
    op.step_envelope();
    op.compute_output(modulator, op.tremolo_gain(lfo.tremolo));
    op.output()
}

/// Block accumulators a channel mixes into
pub(crate) struct Mix<'a> {
    left: &'a mut [i32],
    right: &'a mut [i32],
    pan: Option<Pan>,
    gain: i32,
}

impl<'a> Mix<'a> {
    /// Mono mix into `left` only
    pub fn mono(left: &'a mut [i32], right: &'a mut [i32]) -> Self {
        Self {
            left,
            right,
            pan: None,
            gain: 1,
        }
    }

    /// Stereo mix with per-channel gains
    pub fn stereo(left: &'a mut [i32], right: &'a mut [i32], pan: Pan) -> Self {
        Self {
            left,
            right,
            pan: Some(pan),
            gain: 1,
        }
    }

    /// Scale every sample added from here on, percussion voices mix at double
    /// level
    pub fn with_gain(mut self, gain: i32) -> Self {
        self.gain = gain;
        self
    }

    pub fn add(&mut self, i: usize, value: i32) {
        let value = value * self.gain;
        match self.pan {
            Some(pan) => {
                self.left[i] += (value as f32 * pan.left) as i32;
                self.right[i] += (value as f32 * pan.right) as i32;
            }
            None => self.left[i] += value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::KEY_NORMAL;
    use crate::registers::{ChannelFrequency, OperatorRegisters};
    use crate::{ChipType, Timing};

    fn keyed_operator(timing: &Timing, total_level: u8) -> Operator {
        let regs = OperatorRegisters {
            reg20: 0x21,
            reg40: total_level,
            reg60: 0xf0,
            reg80: 0x0f,
        };
        let mut op = Operator::new();
        op.update_flags(regs);
        op.update_sustain_level(regs.sustain_level());
        op.update_frequency(
            ChannelFrequency {
                fnum: 0x241,
                block: 4,
            },
            regs,
            false,
            timing,
        );
        op.key_on(KEY_NORMAL);
        op
    }

    #[test]
    fn test_topology_from_connection() {
        assert_eq!(Topology::from_connection(false, None), Topology::TwoOpFm);
        assert_eq!(Topology::from_connection(true, None), Topology::TwoOpAm);
        assert_eq!(
            Topology::from_connection(true, Some(false)),
            Topology::FourOp(FourOpAlgorithm::AmFm)
        );
        assert_eq!(
            Topology::from_connection(false, Some(true)),
            Topology::FourOp(FourOpAlgorithm::FmAm)
        );
    }

    #[test]
    fn test_chains_use_each_operator_once() {
        let topologies = [
            (Topology::TwoOpFm, 2),
            (Topology::TwoOpAm, 2),
            (Topology::FourOp(FourOpAlgorithm::FmFm), 4),
            (Topology::FourOp(FourOpAlgorithm::FmAm), 4),
            (Topology::FourOp(FourOpAlgorithm::AmFm), 4),
            (Topology::FourOp(FourOpAlgorithm::AmAm), 4),
        ];
        for (topology, count) in topologies {
            let mut positions: Vec<usize> = topology.chains().iter().flat_map(|c| c.iter().copied()).collect();
            positions.sort_unstable();
            assert_eq!(positions, (0..count).collect::<Vec<_>>());
            assert_eq!(topology.chains()[0][0], 0);
        }
    }

    #[test]
    fn test_operator_slots() {
        assert_eq!(Channel::new(0).operator_slots(), [0, 9, 3, 12]);
        assert_eq!(Channel::new(2).operator_slots(), [2, 11, 5, 14]);
        assert_eq!(Channel::new(9).operator_slots(), [18, 27, 21, 30]);
        assert_eq!(Channel::new(17).operator_slots()[..2], [26, 35]);
    }

    #[test]
    fn test_pan() {
        assert_eq!(Pan::default(), Pan::new(1.0, 1.0));
        assert_eq!(Pan::new(-1.0, 2.0), Pan::new(0.0, 1.0));
        assert_eq!(Pan::from_enable_bits(0x10), Pan::new(1.0, 0.0));
        assert_eq!(Pan::from_enable_bits(0x30), Pan::new(1.0, 1.0));
        assert_eq!(Pan::from_enable_bits(0x00), Pan::new(0.0, 0.0));
    }

    #[test]
    fn test_mix_stereo_pan() {
        let mut left = [0i32; 4];
        let mut right = [0i32; 4];
        let mut mix = Mix::stereo(&mut left, &mut right, Pan::new(1.0, 0.5)).with_gain(2);
        mix.add(1, 100);
        assert_eq!(left, [0, 200, 0, 0]);
        assert_eq!(right, [0, 100, 0, 0]);
    }

    #[test]
    fn test_off_channel_renders_nothing() {
        let timing = Timing::new(44100, ChipType::Opl2);
        let mut ops = vec![Operator::new(); 18];
        let lfo = [LfoSample {
            vibrato: 0,
            tremolo: FIXEDPT as i32,
        }; 64];
        let mut left = [0i32; 64];
        let mut right = [0i32; 64];
        let mut mix = Mix::mono(&mut left, &mut right);
        Channel::new(0).render(Topology::TwoOpFm, &mut ops, &lfo, timing.generator_add, &mut mix);
        assert!(left.iter().all(|&s| s == 0));
    }

    #[test]
    fn test_am_sums_both_operators() {
        let timing = Timing::new(44100, ChipType::Opl2);
        let lfo = [LfoSample {
            vibrato: 0,
            tremolo: FIXEDPT as i32,
        }; 256];

        // carrier alone
        let mut ops = vec![Operator::new(); 18];
        ops[9] = keyed_operator(&timing, 0);
        let mut carrier_only = [0i32; 256];
        let mut right = [0i32; 256];
        Channel::new(0).render(
            Topology::TwoOpAm,
            &mut ops,
            &lfo,
            timing.generator_add,
            &mut Mix::mono(&mut carrier_only, &mut right),
        );

        // both operators at the same settings play in phase and double up
        let mut ops = vec![Operator::new(); 18];
        ops[0] = keyed_operator(&timing, 0);
        ops[9] = keyed_operator(&timing, 0);
        let mut both = [0i32; 256];
        Channel::new(0).render(
            Topology::TwoOpAm,
            &mut ops,
            &lfo,
            timing.generator_add,
            &mut Mix::mono(&mut both, &mut right),
        );

        assert!(carrier_only.iter().any(|&s| s != 0));
        for (a, b) in carrier_only.iter().zip(both.iter()) {
            assert_eq!(*b, a * 2);
        }
    }

    const FRAMES: usize = 512;

    /// Channel 0 operators, keyed at full volume where `keyed` is set
    fn voice(timing: &Timing, keyed: [bool; 4]) -> Vec<Operator> {
        let mut ops = vec![Operator::new(); 18];
        let slots = Channel::new(0).operator_slots();
        for (pos, &on) in keyed.iter().enumerate() {
            if on {
                ops[slots[pos]] = keyed_operator(timing, 0);
            }
        }
        ops
    }

    fn render_voice(timing: &Timing, topology: Topology, ops: &mut [Operator]) -> Vec<i32> {
        let lfo = [LfoSample {
            vibrato: 0,
            tremolo: FIXEDPT as i32,
        }; FRAMES];
        let mut left = vec![0i32; FRAMES];
        let mut right = vec![0i32; FRAMES];
        Channel::new(0).render(
            topology,
            ops,
            &lfo,
            timing.generator_add,
            &mut Mix::mono(&mut left, &mut right),
        );
        left
    }

    fn differing(a: &[i32], b: &[i32]) -> usize {
        a.iter().zip(b.iter()).filter(|(x, y)| x != y).count()
    }

    #[test]
    fn test_fm_modulator_shapes_carrier() {
        let timing = Timing::new(44100, ChipType::Opl2);
        let pure = render_voice(&timing, Topology::TwoOpAm, &mut voice(&timing, [false, true, false, false]));
        assert!(pure.iter().any(|&s| s != 0));

        // a modulator that never sounds leaves the carrier untouched
        let silent = render_voice(&timing, Topology::TwoOpFm, &mut voice(&timing, [false, true, false, false]));
        assert_eq!(silent, pure);

        let fm = render_voice(&timing, Topology::TwoOpFm, &mut voice(&timing, [true, true, false, false]));
        assert!(differing(&fm, &pure) > FRAMES / 2);

        // only the carrier is heard
        let am = render_voice(&timing, Topology::TwoOpAm, &mut voice(&timing, [true, true, false, false]));
        assert_ne!(fm, am);
    }

    #[test]
    fn test_feedback_only_on_first_operator() {
        let timing = Timing::new(44100, ChipType::Opl2);
        let plain = render_voice(&timing, Topology::TwoOpAm, &mut voice(&timing, [true, false, false, false]));
        assert!(plain.iter().any(|&s| s != 0));

        let mut ops = voice(&timing, [true, false, false, false]);
        ops[0].update_feedback(0x0e);
        let fed_back = render_voice(&timing, Topology::TwoOpAm, &mut ops);
        assert!(differing(&fed_back, &plain) > FRAMES / 2);

        // feedback set on the carrier is never applied
        let carrier = render_voice(&timing, Topology::TwoOpAm, &mut voice(&timing, [false, true, false, false]));
        let mut ops = voice(&timing, [false, true, false, false]);
        ops[9].update_feedback(0x0e);
        assert_eq!(render_voice(&timing, Topology::TwoOpAm, &mut ops), carrier);
    }

    #[test]
    fn test_four_op_fm_fm_is_one_chain() {
        let timing = Timing::new(44100, ChipType::Opl3);
        let fm_fm = Topology::FourOp(FourOpAlgorithm::FmFm);
        let all = render_voice(&timing, fm_fm, &mut voice(&timing, [true; 4]));
        assert!(all.iter().any(|&s| s != 0));

        // the last operator is the only carrier
        let no_carrier = render_voice(&timing, fm_fm, &mut voice(&timing, [true, true, true, false]));
        assert!(no_carrier.iter().all(|&s| s == 0));

        // the first operator modulates all the way down the chain
        let tail = render_voice(&timing, fm_fm, &mut voice(&timing, [false, true, true, true]));
        assert!(differing(&all, &tail) > FRAMES / 2);
    }

    #[test]
    fn test_four_op_fm_am_sums_two_chains() {
        let timing = Timing::new(44100, ChipType::Opl3);
        let fm_am = Topology::FourOp(FourOpAlgorithm::FmAm);
        let all = render_voice(&timing, fm_am, &mut voice(&timing, [true; 4]));

        // with the first carrier off only the second chain is heard
        let second = render_voice(&timing, fm_am, &mut voice(&timing, [true, false, true, true]));
        let second_alone = render_voice(&timing, fm_am, &mut voice(&timing, [false, false, true, true]));
        assert!(second.iter().any(|&s| s != 0));
        assert_eq!(second, second_alone);

        let first = render_voice(&timing, fm_am, &mut voice(&timing, [true, true, false, false]));
        for i in 0..FRAMES {
            assert_eq!(all[i], first[i] + second[i]);
        }
    }

    #[test]
    fn test_four_op_am_fm_sums_first_operator_and_chain() {
        let timing = Timing::new(44100, ChipType::Opl3);
        let am_fm = Topology::FourOp(FourOpAlgorithm::AmFm);

        // without the final carrier only the first operator is heard
        let first = render_voice(&timing, am_fm, &mut voice(&timing, [true, true, true, false]));
        let single = render_voice(&timing, Topology::TwoOpAm, &mut voice(&timing, [true, false, false, false]));
        assert!(first.iter().any(|&s| s != 0));
        assert_eq!(first, single);

        let chain = render_voice(&timing, am_fm, &mut voice(&timing, [false, true, true, true]));
        let all = render_voice(&timing, am_fm, &mut voice(&timing, [true; 4]));
        for i in 0..FRAMES {
            assert_eq!(all[i], first[i] + chain[i]);
        }
    }
}
