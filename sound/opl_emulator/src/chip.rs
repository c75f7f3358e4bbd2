//! # Chip Implementation
//!
//! The chip owns the register bank, every operator and channel, the LFOs and
//! the rhythm mode noise source. Register writes are latched, decoded and
//! forwarded to the operators they affect; rendering runs the channels in
//! blocks of up to [`BLOCKBUF_SIZE`] samples.

use log::{debug, trace, warn};

use crate::channel::{Mix, Pan};
use crate::lfo::{Lfo, LfoSample};
use crate::operator::{KEY_NORMAL, KEY_PERCUSSION};
use crate::percussion::{DRUM_OPERATORS, Percussion};
use crate::registers::{
    ChannelFrequency, OperatorGroup, OperatorRegisters, Register, Slot, channel_register,
};
use crate::{
    BLOCKBUF_SIZE, Channel, ChipConfig, ChipType, FourOpRole, MAX_CHANNELS, MAX_OPERATORS,
    Operator, Timing, Topology, init_tables,
};

/// 4-op enable bits of register `0x104` and the base channel each pairs
const FOUR_OP_PAIRS: [(u8, usize); 6] = [
    (0x01, 0),
    (0x02, 1),
    (0x04, 2),
    (0x08, 9),
    (0x10, 10),
    (0x20, 11),
];

/// An emulated OPL2 or OPL3
#[derive(Debug, Clone)]
pub struct Chip {
    config: ChipConfig,
    timing: Timing,
    regs: [u8; 0x200],
    ops: [Operator; MAX_OPERATORS],
    channels: [Channel; MAX_CHANNELS],
    lfo: Lfo,
    percussion: Percussion,
    /// Register index latched by `write_port`
    index: u32,
}

impl Chip {
    /// Creates a new chip in its reset state
    ///
    /// # Arguments
    /// * `config` - Chip variant, output sample rate and panning mode. A
    ///   sample rate of 0 is treated as 1 Hz.
    pub fn new(mut config: ChipConfig) -> Self {
        init_tables();
        if config.sample_rate == 0 {
            warn!("Sample rate of 0 requested, clamping to 1 Hz");
            config.sample_rate = 1;
        }
        debug!(
            "Creating {:?} emulator at {} Hz (full pan: {})",
            config.chip_type, config.sample_rate, config.full_pan
        );

        let mut chip = Self {
            config,
            timing: Timing::new(config.sample_rate, config.chip_type),
            regs: [0; 0x200],
            ops: std::array::from_fn(|_| Operator::new()),
            channels: std::array::from_fn(Channel::new),
            lfo: Lfo::new(config.sample_rate),
            percussion: Percussion::default(),
            index: 0,
        };
        chip.reset();
        chip
    }

    /// Return every register, operator and channel to power-on state
    ///
    /// The OPL3 comes up with OPL3 mode (`0x105` bit 0) already enabled.
    pub fn reset(&mut self) {
        debug!("Resetting {:?}", self.config.chip_type);
        self.regs = [0; 0x200];
        self.ops = std::array::from_fn(|_| Operator::new());
        self.channels = std::array::from_fn(Channel::new);
        self.lfo.reset();
        self.percussion.reset();
        self.index = 0;
        if self.config.chip_type == ChipType::Opl3 {
            self.regs[0x105] = 0x01;
        }
    }

    pub fn config(&self) -> &ChipConfig {
        &self.config
    }

    /// Interleaved samples per frame written by `update` and `update_s`
    pub fn output_channels(&self) -> usize {
        self.config.chip_type.output_channels()
    }

    /// Latched value of a register, 0 outside the register bank
    pub fn register(&self, index: usize) -> u8 {
        if index < self.config.chip_type.register_bank_len() {
            self.regs[index]
        } else {
            0
        }
    }

    pub fn operator(&self, index: usize) -> Option<&Operator> {
        self.ops[..self.config.chip_type.operators()].get(index)
    }

    pub fn channel(&self, index: usize) -> Option<&Channel> {
        self.channels[..self.config.chip_type.channels()].get(index)
    }

    /// Signal flow the channel renders with under the current registers
    pub fn channel_topology(&self, index: usize) -> Option<Topology> {
        (index < self.config.chip_type.channels()).then(|| self.topology(index))
    }

    /// OPL3 with the NEW bit set
    fn opl3_mode(&self) -> bool {
        self.config.chip_type == ChipType::Opl3 && self.regs[0x105] & 0x01 != 0
    }

    fn is_donor(&self, channel: usize) -> bool {
        self.opl3_mode() && self.channels[channel].role() == FourOpRole::Donor
    }

    fn is_four_op_base(&self, channel: usize) -> bool {
        self.opl3_mode() && self.channels[channel].role() == FourOpRole::Base
    }

    fn topology(&self, channel: usize) -> Topology {
        let connection = |ch: usize| self.regs[0xc0 + channel_register(ch)] & 0x01 != 0;
        let donor = self
            .is_four_op_base(channel)
            .then(|| connection(channel + 3));
        Topology::from_connection(connection(channel), donor)
    }

    /// Writes to an I/O port
    ///
    /// Even ports latch a register index, odd ports write data to the latched
    /// index. On the OPL3, `port & 2` on an index write selects the second
    /// register set.
    ///
    /// # Arguments
    /// * `port` - Port offset from the chip's base address
    /// * `val` - Index or data byte
    pub fn write_port(&mut self, port: u32, val: u8) {
        if port & 1 == 0 {
            self.index = u32::from(val);
            if port & 2 != 0 && self.config.chip_type == ChipType::Opl3 {
                self.index |= 0x100;
            }
        } else {
            self.write_reg(self.index, val);
        }
    }

    /// Writes a value to a register
    ///
    /// Every write inside the register bank is latched; writes the chip would
    /// not react to are otherwise ignored.
    ///
    /// # Arguments
    /// * `reg` - Register index, `0x100-0x1F5` address the OPL3 second set
    /// * `val` - The value to write
    pub fn write_reg(&mut self, reg: u32, val: u8) {
        let index = reg as usize;
        if index >= self.config.chip_type.register_bank_len() {
            trace!("Ignoring write of {val:#04x} to register {reg:#05x}");
            return;
        }
        let previous = self.regs[index];
        self.regs[index] = val;

        let Some(register) = Register::decode(reg, self.config.chip_type) else {
            trace!("Latched write of {val:#04x} to unmapped register {reg:#05x}");
            return;
        };

        match register {
            Register::Control(idx) => self.write_control(idx, previous, val),
            Register::Operator(group, slot) => self.write_operator(group, slot, val),
            Register::FrequencyLow(channel) => self.write_frequency(channel),
            Register::KeyOnBlock(channel) => self.write_key_on(channel, val),
            Register::Percussion => self.write_percussion(previous, val),
            Register::FeedbackConnection(channel) => self.write_feedback(channel, val),
        }
    }

    fn write_control(&mut self, idx: usize, previous: u8, val: u8) {
        match idx {
            0x104 => {
                for (bit, base) in FOUR_OP_PAIRS {
                    let (base_role, donor_role) = if val & bit != 0 {
                        (FourOpRole::Base, FourOpRole::Donor)
                    } else {
                        (FourOpRole::Single, FourOpRole::Single)
                    };
                    self.channels[base].set_role(base_role);
                    self.channels[base + 3].set_role(donor_role);
                }
                debug!("4-op channel pairs set to {:#04x}", val & 0x3f);
            }
            0x105 if (previous ^ val) & 0x01 != 0 => {
                debug!("OPL3 mode {}", if val & 0x01 != 0 { "on" } else { "off" });
            }
            _ => {}
        }
    }

    fn write_operator(&mut self, group: OperatorGroup, slot: Slot, val: u8) {
        let op = slot.operator();
        let regs = OperatorRegisters::read(&self.regs, slot);
        match group {
            OperatorGroup::Flags => {
                self.ops[op].update_flags(regs);
                self.refresh_operator(slot);
            }
            OperatorGroup::Level => self.refresh_operator(slot),
            OperatorGroup::AttackDecay => {
                self.ops[op].update_attack_rate(regs.attack_rate(), &self.timing);
                self.ops[op].update_decay_rate(regs.decay_rate(), &self.timing);
            }
            OperatorGroup::SustainRelease => {
                self.ops[op].update_release_rate(regs.release_rate(), &self.timing);
                self.ops[op].update_sustain_level(regs.sustain_level());
            }
            OperatorGroup::Waveform => {
                let sel = match self.config.chip_type {
                    ChipType::Opl3 if self.opl3_mode() => val & 0x07,
                    ChipType::Opl3 => val & 0x03,
                    ChipType::Opl2 if self.regs[0x01] & 0x20 != 0 => val & 0x03,
                    ChipType::Opl2 => {
                        trace!("Waveform select disabled, ignoring {val:#04x}");
                        return;
                    }
                };
                self.ops[op].update_waveform(sel);
            }
        }
    }

    /// Recompute an operator from its registers and its channel's frequency
    ///
    /// The operators of a 4-op donor channel take the frequency of the base
    /// channel.
    fn refresh_operator(&mut self, slot: Slot) {
        let mut channel = slot.channel();
        if self.is_donor(channel) {
            channel -= 3;
        }
        let freq = ChannelFrequency::read(&self.regs, channel);
        let regs = OperatorRegisters::read(&self.regs, slot);
        let note_sel = self.regs[0x08] & 0x40 != 0;
        self.ops[slot.operator()].update_frequency(freq, regs, note_sel, &self.timing);
    }

    /// Slots of the operators a channel's frequency and key-on drive
    fn voice_slots(&self, channel: usize) -> ([Slot; 4], usize) {
        let modulator = Slot::modulator(channel);
        let slots = [
            modulator,
            modulator.offset_by(3),
            modulator.offset_by(8),
            modulator.offset_by(11),
        ];
        let count = if self.is_four_op_base(channel) { 4 } else { 2 };
        (slots, count)
    }

    fn write_frequency(&mut self, channel: usize) {
        if self.is_donor(channel) {
            trace!("Ignoring frequency write to attached channel {channel}");
            return;
        }
        let (slots, count) = self.voice_slots(channel);
        for slot in &slots[..count] {
            self.refresh_operator(*slot);
        }
    }

    fn write_key_on(&mut self, channel: usize, val: u8) {
        if self.is_donor(channel) {
            trace!("Ignoring key-on write to attached channel {channel}");
            return;
        }
        let (slots, count) = self.voice_slots(channel);
        for slot in &slots[..count] {
            let op = &mut self.ops[slot.operator()];
            if val & 0x20 != 0 {
                op.key_on(KEY_NORMAL);
            } else {
                op.key_off(KEY_NORMAL);
            }
            self.refresh_operator(*slot);
        }
    }

    fn write_percussion(&mut self, previous: u8, val: u8) {
        let rhythm = val & 0x20 != 0;
        if (previous ^ val) & 0x20 != 0 {
            debug!("Rhythm mode {}", if rhythm { "on" } else { "off" });
        }

        for (key, ops) in DRUM_OPERATORS {
            let keyed = rhythm && val & key != 0;
            for &op in ops {
                let slot = Slot::for_operator(op);
                if keyed {
                    self.ops[op].key_on(KEY_PERCUSSION);
                    self.refresh_operator(slot);
                } else {
                    self.ops[op].key_off(KEY_PERCUSSION);
                }
            }
        }
    }

    fn write_feedback(&mut self, channel: usize, val: u8) {
        let modulator = Slot::modulator(channel).operator();
        self.ops[modulator].update_feedback(val);
        if self.config.chip_type == ChipType::Opl3 && !self.config.full_pan {
            self.channels[channel].set_pan(Pan::from_enable_bits(val));
        }
    }

    /// Sets the stereo gains of a channel
    ///
    /// Only honored when the chip was created with full panning, in which case
    /// the `0xC0` output enable bits no longer affect the channel.
    ///
    /// # Arguments
    /// * `channel` - Channel index (0-17)
    /// * `left` - Left gain, clamped to `[0, 1]`
    /// * `right` - Right gain, clamped to `[0, 1]`
    pub fn set_panning(&mut self, channel: usize, left: f32, right: f32) {
        if !self.config.full_pan {
            debug!("Ignoring panning of channel {channel}, full pan is disabled");
            return;
        }
        if channel >= self.config.chip_type.channels() {
            trace!("Ignoring panning of nonexistent channel {channel}");
            return;
        }
        self.channels[channel].set_pan(Pan::new(left, right));
    }

    /// Renders normalized samples
    ///
    /// Writes `samples` frames (interleaved left/right on the OPL3), or as
    /// many as fit in `output`. Values are the mix divided by 32768 and are
    /// not clipped.
    pub fn update(&mut self, output: &mut [f32], samples: usize) {
        let channels = self.output_channels();
        let frames = samples.min(output.len() / channels);
        self.render(frames, |i, left, right| {
            if channels == 1 {
                output[i] = left as f32 / 32768.0;
            } else {
                output[i * 2] = left as f32 / 32768.0;
                output[i * 2 + 1] = right as f32 / 32768.0;
            }
        });
    }

    /// Renders 16 bit samples
    ///
    /// Writes `samples` frames (interleaved left/right on the OPL3), or as
    /// many as fit in `output`, clipped to the `i16` range.
    pub fn update_s(&mut self, output: &mut [i16], samples: usize) {
        let channels = self.output_channels();
        let frames = samples.min(output.len() / channels);
        let clip = |v: i32| v.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16;
        self.render(frames, |i, left, right| {
            if channels == 1 {
                output[i] = clip(left);
            } else {
                output[i * 2] = clip(left);
                output[i * 2 + 1] = clip(right);
            }
        });
    }

    /// Render `frames` frames block by block, handing each to `emit`
    fn render<F: FnMut(usize, i32, i32)>(&mut self, frames: usize, mut emit: F) {
        let mut left = [0i32; BLOCKBUF_SIZE];
        let mut right = [0i32; BLOCKBUF_SIZE];
        let mut lfo = [LfoSample::default(); BLOCKBUF_SIZE];
        let stereo = self.opl3_mode();

        let mut done = 0;
        while done < frames {
            let n = (frames - done).min(BLOCKBUF_SIZE);
            self.render_block(&mut left[..n], &mut right[..n], &mut lfo[..n]);
            for i in 0..n {
                let r = if stereo { right[i] } else { left[i] };
                emit(done + i, left[i], r);
            }
            done += n;
        }
    }

    fn render_block(&mut self, left: &mut [i32], right: &mut [i32], lfo: &mut [LfoSample]) {
        left.fill(0);
        right.fill(0);

        let rhythm = self.regs[0xbd];
        for sample in lfo.iter_mut() {
            *sample = self.lfo.tick(rhythm & 0x40 != 0, rhythm & 0x80 != 0);
        }
        let lfo = &*lfo;

        let stereo = self.opl3_mode();
        let generator_add = self.timing.generator_add;
        let percussion = rhythm & 0x20 != 0;

        if percussion {
            let bass_drum = self.topology(6);
            self.percussion.render(
                &self.channels[6..9],
                bass_drum,
                stereo,
                &mut self.ops,
                lfo,
                generator_add,
                left,
                right,
            );
        }

        let active = if stereo { MAX_CHANNELS } else { 9 };
        for ch in 0..active {
            if percussion && (6..9).contains(&ch) {
                continue;
            }
            if self.is_donor(ch) {
                continue;
            }
            let topology = self.topology(ch);
            let channel = &self.channels[ch];
            let mut mix = if stereo {
                Mix::stereo(left, right, channel.pan())
            } else {
                Mix::mono(left, right)
            };
            channel.render(topology, &mut self.ops, lfo, generator_add, &mut mix);
        }
    }
}
