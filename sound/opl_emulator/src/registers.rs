//! # Register Decoding
//!
//! Maps register indices to the operator slot or channel they address and
//! unpacks register fields. Operator registers come in groups of 22 slots
//! (`0x20-0x35` and so on) of which 18 are valid; channel registers in groups
//! of 9.

use crate::ChipType;

/// Operator index for each slot within a register group
const SLOT_TO_OPERATOR: [usize; 22] = [
    0, 1, 2, 9, 10, 11, 0, 0, 3, 4, 5, 12, 13, 14, 0, 0, 6, 7, 8, 15, 16, 17,
];

/// Owning channel for each slot within a register group
const SLOT_TO_CHANNEL: [usize; 22] = [
    0, 1, 2, 0, 1, 2, 0, 0, 3, 4, 5, 3, 4, 5, 0, 0, 6, 7, 8, 6, 7, 8,
];

/// Slot of the modulator of each channel, the carrier sits 3 slots higher
const CHANNEL_TO_SLOT: [usize; 9] = [0, 1, 2, 8, 9, 10, 16, 17, 18];

/// Slots per operator register group
pub const SLOTS_PER_SET: usize = 22;

/// One operator register slot in one register set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    set: usize,
    offset: usize,
}

impl Slot {
    /// Decode the slot of a register offset from its group base
    pub fn new(set: usize, offset: usize) -> Option<Self> {
        if offset < SLOTS_PER_SET && offset & 7 < 6 {
            Some(Self { set, offset })
        } else {
            None
        }
    }

    /// Modulator slot of a channel
    pub fn modulator(channel: usize) -> Self {
        Self {
            set: channel / 9,
            offset: CHANNEL_TO_SLOT[channel % 9],
        }
    }

    /// Carrier slot of a channel
    pub fn carrier(channel: usize) -> Self {
        Self::modulator(channel).offset_by(3)
    }

    /// Slot addressing a global operator index
    pub fn for_operator(operator: usize) -> Self {
        let set = operator / 18;
        let local = operator % 18;
        if local < 9 {
            Self::modulator(set * 9 + local)
        } else {
            Self::carrier(set * 9 + local - 9)
        }
    }

    /// The slot `delta` positions further along in the same set
    pub fn offset_by(self, delta: usize) -> Self {
        Self {
            set: self.set,
            offset: self.offset + delta,
        }
    }

    /// Absolute register index of this slot within an operator group
    pub fn register(self, group: OperatorGroup) -> usize {
        self.set * 0x100 + group.base() + self.offset
    }

    /// Global operator index (0-35)
    pub fn operator(self) -> usize {
        self.set * 18 + SLOT_TO_OPERATOR[self.offset]
    }

    /// Global channel index (0-17)
    pub fn channel(self) -> usize {
        self.set * 9 + SLOT_TO_CHANNEL[self.offset]
    }
}

/// Operator register groups
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorGroup {
    /// `0x20`: tremolo, vibrato, sustain, KSR, multiplier
    Flags,
    /// `0x40`: key scale level, total level
    Level,
    /// `0x60`: attack and decay rates
    AttackDecay,
    /// `0x80`: sustain level and release rate
    SustainRelease,
    /// `0xE0`: waveform select
    Waveform,
}

impl OperatorGroup {
    pub fn base(self) -> usize {
        match self {
            OperatorGroup::Flags => 0x20,
            OperatorGroup::Level => 0x40,
            OperatorGroup::AttackDecay => 0x60,
            OperatorGroup::SustainRelease => 0x80,
            OperatorGroup::Waveform => 0xe0,
        }
    }
}

/// What a register write addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Register {
    /// `0x00-0x1F` of either set: test, timers, CSM/note select, 4-op, OPL3 mode
    Control(usize),
    Operator(OperatorGroup, Slot),
    /// `0xA0-0xA8`, by global channel
    FrequencyLow(usize),
    /// `0xB0-0xB8`, by global channel
    KeyOnBlock(usize),
    /// `0xBD` of the first set
    Percussion,
    /// `0xC0-0xC8`, by global channel
    FeedbackConnection(usize),
}

impl Register {
    /// Decode a register index
    ///
    /// Returns `None` for unmapped registers and for the second register set
    /// on an OPL2.
    pub fn decode(index: u32, chip_type: ChipType) -> Option<Self> {
        let index = index as usize;
        if index >= chip_type.register_bank_len() {
            return None;
        }
        let set = index >> 8;
        let low = index & 0xff;

        let operator = |group: OperatorGroup| {
            Slot::new(set, low - group.base()).map(|slot| Register::Operator(group, slot))
        };
        let channel = |base: usize| {
            let ch = low - base;
            (ch < 9).then_some(set * 9 + ch)
        };

        match low & 0xf0 {
            0x00 | 0x10 => Some(Register::Control(index)),
            0x20 | 0x30 => operator(OperatorGroup::Flags),
            0x40 | 0x50 => operator(OperatorGroup::Level),
            0x60 | 0x70 => operator(OperatorGroup::AttackDecay),
            0x80 | 0x90 => operator(OperatorGroup::SustainRelease),
            0xa0 => channel(0xa0).map(Register::FrequencyLow),
            0xb0 if low == 0xbd => (set == 0).then_some(Register::Percussion),
            0xb0 => channel(0xb0).map(Register::KeyOnBlock),
            0xc0 => channel(0xc0).map(Register::FeedbackConnection),
            0xe0 | 0xf0 => operator(OperatorGroup::Waveform),
            _ => None,
        }
    }
}

/// Offset of a channel's registers within the `0xA0`/`0xB0`/`0xC0` groups
pub fn channel_register(channel: usize) -> usize {
    (channel / 9) * 0x100 + channel % 9
}

/// The four registers configuring one operator
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct OperatorRegisters {
    pub reg20: u8,
    pub reg40: u8,
    pub reg60: u8,
    pub reg80: u8,
}

impl OperatorRegisters {
    /// Read a slot's registers from a register bank
    pub fn read(bank: &[u8], slot: Slot) -> Self {
        Self {
            reg20: bank[slot.register(OperatorGroup::Flags)],
            reg40: bank[slot.register(OperatorGroup::Level)],
            reg60: bank[slot.register(OperatorGroup::AttackDecay)],
            reg80: bank[slot.register(OperatorGroup::SustainRelease)],
        }
    }

    pub fn tremolo(&self) -> bool {
        self.reg20 & 0x80 != 0
    }

    pub fn vibrato(&self) -> bool {
        self.reg20 & 0x40 != 0
    }

    /// Hold at the sustain level until key-off
    pub fn sustain(&self) -> bool {
        self.reg20 & 0x20 != 0
    }

    pub fn key_scale_rate(&self) -> bool {
        self.reg20 & 0x10 != 0
    }

    pub fn multiplier(&self) -> usize {
        (self.reg20 & 0x0f) as usize
    }

    pub fn key_scale_level(&self) -> usize {
        (self.reg40 >> 6) as usize
    }

    pub fn total_level(&self) -> u32 {
        u32::from(self.reg40 & 0x3f)
    }

    pub fn attack_rate(&self) -> u32 {
        u32::from(self.reg60 >> 4)
    }

    pub fn decay_rate(&self) -> u32 {
        u32::from(self.reg60 & 0x0f)
    }

    pub fn sustain_level(&self) -> u32 {
        u32::from(self.reg80 >> 4)
    }

    pub fn release_rate(&self) -> u32 {
        u32::from(self.reg80 & 0x0f)
    }
}

/// F-number and block of a channel
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ChannelFrequency {
    /// 10 bit F-number
    pub fnum: u32,
    /// 3 bit octave
    pub block: u32,
}

impl ChannelFrequency {
    pub fn from_registers(a0: u8, b0: u8) -> Self {
        Self {
            fnum: (u32::from(b0 & 3) << 8) | u32::from(a0),
            block: u32::from((b0 >> 2) & 7),
        }
    }

    /// Read a channel's frequency from a register bank
    pub fn read(bank: &[u8], channel: usize) -> Self {
        let reg = channel_register(channel);
        Self::from_registers(bank[0xa0 + reg], bank[0xb0 + reg])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_operator_slots() {
        assert_eq!(
            Register::decode(0x20, ChipType::Opl2),
            Some(Register::Operator(
                OperatorGroup::Flags,
                Slot { set: 0, offset: 0 }
            ))
        );
        let Some(Register::Operator(OperatorGroup::AttackDecay, slot)) =
            Register::decode(0x75, ChipType::Opl2)
        else {
            panic!("0x75 should decode to an operator slot");
        };
        assert_eq!(slot.operator(), 17);
        assert_eq!(slot.channel(), 8);

        // gaps between slot rows
        assert_eq!(Register::decode(0x26, ChipType::Opl2), None);
        assert_eq!(Register::decode(0x2e, ChipType::Opl2), None);
        assert_eq!(Register::decode(0x36, ChipType::Opl2), None);
    }

    #[test]
    fn test_slot_mapping_covers_all_operators() {
        let mut seen = [false; 18];
        for offset in 0..SLOTS_PER_SET {
            if let Some(slot) = Slot::new(0, offset) {
                assert!(!seen[slot.operator()], "operator mapped twice");
                seen[slot.operator()] = true;
                // modulators below 9, carriers 9 above
                let ch = slot.channel();
                assert!(slot.operator() == ch || slot.operator() == ch + 9);
            }
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn test_channel_slots() {
        for ch in 0..18 {
            let m = Slot::modulator(ch);
            let c = Slot::carrier(ch);
            assert_eq!(m.channel(), ch);
            assert_eq!(c.channel(), ch);
            assert_eq!(m.operator(), (ch / 9) * 18 + ch % 9);
            assert_eq!(c.operator(), m.operator() + 9);
        }
        // 4-op partner slots of channel 0 belong to channel 3
        assert_eq!(Slot::modulator(0).offset_by(8).operator(), 3);
        assert_eq!(Slot::modulator(0).offset_by(11).operator(), 12);
        assert_eq!(Slot::modulator(9).register(OperatorGroup::Level), 0x140);

        for op in 0..36 {
            assert_eq!(Slot::for_operator(op).operator(), op);
        }
        // rhythm mode operators
        assert_eq!(Slot::for_operator(16).register(OperatorGroup::Flags), 0x34);
        assert_eq!(Slot::for_operator(7).channel(), 7);
    }

    #[test]
    fn test_decode_channels() {
        assert_eq!(
            Register::decode(0xa8, ChipType::Opl2),
            Some(Register::FrequencyLow(8))
        );
        assert_eq!(Register::decode(0xa9, ChipType::Opl2), None);
        assert_eq!(
            Register::decode(0x1b3, ChipType::Opl3),
            Some(Register::KeyOnBlock(12))
        );
        assert_eq!(
            Register::decode(0x1c8, ChipType::Opl3),
            Some(Register::FeedbackConnection(17))
        );
        assert_eq!(
            Register::decode(0xbd, ChipType::Opl2),
            Some(Register::Percussion)
        );
        assert_eq!(Register::decode(0x1bd, ChipType::Opl3), None);
    }

    #[test]
    fn test_decode_second_set_on_opl2() {
        assert_eq!(Register::decode(0x120, ChipType::Opl2), None);
        assert_eq!(Register::decode(0x105, ChipType::Opl2), None);
        assert_eq!(
            Register::decode(0x105, ChipType::Opl3),
            Some(Register::Control(0x105))
        );
        assert_eq!(Register::decode(0x200, ChipType::Opl3), None);
        assert_eq!(Register::decode(0xd0, ChipType::Opl3), None);
    }

    #[test]
    fn test_operator_register_fields() {
        let regs = OperatorRegisters {
            reg20: 0xf5,
            reg40: 0x9a,
            reg60: 0xc3,
            reg80: 0x7e,
        };
        assert!(regs.tremolo() && regs.vibrato() && regs.sustain() && regs.key_scale_rate());
        assert_eq!(regs.multiplier(), 5);
        assert_eq!(regs.key_scale_level(), 2);
        assert_eq!(regs.total_level(), 0x1a);
        assert_eq!(regs.attack_rate(), 12);
        assert_eq!(regs.decay_rate(), 3);
        assert_eq!(regs.sustain_level(), 7);
        assert_eq!(regs.release_rate(), 14);
    }

    #[test]
    fn test_channel_frequency() {
        let freq = ChannelFrequency::from_registers(0x41, 0x32);
        assert_eq!(freq.fnum, 0x241);
        assert_eq!(freq.block, 4);
        assert_eq!(channel_register(10), 0x101);
    }
}
