//! # OPL2/OPL3 Emulator
//!
//! A software model of the Yamaha YM3812 (OPL2) and YMF262 (OPL3) FM synthesis
//! chips. Register writes drive 18 (OPL2) or 36 (OPL3) operators, each an
//! oscillator with its own envelope generator, which are combined into 2-op or
//! 4-op voices and mixed into PCM.
//!
//! The model works on floating point envelopes with 16.16 fixed point phase
//! accumulators, so the output follows the configured sample rate rather than
//! stepping at the chip's native ~49.7 kHz.
//!
//! ## Architecture
//!
//! - **Chip**: register bank, decoder, LFOs and the block render loop
//! - **Channel**: one voice, its 4-op role, stereo pan and signal flow topology
//! - **Operator**: phase generator plus envelope state machine
//!
//! Tables that do not depend on the sample rate are built once per process and
//! shared read-only. Everything derived from the sample rate lives in each
//! [`Chip`].
//!
//! ## Usage
//!
//! ```rust
//! use opl_emulator::{Chip, ChipConfig};
//!
//! let mut chip = Chip::new(ChipConfig::opl2(44100));
//!
//! // A plain sine on channel 0
//! chip.write_reg(0x20, 0x01); // modulator: multiplier 1
//! chip.write_reg(0x23, 0x21); // carrier: sustain, multiplier 1
//! chip.write_reg(0x40, 0x3f); // modulator: silent
//! chip.write_reg(0x43, 0x00); // carrier: full volume
//! chip.write_reg(0x63, 0xf4); // carrier: fast attack, slow decay
//! chip.write_reg(0x83, 0x24); // carrier: sustain level 2, release 4
//! chip.write_reg(0xa0, 0x41); // F-number low byte
//! chip.write_reg(0xb0, 0x32); // key on, block 4, F-number high bits
//!
//! let mut output = vec![0i16; 1024];
//! chip.update_s(&mut output, 1024);
//! assert!(output.iter().any(|&s| s != 0));
//! ```
//!
//! ## Register Reference
//!
//! - `0x01`: waveform select enable (OPL2)
//! - `0x20-0x35`: tremolo/vibrato/sustain/KSR/multiplier
//! - `0x40-0x55`: key scale level and output level
//! - `0x60-0x75`: attack and decay rates
//! - `0x80-0x95`: sustain level and release rate
//! - `0xA0-0xA8`: F-number low byte
//! - `0xB0-0xB8`: key on, block, F-number high bits
//! - `0xBD`: LFO depth, percussion mode and percussion keys
//! - `0xC0-0xC8`: feedback, connection and (OPL3) output enable
//! - `0xE0-0xF5`: waveform select
//! - `0x104`/`0x105`: (OPL3) 4-op enable and OPL3 mode
//!
//! On the OPL3 every register except `0xBD` is mirrored at `+0x100` for
//! channels 9-17.

use std::io;
use std::str::FromStr;

pub mod channel;
pub mod chip;
pub mod lfo;
pub mod operator;
pub mod percussion;
pub mod registers;
pub mod tables;

pub use channel::{Channel, FourOpAlgorithm, FourOpRole, Pan, Topology};
pub use chip::Chip;
pub use operator::{EnvelopeStage, Operator};
pub use tables::init_tables;

/// The chip's native sample rate in Hz (approximately 49.716 kHz)
pub const OPLRATE: f64 = 14318180.0 / 288.0;

/// One in 16.16 fixed point, used by the phase accumulators
pub const FIXEDPT: u32 = 0x10000;
/// One in 8.24 fixed point, used by the LFO table positions
pub const FIXEDPT_LFO: u32 = 0x1000000;

/// Waveform precision, entries in one full sine period
pub const WAVEPREC: usize = 1024;

/// Samples rendered per internal block
pub const BLOCKBUF_SIZE: usize = 512;

/// Operators on the largest variant
pub const MAX_OPERATORS: usize = 36;
/// Channels on the largest variant
pub const MAX_CHANNELS: usize = 18;

/// Which chip is being emulated
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ChipType {
    /// YM3812: 9 channels, mono, one register set
    #[default]
    Opl2,
    /// YMF262: 18 channels, stereo, two register sets
    Opl3,
}

impl ChipType {
    pub fn channels(self) -> usize {
        match self {
            ChipType::Opl2 => 9,
            ChipType::Opl3 => 18,
        }
    }

    pub fn operators(self) -> usize {
        self.channels() * 2
    }

    /// Size of the latched register bank
    pub fn register_bank_len(self) -> usize {
        match self {
            ChipType::Opl2 => 0x100,
            ChipType::Opl3 => 0x200,
        }
    }

    /// Interleaved samples produced per frame by the render calls
    pub fn output_channels(self) -> usize {
        match self {
            ChipType::Opl2 => 1,
            ChipType::Opl3 => 2,
        }
    }

    /// Effective attack rate (`4 * AR + toff`) at and above which the attack
    /// completes at once
    fn instant_attack_rate(self) -> u32 {
        match self {
            ChipType::Opl2 => 62,
            ChipType::Opl3 => 60,
        }
    }
}

impl FromStr for ChipType {
    type Err = io::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "opl2" | "ym3812" => Ok(Self::Opl2),
            "opl3" | "ymf262" => Ok(Self::Opl3),
            _ => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "Invalid chip type, expected opl2 or opl3",
            )),
        }
    }
}

/// Construction parameters of a [`Chip`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChipConfig {
    pub chip_type: ChipType,
    /// Output sample rate in Hz
    pub sample_rate: u32,
    /// Use per-channel gains from [`Chip::set_panning`] instead of the
    /// hardware left/right enable bits (OPL3 only)
    pub full_pan: bool,
}

impl Default for ChipConfig {
    fn default() -> Self {
        Self {
            chip_type: ChipType::Opl2,
            sample_rate: 44100,
            full_pan: false,
        }
    }
}

impl ChipConfig {
    pub fn opl2(sample_rate: u32) -> Self {
        Self {
            chip_type: ChipType::Opl2,
            sample_rate,
            full_pan: false,
        }
    }

    pub fn opl3(sample_rate: u32) -> Self {
        Self {
            chip_type: ChipType::Opl3,
            sample_rate,
            full_pan: false,
        }
    }

    pub fn with_full_pan(mut self, full_pan: bool) -> Self {
        self.full_pan = full_pan;
        self
    }
}

/// Constants derived from the sample rate, owned by each chip instance
#[derive(Debug, Clone, PartialEq)]
pub struct Timing {
    /// `1 / sample_rate`
    pub recip_rate: f64,
    /// Phase increment per unit of `fnum << block`, indexed by the multiplier
    /// register field
    pub freq_mul: [f64; 16],
    /// Standardized envelope steps per output sample, in 16.16 fixed point
    pub generator_add: u32,
    instant_attack: u32,
}

impl Timing {
    pub fn new(sample_rate: u32, chip_type: ChipType) -> Self {
        let rate = f64::from(sample_rate.max(1));
        let recip_rate = 1.0 / rate;
        let freq_mul = std::array::from_fn(|i| {
            tables::FREQ_MUL_TABLE[i] * OPLRATE / WAVEPREC as f64
                * f64::from(FIXEDPT)
                * recip_rate
        });

        Self {
            recip_rate,
            freq_mul,
            generator_add: (OPLRATE * f64::from(FIXEDPT) / rate) as u32,
            instant_attack: chip_type.instant_attack_rate(),
        }
    }

    pub fn instant_attack(&self) -> u32 {
        self.instant_attack
    }
}
