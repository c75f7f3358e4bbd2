use argh::FromArgs;
use opl_emulator::ChipType;

/// Render OPL2/OPL3 register scripts to a WAV file
#[derive(Debug, Clone, FromArgs)]
pub struct CLIOptions {
    /// verbose level: off, error, warn, info, debug, trace
    #[argh(option)]
    pub verbose: Option<log::LevelFilter>,
    /// path to a RON register script, the built-in demo is rendered without
    /// one
    #[argh(option)]
    pub script: Option<String>,
    /// path of the WAV file to write
    #[argh(option, default = "String::from(\"opl-render.wav\")")]
    pub output: String,
    /// chip to emulate <opl2, opl3>
    #[argh(option)]
    pub chip: Option<ChipType>,
    /// output sample rate in Hz
    #[argh(option)]
    pub rate: Option<u32>,
    /// use per-channel pan gains from the script instead of the 0xC0 output
    /// bits (OPL3 only)
    #[argh(option)]
    pub full_pan: Option<bool>,
    /// seconds to keep rendering after the last event
    #[argh(option)]
    pub seconds: Option<f32>,
}
