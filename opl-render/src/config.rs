//! Render settings: a RON script merged with the command line.

use std::error::Error;
use std::fs;
use std::io;
use std::path::Path;

use log::info;
use nanoserde::DeRon;
use opl_emulator::{ChipConfig, ChipType};

use crate::CLIOptions;

const LOG_TAG: &str = "RenderConfig";

/// Sample rate used when neither the script nor the command line set one
pub const DEFAULT_RATE: u32 = 44100;
/// Seconds rendered after the last event by default
pub const DEFAULT_TAIL: f32 = 1.5;

/// One register write
#[derive(Debug, Clone, PartialEq, DeRon)]
pub struct RegWrite {
    pub reg: u32,
    pub val: u8,
}

/// Explicit stereo gains for a channel, needs `full_pan`
#[derive(Debug, Clone, PartialEq, DeRon)]
pub struct PanSetting {
    pub channel: usize,
    pub left: f32,
    pub right: f32,
}

/// Writes and pans applied at a point in time
#[derive(Debug, Clone, Default, PartialEq, DeRon)]
pub struct ScriptEvent {
    /// Seconds from the start of the render
    pub at: f32,
    #[nserde(default)]
    pub writes: Vec<RegWrite>,
    #[nserde(default)]
    pub pans: Vec<PanSetting>,
}

/// A timed register script
#[derive(Debug, Clone, Default, PartialEq, DeRon)]
pub struct RenderScript {
    /// `opl2` or `opl3`
    #[nserde(default)]
    pub chip: Option<String>,
    #[nserde(default)]
    pub sample_rate: Option<u32>,
    #[nserde(default)]
    pub full_pan: Option<bool>,
    /// Seconds rendered after the last event
    #[nserde(default)]
    pub length: Option<f32>,
    #[nserde(default)]
    pub events: Vec<ScriptEvent>,
}

impl RenderScript {
    pub fn parse(data: &str) -> Result<Self, io::Error> {
        Self::deserialize_ron(data)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("{e:?}")))
    }

    pub fn load(path: &Path) -> Result<Self, Box<dyn Error>> {
        let data = fs::read_to_string(path)?;
        let script = Self::parse(&data)?;
        info!(target: LOG_TAG, "Loaded {} events from {:?}", script.events.len(), path);
        Ok(script)
    }
}

/// Fully resolved render settings
#[derive(Debug, Clone, PartialEq)]
pub struct RenderSettings {
    pub chip: ChipType,
    pub sample_rate: u32,
    pub full_pan: bool,
    /// Seconds rendered after the last event
    pub tail: f32,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            chip: ChipType::Opl2,
            sample_rate: DEFAULT_RATE,
            full_pan: false,
            tail: DEFAULT_TAIL,
        }
    }
}

impl RenderSettings {
    pub fn from_script(script: &RenderScript) -> Result<Self, io::Error> {
        let mut settings = Self::default();
        if let Some(chip) = &script.chip {
            settings.chip = chip.parse()?;
        }
        if let Some(rate) = script.sample_rate {
            settings.sample_rate = rate;
        }
        if let Some(full_pan) = script.full_pan {
            settings.full_pan = full_pan;
        }
        if let Some(length) = script.length {
            settings.tail = length;
        }
        Ok(settings)
    }

    /// Sync the CLI options and script settings with each other
    pub fn sync_cli(&mut self, cli: &mut CLIOptions) {
        info!("Checking CLI options");

        if let Some(chip) = cli.chip {
            if chip != self.chip {
                self.chip = chip;
                info!("Chip changed to: {:?}", chip);
            }
        } else {
            cli.chip = Some(self.chip);
        }

        if let Some(rate) = cli.rate {
            if rate != self.sample_rate {
                self.sample_rate = rate;
                info!("Sample rate changed to: {}", rate);
            }
        } else {
            cli.rate = Some(self.sample_rate);
        }

        if let Some(full_pan) = cli.full_pan {
            self.full_pan = full_pan;
        } else {
            cli.full_pan = Some(self.full_pan);
        }

        if let Some(seconds) = cli.seconds {
            self.tail = seconds.max(0.0);
        } else {
            cli.seconds = Some(self.tail);
        }
    }

    pub fn chip_config(&self) -> ChipConfig {
        ChipConfig {
            chip_type: self.chip,
            sample_rate: self.sample_rate,
            full_pan: self.full_pan,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli() -> CLIOptions {
        CLIOptions {
            verbose: None,
            script: None,
            output: String::from("out.wav"),
            chip: None,
            rate: None,
            full_pan: None,
            seconds: None,
        }
    }

    #[test]
    fn test_parse_script() {
        let script = RenderScript::parse(
            r#"(
                chip: Some("opl3"),
                sample_rate: Some(22050),
                full_pan: Some(true),
                length: Some(0.5),
                events: [
                    (
                        at: 0.0,
                        writes: [(reg: 32, val: 1), (reg: 176, val: 50)],
                        pans: [],
                    ),
                    (
                        at: 0.25,
                        writes: [(reg: 176, val: 18)],
                        pans: [(channel: 0, left: 1.0, right: 0.0)],
                    ),
                ],
            )"#,
        )
        .unwrap();

        assert_eq!(script.chip.as_deref(), Some("opl3"));
        assert_eq!(script.events.len(), 2);
        assert_eq!(script.events[0].writes[1], RegWrite { reg: 176, val: 50 });
        assert_eq!(script.events[1].pans[0].channel, 0);

        let settings = RenderSettings::from_script(&script).unwrap();
        assert_eq!(
            settings,
            RenderSettings {
                chip: ChipType::Opl3,
                sample_rate: 22050,
                full_pan: true,
                tail: 0.5,
            }
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(RenderScript::parse("(events: [").is_err());

        let script = RenderScript {
            chip: Some(String::from("sn76489")),
            ..Default::default()
        };
        let err = RenderSettings::from_script(&script).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);
    }

    #[test]
    fn test_cli_overrides_script() {
        let mut settings = RenderSettings::default();
        let mut options = cli();
        options.chip = Some(ChipType::Opl3);
        options.seconds = Some(-2.0);
        settings.sync_cli(&mut options);

        assert_eq!(settings.chip, ChipType::Opl3);
        assert_eq!(settings.tail, 0.0);
        // unset options are filled from the settings
        assert_eq!(options.rate, Some(DEFAULT_RATE));
        assert_eq!(options.full_pan, Some(false));

        let config = settings.chip_config();
        assert_eq!(config.chip_type, ChipType::Opl3);
        assert_eq!(config.sample_rate, DEFAULT_RATE);
    }
}
