#![doc = include_str!("../../README.md")]

mod cli;
mod config;
mod demo;
mod render;

use cli::*;
use config::{RenderScript, RenderSettings};
use log::info;
use mimalloc::MiMalloc;
use opl_emulator::Chip;
use simplelog::TermLogger;
use std::error::Error;
use std::path::PathBuf;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// Load a script (or the demo), render it and write the WAV file
fn main() -> Result<(), Box<dyn Error>> {
    let mut options: CLIOptions = argh::from_env();

    TermLogger::init(
        options.verbose.unwrap_or(log::LevelFilter::Info),
        simplelog::ConfigBuilder::default()
            .set_time_level(log::LevelFilter::Trace)
            .build(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    )?;

    let script = match &options.script {
        Some(path) => RenderScript::load(&PathBuf::from(path))?,
        None => {
            info!("No script given, rendering the demo arpeggio");
            demo::script()
        }
    };

    let mut settings = RenderSettings::from_script(&script)?;
    settings.sync_cli(&mut options);

    let mut chip = Chip::new(settings.chip_config());
    info!(
        "Emulating {:?} at {}Hz, {} output channel(s)",
        settings.chip,
        chip.config().sample_rate,
        chip.output_channels()
    );

    let samples = render::render_events(&mut chip, &script.events, settings.tail);
    render::write_wav(
        &PathBuf::from(&options.output),
        &samples,
        chip.output_channels() as u16,
        chip.config().sample_rate,
    )?;

    Ok(())
}
