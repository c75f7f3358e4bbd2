//! Drives a chip through a list of timed events and stores the result.

use std::path::Path;

use log::{debug, info};
use opl_emulator::Chip;

use crate::config::ScriptEvent;

const LOG_TAG: &str = "Render";

fn seconds_to_frames(seconds: f32, sample_rate: u32) -> usize {
    (f64::from(seconds.max(0.0)) * f64::from(sample_rate)).round() as usize
}

fn render_frames(chip: &mut Chip, out: &mut Vec<i16>, frames: usize) {
    if frames == 0 {
        return;
    }
    let start = out.len();
    out.resize(start + frames * chip.output_channels(), 0);
    chip.update_s(&mut out[start..], frames);
}

/// Render `events` in time order, then `tail` more seconds
///
/// Events are applied at the first frame at or after their time. Returns
/// interleaved samples, one per output channel of the chip.
pub fn render_events(chip: &mut Chip, events: &[ScriptEvent], tail: f32) -> Vec<i16> {
    let rate = chip.config().sample_rate;
    let mut ordered: Vec<&ScriptEvent> = events.iter().collect();
    ordered.sort_by(|a, b| a.at.total_cmp(&b.at));

    let mut out = Vec::new();
    let mut cursor = 0;
    for event in ordered {
        let at = seconds_to_frames(event.at, rate);
        if at > cursor {
            render_frames(chip, &mut out, at - cursor);
            cursor = at;
        }
        debug!(target: LOG_TAG, "Frame {cursor}: {} writes, {} pans", event.writes.len(), event.pans.len());
        for write in &event.writes {
            chip.write_reg(write.reg, write.val);
        }
        for pan in &event.pans {
            chip.set_panning(pan.channel, pan.left, pan.right);
        }
    }
    render_frames(chip, &mut out, seconds_to_frames(tail, rate));

    info!(
        target: LOG_TAG,
        "Rendered {} frames ({:.2}s)",
        out.len() / chip.output_channels(),
        (out.len() / chip.output_channels()) as f32 / rate as f32
    );
    out
}

/// Write interleaved 16 bit samples to a WAV file
pub fn write_wav(
    path: &Path,
    samples: &[i16],
    channels: u16,
    sample_rate: u32,
) -> Result<(), hound::Error> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(path, spec)?;
    for &sample in samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;

    info!(target: LOG_TAG, "Wrote {} samples to {}", samples.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegWrite;
    use crate::demo;
    use opl_emulator::ChipConfig;

    fn tone(at: f32, key_on: bool) -> ScriptEvent {
        let mut writes = vec![
            RegWrite { reg: 0x20, val: 0x21 },
            RegWrite { reg: 0x23, val: 0x21 },
            RegWrite { reg: 0x60, val: 0xf0 },
            RegWrite { reg: 0x63, val: 0xf0 },
            RegWrite { reg: 0x40, val: 0x3f },
            RegWrite { reg: 0x43, val: 0x00 },
            RegWrite { reg: 0xa0, val: 0x44 },
        ];
        writes.push(RegWrite {
            reg: 0xb0,
            val: if key_on { 0x32 } else { 0x12 },
        });
        ScriptEvent {
            at,
            writes,
            pans: Vec::new(),
        }
    }

    #[test]
    fn test_render_length() {
        let mut chip = Chip::new(ChipConfig::opl2(8000));
        let out = render_events(&mut chip, &[tone(0.5, true)], 0.25);
        assert_eq!(out.len(), 4000 + 2000);
        // nothing plays before the key-on
        assert!(out[..4000].iter().all(|&s| s == 0));
        assert!(out[4000..].iter().any(|&s| s != 0));

        let mut chip = Chip::new(ChipConfig::opl3(8000));
        let out = render_events(&mut chip, &[], 0.5);
        assert_eq!(out.len(), 4000 * 2);
    }

    #[test]
    fn test_events_are_sorted() {
        let events = [tone(0.25, false), tone(0.0, true)];
        let mut sorted = events.clone();
        sorted.sort_by(|a, b| a.at.total_cmp(&b.at));

        let mut chip = Chip::new(ChipConfig::opl2(8000));
        let a = render_events(&mut chip, &events, 0.1);
        let mut chip = Chip::new(ChipConfig::opl2(8000));
        let b = render_events(&mut chip, &sorted, 0.1);
        assert_eq!(a, b);
    }

    #[test]
    fn test_demo_is_audible() {
        let script = demo::script();
        let mut chip = Chip::new(ChipConfig::opl2(22050));
        let out = render_events(&mut chip, &script.events, 0.5);
        assert!(out.iter().any(|&s| s != 0));
    }

    #[test]
    fn test_write_wav() {
        let path = std::env::temp_dir().join("opl-render-test-write.wav");
        let samples: Vec<i16> = (0..200).map(|i| (i * 100 - 10000) as i16).collect();
        write_wav(&path, &samples, 2, 11025).unwrap();

        let reader = hound::WavReader::open(&path).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 2);
        assert_eq!(spec.sample_rate, 11025);
        assert_eq!(spec.bits_per_sample, 16);
        let read: Vec<i16> = reader.into_samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(read, samples);
        let _ = std::fs::remove_file(&path);
    }
}
