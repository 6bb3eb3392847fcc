use rodio::Source;
use std::f32::consts::PI;
use std::time::Duration;

const SAMPLE_RATE: u32 = 44100;
/// (frequency Hz, length ms) of each step of the chime.
const STEPS: [(f32, u32); 2] = [(880.0, 70), (1320.0, 90)];
const FADE_SAMPLES: usize = 220;

/// Short rising two-step beep played when a code is accepted.
pub struct ScanChime {
    num_sample: usize,
    total_samples: usize,
    step_boundary: usize,
}

impl ScanChime {
    pub fn new() -> Self {
        let first = samples_for(STEPS[0].1);
        Self {
            num_sample: 0,
            total_samples: first + samples_for(STEPS[1].1),
            step_boundary: first,
        }
    }

    fn envelope(&self, index_in_step: usize, step_len: usize) -> f32 {
        let fade_in = (index_in_step as f32 / FADE_SAMPLES as f32).min(1.0);
        let fade_out = ((step_len - index_in_step) as f32 / FADE_SAMPLES as f32).min(1.0);
        fade_in.min(fade_out)
    }
}

impl Default for ScanChime {
    fn default() -> Self {
        Self::new()
    }
}

fn samples_for(ms: u32) -> usize {
    (SAMPLE_RATE as usize * ms as usize) / 1000
}

impl Iterator for ScanChime {
    type Item = f32;

    fn next(&mut self) -> Option<Self::Item> {
        if self.num_sample >= self.total_samples {
            return None;
        }

        let (freq, index, len) = if self.num_sample < self.step_boundary {
            (STEPS[0].0, self.num_sample, self.step_boundary)
        } else {
            (
                STEPS[1].0,
                self.num_sample - self.step_boundary,
                self.total_samples - self.step_boundary,
            )
        };
        self.num_sample += 1;

        let t = index as f32 / SAMPLE_RATE as f32;
        let sample = (2.0 * PI * freq * t).sin() * self.envelope(index, len);
        Some(sample * 0.25)
    }
}

impl Source for ScanChime {
    fn current_frame_len(&self) -> Option<usize> {
        Some(self.total_samples - self.num_sample)
    }

    fn channels(&self) -> u16 {
        1
    }

    fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }

    fn total_duration(&self) -> Option<Duration> {
        Some(Duration::from_millis(
            STEPS.iter().map(|(_, ms)| *ms as u64).sum(),
        ))
    }
}
