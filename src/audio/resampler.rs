/// Linear-interpolation resampler over interleaved i16 PCM.
pub struct Resampler {
    ratio: f32,
    index: f32,
    last_samples: Vec<i16>,
    channels: usize,
}

impl Resampler {
    pub fn new(source_rate: u32, target_rate: u32, channels: usize) -> Self {
        let channels = channels.max(1);
        Self {
            ratio: source_rate as f32 / target_rate.max(1) as f32,
            index: 0.0,
            last_samples: vec![0; channels],
            channels,
        }
    }

    pub fn is_passthrough(&self) -> bool {
        (self.ratio - 1.0).abs() < f32::EPSILON
    }

    /// Resamples `input` and appends the result to `output`.
    pub fn process(&mut self, input: &[i16], output: &mut Vec<i16>) {
        let num_frames = input.len() / self.channels;
        if num_frames == 0 {
            return;
        }

        while self.index < num_frames as f32 {
            let idx = self.index as usize;
            let fract = self.index.fract();

            for c in 0..self.channels {
                let s1 = if idx == 0 {
                    self.last_samples[c] as f32
                } else {
                    input[(idx - 1) * self.channels + c] as f32
                };
                let s2 = input[idx.min(num_frames - 1) * self.channels + c] as f32;

                output.push((s1 * (1.0 - fract) + s2 * fract) as i16);
            }

            self.index += self.ratio;
        }

        self.index -= num_frames as f32;

        for c in 0..self.channels {
            self.last_samples[c] = input[(num_frames - 1) * self.channels + c];
        }
    }
}

/// Expands or folds interleaved PCM to stereo.
pub fn to_stereo(input: &[i16], channels: usize, output: &mut Vec<i16>) {
    match channels {
        2 => output.extend_from_slice(input),
        1 => {
            for &s in input {
                output.push(s);
                output.push(s);
            }
        }
        0 => {}
        n => {
            for frame in input.chunks_exact(n) {
                output.push(frame[0]);
                output.push(frame[1]);
            }
        }
    }
}
