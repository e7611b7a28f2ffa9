//! Waveform perturbations for data augmentation.

use crate::audio::{resample_buffer, AudioBuffer};
use crate::error::Result;
use crate::spectral::{self, FrameConfig};
use ndarray::Array2;
use rand::Rng;
use rand_distr::StandardNormal;
use rustfft::num_complex::Complex;
use std::f32::consts::PI;

/// Produces a time-stretched, a pitch-shifted and a noisy copy of a recording.
#[derive(Clone, Debug, serde::Serialize)]
pub struct Augmentor {
    pub stretch_rate: f32,
    pub pitch_steps: f32,
    pub noise_amplitude: f32,
    #[serde(skip)]
    frame: FrameConfig,
}

impl Default for Augmentor {
    fn default() -> Self {
        Self {
            stretch_rate: 1.2,
            pitch_steps: 4.0,
            noise_amplitude: 0.005,
            frame: FrameConfig::default(),
        }
    }
}

impl Augmentor {
    /// Returns `[stretched, shifted, noisy]`.
    pub fn augment<R: Rng + ?Sized>(&self, audio: &AudioBuffer, rng: &mut R) -> Result<[AudioBuffer; 3]> {
        Ok([
            self.time_stretch(audio, self.stretch_rate),
            self.pitch_shift(audio, self.pitch_steps)?,
            self.add_noise(audio, rng),
        ])
    }

    /// Changes duration by `1 / rate` without changing pitch.
    pub fn time_stretch(&self, audio: &AudioBuffer, rate: f32) -> AudioBuffer {
        let spectrum = spectral::stft(&audio.samples, self.frame);
        let stretched = phase_vocoder(&spectrum, rate, self.frame.hop_length);
        let length = (audio.len() as f32 / rate).round() as usize;
        AudioBuffer::new(
            spectral::istft(&stretched, self.frame, length),
            audio.sample_rate,
        )
    }

    /// Shifts pitch by `n_steps` semitones without changing duration.
    pub fn pitch_shift(&self, audio: &AudioBuffer, n_steps: f32) -> Result<AudioBuffer> {
        let rate = 2f32.powf(-n_steps / 12.0);
        let stretched = self.time_stretch(audio, rate);
        let sample_rate = audio.sample_rate as f64;
        let mut samples = resample_buffer(&stretched.samples, sample_rate / rate as f64, sample_rate)?;
        samples.resize(audio.len(), 0.0);
        Ok(AudioBuffer::new(samples, audio.sample_rate))
    }

    /// Adds white Gaussian noise scaled by `noise_amplitude`.
    pub fn add_noise<R: Rng + ?Sized>(&self, audio: &AudioBuffer, rng: &mut R) -> AudioBuffer {
        let samples = audio
            .samples
            .iter()
            .map(|s| {
                let noise: f32 = rng.sample(StandardNormal);
                s + self.noise_amplitude * noise
            })
            .collect();
        AudioBuffer::new(samples, audio.sample_rate)
    }
}

/// Resamples STFT frames at step `rate`, interpolating magnitudes and
/// accumulating phase so partials stay coherent.
fn phase_vocoder(spectrum: &Array2<Complex<f32>>, rate: f32, hop_length: usize) -> Array2<Complex<f32>> {
    let (freq_bins, num_frames) = spectrum.dim();
    let n_fft = 2 * (freq_bins - 1);
    let steps: Vec<f32> = (0..)
        .map(|i| i as f32 * rate)
        .take_while(|&t| t < num_frames as f32)
        .collect();

    let column = |t: usize, k: usize| {
        if t < num_frames {
            spectrum[[k, t]]
        } else {
            Complex::new(0.0, 0.0)
        }
    };

    let phase_advance: Vec<f32> = (0..freq_bins)
        .map(|k| 2.0 * PI * hop_length as f32 * k as f32 / n_fft as f32)
        .collect();
    let mut phase: Vec<f32> = (0..freq_bins).map(|k| column(0, k).arg()).collect();
    let mut out = Array2::<Complex<f32>>::zeros((freq_bins, steps.len()));

    for (t, &step) in steps.iter().enumerate() {
        let left = step.floor() as usize;
        let alpha = step.fract();
        for k in 0..freq_bins {
            let (c0, c1) = (column(left, k), column(left + 1, k));
            let mag = (1.0 - alpha) * c0.norm() + alpha * c1.norm();
            out[[k, t]] = Complex::from_polar(mag, phase[k]);

            let mut dphase = c1.arg() - c0.arg() - phase_advance[k];
            dphase -= 2.0 * PI * (dphase / (2.0 * PI)).round();
            phase[k] += phase_advance[k] + dphase;
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn tone(freq: f32, sample_rate: u32, len: usize) -> AudioBuffer {
        let samples = (0..len)
            .map(|i| 0.5 * (2.0 * PI * freq * i as f32 / sample_rate as f32).sin())
            .collect();
        AudioBuffer::new(samples, sample_rate)
    }

    fn zero_crossings(samples: &[f32]) -> usize {
        samples
            .windows(2)
            .filter(|w| (w[0] < 0.0) != (w[1] < 0.0))
            .count()
    }

    #[test]
    fn time_stretch_shortens_by_rate() {
        let augmentor = Augmentor::default();
        let audio = tone(440.0, 22050, 22050);
        let stretched = augmentor.time_stretch(&audio, 1.2);
        assert_eq!(stretched.len(), (22050.0f32 / 1.2).round() as usize);
        assert_eq!(stretched.sample_rate, 22050);
    }

    #[test]
    fn pitch_shift_keeps_length_and_raises_frequency() {
        let augmentor = Augmentor::default();
        let audio = tone(440.0, 22050, 22050);
        let shifted = augmentor.pitch_shift(&audio, 4.0).unwrap();

        assert_eq!(shifted.len(), audio.len());
        // Four semitones up is a ratio of about 1.26
        let ratio = zero_crossings(&shifted.samples[2048..20000]) as f32
            / zero_crossings(&audio.samples[2048..20000]) as f32;
        assert!((ratio - 1.26).abs() < 0.1, "ratio {ratio}");
    }

    #[test]
    fn noise_is_seeded_and_small() {
        let augmentor = Augmentor::default();
        let audio = AudioBuffer::new(vec![0.0; 1000], 22050);

        let a = augmentor.add_noise(&audio, &mut StdRng::seed_from_u64(9));
        let b = augmentor.add_noise(&audio, &mut StdRng::seed_from_u64(9));

        assert_eq!(a, b);
        assert!(a.samples.iter().any(|&s| s != 0.0));
        assert!(a.samples.iter().all(|s| s.abs() < 0.05));
    }

    #[test]
    fn augment_returns_three_copies() {
        let augmentor = Augmentor::default();
        let audio = tone(220.0, 22050, 11025);
        let copies = augmentor
            .augment(&audio, &mut StdRng::seed_from_u64(1))
            .unwrap();
        assert_eq!(copies.len(), 3);
        assert!(copies[0].len() < audio.len());
        assert_eq!(copies[1].len(), audio.len());
        assert_eq!(copies[2].len(), audio.len());
    }
}
