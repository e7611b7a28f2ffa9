//! Short-time spectral analysis shared by the feature descriptors.
//!
//! Spectrograms are laid out as `(frequency_bins, frames)`. Frames are centered:
//! the signal is zero-padded by `n_fft / 2` on both sides before framing.

use ndarray::{Array1, Array2, ArrayView2, Axis};
use rustfft::{num_complex::Complex, FftPlanner};
use std::f32::consts::PI;

/// Smallest positive normal `f32`, below which magnitudes count as zero.
const TINY: f32 = f32::MIN_POSITIVE;

/// Frame parameters for STFT-based analysis.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
pub struct FrameConfig {
    pub n_fft: usize,
    pub hop_length: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            n_fft: 2048,
            hop_length: 512,
        }
    }
}

impl FrameConfig {
    pub fn freq_bins(&self) -> usize {
        self.n_fft / 2 + 1
    }
}

/// Periodic Hann window.
pub fn hann_window(length: usize) -> Vec<f32> {
    (0..length)
        .map(|i| 0.5 - 0.5 * ((2.0 * PI * i as f32) / length as f32).cos())
        .collect()
}

/// Complex STFT of a centered, zero-padded signal.
pub fn stft(signal: &[f32], config: FrameConfig) -> Array2<Complex<f32>> {
    let n_fft = config.n_fft;
    let pad = n_fft / 2;
    let mut padded = vec![0.0f32; signal.len() + 2 * pad];
    padded[pad..pad + signal.len()].copy_from_slice(signal);

    let window = hann_window(n_fft);
    let num_frames = 1 + (padded.len() - n_fft) / config.hop_length;
    let freq_bins = config.freq_bins();
    let mut spectrogram = Array2::<Complex<f32>>::zeros((freq_bins, num_frames));

    let mut planner = FftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(n_fft);
    let mut frame = vec![Complex::new(0.0, 0.0); n_fft];

    for frame_idx in 0..num_frames {
        let start = frame_idx * config.hop_length;
        for (i, slot) in frame.iter_mut().enumerate() {
            *slot = Complex::new(padded[start + i] * window[i], 0.0);
        }

        fft.process(&mut frame);

        for k in 0..freq_bins {
            spectrogram[[k, frame_idx]] = frame[k];
        }
    }

    spectrogram
}

/// Inverse STFT by weighted overlap-add, trimmed or padded to `length` samples.
pub fn istft(spectrogram: &Array2<Complex<f32>>, config: FrameConfig, length: usize) -> Vec<f32> {
    let n_fft = config.n_fft;
    let hop = config.hop_length;
    let (freq_bins, num_frames) = spectrogram.dim();
    let window = hann_window(n_fft);

    let total = n_fft + hop * num_frames.saturating_sub(1);
    let mut output = vec![0.0f32; total];
    let mut window_sum = vec![0.0f32; total];

    let mut planner = FftPlanner::<f32>::new();
    let ifft = planner.plan_fft_inverse(n_fft);
    let mut frame = vec![Complex::new(0.0, 0.0); n_fft];

    for frame_idx in 0..num_frames {
        // Rebuild the full Hermitian spectrum from the one-sided bins
        for k in 0..n_fft {
            frame[k] = if k < freq_bins {
                spectrogram[[k, frame_idx]]
            } else {
                spectrogram[[n_fft - k, frame_idx]].conj()
            };
        }
        frame[0].im = 0.0;
        if n_fft % 2 == 0 {
            frame[n_fft / 2].im = 0.0;
        }

        ifft.process(&mut frame);

        let start = frame_idx * hop;
        for i in 0..n_fft {
            output[start + i] += frame[i].re / n_fft as f32 * window[i];
            window_sum[start + i] += window[i] * window[i];
        }
    }

    for (sample, norm) in output.iter_mut().zip(window_sum.iter()) {
        if *norm > TINY {
            *sample /= norm;
        }
    }

    let mut signal: Vec<f32> = output.into_iter().skip(n_fft / 2).take(length).collect();
    signal.resize(length, 0.0);
    signal
}

pub fn magnitude(spectrogram: &Array2<Complex<f32>>) -> Array2<f32> {
    spectrogram.mapv(|c| c.norm())
}

/// Center frequency of each one-sided FFT bin.
pub fn fft_frequencies(sample_rate: u32, n_fft: usize) -> Array1<f32> {
    let bins = n_fft / 2 + 1;
    Array1::from_iter((0..bins).map(|k| k as f32 * sample_rate as f32 / n_fft as f32))
}

/// Convert Hz to the Slaney mel scale (linear below 1kHz, logarithmic above).
pub fn hz_to_mel(freq: f32) -> f32 {
    let f_sp = 200.0 / 3.0;
    let min_log_hz = 1000.0;
    let min_log_mel = min_log_hz / f_sp;
    let logstep = 6.4f32.ln() / 27.0;

    if freq >= min_log_hz {
        min_log_mel + (freq / min_log_hz).ln() / logstep
    } else {
        freq / f_sp
    }
}

/// Convert the Slaney mel scale back to Hz.
pub fn mel_to_hz(mel: f32) -> f32 {
    let f_sp = 200.0 / 3.0;
    let min_log_hz = 1000.0;
    let min_log_mel = min_log_hz / f_sp;
    let logstep = 6.4f32.ln() / 27.0;

    if mel >= min_log_mel {
        min_log_hz * (logstep * (mel - min_log_mel)).exp()
    } else {
        mel * f_sp
    }
}

/// Slaney-normalized triangular mel filterbank, shape `(n_mels, n_fft / 2 + 1)`.
pub fn mel_filterbank(sample_rate: u32, n_fft: usize, n_mels: usize, fmin: f32, fmax: f32) -> Array2<f32> {
    let fft_freqs = fft_frequencies(sample_rate, n_fft);
    let min_mel = hz_to_mel(fmin);
    let max_mel = hz_to_mel(fmax);

    let mel_points: Vec<f32> = (0..n_mels + 2)
        .map(|i| mel_to_hz(min_mel + (max_mel - min_mel) * i as f32 / (n_mels + 1) as f32))
        .collect();

    let mut filterbank = Array2::<f32>::zeros((n_mels, fft_freqs.len()));
    for mel_idx in 0..n_mels {
        let left = mel_points[mel_idx];
        let center = mel_points[mel_idx + 1];
        let right = mel_points[mel_idx + 2];
        let enorm = 2.0 / (right - left);

        for (freq_idx, &freq) in fft_freqs.iter().enumerate() {
            let lower = (freq - left) / (center - left);
            let upper = (right - freq) / (right - center);
            filterbank[[mel_idx, freq_idx]] = lower.min(upper).max(0.0) * enorm;
        }
    }

    filterbank
}

/// Chroma filterbank mapping FFT bins onto 12 pitch classes starting at C.
///
/// Each bin contributes a Gaussian bump around its fractional pitch class,
/// weighted by a Gaussian over octaves centered on octave 5.
pub fn chroma_filterbank(sample_rate: u32, n_fft: usize, n_chroma: usize) -> Array2<f32> {
    let ctroct = 5.0f32;
    let octwidth = 2.0f32;
    let n_chroma_f = n_chroma as f32;

    // Pitch (in chroma bins) of every FFT bin except DC; DC is placed 1.5 octaves below bin 1
    let mut frqbins: Vec<f32> = (1..n_fft)
        .map(|k| {
            let freq = k as f32 * sample_rate as f32 / n_fft as f32;
            n_chroma_f * (freq / (440.0 / 16.0)).log2()
        })
        .collect();
    frqbins.insert(0, frqbins[0] - 1.5 * n_chroma_f);

    let mut binwidth: Vec<f32> = frqbins.windows(2).map(|w| (w[1] - w[0]).max(1.0)).collect();
    binwidth.push(1.0);

    let half = (n_chroma_f / 2.0).round();
    let mut weights = Array2::<f32>::zeros((n_chroma, n_fft));
    for (col, (&bin, &width)) in frqbins.iter().zip(binwidth.iter()).enumerate() {
        for row in 0..n_chroma {
            let d = (bin - row as f32 + half + 10.0 * n_chroma_f).rem_euclid(n_chroma_f) - half;
            weights[[row, col]] = (-0.5 * (2.0 * d / width).powi(2)).exp();
        }
    }

    // Unit L2 norm per FFT bin, then octave weighting
    for (col, mut column) in weights.axis_iter_mut(Axis(1)).enumerate() {
        let norm = column.iter().map(|w| w * w).sum::<f32>().sqrt();
        if norm > TINY {
            column.mapv_inplace(|w| w / norm);
        }
        let octave = frqbins[col] / n_chroma_f;
        let octave_weight = (-0.5 * ((octave - ctroct) / octwidth).powi(2)).exp();
        column.mapv_inplace(|w| w * octave_weight);
    }

    // Rotate so that row 0 is C rather than A
    let shift = 3 * (n_chroma / 12);
    let mut rotated = Array2::<f32>::zeros((n_chroma, n_fft / 2 + 1));
    for row in 0..n_chroma {
        let source = (row + shift) % n_chroma;
        for col in 0..=n_fft / 2 {
            rotated[[row, col]] = weights[[source, col]];
        }
    }
    rotated
}

/// Orthonormal DCT-II basis, shape `(n_out, n_in)`.
pub fn dct_matrix(n_out: usize, n_in: usize) -> Array2<f32> {
    let n = n_in as f32;
    Array2::from_shape_fn((n_out, n_in), |(k, i)| {
        let scale = if k == 0 { (1.0 / n).sqrt() } else { (2.0 / n).sqrt() };
        scale * (PI * k as f32 * (2.0 * i as f32 + 1.0) / (2.0 * n)).cos()
    })
}

/// Power spectrogram to decibels relative to 1.0, optionally floored `top_db` below the peak.
pub fn power_to_db(power: ArrayView2<f32>, amin: f32, top_db: Option<f32>) -> Array2<f32> {
    let mut db = power.mapv(|p| 10.0 * p.max(amin).log10());
    if let Some(top_db) = top_db {
        let peak = db.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        db.mapv_inplace(|v| v.max(peak - top_db));
    }
    db
}

/// Scales each column to unit max-abs (`Inf` norm) or unit sum-abs (`L1` norm).
pub fn normalize_columns(data: &mut Array2<f32>, norm: ColumnNorm) {
    for mut column in data.axis_iter_mut(Axis(1)) {
        let length = match norm {
            ColumnNorm::Inf => column.iter().fold(0.0f32, |acc, v| acc.max(v.abs())),
            ColumnNorm::L1 => column.iter().map(|v| v.abs()).sum(),
        };
        if length > TINY {
            column.mapv_inplace(|v| v / length);
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub enum ColumnNorm {
    Inf,
    L1,
}

/// Arithmetic mean of each row over time (axis 1).
pub fn time_mean(data: &Array2<f32>) -> Vec<f32> {
    match data.mean_axis(Axis(1)) {
        Some(mean) => mean.to_vec(),
        None => vec![0.0; data.nrows()],
    }
}

/// Splits a complex spectrogram into its harmonic part with median-filter HPSS.
///
/// Harmonic energy is smooth along time, percussive energy along frequency.
/// The harmonic soft mask is `H^2 / (H^2 + (margin * P)^2)`.
pub fn harmonic_spectrogram(
    spectrogram: &Array2<Complex<f32>>,
    kernel_size: usize,
    margin: f32,
) -> Array2<Complex<f32>> {
    let mag = magnitude(spectrogram);
    let harmonic = median_filter(mag.view(), Axis(1), kernel_size);
    let percussive = median_filter(mag.view(), Axis(0), kernel_size);

    let split_zeros = margin == 1.0;
    let mut out = spectrogram.clone();
    ndarray::Zip::from(&mut out)
        .and(&harmonic)
        .and(&percussive)
        .for_each(|value, &h, &p| {
            *value *= softmask(h, p * margin, 2.0, split_zeros);
        });
    out
}

fn softmask(x: f32, x_ref: f32, power: f32, split_zeros: bool) -> f32 {
    let z = x.max(x_ref);
    if z < TINY {
        return if split_zeros { 0.5 } else { 0.0 };
    }
    let a = (x / z).powf(power);
    let b = (x_ref / z).powf(power);
    a / (a + b)
}

/// Median filter along one axis with half-sample symmetric (`reflect`) boundaries.
pub fn median_filter(data: ArrayView2<f32>, axis: Axis, kernel_size: usize) -> Array2<f32> {
    let half = kernel_size as isize / 2;
    let mut out = Array2::<f32>::zeros(data.raw_dim());
    let mut window = Vec::with_capacity(kernel_size);

    for (lane_in, mut lane_out) in data.lanes(axis).into_iter().zip(out.lanes_mut(axis)) {
        let n = lane_in.len();
        for i in 0..n {
            window.clear();
            for offset in -half..=half {
                window.push(lane_in[reflect_index(i as isize + offset, n)]);
            }
            let mid = window.len() / 2;
            let (_, median, _) = window.select_nth_unstable_by(mid, f32::total_cmp);
            lane_out[i] = *median;
        }
    }
    out
}

fn reflect_index(index: isize, len: usize) -> usize {
    let period = 2 * len as isize;
    let m = index.rem_euclid(period);
    if m >= len as isize {
        (period - 1 - m) as usize
    } else {
        m as usize
    }
}
