use crate::audio::{self, AudioBuffer};
use crate::error::{ConfigError, FeatureError, Result};
use crate::feature::FeatureVector;
use crate::spectral::{self, ColumnNorm, FrameConfig};
use ndarray::{Array1, Array2};
use rustfft::num_complex::Complex;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::cell::OnceCell;
use std::sync::{Arc, Mutex, PoisonError};

pub const N_MFCC: usize = 40;
pub const N_CHROMA: usize = 12;
pub const N_MELS: usize = 128;
pub const N_CONTRAST_BANDS: usize = 6;
pub const N_TONNETZ: usize = 6;

const AMIN: f32 = 1e-10;
const TOP_DB: f32 = 80.0;
const CONTRAST_FMIN: f32 = 200.0;
const CONTRAST_QUANTILE: f32 = 0.02;
const ZCR_THRESHOLD: f32 = 1e-10;
const HPSS_KERNEL: usize = 31;
const HPSS_MARGIN: f32 = 1.0;

/// One time-averaged descriptor group. Variants are listed in the order their
/// values appear in a feature vector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Descriptor {
    Mfcc,
    Chroma,
    Mel,
    ZeroCrossingRate,
    SpectralContrast,
    Tonnetz,
}

impl Descriptor {
    pub const ALL: [Descriptor; 6] = [
        Descriptor::Mfcc,
        Descriptor::Chroma,
        Descriptor::Mel,
        Descriptor::ZeroCrossingRate,
        Descriptor::SpectralContrast,
        Descriptor::Tonnetz,
    ];

    /// Number of values this descriptor contributes.
    pub fn channels(self) -> usize {
        match self {
            Descriptor::Mfcc => N_MFCC,
            Descriptor::Chroma => N_CHROMA,
            Descriptor::Mel => N_MELS,
            Descriptor::ZeroCrossingRate => 1,
            Descriptor::SpectralContrast => N_CONTRAST_BANDS + 1,
            Descriptor::Tonnetz => N_TONNETZ,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Descriptor::Mfcc => "mfcc",
            Descriptor::Chroma => "chroma",
            Descriptor::Mel => "mel",
            Descriptor::ZeroCrossingRate => "zcr",
            Descriptor::SpectralContrast => "contrast",
            Descriptor::Tonnetz => "tonnetz",
        }
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Descriptor {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Descriptor::ALL
            .into_iter()
            .find(|d| d.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ConfigError::UnknownDescriptor(s.to_string()))
    }
}

/// Which descriptor groups to compute.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
pub struct DescriptorSet {
    pub mfcc: bool,
    pub chroma: bool,
    pub mel: bool,
    pub zcr: bool,
    pub contrast: bool,
    pub tonnetz: bool,
}

impl DescriptorSet {
    pub const fn all() -> Self {
        Self {
            mfcc: true,
            chroma: true,
            mel: true,
            zcr: true,
            contrast: true,
            tonnetz: true,
        }
    }

    pub const fn none() -> Self {
        Self {
            mfcc: false,
            chroma: false,
            mel: false,
            zcr: false,
            contrast: false,
            tonnetz: false,
        }
    }

    pub fn contains(&self, descriptor: Descriptor) -> bool {
        match descriptor {
            Descriptor::Mfcc => self.mfcc,
            Descriptor::Chroma => self.chroma,
            Descriptor::Mel => self.mel,
            Descriptor::ZeroCrossingRate => self.zcr,
            Descriptor::SpectralContrast => self.contrast,
            Descriptor::Tonnetz => self.tonnetz,
        }
    }

    pub fn with(mut self, descriptor: Descriptor) -> Self {
        match descriptor {
            Descriptor::Mfcc => self.mfcc = true,
            Descriptor::Chroma => self.chroma = true,
            Descriptor::Mel => self.mel = true,
            Descriptor::ZeroCrossingRate => self.zcr = true,
            Descriptor::SpectralContrast => self.contrast = true,
            Descriptor::Tonnetz => self.tonnetz = true,
        }
        self
    }

    /// Enabled descriptors in canonical order.
    pub fn enabled(&self) -> impl Iterator<Item = Descriptor> + '_ {
        Descriptor::ALL.into_iter().filter(|d| self.contains(*d))
    }

    /// Length of the feature vector this set produces.
    pub fn dimensions(&self) -> usize {
        self.enabled().map(Descriptor::channels).sum()
    }
}

impl Default for DescriptorSet {
    fn default() -> Self {
        Self::all()
    }
}

impl FromStr for DescriptorSet {
    type Err = ConfigError;

    /// Parses a comma-separated list such as `mfcc,chroma,zcr`, or `all`.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("all") {
            return Ok(Self::all());
        }
        s.split(',')
            .filter(|part| !part.trim().is_empty())
            .try_fold(Self::none(), |set, part| Ok(set.with(part.parse()?)))
    }
}

/// Filterbanks depend only on the sample rate, so they are built once per rate.
struct Filterbanks {
    mel: Array2<f32>,
    chroma: Array2<f32>,
    dct: Array2<f32>,
    freqs: Array1<f32>,
}

impl Filterbanks {
    fn new(sample_rate: u32, frame: FrameConfig) -> Self {
        Self {
            mel: spectral::mel_filterbank(
                sample_rate,
                frame.n_fft,
                N_MELS,
                0.0,
                sample_rate as f32 / 2.0,
            ),
            chroma: spectral::chroma_filterbank(sample_rate, frame.n_fft, N_CHROMA),
            dct: spectral::dct_matrix(N_MFCC, N_MELS),
            freqs: spectral::fft_frequencies(sample_rate, frame.n_fft),
        }
    }
}

/// Computes time-averaged spectral and temporal descriptors of a recording.
pub struct FeatureExtractor {
    frame: FrameConfig,
    sample_rate: Option<u32>,
    filterbanks: Mutex<HashMap<u32, Arc<Filterbanks>>>,
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new(None)
    }
}

impl FeatureExtractor {
    /// `sample_rate` is the rate files are resampled to; `None` keeps each file's own rate.
    pub fn new(sample_rate: Option<u32>) -> Self {
        Self {
            frame: FrameConfig::default(),
            sample_rate,
            filterbanks: Mutex::new(HashMap::new()),
        }
    }

    pub fn sample_rate(&self) -> Option<u32> {
        self.sample_rate
    }

    pub fn frame_config(&self) -> FrameConfig {
        self.frame
    }

    /// Reads `path` and extracts the enabled descriptors.
    pub fn extract_file(&self, path: &Path, descriptors: &DescriptorSet) -> Result<FeatureVector> {
        let audio = audio::load_audio(path, self.sample_rate)?;
        self.extract(&audio, descriptors)
    }

    /// Extracts the enabled descriptors from an in-memory waveform.
    pub fn extract(&self, audio: &AudioBuffer, descriptors: &DescriptorSet) -> Result<FeatureVector> {
        if audio.is_empty() {
            return Err(FeatureError::EmptySignal.into());
        }
        let samples = &audio.samples;
        let sample_rate = audio.sample_rate;
        let banks = self.filterbanks(sample_rate);
        let spectra = Spectra::new(samples, self.frame, &banks);

        let mut result = Vec::with_capacity(descriptors.dimensions());
        for descriptor in descriptors.enabled() {
            let values = match descriptor {
                Descriptor::Mfcc => mfcc(spectra.mel_power(), &banks),
                Descriptor::Chroma => chroma(spectra.magnitude(), &banks),
                Descriptor::Mel => spectral::time_mean(spectra.mel_power()),
                Descriptor::ZeroCrossingRate => zero_crossing_rate(samples, self.frame),
                Descriptor::SpectralContrast => {
                    spectral_contrast(spectra.magnitude(), &banks, sample_rate)?
                }
                Descriptor::Tonnetz => self.tonnetz(spectra.spectrum(), samples.len(), &banks),
            };
            result.extend(values);
        }

        debug_assert_eq!(result.len(), descriptors.dimensions());
        Ok(FeatureVector::new(result))
    }

    fn filterbanks(&self, sample_rate: u32) -> Arc<Filterbanks> {
        let mut cache = self.filterbanks.lock().unwrap_or_else(PoisonError::into_inner);
        cache
            .entry(sample_rate)
            .or_insert_with(|| Arc::new(Filterbanks::new(sample_rate, self.frame)))
            .clone()
    }

    /// Tonal centroid of the harmonic component.
    ///
    /// Chroma comes from the STFT of the harmonic signal rather than a
    /// constant-Q transform, at A440 tuning.
    fn tonnetz(&self, spectrum: &Array2<Complex<f32>>, length: usize, banks: &Filterbanks) -> Vec<f32> {
        let harmonic_spec = spectral::harmonic_spectrogram(spectrum, HPSS_KERNEL, HPSS_MARGIN);
        let harmonic = spectral::istft(&harmonic_spec, self.frame, length);
        let magnitude = spectral::magnitude(&spectral::stft(&harmonic, self.frame));

        let mut chroma = chroma_frames(&magnitude, banks);
        spectral::normalize_columns(&mut chroma, ColumnNorm::L1);
        spectral::time_mean(&tonnetz_basis().dot(&chroma))
    }
}

/// Spectrogram stages shared between descriptors, each computed on first use.
struct Spectra<'a> {
    samples: &'a [f32],
    frame: FrameConfig,
    banks: &'a Filterbanks,
    spectrum: OnceCell<Array2<Complex<f32>>>,
    magnitude: OnceCell<Array2<f32>>,
    mel_power: OnceCell<Array2<f32>>,
}

impl<'a> Spectra<'a> {
    fn new(samples: &'a [f32], frame: FrameConfig, banks: &'a Filterbanks) -> Self {
        Self {
            samples,
            frame,
            banks,
            spectrum: OnceCell::new(),
            magnitude: OnceCell::new(),
            mel_power: OnceCell::new(),
        }
    }

    fn spectrum(&self) -> &Array2<Complex<f32>> {
        self.spectrum
            .get_or_init(|| spectral::stft(self.samples, self.frame))
    }

    fn magnitude(&self) -> &Array2<f32> {
        self.magnitude
            .get_or_init(|| spectral::magnitude(self.spectrum()))
    }

    fn mel_power(&self) -> &Array2<f32> {
        self.mel_power
            .get_or_init(|| self.banks.mel.dot(&self.magnitude().mapv(|m| m * m)))
    }
}

fn mfcc(mel_power: &Array2<f32>, banks: &Filterbanks) -> Vec<f32> {
    let log_mel = spectral::power_to_db(mel_power.view(), AMIN, Some(TOP_DB));
    spectral::time_mean(&banks.dct.dot(&log_mel))
}

fn chroma_frames(magnitude: &Array2<f32>, banks: &Filterbanks) -> Array2<f32> {
    let mut chroma = banks.chroma.dot(magnitude);
    spectral::normalize_columns(&mut chroma, ColumnNorm::Inf);
    chroma
}

/// STFT chroma with the filterbank fixed at A440; no tuning estimate is applied.
fn chroma(magnitude: &Array2<f32>, banks: &Filterbanks) -> Vec<f32> {
    spectral::time_mean(&chroma_frames(magnitude, banks))
}

/// Fraction of sign changes per frame, averaged over frames.
fn zero_crossing_rate(samples: &[f32], frame: FrameConfig) -> Vec<f32> {
    let frame_length = frame.n_fft;
    let pad = frame_length / 2;
    let first = samples[0];
    let last = samples[samples.len() - 1];

    // Edge padding, small values snapped to zero
    let padded: Vec<bool> = std::iter::repeat(first)
        .take(pad)
        .chain(samples.iter().copied())
        .chain(std::iter::repeat(last).take(pad))
        .map(|s| s.abs() > ZCR_THRESHOLD && s < 0.0)
        .collect();

    let num_frames = 1 + (padded.len() - frame_length) / frame.hop_length;
    let total: f32 = (0..num_frames)
        .map(|f| {
            let start = f * frame.hop_length;
            let crossings = padded[start..start + frame_length]
                .windows(2)
                .filter(|w| w[0] != w[1])
                .count();
            crossings as f32 / frame_length as f32
        })
        .sum();

    vec![total / num_frames as f32]
}

/// Peak-to-valley level difference in octave sub-bands.
fn spectral_contrast(magnitude: &Array2<f32>, banks: &Filterbanks, sample_rate: u32) -> Result<Vec<f32>> {
    let nyquist = sample_rate as f32 / 2.0;
    let mut octaves = vec![0.0f32; N_CONTRAST_BANDS + 2];
    for (k, edge) in octaves.iter_mut().enumerate().skip(1) {
        *edge = CONTRAST_FMIN * 2f32.powi(k as i32 - 1);
    }
    if let Some(&band_hz) = octaves[..N_CONTRAST_BANDS + 1].iter().find(|&&f| f >= nyquist) {
        return Err(FeatureError::BandExceedsNyquist {
            band_hz,
            nyquist_hz: nyquist,
        }
        .into());
    }

    let frames = magnitude.ncols();
    let mut peak = Array2::<f32>::zeros((N_CONTRAST_BANDS + 1, frames));
    let mut valley = Array2::<f32>::zeros((N_CONTRAST_BANDS + 1, frames));
    let freqs = &banks.freqs;

    for k in 0..=N_CONTRAST_BANDS {
        let (f_low, f_high) = (octaves[k], octaves[k + 1]);
        let in_band: Vec<usize> = (0..freqs.len())
            .filter(|&i| freqs[i] >= f_low && freqs[i] <= f_high)
            .collect();
        let (Some(&first), Some(&last)) = (in_band.first(), in_band.last()) else {
            continue;
        };

        // Lower bands borrow one bin below; the top band extends to Nyquist
        let lo = if k > 0 { first.saturating_sub(1) } else { first };
        let mut hi = if k == N_CONTRAST_BANDS { freqs.len() - 1 } else { last };
        let band_bins = hi - lo + 1;
        // The shared upper edge bin belongs to the next band
        if k < N_CONTRAST_BANDS && hi > lo {
            hi -= 1;
        }

        let rows = hi - lo + 1;
        let alpha = ((CONTRAST_QUANTILE * band_bins as f32).round_ties_even() as usize).clamp(1, rows);
        let mut column = Vec::with_capacity(rows);
        for t in 0..frames {
            column.clear();
            column.extend((lo..=hi).map(|i| magnitude[[i, t]]));
            column.sort_by(f32::total_cmp);
            valley[[k, t]] = column[..alpha].iter().sum::<f32>() / alpha as f32;
            peak[[k, t]] = column[rows - alpha..].iter().sum::<f32>() / alpha as f32;
        }
    }

    let contrast = spectral::power_to_db(peak.view(), AMIN, Some(TOP_DB))
        - spectral::power_to_db(valley.view(), AMIN, Some(TOP_DB));
    Ok(spectral::time_mean(&contrast))
}

/// Projection of 12 pitch classes onto the circles of fifths, minor thirds and major thirds.
fn tonnetz_basis() -> Array2<f32> {
    let scale = [7.0 / 6.0, 7.0 / 6.0, 1.5, 1.5, 2.0 / 3.0, 2.0 / 3.0];
    let radius = [1.0, 1.0, 1.0, 1.0, 0.5, 0.5];
    Array2::from_shape_fn((N_TONNETZ, N_CHROMA), |(row, pitch)| {
        let mut v: f32 = scale[row] * pitch as f32;
        // Even rows are the sine components
        if row % 2 == 0 {
            v -= 0.5;
        }
        radius[row] * (std::f32::consts::PI * v).cos()
    })
}

/// Mean of each descriptor block, for logging.
pub fn summarize(vector: &FeatureVector, descriptors: &DescriptorSet) -> Vec<(Descriptor, f32)> {
    let mut offset = 0;
    descriptors
        .enabled()
        .map(|d| {
            let block = &vector.as_slice()[offset..offset + d.channels()];
            offset += d.channels();
            let mean = Array1::from(block.to_vec()).mean().unwrap_or(0.0);
            (d, mean)
        })
        .collect()
}
