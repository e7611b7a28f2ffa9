//! Audio loading: WAV decoding, mono downmix and resampling.

use crate::error::{AudioError, Result};
use hound::{SampleFormat, WavReader};
use rubato::Resampler;
use rubato::{SincFixedIn, SincInterpolationParameters, SincInterpolationType};
use std::path::Path;

/// Sample rate recordings are loaded at for augmentation.
pub const DEFAULT_SAMPLE_RATE: u32 = 22050;

/// A mono waveform and its sample rate.
#[derive(Clone, Debug, PartialEq)]
pub struct AudioBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_secs(&self) -> f32 {
        self.samples.len() as f32 / self.sample_rate as f32
    }
}

/// Decodes a WAV file to mono `f32` samples in `[-1, 1]` at its native rate.
pub fn read_audio(path: &Path) -> Result<AudioBuffer> {
    let decode_err = |source| AudioError::Decode {
        path: path.to_path_buf(),
        source,
    };

    let mut reader = WavReader::open(path).map_err(|e| match e {
        hound::Error::IoError(source) => AudioError::Io {
            path: path.to_path_buf(),
            source,
        },
        other => decode_err(other),
    })?;
    let spec = reader.spec();

    if spec.channels == 0 {
        return Err(AudioError::InvalidChannels(spec.channels).into());
    }

    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<hound::Result<_>>()
            .map_err(decode_err)?,
        SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.clamp(1, 32) - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|s| s as f32 / scale))
                .collect::<hound::Result<_>>()
                .map_err(decode_err)?
        }
    };

    let channels = spec.channels as usize;
    let samples: Vec<f32> = if channels == 1 {
        interleaved
    } else {
        // Average to mono
        interleaved
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    };

    if samples.is_empty() {
        return Err(AudioError::Empty(path.to_path_buf()).into());
    }

    Ok(AudioBuffer::new(samples, spec.sample_rate))
}

/// Decodes a WAV file and resamples it to `target_rate` when one is given.
pub fn load_audio(path: &Path, target_rate: Option<u32>) -> Result<AudioBuffer> {
    let audio = read_audio(path)?;
    match target_rate {
        Some(rate) if rate != audio.sample_rate => {
            let samples = resample_buffer(&audio.samples, audio.sample_rate as f64, rate as f64)?;
            Ok(AudioBuffer::new(samples, rate))
        }
        _ => Ok(audio),
    }
}

/// Resamples a mono buffer with band-limited sinc interpolation.
///
/// The output length is `round(len * dest_sr / source_sr)`.
pub fn resample_buffer(buffer: &[f32], source_sr: f64, dest_sr: f64) -> Result<Vec<f32>> {
    if buffer.is_empty() || source_sr == dest_sr {
        return Ok(buffer.to_vec());
    }

    let max_resample_ratio_relative: f64 = 10.0;
    let chunk_size = 2048;
    let num_channels = 1;

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 160,
        window: rubato::WindowFunction::BlackmanHarris2,
    };

    let ratio = dest_sr / source_sr;
    let mut resampler = SincFixedIn::<f32>::new(
        ratio,
        max_resample_ratio_relative,
        params,
        chunk_size,
        num_channels,
    )?;

    let expected_len = (buffer.len() as f64 * ratio).round() as usize;
    let delay = resampler.output_delay();
    let mut resampled: Vec<f32> = Vec::with_capacity(expected_len + delay);
    let mut output_buffer = vec![vec![0.0f32; resampler.output_frames_max()]];

    let mut input_offset = 0;
    while buffer.len() - input_offset >= resampler.input_frames_next() {
        let input = [&buffer[input_offset..]];
        let (input_frames, output_frames) =
            resampler.process_into_buffer(&input[..], &mut output_buffer[..], None)?;
        resampled.extend_from_slice(&output_buffer[0][..output_frames]);
        input_offset += input_frames;
    }

    // Remaining samples, then silence until the filter delay has drained
    if input_offset < buffer.len() {
        let input = [&buffer[input_offset..]];
        let (_, output_frames) =
            resampler.process_partial_into_buffer(Some(&input[..]), &mut output_buffer[..], None)?;
        resampled.extend_from_slice(&output_buffer[0][..output_frames]);
    }
    while resampled.len() < expected_len + delay {
        let (_, output_frames) = resampler.process_partial_into_buffer(
            None::<&[&[f32]]>,
            &mut output_buffer[..],
            None,
        )?;
        if output_frames == 0 {
            break;
        }
        resampled.extend_from_slice(&output_buffer[0][..output_frames]);
    }

    let mut samples: Vec<f32> = resampled.into_iter().skip(delay).collect();
    samples.resize(expected_len, 0.0);
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::{WavSpec, WavWriter};
    use std::path::PathBuf;

    fn temp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("speaker-id-audio-tests");
        std::fs::create_dir_all(&dir).unwrap();
        dir.join(name)
    }

    fn create_test_wav(path: &Path, sample_rate: u32, channels: u16, samples: &[f32]) {
        let spec = WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(path, spec).unwrap();
        for &sample in samples {
            writer.write_sample((sample * 32767.0) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn reads_mono() {
        let path = temp_path("mono.wav");
        let test_samples = [0.1, 0.2, -0.3];
        create_test_wav(&path, 16000, 1, &test_samples);

        let audio = read_audio(&path).unwrap();

        assert_eq!(audio.sample_rate, 16000);
        for (expected, actual) in test_samples.iter().zip(audio.samples.iter()) {
            assert!((expected - actual).abs() < 0.01);
        }
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn averages_stereo_to_mono() {
        let path = temp_path("stereo.wav");
        create_test_wav(&path, 22050, 2, &[0.2, 0.4, 0.6, 0.8]);

        let audio = read_audio(&path).unwrap();

        assert_eq!(audio.len(), 2);
        assert!((audio.samples[0] - 0.3).abs() < 0.01);
        assert!((audio.samples[1] - 0.7).abs() < 0.01);
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn reads_float_wav() {
        let path = temp_path("float.wav");
        let spec = WavSpec {
            channels: 1,
            sample_rate: 8000,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        let mut writer = WavWriter::create(&path, spec).unwrap();
        for s in [0.5f32, -0.25] {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();

        let audio = read_audio(&path).unwrap();
        assert_eq!(audio.samples, vec![0.5, -0.25]);
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn missing_file_is_io_error() {
        let result = read_audio(Path::new("/definitely/not/here.wav"));
        assert!(matches!(
            result,
            Err(crate::error::Error::Audio(AudioError::Io { .. }))
        ));
    }

    #[test]
    fn garbage_is_decode_error() {
        let path = temp_path("garbage.wav");
        std::fs::write(&path, b"this is not a riff file").unwrap();

        let result = read_audio(&path);

        assert!(matches!(
            result,
            Err(crate::error::Error::Audio(AudioError::Decode { .. }))
        ));
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn empty_wav_is_rejected() {
        let path = temp_path("empty.wav");
        create_test_wav(&path, 16000, 1, &[]);

        let result = read_audio(&path);

        assert!(matches!(
            result,
            Err(crate::error::Error::Audio(AudioError::Empty(_)))
        ));
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn resample_preserves_duration_and_tone() {
        let source_sr = 48000.0;
        let samples: Vec<f32> = (0..48000)
            .map(|i| (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 48000.0).sin() * 0.5)
            .collect();

        let resampled = resample_buffer(&samples, source_sr, 22050.0).unwrap();

        assert_eq!(resampled.len(), 22050);
        let peak = resampled[2000..20000]
            .iter()
            .fold(0.0f32, |acc, s| acc.max(s.abs()));
        assert!((peak - 0.5).abs() < 0.05, "peak {peak}");
    }

    #[test]
    fn load_audio_resamples_to_target() {
        let path = temp_path("resample.wav");
        create_test_wav(&path, 16000, 1, &vec![0.1; 8000]);

        let audio = load_audio(&path, Some(DEFAULT_SAMPLE_RATE)).unwrap();

        assert_eq!(audio.sample_rate, DEFAULT_SAMPLE_RATE);
        assert_eq!(audio.len(), 11025);
        std::fs::remove_file(path).ok();
    }
}
