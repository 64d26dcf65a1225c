//! On-disk wavetable cache
//!
//! One mono 32-bit float WAV per rank and tuning below `<root>/waves`:
//!
//! ```text
//! waves/<division>_<rank>_<label>_<sample rate>_<temperament>_<pitch x10>.wav
//! ```

use std::path::{Path, PathBuf};

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use thiserror::Error;

use crate::engine::TABLE_SIZE;
use crate::instrument::Tuning;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Wave file {path:?}: {source}")]
    Wav {
        path: PathBuf,
        source: hound::Error,
    },

    #[error("Wave file {path:?} is not a {expected}-sample mono float table")]
    Format { path: PathBuf, expected: usize },
}

/// Location of one cached table
#[derive(Debug, Clone, Copy)]
pub struct TableKey<'a> {
    pub division: u8,
    pub rank: u8,
    pub label: &'a str,
    pub tuning: &'a Tuning,
    pub sample_rate: u32,
}

#[derive(Debug, Clone)]
pub struct WaveCache {
    dir: PathBuf,
}

impl WaveCache {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    pub fn path_for(&self, key: &TableKey) -> PathBuf {
        let label: String = key
            .label
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
            .collect();
        self.dir.join(format!(
            "{}_{}_{}_{}_{}_{}.wav",
            key.division,
            key.rank,
            label,
            key.sample_rate,
            key.tuning.temperament,
            (key.tuning.base_frequency * 10.0).round() as u32
        ))
    }

    /// Read a cached table; `Ok(None)` when nothing is cached yet
    pub fn load(&self, key: &TableKey) -> Result<Option<Vec<f32>>, CacheError> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        let wav_err = |source: hound::Error| CacheError::Wav {
            path: path.clone(),
            source,
        };
        let mut reader = WavReader::open(&path).map_err(wav_err)?;
        let spec = reader.spec();
        if spec.channels != 1
            || spec.sample_format != SampleFormat::Float
            || reader.len() as usize != TABLE_SIZE
        {
            return Err(CacheError::Format {
                path: path.clone(),
                expected: TABLE_SIZE,
            });
        }
        let samples = reader
            .samples::<f32>()
            .collect::<Result<Vec<_>, _>>()
            .map_err(wav_err)?;
        Ok(Some(samples))
    }

    pub fn store(&self, key: &TableKey, samples: &[f32]) -> Result<PathBuf, CacheError> {
        let path = self.path_for(key);
        let wav_err = |source: hound::Error| CacheError::Wav {
            path: path.clone(),
            source,
        };
        let spec = WavSpec {
            channels: 1,
            sample_rate: key.sample_rate,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        let mut writer = WavWriter::create(&path, spec).map_err(wav_err)?;
        for &sample in samples {
            writer.write_sample(sample).map_err(wav_err)?;
        }
        writer.finalize().map_err(wav_err)?;
        Ok(path)
    }
}
