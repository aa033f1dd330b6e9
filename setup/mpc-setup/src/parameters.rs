use crate::errors::{CeremonyError, Result};
use clap::{Args, ValueEnum};
use libs::group_structures::CurveKind;
use libs::{impl_read_from_json, impl_write_into_json};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;
use std::path::PathBuf;

pub const DEFAULT_BATCH_SIZE: usize = 256;
pub const DEFAULT_POWER: usize = 21;
pub const MAX_POWER: usize = 28;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ValueEnum, Default)]
#[serde(rename_all = "snake_case")]
pub enum ContributionMode {
    /// One file holds the whole accumulator.
    Full,
    /// The accumulator is split into chunk files of `chunk_size` exponents.
    #[default]
    Chunked,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ValueEnum, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProvingSystem {
    #[default]
    Groth16,
}

impl fmt::Display for ProvingSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProvingSystem::Groth16 => write!(f, "groth16"),
        }
    }
}

/// Shape of a powers-of-tau ceremony.
///
/// The accumulator holds `2^power - 1` tau powers in G1 and `2^power` tau
/// powers in G2 (and as many alpha/beta powers in G1). Chunk `i` covers the
/// exponents `[i * chunk_size, (i + 1) * chunk_size)` of every vector.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CeremonyParams {
    pub curve: CurveKind,
    pub power: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    pub chunk_size: usize,
    #[serde(default)]
    pub mode: ContributionMode,
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

impl_read_from_json!(CeremonyParams);
impl_write_into_json!(CeremonyParams);

impl CeremonyParams {
    pub fn new(
        curve: CurveKind,
        power: usize,
        chunk_size: usize,
        batch_size: usize,
        mode: ContributionMode,
    ) -> Result<Self> {
        let chunk_size = match mode {
            ContributionMode::Full => 1usize.checked_shl(power as u32).unwrap_or(0),
            ContributionMode::Chunked => chunk_size,
        };
        let params = Self { curve, power, batch_size, chunk_size, mode };
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<()> {
        if self.power == 0 || self.power > MAX_POWER {
            return Err(CeremonyError::mismatch("power", format!("1..={}", MAX_POWER), self.power));
        }
        if self.batch_size < 2 {
            return Err(CeremonyError::mismatch("batch size", ">= 2", self.batch_size));
        }
        if self.chunk_size == 0 {
            return Err(CeremonyError::mismatch("chunk size", ">= 1", self.chunk_size));
        }
        if self.mode == ContributionMode::Full && self.chunk_size != self.powers_length() {
            return Err(CeremonyError::mismatch("chunk size", self.powers_length(), self.chunk_size));
        }
        Ok(())
    }

    /// Length of the tau G2, alpha G1 and beta G1 vectors.
    pub fn powers_length(&self) -> usize {
        1 << self.power
    }

    /// Length of the tau G1 vector.
    pub fn powers_g1_length(&self) -> usize {
        (1 << self.power) - 1
    }

    pub fn num_chunks(&self) -> usize {
        self.powers_length().div_ceil(self.chunk_size)
    }

    /// Exponent window of `chunk_count` chunks starting at `first_chunk`.
    pub fn segment(&self, first_chunk: usize, chunk_count: usize) -> Result<Segment> {
        let chunks = self.num_chunks();
        if chunk_count == 0 || first_chunk >= chunks || chunk_count > chunks - first_chunk {
            return Err(CeremonyError::mismatch(
                "chunk index",
                format!("chunks within 0..{}", chunks),
                format!("{}..{}", first_chunk, first_chunk.saturating_add(chunk_count)),
            ));
        }
        let start = first_chunk * self.chunk_size;
        let end = ((first_chunk + chunk_count).saturating_mul(self.chunk_size)).min(self.powers_length());
        Ok(Segment {
            first_chunk,
            chunk_count,
            start,
            end,
            g1_end: end.min(self.powers_g1_length()),
        })
    }

    pub fn chunk(&self, chunk_index: usize) -> Result<Segment> {
        self.segment(chunk_index, 1)
    }

    /// The segment spanning the whole accumulator.
    pub fn full_segment(&self) -> Segment {
        let end = self.powers_length();
        Segment {
            first_chunk: 0,
            chunk_count: self.num_chunks(),
            start: 0,
            end,
            g1_end: self.powers_g1_length(),
        }
    }
}

/// Ceremony parameters as command-line flags. `--params` loads a JSON file
/// and takes precedence over the individual flags.
#[derive(Args, Clone, Debug)]
pub struct ParamArgs {
    #[arg(long, global = true, default_value = "bls12_381")]
    pub curve: CurveKind,
    #[arg(long, global = true, default_value_t = DEFAULT_POWER)]
    pub power: usize,
    #[arg(long, global = true, default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,
    #[arg(long, global = true, default_value_t = 1 << 16)]
    pub chunk_size: usize,
    #[arg(long, global = true, value_enum, default_value_t = ContributionMode::Chunked)]
    pub mode: ContributionMode,
    /// Chunk the command operates on.
    #[arg(long, global = true, default_value_t = 0)]
    pub chunk_index: usize,
    #[arg(long, global = true)]
    pub params: Option<PathBuf>,
}

impl ParamArgs {
    pub fn load(&self) -> Result<CeremonyParams> {
        match &self.params {
            Some(path) => {
                let params = CeremonyParams::read_from_json(path)?;
                params.validate()?;
                Ok(params)
            }
            None => CeremonyParams::new(self.curve, self.power, self.chunk_size, self.batch_size, self.mode),
        }
    }

    /// The segment `--chunk-index` selects, or the whole accumulator in full
    /// mode.
    pub fn segment(&self, params: &CeremonyParams) -> Result<Segment> {
        match params.mode {
            ContributionMode::Full => Ok(params.full_segment()),
            ContributionMode::Chunked => params.chunk(self.chunk_index),
        }
    }
}

/// Window of exponents covered by one file: a single chunk, a run of chunks
/// or the whole accumulator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Segment {
    pub first_chunk: usize,
    pub chunk_count: usize,
    /// First exponent.
    pub start: usize,
    /// One past the last exponent of the G2 / alpha / beta vectors.
    pub end: usize,
    /// One past the last exponent of the tau G1 vector.
    pub g1_end: usize,
}

impl Segment {
    pub fn tau_g1_len(&self) -> usize {
        self.g1_end.saturating_sub(self.start)
    }

    pub fn powers_len(&self) -> usize {
        self.end - self.start
    }

    pub fn tau_g1_range(&self) -> Range<usize> {
        self.start..self.start + self.tau_g1_len()
    }

    pub fn powers_range(&self) -> Range<usize> {
        self.start..self.end
    }

    /// Group elements stored in the four vectors of this segment.
    pub fn element_count(&self) -> usize {
        self.tau_g1_len() + 3 * self.powers_len()
    }

    pub fn contains_origin(&self) -> bool {
        self.start == 0
    }

    pub fn last_chunk(&self) -> usize {
        self.first_chunk + self.chunk_count - 1
    }

    pub fn is_full(&self, params: &CeremonyParams) -> bool {
        self.start == 0 && self.end == params.powers_length()
    }
}
