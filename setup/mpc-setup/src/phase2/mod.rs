//! Circuit-specific second phase for Groth16.
//!
//! [`specialize`](specialize::specialize) turns a finished powers-of-tau
//! transcript and an R1CS into a [`Phase2Accumulator`]. Its delta-independent
//! part, the [`Groth16Query`], is written once and never changes. The
//! elements divided by delta form the stream `H || L`, which is cut into chunk
//! files and goes through the same contribute / verify / combine cycle as the
//! first phase, each chunk carrying the current `delta * G1` and `delta * G2`.
use crate::codec::{ElementReader, ElementWriter};
use crate::errors::{CeremonyError, Result};
use crate::parameters::CeremonyParams;
use ark_ec::pairing::Pairing;
use ark_ec::{AffineRepr, CurveGroup};
use ark_serialize::Compress;
use libs::group_structures::{encoded_size, same_ratio};
use libs::iotools::Hash;
use std::io::{Read, Write};
use std::ops::Range;

pub mod chunk;
pub mod circuit;
pub mod combine;
pub mod contribute;
pub mod specialize;
pub mod verify;

pub use chunk::{read_parameters, read_query, Phase2Prelude, StreamReader, StreamWriter};
pub use circuit::{Circuit, R1cs};
pub use combine::{combine, export_vk, VerifyingKey};
pub use contribute::{contribute, contribute_with_key, finalize_with_beacon, turn_key, Phase2Summary};
pub use specialize::{prepare_phase2, specialize, Phase2Setup};
pub use verify::{verify, verify_and_transform, VerifiedStreamChunk};

/// Current `delta` in both groups.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Delta<E: Pairing> {
    pub g1: E::G1Affine,
    pub g2: E::G2Affine,
}

impl<E: Pairing> Delta<E> {
    pub fn one() -> Self {
        Self { g1: E::G1Affine::generator(), g2: E::G2Affine::generator() }
    }

    pub fn scale(&self, d: E::ScalarField) -> Self {
        Self { g1: (self.g1 * d).into_affine(), g2: (self.g2 * d).into_affine() }
    }

    /// Both halves hide the same scalar.
    pub fn is_consistent(&self) -> bool {
        same_ratio::<E>(E::G1Affine::generator(), self.g1, E::G2Affine::generator(), self.g2)
    }

    pub fn read<R: Read>(r: &mut ElementReader<R>) -> Result<Self> {
        Ok(Self { g1: r.read_element()?, g2: r.read_element()? })
    }

    pub fn write<W: Write>(&self, w: &mut ElementWriter<W>) -> Result<()> {
        w.write_element(&self.g1)?;
        w.write_element(&self.g2)
    }

    fn encoded_len(compress: Compress) -> usize {
        encoded_size::<E::G1Affine>(compress) + encoded_size::<E::G2Affine>(compress)
    }
}

/// Delta-independent Groth16 key material. Wire `j` contributes
/// `a_query[j] = A_j(tau) G1`, `b_g1_query[j] = B_j(tau) G1` and
/// `b_g2_query[j] = B_j(tau) G2`; public wires also
/// `gamma_abc_g1[j] = (beta A_j(tau) + alpha B_j(tau) + C_j(tau)) G1` with
/// `gamma = 1`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Groth16Query<E: Pairing> {
    pub domain_size: usize,
    pub alpha_g1: E::G1Affine,
    pub beta_g1: E::G1Affine,
    pub beta_g2: E::G2Affine,
    pub gamma_g2: E::G2Affine,
    pub a_query: Vec<E::G1Affine>,
    pub b_g1_query: Vec<E::G1Affine>,
    pub b_g2_query: Vec<E::G2Affine>,
    pub gamma_abc_g1: Vec<E::G1Affine>,
}

impl<E: Pairing> Groth16Query<E> {
    pub fn n_wires(&self) -> usize {
        self.a_query.len()
    }

    pub fn n_public(&self) -> usize {
        self.gamma_abc_g1.len()
    }

    /// Number of group elements in the query.
    pub fn element_count(&self) -> usize {
        4 + 3 * self.n_wires() + self.n_public()
    }

    pub(crate) fn encoded_len(n_wires: usize, n_public: usize) -> usize {
        let g1 = encoded_size::<E::G1Affine>(Compress::No);
        let g2 = encoded_size::<E::G2Affine>(Compress::No);
        3 * 8 + 2 * g1 + 2 * g2 + n_wires * (2 * g1 + g2) + n_public * g1
    }

    pub fn write<W: Write>(&self, w: &mut ElementWriter<W>) -> Result<()> {
        if self.b_g1_query.len() != self.n_wires() || self.b_g2_query.len() != self.n_wires() {
            return Err(CeremonyError::mismatch("query length", self.n_wires(), self.b_g1_query.len()));
        }
        w.write_u64(self.domain_size as u64)?;
        w.write_u64(self.n_wires() as u64)?;
        w.write_u64(self.n_public() as u64)?;
        w.write_element(&self.alpha_g1)?;
        w.write_element(&self.beta_g1)?;
        w.write_element(&self.beta_g2)?;
        w.write_element(&self.gamma_g2)?;
        w.write_elements(&self.a_query)?;
        w.write_elements(&self.b_g1_query)?;
        w.write_elements(&self.b_g2_query)?;
        w.write_elements(&self.gamma_abc_g1)
    }

    /// Reads a query whose wire counts must match `(n_wires, n_public)`, as
    /// already checked against the file size.
    pub fn read<R: Read>(r: &mut ElementReader<R>, expected: Option<(usize, usize)>) -> Result<Self> {
        let domain_size = r.read_u64()? as usize;
        let n_wires = r.read_u64()? as usize;
        let n_public = r.read_u64()? as usize;
        if let Some((wires, public)) = expected {
            if (wires, public) != (n_wires, n_public) {
                return Err(CeremonyError::FormatError(format!(
                    "query declares {} wires and {} public inputs, header implies {} and {}",
                    n_wires, n_public, wires, public
                )));
            }
        }
        if !domain_size.is_power_of_two() {
            return Err(CeremonyError::FormatError(format!("domain size {} is not a power of two", domain_size)));
        }
        let read_g1 = |r: &mut ElementReader<R>, n: usize| -> Result<Vec<E::G1Affine>> { (0..n).map(|_| r.read_element()).collect() };
        Ok(Self {
            domain_size,
            alpha_g1: r.read_element()?,
            beta_g1: r.read_element()?,
            beta_g2: r.read_element()?,
            gamma_g2: r.read_element()?,
            a_query: read_g1(r, n_wires)?,
            b_g1_query: read_g1(r, n_wires)?,
            b_g2_query: (0..n_wires).map(|_| r.read_element()).collect::<Result<_>>()?,
            gamma_abc_g1: read_g1(r, n_public)?,
        })
    }
}

/// Shape of the delta stream `H || L` and the query it belongs to. Every
/// phase-2 chunk file repeats it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamLayout {
    pub query_hash: Hash,
    pub h_len: usize,
    pub stream_len: usize,
}

impl StreamLayout {
    pub(crate) const ENCODED_LEN: usize = libs::iotools::HASH_LEN + 16;

    /// Number of stream chunks; an empty stream still has one (empty) chunk.
    pub fn num_chunks(&self, params: &CeremonyParams) -> usize {
        self.stream_len.div_ceil(params.chunk_size).max(1)
    }

    /// Stream positions covered by chunks `first..first + count`.
    pub fn chunk_range(&self, params: &CeremonyParams, first: usize, count: usize) -> Result<Range<usize>> {
        let total = self.num_chunks(params);
        if count == 0 || first + count > total {
            return Err(CeremonyError::mismatch(
                "chunk index",
                format!("a run within 0..{}", total),
                format!("{}..{}", first, first + count),
            ));
        }
        let start = (first * params.chunk_size).min(self.stream_len);
        let end = ((first + count) * params.chunk_size).min(self.stream_len);
        Ok(start..end)
    }

    pub fn read<R: Read>(r: &mut ElementReader<R>) -> Result<Self> {
        let query_hash = r.read_hash()?;
        let h_len = r.read_u64()? as usize;
        let stream_len = r.read_u64()? as usize;
        if h_len > stream_len {
            return Err(CeremonyError::FormatError(format!("H length {} exceeds stream length {}", h_len, stream_len)));
        }
        Ok(Self { query_hash, h_len, stream_len })
    }

    pub fn write<W: Write>(&self, w: &mut ElementWriter<W>) -> Result<()> {
        w.write_hash(&self.query_hash)?;
        w.write_u64(self.h_len as u64)?;
        w.write_u64(self.stream_len as u64)
    }
}

/// Complete Groth16 parameters of one circuit: the query plus the current
/// delta and the delta stream, `h_query` being `tau^i Z(tau) / delta` and
/// `l_query` the private-wire terms divided by delta.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Phase2Accumulator<E: Pairing> {
    pub query: Groth16Query<E>,
    pub delta: Delta<E>,
    pub h_query: Vec<E::G1Affine>,
    pub l_query: Vec<E::G1Affine>,
}

impl<E: Pairing> Phase2Accumulator<E> {
    pub fn stream_len(&self) -> usize {
        self.h_query.len() + self.l_query.len()
    }

    pub fn stream(&self) -> impl Iterator<Item = &E::G1Affine> {
        self.h_query.iter().chain(self.l_query.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameters::ContributionMode;
    use ark_bls12_381::{Bls12_381, Fr};
    use libs::group_structures::CurveKind;
    use libs::iotools::blank_hash;

    #[test]
    fn test_stream_chunks_cover_the_stream() {
        let params = CeremonyParams::new(CurveKind::Bls12_381, 4, 4, 2, ContributionMode::Chunked).unwrap();
        let layout = StreamLayout { query_hash: blank_hash(), h_len: 7, stream_len: 15 };
        assert_eq!(layout.num_chunks(&params), 4);
        assert_eq!(layout.chunk_range(&params, 3, 1).unwrap(), 12..15);
        assert_eq!(layout.chunk_range(&params, 1, 2).unwrap(), 4..12);
        assert!(layout.chunk_range(&params, 3, 2).is_err());

        let empty = StreamLayout { query_hash: blank_hash(), h_len: 0, stream_len: 0 };
        assert_eq!(empty.num_chunks(&params), 1);
        assert_eq!(empty.chunk_range(&params, 0, 1).unwrap(), 0..0);
    }

    #[test]
    fn test_query_encoded_len_matches_bytes() {
        use crate::codec::{FileHeader, FileKind};
        use ark_bls12_381::{G1Affine, G2Affine};
        use libs::iotools::HASH_LEN;

        let params = CeremonyParams::new(CurveKind::Bls12_381, 3, 4, 2, ContributionMode::Chunked).unwrap();
        let (g1, g2) = (G1Affine::generator(), G2Affine::generator());
        let query = Groth16Query::<Bls12_381> {
            domain_size: 4,
            alpha_g1: g1,
            beta_g1: g1,
            beta_g2: g2,
            gamma_g2: g2,
            a_query: vec![g1; 3],
            b_g1_query: vec![g1; 3],
            b_g2_query: vec![g2; 3],
            gamma_abc_g1: vec![g1; 2],
        };
        let header = FileHeader::phase2(FileKind::Phase2Query, &params, 0, 1, query.element_count());
        let mut w = ElementWriter::create(Vec::new(), &header).unwrap();
        query.write(&mut w).unwrap();
        let (bytes, _) = w.finish().unwrap();
        assert_eq!(bytes.len(), FileHeader::LEN + Groth16Query::<Bls12_381>::encoded_len(3, 2) + HASH_LEN);
    }

    #[test]
    fn test_delta_scale_stays_consistent() {
        let d = Delta::<Bls12_381>::one().scale(Fr::from(9u64));
        assert!(d.is_consistent());
        let broken = Delta::<Bls12_381> { g1: d.g1, g2: Delta::<Bls12_381>::one().g2 };
        assert!(!broken.is_consistent());
    }
}
