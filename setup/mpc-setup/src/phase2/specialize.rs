use super::chunk::{write_query, Phase2Prelude, StreamWriter};
use super::circuit::{Circuit, R1cs};
use super::{Delta, Groth16Query, Phase2Accumulator, StreamLayout};
use crate::accumulator::{ChunkReader, Section};
use crate::codec::FileKind;
use crate::errors::{CeremonyError, Result};
use crate::parameters::{CeremonyParams, ProvingSystem};
use crate::round::challenge_path;
use crate::verification::verify_ratios;
use ark_ec::{AffineRepr, CurveGroup};
use ark_ff::Zero;
use libs::group_structures::CeremonyCurve;
use libs::iotools::{AtomicOutput, Hash};
use libs::memory_pool::batch_ranges;
use libs::vector_operations::ifft_in_place;
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, info_span};

pub const QUERY_FILE: &str = "phase2_query";

/// Files written by [`prepare_phase2`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Phase2Setup {
    pub query_path: PathBuf,
    pub query_hash: Hash,
    pub layout: StreamLayout,
    pub challenge_hashes: Vec<Hash>,
}

/// Specializes a finished transcript to `r1cs`.
///
/// The QAP domain has `m = next_pow2(constraints + public inputs)` points;
/// public input `j` gets the extra row `constraints + j` with `A = w_j`. The
/// transcript must hold `tau^0..tau^(2m-2)` in G1, which also bounds `m` by
/// `2^power`. `circuit_size` is the wire count the caller expects.
pub fn specialize<E: CeremonyCurve>(
    params: &CeremonyParams,
    transcript: &Path,
    r1cs: &R1cs<E::ScalarField>,
    circuit_size: usize,
    system: ProvingSystem,
) -> Result<Phase2Accumulator<E>> {
    if circuit_size != r1cs.n_wires {
        return Err(CeremonyError::mismatch("circuit size", r1cs.n_wires, circuit_size));
    }
    let m = r1cs.domain_size();
    if m > params.powers_length() || 2 * m - 1 > params.powers_g1_length() {
        return Err(CeremonyError::mismatch(
            "circuit domain",
            format!("<= {} for power {}", params.powers_length() / 2, params.power),
            m,
        ));
    }
    match system {
        ProvingSystem::Groth16 => {}
    }
    let _span = info_span!("specialize", wires = r1cs.n_wires, constraints = r1cs.num_constraints(), domain = m).entered();

    verify_ratios::<E>(params, transcript)?;
    let mut reader = ChunkReader::<E>::open(transcript, params, &[FileKind::Challenge, FileKind::Response, FileKind::Combined])?;
    let anchors = *reader.anchors();
    let tau_g1: Vec<E::G1Affine> = read_prefix(&mut reader, Section::TauG1, 2 * m - 1)?;
    let tau_g2: Vec<E::G2Affine> = read_prefix(&mut reader, Section::TauG2, m)?;
    let alpha_g1: Vec<E::G1Affine> = read_prefix(&mut reader, Section::AlphaG1, m)?;
    let beta_g1: Vec<E::G1Affine> = read_prefix(&mut reader, Section::BetaG1, m)?;

    let lagrange_g1 = lagrange::<E::G1>(&tau_g1[..m])?;
    let lagrange_g2 = lagrange::<E::G2>(&tau_g2)?;
    let alpha_lagrange = lagrange::<E::G1>(&alpha_g1)?;
    let beta_lagrange = lagrange::<E::G1>(&beta_g1)?;

    let columns = Columns::new(r1cs);
    let wires = 0..r1cs.n_wires;
    let a_query: Vec<E::G1> = wires.clone().into_par_iter().map(|j| weighted_sum(&columns.a[j], &lagrange_g1)).collect();
    let b_g1_query: Vec<E::G1> = wires.clone().into_par_iter().map(|j| weighted_sum(&columns.b[j], &lagrange_g1)).collect();
    let b_g2_query: Vec<E::G2> = wires.clone().into_par_iter().map(|j| weighted_sum(&columns.b[j], &lagrange_g2)).collect();
    let abc: Vec<E::G1> = wires
        .into_par_iter()
        .map(|j| {
            weighted_sum(&columns.a[j], &beta_lagrange) + weighted_sum(&columns.b[j], &alpha_lagrange) + weighted_sum(&columns.c[j], &lagrange_g1)
        })
        .collect();

    // tau^i (tau^m - 1) for i < m - 1
    let h_query: Vec<E::G1> = (0..m - 1).into_par_iter().map(|i| tau_g1[i + m].into_group() - tau_g1[i]).collect();

    let abc = E::G1::normalize_batch(&abc);
    let (gamma_abc_g1, l_query) = abc.split_at(r1cs.n_public);
    let query = Groth16Query {
        domain_size: m,
        alpha_g1: anchors.alpha_g1,
        beta_g1: anchors.beta_g1,
        beta_g2: anchors.beta_g2,
        gamma_g2: E::g2_generator(),
        a_query: E::G1::normalize_batch(&a_query),
        b_g1_query: E::G1::normalize_batch(&b_g1_query),
        b_g2_query: E::G2::normalize_batch(&b_g2_query),
        gamma_abc_g1: gamma_abc_g1.to_vec(),
    };
    info!(h = h_query.len(), l = l_query.len(), "specialized transcript");
    Ok(Phase2Accumulator {
        query,
        delta: Delta::one(),
        h_query: E::G1::normalize_batch(&h_query),
        l_query: l_query.to_vec(),
    })
}

/// Specializes `transcript` to the circuit at `circuit` and writes the query
/// plus the initial challenge of every stream chunk into `out_dir`. Each
/// challenge links to the query hash.
pub fn prepare_phase2<E: CeremonyCurve>(
    params: &CeremonyParams,
    transcript: &Path,
    circuit: &Path,
    circuit_size: Option<usize>,
    system: ProvingSystem,
    out_dir: &Path,
) -> Result<Phase2Setup> {
    let r1cs = Circuit::load(circuit)?.to_r1cs::<E::ScalarField>()?;
    let size = circuit_size.unwrap_or(r1cs.n_wires);
    let acc = specialize::<E>(params, transcript, &r1cs, size, system)?;

    fs::create_dir_all(out_dir)?;
    let query_path = out_dir.join(QUERY_FILE);
    let query_hash = write_query(params, &acc.query, &query_path)?;
    let layout = StreamLayout { query_hash, h_len: acc.h_query.len(), stream_len: acc.stream_len() };
    let stream: Vec<E::G1Affine> = acc.stream().copied().collect();
    let prelude = Phase2Prelude::Challenge { link: query_hash };

    let mut challenge_hashes = Vec::with_capacity(layout.num_chunks(params));
    for i in 0..layout.num_chunks(params) {
        let path = challenge_path(out_dir, i);
        let range = layout.chunk_range(params, i, 1)?;
        let mut w = StreamWriter::create(AtomicOutput::create(&path)?, params, &layout, (i, 1), &prelude, &acc.delta)?;
        for (offset, len) in batch_ranges(range.len(), params.batch_size) {
            let at = range.start + offset;
            w.write_batch(&stream[at..at + len])?;
        }
        let (out, hash) = w.finish()?;
        out.commit()?;
        challenge_hashes.push(hash);
    }
    info!(dir = %out_dir.display(), chunks = challenge_hashes.len(), "wrote phase-2 challenges");
    Ok(Phase2Setup { query_path, query_hash, layout, challenge_hashes })
}

/// The first `n` elements of a section; the rest is read and dropped.
fn read_prefix<E, P>(reader: &mut ChunkReader<E>, section: Section, n: usize) -> Result<Vec<P>>
where
    E: CeremonyCurve,
    P: AffineRepr,
{
    let mut out = Vec::with_capacity(n);
    reader.for_each_batch(section, |_, batch: &[P]| {
        let want = n.saturating_sub(out.len()).min(batch.len());
        out.extend_from_slice(&batch[..want]);
        Ok(())
    })?;
    if out.len() != n {
        return Err(CeremonyError::mismatch("transcript length", n, out.len()));
    }
    Ok(out)
}

fn lagrange<G: CurveGroup>(powers: &[G::Affine]) -> Result<Vec<G>> {
    let mut points: Vec<G> = powers.iter().map(|p| p.into_group()).collect();
    ifft_in_place(&mut points)
        .ok_or_else(|| CeremonyError::mismatch("circuit domain", "a power of two the scalar field supports", powers.len()))?;
    Ok(points)
}

fn weighted_sum<G: CurveGroup>(terms: &[(usize, G::ScalarField)], basis: &[G]) -> G {
    terms.iter().fold(G::zero(), |acc, (row, coeff)| acc + basis[*row] * *coeff)
}

/// Column-major view of the constraint matrices, including the public input
/// rows.
struct Columns<F> {
    a: Vec<Vec<(usize, F)>>,
    b: Vec<Vec<(usize, F)>>,
    c: Vec<Vec<(usize, F)>>,
}

impl<F: ark_ff::PrimeField> Columns<F> {
    fn new(r1cs: &R1cs<F>) -> Self {
        let transpose = |rows: &[Vec<(usize, F)>]| {
            let mut cols = vec![Vec::new(); r1cs.n_wires];
            for (row, terms) in rows.iter().enumerate() {
                for (wire, coeff) in terms {
                    cols[*wire].push((row, *coeff));
                }
            }
            cols
        };
        let mut a = transpose(&r1cs.a);
        for (j, col) in a.iter_mut().take(r1cs.n_public).enumerate() {
            col.push((r1cs.num_constraints() + j, F::ONE));
        }
        Self { a, b: transpose(&r1cs.b), c: transpose(&r1cs.c) }
    }
}
