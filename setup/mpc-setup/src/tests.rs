//! End-to-end ceremonies over small accumulators.
use crate::accumulator::{read_chunk, write_chunk};
use crate::beacon::{beacon_rng, finalize_with_beacon};
use crate::codec::FileKind;
use crate::combine::combine_responses;
use crate::errors::CeremonyError;
use crate::keypair::{DeltaKey, PrivateKey};
use crate::parameters::{CeremonyParams, ContributionMode, ProvingSystem};
use crate::phase2;
use crate::phase2::circuit::tests::cubic_circuit;
use crate::phase2::StreamReader;
use crate::round::{challenge_path, contribute_round, new_round, response_path, verify_round};
use crate::transcript::TranscriptState;
use crate::verification::{verify_and_transform_pok_and_correctness, verify_ratios};
use ark_bls12_381::{Bls12_381, Fr, G1Affine, G2Affine};
use ark_ec::{AffineRepr, CurveGroup};
use ark_ff::{Field, One};
use libs::group_structures::{point_to_hex, CurveKind};
use std::fs;
use std::path::{Path, PathBuf};

type E = Bls12_381;

const BEACON_EXP: u32 = 2;

fn params() -> CeremonyParams {
    CeremonyParams::new(CurveKind::Bls12_381, 4, 4, 2, ContributionMode::Chunked).unwrap()
}

fn mkdir(root: &Path, name: &str) -> PathBuf {
    let dir = root.join(name);
    fs::create_dir_all(&dir).unwrap();
    dir
}

/// Two rounds of contributions, seeded `alice` then `bob`, verified into the
/// transcript state. Returns the responses of the last round.
fn two_rounds(root: &Path, params: &CeremonyParams) -> (Vec<PathBuf>, TranscriptState) {
    let (c0, r0, c1, r1, c2) =
        (mkdir(root, "c0"), mkdir(root, "r0"), mkdir(root, "c1"), mkdir(root, "r1"), mkdir(root, "c2"));
    let mut state = new_round::<E>(params, &c0, Some(2)).unwrap();
    contribute_round::<E>(params, &c0, &r0, b"alice", Some(2)).unwrap();
    verify_round::<E>(params, &c0, &r0, &c1, &mut state, Some(2)).unwrap();
    contribute_round::<E>(params, &c1, &r1, b"bob", Some(2)).unwrap();
    verify_round::<E>(params, &c1, &r1, &c2, &mut state, Some(2)).unwrap();
    let responses = (0..params.num_chunks()).map(|i| response_path(&r1, i)).collect();
    (responses, state)
}

/// The full phase-1 ceremony: two rounds, combine, beacon `TEST`.
fn final_transcript(root: &Path, params: &CeremonyParams) -> PathBuf {
    let (responses, state) = two_rounds(root, params);
    let combined = root.join("combined");
    combine_responses::<E>(params, &responses, &combined, Some(&state)).unwrap();
    let out = root.join("final");
    finalize_with_beacon::<E>(params, &combined, &out, b"TEST", BEACON_EXP).unwrap();
    out
}

#[test]
fn test_powers_of_tau_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let params = params();
    assert_eq!(params.num_chunks(), 4);
    let out = final_transcript(dir.path(), &params);

    let beacon = PrivateKey::<E>::generate(&mut beacon_rng(b"TEST", BEACON_EXP).unwrap()).unwrap();
    let keys = [PrivateKey::<E>::from_seed(b"alice").unwrap(), PrivateKey::from_seed(b"bob").unwrap(), beacon];
    let tau: Fr = keys.iter().map(|k| k.tau()).product();
    let alpha: Fr = keys.iter().map(|k| k.alpha()).product();

    let (slice, _) = read_chunk::<E>(&out, &params).unwrap();
    assert_eq!(slice.tau_g1.len(), 15);
    assert_eq!(slice.tau_g2.len(), 16);
    let mut power = Fr::one();
    for k in 0..16 {
        if k < 15 {
            assert_eq!(slice.tau_g1[k], (G1Affine::generator() * power).into_affine(), "tau g1 at {}", k);
        }
        assert_eq!(slice.tau_g2[k], (G2Affine::generator() * power).into_affine(), "tau g2 at {}", k);
        assert_eq!(slice.alpha_g1[k], (G1Affine::generator() * (alpha * power)).into_affine(), "alpha g1 at {}", k);
        power *= tau;
    }
    verify_ratios::<E>(&params, &out).unwrap();

    let (mut corrupt, prelude) = read_chunk::<E>(&out, &params).unwrap();
    corrupt.tau_g1[7] = (corrupt.tau_g1[7] * Fr::from(2u64)).into_affine();
    let corrupted = dir.path().join("corrupted");
    write_chunk(&corrupt, &prelude, &params, &corrupted).unwrap();
    assert!(matches!(verify_ratios::<E>(&params, &corrupted), Err(CeremonyError::RatioCheckFailed { .. })));
}

#[test]
fn test_replayed_challenge_and_tampered_response() {
    let dir = tempfile::tempdir().unwrap();
    let params = params();
    two_rounds(dir.path(), &params);
    let next = dir.path().join("next");

    // Bob answered the second round's challenge, not the first one.
    let replay = verify_and_transform_pok_and_correctness::<E>(
        &params,
        &challenge_path(&dir.path().join("c0"), 1),
        &response_path(&dir.path().join("r1"), 1),
        &next,
    );
    assert!(matches!(replay, Err(CeremonyError::HashMismatch { what: "challenge hash reference", .. })));

    let response = response_path(&dir.path().join("r1"), 2);
    let mut bytes = fs::read(&response).unwrap();
    let at = bytes.len() - 80;
    bytes[at] ^= 1;
    let tampered = dir.path().join("tampered");
    fs::write(&tampered, &bytes).unwrap();
    let result = verify_and_transform_pok_and_correctness::<E>(
        &params,
        &challenge_path(&dir.path().join("c1"), 2),
        &tampered,
        &next,
    );
    assert!(matches!(result, Err(CeremonyError::HashMismatch { what: "content hash", .. })));
    assert!(!next.exists());
}

#[test]
fn test_groth16_ceremony_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let params = params();
    let transcript = final_transcript(dir.path(), &params);
    let circuit = dir.path().join("circuit.json");
    cubic_circuit().save(&circuit).unwrap();

    let p0 = dir.path().join("p0");
    let setup = phase2::prepare_phase2::<E>(&params, &transcript, &circuit, Some(10), ProvingSystem::Groth16, &p0).unwrap();
    assert_eq!(setup.layout.h_len, 7);
    assert_eq!(setup.layout.stream_len, 15);
    let chunks = setup.challenge_hashes.len();
    assert_eq!(chunks, 4);

    // One seeded contributor, then the beacon, on every chunk.
    let (r0, p1, r1) = (mkdir(dir.path(), "p2_r0"), mkdir(dir.path(), "p1"), mkdir(dir.path(), "p2_r1"));
    let key = DeltaKey::<E>::from_seed(b"carol").unwrap();
    for i in 0..chunks {
        phase2::contribute_with_key(&params, &challenge_path(&p0, i), &response_path(&r0, i), &key).unwrap();
        phase2::verify_and_transform::<E>(&params, &challenge_path(&p0, i), &response_path(&r0, i), &challenge_path(&p1, i))
            .unwrap();
        phase2::finalize_with_beacon::<E>(&params, &challenge_path(&p1, i), &response_path(&r1, i), b"TEST", BEACON_EXP)
            .unwrap();
    }
    let responses: Vec<PathBuf> = (0..chunks).map(|i| response_path(&r1, i)).collect();

    let parameters = dir.path().join("parameters");
    assert!(matches!(
        phase2::combine::<E>(&params, &setup.query_path, &responses[1..], &parameters),
        Err(CeremonyError::ChunkSequenceError(_))
    ));
    let mut mixed = responses.clone();
    mixed[3] = response_path(&r0, 3);
    assert!(matches!(
        phase2::combine::<E>(&params, &setup.query_path, &mixed, &parameters),
        Err(CeremonyError::RatioCheckFailed { .. })
    ));
    assert!(!parameters.exists());
    phase2::combine::<E>(&params, &setup.query_path, &responses, &parameters).unwrap();

    let (acc, response_hashes, _) = phase2::read_parameters::<E>(&params, &parameters).unwrap();
    assert_eq!(response_hashes.len(), chunks);
    assert_eq!(acc.query.a_query.len(), 10);
    assert_eq!(acc.query.b_g2_query.len(), 10);
    assert_eq!(acc.query.gamma_abc_g1.len(), 2);
    assert_eq!(acc.h_query.len(), 7);
    assert_eq!(acc.l_query.len(), 8);

    let beacon = DeltaKey::<E>::generate(&mut beacon_rng(b"TEST", BEACON_EXP).unwrap()).unwrap();
    let delta = key.delta() * beacon.delta();
    assert_eq!(acc.delta.g1, (G1Affine::generator() * delta).into_affine());
    assert_eq!(acc.delta.g2, (G2Affine::generator() * delta).into_affine());

    // Every stream element is the initial one divided by delta.
    let inverse = delta.inverse().unwrap();
    let mut initial = Vec::new();
    for i in 0..chunks {
        let mut r = StreamReader::<E>::open(&challenge_path(&p0, i), &params, &[FileKind::Phase2Challenge]).unwrap();
        initial.extend(r.read_all().unwrap());
    }
    let expected: Vec<G1Affine> = initial.iter().map(|p| (*p * inverse).into_affine()).collect();
    assert_eq!(acc.stream().copied().collect::<Vec<_>>(), expected);

    let vk_path = dir.path().join("vk.json");
    let vk = phase2::export_vk::<E>(&params, &parameters, &vk_path).unwrap();
    assert_eq!(vk.delta_g2, point_to_hex(&acc.delta.g2));
    assert_eq!(phase2::VerifyingKey::read_from_json(&vk_path).unwrap(), vk);
    let (alpha_g1, _, gamma_g2, _, gamma_abc) = vk.points::<E>().unwrap();
    assert_eq!(alpha_g1, acc.query.alpha_g1);
    assert_eq!(gamma_g2, G2Affine::generator());
    assert_eq!(gamma_abc, acc.query.gamma_abc_g1);
}
