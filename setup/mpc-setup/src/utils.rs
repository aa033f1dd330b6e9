use crate::conversions::hash_to_g2;
use ark_ec::pairing::Pairing;
use ark_ec::AffineRepr;
use blake2::{Blake2b512, Digest};
use libs::group_structures::{same_ratio, write_point};
use libs::iotools::{Hash, HASH_LEN};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use ark_serialize::Compress;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::EnvFilter;

/// Random oracle into G2 bound to the challenge hash `v` and a commitment.
pub fn ro<E: Pairing>(commitment: &E::G1Affine, v: &Hash) -> E::G2Affine {
    let mut h = Blake2b512::new();
    h.update(v);
    let mut point = Vec::with_capacity(2 * HASH_LEN);
    // Writing into a Vec cannot fail.
    let _ = write_point(&mut point, commitment, Compress::No);
    h.update(&point);
    let mut digest = [0u8; HASH_LEN];
    digest.copy_from_slice(&h.finalize());
    hash_to_g2::<E>(&digest)
}

/// `x * ro(x * G1, v)`: the G2 half of a proof of knowledge of `x`.
pub fn pok<E: Pairing>(commitment: &E::G1Affine, x: E::ScalarField, v: &Hash) -> E::G2Affine {
    (ro::<E>(commitment, v) * x).into()
}

pub fn check_pok<E: Pairing>(commitment: &E::G1Affine, pok: &E::G2Affine, v: &Hash) -> bool {
    let y = ro::<E>(commitment, v);
    same_ratio::<E>(E::G1Affine::generator(), *commitment, y, *pok)
}

/// `(g1_0, g1_1)` and `(g2_0, g2_1)` share a ratio and neither pair is trivial.
pub fn consistent<E: Pairing>(g1: (E::G1Affine, E::G1Affine), g2: (E::G2Affine, E::G2Affine)) -> bool {
    !g1.0.is_zero() && !g1.1.is_zero() && !g2.0.is_zero() && !g2.1.is_zero() && same_ratio::<E>(g1.0, g1.1, g2.0, g2.1)
}

/// Deterministic RNG for a contributor seed: blake3 of the seed bytes keys a
/// ChaCha20 stream.
pub fn derive_rng_from_seed(seed: &[u8]) -> ChaCha20Rng {
    let digest = blake3::hash(seed);
    ChaCha20Rng::from_seed(*digest.as_bytes())
}

/// Installs the fmt subscriber used by the binaries: `RUST_LOG` filtering,
/// `info` by default, UTC timestamps.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(ChronoUtc::rfc_3339())
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use ark_bls12_381::{Bls12_381, Fr, G1Affine, G2Affine};
    use ark_ec::CurveGroup;
    use ark_std::UniformRand;
    use libs::iotools::hash_bytes;
    use rand::RngCore;

    #[test]
    fn test_pok() {
        let mut rng = ark_std::test_rng();
        let x = Fr::rand(&mut rng);
        let v = [72u8; 64];
        let a = (G1Affine::generator() * x).into_affine();
        let proof = pok::<Bls12_381>(&a, x, &v);
        assert!(check_pok::<Bls12_381>(&a, &proof, &v));
        assert!(!check_pok::<Bls12_381>(&a, &proof, &[73u8; 64]), "proof is bound to the challenge hash");
        let other = (G1Affine::generator() * (x + Fr::from(1u64))).into_affine();
        assert!(!check_pok::<Bls12_381>(&other, &proof, &v));
    }

    #[test]
    fn test_ro() {
        let v = hash_bytes(b"v");
        let g = G1Affine::generator();
        assert_eq!(ro::<Bls12_381>(&g, &v), ro::<Bls12_381>(&g, &v));
        assert_ne!(ro::<Bls12_381>(&g, &v), G2Affine::generator());
    }

    #[test]
    fn test_consistent_rejects_identity() {
        let g1 = G1Affine::generator();
        let g2 = G2Affine::generator();
        assert!(consistent::<Bls12_381>((g1, g1), (g2, g2)));
        assert!(!consistent::<Bls12_381>((G1Affine::zero(), G1Affine::zero()), (g2, g2)));
    }

    #[test]
    fn test_seed_rng_is_deterministic() {
        let a = derive_rng_from_seed(b"seed").next_u64();
        let b = derive_rng_from_seed(b"seed").next_u64();
        let c = derive_rng_from_seed(b"other").next_u64();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
