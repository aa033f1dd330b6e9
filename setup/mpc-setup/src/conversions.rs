use crate::errors::{CeremonyError, Result};
use ark_ec::pairing::Pairing;
use ark_ec::CurveGroup;
use ark_std::UniformRand;
use libs::iotools::{Hash, HASH_LEN};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

/// Maps a digest to a G2 point whose discrete log nobody knows. The first 32
/// bytes seed a ChaCha20 stream that samples the point.
pub fn hash_to_g2<E: Pairing>(digest: &Hash) -> E::G2Affine {
    let mut seed = [0u8; 32];
    seed.copy_from_slice(&digest[..32]);
    let mut rng = ChaCha20Rng::from_seed(seed);
    E::G2::rand(&mut rng).into_affine()
}

pub fn hash_to_hex(hash: &Hash) -> String {
    hex::encode(hash)
}

pub fn hash_from_hex(s: &str) -> Result<Hash> {
    let bytes = hex::decode(s.trim_start_matches("0x"))
        .map_err(|e| CeremonyError::FormatError(format!("invalid hex hash: {}", e)))?;
    if bytes.len() != HASH_LEN {
        return Err(CeremonyError::FormatError(format!(
            "hash has {} bytes, expected {}",
            bytes.len(),
            HASH_LEN
        )));
    }
    let mut out = [0u8; HASH_LEN];
    out.copy_from_slice(&bytes);
    Ok(out)
}
