use crate::codec::{ElementReader, ElementWriter};
use crate::errors::{CeremonyError, Result};
use crate::utils::{check_pok, derive_rng_from_seed, pok};
use ark_ec::pairing::Pairing;
use ark_ec::{AffineRepr, CurveGroup};
use ark_ff::Zero;
use ark_std::UniformRand;
use libs::iotools::Hash;
use rand::Rng;
use std::io::{Read, Write};
use zeroize::Zeroize;

/// Commitment `x * G1` and proof of knowledge `x * ro(x * G1, v)` for one
/// secret scalar.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KeyProof<E: Pairing> {
    pub commitment: E::G1Affine,
    pub pok: E::G2Affine,
}

impl<E: Pairing> KeyProof<E> {
    pub fn new(x: E::ScalarField, v: &Hash) -> Self {
        let commitment = (E::G1Affine::generator() * x).into_affine();
        Self { commitment, pok: pok::<E>(&commitment, x, v) }
    }

    pub fn verify(&self, v: &Hash) -> bool {
        check_pok::<E>(&self.commitment, &self.pok, v)
    }

    pub fn read<R: Read>(r: &mut ElementReader<R>) -> Result<Self> {
        Ok(Self { commitment: r.read_element()?, pok: r.read_element()? })
    }

    pub fn write<W: Write>(&self, w: &mut ElementWriter<W>) -> Result<()> {
        w.write_element(&self.commitment)?;
        w.write_element(&self.pok)
    }
}

/// Public half of a phase-1 contribution.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PublicKey<E: Pairing> {
    pub tau: KeyProof<E>,
    pub alpha: KeyProof<E>,
    pub beta: KeyProof<E>,
}

impl<E: Pairing> PublicKey<E> {
    pub fn read<R: Read>(r: &mut ElementReader<R>) -> Result<Self> {
        Ok(Self { tau: KeyProof::read(r)?, alpha: KeyProof::read(r)?, beta: KeyProof::read(r)? })
    }

    pub fn write<W: Write>(&self, w: &mut ElementWriter<W>) -> Result<()> {
        self.tau.write(w)?;
        self.alpha.write(w)?;
        self.beta.write(w)
    }

    pub fn proofs(&self) -> [(&'static str, &KeyProof<E>); 3] {
        [("tau", &self.tau), ("alpha", &self.alpha), ("beta", &self.beta)]
    }
}

/// Toxic waste of one phase-1 contribution. Wiped on drop.
pub struct PrivateKey<E: Pairing> {
    tau: E::ScalarField,
    alpha: E::ScalarField,
    beta: E::ScalarField,
}

impl<E: Pairing> PrivateKey<E> {
    pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> Result<Self> {
        let key = Self {
            tau: E::ScalarField::rand(rng),
            alpha: E::ScalarField::rand(rng),
            beta: E::ScalarField::rand(rng),
        };
        if key.tau.is_zero() || key.alpha.is_zero() || key.beta.is_zero() {
            return Err(CeremonyError::DegenerateContribution("sampled a zero secret".to_string()));
        }
        Ok(key)
    }

    /// Same seed, same key: lets one contributor treat every chunk of a
    /// round with a single secret.
    pub fn from_seed(seed: &[u8]) -> Result<Self> {
        Self::generate(&mut derive_rng_from_seed(seed))
    }

    pub fn public_key(&self, challenge_hash: &Hash) -> PublicKey<E> {
        PublicKey {
            tau: KeyProof::new(self.tau, challenge_hash),
            alpha: KeyProof::new(self.alpha, challenge_hash),
            beta: KeyProof::new(self.beta, challenge_hash),
        }
    }

    pub(crate) fn tau(&self) -> E::ScalarField {
        self.tau
    }

    pub(crate) fn alpha(&self) -> E::ScalarField {
        self.alpha
    }

    pub(crate) fn beta(&self) -> E::ScalarField {
        self.beta
    }
}

impl<E: Pairing> Drop for PrivateKey<E> {
    fn drop(&mut self) {
        self.tau.zeroize();
        self.alpha.zeroize();
        self.beta.zeroize();
    }
}

/// Secret of one phase-2 contribution.
pub struct DeltaKey<E: Pairing> {
    delta: E::ScalarField,
}

impl<E: Pairing> DeltaKey<E> {
    pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> Result<Self> {
        let delta = E::ScalarField::rand(rng);
        if delta.is_zero() {
            return Err(CeremonyError::DegenerateContribution("sampled a zero delta".to_string()));
        }
        Ok(Self { delta })
    }

    pub fn from_seed(seed: &[u8]) -> Result<Self> {
        Self::generate(&mut derive_rng_from_seed(seed))
    }

    pub fn proof(&self, challenge_hash: &Hash) -> KeyProof<E> {
        KeyProof::new(self.delta, challenge_hash)
    }

    pub(crate) fn delta(&self) -> E::ScalarField {
        self.delta
    }
}

impl<E: Pairing> Drop for DeltaKey<E> {
    fn drop(&mut self) {
        self.delta.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ark_bls12_381::Bls12_381;
    use libs::iotools::hash_bytes;

    #[test]
    fn test_public_key_proofs_verify() {
        let key = PrivateKey::<Bls12_381>::generate(&mut ark_std::test_rng()).unwrap();
        let v = hash_bytes(b"challenge");
        let pk = key.public_key(&v);
        for (name, proof) in pk.proofs() {
            assert!(proof.verify(&v), "{} proof should verify", name);
            assert!(!proof.verify(&hash_bytes(b"other")), "{} proof is bound to v", name);
        }
    }

    #[test]
    fn test_seeded_keys_repeat() {
        let a = PrivateKey::<Bls12_381>::from_seed(b"00ff").unwrap();
        let b = PrivateKey::<Bls12_381>::from_seed(b"00ff").unwrap();
        let c = PrivateKey::<Bls12_381>::from_seed(b"00fe").unwrap();
        assert_eq!(a.tau(), b.tau());
        assert_eq!(a.beta(), b.beta());
        assert_ne!(a.tau(), c.tau());
        let v = hash_bytes(b"x");
        assert_eq!(a.public_key(&v), b.public_key(&v));
    }

    #[test]
    fn test_delta_key_proof() {
        let key = DeltaKey::<Bls12_381>::from_seed(b"delta").unwrap();
        let v = hash_bytes(b"phase2 chunk");
        assert!(key.proof(&v).verify(&v));
    }
}
