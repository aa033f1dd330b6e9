use ark_ec::pairing::Pairing;
use ark_ec::AffineRepr;
use ark_ff::Zero;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod group_serde;
pub use group_serde::*;

/// Pairing-friendly curves a ceremony can run over.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CurveKind {
    Bls12_381,
    Bn254,
}

impl CurveKind {
    pub fn id(self) -> u8 {
        match self {
            CurveKind::Bls12_381 => 1,
            CurveKind::Bn254 => 2,
        }
    }

    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            1 => Some(CurveKind::Bls12_381),
            2 => Some(CurveKind::Bn254),
            _ => None,
        }
    }
}

impl fmt::Display for CurveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CurveKind::Bls12_381 => write!(f, "bls12_381"),
            CurveKind::Bn254 => write!(f, "bn254"),
        }
    }
}

impl FromStr for CurveKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "bls12_381" | "bls12381" => Ok(CurveKind::Bls12_381),
            "bn254" | "bn256" => Ok(CurveKind::Bn254),
            other => Err(format!("unsupported curve '{}'", other)),
        }
    }
}

/// A pairing engine the ceremony protocol is instantiated over.
///
/// The protocol code only talks to `ark_ec::pairing::Pairing`; this trait adds
/// the curve tag written into every file header so readers can reject files
/// produced for a different curve.
pub trait CeremonyCurve: Pairing {
    const KIND: CurveKind;

    fn g1_generator() -> Self::G1Affine {
        Self::G1Affine::generator()
    }

    fn g2_generator() -> Self::G2Affine {
        Self::G2Affine::generator()
    }
}

impl CeremonyCurve for ark_bls12_381::Bls12_381 {
    const KIND: CurveKind = CurveKind::Bls12_381;
}

impl CeremonyCurve for ark_bn254::Bn254 {
    const KIND: CurveKind = CurveKind::Bn254;
}

/// Checks `e(g1_0, g2_1) == e(g1_1, g2_0)`, i.e. that `g1_1 / g1_0` and
/// `g2_1 / g2_0` hide the same discrete log.
pub fn same_ratio<E: Pairing>(
    g1_0: E::G1Affine,
    g1_1: E::G1Affine,
    g2_0: E::G2Affine,
    g2_1: E::G2Affine,
) -> bool {
    E::multi_pairing([g1_0.into_group(), -g1_1.into_group()], [g2_1, g2_0]).is_zero()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ark_bls12_381::{Bls12_381, Fr};
    use ark_std::UniformRand;

    #[test]
    fn test_curve_kind_ids() {
        for kind in [CurveKind::Bls12_381, CurveKind::Bn254] {
            assert_eq!(CurveKind::from_id(kind.id()), Some(kind));
            assert_eq!(kind.to_string().parse::<CurveKind>().unwrap(), kind);
        }
        assert_eq!(CurveKind::from_id(0), None);
        assert!("secp256k1".parse::<CurveKind>().is_err());
    }

    #[test]
    fn test_same_ratio() {
        let mut rng = ark_std::test_rng();
        let x = Fr::rand(&mut rng);
        let g1 = Bls12_381::g1_generator();
        let g2 = Bls12_381::g2_generator();
        let xg1 = (g1 * x).into();
        let xg2 = (g2 * x).into();
        assert!(same_ratio::<Bls12_381>(g1, xg1, g2, xg2), "same ratio should hold");
        let yg2 = (g2 * (x + Fr::from(1u64))).into();
        assert!(!same_ratio::<Bls12_381>(g1, xg1, g2, yg2), "different ratio must not hold");
    }
}
