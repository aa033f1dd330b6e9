use ark_ec::{AffineRepr, CurveGroup, VariableBaseMSM};
use ark_ff::{FftField, Field, PrimeField, UniformRand};
use rand::Rng;
use rayon::prelude::*;

/// `bases[i] * scalars[i]` for every i, computed in parallel and normalized.
pub fn batch_mul<G: CurveGroup>(bases: &[G::Affine], scalars: &[G::ScalarField]) -> Vec<G::Affine> {
    let projective: Vec<G> = bases
        .par_iter()
        .zip(scalars.par_iter())
        .map(|(b, s)| b.mul_bigint(s.into_bigint()))
        .collect();
    G::normalize_batch(&projective)
}

/// Every base multiplied by the same scalar.
pub fn batch_scale<G: CurveGroup>(bases: &[G::Affine], scalar: G::ScalarField) -> Vec<G::Affine> {
    let by = scalar.into_bigint();
    let projective: Vec<G> = bases.par_iter().map(|b| b.mul_bigint(by)).collect();
    G::normalize_batch(&projective)
}

/// Compresses the consecutive pairs `(v[i], v[i+1])` into a single pair
/// `(sum r_i v[i], sum r_i v[i+1])` with fresh random weights. If every
/// consecutive pair shares one ratio, the compressed pair has that ratio too;
/// otherwise it fails with overwhelming probability.
pub fn power_pairs<G: CurveGroup, R: Rng + ?Sized>(v: &[G::Affine], rng: &mut R) -> Option<(G::Affine, G::Affine)> {
    if v.len() < 2 {
        return None;
    }
    let weights: Vec<G::ScalarField> = (0..v.len() - 1).map(|_| G::ScalarField::rand(rng)).collect();
    let (lhs, rhs) = rayon::join(
        || G::msm_unchecked(&v[..v.len() - 1], &weights),
        || G::msm_unchecked(&v[1..], &weights),
    );
    Some((lhs.into_affine(), rhs.into_affine()))
}

/// Compresses element-wise pairs `(a[i], b[i])` the same way as
/// [`power_pairs`].
pub fn merge_pairs<G: CurveGroup, R: Rng + ?Sized>(a: &[G::Affine], b: &[G::Affine], rng: &mut R) -> Option<(G::Affine, G::Affine)> {
    if a.is_empty() || a.len() != b.len() {
        return None;
    }
    let weights: Vec<G::ScalarField> = (0..a.len()).map(|_| G::ScalarField::rand(rng)).collect();
    let (lhs, rhs) = rayon::join(|| G::msm_unchecked(a, &weights), || G::msm_unchecked(b, &weights));
    Some((lhs.into_affine(), rhs.into_affine()))
}

/// Inverse radix-2 FFT over group elements. Turns `[tau^j * G]` into the
/// Lagrange basis commitments `[L_i(tau) * G]` of the size-n subgroup.
/// Returns `None` if `n` is not a power of two the field supports.
pub fn ifft_in_place<G: CurveGroup>(values: &mut [G]) -> Option<()>
where
    G::ScalarField: FftField,
{
    let n = values.len();
    if n == 0 || !n.is_power_of_two() {
        return None;
    }
    let omega = G::ScalarField::get_root_of_unity(n as u64)?;
    let omega_inv = omega.inverse()?;
    fft_in_place(values, omega_inv);
    let n_inv = G::ScalarField::from(n as u64).inverse()?;
    values.par_iter_mut().for_each(|v| *v *= n_inv);
    Some(())
}

fn fft_in_place<G: CurveGroup>(a: &mut [G], omega: G::ScalarField) {
    let n = a.len();
    let log_n = n.trailing_zeros();
    for i in 0..n {
        let j = bit_reverse(i, log_n);
        if i < j {
            a.swap(i, j);
        }
    }
    let mut size = 2;
    while size <= n {
        let half = size / 2;
        let w_m = omega.pow([(n / size) as u64]);
        a.par_chunks_mut(size).for_each(|block| {
            let mut w = G::ScalarField::ONE;
            for j in 0..half {
                let t = block[j + half] * w;
                let u = block[j];
                block[j] = u + t;
                block[j + half] = u - t;
                w *= w_m;
            }
        });
        size *= 2;
    }
}

fn bit_reverse(mut i: usize, bits: u32) -> usize {
    let mut r = 0;
    for _ in 0..bits {
        r = (r << 1) | (i & 1);
        i >>= 1;
    }
    r
}

#[cfg(test)]
mod tests {
    use super::*;
    use ark_bls12_381::{Fr, G1Affine, G1Projective};
    use ark_ec::PrimeGroup;
    use ark_ff::{One, Zero};

    #[test]
    fn test_batch_mul_matches_scalar_mul() {
        let mut rng = ark_std::test_rng();
        let bases: Vec<G1Affine> = (0..9).map(|_| G1Projective::rand(&mut rng).into_affine()).collect();
        let scalars: Vec<Fr> = (0..9).map(|_| Fr::rand(&mut rng)).collect();
        let out = batch_mul::<G1Projective>(&bases, &scalars);
        for i in 0..9 {
            assert_eq!(out[i], (bases[i] * scalars[i]).into_affine());
        }
    }

    #[test]
    fn test_power_pairs_detects_broken_sequence() {
        let mut rng = ark_std::test_rng();
        let tau = Fr::rand(&mut rng);
        let g = G1Projective::generator();
        let mut powers: Vec<G1Affine> = (0..8u64).map(|k| (g * tau.pow([k])).into_affine()).collect();
        let (a, b) = power_pairs::<G1Projective, _>(&powers, &mut rng).unwrap();
        assert_eq!((a * tau).into_affine(), b, "honest powers keep their ratio");

        powers[5] = (powers[5] + g).into_affine();
        let (a, b) = power_pairs::<G1Projective, _>(&powers, &mut rng).unwrap();
        assert_ne!((a * tau).into_affine(), b, "a tampered power must break the ratio");
        assert!(power_pairs::<G1Projective, _>(&powers[..1], &mut rng).is_none());
    }

    #[test]
    fn test_ifft_gives_lagrange_basis() {
        let mut rng = ark_std::test_rng();
        let tau = Fr::rand(&mut rng);
        let n = 8usize;
        let g = G1Projective::generator();
        let mut points: Vec<G1Projective> = (0..n as u64).map(|k| g * tau.pow([k])).collect();
        ifft_in_place(&mut points).unwrap();

        // L_i(tau) = (tau^n - 1) * omega^i / (n * (tau - omega^i))
        let omega = Fr::get_root_of_unity(n as u64).unwrap();
        let z = tau.pow([n as u64]) - Fr::one();
        let n_inv = Fr::from(n as u64).inverse().unwrap();
        let mut omega_i = Fr::one();
        let mut sum = G1Projective::zero();
        for p in points.iter() {
            let l = z * omega_i * n_inv * (tau - omega_i).inverse().unwrap();
            assert_eq!(*p, g * l);
            sum += p;
            omega_i *= omega;
        }
        // Lagrange polynomials sum to one.
        assert_eq!(sum, g);
        assert!(ifft_in_place::<G1Projective>(&mut [g; 3]).is_none());
    }
}
