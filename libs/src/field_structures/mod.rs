use ark_ff::{Field, PrimeField};
use rayon::prelude::*;

/// Powers `base^start, base^(start+1), ..., base^(start+len-1)`.
///
/// Large runs are split so that each rayon task starts from its own
/// exponent, which keeps the result identical to the sequential walk.
pub fn powers_from<F: Field>(base: F, start: u64, len: usize) -> Vec<F> {
    const SPLIT: usize = 1 << 12;
    if len <= SPLIT {
        let mut acc = base.pow([start]);
        let mut out = Vec::with_capacity(len);
        for _ in 0..len {
            out.push(acc);
            acc *= base;
        }
        return out;
    }
    let mut out = vec![F::zero(); len];
    out.par_chunks_mut(SPLIT).enumerate().for_each(|(i, chunk)| {
        let mut acc = base.pow([start + (i * SPLIT) as u64]);
        for slot in chunk.iter_mut() {
            *slot = acc;
            acc *= base;
        }
    });
    out
}

/// Parses a field element written in decimal, optionally negative.
pub fn parse_scalar<F: PrimeField>(s: &str) -> Option<F> {
    let s = s.trim();
    if let Some(abs) = s.strip_prefix('-') {
        return parse_scalar::<F>(abs).map(|x| -x);
    }
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let digits = s.trim_start_matches('0');
    if digits.is_empty() {
        return Some(F::zero());
    }
    F::from_str(digits).ok()
}

/// Reduces a digest into a field element.
pub fn scalar_from_digest<F: PrimeField>(digest: &[u8]) -> F {
    F::from_le_bytes_mod_order(digest)
}
