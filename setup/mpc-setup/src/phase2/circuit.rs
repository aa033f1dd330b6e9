//! Rank-1 constraint systems as handed to the phase-2 specializer.
//!
//! ```json
//! { "n_wires": 10, "n_public": 2,
//!   "constraints": [[{"1": "1"}, {"2": "1"}, {"3": "1"}], ...] }
//! ```
//!
//! Each constraint is `<A, w> * <B, w> = <C, w>`, every side a map from wire
//! index to a decimal coefficient. Wire 0 is the constant one and wires
//! `0..n_public` are public.
use crate::errors::{CeremonyError, Result};
use ark_ff::PrimeField;
use libs::field_structures::parse_scalar;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

pub type LinearCombination = HashMap<usize, String>;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Circuit {
    pub n_wires: usize,
    pub n_public: usize,
    pub constraints: Vec<[LinearCombination; 3]>,
}

impl Circuit {
    /// Loads a circuit from JSON, or from bincode when the file ends in `.bin`.
    pub fn load(path: &Path) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let circuit = match path.extension().and_then(|e| e.to_str()) {
            Some("bin") => bincode::deserialize_from(reader)?,
            _ => serde_json::from_reader(reader)?,
        };
        Ok(circuit)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("bin") => bincode::serialize_into(file, self)?,
            _ => serde_json::to_writer_pretty(file, self)?,
        }
        Ok(())
    }

    /// Parses the coefficients and checks every wire index against the
    /// declared wire count.
    pub fn to_r1cs<F: PrimeField>(&self) -> Result<R1cs<F>> {
        if self.n_public == 0 || self.n_public > self.n_wires {
            return Err(CeremonyError::mismatch(
                "public inputs",
                format!("1..={}", self.n_wires),
                self.n_public,
            ));
        }
        let mut r1cs = R1cs {
            n_wires: self.n_wires,
            n_public: self.n_public,
            a: Vec::with_capacity(self.constraints.len()),
            b: Vec::with_capacity(self.constraints.len()),
            c: Vec::with_capacity(self.constraints.len()),
        };
        for (row, [a, b, c]) in self.constraints.iter().enumerate() {
            r1cs.a.push(self.parse_side(row, a)?);
            r1cs.b.push(self.parse_side(row, b)?);
            r1cs.c.push(self.parse_side(row, c)?);
        }
        Ok(r1cs)
    }

    fn parse_side<F: PrimeField>(&self, row: usize, lc: &LinearCombination) -> Result<Vec<(usize, F)>> {
        let mut terms: Vec<(usize, F)> = lc
            .iter()
            .map(|(&wire, coeff)| {
                if wire >= self.n_wires {
                    return Err(CeremonyError::mismatch("wire index", format!("< {}", self.n_wires), wire));
                }
                let value = parse_scalar::<F>(coeff).ok_or_else(|| {
                    CeremonyError::FormatError(format!("constraint {}: bad coefficient '{}' for wire {}", row, coeff, wire))
                })?;
                Ok((wire, value))
            })
            .collect::<Result<_>>()?;
        terms.sort_by_key(|(wire, _)| *wire);
        Ok(terms)
    }
}

/// Constraint matrices with parsed coefficients, row-major and sparse.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct R1cs<F: PrimeField> {
    pub n_wires: usize,
    pub n_public: usize,
    pub a: Vec<Vec<(usize, F)>>,
    pub b: Vec<Vec<(usize, F)>>,
    pub c: Vec<Vec<(usize, F)>>,
}

impl<F: PrimeField> R1cs<F> {
    pub fn num_constraints(&self) -> usize {
        self.a.len()
    }

    /// Size of the evaluation domain: the constraints plus one extra row per
    /// public input, rounded up to a power of two.
    pub fn domain_size(&self) -> usize {
        (self.num_constraints() + self.n_public).next_power_of_two()
    }

    /// Checks that `assignment` (starting with the constant one) satisfies
    /// every constraint.
    pub fn is_satisfied(&self, assignment: &[F]) -> bool {
        if assignment.len() != self.n_wires {
            return false;
        }
        let eval = |lc: &[(usize, F)]| lc.iter().map(|(w, c)| assignment[*w] * c).sum::<F>();
        (0..self.num_constraints()).all(|i| eval(&self.a[i]) * eval(&self.b[i]) == eval(&self.c[i]))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use ark_bls12_381::Fr;

    fn lc(terms: &[(usize, &str)]) -> LinearCombination {
        terms.iter().map(|(w, c)| (*w, c.to_string())).collect()
    }

    /// `out = x^3 + x + 5` over 10 wires: one, out | x, x2, x3, t, and four
    /// wires that only appear in padding constraints.
    pub(crate) fn cubic_circuit() -> Circuit {
        Circuit {
            n_wires: 10,
            n_public: 2,
            constraints: vec![
                [lc(&[(2, "1")]), lc(&[(2, "1")]), lc(&[(3, "1")])],
                [lc(&[(3, "1")]), lc(&[(2, "1")]), lc(&[(4, "1")])],
                [lc(&[(4, "1"), (2, "1")]), lc(&[(0, "1")]), lc(&[(5, "1")])],
                [lc(&[(5, "1"), (0, "5")]), lc(&[(0, "1")]), lc(&[(1, "1")])],
                [lc(&[(6, "1"), (7, "-1")]), lc(&[(0, "1")]), lc(&[(8, "1"), (9, "-11")])],
                [lc(&[(6, "2")]), lc(&[(7, "1")]), lc(&[(8, "1")])],
            ],
        }
    }

    pub(crate) fn cubic_assignment() -> Vec<Fr> {
        // x = 3: x2 = 9, x3 = 27, t = 30, out = 35; padding wires 3, 2, 12, 1.
        [1u64, 35, 3, 9, 27, 30, 3, 2, 12, 1].iter().map(|v| Fr::from(*v)).collect()
    }

    #[test]
    fn test_cubic_circuit_parses_and_is_satisfied() {
        let r1cs = cubic_circuit().to_r1cs::<Fr>().unwrap();
        assert_eq!(r1cs.num_constraints(), 6);
        assert_eq!(r1cs.domain_size(), 8);
        assert!(r1cs.is_satisfied(&cubic_assignment()));
        let mut wrong = cubic_assignment();
        wrong[1] = Fr::from(36u64);
        assert!(!r1cs.is_satisfied(&wrong));
    }

    #[test]
    fn test_rejects_out_of_range_wire_and_bad_coefficient() {
        let mut circuit = cubic_circuit();
        circuit.constraints[0][2] = lc(&[(12, "1")]);
        assert!(matches!(
            circuit.to_r1cs::<Fr>(),
            Err(CeremonyError::ParameterMismatch { field: "wire index", .. })
        ));

        let mut circuit = cubic_circuit();
        circuit.constraints[1][0] = lc(&[(3, "0x1")]);
        assert!(matches!(circuit.to_r1cs::<Fr>(), Err(CeremonyError::FormatError(_))));

        let mut circuit = cubic_circuit();
        circuit.n_public = 11;
        assert!(matches!(
            circuit.to_r1cs::<Fr>(),
            Err(CeremonyError::ParameterMismatch { field: "public inputs", .. })
        ));
    }

    #[test]
    fn test_json_and_bincode_load() {
        let dir = tempfile::tempdir().unwrap();
        let circuit = cubic_circuit();
        for name in ["circuit.json", "circuit.bin"] {
            let path = dir.path().join(name);
            circuit.save(&path).unwrap();
            assert_eq!(Circuit::load(&path).unwrap(), circuit);
        }
    }
}
