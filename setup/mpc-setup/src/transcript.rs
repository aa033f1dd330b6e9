use crate::conversions::{hash_from_hex, hash_to_hex};
use crate::errors::{CeremonyError, Result};
use crate::parameters::CeremonyParams;
use libs::group_structures::CurveKind;
use libs::iotools::{AtomicOutput, Hash};
use libs::impl_read_from_json;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkLink {
    pub challenge: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkHistory {
    pub chunk_index: usize,
    pub links: Vec<ChunkLink>,
}

/// Append-only hash chain of every chunk: each entry is a challenge hash and,
/// once a contribution was verified, the hash of the response to it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptState {
    pub curve: CurveKind,
    pub power: usize,
    pub chunk_size: usize,
    pub chunks: Vec<ChunkHistory>,
}

impl_read_from_json!(TranscriptState);

impl TranscriptState {
    pub fn new(params: &CeremonyParams) -> Self {
        Self {
            curve: params.curve,
            power: params.power,
            chunk_size: params.chunk_size,
            chunks: (0..params.num_chunks()).map(|chunk_index| ChunkHistory { chunk_index, links: Vec::new() }).collect(),
        }
    }

    /// Writes the state as JSON. The previous file stays intact until the new
    /// one is complete.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut out = AtomicOutput::create(path)?;
        serde_json::to_writer_pretty(&mut out, self)?;
        out.commit()?;
        Ok(())
    }

    pub fn check_params(&self, params: &CeremonyParams) -> Result<()> {
        if self.curve != params.curve {
            return Err(CeremonyError::mismatch("curve", params.curve, self.curve));
        }
        if self.power != params.power {
            return Err(CeremonyError::mismatch("power", params.power, self.power));
        }
        if self.chunk_size != params.chunk_size {
            return Err(CeremonyError::mismatch("chunk size", params.chunk_size, self.chunk_size));
        }
        Ok(())
    }

    fn history(&self, chunk: usize) -> Result<&ChunkHistory> {
        self.chunks
            .get(chunk)
            .ok_or_else(|| CeremonyError::mismatch("chunk index", format!("< {}", self.chunks.len()), chunk))
    }

    fn history_mut(&mut self, chunk: usize) -> Result<&mut ChunkHistory> {
        let len = self.chunks.len();
        self.chunks
            .get_mut(chunk)
            .ok_or_else(|| CeremonyError::mismatch("chunk index", format!("< {}", len), chunk))
    }

    /// Appends a new challenge. The previous challenge of the chunk must have
    /// been answered.
    pub fn record_challenge(&mut self, chunk: usize, challenge: &Hash) -> Result<()> {
        let history = self.history_mut(chunk)?;
        if let Some(last) = history.links.last() {
            if last.response.is_none() {
                return Err(CeremonyError::ChunkSequenceError(format!(
                    "chunk {} still has an unanswered challenge",
                    chunk
                )));
            }
        }
        history.links.push(ChunkLink { challenge: hash_to_hex(challenge), response: None });
        Ok(())
    }

    /// Records a verified response to the latest challenge of `chunk`.
    pub fn record_contribution(&mut self, chunk: usize, challenge: &Hash, response: &Hash) -> Result<()> {
        let history = self.history_mut(chunk)?;
        let last = history
            .links
            .last_mut()
            .ok_or_else(|| CeremonyError::ChunkSequenceError(format!("chunk {} has no challenge", chunk)))?;
        let expected = hash_from_hex(&last.challenge)?;
        if expected != *challenge {
            return Err(CeremonyError::hash_mismatch("latest challenge", chunk, &expected, challenge));
        }
        if last.response.is_some() {
            return Err(CeremonyError::ChunkSequenceError(format!(
                "chunk {} already answered its latest challenge",
                chunk
            )));
        }
        last.response = Some(hash_to_hex(response));
        Ok(())
    }

    pub fn latest_challenge(&self, chunk: usize) -> Result<Option<Hash>> {
        self.history(chunk)?.links.last().map(|l| hash_from_hex(&l.challenge)).transpose()
    }

    pub fn latest_response(&self, chunk: usize) -> Result<Option<Hash>> {
        let history = self.history(chunk)?;
        history
            .links
            .iter()
            .rev()
            .find_map(|l| l.response.as_deref())
            .map(hash_from_hex)
            .transpose()
    }

    /// Fails unless `response` is the latest recorded response of `chunk`.
    pub fn check_response(&self, chunk: usize, response: &Hash) -> Result<()> {
        match self.latest_response(chunk)? {
            Some(expected) if expected == *response => Ok(()),
            Some(expected) => Err(CeremonyError::hash_mismatch("transcript response", chunk, &expected, response)),
            None => Err(CeremonyError::ChunkSequenceError(format!("chunk {} has no recorded response", chunk))),
        }
    }

    /// Number of verified contributions on `chunk`.
    pub fn contributions(&self, chunk: usize) -> Result<usize> {
        Ok(self.history(chunk)?.links.iter().filter(|l| l.response.is_some()).count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameters::ContributionMode;
    use libs::iotools::hash_bytes;

    #[test]
    fn test_hash_chain_bookkeeping() {
        let params = CeremonyParams::new(CurveKind::Bn254, 3, 4, 2, ContributionMode::Chunked).unwrap();
        let mut state = TranscriptState::new(&params);
        assert_eq!(state.chunks.len(), 2);

        let (c0, r0, c1) = (hash_bytes(b"c0"), hash_bytes(b"r0"), hash_bytes(b"c1"));
        state.record_challenge(1, &c0).unwrap();
        assert!(matches!(state.record_challenge(1, &c1), Err(CeremonyError::ChunkSequenceError(_))));
        assert!(matches!(
            state.record_contribution(1, &c1, &r0),
            Err(CeremonyError::HashMismatch { .. })
        ));
        state.record_contribution(1, &c0, &r0).unwrap();
        state.record_challenge(1, &c1).unwrap();

        assert_eq!(state.latest_challenge(1).unwrap(), Some(c1));
        assert_eq!(state.latest_response(1).unwrap(), Some(r0));
        assert_eq!(state.contributions(1).unwrap(), 1);
        state.check_response(1, &r0).unwrap();
        assert!(state.check_response(1, &c0).is_err());
        assert!(state.check_response(0, &r0).is_err());
        assert!(state.latest_challenge(9).is_err());
    }

    #[test]
    fn test_state_json_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transcript.json");
        let params = CeremonyParams::new(CurveKind::Bls12_381, 2, 2, 2, ContributionMode::Chunked).unwrap();
        let mut state = TranscriptState::new(&params);
        state.record_challenge(0, &hash_bytes(b"c")).unwrap();
        state.save(&path).unwrap();
        let loaded = TranscriptState::read_from_json(&path).unwrap();
        assert_eq!(loaded, state);
        loaded.check_params(&params).unwrap();
    }

    #[test]
    fn test_save_replaces_state_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transcript.json");
        let params = CeremonyParams::new(CurveKind::Bn254, 2, 2, 2, ContributionMode::Chunked).unwrap();
        let mut state = TranscriptState::new(&params);
        state.save(&path).unwrap();
        state.record_challenge(1, &hash_bytes(b"c")).unwrap();
        state.save(&path).unwrap();

        assert_eq!(TranscriptState::read_from_json(&path).unwrap(), state);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1, "no staging files left behind");
    }
}
