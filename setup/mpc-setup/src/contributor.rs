use crate::contribution::ContributionSummary;
use crate::errors::Result;
use chrono::Utc;
use libs::group_structures::CeremonyCurve;
use libs::iotools::format_hash;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;

/// Human readable record of one contributor's turn.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ContributionReceipt {
    pub contributor_no: u32,
    pub date: String,
    pub name: String,
    pub devices: String,
    pub first_chunk: usize,
    pub chunk_count: usize,
    pub challenge_hashes: Vec<String>,
    pub response_hashes: Vec<String>,
    pub time_taken_seconds: f64,
}

impl ContributionReceipt {
    pub fn from_summaries<E: CeremonyCurve>(contributor_no: u32, name: &str, summaries: &[ContributionSummary<E>]) -> Self {
        let first_chunk = summaries.iter().map(|s| s.segment.first_chunk).min().unwrap_or(0);
        let chunk_count = summaries.iter().map(|s| s.segment.chunk_count).sum();
        Self {
            contributor_no,
            date: Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            name: name.to_string(),
            devices: device_summary(),
            first_chunk,
            chunk_count,
            challenge_hashes: summaries.iter().map(|s| format_hash(&s.challenge_hash)).collect(),
            response_hashes: summaries.iter().map(|s| format_hash(&s.response_hash)).collect(),
            time_taken_seconds: summaries.iter().map(|s| s.elapsed_seconds).sum(),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_string())?;
        Ok(())
    }
}

fn device_summary() -> String {
    format!("{} / {} ({} cores)", std::env::consts::OS, std::env::consts::ARCH, num_cpus::get())
}

fn indent(hash: &str) -> String {
    hash.lines().map(|l| format!("    {}", l)).collect::<Vec<_>>().join("\n")
}

impl fmt::Display for ContributionReceipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "### Contributor No: {:02}\n\n\
            **Date:** {}\n\n\
            Name: {}\n\n\
            Device(s): {}\n\n\
            Chunks: {}..{}\n\n",
            self.contributor_no,
            self.date,
            self.name,
            self.devices,
            self.first_chunk,
            self.first_chunk + self.chunk_count,
        )?;
        for (i, (c, r)) in self.challenge_hashes.iter().zip(&self.response_hashes).enumerate() {
            write!(
                f,
                "Chunk {} challenge hash:\n    Blake2b:\n{}\n\
                Chunk {} response hash:\n    Blake2b:\n{}\n\n",
                self.first_chunk + i,
                indent(c),
                self.first_chunk + i,
                indent(r),
            )?;
        }
        write!(f, "Time taken: ~{:.1} seconds", self.time_taken_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keypair::PrivateKey;
    use crate::parameters::Segment;
    use ark_bls12_381::Bls12_381;
    use libs::iotools::hash_bytes;

    #[test]
    fn test_receipt_lists_every_chunk() {
        let key = PrivateKey::<Bls12_381>::from_seed(b"r").unwrap();
        let summaries: Vec<ContributionSummary<Bls12_381>> = (0..2)
            .map(|i| ContributionSummary {
                segment: Segment { first_chunk: i, chunk_count: 1, start: 4 * i, end: 4 * i + 4, g1_end: 4 * i + 4 },
                challenge_hash: hash_bytes(&[i as u8]),
                response_hash: hash_bytes(&[i as u8 + 10]),
                public_key: key.public_key(&hash_bytes(&[i as u8])),
                elapsed_seconds: 1.5,
            })
            .collect();
        let receipt = ContributionReceipt::from_summaries(3, "alice", &summaries);
        assert_eq!(receipt.chunk_count, 2);
        assert_eq!(receipt.time_taken_seconds, 3.0);
        let text = receipt.to_string();
        assert!(text.starts_with("### Contributor No: 03"));
        assert!(text.contains("Chunk 1 response hash"));
        assert!(text.contains("Time taken: ~3.0 seconds"));
    }
}
