use ark_bls12_381::Bls12_381;
use ark_bn254::Bn254;
use clap::{Parser, Subcommand};
use libs::group_structures::{CeremonyCurve, CurveKind};
use libs::iotools::{blank_hash, format_hash};
use mpc_setup::accumulator::new_challenge;
use mpc_setup::beacon::{finalize_with_beacon, DEFAULT_ITERATIONS_EXP};
use mpc_setup::combine::combine;
use mpc_setup::contribution::{contribute_with_key, turn_key};
use mpc_setup::contributor::ContributionReceipt;
use mpc_setup::parameters::{CeremonyParams, ParamArgs};
use mpc_setup::round::{contribute_round, new_round, verify_round};
use mpc_setup::transcript::TranscriptState;
use mpc_setup::utils::init_tracing;
use mpc_setup::verification::{
    verify_and_transform_full, verify_and_transform_pok_and_correctness, verify_and_transform_ratios,
};
use mpc_setup::{CeremonyError, Result};
use std::path::PathBuf;
use tracing::{error, info};

// cargo run --release --bin powersoftau -- --power 21 --chunk-size 65536 new --dir ./round_0
// cargo run --release --bin powersoftau -- --chunk-index 3 contribute --challenge ./round_0/challenge_0003 --response ./response_0003
// cargo run --release --bin powersoftau -- combine --response-list ./responses.txt --output ./combined

#[derive(Parser, Debug)]
#[command(author, version, about = "Chunked powers-of-tau ceremony", long_about = None)]
struct Cli {
    #[command(flatten)]
    params: ParamArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Writes the initial challenge of `--chunk-index`, or of every chunk
    /// into `--dir` together with a fresh transcript state.
    New {
        #[arg(long, required_unless_present = "dir")]
        challenge: Option<PathBuf>,
        #[arg(long, conflicts_with = "challenge")]
        dir: Option<PathBuf>,
        #[arg(long, default_value = "transcript.json")]
        transcript: PathBuf,
    },
    /// Contributes to one challenge. Without `--seed` the key is sampled from
    /// the operating system, which only a single-chunk accumulator allows.
    Contribute {
        #[arg(long)]
        challenge: PathBuf,
        #[arg(long)]
        response: PathBuf,
        /// Hex encoded key seed.
        #[arg(long)]
        seed: Option<String>,
        /// Writes a human readable receipt of the turn.
        #[arg(long)]
        receipt: Option<PathBuf>,
        #[arg(long, default_value = "anonymous")]
        name: String,
        #[arg(long, default_value_t = 1)]
        contributor_no: u32,
    },
    /// Contributes one seeded key to every chunk of a round.
    ContributeRound {
        #[arg(long)]
        challenges: PathBuf,
        #[arg(long)]
        responses: PathBuf,
        #[arg(long)]
        seed: String,
        #[arg(long)]
        threads: Option<usize>,
        #[arg(long)]
        receipt: Option<PathBuf>,
        #[arg(long, default_value = "anonymous")]
        name: String,
        #[arg(long, default_value_t = 1)]
        contributor_no: u32,
    },
    /// Verifies every response of a round and writes the next challenges.
    VerifyRound {
        #[arg(long)]
        challenges: PathBuf,
        #[arg(long)]
        responses: PathBuf,
        #[arg(long)]
        next: PathBuf,
        #[arg(long, default_value = "transcript.json")]
        transcript: PathBuf,
        #[arg(long)]
        threads: Option<usize>,
    },
    /// Applies the public beacon to a full transcript.
    Beacon {
        #[arg(long)]
        transcript: PathBuf,
        #[arg(long)]
        output: PathBuf,
        #[arg(long)]
        seed: String,
        #[arg(long, default_value_t = DEFAULT_ITERATIONS_EXP)]
        iterations_exp: u32,
    },
    VerifyAndTransformPokAndCorrectness {
        #[arg(long)]
        challenge: PathBuf,
        #[arg(long)]
        response: PathBuf,
        #[arg(long)]
        new_challenge: PathBuf,
    },
    /// Ratio-only check of a full transcript; optionally cuts the challenge of
    /// `--chunk-index` out of it.
    VerifyAndTransformRatios {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        new_challenge: Option<PathBuf>,
    },
    VerifyAndTransformFull {
        #[arg(long)]
        challenge: PathBuf,
        #[arg(long)]
        response: PathBuf,
        #[arg(long)]
        new_challenge: Option<PathBuf>,
    },
    /// Combines verified responses listed one per line in `--response-list`.
    Combine {
        #[arg(long)]
        response_list: PathBuf,
        #[arg(long)]
        output: PathBuf,
        /// Cross-checks every response hash against the transcript state.
        #[arg(long)]
        transcript: Option<PathBuf>,
    },
}

fn decode_seed(seed: &str) -> Result<Vec<u8>> {
    hex::decode(seed.trim_start_matches("0x")).map_err(|e| CeremonyError::FormatError(format!("seed is not hex: {}", e)))
}

fn run<E: CeremonyCurve>(args: &ParamArgs, params: &CeremonyParams, command: Command) -> Result<()> {
    match command {
        Command::New { challenge: Some(path), .. } => {
            let hash = new_challenge::<E>(params, args.segment(params)?, &blank_hash(), &path)?;
            info!("challenge hash:\n{}", format_hash(&hash));
        }
        Command::New { dir, transcript, .. } => {
            let dir = dir.unwrap_or_else(|| PathBuf::from("."));
            std::fs::create_dir_all(&dir)?;
            new_round::<E>(params, &dir, None)?.save(&transcript)?;
        }
        Command::Contribute { challenge, response, seed, receipt, name, contributor_no } => {
            let seed = seed.as_deref().map(decode_seed).transpose()?;
            let key = turn_key::<E>(params, seed.as_deref())?;
            let summary = contribute_with_key(params, &challenge, &response, &key)?;
            info!("response hash:\n{}", format_hash(&summary.response_hash));
            if let Some(path) = receipt {
                ContributionReceipt::from_summaries(contributor_no, &name, &[summary]).save(&path)?;
            }
        }
        Command::ContributeRound { challenges, responses, seed, threads, receipt, name, contributor_no } => {
            std::fs::create_dir_all(&responses)?;
            let summaries = contribute_round::<E>(params, &challenges, &responses, &decode_seed(&seed)?, threads)?;
            if let Some(path) = receipt {
                ContributionReceipt::from_summaries(contributor_no, &name, &summaries).save(&path)?;
            }
        }
        Command::VerifyRound { challenges, responses, next, transcript, threads } => {
            let mut state = TranscriptState::read_from_json(&transcript)?;
            std::fs::create_dir_all(&next)?;
            verify_round::<E>(params, &challenges, &responses, &next, &mut state, threads)?;
            state.save(&transcript)?;
        }
        Command::Beacon { transcript, output, seed, iterations_exp } => {
            let summary = finalize_with_beacon::<E>(params, &transcript, &output, seed.as_bytes(), iterations_exp)?;
            info!("beacon response hash:\n{}", format_hash(&summary.response_hash));
        }
        Command::VerifyAndTransformPokAndCorrectness { challenge, response, new_challenge } => {
            verify_and_transform_pok_and_correctness::<E>(params, &challenge, &response, &new_challenge)?;
        }
        Command::VerifyAndTransformRatios { input, new_challenge } => {
            let segment = args.segment(params)?;
            let hash = verify_and_transform_ratios::<E>(params, &input, new_challenge.as_deref().map(|p| (p, segment)))?;
            info!("transcript hash:\n{}", format_hash(&hash));
        }
        Command::VerifyAndTransformFull { challenge, response, new_challenge } => {
            verify_and_transform_full::<E>(params, &challenge, &response, new_challenge.as_deref())?;
        }
        Command::Combine { response_list, output, transcript } => {
            let state = transcript.map(TranscriptState::read_from_json).transpose()?;
            let hash = combine::<E>(params, &response_list, &output, state.as_ref())?;
            info!("combined hash:\n{}", format_hash(&hash));
        }
    }
    Ok(())
}

fn main() {
    init_tracing();
    let cli = Cli::parse();
    let result = cli.params.load().and_then(|params| match params.curve {
        CurveKind::Bls12_381 => run::<Bls12_381>(&cli.params, &params, cli.command),
        CurveKind::Bn254 => run::<Bn254>(&cli.params, &params, cli.command),
    });
    if let Err(err) = result {
        error!(category = err.category(), "{}", err);
        std::process::exit(err.exit_code());
    }
}
