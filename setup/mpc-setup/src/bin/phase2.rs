use ark_bls12_381::Bls12_381;
use ark_bn254::Bn254;
use clap::{Parser, Subcommand};
use libs::group_structures::{CeremonyCurve, CurveKind};
use libs::iotools::format_hash;
use mpc_setup::beacon::DEFAULT_ITERATIONS_EXP;
use mpc_setup::combine::read_response_list;
use mpc_setup::parameters::{CeremonyParams, ParamArgs, ProvingSystem};
use mpc_setup::phase2;
use mpc_setup::utils::init_tracing;
use mpc_setup::{CeremonyError, Result};
use std::path::PathBuf;
use tracing::{error, info};

// cargo run --release --bin phase2 -- --power 21 new --transcript ./final --circuit ./circuit.json --out-dir ./phase2_0
// cargo run --release --bin phase2 -- contribute --challenge ./phase2_0/challenge_0000 --response ./response_0000 --seed 00ff

#[derive(Parser, Debug)]
#[command(author, version, about = "Circuit-specific phase of the ceremony", long_about = None)]
struct Cli {
    #[command(flatten)]
    params: ParamArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Specializes a verified phase-1 transcript to a circuit and writes the
    /// query file plus the initial challenge of every stream chunk.
    New {
        #[arg(long)]
        transcript: PathBuf,
        #[arg(long)]
        circuit: PathBuf,
        /// Declared wire count, checked against the circuit.
        #[arg(long)]
        circuit_size: Option<usize>,
        #[arg(long, value_enum, default_value_t = ProvingSystem::Groth16)]
        system: ProvingSystem,
        #[arg(long)]
        out_dir: PathBuf,
    },
    /// Contributes to one chunk. Every chunk of a circuit must receive the
    /// same key, so turns over several chunks pass the same `--seed`.
    Contribute {
        #[arg(long)]
        challenge: PathBuf,
        #[arg(long)]
        response: PathBuf,
        /// Hex encoded key seed.
        #[arg(long)]
        seed: Option<String>,
    },
    Beacon {
        #[arg(long)]
        challenge: PathBuf,
        #[arg(long)]
        response: PathBuf,
        #[arg(long)]
        seed: String,
        #[arg(long, default_value_t = DEFAULT_ITERATIONS_EXP)]
        iterations_exp: u32,
    },
    VerifyAndTransform {
        #[arg(long)]
        challenge: PathBuf,
        #[arg(long)]
        response: PathBuf,
        #[arg(long)]
        new_challenge: PathBuf,
    },
    /// Assembles the verified responses of every chunk into the final
    /// parameters.
    Combine {
        #[arg(long)]
        query: PathBuf,
        #[arg(long)]
        response_list: PathBuf,
        #[arg(long)]
        output: PathBuf,
    },
    ExportVk {
        #[arg(long)]
        parameters: PathBuf,
        #[arg(long)]
        output: PathBuf,
    },
}

fn run<E: CeremonyCurve>(params: &CeremonyParams, command: Command) -> Result<()> {
    match command {
        Command::New { transcript, circuit, circuit_size, system, out_dir } => {
            let setup = phase2::prepare_phase2::<E>(params, &transcript, &circuit, circuit_size, system, &out_dir)?;
            info!(chunks = setup.challenge_hashes.len(), "query hash:\n{}", format_hash(&setup.query_hash));
        }
        Command::Contribute { challenge, response, seed } => {
            let seed = seed
                .map(|s| hex::decode(s.trim_start_matches("0x")))
                .transpose()
                .map_err(|e| CeremonyError::FormatError(format!("seed is not hex: {}", e)))?;
            let key = phase2::turn_key::<E>(params, &challenge, seed.as_deref())?;
            let summary = phase2::contribute_with_key(params, &challenge, &response, &key)?;
            info!("response hash:\n{}", format_hash(&summary.response_hash));
        }
        Command::Beacon { challenge, response, seed, iterations_exp } => {
            let summary = phase2::finalize_with_beacon::<E>(params, &challenge, &response, seed.as_bytes(), iterations_exp)?;
            info!("beacon response hash:\n{}", format_hash(&summary.response_hash));
        }
        Command::VerifyAndTransform { challenge, response, new_challenge } => {
            phase2::verify_and_transform::<E>(params, &challenge, &response, &new_challenge)?;
        }
        Command::Combine { query, response_list, output } => {
            let responses = read_response_list(&response_list)?;
            let hash = phase2::combine::<E>(params, &query, &responses, &output)?;
            info!("parameters hash:\n{}", format_hash(&hash));
        }
        Command::ExportVk { parameters, output } => {
            let vk = phase2::export_vk::<E>(params, &parameters, &output)?;
            info!(public_inputs = vk.gamma_abc_g1.len(), "exported verifying key");
        }
    }
    Ok(())
}

fn main() {
    init_tracing();
    let cli = Cli::parse();
    let result = cli.params.load().and_then(|params| match params.curve {
        CurveKind::Bls12_381 => run::<Bls12_381>(&params, cli.command),
        CurveKind::Bn254 => run::<Bn254>(&params, cli.command),
    });
    if let Err(err) = result {
        error!(category = err.category(), "{}", err);
        std::process::exit(err.exit_code());
    }
}
