use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use ark_ec::CurveGroup;
use ark_ff::{BigInteger, PrimeField, Zero};
use clap::{Parser, Subcommand};
use tracing::info;
use zkaccel_bw6_761::merkle::digests_len;
use zkaccel_bw6_761::traits::random_elements;
use zkaccel_bw6_761::{
    build_poseidon_merkle_tree, get_root_of_unity, init_optimized_poseidon_constants, initialize_domain, merkle_root,
    msm, msm_with_table, ntt_inplace, BasesPrecomputeTable, G1Projective, G2Projective, MSMConfig,
    MontgomeryConvertible, NTTConfig, NTTDir, ScalarField, TreeBuilderConfig,
};
use zkaccel_runtime::{runtime, DeviceContext, DeviceKind, HostSlice, RuntimeConfig};

#[derive(Parser, Debug)]
#[command(name = "zkaccel-bench")]
#[command(about = "run BW6-761 MSM / NTT / Merkle workloads on an accelerator device", long_about = None)]
struct Args {
    /// runtime configuration (TOML); defaults come from ZKACCEL_* variables
    #[arg(long, env = "ZKACCEL_CONFIG")]
    config: Option<PathBuf>,

    /// device to run on
    #[arg(long, default_value_t = 0)]
    device: usize,

    /// backend family
    #[arg(long, default_value = "CPU")]
    device_type: String,

    /// seed for the generated inputs
    #[arg(long, default_value_t = 42)]
    seed: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// multi-scalar multiplication over G1 or G2
    Msm {
        /// log2 of the number of points
        #[arg(long, default_value_t = 16)]
        log_size: u32,

        /// number of MSMs sharing the bases
        #[arg(long, default_value_t = 1)]
        batch: usize,

        /// entries per base in a precomputed table (1 = no table)
        #[arg(long, default_value_t = 1)]
        precompute_factor: usize,

        /// window width in bits (0 = automatic)
        #[arg(long, default_value_t = 0)]
        window_bits: usize,

        /// run over G2 instead of G1
        #[arg(long)]
        g2: bool,
    },
    /// forward and inverse NTT over scalars
    Ntt {
        /// log2 of the transform size
        #[arg(long, default_value_t = 20)]
        log_size: u32,

        #[arg(long, default_value_t = 1)]
        batch: usize,

        /// precompute per-stage twiddle tables
        #[arg(long)]
        fast_twiddles: bool,
    },
    /// Poseidon Merkle tree over random leaves
    Merkle {
        #[arg(long, default_value_t = 2)]
        arity: usize,

        #[arg(long, default_value_t = 16)]
        height: u32,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "zkaccel_bench=info,zkaccel_core=info,zkaccel_runtime=info".into()),
        )
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => {
            let src = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            RuntimeConfig::from_toml_str(&src)?
        }
        None => RuntimeConfig::from_env(),
    };
    let rt = runtime::init(config)?;

    let kind = DeviceKind::parse(&args.device_type)?;
    let device = rt.device(args.device)?;
    if device.kind() != kind {
        bail!("device {} is a {} device, not {}", args.device, device.kind(), kind);
    }
    info!(
        "device {}: {} with {} threads, {} MiB",
        device.id(),
        device.kind(),
        device.capabilities().threads,
        device.capabilities().memory_limit >> 20
    );
    let ctx = DeviceContext::on_device(device);

    match args.command {
        Command::Msm { log_size, batch, precompute_factor, window_bits, g2 } => {
            let cfg = MSMConfig {
                ctx,
                c: window_bits,
                batch_size: batch,
                ..Default::default()
            };
            if g2 {
                run_msm::<G2Projective>(&cfg, log_size, precompute_factor, args.seed)
            } else {
                run_msm::<G1Projective>(&cfg, log_size, precompute_factor, args.seed)
            }
        }
        Command::Ntt { log_size, batch, fast_twiddles } => run_ntt(ctx, log_size, batch, fast_twiddles, args.seed),
        Command::Merkle { arity, height } => run_merkle(ctx, arity, height, args.seed),
    }
}

fn run_msm<G>(cfg: &MSMConfig, log_size: u32, precompute_factor: usize, seed: u64) -> Result<()>
where
    G: CurveGroup<ScalarField = ScalarField>,
    G::Affine: MontgomeryConvertible,
{
    let batch = cfg.batch_size;
    let (n, total) = problem_size(log_size, batch)?;
    info!("msm: 2^{} points, batch {}, precompute factor {}", log_size, batch, precompute_factor);

    let start = Instant::now();
    let projective: Vec<G> = random_elements(n, seed);
    let bases = G::normalize_batch(&projective);
    let scalars: Vec<ScalarField> = random_elements(total, seed.wrapping_add(1));
    info!("inputs generated in {:.2?}", start.elapsed());

    let mut results = vec![G::zero(); batch];
    let start = Instant::now();
    if precompute_factor > 1 {
        let table = BasesPrecomputeTable::new(HostSlice::from_slice(&bases), precompute_factor, cfg.c, &cfg.ctx)?;
        info!("precompute table (c = {}) built in {:.2?}", table.c(), start.elapsed());
        let start = Instant::now();
        msm_with_table::<G, _, _>(
            HostSlice::from_slice(&scalars),
            &table,
            n,
            cfg,
            HostSlice::from_mut_slice(&mut results),
        )?;
        info!("msm done in {:.2?}", start.elapsed());
    } else {
        msm(
            HostSlice::from_slice(&scalars),
            HostSlice::from_slice(&bases),
            n,
            cfg,
            HostSlice::from_mut_slice(&mut results),
        )?;
        info!("msm done in {:.2?}", start.elapsed());
    }

    for (i, r) in G::normalize_batch(&results).iter().enumerate() {
        println!("result[{}] = {}", i, r);
    }
    Ok(())
}

fn run_ntt(ctx: DeviceContext, log_size: u32, batch: usize, fast_twiddles: bool, seed: u64) -> Result<()> {
    let (size, total) = problem_size(log_size, batch)?;
    let cfg = NTTConfig::<ScalarField> {
        ctx,
        batch_size: batch,
        ..Default::default()
    };
    info!("ntt: 2^{} elements, batch {}, fast twiddles {}", log_size, batch, fast_twiddles);

    let start = Instant::now();
    let root: ScalarField = get_root_of_unity(size as u64)?;
    initialize_domain(root, &cfg.ctx, fast_twiddles)?;
    info!("domain initialized in {:.2?}", start.elapsed());

    let original: Vec<ScalarField> = random_elements(total, seed);
    let mut data = original.clone();

    let start = Instant::now();
    ntt_inplace(HostSlice::from_mut_slice(&mut data), size, NTTDir::Forward, &cfg)?;
    info!("forward done in {:.2?}", start.elapsed());

    let start = Instant::now();
    ntt_inplace(HostSlice::from_mut_slice(&mut data), size, NTTDir::Inverse, &cfg)?;
    info!("inverse done in {:.2?}", start.elapsed());

    if data != original {
        bail!("inverse ntt did not reproduce the input");
    }
    println!("roundtrip ok");
    Ok(())
}

fn run_merkle(ctx: DeviceContext, arity: usize, height: u32, seed: u64) -> Result<()> {
    info!("merkle: arity {}, height {}", arity, height);
    let start = Instant::now();
    let constants = init_optimized_poseidon_constants::<ScalarField>(arity, &ctx)?;
    info!("constants derived in {:.2?}", start.elapsed());

    let n_leaves = arity
        .checked_pow(height)
        .context("tree too large")?;
    let leaves: Vec<ScalarField> = random_elements(n_leaves, seed);
    let mut digests = vec![ScalarField::zero(); digests_len(height, arity)?];
    let cfg = TreeBuilderConfig { ctx, is_async: false };

    let start = Instant::now();
    build_poseidon_merkle_tree(
        HostSlice::from_slice(&leaves),
        HostSlice::from_mut_slice(&mut digests),
        height,
        arity,
        &constants,
        &cfg,
    )?;
    info!("tree of {} leaves built in {:.2?}", n_leaves, start.elapsed());

    let root = merkle_root(&digests).context("empty tree")?;
    println!("root = {}", to_hex(&root));
    Ok(())
}

/// `(2^log_size, 2^log_size * batch)`, rejecting sizes that overflow usize
fn problem_size(log_size: u32, batch: usize) -> Result<(usize, usize)> {
    if log_size >= usize::BITS {
        bail!("log size {} is out of range", log_size);
    }
    let size = 1usize << log_size;
    let total = size
        .checked_mul(batch)
        .with_context(|| format!("2^{} elements times batch {} overflows", log_size, batch))?;
    Ok((size, total))
}

/// Big-endian hex encoding of a field element
fn to_hex<F: PrimeField>(value: &F) -> String {
    hex::encode(value.into_bigint().to_bytes_be())
}
