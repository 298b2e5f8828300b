use anyhow::{Context, Result};
use clap::Parser;
use pg_utils::{
    a2c::{self, A2C},
    env::{self, Legacy},
    logging,
};
use tch::{nn::VarStore, Device};
use tracing::info;

/// Train an advantage actor-critic agent on cart-pole.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Total number of environment steps to train for.
    #[arg(long, default_value_t = a2c::DEFAULT_MAX_STEPS)]
    max_steps: usize,

    #[arg(long, default_value_t = 5e-4)]
    learning_rate: f64,

    #[arg(long, default_value_t = 0.99)]
    gamma: f32,

    /// Seeds both libtorch and the environment. At most `i64::MAX`.
    #[arg(long, value_parser = clap::value_parser!(u64).range(..=i64::MAX.unsigned_abs()))]
    seed: Option<u64>,

    /// Drive the environment through the four-field step convention.
    #[arg(long)]
    legacy_api: bool,

    #[arg(long)]
    cuda: bool,
}

fn run<Env>(args: &Args, env: Env) -> Result<()>
where
    Env: env::Env,
{
    let device = if args.cuda {
        Device::cuda_if_available()
    } else {
        Device::Cpu
    };

    let mut builder = A2C::builder()
        .policy_vs(VarStore::new(device))
        .value_vs(VarStore::new(device))
        .env(env)
        .learning_rate(args.learning_rate)
        .gamma(args.gamma);
    if let Some(seed) = args.seed {
        builder = builder.seed(i64::try_from(seed).context("seed does not fit in i64")?);
    }
    let mut a2c = builder.build()?;

    let report = a2c.train(args.max_steps)?;
    let avg_return = a2c.evaluate_avg_return()?;

    info!(
        "Steps: {}, Episodes: {}, Average return: {avg_return}",
        report.total_steps,
        report.episode_rewards.len()
    );

    Ok(())
}

fn main() -> Result<()> {
    logging::init();

    let args = Args::parse();
    let env = args
        .seed
        .map_or_else(env::CartPole::new, env::CartPole::with_seed);

    if args.legacy_api {
        run(&args, Legacy(env))
    } else {
        run(&args, env)
    }
}
