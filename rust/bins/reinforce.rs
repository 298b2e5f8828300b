use anyhow::{Context, Result};
use clap::Parser;
use pg_utils::{
    env::{self, Legacy},
    logging,
    reinforce::{self, Reinforce},
    report::{Smoothing, DEFAULT_EMA_FACTOR, DEFAULT_SMA_WINDOW},
};
use tch::{nn::VarStore, Device};
use tracing::info;

/// Train a REINFORCE agent on cart-pole.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Number of episodes to train for.
    #[arg(long, default_value_t = reinforce::DEFAULT_NUM_EPISODES)]
    episodes: usize,

    /// Train on a budget of environment steps instead of a number of episodes.
    #[arg(long, conflicts_with = "episodes")]
    step_budget: bool,

    #[arg(long, default_value_t = reinforce::DEFAULT_MAX_STEPS)]
    max_steps: usize,

    #[arg(long, default_value_t = 1e-3)]
    learning_rate: f64,

    #[arg(long, default_value_t = 0.99)]
    gamma: f32,

    #[arg(long)]
    entropy_coef: Option<f64>,

    /// Maximum gradient norm.
    #[arg(long)]
    clip_norm: Option<f64>,

    /// Vanilla REINFORCE: no entropy bonus, baseline or clipping.
    #[arg(long)]
    plain: bool,

    /// Checkpoints averaged by the progress smoothing.
    #[arg(long, default_value_t = DEFAULT_SMA_WINDOW)]
    sma_window: usize,

    /// Smooth progress with an exponential moving average of episode rewards instead.
    #[arg(long)]
    ema: bool,

    #[arg(long, default_value_t = DEFAULT_EMA_FACTOR)]
    ema_factor: f64,

    /// Seeds both libtorch and the environment. At most `i64::MAX`.
    #[arg(long, value_parser = clap::value_parser!(u64).range(..=i64::MAX.unsigned_abs()))]
    seed: Option<u64>,

    /// Drive the environment through the four-field step convention.
    #[arg(long)]
    legacy_api: bool,

    #[arg(long)]
    cuda: bool,
}

impl Args {
    fn smoothing(&self) -> Smoothing {
        if self.ema {
            Smoothing::Exponential {
                factor: self.ema_factor,
            }
        } else {
            Smoothing::Simple {
                window: self.sma_window,
            }
        }
    }
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

    let mut builder = Reinforce::builder()
        .vs(VarStore::new(device))
        .env(env)
        .learning_rate(args.learning_rate)
        .gamma(args.gamma)
        .smoothing(args.smoothing());
    if args.plain {
        builder = builder.plain();
    }
    if let Some(entropy_coef) = args.entropy_coef {
        builder = builder.entropy_coef(entropy_coef);
    }
    if let Some(clip_norm) = args.clip_norm {
        builder = builder.clip_norm(clip_norm);
    }
    if let Some(seed) = args.seed {
        builder = builder.seed(i64::try_from(seed).context("seed does not fit in i64")?);
    }
    let mut reinforce = builder.build()?;

    let report = if args.step_budget {
        reinforce.train_steps(args.max_steps)?
    } else {
        reinforce.train(args.episodes)?
    };
    let avg_return = reinforce.evaluate_avg_return()?;

    info!(
        "Steps: {}, Episodes: {}, Smoothed checkpoints: {:.1?}",
        report.total_steps,
        report.episode_rewards.len(),
        report.smoothed
    );
    info!("Average return: {avg_return}");

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
