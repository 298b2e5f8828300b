//! Monte-Carlo policy gradient (REINFORCE) with normalised returns and, by default, an
//! entropy bonus, a mean baseline and gradient-norm clipping.

use anyhow::{bail, ensure, Result};
use derive_setters::Setters;
use tch::{
    nn::{self, OptimizerConfig},
    Kind, Tensor,
};
use tracing::{debug, warn};

use crate::{
    collector::{self, collect_episode, StepBudget, Trajectory},
    env::{self, Adapter},
    estimator,
    model::PolicyNetwork,
    report::{ProgressReporter, Smoothing, TrainingReport, DEFAULT_INTERVAL},
    validate,
};

pub const DEFAULT_NUM_EPISODES: usize = 500;
pub const DEFAULT_MAX_STEPS: usize = 200_000;

const DEFAULT_LEARNING_RATE: f64 = 1e-3;
const DEFAULT_GAMMA: f32 = 0.99;
const DEFAULT_ENTROPY_COEF: f64 = 0.01;
const DEFAULT_CLIP_NORM: f64 = 1.0;
const DEFAULT_FC_LAYERS: &[usize] = &[128];

#[must_use]
pub struct Reinforce<Env>
where
    Env: env::Env,
{
    vs: nn::VarStore,
    policy: PolicyNetwork,
    optimizer: nn::Optimizer,
    gamma: f32,
    entropy_coef: f64,
    clip_norm: Option<f64>,
    subtract_baseline: bool,
    report_interval: usize,
    smoothing: Smoothing,
    train_env: Adapter<Env>,
    eval_env: Adapter<Env>,
}

impl<Env> Reinforce<Env>
where
    Env: env::Env,
{
    /// Trains for exactly `num_episodes` complete episodes.
    pub fn train(&mut self, num_episodes: usize) -> Result<TrainingReport> {
        self.run(Some(num_episodes), StepBudget::unlimited())
    }

    /// Trains until `max_steps` environment steps have been taken. An episode cut short by
    /// the budget still gets its update.
    pub fn train_steps(&mut self, max_steps: usize) -> Result<TrainingReport> {
        self.run(None, StepBudget::limited(max_steps))
    }

    pub fn evaluate_avg_return(&mut self) -> Result<f64> {
        self.policy.evaluate_avg_return(&mut self.eval_env)
    }

    #[must_use]
    pub fn var_store(&self) -> &nn::VarStore {
        &self.vs
    }

    fn run(
        &mut self,
        num_episodes: Option<usize>,
        mut budget: StepBudget,
    ) -> Result<TrainingReport> {
        let mut reporter = ProgressReporter::new(self.report_interval, self.smoothing);
        let mut updates = 0;

        let options = collector::Options {
            critic: None,
            record_entropy: self.entropy_coef > 0.0,
        };

        while !budget.exhausted()
            && num_episodes.map_or(true, |n| reporter.episode_rewards().len() < n)
        {
            let trajectory =
                collect_episode(&mut self.train_env, &self.policy, options, &mut budget)?;

            if trajectory.is_empty() {
                warn!("collected an empty trajectory, stopping");
                break;
            }

            self.update(&trajectory);
            updates += 1;

            reporter.record(trajectory.total_reward(), budget.taken());
        }

        Ok(reporter.finish(budget.taken(), updates))
    }

    fn update(&mut self, trajectory: &Trajectory) {
        let loss = self.compute_loss(trajectory);

        self.apply_gradients(&loss);
        self.optimizer.step();

        debug!(
            loss = loss.double_value(&[]),
            steps = trajectory.len(),
            finished = trajectory.finished,
            "policy update"
        );
    }

    /// Sum over steps of `-log_prob * advantage - entropy_coef * entropy`, where the
    /// advantage is the normalised return, minus its mean when the baseline is on.
    fn compute_loss(&self, trajectory: &Trajectory) -> Tensor {
        let mut returns =
            estimator::normalize(estimator::discounted_returns(&trajectory.rewards(), self.gamma));

        if self.subtract_baseline {
            if let Some(baseline) = returns.mean() {
                returns -= baseline;
            }
        }

        let advantages = Tensor::from_slice(&returns.to_vec()).to_device(self.vs.device());

        let mut losses = -(trajectory.log_probs() * advantages);
        if let Some(entropies) = trajectory.entropies() {
            losses = losses - entropies * self.entropy_coef;
        }
        losses.sum(Kind::Float)
    }

    /// Fills the parameter gradients from `loss`, clipped to `clip_norm` when set.
    fn apply_gradients(&mut self, loss: &Tensor) {
        self.optimizer.zero_grad();
        loss.backward();
        if let Some(max_norm) = self.clip_norm {
            self.optimizer.clip_grad_norm(max_norm);
        }
    }

    pub fn builder<'a>() -> Builder<'a, Env> {
        Builder {
            vs: None,
            env: None,
            fc_layers: None,
            gamma: None,
            learning_rate: None,
            entropy_coef: None,
            clip_norm: None,
            subtract_baseline: None,
            report_interval: None,
            smoothing: None,
            seed: None,
            plain: false,
        }
    }
}

#[must_use]
#[derive(Setters, Debug)]
#[setters(strip_option)]
pub struct Builder<'a, Env>
where
    Env: env::Env,
{
    vs: Option<nn::VarStore>,
    env: Option<Env>,
    fc_layers: Option<&'a [usize]>,
    gamma: Option<f32>,
    learning_rate: Option<f64>,
    entropy_coef: Option<f64>,
    clip_norm: Option<f64>,
    subtract_baseline: Option<bool>,
    report_interval: Option<usize>,
    smoothing: Option<Smoothing>,
    seed: Option<i64>,
    #[setters(skip)]
    plain: bool,
}

impl<Env> Builder<'_, Env>
where
    Env: env::Env,
{
    /// Vanilla REINFORCE: no entropy bonus, no baseline and no clipping unless set explicitly.
    pub fn plain(mut self) -> Self {
        self.plain = true;
        self
    }

    pub fn build(self) -> Result<Reinforce<Env>> {
        let Some(env) = self.env else {
            bail!("an environment is required");
        };

        let gamma = self.gamma.unwrap_or(DEFAULT_GAMMA);
        let learning_rate = self.learning_rate.unwrap_or(DEFAULT_LEARNING_RATE);
        let fc_layers = self.fc_layers.unwrap_or(DEFAULT_FC_LAYERS);
        let report_interval = self.report_interval.unwrap_or(DEFAULT_INTERVAL);
        let smoothing = self.smoothing.unwrap_or_default();

        let (entropy_coef, clip_norm, subtract_baseline) = if self.plain {
            (
                self.entropy_coef.unwrap_or(0.0),
                self.clip_norm,
                self.subtract_baseline.unwrap_or(false),
            )
        } else {
            (
                self.entropy_coef.unwrap_or(DEFAULT_ENTROPY_COEF),
                Some(self.clip_norm.unwrap_or(DEFAULT_CLIP_NORM)),
                self.subtract_baseline.unwrap_or(true),
            )
        };

        validate::discount(gamma)?;
        validate::learning_rate(learning_rate)?;
        validate::reporting(report_interval, smoothing)?;
        ensure!(
            entropy_coef.is_finite() && entropy_coef >= 0.0,
            "entropy coefficient must be non-negative, got {entropy_coef}"
        );
        if let Some(max_norm) = clip_norm {
            ensure!(max_norm > 0.0, "gradient clip norm must be positive, got {max_norm}");
        }

        if let Some(seed) = self.seed {
            tch::manual_seed(seed);
        }

        let vs = self.vs.unwrap_or_else(|| nn::VarStore::new(tch::Device::Cpu));

        let policy = PolicyNetwork::new(
            &vs.root(),
            Env::observation_space(),
            Env::action_space(),
            fc_layers,
        )?;
        let optimizer = nn::Adam::default().build(&vs, learning_rate)?;

        Ok(Reinforce {
            vs,
            policy,
            optimizer,
            gamma,
            entropy_coef,
            clip_norm,
            subtract_baseline,
            report_interval,
            smoothing,
            train_env: Adapter::new(env.clone()),
            eval_env: Adapter::new(env),
        })
    }
}
