use anyhow::{bail, Context, Result};
use derive_setters::Setters;
use ndarray::Array1;
use tch::{
    nn::{self, OptimizerConfig},
    Kind, Reduction, Tensor,
};
use tracing::{debug, warn};

use crate::{
    collector::{self, collect_episode, StepBudget, Trajectory},
    env::{self, Adapter},
    estimator,
    model::{PolicyNetwork, ValueNetwork},
    report::{ProgressReporter, Smoothing, TrainingReport, DEFAULT_INTERVAL},
    validate,
};

pub const DEFAULT_MAX_STEPS: usize = 200_000;

const DEFAULT_LEARNING_RATE: f64 = 5e-4;
const DEFAULT_GAMMA: f32 = 0.99;
const DEFAULT_FC_LAYERS: &[usize] = &[128];

/// Advantage actor-critic with separate policy and value networks, updated once per
/// episode from Monte-Carlo returns.
#[must_use]
pub struct A2C<Env>
where
    Env: env::Env,
{
    policy_vs: nn::VarStore,
    policy: PolicyNetwork,
    value: ValueNetwork,
    policy_optimizer: nn::Optimizer,
    value_optimizer: nn::Optimizer,
    gamma: f32,
    report_interval: usize,
    smoothing: Smoothing,
    train_env: Adapter<Env>,
    eval_env: Adapter<Env>,
}

struct Losses {
    policy: Tensor,
    value: Tensor,
    advantages: Tensor,
}

impl<Env> A2C<Env>
where
    Env: env::Env,
{
    /// Trains until `max_steps` environment steps have been taken.
    pub fn train(&mut self, max_steps: usize) -> Result<TrainingReport> {
        let mut reporter = ProgressReporter::new(self.report_interval, self.smoothing);
        let mut budget = StepBudget::limited(max_steps);
        let mut updates = 0;

        while !budget.exhausted() {
            let options = collector::Options {
                critic: Some(&self.value),
                record_entropy: false,
            };
            let trajectory =
                collect_episode(&mut self.train_env, &self.policy, options, &mut budget)?;

            if trajectory.is_empty() {
                warn!("collected an empty trajectory, stopping");
                break;
            }

            self.update(&trajectory)?;
            updates += 1;

            reporter.record(trajectory.total_reward(), budget.taken());
        }

        Ok(reporter.finish(budget.taken(), updates))
    }

    pub fn evaluate_avg_return(&mut self) -> Result<f64> {
        self.policy.evaluate_avg_return(&mut self.eval_env)
    }

    fn compute_losses(&self, trajectory: &Trajectory) -> Result<Losses> {
        let device = self.policy_vs.device();

        let returns = estimator::discounted_returns(&trajectory.rewards(), self.gamma);
        let values = trajectory
            .values()
            .context("trajectory was collected without value estimates")?;

        let estimates = values.detach().to_device(tch::Device::Cpu);
        let estimates = Array1::from(Vec::<f32>::try_from(&estimates)?);
        let advantages = estimator::advantages(&returns, &estimates);

        let advantages = Tensor::from_slice(&advantages.to_vec()).to_device(device);
        let returns = Tensor::from_slice(&returns.to_vec()).to_device(values.device());

        Ok(Losses {
            policy: -(trajectory.log_probs() * &advantages).mean(Kind::Float),
            value: values.mse_loss(&returns, Reduction::Mean),
            advantages,
        })
    }

    fn update(&mut self, trajectory: &Trajectory) -> Result<()> {
        let losses = self.compute_losses(trajectory)?;

        self.policy_optimizer.zero_grad();
        self.value_optimizer.zero_grad();
        losses.policy.backward();
        losses.value.backward();
        self.policy_optimizer.step();
        self.value_optimizer.step();

        debug!(
            policy_loss = losses.policy.double_value(&[]),
            value_loss = losses.value.double_value(&[]),
            steps = trajectory.len(),
            finished = trajectory.finished,
            "actor-critic update"
        );

        Ok(())
    }

    pub fn builder<'a>() -> Builder<'a, Env> {
        Builder {
            policy_vs: None,
            value_vs: None,
            env: None,
            fc_layers: None,
            gamma: None,
            learning_rate: None,
            report_interval: None,
            smoothing: None,
            seed: None,
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
    policy_vs: Option<nn::VarStore>,
    value_vs: Option<nn::VarStore>,
    env: Option<Env>,
    fc_layers: Option<&'a [usize]>,
    gamma: Option<f32>,
    /// Shared by the policy and value optimizers.
    learning_rate: Option<f64>,
    report_interval: Option<usize>,
    smoothing: Option<Smoothing>,
    seed: Option<i64>,
}

impl<Env> Builder<'_, Env>
where
    Env: env::Env,
{
    pub fn build(self) -> Result<A2C<Env>> {
        let Some(env) = self.env else {
            bail!("an environment is required");
        };

        let gamma = self.gamma.unwrap_or(DEFAULT_GAMMA);
        let learning_rate = self.learning_rate.unwrap_or(DEFAULT_LEARNING_RATE);
        let fc_layers = self.fc_layers.unwrap_or(DEFAULT_FC_LAYERS);
        let report_interval = self.report_interval.unwrap_or(DEFAULT_INTERVAL);
        let smoothing = self.smoothing.unwrap_or_default();

        validate::discount(gamma)?;
        validate::learning_rate(learning_rate)?;
        validate::reporting(report_interval, smoothing)?;

        if let Some(seed) = self.seed {
            tch::manual_seed(seed);
        }

        let policy_vs = self
            .policy_vs
            .unwrap_or_else(|| nn::VarStore::new(tch::Device::Cpu));
        let value_vs = self
            .value_vs
            .unwrap_or_else(|| nn::VarStore::new(policy_vs.device()));

        let observation_space = Env::observation_space();
        let policy = PolicyNetwork::new(
            &policy_vs.root(),
            observation_space,
            Env::action_space(),
            fc_layers,
        )?;
        let value = ValueNetwork::new(&value_vs.root(), observation_space, fc_layers)?;

        let policy_optimizer = nn::Adam::default().build(&policy_vs, learning_rate)?;
        let value_optimizer = nn::Adam::default().build(&value_vs, learning_rate)?;

        Ok(A2C {
            policy_vs,
            policy,
            value,
            policy_optimizer,
            value_optimizer,
            gamma,
            report_interval,
            smoothing,
            train_env: Adapter::new(env.clone()),
            eval_env: Adapter::new(env),
        })
    }
}
