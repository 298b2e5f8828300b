use anyhow::Result;
use tch::Tensor;

use crate::{
    env::{Adapter, Env, Observation},
    model::{PolicyNetwork, ValueNetwork},
};

/// Global count of environment steps, optionally capped.
#[derive(Clone, Copy, Debug, Default)]
pub struct StepBudget {
    limit: Option<usize>,
    taken: usize,
}

impl StepBudget {
    #[must_use]
    pub fn unlimited() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn limited(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            taken: 0,
        }
    }

    #[must_use]
    pub fn taken(&self) -> usize {
        self.taken
    }

    #[must_use]
    pub fn exhausted(&self) -> bool {
        self.limit.is_some_and(|limit| self.taken >= limit)
    }

    fn consume(&mut self) {
        self.taken += 1;
    }
}

#[derive(Debug)]
pub struct StepRecord {
    pub state: Observation,
    pub action: usize,
    pub log_prob: Tensor,
    pub reward: f64,
    pub entropy: Option<Tensor>,
    pub value: Option<Tensor>,
}

/// The steps of one episode, in order. `finished` is false when the step budget cut the
/// episode short.
#[derive(Debug, Default)]
pub struct Trajectory {
    pub steps: Vec<StepRecord>,
    pub finished: bool,
}

impl Trajectory {
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    #[must_use]
    pub fn rewards(&self) -> Vec<f32> {
        self.steps.iter().map(|step| step.reward as f32).collect()
    }

    #[must_use]
    pub fn total_reward(&self) -> f64 {
        self.steps.iter().map(|step| step.reward).sum()
    }

    #[must_use]
    pub fn log_probs(&self) -> Tensor {
        Tensor::stack(
            &self
                .steps
                .iter()
                .map(|step| &step.log_prob)
                .collect::<Vec<_>>(),
            0,
        )
    }

    /// Per-step entropies, or `None` when they were not recorded.
    #[must_use]
    pub fn entropies(&self) -> Option<Tensor> {
        let entropies = self
            .steps
            .iter()
            .map(|step| step.entropy.as_ref())
            .collect::<Option<Vec<_>>>()?;
        Some(Tensor::stack(&entropies, 0))
    }

    /// Per-step value estimates of shape `[T]`, or `None` when no critic was used.
    #[must_use]
    pub fn values(&self) -> Option<Tensor> {
        let values = self
            .steps
            .iter()
            .map(|step| step.value.as_ref())
            .collect::<Option<Vec<_>>>()?;
        Some(Tensor::cat(&values, 0))
    }
}

/// What to record alongside the log-probability of each sampled action.
#[derive(Clone, Copy, Debug, Default)]
pub struct Options<'a> {
    pub critic: Option<&'a ValueNetwork>,
    pub record_entropy: bool,
}

/// Runs one episode from a fresh reset until it ends or `budget` runs out.
///
/// Nothing is stepped when the budget is already exhausted, so the returned trajectory
/// can be empty.
pub fn collect_episode<E>(
    env: &mut Adapter<E>,
    policy: &PolicyNetwork,
    options: Options,
    budget: &mut StepBudget,
) -> Result<Trajectory>
where
    E: Env,
{
    let mut trajectory = Trajectory::default();
    if budget.exhausted() {
        return Ok(trajectory);
    }

    let mut state = env.reset()?;

    while !budget.exhausted() {
        let sample = policy.sample(&state)?;
        let value = options.critic.map(|critic| critic.criticize(&state));

        let transition = env.step(sample.action)?;
        budget.consume();

        let done = transition.done();
        let next_state = transition.observation;

        trajectory.steps.push(StepRecord {
            state: std::mem::replace(&mut state, next_state),
            action: sample.action,
            log_prob: sample.log_prob,
            reward: transition.reward,
            entropy: options.record_entropy.then_some(sample.entropy),
            value,
        });

        if done {
            trajectory.finished = true;
            break;
        }
    }

    Ok(trajectory)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::CartPole;
    use tch::{nn::VarStore, Device};

    fn policy(vs: &VarStore) -> PolicyNetwork {
        PolicyNetwork::new(&vs.root(), 4, 2, &[16]).unwrap()
    }

    #[test]
    fn unlimited_budget_runs_to_episode_end() {
        let vs = VarStore::new(Device::Cpu);
        let policy = policy(&vs);
        let mut env = Adapter::new(CartPole::with_seed(1));
        let mut budget = StepBudget::unlimited();

        let trajectory =
            collect_episode(&mut env, &policy, Options::default(), &mut budget).unwrap();

        assert!(trajectory.finished);
        assert!(!trajectory.is_empty());
        assert_eq!(trajectory.len(), budget.taken());
        assert!(trajectory.entropies().is_none());
        assert!(trajectory.values().is_none());
        assert!((trajectory.total_reward() - trajectory.len() as f64).abs() < f64::EPSILON);
    }

    #[test]
    fn budget_cuts_episode_short() {
        let vs = VarStore::new(Device::Cpu);
        let policy = policy(&vs);
        let mut env = Adapter::new(CartPole::with_seed(2));
        let mut budget = StepBudget::limited(3);

        let trajectory =
            collect_episode(&mut env, &policy, Options::default(), &mut budget).unwrap();

        // Cart-pole cannot fail within three steps of a near-upright start.
        assert!(!trajectory.finished);
        assert_eq!(trajectory.len(), 3);
        assert!(budget.exhausted());

        let next = collect_episode(&mut env, &policy, Options::default(), &mut budget).unwrap();
        assert!(next.is_empty());
        assert_eq!(budget.taken(), 3);
    }

    #[test]
    fn records_entropy_and_values_on_request() {
        let vs = VarStore::new(Device::Cpu);
        let policy = policy(&vs);
        let critic_vs = VarStore::new(Device::Cpu);
        let critic = ValueNetwork::new(&critic_vs.root(), 4, &[16]).unwrap();
        let mut env = Adapter::new(CartPole::with_seed(3));
        let mut budget = StepBudget::limited(50);

        let options = Options {
            critic: Some(&critic),
            record_entropy: true,
        };
        let trajectory = collect_episode(&mut env, &policy, options, &mut budget).unwrap();
        let len = trajectory.len() as i64;

        assert_eq!(trajectory.log_probs().size(), vec![len]);
        assert_eq!(trajectory.entropies().unwrap().size(), vec![len]);
        assert_eq!(trajectory.values().unwrap().size(), vec![len]);
        assert_eq!(trajectory.rewards().len(), trajectory.len());
    }
}
