use anyhow::{ensure, Result};
use tch::{
    nn::{self, LinearConfig, Module},
    Device, Kind, Tensor,
};

use crate::env::{Adapter, Env};

const EVAL_EPISODE_COUNT: u8 = 20;

fn build_seq(
    vs_path: &nn::Path,
    observation_space: usize,
    out_dim: usize,
    fc_layers: &[usize],
) -> Result<nn::Sequential> {
    ensure!(!fc_layers.is_empty(), "at least one hidden layer is required");

    let mut seq = nn::seq()
        .add(nn::linear(
            vs_path / "l1",
            observation_space as i64,
            fc_layers[0] as i64,
            LinearConfig::default(),
        ))
        .add_fn(Tensor::relu);

    for (i, pair) in fc_layers.windows(2).enumerate() {
        seq = seq
            .add(nn::linear(
                vs_path / format!("l{}", i + 2),
                pair[0] as i64,
                pair[1] as i64,
                LinearConfig::default(),
            ))
            .add_fn(Tensor::relu);
    }

    let last_layer_node_count = fc_layers[fc_layers.len() - 1] as i64;

    Ok(seq.add(nn::linear(
        vs_path / "out",
        last_layer_node_count,
        out_dim as i64,
        LinearConfig::default(),
    )))
}

#[must_use]
pub fn observation_tensor(observation: &[f32]) -> Tensor {
    Tensor::from_slice(observation)
}

/// One draw from the categorical action distribution, with the terms the losses need.
#[derive(Debug)]
pub struct ActionSample {
    pub action: usize,
    pub log_prob: Tensor,
    pub entropy: Tensor,
}

/// Maps a state to a categorical distribution over the discrete actions.
#[derive(Debug)]
pub struct PolicyNetwork {
    seq: nn::Sequential,
    device: Device,
}

impl Module for PolicyNetwork {
    /// Unnormalised action logits.
    fn forward(&self, xs: &Tensor) -> Tensor {
        xs.to_device(self.device).apply(&self.seq)
    }
}

impl PolicyNetwork {
    pub fn new(
        vs_path: &nn::Path,
        observation_space: usize,
        action_space: usize,
        fc_layers: &[usize],
    ) -> Result<Self> {
        ensure!(action_space > 0, "the action space is empty");
        Ok(Self {
            seq: build_seq(vs_path, observation_space, action_space, fc_layers)?,
            device: vs_path.device(),
        })
    }

    #[must_use]
    pub fn probabilities(&self, observation: &Tensor) -> Tensor {
        self.forward(observation).softmax(-1, Kind::Float)
    }

    pub fn sample(&self, observation: &[f32]) -> Result<ActionSample> {
        let log_probs = self
            .forward(&observation_tensor(observation))
            .log_softmax(-1, Kind::Float);
        let probs = log_probs.exp();

        let action = usize::try_from(probs.multinomial(1, true).int64_value(&[0]))?;
        let entropy = -(&probs * &log_probs).sum(Kind::Float);

        Ok(ActionSample {
            action,
            log_prob: log_probs.get(action as i64),
            entropy,
        })
    }

    pub fn chose_action(&self, observation: &[f32]) -> Result<usize> {
        let probs = tch::no_grad(|| self.probabilities(&observation_tensor(observation)));
        let action = probs.argmax(-1, false);
        Ok(usize::try_from(action.int64_value(&[]))?)
    }

    /// Average undiscounted return of greedy rollouts on `env`.
    pub fn evaluate_avg_return<E>(&self, env: &mut Adapter<E>) -> Result<f64>
    where
        E: Env,
    {
        let mut total_return = 0.0;
        for _ in 0..EVAL_EPISODE_COUNT {
            let mut observation = env.reset()?;

            loop {
                let action = self.chose_action(&observation)?;
                let transition = env.step(action)?;
                total_return += transition.reward;
                if transition.done() {
                    break;
                }
                observation = transition.observation;
            }
        }

        Ok(total_return / f64::from(EVAL_EPISODE_COUNT))
    }
}

/// Maps a state to a scalar estimate of the return that follows it.
#[derive(Debug)]
pub struct ValueNetwork {
    seq: nn::Sequential,
    device: Device,
}

impl Module for ValueNetwork {
    fn forward(&self, xs: &Tensor) -> Tensor {
        xs.to_device(self.device).apply(&self.seq)
    }
}

impl ValueNetwork {
    pub fn new(vs_path: &nn::Path, observation_space: usize, fc_layers: &[usize]) -> Result<Self> {
        Ok(Self {
            seq: build_seq(vs_path, observation_space, 1, fc_layers)?,
            device: vs_path.device(),
        })
    }

    /// Value estimate of shape `[1]`, still attached to the graph.
    #[must_use]
    pub fn criticize(&self, observation: &[f32]) -> Tensor {
        self.forward(&observation_tensor(observation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::{CartPole, CART_POLE_MAX_STEPS};
    use tch::nn::VarStore;

    #[test]
    fn probabilities_sum_to_one() {
        let vs = VarStore::new(Device::Cpu);
        let policy = PolicyNetwork::new(&vs.root(), 4, 3, &[16, 8]).unwrap();

        let probs = policy.probabilities(&observation_tensor(&[0.1, -0.2, 0.3, 0.0]));
        assert_eq!(probs.size(), vec![3]);
        assert!((probs.sum(Kind::Float).double_value(&[]) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn sample_is_within_action_space() {
        let vs = VarStore::new(Device::Cpu);
        let policy = PolicyNetwork::new(&vs.root(), 4, 2, &[16]).unwrap();

        for _ in 0..20 {
            let sample = policy.sample(&[0.0, 0.1, 0.2, 0.3]).unwrap();
            assert!(sample.action < 2);
            assert!(sample.log_prob.double_value(&[]) <= 0.0);
            // Entropy of a two-way categorical is bounded by ln 2.
            let entropy = sample.entropy.double_value(&[]);
            assert!((0.0..=2f64.ln() + 1e-6).contains(&entropy));
        }
    }

    #[test]
    fn value_is_scalar() {
        let vs = VarStore::new(Device::Cpu);
        let critic = ValueNetwork::new(&vs.root(), 4, &[8, 8]).unwrap();
        assert_eq!(critic.criticize(&[0.0; 4]).size(), vec![1]);
    }

    #[test]
    fn greedy_evaluation_averages_episode_returns() {
        let vs = VarStore::new(Device::Cpu);
        let policy = PolicyNetwork::new(&vs.root(), 4, 2, &[8]).unwrap();
        let mut env = Adapter::new(CartPole::with_seed(5));

        let avg_return = policy.evaluate_avg_return(&mut env).unwrap();
        assert!((1.0..=f64::from(CART_POLE_MAX_STEPS)).contains(&avg_return));
    }

    #[test]
    fn empty_hidden_layers_are_rejected() {
        let vs = VarStore::new(Device::Cpu);
        assert!(ValueNetwork::new(&vs.root(), 4, &[]).is_err());
    }
}
