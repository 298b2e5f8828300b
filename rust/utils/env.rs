use std::collections::HashMap;

use anyhow::{ensure, Result};

pub type Observation = Vec<f32>;
pub type Info = HashMap<String, f64>;

/// Info key set by [`Legacy`] when an episode ended on the time limit rather than on failure.
pub const TIME_LIMIT_TRUNCATED: &str = "TimeLimit.truncated";

/// What an environment hands back from `reset`. Older environments return the bare
/// observation, newer ones pair it with an info map.
#[derive(Clone, Debug, PartialEq)]
pub enum Reset {
    Observation(Observation),
    WithInfo(Observation, Info),
}

/// What an environment hands back from `step`, in either of the two conventions in use.
#[derive(Clone, Debug, PartialEq)]
pub enum StepResult {
    /// `(next_state, reward, terminated, truncated, info)`
    Gymnasium {
        observation: Observation,
        reward: f64,
        terminated: bool,
        truncated: bool,
        info: Info,
    },
    /// `(next_state, reward, done, info)`
    Legacy {
        observation: Observation,
        reward: f64,
        done: bool,
        info: Info,
    },
}

pub trait Env: Clone {
    fn observation_space() -> usize;
    fn action_space() -> usize;
    fn reset(&mut self) -> Result<Reset>;
    fn step(&mut self, action: usize) -> Result<StepResult>;
}

/// A step normalised to a single shape regardless of which convention produced it.
#[derive(Clone, Debug, PartialEq)]
pub struct Transition {
    pub observation: Observation,
    pub reward: f64,
    pub terminated: bool,
    pub truncated: bool,
}

impl Transition {
    #[must_use]
    pub fn done(&self) -> bool {
        self.terminated || self.truncated
    }
}

/// Drives an [`Env`] and irons out the differences between the reset and step conventions.
#[derive(Clone, Debug)]
pub struct Adapter<E>
where
    E: Env,
{
    env: E,
}

impl<E> Adapter<E>
where
    E: Env,
{
    pub fn new(env: E) -> Self {
        Self { env }
    }

    pub fn reset(&mut self) -> Result<Observation> {
        let observation = match self.env.reset()? {
            Reset::Observation(observation) | Reset::WithInfo(observation, _) => observation,
        };
        check_observation::<E>(&observation)?;
        Ok(observation)
    }

    pub fn step(&mut self, action: usize) -> Result<Transition> {
        ensure!(
            action < E::action_space(),
            "action {action} is outside the action space of size {}",
            E::action_space()
        );

        let transition = match self.env.step(action)? {
            StepResult::Gymnasium {
                observation,
                reward,
                terminated,
                truncated,
                ..
            } => Transition {
                observation,
                reward,
                terminated,
                truncated,
            },
            StepResult::Legacy {
                observation,
                reward,
                done,
                info,
            } => {
                let time_limit = info
                    .get(TIME_LIMIT_TRUNCATED)
                    .is_some_and(|flag| *flag != 0.0);
                Transition {
                    observation,
                    reward,
                    terminated: done && !time_limit,
                    truncated: done && time_limit,
                }
            }
        };

        check_observation::<E>(&transition.observation)?;
        Ok(transition)
    }
}

fn check_observation<E: Env>(observation: &[f32]) -> Result<()> {
    ensure!(
        observation.len() == E::observation_space(),
        "environment produced an observation of length {}, expected {}",
        observation.len(),
        E::observation_space()
    );
    Ok(())
}

/// Wraps an environment so it speaks the older four-field step convention.
#[derive(Clone, Debug)]
pub struct Legacy<E>(pub E);

impl<E> Env for Legacy<E>
where
    E: Env,
{
    fn observation_space() -> usize {
        E::observation_space()
    }

    fn action_space() -> usize {
        E::action_space()
    }

    fn reset(&mut self) -> Result<Reset> {
        let observation = match self.0.reset()? {
            Reset::Observation(observation) | Reset::WithInfo(observation, _) => observation,
        };
        Ok(Reset::Observation(observation))
    }

    fn step(&mut self, action: usize) -> Result<StepResult> {
        Ok(match self.0.step(action)? {
            StepResult::Gymnasium {
                observation,
                reward,
                terminated,
                truncated,
                mut info,
            } => {
                if truncated && !terminated {
                    info.insert(TIME_LIMIT_TRUNCATED.to_owned(), 1.0);
                }
                StepResult::Legacy {
                    observation,
                    reward,
                    done: terminated || truncated,
                    info,
                }
            }
            legacy @ StepResult::Legacy { .. } => legacy,
        })
    }
}

mod cart_pole {
    pub use super::Env as EnvTrait;
    use super::{Info, Reset, StepResult};
    use anyhow::Result;
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use std::f64::consts::PI;

    #[derive(Clone, Copy, Debug, Default)]
    struct State(f64, f64, f64, f64);

    impl State {
        fn sample(rng: &mut StdRng) -> Self {
            Self(
                rng.gen_range(-0.05..0.05),
                rng.gen_range(-0.05..0.05),
                rng.gen_range(-0.05..0.05),
                rng.gen_range(-0.05..0.05),
            )
        }

        fn observation(self) -> Vec<f32> {
            vec![self.0 as f32, self.1 as f32, self.2 as f32, self.3 as f32]
        }
    }

    #[derive(Clone, Debug)]
    pub struct Env {
        current_step: u16,
        state: State,
        rng: StdRng,
    }

    pub const MAX_STEPS: u16 = 500;
    const REWARD_PER_STEP: f64 = 1.0;
    const GRAVITY: f64 = 9.8;
    const CART_MASS: f64 = 1.0;
    const POLE_MASS: f64 = 0.1;
    const TOTAL_MASS: f64 = CART_MASS + POLE_MASS;
    const POLE_LENGTH: f64 = 0.5;
    const POLE_MASS_LENGTH: f64 = POLE_MASS * POLE_LENGTH;
    const FORCE_MAG: f64 = 10.0;
    const TAU: f64 = 0.02;
    const THETA_THRESHOLD_RADIANS: f64 = 12.0 * 2.0 * PI / 360.0;
    const X_THRESHOLD: f64 = 2.4;

    impl Env {
        #[must_use]
        pub fn new() -> Self {
            Self::from_rng(StdRng::from_entropy())
        }

        #[must_use]
        pub fn with_seed(seed: u64) -> Self {
            Self::from_rng(StdRng::seed_from_u64(seed))
        }

        fn from_rng(mut rng: StdRng) -> Self {
            Self {
                current_step: 0,
                state: State::sample(&mut rng),
                rng,
            }
        }
    }

    impl EnvTrait for Env {
        fn observation_space() -> usize {
            4
        }

        fn action_space() -> usize {
            2
        }

        fn reset(&mut self) -> Result<Reset> {
            self.state = State::sample(&mut self.rng);
            self.current_step = 0;
            Ok(Reset::WithInfo(self.state.observation(), Info::new()))
        }

        fn step(&mut self, action: usize) -> Result<StepResult> {
            self.current_step = self.current_step.saturating_add(1);

            let State(mut x, mut x_dot, mut theta, mut theta_dot) = self.state;

            let force = if action == 1 { FORCE_MAG } else { -FORCE_MAG };

            let costheta = theta.cos();
            let sintheta = theta.sin();

            let tmp = (force + POLE_MASS_LENGTH * theta_dot.powi(2) * sintheta) / TOTAL_MASS;
            let thetaacc = (GRAVITY * sintheta - costheta * tmp)
                / (POLE_LENGTH * (4.0 / 3.0 - POLE_MASS * costheta.powi(2) / TOTAL_MASS));
            let xacc = tmp - POLE_MASS_LENGTH * thetaacc * costheta / TOTAL_MASS;

            x += TAU * x_dot;
            x_dot += TAU * xacc;
            theta += TAU * theta_dot;
            theta_dot += TAU * thetaacc;

            self.state = State(x, x_dot, theta, theta_dot);

            let terminated = !(-X_THRESHOLD..=X_THRESHOLD).contains(&x)
                || !(-THETA_THRESHOLD_RADIANS..=THETA_THRESHOLD_RADIANS).contains(&theta);

            Ok(StepResult::Gymnasium {
                observation: self.state.observation(),
                reward: REWARD_PER_STEP,
                terminated,
                truncated: !terminated && self.current_step >= MAX_STEPS,
                info: Info::new(),
            })
        }
    }

    impl Default for Env {
        fn default() -> Self {
            Self::new()
        }
    }
}
pub use cart_pole::{Env as CartPole, MAX_STEPS as CART_POLE_MAX_STEPS};

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug)]
    struct Scripted {
        steps: Vec<StepResult>,
        cursor: usize,
    }

    impl Scripted {
        fn new(steps: Vec<StepResult>) -> Self {
            Self { steps, cursor: 0 }
        }
    }

    impl Env for Scripted {
        fn observation_space() -> usize {
            2
        }

        fn action_space() -> usize {
            3
        }

        fn reset(&mut self) -> Result<Reset> {
            self.cursor = 0;
            Ok(Reset::Observation(vec![0.0, 0.0]))
        }

        fn step(&mut self, _action: usize) -> Result<StepResult> {
            let step = self.steps[self.cursor].clone();
            self.cursor += 1;
            Ok(step)
        }
    }

    fn legacy(done: bool, info: Info) -> StepResult {
        StepResult::Legacy {
            observation: vec![1.0, 2.0],
            reward: 0.5,
            done,
            info,
        }
    }

    #[test]
    fn gymnasium_step_keeps_both_flags() {
        let mut adapter = Adapter::new(Scripted::new(vec![StepResult::Gymnasium {
            observation: vec![1.0, 2.0],
            reward: 1.0,
            terminated: false,
            truncated: true,
            info: Info::new(),
        }]));
        adapter.reset().unwrap();

        let transition = adapter.step(0).unwrap();
        assert!(!transition.terminated);
        assert!(transition.truncated);
        assert!(transition.done());
    }

    #[test]
    fn legacy_done_is_termination() {
        let mut adapter = Adapter::new(Scripted::new(vec![
            legacy(false, Info::new()),
            legacy(true, Info::new()),
        ]));
        adapter.reset().unwrap();

        assert!(!adapter.step(1).unwrap().done());
        let last = adapter.step(1).unwrap();
        assert!(last.terminated);
        assert!(!last.truncated);
        assert!((last.reward - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn legacy_time_limit_is_truncation() {
        let info = Info::from([(TIME_LIMIT_TRUNCATED.to_owned(), 1.0)]);
        let mut adapter = Adapter::new(Scripted::new(vec![legacy(true, info)]));
        adapter.reset().unwrap();

        let transition = adapter.step(2).unwrap();
        assert!(!transition.terminated);
        assert!(transition.truncated);
    }

    #[test]
    fn rejects_out_of_range_action() {
        let mut adapter = Adapter::new(Scripted::new(vec![legacy(false, Info::new())]));
        adapter.reset().unwrap();
        assert!(adapter.step(3).is_err());
    }

    #[test]
    fn rejects_wrong_observation_length() {
        let mut adapter = Adapter::new(Scripted::new(vec![StepResult::Legacy {
            observation: vec![1.0],
            reward: 0.0,
            done: false,
            info: Info::new(),
        }]));
        adapter.reset().unwrap();
        assert!(adapter.step(0).is_err());
    }

    #[test]
    fn cart_pole_episode_ends_within_time_limit() {
        let mut adapter = Adapter::new(CartPole::with_seed(7));
        let observation = adapter.reset().unwrap();
        assert_eq!(observation.len(), 4);

        let mut steps = 0;
        loop {
            steps += 1;
            if adapter.step(1).unwrap().done() {
                break;
            }
        }
        assert!(steps <= usize::from(CART_POLE_MAX_STEPS));
    }

    #[test]
    fn cart_pole_is_reproducible_with_seed() {
        let mut a = CartPole::with_seed(42);
        let mut b = CartPole::with_seed(42);
        assert_eq!(a.reset().unwrap(), b.reset().unwrap());
        assert_eq!(a.step(0).unwrap(), b.step(0).unwrap());
    }

    #[test]
    fn cart_pole_keeps_stepping_past_the_step_counter_range() {
        let mut env = CartPole::with_seed(11);
        env.reset().unwrap();

        let mut last = None;
        for i in 0..=u32::from(u16::MAX) + 10 {
            last = Some(env.step((i % 2) as usize).unwrap());
        }

        let Some(StepResult::Gymnasium {
            terminated,
            truncated,
            ..
        }) = last
        else {
            panic!("expected a gymnasium step");
        };
        assert!(terminated || truncated);
    }

    #[test]
    fn legacy_wrapper_marks_time_limit() {
        let mut env = Legacy(Scripted::new(vec![StepResult::Gymnasium {
            observation: vec![1.0, 2.0],
            reward: 1.0,
            terminated: false,
            truncated: true,
            info: Info::new(),
        }]));
        assert!(matches!(env.reset().unwrap(), Reset::Observation(_)));

        let StepResult::Legacy { done, info, .. } = env.step(0).unwrap() else {
            panic!("expected a legacy step");
        };
        assert!(done);
        assert!(info.contains_key(TIME_LIMIT_TRUNCATED));
    }

    #[test]
    fn legacy_wrapped_cart_pole_round_trips_through_adapter() {
        let mut adapter = Adapter::new(Legacy(CartPole::with_seed(11)));
        adapter.reset().unwrap();

        let mut steps = 0;
        while !adapter.step(steps % 2).unwrap().done() {
            steps += 1;
        }
        assert!(steps < usize::from(CART_POLE_MAX_STEPS));
    }
}
