//! Periodic reward summaries printed while training.

use tracing::info;

pub const DEFAULT_INTERVAL: usize = 10;
pub const DEFAULT_SMA_WINDOW: usize = 3;
pub const DEFAULT_EMA_FACTOR: f64 = 0.1;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Smoothing {
    None,
    /// Unweighted mean over the trailing `window` checkpoints.
    Simple { window: usize },
    /// Exponential moving average over individual episode rewards.
    Exponential { factor: f64 },
}

impl Default for Smoothing {
    fn default() -> Self {
        Self::Simple {
            window: DEFAULT_SMA_WINDOW,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Checkpoint {
    /// Number of episodes completed when the checkpoint was taken.
    pub episode: usize,
    pub total_steps: usize,
    /// Mean reward of the last `interval` episodes.
    pub recent_average: f64,
    pub smoothed: f64,
}

/// Mean of the last `window` values, or the last value when fewer than `window` exist.
#[must_use]
pub fn trailing_average(values: &[f64], window: usize) -> Option<f64> {
    let last = *values.last()?;
    if window == 0 || values.len() < window {
        return Some(last);
    }
    Some(values[values.len() - window..].iter().sum::<f64>() / window as f64)
}

/// Every full-window trailing mean of `values`. Sequences shorter than the window come
/// back unchanged.
#[must_use]
pub fn moving_average(values: &[f64], window: usize) -> Vec<f64> {
    if window == 0 || values.len() < window {
        return values.to_vec();
    }
    values
        .windows(window)
        .map(|w| w.iter().sum::<f64>() / window as f64)
        .collect()
}

#[derive(Debug)]
pub struct ProgressReporter {
    interval: usize,
    smoothing: Smoothing,
    episode_rewards: Vec<f64>,
    checkpoints: Vec<Checkpoint>,
    ema: Option<f64>,
}

impl ProgressReporter {
    #[must_use]
    pub fn new(interval: usize, smoothing: Smoothing) -> Self {
        Self {
            interval: interval.max(1),
            smoothing,
            episode_rewards: Vec::new(),
            checkpoints: Vec::new(),
            ema: None,
        }
    }

    #[must_use]
    pub fn episode_rewards(&self) -> &[f64] {
        &self.episode_rewards
    }

    #[must_use]
    pub fn checkpoints(&self) -> &[Checkpoint] {
        &self.checkpoints
    }

    /// Appends an episode's total reward and logs a checkpoint every `interval` episodes.
    pub fn record(&mut self, episode_reward: f64, total_steps: usize) -> Option<Checkpoint> {
        self.episode_rewards.push(episode_reward);

        if let Smoothing::Exponential { factor } = self.smoothing {
            self.ema = Some(match self.ema {
                Some(ema) => factor * episode_reward + (1.0 - factor) * ema,
                None => episode_reward,
            });
        }

        let episode = self.episode_rewards.len();
        if episode % self.interval != 0 {
            return None;
        }

        let recent = &self.episode_rewards[episode - self.interval..];
        let recent_average = recent.iter().sum::<f64>() / recent.len() as f64;

        let smoothed = match self.smoothing {
            Smoothing::None => recent_average,
            Smoothing::Simple { window } => {
                let mut means = self.recent_averages();
                means.push(recent_average);
                trailing_average(&means, window).unwrap_or(recent_average)
            }
            Smoothing::Exponential { .. } => self.ema.unwrap_or(recent_average),
        };

        let checkpoint = Checkpoint {
            episode,
            total_steps,
            recent_average,
            smoothed,
        };
        self.checkpoints.push(checkpoint);

        info!(
            "Steps: {total_steps}, Episode: {episode}, Avg over last {}: {recent_average:.1}, Smoothed: {smoothed:.1}",
            self.interval
        );

        Some(checkpoint)
    }

    fn recent_averages(&self) -> Vec<f64> {
        self.checkpoints
            .iter()
            .map(|checkpoint| checkpoint.recent_average)
            .collect()
    }

    /// Smoothed view of the whole checkpoint sequence.
    #[must_use]
    pub fn smoothed(&self) -> Vec<f64> {
        match self.smoothing {
            Smoothing::Simple { window } => moving_average(&self.recent_averages(), window),
            Smoothing::None | Smoothing::Exponential { .. } => self
                .checkpoints
                .iter()
                .map(|checkpoint| checkpoint.smoothed)
                .collect(),
        }
    }

    pub fn finish(self, total_steps: usize, updates: usize) -> TrainingReport {
        TrainingReport {
            smoothed: self.smoothed(),
            episode_rewards: self.episode_rewards,
            checkpoints: self.checkpoints,
            total_steps,
            updates,
        }
    }
}

/// Outcome of a training run.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TrainingReport {
    /// Total reward of every episode, including a final one cut short by a step budget.
    pub episode_rewards: Vec<f64>,
    pub checkpoints: Vec<Checkpoint>,
    /// Checkpoint means after smoothing over the whole run.
    pub smoothed: Vec<f64>,
    pub total_steps: usize,
    pub updates: usize,
}
