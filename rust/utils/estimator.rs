//! Return and advantage estimation over a single trajectory.

use ndarray::Array1;

/// Added to the standard deviation so constant or single-step returns normalise to zero
/// instead of NaN.
pub const NORMALIZE_EPSILON: f32 = 1e-9;

/// Discounted return of every step, `R_t = r_t + gamma * R_{t+1}` with `R_T = 0`.
#[must_use]
pub fn discounted_returns(rewards: &[f32], gamma: f32) -> Array1<f32> {
    let mut returns = Array1::<f32>::zeros(rewards.len());

    let mut discounted_sum = 0.0;
    for (i, reward) in rewards.iter().enumerate().rev() {
        discounted_sum = reward + gamma * discounted_sum;
        returns[i] = discounted_sum;
    }

    returns
}

/// Shifts to zero mean and scales by the population standard deviation.
#[must_use]
pub fn normalize(returns: Array1<f32>) -> Array1<f32> {
    let Some(mean) = returns.mean() else {
        return returns;
    };
    let std_dev = returns.std(0.);

    (returns - mean) / (std_dev + NORMALIZE_EPSILON)
}

/// `A_t = R_t - V(s_t)`. The values are expected to be detached already.
#[must_use]
pub fn advantages(returns: &Array1<f32>, values: &Array1<f32>) -> Array1<f32> {
    returns - values
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mean_and_std(values: &Array1<f32>) -> (f32, f32) {
        (values.mean().unwrap(), values.std(0.))
    }

    #[test]
    fn returns_have_trajectory_length() {
        let rewards = [0.5, -1.0, 2.0, 0.0, 3.0];
        assert_eq!(discounted_returns(&rewards, 0.9).len(), rewards.len());
        assert_eq!(normalize(discounted_returns(&rewards, 0.9)).len(), rewards.len());
    }

    #[test]
    fn backward_accumulation() {
        let returns = discounted_returns(&[1.0, 2.0, 3.0], 0.5);
        // 3, 2 + 0.5 * 3, 1 + 0.5 * 3.5
        assert_eq!(returns.to_vec(), vec![2.75, 3.5, 3.0]);
    }

    #[test]
    fn zero_gamma_returns_immediate_rewards() {
        let rewards = [1.0, -2.0, 0.25, 7.0];
        assert_eq!(discounted_returns(&rewards, 0.0).to_vec(), rewards.to_vec());
    }

    #[test]
    fn constant_rewards_give_strictly_decreasing_returns() {
        let returns = discounted_returns(&[1.0; 10], 0.99);
        for pair in returns.windows(2) {
            assert!(pair[0] > pair[1], "{} should exceed {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn normalized_returns_are_standardised() {
        let returns = normalize(discounted_returns(&[1.0, 0.0, 3.0, -2.0, 5.0, 1.0], 0.99));
        let (mean, std) = mean_and_std(&returns);
        assert!(mean.abs() < 1e-5, "mean was {mean}");
        assert!((std - 1.0).abs() < 1e-4, "std was {std}");
    }

    #[test]
    fn single_step_episode_is_defined() {
        let raw = discounted_returns(&[4.0], 0.99);
        assert_eq!(raw.to_vec(), vec![4.0]);

        let normalized = normalize(raw);
        assert!(normalized.iter().all(|value| value.is_finite()));
        assert_eq!(normalized.to_vec(), vec![0.0]);
    }

    #[test]
    fn identical_returns_normalise_to_zero() {
        let normalized = normalize(Array1::from_elem(5, 3.0));
        assert!(normalized.iter().all(|value| *value == 0.0));
    }

    #[test]
    fn empty_trajectory() {
        assert!(discounted_returns(&[], 0.99).is_empty());
        assert!(normalize(Array1::zeros(0)).is_empty());
    }

    #[test]
    fn advantage_subtracts_baseline() {
        let returns = discounted_returns(&[1.0, 1.0], 1.0);
        let values = Array1::from_vec(vec![1.5, 0.25]);
        assert_eq!(advantages(&returns, &values).to_vec(), vec![0.5, 0.75]);
    }
}
