use anyhow::{ensure, Result};

use crate::report::Smoothing;

pub fn discount(gamma: f32) -> Result<()> {
    ensure!(
        (0.0..=1.0).contains(&gamma),
        "discount factor must lie in [0, 1], got {gamma}"
    );
    Ok(())
}

pub fn learning_rate(learning_rate: f64) -> Result<()> {
    ensure!(
        learning_rate.is_finite() && learning_rate > 0.0,
        "learning rate must be positive, got {learning_rate}"
    );
    Ok(())
}

pub fn reporting(interval: usize, smoothing: Smoothing) -> Result<()> {
    ensure!(interval > 0, "report interval must be at least one episode");
    match smoothing {
        Smoothing::None => {}
        Smoothing::Simple { window } => {
            ensure!(window > 0, "smoothing window must be at least one checkpoint");
        }
        Smoothing::Exponential { factor } => {
            ensure!(
                factor > 0.0 && factor <= 1.0,
                "smoothing factor must lie in (0, 1], got {factor}"
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discount_bounds() {
        assert!(discount(0.0).is_ok());
        assert!(discount(1.0).is_ok());
        assert!(discount(-0.1).is_err());
        assert!(discount(f32::NAN).is_err());
    }

    #[test]
    fn learning_rate_must_be_positive() {
        assert!(learning_rate(5e-4).is_ok());
        assert!(learning_rate(0.0).is_err());
        assert!(learning_rate(f64::INFINITY).is_err());
    }

    #[test]
    fn reporting_rejects_degenerate_windows() {
        assert!(reporting(10, Smoothing::default()).is_ok());
        assert!(reporting(0, Smoothing::None).is_err());
        assert!(reporting(10, Smoothing::Simple { window: 0 }).is_err());
        assert!(reporting(10, Smoothing::Exponential { factor: 0.0 }).is_err());
    }
}
