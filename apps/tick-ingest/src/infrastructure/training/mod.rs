//! Training Adapters
//!
//! [`LinearTrainer`] fits a one-step autoregressive line
//! `next = slope * current + intercept` over each batch by ordinary least
//! squares. It is small enough to run inline and gives the pipeline a
//! real loss and accuracy to record.
//!
//! - loss: mean squared error of the one-step predictions
//! - accuracy: fraction of steps where the predicted direction matched
//! - model state: `{"slope", "intercept", "samples"}`

use async_trait::async_trait;
use serde_json::json;
use tokio::time::Instant;

use crate::application::ports::{TrainerPort, TrainingError};
use crate::domain::epoch::TrainingOutcome;

/// Fewest values needed to fit a line over consecutive pairs.
pub const MIN_TRAINING_VALUES: usize = 3;

/// Least-squares next-value predictor.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearTrainer;

impl LinearTrainer {
    /// Create a trainer.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn fit(values: &[f64]) -> Result<LinearFit, TrainingError> {
        if values.len() < MIN_TRAINING_VALUES {
            return Err(TrainingError::Rejected {
                message: format!(
                    "need at least {MIN_TRAINING_VALUES} values, got {}",
                    values.len()
                ),
            });
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(TrainingError::Rejected {
                message: "batch contains non-finite values".to_string(),
            });
        }

        let pairs = values.len() - 1;
        #[allow(clippy::cast_precision_loss)]
        let n = pairs as f64;
        let xs = &values[..pairs];
        let ys = &values[1..];

        let mean_x = xs.iter().sum::<f64>() / n;
        let mean_y = ys.iter().sum::<f64>() / n;
        let covariance: f64 = xs
            .iter()
            .zip(ys)
            .map(|(x, y)| (x - mean_x) * (y - mean_y))
            .sum();
        let variance: f64 = xs.iter().map(|x| (x - mean_x).powi(2)).sum();

        let (slope, intercept) = if variance.abs() < f64::EPSILON {
            (0.0, mean_y)
        } else {
            let slope = covariance / variance;
            (slope, mean_y - slope * mean_x)
        };

        let mut squared_error = 0.0;
        let mut direction_hits = 0usize;
        for (x, y) in xs.iter().zip(ys) {
            let predicted = slope.mul_add(*x, intercept);
            squared_error += (predicted - y).powi(2);
            if (predicted - x).signum() == (y - x).signum() {
                direction_hits += 1;
            }
        }

        #[allow(clippy::cast_precision_loss)]
        let accuracy = direction_hits as f64 / n;

        Ok(LinearFit {
            slope,
            intercept,
            loss: squared_error / n,
            accuracy,
            samples: pairs,
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct LinearFit {
    slope: f64,
    intercept: f64,
    loss: f64,
    accuracy: f64,
    samples: usize,
}

#[async_trait]
impl TrainerPort for LinearTrainer {
    async fn train(&self, values: Vec<f64>) -> Result<TrainingOutcome, TrainingError> {
        let started = Instant::now();
        let fit = Self::fit(&values)?;
        let duration_millis = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        if !fit.loss.is_finite() {
            return Err(TrainingError::BackendFailed {
                message: "fit diverged".to_string(),
            });
        }

        Ok(TrainingOutcome {
            loss: fit.loss,
            accuracy: fit.accuracy,
            duration_millis,
            model_state: json!({
                "slope": fit.slope,
                "intercept": fit.intercept,
                "samples": fit.samples,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fits_a_perfect_line() {
        let values: Vec<f64> = (0..20).map(f64::from).collect();
        let outcome = LinearTrainer::new().train(values).await.unwrap();

        assert!(outcome.loss < 1e-9);
        assert!((outcome.accuracy - 1.0).abs() < f64::EPSILON);
        assert!((outcome.model_state["slope"].as_f64().unwrap() - 1.0).abs() < 1e-9);
        assert!((outcome.model_state["intercept"].as_f64().unwrap() - 1.0).abs() < 1e-9);
        assert_eq!(outcome.model_state["samples"], 19);
    }

    #[tokio::test]
    async fn flat_series_predicts_the_mean() {
        let outcome = LinearTrainer::new().train(vec![5.0; 10]).await.unwrap();
        assert!(outcome.loss.abs() < f64::EPSILON);
        assert!((outcome.model_state["intercept"].as_f64().unwrap() - 5.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn rejects_short_batches() {
        let result = LinearTrainer::new().train(vec![1.0, 2.0]).await;
        assert!(matches!(result, Err(TrainingError::Rejected { .. })));
    }

    #[tokio::test]
    async fn rejects_non_finite_values() {
        let result = LinearTrainer::new()
            .train(vec![1.0, f64::NAN, 2.0, 3.0])
            .await;
        assert!(matches!(result, Err(TrainingError::Rejected { .. })));
    }

    #[tokio::test]
    async fn accuracy_is_a_fraction() {
        let values = vec![1.0, 3.0, 2.0, 4.0, 3.0, 5.0, 4.0, 6.0, 5.0, 7.0];
        let outcome = LinearTrainer::new().train(values).await.unwrap();
        assert!((0.0..=1.0).contains(&outcome.accuracy));
        assert!(outcome.loss >= 0.0);
    }
}
