//! Bidirectional stepwise regression.
//!
//! Starts from the intercept-only model. Each step tries adding every
//! unused feature and dropping every used one, and takes the move with the
//! lowest AIC. Stops when no move improves AIC. AIC strictly decreases on
//! every accepted move, so the search terminates.

use tracing::trace;

use super::linear::FittedLinear;
use super::ols::{design, informative_columns, OlsFit};
use super::{check_training, FitFailure, FittedModel, ForecastModel, TrainingRow};

/// Minimum AIC improvement for a move to be accepted.
const MIN_IMPROVEMENT: f64 = 1e-9;

#[derive(Debug, Clone, Copy, Default)]
pub struct StepwiseRegression;

impl ForecastModel for StepwiseRegression {
    fn name(&self) -> &'static str {
        "stepwise"
    }

    fn fit(&self, rows: &[TrainingRow]) -> Result<Box<dyn FittedModel>, FitFailure> {
        let width = check_training(rows)?;
        let y: Vec<f64> = rows.iter().map(|r| r.target).collect();
        let candidates = informative_columns(rows);

        let mut selected: Vec<usize> = Vec::new();
        let mut best = OlsFit::fit(&design(rows, &selected), &y)?;

        loop {
            let mut moves: Vec<Vec<usize>> = candidates
                .iter()
                .filter(|c| !selected.contains(c))
                .map(|&c| {
                    let mut next = selected.clone();
                    next.push(c);
                    next.sort_unstable();
                    next
                })
                .collect();
            moves.extend((0..selected.len()).map(|i| {
                let mut next = selected.clone();
                next.remove(i);
                next
            }));

            let step = moves
                .into_iter()
                .filter_map(|cols| {
                    OlsFit::fit(&design(rows, &cols), &y)
                        .ok()
                        .map(|fit| (cols, fit))
                })
                .min_by(|a, b| a.1.aic().total_cmp(&b.1.aic()));

            match step {
                Some((cols, fit)) if fit.aic() < best.aic() - MIN_IMPROVEMENT => {
                    trace!(selected = ?cols, aic = fit.aic(), "stepwise move");
                    selected = cols;
                    best = fit;
                }
                _ => break,
            }
        }

        Ok(Box::new(FittedLinear {
            name: self.name(),
            width,
            columns: selected,
            fit: best,
        }))
    }
}
