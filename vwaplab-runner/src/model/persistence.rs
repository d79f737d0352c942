//! Naive baseline: tomorrow looks like the last day of the window.

use super::{check_test, FitFailure, FittedModel, ForecastModel, ModelDiagnostics, PredictionFailure, TestRow, TrainingRow};

#[derive(Debug, Clone, Copy, Default)]
pub struct Persistence;

struct FittedPersistence {
    last: f64,
    width: usize,
}

impl ForecastModel for Persistence {
    fn name(&self) -> &'static str {
        "persistence"
    }

    fn fit(&self, rows: &[TrainingRow]) -> Result<Box<dyn FittedModel>, FitFailure> {
        let last = rows
            .last()
            .ok_or(FitFailure::InsufficientRows { have: 0, need: 1 })?;
        if !last.target.is_finite() {
            return Err(FitFailure::NonFinite);
        }
        Ok(Box::new(FittedPersistence {
            last: last.target,
            width: last.features.len(),
        }))
    }
}

impl FittedModel for FittedPersistence {
    fn predict(&self, row: &TestRow) -> Result<f64, PredictionFailure> {
        check_test(row, self.width)?;
        Ok(self.last)
    }

    fn diagnostics(&self) -> ModelDiagnostics {
        ModelDiagnostics {
            model: "persistence".into(),
            intercept: Some(self.last),
            ..Default::default()
        }
    }
}
