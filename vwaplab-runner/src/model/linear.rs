//! Multiple linear regression on all non-constant features.

use super::ols::{design, informative_columns, OlsFit};
use super::{
    check_test, check_training, finite, FitFailure, FittedModel, ForecastModel,
    ModelDiagnostics, PredictionFailure, TestRow, TrainingRow,
};

/// OLS with intercept. Features that are constant over the window carry no
/// information next to the intercept and are left out of the fit.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearRegression;

pub(crate) struct FittedLinear {
    pub(crate) name: &'static str,
    pub(crate) width: usize,
    pub(crate) columns: Vec<usize>,
    pub(crate) fit: OlsFit,
}

impl FittedModel for FittedLinear {
    fn predict(&self, row: &TestRow) -> Result<f64, PredictionFailure> {
        check_test(row, self.width)?;
        let x: Vec<f64> = self.columns.iter().map(|&j| row.features[j]).collect();
        finite(self.fit.predict(&x))
    }

    fn diagnostics(&self) -> ModelDiagnostics {
        let (intercept, coefficients) = self.fit.coefficients();
        ModelDiagnostics {
            model: self.name.into(),
            selected: self.columns.clone(),
            lag_order: None,
            intercept: Some(intercept),
            coefficients,
            aic: Some(self.fit.aic()),
        }
    }
}

impl ForecastModel for LinearRegression {
    fn name(&self) -> &'static str {
        "linear"
    }

    fn fit(&self, rows: &[TrainingRow]) -> Result<Box<dyn FittedModel>, FitFailure> {
        let width = check_training(rows)?;
        let columns = informative_columns(rows);
        if width > 0 && columns.is_empty() && rows.len() >= 2 {
            return Err(FitFailure::DegenerateFeature { index: 0 });
        }
        let y: Vec<f64> = rows.iter().map(|r| r.target).collect();
        let fit = OlsFit::fit(&design(rows, &columns), &y)?;
        Ok(Box::new(FittedLinear {
            name: self.name(),
            width,
            columns,
            fit,
        }))
    }
}
