use anyhow::Context;
use serde::Deserialize;

use crate::engine::{Depends, Inputs, Task};
use crate::table::Table;

use super::Period;

/// Appends a discounted customer lifetime value column, `CLV`, to a
/// per-customer summary.
///
/// `CLV = monetary × frequency / (1 + discount_rate) ^ (periods / per_month)`,
/// where the monthly `discount_rate` is scaled to the length of `period`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Ltv {
    pub discount_rate: f64,
    pub periods: u32,
    pub period: Period,
    pub frequency_column: String,
    pub monetary_column: String,
}

impl Default for Ltv {
    fn default() -> Self {
        Self {
            discount_rate: 0.01,
            periods: 180,
            period: Period::Week,
            frequency_column: "frequency".into(),
            monetary_column: "monetary_value".into(),
        }
    }
}

impl Ltv {
    pub fn discount_rate(mut self, rate: f64) -> Self {
        self.discount_rate = rate;
        self
    }

    pub fn horizon(mut self, periods: u32, period: Period) -> Self {
        self.periods = periods;
        self.period = period;
        self
    }

    pub fn columns(mut self, frequency: impl Into<String>, monetary: impl Into<String>) -> Self {
        self.frequency_column = frequency.into();
        self.monetary_column = monetary.into();
        self
    }

    fn discount(&self) -> f64 {
        (1.0 + self.discount_rate).powf(f64::from(self.periods) / self.period.per_month())
    }

    pub fn value(&self, summary: &Table) -> anyhow::Result<Table> {
        let numeric = |name: &str| {
            summary
                .column(name)
                .with_context(|| format!("missing field {name}"))?
                .to_f64()
                .with_context(|| format!("field {name} is not numeric"))
        };

        let frequency = numeric(&self.frequency_column)?;
        let monetary = numeric(&self.monetary_column)?;
        let discount = self.discount();

        let clv: Vec<Option<f64>> = frequency
            .iter()
            .zip(&monetary)
            .map(|(f, m)| Some((*m)? * (*f)? / discount))
            .collect();

        let mut table = summary.clone();
        table.remove_column("CLV");
        table.push_column("CLV", clv)?;
        Ok(table)
    }
}

impl Task for Ltv {
    fn dependencies(&self) -> Vec<Depends> {
        vec![Depends::one("summary")]
    }

    fn compute(&self, inputs: Inputs) -> anyhow::Result<Table> {
        let summary = inputs.one("summary")?;
        self.value(&summary)
    }
}
