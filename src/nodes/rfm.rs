use std::collections::BTreeMap;

use anyhow::Context;
use chrono::{Datelike, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::engine::{Capability, Depends, Inputs, Task};
use crate::schema::{Field, Schema};
use crate::table::{Column, Table, Value};

/// Length of the time bucket transactions are counted in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Period {
    #[serde(rename = "H")]
    Hour,
    #[serde(rename = "D")]
    Day,
    #[default]
    #[serde(rename = "W")]
    Week,
    #[serde(rename = "M")]
    Month,
}

impl Period {
    /// Ordinal of the period containing `at`. Consecutive periods have
    /// consecutive ordinals. Weeks run Monday to Sunday.
    pub fn index(self, at: NaiveDateTime) -> i64 {
        let days = i64::from(at.date().num_days_from_ce());
        match self {
            Period::Hour => at.and_utc().timestamp().div_euclid(3600),
            Period::Day => days,
            // Day 1 of the common era is a Monday.
            Period::Week => (days - 1).div_euclid(7),
            Period::Month => i64::from(at.year()) * 12 + i64::from(at.month0()),
        }
    }

    /// How many of this period fit in a month.
    pub fn per_month(self) -> f64 {
        match self {
            Period::Hour => 30.0 * 24.0,
            Period::Day => 30.0,
            Period::Week => 4.345,
            Period::Month => 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum CustomerId {
    Int(i64),
    Text(String),
}

/// Summarises a transaction log into one row per customer.
///
/// For each customer, with transactions bucketed by `period` and amounts in
/// the same period summed:
///
/// | column           | value                                              |
/// |------------------|----------------------------------------------------|
/// | `frequency`      | number of periods with a purchase, minus the first |
/// | `recency`        | periods between the first and last purchase        |
/// | `T`              | periods between the first purchase and the end     |
/// | `monetary_value` | mean amount of the repeat periods, or 0            |
///
/// The observation ends at `observation_end`, or at the latest transaction.
/// Later transactions are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Rfm {
    pub period: Period,
    pub observation_end: Option<NaiveDateTime>,
}

impl Rfm {
    pub fn new(period: Period) -> Self {
        Self {
            period,
            observation_end: None,
        }
    }

    pub fn observation_end(mut self, end: NaiveDateTime) -> Self {
        self.observation_end = Some(end);
        self
    }

    pub fn transactions_schema() -> Schema {
        Schema::new([Field::datetime("date").not_null(), Field::float("monetary")])
    }

    pub fn summarise(&self, transactions: &Table) -> anyhow::Result<Table> {
        let ids = transactions.column("id").context("missing field id")?;
        let dates = transactions
            .column("date")
            .and_then(Column::as_datetime)
            .context("field date is not a datetime column")?;
        let amounts = transactions
            .column("monetary")
            .and_then(Column::to_f64)
            .context("field monetary is not numeric")?;

        let end = match self.observation_end {
            Some(end) => end,
            None => match dates.iter().flatten().max() {
                Some(&end) => end,
                None => return summary(Vec::new()),
            },
        };

        let mut customers: BTreeMap<CustomerId, BTreeMap<i64, f64>> = BTreeMap::new();
        for row in 0..transactions.height() {
            let id = match ids.get(row) {
                Some(Value::Int(id)) => CustomerId::Int(id),
                Some(Value::Text(id)) => CustomerId::Text(id),
                Some(Value::Null) | None => continue,
                Some(other) => anyhow::bail!("unsupported customer id {other:?}"),
            };
            let Some(date) = dates[row].filter(|date| *date <= end) else {
                continue;
            };

            *customers
                .entry(id)
                .or_default()
                .entry(self.period.index(date))
                .or_default() += amounts[row].unwrap_or(0.0);
        }

        let end = self.period.index(end);
        let rows = customers
            .into_iter()
            .filter_map(|(id, periods)| {
                let (&first, _) = periods.first_key_value()?;
                let (&last, _) = periods.last_key_value()?;
                let frequency = periods.len() - 1;
                let monetary = match frequency {
                    0 => 0.0,
                    n => periods.values().skip(1).sum::<f64>() / n as f64,
                };

                Some((
                    id,
                    [
                        frequency as f64,
                        (last - first) as f64,
                        (end - first) as f64,
                        monetary,
                    ],
                ))
            })
            .collect();

        summary(rows)
    }
}

fn summary(rows: Vec<(CustomerId, [f64; 4])>) -> anyhow::Result<Table> {
    let numeric = !rows.is_empty() && rows.iter().all(|(id, _)| matches!(id, CustomerId::Int(_)));

    let ids = if numeric {
        Column::Int64(
            rows.iter()
                .map(|(id, _)| match id {
                    CustomerId::Int(id) => Some(*id),
                    CustomerId::Text(_) => None,
                })
                .collect(),
        )
    } else {
        Column::Text(
            rows.iter()
                .map(|(id, _)| match id {
                    CustomerId::Int(id) => Some(id.to_string()),
                    CustomerId::Text(id) => Some(id.clone()),
                })
                .collect(),
        )
    };

    let metric = |i: usize| rows.iter().map(|(_, m)| m[i]).collect::<Vec<f64>>();

    Ok(Table::new()
        .with_column("id", ids)?
        .with_column("frequency", metric(0))?
        .with_column("recency", metric(1))?
        .with_column("T", metric(2))?
        .with_column("monetary_value", metric(3))?)
}

impl Task for Rfm {
    fn dependencies(&self) -> Vec<Depends> {
        vec![
            Depends::one("transactions")
                .capability(super::transactions())
                .schema(Self::transactions_schema()),
        ]
    }

    fn provides(&self) -> Vec<Capability> {
        vec![super::rfm_summary()]
    }

    fn compute(&self, inputs: Inputs) -> anyhow::Result<Table> {
        let transactions = inputs.validated_one("transactions")?;
        self.summarise(&transactions)
    }
}
