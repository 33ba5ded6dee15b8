//! The tabular value passed between tasks.
//!
//! A [`Table`] is a small, ordered collection of named columns of equal
//! length. Columns are typed ([`Column`]) and every cell is nullable. Tasks
//! never mutate a table they received from upstream: outputs are shared
//! between consumers, so a task builds and returns a fresh table instead.

use std::fmt;

use chrono::{NaiveDateTime, TimeDelta};
use serde::{Deserialize, Serialize};

use crate::error::TableError;

/// Broad value category used by schema validation. Every integer width is an
/// `Integer`, every float width is a `Float`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Integer,
    Float,
    Text,
    DateTime,
    Duration,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Category::Integer => "integer",
            Category::Float => "float",
            Category::Text => "text",
            Category::DateTime => "datetime",
            Category::Duration => "duration",
        };
        f.write_str(name)
    }
}

/// Concrete storage type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    Int8,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    Text,
    DateTime,
    Duration,
}

impl DType {
    pub fn category(self) -> Category {
        match self {
            DType::Int8 | DType::Int16 | DType::Int32 | DType::Int64 => Category::Integer,
            DType::Float32 | DType::Float64 => Category::Float,
            DType::Text => Category::Text,
            DType::DateTime => Category::DateTime,
            DType::Duration => Category::Duration,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DType::Int8 => "int8",
            DType::Int16 => "int16",
            DType::Int32 => "int32",
            DType::Int64 => "int64",
            DType::Float32 => "float32",
            DType::Float64 => "float64",
            DType::Text => "text",
            DType::DateTime => "datetime",
            DType::Duration => "duration",
        };
        f.write_str(name)
    }
}

/// A single cell, detached from its column.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
    DateTime(NaiveDateTime),
    Duration(TimeDelta),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;

        match self {
            Value::Null => Json::Null,
            Value::Int(value) => Json::from(*value),
            Value::Float(value) => serde_json::Number::from_f64(*value)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Value::Text(value) => Json::String(value.clone()),
            Value::DateTime(value) => {
                Json::String(value.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
            }
            Value::Duration(value) => {
                serde_json::Number::from_f64(value.num_milliseconds() as f64 / 1000.0)
                    .map(Json::Number)
                    .unwrap_or(Json::Null)
            }
        }
    }
}

/// Typed column storage.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Int8(Vec<Option<i8>>),
    Int16(Vec<Option<i16>>),
    Int32(Vec<Option<i32>>),
    Int64(Vec<Option<i64>>),
    Float32(Vec<Option<f32>>),
    Float64(Vec<Option<f64>>),
    Text(Vec<Option<String>>),
    DateTime(Vec<Option<NaiveDateTime>>),
    Duration(Vec<Option<TimeDelta>>),
}

/// Runs `$body` with `$values` bound to the inner vector, whatever its type.
macro_rules! with_values {
    ($column:expr, $values:ident => $body:expr) => {
        match $column {
            Column::Int8($values) => $body,
            Column::Int16($values) => $body,
            Column::Int32($values) => $body,
            Column::Int64($values) => $body,
            Column::Float32($values) => $body,
            Column::Float64($values) => $body,
            Column::Text($values) => $body,
            Column::DateTime($values) => $body,
            Column::Duration($values) => $body,
        }
    };
}

impl Column {
    pub fn dtype(&self) -> DType {
        match self {
            Column::Int8(_) => DType::Int8,
            Column::Int16(_) => DType::Int16,
            Column::Int32(_) => DType::Int32,
            Column::Int64(_) => DType::Int64,
            Column::Float32(_) => DType::Float32,
            Column::Float64(_) => DType::Float64,
            Column::Text(_) => DType::Text,
            Column::DateTime(_) => DType::DateTime,
            Column::Duration(_) => DType::Duration,
        }
    }

    pub fn len(&self) -> usize {
        with_values!(self, values => values.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn null_count(&self) -> usize {
        with_values!(self, values => values.iter().filter(|value| value.is_none()).count())
    }

    /// Returns the cell at `row`, or `None` when out of bounds.
    pub fn get(&self, row: usize) -> Option<Value> {
        let value = match self {
            Column::Int8(values) => (*values.get(row)?).map(|v| Value::Int(v.into())),
            Column::Int16(values) => (*values.get(row)?).map(|v| Value::Int(v.into())),
            Column::Int32(values) => (*values.get(row)?).map(|v| Value::Int(v.into())),
            Column::Int64(values) => (*values.get(row)?).map(Value::Int),
            Column::Float32(values) => (*values.get(row)?).map(|v| Value::Float(v.into())),
            Column::Float64(values) => (*values.get(row)?).map(Value::Float),
            Column::Text(values) => values.get(row)?.clone().map(Value::Text),
            Column::DateTime(values) => (*values.get(row)?).map(Value::DateTime),
            Column::Duration(values) => (*values.get(row)?).map(Value::Duration),
        };

        Some(value.unwrap_or(Value::Null))
    }

    pub fn as_text(&self) -> Option<&[Option<String>]> {
        match self {
            Column::Text(values) => Some(values),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<&[Option<NaiveDateTime>]> {
        match self {
            Column::DateTime(values) => Some(values),
            _ => None,
        }
    }

    /// Widens any numeric column to `f64`. Non-numeric columns yield `None`.
    pub fn to_f64(&self) -> Option<Vec<Option<f64>>> {
        fn widen<T: Copy + Into<f64>>(values: &[Option<T>]) -> Vec<Option<f64>> {
            values.iter().map(|value| value.map(Into::into)).collect()
        }

        match self {
            Column::Int8(values) => Some(widen(values)),
            Column::Int16(values) => Some(widen(values)),
            Column::Int32(values) => Some(widen(values)),
            Column::Int64(values) => Some(values.iter().map(|v| v.map(|v| v as f64)).collect()),
            Column::Float32(values) => Some(widen(values)),
            Column::Float64(values) => Some(values.clone()),
            _ => None,
        }
    }
}

macro_rules! impl_from_vec {
    ($($T:ty => $variant:ident),*) => {
        $(
            impl From<Vec<$T>> for Column {
                fn from(values: Vec<$T>) -> Self {
                    Column::$variant(values.into_iter().map(Some).collect())
                }
            }

            impl From<Vec<Option<$T>>> for Column {
                fn from(values: Vec<Option<$T>>) -> Self {
                    Column::$variant(values)
                }
            }
        )*
    };
}

impl_from_vec!(
    i8 => Int8,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    f32 => Float32,
    f64 => Float64,
    String => Text,
    NaiveDateTime => DateTime,
    TimeDelta => Duration
);

impl From<Vec<&str>> for Column {
    fn from(values: Vec<&str>) -> Self {
        Column::Text(values.into_iter().map(|v| Some(v.to_string())).collect())
    }
}

/// Named columns of equal length, in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<(String, Column)>,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`Table::push_column`].
    pub fn with_column(
        mut self,
        name: impl Into<String>,
        column: impl Into<Column>,
    ) -> Result<Self, TableError> {
        self.push_column(name, column)?;
        Ok(self)
    }

    /// Appends a column. The first column fixes the height of the table.
    pub fn push_column(
        &mut self,
        name: impl Into<String>,
        column: impl Into<Column>,
    ) -> Result<(), TableError> {
        let name = name.into();
        let column = column.into();

        if self.contains(&name) {
            return Err(TableError::DuplicateColumn(name));
        }

        if !self.columns.is_empty() && column.len() != self.height() {
            return Err(TableError::LengthMismatch {
                column: name,
                expected: self.height(),
                found: column.len(),
            });
        }

        self.columns.push((name, column));
        Ok(())
    }

    pub fn remove_column(&mut self, name: &str) -> Option<Column> {
        let position = self.columns.iter().position(|(n, _)| n == name)?;
        Some(self.columns.remove(position).1)
    }

    pub fn rename(&mut self, from: &str, to: impl Into<String>) -> Result<(), TableError> {
        let to = to.into();

        if from == to {
            return match self.contains(from) {
                true => Ok(()),
                false => Err(TableError::ColumnNotFound(from.to_string())),
            };
        }

        if self.contains(&to) {
            return Err(TableError::DuplicateColumn(to));
        }

        let (name, _) = self
            .columns
            .iter_mut()
            .find(|(name, _)| name == from)
            .ok_or_else(|| TableError::ColumnNotFound(from.to_string()))?;

        *name = to;
        Ok(())
    }

    /// Returns a new table with only the given columns, in the given order.
    pub fn select(&self, names: &[&str]) -> Result<Table, TableError> {
        let mut table = Table::new();
        for &name in names {
            let column = self
                .column(name)
                .ok_or_else(|| TableError::ColumnNotFound(name.to_string()))?;
            table.push_column(name, column.clone())?;
        }
        Ok(table)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, column)| column)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &Column)> {
        self.columns.iter().map(|(name, column)| (name.as_str(), column))
    }

    /// Number of rows.
    pub fn height(&self) -> usize {
        self.columns.first().map_or(0, |(_, column)| column.len())
    }

    /// Number of columns.
    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.height() == 0
    }

    pub fn row(&self, index: usize) -> Option<Vec<Value>> {
        self.columns
            .iter()
            .map(|(_, column)| column.get(index))
            .collect()
    }

    /// Serializes the table as a JSON array of row objects.
    pub fn to_records(&self) -> serde_json::Value {
        let rows = (0..self.height())
            .map(|row| {
                let record = self
                    .columns
                    .iter()
                    .map(|(name, column)| {
                        let value = column.get(row).unwrap_or(Value::Null);
                        (name.clone(), value.to_json())
                    })
                    .collect::<serde_json::Map<_, _>>();
                serde_json::Value::Object(record)
            })
            .collect();

        serde_json::Value::Array(rows)
    }
}
