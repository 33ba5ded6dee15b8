use std::fs::File;
use std::io;

use anyhow::{Context, bail};
use camino::Utf8PathBuf;
use chrono::{NaiveDate, NaiveDateTime};
use serde::Deserialize;

use crate::engine::{Capability, Inputs, Task};
use crate::table::{Column, Table};

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y"];

/// Which source columns hold the customer id, the transaction date and the
/// amount.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ColumnMap {
    pub id: String,
    pub date: String,
    pub monetary: String,
}

impl Default for ColumnMap {
    fn default() -> Self {
        Self {
            id: "id".into(),
            date: "date".into(),
            monetary: "monetary".into(),
        }
    }
}

/// Reads a transaction log from a CSV file with a header row.
///
/// The mapped columns are renamed to `id`, `date` and `monetary`. `date` is
/// parsed as a datetime and `monetary` as a float. Other columns are kept,
/// typed as int64, float64 or text depending on what all of their cells
/// parse as. Empty cells are null.
#[derive(Debug, Clone, Deserialize)]
pub struct CsvRead {
    pub path: Utf8PathBuf,
    #[serde(default)]
    pub columns: ColumnMap,
    /// A `chrono` format for the date column. Common ISO layouts are tried
    /// when unset.
    #[serde(default)]
    pub date_format: Option<String>,
}

impl CsvRead {
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self {
            path: path.into(),
            columns: ColumnMap::default(),
            date_format: None,
        }
    }

    pub fn columns(mut self, columns: ColumnMap) -> Self {
        self.columns = columns;
        self
    }

    pub fn date_format(mut self, format: impl Into<String>) -> Self {
        self.date_format = Some(format.into());
        self
    }

    /// Parses CSV from any reader, bypassing `path`.
    pub fn read<R: io::Read>(&self, reader: R) -> anyhow::Result<Table> {
        let mut reader = ::csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(::csv::Trim::All)
            .from_reader(reader);

        let headers: Vec<String> = reader
            .headers()
            .context("Couldn't read CSV header")?
            .iter()
            .map(|name| self.rename(name).to_string())
            .collect();

        let mut cells: Vec<Vec<Option<String>>> = vec![Vec::new(); headers.len()];
        for (row, record) in reader.records().enumerate() {
            let record = record.with_context(|| format!("Couldn't read CSV row {}", row + 1))?;
            for (i, cell) in cells.iter_mut().enumerate() {
                let value = record.get(i).filter(|v| !v.is_empty());
                cell.push(value.map(str::to_string));
            }
        }

        for required in ["id", "date", "monetary"] {
            if !headers.iter().any(|name| name == required) {
                bail!(
                    "Column '{}' (mapped as '{required}') not found in CSV columns {:?}",
                    self.source_name(required),
                    headers
                );
            }
        }

        let mut table = Table::new();
        for (name, values) in headers.into_iter().zip(cells) {
            let column = match name.as_str() {
                "date" => self.parse_dates(values)?,
                "monetary" => parse_floats(&name, values)?,
                _ => infer(values),
            };
            table.push_column(name, column)?;
        }

        tracing::debug!(rows = table.height(), columns = table.width(), "read transactions");
        Ok(table)
    }

    fn rename<'a>(&self, name: &'a str) -> &'a str {
        let map = &self.columns;
        match name {
            _ if name == map.id => "id",
            _ if name == map.date => "date",
            _ if name == map.monetary => "monetary",
            _ => name,
        }
    }

    fn source_name(&self, target: &str) -> &str {
        match target {
            "id" => &self.columns.id,
            "date" => &self.columns.date,
            _ => &self.columns.monetary,
        }
    }

    fn parse_dates(&self, values: Vec<Option<String>>) -> anyhow::Result<Column> {
        let parsed = values
            .iter()
            .enumerate()
            .map(|(row, value)| {
                value
                    .as_deref()
                    .map(|text| {
                        parse_datetime(text, self.date_format.as_deref()).with_context(|| {
                            format!("Couldn't parse date '{text}' in row {}", row + 1)
                        })
                    })
                    .transpose()
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(Column::DateTime(parsed))
    }
}

impl Task for CsvRead {
    fn provides(&self) -> Vec<Capability> {
        vec![super::transactions()]
    }

    fn compute(&self, _: Inputs) -> anyhow::Result<Table> {
        let file = File::open(&self.path).with_context(|| format!("Couldn't open {}", self.path))?;
        self.read(file)
            .with_context(|| format!("Couldn't load transactions from {}", self.path))
    }
}

fn parse_datetime(text: &str, format: Option<&str>) -> anyhow::Result<NaiveDateTime> {
    let midnight = |date: NaiveDate| date.and_hms_opt(0, 0, 0);

    if let Some(format) = format {
        return NaiveDateTime::parse_from_str(text, format)
            .ok()
            .or_else(|| NaiveDate::parse_from_str(text, format).ok().and_then(midnight))
            .with_context(|| format!("doesn't match format '{format}'"));
    }

    DATETIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|format| NaiveDate::parse_from_str(text, format).ok())
                .and_then(midnight)
        })
        .context("unrecognised date layout")
}

fn parse_floats(name: &str, values: Vec<Option<String>>) -> anyhow::Result<Column> {
    let parsed = values
        .iter()
        .enumerate()
        .map(|(row, value)| {
            value
                .as_deref()
                .map(|text| {
                    text.parse::<f64>().with_context(|| {
                        format!("Couldn't parse '{text}' in column '{name}', row {}", row + 1)
                    })
                })
                .transpose()
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    Ok(Column::Float64(parsed))
}

/// Picks the narrowest of int64, float64 and text which fits every cell.
fn infer(values: Vec<Option<String>>) -> Column {
    fn all<T: std::str::FromStr>(values: &[Option<String>]) -> Option<Vec<Option<T>>> {
        values
            .iter()
            .map(|value| match value {
                Some(text) => text.parse().ok().map(Some),
                None => Some(None),
            })
            .collect()
    }

    if let Some(ints) = all::<i64>(&values) {
        return Column::Int64(ints);
    }
    if let Some(floats) = all::<f64>(&values) {
        return Column::Float64(floats);
    }
    Column::Text(values)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::table::DType;

    const SAMPLE: &str = "\
customer,purchased_at,amount,channel,items
a,2024-01-01,10.5,web,1
b,2024-01-03 12:30:00,20,store,
a,2024-02-10,,web,3
";

    fn mapped() -> CsvRead {
        CsvRead::new("unused.csv").columns(ColumnMap {
            id: "customer".into(),
            date: "purchased_at".into(),
            monetary: "amount".into(),
        })
    }

    #[test]
    fn test_read_renames_and_types() {
        let table = mapped().read(SAMPLE.as_bytes()).unwrap();

        let names: Vec<_> = table.column_names().collect();
        assert_eq!(names, ["id", "date", "monetary", "channel", "items"]);

        assert_eq!(table.column("id").unwrap().dtype(), DType::Text);
        assert_eq!(table.column("date").unwrap().dtype(), DType::DateTime);
        assert_eq!(table.column("items").unwrap().dtype(), DType::Int64);
        assert_eq!(
            table.column("monetary").unwrap().to_f64().unwrap(),
            vec![Some(10.5), Some(20.0), None]
        );

        let dates = table.column("date").unwrap().as_datetime().unwrap();
        assert_eq!(
            dates[1],
            NaiveDate::from_ymd_opt(2024, 1, 3).unwrap().and_hms_opt(12, 30, 0)
        );
    }

    #[test]
    fn test_missing_column_is_reported() {
        let err = CsvRead::new("unused.csv")
            .read(SAMPLE.as_bytes())
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("'id'"), "{message}");
    }

    #[test]
    fn test_explicit_date_format() {
        let csv = "id,date,monetary\n1,03.02.2024,5\n";
        let table = CsvRead::new("unused.csv")
            .date_format("%d.%m.%Y")
            .read(csv.as_bytes())
            .unwrap();

        let dates = table.column("date").unwrap().as_datetime().unwrap();
        assert_eq!(
            dates[0],
            NaiveDate::from_ymd_opt(2024, 2, 3).unwrap().and_hms_opt(0, 0, 0)
        );
        assert_eq!(table.column("id").unwrap().dtype(), DType::Int64);
    }

    #[test]
    fn test_bad_date_fails() {
        let csv = "id,date,monetary\n1,yesterday,5\n";
        let err = CsvRead::new("unused.csv").read(csv.as_bytes()).unwrap_err();
        assert!(format!("{err:#}").contains("yesterday"));
    }

    #[test]
    fn test_props_from_json() {
        let read: CsvRead = serde_json::from_str(
            r#"{ "path": "data/orders.csv", "columns": { "id": "customer" } }"#,
        )
        .unwrap();

        assert_eq!(read.path, "data/orders.csv");
        assert_eq!(read.columns.id, "customer");
        assert_eq!(read.columns.date, "date");
        assert_eq!(read.date_format, None);
    }

    #[test]
    fn test_compute_reads_file_and_provides_transactions() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"id,date,monetary\nx,2024-05-01,1.0\n").unwrap();

        let path = Utf8PathBuf::from_path_buf(file.path().to_path_buf()).unwrap();
        let node = crate::Node::detached("read", CsvRead::new(path));

        assert!(node.provides(&crate::nodes::transactions()));
        assert_eq!(node.run().unwrap().height(), 1);
    }
}
