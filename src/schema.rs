//! Tabular schema validation.
//!
//! A [`Schema`] checks that a [`Table`] carries the expected named columns
//! with values of the expected broad [`Category`]. Validation is never run
//! implicitly by the engine: a task opts in, usually through
//! [`Inputs::validate`](crate::Inputs::validate) on a parameter declared with
//! [`Depends::schema`](crate::Depends::schema).

use serde::{Deserialize, Serialize};

use crate::error::SchemaError;
use crate::table::{Category, Column, Table};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub category: Category,
    #[serde(default = "nullable_default")]
    pub nullable: bool,
}

fn nullable_default() -> bool {
    true
}

impl Field {
    /// Creates a nullable field.
    pub fn new(name: impl Into<String>, category: Category) -> Self {
        Self {
            name: name.into(),
            category,
            nullable: true,
        }
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, Category::Integer)
    }

    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, Category::Float)
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, Category::Text)
    }

    pub fn datetime(name: impl Into<String>) -> Self {
        Self::new(name, Category::DateTime)
    }

    pub fn duration(name: impl Into<String>) -> Self {
        Self::new(name, Category::Duration)
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn validate(&self, column: &Column) -> Result<(), SchemaError> {
        let dtype = column.dtype();
        if dtype.category() != self.category {
            return Err(SchemaError::TypeMismatch {
                field: self.name.clone(),
                expected: self.category,
                found: dtype,
            });
        }

        if !self.nullable {
            let count = column.null_count();
            if count > 0 {
                return Err(SchemaError::NullValue {
                    field: self.name.clone(),
                    count,
                });
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub fields: Vec<Field>,
    /// Whether columns not declared in `fields` are allowed.
    #[serde(default = "extra_default")]
    pub extra: bool,
}

fn extra_default() -> bool {
    true
}

impl Schema {
    /// Creates a schema which tolerates undeclared columns.
    pub fn new(fields: impl IntoIterator<Item = Field>) -> Self {
        Self {
            fields: fields.into_iter().collect(),
            extra: true,
        }
    }

    /// Rejects columns which are not declared.
    pub fn strict(mut self) -> Self {
        self.extra = false;
        self
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn validate(&self, table: &Table) -> Result<(), SchemaError> {
        for field in &self.fields {
            let column = table
                .column(&field.name)
                .ok_or_else(|| SchemaError::MissingField(field.name.clone()))?;
            field.validate(column)?;
        }

        if !self.extra {
            let unexpected: Vec<String> = table
                .column_names()
                .filter(|name| !self.fields.iter().any(|f| f.name == *name))
                .map(str::to_string)
                .collect();

            if !unexpected.is_empty() {
                return Err(SchemaError::UnexpectedField(unexpected));
            }
        }

        Ok(())
    }
}
