use thiserror::Error;

use crate::table::{Category, DType};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Resolution(#[from] DependencyResolutionError),

    #[error("Task '{0}' is already registered")]
    DuplicateName(String),

    #[error("Task '{0}' is not registered")]
    UnknownNode(String),

    #[error("Cycle detected in task graph at task '{0}'")]
    Cycle(String),

    #[error("Task '{name}':\n{source}")]
    Task {
        name: String,
        #[source]
        source: anyhow::Error,
    },
}

impl EngineError {
    /// Name of the task whose `compute` failed, if this is a collaborator error.
    pub fn task_name(&self) -> Option<&str> {
        match self {
            EngineError::Task { name, .. } => Some(name),
            _ => None,
        }
    }
}

/// A single-cardinality parameter found no producer with the expected capability.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Task '{node}': parameter '{param}' expects a producer matching {expected}, none is connected")]
pub struct DependencyResolutionError {
    pub node: String,
    pub param: String,
    pub expected: String,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("missing field {0}")]
    MissingField(String),

    #[error("expected {expected} for field {field}, got {found}")]
    TypeMismatch {
        field: String,
        expected: Category,
        found: DType,
    },

    #[error("unexpected fields {0:?}")]
    UnexpectedField(Vec<String>),

    #[error("field {field} is not nullable, found {count} null values")]
    NullValue { field: String, count: usize },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InputError {
    #[error("parameter '{0}' is not declared")]
    Unknown(String),

    #[error("parameter '{name}' is bound as {bound}, not {requested}")]
    Cardinality {
        name: String,
        bound: &'static str,
        requested: &'static str,
    },

    #[error("parameter '{name}' failed validation: {source}")]
    Schema {
        name: String,
        #[source]
        source: SchemaError,
    },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TableError {
    #[error("column '{0}' already exists")]
    DuplicateColumn(String),

    #[error("column '{column}' has {found} rows, table has {expected}")]
    LengthMismatch {
        column: String,
        expected: usize,
        found: usize,
    },

    #[error("column '{0}' not found")]
    ColumnNotFound(String),
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Couldn't read model catalog.\n{0}")]
    Io(#[from] std::io::Error),

    #[error("Couldn't parse model catalog.\n{0}")]
    Json(#[from] serde_json::Error),

    #[error("Model '{id}' not found in group '{group}'")]
    UnknownModel { group: String, id: String },

    #[error("No factory registered for task '{0}'")]
    UnknownTask(String),

    #[error("Invalid props for task '{task}':\n{source}")]
    Props {
        task: String,
        #[source]
        source: serde_json::Error,
    },
}
