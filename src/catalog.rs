//! Tasks described in JSON.
//!
//! A catalog groups model entries by kind, for example:
//!
//! ```json
//! {
//!   "valuationModels": [
//!     { "id": "ltv-weekly", "model_task_name": "Ltv", "props": { "name": "ltv", "periods": 52 } }
//!   ]
//! }
//! ```
//!
//! Each entry names a task type and its default props. [`Factories`] maps
//! task type names to constructors, so an entry can be turned into a
//! [`Node`] with caller overrides applied on top of its defaults.

use std::collections::HashMap;
use std::fs;

use camino::Utf8Path;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::engine::{Node, Task};
use crate::error::CatalogError;

pub type Props = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ModelEntry {
    pub id: String,
    pub model_task_name: String,
    #[serde(default)]
    pub props: Props,
}

impl ModelEntry {
    /// The entry's props with `overrides` applied. Keys the entry does not
    /// already define are ignored.
    pub fn merged_props(&self, overrides: &Props) -> Props {
        let mut props = self.props.clone();

        for (key, value) in overrides {
            match props.get_mut(key) {
                Some(slot) => *slot = value.clone(),
                None => tracing::debug!(model = %self.id, key = %key, "ignoring unknown prop"),
            }
        }

        props
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct Catalog {
    groups: HashMap<String, Vec<ModelEntry>>,
}

impl Catalog {
    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: &Utf8Path) -> Result<Self, CatalogError> {
        Self::from_json(&fs::read_to_string(path)?)
    }

    pub fn groups(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }

    pub fn entries(&self, group: &str) -> &[ModelEntry] {
        self.groups.get(group).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn entry(&self, group: &str, id: &str) -> Result<&ModelEntry, CatalogError> {
        self.entries(group)
            .iter()
            .find(|entry| entry.id == id)
            .ok_or_else(|| CatalogError::UnknownModel {
                group: group.to_string(),
                id: id.to_string(),
            })
    }

    /// Builds the node for an entry with [`Node::new`], so it joins the
    /// active pipeline scope like any other node.
    pub fn instantiate(
        &self,
        factories: &Factories,
        group: &str,
        id: &str,
        overrides: &Props,
    ) -> Result<Node, CatalogError> {
        let entry = self.entry(group, id)?;
        let props = entry.merged_props(overrides);

        let name = props
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or(&entry.id)
            .to_string();

        factories.build(&entry.model_task_name, name, props)
    }
}

type Factory = Box<dyn Fn(String, Props) -> Result<Node, CatalogError>>;

/// Constructors for task types, by the name catalogs refer to them with.
#[derive(Default)]
pub struct Factories {
    factories: HashMap<String, Factory>,
}

impl Factories {
    pub fn new() -> Self {
        Self::default()
    }

    /// Factories for every task type in [`crate::nodes`], registered under
    /// their type names.
    pub fn builtin() -> Self {
        use crate::nodes::{CsvRead, Ltv, Rfm};

        Self::new()
            .register::<CsvRead>("CsvRead")
            .register::<Rfm>("Rfm")
            .register::<Ltv>("Ltv")
    }

    /// Registers `T` under `task_name`. Props are deserialized into `T`.
    pub fn register<T>(mut self, task_name: impl Into<String>) -> Self
    where
        T: Task + DeserializeOwned,
    {
        let task_name = task_name.into();
        let task = task_name.clone();

        let factory = move |name: String, props: Props| -> Result<Node, CatalogError> {
            let value = serde_json::from_value::<T>(Value::Object(props)).map_err(|source| {
                CatalogError::Props {
                    task: task.clone(),
                    source,
                }
            })?;
            Ok(Node::new(name, value))
        };

        self.factories.insert(task_name, Box::new(factory));
        self
    }

    pub fn contains(&self, task_name: &str) -> bool {
        self.factories.contains_key(task_name)
    }

    fn build(&self, task_name: &str, name: String, props: Props) -> Result<Node, CatalogError> {
        let factory = self
            .factories
            .get(task_name)
            .ok_or_else(|| CatalogError::UnknownTask(task_name.to_string()))?;

        factory(name, props)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::Pipeline;
    use crate::nodes::{Ltv, Period};

    const CATALOG: &str = r#"{
        "valuationModels": [
            {
                "id": "ltv-weekly",
                "model_task_name": "Ltv",
                "props": { "name": "ltv", "periods": 52, "period": "W" }
            },
            {
                "id": "ltv-broken",
                "model_task_name": "Ltv",
                "props": { "periods": "many" }
            },
            {
                "id": "pareto",
                "model_task_name": "ParetoModel",
                "props": {}
            },
            {
                "id": "ltv-monthly",
                "model_task_name": "Ltv",
                "props": { "periods": 12, "period": "M" }
            }
        ],
        "dataSources": [
            {
                "id": "orders",
                "model_task_name": "CsvRead",
                "props": { "path": "data/orders.csv", "columns": { "id": "customer" } }
            }
        ]
    }"#;

    fn overrides(json: &str) -> Props {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_merged_props_only_override_known_keys() {
        let catalog = Catalog::from_json(CATALOG).unwrap();
        let entry = catalog.entry("valuationModels", "ltv-weekly").unwrap();

        let props = entry.merged_props(&overrides(r#"{ "periods": 12, "discount_rate": 0.5 }"#));

        assert_eq!(props["periods"], 12);
        assert!(!props.contains_key("discount_rate"));
    }

    #[test]
    fn test_instantiate_registers_with_scope() {
        let catalog = Catalog::from_json(CATALOG).unwrap();
        let factories = Factories::builtin();
        let pipeline = Pipeline::new();

        let node = pipeline
            .scope(|| {
                catalog.instantiate(
                    &factories,
                    "valuationModels",
                    "ltv-weekly",
                    &overrides(r#"{ "period": "M" }"#),
                )
            })
            .unwrap();

        assert_eq!(node.name(), "ltv");
        assert_eq!(pipeline.get("ltv"), Some(node.clone()));
        assert!(node.provides(&crate::Capability::of::<Ltv>()));
    }

    #[test]
    fn test_name_falls_back_to_entry_id() {
        let catalog = Catalog::from_json(CATALOG).unwrap();
        let factories = Factories::builtin();
        let pipeline = Pipeline::new();
        let none = Props::new();

        let (ltv, orders) = pipeline
            .scope(|| -> Result<_, CatalogError> {
                Ok((
                    catalog.instantiate(&factories, "valuationModels", "ltv-monthly", &none)?,
                    catalog.instantiate(&factories, "dataSources", "orders", &none)?,
                ))
            })
            .unwrap();

        assert_eq!(ltv.name(), "ltv-monthly");
        assert_eq!(orders.name(), "orders");
        assert_eq!(pipeline.names(), ["ltv-monthly", "orders"]);
        assert!(orders.provides(&crate::nodes::transactions()));
    }

    #[test]
    fn test_errors() {
        let catalog = Catalog::from_json(CATALOG).unwrap();
        let factories = Factories::builtin();
        let none = Props::new();

        assert!(matches!(
            catalog.instantiate(&factories, "valuationModels", "missing", &none),
            Err(CatalogError::UnknownModel { id, .. }) if id == "missing"
        ));
        assert!(matches!(
            catalog.instantiate(&factories, "frequencyModels", "pareto", &none),
            Err(CatalogError::UnknownModel { group, .. }) if group == "frequencyModels"
        ));
        assert!(matches!(
            catalog.instantiate(&factories, "valuationModels", "pareto", &none),
            Err(CatalogError::UnknownTask(task)) if task == "ParetoModel"
        ));
        assert!(matches!(
            catalog.instantiate(&factories, "valuationModels", "ltv-broken", &none),
            Err(CatalogError::Props { task, .. }) if task == "Ltv"
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CATALOG.as_bytes()).unwrap();
        let path = Utf8Path::from_path(file.path()).unwrap();

        let catalog = Catalog::load(path).unwrap();
        assert_eq!(catalog.entries("valuationModels").len(), 4);
        assert_eq!(catalog.entries("dataSources").len(), 1);
        assert!(catalog.entries("monetaryModels").is_empty());

        let ltv: Ltv = serde_json::from_value(Value::Object(
            catalog.entry("valuationModels", "ltv-weekly").unwrap().props.clone(),
        ))
        .unwrap();
        assert_eq!(ltv.period, Period::Week);
        assert_eq!(ltv.periods, 52);
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(Catalog::from_json("[]"), Err(CatalogError::Json(_))));
    }
}
