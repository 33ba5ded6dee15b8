use std::borrow::Cow;
use std::fmt;
use std::rc::Rc;

use crate::engine::node::{Capability, Node, Task};
use crate::error::{DependencyResolutionError, EngineError, InputError};
use crate::schema::Schema;
use crate::table::Table;

/// Which producers a parameter accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Any,
    Capability(Capability),
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Any => f.write_str("any task"),
            Source::Capability(capability) => write!(f, "'{capability}'"),
        }
    }
}

/// How many matching producers a parameter binds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    /// The first matching producer. Further matches are dropped.
    Single,
    /// Every matching producer, in edge order.
    List,
}

/// Declares how one compute parameter is filled from connected producers.
///
/// ```
/// use ltvflow::{Capability, Depends};
///
/// let deps = vec![
///     Depends::one("summary").capability(Capability::tag("rfm-summary")),
///     Depends::many("models"),
/// ];
/// # assert_eq!(deps.len(), 2);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Depends {
    name: Cow<'static, str>,
    source: Source,
    cardinality: Cardinality,
    schema: Option<Schema>,
}

impl Depends {
    pub fn one(name: impl Into<Cow<'static, str>>) -> Self {
        Self::new(name, Cardinality::Single)
    }

    pub fn many(name: impl Into<Cow<'static, str>>) -> Self {
        Self::new(name, Cardinality::List)
    }

    fn new(name: impl Into<Cow<'static, str>>, cardinality: Cardinality) -> Self {
        Self {
            name: name.into(),
            source: Source::Any,
            cardinality,
            schema: None,
        }
    }

    /// Accept only producers whose task is of type `T`.
    pub fn on<T: Task>(self) -> Self {
        self.capability(Capability::of::<T>())
    }

    pub fn capability(mut self, capability: Capability) -> Self {
        self.source = Source::Capability(capability);
        self
    }

    /// Attaches a schema, checked by [`Inputs::validate`].
    pub fn schema(mut self, schema: Schema) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &Source {
        &self.source
    }

    pub fn cardinality(&self) -> Cardinality {
        self.cardinality
    }

    pub fn get_schema(&self) -> Option<&Schema> {
        self.schema.as_ref()
    }

    pub fn matches(&self, node: &Node) -> bool {
        match &self.source {
            Source::Any => true,
            Source::Capability(capability) => node.provides(capability),
        }
    }
}

#[derive(Debug, Clone)]
enum Arg {
    One(Rc<Table>),
    Many(Vec<Rc<Table>>),
}

impl Arg {
    fn kind(&self) -> &'static str {
        match self {
            Arg::One(_) => "one",
            Arg::Many(_) => "many",
        }
    }
}

#[derive(Debug, Clone)]
struct Bound {
    depends: Depends,
    arg: Arg,
}

/// The resolved arguments handed to [`Task::compute`], by parameter name.
#[derive(Debug, Clone, Default)]
pub struct Inputs {
    bound: Vec<Bound>,
}

impl Inputs {
    /// Binds a table directly, bypassing resolution. Mostly useful for
    /// calling `compute` in tests.
    pub fn with_one(mut self, depends: Depends, table: impl Into<Rc<Table>>) -> Self {
        self.bound.push(Bound {
            depends,
            arg: Arg::One(table.into()),
        });
        self
    }

    pub fn with_many(mut self, depends: Depends, tables: Vec<Rc<Table>>) -> Self {
        self.bound.push(Bound {
            depends,
            arg: Arg::Many(tables),
        });
        self
    }

    pub fn one(&self, name: &str) -> Result<Rc<Table>, InputError> {
        match &self.find(name)?.arg {
            Arg::One(table) => Ok(Rc::clone(table)),
            arg => Err(InputError::Cardinality {
                name: name.to_string(),
                bound: arg.kind(),
                requested: "one",
            }),
        }
    }

    pub fn many(&self, name: &str) -> Result<Vec<Rc<Table>>, InputError> {
        match &self.find(name)?.arg {
            Arg::Many(tables) => Ok(tables.clone()),
            arg => Err(InputError::Cardinality {
                name: name.to_string(),
                bound: arg.kind(),
                requested: "many",
            }),
        }
    }

    /// Checks every table bound to `name` against the schema attached to its
    /// descriptor. Parameters without a schema always pass.
    pub fn validate(&self, name: &str) -> Result<(), InputError> {
        let bound = self.find(name)?;
        let Some(schema) = bound.depends.get_schema() else {
            return Ok(());
        };

        let tables = match &bound.arg {
            Arg::One(table) => std::slice::from_ref(table),
            Arg::Many(tables) => tables.as_slice(),
        };

        for table in tables {
            schema
                .validate(table)
                .map_err(|source| InputError::Schema {
                    name: name.to_string(),
                    source,
                })?;
        }

        Ok(())
    }

    pub fn validated_one(&self, name: &str) -> Result<Rc<Table>, InputError> {
        self.validate(name)?;
        self.one(name)
    }

    pub fn validated_many(&self, name: &str) -> Result<Vec<Rc<Table>>, InputError> {
        self.validate(name)?;
        self.many(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.bound.iter().map(|bound| bound.depends.name())
    }

    pub fn len(&self) -> usize {
        self.bound.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bound.is_empty()
    }

    fn find(&self, name: &str) -> Result<&Bound, InputError> {
        self.bound
            .iter()
            .find(|bound| bound.depends.name() == name)
            .ok_or_else(|| InputError::Unknown(name.to_string()))
    }
}

/// Binds `producers` to the declared `params`, running the producers that
/// get bound.
///
/// The pool starts as every producer in edge order. Each parameter, left to
/// right, takes the matching producers out of the pool: a list parameter
/// binds all of them, a single parameter binds the first and drops the
/// rest. What did not match is left for the next parameter.
pub(crate) fn resolve(
    node: &str,
    params: &[Depends],
    producers: Vec<Node>,
) -> Result<Inputs, EngineError> {
    let mut pool = producers;
    let mut inputs = Inputs::default();

    for depends in params {
        let (matches, remaining): (Vec<Node>, Vec<Node>) =
            pool.into_iter().partition(|node| depends.matches(node));
        pool = remaining;

        let arg = match depends.cardinality {
            Cardinality::List => Arg::Many(
                matches
                    .iter()
                    .map(Node::run)
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            Cardinality::Single => {
                let mut matches = matches.into_iter();
                let first = matches.next().ok_or_else(|| DependencyResolutionError {
                    node: node.to_string(),
                    param: depends.name().to_string(),
                    expected: depends.source.to_string(),
                })?;

                for dropped in matches {
                    tracing::debug!(
                        param = depends.name(),
                        producer = dropped.name(),
                        "dropping surplus match for single parameter"
                    );
                }

                Arg::One(first.run()?)
            }
        };

        inputs.bound.push(Bound {
            depends: depends.clone(),
            arg,
        });
    }

    for unclaimed in &pool {
        tracing::debug!(producer = unclaimed.name(), "producer not bound to any parameter");
    }

    Ok(inputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SchemaError;
    use crate::schema::Field;
    use proptest::prelude::*;

    struct X(i64);
    struct Y(i64);

    impl Task for X {
        fn compute(&self, _: Inputs) -> anyhow::Result<Table> {
            Ok(Table::new().with_column("x", vec![self.0])?)
        }
    }

    impl Task for Y {
        fn compute(&self, _: Inputs) -> anyhow::Result<Table> {
            Ok(Table::new().with_column("y", vec![self.0])?)
        }
    }

    fn tag(table: &Table) -> (String, i64) {
        let (name, column) = table.columns().next().unwrap();
        let value = column.to_f64().unwrap()[0].unwrap() as i64;
        (name.to_string(), value)
    }

    #[test]
    fn test_single_then_list_partition_order() {
        let x1 = Node::detached("x1", X(1));
        let y1 = Node::detached("y1", Y(1));
        let x2 = Node::detached("x2", X(2));

        let params = [Depends::one("p1").on::<X>(), Depends::many("p2")];
        let inputs = resolve("n", &params, vec![x1, y1.clone(), x2.clone()]).unwrap();

        assert_eq!(tag(&inputs.one("p1").unwrap()), ("x".into(), 1));
        let p2: Vec<_> = inputs.many("p2").unwrap().iter().map(|t| tag(t)).collect();
        assert_eq!(p2, [("y".into(), 1)]);

        // x2 matched p1 as a surplus and was dropped, it is never run.
        assert!(y1.is_done());
        assert!(!x2.is_done());
    }

    #[test]
    fn test_list_then_any_keeps_remaining_order() {
        let x1 = Node::detached("x1", X(1));
        let y1 = Node::detached("y1", Y(1));
        let x2 = Node::detached("x2", X(2));
        let y2 = Node::detached("y2", Y(2));

        let params = [Depends::many("xs").on::<X>(), Depends::many("rest")];
        let inputs = resolve("n", &params, vec![x1, y1, x2, y2]).unwrap();

        let xs: Vec<_> = inputs.many("xs").unwrap().iter().map(|t| tag(t)).collect();
        let rest: Vec<_> = inputs.many("rest").unwrap().iter().map(|t| tag(t)).collect();
        assert_eq!(xs, [("x".into(), 1), ("x".into(), 2)]);
        assert_eq!(rest, [("y".into(), 1), ("y".into(), 2)]);
    }

    #[test]
    fn test_single_without_match_fails() {
        let y1 = Node::detached("y1", Y(1));
        let params = [Depends::one("model").on::<X>()];

        let err = resolve("ltv", &params, vec![y1]).unwrap_err();
        match err {
            EngineError::Resolution(err) => {
                assert_eq!(err.node, "ltv");
                assert_eq!(err.param, "model");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_list_without_match_binds_empty() {
        let params = [Depends::many("models").on::<X>()];
        let inputs = resolve("n", &params, vec![]).unwrap();
        assert!(inputs.many("models").unwrap().is_empty());
    }

    #[test]
    fn test_accessor_cardinality() {
        let inputs = Inputs::default().with_one(Depends::one("df"), Table::new());

        assert!(inputs.one("df").is_ok());
        assert_eq!(
            inputs.many("df").unwrap_err(),
            InputError::Cardinality {
                name: "df".into(),
                bound: "one",
                requested: "many"
            }
        );
        assert_eq!(
            inputs.one("other").unwrap_err(),
            InputError::Unknown("other".into())
        );
    }

    #[test]
    fn test_validate_is_opt_in() {
        let depends = Depends::one("df").schema(Schema::new([Field::datetime("date")]));
        let inputs = Inputs::default().with_one(depends, Table::new());

        // Binding succeeded, only the explicit call checks the schema.
        assert!(inputs.one("df").is_ok());
        assert_eq!(
            inputs.validate("df").unwrap_err(),
            InputError::Schema {
                name: "df".into(),
                source: SchemaError::MissingField("date".into())
            }
        );
    }

    proptest! {
        #[test]
        fn prop_lists_bind_every_producer_once(kinds in proptest::collection::vec(any::<bool>(), 0..12)) {
            let producers: Vec<Node> = kinds
                .iter()
                .enumerate()
                .map(|(i, &is_x)| match is_x {
                    true => Node::detached(format!("p{i}"), X(i as i64)),
                    false => Node::detached(format!("p{i}"), Y(i as i64)),
                })
                .collect();

            let params = [Depends::many("xs").on::<X>(), Depends::many("rest")];
            let inputs = resolve("n", &params, producers).unwrap();

            let xs: Vec<i64> = inputs.many("xs").unwrap().iter().map(|t| tag(t).1).collect();
            let rest: Vec<i64> = inputs.many("rest").unwrap().iter().map(|t| tag(t).1).collect();

            let expected_xs: Vec<i64> = (0..kinds.len() as i64).filter(|&i| kinds[i as usize]).collect();
            let expected_rest: Vec<i64> = (0..kinds.len() as i64).filter(|&i| !kinds[i as usize]).collect();

            prop_assert_eq!(xs, expected_xs);
            prop_assert_eq!(rest, expected_rest);
        }

        #[test]
        fn prop_single_binds_first_match(kinds in proptest::collection::vec(any::<bool>(), 0..12)) {
            let producers: Vec<Node> = kinds
                .iter()
                .enumerate()
                .map(|(i, &is_x)| match is_x {
                    true => Node::detached(format!("p{i}"), X(i as i64)),
                    false => Node::detached(format!("p{i}"), Y(i as i64)),
                })
                .collect();

            let params = [Depends::one("x").on::<X>()];
            let result = resolve("n", &params, producers);

            match kinds.iter().position(|&is_x| is_x) {
                Some(first) => prop_assert_eq!(tag(&result.unwrap().one("x").unwrap()).1, first as i64),
                None => prop_assert!(matches!(result, Err(EngineError::Resolution(_)))),
            }
        }
    }
}
