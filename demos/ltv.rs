use camino::Utf8Path;
use console::style;
use ltvflow::catalog::{Catalog, Factories, Props};
use ltvflow::nodes::{ColumnMap, CsvRead};
use ltvflow::{Node, Pipeline};

/// Values every customer in a transaction log.
///
/// Topology:
///     [read] --> [rfm] --> [ltv]
///
/// `read` is configured in code, `rfm` and `ltv` come from the model catalog
/// in `demos/models.json`.
///
/// Usage:
///     cargo run --example ltv --features logging -- [transactions.csv] [horizon in weeks]
fn main() -> anyhow::Result<()> {
    ltvflow::init_logging()?;

    let mut args = std::env::args().skip(1);
    let path = args.next().unwrap_or_else(|| "demos/transactions.csv".into());
    let weeks: u32 = args.next().map(|w| w.parse::<u32>()).transpose()?.unwrap_or(52);

    let catalog = Catalog::load(Utf8Path::new("demos/models.json"))?;
    let factories = Factories::builtin();

    let mut overrides = Props::new();
    overrides.insert("periods".into(), weeks.into());

    let pipeline = Pipeline::named("ltv");
    pipeline.scope(|| -> anyhow::Result<()> {
        let read = Node::new(
            "read",
            CsvRead::new(path).columns(ColumnMap {
                id: "customer_id".into(),
                date: "purchased_at".into(),
                monetary: "amount".into(),
            }),
        );
        let rfm = catalog.instantiate(&factories, "summaryModels", "rfm-weekly", &Props::new())?;
        let ltv = catalog.instantiate(&factories, "valuationModels", "ltv", &overrides)?;

        read.connect(&rfm).connect(&ltv);
        Ok(())
    })?;

    println!("{pipeline}");

    let outputs = pipeline.run()?;
    let table = outputs.get("ltv").ok_or_else(|| anyhow::anyhow!("ltv did not run"))?;

    println!("{}", style(format!("{} customers", table.height())).bold());
    println!("{}", serde_json::to_string_pretty(&table.to_records())?);
    println!("{}", style(outputs.diagnostics().render_summary()).dim());

    Ok(())
}
