use indicatif::ProgressStyle;

const TEMPLATE_PIPELINE: &str =
    "{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}";
const TEMPLATE_TASK: &str = "{spinner:.blue} {msg}";

/// Progress bar style of the pipeline span.
pub(crate) fn style_pipeline() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template(TEMPLATE_PIPELINE)
        .map(|style| style.progress_chars("=>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
}

/// Spinner style of a single task span.
pub(crate) fn style_task() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template(TEMPLATE_TASK)
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

/// Installs a global subscriber which prints events and draws task spans
/// as progress bars. `RUST_LOG` controls the filter, defaulting to `info`.
#[cfg(feature = "logging")]
pub fn init_logging() -> anyhow::Result<()> {
    use tracing_indicatif::IndicatifLayer;
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    let indicatif = IndicatifLayer::new();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(indicatif.get_stderr_writer()))
        .with(indicatif)
        .try_init()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_templates_parse() {
        assert!(ProgressStyle::default_bar().template(TEMPLATE_PIPELINE).is_ok());
        assert!(ProgressStyle::default_spinner().template(TEMPLATE_TASK).is_ok());
    }
}
