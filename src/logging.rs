//! Log output for worker processes
//!
//! Events are written without ANSI colors, prefixed with the hostname, and
//! with the active span chain (for example `commit_block{block_id=7}`) on
//! indented lines above the message. The library itself never installs a
//! subscriber; binaries call [`init_with_hostname`] once at startup.

use std::fmt;
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

use crate::config::NodeConfig;

fn local_hostname() -> String {
    gethostname::gethostname()
        .to_str()
        .unwrap_or("unknown")
        .to_string()
}

/// Event formatter with hostname prefix
pub struct HostnameFormatter {
    hostname: String,
    node_id: Option<String>,
}

impl HostnameFormatter {
    pub fn new() -> Self {
        Self {
            hostname: local_hostname(),
            node_id: None,
        }
    }

    /// Also tag every line with the worker's node id
    pub fn with_node_id(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }
}

impl Default for HostnameFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl<S, N> FormatEvent<S, N> for HostnameFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let meta = event.metadata();
        let datetime: chrono::DateTime<chrono::Utc> = std::time::SystemTime::now().into();

        match &self.node_id {
            Some(node_id) => write!(writer, "[{}/{}] ", self.hostname, node_id)?,
            None => write!(writer, "[{}] ", self.hostname)?,
        }
        write!(writer, "{} ", datetime.format("%Y-%m-%dT%H:%M:%S%.6fZ"))?;
        write!(writer, "{:5} ", meta.level())?;

        // One line per span, root first, one extra tab per level
        if let Some(scope) = ctx.event_scope() {
            let spans: Vec<_> = scope.from_root().collect();

            for (depth, span) in spans.iter().enumerate() {
                writeln!(writer)?;
                for _ in 0..=depth {
                    write!(writer, "\t")?;
                }
                write!(writer, "{}", span.name())?;

                let ext = span.extensions();
                if let Some(fields) = ext.get::<tracing_subscriber::fmt::FormattedFields<N>>() {
                    if !fields.is_empty() {
                        write!(writer, "{{{}}}", fields)?;
                    }
                }
            }

            writeln!(writer)?;
            for _ in 0..=spans.len() {
                write!(writer, "\t")?;
            }
        }

        write!(writer, "{}", meta.target())?;
        if let (Some(file), Some(line)) = (meta.file(), meta.line()) {
            write!(writer, ":{}:{}", file, line)?;
        }

        write!(writer, ": ")?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

/// Initialize tracing with the hostname formatter
///
/// `RUST_LOG` overrides `level` when set. Calling this twice is harmless; the
/// second call leaves the first subscriber in place.
pub fn init_with_hostname(level: &str) {
    install(level, HostnameFormatter::new());
}

/// Initialize tracing from the node section of a store config
pub fn init_for_node(node: &NodeConfig) {
    install(
        &node.log_level,
        HostnameFormatter::new().with_node_id(node.node_id.clone()),
    );
}

fn install(level: &str, formatter: HostnameFormatter) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let fmt_layer = fmt::layer()
        .event_format(formatter)
        .with_writer(std::io::stdout);

    if tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .is_ok()
    {
        tracing::info!("Logging initialized on host: {}", local_hostname());
    }
}
