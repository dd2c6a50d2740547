use colored::*;
use std::fmt;
use std::thread;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, Writer};
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

/// Prefix shared by the names of notification threads
const NOTIFY_THREAD_PREFIX: &str = "pmq-notify:";

/// A tracing event formatter that colours each line by level.
///
/// Warnings and errors carry a level label. Events emitted from a queue's
/// notification thread are tagged with the queue name, so output from
/// message handlers can be told apart from the main flow.
pub struct ColorizedFormatter;

impl<S, N> FormatEvent<S, N> for ColorizedFormatter
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
        let mut line = String::new();
        if let Some(queue) = thread::current()
            .name()
            .and_then(|name| name.strip_prefix(NOTIFY_THREAD_PREFIX))
        {
            line.push_str(&format!("[{}] ", queue));
        }

        let level = *event.metadata().level();
        match level {
            Level::WARN => line.push_str("warning: "),
            Level::ERROR => line.push_str("error: "),
            _ => {}
        }

        ctx.format_fields(Writer::new(&mut line), event)?;

        let colored_output = match level {
            Level::INFO => line.white(),
            Level::WARN => line.yellow(),
            Level::ERROR => line.red(),
            Level::DEBUG => line.blue(),
            Level::TRACE => line.purple(),
        };
        writeln!(writer, "{}", colored_output)
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence; otherwise `info`, or `debug` when `verbose`.
pub fn init(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .event_format(ColorizedFormatter)
        .try_init();
}
