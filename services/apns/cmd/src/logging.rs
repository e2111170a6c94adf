//! Console log format for apns-push.
//!
//! Lines look like `[2024-05-01 10:00:00.123] [apns-send     ] [ℹ INFO ] message key=value`.
//! Events may carry a `component` field (see the `component_*!` macros) which
//! replaces the service column.

use std::fmt::{self, Write as _};
use std::io::IsTerminal;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::{format::Writer, FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

const RESET: &str = "\x1b[0m";
const CYAN: &str = "\x1b[36m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[93m";
const RED: &str = "\x1b[91m";
const GRAY: &str = "\x1b[90m";

const SERVICE_WIDTH: usize = 14;
const LEVEL_WIDTH: usize = 7;

/// Log an info event tagged with a component
#[macro_export]
macro_rules! component_info {
    ($component:expr, $($arg:tt)*) => {
        tracing::info!(component = $component, $($arg)*)
    };
}

/// Log a warning tagged with a component
#[macro_export]
macro_rules! component_warn {
    ($component:expr, $($arg:tt)*) => {
        tracing::warn!(component = $component, $($arg)*)
    };
}

/// Log an error tagged with a component
#[macro_export]
macro_rules! component_error {
    ($component:expr, $($arg:tt)*) => {
        tracing::error!(component = $component, $($arg)*)
    };
}

/// Event formatter producing aligned, optionally colored lines
pub struct ApnsLogFormatter {
    service: String,
    ansi: bool,
}

impl ApnsLogFormatter {
    /// Formatter for `service`, colored when standard error is a terminal
    pub fn new(service: &str) -> Self {
        let ansi = std::io::stderr().is_terminal() && std::env::var_os("NO_COLOR").is_none();
        Self {
            service: service.to_string(),
            ansi,
        }
    }

    fn service_column(&self, component: Option<&str>) -> String {
        let name = match component {
            Some(component) => format!("{}-{}", self.service, component),
            None => self.service.clone(),
        };
        fit(&name, SERVICE_WIDTH)
    }

    fn color(&self, level: &Level) -> &'static str {
        if !self.ansi {
            return "";
        }
        match *level {
            Level::ERROR => RED,
            Level::WARN => YELLOW,
            Level::INFO => GREEN,
            Level::DEBUG | Level::TRACE => GRAY,
        }
    }

    fn paint(&self, code: &'static str) -> &'static str {
        if self.ansi {
            code
        } else {
            ""
        }
    }
}

/// Pad or truncate to exactly `width` characters
fn fit(text: &str, width: usize) -> String {
    let count = text.chars().count();
    if count > width {
        let mut cut: String = text.chars().take(width - 1).collect();
        cut.push('…');
        cut
    } else {
        format!("{:<width$}", text, width = width)
    }
}

fn level_tag(level: &Level) -> String {
    let tag = match *level {
        Level::ERROR => "✗ ERROR",
        Level::WARN => "⚠ WARN",
        Level::INFO => "ℹ INFO",
        Level::DEBUG => "◦ DEBUG",
        Level::TRACE => "◦ TRACE",
    };
    fit(tag, LEVEL_WIDTH)
}

impl<S, N> FormatEvent<S, N> for ApnsLogFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
        let level = event.metadata().level();

        let mut fields = EventFields::default();
        event.record(&mut fields);

        write!(
            writer,
            "{}[{}]{} [{}] [{}{}{}] {}",
            self.paint(CYAN),
            timestamp,
            self.paint(RESET),
            self.service_column(fields.component.as_deref()),
            self.color(level),
            level_tag(level),
            self.paint(RESET),
            fields.message
        )?;
        writeln!(writer, "{}", fields.extra)
    }
}

/// Message, component and remaining fields of one event
#[derive(Default)]
struct EventFields {
    message: String,
    component: Option<String>,
    extra: String,
}

impl Visit for EventFields {
    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "message" => self.message = value.to_string(),
            "component" => self.component = Some(value.to_string()),
            name => {
                let _ = write!(self.extra, " {}={}", name, value);
            }
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        match field.name() {
            "message" => self.message = format!("{:?}", value),
            "component" => self.component = Some(format!("{:?}", value).trim_matches('"').to_string()),
            name => {
                let _ = write!(self.extra, " {}={:?}", name, value);
            }
        }
    }
}
