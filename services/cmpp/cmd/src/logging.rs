//! Console log format for the probe.
//!
//! Lines look like `[timestamp] [service] [level] message`, where the
//! service column becomes `cmpp-<component>` for events that carry a
//! `component` field.

use std::fmt;
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::{format::Writer, FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

const COLOR_RESET: &str = "\x1b[0m";
const COLOR_CYAN: &str = "\x1b[36m";
const COLOR_GREEN: &str = "\x1b[32m";
const COLOR_BRIGHT_YELLOW: &str = "\x1b[93m";
const COLOR_BRIGHT_RED: &str = "\x1b[91m";
const COLOR_BRIGHT_GRAY: &str = "\x1b[90m";

const SERVICE_NAME_WIDTH: usize = 20;
const LOG_LEVEL_WIDTH: usize = 9;

/// Event formatter used by the probe's subscriber
pub struct CmppLogFormatter {
    service_name: String,
    color_enabled: bool,
}

/// Log at info level tagged with a component
macro_rules! component_info {
    ($component:expr, $($arg:tt)*) => {
        tracing::info!(component = $component, $($arg)*)
    };
}

/// Log at warn level tagged with a component
macro_rules! component_warn {
    ($component:expr, $($arg:tt)*) => {
        tracing::warn!(component = $component, $($arg)*)
    };
}

macro_rules! component_debug {
    ($component:expr, $($arg:tt)*) => {
        tracing::debug!(component = $component, $($arg)*)
    };
}

macro_rules! component_error {
    ($component:expr, $($arg:tt)*) => {
        tracing::error!(component = $component, $($arg)*)
    };
}

impl CmppLogFormatter {
    /// Formatter for `service_name`, coloured when `TERM` names a real terminal
    pub fn new(service_name: impl Into<String>) -> Self {
        Self::with_color(service_name, is_terminal())
    }

    /// Formatter with colour output forced on or off
    pub fn with_color(service_name: impl Into<String>, color_enabled: bool) -> Self {
        Self {
            service_name: service_name.into(),
            color_enabled,
        }
    }

    fn format_service_name(&self, component: Option<&str>) -> String {
        let name = match component {
            Some(comp) => format!("{}-{}", self.service_name, comp),
            None => self.service_name.clone(),
        };

        if name.chars().count() > SERVICE_NAME_WIDTH {
            let cut: String = name.chars().take(SERVICE_NAME_WIDTH - 1).collect();
            format!("{}…", cut)
        } else {
            format!("{:<width$}", name, width = SERVICE_NAME_WIDTH)
        }
    }

    fn format_log_level(&self, level: &tracing::Level) -> String {
        let level_str = match *level {
            tracing::Level::ERROR => "✗ ERROR",
            tracing::Level::WARN => "⚠ WARN",
            tracing::Level::INFO => "ℹ INFO",
            tracing::Level::DEBUG => "◦ DEBUG",
            tracing::Level::TRACE => "◦ TRACE",
        };

        format!("{:<width$}", level_str, width = LOG_LEVEL_WIDTH)
    }

    fn color_for_level(&self, level: &tracing::Level) -> &'static str {
        if !self.color_enabled {
            return "";
        }

        match *level {
            tracing::Level::ERROR => COLOR_BRIGHT_RED,
            tracing::Level::WARN => COLOR_BRIGHT_YELLOW,
            tracing::Level::INFO => COLOR_GREEN,
            tracing::Level::DEBUG | tracing::Level::TRACE => COLOR_BRIGHT_GRAY,
        }
    }

    fn write_line(
        &self,
        writer: &mut dyn fmt::Write,
        timestamp: &str,
        level: &tracing::Level,
        fields: &FieldVisitor,
    ) -> fmt::Result {
        let service = self.format_service_name(fields.component.as_deref());
        let (color, reset, cyan) = if self.color_enabled {
            (self.color_for_level(level), COLOR_RESET, COLOR_CYAN)
        } else {
            ("", "", "")
        };

        write!(
            writer,
            "{}[{}] [{}] [{}{}{}] ",
            cyan,
            timestamp,
            service,
            color,
            self.format_log_level(level),
            reset
        )?;
        writeln!(writer, "{}{}", fields.message, reset)
    }
}

impl<S, N> FormatEvent<S, N> for CmppLogFormatter
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
        let timestamp = chrono::Local::now()
            .format("%Y-%m-%d %H:%M:%S%.3f")
            .to_string();

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        self.write_line(&mut writer, &timestamp, event.metadata().level(), &visitor)
    }
}

/// Pulls `message` and `component` out of an event; other fields are
/// appended as `key=value`.
#[derive(Default)]
struct FieldVisitor {
    message: String,
    component: Option<String>,
}

impl FieldVisitor {
    fn set_message(&mut self, value: &str) {
        if self.message.is_empty() {
            self.message.push_str(value);
        } else {
            self.message.insert_str(0, &format!("{} ", value));
        }
    }

    fn push_extra(&mut self, name: &str, value: &str) {
        if !self.message.is_empty() {
            self.message.push(' ');
        }
        self.message.push_str(name);
        self.message.push('=');
        self.message.push_str(value);
    }
}

impl tracing::field::Visit for FieldVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn fmt::Debug) {
        let rendered = format!("{:?}", value);
        let unquoted = rendered
            .strip_prefix('"')
            .and_then(|s| s.strip_suffix('"'))
            .unwrap_or(&rendered)
            .to_string();

        match field.name() {
            "message" => self.set_message(&unquoted),
            "component" => self.component = Some(unquoted),
            name => self.push_extra(name, &unquoted),
        }
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        match field.name() {
            "message" => self.set_message(value),
            "component" => self.component = Some(value.to_string()),
            name => self.push_extra(name, value),
        }
    }
}

fn is_terminal() -> bool {
    match std::env::var("TERM") {
        Ok(term) => term != "dumb",
        Err(_) => false,
    }
}
