use console::Style;
use std::{
    fmt,
    time::{Duration, SystemTime},
};
use time::{format_description, OffsetDateTime, UtcOffset};
use tracing::{field::Visit, Level, Subscriber};
use tracing_core::Field;
use tracing_subscriber::{
    fmt::{format::Writer, FmtContext, FormatEvent, FormatFields},
    registry::LookupSpan,
};

use crate::RPC_CALLS_TARGET;

/// Fields of a remote call event, see `fc_funnel::error::with_timeout`.
#[derive(Default)]
struct RpcCall {
    network: String,
    method: String,
    success: Option<bool>,
    elapsed_micros: Option<u64>,
}

impl Visit for RpcCall {
    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "network" => value.clone_into(&mut self.network),
            "method" => value.clone_into(&mut self.method),
            _ => {}
        }
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        if field.name() == "success" {
            self.success = Some(value)
        }
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        if field.name() == "elapsed_micros" {
            self.elapsed_micros = Some(value)
        }
    }

    fn record_debug(&mut self, _field: &Field, _value: &dyn fmt::Debug) {}
}

/// The `message` field of an event.
struct Message(Option<String>);

impl Visit for Message {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.0 = Some(format!("{value:?}"));
        }
    }
}

/// `[timestamp] LEVEL target message`, the target being left out of `INFO` lines. Remote calls are rendered as
/// `[timestamp] RPC network method ok - elapsed`.
pub struct CustomFormatter {
    local_offset: UtcOffset,
    dim: Style,
    ts_format: Vec<format_description::BorrowedFormatItem<'static>>,
}

impl CustomFormatter {
    pub fn new() -> Self {
        Self {
            local_offset: UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC),
            dim: Style::new().dim(),
            ts_format: format_description::parse("[year]-[month]-[day] [hour]:[minute]:[second]:[subsecond digits:3]")
                .expect("Invalid date format constant"),
        }
    }

    fn write_timestamp(&self, writer: &mut Writer<'_>, ts: SystemTime) -> fmt::Result {
        let datetime = OffsetDateTime::from(ts).to_offset(self.local_offset);
        match datetime.format(&self.ts_format) {
            Ok(ts) => write!(writer, "{}{}{}", self.dim.apply_to("["), self.dim.apply_to(ts), self.dim.apply_to("]")),
            Err(_) => write!(writer, "<error>"),
        }
    }

    fn write_rpc_call(
        &self,
        writer: &mut Writer<'_>,
        call: &RpcCall,
        success: bool,
        elapsed_micros: u64,
    ) -> fmt::Result {
        let status = if success { Style::new().green().apply_to("ok") } else { Style::new().red().apply_to("failed") };
        let time_style = if elapsed_micros <= 1_000_000 { Style::new() } else { Style::new().yellow() };
        writeln!(
            writer,
            " {} {} {} {} - {:.3?}",
            Style::new().magenta().apply_to("RPC"),
            self.dim.apply_to(&call.network),
            call.method,
            status,
            time_style.apply_to(Duration::from_micros(elapsed_micros)),
        )
    }
}

impl Default for CustomFormatter {
    fn default() -> Self {
        Self::new()
    }
}

fn level_style(level: &Level) -> Style {
    match *level {
        Level::INFO => Style::new().green(),
        Level::WARN => Style::new().yellow(),
        Level::ERROR => Style::new().red(),
        Level::DEBUG => Style::new().blue(),
        Level::TRACE => Style::new().cyan(),
    }
}

impl<S, N> FormatEvent<S, N> for CustomFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let metadata = event.metadata();
        let (level, target) = (metadata.level(), metadata.target());
        self.write_timestamp(&mut writer, SystemTime::now())?;

        if target == RPC_CALLS_TARGET {
            let mut call = RpcCall::default();
            event.record(&mut call);
            if let (false, Some(success), Some(elapsed_micros)) =
                (call.method.is_empty(), call.success, call.elapsed_micros)
            {
                return self.write_rpc_call(&mut writer, &call, success, elapsed_micros);
            }
        }

        let mut message = Message(None);
        event.record(&mut message);
        let message = message.0.unwrap_or_default();
        let level = level_style(level).apply_to(level);
        if *metadata.level() == Level::INFO && target != RPC_CALLS_TARGET {
            writeln!(writer, " {level} {message}")
        } else {
            writeln!(writer, " {level} {} {message}", self.dim.apply_to(target))
        }
    }
}
