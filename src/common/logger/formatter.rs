use core::fmt as core_fmt;
use std::fs;

use tracing::{Event, Subscriber};
use tracing_subscriber::{
    fmt::{
        self, FmtContext,
        format::{FormatEvent, FormatFields},
    },
    registry::LookupSpan,
};

/// Resident set size of this process, human readable.
pub fn get_ram_usage() -> String {
    let rss_kb = fs::read_to_string("/proc/self/status")
        .ok()
        .and_then(|status| {
            status
                .lines()
                .find(|l| l.starts_with("VmRSS:"))
                .and_then(|l| l.split_whitespace().nth(1))
                .and_then(|kb| kb.parse::<f64>().ok())
        })
        .unwrap_or(0.0);

    if rss_kb < 1024.0 {
        format!("{:.2} KB", rss_kb)
    } else if rss_kb < 1024.0 * 1024.0 {
        format!("{:.2} MB", rss_kb / 1024.0)
    } else {
        format!("{:.2} GB", rss_kb / (1024.0 * 1024.0))
    }
}

/// One event per line: `[ram] [timestamp] LEVEL target:line > message`.
pub struct LineFormatter {
    use_ansi: bool,
}

impl LineFormatter {
    pub fn new(use_ansi: bool) -> Self {
        Self { use_ansi }
    }

    fn paint(&self, code: &'static str) -> &'static str {
        if self.use_ansi { code } else { "" }
    }
}

impl<S, N> FormatEvent<S, N> for LineFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: fmt::format::Writer<'_>,
        event: &Event<'_>,
    ) -> core_fmt::Result {
        let reset = self.paint("\x1b[0m");
        let dim = self.paint("\x1b[2m");
        let bold = self.paint("\x1b[1m");

        let format = time::macros::format_description!(
            "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:3]"
        );
        let timestamp = time::OffsetDateTime::now_local()
            .unwrap_or_else(|_| time::OffsetDateTime::now_utc())
            .format(&format)
            .unwrap_or_else(|_| "Unknown Time".to_string());

        write!(writer, "{}[{}] [{}]{} ", dim, get_ram_usage(), timestamp, reset)?;

        let metadata = event.metadata();
        let level = *metadata.level();
        let color = match level {
            tracing::Level::ERROR => self.paint("\x1b[31m"),
            tracing::Level::WARN => self.paint("\x1b[33m"),
            tracing::Level::INFO => self.paint("\x1b[32m"),
            tracing::Level::DEBUG => self.paint("\x1b[34m"),
            tracing::Level::TRACE => self.paint("\x1b[35m"),
        };
        write!(writer, "{}{}{: <5}{} ", color, bold, level.as_str(), reset)?;

        let line = metadata
            .line()
            .map(|l| l.to_string())
            .unwrap_or_else(|| "??".to_string());
        write!(writer, "{}{}:{}{} > ", dim, metadata.target(), line, reset)?;

        ctx.format_fields(writer.by_ref(), event)?;
        write!(writer, "{}", reset)?;
        writeln!(writer)
    }
}
