//! Log line layout for the gateway binary.
//!
//! Default tracing format: `LEVEL span1:span2: target: message`
//! This format:            `TIMESTAMP LEVEL target: span1{a=1}:span2: message`
//!
//! Span fields are printed so the radio port of an RF ingest call shows up
//! on every line logged while handling that frame.

use std::fmt;
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::format::{self, FormatEvent, FormatFields};
use tracing_subscriber::fmt::{FmtContext, FormattedFields};
use tracing_subscriber::registry::LookupSpan;

/// Event formatter: timestamp, level, target, then spans with their fields.
pub struct GatewayFormat {
    pub ansi: bool,
}

impl GatewayFormat {
    fn level_style(&self, level: &tracing::Level) -> &'static str {
        if !self.ansi {
            return "";
        }
        match *level {
            tracing::Level::ERROR => "\x1b[31m", // Red
            tracing::Level::WARN => "\x1b[33m",  // Yellow
            tracing::Level::INFO => "\x1b[32m",  // Green
            tracing::Level::DEBUG => "\x1b[34m", // Blue
            tracing::Level::TRACE => "\x1b[35m", // Magenta
        }
    }
}

impl<S, N> FormatEvent<S, N> for GatewayFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();

        write!(
            writer,
            "{} ",
            chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ")
        )?;

        let level = metadata.level();
        let reset = if self.ansi { "\x1b[0m" } else { "" };
        write!(writer, "{}{:>5}{} ", self.level_style(level), level, reset)?;

        write!(writer, "{}: ", metadata.target())?;

        if let Some(scope) = ctx.event_scope() {
            let mut first = true;
            for span in scope.from_root() {
                if !first {
                    write!(writer, ":")?;
                }
                write!(writer, "{}", span.name())?;
                let extensions = span.extensions();
                if let Some(fields) = extensions.get::<FormattedFields<N>>()
                    && !fields.is_empty()
                {
                    write!(writer, "{{{}}}", fields)?;
                }
                first = false;
            }
            if !first {
                write!(writer, ": ")?;
            }
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn span_fields_follow_target() {
        let capture = Capture::default();
        let writer = capture.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .event_format(GatewayFormat { ansi: false })
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            let span = tracing::info_span!("ingest_rf", port = "radio0", subif = 1);
            let _entered = span.enter();
            tracing::info!("frame accepted");
        });

        let out = String::from_utf8(capture.0.lock().unwrap().clone()).unwrap();
        assert!(
            out.contains(
                " INFO aprs_gateway::log_format::tests: ingest_rf{port=\"radio0\" subif=1}: frame accepted"
            ),
            "{}",
            out
        );
        assert!(!out.contains('\x1b'));
    }
}
