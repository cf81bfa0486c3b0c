//! Console log formatting with redaction.
//!
//! Plain text output with span context, no ANSI colors.
//! Format: `LEVEL target: message [span1{field=value}][span2{field=value}]`

use crate::tools::redact::Redactor;
use std::fmt::Write as _;
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields, FormattedFields};
use tracing_subscriber::registry::LookupSpan;

/// Log formatter which renders a whole line first and strips registered secrets before writing it.
pub struct RedactingLogFormat {
    redactor: Redactor,
}

impl RedactingLogFormat {
    pub fn new(redactor: Redactor) -> Self {
        Self { redactor }
    }
}

impl<S, N> FormatEvent<S, N> for RedactingLogFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        let metadata = event.metadata();
        let mut line = String::new();

        write!(line, "{:<5} {}: ", metadata.level(), metadata.target())?;
        ctx.field_format()
            .format_fields(Writer::new(&mut line), event)?;

        if let Some(scope) = ctx.event_scope() {
            let spans: Vec<_> = scope.collect();

            if !spans.is_empty() {
                line.push(' ');

                // Outermost span first
                for span in spans.into_iter().rev() {
                    write!(line, "[{}", span.name())?;

                    let ext = span.extensions();
                    if let Some(fields) = ext.get::<FormattedFields<N>>() {
                        if !fields.is_empty() {
                            write!(line, "{{{}}}", fields)?;
                        }
                    }

                    line.push(']');
                }
            }
        }

        writeln!(writer, "{}", self.redactor.filter(&line))
    }
}
