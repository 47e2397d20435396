//! `time` -- current time, Unix timestamps, and cancellable delays.
//!
//! `action=now` (default) formats the clock's time. Human-friendly tokens
//! (`YYYY`, `MM`, `DD`, `HH`, `mm`, `ss`) are translated to strftime; a
//! format already containing `%` or no recognized token is used unchanged.
//! Without a `format` the output is RFC 3339.

use std::fmt::Write as _;

use futures_util::future::BoxFuture;
use serde_json::{Map, Value, json};
use stepwise_types::duration::format_duration;
use stepwise_types::tool::ToolDescriptor;

use super::{Tool, ToolContext, ToolError, opt_duration, opt_str};
use crate::service::clock::Clock;

pub const TIME_TOOL: &str = "time";

/// Token translations, longest first so `YYYY` wins over shorter matches.
const FORMAT_TOKENS: &[(&str, &str)] = &[
    ("YYYY", "%Y"),
    ("MM", "%m"),
    ("DD", "%d"),
    ("HH", "%H"),
    ("mm", "%M"),
    ("ss", "%S"),
];

/// Translate a human-friendly format (`YYYY-MM-DD HH:mm:ss`) to strftime.
///
/// Formats that already use `%` directives pass through unchanged.
pub fn translate_format(format: &str) -> String {
    if format.contains('%') {
        return format.to_string();
    }
    let mut out = String::with_capacity(format.len() + 8);
    let mut rest = format;
    'scan: while !rest.is_empty() {
        for (token, directive) in FORMAT_TOKENS {
            if let Some(tail) = rest.strip_prefix(token) {
                out.push_str(directive);
                rest = tail;
                continue 'scan;
            }
        }
        let mut chars = rest.chars();
        if let Some(c) = chars.next() {
            out.push(c);
        }
        rest = chars.as_str();
    }
    out
}

/// Clock-backed time operations.
pub struct TimeTool<C: Clock> {
    clock: C,
}

impl<C: Clock> TimeTool<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn now(&self, inputs: &Map<String, Value>) -> Result<Value, ToolError> {
        let now = self.clock.now();
        let Some(format) = opt_str(inputs, "format").filter(|f| !f.trim().is_empty()) else {
            return Ok(Value::String(now.to_rfc3339()));
        };

        let strftime = translate_format(&format);
        let mut out = String::new();
        // An invalid directive surfaces as fmt::Error instead of a panic.
        write!(out, "{}", now.format(&strftime))
            .map_err(|_| ToolError::InvalidInput(format!("invalid time format '{format}'")))?;
        Ok(Value::String(out))
    }
}

impl<C: Clock> Tool for TimeTool<C> {
    fn name(&self) -> &str {
        TIME_TOOL
    }

    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            TIME_TOOL,
            "Get the current time (optionally formatted, e.g. \"YYYY-MM-DD HH:mm:ss\"), a Unix timestamp, or wait for a duration.",
            json!({
                "type": "object",
                "properties": {
                    "action": { "type": "string", "enum": ["now", "timestamp", "delay", "sleep"] },
                    "format": { "type": "string" },
                    "duration": { "type": "string", "description": "For delay/sleep, e.g. \"2s\"" }
                }
            }),
        )
    }

    fn call<'a>(
        &'a self,
        ctx: &'a ToolContext,
        inputs: Map<String, Value>,
    ) -> BoxFuture<'a, Result<Value, ToolError>> {
        Box::pin(async move {
            let action = opt_str(&inputs, "action").unwrap_or_else(|| "now".to_string());
            match action.trim() {
                "" | "now" => self.now(&inputs),
                "timestamp" => Ok(json!(self.clock.now().timestamp())),
                "delay" | "sleep" => {
                    let duration = opt_duration(&inputs, "duration")?.ok_or_else(|| {
                        ToolError::InvalidInput(format!("'{action}' requires 'duration'"))
                    })?;
                    ctx.sleep(duration).await?;
                    Ok(json!({ "slept": format_duration(duration) }))
                }
                other => Err(ToolError::InvalidInput(format!(
                    "unknown time action '{other}' (expected now, timestamp, delay, sleep)"
                ))),
            }
        })
    }
}
