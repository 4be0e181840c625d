//! Fitting GitLab job logs into a GitHub check run.

use std::{borrow::Cow, sync::OnceLock};

use regex::Regex;

/// Lines longer than this are hard-wrapped.
pub const WRAP_WIDTH: usize = 150;

pub fn strip_ansi(text: &str) -> Cow<'_, str> {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX
        .get_or_init(|| Regex::new(r"\x1B(?:[@-Z\\-_]|\[[0-?]*[ -/]*[@-~])").unwrap())
        .replace_all(text, "")
}

fn wrap_line(line: &str) -> Cow<'_, str> {
    if line.len() <= WRAP_WIDTH || line.chars().count() <= WRAP_WIDTH {
        return Cow::Borrowed(line);
    }
    let mut out = String::with_capacity(line.len() + line.len() / WRAP_WIDTH);
    for (i, c) in line.chars().enumerate() {
        if i > 0 && i % WRAP_WIDTH == 0 {
            out.push('\n');
        }
        out.push(c);
    }
    Cow::Owned(out)
}

/// Length of `line` once [`wrap_line`] has inserted its breaks.
fn wrapped_len(line: &str) -> usize {
    let chars = line.chars().count();
    if chars <= WRAP_WIDTH { line.len() } else { line.len() + (chars - 1) / WRAP_WIDTH }
}

fn banner(shown: usize, total: usize) -> String {
    format!("Showing last {shown} out of {total} total lines\n\n")
}

/// Strip escapes and keep the most recent output that fits in `ceiling` bytes.
///
/// A log that fits is returned as stripped, untouched. Otherwise a suffix of
/// whole lines is kept behind a banner, and long lines in it are wrapped.
/// Wrapped lengths and the banner are charged against the ceiling, so the
/// result never exceeds it.
pub fn format_log(raw: &str, ceiling: usize) -> String {
    let text = strip_ansi(raw);
    if text.len() <= ceiling {
        return text.into_owned();
    }

    let lines = text.split('\n').collect::<Vec<_>>();
    let total = lines.len();
    // The banner for `kept` lines is never longer than the one for `total`.
    let budget = ceiling.saturating_sub(banner(total, total).len());
    let mut size = 0;
    let mut kept = 0;
    for line in lines.iter().rev() {
        let cost = wrapped_len(line) + 1;
        if size + cost > budget {
            break;
        }
        size += cost;
        kept += 1;
    }
    tracing::debug!("Log truncated to {} of {} lines ({} bytes)", kept, total, size);

    let mut out = banner(kept, total);
    let body = lines[total - kept..].iter().map(|line| wrap_line(line)).collect::<Vec<_>>();
    out.push_str(&body.join("\n"));
    if out.len() > ceiling {
        // Only reachable when the ceiling can't even hold the banner.
        out.truncate(ceiling);
    }
    out
}
