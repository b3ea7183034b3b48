//! Text parsing helpers shared by the host and the feature modules.

use std::time::Duration;

/// A parsed `/command arg1 arg2` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub name: String,
    pub args: Vec<String>,
}

/// Parse a slash command. Returns `None` for anything that isn't one.
pub fn parse_command(input: &str) -> Option<CommandLine> {
    let rest = input.trim().strip_prefix('/')?;
    let mut parts = rest.split_whitespace();
    let name = parts.next()?.to_lowercase();

    Some(CommandLine {
        name,
        args: parts.map(str::to_string).collect(),
    })
}

/// Replace `{key}` placeholders with the given values.
///
/// Unknown placeholders are left untouched.
pub fn apply_fillings(template: &str, fillings: &[(&str, &str)]) -> String {
    let mut result = template.to_string();
    for (key, value) in fillings {
        result = result.replace(&format!("{{{}}}", key), value);
    }
    result
}

/// Replace every ASCII-case-insensitive occurrence of `needle` in `haystack`.
pub fn replace_ignore_case(haystack: &str, needle: &str, replacement: &str) -> String {
    if needle.is_empty() {
        return haystack.to_string();
    }

    let lower_haystack = haystack.to_ascii_lowercase();
    let lower_needle = needle.to_ascii_lowercase();

    let mut result = String::with_capacity(haystack.len());
    let mut last = 0;
    for (start, _) in lower_haystack.match_indices(&lower_needle) {
        if start < last {
            continue;
        }
        result.push_str(&haystack[last..start]);
        result.push_str(replacement);
        last = start + needle.len();
    }
    result.push_str(&haystack[last..]);
    result
}

/// Format a duration for humans ("45s", "10m", "1h 30m", "2d 3h").
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else if secs < 86400 {
        let hours = secs / 3600;
        let mins = (secs % 3600) / 60;
        if mins > 0 {
            format!("{}h {}m", hours, mins)
        } else {
            format!("{}h", hours)
        }
    } else {
        let days = secs / 86400;
        let hours = (secs % 86400) / 3600;
        if hours > 0 {
            format!("{}d {}h", days, hours)
        } else {
            format!("{}d", days)
        }
    }
}

/// Parse duration string (e.g., "45s", "1h", "30m", "1d").
///
/// Supported units:
/// - s: seconds
/// - m: minutes
/// - h: hours
/// - d: days
/// - w: weeks
///
/// A bare number is read as seconds.
pub fn parse_duration(input: &str) -> Option<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }

    if let Ok(secs) = input.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let (split, unit) = input.char_indices().last()?;
    let amount: u64 = input[..split].parse().ok()?;

    let multiplier = match unit {
        's' => 1,
        'm' => 60,
        'h' => 3600,
        'd' => 86400,
        'w' => 604800,
        _ => return None,
    };

    Some(Duration::from_secs(amount.checked_mul(multiplier)?))
}
