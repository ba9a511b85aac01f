//! Human-friendly durations such as `90s`, `1h` or `250ms`.

use std::time::Duration;

use crate::{ConfigError, ConfigResult};

/// Parse `<number><unit>` where unit is one of `ms`, `s`, `m`, `h` or `d`.
pub fn parse_duration(input: &str) -> ConfigResult<Duration> {
    let input = input.trim();
    let invalid = |message: &str| ConfigError::InvalidValue {
        field: "duration".to_string(),
        message: format!("{message}: {input:?}"),
    };

    let split = input
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .ok_or_else(|| invalid("missing unit"))?;
    let (number, unit) = input.split_at(split);
    let number: f64 = number.parse().map_err(|_| invalid("bad number"))?;

    let seconds = match unit.trim() {
        "ms" => number / 1000.0,
        "s" => number,
        "m" => number * 60.0,
        "h" => number * 3600.0,
        "d" => number * 86400.0,
        _ => return Err(invalid("unknown unit")),
    };
    Duration::try_from_secs_f64(seconds).map_err(|_| invalid("out of range"))
}
