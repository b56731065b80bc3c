// src/cron/field.rs

//! Parsing of a single cron field into a bit set of allowed values.

use std::ops::RangeInclusive;

/// Which of the five positions a field occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Minute,
    Hour,
    DayOfMonth,
    Month,
    DayOfWeek,
}

impl FieldKind {
    pub const ALL: [FieldKind; 5] = [
        FieldKind::Minute,
        FieldKind::Hour,
        FieldKind::DayOfMonth,
        FieldKind::Month,
        FieldKind::DayOfWeek,
    ];

    /// Valid values for this field. Day-of-week is 0 = Sunday .. 6 = Saturday.
    pub fn range(self) -> RangeInclusive<u32> {
        match self {
            FieldKind::Minute => 0..=59,
            FieldKind::Hour => 0..=23,
            FieldKind::DayOfMonth => 1..=31,
            FieldKind::Month => 1..=12,
            FieldKind::DayOfWeek => 0..=6,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            FieldKind::Minute => "minute",
            FieldKind::Hour => "hour",
            FieldKind::DayOfMonth => "day-of-month",
            FieldKind::Month => "month",
            FieldKind::DayOfWeek => "day-of-week",
        }
    }
}

/// Set of allowed values for one field, one bit per value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FieldSet(u64);

impl FieldSet {
    pub fn contains(self, value: u32) -> bool {
        value < 64 && self.0 & (1u64 << value) != 0
    }

    fn insert_range(&mut self, range: RangeInclusive<u32>, step: u32) {
        let mut v = *range.start();
        while v <= *range.end() {
            self.0 |= 1u64 << v;
            match v.checked_add(step) {
                Some(next) => v = next,
                None => break,
            }
        }
    }
}

/// Parse one field: `*`, `N`, `a,b,c`, `a-b`, `a-b/s` or `*/s`.
pub fn parse_field(kind: FieldKind, text: &str) -> Result<FieldSet, String> {
    let mut set = FieldSet(0);

    for part in text.split(',') {
        let part = part.trim();
        if part.is_empty() {
            return Err(format!("empty list element in {} field", kind.label()));
        }

        let (range_part, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step.parse().map_err(|_| {
                    format!("invalid step '{}' in {} field", step, kind.label())
                })?;
                if step == 0 {
                    return Err(format!("step must be >= 1 in {} field", kind.label()));
                }
                if range != "*" && !range.contains('-') {
                    return Err(format!(
                        "step requires '*' or a 'start-end' range in {} field (got '{}')",
                        kind.label(),
                        part
                    ));
                }
                (range, step)
            }
            None => (part, 1),
        };

        let range = parse_range(kind, range_part)?;
        set.insert_range(range, step);
    }

    Ok(set)
}

fn parse_range(kind: FieldKind, text: &str) -> Result<RangeInclusive<u32>, String> {
    if text == "*" {
        return Ok(kind.range());
    }

    let (start, end) = match text.split_once('-') {
        Some((a, b)) => (parse_value(kind, a)?, parse_value(kind, b)?),
        None => {
            let v = parse_value(kind, text)?;
            (v, v)
        }
    };

    if start > end {
        return Err(format!(
            "range start {} is greater than end {} in {} field",
            start,
            end,
            kind.label()
        ));
    }

    Ok(start..=end)
}

fn parse_value(kind: FieldKind, text: &str) -> Result<u32, String> {
    let value: u32 = text
        .trim()
        .parse()
        .map_err(|_| format!("invalid value '{}' in {} field", text, kind.label()))?;

    let valid = kind.range();
    if !valid.contains(&value) {
        return Err(format!(
            "value {} out of range {}-{} in {} field",
            value,
            valid.start(),
            valid.end(),
            kind.label()
        ));
    }

    Ok(value)
}
