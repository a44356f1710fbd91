//! Human-readable rendering of measurement results.

use std::fmt::{self, Display, Formatter};

use crate::{BatchResult, MemoryDelta, ProbeReading};

/// Combines the heavyweight and lightweight deltas into one comparison record.
#[derive(Debug)]
#[non_exhaustive]
pub struct ComparisonReporter;

impl ComparisonReporter {
    /// Computes the comparison of a heavyweight delta against a lightweight delta.
    ///
    /// Never fails: a lightweight delta of zero or less yields [`Ratio::Undefined`].
    #[must_use]
    pub fn compare(heavyweight: MemoryDelta, lightweight: MemoryDelta) -> Comparison {
        let ratio = if lightweight.bytes() > 0 {
            #[expect(
                clippy::cast_precision_loss,
                reason = "the ratio is only ever shown rounded to a whole number"
            )]
            Ratio::Defined(heavyweight.bytes() as f64 / lightweight.bytes() as f64)
        } else {
            Ratio::Undefined
        };

        Comparison {
            platform_bytes: heavyweight.bytes(),
            virtual_bytes: lightweight.bytes(),
            diff_bytes: heavyweight.bytes().saturating_sub(lightweight.bytes()),
            ratio,
        }
    }
}

/// How many times more memory the heavyweight unit used than the lightweight unit.
#[derive(Clone, Copy, Debug, PartialEq)]
#[non_exhaustive]
pub enum Ratio {
    /// `heavyweight / lightweight`.
    Defined(f64),

    /// The lightweight unit did not measurably grow used-memory, so there is nothing to divide by.
    Undefined,
}

/// Structured result of comparing the two single-unit measurements.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Comparison {
    platform_bytes: i64,
    virtual_bytes: i64,
    diff_bytes: i64,
    ratio: Ratio,
}

impl Comparison {
    /// Memory attributed to the single heavyweight unit.
    #[must_use]
    pub fn platform_bytes(&self) -> i64 {
        self.platform_bytes
    }

    /// Memory attributed to the single lightweight unit.
    #[must_use]
    pub fn virtual_bytes(&self) -> i64 {
        self.virtual_bytes
    }

    /// `platform_bytes - virtual_bytes`.
    #[must_use]
    pub fn diff_bytes(&self) -> i64 {
        self.diff_bytes
    }

    /// `platform_bytes / virtual_bytes`, if defined.
    #[must_use]
    pub fn ratio(&self) -> Ratio {
        self.ratio
    }
}

impl Display for Comparison {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Total Memory - Single Platform Thread: {}",
            Amount(self.platform_bytes)
        )?;
        writeln!(
            f,
            "Total Memory - Single Virtual Thread:  {}",
            Amount(self.virtual_bytes)
        )?;
        writeln!(f, "Memory Difference: {}", Amount(self.diff_bytes))?;

        match self.ratio {
            Ratio::Defined(ratio) => writeln!(
                f,
                "Platform thread uses ~{}x more total memory than virtual thread",
                group_thousands(round_ratio(ratio))
            )?,
            Ratio::Undefined => writeln!(
                f,
                "Platform thread to virtual thread ratio is undefined (virtual thread used {} bytes)",
                group_thousands(self.virtual_bytes)
            )?,
        }

        writeln!(f)?;
        writeln!(
            f,
            "Note: Platform threads reserve a fixed stack for every thread when it is created,"
        )?;
        write!(
            f,
            "      while virtual threads only allocate memory as needed (typically a few KB)."
        )
    }
}

impl Display for ProbeReading {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Memory before thread creation: {}",
            Amount(saturating_i64(self.before().used_bytes()))
        )?;
        writeln!(
            f,
            "Memory after thread creation:  {}",
            Amount(saturating_i64(self.after().used_bytes()))
        )?;
        write!(f, "Total memory used by thread:   {}", Amount(self.delta().bytes()))
    }
}

impl Display for BatchResult {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} tasks finished in {} ms ({} completed, {} failed)",
            self.strategy(),
            group_count(self.task_count().get()),
            group_thousands(i64::try_from(self.elapsed().as_millis()).unwrap_or(i64::MAX)),
            group_count(self.completed()),
            group_count(self.failed()),
        )
    }
}

/// A byte count rendered as `<KB> KB (<bytes> bytes)`, with KB truncated towards zero.
struct Amount(i64);

impl Display for Amount {
    #[expect(clippy::integer_division, reason = "whole kilobytes are what gets shown")]
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} KB ({} bytes)",
            group_thousands(self.0 / 1024),
            group_thousands(self.0)
        )
    }
}

fn saturating_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn group_count(value: usize) -> String {
    group_thousands(i64::try_from(value).unwrap_or(i64::MAX))
}

#[expect(
    clippy::cast_possible_truncation,
    reason = "saturating float to int conversion is the intent"
)]
fn round_ratio(ratio: f64) -> i64 {
    ratio.round() as i64
}

/// Formats `value` with a comma between every group of three digits.
#[expect(
    clippy::arithmetic_side_effects,
    reason = "index is always below the digit count and capacity math cannot overflow"
)]
fn group_thousands(value: i64) -> String {
    let digits = value.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3 + 1);

    if value < 0 {
        grouped.push('-');
    }

    for (index, digit) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }

    grouped
}
