//! Human-readable byte size formatting

use std::fmt;

/// Byte count rendered with binary units
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ByteSize(pub u64);

impl ByteSize {
    /// One decimal place at most, e.g. `1.5MB`
    pub fn to_human_readable(&self) -> String {
        const UNITS: &[(&str, u64)] = &[
            ("B", 1),
            ("KB", 1024),
            ("MB", 1024 * 1024),
            ("GB", 1024 * 1024 * 1024),
            ("TB", 1024 * 1024 * 1024 * 1024),
        ];

        for &(unit, divisor) in UNITS.iter().rev() {
            if self.0 >= divisor {
                let value = self.0 / divisor;
                let decimal = (self.0 % divisor) * 10 / divisor;

                return if decimal > 0 {
                    format!("{}.{}{}", value, decimal, unit)
                } else {
                    format!("{}{}", value, unit)
                };
            }
        }

        format!("{}B", self.0)
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_human_readable())
    }
}
