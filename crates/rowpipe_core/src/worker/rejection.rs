use rowpipe_error::{ErrorKind, RowpipeError, Result};

use crate::graph::ErrorPolicy;

/// Check rejected rows against the error budget of a stage.
///
/// The absolute check applies when `max_errors` is non-negative. The
/// percentage check applies when `max_error_percent` is non-negative, at
/// least one row was read and at least `min_rows_for_percent` rows were read.
pub fn check_rejection_rates(policy: &ErrorPolicy, rejected: u64, read: u64) -> Result<()> {
    if policy.max_errors >= 0 && rejected > policy.max_errors as u64 {
        return Err(RowpipeError::new("Too many rejected rows")
            .with_kind(ErrorKind::RejectionThresholdExceeded)
            .with_field("max_errors", policy.max_errors)
            .with_field("rejected", rejected));
    }

    if policy.max_error_percent >= 0 && read > 0 && read >= policy.min_rows_for_percent {
        let pct = 100.0 * rejected as f64 / read as f64;
        if pct > policy.max_error_percent as f64 {
            return Err(RowpipeError::new("Maximum percentage of rejected rows reached")
                .with_kind(ErrorKind::RejectionThresholdExceeded)
                .with_field("max_percent", policy.max_error_percent)
                .with_field("percent", format!("{pct:.2}"))
                .with_field("rejected", rejected)
                .with_field("read", read));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thresholds() {
        struct TestCase {
            policy: ErrorPolicy,
            rejected: u64,
            read: u64,
            exceeded: bool,
        }

        let cases = [
            // Both disabled.
            TestCase {
                policy: ErrorPolicy::new("err"),
                rejected: 1000,
                read: 1000,
                exceeded: false,
            },
            TestCase {
                policy: ErrorPolicy::new("err").with_max_errors(5),
                rejected: 5,
                read: 0,
                exceeded: false,
            },
            TestCase {
                policy: ErrorPolicy::new("err").with_max_errors(5),
                rejected: 6,
                read: 0,
                exceeded: true,
            },
            TestCase {
                policy: ErrorPolicy::new("err").with_max_errors(0),
                rejected: 1,
                read: 10,
                exceeded: true,
            },
            // Not enough rows read yet.
            TestCase {
                policy: ErrorPolicy::new("err").with_max_error_percent(10, 10),
                rejected: 5,
                read: 9,
                exceeded: false,
            },
            TestCase {
                policy: ErrorPolicy::new("err").with_max_error_percent(10, 10),
                rejected: 1,
                read: 10,
                exceeded: false,
            },
            TestCase {
                policy: ErrorPolicy::new("err").with_max_error_percent(10, 10),
                rejected: 2,
                read: 10,
                exceeded: true,
            },
            TestCase {
                policy: ErrorPolicy::new("err").with_max_error_percent(10, 0),
                rejected: 3,
                read: 0,
                exceeded: false,
            },
        ];

        for (idx, case) in cases.into_iter().enumerate() {
            let result = check_rejection_rates(&case.policy, case.rejected, case.read);
            assert_eq!(case.exceeded, result.is_err(), "case {idx}");
            if let Err(e) = result {
                assert_eq!(ErrorKind::RejectionThresholdExceeded, e.kind());
            }
        }
    }
}
