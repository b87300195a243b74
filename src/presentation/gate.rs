use crate::config::PROBABILITIES_START_DATE_SECS;
use crate::types::NANOS_PER_SEC;

/// Whether the probability pages are open at `now_ns`. Only the HTML page
/// consults this; the actions behind it accept predictions at any time.
pub fn probabilities_open(now_ns: i64) -> bool {
    now_ns >= PROBABILITIES_START_DATE_SECS * NANOS_PER_SEC
}
