use chrono::NaiveDate;

use super::ModelError;

/// Inclusive date window check; a missing bound is open on that side.
pub fn window_contains(from: Option<NaiveDate>, until: Option<NaiveDate>, date: NaiveDate) -> bool {
    from.is_none_or(|from| from <= date) && until.is_none_or(|until| until >= date)
}

pub(crate) fn validate_window(
    from: Option<NaiveDate>,
    until: Option<NaiveDate>,
) -> Result<(), ModelError> {
    match (from, until) {
        (Some(from), Some(until)) if from > until => {
            Err(ModelError::InvalidDateWindow { from, until })
        }
        _ => Ok(()),
    }
}
