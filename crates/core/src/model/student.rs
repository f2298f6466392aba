use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ids::{StudentId, UserId};

#[derive(Debug, Error, Clone, PartialEq)]
#[non_exhaustive]
pub enum StudentError {
    #[error("hours to deduct must be a positive number, got {0}")]
    InvalidHours(f64),

    #[error("insufficient remaining hours: {remaining} left, {requested} requested")]
    InsufficientHours { remaining: f64, requested: f64 },
}

/// A student managed by one teacher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Student {
    pub id: StudentId,
    pub teacher_id: UserId,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    pub remaining_hours: f64,
    #[serde(with = "crate::time::serde_utc")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "crate::time::serde_utc")]
    pub updated_at: DateTime<Utc>,
}

impl Student {
    /// Checks whether `hours` could be deducted without applying it.
    ///
    /// # Errors
    ///
    /// Returns `InvalidHours` for non-finite or non-positive amounts and
    /// `InsufficientHours` when fewer hours remain than requested.
    pub fn check_deduction(&self, hours: f64) -> Result<(), StudentError> {
        if !hours.is_finite() || hours <= 0.0 {
            return Err(StudentError::InvalidHours(hours));
        }
        if self.remaining_hours < hours {
            return Err(StudentError::InsufficientHours {
                remaining: self.remaining_hours,
                requested: hours,
            });
        }
        Ok(())
    }

    /// Subtracts `hours` from the remaining balance.
    ///
    /// # Errors
    ///
    /// Same as [`Student::check_deduction`]; the balance is untouched on error.
    pub fn deduct_hours(&mut self, hours: f64, at: DateTime<Utc>) -> Result<f64, StudentError> {
        self.check_deduction(hours)?;
        self.remaining_hours -= hours;
        self.updated_at = at;
        Ok(self.remaining_hours)
    }
}

/// Reply of the deduct-hours endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeductHoursReply {
    #[serde(default)]
    pub message: String,
    pub remaining_hours: f64,
}
