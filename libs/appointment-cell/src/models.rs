// libs/appointment-cell/src/models.rs
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ==============================================================================
// CORE APPOINTMENT MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    /// Clinic-local calendar date.
    pub appointment_date: NaiveDate,
    /// Clinic-local time of day, minute granularity.
    pub appointment_time: NaiveTime,
    pub duration_minutes: i32,
    pub status: AppointmentStatus,
    pub reason: String,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    pub fn starts_at(&self) -> NaiveDateTime {
        self.appointment_date.and_time(self.appointment_time)
    }

    pub fn ends_at(&self) -> NaiveDateTime {
        self.starts_at() + chrono::Duration::minutes(self.duration_minutes as i64)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    Confirmed,
    Completed,
    Cancelled,
    NoShow,
}

impl AppointmentStatus {
    /// Active appointments occupy the doctor's calendar; terminal ones do not
    /// participate in conflict or slot checks.
    pub fn is_active(&self) -> bool {
        matches!(self, AppointmentStatus::Scheduled | AppointmentStatus::Confirmed)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentStatus::Scheduled => write!(f, "scheduled"),
            AppointmentStatus::Confirmed => write!(f, "confirmed"),
            AppointmentStatus::Completed => write!(f, "completed"),
            AppointmentStatus::Cancelled => write!(f, "cancelled"),
            AppointmentStatus::NoShow => write!(f, "no_show"),
        }
    }
}

// ==============================================================================
// REFERENTIAL READ MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StaffPosition {
    Doctor,
    Nurse,
    Registrar,
}

/// Staff row restricted to the doctor position; consumed read-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Doctor {
    pub id: Uuid,
    pub full_name: String,
    pub position: StaffPosition,
    #[serde(default)]
    pub specialty: String,
    #[serde(default = "default_true")]
    pub is_available: bool,
}

fn default_true() -> bool {
    true
}

// ==============================================================================
// REQUEST/RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookAppointmentRequest {
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub appointment_date: NaiveDate,
    pub appointment_time: NaiveTime,
    #[serde(default = "default_duration_minutes")]
    pub duration_minutes: i32,
    pub reason: String,
    pub notes: Option<String>,
}

fn default_duration_minutes() -> i32 {
    30
}

#[derive(Debug, Deserialize)]
pub struct AvailableSlotsQuery {
    pub doctor_id: Uuid,
    /// YYYY-MM-DD; parsed by the slot planner so a malformed value surfaces
    /// as a validation error rather than a routing failure.
    pub date: String,
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

/// Minimum notice, in hours, for a patient-initiated cancellation.
pub const MIN_CANCELLATION_NOTICE_HOURS: i64 = 2;

#[derive(Debug, Clone, thiserror::Error)]
pub enum SchedulingError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflicts with an existing appointment at {conflicting_time}")]
    Conflict { conflicting_time: NaiveTime },

    #[error(
        "Appointments cannot be cancelled less than {MIN_CANCELLATION_NOTICE_HOURS} hours before the start"
    )]
    LeadTime,

    #[error("Appointment not found")]
    NotFound,

    #[error("Appointment cannot be modified in current status: {0}")]
    InvalidState(AppointmentStatus),

    #[error("Database error: {0}")]
    Database(String),
}
