// libs/appointment-cell/src/services/conflict.rs
use std::sync::Arc;

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use reqwest::Method;
use tracing::{debug, warn};
use uuid::Uuid;

use shared_database::supabase::SupabaseClient;

use crate::models::{Appointment, SchedulingError};

/// First appointment whose `[start, start+duration)` interval shares an
/// instant with the candidate, in input order. Intervals are half-open, so
/// back-to-back appointments never conflict. Callers pass only appointments
/// that occupy the calendar (scheduled or confirmed).
pub fn find_conflict(
    candidate_start: NaiveDateTime,
    duration_minutes: i32,
    existing: &[Appointment],
) -> Option<&Appointment> {
    let candidate_end = candidate_start + Duration::minutes(duration_minutes as i64);

    existing
        .iter()
        .find(|other| candidate_start < other.ends_at() && other.starts_at() < candidate_end)
}

pub struct ConflictDetectionService {
    supabase: Arc<SupabaseClient>,
}

impl ConflictDetectionService {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    /// Check a candidate slot against the doctor's active appointments on the
    /// date. Returns the conflicting start time as the error payload so the
    /// caller can surface it.
    pub async fn ensure_slot_free(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        time: NaiveTime,
        duration_minutes: i32,
        auth_token: &str,
    ) -> Result<(), SchedulingError> {
        if duration_minutes <= 0 {
            return Err(SchedulingError::Validation(
                "Appointment duration must be a positive number of minutes".to_string(),
            ));
        }

        debug!(
            "Checking conflicts for doctor {} on {} at {} ({} min)",
            doctor_id, date, time, duration_minutes
        );

        let existing = self
            .active_appointments_for_day(doctor_id, date, auth_token)
            .await?;

        if let Some(hit) = find_conflict(date.and_time(time), duration_minutes, &existing) {
            warn!(
                "Conflict detected for doctor {} on {}: candidate {} overlaps appointment at {}",
                doctor_id, date, time, hit.appointment_time
            );
            return Err(SchedulingError::Conflict {
                conflicting_time: hit.appointment_time,
            });
        }

        Ok(())
    }

    /// The doctor's scheduled and confirmed appointments on a date.
    /// Completed, cancelled and no-show appointments never occupy the
    /// calendar.
    pub async fn active_appointments_for_day(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, SchedulingError> {
        let path = format!(
            "/rest/v1/appointments?doctor_id=eq.{}&appointment_date=eq.{}&status=in.(scheduled,confirmed)&order=appointment_time.asc",
            doctor_id, date
        );

        let appointments: Vec<Appointment> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| SchedulingError::Database(e.to_string()))?;

        Ok(appointments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crate::models::AppointmentStatus;

    fn appointment(date: &str, time: &str, duration_minutes: i32) -> Appointment {
        Appointment {
            id: Uuid::new_v4(),
            patient_id: Uuid::new_v4(),
            doctor_id: Uuid::new_v4(),
            appointment_date: date.parse().unwrap(),
            appointment_time: time.parse().unwrap(),
            duration_minutes,
            status: AppointmentStatus::Confirmed,
            reason: "Consultation".to_string(),
            notes: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn candidate(date: &str, time: &str) -> NaiveDateTime {
        date.parse::<NaiveDate>()
            .unwrap()
            .and_time(time.parse().unwrap())
    }

    #[test]
    fn overlapping_candidate_conflicts() {
        // Confirmed 10:00-10:30; candidate 10:15-10:45 overlaps.
        let existing = vec![appointment("2025-06-01", "10:00:00", 30)];

        let hit = find_conflict(candidate("2025-06-01", "10:15:00"), 30, &existing);
        assert!(hit.is_some());
        assert_eq!(
            hit.unwrap().appointment_time,
            "10:00:00".parse::<NaiveTime>().unwrap()
        );
    }

    #[test]
    fn back_to_back_is_not_a_conflict() {
        // Candidate 10:30-11:00 starts exactly when the existing one ends.
        let existing = vec![appointment("2025-06-01", "10:00:00", 30)];

        assert!(find_conflict(candidate("2025-06-01", "10:30:00"), 30, &existing).is_none());
    }

    #[test]
    fn candidate_ending_at_existing_start_is_not_a_conflict() {
        let existing = vec![appointment("2025-06-01", "10:00:00", 30)];

        assert!(find_conflict(candidate("2025-06-01", "09:30:00"), 30, &existing).is_none());
    }

    #[test]
    fn candidate_ending_one_minute_into_existing_conflicts() {
        let existing = vec![appointment("2025-06-01", "10:00:00", 30)];

        assert!(find_conflict(candidate("2025-06-01", "09:31:00"), 30, &existing).is_some());
    }

    #[test]
    fn candidate_spanning_existing_conflicts() {
        // 09:45-11:00 fully covers a 10:00-10:30 appointment.
        let existing = vec![appointment("2025-06-01", "10:00:00", 30)];

        assert!(find_conflict(candidate("2025-06-01", "09:45:00"), 75, &existing).is_some());
    }

    #[test]
    fn first_conflict_in_input_order_is_reported() {
        let existing = vec![
            appointment("2025-06-01", "10:00:00", 60),
            appointment("2025-06-01", "10:30:00", 30),
        ];

        let hit = find_conflict(candidate("2025-06-01", "10:30:00"), 30, &existing).unwrap();
        assert_eq!(
            hit.appointment_time,
            "10:00:00".parse::<NaiveTime>().unwrap()
        );
    }

    #[test]
    fn empty_calendar_never_conflicts() {
        assert!(find_conflict(candidate("2025-06-01", "10:00:00"), 30, &[]).is_none());
    }

    #[test]
    fn varying_durations_are_respected() {
        // A 15-minute appointment at 10:00 leaves 10:15 free.
        let existing = vec![appointment("2025-06-01", "10:00:00", 15)];

        assert!(find_conflict(candidate("2025-06-01", "10:15:00"), 30, &existing).is_none());
        assert!(find_conflict(candidate("2025-06-01", "10:14:00"), 30, &existing).is_some());
    }
}
