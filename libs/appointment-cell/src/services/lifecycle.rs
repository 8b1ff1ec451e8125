// libs/appointment-cell/src/services/lifecycle.rs
use std::sync::Arc;

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Method;
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::{SupabaseClient, SupabaseError};

use crate::models::{
    Appointment, AppointmentStatus, BookAppointmentRequest, SchedulingError,
    MIN_CANCELLATION_NOTICE_HOURS,
};
use crate::services::conflict::ConflictDetectionService;
use crate::services::directory::StaffDirectoryService;

/// Whether an appointment starting at `date`+`time` on the clinic clock may
/// still be cancelled at `now`. Exactly the minimum notice is permitted;
/// anything less is rejected.
pub fn cancellation_allowed(
    date: NaiveDate,
    time: NaiveTime,
    clinic_offset: FixedOffset,
    now: DateTime<Utc>,
) -> bool {
    let starts_at = match date.and_time(time).and_local_timezone(clinic_offset).single() {
        Some(dt) => dt,
        // A fixed offset is never ambiguous; guard kept for the type.
        None => return false,
    };

    starts_at.with_timezone(&Utc) - now >= Duration::hours(MIN_CANCELLATION_NOTICE_HOURS)
}

/// Appointments dated strictly before this day are stale: still unconfirmed
/// less than 24 hours ahead of their date.
pub fn expiry_cutoff_date(now: DateTime<Utc>, clinic_offset: FixedOffset) -> NaiveDate {
    (now + Duration::hours(24))
        .with_timezone(&clinic_offset)
        .date_naive()
}

pub struct AppointmentLifecycleService {
    supabase: Arc<SupabaseClient>,
    conflicts: ConflictDetectionService,
    directory: StaffDirectoryService,
    clinic_offset: FixedOffset,
}

impl AppointmentLifecycleService {
    pub fn new(config: &AppConfig) -> Self {
        let supabase = Arc::new(SupabaseClient::new(config));

        Self {
            conflicts: ConflictDetectionService::new(Arc::clone(&supabase)),
            directory: StaffDirectoryService::new(Arc::clone(&supabase)),
            clinic_offset: config.clinic_offset(),
            supabase,
        }
    }

    /// Book a new appointment in the scheduled state. The slot must clear
    /// conflict detection; the unique constraint on (doctor, date, time)
    /// backstops the racing insert and surfaces here as a conflict too.
    pub async fn book_appointment(
        &self,
        request: BookAppointmentRequest,
        auth_token: &str,
    ) -> Result<Appointment, SchedulingError> {
        info!(
            "Booking appointment for patient {} with doctor {} on {} at {}",
            request.patient_id, request.doctor_id, request.appointment_date, request.appointment_time
        );

        if request.duration_minutes <= 0 {
            return Err(SchedulingError::Validation(
                "Appointment duration must be a positive number of minutes".to_string(),
            ));
        }

        let doctor = self
            .directory
            .resolve_doctor(request.doctor_id, auth_token)
            .await?;
        self.directory
            .ensure_patient_exists(request.patient_id, auth_token)
            .await?;

        self.conflicts
            .ensure_slot_free(
                doctor.id,
                request.appointment_date,
                request.appointment_time,
                request.duration_minutes,
                auth_token,
            )
            .await?;

        let body = json!({
            "patient_id": request.patient_id,
            "doctor_id": request.doctor_id,
            "appointment_date": request.appointment_date.to_string(),
            "appointment_time": request.appointment_time.format("%H:%M:%S").to_string(),
            "duration_minutes": request.duration_minutes,
            "status": AppointmentStatus::Scheduled.to_string(),
            "reason": request.reason,
            "notes": request.notes,
            "created_at": Utc::now().to_rfc3339(),
            "updated_at": Utc::now().to_rfc3339(),
        });

        let result: Vec<Appointment> = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/appointments",
                Some(auth_token),
                Some(body),
                Some(return_representation()),
            )
            .await
            .map_err(|e| match e {
                // Two concurrent creates both passed the conflict check; the
                // row constraint decided the winner.
                SupabaseError::Conflict(_) => SchedulingError::Conflict {
                    conflicting_time: request.appointment_time,
                },
                other => SchedulingError::Database(other.to_string()),
            })?;

        let appointment = result
            .into_iter()
            .next()
            .ok_or_else(|| SchedulingError::Database("Insert returned no row".to_string()))?;

        info!("Appointment {} booked", appointment.id);
        Ok(appointment)
    }

    pub async fn get_appointment(
        &self,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Appointment, SchedulingError> {
        let path = format!("/rest/v1/appointments?id=eq.{}&limit=1", appointment_id);

        let result: Vec<Appointment> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| SchedulingError::Database(e.to_string()))?;

        result.into_iter().next().ok_or(SchedulingError::NotFound)
    }

    /// Confirm a scheduled appointment. The update is conditional on the
    /// current status, so a concurrent transition loses cleanly instead of
    /// being overwritten.
    pub async fn confirm_appointment(
        &self,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Appointment, SchedulingError> {
        debug!("Confirming appointment {}", appointment_id);

        let updated = self
            .conditional_transition(
                appointment_id,
                "status=eq.scheduled",
                AppointmentStatus::Confirmed,
                auth_token,
            )
            .await?;

        match updated {
            Some(appointment) => {
                info!("Appointment {} confirmed", appointment_id);
                Ok(appointment)
            }
            None => {
                let current = self.get_appointment(appointment_id, auth_token).await?;
                Err(SchedulingError::InvalidState(current.status))
            }
        }
    }

    /// Cancel a scheduled or confirmed appointment, enforcing the
    /// cancellation notice on the clinic-local clock. `now` is supplied by
    /// the caller.
    pub async fn cancel_appointment(
        &self,
        appointment_id: Uuid,
        now: DateTime<Utc>,
        auth_token: &str,
    ) -> Result<Appointment, SchedulingError> {
        debug!("Cancelling appointment {}", appointment_id);

        let appointment = self.get_appointment(appointment_id, auth_token).await?;

        if !appointment.status.is_active() {
            return Err(SchedulingError::InvalidState(appointment.status));
        }

        if !cancellation_allowed(
            appointment.appointment_date,
            appointment.appointment_time,
            self.clinic_offset,
            now,
        ) {
            warn!(
                "Cancellation of appointment {} rejected: starts {} {} with less than {}h notice",
                appointment_id,
                appointment.appointment_date,
                appointment.appointment_time,
                MIN_CANCELLATION_NOTICE_HOURS
            );
            return Err(SchedulingError::LeadTime);
        }

        let updated = self
            .conditional_transition(
                appointment_id,
                "status=in.(scheduled,confirmed)",
                AppointmentStatus::Cancelled,
                auth_token,
            )
            .await?;

        match updated {
            Some(appointment) => {
                info!("Appointment {} cancelled", appointment_id);
                Ok(appointment)
            }
            None => {
                let current = self.get_appointment(appointment_id, auth_token).await?;
                Err(SchedulingError::InvalidState(current.status))
            }
        }
    }

    /// Cancel every appointment still scheduled less than 24 hours ahead of
    /// its date. Idempotent: cancelled rows leave the filter, so a second
    /// run with the same `now` transitions nothing. A row lost to a
    /// concurrent transition is logged and skipped, never aborting the
    /// sweep.
    pub async fn run_expiry_sweep(
        &self,
        now: DateTime<Utc>,
        auth_token: &str,
    ) -> Result<u32, SchedulingError> {
        let cutoff = expiry_cutoff_date(now, self.clinic_offset);
        debug!("Running expiry sweep for appointments dated before {}", cutoff);

        let path = format!(
            "/rest/v1/appointments?status=eq.scheduled&appointment_date=lt.{}&order=appointment_date.asc",
            cutoff
        );

        let stale: Vec<Appointment> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| SchedulingError::Database(e.to_string()))?;

        let mut expired = 0u32;
        for appointment in stale {
            match self
                .conditional_transition(
                    appointment.id,
                    "status=eq.scheduled",
                    AppointmentStatus::Cancelled,
                    auth_token,
                )
                .await
            {
                Ok(Some(_)) => expired += 1,
                Ok(None) => {
                    // Lost the race to a concurrent confirm or cancel.
                    warn!(
                        "Expiry sweep skipped appointment {}: no longer scheduled",
                        appointment.id
                    );
                }
                Err(e) => {
                    warn!(
                        "Expiry sweep failed to cancel appointment {}: {}",
                        appointment.id, e
                    );
                }
            }
        }

        info!("Expiry sweep cancelled {} stale appointments", expired);
        Ok(expired)
    }

    /// Compare-and-set status update: PATCH filtered on the expected current
    /// status. `None` means no row matched (absent or already transitioned).
    async fn conditional_transition(
        &self,
        appointment_id: Uuid,
        status_filter: &str,
        new_status: AppointmentStatus,
        auth_token: &str,
    ) -> Result<Option<Appointment>, SchedulingError> {
        let path = format!(
            "/rest/v1/appointments?id=eq.{}&{}",
            appointment_id, status_filter
        );

        let body = json!({
            "status": new_status.to_string(),
            "updated_at": Utc::now().to_rfc3339(),
        });

        let result: Vec<Appointment> = self
            .supabase
            .request_with_headers(
                Method::PATCH,
                &path,
                Some(auth_token),
                Some(body),
                Some(return_representation()),
            )
            .await
            .map_err(|e| SchedulingError::Database(e.to_string()))?;

        Ok(result.into_iter().next())
    }
}

fn return_representation() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("Prefer", HeaderValue::from_static("return=representation"));
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offset(hours: i32) -> FixedOffset {
        FixedOffset::east_opt(hours * 3600).unwrap()
    }

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn time(s: &str) -> NaiveTime {
        s.parse().unwrap()
    }

    fn utc(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn cancellation_at_exactly_two_hours_is_allowed() {
        // 14:00 clinic time at +03:00 is 11:00 UTC; now is 09:00 UTC.
        let now = utc("2025-06-01T09:00:00Z");

        assert!(cancellation_allowed(
            date("2025-06-01"),
            time("14:00:00"),
            offset(3),
            now
        ));
    }

    #[test]
    fn cancellation_just_inside_two_hours_is_rejected() {
        // 1.999..h of notice: one second short.
        let now = utc("2025-06-01T09:00:01Z");

        assert!(!cancellation_allowed(
            date("2025-06-01"),
            time("14:00:00"),
            offset(3),
            now
        ));
    }

    #[test]
    fn cancellation_well_in_advance_is_allowed() {
        let now = utc("2025-06-01T08:00:00Z");

        assert!(cancellation_allowed(
            date("2025-06-02"),
            time("09:00:00"),
            offset(3),
            now
        ));
    }

    #[test]
    fn cancellation_after_start_is_rejected() {
        let now = utc("2025-06-01T12:00:00Z");

        assert!(!cancellation_allowed(
            date("2025-06-01"),
            time("14:00:00"),
            offset(3),
            now
        ));
    }

    #[test]
    fn clinic_offset_shifts_the_notice_window() {
        // Same wall-clock appointment, different clinic offsets: at +00:00
        // the 14:00 start is 5h away; at +03:00 it is only 2h away.
        let now = utc("2025-06-01T09:00:00Z");

        assert!(cancellation_allowed(
            date("2025-06-01"),
            time("14:00:00"),
            offset(0),
            now
        ));
        assert!(cancellation_allowed(
            date("2025-06-01"),
            time("14:00:00"),
            offset(3),
            now
        ));
        assert!(!cancellation_allowed(
            date("2025-06-01"),
            time("14:00:00"),
            offset(4),
            now
        ));
    }

    #[test]
    fn expiry_cutoff_is_the_clinic_local_date_a_day_ahead() {
        // 23:30 UTC on June 1 at +03:00 is 02:30 on June 2; +24h lands on
        // June 3 clinic time.
        let now = utc("2025-06-01T23:30:00Z");

        assert_eq!(expiry_cutoff_date(now, offset(3)), date("2025-06-03"));
        assert_eq!(expiry_cutoff_date(now, offset(0)), date("2025-06-02"));
    }

    #[test]
    fn yesterdays_date_falls_under_the_cutoff() {
        let now = utc("2025-06-02T10:00:00Z");
        let cutoff = expiry_cutoff_date(now, offset(3));

        assert!(date("2025-06-01") < cutoff);
        assert!(date("2025-06-03") >= cutoff);
    }
}
