// libs/appointment-cell/src/services/slots.rs
use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime};
use tracing::debug;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::models::SchedulingError;
use crate::services::conflict::ConflictDetectionService;
use crate::services::directory::StaffDirectoryService;

/// First bookable hour of the clinic day.
pub const OPENING_HOUR: u32 = 9;
/// End of the booking window; the last grid start is 16:30.
pub const CLOSING_HOUR: u32 = 17;
/// Grid positions within each hour.
pub const SLOT_MINUTES: [u32; 2] = [0, 30];

/// The fixed 30-minute booking grid: 16 candidate starts per day, ascending.
pub fn slot_grid() -> Vec<NaiveTime> {
    (OPENING_HOUR..CLOSING_HOUR)
        .flat_map(|hour| {
            SLOT_MINUTES
                .iter()
                .map(move |minute| NaiveTime::from_hms_opt(hour, *minute, 0).unwrap())
        })
        .collect()
}

/// Grid slots whose start time is not taken by a booked appointment. The
/// check is exact start-time equality: an appointment longer than the grid
/// step blocks only the slot it starts on. This is the observed booking
/// contract; conflict detection at create time remains the authoritative
/// overlap guard.
pub fn free_slots(booked: &[NaiveTime]) -> Vec<NaiveTime> {
    slot_grid()
        .into_iter()
        .filter(|slot| !booked.contains(slot))
        .collect()
}

pub struct SlotPlannerService {
    conflicts: ConflictDetectionService,
    directory: StaffDirectoryService,
}

impl SlotPlannerService {
    pub fn new(config: &AppConfig) -> Self {
        let supabase = Arc::new(SupabaseClient::new(config));
        Self {
            conflicts: ConflictDetectionService::new(Arc::clone(&supabase)),
            directory: StaffDirectoryService::new(supabase),
        }
    }

    /// Free grid slots for a doctor on a date, recomputed per call.
    pub async fn available_slots(
        &self,
        doctor_id: Uuid,
        date: &str,
        auth_token: &str,
    ) -> Result<Vec<NaiveTime>, SchedulingError> {
        let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").map_err(|_| {
            SchedulingError::Validation("Invalid date format (expected YYYY-MM-DD)".to_string())
        })?;

        self.directory.resolve_doctor(doctor_id, auth_token).await?;

        let booked: Vec<NaiveTime> = self
            .conflicts
            .active_appointments_for_day(doctor_id, date, auth_token)
            .await?
            .into_iter()
            .map(|appointment| appointment.appointment_time)
            .collect();

        let slots = free_slots(&booked);
        debug!(
            "Doctor {} has {} free slots on {} ({} booked)",
            doctor_id,
            slots.len(),
            date,
            booked.len()
        );

        Ok(slots)
    }
}
