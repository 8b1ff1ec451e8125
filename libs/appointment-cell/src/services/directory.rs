// libs/appointment-cell/src/services/directory.rs
use std::sync::Arc;

use reqwest::Method;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use shared_database::supabase::SupabaseClient;

use crate::models::{Doctor, SchedulingError};

/// Read-only resolution of staff and patient references. The scheduling core
/// consumes these as opaque identities; all other fields stay with their
/// owning services.
pub struct StaffDirectoryService {
    supabase: Arc<SupabaseClient>,
}

impl StaffDirectoryService {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    /// Resolve a staff identity restricted to the doctor position.
    pub async fn resolve_doctor(
        &self,
        doctor_id: Uuid,
        auth_token: &str,
    ) -> Result<Doctor, SchedulingError> {
        debug!("Resolving doctor {}", doctor_id);

        let path = format!(
            "/rest/v1/staff?id=eq.{}&position=eq.doctor&limit=1",
            doctor_id
        );

        let result: Vec<Doctor> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| SchedulingError::Database(e.to_string()))?;

        result.into_iter().next().ok_or_else(|| {
            SchedulingError::Validation(format!("Unknown doctor id: {}", doctor_id))
        })
    }

    pub async fn ensure_patient_exists(
        &self,
        patient_id: Uuid,
        auth_token: &str,
    ) -> Result<(), SchedulingError> {
        debug!("Verifying patient {}", patient_id);

        let path = format!("/rest/v1/patients?id=eq.{}&select=id&limit=1", patient_id);

        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| SchedulingError::Database(e.to_string()))?;

        if result.is_empty() {
            return Err(SchedulingError::Validation(format!(
                "Unknown patient id: {}",
                patient_id
            )));
        }

        Ok(())
    }
}
