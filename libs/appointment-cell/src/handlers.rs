// libs/appointment-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use axum_extra::TypedHeader;
use chrono::Utc;
use headers::{authorization::Bearer, Authorization};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::User;
use shared_models::error::AppError;

use crate::models::{AvailableSlotsQuery, BookAppointmentRequest, SchedulingError};
use crate::services::lifecycle::AppointmentLifecycleService;
use crate::services::slots::SlotPlannerService;

fn map_scheduling_error(e: SchedulingError) -> AppError {
    match e {
        SchedulingError::Validation(msg) => AppError::BadRequest(msg),
        SchedulingError::Conflict { .. } => AppError::Conflict(e.to_string()),
        SchedulingError::LeadTime => AppError::BadRequest(e.to_string()),
        SchedulingError::NotFound => AppError::NotFound("Appointment not found".to_string()),
        SchedulingError::InvalidState(_) => AppError::Conflict(e.to_string()),
        SchedulingError::Database(msg) => AppError::Database(msg),
    }
}

/// Book an appointment. Patients book for themselves; registrars and admins
/// book on behalf of any patient.
#[axum::debug_handler]
pub async fn book_appointment(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<BookAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();

    let is_own_booking = request.patient_id.to_string() == user.id;
    let is_staff_booking = user.has_role("registrar") || user.has_role("admin");

    if !is_own_booking && !is_staff_booking {
        return Err(AppError::Auth(
            "Not authorized to book appointment for this patient".to_string(),
        ));
    }

    let lifecycle = AppointmentLifecycleService::new(&state);

    let appointment = lifecycle
        .book_appointment(request, token)
        .await
        .map_err(map_scheduling_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "message": "Appointment booked successfully"
    })))
}

/// Cancel an appointment, subject to the cancellation notice window.
#[axum::debug_handler]
pub async fn cancel_appointment(
    State(state): State<Arc<AppConfig>>,
    Path(appointment_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();
    let lifecycle = AppointmentLifecycleService::new(&state);

    let appointment = lifecycle
        .get_appointment(appointment_id, token)
        .await
        .map_err(map_scheduling_error)?;

    let is_own_appointment = appointment.patient_id.to_string() == user.id;
    let is_staff = user.has_role("registrar") || user.has_role("admin");

    if !is_own_appointment && !is_staff {
        return Err(AppError::Auth(
            "Not authorized to cancel this appointment".to_string(),
        ));
    }

    lifecycle
        .cancel_appointment(appointment_id, Utc::now(), token)
        .await
        .map_err(map_scheduling_error)?;

    Ok(Json(json!({
        "success": true,
        "message": "Appointment cancelled"
    })))
}

/// Confirm a scheduled appointment.
#[axum::debug_handler]
pub async fn confirm_appointment(
    State(state): State<Arc<AppConfig>>,
    Path(appointment_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();

    let can_confirm =
        user.has_role("registrar") || user.has_role("doctor") || user.has_role("admin");
    if !can_confirm {
        return Err(AppError::Auth(
            "Not authorized to confirm appointments".to_string(),
        ));
    }

    let lifecycle = AppointmentLifecycleService::new(&state);

    lifecycle
        .confirm_appointment(appointment_id, token)
        .await
        .map_err(map_scheduling_error)?;

    Ok(Json(json!({
        "success": true,
        "message": "Appointment confirmed"
    })))
}

/// Free booking-grid slots for a doctor on a date.
#[axum::debug_handler]
pub async fn available_slots(
    State(state): State<Arc<AppConfig>>,
    Query(query): Query<AvailableSlotsQuery>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();
    let planner = SlotPlannerService::new(&state);

    let slots = planner
        .available_slots(query.doctor_id, &query.date, token)
        .await
        .map_err(map_scheduling_error)?;

    Ok(Json(json!({
        "available_slots": slots
    })))
}

/// Cancel stale unconfirmed appointments in bulk. Admin only; invoked by the
/// background scheduler.
#[axum::debug_handler]
pub async fn run_expiry_sweep(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();

    if !user.has_role("admin") {
        return Err(AppError::Auth(
            "Not authorized to run the expiry sweep".to_string(),
        ));
    }

    let lifecycle = AppointmentLifecycleService::new(&state);

    let expired_count = lifecycle
        .run_expiry_sweep(Utc::now(), token)
        .await
        .map_err(map_scheduling_error)?;

    Ok(Json(json!({
        "success": true,
        "expired_count": expired_count
    })))
}
