//! Service-level tests for the booking and sweep paths that the router tests
//! cannot reach: the insert-time constraint backstop and per-row race
//! tolerance during the expiry sweep.

use assert_matches::assert_matches;
use chrono::{Duration, Utc};
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use appointment_cell::models::{BookAppointmentRequest, SchedulingError};
use appointment_cell::services::lifecycle::AppointmentLifecycleService;
use shared_utils::test_utils::{MockSupabaseResponses, TestConfig};

const AUTH_TOKEN: &str = "service-test-token";

fn booking_request(patient_id: Uuid, doctor_id: Uuid) -> BookAppointmentRequest {
    BookAppointmentRequest {
        patient_id,
        doctor_id,
        appointment_date: "2025-06-01".parse().unwrap(),
        appointment_time: "10:00:00".parse().unwrap(),
        duration_minutes: 30,
        reason: "Consultation".to_string(),
        notes: None,
    }
}

async fn mock_references(mock_server: &MockServer, patient_id: Uuid, doctor_id: Uuid) {
    Mock::given(method("GET"))
        .and(path("/rest/v1/staff"))
        .and(query_param("id", format!("eq.{}", doctor_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::doctor_row(&doctor_id.to_string(), "Dr. Petrova", "Therapy")
        ])))
        .mount(mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/patients"))
        .and(query_param("id", format!("eq.{}", patient_id)))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([{ "id": patient_id }])),
        )
        .mount(mock_server)
        .await;
}

#[tokio::test]
async fn racing_insert_surfaces_as_conflict() {
    let mock_server = MockServer::start().await;
    let config = TestConfig::with_supabase_url(&mock_server.uri()).to_app_config();
    let patient_id = Uuid::new_v4();
    let doctor_id = Uuid::new_v4();

    mock_references(&mock_server, patient_id, doctor_id).await;

    // The conflict check sees an empty calendar...
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("doctor_id", format!("eq.{}", doctor_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    // ...but a concurrent create won the row: the unique constraint fires.
    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "code": "23505",
            "message": "duplicate key value violates unique constraint"
        })))
        .mount(&mock_server)
        .await;

    let lifecycle = AppointmentLifecycleService::new(&config);
    let result = lifecycle
        .book_appointment(booking_request(patient_id, doctor_id), AUTH_TOKEN)
        .await;

    assert_matches!(result, Err(SchedulingError::Conflict { conflicting_time })
        if conflicting_time == "10:00:00".parse().unwrap());
}

#[tokio::test]
async fn unknown_patient_fails_validation_before_insert() {
    let mock_server = MockServer::start().await;
    let config = TestConfig::with_supabase_url(&mock_server.uri()).to_app_config();
    let patient_id = Uuid::new_v4();
    let doctor_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/staff"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::doctor_row(&doctor_id.to_string(), "Dr. Petrova", "Therapy")
        ])))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/patients"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    let lifecycle = AppointmentLifecycleService::new(&config);
    let result = lifecycle
        .book_appointment(booking_request(patient_id, doctor_id), AUTH_TOKEN)
        .await;

    assert_matches!(result, Err(SchedulingError::Validation(_)));
    // No insert may have been attempted
    assert!(mock_server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .all(|request| request.method != wiremock::http::Method::POST));
}

#[tokio::test]
async fn sweep_skips_rows_lost_to_concurrent_transitions() {
    let mock_server = MockServer::start().await;
    let config = TestConfig::with_supabase_url(&mock_server.uri()).to_app_config();

    let swept = Uuid::new_v4();
    let raced = Uuid::new_v4();
    let yesterday = (Utc::now() - Duration::days(1)).date_naive().to_string();

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("status", "eq.scheduled"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::appointment_row(
                &swept.to_string(),
                &Uuid::new_v4().to_string(),
                &Uuid::new_v4().to_string(),
                &yesterday,
                "09:00:00",
                30,
                "scheduled",
            ),
            MockSupabaseResponses::appointment_row(
                &raced.to_string(),
                &Uuid::new_v4().to_string(),
                &Uuid::new_v4().to_string(),
                &yesterday,
                "11:00:00",
                30,
                "scheduled",
            )
        ])))
        .mount(&mock_server)
        .await;

    // First row transitions cleanly
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", swept)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::appointment_row(
                &swept.to_string(),
                &Uuid::new_v4().to_string(),
                &Uuid::new_v4().to_string(),
                &yesterday,
                "09:00:00",
                30,
                "cancelled",
            )
        ])))
        .mount(&mock_server)
        .await;

    // Second row was confirmed concurrently: the conditional update misses
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", raced)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    let lifecycle = AppointmentLifecycleService::new(&config);
    let expired = lifecycle
        .run_expiry_sweep(Utc::now(), AUTH_TOKEN)
        .await
        .unwrap();

    assert_eq!(expired, 1);
}

#[tokio::test]
async fn confirm_of_missing_appointment_is_not_found() {
    let mock_server = MockServer::start().await;
    let config = TestConfig::with_supabase_url(&mock_server.uri()).to_app_config();

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    let lifecycle = AppointmentLifecycleService::new(&config);
    let result = lifecycle
        .confirm_appointment(Uuid::new_v4(), AUTH_TOKEN)
        .await;

    assert_matches!(result, Err(SchedulingError::NotFound));
}
