use std::sync::Arc;

use base64::{engine::general_purpose, Engine as _};
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::User;

pub struct TestConfig {
    pub jwt_secret: String,
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub clinic_utc_offset: String,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "test-secret-key-for-jwt-validation-must-be-long-enough".to_string(),
            supabase_url: "http://localhost:54321".to_string(),
            supabase_anon_key: "test-anon-key".to_string(),
            clinic_utc_offset: "+03:00".to_string(),
        }
    }
}

impl TestConfig {
    pub fn with_supabase_url(url: &str) -> Self {
        Self {
            supabase_url: url.to_string(),
            ..Self::default()
        }
    }

    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            supabase_url: self.supabase_url.clone(),
            supabase_anon_key: self.supabase_anon_key.clone(),
            supabase_jwt_secret: self.jwt_secret.clone(),
            clinic_utc_offset: self.clinic_utc_offset.clone(),
        }
    }

    pub fn to_arc(&self) -> Arc<AppConfig> {
        Arc::new(self.to_app_config())
    }
}

pub struct TestUser {
    pub id: String,
    pub email: String,
    pub role: String,
}

impl Default for TestUser {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            email: "test@example.com".to_string(),
            role: "patient".to_string(),
        }
    }
}

impl TestUser {
    pub fn new(email: &str, role: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            email: email.to_string(),
            role: role.to_string(),
        }
    }

    pub fn patient(email: &str) -> Self {
        Self::new(email, "patient")
    }

    pub fn doctor(email: &str) -> Self {
        Self::new(email, "doctor")
    }

    pub fn registrar(email: &str) -> Self {
        Self::new(email, "registrar")
    }

    pub fn admin(email: &str) -> Self {
        Self::new(email, "admin")
    }

    pub fn to_user(&self) -> User {
        User {
            id: self.id.clone(),
            email: Some(self.email.clone()),
            role: Some(self.role.clone()),
            metadata: None,
            created_at: Some(Utc::now()),
        }
    }
}

pub struct JwtTestUtils;

impl JwtTestUtils {
    pub fn create_test_token(user: &TestUser, secret: &str, exp_hours: Option<i64>) -> String {
        let now = Utc::now();
        let exp = now + Duration::hours(exp_hours.unwrap_or(24));

        let header = json!({
            "alg": "HS256",
            "typ": "JWT"
        });

        let payload = json!({
            "sub": user.id,
            "email": user.email,
            "role": user.role,
            "iat": now.timestamp(),
            "exp": exp.timestamp()
        });

        let header_encoded = general_purpose::URL_SAFE_NO_PAD.encode(header.to_string());
        let payload_encoded = general_purpose::URL_SAFE_NO_PAD.encode(payload.to_string());

        let signing_input = format!("{}.{}", header_encoded, payload_encoded);

        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(signing_input.as_bytes());
        let signature = mac.finalize().into_bytes();
        let signature_encoded = general_purpose::URL_SAFE_NO_PAD.encode(signature);

        format!("{}.{}", signing_input, signature_encoded)
    }

    pub fn create_expired_token(user: &TestUser, secret: &str) -> String {
        Self::create_test_token(user, secret, Some(-1))
    }

    pub fn create_malformed_token() -> String {
        "invalid.token.format".to_string()
    }
}

/// Canned PostgREST rows matching the clinic schema.
pub struct MockSupabaseResponses;

impl MockSupabaseResponses {
    pub fn doctor_row(doctor_id: &str, full_name: &str, specialty: &str) -> serde_json::Value {
        json!({
            "id": doctor_id,
            "full_name": full_name,
            "position": "doctor",
            "specialty": specialty,
            "is_available": true
        })
    }

    pub fn patient_row(patient_id: &str, full_name: &str) -> serde_json::Value {
        json!({
            "id": patient_id,
            "full_name": full_name,
            "insurance_number": "1234567890123456"
        })
    }

    pub fn appointment_row(
        appointment_id: &str,
        patient_id: &str,
        doctor_id: &str,
        date: &str,
        time: &str,
        duration_minutes: i32,
        status: &str,
    ) -> serde_json::Value {
        json!({
            "id": appointment_id,
            "patient_id": patient_id,
            "doctor_id": doctor_id,
            "appointment_date": date,
            "appointment_time": time,
            "duration_minutes": duration_minutes,
            "status": status,
            "reason": "Consultation",
            "notes": null,
            "created_at": "2025-01-01T00:00:00Z",
            "updated_at": "2025-01-01T00:00:00Z"
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jwt::validate_token;

    #[test]
    fn test_config_round_trip() {
        let config = TestConfig::default();
        let app_config = config.to_app_config();

        assert_eq!(app_config.supabase_url, "http://localhost:54321");
        assert_eq!(app_config.clinic_offset().local_minus_utc(), 3 * 3600);
        assert!(app_config.is_configured());
    }

    #[test]
    fn test_minted_token_validates() {
        let user = TestUser::registrar("reg@example.com");
        let config = TestConfig::default();
        let token = JwtTestUtils::create_test_token(&user, &config.jwt_secret, Some(1));

        let validated = validate_token(&token, &config.jwt_secret).unwrap();
        assert_eq!(validated.id, user.id);
        assert_eq!(validated.role.as_deref(), Some("registrar"));
    }

    #[test]
    fn test_expired_token_rejected() {
        let user = TestUser::default();
        let config = TestConfig::default();
        let token = JwtTestUtils::create_expired_token(&user, &config.jwt_secret);

        assert!(validate_token(&token, &config.jwt_secret).is_err());
    }
}
