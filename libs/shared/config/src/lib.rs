use std::env;

use chrono::FixedOffset;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_jwt_secret: String,
    /// Clinic-local UTC offset, e.g. "+03:00". All appointment dates and
    /// times are interpreted on this clock.
    pub clinic_utc_offset: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            supabase_url: env::var("SUPABASE_URL")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_URL not set, using empty value");
                    String::new()
                }),
            supabase_anon_key: env::var("SUPABASE_ANON_PUBLIC_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_ANON_PUBLIC_KEY not set, using empty value");
                    String::new()
                }),
            supabase_jwt_secret: env::var("SUPABASE_JWT_SECRET")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_JWT_SECRET not set, using empty value");
                    String::new()
                }),
            clinic_utc_offset: env::var("CLINIC_UTC_OFFSET")
                .unwrap_or_else(|_| {
                    warn!("CLINIC_UTC_OFFSET not set, using default +03:00");
                    "+03:00".to_string()
                }),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.supabase_url.is_empty()
            && !self.supabase_anon_key.is_empty()
            && !self.supabase_jwt_secret.is_empty()
    }

    /// Parse the configured clinic offset. Falls back to UTC when the value
    /// is not a valid "+HH:MM"/"-HH:MM" offset.
    pub fn clinic_offset(&self) -> FixedOffset {
        self.clinic_utc_offset
            .parse::<FixedOffset>()
            .unwrap_or_else(|_| {
                warn!(
                    "CLINIC_UTC_OFFSET {:?} is not a valid offset, falling back to UTC",
                    self.clinic_utc_offset
                );
                FixedOffset::east_opt(0).unwrap()
            })
    }
}
