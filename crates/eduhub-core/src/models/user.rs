use std::collections::BTreeMap;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::MaterialType;

/// Minimum password length accepted by the registration endpoint
const MIN_PASSWORD_LENGTH: usize = 6;

/// Field name → messages, as returned by the API on validation failure.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

/// The signed-in user.
///
/// The login response carries the basic fields only; the profile endpoint
/// adds `statistics` and `recent_activity`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: i64,
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub date_joined: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statistics: Option<ProfileStatistics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recent_activity: Option<RecentActivity>,
}

impl UserProfile {
    pub fn display_name(&self) -> String {
        match (self.first_name.trim(), self.last_name.trim()) {
            ("", _) => self.email.clone(),
            (first, "") => first.to_string(),
            (first, last) => format!("{} {}", first, last),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileStatistics {
    #[serde(rename = "materialsUploaded", default)]
    pub materials_uploaded: u32,
    #[serde(default)]
    pub favorites: u32,
    #[serde(default)]
    pub comments: u32,
    #[serde(default)]
    pub ratings: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecentActivity {
    #[serde(default)]
    pub materials: Vec<RecentMaterial>,
    #[serde(default)]
    pub comments: Vec<RecentComment>,
    #[serde(default)]
    pub ratings: Vec<RecentRating>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentMaterial {
    pub id: i64,
    #[serde(rename = "titulo")]
    pub title: String,
    #[serde(rename = "fecha_creacion", default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(rename = "tipo")]
    pub kind: MaterialType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentComment {
    pub id: i64,
    #[serde(rename = "texto")]
    pub text: String,
    #[serde(rename = "fecha", default)]
    pub date: Option<DateTime<Utc>>,
    #[serde(rename = "material_titulo")]
    pub material_title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentRating {
    pub id: i64,
    #[serde(rename = "puntaje")]
    pub score: u8,
    #[serde(rename = "fecha", default)]
    pub date: Option<DateTime<Utc>>,
    #[serde(rename = "material_titulo")]
    pub material_title: String,
}

/// Body of `POST /login/`. A successful login carries `access`; a rejected
/// one carries `error` (or `detail`) instead.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoginResponse {
    pub access: Option<String>,
    pub refresh: Option<String>,
    pub user: Option<UserProfile>,
    pub error: Option<String>,
    pub detail: Option<String>,
}

impl LoginResponse {
    pub fn failure_message(&self) -> String {
        self.error
            .clone()
            .or_else(|| self.detail.clone())
            .unwrap_or_else(|| "Login failed".to_string())
    }
}

/// Registration form as typed by the user, before client-side validation.
#[derive(Debug, Clone, Default)]
pub struct RegisterForm {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
    pub recaptcha_token: String,
}

fn email_regex() -> &'static Regex {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    EMAIL.get_or_init(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email regex"))
}

impl RegisterForm {
    /// Check the form the way the registration page does before submitting.
    /// Returns the request body, or every field error found.
    pub fn validate(&self) -> Result<RegisterRequest, FieldErrors> {
        let mut errors = FieldErrors::new();
        let mut push = |field: &str, message: &str| {
            errors.entry(field.to_string()).or_default().push(message.to_string());
        };

        if self.first_name.trim().is_empty() {
            push("first_name", "This field is required.");
        }
        if self.last_name.trim().is_empty() {
            push("last_name", "This field is required.");
        }
        let email = self.email.trim();
        if email.is_empty() {
            push("email", "This field is required.");
        } else if !email_regex().is_match(email) {
            push("email", "Enter a valid email address.");
        }
        if self.password.is_empty() {
            push("password", "This field is required.");
        } else if self.password.chars().count() < MIN_PASSWORD_LENGTH {
            push("password", "Password must be at least 6 characters.");
        }
        if self.confirm_password.is_empty() {
            push("confirm_password", "This field is required.");
        } else if self.password != self.confirm_password {
            push("confirm_password", "Passwords do not match.");
        }
        if self.recaptcha_token.trim().is_empty() {
            push("recaptcha_token", "Complete the captcha.");
        }

        if !errors.is_empty() {
            return Err(errors);
        }

        Ok(RegisterRequest {
            email: email.to_string(),
            first_name: self.first_name.trim().to_string(),
            last_name: self.last_name.trim().to_string(),
            password: self.password.clone(),
            recaptcha_token: self.recaptcha_token.trim().to_string(),
        })
    }
}

/// Body of `POST /register/`.
#[derive(Debug, Clone, Serialize)]
pub struct RegisterRequest {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub password: String,
    pub recaptcha_token: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RegisteredUser {
    pub id: i64,
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
}

/// Raw result of a registration attempt. Registration never signs the user
/// in; a created account still has to be verified by email.
#[derive(Debug, Clone, PartialEq)]
pub enum RegisterOutcome {
    Created(RegisteredUser),
    Rejected(FieldErrors),
}

impl RegisterOutcome {
    /// One-line summary of a rejection, preferring the fields users can act on.
    pub fn rejection_summary(&self) -> Option<String> {
        let RegisterOutcome::Rejected(errors) = self else {
            return None;
        };
        for field in ["email", "recaptcha_token", "password"] {
            if let Some(messages) = errors.get(field).filter(|m| !m.is_empty()) {
                return Some(format!("{}: {}", field, messages.join(" ")));
            }
        }
        if let Some(messages) = errors.get("non_field_errors") {
            return Some(messages.join(" "));
        }
        Some(
            errors
                .iter()
                .next()
                .map(|(field, messages)| format!("{}: {}", field, messages.join(" ")))
                .unwrap_or_else(|| "Registration failed".to_string()),
        )
    }
}
