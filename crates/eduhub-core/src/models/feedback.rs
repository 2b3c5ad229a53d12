use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A 1-5 star rating of a material.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rating {
    pub id: i64,
    pub material: i64,
    #[serde(rename = "puntaje")]
    pub score: u8,
    /// Author's email
    #[serde(rename = "usuario", default)]
    pub user: Option<String>,
    #[serde(rename = "fecha", default)]
    pub date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: i64,
    pub material: i64,
    #[serde(rename = "texto")]
    pub text: String,
    #[serde(rename = "usuario_email", default)]
    pub author_email: Option<String>,
    #[serde(rename = "nombre_usuario", default)]
    pub author_name: Option<String>,
    #[serde(rename = "fecha", default)]
    pub date: Option<DateTime<Utc>>,
}

impl Comment {
    /// Only a comment's author may edit or delete it.
    pub fn is_authored_by(&self, email: &str) -> bool {
        self.author_email
            .as_deref()
            .is_some_and(|a| a.eq_ignore_ascii_case(email))
    }
}
