use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Recruitment stage of an application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Wishlist,
    ApplicationSent,
    InProcess,
    OfferReceived,
}

impl Stage {
    pub const ALL: [Stage; 4] = [
        Stage::Wishlist,
        Stage::ApplicationSent,
        Stage::InProcess,
        Stage::OfferReceived,
    ];

    /// Name stored in the `stage` column.
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Wishlist => "wishlist",
            Stage::ApplicationSent => "application_sent",
            Stage::InProcess => "in_process",
            Stage::OfferReceived => "offer_received",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Stage::Wishlist => "Wishlist",
            Stage::ApplicationSent => "Application sent",
            Stage::InProcess => "In process",
            Stage::OfferReceived => "Offer received",
        }
    }

    /// Position in the recruitment funnel, wishlist first.
    pub fn rank(self) -> u8 {
        match self {
            Stage::Wishlist => 0,
            Stage::ApplicationSent => 1,
            Stage::InProcess => 2,
            Stage::OfferReceived => 3,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown stage '{0}' (expected wishlist, sent, process or offer)")]
pub struct UnknownStage(pub String);

impl FromStr for Stage {
    type Err = UnknownStage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_lowercase();
        if let Some(stage) = Stage::ALL.into_iter().find(|stage| stage.as_str() == name) {
            return Ok(stage);
        }
        match name.as_str() {
            "sent" => Ok(Stage::ApplicationSent),
            "process" => Ok(Stage::InProcess),
            "offer" => Ok(Stage::OfferReceived),
            _ => Err(UnknownStage(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Application {
    pub id: i64,
    pub title: String,
    pub company_url: String,
    pub company_name: Option<String>,
    pub stage: Stage,
    pub progress_notes: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Contents of the add-application form, already trimmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewApplication {
    pub title: String,
    pub company_url: String,
    pub company_name: Option<String>,
}

impl NewApplication {
    pub fn new(title: &str, company_url: &str, company_name: &str) -> Self {
        let company_name = company_name.trim();
        Self {
            title: title.trim().to_string(),
            company_url: company_url.trim().to_string(),
            company_name: (!company_name.is_empty()).then(|| company_name.to_string()),
        }
    }
}
