use crate::error::{GraphError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Fields of the page-level messenger profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProfileField {
    GetStarted,
    PersistentMenu,
    Greeting,
    WhitelistedDomains,
    AccountLinkingUrl,
    TargetAudience,
}

impl ProfileField {
    pub const ALL: [ProfileField; 6] = [
        ProfileField::GetStarted,
        ProfileField::PersistentMenu,
        ProfileField::Greeting,
        ProfileField::WhitelistedDomains,
        ProfileField::AccountLinkingUrl,
        ProfileField::TargetAudience,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::GetStarted => "get_started",
            Self::PersistentMenu => "persistent_menu",
            Self::Greeting => "greeting",
            Self::WhitelistedDomains => "whitelisted_domains",
            Self::AccountLinkingUrl => "account_linking_url",
            Self::TargetAudience => "target_audience",
        }
    }
}

impl fmt::Display for ProfileField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProfileField {
    type Err = GraphError;

    fn from_str(value: &str) -> Result<Self> {
        let value = value.trim();
        Self::ALL
            .into_iter()
            .find(|field| field.as_str().eq_ignore_ascii_case(value))
            .ok_or_else(|| {
                GraphError::InvalidInput(format!(
                    "unknown messenger profile field {value:?}; expected one of: {}",
                    Self::ALL.map(ProfileField::as_str).join(", ")
                ))
            })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GreetingText {
    pub locale: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProfileSetting {
    GetStarted { payload: String },
    /// Menu entries are passed through as Graph API JSON.
    PersistentMenu(Vec<serde_json::Value>),
    Greeting(Vec<GreetingText>),
    WhitelistedDomains(Vec<String>),
    AccountLinkingUrl(String),
    TargetAudience(serde_json::Value),
}

impl ProfileSetting {
    pub fn field(&self) -> ProfileField {
        match self {
            Self::GetStarted { .. } => ProfileField::GetStarted,
            Self::PersistentMenu(_) => ProfileField::PersistentMenu,
            Self::Greeting(_) => ProfileField::Greeting,
            Self::WhitelistedDomains(_) => ProfileField::WhitelistedDomains,
            Self::AccountLinkingUrl(_) => ProfileField::AccountLinkingUrl,
            Self::TargetAudience(_) => ProfileField::TargetAudience,
        }
    }

    /// Parse the JSON value of a single profile field, as returned by
    /// `GET /me/messenger_profile`.
    pub fn from_json(field: ProfileField, value: serde_json::Value) -> Result<Self> {
        let invalid = |e: serde_json::Error| {
            GraphError::InvalidInput(format!("invalid {field} value: {e}"))
        };
        Ok(match field {
            ProfileField::GetStarted => {
                #[derive(Deserialize)]
                struct GetStarted {
                    payload: String,
                }
                let parsed: GetStarted = serde_json::from_value(value).map_err(invalid)?;
                Self::GetStarted {
                    payload: parsed.payload,
                }
            }
            ProfileField::PersistentMenu => {
                Self::PersistentMenu(serde_json::from_value(value).map_err(invalid)?)
            }
            ProfileField::Greeting => Self::Greeting(serde_json::from_value(value).map_err(invalid)?),
            ProfileField::WhitelistedDomains => {
                Self::WhitelistedDomains(serde_json::from_value(value).map_err(invalid)?)
            }
            ProfileField::AccountLinkingUrl => {
                Self::AccountLinkingUrl(serde_json::from_value(value).map_err(invalid)?)
            }
            ProfileField::TargetAudience => {
                if !value.is_object() {
                    return Err(GraphError::InvalidInput(format!(
                        "invalid {field} value: expected an object"
                    )));
                }
                Self::TargetAudience(value)
            }
        })
    }

    /// Request body of `POST /me/messenger_profile`.
    pub fn to_body(&self) -> serde_json::Value {
        let value = match self {
            Self::GetStarted { payload } => serde_json::json!({ "payload": payload }),
            Self::PersistentMenu(menu) => serde_json::json!(menu),
            Self::Greeting(greeting) => serde_json::json!(greeting),
            Self::WhitelistedDomains(domains) => serde_json::json!(domains),
            Self::AccountLinkingUrl(url) => serde_json::json!(url),
            Self::TargetAudience(audience) => audience.clone(),
        };
        let mut body = serde_json::Map::new();
        body.insert(self.field().as_str().to_string(), value);
        serde_json::Value::Object(body)
    }
}
