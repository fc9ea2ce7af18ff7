//! Canonical user profile and its normalization.
//!
//! The backend is loose about types: role flags arrive as `true`, `1`,
//! `"yes"`, `null` or not at all. Everything is coerced here so that
//! downstream role checks only ever see strict booleans.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::SessionError;

/// User record resolved from `GET /v1/auth/profile`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(default, deserialize_with = "lenient_id")]
    pub id: i64,

    #[serde(default, deserialize_with = "nullable_string")]
    pub name: String,

    #[serde(default, deserialize_with = "nullable_string")]
    pub email: String,

    #[serde(default)]
    pub language: Option<String>,

    #[serde(default, deserialize_with = "truthy_flag")]
    pub is_admin: bool,

    #[serde(default, deserialize_with = "truthy_flag")]
    pub is_agent: bool,

    #[serde(default, deserialize_with = "truthy_flag")]
    pub external_user: bool,

    #[serde(default, deserialize_with = "nullable_vec")]
    pub notifications: Vec<Notification>,
}

/// In-app notification attached to a profile. Order is preserved as sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    #[serde(default, deserialize_with = "lenient_id")]
    pub id: i64,

    #[serde(default, deserialize_with = "nullable_string")]
    pub text: String,

    #[serde(default, deserialize_with = "truthy_flag")]
    pub read: bool,

    #[serde(default, deserialize_with = "nullable_string")]
    pub created_at: String,
}

impl UserProfile {
    /// Normalize a raw `user` object from any auth endpoint.
    pub fn normalize(raw: &Value) -> Result<Self, SessionError> {
        if !raw.is_object() {
            return Err(SessionError::Malformed(format!(
                "expected user object, got {}",
                json_kind(raw)
            )));
        }
        Ok(Self::deserialize(raw)?)
    }

    /// Unread notifications, in backend order.
    pub fn unread_notifications(&self) -> impl Iterator<Item = &Notification> {
        self.notifications.iter().filter(|n| !n.read)
    }
}

/// JavaScript-style truthiness of a JSON value.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn truthy_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().map(truthy).unwrap_or(false))
}

fn nullable_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => s,
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    })
}

fn nullable_vec<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

fn lenient_id<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(0),
        Some(Value::Number(n)) => n
            .as_i64()
            .ok_or_else(|| D::Error::custom(format!("id out of range: {}", n))),
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map_err(|_| D::Error::custom(format!("non-numeric id: {}", s))),
        Some(other) => Err(D::Error::custom(format!("invalid id type: {}", json_kind(&other)))),
    }
}
