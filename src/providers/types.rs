//! Provider-neutral types: the canonical callback event and the request and
//! response shapes of the initiation operations.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::str::FromStr;

use crate::providers::error::ProviderError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    MpesaDaraja,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::MpesaDaraja => "mpesa_daraja",
        }
    }

    /// The `method` tag stamped onto payment rows created from this provider.
    pub fn method_tag(&self) -> &'static str {
        match self {
            ProviderKind::MpesaDaraja => "mpesa",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ProviderError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "mpesa_daraja" | "mpesa" | "m-pesa" => Ok(ProviderKind::MpesaDaraja),
            _ => Err(ProviderError::Validation {
                message: format!("unsupported provider: {}", value),
                field: Some("provider".to_string()),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Stk,
    C2b,
    B2c,
    Balance,
    Status,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Stk => "stk",
            EventKind::C2b => "c2b",
            EventKind::B2c => "b2c",
            EventKind::Balance => "balance",
            EventKind::Status => "status",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "stk" => Some(EventKind::Stk),
            "c2b" => Some(EventKind::C2b),
            "b2c" => Some(EventKind::B2c),
            "balance" => Some(EventKind::Balance),
            "status" => Some(EventKind::Status),
            _ => None,
        }
    }
}

/// Canonical event produced by `parse_callback`. Strongly typed fields; the
/// dynamic provider payload survives verbatim in `raw` for the worker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallbackEvent {
    pub kind: EventKind,
    pub external_id: String,
    pub amount: i64,
    pub msisdn: String,
    pub invoice_ref: String,
    pub transaction_id: String,
    /// Business status derived from the callback: "completed" or "failed".
    pub status: String,
    pub response_description: String,
    pub raw: JsonValue,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    StkPush,
    C2b,
    B2c,
    Balance,
    Status,
}

/// Credential field metadata surfaced by adapters for provisioning tooling.
#[derive(Debug, Clone, Serialize)]
pub struct CredentialField {
    pub name: &'static str,
    pub display_name: &'static str,
    pub required: bool,
    pub secret: bool,
}

#[derive(Debug, Clone)]
pub struct StkPushRequest {
    pub amount: i64,
    pub msisdn: String,
    pub account_ref: String,
    pub description: String,
    pub callback_url: String,
}

#[derive(Debug, Clone)]
pub struct StkPushResponse {
    pub external_id: String,
    pub message: String,
    pub provider_reference: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum B2cCommand {
    SalaryPayment,
    BusinessPayment,
    PromotionPayment,
}

impl B2cCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            B2cCommand::SalaryPayment => "SalaryPayment",
            B2cCommand::BusinessPayment => "BusinessPayment",
            B2cCommand::PromotionPayment => "PromotionPayment",
        }
    }
}

impl FromStr for B2cCommand {
    type Err = ProviderError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "SalaryPayment" => Ok(B2cCommand::SalaryPayment),
            "BusinessPayment" => Ok(B2cCommand::BusinessPayment),
            "PromotionPayment" => Ok(B2cCommand::PromotionPayment),
            _ => Err(ProviderError::Validation {
                message: format!(
                    "command must be one of SalaryPayment, BusinessPayment, PromotionPayment; got {}",
                    value
                ),
                field: Some("command".to_string()),
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct B2cRequest {
    pub amount: i64,
    pub msisdn: String,
    pub command: B2cCommand,
    pub result_url: String,
    pub timeout_url: String,
    pub description: String,
    pub occasion: Option<String>,
}

#[derive(Debug, Clone)]
pub struct B2cResponse {
    pub external_id: String,
    pub message: String,
    pub provider_reference: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_kind_parses_aliases() {
        assert_eq!(
            "mpesa_daraja".parse::<ProviderKind>().unwrap(),
            ProviderKind::MpesaDaraja
        );
        assert_eq!(
            "M-Pesa".parse::<ProviderKind>().unwrap(),
            ProviderKind::MpesaDaraja
        );
        assert!("airtel_money".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn b2c_command_rejects_unknown_values() {
        assert!("SalaryPayment".parse::<B2cCommand>().is_ok());
        assert!("PocketMoney".parse::<B2cCommand>().is_err());
    }

    #[test]
    fn callback_event_round_trips_through_json() {
        let event = CallbackEvent {
            kind: EventKind::Stk,
            external_id: "ws_CO_X1".to_string(),
            amount: 100,
            msisdn: "254712345678".to_string(),
            invoice_ref: "INV-7".to_string(),
            transaction_id: "RAA1234".to_string(),
            status: "completed".to_string(),
            response_description: "Success".to_string(),
            raw: serde_json::json!({"Body": {}}),
        };
        let json = serde_json::to_string(&event).expect("serialize");
        let parsed: CallbackEvent = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed, event);
    }
}
