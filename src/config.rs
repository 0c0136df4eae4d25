use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::errors::{LoanError, Result};
use crate::types::InstallmentRounding;

/// engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub installment_rounding: InstallmentRounding,
    /// recorded on payments charged without an explicit method
    pub default_payment_method: Option<String>,
    pub receipt: ReceiptConfig,
}

/// receipt link configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiptConfig {
    pub base_url: String,
    pub signed_url_ttl_hours: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            installment_rounding: InstallmentRounding::Uniform,
            default_payment_method: None,
            receipt: ReceiptConfig::default(),
        }
    }
}

impl Default for ReceiptConfig {
    fn default() -> Self {
        Self {
            base_url: "https://receipts.local".to_string(),
            signed_url_ttl_hours: 24 * 7,
        }
    }
}

impl EngineConfig {
    /// cash desk preset: every unlabelled payment is cash
    pub fn cash_desk() -> Self {
        Self {
            default_payment_method: Some("cash".to_string()),
            ..Self::default()
        }
    }

    /// parse and validate a json document, missing fields take defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(json).map_err(|e| LoanError::InvalidConfiguration {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.receipt.base_url.trim().is_empty() {
            return Err(LoanError::InvalidConfiguration {
                message: "receipt base url must not be empty".to_string(),
            });
        }

        if self.receipt.signed_url_ttl_hours == 0 {
            return Err(LoanError::InvalidConfiguration {
                message: "receipt url lifetime must be at least one hour".to_string(),
            });
        }

        if let Some(method) = &self.default_payment_method {
            if method.trim().is_empty() {
                return Err(LoanError::InvalidConfiguration {
                    message: "default payment method must not be blank".to_string(),
                });
            }
        }

        Ok(())
    }
}

impl ReceiptConfig {
    pub fn signed_url_ttl(&self) -> Duration {
        Duration::hours(self.signed_url_ttl_hours as i64)
    }
}
