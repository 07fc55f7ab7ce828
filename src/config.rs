//! Process configuration.
//!
//! The payment processor is a strategy chosen once at startup from the
//! environment. Absent or unknown configuration for the selected processor
//! is a fatal startup error; the process refuses to start rather than run
//! partially configured.
//!
//! Environment surface:
//! - `PAYMENT_PROCESSOR_KIND`: one of `strike`, `lnbits`, `opennode`
//! - `STRIKE_API_KEY`: required for `strike`
//! - `LNBITS_URL`, `LNBITS_API_KEY`: required for `lnbits`
//! - `OPENNODE_API_KEY`: required for `opennode`

use crate::errors::{Result, SatgateError};
use crate::processors::{lnbits::LnBits, opennode::OpenNode, strike::Strike, PaymentProcessor};
use crate::rates::PriceOracle;
use std::str::FromStr;
use std::sync::Arc;

/// The supported payment back-ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorKind {
    /// Strike (fiat-denominated, supports cancel)
    Strike,
    /// LNbits (sat-denominated, no cancel endpoint)
    LnBits,
    /// OpenNode (fiat-denominated, no cancel endpoint)
    OpenNode,
}

impl FromStr for ProcessorKind {
    type Err = SatgateError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "strike" => Ok(ProcessorKind::Strike),
            "lnbits" => Ok(ProcessorKind::LnBits),
            "opennode" => Ok(ProcessorKind::OpenNode),
            other => Err(SatgateError::ConfigError(format!(
                "unknown processor kind '{}', expected one of: strike, lnbits, opennode",
                other
            ))),
        }
    }
}

/// Validated configuration for the selected payment processor.
#[derive(Debug, Clone)]
pub enum ProcessorConfig {
    /// Strike credentials
    Strike {
        /// API key for api.strike.me
        api_key: String,
    },
    /// LNbits instance location and credentials
    LnBits {
        /// Base URL of the LNbits instance
        url: String,
        /// Invoice/read key for the wallet
        api_key: String,
    },
    /// OpenNode credentials
    OpenNode {
        /// API key for api.opennode.com
        api_key: String,
    },
}

fn required_env(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| SatgateError::ConfigError(format!("{} is not set", name)))
}

impl ProcessorConfig {
    /// Loads the processor selection and its credentials from the
    /// environment.
    pub fn from_env() -> Result<Self> {
        let kind: ProcessorKind = required_env("PAYMENT_PROCESSOR_KIND")?.parse()?;
        Self::for_kind(kind)
    }

    /// Loads credentials for a specific kind from the environment.
    pub fn for_kind(kind: ProcessorKind) -> Result<Self> {
        match kind {
            ProcessorKind::Strike => Ok(ProcessorConfig::Strike {
                api_key: required_env("STRIKE_API_KEY")?,
            }),
            ProcessorKind::LnBits => Ok(ProcessorConfig::LnBits {
                url: required_env("LNBITS_URL")?,
                api_key: required_env("LNBITS_API_KEY")?,
            }),
            ProcessorKind::OpenNode => Ok(ProcessorConfig::OpenNode {
                api_key: required_env("OPENNODE_API_KEY")?,
            }),
        }
    }

    /// Builds the configured processor.
    ///
    /// The oracle is only used by sat-denominated back-ends (LNbits), but
    /// taking it here keeps selection free of per-kind branching at call
    /// sites.
    pub fn build(&self, oracle: Arc<PriceOracle>) -> Result<Arc<dyn PaymentProcessor>> {
        match self {
            ProcessorConfig::Strike { api_key } => Ok(Arc::new(Strike::new(api_key.clone())?)),
            ProcessorConfig::LnBits { url, api_key } => {
                Ok(Arc::new(LnBits::new(api_key.clone(), url, oracle)?))
            }
            ProcessorConfig::OpenNode { api_key } => {
                Ok(Arc::new(OpenNode::new(api_key.clone())?))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_parsing() {
        assert_eq!("strike".parse::<ProcessorKind>().unwrap(), ProcessorKind::Strike);
        assert_eq!("LNbits".parse::<ProcessorKind>().unwrap(), ProcessorKind::LnBits);
        assert_eq!("opennode".parse::<ProcessorKind>().unwrap(), ProcessorKind::OpenNode);
        assert!(matches!(
            "paypal".parse::<ProcessorKind>(),
            Err(SatgateError::ConfigError(_))
        ));
    }

    // One test covers all env interactions so parallel test threads never
    // observe each other's variables.
    #[test]
    fn test_env_loading() {
        std::env::remove_var("PAYMENT_PROCESSOR_KIND");
        assert!(matches!(
            ProcessorConfig::from_env(),
            Err(SatgateError::ConfigError(_))
        ));

        std::env::set_var("PAYMENT_PROCESSOR_KIND", "strike");
        std::env::remove_var("STRIKE_API_KEY");
        // Kind selected but token missing: still fatal
        assert!(matches!(
            ProcessorConfig::from_env(),
            Err(SatgateError::ConfigError(_))
        ));

        std::env::set_var("STRIKE_API_KEY", "sk-test");
        let config = ProcessorConfig::from_env().unwrap();
        assert!(matches!(config, ProcessorConfig::Strike { .. }));

        std::env::remove_var("PAYMENT_PROCESSOR_KIND");
        std::env::remove_var("STRIKE_API_KEY");
    }
}
