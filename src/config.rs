//! Configuration module

use std::env;
use std::sync::Arc;

use crate::critical::CRITICAL_CSS_BUDGET_BYTES;
use crate::error::PurgeError;
use crate::token_extractor::Extractor;
use crate::usage_matcher::{Safelist, UsageMatcher, DEFAULT_SAFELIST};

pub struct Config {
    pub host: String,
    pub port: u16,
    pub api_key: Option<String>,
    pub extractor: Extractor,
    pub safelist: Vec<String>,
    pub critical_budget: usize,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let extractor = match lookup("EXTRACTOR") {
            Some(value) => value.parse().unwrap_or_else(|e| {
                tracing::warn!("Config: {}, using strict", e);
                Extractor::Strict
            }),
            None => Extractor::Strict,
        };

        let safelist = lookup("SAFELIST")
            .map(|list| {
                list.split(';')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_else(|| DEFAULT_SAFELIST.iter().map(|p| p.to_string()).collect());

        Self {
            host: lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: lookup("PORT").and_then(|p| p.parse().ok()).unwrap_or(3000),
            api_key: lookup("API_KEY").filter(|k| !k.is_empty()),
            extractor,
            safelist,
            critical_budget: lookup("CRITICAL_CSS_BUDGET")
                .and_then(|b| b.parse().ok())
                .unwrap_or(CRITICAL_CSS_BUDGET_BYTES),
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub api_key: Option<String>,
    pub extractor: Extractor,
    pub matcher: Arc<UsageMatcher>,
    pub critical_budget: usize,
}

impl AppState {
    /// Compile the safelist once for every request
    pub fn from_config(config: &Config) -> Result<Self, PurgeError> {
        let safelist = Safelist::new(config.safelist.iter().cloned())?;
        Ok(Self {
            api_key: config.api_key.clone(),
            extractor: config.extractor,
            matcher: Arc::new(UsageMatcher::new(safelist)),
            critical_budget: config.critical_budget,
        })
    }
}
