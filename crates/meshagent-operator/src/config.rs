//! Operator configuration
//!
//! Assembled once at startup from flags and environment, validated eagerly,
//! then handed to the components that need it.

use std::time::Duration;

use clap::Args;

use meshagent_common::{Error, Result, DEFAULT_EDGE_NAMESPACE, DEFAULT_FIELD_MANAGER};
use meshagent_desired_state::source::DEFAULT_FETCH_TIMEOUT;
use meshagent_desired_state::HttpManifestSource;
use meshagent_route::SynthesisOptions;

const RESOURCE: &str = "OperatorConfig";

/// Default period of the desired-state sync loop
pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 60;

/// Runtime configuration shared by every subcommand
#[derive(Args, Debug, Clone, PartialEq)]
pub struct OperatorConfig {
    /// Name this agent is registered under; selects its manifest
    #[arg(long, env = "AGENT_NAME")]
    pub agent_name: Option<String>,

    /// Base URL of the desired-state service (sync is disabled when unset)
    #[arg(long, env = "DESIRED_STATE_URL")]
    pub desired_state_url: Option<String>,

    /// Seconds between desired-state passes
    #[arg(long, env = "SYNC_INTERVAL_SECS", default_value_t = DEFAULT_SYNC_INTERVAL_SECS)]
    pub sync_interval_secs: u64,

    /// Namespace of the ingress gateway, where edge filters are written
    #[arg(long, env = "EDGE_NAMESPACE", default_value = DEFAULT_EDGE_NAMESPACE)]
    pub edge_namespace: String,

    /// Field manager used for every write
    #[arg(long, env = "FIELD_MANAGER", default_value = DEFAULT_FIELD_MANAGER)]
    pub field_manager: String,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            agent_name: None,
            desired_state_url: None,
            sync_interval_secs: DEFAULT_SYNC_INTERVAL_SECS,
            edge_namespace: DEFAULT_EDGE_NAMESPACE.to_string(),
            field_manager: DEFAULT_FIELD_MANAGER.to_string(),
        }
    }
}

impl OperatorConfig {
    /// Fail fast on anything that would only surface later as a runtime error
    pub fn validate(&self) -> Result<()> {
        if self.sync_interval_secs == 0 {
            return Err(Error::validation_for_field(
                RESOURCE,
                "sync_interval_secs",
                "must be greater than zero",
            ));
        }
        if self.edge_namespace.trim().is_empty() {
            return Err(Error::validation_for_field(
                RESOURCE,
                "edge_namespace",
                "cannot be empty",
            ));
        }
        if self.field_manager.trim().is_empty() {
            return Err(Error::validation_for_field(
                RESOURCE,
                "field_manager",
                "cannot be empty",
            ));
        }

        if let Some(url) = &self.desired_state_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(Error::validation_for_field(
                    RESOURCE,
                    "desired_state_url",
                    format!("must be an http or https URL: {}", url),
                ));
            }
            if self.agent_name.as_deref().map_or(true, |n| n.trim().is_empty()) {
                return Err(Error::validation_for_field(
                    RESOURCE,
                    "agent_name",
                    "required when desired_state_url is set",
                ));
            }
        }
        Ok(())
    }

    /// Whether the desired-state sync loop should run
    pub fn sync_enabled(&self) -> bool {
        self.desired_state_url.is_some()
    }

    /// Period of the desired-state sync loop
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    /// Synthesis options derived from this configuration
    pub fn synthesis_options(&self) -> SynthesisOptions {
        SynthesisOptions {
            edge_namespace: self.edge_namespace.clone(),
        }
    }

    /// HTTP manifest source, or `None` when sync is disabled
    pub fn manifest_source(&self) -> Result<Option<HttpManifestSource>> {
        match (&self.desired_state_url, &self.agent_name) {
            (Some(url), Some(agent)) => {
                HttpManifestSource::new(url, agent, DEFAULT_FETCH_TIMEOUT).map(Some)
            }
            (Some(_), None) => Err(Error::validation_for_field(
                RESOURCE,
                "agent_name",
                "required when desired_state_url is set",
            )),
            _ => Ok(None),
        }
    }
}
