//! WhatsTrack configuration loader.
//!
//! TOML file with every section defaulted, then environment overrides, then validation.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WhatsTrackConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub whatsapp: WhatsAppConfig,
    #[serde(default)]
    pub jira: JiraConfig,
    #[serde(default)]
    pub conversation: ConversationConfig,
    #[serde(default)]
    pub decision: DecisionConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_http_timeout_seconds")]
    pub http_timeout_seconds: u64,
    #[serde(default = "default_http_max_in_flight")]
    pub http_max_in_flight: usize,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_http_timeout_seconds() -> u64 {
    30
}

fn default_http_max_in_flight() -> usize {
    256
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            http_timeout_seconds: default_http_timeout_seconds(),
            http_max_in_flight: default_http_max_in_flight(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WhatsAppConfig {
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub phone_number_id: String,
    /// Token echoed back by Meta during the webhook verification handshake.
    #[serde(default)]
    pub verify_token: String,
    /// When set, every event delivery must carry a valid `x-hub-signature-256`.
    #[serde(default)]
    pub app_secret: Option<String>,
    #[serde(default = "default_graph_api_version")]
    pub graph_api_version: String,
}

fn default_graph_api_version() -> String {
    "v21.0".to_string()
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            access_token: String::new(),
            phone_number_id: String::new(),
            verify_token: String::new(),
            app_secret: None,
            graph_api_version: default_graph_api_version(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JiraConfig {
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub api_token: String,
    #[serde(default)]
    pub project_key: String,
    #[serde(default = "default_parent_issue_type")]
    pub parent_issue_type: String,
    #[serde(default = "default_issue_type")]
    pub issue_type: String,
    #[serde(default = "default_max_candidate_issues")]
    pub max_candidate_issues: usize,
}

fn default_parent_issue_type() -> String {
    "Project".to_string()
}

fn default_issue_type() -> String {
    "Task".to_string()
}

fn default_max_candidate_issues() -> usize {
    20
}

impl Default for JiraConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            email: String::new(),
            api_token: String::new(),
            project_key: String::new(),
            parent_issue_type: default_parent_issue_type(),
            issue_type: default_issue_type(),
            max_candidate_issues: default_max_candidate_issues(),
        }
    }
}

impl JiraConfig {
    pub fn client_config(&self) -> wt_tracker::JiraConfig {
        wt_tracker::JiraConfig {
            base_url: self.base_url.clone(),
            email: self.email.clone(),
            api_token: self.api_token.clone(),
            project_key: self.project_key.clone(),
            parent_issue_type: self.parent_issue_type.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConversationConfig {
    /// Idle time after which a conversation is forgotten.
    #[serde(default = "default_session_ttl_seconds")]
    pub session_ttl_seconds: u64,
    /// Idle time after which a chat's dispatch worker exits.
    #[serde(default = "default_lane_idle_seconds")]
    pub lane_idle_seconds: u64,
    /// How long shutdown waits for chat lanes to finish queued messages.
    #[serde(default = "default_shutdown_grace_seconds")]
    pub shutdown_grace_seconds: u64,
}

fn default_session_ttl_seconds() -> u64 {
    600
}

fn default_lane_idle_seconds() -> u64 {
    600
}

fn default_shutdown_grace_seconds() -> u64 {
    15
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            session_ttl_seconds: default_session_ttl_seconds(),
            lane_idle_seconds: default_lane_idle_seconds(),
            shutdown_grace_seconds: default_shutdown_grace_seconds(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionMode {
    #[default]
    Placeholder,
    Llm,
}

impl DecisionMode {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "placeholder" => Some(Self::Placeholder),
            "llm" => Some(Self::Llm),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DecisionConfig {
    #[serde(default)]
    pub mode: DecisionMode,
    #[serde(default = "default_decision_model")]
    pub model: String,
    #[serde(default)]
    pub openai_api_key: Option<String>,
    #[serde(default)]
    pub anthropic_api_key: Option<String>,
}

fn default_decision_model() -> String {
    "gpt-5-mini".to_string()
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            mode: DecisionMode::default(),
            model: default_decision_model(),
            openai_api_key: None,
            anthropic_api_key: None,
        }
    }
}

impl DecisionConfig {
    pub fn api_key_for_model(&self) -> Option<String> {
        let key = match wt_llm::Provider::for_model(&self.model) {
            wt_llm::Provider::Anthropic => self.anthropic_api_key.clone(),
            wt_llm::Provider::OpenAI => self.openai_api_key.clone(),
        };
        key.filter(|s| !s.trim().is_empty())
    }
}

impl WhatsTrackConfig {
    pub async fn load(path: Option<PathBuf>) -> anyhow::Result<Self> {
        Ok(Self::load_with_path(path).await?.0)
    }

    /// An explicit path must exist; the default path is optional so env-only deployments work.
    pub async fn load_with_path(path: Option<PathBuf>) -> anyhow::Result<(Self, PathBuf)> {
        let explicit = path.is_some();
        let path = path.unwrap_or_else(default_config_path);

        let mut cfg = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => Self::from_toml(&contents)
                .map_err(|e| anyhow::anyhow!("parse config {}: {e}", path.display()))?,
            Err(e) if !explicit && e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(
                    config_path = %path.display(),
                    "config file not found; using defaults and environment"
                );
                Self::default()
            }
            Err(e) => {
                return Err(anyhow::anyhow!("read config {}: {e}", path.display()));
            }
        };

        cfg.apply_env_overrides(|key| std::env::var(key).ok())?;
        cfg.validate()?;
        Ok((cfg, path))
    }

    pub fn from_toml(contents: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    fn apply_env_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> anyhow::Result<()> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = var("WHATSAPP_ACCESS_TOKEN") {
            self.whatsapp.access_token = v;
        }
        if let Some(v) = var("WHATSAPP_PHONE_NUMBER_ID") {
            self.whatsapp.phone_number_id = v;
        }
        if let Some(v) = var("WHATSAPP_VERIFY_TOKEN") {
            self.whatsapp.verify_token = v;
        }
        if let Some(v) = var("WHATSAPP_APP_SECRET") {
            self.whatsapp.app_secret = Some(v);
        }
        if let Some(v) = var("JIRA_BASE_URL") {
            self.jira.base_url = v;
        }
        if let Some(v) = var("JIRA_EMAIL") {
            self.jira.email = v;
        }
        if let Some(v) = var("JIRA_API_TOKEN") {
            self.jira.api_token = v;
        }
        if let Some(v) = var("JIRA_PROJECT_KEY") {
            self.jira.project_key = v;
        }
        if let Some(v) = var("OPENAI_API_KEY") {
            self.decision.openai_api_key = Some(v);
        }
        if let Some(v) = var("ANTHROPIC_API_KEY") {
            self.decision.anthropic_api_key = Some(v);
        }
        if let Some(v) = var("DECISION_MODE") {
            self.decision.mode = DecisionMode::parse(&v).ok_or_else(|| {
                anyhow::anyhow!("unsupported DECISION_MODE={v:?}; expected placeholder or llm")
            })?;
        }
        if let Some(v) = var("DECISION_MODEL") {
            self.decision.model = v;
        }
        if let Some(v) = var("PORT") {
            let port: u16 = v
                .trim()
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid PORT={v:?}: {e}"))?;
            let mut addr = self.bind_addr()?;
            addr.set_port(port);
            self.server.bind_addr = addr.to_string();
        }
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.bind_addr()?;
        if self.server.http_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("server.http_timeout_seconds must be > 0"));
        }
        if self.server.http_max_in_flight == 0 {
            return Err(anyhow::anyhow!("server.http_max_in_flight must be > 0"));
        }

        let missing: Vec<&str> = [
            ("whatsapp.access_token", &self.whatsapp.access_token),
            ("whatsapp.phone_number_id", &self.whatsapp.phone_number_id),
            ("whatsapp.verify_token", &self.whatsapp.verify_token),
            ("jira.base_url", &self.jira.base_url),
            ("jira.email", &self.jira.email),
            ("jira.api_token", &self.jira.api_token),
            ("jira.project_key", &self.jira.project_key),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect();
        if !missing.is_empty() {
            return Err(anyhow::anyhow!(
                "missing required configuration: {}",
                missing.join(", ")
            ));
        }

        if self.jira.issue_type.trim().is_empty() {
            return Err(anyhow::anyhow!("jira.issue_type must not be empty"));
        }
        if self.jira.max_candidate_issues == 0 {
            return Err(anyhow::anyhow!("jira.max_candidate_issues must be > 0"));
        }
        if self.conversation.session_ttl_seconds == 0 {
            return Err(anyhow::anyhow!(
                "conversation.session_ttl_seconds must be > 0"
            ));
        }
        if self.conversation.lane_idle_seconds == 0 {
            return Err(anyhow::anyhow!("conversation.lane_idle_seconds must be > 0"));
        }
        if self.decision.mode == DecisionMode::Llm {
            if self.decision.model.trim().is_empty() {
                return Err(anyhow::anyhow!(
                    "decision.model is required when decision.mode = \"llm\""
                ));
            }
            if self.decision.api_key_for_model().is_none() {
                return Err(anyhow::anyhow!(
                    "decision.mode = \"llm\" requires an api key for model {}",
                    self.decision.model
                ));
            }
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
        self.server.bind_addr.trim().parse().map_err(|e| {
            anyhow::anyhow!("invalid server.bind_addr {:?}: {e}", self.server.bind_addr)
        })
    }
}

pub fn default_config_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    Path::new(&home).join(".whatstrack").join("config.toml")
}
