use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Alert severity level, ordered from lowest to highest.
///
/// # Examples
///
/// ```
/// use vmsentry_common::types::Severity;
///
/// let sev: Severity = "high".parse().unwrap();
/// assert_eq!(sev, Severity::High);
/// assert_eq!(sev.to_string(), "high");
/// assert!(Severity::Critical > Severity::Low);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Display label used in notification subjects and bodies.
    pub fn label(&self) -> &'static str {
        match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }

    /// Accent colour for HTML notifications.
    pub fn color(&self) -> &'static str {
        match self {
            Severity::Low => "#4caf50",
            Severity::Medium => "#2196f3",
            Severity::High => "#ff9800",
            Severity::Critical => "#f44336",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            _ => Err(format!("unknown severity: {s}")),
        }
    }
}

/// The set of entities a rule targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeKind {
    All,
    #[serde(alias = "vm")]
    Entity,
    Group,
    Cluster,
    Host,
    Datacenter,
}

impl ScopeKind {
    /// Every kind except `all` needs a scope target id.
    pub fn requires_target(&self) -> bool {
        !matches!(self, ScopeKind::All)
    }
}

impl std::fmt::Display for ScopeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ScopeKind::All => "all",
            ScopeKind::Entity => "entity",
            ScopeKind::Group => "group",
            ScopeKind::Cluster => "cluster",
            ScopeKind::Host => "host",
            ScopeKind::Datacenter => "datacenter",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for ScopeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(Self::All),
            "entity" | "vm" => Ok(Self::Entity),
            "group" => Ok(Self::Group),
            "cluster" => Ok(Self::Cluster),
            "host" => Ok(Self::Host),
            "datacenter" => Ok(Self::Datacenter),
            _ => Err(format!("unknown scope kind: {s}")),
        }
    }
}

/// How the per-condition results of a rule are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionLogic {
    #[default]
    And,
    Or,
}

impl std::fmt::Display for ConditionLogic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::And => write!(f, "and"),
            Self::Or => write!(f, "or"),
        }
    }
}

impl std::str::FromStr for ConditionLogic {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "and" => Ok(Self::And),
            "or" => Ok(Self::Or),
            _ => Err(format!("unknown condition logic: {s}")),
        }
    }
}

/// Comparison applied between a sampled value and a condition threshold.
///
/// `Equal` and `NotEqual` compare `f64` values exactly. On aggregated metric
/// samples exact equality almost never holds, so these operators exist for
/// completeness (e.g. flags reported as `0.0`/`1.0`) rather than for
/// continuous measurements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    #[serde(rename = ">")]
    GreaterThan,
    #[serde(rename = ">=")]
    GreaterEqual,
    #[serde(rename = "<")]
    LessThan,
    #[serde(rename = "<=")]
    LessEqual,
    #[serde(rename = "=", alias = "==")]
    Equal,
    #[serde(rename = "!=")]
    NotEqual,
}

impl std::str::FromStr for CompareOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            ">" => Ok(Self::GreaterThan),
            ">=" => Ok(Self::GreaterEqual),
            "<" => Ok(Self::LessThan),
            "<=" => Ok(Self::LessEqual),
            "=" | "==" => Ok(Self::Equal),
            "!=" => Ok(Self::NotEqual),
            _ => Err(format!("unknown compare operator: {s}")),
        }
    }
}

impl std::fmt::Display for CompareOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.symbol())
    }
}

impl CompareOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::GreaterThan => ">",
            Self::GreaterEqual => ">=",
            Self::LessThan => "<",
            Self::LessEqual => "<=",
            Self::Equal => "=",
            Self::NotEqual => "!=",
        }
    }

    #[allow(clippy::float_cmp)]
    pub fn check(&self, value: f64, threshold: f64) -> bool {
        match self {
            Self::GreaterThan => value > threshold,
            Self::GreaterEqual => value >= threshold,
            Self::LessThan => value < threshold,
            Self::LessEqual => value <= threshold,
            Self::Equal => value == threshold,
            Self::NotEqual => value != threshold,
        }
    }
}

/// Aggregation function applied to raw samples before comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    Avg,
    Max,
    Min,
    #[default]
    Last,
    Sum,
}

impl Aggregation {
    /// Reduces samples (oldest first) to a single value. Returns `None` when
    /// there is nothing to aggregate.
    ///
    /// ```
    /// use vmsentry_common::types::Aggregation;
    ///
    /// assert_eq!(Aggregation::Avg.apply(&[1.0, 2.0, 3.0]), Some(2.0));
    /// assert_eq!(Aggregation::Last.apply(&[1.0, 5.0]), Some(5.0));
    /// assert_eq!(Aggregation::Max.apply(&[]), None);
    /// ```
    pub fn apply(&self, samples: &[f64]) -> Option<f64> {
        if samples.is_empty() {
            return None;
        }
        let value = match self {
            Self::Avg => samples.iter().sum::<f64>() / samples.len() as f64,
            Self::Max => samples.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Self::Min => samples.iter().copied().fold(f64::INFINITY, f64::min),
            Self::Last => *samples.last()?,
            Self::Sum => samples.iter().sum(),
        };
        Some(value)
    }
}

impl std::fmt::Display for Aggregation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Avg => "avg",
            Self::Max => "max",
            Self::Min => "min",
            Self::Last => "last",
            Self::Sum => "sum",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for Aggregation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "avg" => Ok(Self::Avg),
            "max" => Ok(Self::Max),
            "min" => Ok(Self::Min),
            "last" => Ok(Self::Last),
            "sum" => Ok(Self::Sum),
            _ => Err(format!("unknown aggregation: {s}")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailTarget {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub recipients: Vec<String>,
    #[serde(default)]
    pub cc: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmsTarget {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub phone_numbers: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookTarget {
    #[serde(default)]
    pub enabled: bool,
    pub url: String,
    /// `POST` (default) or `PUT`.
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Shared secret used to sign the request body.
    #[serde(default)]
    pub secret: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InAppTarget {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Empty means every administrator.
    #[serde(default)]
    pub users: Vec<String>,
}

impl Default for InAppTarget {
    fn default() -> Self {
        Self {
            enabled: true,
            users: Vec::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

/// Per-rule notification configuration, keyed by channel.
///
/// `methods` lists the channels to notify in order (`email`, `sms`,
/// `webhook`, `inApp`); each channel reads its own section.
///
/// ```
/// use vmsentry_common::types::NotificationConfig;
///
/// let cfg: NotificationConfig = serde_json::from_str(
///     r#"{"methods":["webhook"],"webhook":{"enabled":true,"url":"http://hooks.local/a"}}"#,
/// ).unwrap();
/// assert_eq!(cfg.methods, vec!["webhook".to_string()]);
/// assert!(cfg.webhook.unwrap().enabled);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationConfig {
    #[serde(default)]
    pub methods: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<EmailTarget>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sms: Option<SmsTarget>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook: Option<WebhookTarget>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_app: Option<InAppTarget>,
}

/// A user-defined alert rule. Conditions are owned separately, see
/// [`AlertCondition`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub scope: ScopeKind,
    pub scope_id: Option<String>,
    pub logic: ConditionLogic,
    pub severity: Severity,
    pub enabled: bool,
    /// Minimum seconds between an incident closing and the rule opening a new one.
    pub cooldown_secs: u64,
    pub notification: NotificationConfig,
    pub trigger_count: u64,
    pub last_triggered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AlertRule {
    /// Checks the scope invariant: `all` forbids a target id, every other
    /// kind requires a non-empty one.
    pub fn validate(&self) -> Result<(), String> {
        let has_target = self.scope_id.as_deref().is_some_and(|s| !s.trim().is_empty());
        match (self.scope.requires_target(), has_target) {
            (true, false) => Err(format!(
                "rule '{}': scope '{}' requires a scope id",
                self.name, self.scope
            )),
            (false, true) => Err(format!(
                "rule '{}': scope 'all' must not carry a scope id",
                self.name
            )),
            _ => Ok(()),
        }
    }
}

/// One threshold comparison within a rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertCondition {
    pub id: String,
    pub rule_id: String,
    pub metric: String,
    pub operator: CompareOp,
    pub threshold: f64,
    pub aggregation: Aggregation,
    /// Lookback window in seconds.
    pub duration_secs: u64,
    pub sort_order: i32,
}

impl AlertCondition {
    /// Human-readable description including the observed value, stored on
    /// incidents.
    pub fn describe(&self, value: f64) -> String {
        format!(
            "{}({}, {}s) {} {:.4} (actual: {:.4})",
            self.aggregation, self.metric, self.duration_secs, self.operator, self.threshold, value
        )
    }
}

/// Status value of entities the monitoring system lost track of.
pub const UNKNOWN_STATUS: &str = "unknown";

/// A monitored virtual machine as seen by the alerting engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRef {
    pub id: String,
    pub name: String,
    pub ip: Option<String>,
    pub os_type: Option<String>,
    pub status: String,
    pub host_id: Option<String>,
    pub host_name: Option<String>,
    pub cluster_id: Option<String>,
    pub cluster_name: Option<String>,
    pub datacenter_id: Option<String>,
}

impl EntityRef {
    pub fn is_unknown(&self) -> bool {
        self.status.eq_ignore_ascii_case(UNKNOWN_STATUS)
    }

    /// Attributes frozen onto an incident at trigger time.
    pub fn snapshot(&self, at: DateTime<Utc>) -> serde_json::Value {
        serde_json::json!({
            "vm": {
                "id": self.id,
                "name": self.name,
                "ip": self.ip,
                "os": self.os_type,
                "status": self.status,
                "hostName": self.host_name,
                "clusterName": self.cluster_name,
            },
            "triggeredAt": at.to_rfc3339(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentStatus {
    Active,
    Acknowledged,
    Resolved,
}

impl IncidentStatus {
    /// Active and acknowledged incidents are still open.
    pub fn is_open(&self) -> bool {
        !matches!(self, Self::Resolved)
    }
}

impl std::fmt::Display for IncidentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Acknowledged => write!(f, "acknowledged"),
            Self::Resolved => write!(f, "resolved"),
        }
    }
}

impl std::str::FromStr for IncidentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "acknowledged" => Ok(Self::Acknowledged),
            "resolved" => Ok(Self::Resolved),
            _ => Err(format!("unknown incident status: {s}")),
        }
    }
}

/// Outcome of one notification channel for one incident.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelResult {
    pub method: String,
    pub success: bool,
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ChannelResult {
    pub fn success(method: &str, message: Option<String>) -> Self {
        Self {
            method: method.to_string(),
            success: true,
            message,
            timestamp: Utc::now(),
        }
    }

    pub fn failure(method: &str, message: impl Into<String>) -> Self {
        Self {
            method: method.to_string(),
            success: false,
            message: Some(message.into()),
            timestamp: Utc::now(),
        }
    }
}

/// A materialized occurrence of a rule firing against one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub id: String,
    pub rule_id: String,
    /// Rule name at trigger time; stays stable if the rule is edited or deleted.
    pub rule_name: String,
    pub entity_id: String,
    pub entity_name: String,
    pub cluster_id: Option<String>,
    pub metric: String,
    pub severity: Severity,
    pub trigger_value: f64,
    pub threshold: f64,
    pub condition_desc: String,
    pub status: IncidentStatus,
    pub triggered_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub acknowledged_by: Option<String>,
    pub acknowledge_note: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
    pub resolution: Option<String>,
    /// `resolved_at - triggered_at`, in seconds.
    pub duration_secs: Option<i64>,
    pub snapshot: serde_json::Value,
    pub notifications: Vec<ChannelResult>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Incident {
    /// Moves the incident to `resolved`, stamping resolver, note and duration.
    pub fn mark_resolved(&mut self, at: DateTime<Utc>, by: &str, note: Option<String>) {
        self.status = IncidentStatus::Resolved;
        self.resolved_at = Some(at);
        self.resolved_by = Some(by.to_string());
        self.resolution = note;
        self.duration_secs = Some((at - self.triggered_at).num_seconds());
        self.updated_at = at;
    }

    /// Moves the incident to `acknowledged`.
    pub fn mark_acknowledged(&mut self, at: DateTime<Utc>, by: &str, note: Option<String>) {
        self.status = IncidentStatus::Acknowledged;
        self.acknowledged_at = Some(at);
        self.acknowledged_by = Some(by.to_string());
        self.acknowledge_note = note;
        self.updated_at = at;
    }
}
