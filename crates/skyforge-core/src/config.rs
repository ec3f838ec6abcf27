//! skyforge.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::types::{ActionType, Provider, SafetyConstraints, ScalingPolicy};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SkyforgeConfig {
    pub constraints: Option<ConstraintsConfig>,
    pub scaling: Option<ScalingConfig>,
    pub deployment: Option<DeploymentConfig>,
    pub monitor: Option<MonitorConfig>,
    pub executor: Option<ExecutorConfig>,
    pub providers: Option<Vec<ProviderConfig>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConstraintsConfig {
    pub max_spending_without_approval: Option<f64>,
    pub monthly_budget_limit: Option<f64>,
    pub max_cost_per_instance: Option<f64>,
    pub max_total_instances: Option<u32>,
    pub min_healthy_instances: Option<u32>,
    pub blocked_providers: Option<Vec<String>>,
    pub blocked_regions: Option<Vec<String>>,
    pub approval_required_actions: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScalingConfig {
    pub min_instances: Option<u32>,
    pub max_instances: Option<u32>,
    pub target_cpu_utilization: Option<f64>,
    pub target_requests_per_instance: Option<f64>,
    pub cooldown: Option<String>,
    pub scale_up_threshold: Option<f64>,
    pub scale_down_threshold: Option<f64>,
    pub scale_down_rps_ratio: Option<f64>,
    pub budget_limit: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeploymentConfig {
    pub name: Option<String>,
    pub version: Option<String>,
    pub image: Option<String>,
    pub tag: Option<String>,
    pub port: Option<u16>,
    pub health_check_path: Option<String>,
    pub cpu: Option<f64>,
    pub memory_mb: Option<u32>,
    pub env: Option<HashMap<String, String>>,
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub interval: Option<String>,
    pub unhealthy_threshold: Option<u32>,
    pub autoscale_interval: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Delay used for steps backed by external build/CDN systems.
    pub simulated_step_delay: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub enabled: Option<bool>,
}

/// Resolved parameters used to build provision and container specs.
#[derive(Debug, Clone, PartialEq)]
pub struct DeploymentDefaults {
    pub name: String,
    pub version: String,
    pub image: String,
    pub tag: String,
    pub port: u16,
    pub health_check_path: String,
    pub cpu: f64,
    pub memory_mb: u32,
    pub env: HashMap<String, String>,
    pub labels: HashMap<String, String>,
}

impl Default for DeploymentDefaults {
    fn default() -> Self {
        Self {
            name: "app".to_string(),
            version: "0.1.0".to_string(),
            image: "registry.local/app".to_string(),
            tag: "latest".to_string(),
            port: 8080,
            health_check_path: "/healthz".to_string(),
            cpu: 0.5,
            memory_mb: 512,
            env: HashMap::new(),
            labels: HashMap::new(),
        }
    }
}

/// Resolved monitor settings.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorSettings {
    pub interval: Duration,
    pub unhealthy_threshold: u32,
    pub autoscale_interval: Duration,
}

impl SkyforgeConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: SkyforgeConfig = toml::from_str(content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Safety constraints with defaults filled in.
    pub fn safety_constraints(&self) -> anyhow::Result<SafetyConstraints> {
        let d = SafetyConstraints::default();
        let Some(c) = &self.constraints else {
            return Ok(d);
        };

        let blocked_providers = c
            .blocked_providers
            .iter()
            .flatten()
            .map(|name| {
                Provider::parse(name).ok_or_else(|| anyhow::anyhow!("unknown provider: {name}"))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        let approval_required_actions = c
            .approval_required_actions
            .iter()
            .flatten()
            .map(|name| {
                ActionType::parse(name)
                    .ok_or_else(|| anyhow::anyhow!("unknown action type: {name}"))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        let constraints = SafetyConstraints {
            max_spending_without_approval: c
                .max_spending_without_approval
                .unwrap_or(d.max_spending_without_approval),
            monthly_budget_limit: c.monthly_budget_limit.unwrap_or(d.monthly_budget_limit),
            max_cost_per_instance: c.max_cost_per_instance.unwrap_or(d.max_cost_per_instance),
            max_total_instances: c.max_total_instances.unwrap_or(d.max_total_instances),
            min_healthy_instances: c.min_healthy_instances.unwrap_or(d.min_healthy_instances),
            blocked_providers,
            blocked_regions: c.blocked_regions.clone().unwrap_or_default(),
            approval_required_actions,
        };

        if constraints.min_healthy_instances > constraints.max_total_instances {
            anyhow::bail!(
                "min_healthy_instances ({}) exceeds max_total_instances ({})",
                constraints.min_healthy_instances,
                constraints.max_total_instances
            );
        }
        Ok(constraints)
    }

    /// Scaling policy with defaults filled in.
    pub fn scaling_policy(&self) -> anyhow::Result<ScalingPolicy> {
        let d = ScalingPolicy::default();
        let Some(s) = &self.scaling else {
            return Ok(d);
        };

        let cooldown_secs = match &s.cooldown {
            Some(raw) => parse_duration(raw)
                .ok_or_else(|| anyhow::anyhow!("invalid cooldown: {raw}"))?
                .as_secs(),
            None => d.cooldown_secs,
        };

        let policy = ScalingPolicy {
            min_instances: s.min_instances.unwrap_or(d.min_instances),
            max_instances: s.max_instances.unwrap_or(d.max_instances),
            target_cpu_utilization: s.target_cpu_utilization.unwrap_or(d.target_cpu_utilization),
            target_requests_per_instance: s
                .target_requests_per_instance
                .unwrap_or(d.target_requests_per_instance),
            cooldown_secs,
            scale_up_threshold: s.scale_up_threshold.unwrap_or(d.scale_up_threshold),
            scale_down_threshold: s.scale_down_threshold.unwrap_or(d.scale_down_threshold),
            scale_down_rps_ratio: s.scale_down_rps_ratio.unwrap_or(d.scale_down_rps_ratio),
            budget_limit: s.budget_limit.unwrap_or(d.budget_limit),
        };

        if policy.min_instances > policy.max_instances {
            anyhow::bail!(
                "scaling min_instances ({}) exceeds max_instances ({})",
                policy.min_instances,
                policy.max_instances
            );
        }
        Ok(policy)
    }

    pub fn deployment_defaults(&self) -> DeploymentDefaults {
        let d = DeploymentDefaults::default();
        let Some(dep) = &self.deployment else {
            return d;
        };
        DeploymentDefaults {
            name: dep.name.clone().unwrap_or(d.name),
            version: dep.version.clone().unwrap_or(d.version),
            image: dep.image.clone().unwrap_or(d.image),
            tag: dep.tag.clone().unwrap_or(d.tag),
            port: dep.port.unwrap_or(d.port),
            health_check_path: dep.health_check_path.clone().unwrap_or(d.health_check_path),
            cpu: dep.cpu.unwrap_or(d.cpu),
            memory_mb: dep.memory_mb.unwrap_or(d.memory_mb),
            env: dep.env.clone().unwrap_or_default(),
            labels: dep.labels.clone().unwrap_or_default(),
        }
    }

    pub fn monitor_settings(&self) -> MonitorSettings {
        let m = self.monitor.clone().unwrap_or_default();
        MonitorSettings {
            interval: m
                .interval
                .as_deref()
                .and_then(parse_duration)
                .unwrap_or(Duration::from_secs(30)),
            unhealthy_threshold: m.unhealthy_threshold.unwrap_or(3),
            autoscale_interval: m
                .autoscale_interval
                .as_deref()
                .and_then(parse_duration)
                .unwrap_or(Duration::from_secs(60)),
        }
    }

    pub fn simulated_step_delay(&self) -> Duration {
        self.executor
            .as_ref()
            .and_then(|e| e.simulated_step_delay.as_deref())
            .and_then(parse_duration)
            .unwrap_or(Duration::from_millis(500))
    }

    /// Providers to register. All providers when the section is absent.
    pub fn enabled_providers(&self) -> anyhow::Result<Vec<Provider>> {
        let Some(providers) = &self.providers else {
            return Ok(Provider::ALL.to_vec());
        };
        let mut enabled = Vec::new();
        for p in providers {
            let provider = Provider::parse(&p.name)
                .ok_or_else(|| anyhow::anyhow!("unknown provider: {}", p.name))?;
            if p.enabled.unwrap_or(true) && !enabled.contains(&provider) {
                enabled.push(provider);
            }
        }
        Ok(enabled)
    }

    /// Scaffold a skyforge.toml with conservative defaults.
    pub fn scaffold(name: &str, image: &str) -> Self {
        SkyforgeConfig {
            constraints: Some(ConstraintsConfig {
                max_spending_without_approval: Some(50.0),
                monthly_budget_limit: Some(500.0),
                max_cost_per_instance: Some(200.0),
                max_total_instances: Some(10),
                min_healthy_instances: Some(1),
                blocked_providers: None,
                blocked_regions: None,
                approval_required_actions: Some(vec!["update-dns".to_string()]),
            }),
            scaling: Some(ScalingConfig {
                min_instances: Some(1),
                max_instances: Some(5),
                target_cpu_utilization: Some(0.7),
                target_requests_per_instance: Some(100.0),
                cooldown: Some("5m".to_string()),
                scale_up_threshold: None,
                scale_down_threshold: None,
                scale_down_rps_ratio: None,
                budget_limit: Some(500.0),
            }),
            deployment: Some(DeploymentConfig {
                name: Some(name.to_string()),
                version: Some("0.1.0".to_string()),
                image: Some(image.to_string()),
                tag: Some("latest".to_string()),
                port: Some(8080),
                health_check_path: Some("/healthz".to_string()),
                cpu: None,
                memory_mb: None,
                env: None,
                labels: None,
            }),
            monitor: Some(MonitorConfig {
                interval: Some("30s".to_string()),
                unhealthy_threshold: Some(3),
                autoscale_interval: Some("1m".to_string()),
            }),
            executor: None,
            providers: None,
        }
    }
}

/// Parse a duration string like "5s", "500ms", "1m".
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(secs) = s.strip_suffix('s') {
        if let Some(ms) = secs.strip_suffix('m') {
            ms.parse::<u64>().ok().map(Duration::from_millis)
        } else {
            secs.parse::<u64>().ok().map(Duration::from_secs)
        }
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}
