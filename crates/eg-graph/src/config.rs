use std::env;
use std::fmt;

use crate::error::{GraphError, Result};

/// Kind of device a graph executes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceType {
    Cpu,
    Gpu,
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceType::Cpu => write!(f, "cpu"),
            DeviceType::Gpu => write!(f, "gpu"),
        }
    }
}

/// Device identity: ordinal plus kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId {
    pub no: usize,
    pub kind: DeviceType,
}

impl DeviceId {
    pub fn cpu(no: usize) -> Self {
        DeviceId {
            no,
            kind: DeviceType::Cpu,
        }
    }

    pub fn gpu(no: usize) -> Self {
        DeviceId {
            no,
            kind: DeviceType::Gpu,
        }
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind, self.no)
    }
}

impl Default for DeviceId {
    fn default() -> Self {
        DeviceId::cpu(0)
    }
}

/// Settings consulted by operators while a graph is being built.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphConfig {
    /// Device the graph targets.
    pub device: DeviceId,
    /// Enables the int16 path for `dot` and `affine` on CPU.
    pub optimized: bool,
    /// Symmetric clamp applied to matmul operands; 0 disables clamping.
    pub clip: f32,
    /// Benchmark competing `affine` kernels instead of always using int16.
    pub autotune: bool,
}

impl Default for GraphConfig {
    fn default() -> Self {
        GraphConfig {
            device: DeviceId::default(),
            optimized: false,
            clip: 0.0,
            autotune: true,
        }
    }
}

fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}

fn parse_device(value: &str) -> Result<DeviceId> {
    let normalized = value.trim().to_ascii_lowercase();
    let (kind, no) = match normalized.split_once(':') {
        Some((kind, no)) => {
            let no = no
                .parse::<usize>()
                .map_err(|_| GraphError::Config(format!("invalid device ordinal: {}", value)))?;
            (kind.to_string(), no)
        }
        None => (normalized, 0),
    };
    match kind.as_str() {
        "cpu" => Ok(DeviceId::cpu(no)),
        "gpu" => Ok(DeviceId::gpu(no)),
        _ => Err(GraphError::Config(format!("unknown device: {}", value))),
    }
}

impl GraphConfig {
    pub fn with_device(mut self, device: DeviceId) -> Self {
        self.device = device;
        self
    }

    pub fn with_optimized(mut self, optimized: bool) -> Self {
        self.optimized = optimized;
        self
    }

    pub fn with_clip(mut self, clip: f32) -> Self {
        self.clip = clip;
        self
    }

    pub fn with_autotune(mut self, autotune: bool) -> Self {
        self.autotune = autotune;
        self
    }

    /// Default configuration overlaid with `EG_OPTIMIZE`, `EG_CLIP`,
    /// `EG_AUTOTUNE` and `EG_DEVICE` (`cpu`, `gpu`, `gpu:1`, ...).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Like [`GraphConfig::from_env`] but reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = GraphConfig::default();
        let set = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(value) = set("EG_OPTIMIZE") {
            config.optimized = parse_bool(&value);
        }
        if let Some(value) = set("EG_AUTOTUNE") {
            config.autotune = parse_bool(&value);
        }
        if let Some(value) = set("EG_CLIP") {
            let clip = value
                .trim()
                .parse::<f32>()
                .map_err(|_| GraphError::Config(format!("invalid EG_CLIP: {}", value)))?;
            if clip < 0.0 || !clip.is_finite() {
                return Err(GraphError::Config(format!(
                    "EG_CLIP must be a finite value >= 0, got {}",
                    clip
                )));
            }
            config.clip = clip;
        }
        if let Some(value) = set("EG_DEVICE") {
            config.device = parse_device(&value)?;
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = GraphConfig::default();
        assert_eq!(config.device, DeviceId::cpu(0));
        assert!(!config.optimized);
        assert_eq!(config.clip, 0.0);
        assert!(config.autotune);
    }

    #[test]
    fn test_overlay() {
        let config = GraphConfig::from_lookup(lookup(&[
            ("EG_OPTIMIZE", "yes"),
            ("EG_CLIP", "2.5"),
            ("EG_AUTOTUNE", "off"),
            ("EG_DEVICE", "gpu:1"),
        ]))
        .unwrap();
        assert!(config.optimized);
        assert_eq!(config.clip, 2.5);
        assert!(!config.autotune);
        assert_eq!(config.device, DeviceId::gpu(1));
    }

    #[test]
    fn test_blank_values_are_ignored() {
        let config = GraphConfig::from_lookup(lookup(&[("EG_OPTIMIZE", "  ")])).unwrap();
        assert!(!config.optimized);
    }

    #[test]
    fn test_invalid_values() {
        assert!(GraphConfig::from_lookup(lookup(&[("EG_CLIP", "abc")])).is_err());
        assert!(GraphConfig::from_lookup(lookup(&[("EG_CLIP", "-1")])).is_err());
        assert!(GraphConfig::from_lookup(lookup(&[("EG_DEVICE", "tpu")])).is_err());
    }

    #[test]
    fn test_builder() {
        let config = GraphConfig::default()
            .with_optimized(true)
            .with_clip(1.0)
            .with_device(DeviceId::gpu(0));
        assert!(config.optimized);
        assert_eq!(config.clip, 1.0);
        assert_eq!(config.device.kind, DeviceType::Gpu);
    }
}
