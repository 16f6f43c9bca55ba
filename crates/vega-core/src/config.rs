//! 配置记录与回退默认值。
//!
//! # 模块定位（Why）
//! - YAML/环境变量的分层装载由外部宿主完成；核心只拥有配置记录本身、
//!   字段语义与“非正值回退默认”的规范化规则；
//! - 附带一个 TOML 装载助手，便于测试与独立部署场景直接喂入片段。
//!
//! # 规范化约定（What）
//! - 所有字段零值（未配置或显式写 0）一律回退文档默认值，调用方拿到的
//!   永远是规范化之后的记录；
//! - 默认值：注册表上限 1000 颗、闲置 TTL 600 秒、清扫周期 60 秒、
//!   星历分片 100 点、分片通道容量 16、门闸许可 1。

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{VegaError, codes};

/// 注册表上限的默认值。
pub const DEFAULT_MAX_LOADED: usize = 1_000;
/// 闲置 TTL 的默认值（秒）。
pub const DEFAULT_IDLE_TTL_SECS: u64 = 600;
/// 清扫周期的默认值（秒）。
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;
/// 星历分片点数的默认值。
pub const DEFAULT_CHUNK_SIZE: usize = 100;
/// 分片通道容量的默认值。
pub const DEFAULT_CHANNEL_CAPACITY: usize = 16;
/// 门闸许可数的默认值；原生库非线程安全，仅在假设的可重入引擎下调大。
pub const DEFAULT_GATE_PERMITS: usize = 1;

/// 卫星注册表（GC）的可调参数。
///
/// # 教案式说明
/// - **契约 (What)**：
///   - `max_loaded`：同时持有的原生句柄上限；全部在用时允许临时超限
///     （无背压策略）；
///   - `idle_ttl_secs`：条目闲置多久后允许被 TTL 清扫；
///   - `sweep_interval_secs`：后台清扫的节拍；
/// - **风险 (Trade-offs)**：清扫周期大于 TTL 时条目的实际存活上限近似
///   `idle_ttl + sweep_interval`，属预期行为。
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct RegistryOptions {
    pub max_loaded: usize,
    pub idle_ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            max_loaded: DEFAULT_MAX_LOADED,
            idle_ttl_secs: DEFAULT_IDLE_TTL_SECS,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
        }
    }
}

impl RegistryOptions {
    /// 将零值字段回退为文档默认值。
    pub fn normalized(self) -> Self {
        let defaults = Self::default();
        Self {
            max_loaded: if self.max_loaded == 0 {
                defaults.max_loaded
            } else {
                self.max_loaded
            },
            idle_ttl_secs: if self.idle_ttl_secs == 0 {
                defaults.idle_ttl_secs
            } else {
                self.idle_ttl_secs
            },
            sweep_interval_secs: if self.sweep_interval_secs == 0 {
                defaults.sweep_interval_secs
            } else {
                self.sweep_interval_secs
            },
        }
    }

    /// 闲置 TTL。
    pub fn idle_ttl(&self) -> Duration {
        Duration::from_secs(self.idle_ttl_secs)
    }

    /// 清扫周期。
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// 请求编排层的可调参数。
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct ServiceOptions {
    /// 每个星历分片的点数上限。
    pub chunk_size: usize,
    /// 分片生产者与发送任务之间的通道容量。
    pub channel_capacity: usize,
    /// 门闸许可数；默认 1 即全序串行。
    pub gate_permits: usize,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            gate_permits: DEFAULT_GATE_PERMITS,
        }
    }
}

impl ServiceOptions {
    /// 将零值字段回退为文档默认值。
    pub fn normalized(self) -> Self {
        let defaults = Self::default();
        Self {
            chunk_size: if self.chunk_size == 0 {
                defaults.chunk_size
            } else {
                self.chunk_size
            },
            channel_capacity: if self.channel_capacity == 0 {
                defaults.channel_capacity
            } else {
                self.channel_capacity
            },
            gate_permits: if self.gate_permits == 0 {
                defaults.gate_permits
            } else {
                self.gate_permits
            },
        }
    }
}

/// 工作区聚合配置。
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct VegaConfig {
    pub registry: RegistryOptions,
    pub service: ServiceOptions,
}

impl VegaConfig {
    /// 从 TOML 片段装载并规范化；缺省字段取默认值。
    pub fn from_toml_str(input: &str) -> Result<Self, VegaError> {
        let parsed: Self = toml::from_str(input).map_err(|err| {
            VegaError::new(codes::CONFIG_INVALID, format!("config is not valid TOML: {err}"))
        })?;
        Ok(parsed.normalized())
    }

    /// 规范化所有成员。
    pub fn normalized(self) -> Self {
        Self {
            registry: self.registry.normalized(),
            service: self.service.normalized(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_values_fall_back_to_defaults() {
        let opts = RegistryOptions {
            max_loaded: 0,
            idle_ttl_secs: 0,
            sweep_interval_secs: 30,
        }
        .normalized();
        assert_eq!(opts.max_loaded, DEFAULT_MAX_LOADED);
        assert_eq!(opts.idle_ttl_secs, DEFAULT_IDLE_TTL_SECS);
        assert_eq!(opts.sweep_interval_secs, 30);
    }

    #[test]
    fn partial_toml_keeps_defaults_elsewhere() {
        let config = VegaConfig::from_toml_str(
            r#"
            [registry]
            max_loaded = 2

            [service]
            chunk_size = 7
            "#,
        )
        .expect("片段配置应可装载");
        assert_eq!(config.registry.max_loaded, 2);
        assert_eq!(config.registry.idle_ttl_secs, DEFAULT_IDLE_TTL_SECS);
        assert_eq!(config.service.chunk_size, 7);
        assert_eq!(config.service.gate_permits, DEFAULT_GATE_PERMITS);
    }

    #[test]
    fn malformed_toml_is_rejected_with_a_stable_code() {
        let err = VegaConfig::from_toml_str("registry = ]").expect_err("坏片段应失败");
        assert_eq!(err.code(), crate::error::codes::CONFIG_INVALID);
    }
}
