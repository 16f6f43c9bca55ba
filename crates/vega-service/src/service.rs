//! 服务结构与 Info 操作。

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;

use vega_core::config::{ServiceOptions, VegaConfig};
use vega_core::contract::CallContext;
use vega_core::error::VegaError;
use vega_core::model::InfoResponse;
use vega_engine::adapter::PropagationEngine;
use vega_engine::gate::EngineGate;
use vega_engine::registry::SatelliteRegistry;

/// 构建期元数据，Info 操作原样返回。
///
/// # 教案式说明
/// - **契约 (What)**：`version` 默认取 crate 版本；`commit_hash` 与
///   `build_date` 由构建系统通过 `VEGA_COMMIT_HASH` / `VEGA_BUILD_DATE`
///   环境变量注入，缺省回落为 `unknown`；
/// - **风险 (Trade-offs)**：字段为普通字符串，外部装配层可整体替换。
#[derive(Clone, Debug)]
pub struct BuildInfo {
    pub service_name: String,
    pub version: String,
    pub commit_hash: String,
    pub build_date: String,
}

impl Default for BuildInfo {
    fn default() -> Self {
        Self {
            service_name: "vega-propagation".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            commit_hash: option_env!("VEGA_COMMIT_HASH").unwrap_or("unknown").to_string(),
            build_date: option_env!("VEGA_BUILD_DATE").unwrap_or("unknown").to_string(),
        }
    }
}

/// 轨道传播服务。
///
/// # 教案式说明
/// - **意图 (Why)**：把注册表、门闸与可调参数装配为一个对外只暴露三个
///   操作的整体；外部传输层持有 `Arc<PropagationService>` 并为每个请求
///   构造 [`CallContext`]；
/// - **契约 (What)**：
///   - 所有请求处理器在 `global_mu` 下端到端串行；锁的公平性未作承诺，
///     并发请求之间不保证到达序即执行序；
///   - [`close`](Self::close) 停止注册表清扫器；之后的请求以
///     `registry.closed` 拒绝；
/// - **风险 (Trade-offs)**：`global_mu` 包住整个处理器而非仅原生调用段，
///   这是对原生目录变更路径未经审计前的保守选择，放宽需先证明目录查询
///   与变更可以交错。
pub struct PropagationService {
    global_mu: Mutex<()>,
    registry: SatelliteRegistry,
    gate: Arc<EngineGate>,
    options: ServiceOptions,
    build: BuildInfo,
}

impl PropagationService {
    /// 装配服务；`config` 在此规范化。必须在 Tokio 运行时内调用
    /// （注册表会启动后台清扫器）。
    pub fn new(
        engine: Arc<dyn PropagationEngine>,
        config: VegaConfig,
        build: BuildInfo,
    ) -> Self {
        let config = config.normalized();
        let gate = Arc::new(EngineGate::new(engine, config.service.gate_permits));
        let registry = SatelliteRegistry::new(Arc::clone(&gate), config.registry);
        Self {
            global_mu: Mutex::new(()),
            registry,
            gate,
            options: config.service,
            build,
        }
    }

    /// Info 操作：构建期元数据 + 原生库识别串 + 响应时刻。
    pub async fn info(&self, ctx: &CallContext) -> Result<InfoResponse, VegaError> {
        let _serial = self.global_mu.lock().await;
        let native = self
            .gate
            .with_call(ctx, |engine| Ok(engine.info()))
            .await
            .map_err(VegaError::from)?;
        Ok(InfoResponse {
            service_name: self.build.service_name.clone(),
            version: self.build.version.clone(),
            commit_hash: self.build.commit_hash.clone(),
            build_date: self.build.build_date.clone(),
            native_lib_info_astro: native.astro,
            native_lib_info_sgp4: native.sgp4,
            timestamp_utc: Utc::now(),
        })
    }

    /// 停止后台清扫器并等待其退出。
    pub async fn close(&self) {
        self.registry.close().await;
    }

    /// 注册表句柄，供装配层做退出前排空与测试断言。
    pub fn registry(&self) -> &SatelliteRegistry {
        &self.registry
    }

    pub(crate) fn global_mu(&self) -> &Mutex<()> {
        &self.global_mu
    }

    pub(crate) fn gate(&self) -> &Arc<EngineGate> {
        &self.gate
    }

    pub(crate) fn options(&self) -> &ServiceOptions {
        &self.options
    }
}

impl std::fmt::Debug for PropagationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropagationService")
            .field("service_name", &self.build.service_name)
            .field("registry", &self.registry)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vega_engine::testkit::MockEngine;

    #[tokio::test]
    async fn info_reports_build_and_native_metadata() {
        let engine = Arc::new(MockEngine::new());
        let service = PropagationService::new(
            engine,
            VegaConfig::default(),
            BuildInfo {
                service_name: "vega-test".to_string(),
                version: "9.9.9".to_string(),
                commit_hash: "deadbeef".to_string(),
                build_date: "2026-01-01".to_string(),
            },
        );
        let info = service
            .info(&CallContext::background())
            .await
            .expect("Info 应成功");
        assert_eq!(info.service_name, "vega-test");
        assert_eq!(info.version, "9.9.9");
        assert!(info.native_lib_info_astro.contains("MockAstroLib"));
        assert!(info.native_lib_info_sgp4.contains("MockSgp4"));
        service.close().await;
    }

    #[test]
    fn default_build_info_falls_back_to_unknown() {
        let build = BuildInfo::default();
        assert_eq!(build.service_name, "vega-propagation");
        assert!(!build.version.is_empty());
    }
}
