//! 单点传播管线。
//!
//! # 流程（What）
//! 1. 校验请求并取得已检视图；
//! 2. 持全局串行锁执行整个调用；
//! 3. 若给的是 UTC 时刻，在边界换算为 DS50；
//! 4. 借出卫星（可能触发加载与驱逐）；
//! 5. 门闸内执行 `prop_all`，八元组映射进响应；
//! 6. 凭据随作用域结束归还——包括所有错误与取消路径。

use tracing::debug;

use vega_core::contract::CallContext;
use vega_core::error::VegaError;
use vega_core::model::{PropRequest, PropResponse, PropagationState};
use vega_core::time::utc_to_ds50;
use vega_core::validate::{self, PropTime};
use vega_engine::adapter::TimeRef;

use crate::service::PropagationService;

impl PropagationService {
    /// 单点传播。
    ///
    /// # 教案式说明
    /// - **契约 (What)**：校验失败映射 `InvalidArgument`；原生失败映射
    ///   `Internal` 并携带 last-error 现场；响应回显请求标识；
    /// - **取消 (What)**：取消在门闸许可等待处生效；若原生调用已经开始，
    ///   调用运行到底、结果被丢弃，卫星照常释放。
    pub async fn prop(
        &self,
        ctx: &CallContext,
        request: &PropRequest,
    ) -> Result<PropResponse, VegaError> {
        let checked = validate::checked_prop(request)?;
        let _serial = self.global_mu().lock().await;
        ctx.ensure_active()?;

        // UTC 在边界换算为 DS50，此后管线只接触 DS50。
        let time_ref = match checked.time {
            PropTime::Utc(at) => TimeRef::Ds50(utc_to_ds50(at)),
            PropTime::Ds50(t) => TimeRef::Ds50(t),
            PropTime::MinutesSinceEpoch(mse) => TimeRef::MinutesSinceEpoch(mse),
        };

        let lease = self
            .registry()
            .acquire(ctx, &checked.satellite.line1, &checked.satellite.line2)
            .await?;
        let key = lease.key();
        let raw = self
            .gate()
            .with_call(ctx, move |engine| engine.prop_all(key, time_ref))
            .await?;
        drop(lease);

        debug!(request_id = checked.request_id, %key, "propagation served");
        Ok(PropResponse {
            request_id: request.request_id.clone(),
            result: PropagationState::from_array(raw),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use vega_core::config::VegaConfig;
    use vega_core::error::{ErrorCategory, codes};
    use vega_core::model::{PropTask, Satellite, TimeType};
    use vega_engine::testkit::{MockEngine, tle_lines};

    use super::*;
    use crate::service::BuildInfo;

    fn service_with(engine: &Arc<MockEngine>) -> PropagationService {
        PropagationService::new(engine.clone(), VegaConfig::default(), BuildInfo::default())
    }

    fn iss_request(time: f64) -> PropRequest {
        let (line1, line2) = tle_lines(25_544);
        PropRequest {
            request_id: "req-prop-1".to_string(),
            time_type: Some(TimeType::Ds50),
            task: Some(PropTask {
                satellite: Some(Satellite {
                    name: Some("ISS (ZARYA)".to_string()),
                    line1,
                    line2,
                }),
                time: Some(time),
                epoch_utc: None,
            }),
        }
    }

    #[tokio::test]
    async fn prop_serves_the_eight_tuple_and_echoes_the_request_id() {
        let engine = Arc::new(MockEngine::new());
        let service = service_with(&engine);
        let response = service
            .prop(&CallContext::background(), &iss_request(27_744.5))
            .await
            .expect("传播应成功");

        assert_eq!(response.request_id, "req-prop-1");
        assert_eq!(response.result.ds50_utc, 27_744.5);
        assert_eq!(engine.calls().prop, 1, "适配层应恰好被调用一次");
        assert_eq!(
            service.registry().refs_of(25_544),
            Some(0),
            "响应返回后卫星应已释放"
        );
        service.close().await;
    }

    #[tokio::test]
    async fn prop_reuses_the_cached_satellite_across_calls() {
        let engine = Arc::new(MockEngine::new());
        let service = service_with(&engine);
        let ctx = CallContext::background();
        service.prop(&ctx, &iss_request(27_744.5)).await.expect("第一次");
        service.prop(&ctx, &iss_request(27_745.0)).await.expect("第二次");
        assert_eq!(engine.calls().add, 1, "第二次调用应命中注册表");
        assert_eq!(engine.calls().prop, 2);
        service.close().await;
    }

    #[tokio::test]
    async fn prop_maps_native_failures_to_internal() {
        let engine = Arc::new(MockEngine::new());
        let service = service_with(&engine);
        engine.fail_next_prop(5);
        let err = service
            .prop(&CallContext::background(), &iss_request(27_744.5))
            .await
            .expect_err("原生失败应上抛");
        assert_eq!(err.code(), codes::ENGINE_NATIVE_CALL);
        assert_eq!(err.category(), ErrorCategory::Internal);
        assert!(err.message().contains("rc 5"));
        assert_eq!(
            service.registry().refs_of(25_544),
            Some(0),
            "错误路径同样要释放卫星"
        );
        service.close().await;
    }

    #[tokio::test]
    async fn prop_rejects_invalid_requests_without_touching_the_engine() {
        let engine = Arc::new(MockEngine::new());
        let service = service_with(&engine);
        let err = service
            .prop(&CallContext::background(), &PropRequest::default())
            .await
            .expect_err("空请求应被拒绝");
        assert_eq!(err.category(), ErrorCategory::InvalidArgument);
        assert_eq!(engine.calls().add, 0);
        assert_eq!(engine.calls().prop, 0);
        service.close().await;
    }

    #[tokio::test]
    async fn prop_observes_cancellation_before_the_native_call() {
        let engine = Arc::new(MockEngine::new());
        let service = service_with(&engine);
        let ctx = CallContext::background();
        ctx.cancellation().cancel();
        let err = service
            .prop(&ctx, &iss_request(27_744.5))
            .await
            .expect_err("已取消的请求应失败");
        assert!(err.is_cancelled());
        assert_eq!(engine.calls().prop, 0, "原生传播不应被触发");
        service.close().await;
    }
}
