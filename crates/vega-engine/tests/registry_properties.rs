//! 注册表借用协议的性质验证
//!
//! # 教案级注释概览
//!
//! - **核心目标 (Why)**：对任意的 Acquire/Release 交错序列验证三条不变式：
//!   1. 每颗卫星的引用计数与影子模型始终一致，u32 表达下不可能为负；
//!   2. 任一时刻条目数不超过 `max(max_loaded, 在用卫星数)` —— 低于上限时
//!      严格受限，全员在用时允许按无背压策略临时超限；
//!   3. 静止（全部凭据释放）后所有条目 `refs == 0`。
//! - **设计手法 (How)**：Proptest 生成操作序列，影子模型只记“每颗卫星的
//!   在途凭据数”；每步操作后将注册表可观测状态与影子对账。凭据的释放
//!   路径即 `Drop`，与生产路径完全一致。
//! - **边界约定 (What)**：TTL 与清扫周期拉长到不会在测试窗口内触发，
//!   LRU 驱逐因此是唯一的回收来源。

use std::collections::HashMap;
use std::sync::Arc;

use proptest::prelude::*;

use vega_core::config::RegistryOptions;
use vega_core::contract::CallContext;
use vega_engine::gate::EngineGate;
use vega_engine::registry::{SatLease, SatelliteRegistry};
use vega_engine::testkit::{MockEngine, tle_lines};

const MAX_LOADED: usize = 2;
const SAT_NUMS: [u32; 4] = [11_111, 22_222, 33_333, 44_444];

#[derive(Clone, Debug)]
enum Op {
    /// 借用 `SAT_NUMS[i]`。
    Acquire(usize),
    /// 释放第 `i % len` 张在途凭据。
    Release(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0usize..SAT_NUMS.len()).prop_map(Op::Acquire),
        (0usize..8).prop_map(Op::Release),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        ..ProptestConfig::default()
    })]

    #[test]
    fn refs_and_ceiling_hold_under_arbitrary_interleavings(
        ops in prop::collection::vec(op_strategy(), 0..24),
    ) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .expect("应能创建测试运行时");
        rt.block_on(async move {
            let engine = Arc::new(MockEngine::new());
            let gate = Arc::new(EngineGate::new(engine.clone(), 1));
            let registry = SatelliteRegistry::new(
                gate,
                RegistryOptions {
                    max_loaded: MAX_LOADED,
                    idle_ttl_secs: 3_600,
                    sweep_interval_secs: 3_600,
                },
            );
            let ctx = CallContext::background();
            let mut leases: Vec<SatLease> = Vec::new();
            let mut shadow: HashMap<u32, u32> = HashMap::new();

            for op in ops {
                match op {
                    Op::Acquire(idx) => {
                        let sat_num = SAT_NUMS[idx];
                        let (line1, line2) = tle_lines(sat_num);
                        let lease = registry
                            .acquire(&ctx, &line1, &line2)
                            .await
                            .expect("借用应始终成功（无背压策略）");
                        assert_eq!(lease.sat_num(), sat_num);
                        *shadow.entry(sat_num).or_insert(0) += 1;
                        leases.push(lease);

                        let in_use = shadow.values().filter(|&&refs| refs > 0).count();
                        assert!(
                            registry.len() <= MAX_LOADED.max(in_use),
                            "条目数 {} 超出 max({MAX_LOADED}, 在用 {in_use})",
                            registry.len(),
                        );
                    }
                    Op::Release(raw) => {
                        if leases.is_empty() {
                            continue;
                        }
                        let index = raw % leases.len();
                        let lease = leases.swap_remove(index);
                        let sat_num = lease.sat_num();
                        if let Some(refs) = shadow.get_mut(&sat_num) {
                            *refs -= 1;
                        }
                        lease.release();
                    }
                }

                // 每步之后与影子模型对账：在用卫星的计数必须精确一致；
                // 已闲置的卫星可能被 LRU 回收，允许 None 或 Some(0)。
                for (&sat_num, &refs) in &shadow {
                    let actual = registry.refs_of(sat_num);
                    if refs > 0 {
                        assert_eq!(
                            actual,
                            Some(refs),
                            "卫星 {sat_num} 的计数应与影子模型一致"
                        );
                    } else {
                        assert!(
                            actual.is_none() || actual == Some(0),
                            "闲置卫星 {sat_num} 只能是未加载或计数为零"
                        );
                    }
                }
            }

            // 静止：释放全部凭据后所有条目计数归零。
            drop(leases);
            for stats in registry.loaded() {
                assert_eq!(stats.refs, 0, "静止时卫星 {} 计数应为零", stats.sat_num);
            }
            registry.close().await;
        });
    }
}
