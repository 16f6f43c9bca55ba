//! 流式星历管线。
//!
//! # 管线结构（How）
//! - 一个后台发送任务从有界 `mpsc` 通道取分片、按序转发给
//!   [`EphemSink`]；发送失败被闩存进单槽，任务随即停止；
//! - 生产侧按任务顺序逐一处理：取消检查 → 借出卫星 → 分片循环；
//!   分片循环每轮在门闸内调用一次 `gen_ephems`，产出分片经
//!   `select!`（投递 vs 取消）送入通道；
//! - 收尾：关闭通道 → 等待发送任务排空 → 闩存的发送错误在管线本身
//!   无错时上抛。
//!
//! # 流式契约（What）
//! - 任务内 `stream_chunk_id` 自 0 起连续递增；`stream_id` 等于任务在
//!   请求中的位置索引；分片不重排；
//! - 分片容量来自配置 `chunk_size`；通道容量来自 `channel_capacity`，
//!   分片生产不被任意慢的客户端无限阻塞——依靠取消终止卡死的流。

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use vega_core::contract::CallContext;
use vega_core::error::{VegaError, codes};
use vega_core::model::{EphemChunkResponse, EphemRequest, points_from_flat};
use vega_core::validate;
use vega_engine::adapter::RC_ALLOC_FAILURE;

use crate::service::PropagationService;

/// 流式结果的消费端，由外部传输层实现。
///
/// # 教案式说明
/// - **契约 (What)**：`send` 成功即表示分片已交给传输层；返回错误表示
///   流已不可用，管线会停止生产并在收尾时上抛该错误；
/// - **风险 (Trade-offs)**：实现方不应在 `send` 内做无界阻塞——生产侧
///   只依靠取消与通道关闭终止。
#[async_trait]
pub trait EphemSink: Send + Sync {
    /// 按序转发一个响应分片。
    async fn send(&self, chunk: EphemChunkResponse) -> Result<(), VegaError>;
}

impl PropagationService {
    /// 流式星历。
    ///
    /// # 教案式说明
    /// - **契约 (What)**：
    ///   - 校验失败映射 `InvalidArgument`，发生在取全局锁之前；
    ///   - 每个任务处理完（无论成败）其卫星即释放；
    ///   - 已投递的分片不回收：客户端在最后一个成功分片之后观察到错误；
    /// - **取消 (What)**：每个任务开始前与每次分片投递时检查；取消即
    ///   关闭通道、等待发送任务排空、返回取消错误。
    pub async fn ephem(
        &self,
        ctx: &CallContext,
        request: &EphemRequest,
        sink: Arc<dyn EphemSink>,
    ) -> Result<(), VegaError> {
        let checked = validate::checked_ephem(request)?;
        let _serial = self.global_mu().lock().await;

        let (tx, mut rx) = mpsc::channel::<EphemChunkResponse>(self.options().channel_capacity);
        let latched: Arc<Mutex<Option<VegaError>>> = Arc::new(Mutex::new(None));
        let sender = {
            let latched = Arc::clone(&latched);
            let sink = Arc::clone(&sink);
            tokio::spawn(async move {
                while let Some(chunk) = rx.recv().await {
                    if let Err(err) = sink.send(chunk).await {
                        warn!(error = %err, "result sink rejected a chunk; stopping the sender");
                        *latched.lock() = Some(err);
                        rx.close();
                        break;
                    }
                }
            })
        };

        let mut outcome: Result<(), VegaError> = Ok(());
        'tasks: for (task_index, task) in checked.tasks.iter().enumerate() {
            if let Err(err) = ctx.ensure_active() {
                outcome = Err(err);
                break;
            }
            let lease = match self
                .registry()
                .acquire(ctx, &task.satellite.line1, &task.satellite.line2)
                .await
            {
                Ok(lease) => lease,
                Err(err) => {
                    outcome = Err(err.into());
                    break;
                }
            };

            let key = lease.key();
            let grid = task.grid;
            let mut current = grid.start_ds50;
            let mut chunk_id: u64 = 0;
            loop {
                let frame = checked.frame;
                let chunk_cap = self.options().chunk_size;
                let step = match self
                    .gate()
                    .with_call(ctx, move |engine| {
                        let step = engine.gen_ephems(
                            key,
                            current,
                            grid.stop_ds50,
                            grid.step_minutes,
                            frame,
                            chunk_cap,
                        );
                        if step.rc == RC_ALLOC_FAILURE {
                            Err(step.rc)
                        } else {
                            Ok(step)
                        }
                    })
                    .await
                {
                    Ok(step) => step,
                    Err(err) => {
                        outcome = Err(err.into());
                        break 'tasks;
                    }
                };

                if step.rc != 0 && step.count == 0 {
                    outcome = Err(self.gate().native_error(step.rc).await.into());
                    break 'tasks;
                }
                if step.count > 0 {
                    let points = match points_from_flat(&step.flat) {
                        Ok(points) => points,
                        Err(err) => {
                            outcome = Err(err);
                            break 'tasks;
                        }
                    };
                    let chunk = EphemChunkResponse {
                        request_id: checked.request_id.to_string(),
                        stream_id: task_index as u32,
                        stream_chunk_id: chunk_id,
                        task_id: task.task_id.to_string(),
                        count: points.len(),
                        points,
                    };
                    chunk_id += 1;
                    tokio::select! {
                        // biased：取消与通道关闭同时就绪时，取消优先。
                        biased;
                        _ = ctx.cancelled() => {
                            outcome = Err(VegaError::new(
                                codes::CALL_CANCELLED,
                                "call cancelled during chunk delivery",
                            ));
                            break 'tasks;
                        }
                        sent = tx.send(chunk) => {
                            if sent.is_err() {
                                // 发送任务已因下游失败退出；闩存的错误在收尾上抛。
                                break 'tasks;
                            }
                        }
                    }
                }
                if step.done {
                    break;
                }
                current = step.next_start;
            }
            debug!(task_index, chunks = chunk_id, "ephemeris task drained");
            // 凭据在此随作用域结束释放。
        }

        drop(tx);
        let join = sender.await;
        let mut result = outcome;
        if result.is_ok() {
            if let Some(err) = latched.lock().take() {
                result = Err(err);
            }
        }
        if result.is_ok() && join.is_err() {
            result = Err(VegaError::new(
                codes::STREAM_SEND,
                "response sender task failed",
            ));
        }
        result
    }
}
