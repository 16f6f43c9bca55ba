//! # contract 模块说明
//!
//! ## 角色定位（Why）
//! - 统一表达“取消 + 截止”二元组：门闸等待、流式发送、后台轮询等所有挂起点
//!   都必须能被外部主动打断；
//! - 取消原语既要支持热路径上的无锁查询（原子位），又要支持异步等待
//!   （`Notify`），两种形态共享同一份状态。
//!
//! ## 行为契约（What）
//! - [`Cancellation::cancel`] 首次成功置位返回 `true`，并唤醒所有等待者；
//! - [`Cancellation::cancelled`] 在已取消时立即返回，否则挂起直到取消发生；
//! - [`Deadline`] 不会自动驱动取消，挂起点通过 [`CallContext::ensure_active`]
//!   在检查点同步判定。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::Notify;

use crate::error::{VegaError, codes};

/// 取消原语，原子位与通知器共享同一份状态。
///
/// # 教案式说明
/// - **意图 (Why)**：热路径需要无锁的 `is_cancelled` 查询，挂起点需要可 `await`
///   的等待形态；两者必须观察同一个取消事件；
/// - **执行 (How)**：`cancel` 通过 CAS 保证只有首次调用返回 `true`，随后唤醒
///   `Notify` 上的全部等待者；`cancelled` 采用“先登记、再复查、后等待”的顺序
///   避免登记窗口内的取消丢失唤醒；
/// - **契约 (What)**：克隆共享同一原子位；`child` 与克隆等价，保留派生语义命名；
/// - **风险 (Trade-offs)**：不提供回调注册，消费侧以 `select!` 组合等待。
#[derive(Clone, Debug)]
pub struct Cancellation {
    inner: Arc<CancellationState>,
}

#[derive(Debug, Default)]
struct CancellationState {
    flag: AtomicBool,
    notify: Notify,
}

impl Cancellation {
    /// 创建处于“未取消”状态的令牌。
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CancellationState::default()),
        }
    }

    /// 查询当前是否已被标记取消。
    pub fn is_cancelled(&self) -> bool {
        self.inner.flag.load(Ordering::Acquire)
    }

    /// 将令牌标记为取消并唤醒全部等待者。
    ///
    /// 返回 `true` 表示本次调用首次触发取消。
    pub fn cancel(&self) -> bool {
        let first = self
            .inner
            .flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if first {
            self.inner.notify.notify_waiters();
        }
        first
    }

    /// 挂起直到取消发生；若已取消则立即返回。
    ///
    /// # 教案式说明
    /// - **执行 (How)**：`Notified::enable` 先完成唤醒登记，再复查原子位；
    ///   取消若发生在登记之后，唤醒必达；若发生在复查之前，直接返回；
    /// - **契约 (What)**：该 future 可被 `select!` 安全丢弃并重建。
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        loop {
            let mut notified = std::pin::pin!(self.inner.notify.notified());
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// 派生共享同一取消位的子令牌。
    pub fn child(&self) -> Self {
        self.clone()
    }
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::new()
    }
}

/// 截止原语：可缺省的单调时钟绝对时间点。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Deadline {
    instant: Option<Instant>,
}

impl Deadline {
    /// 创建未设置截止时间的实例。
    pub const fn none() -> Self {
        Self { instant: None }
    }

    /// 根据绝对时间点构造截止时间。
    pub fn at(instant: Instant) -> Self {
        Self {
            instant: Some(instant),
        }
    }

    /// 以当前时间点加超时时长生成截止时间。
    pub fn with_timeout(now: Instant, timeout: Duration) -> Self {
        Self::at(now + timeout)
    }

    /// 返回内部时间点。
    pub fn instant(&self) -> Option<Instant> {
        self.instant
    }

    /// 判断是否已经超时；未设置截止时间时恒为 `false`。
    pub fn is_expired(&self, now: Instant) -> bool {
        match self.instant {
            Some(deadline) => now >= deadline,
            None => false,
        }
    }
}

/// 调用上下文：取消与截止的组合载体，贯穿所有公共接口。
///
/// # 教案式说明
/// - **意图 (Why)**：统一的上下文让每个挂起点共享同一份可中断性契约，处理链上
///   的任何一层都无须自行约定取消传播方式；
/// - **契约 (What)**：
///   - [`ensure_active`](Self::ensure_active) 在检查点同步判定取消与截止；
///   - [`cancelled`](Self::cancelled) 供 `select!` 组合的异步等待；
///   - 克隆为浅拷贝，取消位跨克隆共享；
/// - **风险 (Trade-offs)**：截止不会自动触发取消，外部宿主在截止后应调用
///   [`Cancellation::cancel`] 以打断正在挂起的等待。
#[derive(Clone, Debug, Default)]
pub struct CallContext {
    cancellation: Cancellation,
    deadline: Deadline,
}

impl CallContext {
    /// 创建上下文构建器。
    pub fn builder() -> CallContextBuilder {
        CallContextBuilder::default()
    }

    /// 创建永不取消、无截止时间的后台上下文。
    ///
    /// 注册表的清扫与驱逐属于维护性动作，使用后台上下文确保即便请求方已经
    /// 离开，资源回收仍能完成。
    pub fn background() -> Self {
        Self::default()
    }

    /// 获取取消原语。
    pub fn cancellation(&self) -> &Cancellation {
        &self.cancellation
    }

    /// 查询截止时间。
    pub fn deadline(&self) -> Deadline {
        self.deadline
    }

    /// 是否已被取消。
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// 挂起直到取消发生。
    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await;
    }

    /// 检查点判定：先取消后截止，返回首个违例。
    pub fn ensure_active(&self) -> Result<(), VegaError> {
        if self.cancellation.is_cancelled() {
            return Err(VegaError::new(
                codes::CALL_CANCELLED,
                "call cancelled by caller",
            ));
        }
        if self.deadline.is_expired(Instant::now()) {
            return Err(VegaError::new(codes::CALL_DEADLINE, "call deadline exceeded"));
        }
        Ok(())
    }
}

/// `CallContext` 构建器。
#[derive(Debug, Default)]
pub struct CallContextBuilder {
    cancellation: Cancellation,
    deadline: Deadline,
}

impl CallContextBuilder {
    /// 注入取消原语（通常来自外部传输层的请求上下文）。
    pub fn with_cancellation(mut self, cancellation: Cancellation) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// 设置截止时间。
    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = deadline;
        self
    }

    /// 构建上下文。
    pub fn build(self) -> CallContext {
        CallContext {
            cancellation: self.cancellation,
            deadline: self.deadline,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_reports_first_trigger_only() {
        let token = Cancellation::new();
        assert!(!token.is_cancelled());
        assert!(token.cancel(), "首次取消应返回 true");
        assert!(!token.cancel(), "重复取消应返回 false");
        assert!(token.is_cancelled());
    }

    #[test]
    fn clones_share_the_cancel_flag() {
        let token = Cancellation::new();
        let child = token.child();
        token.cancel();
        assert!(child.is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_returns_immediately_when_already_set() {
        let token = Cancellation::new();
        token.cancel();
        token.cancelled().await;
    }

    #[tokio::test]
    async fn cancelled_wakes_pending_waiter() {
        let token = Cancellation::new();
        let waiter = token.child();
        let handle = tokio::spawn(async move { waiter.cancelled().await });
        tokio::task::yield_now().await;
        token.cancel();
        handle.await.expect("等待任务应被唤醒并退出");
    }

    #[test]
    fn ensure_active_prefers_cancellation_over_deadline() {
        let ctx = CallContext::builder()
            .with_deadline(Deadline::at(Instant::now() - Duration::from_secs(1)))
            .build();
        ctx.cancellation().cancel();
        let err = ctx.ensure_active().expect_err("已取消的上下文应失败");
        assert_eq!(err.code(), codes::CALL_CANCELLED);
    }

    #[test]
    fn ensure_active_detects_expired_deadline() {
        let ctx = CallContext::builder()
            .with_deadline(Deadline::at(Instant::now() - Duration::from_millis(1)))
            .build();
        let err = ctx.ensure_active().expect_err("过期截止应失败");
        assert_eq!(err.code(), codes::CALL_DEADLINE);
    }

    #[test]
    fn background_context_is_always_active() {
        let ctx = CallContext::background();
        assert!(ctx.ensure_active().is_ok());
        assert!(!ctx.is_cancelled());
    }
}
