//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 为整个工作区提供统一的可观察错误形态：稳定错误码 + 人类可读描述 + 可选因果链；
//! - 外部传输层只认 [`ErrorCategory`] 四个分类（`InvalidArgument` / `Internal` /
//!   `Cancelled` / `Unavailable`），内部各层则通过码值做精确归因。
//!
//! ## 设计要求（What）
//! - 错误码为 `'static` 字符串，遵循 `<域>.<语义>` 命名并在 [`codes`] 模块集中登记；
//! - 分类默认由码值推导（见 [`default_category`]），个别调用点可显式覆盖；
//! - 引擎层与编排层的 `thiserror` 枚举通过 `From` 汇入 [`VegaError`]，
//!   使 `?` 运算符在跨层传播时直接生效。

use std::borrow::Cow;
use std::error::Error as StdError;
use std::fmt;

/// 稳定错误码清单。
///
/// # 教案式说明
/// - **意图 (Why)**：将全部对外可见的错误码集中声明，防止调用点散落的字符串漂移；
/// - **契约 (What)**：每个码值一经发布即冻结；新增语义必须新增码值而不是复用旧码；
/// - **风险 (Trade-offs)**：码值粒度偏细会抬高运维心智成本，本服务仅保留请求入口、
///   时间模型、原生引擎与流式管线四个域。
pub mod codes {
    /// 请求缺字段、字段冲突或枚举值非法。
    pub const REQUEST_INVALID: &str = "request.invalid";
    /// 请求缺少任务或卫星载荷。
    pub const REQUEST_TASK_MISSING: &str = "request.task.missing";
    /// 时间网格同一语义给出了多个来源（UTC 与 DS50，或多种步长）。
    pub const REQUEST_GRID_CONFLICT: &str = "request.grid.conflict";
    /// TLE 第一行编目号字段无法识别。
    pub const TLE_CATALOG_INVALID: &str = "tle.catalog.invalid";
    /// ISO-8601 周期字符串不可解析或解析结果非正。
    pub const TIME_DURATION_INVALID: &str = "time.duration.invalid";
    /// 时间网格缺少可解析的起止或步长。
    pub const TIME_GRID_UNRESOLVED: &str = "time.grid.unresolved";
    /// 配置记录不可解析。
    pub const CONFIG_INVALID: &str = "config.invalid";
    /// 原生库调用返回非零 rc。
    pub const ENGINE_NATIVE_CALL: &str = "engine.native.call";
    /// 原生库缓冲区分配失败（rc = -10）。
    pub const ENGINE_NATIVE_ALLOC: &str = "engine.native.alloc";
    /// 卫星注册表已关闭，不再受理借用。
    pub const REGISTRY_CLOSED: &str = "registry.closed";
    /// 调用方取消。
    pub const CALL_CANCELLED: &str = "call.cancelled";
    /// 调用截止时间已过。
    pub const CALL_DEADLINE: &str = "call.deadline";
    /// 流式响应发送失败（由发送任务闩存后统一上抛）。
    pub const STREAM_SEND: &str = "stream.send";
    /// 星历扁平数组长度不是 7 的倍数，属于硬性契约破坏。
    pub const STREAM_SHAPE: &str = "stream.shape";
}

/// 对外错误分类，外部传输层据此映射 RPC 状态码。
///
/// # 教案式说明
/// - **意图 (Why)**：内部错误码粒度细，传输层只需要四个稳定分类；
/// - **契约 (What)**：
///   - `InvalidArgument`：请求即错，重试同样失败；
///   - `Internal`：原生库或管线内部失败，不由核心重试；
///   - `Cancelled`：调用方取消或截止已过；
///   - `Unavailable`：服务正在退出（注册表已关闭）。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorCategory {
    InvalidArgument,
    Internal,
    Cancelled,
    Unavailable,
}

/// 按错误码推导默认分类。
///
/// - **契约 (What)**：未登记的码值回退为 `Internal`，提醒维护者补充映射；
/// - **执行 (How)**：静态匹配表，调用点可通过 [`VegaError::with_category`] 覆盖。
pub fn default_category(code: &str) -> ErrorCategory {
    match code {
        codes::REQUEST_INVALID
        | codes::REQUEST_TASK_MISSING
        | codes::REQUEST_GRID_CONFLICT
        | codes::TLE_CATALOG_INVALID
        | codes::TIME_DURATION_INVALID
        | codes::TIME_GRID_UNRESOLVED
        | codes::CONFIG_INVALID => ErrorCategory::InvalidArgument,
        codes::CALL_CANCELLED | codes::CALL_DEADLINE => ErrorCategory::Cancelled,
        codes::REGISTRY_CLOSED => ErrorCategory::Unavailable,
        _ => ErrorCategory::Internal,
    }
}

type ErrorCause = Box<dyn StdError + Send + Sync + 'static>;

/// 工作区统一的可观察错误形态。
///
/// # 教案式说明
/// - **意图 (Why)**：校验、解析、原生调用与流式发送的失败最终都要以同一种形态
///   交给外部传输层；稳定码值让日志与告警可以做精确聚合；
/// - **契约 (What)**：
///   - `code`：来自 [`codes`] 的 `'static` 字符串；
///   - `message`：面向排障人员的自然语言描述，不包含敏感信息；
///   - `cause`：可选底层原因，通过 [`std::error::Error::source`] 暴露完整链路；
///   - 分类默认由码值推导，可被 [`with_category`](Self::with_category) 覆盖；
/// - **风险 (Trade-offs)**：`message` 使用 `Cow` 以便静态文案零分配，动态拼装时
///   接受一次堆分配换取可读性。
#[derive(Debug)]
pub struct VegaError {
    code: &'static str,
    message: Cow<'static, str>,
    cause: Option<ErrorCause>,
    category: Option<ErrorCategory>,
}

impl VegaError {
    /// 构造错误。`code` 必须取自 [`codes`] 模块。
    pub fn new(code: &'static str, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code,
            message: message.into(),
            cause: None,
            category: None,
        }
    }

    /// 附带底层原因并返回新错误。
    pub fn with_cause(mut self, cause: impl StdError + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// 显式覆盖默认分类。
    pub fn with_category(mut self, category: ErrorCategory) -> Self {
        self.category = Some(category);
        self
    }

    /// 获取稳定错误码。
    pub fn code(&self) -> &'static str {
        self.code
    }

    /// 获取描述文本。
    pub fn message(&self) -> &str {
        &self.message
    }

    /// 获取对外分类；未显式覆盖时按码值推导。
    pub fn category(&self) -> ErrorCategory {
        self.category.unwrap_or_else(|| default_category(self.code))
    }

    /// 判断错误是否属于取消语义，便于编排层在优先级合并时识别。
    pub fn is_cancelled(&self) -> bool {
        self.category() == ErrorCategory::Cancelled
    }
}

impl fmt::Display for VegaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl StdError for VegaError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause
            .as_ref()
            .map(|boxed| boxed.as_ref() as &(dyn StdError + 'static))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_follows_code_by_default() {
        let err = VegaError::new(codes::REQUEST_INVALID, "missing frame");
        assert_eq!(err.category(), ErrorCategory::InvalidArgument);

        let err = VegaError::new(codes::ENGINE_NATIVE_CALL, "rc 5");
        assert_eq!(err.category(), ErrorCategory::Internal);

        let err = VegaError::new(codes::CALL_CANCELLED, "cancelled");
        assert!(err.is_cancelled());
    }

    #[test]
    fn explicit_category_overrides_lookup() {
        let err =
            VegaError::new(codes::REQUEST_INVALID, "boom").with_category(ErrorCategory::Internal);
        assert_eq!(err.category(), ErrorCategory::Internal);
    }

    #[test]
    fn display_carries_code_and_message() {
        let err = VegaError::new(codes::STREAM_SEND, "sink gone");
        assert_eq!(err.to_string(), "[stream.send] sink gone");
    }

    #[test]
    fn cause_is_exposed_through_source() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        let err = VegaError::new(codes::STREAM_SEND, "sink gone").with_cause(io);
        assert!(err.source().is_some(), "cause 应通过 source 暴露");
    }
}
