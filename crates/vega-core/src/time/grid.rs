//! 时间网格：起止边界 + 步长策略的线缆形状与求解。
//!
//! # 模块定位（Why）
//! - 请求中的网格允许以 UTC 或 DS50 表达起止、以三种互斥策略表达步长；
//!   冲突判定与求解集中在此，校验器与星历管线引用同一份规则；
//! - 求解结果 [`ResolvedGrid`] 只含 DS50 天数与分钟步长，管线之后不再接触
//!   UTC 或周期字符串。
//!
//! # 策略约定（What）
//! - 步长三选一：动态（引擎自选，编码为哨兵 -1）、已知周期（ISO-8601，
//!   换算为分钟）、已知 DS50（天数小数，×1440 换算为分钟）；
//! - 同一语义给出多个来源（UTC 与 DS50 起点并存、多种步长并存）判为冲突；
//! - 任务级网格存在时覆盖请求级公共网格，两者皆缺为校验失败（由调用方
//!   在模型层落实，本模块只管单个网格）。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{VegaError, codes};

use super::{IsoDuration, MINUTES_PER_DAY, utc_to_ds50};

/// 动态步长传给原生引擎的哨兵值。
pub const DYNAMIC_STEP_SENTINEL: f64 = -1.0;

/// 时间网格的线缆形状：字段可缺省，冲突与缺失由 [`check`](Self::check) 判定。
///
/// # 教案式说明
/// - **意图 (Why)**：保持与外部传输层一致的“可缺字段”形状，让校验器能够对
///   缺失与冲突给出稳定的首个违例；
/// - **契约 (What)**：起止各自接受 UTC 或 DS50 之一；步长接受
///   `step_period` / `step_days` / `dynamic_step` 之一；
/// - **风险 (Trade-offs)**：字段公开以便传输层直接构造，不变式由
///   [`check`](Self::check) / [`resolve`](Self::resolve) 把守而非类型系统。
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct TimeGridSpec {
    /// UTC 起点，与 `start_ds50` 互斥。
    pub start_utc: Option<DateTime<Utc>>,
    /// UTC 终点，与 `stop_ds50` 互斥。
    pub stop_utc: Option<DateTime<Utc>>,
    /// DS50 起点（天）。
    pub start_ds50: Option<f64>,
    /// DS50 终点（天）。
    pub stop_ds50: Option<f64>,
    /// ISO-8601 周期步长，如 `PT8.5M`。
    pub step_period: Option<String>,
    /// DS50 步长（天，小数），换算为分钟传给引擎。
    pub step_days: Option<f64>,
    /// 动态步长：由引擎自选输出节奏。
    pub dynamic_step: bool,
}

/// 求解后的网格：DS50 起止与分钟步长（动态为 -1）。
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ResolvedGrid {
    pub start_ds50: f64,
    pub stop_ds50: f64,
    pub step_minutes: f64,
}

impl TimeGridSpec {
    /// 冲突与缺失判定，返回首个违例。
    ///
    /// - **契约 (What)**：起点、终点、步长三个语义各自必须恰好有一个来源；
    /// - **错误 (What)**：同语义多来源 → [`codes::REQUEST_GRID_CONFLICT`]；
    ///   来源缺失 → [`codes::TIME_GRID_UNRESOLVED`]。
    pub fn check(&self) -> Result<(), VegaError> {
        if self.start_utc.is_some() && self.start_ds50.is_some() {
            return Err(VegaError::new(
                codes::REQUEST_GRID_CONFLICT,
                "grid start given in both UTC and DS50",
            ));
        }
        if self.stop_utc.is_some() && self.stop_ds50.is_some() {
            return Err(VegaError::new(
                codes::REQUEST_GRID_CONFLICT,
                "grid stop given in both UTC and DS50",
            ));
        }
        let step_sources = usize::from(self.step_period.is_some())
            + usize::from(self.step_days.is_some())
            + usize::from(self.dynamic_step);
        if step_sources > 1 {
            return Err(VegaError::new(
                codes::REQUEST_GRID_CONFLICT,
                "grid step given by more than one policy",
            ));
        }
        if self.start_utc.is_none() && self.start_ds50.is_none() {
            return Err(VegaError::new(
                codes::TIME_GRID_UNRESOLVED,
                "grid start is missing",
            ));
        }
        if self.stop_utc.is_none() && self.stop_ds50.is_none() {
            return Err(VegaError::new(
                codes::TIME_GRID_UNRESOLVED,
                "grid stop is missing",
            ));
        }
        if step_sources == 0 {
            return Err(VegaError::new(
                codes::TIME_GRID_UNRESOLVED,
                "grid step is missing",
            ));
        }
        Ok(())
    }

    /// 求解为 DS50 起止与分钟步长；UTC 边界在此换算。
    ///
    /// - **前置条件**：无；内部先执行 [`check`](Self::check)；
    /// - **后置条件**：返回的步长要么为正分钟数，要么为动态哨兵 -1；
    ///   终点早于起点判为不可解析。
    pub fn resolve(&self) -> Result<ResolvedGrid, VegaError> {
        self.check()?;
        let start_ds50 = self
            .start_ds50
            .or_else(|| self.start_utc.map(utc_to_ds50))
            .ok_or_else(|| {
                VegaError::new(codes::TIME_GRID_UNRESOLVED, "grid start is missing")
            })?;
        let stop_ds50 = self
            .stop_ds50
            .or_else(|| self.stop_utc.map(utc_to_ds50))
            .ok_or_else(|| {
                VegaError::new(codes::TIME_GRID_UNRESOLVED, "grid stop is missing")
            })?;
        if stop_ds50 < start_ds50 {
            return Err(VegaError::new(
                codes::TIME_GRID_UNRESOLVED,
                "grid stop precedes grid start",
            ));
        }
        let step_minutes = if self.dynamic_step {
            DYNAMIC_STEP_SENTINEL
        } else if let Some(period) = &self.step_period {
            let minutes = IsoDuration::parse(period)?.as_minutes();
            if minutes <= 0.0 {
                return Err(VegaError::new(
                    codes::TIME_DURATION_INVALID,
                    format!("step period `{period}` resolves to a non-positive interval"),
                ));
            }
            minutes
        } else if let Some(days) = self.step_days {
            if !(days > 0.0) {
                return Err(VegaError::new(
                    codes::TIME_GRID_UNRESOLVED,
                    "DS50 step must be a positive number of days",
                ));
            }
            days * MINUTES_PER_DAY
        } else {
            return Err(VegaError::new(
                codes::TIME_GRID_UNRESOLVED,
                "grid step is missing",
            ));
        };
        Ok(ResolvedGrid {
            start_ds50,
            stop_ds50,
            step_minutes,
        })
    }
}
