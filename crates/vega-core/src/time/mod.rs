//! # 时间模型
//!
//! ## 模块定位（Why）
//! - 原生引擎内部以 DS50（自 1950-01-01 12:00:00 UTC 起的天数，含小数）为时标，
//!   外部请求则以 UTC 时间戳或 ISO-8601 周期表达；所有换算集中在此模块，
//!   保证“边界换算一次、内部只用 DS50”的纪律；
//! - 时间网格（起止 + 步长策略）的冲突判定与求解也属于时间模型的职责，
//!   校验器与星历管线共用同一份实现。
//!
//! ## 结构概览（What）
//! - 本文件：DS50 历元常量与 UTC ↔ DS50 换算；
//! - [`duration`]：ISO-8601 周期解析（`PnYnMnDTnHnMnS`，支持小数分量）；
//! - [`grid`]：[`grid::TimeGridSpec`] 的冲突规则与 [`grid::ResolvedGrid`] 求解。
//!
//! ## 精度约定（Trade-offs）
//! - DS50 以 `f64` 天数表达，在 [1950, 2100] 区间内往返误差小于 1 毫秒；
//! - 周期中的年/月采用无日历近似（年 = 365.25 天，月 = 365.25/12 天），
//!   轨道步长实践中只会用到 `PTnM`/`PTnS`，年/月仅为语法完整性保留。

use chrono::{DateTime, Utc};

pub mod duration;
pub mod grid;

pub use duration::IsoDuration;
pub use grid::{DYNAMIC_STEP_SENTINEL, ResolvedGrid, TimeGridSpec};

/// 每天的秒数。
pub const SECONDS_PER_DAY: f64 = 86_400.0;

/// 每天的分钟数，DS50 步长换算使用。
pub const MINUTES_PER_DAY: f64 = 1_440.0;

/// DS50 历元（1950-01-01T12:00:00Z）对应的 Unix 秒。
///
/// 1950-01-01 至 1970-01-01 共 7305 天，再回退 12 小时即 7304.5 天。
const DS50_EPOCH_UNIX_SECS: i64 = -631_108_800;

/// UTC 时间戳换算为 DS50 天数。
pub fn utc_to_ds50(at: DateTime<Utc>) -> f64 {
    let secs = at.timestamp() as f64 + f64::from(at.timestamp_subsec_nanos()) / 1e9;
    (secs - DS50_EPOCH_UNIX_SECS as f64) / SECONDS_PER_DAY
}

/// DS50 天数换算回 UTC 时间戳。
///
/// - **契约 (What)**：换算精度取纳秒量级；超出 `chrono` 可表示范围时返回 `None`；
/// - **执行 (How)**：拆分整秒与亚秒部分，避免大数乘法放大浮点误差。
pub fn ds50_to_utc(ds50: f64) -> Option<DateTime<Utc>> {
    let total_secs = ds50 * SECONDS_PER_DAY + DS50_EPOCH_UNIX_SECS as f64;
    if !total_secs.is_finite() {
        return None;
    }
    let secs = total_secs.floor();
    let nanos = ((total_secs - secs) * 1e9).round() as u32;
    let (secs, nanos) = if nanos >= 1_000_000_000 {
        (secs as i64 + 1, 0)
    } else {
        (secs as i64, nanos)
    };
    DateTime::<Utc>::from_timestamp(secs, nanos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn epoch_maps_to_zero() {
        let epoch = Utc.with_ymd_and_hms(1950, 1, 1, 12, 0, 0).unwrap();
        assert_eq!(utc_to_ds50(epoch), 0.0);
    }

    #[test]
    fn one_day_after_epoch_is_one() {
        let at = Utc.with_ymd_and_hms(1950, 1, 2, 12, 0, 0).unwrap();
        assert_eq!(utc_to_ds50(at), 1.0);
    }

    #[test]
    fn known_modern_timestamp() {
        // 2025-12-18T00:00:00Z：1950-01-01T12:00 起 27744.5 天。
        let at = Utc.with_ymd_and_hms(2025, 12, 18, 0, 0, 0).unwrap();
        assert!((utc_to_ds50(at) - 27_744.5).abs() < 1e-9);
    }

    #[test]
    fn round_trip_keeps_millisecond_precision() {
        let at = Utc.with_ymd_and_hms(2031, 7, 19, 3, 25, 41).unwrap()
            + chrono::Duration::milliseconds(337);
        let back = ds50_to_utc(utc_to_ds50(at)).expect("应在可表示范围内");
        let delta = (back - at).num_milliseconds().abs();
        assert!(delta <= 1, "往返偏差 {delta}ms 超出容忍");
    }

    #[test]
    fn non_finite_input_is_rejected() {
        assert!(ds50_to_utc(f64::NAN).is_none());
        assert!(ds50_to_utc(f64::INFINITY).is_none());
    }
}
