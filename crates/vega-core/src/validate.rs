//! 纯函数请求校验器。
//!
//! # 模块定位（Why）
//! - 两类入口（单点传播与流式星历）的输入不变式集中在此，按首个违例返回
//!   稳定的 `InvalidArgument` 错误；校验器无副作用，便于单测穷举分支；
//! - 校验通过后返回“已检视图”（`CheckedProp` / `CheckedEphem`），后续管线
//!   不再面对 `Option` 字段，也无须重复解析周期字符串。
//!
//! # 校验矩阵（What）
//! - 卫星：任务与卫星载荷必须存在，两行 TLE 均非空；
//! - 单点传播：UTC 与数值时刻互斥；未给 UTC 时必须给出枚举内的时刻类型
//!   与数值时刻；
//! - 流式星历：至少一个任务；参考系必须给出；公共网格与每个任务级网格都要
//!   通过冲突规则；每个任务必须存在可求解的网格（任务级优先于公共级）。

use chrono::{DateTime, Utc};

use crate::error::{VegaError, codes};
use crate::model::{EphemRequest, Frame, PropRequest, Satellite, TimeType};
use crate::time::{ResolvedGrid, TimeGridSpec};

/// 单点传播时刻的规范化表达。
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PropTime {
    /// UTC 时刻，管线在边界换算为 DS50。
    Utc(DateTime<Utc>),
    /// 根数历元起算分钟数。
    MinutesSinceEpoch(f64),
    /// DS50 天数。
    Ds50(f64),
}

/// 校验通过的单点传播请求视图。
#[derive(Debug)]
pub struct CheckedProp<'a> {
    pub request_id: &'a str,
    pub satellite: &'a Satellite,
    pub time: PropTime,
}

/// 校验通过的流式星历请求视图。
#[derive(Debug)]
pub struct CheckedEphem<'a> {
    pub request_id: &'a str,
    pub frame: Frame,
    pub tasks: Vec<CheckedEphemTask<'a>>,
}

/// 校验通过的流式星历任务视图，网格已求解为 DS50 起止与分钟步长。
#[derive(Debug)]
pub struct CheckedEphemTask<'a> {
    pub task_id: &'a str,
    pub satellite: &'a Satellite,
    pub grid: ResolvedGrid,
}

/// 卫星载荷校验：存在性与两行 TLE 非空。
pub fn validate_satellite(satellite: Option<&Satellite>) -> Result<&Satellite, VegaError> {
    let satellite = satellite.ok_or_else(|| {
        VegaError::new(codes::REQUEST_TASK_MISSING, "satellite payload is missing")
    })?;
    if satellite.line1.trim().is_empty() {
        return Err(VegaError::new(codes::REQUEST_INVALID, "TLE line 1 is empty"));
    }
    if satellite.line2.trim().is_empty() {
        return Err(VegaError::new(codes::REQUEST_INVALID, "TLE line 2 is empty"));
    }
    Ok(satellite)
}

/// 单点传播请求校验，返回已检视图。
///
/// # 教案式说明
/// - **契约 (What)**：按首个违例返回；全部违例映射 `InvalidArgument`；
/// - **执行 (How)**：先校验任务与卫星，再按“UTC 与数值互斥 → 未给 UTC 时
///   必须有枚举内时刻类型与数值时刻”的顺序判定时间表达。
pub fn checked_prop(request: &PropRequest) -> Result<CheckedProp<'_>, VegaError> {
    let task = request.task.as_ref().ok_or_else(|| {
        VegaError::new(codes::REQUEST_TASK_MISSING, "prop request has no task")
    })?;
    let satellite = validate_satellite(task.satellite.as_ref())?;

    if task.epoch_utc.is_some() && task.time.is_some() {
        return Err(VegaError::new(
            codes::REQUEST_INVALID,
            "prop time given in both UTC and numeric form",
        ));
    }
    let time = if let Some(utc) = task.epoch_utc {
        PropTime::Utc(utc)
    } else if let Some(value) = task.time {
        match request.time_type {
            Some(TimeType::MinutesSinceEpoch) => PropTime::MinutesSinceEpoch(value),
            Some(TimeType::Ds50) => PropTime::Ds50(value),
            None => {
                return Err(VegaError::new(
                    codes::REQUEST_INVALID,
                    "time type must be MSE or DS50 when no UTC timestamp is given",
                ));
            }
        }
    } else {
        return Err(VegaError::new(
            codes::REQUEST_INVALID,
            "prop task carries neither a numeric time nor a UTC timestamp",
        ));
    };

    Ok(CheckedProp {
        request_id: &request.request_id,
        satellite,
        time,
    })
}

/// 流式星历请求校验，返回已检视图（网格已求解）。
///
/// # 教案式说明
/// - **契约 (What)**：
///   - 至少一个任务、参考系必须给出；
///   - 公共网格即便被所有任务覆盖也要通过冲突规则；
///   - 任务级网格优先于公共网格；两者皆缺按不可解析处理；
/// - **执行 (How)**：网格求解复用 [`TimeGridSpec::resolve`]，周期解析失败等
///   价于校验失败，错误描述中带任务序号便于定位。
pub fn checked_ephem(request: &EphemRequest) -> Result<CheckedEphem<'_>, VegaError> {
    if request.tasks.is_empty() {
        return Err(VegaError::new(
            codes::REQUEST_TASK_MISSING,
            "ephem request has no tasks",
        ));
    }
    let frame = request.frame.ok_or_else(|| {
        VegaError::new(codes::REQUEST_INVALID, "frame must be ECI or J2K")
    })?;
    if let Some(common) = &request.common_grid {
        common.check().map_err(|err| annotate(err, "common grid"))?;
    }

    let mut tasks = Vec::with_capacity(request.tasks.len());
    for (index, task) in request.tasks.iter().enumerate() {
        let satellite = validate_satellite(task.satellite.as_ref())
            .map_err(|err| annotate(err, &format!("task {index}")))?;
        let grid_spec: &TimeGridSpec = match (&task.grid, &request.common_grid) {
            (Some(own), _) => own,
            (None, Some(common)) => common,
            (None, None) => {
                return Err(VegaError::new(
                    codes::TIME_GRID_UNRESOLVED,
                    format!("task {index} has no grid and no common grid is given"),
                ));
            }
        };
        let grid = grid_spec
            .resolve()
            .map_err(|err| annotate(err, &format!("task {index}")))?;
        tasks.push(CheckedEphemTask {
            task_id: &task.task_id,
            satellite,
            grid,
        });
    }

    Ok(CheckedEphem {
        request_id: &request.request_id,
        frame,
        tasks,
    })
}

/// 为错误描述补充定位前缀，码值保持不变。
fn annotate(err: VegaError, place: &str) -> VegaError {
    VegaError::new(err.code(), format!("{place}: {}", err.message()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EphemTask, PropTask};
    use chrono::TimeZone;

    fn satellite() -> Satellite {
        Satellite {
            name: Some("ISS (ZARYA)".to_string()),
            line1: "1 25544U 98067A   21275.52543210  .00005945  00000-0  11517-3 0  9992"
                .to_string(),
            line2: "2 25544  51.6443 263.0484 0004084 141.8231 354.9682 15.48861755305415"
                .to_string(),
        }
    }

    fn ds50_grid() -> TimeGridSpec {
        TimeGridSpec {
            start_ds50: Some(27_744.5),
            stop_ds50: Some(27_754.5),
            step_period: Some("PT8.5M".to_string()),
            ..TimeGridSpec::default()
        }
    }

    #[test]
    fn prop_with_ds50_time_passes() {
        let request = PropRequest {
            request_id: "req-1".to_string(),
            time_type: Some(TimeType::Ds50),
            task: Some(PropTask {
                satellite: Some(satellite()),
                time: Some(27_744.5),
                epoch_utc: None,
            }),
        };
        let checked = checked_prop(&request).expect("DS50 时刻应通过校验");
        assert_eq!(checked.request_id, "req-1");
        assert_eq!(checked.time, PropTime::Ds50(27_744.5));
    }

    #[test]
    fn prop_with_utc_needs_no_time_type() {
        let request = PropRequest {
            request_id: "req-2".to_string(),
            time_type: None,
            task: Some(PropTask {
                satellite: Some(satellite()),
                time: None,
                epoch_utc: Some(Utc.with_ymd_and_hms(2025, 12, 18, 0, 0, 0).unwrap()),
            }),
        };
        let checked = checked_prop(&request).expect("UTC 时刻应通过校验");
        assert!(matches!(checked.time, PropTime::Utc(_)));
    }

    #[test]
    fn prop_rejects_missing_task_and_satellite() {
        let err = checked_prop(&PropRequest::default()).expect_err("空请求应失败");
        assert_eq!(err.code(), codes::REQUEST_TASK_MISSING);

        let request = PropRequest {
            task: Some(PropTask::default()),
            ..PropRequest::default()
        };
        let err = checked_prop(&request).expect_err("缺卫星应失败");
        assert_eq!(err.code(), codes::REQUEST_TASK_MISSING);
    }

    #[test]
    fn prop_rejects_empty_tle_lines() {
        let request = PropRequest {
            time_type: Some(TimeType::Ds50),
            task: Some(PropTask {
                satellite: Some(Satellite {
                    line1: String::new(),
                    ..satellite()
                }),
                time: Some(27_744.5),
                epoch_utc: None,
            }),
            ..PropRequest::default()
        };
        let err = checked_prop(&request).expect_err("空 TLE 行应失败");
        assert_eq!(err.code(), codes::REQUEST_INVALID);
    }

    #[test]
    fn prop_rejects_conflicting_time_sources() {
        let request = PropRequest {
            time_type: Some(TimeType::Ds50),
            task: Some(PropTask {
                satellite: Some(satellite()),
                time: Some(27_744.5),
                epoch_utc: Some(Utc.with_ymd_and_hms(2025, 12, 18, 0, 0, 0).unwrap()),
            }),
            ..PropRequest::default()
        };
        let err = checked_prop(&request).expect_err("双时刻来源应失败");
        assert_eq!(err.code(), codes::REQUEST_INVALID);
    }

    #[test]
    fn prop_rejects_numeric_time_without_type() {
        let request = PropRequest {
            time_type: None,
            task: Some(PropTask {
                satellite: Some(satellite()),
                time: Some(27_744.5),
                epoch_utc: None,
            }),
            ..PropRequest::default()
        };
        let err = checked_prop(&request).expect_err("缺时刻类型应失败");
        assert_eq!(err.code(), codes::REQUEST_INVALID);
    }

    #[test]
    fn ephem_requires_tasks_and_frame() {
        let err = checked_ephem(&EphemRequest::default()).expect_err("空请求应失败");
        assert_eq!(err.code(), codes::REQUEST_TASK_MISSING);

        let request = EphemRequest {
            tasks: vec![EphemTask {
                task_id: "t0".to_string(),
                grid: Some(ds50_grid()),
                satellite: Some(satellite()),
            }],
            ..EphemRequest::default()
        };
        let err = checked_ephem(&request).expect_err("缺参考系应失败");
        assert_eq!(err.code(), codes::REQUEST_INVALID);
    }

    #[test]
    fn ephem_task_grid_overrides_common_grid() {
        let request = EphemRequest {
            request_id: "req-3".to_string(),
            frame: Some(Frame::J2k),
            common_grid: Some(TimeGridSpec {
                start_ds50: Some(27_000.0),
                stop_ds50: Some(27_001.0),
                dynamic_step: true,
                ..TimeGridSpec::default()
            }),
            tasks: vec![EphemTask {
                task_id: "t0".to_string(),
                grid: Some(ds50_grid()),
                satellite: Some(satellite()),
            }],
        };
        let checked = checked_ephem(&request).expect("任务级网格应生效");
        assert_eq!(checked.tasks[0].grid.step_minutes, 8.5);
    }

    #[test]
    fn ephem_falls_back_to_common_grid() {
        let request = EphemRequest {
            frame: Some(Frame::Eci),
            common_grid: Some(ds50_grid()),
            tasks: vec![EphemTask {
                task_id: "t0".to_string(),
                grid: None,
                satellite: Some(satellite()),
            }],
            ..EphemRequest::default()
        };
        let checked = checked_ephem(&request).expect("公共网格应兜底");
        assert_eq!(checked.tasks[0].grid.start_ds50, 27_744.5);
    }

    #[test]
    fn ephem_rejects_task_without_any_grid() {
        let request = EphemRequest {
            frame: Some(Frame::Eci),
            tasks: vec![EphemTask {
                task_id: "t0".to_string(),
                grid: None,
                satellite: Some(satellite()),
            }],
            ..EphemRequest::default()
        };
        let err = checked_ephem(&request).expect_err("无网格应失败");
        assert_eq!(err.code(), codes::TIME_GRID_UNRESOLVED);
    }

    #[test]
    fn ephem_checks_common_grid_even_when_overridden() {
        let request = EphemRequest {
            frame: Some(Frame::Eci),
            common_grid: Some(TimeGridSpec {
                start_ds50: Some(27_000.0),
                start_utc: Some(Utc.with_ymd_and_hms(2025, 12, 18, 0, 0, 0).unwrap()),
                stop_ds50: Some(27_001.0),
                dynamic_step: true,
                ..TimeGridSpec::default()
            }),
            tasks: vec![EphemTask {
                task_id: "t0".to_string(),
                grid: Some(ds50_grid()),
                satellite: Some(satellite()),
            }],
            ..EphemRequest::default()
        };
        let err = checked_ephem(&request).expect_err("冲突的公共网格应失败");
        assert_eq!(err.code(), codes::REQUEST_GRID_CONFLICT);
    }

    #[test]
    fn ephem_rejects_bad_step_period() {
        let mut grid = ds50_grid();
        grid.step_period = Some("PT5X".to_string());
        let request = EphemRequest {
            frame: Some(Frame::Eci),
            tasks: vec![EphemTask {
                task_id: "t0".to_string(),
                grid: Some(grid),
                satellite: Some(satellite()),
            }],
            ..EphemRequest::default()
        };
        let err = checked_ephem(&request).expect_err("非法周期应失败");
        assert_eq!(err.code(), codes::TIME_DURATION_INVALID);
    }
}
