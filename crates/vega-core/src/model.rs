//! 请求/响应数据模型。
//!
//! # 模块定位（Why）
//! - 与外部传输层交换的形状集中在此：字段可缺省（`Option`）以便校验器对
//!   缺失与冲突给出稳定的首个违例，而不是在反序列化阶段丢失现场；
//! - 星历点与传播结果的“扁平数组 ↔ 结构化点”换算也属于数据模型的职责，
//!   长度不是 7 的倍数属于硬性契约破坏。
//!
//! # 流式契约（What）
//! - 单个任务（`stream_id`）内 `stream_chunk_id` 自 0 起连续递增、无空洞；
//! - 每个分片声明的 `count` 等于实际携带的点数；
//! - 分片始终携带来源 `request_id` 与 `task_id`，服务端不重排分片。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{VegaError, codes};
use crate::time::TimeGridSpec;

/// 传播时刻的表达方式。
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum TimeType {
    /// 根数历元起算的分钟数。
    MinutesSinceEpoch,
    /// DS50 天数。
    Ds50,
}

/// 输出状态矢量的参考系。
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Frame {
    /// 真赤道真春分点地心惯性系。
    Eci,
    /// J2000 地心惯性系。
    J2k,
}

/// 卫星载荷：两行根数与可选命名。
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct Satellite {
    /// 可选的人类可读名称，仅用于日志。
    pub name: Option<String>,
    /// TLE 第一行。
    pub line1: String,
    /// TLE 第二行。
    pub line2: String,
}

/// 单点传播请求。
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct PropRequest {
    /// 调用方关联标识，响应中原样回显。
    pub request_id: String,
    /// 数值时刻的类型；提供 UTC 时刻时可缺省。
    pub time_type: Option<TimeType>,
    /// 传播任务。
    pub task: Option<PropTask>,
}

/// 单点传播任务。
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct PropTask {
    /// 目标卫星。
    pub satellite: Option<Satellite>,
    /// 数值时刻（按 `time_type` 解释），与 `epoch_utc` 互斥。
    pub time: Option<f64>,
    /// UTC 时刻，与 `time` 互斥；提供时服务端换算为 DS50。
    pub epoch_utc: Option<DateTime<Utc>>,
}

/// 单点传播的状态矢量（八元组）。
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct PropagationState {
    /// DS50 时刻（天）。
    pub ds50_utc: f64,
    /// 根数历元起算分钟数。
    pub minutes_since_epoch: f64,
    /// 位置（km）。
    pub position: [f64; 3],
    /// 速度（km/s）。
    pub velocity: [f64; 3],
}

impl PropagationState {
    /// 从原生八元组 `[t_ds50, t_mse, x, y, z, vx, vy, vz]` 构造。
    pub fn from_array(raw: [f64; 8]) -> Self {
        Self {
            ds50_utc: raw[0],
            minutes_since_epoch: raw[1],
            position: [raw[2], raw[3], raw[4]],
            velocity: [raw[5], raw[6], raw[7]],
        }
    }
}

/// 单点传播响应。
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PropResponse {
    /// 回显请求标识。
    pub request_id: String,
    /// 传播结果。
    pub result: PropagationState,
}

/// 星历点（七元组）。
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct EphemerisPoint {
    /// DS50 时刻（天）。
    pub ds50_utc: f64,
    /// 位置（km）。
    pub position: [f64; 3],
    /// 速度（km/s）。
    pub velocity: [f64; 3],
}

/// 将原生扁平数组换算为星历点序列。
///
/// # 教案式说明
/// - **契约 (What)**：长度必须是 7 的倍数，`L` 个元素产出 `L/7` 个点；
///   其余长度属于原生适配层的硬性契约破坏，返回
///   [`codes::STREAM_SHAPE`]（分类 `Internal`）；
/// - **执行 (How)**：`chunks_exact(7)` 保证不越界，剩余元素触发错误分支。
pub fn points_from_flat(flat: &[f64]) -> Result<Vec<EphemerisPoint>, VegaError> {
    if flat.len() % 7 != 0 {
        return Err(VegaError::new(
            codes::STREAM_SHAPE,
            format!(
                "ephemeris buffer length {} is not a multiple of 7",
                flat.len()
            ),
        ));
    }
    Ok(flat
        .chunks_exact(7)
        .map(|chunk| EphemerisPoint {
            ds50_utc: chunk[0],
            position: [chunk[1], chunk[2], chunk[3]],
            velocity: [chunk[4], chunk[5], chunk[6]],
        })
        .collect())
}

/// 流式星历请求。
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct EphemRequest {
    /// 调用方关联标识，每个分片原样回显。
    pub request_id: String,
    /// 输出参考系。
    pub frame: Option<Frame>,
    /// 请求级公共时间网格；任务级网格存在时被覆盖。
    pub common_grid: Option<TimeGridSpec>,
    /// 任务列表，按给定顺序处理。
    pub tasks: Vec<EphemTask>,
}

/// 流式星历任务。
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct EphemTask {
    /// 任务标识，分片中回显。
    pub task_id: String,
    /// 任务级时间网格，优先于公共网格。
    pub grid: Option<TimeGridSpec>,
    /// 目标卫星。
    pub satellite: Option<Satellite>,
}

/// 流式星历的响应分片。
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct EphemChunkResponse {
    /// 回显请求标识。
    pub request_id: String,
    /// 任务在请求中的位置索引。
    pub stream_id: u32,
    /// 任务内自 0 起连续递增的分片序号。
    pub stream_chunk_id: u64,
    /// 回显任务标识。
    pub task_id: String,
    /// 本分片携带的星历点。
    pub points: Vec<EphemerisPoint>,
    /// 点数，恒等于 `points.len()`。
    pub count: usize,
}

/// Info 操作的响应。
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct InfoResponse {
    pub service_name: String,
    pub version: String,
    pub commit_hash: String,
    pub build_date: String,
    /// 原生天体力学库的识别串。
    pub native_lib_info_astro: String,
    /// 原生 SGP4 库的识别串。
    pub native_lib_info_sgp4: String,
    /// 响应生成时刻。
    pub timestamp_utc: DateTime<Utc>,
}
