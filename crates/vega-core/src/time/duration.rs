//! ISO-8601 周期（`PnYnMnDTnHnMnS`）解析。
//!
//! # 模块定位（Why）
//! - 星历步长以周期字符串表达（如 `PT8.5M`），原生引擎则要求以分钟为单位的
//!   `f64` 步长；解析与换算集中在此，校验器与管线共用；
//! - 语法支持任意分量带小数（小数点或逗号），与常见客户端的序列化行为兼容。
//!
//! # 换算约定（Trade-offs）
//! - 年/月没有固定日历长度，此处采用无日历近似：年 = 365.25 天，
//!   月 = 365.25/12 天；轨道步长实践只用 `PTnM`/`PTnS`，年/月仅为语法完整性。

use crate::error::{VegaError, codes};

use super::MINUTES_PER_DAY;

/// 无日历近似下一年的天数。
pub const NOMINAL_YEAR_DAYS: f64 = 365.25;

/// 无日历近似下一个月的天数（年 / 12）。
pub const NOMINAL_MONTH_DAYS: f64 = NOMINAL_YEAR_DAYS / 12.0;

/// 解析后的 ISO-8601 周期，各分量独立保存以便不同粒度的换算。
///
/// # 教案式说明
/// - **契约 (What)**：分量均为非负 `f64`；[`as_minutes`](Self::as_minutes) 给出
///   原生步长所需的分钟值；
/// - **风险 (Trade-offs)**：分量不做归一化（90 秒不会折算成 1.5 分钟），
///   保留调用方书写形态，便于日志回显。
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct IsoDuration {
    pub years: f64,
    pub months: f64,
    pub days: f64,
    pub hours: f64,
    pub minutes: f64,
    pub seconds: f64,
}

impl IsoDuration {
    /// 解析 `PnYnMnDTnHnMnS` 形态的周期字符串。
    ///
    /// # 教案式说明
    /// - **契约 (What)**：
    ///   - 必须以 `P` 开头且至少含一个分量；
    ///   - 同一分量不得重复，分量顺序必须遵循规范（日期部分 Y→M→D，
    ///     时间部分 H→M→S）；
    ///   - `T` 之后必须跟至少一个时间分量；
    ///   - 小数分隔符接受 `.` 与 `,`；
    /// - **执行 (How)**：单趟扫描，数字缓冲在遇到设计符时落位；`T` 前后的
    ///   `M` 依上下文区分月与分钟；
    /// - **错误 (What)**：任何违例返回 [`codes::TIME_DURATION_INVALID`]。
    pub fn parse(input: &str) -> Result<Self, VegaError> {
        let invalid =
            |detail: String| VegaError::new(codes::TIME_DURATION_INVALID, detail);

        let rest = input
            .strip_prefix('P')
            .ok_or_else(|| invalid(format!("duration `{input}` must start with `P`")))?;
        if rest.is_empty() {
            return Err(invalid(format!("duration `{input}` has no components")));
        }

        let mut out = IsoDuration::default();
        let mut number = String::new();
        let mut in_time = false;
        // 设计符序位：日期部分 Y=0 M=1 D=2，时间部分 H=3 M=4 S=5。
        let mut last_slot: i8 = -1;
        let mut components = 0usize;

        for ch in rest.chars() {
            match ch {
                '0'..='9' => number.push(ch),
                '.' | ',' => number.push('.'),
                'T' => {
                    if in_time {
                        return Err(invalid(format!("duration `{input}` repeats `T`")));
                    }
                    if !number.is_empty() {
                        return Err(invalid(format!(
                            "duration `{input}` has a dangling number before `T`"
                        )));
                    }
                    in_time = true;
                }
                'Y' | 'M' | 'D' | 'H' | 'S' => {
                    let slot: i8 = match (ch, in_time) {
                        ('Y', false) => 0,
                        ('M', false) => 1,
                        ('D', false) => 2,
                        ('H', true) => 3,
                        ('M', true) => 4,
                        ('S', true) => 5,
                        _ => {
                            return Err(invalid(format!(
                                "designator `{ch}` is not valid in this part of `{input}`"
                            )));
                        }
                    };
                    if slot <= last_slot {
                        return Err(invalid(format!(
                            "designator `{ch}` is out of order in `{input}`"
                        )));
                    }
                    let value: f64 = number.parse().map_err(|_| {
                        invalid(format!("component `{number}{ch}` in `{input}` is not a number"))
                    })?;
                    number.clear();
                    last_slot = slot;
                    components += 1;
                    match slot {
                        0 => out.years = value,
                        1 => out.months = value,
                        2 => out.days = value,
                        3 => out.hours = value,
                        4 => out.minutes = value,
                        _ => out.seconds = value,
                    }
                }
                other => {
                    return Err(invalid(format!(
                        "unexpected character `{other}` in duration `{input}`"
                    )));
                }
            }
        }

        if !number.is_empty() {
            return Err(invalid(format!(
                "duration `{input}` ends with a dangling number"
            )));
        }
        if components == 0 {
            return Err(invalid(format!("duration `{input}` has no components")));
        }
        if in_time && last_slot < 3 {
            return Err(invalid(format!(
                "duration `{input}` has `T` but no time components"
            )));
        }

        Ok(out)
    }

    /// 换算为分钟，供原生步长使用。
    pub fn as_minutes(&self) -> f64 {
        let days =
            self.years * NOMINAL_YEAR_DAYS + self.months * NOMINAL_MONTH_DAYS + self.days;
        days * MINUTES_PER_DAY + self.hours * 60.0 + self.minutes + self.seconds / 60.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fractional_minutes_parse() {
        let d = IsoDuration::parse("PT8.5M").expect("PT8.5M 应可解析");
        assert_eq!(d.minutes, 8.5);
        assert_eq!(d.as_minutes(), 8.5);
    }

    #[test]
    fn comma_is_accepted_as_decimal_separator() {
        let d = IsoDuration::parse("PT1,5H").expect("逗号小数应可解析");
        assert_eq!(d.as_minutes(), 90.0);
    }

    #[test]
    fn date_and_time_parts_combine() {
        let d = IsoDuration::parse("P1DT12H").expect("P1DT12H 应可解析");
        assert_eq!(d.as_minutes(), 1.5 * 1_440.0);
    }

    #[test]
    fn month_and_minute_are_disambiguated_by_t() {
        let d = IsoDuration::parse("P1M").expect("月分量应可解析");
        assert_eq!(d.months, 1.0);
        let d = IsoDuration::parse("PT1M").expect("分钟分量应可解析");
        assert_eq!(d.minutes, 1.0);
    }

    #[test]
    fn seconds_convert_to_fractional_minutes() {
        let d = IsoDuration::parse("PT90S").expect("PT90S 应可解析");
        assert_eq!(d.as_minutes(), 1.5);
    }

    #[test]
    fn malformed_inputs_are_rejected() {
        for bad in [
            "", "P", "PT", "T8M", "P8", "PT8", "P1M2Y", "PT1S2M", "P1.2.3D", "PT5X", "P-1D",
            "P1DT",
        ] {
            assert!(
                IsoDuration::parse(bad).is_err(),
                "`{bad}` 应被判定为非法周期"
            );
        }
    }
}
