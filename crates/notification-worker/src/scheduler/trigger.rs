//! 触发规则
//!
//! 支持三种触发方式：
//! - Cron: 标准 5 字段表达式（分 时 日 月 周），按 UTC 计算
//! - Interval: 固定间隔，错过的触发点不补发，下次触发保持在原始网格上
//! - OneShot: 指定时刻触发一次
//!
//! Cron 表达式先逐字段解析为取值集合，再规范化为 cron crate 的 6 字段格式。
//! 日与周同时受限时按传统 cron 语义取并集（任一匹配即触发）。

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use cron::Schedule;

use crate::error::NotificationError;

/// 间隔触发的最小粒度
const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// 调度方提交的触发规则
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerSpec {
    Cron(String),
    Interval(Duration),
    OneShot(DateTime<Utc>),
}

impl TriggerSpec {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Cron(_) => "cron",
            Self::Interval(_) => "interval",
            Self::OneShot(_) => "once",
        }
    }
}

// ---------------------------------------------------------------------------
// CronExpr
// ---------------------------------------------------------------------------

const DOW_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];
const MONTH_NAMES: [&str; 12] = [
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];

/// 已校验的 5 字段 cron 表达式
#[derive(Clone)]
pub struct CronExpr {
    source: String,
    /// 日/周同时受限时为两个调度取并集，否则只有一个
    schedules: Vec<Schedule>,
}

impl fmt::Debug for CronExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CronExpr").field(&self.source).finish()
    }
}

impl CronExpr {
    pub fn parse(expr: &str) -> Result<Self, NotificationError> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(NotificationError::invalid_trigger(format!(
                "cron 表达式必须为 5 个字段（分 时 日 月 周），实际 {} 个: {expr}",
                fields.len()
            )));
        }

        let minutes = parse_field(fields[0], 0, 59, &[], 0, "分钟")?;
        let hours = parse_field(fields[1], 0, 23, &[], 0, "小时")?;
        let days = parse_field(fields[2], 1, 31, &[], 0, "日期")?;
        let months = parse_field(fields[3], 1, 12, &MONTH_NAMES, 1, "月份")?;
        let weekdays: BTreeSet<u32> = parse_field(fields[4], 0, 7, &DOW_NAMES, 0, "星期")?
            .into_iter()
            .map(|d| d % 7)
            .collect();

        let minute = render_numeric(&minutes, 0, 59);
        let hour = render_numeric(&hours, 0, 23);
        let day = render_numeric(&days, 1, 31);
        let month = render_numeric(&months, 1, 12);
        let weekday = render_weekdays(&weekdays);

        let day_restricted = !fields[2].starts_with('*');
        let weekday_restricted = !fields[4].starts_with('*');

        let normalized = if day_restricted && weekday_restricted {
            vec![
                format!("0 {minute} {hour} {day} {month} *"),
                format!("0 {minute} {hour} * {month} {weekday}"),
            ]
        } else {
            vec![format!("0 {minute} {hour} {day} {month} {weekday}")]
        };

        let schedules = normalized
            .iter()
            .map(|s| {
                Schedule::from_str(s).map_err(|e| {
                    NotificationError::invalid_trigger(format!("cron 表达式无效: {expr}: {e}"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            source: expr.trim().to_string(),
            schedules,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// 严格晚于 `after` 的下一个匹配时刻
    pub fn next_after(&self, after: &DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedules
            .iter()
            .filter_map(|schedule| schedule.after(after).next())
            .min()
    }
}

impl FromStr for CronExpr {
    type Err = NotificationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// 解析单个字段为取值集合
///
/// 支持 `*`、单值、`a-b`、`a,b`、`*/n`、`a-b/n`、`a/n`，以及名称（不区分大小写）。
/// `name_offset` 为名称表第一个元素对应的数值。
fn parse_field(
    field: &str,
    min: u32,
    max: u32,
    names: &[&str],
    name_offset: u32,
    label: &str,
) -> Result<BTreeSet<u32>, NotificationError> {
    let invalid = |detail: String| {
        NotificationError::invalid_trigger(format!("{label}字段无效 `{field}`: {detail}"))
    };

    let value = |token: &str| -> Result<u32, NotificationError> {
        let parsed = match token.parse::<u32>() {
            Ok(v) => v,
            Err(_) => names
                .iter()
                .position(|n| n.eq_ignore_ascii_case(token))
                .map(|i| i as u32 + name_offset)
                .ok_or_else(|| invalid(format!("无法识别 `{token}`")))?,
        };
        if parsed < min || parsed > max {
            return Err(invalid(format!("{parsed} 超出范围 {min}-{max}")));
        }
        Ok(parsed)
    };

    let mut values = BTreeSet::new();
    for part in field.split(',') {
        if part.is_empty() {
            return Err(invalid("存在空的列表项".to_string()));
        }

        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step = step
                    .parse::<u32>()
                    .ok()
                    .filter(|s| *s > 0)
                    .ok_or_else(|| invalid(format!("步长 `{step}` 必须为正整数")))?;
                (range, Some(step))
            }
            None => (part, None),
        };

        let (start, end) = if range == "*" {
            (min, max)
        } else if let Some((a, b)) = range.split_once('-') {
            (value(a)?, value(b)?)
        } else {
            let v = value(range)?;
            // `a/n` 表示从 a 开始到上限
            if step.is_some() { (v, max) } else { (v, v) }
        };

        if start > end {
            return Err(invalid(format!("区间 {start}-{end} 起点大于终点")));
        }

        values.extend((start..=end).step_by(step.unwrap_or(1) as usize));
    }
    Ok(values)
}

fn render_numeric(values: &BTreeSet<u32>, min: u32, max: u32) -> String {
    if values.len() as u32 == max - min + 1 {
        return "*".to_string();
    }
    values
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// cron crate 的周字段以名称表达，避免数值编号的歧义
fn render_weekdays(values: &BTreeSet<u32>) -> String {
    if values.len() == 7 {
        return "*".to_string();
    }
    values
        .iter()
        .map(|d| DOW_NAMES[*d as usize])
        .collect::<Vec<_>>()
        .join(",")
}

// ---------------------------------------------------------------------------
// Trigger
// ---------------------------------------------------------------------------

/// 已编译的触发规则
#[derive(Debug, Clone)]
pub enum Trigger {
    Cron(CronExpr),
    Interval(TimeDelta),
    OneShot(DateTime<Utc>),
}

impl Trigger {
    /// 校验并编译触发规则，非法规则不会进入任务表
    pub fn compile(spec: TriggerSpec, now: DateTime<Utc>) -> Result<Self, NotificationError> {
        let trigger = match spec {
            TriggerSpec::Cron(expr) => Self::Cron(CronExpr::parse(&expr)?),
            TriggerSpec::Interval(interval) => {
                if interval < MIN_INTERVAL {
                    return Err(NotificationError::invalid_trigger(format!(
                        "间隔不能小于 {} 秒，实际 {interval:?}",
                        MIN_INTERVAL.as_secs()
                    )));
                }
                let delta = TimeDelta::from_std(interval)
                    .ok()
                    .filter(|delta| now.checked_add_signed(*delta).is_some())
                    .ok_or_else(|| {
                        NotificationError::invalid_trigger(format!(
                            "间隔 {}s 超出可表示范围",
                            interval.as_secs()
                        ))
                    })?;
                Self::Interval(delta)
            }
            TriggerSpec::OneShot(at) => {
                if at <= now {
                    return Err(NotificationError::invalid_trigger(format!(
                        "一次性触发时间 {at} 不晚于当前时间"
                    )));
                }
                Self::OneShot(at)
            }
        };

        if trigger.first_fire(now).is_none() {
            return Err(NotificationError::invalid_trigger(format!(
                "触发规则永远不会触发: {}",
                trigger.describe()
            )));
        }
        Ok(trigger)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Cron(_) => "cron",
            Self::Interval(_) => "interval",
            Self::OneShot(_) => "once",
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Cron(expr) => expr.source().to_string(),
            Self::Interval(delta) => format!("every {}s", delta.num_milliseconds() as f64 / 1000.0),
            Self::OneShot(at) => at.to_rfc3339(),
        }
    }

    /// 首次触发时间
    pub fn first_fire(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Cron(expr) => expr.next_after(&now),
            Self::Interval(delta) => now.checked_add_signed(*delta),
            Self::OneShot(at) => Some(*at),
        }
    }

    /// 在 `scheduled` 触发后、当前时间为 `now` 时的下次触发时间
    ///
    /// 结果严格晚于 now；一次性触发或超出时间范围时返回 None。
    pub fn next_fire(&self, scheduled: DateTime<Utc>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Cron(expr) => expr.next_after(&now),
            Self::Interval(delta) => advance_on_grid(scheduled, *delta, now),
            Self::OneShot(_) => None,
        }
    }

    /// 暂停后恢复时的下次触发时间
    pub fn resume_fire(&self, previous: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match (self, previous) {
            (Self::Interval(delta), Some(prev)) if prev <= now => advance_on_grid(prev, *delta, now),
            (Self::Cron(expr), _) => expr.next_after(&now),
            // 一次性任务恢复时若已过期，在下一轮立即触发
            (_, Some(prev)) => Some(prev),
            (_, None) => self.first_fire(now),
        }
    }
}

/// 从 `scheduled` 起按间隔推进到严格晚于 now 的第一个网格点
fn advance_on_grid(
    scheduled: DateTime<Utc>,
    delta: TimeDelta,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let next = scheduled.checked_add_signed(delta)?;
    if next > now {
        return Some(next);
    }
    let step_ms = delta.num_milliseconds();
    if step_ms <= 0 {
        return None;
    }
    let behind_ms = (now - next).num_milliseconds();
    let skips = behind_ms / step_ms + 1;
    let offset = step_ms.checked_mul(skips).and_then(TimeDelta::try_milliseconds)?;
    next.checked_add_signed(offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone, Timelike, Weekday};

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn test_every_thirty_minutes() {
        let expr = CronExpr::parse("*/30 * * * *").unwrap();

        let next = expr.next_after(&at(2024, 3, 10, 10, 5, 0)).unwrap();
        assert_eq!(next, at(2024, 3, 10, 10, 30, 0));

        // 在 :30 触发后下一次是下个整点
        let next = expr.next_after(&at(2024, 3, 10, 10, 30, 0)).unwrap();
        assert_eq!(next, at(2024, 3, 10, 11, 0, 0));
    }

    #[test]
    fn test_daily_at_nine() {
        let expr = CronExpr::parse("0 9 * * *").unwrap();
        assert_eq!(
            expr.next_after(&at(2024, 3, 10, 9, 0, 0)).unwrap(),
            at(2024, 3, 11, 9, 0, 0)
        );
        assert_eq!(
            expr.next_after(&at(2024, 3, 10, 8, 59, 59)).unwrap(),
            at(2024, 3, 10, 9, 0, 0)
        );
    }

    #[test]
    fn test_weekday_numbering_sunday_is_zero_and_seven() {
        // 2024-03-10 是周日
        let from = at(2024, 3, 9, 12, 0, 0);
        for expr in ["0 10 * * 0", "0 10 * * 7", "0 10 * * sun"] {
            let next = CronExpr::parse(expr).unwrap().next_after(&from).unwrap();
            assert_eq!(next.weekday(), Weekday::Sun, "{expr}");
            assert_eq!(next, at(2024, 3, 10, 10, 0, 0));
        }

        let monday = CronExpr::parse("0 10 * * 1").unwrap().next_after(&from).unwrap();
        assert_eq!(monday.weekday(), Weekday::Mon);
    }

    #[test]
    fn test_weekday_range_wrapping_to_seven() {
        let expr = CronExpr::parse("0 8 * * 5-7").unwrap();
        let mut t = at(2024, 3, 4, 0, 0, 0); // 周一
        let mut days = Vec::new();
        for _ in 0..3 {
            t = expr.next_after(&t).unwrap();
            days.push(t.weekday());
        }
        assert_eq!(days, vec![Weekday::Fri, Weekday::Sat, Weekday::Sun]);
    }

    #[test]
    fn test_day_of_month_or_day_of_week() {
        // 每月 15 日或每周一
        let expr = CronExpr::parse("0 0 15 * 1").unwrap();
        // 2024-03-12 周二 -> 下一个是 03-15（周五，按日期匹配）
        let next = expr.next_after(&at(2024, 3, 12, 0, 0, 0)).unwrap();
        assert_eq!(next, at(2024, 3, 15, 0, 0, 0));
        // 之后是 03-18（周一，按星期匹配）
        let next = expr.next_after(&next).unwrap();
        assert_eq!(next, at(2024, 3, 18, 0, 0, 0));
    }

    #[test]
    fn test_lists_ranges_and_steps() {
        let expr = CronExpr::parse("5,10-12 1-5/2 * jan-mar *").unwrap();
        let next = expr.next_after(&at(2024, 1, 1, 0, 0, 0)).unwrap();
        assert_eq!((next.hour(), next.minute()), (1, 5));
        let next = expr.next_after(&next).unwrap();
        assert_eq!((next.hour(), next.minute()), (1, 10));
        let next = expr.next_after(&at(2024, 1, 1, 1, 12, 0)).unwrap();
        assert_eq!((next.hour(), next.minute()), (3, 5));
        let next = expr.next_after(&at(2024, 3, 31, 23, 59, 0)).unwrap();
        assert_eq!(next, at(2025, 1, 1, 1, 5, 0));
    }

    #[test]
    fn test_invalid_cron_expressions() {
        for expr in [
            "",
            "* * * *",
            "* * * * * *",
            "60 * * * *",
            "* 24 * * *",
            "* * 0 * *",
            "* * * 13 *",
            "* * * * 8",
            "*/0 * * * *",
            "5-1 * * * *",
            "a * * * *",
            "1,,2 * * * *",
        ] {
            let err = CronExpr::parse(expr).unwrap_err();
            assert_eq!(err.code(), "INVALID_TRIGGER_SPEC", "{expr}");
        }
    }

    #[test]
    fn test_impossible_cron_rejected_at_compile() {
        let now = at(2024, 1, 1, 0, 0, 0);
        let err = Trigger::compile(TriggerSpec::Cron("0 0 31 2 *".into()), now).unwrap_err();
        assert_eq!(err.code(), "INVALID_TRIGGER_SPEC");
    }

    #[test]
    fn test_interval_backlog_advances_on_grid() {
        let start = at(2024, 1, 1, 0, 0, 0);
        let trigger = Trigger::compile(TriggerSpec::Interval(Duration::from_secs(60)), start).unwrap();
        let scheduled = trigger.first_fire(start).unwrap();
        assert_eq!(scheduled, at(2024, 1, 1, 0, 1, 0));

        // 唤醒延迟 185 秒
        let now = scheduled + TimeDelta::seconds(185);
        let next = trigger.next_fire(scheduled, now).unwrap();
        assert!(next > now);
        assert_eq!(next, scheduled + TimeDelta::seconds(240));
        assert_eq!((next - scheduled).num_seconds() % 60, 0);
    }

    #[test]
    fn test_interval_on_time_adds_one_interval() {
        let scheduled = at(2024, 1, 1, 0, 1, 0);
        let trigger = Trigger::Interval(TimeDelta::seconds(60));
        assert_eq!(
            trigger.next_fire(scheduled, scheduled).unwrap(),
            at(2024, 1, 1, 0, 2, 0)
        );
    }

    #[test]
    fn test_zero_interval_rejected() {
        let err = Trigger::compile(TriggerSpec::Interval(Duration::ZERO), Utc::now()).unwrap_err();
        assert_eq!(err.code(), "INVALID_TRIGGER_SPEC");
    }

    #[test]
    fn test_sub_second_interval_rejected() {
        let now = at(2024, 1, 1, 0, 0, 0);
        for interval in [Duration::from_nanos(1), Duration::from_micros(500), Duration::from_millis(999)] {
            let err = Trigger::compile(TriggerSpec::Interval(interval), now).unwrap_err();
            assert_eq!(err.code(), "INVALID_TRIGGER_SPEC", "{interval:?}");
        }
        assert!(Trigger::compile(TriggerSpec::Interval(Duration::from_secs(1)), now).is_ok());
    }

    #[test]
    fn test_huge_interval_rejected_without_panic() {
        let now = at(2024, 1, 1, 0, 0, 0);
        for secs in [100_000_000_000_000, u64::MAX] {
            let err = Trigger::compile(TriggerSpec::Interval(Duration::from_secs(secs)), now)
                .unwrap_err();
            assert_eq!(err.code(), "INVALID_TRIGGER_SPEC", "{secs}");
        }
    }

    #[test]
    fn test_interval_past_time_range_stops_firing() {
        // 可表示但再推进一次即越界
        let delta = TimeDelta::days(365 * 200_000);
        let trigger = Trigger::Interval(delta);
        let scheduled = DateTime::<Utc>::MAX_UTC - TimeDelta::days(365 * 100_000);
        assert_eq!(trigger.next_fire(scheduled, scheduled), None);
        assert_eq!(trigger.resume_fire(Some(scheduled), scheduled), None);
        assert_eq!(trigger.first_fire(scheduled), None);
    }

    #[test]
    fn test_past_one_shot_rejected() {
        let now = at(2024, 1, 1, 12, 0, 0);
        assert!(Trigger::compile(TriggerSpec::OneShot(now), now).is_err());
        assert!(Trigger::compile(TriggerSpec::OneShot(now - TimeDelta::seconds(1)), now).is_err());

        let future = Trigger::compile(TriggerSpec::OneShot(now + TimeDelta::seconds(1)), now).unwrap();
        assert_eq!(future.next_fire(now, now + TimeDelta::seconds(2)), None);
    }
}
