//! 타임스탬프 파싱 — `strptime` 빌틴의 구현
//!
//! chrono의 strftime 형식을 사용합니다. 형식에 타임존이 없으면
//! `override_timezone` 설정(utc, local, 고정 오프셋)이 적용되고,
//! 연도가 없는 syslog류 타임스탬프는 `syslog_use_current_year` 설정에
//! 따라 현재 연도로 채워집니다.

use chrono::{DateTime, Datelike, FixedOffset, Local, NaiveDate, NaiveDateTime, TimeZone, Utc};

use crate::error::RuntimeError;

/// 타임존 적용 방식
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimezoneSpec {
    /// UTC로 해석 (기본)
    #[default]
    Utc,
    /// 시스템 로컬 타임존으로 해석
    Local,
    /// 고정 오프셋 (초 단위, 동쪽 양수)
    Fixed(i32),
}

impl TimezoneSpec {
    /// 설정 문자열을 파싱합니다. `utc`, `local`, `±HH:MM`.
    pub fn parse(spec: &str) -> Option<Self> {
        match spec {
            "utc" => Some(Self::Utc),
            "local" => Some(Self::Local),
            _ => {
                let bytes = spec.as_bytes();
                if bytes.len() != 6 || bytes[3] != b':' {
                    return None;
                }
                let sign = match bytes[0] {
                    b'+' => 1,
                    b'-' => -1,
                    _ => return None,
                };
                let hours: i32 = spec[1..3].parse().ok()?;
                let minutes: i32 = spec[4..6].parse().ok()?;
                Some(Self::Fixed(sign * (hours * 3600 + minutes * 60)))
            }
        }
    }
}

/// 타임스탬프 파싱 옵션
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeOptions {
    /// TZ 정보가 없을 때 적용할 타임존
    pub timezone: TimezoneSpec,
    /// 연도가 없는 형식에 현재 연도를 채움
    pub syslog_use_current_year: bool,
}

/// 문자열을 epoch 초로 파싱합니다.
///
/// 형식에 `%z`가 있으면 오프셋을 그대로 사용하고, 없으면 옵션의
/// 타임존을 적용합니다. 형식에 연도 지시자가 없으면 옵션에 따라
/// 현재 연도 또는 1970년으로 채웁니다.
pub fn strptime(input: &str, format: &str, opts: &TimeOptions) -> Result<i64, RuntimeError> {
    let err = |reason: String| RuntimeError::Strptime {
        input: input.to_owned(),
        format: format.to_owned(),
        reason,
    };

    // 오프셋이 형식에 포함된 경우 그대로 신뢰
    if format.contains("%z") || format.contains("%:z") {
        return DateTime::parse_from_str(input, format)
            .map(|dt| dt.timestamp())
            .map_err(|e| err(e.to_string()));
    }

    let has_year = format.contains("%Y") || format.contains("%y");
    let (owned_input, owned_format);
    let (input_eff, format_eff) = if has_year {
        (input, format)
    } else {
        let year = if opts.syslog_use_current_year {
            Utc::now().year()
        } else {
            1970
        };
        owned_input = format!("{input} {year}");
        owned_format = format!("{format} %Y");
        (owned_input.as_str(), owned_format.as_str())
    };

    let naive = NaiveDateTime::parse_from_str(input_eff, format_eff)
        .or_else(|_| {
            NaiveDate::parse_from_str(input_eff, format_eff)
                .map(|d| d.and_hms_opt(0, 0, 0).unwrap_or_default())
        })
        .map_err(|e| err(e.to_string()))?;

    let ts = match opts.timezone {
        TimezoneSpec::Utc => naive.and_utc().timestamp(),
        TimezoneSpec::Local => match Local.from_local_datetime(&naive).earliest() {
            Some(dt) => dt.timestamp(),
            None => return Err(err("ambiguous local time".to_owned())),
        },
        TimezoneSpec::Fixed(offset_secs) => {
            let offset = FixedOffset::east_opt(offset_secs)
                .ok_or_else(|| err(format!("invalid offset {offset_secs}")))?;
            match offset.from_local_datetime(&naive).earliest() {
                Some(dt) => dt.timestamp(),
                None => return Err(err("ambiguous local time".to_owned())),
            }
        }
    };
    Ok(ts)
}
