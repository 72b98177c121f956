//! 공유 도메인 타입
//!
//! 메트릭 종류([`MetricKind`])와 값 종류([`ValueKind`])는 컴파일러와
//! 런타임 스토어가 함께 사용하는 어휘이므로 core에 정의합니다.

use std::fmt;

use serde::{Deserialize, Serialize};

/// 메트릭 종류
///
/// DSL 선언 키워드(`counter`, `gauge`, ...)와 1:1로 대응합니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// 단조 증가 카운터
    Counter,
    /// 임의 증감 게이지
    Gauge,
    /// 타임스탬프/소요시간 기록
    Timer,
    /// 문자열 값
    Text,
    /// 버킷 분포
    Histogram,
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Counter => "counter",
            Self::Gauge => "gauge",
            Self::Timer => "timer",
            Self::Text => "text",
            Self::Histogram => "histogram",
        };
        f.write_str(s)
    }
}

/// 메트릭 값의 저장 형식
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    /// 64비트 정수
    Int,
    /// 64비트 부동소수점
    Float,
    /// UTF-8 문자열
    String,
    /// 히스토그램 버킷 벡터
    Buckets,
}

impl MetricKind {
    /// 이 메트릭 종류의 기본 저장 형식을 반환합니다.
    pub fn default_value_kind(self) -> ValueKind {
        match self {
            Self::Counter | Self::Timer => ValueKind::Int,
            Self::Gauge => ValueKind::Int,
            Self::Text => ValueKind::String,
            Self::Histogram => ValueKind::Buckets,
        }
    }
}
