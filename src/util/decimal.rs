//! 십진수 정밀 연산 유틸리티
//!
//! 원장 금액/수량 계산은 전부 이 모듈을 거칩니다. 문자열로 인코딩된
//! 십진수를 `rust_decimal::Decimal`로 파싱하여 부동소수점 오차 없이
//! 사칙연산과 비교를 수행합니다.

use std::cmp::Ordering;
use std::str::FromStr;

use rust_decimal::Decimal;
use thiserror::Error;

/// 십진수 연산 오류
#[derive(Debug, Error)]
pub enum DecimalError {
    #[error("십진수 파싱 실패: {0}")]
    Parse(String),
    #[error("0으로 나눌 수 없음")]
    DivisionByZero,
    #[error("십진수 연산 오버플로")]
    Overflow,
}

/// 문자열 십진수 파싱
pub fn parse(value: &str) -> Result<Decimal, DecimalError> {
    Decimal::from_str(value.trim()).map_err(|_| DecimalError::Parse(value.to_string()))
}

/// 십진수를 정규화된 문자열로 변환 (지수 표기 없음, 불필요한 0 제거)
pub fn format(value: Decimal) -> String {
    value.normalize().to_string()
}

/// 문자열 십진수 덧셈
pub fn add(a: &str, b: &str) -> Result<String, DecimalError> {
    let result = parse(a)?.checked_add(parse(b)?).ok_or(DecimalError::Overflow)?;
    Ok(format(result))
}

/// 문자열 십진수 뺄셈
pub fn sub(a: &str, b: &str) -> Result<String, DecimalError> {
    let result = parse(a)?.checked_sub(parse(b)?).ok_or(DecimalError::Overflow)?;
    Ok(format(result))
}

/// 문자열 십진수 곱셈
pub fn mul(a: &str, b: &str) -> Result<String, DecimalError> {
    let result = parse(a)?.checked_mul(parse(b)?).ok_or(DecimalError::Overflow)?;
    Ok(format(result))
}

/// 문자열 십진수 나눗셈 (0 나누기 검사 포함)
pub fn div(a: &str, b: &str) -> Result<String, DecimalError> {
    let divisor = parse(b)?;
    if divisor.is_zero() {
        return Err(DecimalError::DivisionByZero);
    }
    let result = parse(a)?.checked_div(divisor).ok_or(DecimalError::Overflow)?;
    Ok(format(result))
}

/// 문자열 십진수 비교
pub fn compare(a: &str, b: &str) -> Result<Ordering, DecimalError> {
    Ok(parse(a)?.cmp(&parse(b)?))
}

/// 수량을 로트 단위로 내림 (호가 집계용)
pub fn quantize_down(value: Decimal, step: Decimal) -> Decimal {
    if step.is_zero() {
        return value;
    }
    (value / step).floor() * step
}
