use std::sync::LazyLock;

use regex::Regex;

use crate::error::{AppError, AppResult};

static E164: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+[1-9]\d{6,14}$").expect("E.164 pattern is valid"));

/// 验证 E.164 手机号格式 (+ 国家码 + 号码，最多 15 位数字)
pub fn validate_phone(phone: &str) -> AppResult<()> {
    if !E164.is_match(phone) {
        return Err(AppError::ValidationError(format!(
            "Invalid phone number {phone:?}, expected E.164 format (+4917600000000)"
        )));
    }
    Ok(())
}

/// 去掉空格、横线、括号等分隔符，`00` 前缀转为 `+`
pub fn normalize_phone(phone: &str) -> String {
    let trimmed = phone.trim();
    let digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();

    if trimmed.starts_with('+') {
        format!("+{digits}")
    } else if let Some(rest) = digits.strip_prefix("00") {
        format!("+{rest}")
    } else {
        trimmed.to_string()
    }
}

/// normalize + validate，返回可入库的手机号
pub fn parse_phone(phone: &str) -> AppResult<String> {
    let normalized = normalize_phone(phone);
    validate_phone(&normalized)?;
    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_phone() {
        assert!(validate_phone("+4917600000000").is_ok());
        assert!(validate_phone("+12345678901").is_ok());
        assert!(validate_phone("4917600000000").is_err());
        assert!(validate_phone("+0917600000000").is_err());
        assert!(validate_phone("+49176000000001234").is_err());
    }

    #[test]
    fn test_normalize_phone() {
        assert_eq!(normalize_phone("+49 176 0000 0000"), "+4917600000000");
        assert_eq!(normalize_phone("0049-176-00000000"), "+4917600000000");
        assert_eq!(normalize_phone("+1 (234) 567-8901"), "+12345678901");
        assert_eq!(normalize_phone("  +4917600000000 "), "+4917600000000");
    }

    #[test]
    fn test_parse_phone_rejects_local_numbers() {
        assert!(parse_phone("017600000000").is_err());
        assert_eq!(parse_phone("+49 176 00000000").unwrap(), "+4917600000000");
    }
}
