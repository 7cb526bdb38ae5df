use rand::Rng;

use crate::error::{AppError, AppResult};

/// 访问码字母表，去掉了容易混淆的 I / O / 0 / 1
pub const ACCESS_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
pub const ACCESS_CODE_LEN: usize = 6;
const ACCESS_CODE_MIN_LEN: usize = 4;
const ACCESS_CODE_MAX_LEN: usize = 12;

/// 生成 6 位访问码
pub fn generate_access_code() -> String {
    let mut rng = rand::thread_rng();
    (0..ACCESS_CODE_LEN)
        .map(|_| ACCESS_CODE_ALPHABET[rng.gen_range(0..ACCESS_CODE_ALPHABET.len())] as char)
        .collect()
}

/// 校验管理端录入的访问码 (只用于创建 / 修改凭证，提交时不校验格式)
pub fn validate_access_code(code: &str) -> AppResult<()> {
    if !(ACCESS_CODE_MIN_LEN..=ACCESS_CODE_MAX_LEN).contains(&code.len()) {
        return Err(AppError::ValidationError(format!(
            "Access code must be {ACCESS_CODE_MIN_LEN}-{ACCESS_CODE_MAX_LEN} characters"
        )));
    }
    if let Some(bad) = code
        .bytes()
        .find(|b| !ACCESS_CODE_ALPHABET.contains(b))
    {
        return Err(AppError::ValidationError(format!(
            "Access code contains unsupported character {:?}",
            bad as char
        )));
    }
    Ok(())
}
