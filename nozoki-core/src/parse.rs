//! パース関連のユーティリティ関数

use anyhow::Result;

/// `#n` 形式のインスタンス番号をパース
///
/// # Examples
/// ```
/// use nozoki_core::parse::parse_instance_index;
///
/// assert_eq!(parse_instance_index("#2").unwrap(), 2);
/// assert!(parse_instance_index("2").is_err());
/// ```
pub fn parse_instance_index(s: &str) -> Result<usize> {
    let s = s.trim();
    let digits = s
        .strip_prefix('#')
        .ok_or_else(|| anyhow::anyhow!("Invalid instance '{}': expected #<index>", s))?;
    digits
        .parse::<usize>()
        .map_err(|e| anyhow::anyhow!("Invalid instance '{}': {}", s, e))
}

/// on/off をパース
pub fn parse_on_off(s: &str) -> Result<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "on" | "true" | "1" | "yes" => Ok(true),
        "off" | "false" | "0" | "no" => Ok(false),
        other => Err(anyhow::anyhow!("Invalid switch '{}': expected on or off", other)),
    }
}

/// 個数をパース
pub fn parse_count(s: &str) -> Result<usize> {
    s.trim()
        .parse::<usize>()
        .map_err(|e| anyhow::anyhow!("Invalid count '{}': {}", s, e))
}
