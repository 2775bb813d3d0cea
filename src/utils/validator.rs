use anyhow::Result;
use url::Url;

use crate::config::Config;
use crate::core::error::DownloadError;

pub fn is_valid_url(url: &str) -> bool {
    parse_download_url(url).is_ok()
}

/// 解析下载地址，只接受带主机名的 http/https URL
pub fn parse_download_url(url: &str) -> Result<Url, DownloadError> {
    let parsed = Url::parse(url.trim()).map_err(|_| DownloadError::InvalidUrl(url.to_string()))?;
    match parsed.scheme() {
        "http" | "https" if parsed.host_str().is_some() => Ok(parsed),
        _ => Err(DownloadError::InvalidUrl(url.to_string())),
    }
}

/// 解析命令行中 `名称: 值` 形式的请求头
pub fn parse_header(raw: &str) -> Result<(String, String)> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| anyhow::anyhow!("请求头格式应为 `名称: 值`: {}", raw))?;
    let name = name.trim();
    if name.is_empty() || name.contains(char::is_whitespace) {
        anyhow::bail!("无效的请求头名称: {}", raw);
    }
    Ok((name.to_string(), value.trim().to_string()))
}

pub fn validate_output_path(path: &str) -> Result<()> {
    if path.trim().is_empty() {
        anyhow::bail!("输出路径不能为空");
    }
    Ok(())
}

pub fn validate_config(config: &Config) -> Result<()> {
    config.validate()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_validation() {
        assert!(is_valid_url("https://example.com"));
        assert!(is_valid_url("http://example.com/file.zip"));
        assert!(!is_valid_url("ftp://example.com/file.zip"));
        assert!(!is_valid_url("invalid-url"));
        assert!(!is_valid_url("http://"));
    }

    #[test]
    fn test_header_parsing() {
        let (name, value) = parse_header("Authorization: Bearer abc").unwrap();
        assert_eq!(name, "Authorization");
        assert_eq!(value, "Bearer abc");

        assert!(parse_header("no-colon").is_err());
        assert!(parse_header(": value").is_err());
        assert!(parse_header("bad name: value").is_err());
    }

    #[test]
    fn test_output_path_validation() {
        assert!(validate_output_path("./file.bin").is_ok());
        assert!(validate_output_path("   ").is_err());
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&Config::default()).is_ok());
    }
}
