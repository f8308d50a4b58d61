//! 统一响应体

use serde::Serialize;

/// API 统一响应
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub success: bool,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    /// 创建成功响应
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            code: "SUCCESS".to_string(),
            message: "操作成功".to_string(),
            data: Some(data),
        }
    }

    /// 创建失败响应，仍附带数据（如重载诊断）
    pub fn failure(code: &str, message: impl Into<String>, data: T) -> Self {
        Self {
            success: false,
            code: code.to_string(),
            message: message.into(),
            data: Some(data),
        }
    }
}
