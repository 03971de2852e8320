//! S/MIME 特性错误类型。
//!
//! ## 角色定位（Why）
//! - 区分“本地材料缺失且无处获取”（走 415 路径）与“加解密原语本身
//!   失败”两类语义，便于管理器选择回执或降级策略；
//! - 与 `flint_core::error::codes` 的 `smime.*` 错误码对应。

use flint_core::error::{codes, StackError};

/// S/MIME 处理路径上的失败。
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SmimeError {
    /// 密钥材料缺失且没有配置远端证书仓库。
    #[error("no local keying material for `{aor}` and no remote certificate store")]
    NoCerts {
        /// 缺材料的 AoR。
        aor: String,
    },
    /// 报文缺少事务标识，异步获取无法关联。
    #[error("message has no transaction id to correlate certificate fetches")]
    MissingTransactionId,
    /// 同一事务标识上已存在挂起的安全操作。
    #[error("a pending security operation already exists for transaction `{transaction_id}`")]
    DuplicateTransaction {
        /// 冲突的事务标识。
        transaction_id: String,
    },
    /// 签名原语失败。
    #[error("signing as `{aor}` failed: {detail}")]
    SignFailed {
        /// 签名者 AoR。
        aor: String,
        /// 失败说明。
        detail: String,
    },
    /// 加密原语失败。
    #[error("encrypting for `{aor}` failed: {detail}")]
    EncryptFailed {
        /// 接收者 AoR。
        aor: String,
        /// 失败说明。
        detail: String,
    },
}

impl From<SmimeError> for StackError {
    fn from(value: SmimeError) -> Self {
        let code = match &value {
            SmimeError::NoCerts { .. } => codes::SMIME_NO_CERTS,
            _ => codes::SMIME_FETCH_FAILED,
        };
        StackError::new(code, value.to_string())
    }
}
