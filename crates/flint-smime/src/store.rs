//! 证书仓库与安全原语的外部契约。
//!
//! ## 模块目的（Why）
//! - S/MIME 特性不自带密码学实现：签名、加密、验签与解密通过
//!   [`Security`] 契约注入，远端证书获取通过 [`CertStore`] 契约注入；
//!   这使得核心流程可以用内存替身完整测试。
//!
//! ## 行为契约（What）
//! - [`CertStore::fetch`] 异步生效：实现方最终要向特性的事件入口投递
//!   一条 [`CertMessage`]（成功或失败都要回）；关联键是
//!   [`MessageId`]（事务标识 + AoR + 材料种类）；
//! - [`Security`] 的材料写入是“每 AoR + 种类写一次”的幂等操作，仅由
//!   特性事件线程调用；
//! - 所有 DER 字节以 [`Bytes`] 传递，实现方不得假设其生命周期。

use bytes::Bytes;
use flint_core::contents::Contents;
use flint_core::security::SignatureStatus;
use flint_core::Aor;

use crate::error::SmimeError;

/// 远端可获取的密钥材料种类。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    /// 用户证书。
    UserCert,
    /// 用户私钥。
    UserPrivateKey,
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArtifactKind::UserCert => f.write_str("user certificate"),
            ArtifactKind::UserPrivateKey => f.write_str("user private key"),
        }
    }
}

/// 证书获取的关联键。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MessageId {
    /// 发起操作的事务标识。
    pub transaction_id: String,
    /// 材料归属的 AoR。
    pub aor: Aor,
    /// 材料种类。
    pub kind: ArtifactKind,
}

/// 证书仓库回投的获取结果。
#[derive(Clone, Debug)]
pub struct CertMessage {
    /// 对应请求的关联键。
    pub id: MessageId,
    /// 获取是否成功。
    pub success: bool,
    /// 成功时的 DER 字节。
    pub body: Bytes,
}

/// 远端证书仓库契约。
pub trait CertStore: Send + Sync {
    /// 发起一次异步获取；结果最终以 [`CertMessage`] 回到特性入口。
    fn fetch(&self, aor: &Aor, kind: ArtifactKind, id: MessageId);
}

/// 验签结论：载荷、签名者与可信度。
#[derive(Clone, Debug)]
pub struct SignatureCheck {
    /// 被签名的载荷。
    pub payload: Contents,
    /// 识别出的签名者。
    pub signer: Option<Aor>,
    /// 可信度结论。
    pub status: SignatureStatus,
}

/// 安全原语契约：材料仓库加 CMS 操作。
pub trait Security: Send + Sync {
    /// 本地是否已有 `aor` 的用户证书。
    fn has_user_cert(&self, aor: &Aor) -> bool;

    /// 本地是否已有 `aor` 的用户私钥。
    fn has_user_private_key(&self, aor: &Aor) -> bool;

    /// 写入 DER 编码的用户证书（每 AoR 写一次，重复写入忽略）。
    fn add_user_cert_der(&self, aor: &Aor, der: Bytes);

    /// 写入 DER 编码的用户私钥（每 AoR 写一次，重复写入忽略）。
    fn add_user_private_key_der(&self, aor: &Aor, der: Bytes);

    /// 以 `aor` 的身份对载荷做分离式签名，产出 `multipart/signed` 树。
    fn sign(&self, aor: &Aor, contents: &Contents) -> Result<Contents, SmimeError>;

    /// 为 `recipient` 加密载荷，产出 CMS 封包叶子。
    fn encrypt(&self, contents: &Contents, recipient: &Aor) -> Result<Contents, SmimeError>;

    /// 用 `aor` 的私钥解开 CMS 封包；材料不足或封包不可解时返回 `None`。
    fn decrypt(&self, aor: &Aor, envelope: &Bytes) -> Option<Contents>;

    /// 校验 `multipart/signed` 的两件套，返回载荷与可信度。
    fn check_signature(&self, parts: &[Contents]) -> SignatureCheck;
}
