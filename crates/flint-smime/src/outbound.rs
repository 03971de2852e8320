//! 出站加密管线：材料盘点与正文重建。
//!
//! ## 模块目的（Why）
//! - 把“这个强度需要哪些材料”“材料齐了正文长什么样”两件事从管理器
//!   的编排逻辑中拆出来，使同步快路径与获取完成后的恢复路径共享同一
//!   份重建代码。
//!
//! ## 行为契约（What）
//! - [`missing_artifacts`] 按强度列出缺失材料，键是 `(AoR, 种类)`——
//!   获取请求的主体恒为材料归属者本人；
//! - [`build_outgoing_body`]：
//!   - `Sign` → 对整个正文做 `multipart/signed` 两件套；
//!   - `Encrypt` → 封包正文；若正文是 `multipart/alternative`，只封包
//!     末位（最优先）部件，其余部件原样保留；
//!   - `SignAndEncrypt` → 先按上述规则加密，再整体签名。

use flint_core::contents::Contents;
use flint_core::security::EncryptionLevel;
use flint_core::Aor;

use crate::error::SmimeError;
use crate::store::{ArtifactKind, Security};

/// 列出指定强度下尚缺的密钥材料。
pub(crate) fn missing_artifacts(
    security: &dyn Security,
    level: EncryptionLevel,
    sender: &Aor,
    recipient: &Aor,
) -> Vec<(Aor, ArtifactKind)> {
    let mut missing = Vec::new();
    let wants_signature = matches!(
        level,
        EncryptionLevel::Sign | EncryptionLevel::SignAndEncrypt
    );
    let wants_encryption = matches!(
        level,
        EncryptionLevel::Encrypt | EncryptionLevel::SignAndEncrypt
    );

    if wants_signature {
        if !security.has_user_cert(sender) {
            missing.push((sender.clone(), ArtifactKind::UserCert));
        }
        if !security.has_user_private_key(sender) {
            missing.push((sender.clone(), ArtifactKind::UserPrivateKey));
        }
    }
    if wants_encryption && !security.has_user_cert(recipient) {
        missing.push((recipient.clone(), ArtifactKind::UserCert));
    }
    missing
}

/// 按强度重建出站正文。调用前材料必须已经齐备。
pub(crate) fn build_outgoing_body(
    security: &dyn Security,
    level: EncryptionLevel,
    contents: &Contents,
    sender: &Aor,
    recipient: &Aor,
) -> Result<Contents, SmimeError> {
    match level {
        EncryptionLevel::None => Ok(contents.clone()),
        EncryptionLevel::Sign => security.sign(sender, contents),
        EncryptionLevel::Encrypt => encrypt_preferred(security, contents, recipient),
        EncryptionLevel::SignAndEncrypt => {
            let encrypted = encrypt_preferred(security, contents, recipient)?;
            security.sign(sender, &encrypted)
        }
    }
}

/// 封包正文；`multipart/alternative` 只封包最优先部件并保留其余。
fn encrypt_preferred(
    security: &dyn Security,
    contents: &Contents,
    recipient: &Aor,
) -> Result<Contents, SmimeError> {
    if let Contents::MultipartAlternative { parts } = contents
        && let Some(preferred) = parts.last()
    {
        let encrypted = security.encrypt(preferred, recipient)?;
        let mut rebuilt: Vec<Contents> = parts[..parts.len() - 1].to_vec();
        rebuilt.push(encrypted);
        return Ok(Contents::MultipartAlternative { parts: rebuilt });
    }
    security.encrypt(contents, recipient)
}
