//! 逐报文安全属性。
//!
//! ## 角色定位（Why）
//! - S/MIME 特性与上游 Identity 处理器都要在报文上留下安全结论：
//!   谁签的名、签名可信度、是否解过密、出站要做到什么强度。
//!   本模块给这些结论一个统一的载体，避免各层私加字段。
//!
//! ## 行为契约（What）
//! - 属性块只由安全特性与 Identity 处理器修改；解密路径整体替换属性块
//!   时必须保留已有的 [`IdentityStrength`]（见
//!   [`SecurityAttributes::merge_preserving_identity_strength`]）。
//! - [`EncryptionLevel`] 描述出站意图；`encryption_performed` 防止同一
//!   报文被重复加密。
//!
//! ## 风险提示（Trade-offs）
//! - 属性块随报文克隆，字段保持 `Copy`/`Arc` 级轻量，避免热路径上的
//!   深拷贝成本。

use crate::aor::Aor;

/// 签名校验结论。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SignatureStatus {
    /// 尚未校验或不存在签名。
    #[default]
    None,
    /// 签名有效且签名者证书被直接信任。
    Trusted,
    /// 签名有效且证书链可追溯到受信 CA。
    CaTrusted,
    /// 签名结构有效但签名者不可信。
    NotTrusted,
    /// 签名校验失败。
    Bad,
}

/// 上游 Identity 处理器给出的身份强度。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum IdentityStrength {
    /// 仅来自 `From` 头部，未经任何校验。
    #[default]
    From,
    /// Identity 校验尝试过但失败。
    FailedIdentity,
    /// Identity 校验通过。
    Identity,
}

/// 出站加密强度。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EncryptionLevel {
    /// 不做任何处理。
    #[default]
    None,
    /// 仅签名。
    Sign,
    /// 仅加密。
    Encrypt,
    /// 先加密后签名。
    SignAndEncrypt,
}

/// 逐报文安全属性块。
#[derive(Clone, Debug, Default)]
pub struct SecurityAttributes {
    identity: Option<Aor>,
    signer: Option<Aor>,
    signature_status: SignatureStatus,
    encrypted: bool,
    identity_strength: IdentityStrength,
    outgoing_level: EncryptionLevel,
    encryption_performed: bool,
}

impl SecurityAttributes {
    /// 构造全默认的属性块。
    pub fn new() -> Self {
        Self::default()
    }

    /// 报文声称的身份（通常取自 `From` 的 AoR）。
    pub fn identity(&self) -> Option<&Aor> {
        self.identity.as_ref()
    }

    /// 设置身份。
    pub fn set_identity(&mut self, aor: Aor) {
        self.identity = Some(aor);
    }

    /// 签名者 AoR（校验签名后填充）。
    pub fn signer(&self) -> Option<&Aor> {
        self.signer.as_ref()
    }

    /// 设置签名者。
    pub fn set_signer(&mut self, aor: Aor) {
        self.signer = Some(aor);
    }

    /// 签名校验结论。
    pub fn signature_status(&self) -> SignatureStatus {
        self.signature_status
    }

    /// 设置签名结论。
    pub fn set_signature_status(&mut self, status: SignatureStatus) {
        self.signature_status = status;
    }

    /// 正文是否经历过解密。
    pub fn encrypted(&self) -> bool {
        self.encrypted
    }

    /// 标记解密发生过。
    pub fn set_encrypted(&mut self) {
        self.encrypted = true;
    }

    /// 身份强度。
    pub fn identity_strength(&self) -> IdentityStrength {
        self.identity_strength
    }

    /// 设置身份强度（Identity 处理器专用）。
    pub fn set_identity_strength(&mut self, strength: IdentityStrength) {
        self.identity_strength = strength;
    }

    /// 出站加密强度。
    pub fn outgoing_level(&self) -> EncryptionLevel {
        self.outgoing_level
    }

    /// 设置出站加密强度。
    pub fn set_outgoing_level(&mut self, level: EncryptionLevel) {
        self.outgoing_level = level;
    }

    /// 出站加密是否已经执行。
    pub fn encryption_performed(&self) -> bool {
        self.encryption_performed
    }

    /// 标记出站加密已执行，防止重复处理。
    pub fn set_encryption_performed(&mut self) {
        self.encryption_performed = true;
    }

    /// 用 `self` 整体替换 `previous`，同时保留对方的身份强度。
    ///
    /// # 教案式说明
    /// - **意图 (Why)**：Identity 处理器可能先于解密路径写入
    ///   `identity_strength`；解密重建属性块时覆盖它会丢失上游结论。
    /// - **契约 (What)**：返回以 `self` 为基底、`identity_strength`
    ///   取自 `previous` 的新属性块。
    pub fn merge_preserving_identity_strength(mut self, previous: &SecurityAttributes) -> Self {
        self.identity_strength = previous.identity_strength;
        self
    }
}
