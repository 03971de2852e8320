//! 内存版安全原语替身。
//!
//! ## 角色定位（Why）
//! - 真实的 CMS/X.509 绑定不在本工作区范围内；本模块提供一个结构上
//!   诚实、可逆的替身，使签名/加密/解密/验签的编排逻辑（包括属性
//!   往返与树重建）可以在测试里完整走通。
//!
//! ## 行为契约（What）
//! - 材料存储基于 `DashMap`，进程级共享、线程安全；写入是“每 AoR +
//!   种类一次”的幂等操作，重复写入被忽略；
//! - [`InMemoryVault::sign`] 产出真正的 `MultipartSigned{载荷, 签名}`
//!   两件套，签名携带签名者与对载荷的结构摘要；
//! - [`InMemoryVault::encrypt`] / [`InMemoryVault::decrypt`] 以自描述
//!   封包互逆：封包头记录接收者与载荷 MIME，解包要求持有接收者私钥；
//! - 验签重算结构摘要：摘要不匹配为 `Bad`；匹配时按
//!   [`InMemoryVault::set_verdict`] 的预置结论或证书在库情况给出
//!   `Trusted` / `NotTrusted`。
//!
//! ## 风险提示（Trade-offs）
//! - 摘要是 FNV-1a 的结构哈希，仅用于测试期的完整性检查，不具备任何
//!   密码学强度；生产部署必须替换为真实 [`Security`] 绑定。

use bytes::Bytes;
use dashmap::DashMap;
use flint_core::contents::{Contents, Mime};
use flint_core::security::SignatureStatus;
use flint_core::Aor;
use tracing::debug;

use crate::error::SmimeError;
use crate::store::{Security, SignatureCheck};

const ENVELOPE_MAGIC: &str = "vault-env";
const SIGNATURE_MAGIC: &str = "vault-sig";

/// 基于 `DashMap` 的内存材料库与替身原语。
#[derive(Debug, Default)]
pub struct InMemoryVault {
    certs: DashMap<Aor, Bytes>,
    keys: DashMap<Aor, Bytes>,
    verdicts: DashMap<Aor, SignatureStatus>,
}

impl InMemoryVault {
    /// 构造空库。
    pub fn new() -> Self {
        Self::default()
    }

    /// 测试便捷入口：一次性注入某身份的证书与私钥。
    pub fn with_identity(self, aor: &Aor) -> Self {
        self.certs.insert(aor.clone(), stub_der(aor, "cert"));
        self.keys.insert(aor.clone(), stub_der(aor, "key"));
        self
    }

    /// 预置某签名者的验签结论（如 `CaTrusted`），覆盖默认推导。
    pub fn set_verdict(&self, aor: &Aor, status: SignatureStatus) {
        self.verdicts.insert(aor.clone(), status);
    }
}

/// 生成测试用的占位 DER 字节。
pub fn stub_der(aor: &Aor, role: &str) -> Bytes {
    Bytes::from(format!("der:{role}:{aor}"))
}

/// 结构摘要：与 multipart 边界无关，对同构树稳定。
fn digest(contents: &Contents) -> u64 {
    let mut hash = 0xcbf2_9ce4_8422_2325u64;
    digest_into(contents, &mut hash);
    hash
}

fn digest_into(contents: &Contents, hash: &mut u64) {
    fnv(hash, contents.kind_name().as_bytes());
    match contents {
        Contents::Opaque { mime, data } => {
            fnv(hash, mime.to_string().as_bytes());
            fnv(hash, data);
        }
        Contents::Pkcs7 { data } => fnv(hash, data),
        Contents::MultipartSigned { parts }
        | Contents::MultipartAlternative { parts }
        | Contents::MultipartMixed { parts }
        | Contents::MultipartRelated { parts } => {
            for part in parts {
                digest_into(part, hash);
            }
        }
    }
}

fn fnv(hash: &mut u64, bytes: &[u8]) {
    for byte in bytes {
        *hash ^= u64::from(*byte);
        *hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
}

impl Security for InMemoryVault {
    fn has_user_cert(&self, aor: &Aor) -> bool {
        self.certs.contains_key(aor)
    }

    fn has_user_private_key(&self, aor: &Aor) -> bool {
        self.keys.contains_key(aor)
    }

    fn add_user_cert_der(&self, aor: &Aor, der: Bytes) {
        if self.certs.contains_key(aor) {
            debug!(target: "flint::smime", %aor, "证书已存在，忽略重复写入");
            return;
        }
        self.certs.insert(aor.clone(), der);
    }

    fn add_user_private_key_der(&self, aor: &Aor, der: Bytes) {
        if self.keys.contains_key(aor) {
            debug!(target: "flint::smime", %aor, "私钥已存在，忽略重复写入");
            return;
        }
        self.keys.insert(aor.clone(), der);
    }

    fn sign(&self, aor: &Aor, contents: &Contents) -> Result<Contents, SmimeError> {
        if !self.has_user_cert(aor) || !self.has_user_private_key(aor) {
            return Err(SmimeError::SignFailed {
                aor: aor.to_string(),
                detail: "signer material missing".into(),
            });
        }
        let signature = format!("{SIGNATURE_MAGIC};signer={aor};digest={:016x}", digest(contents));
        Ok(Contents::MultipartSigned {
            parts: vec![
                contents.clone(),
                Contents::Opaque {
                    mime: Mime::new("application", "pkcs7-signature").with_param("name", "smime.p7s"),
                    data: Bytes::from(signature),
                },
            ],
        })
    }

    fn encrypt(&self, contents: &Contents, recipient: &Aor) -> Result<Contents, SmimeError> {
        if !self.has_user_cert(recipient) {
            return Err(SmimeError::EncryptFailed {
                aor: recipient.to_string(),
                detail: "recipient certificate missing".into(),
            });
        }
        let (mime, payload) = contents.encode();
        let mut envelope =
            format!("{ENVELOPE_MAGIC};recipient={recipient};mime={mime}\n").into_bytes();
        envelope.extend_from_slice(&payload);
        Ok(Contents::Pkcs7 {
            data: Bytes::from(envelope),
        })
    }

    fn decrypt(&self, aor: &Aor, envelope: &Bytes) -> Option<Contents> {
        let newline = envelope.iter().position(|b| *b == b'\n')?;
        let header = std::str::from_utf8(&envelope[..newline]).ok()?;
        // `mime=` 必须是最后一个字段：载荷 MIME 自身可能携带分号参数。
        let rest = header.strip_prefix(ENVELOPE_MAGIC)?;
        let rest = rest.strip_prefix(";recipient=")?;
        let (recipient, mime_text) = rest.split_once(";mime=")?;
        if recipient != aor.as_str() {
            debug!(target: "flint::smime", %aor, "封包接收者不匹配，放弃解密");
            return None;
        }
        if !self.has_user_private_key(aor) {
            debug!(target: "flint::smime", %aor, "缺少接收者私钥，放弃解密");
            return None;
        }
        let mime = Mime::parse(mime_text).ok()?;
        let payload = envelope.slice(newline + 1..);
        Contents::parse(&mime, &payload).ok()
    }

    fn check_signature(&self, parts: &[Contents]) -> SignatureCheck {
        let payload = parts.first().cloned().unwrap_or_else(|| Contents::plain_text(""));
        let bad = |signer: Option<Aor>| SignatureCheck {
            payload: payload.clone(),
            signer,
            status: SignatureStatus::Bad,
        };

        let Some(Contents::Opaque { data, .. }) = parts.get(1) else {
            return bad(None);
        };
        let Ok(text) = std::str::from_utf8(data) else {
            return bad(None);
        };
        let mut signer = None;
        let mut claimed_digest = None;
        let mut magic_seen = false;
        for segment in text.split(';') {
            if segment == SIGNATURE_MAGIC {
                magic_seen = true;
            } else if let Some(value) = segment.strip_prefix("signer=") {
                signer = Some(Aor::new(value));
            } else if let Some(value) = segment.strip_prefix("digest=") {
                claimed_digest = u64::from_str_radix(value, 16).ok();
            }
        }
        if !magic_seen || claimed_digest != Some(digest(&payload)) {
            return bad(signer);
        }

        let status = match &signer {
            Some(aor) => match self.verdicts.get(aor) {
                Some(verdict) => *verdict,
                None if self.has_user_cert(aor) => SignatureStatus::Trusted,
                None => SignatureStatus::NotTrusted,
            },
            None => SignatureStatus::Bad,
        };
        SignatureCheck {
            payload,
            signer,
            status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aor(text: &str) -> Aor {
        Aor::new(text)
    }

    #[test]
    fn encrypt_then_decrypt_roundtrips() {
        let alice = aor("alice@a.example");
        let vault = InMemoryVault::new().with_identity(&alice);
        let body = Contents::plain_text("secret agenda");

        let Contents::Pkcs7 { data } = vault.encrypt(&body, &alice).unwrap() else {
            panic!("加密应产出 CMS 封包叶子");
        };
        let decrypted = vault.decrypt(&alice, &data).expect("持钥者应能解开");
        assert_eq!(decrypted, body);
    }

    #[test]
    fn decrypt_requires_matching_recipient_and_key() {
        let alice = aor("alice@a.example");
        let mallory = aor("mallory@m.example");
        let vault = InMemoryVault::new().with_identity(&alice).with_identity(&mallory);
        let Contents::Pkcs7 { data } = vault
            .encrypt(&Contents::plain_text("for alice"), &alice)
            .unwrap()
        else {
            unreachable!()
        };
        assert!(vault.decrypt(&mallory, &data).is_none(), "非接收者不得解包");
    }

    #[test]
    fn signature_verifies_and_reports_signer() {
        let bob = aor("bob@b.example");
        let vault = InMemoryVault::new().with_identity(&bob);
        let body = Contents::plain_text("signed note");
        let Contents::MultipartSigned { parts } = vault.sign(&bob, &body).unwrap() else {
            panic!("签名应产出 multipart/signed");
        };
        let check = vault.check_signature(&parts);
        assert_eq!(check.payload, body);
        assert_eq!(check.signer, Some(bob));
        assert_eq!(check.status, SignatureStatus::Trusted);
    }

    #[test]
    fn tampered_payload_yields_bad_status() {
        let bob = aor("bob@b.example");
        let vault = InMemoryVault::new().with_identity(&bob);
        let Contents::MultipartSigned { mut parts } =
            vault.sign(&bob, &Contents::plain_text("original")).unwrap()
        else {
            unreachable!()
        };
        parts[0] = Contents::plain_text("tampered");
        let check = vault.check_signature(&parts);
        assert_eq!(check.status, SignatureStatus::Bad);
    }

    #[test]
    fn verdict_override_supports_ca_trusted() {
        let bob = aor("bob@b.example");
        let vault = InMemoryVault::new().with_identity(&bob);
        vault.set_verdict(&bob, SignatureStatus::CaTrusted);
        let Contents::MultipartSigned { parts } =
            vault.sign(&bob, &Contents::plain_text("note")).unwrap()
        else {
            unreachable!()
        };
        assert_eq!(vault.check_signature(&parts).status, SignatureStatus::CaTrusted);
    }

    #[test]
    fn material_writes_are_once_per_aor() {
        let carol = aor("carol@c.example");
        let vault = InMemoryVault::new();
        vault.add_user_cert_der(&carol, Bytes::from_static(b"first"));
        vault.add_user_cert_der(&carol, Bytes::from_static(b"second"));
        assert_eq!(
            vault.certs.get(&carol).map(|entry| entry.value().clone()),
            Some(Bytes::from_static(b"first")),
            "重复写入应被忽略"
        );
    }
}
