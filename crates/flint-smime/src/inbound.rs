//! 入站解密与验签：结构测试与树重建。
//!
//! ## 模块目的（Why）
//! - 入站报文的正文可能是封包、签名两件套或任意嵌套的 multipart；
//!   本模块提供三件事：判断“是否加密”、判断“是否签名”（可能需要
//!   试解密）、以及把整棵树重建为已解密/已验签的形态并沉淀安全属性。
//!
//! ## 递归规则（What）
//! - `is_encrypted`：`Pkcs7` 即真；`multipart/signed` 只看载荷部件；
//!   `alternative` 从最优先开始倒序扫；`mixed`/`related` 顺序扫；
//! - `is_signed`：`Pkcs7` 在持钥时试解密后继续判断（`no_key` 时视为
//!   未签名）；`multipart/signed` 即真；容器递归同上；
//! - 重建（[`decode_body`]）：`Pkcs7` 无钥即丢弃、有钥解开后继续
//!   下钻；`multipart/signed` 验签并记录签名者与结论（外层结论覆盖
//!   内层）；`alternative` 倒序取第一个非空结果；`mixed`/`related`
//!   顺序取第一个非空结果；叶子原样克隆。
//!
//! ## 风险提示（Trade-offs）
//! - `is_signed` 的试解密把解密成本泄漏进结构判定，换来的是“签名藏在
//!   封包里”时也能提前发现需要签名者证书；重建阶段会再解一次，替身
//!   原语下代价可忽略，真实绑定可在 [`Security`] 实现内做缓存。

use flint_core::contents::Contents;
use flint_core::message::SipMessage;
use flint_core::security::SecurityAttributes;
use flint_core::Aor;
use tracing::debug;

use crate::store::Security;

/// 树上是否存在可达的 CMS 封包。
pub(crate) fn is_encrypted(contents: &Contents) -> bool {
    match contents {
        Contents::Pkcs7 { .. } => true,
        Contents::MultipartSigned { parts } => {
            parts.first().is_some_and(is_encrypted)
        }
        Contents::MultipartAlternative { parts } => parts.iter().rev().any(is_encrypted),
        Contents::MultipartMixed { parts } | Contents::MultipartRelated { parts } => {
            parts.iter().any(is_encrypted)
        }
        Contents::Opaque { .. } => false,
    }
}

/// 树上是否存在可达的签名结构；封包节点在持钥时试解密后继续判断。
pub(crate) fn is_signed(
    security: &dyn Security,
    contents: &Contents,
    decryptor: &Aor,
    no_key: bool,
) -> bool {
    match contents {
        Contents::Pkcs7 { data } => {
            if no_key {
                return false;
            }
            match security.decrypt(decryptor, data) {
                Some(decrypted) => is_signed(security, &decrypted, decryptor, no_key),
                None => false,
            }
        }
        Contents::MultipartSigned { .. } => true,
        Contents::MultipartAlternative { parts } => parts
            .iter()
            .rev()
            .any(|part| is_signed(security, part, decryptor, no_key)),
        Contents::MultipartMixed { parts } | Contents::MultipartRelated { parts } => parts
            .iter()
            .any(|part| is_signed(security, part, decryptor, no_key)),
        Contents::Opaque { .. } => false,
    }
}

/// 重建结果：新正文（可能为空）与沉淀出的安全属性。
#[derive(Debug)]
pub(crate) struct DecodedBody {
    /// 解密/验签后的正文；`None` 表示不替换原正文。
    pub contents: Option<Contents>,
    /// 重建过程中沉淀的属性。
    pub attributes: SecurityAttributes,
}

/// 对报文正文执行解密/验签重建。
///
/// # 教案式说明
/// - **契约 (What)**：无论正文如何，属性块都会带上 `From` 身份；
///   `no_key` 表示解密材料不可用，封包节点按丢弃处理；
/// - **执行 (How)**：正文树先克隆再重建，原报文在安装校验通过前
///   保持原状。
pub(crate) fn decode_body(
    security: &dyn Security,
    message: &mut SipMessage,
    decryptor: &Aor,
    no_key: bool,
) -> DecodedBody {
    let mut attributes = SecurityAttributes::new();
    if let Ok(identity) = message.from_aor() {
        attributes.set_identity(identity);
    }

    let tree = message.contents().cloned();
    let contents = match tree {
        Some(tree) => rebuild(security, &tree, decryptor, no_key, &mut attributes),
        None => None,
    };
    DecodedBody {
        contents,
        attributes,
    }
}

fn rebuild(
    security: &dyn Security,
    tree: &Contents,
    decryptor: &Aor,
    no_key: bool,
    attributes: &mut SecurityAttributes,
) -> Option<Contents> {
    match tree {
        Contents::Pkcs7 { data } => {
            if no_key {
                debug!(target: "flint::smime", "无解密材料，封包部件按空处理");
                return None;
            }
            let decrypted = security.decrypt(decryptor, data)?;
            attributes.set_encrypted();
            // 明文里可能还藏着签名结构，继续下钻。
            rebuild(security, &decrypted, decryptor, no_key, attributes)
        }
        Contents::MultipartSigned { parts } => {
            let check = security.check_signature(parts);
            let result = rebuild(security, &check.payload, decryptor, no_key, attributes);
            // 递归之后再落结论，外层签名覆盖内层。
            if let Some(signer) = check.signer {
                attributes.set_signer(signer);
            }
            attributes.set_signature_status(check.status);
            result
        }
        Contents::MultipartAlternative { parts } => parts
            .iter()
            .rev()
            .find_map(|part| rebuild(security, part, decryptor, no_key, attributes)),
        Contents::MultipartMixed { parts } | Contents::MultipartRelated { parts } => parts
            .iter()
            .find_map(|part| rebuild(security, part, decryptor, no_key, attributes)),
        Contents::Opaque { .. } => Some(tree.clone()),
    }
}
