//! S/MIME 特性管理器：单事件环上的编排核心。
//!
//! ## 角色定位（Why）
//! - 出站报文、入站报文与证书获取结果通过同一个入口
//!   （[`EncryptionManager::process`]）进入，归一为
//!   [`FeatureEvent`] 标签枚举；三类处理互斥地跑在对话管理线程上，
//!   挂起状态全部落在登记表里，没有任何跨事件的栈上状态。
//!
//! ## 行为契约（What）
//! - 出站：快出条件（无正文 / 无属性 / 强度 `None` / 已加密）直接放行；
//!   材料齐备同步重建正文；缺材料时有仓库则逐项获取并挂起，无仓库则
//!   生成 415 并丢弃；
//! - 入站：按方向选出解密者与签名者，缺材料时获取并挂起；无仓库降级
//!   为 `no_key` 尽力解密；重建后安装正文（失败保留原正文）、合并
//!   属性（保留上游身份强度）、投递“已解密”通知；
//! - 获取结果：按事务标识找回操作；成功则落库递减计数，归零恢复；
//!   出站失败走 415 放弃，入站失败带现有材料尽力完成；
//! - 解密操作归零时会带钥重评“是否签名”，可能再挂起一次去取签名者
//!   证书——这是“归零不等于完成”的唯一来源。
//!
//! ## 并发模型（Trade-offs）
//! - 管理器自身无锁可共享引用调用，但语义上假设事件串行到达（同一
//!   FIFO）；材料库与登记表内部是并发安全的，乱序到达不破坏内存
//!   安全，只可能改变完成顺序。

use std::sync::Arc;

use flint_codec_sip::make_415;
use flint_core::error::MessageError;
use flint_core::message::SipMessage;
use flint_core::security::EncryptionLevel;
use flint_core::Aor;
use tracing::{debug, info, warn};

use crate::error::SmimeError;
use crate::inbound;
use crate::outbound;
use crate::pending::{MessageSlot, PendingKind, PendingRegistry, PendingRequest};
use crate::store::{ArtifactKind, CertMessage, CertStore, MessageId, Security};

/// 特性入口的归一化事件。
#[derive(Debug)]
pub enum FeatureEvent {
    /// 上游递交的出站报文。
    Outgoing(SipMessage),
    /// 事务层递交的入站报文。
    Incoming(SipMessage),
    /// 证书仓库回投的获取结果。
    CertResult(CertMessage),
}

/// 特性的三个输出面。
pub trait FeatureOutlet: Send + Sync {
    /// 放行（或恢复后放行）出站报文。
    fn deliver_outbound(&self, message: SipMessage);

    /// 投递已解密/已验签的入站报文。
    fn deliver_inbound(&self, message: SipMessage);

    /// 投递本地生成的响应（415 等）。
    fn respond_locally(&self, response: SipMessage);
}

/// S/MIME 特性管理器。
pub struct EncryptionManager {
    security: Arc<dyn Security>,
    store: Option<Arc<dyn CertStore>>,
    registry: PendingRegistry,
    outlet: Arc<dyn FeatureOutlet>,
}

impl EncryptionManager {
    /// 以安全原语与输出面构造管理器；远端仓库默认未配置。
    pub fn new(security: Arc<dyn Security>, outlet: Arc<dyn FeatureOutlet>) -> Self {
        Self {
            security,
            store: None,
            registry: PendingRegistry::new(),
            outlet,
        }
    }

    /// 安装远端证书仓库。
    pub fn set_remote_cert_store(&mut self, store: Arc<dyn CertStore>) {
        self.store = Some(store);
    }

    /// 在途挂起操作数（观测与测试用）。
    pub fn pending_operations(&self) -> usize {
        self.registry.len()
    }

    /// 处理一条事件。
    pub fn process(&self, event: FeatureEvent) {
        match event {
            FeatureEvent::Outgoing(message) => self.on_outgoing(message),
            FeatureEvent::Incoming(message) => self.on_incoming(message),
            FeatureEvent::CertResult(result) => self.on_cert_result(result),
        }
    }

    fn on_outgoing(&self, message: SipMessage) {
        if !message.has_body() {
            self.outlet.deliver_outbound(message);
            return;
        }
        let Some(attributes) = message.security_attributes() else {
            self.outlet.deliver_outbound(message);
            return;
        };
        let level = attributes.outgoing_level();
        if level == EncryptionLevel::None || attributes.encryption_performed() {
            self.outlet.deliver_outbound(message);
            return;
        }

        let (sender, recipient) = match outbound_aors(&message) {
            Ok(pair) => pair,
            Err(error) => {
                warn!(target: "flint::smime", %error, "出站报文无法确定收发 AoR，跳过加密处理");
                self.outlet.deliver_outbound(message);
                return;
            }
        };

        let missing = outbound::missing_artifacts(&*self.security, level, &sender, &recipient);
        if missing.is_empty() {
            self.complete_outbound(message, level, &sender, &recipient);
            return;
        }

        let Some(store) = self.store.clone() else {
            info!(target: "flint::smime", "未配置远端证书仓库，出站加密失败");
            self.respond_415(&message);
            return;
        };
        let Some(transaction_id) = message.transaction_id() else {
            warn!(target: "flint::smime", "出站报文缺少事务标识，无法发起证书获取");
            self.respond_415(&message);
            return;
        };
        if self.registry.contains(&transaction_id) {
            warn!(
                target: "flint::smime",
                %transaction_id,
                error = %SmimeError::DuplicateTransaction { transaction_id: transaction_id.clone() },
                "同一事务不支持并发安全操作，丢弃出站报文"
            );
            self.respond_415(&message);
            return;
        }

        for (aor, kind) in &missing {
            info!(target: "flint::smime", %aor, artifact = %kind, "发起证书获取");
            store.fetch(
                aor,
                *kind,
                MessageId {
                    transaction_id: transaction_id.clone(),
                    aor: aor.clone(),
                    kind: *kind,
                },
            );
        }
        let kind = match level {
            EncryptionLevel::Sign => PendingKind::Sign { sender },
            EncryptionLevel::Encrypt => PendingKind::Encrypt { recipient },
            EncryptionLevel::SignAndEncrypt => PendingKind::SignAndEncrypt { sender, recipient },
            EncryptionLevel::None => return,
        };
        let request = PendingRequest {
            kind,
            slot: MessageSlot::Owned(message),
            pending_fetches: missing.len() as u32,
        };
        if let Err(error) = self.registry.register(transaction_id, request) {
            warn!(target: "flint::smime", %error, "登记挂起操作失败");
        }
    }

    fn on_incoming(&self, mut message: SipMessage) {
        let (decryptor, signer) = match inbound_aors(&message) {
            Ok(pair) => pair,
            Err(error) => {
                debug!(target: "flint::smime", %error, "入站报文无法确定 AoR，原样投递");
                self.outlet.deliver_inbound(message);
                return;
            }
        };

        let mut no_key = false;
        if message.contents().is_some_and(inbound::is_encrypted) {
            let mut missing = Vec::new();
            if !self.security.has_user_cert(&decryptor) {
                missing.push((decryptor.clone(), ArtifactKind::UserCert));
            }
            if !self.security.has_user_private_key(&decryptor) {
                missing.push((decryptor.clone(), ArtifactKind::UserPrivateKey));
            }
            if !missing.is_empty() {
                match self.suspend(message, &missing, || PendingKind::Decrypt {
                    decryptor: decryptor.clone(),
                    signer: signer.clone(),
                }) {
                    Ok(()) => return,
                    Err(returned) => {
                        // 无从获取解密材料，降级为无钥尽力解。
                        message = returned;
                        no_key = true;
                    }
                }
            }
        }

        let signed = match message.contents() {
            Some(contents) => {
                let tree = contents.clone();
                inbound::is_signed(&*self.security, &tree, &decryptor, no_key)
            }
            None => false,
        };
        if signed && !self.security.has_user_cert(&signer) {
            let missing = vec![(signer.clone(), ArtifactKind::UserCert)];
            match self.suspend(message, &missing, || PendingKind::Decrypt {
                decryptor: decryptor.clone(),
                signer: signer.clone(),
            }) {
                Ok(()) => return,
                Err(returned) => message = returned,
            }
        }

        self.finish_inbound(message, &decryptor);
    }

    fn on_cert_result(&self, result: CertMessage) {
        let Some(request) = self.registry.remove(&result.id.transaction_id) else {
            debug!(
                target: "flint::smime",
                transaction_id = %result.id.transaction_id,
                "获取结果找不到对应的挂起操作，丢弃"
            );
            return;
        };

        if result.success {
            info!(target: "flint::smime", aor = %result.id.aor, artifact = %result.id.kind, "写入获取到的材料");
            match result.id.kind {
                ArtifactKind::UserCert => {
                    self.security.add_user_cert_der(&result.id.aor, result.body.clone());
                }
                ArtifactKind::UserPrivateKey => {
                    self.security
                        .add_user_private_key_der(&result.id.aor, result.body.clone());
                }
            }
        }

        match request.kind {
            PendingKind::Decrypt { .. } => self.resume_decrypt(result, request),
            _ => self.resume_outbound(result, request),
        }
    }

    /// 出站恢复：失败放弃（415），成功归零后重建并放行。
    fn resume_outbound(&self, result: CertMessage, mut request: PendingRequest) {
        if !result.success {
            info!(
                target: "flint::smime",
                aor = %result.id.aor,
                artifact = %result.id.kind,
                "证书获取失败，放弃出站安全操作"
            );
            if let Some(message) = request.slot.take() {
                self.respond_415(&message);
            }
            return;
        }

        request.pending_fetches = request.pending_fetches.saturating_sub(1);
        if request.pending_fetches > 0 {
            self.registry
                .reinstate(result.id.transaction_id, request);
            return;
        }

        let (level, sender, recipient) = match &request.kind {
            PendingKind::Sign { sender } => (EncryptionLevel::Sign, sender.clone(), sender.clone()),
            PendingKind::Encrypt { recipient } => {
                (EncryptionLevel::Encrypt, recipient.clone(), recipient.clone())
            }
            PendingKind::SignAndEncrypt { sender, recipient } => (
                EncryptionLevel::SignAndEncrypt,
                sender.clone(),
                recipient.clone(),
            ),
            PendingKind::Decrypt { .. } => return,
        };
        let Some(message) = request.slot.take() else {
            return;
        };
        self.complete_outbound(message, level, &sender, &recipient);
    }

    /// 入站恢复：失败尽力完成；归零时带钥重评签名，可能再挂起一次。
    fn resume_decrypt(&self, result: CertMessage, mut request: PendingRequest) {
        let PendingKind::Decrypt { decryptor, signer } = request.kind.clone() else {
            return;
        };

        if !result.success {
            info!(
                target: "flint::smime",
                aor = %result.id.aor,
                artifact = %result.id.kind,
                "证书获取失败，带现有材料尽力解密"
            );
            if let Some(message) = request.slot.take() {
                self.finish_inbound(message, &decryptor);
            }
            return;
        }

        request.pending_fetches = request.pending_fetches.saturating_sub(1);
        if request.pending_fetches > 0 {
            self.registry
                .reinstate(result.id.transaction_id, request);
            return;
        }

        if result.id.aor == decryptor {
            // 解密材料刚齐：签名可能藏在封包里，带钥重评一次。
            let no_key = !self.security.has_user_cert(&decryptor)
                || !self.security.has_user_private_key(&decryptor);
            let needs_signer_cert = match request.slot.message_mut() {
                Some(message) => {
                    let signed = match message.contents() {
                        Some(contents) => {
                            let tree = contents.clone();
                            inbound::is_signed(&*self.security, &tree, &decryptor, no_key)
                        }
                        None => false,
                    };
                    signed && !self.security.has_user_cert(&signer)
                }
                None => false,
            };
            if needs_signer_cert && let Some(store) = &self.store {
                info!(target: "flint::smime", aor = %signer, "解密后发现签名，补取签名者证书");
                let transaction_id = result.id.transaction_id.clone();
                store.fetch(
                    &signer,
                    ArtifactKind::UserCert,
                    MessageId {
                        transaction_id: transaction_id.clone(),
                        aor: signer.clone(),
                        kind: ArtifactKind::UserCert,
                    },
                );
                request.pending_fetches = 1;
                self.registry.reinstate(transaction_id, request);
                return;
            }
        }

        if let Some(message) = request.slot.take() {
            self.finish_inbound(message, &decryptor);
        }
    }

    /// 材料齐备后的出站收尾：重建正文、置已加密标记并放行。
    fn complete_outbound(
        &self,
        mut message: SipMessage,
        level: EncryptionLevel,
        sender: &Aor,
        recipient: &Aor,
    ) {
        let Some(contents) = message.contents().cloned() else {
            // 正文无法解析成树，按无可保护内容放行。
            debug!(target: "flint::smime", "出站正文不可解析，跳过加密处理");
            self.outlet.deliver_outbound(message);
            return;
        };
        match outbound::build_outgoing_body(&*self.security, level, &contents, sender, recipient) {
            Ok(rebuilt) => {
                if let Err(error) = message.install_contents(rebuilt) {
                    warn!(target: "flint::smime", %error, "重建正文无法安装");
                    self.respond_415(&message);
                    return;
                }
                if let Some(attributes) = message.security_attributes_mut() {
                    attributes.set_encryption_performed();
                }
                self.outlet.deliver_outbound(message);
            }
            Err(error) => {
                warn!(target: "flint::smime", %error, "出站安全操作失败");
                self.respond_415(&message);
            }
        }
    }

    /// 入站收尾：重建、安装（失败保留原正文）、合并属性并投递。
    fn finish_inbound(&self, mut message: SipMessage, decryptor: &Aor) {
        let no_key = !self.security.has_user_cert(decryptor)
            || !self.security.has_user_private_key(decryptor);
        let decoded = inbound::decode_body(&*self.security, &mut message, decryptor, no_key);
        if let Some(contents) = decoded.contents {
            if let Err(error) = message.install_contents(contents) {
                debug!(target: "flint::smime", %error, "解密正文无法安装，保留原正文");
            }
        }
        let attributes = match message.security_attributes() {
            Some(previous) => decoded
                .attributes
                .merge_preserving_identity_strength(previous),
            None => decoded.attributes,
        };
        message.set_security_attributes(attributes);
        self.outlet.deliver_inbound(message);
    }

    /// 为入站报文发起获取并挂起；无法挂起时原样返还报文。
    fn suspend(
        &self,
        message: SipMessage,
        missing: &[(Aor, ArtifactKind)],
        kind: impl FnOnce() -> PendingKind,
    ) -> Result<(), SipMessage> {
        let Some(store) = &self.store else {
            info!(target: "flint::smime", "未配置远端证书仓库，带现有材料继续");
            return Err(message);
        };
        let Some(transaction_id) = message.transaction_id() else {
            warn!(target: "flint::smime", "入站报文缺少事务标识，无法发起证书获取");
            return Err(message);
        };
        if self.registry.contains(&transaction_id) {
            warn!(target: "flint::smime", %transaction_id, "同一事务已有挂起操作，带现有材料继续");
            return Err(message);
        }

        for (aor, artifact) in missing {
            info!(target: "flint::smime", %aor, artifact = %artifact, "发起证书获取");
            store.fetch(
                aor,
                *artifact,
                MessageId {
                    transaction_id: transaction_id.clone(),
                    aor: aor.clone(),
                    kind: *artifact,
                },
            );
        }
        let request = PendingRequest {
            kind: kind(),
            slot: MessageSlot::Owned(message),
            pending_fetches: missing.len() as u32,
        };
        if let Err(error) = self.registry.register(transaction_id, request) {
            warn!(target: "flint::smime", %error, "登记挂起操作失败");
        }
        Ok(())
    }

    fn respond_415(&self, message: &SipMessage) {
        if let Some(response) = make_415(message) {
            info!(target: "flint::smime", "生成 415 回执");
            self.outlet.respond_locally(response);
        }
    }
}

/// 出站方向的（发送者, 接收者）AoR。
fn outbound_aors(message: &SipMessage) -> Result<(Aor, Aor), MessageError> {
    if message.is_request() {
        Ok((message.from_aor()?, message.to_aor()?))
    } else {
        Ok((message.to_aor()?, message.from_aor()?))
    }
}

/// 入站方向的（解密者, 签名者）AoR。
fn inbound_aors(message: &SipMessage) -> Result<(Aor, Aor), MessageError> {
    if message.is_request() {
        Ok((message.to_aor()?, message.from_aor()?))
    } else {
        Ok((message.from_aor()?, message.to_aor()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use flint_core::contents::Contents;
    use flint_core::message::Method;
    use flint_core::security::SecurityAttributes;

    use crate::vault::InMemoryVault;

    #[derive(Default)]
    struct CollectingOutlet {
        outbound: Mutex<Vec<SipMessage>>,
        inbound: Mutex<Vec<SipMessage>>,
        responses: Mutex<Vec<SipMessage>>,
    }

    impl FeatureOutlet for CollectingOutlet {
        fn deliver_outbound(&self, message: SipMessage) {
            self.outbound.lock().unwrap().push(message);
        }

        fn deliver_inbound(&self, message: SipMessage) {
            self.inbound.lock().unwrap().push(message);
        }

        fn respond_locally(&self, response: SipMessage) {
            self.responses.lock().unwrap().push(response);
        }
    }

    fn outgoing_message(level: EncryptionLevel) -> SipMessage {
        let mut message = SipMessage::request(Method::Message, "sip:bob@b.example");
        message.add_header("Via", "SIP/2.0/TCP a.example;branch=z9hG4bK-m1");
        message.add_header("From", "<sip:alice@a.example>");
        message.add_header("To", "<sip:bob@b.example>");
        message.add_header("Call-ID", "m1");
        message.add_header("CSeq", "1 MESSAGE");
        message
            .install_contents(Contents::plain_text("hello"))
            .unwrap();
        let mut attributes = SecurityAttributes::new();
        attributes.set_outgoing_level(level);
        message.set_security_attributes(attributes);
        message
    }

    #[test]
    fn passthrough_when_no_attributes_or_level() {
        let outlet = Arc::new(CollectingOutlet::default());
        let vault = Arc::new(InMemoryVault::new());
        let manager = EncryptionManager::new(vault, Arc::clone(&outlet) as _);

        let mut plain = SipMessage::request(Method::Message, "sip:bob@b.example");
        plain
            .install_contents(Contents::plain_text("x"))
            .unwrap();
        manager.process(FeatureEvent::Outgoing(plain));

        manager.process(FeatureEvent::Outgoing(outgoing_message(
            EncryptionLevel::None,
        )));

        assert_eq!(outlet.outbound.lock().unwrap().len(), 2, "快出条件都应放行");
        assert!(outlet.responses.lock().unwrap().is_empty());
    }

    #[test]
    fn synchronous_sign_when_material_present() {
        let alice = Aor::new("alice@a.example");
        let outlet = Arc::new(CollectingOutlet::default());
        let vault = Arc::new(InMemoryVault::new().with_identity(&alice));
        let manager = EncryptionManager::new(vault, Arc::clone(&outlet) as _);

        manager.process(FeatureEvent::Outgoing(outgoing_message(
            EncryptionLevel::Sign,
        )));

        let mut delivered = outlet.outbound.lock().unwrap();
        assert_eq!(delivered.len(), 1, "材料齐备应同步完成");
        let message = &mut delivered[0];
        assert!(matches!(
            message.contents(),
            Some(Contents::MultipartSigned { .. })
        ));
        assert!(message.security_attributes().unwrap().encryption_performed());
        assert_eq!(manager.pending_operations(), 0);
    }

    #[test]
    fn missing_material_without_store_yields_415() {
        let outlet = Arc::new(CollectingOutlet::default());
        let vault = Arc::new(InMemoryVault::new());
        let manager = EncryptionManager::new(vault, Arc::clone(&outlet) as _);

        manager.process(FeatureEvent::Outgoing(outgoing_message(
            EncryptionLevel::Encrypt,
        )));

        assert!(outlet.outbound.lock().unwrap().is_empty(), "缺材料不得放行");
        let responses = outlet.responses.lock().unwrap();
        assert_eq!(responses.len(), 1);
        assert!(matches!(
            responses[0].start_line(),
            flint_core::StartLine::Response { code: 415, .. }
        ));
    }

    #[test]
    fn incoming_plain_message_gets_identity_attributes() {
        let outlet = Arc::new(CollectingOutlet::default());
        let vault = Arc::new(InMemoryVault::new());
        let manager = EncryptionManager::new(vault, Arc::clone(&outlet) as _);

        let mut message = SipMessage::request(Method::Message, "sip:bob@b.example");
        message.add_header("From", "<sip:alice@a.example>");
        message.add_header("To", "<sip:bob@b.example>");
        manager.process(FeatureEvent::Incoming(message));

        let delivered = outlet.inbound.lock().unwrap();
        assert_eq!(delivered.len(), 1);
        let attributes = delivered[0].security_attributes().expect("应沉淀属性");
        assert_eq!(
            attributes.identity().map(Aor::as_str),
            Some("alice@a.example")
        );
        assert!(!attributes.encrypted());
    }

    #[test]
    fn stray_cert_result_is_ignored() {
        let outlet = Arc::new(CollectingOutlet::default());
        let vault = Arc::new(InMemoryVault::new());
        let manager = EncryptionManager::new(vault, Arc::clone(&outlet) as _);

        manager.process(FeatureEvent::CertResult(CertMessage {
            id: MessageId {
                transaction_id: "unknown".into(),
                aor: Aor::new("x@y"),
                kind: ArtifactKind::UserCert,
            },
            success: true,
            body: bytes::Bytes::from_static(b"der"),
        }));
        assert_eq!(manager.pending_operations(), 0);
    }
}
