//! S/MIME 特性的端到端场景：异步签名、解密后补签名者证书、往返与
//! 完成顺序。
//!
//! 所有场景都用内存替身（仓库记录获取请求，测试手工回投结果），
//! 完整驱动“挂起 → 获取 → 恢复 → 投递”的编排路径。

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use flint_core::contents::Contents;
use flint_core::message::{Method, SipMessage};
use flint_core::security::{
    EncryptionLevel, IdentityStrength, SecurityAttributes, SignatureStatus,
};
use flint_core::{Aor, StartLine};
use flint_smime::vault::stub_der;
use flint_smime::{
    ArtifactKind, CertMessage, CertStore, EncryptionManager, FeatureEvent, FeatureOutlet,
    InMemoryVault, MessageId, Security,
};

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

#[derive(Default)]
struct RecordingStore {
    fetches: Mutex<Vec<MessageId>>,
}

impl RecordingStore {
    fn take(&self) -> Vec<MessageId> {
        std::mem::take(&mut self.fetches.lock().unwrap())
    }
}

impl CertStore for RecordingStore {
    fn fetch(&self, _aor: &Aor, _kind: ArtifactKind, id: MessageId) {
        self.fetches.lock().unwrap().push(id);
    }
}

struct Harness {
    manager: EncryptionManager,
    outlet: Arc<CollectingOutlet>,
    store: Arc<RecordingStore>,
}

fn harness(vault: InMemoryVault) -> Harness {
    let outlet = Arc::new(CollectingOutlet::default());
    let store = Arc::new(RecordingStore::default());
    let mut manager = EncryptionManager::new(
        Arc::new(vault) as Arc<dyn Security>,
        Arc::clone(&outlet) as Arc<dyn FeatureOutlet>,
    );
    manager.set_remote_cert_store(Arc::clone(&store) as Arc<dyn CertStore>);
    Harness {
        manager,
        outlet,
        store,
    }
}

fn message(
    from: &str,
    to: &str,
    branch: &str,
    body: Contents,
    level: Option<EncryptionLevel>,
) -> SipMessage {
    let mut msg = SipMessage::request(Method::Message, format!("sip:{to}"));
    msg.add_header("Via", &format!("SIP/2.0/TCP host;branch={branch}"));
    msg.add_header("From", &format!("<sip:{from}>"));
    msg.add_header("To", &format!("<sip:{to}>"));
    msg.add_header("Call-ID", branch);
    msg.add_header("CSeq", "1 MESSAGE");
    msg.install_contents(body).expect("场景正文应合法");
    if let Some(level) = level {
        let mut attributes = SecurityAttributes::new();
        attributes.set_outgoing_level(level);
        msg.set_security_attributes(attributes);
    }
    msg
}

fn success(id: MessageId) -> CertMessage {
    let body = match id.kind {
        ArtifactKind::UserCert => stub_der(&id.aor, "cert"),
        ArtifactKind::UserPrivateKey => stub_der(&id.aor, "key"),
    };
    CertMessage {
        id,
        success: true,
        body,
    }
}

/// S5：签名所需的证书与私钥都缺，走两次获取后恢复并放行。
#[test]
fn async_sign_completes_after_both_fetches() {
    let h = harness(InMemoryVault::new());
    h.manager.process(FeatureEvent::Outgoing(message(
        "alice@a.example",
        "bob@b.example",
        "z9hG4bK-s5",
        Contents::plain_text("sign me"),
        Some(EncryptionLevel::Sign),
    )));

    let fetches = h.store.take();
    assert_eq!(fetches.len(), 2, "证书与私钥各一次获取");
    assert!(fetches.iter().all(|id| id.aor.as_str() == "alice@a.example"));
    assert!(fetches.iter().all(|id| id.transaction_id == "z9hG4bK-s5"));
    assert_eq!(h.manager.pending_operations(), 1);
    assert!(h.outlet.outbound.lock().unwrap().is_empty(), "挂起期间不得放行");

    for id in fetches {
        h.manager.process(FeatureEvent::CertResult(success(id)));
    }

    let mut delivered = h.outlet.outbound.lock().unwrap();
    assert_eq!(delivered.len(), 1, "两次成功后应恢复并放行");
    assert!(matches!(
        delivered[0].contents(),
        Some(Contents::MultipartSigned { .. })
    ));
    assert!(delivered[0]
        .security_attributes()
        .unwrap()
        .encryption_performed());
    assert_eq!(h.manager.pending_operations(), 0, "登记表应清空");
}

/// S6：解出封包后才发现签名，补取签名者证书再完成。
#[test]
fn decrypt_then_discover_signature_refetches() {
    // 用独立的 vault 预制“bob 收到 alice 签名后加密的报文”。
    let alice = Aor::new("alice@a.example");
    let bob = Aor::new("bob@b.example");
    let builder = InMemoryVault::new().with_identity(&alice).with_identity(&bob);
    let inner = Contents::plain_text("deep payload");
    let signed = builder.sign(&alice, &inner).unwrap();
    let envelope = builder.encrypt(&signed, &bob).unwrap();

    // 接收端一开始什么材料都没有。
    let h = harness(InMemoryVault::new());
    h.manager.process(FeatureEvent::Incoming(message(
        "alice@a.example",
        "bob@b.example",
        "z9hG4bK-s6",
        envelope,
        None,
    )));

    let first = h.store.take();
    assert_eq!(first.len(), 2, "先取解密者的证书与私钥");
    assert!(first.iter().all(|id| id.aor == bob));
    for id in first {
        h.manager.process(FeatureEvent::CertResult(success(id)));
    }

    // 归零后带钥重评，发现封包内的签名，再挂起一次。
    let second = h.store.take();
    assert_eq!(second.len(), 1, "解密后应补取签名者证书");
    assert_eq!(second[0].aor, alice);
    assert_eq!(second[0].kind, ArtifactKind::UserCert);
    assert_eq!(h.manager.pending_operations(), 1);
    assert!(h.outlet.inbound.lock().unwrap().is_empty());

    h.manager
        .process(FeatureEvent::CertResult(success(second.into_iter().next().unwrap())));

    let mut delivered = h.outlet.inbound.lock().unwrap();
    assert_eq!(delivered.len(), 1);
    let msg = &mut delivered[0];
    let attributes = msg.security_attributes().unwrap().clone();
    assert!(attributes.encrypted(), "解密标记应置位");
    assert_eq!(attributes.signer(), Some(&alice));
    assert_eq!(attributes.signature_status(), SignatureStatus::Trusted);
    assert_eq!(msg.contents(), Some(&inner), "应一路解到最内层载荷");
    assert_eq!(h.manager.pending_operations(), 0);
}

/// P7：特性层面的加密往返与签名可信度。
#[test]
fn feature_level_crypto_roundtrip() {
    let alice = Aor::new("alice@a.example");
    let bob = Aor::new("bob@b.example");
    let body = Contents::plain_text("round trip body");

    // 发送端：持有接收者证书，同步加密。
    let sender = harness(InMemoryVault::new().with_identity(&bob));
    sender.manager.process(FeatureEvent::Outgoing(message(
        "alice@a.example",
        "bob@b.example",
        "z9hG4bK-p7",
        body.clone(),
        Some(EncryptionLevel::Encrypt),
    )));
    let mut sent = sender.outlet.outbound.lock().unwrap();
    assert_eq!(sent.len(), 1);
    let encrypted_body = sent[0].contents().unwrap().clone();
    assert!(matches!(encrypted_body, Contents::Pkcs7 { .. }));
    drop(sent);

    // 接收端：持有自己的私钥，解密后应还原原文。
    let receiver = harness(InMemoryVault::new().with_identity(&bob).with_identity(&alice));
    receiver.manager.process(FeatureEvent::Incoming(message(
        "alice@a.example",
        "bob@b.example",
        "z9hG4bK-p7r",
        encrypted_body,
        None,
    )));
    let mut received = receiver.outlet.inbound.lock().unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].contents(), Some(&body));
    assert!(received[0].security_attributes().unwrap().encrypted());

    // 验签可信度：持证书的签名应为 Trusted 族。
    let vault = InMemoryVault::new().with_identity(&alice);
    let Contents::MultipartSigned { parts } = vault.sign(&alice, &body).unwrap() else {
        unreachable!()
    };
    let check = vault.check_signature(&parts);
    assert!(matches!(
        check.status,
        SignatureStatus::Trusted | SignatureStatus::CaTrusted
    ));
}

/// P8：完成顺序由最后一次获取的到达顺序决定，与提交顺序无关。
#[test]
fn completion_order_follows_fetch_completion() {
    let h = harness(InMemoryVault::new());

    // 先提交 B，再提交 A。
    h.manager.process(FeatureEvent::Outgoing(message(
        "carol@c.example",
        "bob@b.example",
        "z9hG4bK-b",
        Contents::plain_text("message B"),
        Some(EncryptionLevel::Sign),
    )));
    h.manager.process(FeatureEvent::Outgoing(message(
        "alice@a.example",
        "bob@b.example",
        "z9hG4bK-a",
        Contents::plain_text("message A"),
        Some(EncryptionLevel::Sign),
    )));
    assert_eq!(h.manager.pending_operations(), 2);

    let fetches = h.store.take();
    let (for_a, for_b): (Vec<_>, Vec<_>) = fetches
        .into_iter()
        .partition(|id| id.transaction_id == "z9hG4bK-a");

    // A 的获取先完成。
    for id in for_a {
        h.manager.process(FeatureEvent::CertResult(success(id)));
    }
    for id in for_b {
        h.manager.process(FeatureEvent::CertResult(success(id)));
    }

    let delivered = h.outlet.outbound.lock().unwrap();
    assert_eq!(delivered.len(), 2);
    let first_call_id = delivered[0].header_value("Call-ID").unwrap().into_owned();
    let second_call_id = delivered[1].header_value("Call-ID").unwrap().into_owned();
    assert_eq!(first_call_id, "z9hG4bK-a", "先完成获取者先放行");
    assert_eq!(second_call_id, "z9hG4bK-b");
}

/// P9：multipart/alternative 只封包最优先部件，其余原样保留。
#[test]
fn alternative_encryption_preserves_structure() {
    let bob = Aor::new("bob@b.example");
    let h = harness(InMemoryVault::new().with_identity(&bob));
    let body = Contents::MultipartAlternative {
        parts: vec![
            Contents::plain_text("part 1"),
            Contents::plain_text("part 2"),
            Contents::plain_text("preferred part"),
        ],
    };
    h.manager.process(FeatureEvent::Outgoing(message(
        "alice@a.example",
        "bob@b.example",
        "z9hG4bK-p9",
        body,
        Some(EncryptionLevel::Encrypt),
    )));

    let mut delivered = h.outlet.outbound.lock().unwrap();
    let Some(Contents::MultipartAlternative { parts }) = delivered[0].contents() else {
        panic!("alternative 结构必须保留");
    };
    assert_eq!(parts.len(), 3);
    assert_eq!(parts[0], Contents::plain_text("part 1"));
    assert_eq!(parts[1], Contents::plain_text("part 2"));
    assert!(matches!(parts[2], Contents::Pkcs7 { .. }));
}

/// P10：解密重建属性时保留上游写入的身份强度。
#[test]
fn identity_strength_survives_decrypt() {
    let bob = Aor::new("bob@b.example");
    let vault = InMemoryVault::new().with_identity(&bob);
    let envelope = vault.encrypt(&Contents::plain_text("secret"), &bob).unwrap();

    let h = harness(vault);
    let mut incoming = message(
        "alice@a.example",
        "bob@b.example",
        "z9hG4bK-p10",
        envelope,
        None,
    );
    let mut upstream = SecurityAttributes::new();
    upstream.set_identity_strength(IdentityStrength::Identity);
    incoming.set_security_attributes(upstream);

    h.manager.process(FeatureEvent::Incoming(incoming));

    let delivered = h.outlet.inbound.lock().unwrap();
    let attributes = delivered[0].security_attributes().unwrap();
    assert_eq!(attributes.identity_strength(), IdentityStrength::Identity);
    assert!(attributes.encrypted());
}

/// 入站获取失败：带现有材料尽力解密，原正文保留。
#[test]
fn inbound_fetch_failure_degrades_gracefully() {
    let alice = Aor::new("alice@a.example");
    let bob = Aor::new("bob@b.example");
    let builder = InMemoryVault::new().with_identity(&bob).with_identity(&alice);
    let envelope = builder.encrypt(&Contents::plain_text("secret"), &bob).unwrap();

    let h = harness(InMemoryVault::new());
    h.manager.process(FeatureEvent::Incoming(message(
        "alice@a.example",
        "bob@b.example",
        "z9hG4bK-f",
        envelope.clone(),
        None,
    )));
    let fetches = h.store.take();
    assert_eq!(fetches.len(), 2);

    // 第一个获取即失败：操作立即以现有材料收尾。
    h.manager.process(FeatureEvent::CertResult(CertMessage {
        id: fetches.into_iter().next().unwrap(),
        success: false,
        body: Bytes::new(),
    }));

    let mut delivered = h.outlet.inbound.lock().unwrap();
    assert_eq!(delivered.len(), 1, "失败后应尽力投递");
    assert_eq!(
        delivered[0].contents(),
        Some(&envelope),
        "无钥时原封包正文保留"
    );
    let attributes = delivered[0].security_attributes().unwrap();
    assert!(!attributes.encrypted(), "未发生解密");
    assert_eq!(h.manager.pending_operations(), 0);
}

/// 出站获取失败：415 回执并放弃。
#[test]
fn outbound_fetch_failure_yields_415() {
    let h = harness(InMemoryVault::new());
    h.manager.process(FeatureEvent::Outgoing(message(
        "alice@a.example",
        "bob@b.example",
        "z9hG4bK-o",
        Contents::plain_text("doomed"),
        Some(EncryptionLevel::SignAndEncrypt),
    )));
    let fetches = h.store.take();
    assert_eq!(fetches.len(), 3, "加签加密缺三份材料");

    h.manager.process(FeatureEvent::CertResult(CertMessage {
        id: fetches.into_iter().next().unwrap(),
        success: false,
        body: Bytes::new(),
    }));

    assert!(h.outlet.outbound.lock().unwrap().is_empty());
    let responses = h.outlet.responses.lock().unwrap();
    assert_eq!(responses.len(), 1);
    assert!(matches!(
        responses[0].start_line(),
        StartLine::Response { code: 415, .. }
    ));
    assert_eq!(h.manager.pending_operations(), 0, "放弃后登记表应清空");
}
