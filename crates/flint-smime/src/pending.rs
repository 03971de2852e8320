//! 挂起安全操作的登记表。
//!
//! ## 角色定位（Why）
//! - 一次签名/加密/解密可能等待多个证书获取；操作挂起期间报文必须有
//!   明确的独占所有者。登记表以事务标识为键保存
//!   [`PendingRequest`]，获取结果据此找回属主。
//!
//! ## 行为契约（What）
//! - 同一事务标识同时只允许一个挂起操作（违例返回
//!   [`SmimeError::DuplicateTransaction`]）；
//! - 获取结果处理流程是“取出 → 推进 → 完成或放回”：完成即销毁条目，
//!   再挂起（解密路径发现还需签名者证书）则放回；
//! - [`MessageSlot`] 显式表达报文所有权：`Owned` 表示登记表持有，
//!   `Relinquished` 表示报文已交还投递路径——替代指针实现里的
//!   “taken”标志，析构路径天然无二次释放。

use dashmap::DashMap;
use flint_core::message::SipMessage;
use flint_core::Aor;

use crate::error::SmimeError;

/// 挂起期间的报文所有权槽位。
#[derive(Debug)]
pub enum MessageSlot {
    /// 登记表独占持有报文。
    Owned(SipMessage),
    /// 报文已交还投递路径。
    Relinquished,
}

impl MessageSlot {
    /// 交出报文所有权，槽位转入 `Relinquished`。
    pub fn take(&mut self) -> Option<SipMessage> {
        match std::mem::replace(self, MessageSlot::Relinquished) {
            MessageSlot::Owned(message) => Some(message),
            MessageSlot::Relinquished => None,
        }
    }

    /// 借用持有中的报文。
    pub fn message_mut(&mut self) -> Option<&mut SipMessage> {
        match self {
            MessageSlot::Owned(message) => Some(message),
            MessageSlot::Relinquished => None,
        }
    }
}

/// 挂起操作的种类与既定 AoR。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PendingKind {
    /// 出站签名。
    Sign {
        /// 签名者。
        sender: Aor,
    },
    /// 出站加密。
    Encrypt {
        /// 接收者。
        recipient: Aor,
    },
    /// 出站先加密后签名。
    SignAndEncrypt {
        /// 签名者。
        sender: Aor,
        /// 接收者。
        recipient: Aor,
    },
    /// 入站解密与验签。
    Decrypt {
        /// 解密身份。
        decryptor: Aor,
        /// 签名者身份。
        signer: Aor,
    },
}

/// 一次等待证书获取的安全操作。
#[derive(Debug)]
pub struct PendingRequest {
    /// 操作种类。
    pub kind: PendingKind,
    /// 报文所有权槽位。
    pub slot: MessageSlot,
    /// 尚未到达的获取数。
    pub pending_fetches: u32,
}

/// 以事务标识为键的挂起操作表。
#[derive(Debug, Default)]
pub struct PendingRegistry {
    requests: DashMap<String, PendingRequest>,
}

impl PendingRegistry {
    /// 构造空表。
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记新的挂起操作。
    ///
    /// - **前置条件**：`transaction_id` 上没有在途操作；
    /// - **后置条件**：成功时登记表独占持有请求（及其中的报文）。
    pub fn register(
        &self,
        transaction_id: String,
        request: PendingRequest,
    ) -> Result<(), SmimeError> {
        match self.requests.entry(transaction_id) {
            dashmap::mapref::entry::Entry::Occupied(entry) => {
                Err(SmimeError::DuplicateTransaction {
                    transaction_id: entry.key().clone(),
                })
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(request);
                Ok(())
            }
        }
    }

    /// 指定事务上是否已有在途操作。
    pub fn contains(&self, transaction_id: &str) -> bool {
        self.requests.contains_key(transaction_id)
    }

    /// 取出待推进的操作；调用方处理后要么完成要么 [`Self::reinstate`]。
    pub fn remove(&self, transaction_id: &str) -> Option<PendingRequest> {
        self.requests
            .remove(transaction_id)
            .map(|(_, request)| request)
    }

    /// 把尚未完成的操作放回表中。
    pub fn reinstate(&self, transaction_id: String, request: PendingRequest) {
        self.requests.insert(transaction_id, request);
    }

    /// 在途操作数。
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    /// 是否没有在途操作。
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flint_core::message::Method;

    fn request() -> PendingRequest {
        PendingRequest {
            kind: PendingKind::Sign {
                sender: Aor::new("alice@a.example"),
            },
            slot: MessageSlot::Owned(SipMessage::request(Method::Message, "sip:b@b")),
            pending_fetches: 2,
        }
    }

    #[test]
    fn duplicate_transaction_is_rejected() {
        let registry = PendingRegistry::new();
        registry.register("t1".into(), request()).expect("首个登记应成功");
        let err = registry.register("t1".into(), request());
        assert!(matches!(err, Err(SmimeError::DuplicateTransaction { .. })));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn remove_then_reinstate_keeps_request_alive() {
        let registry = PendingRegistry::new();
        registry.register("t2".into(), request()).unwrap();
        let mut taken = registry.remove("t2").expect("登记过的事务应可取出");
        assert!(registry.is_empty());
        taken.pending_fetches -= 1;
        registry.reinstate("t2".into(), taken);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn slot_take_is_single_shot() {
        let mut slot = MessageSlot::Owned(SipMessage::request(Method::Info, "sip:x@y"));
        assert!(slot.take().is_some());
        assert!(slot.take().is_none(), "所有权只能交出一次");
    }
}
