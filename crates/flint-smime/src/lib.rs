//! # flint-smime
//!
//! ## 定位与职责（Why）
//! - 为 SIP endpoint 提供 S/MIME 特性：出站报文按既定强度签名/加密，
//!   入站报文解密并验签；缺失的证书与私钥通过远端仓库异步获取，期间
//!   操作连同报文一起挂起在登记表里。
//! - 密码学原语与证书仓库都是注入的契约（[`Security`] / [`CertStore`]），
//!   本 crate 只负责编排：材料盘点、树重建、挂起与恢复、属性沉淀。
//!
//! ## 架构嵌入（Where）
//! - [`EncryptionManager`] 接在对话管理事件环上：出站、入站与获取
//!   结果三类事件同源到达、互斥处理；
//! - 产物经 [`FeatureOutlet`] 离开：放行的出站报文、解密完成的入站
//!   报文与本地 415 回执；
//! - [`vault::InMemoryVault`] 是测试与示例用的替身绑定，生产部署
//!   替换为真实 CMS/X.509 实现。
//!
//! ## 并发模型（Trade-offs）
//! - 事件处理假定串行（同一 FIFO）；材料库是进程级共享、每
//!   AoR + 种类写一次；挂起报文由登记表独占持有，所有权以
//!   `Owned | Relinquished` 槽位显式表达。

/// S/MIME 特性错误类型。
pub mod error;

/// 入站解密与验签。
pub mod inbound;

/// 特性管理器与事件契约。
pub mod manager;

/// 出站加密管线。
pub mod outbound;

/// 挂起操作登记表。
pub mod pending;

/// 证书仓库与安全原语契约。
pub mod store;

/// 内存版安全原语替身。
pub mod vault;

pub use error::SmimeError;
pub use manager::{EncryptionManager, FeatureEvent, FeatureOutlet};
pub use pending::{MessageSlot, PendingKind, PendingRegistry, PendingRequest};
pub use store::{ArtifactKind, CertMessage, CertStore, MessageId, Security, SignatureCheck};
pub use vault::InMemoryVault;
