//! Tokio 运行时上的连接驱动与监听循环。
//!
//! ## 角色定位（Why）
//! - [`Connection`] 本身是无 IO 的状态机；本模块把它接到真实套接字：
//!   读就绪时把字节灌进读缓冲并推进状态机，出站命令到达时入队并
//!   冲刷发送队列。
//! - 一条连接由一个任务独占驱动，天然满足“单线程协作”调度模型，
//!   状态无需加锁。
//!
//! ## 行为契约（What）
//! - [`StreamDriver::run`] 循环到对端挂断、写失败或命令通道关闭为止；
//!   退出前以记录的失败原因清空发送队列，并逐事务回调
//!   [`SendFailureSink`]；
//! - 帧错误只记日志，连接继续收流（由上游决定是否拆线）；
//! - [`Acceptor::run`] 为每条入站连接派生一个驱动任务，并把
//!   [`DriverHandle`] 交给调用方保管。
//!
//! ## 风险提示（Trade-offs）
//! - 写路径在本任务内同步冲刷：对端长时间不收包会拖住读方向，
//!   这是单任务连接模型的既定取舍；
//! - 出站命令通道无界，背压由上层的事务配额兜底。

use std::io;
use std::sync::Arc;

use flint_core::error::FailureReason;
use flint_core::txn::{SendFailureSink, TransactionFifo};
use flint_core::{Endpoint, StreamLimits, TransportKind};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::connection::Connection;
use crate::send::SendData;

/// 出站侧句柄：向驱动任务投递待发送载荷。
#[derive(Clone, Debug)]
pub struct DriverHandle {
    peer: Endpoint,
    tx: mpsc::UnboundedSender<SendData>,
}

impl DriverHandle {
    /// 驱动所服务的对端。
    pub fn peer(&self) -> &Endpoint {
        &self.peer
    }

    /// 投递一条出站载荷；驱动已退出时原样返还。
    pub fn send(&self, data: SendData) -> Result<(), SendData> {
        self.tx.send(data).map_err(|rejected| rejected.0)
    }
}

/// 事件环单轮的选择结果。
enum Step {
    /// 套接字读就绪（字节数或错误）。
    Read(io::Result<usize>),
    /// 出站命令到达（`None` 表示通道关闭）。
    Command(Option<SendData>),
}

/// 把一条 [`Connection`] 绑定到 Tokio 套接字的驱动任务。
pub struct StreamDriver {
    stream: TcpStream,
    connection: Connection,
    fifo: Arc<TransactionFifo>,
    failures: Arc<dyn SendFailureSink>,
    outbound: mpsc::UnboundedReceiver<SendData>,
}

impl StreamDriver {
    /// 为已建立的流构造驱动与出站句柄。
    pub fn new(
        stream: TcpStream,
        peer: Endpoint,
        limits: StreamLimits,
        fifo: Arc<TransactionFifo>,
        failures: Arc<dyn SendFailureSink>,
    ) -> (Self, DriverHandle) {
        let (tx, outbound) = mpsc::unbounded_channel();
        let driver = Self {
            stream,
            connection: Connection::new(peer, limits),
            fifo,
            failures,
            outbound,
        };
        (driver, DriverHandle { peer, tx })
    }

    /// 暴露内部连接，供调用方装配 TLS 元数据或保活钩子。
    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.connection
    }

    /// 驱动连接直至终态。
    pub async fn run(mut self) {
        let reason = self.serve().await;
        let failed = self.connection.close(reason);
        for item in failed {
            self.failures
                .transmission_failed(&item.transaction_id, item.reason);
        }
        debug!(target: "flint::transport::tcp", peer = %self.connection.peer(), %reason, "连接驱动退出");
    }

    async fn serve(&mut self) -> FailureReason {
        loop {
            // 选择结果先落成枚举：两个分支的 future 都借用连接状态，
            // 处理必须等它们全部析构之后再进行。
            let step = {
                let Self {
                    stream,
                    connection,
                    outbound,
                    ..
                } = &mut *self;
                tokio::select! {
                    read = stream.read_buf(connection.read_buffer()) => Step::Read(read),
                    command = outbound.recv() => Step::Command(command),
                }
            };
            match step {
                Step::Read(Ok(0)) => return FailureReason::ConnectionClosed,
                Step::Read(Ok(_)) => {
                    if let Err(error) = self.connection.process(&self.fifo) {
                        // 帧错误后状态机已自愈，连接继续收流。
                        warn!(
                            target: "flint::transport::tcp",
                            peer = %self.connection.peer(),
                            error = %error,
                            "入站字节流出现帧错误"
                        );
                    }
                }
                Step::Read(Err(error)) => {
                    warn!(target: "flint::transport::tcp", error = %error, "读取失败，拆除连接");
                    return FailureReason::ConnectionClosed;
                }
                Step::Command(Some(data)) => self.connection.enqueue_send(data),
                Step::Command(None) => return FailureReason::TransportShutdown,
            }
            if let Err(reason) = self.flush().await {
                return reason;
            }
        }
    }

    /// 把发送队列冲刷到套接字，容忍部分写。
    async fn flush(&mut self) -> Result<(), FailureReason> {
        while let Some(pending) = self.connection.pending_write() {
            let chunk = pending.to_vec();
            match self.stream.write(&chunk).await {
                Ok(0) => return Err(FailureReason::WriteFailed),
                Ok(written) => {
                    self.connection.advance_write(written);
                }
                Err(error) => {
                    warn!(target: "flint::transport::tcp", error = %error, "写出失败，拆除连接");
                    return Err(FailureReason::WriteFailed);
                }
            }
        }
        Ok(())
    }
}

/// 入站监听循环。
pub struct Acceptor {
    listener: TcpListener,
    limits: StreamLimits,
    fifo: Arc<TransactionFifo>,
    failures: Arc<dyn SendFailureSink>,
}

impl Acceptor {
    /// 绑定监听地址。
    pub async fn bind(
        addr: &str,
        limits: StreamLimits,
        fifo: Arc<TransactionFifo>,
        failures: Arc<dyn SendFailureSink>,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            limits,
            fifo,
            failures,
        })
    }

    /// 实际监听地址（绑定端口 0 时用于回读）。
    pub fn local_addr(&self) -> io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// 接受连接并为每条派生驱动任务；句柄交由 `on_connection` 保管。
    pub async fn run(self, mut on_connection: impl FnMut(DriverHandle)) -> io::Result<()> {
        loop {
            let (stream, peer_addr) = self.listener.accept().await?;
            let peer = Endpoint::new(peer_addr, TransportKind::Tcp);
            let (driver, handle) = StreamDriver::new(
                stream,
                peer,
                self.limits,
                Arc::clone(&self.fifo),
                Arc::clone(&self.failures),
            );
            debug!(target: "flint::transport::tcp", %peer, "接受入站连接");
            on_connection(handle);
            tokio::spawn(driver.run());
        }
    }
}
