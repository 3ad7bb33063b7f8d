use std::sync::Mutex;

use tokio::sync::mpsc;

/// 一对多的事件扇出, 每个订阅者一个无界 mpsc 通道
///
/// 发送不会阻塞, 已关闭的接收端在下一次 `emit` 时被移除
#[derive(Debug)]
pub struct Subscribers<T> {
    senders: Mutex<Vec<mpsc::UnboundedSender<T>>>,
}

impl<T> Default for Subscribers<T> {
    fn default() -> Self {
        Self {
            senders: Mutex::new(Vec::new()),
        }
    }
}

impl<T: Clone> Subscribers<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut senders) = self.senders.lock() {
            senders.push(tx);
        }
        rx
    }

    pub fn emit(&self, item: T) {
        let Ok(mut senders) = self.senders.lock() else {
            return;
        };
        senders.retain(|tx| tx.send(item.clone()).is_ok());
    }

    pub fn len(&self) -> usize {
        self.senders.lock().map(|s| s.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
