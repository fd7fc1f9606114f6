//! 常驻循环的停机信号。
//!
//! 只在批次之间、tick 之间检查；已经占用的批次总会跑完，不存在中途取消。

use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;

#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

/// 发送端 `send(true)` 即请求停机
pub fn channel() -> (watch::Sender<bool>, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (tx, Shutdown { rx })
}

impl Shutdown {
    /// 永远不会触发，给一次性调用方用
    pub fn never() -> Self {
        channel().1
    }

    pub fn is_requested(&self) -> bool {
        *self.rx.borrow()
    }

    /// 休眠 duration，期间收到停机信号就提前返回
    pub async fn sleep(&mut self, duration: Duration) {
        if self.is_requested() {
            return;
        }
        // 发送端已丢弃时 changed() 返回 Err，该分支被禁用，只等 sleep
        tokio::select! {
            _ = sleep(duration) => {}
            Ok(()) = self.rx.changed() => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn signal_cuts_sleep_short() {
        let (tx, mut shutdown) = channel();
        assert!(!shutdown.is_requested());

        let waiter = tokio::spawn(async move {
            let started = Instant::now();
            shutdown.sleep(Duration::from_secs(30)).await;
            (started.elapsed(), shutdown.is_requested())
        });
        tx.send(true).unwrap();
        let (elapsed, requested) = waiter.await.unwrap();
        assert!(elapsed < Duration::from_secs(5));
        assert!(requested);
    }

    #[tokio::test]
    async fn never_still_sleeps_the_full_duration() {
        let mut shutdown = Shutdown::never();
        let started = Instant::now();
        shutdown.sleep(Duration::from_millis(20)).await;
        assert!(started.elapsed() >= Duration::from_millis(20));
        assert!(!shutdown.is_requested());
    }
}
