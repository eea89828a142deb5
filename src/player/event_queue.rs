use crate::core::{log_ctx, PlayerError, Result};
use log::{debug, error, info, warn};
use parking_lot::{Condvar, Mutex};
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// 已投递事件的标识，用于取消
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventId(u64);

struct Scheduled<E> {
    fire_at: Instant,
    seq: u64,
    id: EventId,
    event: E,
}

// BinaryHeap 是大顶堆，这里反转比较得到"最早到期优先，同一时刻按投递顺序"
impl<E> Ord for Scheduled<E> {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .fire_at
            .cmp(&self.fire_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl<E> PartialOrd for Scheduled<E> {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl<E> PartialEq for Scheduled<E> {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl<E> Eq for Scheduled<E> {}

struct QueueState<E> {
    pending: BinaryHeap<Scheduled<E>>,
    next_seq: u64,
    running: bool,
}

struct QueueShared<E> {
    state: Mutex<QueueState<E>>,
    wakeup: Condvar,
}

/// 投递端：可克隆，任何线程都可以投递/取消事件
pub struct QueueHandle<E> {
    shared: Arc<QueueShared<E>>,
}

impl<E> Clone for QueueHandle<E> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<E: Send + 'static> QueueHandle<E> {
    /// 立即投递
    pub fn post(&self, event: E) -> EventId {
        self.post_with_delay(event, 0)
    }

    /// 延迟 `delay_us` 微秒后投递
    pub fn post_with_delay(&self, event: E, delay_us: i64) -> EventId {
        let fire_at = Instant::now() + Duration::from_micros(delay_us.max(0) as u64);
        let mut state = self.shared.state.lock();
        let seq = state.next_seq;
        state.next_seq += 1;
        let id = EventId(seq);
        state.pending.push(Scheduled {
            fire_at,
            seq,
            id,
            event,
        });
        self.shared.wakeup.notify_one();
        id
    }

    /// 取消尚未出队的事件，返回是否找到
    ///
    /// 已经出队正在执行的事件不受影响，处理函数需要自行检查会话上的待处理标记
    pub fn cancel(&self, id: EventId) -> bool {
        let mut state = self.shared.state.lock();
        let before = state.pending.len();
        state.pending.retain(|s| s.id != id);
        before != state.pending.len()
    }

    /// 当前排队中的事件数
    pub fn pending_len(&self) -> usize {
        self.shared.state.lock().pending.len()
    }
}

/// 定时事件队列 - 单个协作式工作线程，按到期时间顺序执行事件
///
/// 工作线程循环：睡到最近的到期时间，取出所有到期事件，逐个同步调用处理函数。
/// 队列本身不持有会话锁，处理函数自己加锁。
pub struct TimedEventQueue<E> {
    handle: QueueHandle<E>,
    worker: Option<JoinHandle<()>>,
}

impl<E: Send + 'static> TimedEventQueue<E> {
    /// 创建队列但不启动工作线程；启动前投递的事件会在 `spawn` 后执行
    pub fn new() -> Self {
        let shared = Arc::new(QueueShared {
            state: Mutex::new(QueueState {
                pending: BinaryHeap::new(),
                next_seq: 0,
                running: true,
            }),
            wakeup: Condvar::new(),
        });
        Self {
            handle: QueueHandle { shared },
            worker: None,
        }
    }

    /// 创建并启动队列线程
    pub fn start<F>(name: &str, handler: F) -> Result<Self>
    where
        F: FnMut(E) + Send + 'static,
    {
        let mut queue = Self::new();
        queue.spawn(name, handler)?;
        Ok(queue)
    }

    /// 启动工作线程；线程创建失败时返回 `ResourceExhausted`
    pub fn spawn<F>(&mut self, name: &str, mut handler: F) -> Result<()>
    where
        F: FnMut(E) + Send + 'static,
    {
        if self.worker.is_some() {
            return Err(PlayerError::InvalidState(format!("事件队列已在运行: {}", name)));
        }
        let worker_shared = self.handle.shared.clone();
        let thread_name = name.to_string();
        let worker = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                info!("{} ⏱️ 事件队列线程启动: {}", log_ctx(), thread_name);
                let mut fired: u64 = 0;
                while let Some(event) = Self::next_due(&worker_shared) {
                    fired += 1;
                    handler(event);
                }
                info!("{} 🛑 事件队列线程退出（共执行 {} 个事件）", log_ctx(), fired);
            })
            .map_err(|e| {
                error!("{} ❌ 无法创建事件队列线程 {}: {}", log_ctx(), name, e);
                PlayerError::ResourceExhausted(format!("无法创建事件队列线程 {}: {}", name, e))
            })?;
        self.worker = Some(worker);
        Ok(())
    }

    /// 阻塞直到有事件到期；队列停止时返回 None
    fn next_due(shared: &QueueShared<E>) -> Option<E> {
        let mut state = shared.state.lock();
        loop {
            if !state.running {
                return None;
            }
            let next_fire = state.pending.peek().map(|s| s.fire_at);
            match next_fire {
                None => {
                    shared.wakeup.wait(&mut state);
                }
                Some(fire_at) if fire_at > Instant::now() => {
                    shared.wakeup.wait_until(&mut state, fire_at);
                }
                Some(_) => {
                    return state.pending.pop().map(|s| s.event);
                }
            }
        }
    }

    pub fn handle(&self) -> QueueHandle<E> {
        self.handle.clone()
    }

    /// 停止工作线程并等待退出，丢弃所有未执行的事件
    ///
    /// 不能在持有处理函数需要的锁时调用，否则会与正在执行的事件互相等待
    pub fn stop(&mut self) {
        {
            let mut state = self.handle.shared.state.lock();
            state.running = false;
            let dropped = state.pending.len();
            state.pending.clear();
            if dropped > 0 {
                debug!("{} 🗑️ 事件队列停止，丢弃 {} 个未执行事件", log_ctx(), dropped);
            }
            self.handle.shared.wakeup.notify_all();
        }
        if let Some(worker) = self.worker.take() {
            if worker.thread().id() == thread::current().id() {
                warn!("{} ⚠️ 在事件线程内停止事件队列，跳过 join", log_ctx());
                return;
            }
            let _ = worker.join();
        }
    }
}

impl<E: Send + 'static> Default for TimedEventQueue<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Drop for TimedEventQueue<E> {
    fn drop(&mut self) {
        {
            let mut state = self.handle.shared.state.lock();
            state.running = false;
            state.pending.clear();
            self.handle.shared.wakeup.notify_all();
        }
        if let Some(worker) = self.worker.take() {
            if worker.thread().id() != thread::current().id() {
                let _ = worker.join();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::{unbounded, RecvTimeoutError};

    #[test]
    fn fires_in_deadline_order() {
        let (tx, rx) = unbounded();
        let mut queue = TimedEventQueue::start("test-order", move |e: u32| {
            let _ = tx.send(e);
        })
        .unwrap();
        let handle = queue.handle();
        handle.post_with_delay(3, 60_000);
        handle.post_with_delay(1, 10_000);
        handle.post_with_delay(2, 30_000);

        let got: Vec<u32> = (0..3)
            .map(|_| rx.recv_timeout(Duration::from_secs(2)).unwrap())
            .collect();
        assert_eq!(got, vec![1, 2, 3]);
        queue.stop();
    }

    #[test]
    fn same_deadline_keeps_post_order() {
        let (tx, rx) = unbounded();
        let (gate_tx, gate_rx) = unbounded::<()>();
        let mut queue = TimedEventQueue::start("test-fifo", move |e: u32| {
            if e == 0 {
                let _ = gate_rx.recv();
            }
            let _ = tx.send(e);
        })
        .unwrap();
        let handle = queue.handle();
        // 第一个事件阻塞住工作线程，后面的都会同时到期
        handle.post(0);
        for i in 1..=5 {
            handle.post(i);
        }
        gate_tx.send(()).unwrap();
        let got: Vec<u32> = (0..6)
            .map(|_| rx.recv_timeout(Duration::from_secs(2)).unwrap())
            .collect();
        assert_eq!(got, vec![0, 1, 2, 3, 4, 5]);
        queue.stop();
    }

    #[test]
    fn cancelled_event_never_fires() {
        let (tx, rx) = unbounded();
        let mut queue = TimedEventQueue::start("test-cancel", move |e: u32| {
            let _ = tx.send(e);
        })
        .unwrap();
        let handle = queue.handle();
        let id = handle.post_with_delay(7, 50_000);
        handle.post_with_delay(8, 80_000);
        assert!(handle.cancel(id));
        assert!(!handle.cancel(id));

        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), 8);
        assert_eq!(
            rx.recv_timeout(Duration::from_millis(100)),
            Err(RecvTimeoutError::Timeout)
        );
        queue.stop();
    }

    #[test]
    fn stop_discards_pending_events() {
        let (tx, rx) = unbounded();
        let mut queue = TimedEventQueue::start("test-stop", move |e: u32| {
            let _ = tx.send(e);
        })
        .unwrap();
        queue.handle().post_with_delay(1, 5_000_000);
        queue.stop();
        assert_eq!(queue.handle().pending_len(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn events_posted_before_spawn_fire_once_running() {
        let (tx, rx) = unbounded();
        let mut queue: TimedEventQueue<u32> = TimedEventQueue::new();
        queue.handle().post(42u32);
        assert_eq!(queue.handle().pending_len(), 1);

        queue
            .spawn("test-late-spawn", move |e: u32| {
                let _ = tx.send(e);
            })
            .unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), 42);

        let again = queue.spawn("test-late-spawn", |_: u32| {});
        assert!(matches!(again, Err(PlayerError::InvalidState(_))));
        queue.stop();
    }
}
