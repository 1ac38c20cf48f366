//! 进度条回调系统
//!
//! 这个模块定义了进度条的抽象接口，允许用户在不同环境（CLI、GUI等）中
//! 自定义进度条的显示方式。库内部只产生百分比或字节增量，如何显示由回调决定。

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};

/// 进度条类型
#[derive(Debug, Clone)]
pub enum ProgressType {
    /// 旋转进度条，用于不确定时长的操作
    Spinner,
    /// 条形进度条，用于有明确进度的操作
    Bar { total: u64 },
}

/// 正在进行的操作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressOperation {
    ReadFlash { address: u32, size: u32 },
    WriteFlash { address: u32, size: u32 },
    EraseAll,
    Decode { what: &'static str },
}

impl fmt::Display for ProgressOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgressOperation::ReadFlash { address, size } => {
                write!(f, "Reading 0x{:X} bytes from 0x{:08X}...", size, address)
            }
            ProgressOperation::WriteFlash { address, size } => {
                write!(f, "Writing 0x{:X} bytes at 0x{:08X}...", size, address)
            }
            ProgressOperation::EraseAll => write!(f, "Erasing entire flash..."),
            ProgressOperation::Decode { what } => write!(f, "Decoding {}...", what),
        }
    }
}

/// 操作结束状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressStatus {
    Success,
    Failed,
}

impl fmt::Display for ProgressStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgressStatus::Success => write!(f, "Done"),
            ProgressStatus::Failed => write!(f, "Aborted"),
        }
    }
}

/// 进度条状态
#[derive(Debug, Clone)]
pub struct ProgressInfo {
    pub progress_type: ProgressType,
    /// 步骤前缀（十六进制步骤号）
    pub prefix: String,
    pub message: String,
    /// 当前进度（仅对 Bar 类型有效）
    pub current: Option<u64>,
}

/// 进度回调 trait
///
/// 实现此 trait 以自定义进度条的显示方式
pub trait ProgressCallback: Send + Sync {
    /// 开始一个新的进度条，返回用于后续更新的 ID
    fn start(&self, info: ProgressInfo) -> ProgressId;

    fn update_message(&self, id: ProgressId, message: String);

    /// 增加进度（仅对 Bar 类型有效）
    fn increment(&self, id: ProgressId, delta: u64);

    fn finish(&self, id: ProgressId, final_message: String);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgressId(pub u64);

/// 默认的空进度回调实现
#[derive(Debug, Default)]
pub struct NoOpProgressCallback;

impl ProgressCallback for NoOpProgressCallback {
    fn start(&self, _info: ProgressInfo) -> ProgressId {
        ProgressId(0)
    }

    fn update_message(&self, _id: ProgressId, _message: String) {}

    fn increment(&self, _id: ProgressId, _delta: u64) {}

    fn finish(&self, _id: ProgressId, _final_message: String) {}
}

pub type ProgressCallbackArc = Arc<dyn ProgressCallback>;

pub fn no_op_progress_callback() -> ProgressCallbackArc {
    Arc::new(NoOpProgressCallback)
}

/// 进度条助手结构体
///
/// 为每个新进度条分配递增的步骤号
#[derive(Clone)]
pub struct ProgressHelper {
    callback: ProgressCallbackArc,
    step_counter: Arc<AtomicI32>,
}

impl ProgressHelper {
    pub fn new(callback: ProgressCallbackArc, initial_step: i32) -> Self {
        Self {
            callback,
            step_counter: Arc::new(AtomicI32::new(initial_step)),
        }
    }

    pub fn no_op() -> Self {
        Self::new(no_op_progress_callback(), 0)
    }

    fn next_step(&self) -> i32 {
        self.step_counter.fetch_add(1, Ordering::SeqCst)
    }

    pub fn create_spinner(&self, operation: ProgressOperation) -> ProgressHandler {
        let step = self.next_step();
        let info = ProgressInfo {
            progress_type: ProgressType::Spinner,
            prefix: format!("0x{:02X}", step),
            message: operation.to_string(),
            current: None,
        };
        let id = self.callback.start(info);
        ProgressHandler {
            callback: Arc::clone(&self.callback),
            id,
            reported: 0,
        }
    }

    pub fn create_bar(&self, total: u64, operation: ProgressOperation) -> ProgressHandler {
        let step = self.next_step();
        let info = ProgressInfo {
            progress_type: ProgressType::Bar { total },
            prefix: format!("0x{:02X}", step),
            message: operation.to_string(),
            current: Some(0),
        };
        let id = self.callback.start(info);
        ProgressHandler {
            callback: Arc::clone(&self.callback),
            id,
            reported: 0,
        }
    }

    pub fn current_step(&self) -> i32 {
        self.step_counter.load(Ordering::SeqCst)
    }
}

/// 单个进度条实例
pub struct ProgressHandler {
    callback: ProgressCallbackArc,
    id: ProgressId,
    reported: u64,
}

impl ProgressHandler {
    pub fn set_message(&self, message: impl Into<String>) {
        self.callback.update_message(self.id, message.into());
    }

    pub fn inc(&mut self, delta: u64) {
        self.reported = self.reported.saturating_add(delta);
        self.callback.increment(self.id, delta);
    }

    /// 把百分比进度转换为增量（百分比只会增加）
    pub fn set_percent(&mut self, percent: u32) {
        let percent = u64::from(percent.min(100));
        if percent > self.reported {
            self.inc(percent - self.reported);
        }
    }

    pub fn finish(self, status: ProgressStatus) {
        self.callback.finish(self.id, status.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl ProgressCallback for Recorder {
        fn start(&self, info: ProgressInfo) -> ProgressId {
            self.events
                .lock()
                .unwrap()
                .push(format!("start {} {}", info.prefix, info.message));
            ProgressId(7)
        }

        fn update_message(&self, _id: ProgressId, message: String) {
            self.events.lock().unwrap().push(format!("msg {}", message));
        }

        fn increment(&self, _id: ProgressId, delta: u64) {
            self.events.lock().unwrap().push(format!("inc {}", delta));
        }

        fn finish(&self, _id: ProgressId, final_message: String) {
            self.events
                .lock()
                .unwrap()
                .push(format!("finish {}", final_message));
        }
    }

    #[test]
    fn percent_updates_become_deltas() {
        let recorder = Arc::new(Recorder::default());
        let helper = ProgressHelper::new(recorder.clone(), 1);
        let mut bar = helper.create_bar(100, ProgressOperation::EraseAll);
        bar.set_percent(41);
        bar.set_percent(41);
        bar.set_percent(82);
        bar.set_percent(100);
        bar.finish(ProgressStatus::Success);

        let events = recorder.events.lock().unwrap().clone();
        assert_eq!(
            events,
            vec![
                "start 0x01 Erasing entire flash...",
                "inc 41",
                "inc 41",
                "inc 18",
                "finish Done",
            ]
        );
        assert_eq!(helper.current_step(), 2);
    }
}
