//! CLI 进度条实现
//!
//! 终端下使用 indicatif 进度条；输出被重定向时退化为逐行打印百分比，
//! 便于被其他程序解析。

use flashscope_lib::progress::{
    ProgressCallback, ProgressCallbackArc, ProgressId, ProgressInfo, ProgressType,
    no_op_progress_callback,
};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io::{self, IsTerminal, Write};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

struct PercentLine {
    prefix: String,
    total: u64,
    current: u64,
    last_percent: Option<u64>,
}

/// 基于标准错误输出的百分比进度回调实现
///
/// 每当整数百分比变化时打印一行 `[0x00] 42%`。
#[derive(Default)]
pub struct PercentProgressCallback {
    lines: Mutex<HashMap<u64, PercentLine>>,
    next_id: AtomicU64,
}

impl PercentProgressCallback {
    fn print_line(line: &str) {
        let mut stderr = io::stderr();
        let _ = writeln!(stderr, "{}", line);
        let _ = stderr.flush();
    }

    fn percent(current: u64, total: u64) -> u64 {
        if total == 0 {
            return 100;
        }
        (current.saturating_mul(100) / total).min(100)
    }

    /// 更新状态并返回需要打印的行
    fn advance(line: &mut PercentLine, delta: u64) -> Option<String> {
        line.current = line.current.saturating_add(delta);
        let percent = Self::percent(line.current, line.total);
        if line.last_percent == Some(percent) {
            return None;
        }
        line.last_percent = Some(percent);
        Some(format!("[{}] {}%", line.prefix, percent))
    }
}

impl ProgressCallback for PercentProgressCallback {
    fn start(&self, info: ProgressInfo) -> ProgressId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        Self::print_line(&format!("[{}] {}", info.prefix, info.message));

        // 旋转进度条没有总量，只在结束时报告
        let total = match info.progress_type {
            ProgressType::Spinner => 0,
            ProgressType::Bar { total } => total,
        };
        let mut line = PercentLine {
            prefix: info.prefix,
            total,
            current: 0,
            last_percent: None,
        };
        if total > 0
            && let Some(text) = Self::advance(&mut line, info.current.unwrap_or(0))
        {
            Self::print_line(&text);
        }

        if let Ok(mut lines) = self.lines.lock() {
            lines.insert(id, line);
        }
        ProgressId(id)
    }

    fn update_message(&self, _id: ProgressId, _message: String) {}

    fn increment(&self, id: ProgressId, delta: u64) {
        let text = match self.lines.lock() {
            Ok(mut lines) => lines
                .get_mut(&id.0)
                .filter(|line| line.total > 0)
                .and_then(|line| Self::advance(line, delta)),
            Err(_) => None,
        };
        if let Some(text) = text {
            Self::print_line(&text);
        }
    }

    fn finish(&self, id: ProgressId, final_message: String) {
        let line = self.lines.lock().ok().and_then(|mut lines| lines.remove(&id.0));
        if let Some(line) = line {
            Self::print_line(&format!("[{}] {}", line.prefix, final_message));
        }
    }
}

/// 基于 indicatif 的进度回调实现
pub struct IndicatifProgressCallback {
    multi_progress: MultiProgress,
    progress_bars: Mutex<HashMap<u64, ProgressBar>>,
    next_id: AtomicU64,
}

impl IndicatifProgressCallback {
    pub fn new() -> Self {
        Self {
            multi_progress: MultiProgress::new(),
            progress_bars: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl Default for IndicatifProgressCallback {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressCallback for IndicatifProgressCallback {
    fn start(&self, info: ProgressInfo) -> ProgressId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        let progress_bar = match info.progress_type {
            ProgressType::Spinner => {
                let spinner = self.multi_progress.add(ProgressBar::new_spinner());
                spinner.enable_steady_tick(Duration::from_millis(100));
                spinner.set_style(
                    ProgressStyle::with_template(&format!("[{}] {{spinner}} {{msg}}", info.prefix))
                        .unwrap_or_else(|_| ProgressStyle::default_spinner()),
                );
                spinner.set_message(info.message);
                spinner
            }
            ProgressType::Bar { total } => {
                // 总量是百分比而不是字节数
                let bar = self.multi_progress.add(ProgressBar::new(total));
                bar.set_style(
                    ProgressStyle::with_template(&format!(
                        "[{}] {{msg}} {{wide_bar}} {{pos:>3}}% {{elapsed_precise}}",
                        info.prefix
                    ))
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("=>-"),
                );
                bar.set_message(info.message);
                if let Some(current) = info.current {
                    bar.set_position(current);
                }
                bar
            }
        };

        if let Ok(mut bars) = self.progress_bars.lock() {
            bars.insert(id, progress_bar);
        }
        ProgressId(id)
    }

    fn update_message(&self, id: ProgressId, message: String) {
        if let Ok(bars) = self.progress_bars.lock()
            && let Some(bar) = bars.get(&id.0)
        {
            bar.set_message(message);
        }
    }

    fn increment(&self, id: ProgressId, delta: u64) {
        if let Ok(bars) = self.progress_bars.lock()
            && let Some(bar) = bars.get(&id.0)
        {
            bar.inc(delta);
        }
    }

    fn finish(&self, id: ProgressId, final_message: String) {
        if let Ok(mut bars) = self.progress_bars.lock()
            && let Some(bar) = bars.remove(&id.0)
        {
            bar.finish_with_message(final_message);
        }
    }
}

/// 根据 quiet 选项和终端类型选择进度回调
pub fn create_progress_callback(quiet: bool) -> ProgressCallbackArc {
    if quiet {
        no_op_progress_callback()
    } else if io::stderr().is_terminal() {
        std::sync::Arc::new(IndicatifProgressCallback::new())
    } else {
        std::sync::Arc::new(PercentProgressCallback::default())
    }
}
