//! 固件任务
//!
//! 全部运行在线程模式执行器上:
//! - `system_task`: 第一个运行的任务，锁存调度器状态，之后每分钟输出一次运行状态
//! - `logger_task`: 文件日志工作任务
//!
//! 每个任务在循环开始时登记自己的名字，硬故障处理把最后登记的名字
//! 写入备份寄存器，下次启动的崩溃报告里显示为 "Possible last running OS Task"。

use core::cell::Cell;

use critical_section::Mutex;
use embassy_time::Duration;

use crate::boot::boot_cause;
use crate::config::LOGGER_FLUSH_TIME_SEC;
use crate::platform::lpc17xx::board::{BoardAlarms, ConsoleUart, FileLogWorker, FileLogger};
use crate::rtc::alarm::AlarmFrequency;
use crate::sync::primitives::{Completion, SchedulerState};
use crate::time::uptime_ms;
use crate::util::log::*;

// ===== 当前任务登记 =====

static CURRENT_TASK: Mutex<Cell<&'static str>> = Mutex::new(Cell::new("main"));

/// 登记当前运行的任务
#[inline]
pub fn enter(name: &'static str) {
    critical_section::with(|cs| CURRENT_TASK.borrow(cs).set(name));
}

/// 最后登记的任务名
#[inline]
pub fn current() -> &'static str {
    critical_section::with(|cs| CURRENT_TASK.borrow(cs).get())
}

// ===== 系统任务 =====

/// 每分钟闹钟信号
static MINUTE_TICK: Completion = Completion::new();

/// 系统任务
///
/// 必须第一个被派生：在它锁存 `SchedulerState` 之前，各驱动都走轮询路径。
#[embassy_executor::task]
pub async fn system_task(
    scheduler: &'static SchedulerState,
    logger: &'static FileLogger,
    alarms: &'static BoardAlarms,
    console: &'static ConsoleUart,
) {
    enter("system");
    scheduler.mark_running();
    log_info!("Scheduler running");

    if let Some(cause) = boot_cause() {
        logger
            .log_simple(format_args!("Boot: {}", cause))
            .await;
    }

    if alarms.create_recurring(AlarmFrequency::EveryMinute, &MINUTE_TICK).is_err() {
        log_warn!("Minute alarm unavailable, status report disabled");
        return;
    }

    loop {
        MINUTE_TICK.wait(None).await;
        enter("system");
        log_debug!(
            "Uptime {} ms, log watermark {}, blocked log calls {}, console rx/tx watermark {}/{}",
            uptime_ms(),
            logger.buffer_watermark(),
            logger.blocked_calls(),
            console.rx_watermark(),
            console.tx_watermark()
        );
    }
}

// ===== 日志工作任务 =====

/// 文件日志工作任务
#[embassy_executor::task]
pub async fn logger_task(logger: &'static FileLogger) {
    enter("logger");
    let mut worker = FileLogWorker::new(logger);

    log_info!("Logger task started");
    let timeout = Some(Duration::from_secs(LOGGER_FLUSH_TIME_SEC));
    loop {
        // 写入失败已在控制台报告，流水线继续运行
        let _ = worker.service_once(timeout).await;
        enter("logger");
    }
}
