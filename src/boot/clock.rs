//! CPU 时钟与 Flash 加速器
//!
//! PLL0 输出 `Fcco = 2 (M+1) Fin / (N+1)` 必须落在 275..=550 MHz，
//! CPU 时钟为 `Fcco / (D+1)`，且不超过 100 MHz。搜索时 M 从大到小、N 从小到大，
//! 找到整除得到期望频率的组合即返回。期望频率不可达时退到默认频率，
//! 仍不可达就直接使用内部 4 MHz RC。
//!
//! PLL 寄存器修改后必须写入 `0xAA, 0x55` 喂入序列才生效。

use core::fmt;

use super::BootError;

const FCCO_MIN_KHZ: u32 = 275_000;
const FCCO_MAX_KHZ: u32 = 550_000;
const CPU_MAX_KHZ: u32 = 100_000;

/// Flash 配置的固定低位
pub const FLASHCFG_BASE: u32 = 0x03A;

/// 锁定等待的最大轮询次数
pub const LOCK_POLL_LIMIT: u32 = 1_000_000;

/// PLL0CON 位
pub mod pllcon {
    pub const ENABLE: u32 = 1 << 0;
    pub const CONNECT: u32 = 1 << 1;
}

/// PLL0STAT 位
pub mod pllstat {
    pub const ENABLED: u32 = 1 << 24;
    pub const CONNECTED: u32 = 1 << 25;
    pub const LOCKED: u32 = 1 << 26;
}

/// PLL 参数 (寄存器值，均为实际倍数减一)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PllConfig {
    pub m: u16,
    pub n: u8,
    pub cpudiv: u8,
}

impl PllConfig {
    pub const fn fcco_khz(&self, input_khz: u32) -> u32 {
        2 * (self.m as u32 + 1) * input_khz / (self.n as u32 + 1)
    }

    pub const fn cpu_khz(&self, input_khz: u32) -> u32 {
        self.fcco_khz(input_khz) / (self.cpudiv as u32 + 1)
    }

    /// PLL0CFG 值
    pub const fn cfg_value(&self) -> u32 {
        self.m as u32 | ((self.n as u32) << 16)
    }
}

/// 时钟源 (CLKSRCSEL 值)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ClockSource {
    Internal = 0,
    External = 1,
}

/// 时钟方案
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockPlan {
    pub source: ClockSource,
    /// `None`: 不用 PLL，CPU 直接运行在源频率
    pub pll: Option<PllConfig>,
    pub cpu_hz: u32,
}

impl fmt::Display for ClockPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mhz = self.cpu_hz / 1_000_000;
        let khz = (self.cpu_hz % 1_000_000) / 1000;
        write!(f, "{}.{:03} Mhz", mhz, khz)
    }
}

/// 搜索得到 `desired_khz` 的 PLL 参数
pub fn find_pll(desired_khz: u32, input_khz: u32) -> Option<PllConfig> {
    for m in (6..=511u16).rev() {
        for n in 0..32u8 {
            let fcco = 2 * (u32::from(m) + 1) * input_khz / (u32::from(n) + 1);
            if !(FCCO_MIN_KHZ..=FCCO_MAX_KHZ).contains(&fcco) {
                continue;
            }
            for cpudiv in 3..=255u8 {
                let cpu = fcco / (u32::from(cpudiv) + 1);
                if cpu <= CPU_MAX_KHZ && cpu == desired_khz {
                    return Some(PllConfig { m, n, cpudiv });
                }
            }
        }
    }
    None
}

/// 选择时钟方案: 期望频率、默认频率、内部 RC 依次尝试
pub fn plan(source: ClockSource, input_hz: u32, desired_hz: u32, default_hz: u32, internal_hz: u32) -> ClockPlan {
    if desired_hz == input_hz {
        return ClockPlan { source, pll: None, cpu_hz: input_hz };
    }
    let input_khz = input_hz / 1000;
    for target_hz in [desired_hz, default_hz] {
        if let Some(pll) = find_pll(target_hz / 1000, input_khz) {
            return ClockPlan { source, pll: Some(pll), cpu_hz: target_hz };
        }
    }
    ClockPlan {
        source: ClockSource::Internal,
        pll: None,
        cpu_hz: internal_hz,
    }
}

/// Flash 等待周期: 按 CPU MHz 分桶
pub const fn flash_wait_states(cpu_hz: u32) -> u32 {
    match cpu_hz / 1_000_000 {
        0..=20 => 0,
        21..=40 => 1,
        41..=60 => 2,
        61..=80 => 3,
        81..=100 => 4,
        _ => 5,
    }
}

/// FLASHCFG 寄存器值
pub const fn flash_config(cpu_hz: u32) -> u32 {
    (flash_wait_states(cpu_hz) << 12) | FLASHCFG_BASE
}

/// 时钟相关寄存器接口 (SYSCON)
pub trait ClockHw {
    fn set_pll_control(&self, value: u32);
    fn pll_control(&self) -> u32;
    fn set_pll_config(&self, value: u32);
    fn pll_status(&self) -> u32;
    /// 写 `0xAA, 0x55` 到 PLL0FEED
    fn feed_pll(&self);
    fn set_clock_source(&self, source: u32);
    fn set_cpu_divider(&self, value: u32);
    /// 启动主振荡器 (SCS.OSCEN)
    fn start_main_oscillator(&self);
    /// SCS.OSCSTAT
    fn main_oscillator_ready(&self) -> bool;
    fn set_flash_config(&self, value: u32);
}

fn wait_for(mut ready: impl FnMut() -> bool) -> Result<(), BootError> {
    for _ in 0..LOCK_POLL_LIMIT {
        if ready() {
            return Ok(());
        }
        core::hint::spin_loop();
    }
    Err(BootError::ClockTimeout)
}

/// 断开并关闭 PLL0，回到内部 RC
fn fall_back_to_internal<H: ClockHw + ?Sized>(hw: &H) {
    hw.set_pll_control(hw.pll_control() & !pllcon::CONNECT);
    hw.feed_pll();
    hw.set_pll_control(hw.pll_control() & !pllcon::ENABLE);
    hw.feed_pll();

    hw.set_clock_source(ClockSource::Internal as u32);
    hw.set_pll_config(0);
    hw.feed_pll();
    hw.set_cpu_divider(0);
}

/// 按方案配置时钟
pub fn apply<H: ClockHw + ?Sized>(hw: &H, plan: &ClockPlan) -> Result<(), BootError> {
    fall_back_to_internal(hw);

    if plan.source == ClockSource::External {
        hw.start_main_oscillator();
        wait_for(|| hw.main_oscillator_ready())?;
    }
    hw.set_clock_source(plan.source as u32);

    let Some(pll) = plan.pll else {
        return Ok(());
    };

    hw.set_pll_config(pll.cfg_value());
    hw.feed_pll();
    hw.set_pll_control(pllcon::ENABLE);
    hw.feed_pll();
    wait_for(|| hw.pll_status() & pllstat::LOCKED != 0)?;

    // 先设分频再连接，防止 CPU 瞬间超频
    hw.set_cpu_divider(u32::from(pll.cpudiv));
    hw.set_pll_control(pllcon::ENABLE | pllcon::CONNECT);
    hw.feed_pll();
    wait_for(|| {
        let stat = hw.pll_status();
        stat & (pllstat::ENABLED | pllstat::CONNECTED) == pllstat::ENABLED | pllstat::CONNECTED
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::{DEFAULT_CPU_CLK_HZ, DESIRED_CPU_CLK_HZ, EXTERNAL_CLOCK_HZ, INTERNAL_CLOCK_HZ};
    use std::cell::{Cell, RefCell};
    use std::vec::Vec;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Op {
        Control(u32),
        Config(u32),
        Feed,
        Source(u32),
        Divider(u32),
        OscStart,
        Flash(u32),
    }

    /// SYSCON 模型: PLL 使能后立即锁定
    #[derive(Default)]
    pub struct MockClock {
        pub ops: RefCell<Vec<Op>>,
        pub control: Cell<u32>,
        pub never_lock: bool,
    }

    impl ClockHw for MockClock {
        fn set_pll_control(&self, value: u32) {
            self.control.set(value);
            self.ops.borrow_mut().push(Op::Control(value));
        }
        fn pll_control(&self) -> u32 {
            self.control.get()
        }
        fn set_pll_config(&self, value: u32) {
            self.ops.borrow_mut().push(Op::Config(value));
        }
        fn pll_status(&self) -> u32 {
            if self.never_lock {
                return 0;
            }
            let con = self.control.get();
            let mut stat = 0;
            if con & pllcon::ENABLE != 0 {
                stat |= pllstat::ENABLED | pllstat::LOCKED;
            }
            if con & pllcon::CONNECT != 0 {
                stat |= pllstat::CONNECTED;
            }
            stat
        }
        fn feed_pll(&self) {
            self.ops.borrow_mut().push(Op::Feed);
        }
        fn set_clock_source(&self, source: u32) {
            self.ops.borrow_mut().push(Op::Source(source));
        }
        fn set_cpu_divider(&self, value: u32) {
            self.ops.borrow_mut().push(Op::Divider(value));
        }
        fn start_main_oscillator(&self) {
            self.ops.borrow_mut().push(Op::OscStart);
        }
        fn main_oscillator_ready(&self) -> bool {
            true
        }
        fn set_flash_config(&self, value: u32) {
            self.ops.borrow_mut().push(Op::Flash(value));
        }
    }

    #[test]
    fn test_find_48mhz_from_12mhz() {
        let pll = find_pll(48_000, 12_000).unwrap();
        assert_eq!(pll, PllConfig { m: 511, n: 31, cpudiv: 7 });
        assert_eq!(pll.fcco_khz(12_000), 384_000);
        assert_eq!(pll.cpu_khz(12_000), 48_000);
    }

    #[test]
    fn test_unreachable_frequency() {
        // 超过 100MHz 上限
        assert_eq!(find_pll(120_000, 12_000), None);
    }

    #[test]
    fn test_plan_fallbacks() {
        let p = plan(ClockSource::External, EXTERNAL_CLOCK_HZ, DESIRED_CPU_CLK_HZ, DEFAULT_CPU_CLK_HZ, INTERNAL_CLOCK_HZ);
        assert_eq!(p.cpu_hz, 48_000_000);
        assert!(p.pll.is_some());

        let p = plan(ClockSource::External, EXTERNAL_CLOCK_HZ, 120_000_000, DEFAULT_CPU_CLK_HZ, INTERNAL_CLOCK_HZ);
        assert_eq!(p.cpu_hz, DEFAULT_CPU_CLK_HZ);

        let p = plan(ClockSource::External, EXTERNAL_CLOCK_HZ, 120_000_000, 130_000_000, INTERNAL_CLOCK_HZ);
        assert_eq!(p, ClockPlan { source: ClockSource::Internal, pll: None, cpu_hz: 4_000_000 });

        let p = plan(ClockSource::External, EXTERNAL_CLOCK_HZ, EXTERNAL_CLOCK_HZ, DEFAULT_CPU_CLK_HZ, INTERNAL_CLOCK_HZ);
        assert_eq!(p.pll, None);
        assert_eq!(p.source, ClockSource::External);
    }

    #[test]
    fn test_flash_buckets() {
        assert_eq!(flash_config(4_000_000), 0x03A);
        assert_eq!(flash_config(20_999_999), 0x03A);
        assert_eq!(flash_config(24_000_000), (1 << 12) | 0x03A);
        assert_eq!(flash_wait_states(48_000_000), 2);
        assert_eq!(flash_wait_states(72_000_000), 3);
        assert_eq!(flash_wait_states(100_000_000), 4);
        assert_eq!(flash_wait_states(120_000_000), 5);
    }

    #[test]
    fn test_apply_register_sequence() {
        let hw = MockClock::default();
        hw.control.set(pllcon::ENABLE | pllcon::CONNECT);
        let p = ClockPlan {
            source: ClockSource::External,
            pll: Some(PllConfig { m: 511, n: 31, cpudiv: 7 }),
            cpu_hz: 48_000_000,
        };
        apply(&hw, &p).unwrap();
        assert_eq!(
            hw.ops.borrow().as_slice(),
            &[
                Op::Control(pllcon::ENABLE),
                Op::Feed,
                Op::Control(0),
                Op::Feed,
                Op::Source(0),
                Op::Config(0),
                Op::Feed,
                Op::Divider(0),
                Op::OscStart,
                Op::Source(1),
                Op::Config(511 | (31 << 16)),
                Op::Feed,
                Op::Control(pllcon::ENABLE),
                Op::Feed,
                Op::Divider(7),
                Op::Control(pllcon::ENABLE | pllcon::CONNECT),
                Op::Feed,
            ]
        );
    }

    #[test]
    fn test_lock_timeout() {
        let hw = MockClock { never_lock: true, ..MockClock::default() };
        let p = ClockPlan {
            source: ClockSource::Internal,
            pll: Some(PllConfig { m: 35, n: 0, cpudiv: 5 }),
            cpu_hz: 48_000_000,
        };
        assert_eq!(apply(&hw, &p), Err(BootError::ClockTimeout));
    }
}
