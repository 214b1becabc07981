use chrono::{DateTime, SubsecRound, Utc};

/// 时钟抽象，便于在测试中固定时间
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// 系统时钟
///
/// 时间戳截断到毫秒，保证写入数据库再读回后仍能做相等比较。
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now().trunc_subsecs(3)
    }
}
