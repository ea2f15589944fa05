/// Number of ticks in one second. One tick is one microsecond.
pub const TICKS_PER_SECOND: i64 = 1_000_000;

/// Point in time, counted in ticks since the environment started.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Instant(i64);

impl Instant {
    pub const MIN: Self = Instant(i64::MIN);
    pub const MAX: Self = Instant(i64::MAX);

    pub const fn new(ticks: i64) -> Self {
        Self(ticks)
    }

    pub fn ticks(&self) -> i64 {
        self.0
    }

    /// Time elapsed since `earlier`, clamped at zero.
    pub fn saturating_since(&self, earlier: Instant) -> Duration {
        Duration(self.0.saturating_sub(earlier.0).max(0))
    }
}

impl core::fmt::Display for Instant {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "t+{}", Duration(self.0))
    }
}

/// Length of time interval between two Instants.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Duration(i64);

impl Duration {
    pub const ZERO: Self = Duration(0);
    pub const MIN: Self = Duration(i64::MIN);
    pub const MAX: Self = Duration(i64::MAX);

    pub const fn new(ticks: i64) -> Self {
        Self(ticks)
    }

    pub const fn from_micros(micros: i64) -> Self {
        Self(micros)
    }

    pub const fn from_millis(millis: i64) -> Self {
        Self(millis * (TICKS_PER_SECOND / 1000))
    }

    pub const fn from_secs(secs: i64) -> Self {
        Self(secs * TICKS_PER_SECOND)
    }

    /// Fractional seconds, rounded to the nearest tick.
    pub fn from_secs_f64(secs: f64) -> Self {
        let ticks = secs * TICKS_PER_SECOND as f64;
        let rounded = if ticks < 0.0 { ticks - 0.5 } else { ticks + 0.5 };
        // `as` saturates on overflow and maps NaN to zero.
        Self(rounded as i64)
    }

    pub fn ticks(&self) -> i64 {
        self.0
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.0 as f64 / TICKS_PER_SECOND as f64
    }

    pub fn is_negative(&self) -> bool {
        self.0 < 0
    }
}

impl core::fmt::Display for Duration {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if self.0 % TICKS_PER_SECOND == 0 {
            write!(f, "{}s", self.0 / TICKS_PER_SECOND)
        } else if self.0 % 1000 == 0 {
            write!(f, "{}ms", self.0 / 1000)
        } else {
            write!(f, "{}us", self.0)
        }
    }
}

impl core::ops::Add<Duration> for Instant {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        Self(self.0.saturating_add(rhs.0))
    }
}

impl core::ops::Sub for Instant {
    type Output = Duration;

    fn sub(self, rhs: Self) -> Self::Output {
        Duration(self.0 - rhs.0)
    }
}

impl core::ops::Add for Duration {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl core::ops::Sub for Duration {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl core::ops::Mul<i64> for Duration {
    type Output = Self;

    fn mul(self, rhs: i64) -> Self::Output {
        Self(self.0 * rhs)
    }
}

impl core::ops::Div<i64> for Duration {
    type Output = Self;

    fn div(self, rhs: i64) -> Self::Output {
        Self(self.0 / rhs)
    }
}

#[cfg(feature = "std")]
impl From<Duration> for std::time::Duration {
    fn from(value: Duration) -> Self {
        std::time::Duration::from_micros(value.0.max(0) as u64)
    }
}
