//! Rate limiting logic and state management.

mod clock;
mod limiter;
mod window;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use limiter::{ExpiryPolicy, RateLimiter, SweeperHandle, DEFAULT_MAX_REQUESTS, DEFAULT_WINDOW};
pub use window::{Decision, WindowLimits, WindowState};
