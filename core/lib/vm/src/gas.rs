use std::time::Instant;

use crate::{VmError, VmResult};

/// Gas charged per host operation. Opcode-level gas is charged by the
/// runtime through [`crate::CallContext::charge`].
pub mod costs {
    pub const LOAD: u64 = 10_000;
    pub const STORE: u64 = 25_000;
    pub const TRANSIENT_LOAD: u64 = 1_000;
    pub const TRANSIENT_STORE: u64 = 1_000;
    pub const CALL_BASE: u64 = 50_000;
    pub const DEPLOY_BASE: u64 = 250_000;
    pub const DEPLOY_PER_BYTE: u64 = 200;
    pub const EMIT_BASE: u64 = 5_000;
    pub const EMIT_PER_BYTE: u64 = 8;
    pub const BLOCK_HASH: u64 = 2_000;
    pub const ACCOUNT_TYPE: u64 = 2_000;
}

/// Per-frame gas budget. Consumption is monotonic; exhaustion pins `used`
/// at `limit` so an out-of-gas receipt reports the full budget.
#[derive(Debug)]
pub struct GasMeter {
    limit: u64,
    used: u64,
    /// Free meters (special system contracts) accept every charge.
    free: bool,
    deadline: Instant,
}

impl GasMeter {
    pub fn new(limit: u64, deadline: Instant) -> Self {
        Self {
            limit,
            used: 0,
            free: false,
            deadline,
        }
    }

    pub fn free(deadline: Instant) -> Self {
        Self {
            limit: u64::MAX,
            used: 0,
            free: true,
            deadline,
        }
    }

    pub fn charge(&mut self, cost: u64) -> VmResult<()> {
        if self.free {
            return Ok(());
        }
        let next = self.used.saturating_add(cost);
        if next > self.limit {
            self.used = self.limit;
            return Err(VmError::OutOfGas);
        }
        self.used = next;
        Ok(())
    }

    pub fn check_deadline(&self) -> VmResult<()> {
        if Instant::now() >= self.deadline {
            return Err(VmError::Timeout);
        }
        Ok(())
    }

    pub fn used(&self) -> u64 {
        if self.free {
            0
        } else {
            self.used
        }
    }

    pub fn remaining(&self) -> u64 {
        self.limit - self.used
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn is_free(&self) -> bool {
        self.free
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert_matches::assert_matches;

    use super::*;
    use crate::VmError;

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(60)
    }

    #[test]
    fn exhaustion_pins_used_at_limit() {
        let mut meter = GasMeter::new(100, far_deadline());
        meter.charge(60).unwrap();
        assert_matches!(meter.charge(50), Err(VmError::OutOfGas));
        assert_eq!(meter.used(), 100);
    }

    #[test]
    fn free_meter_never_charges() {
        let mut meter = GasMeter::free(far_deadline());
        meter.charge(u64::MAX).unwrap();
        assert_eq!(meter.used(), 0);
    }

    #[test]
    fn expired_deadline_times_out() {
        let meter = GasMeter::new(100, Instant::now() - Duration::from_millis(1));
        assert_matches!(meter.check_deadline(), Err(VmError::Timeout));
    }
}
