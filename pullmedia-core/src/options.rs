//! Per-call read directives

/// How a seek target maps onto sync points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SeekMode {
    /// Last sync point at or before the target
    #[default]
    PreviousSync,
    /// First sync point at or after the target
    NextSync,
    /// Sync point nearest to the target
    ClosestSync,
    /// Exactly the target: decode from the previous sync point and drop
    /// output until the target time is reached
    Closest,
}

/// Seek request carried by [`ReadOptions`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeekRequest {
    /// Target time in microseconds
    pub time_us: i64,
    /// Mapping onto sync points
    pub mode: SeekMode,
}

/// Ephemeral seek/skip directive passed into a single `read`
///
/// Sources consume the seek request of the call they receive; nothing is
/// remembered between calls. A source that forwards a read upstream builds a
/// fresh `ReadOptions` for the upstream call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReadOptions {
    seek: Option<SeekRequest>,
    skip_until_us: Option<i64>,
}

impl ReadOptions {
    /// No seek, no skip
    pub fn new() -> Self {
        Self::default()
    }

    /// Options carrying a seek request
    pub fn seek_to(time_us: i64, mode: SeekMode) -> Self {
        Self {
            seek: Some(SeekRequest { time_us, mode }),
            skip_until_us: None,
        }
    }

    /// Options asking the source to drop data older than `time_us`
    pub fn skip_until(time_us: i64) -> Self {
        Self {
            seek: None,
            skip_until_us: Some(time_us),
        }
    }

    /// Set the seek request
    pub fn set_seek_to(&mut self, time_us: i64, mode: SeekMode) -> &mut Self {
        self.seek = Some(SeekRequest { time_us, mode });
        self
    }

    /// Clear the seek request
    pub fn clear_seek(&mut self) -> &mut Self {
        self.seek = None;
        self
    }

    /// Set the skip-until time
    pub fn set_skip_until(&mut self, time_us: i64) -> &mut Self {
        self.skip_until_us = Some(time_us);
        self
    }

    /// Clear the skip-until time
    pub fn clear_skip(&mut self) -> &mut Self {
        self.skip_until_us = None;
        self
    }

    /// Seek request, if any
    pub fn seek(&self) -> Option<SeekRequest> {
        self.seek
    }

    /// Skip-until time, if any
    pub fn skip_until_us(&self) -> Option<i64> {
        self.skip_until_us
    }

    /// Whether the options carry no directive at all
    pub fn is_empty(&self) -> bool {
        self.seek.is_none() && self.skip_until_us.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builders() {
        let options = ReadOptions::seek_to(5_000_000, SeekMode::ClosestSync);
        assert_eq!(
            options.seek(),
            Some(SeekRequest {
                time_us: 5_000_000,
                mode: SeekMode::ClosestSync
            })
        );
        assert_eq!(options.skip_until_us(), None);

        let mut options = ReadOptions::skip_until(10);
        assert!(!options.is_empty());
        options.clear_skip();
        assert!(options.is_empty());
    }
}
