#[derive(Debug, Clone)]
pub enum RenewalEvent {
    /// A renewal tick succeeded at the given timestamp.
    Renewed(i64),
    /// A renewal tick failed; the timer keeps running and retries on the
    /// next natural tick.
    RenewFailed(String),
}

impl RenewalEvent {
    pub fn str(&self) -> &str {
        match self {
            RenewalEvent::Renewed(_) => "Renewed",
            RenewalEvent::RenewFailed(_) => "RenewFailed",
        }
    }
}
