mod cooldown;
mod quota;

pub use cooldown::CooldownLedger;
pub use quota::{ModelGroup, QuotaEntry, QuotaLedger};
