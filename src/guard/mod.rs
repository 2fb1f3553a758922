//! Per-IP edge defense: 4xx-class violations accumulate into temporary
//! blocks with doubling duration, then a permanent block. Whitelisted IPs
//! never accumulate.

mod cidr;

pub use cidr::IpMatcher;

use crate::config::GuardConfig;
use crate::error::CastorError;
use ahash::RandomState;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::hash::{BuildHasher, Hash, Hasher};
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

const SHARD_COUNT: usize = 16;

/// What the caller did to earn a violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationKind {
    /// Invalid or missing caller API key.
    BadApiKey,
    /// 404 on a path outside the whitelist.
    UnknownPath,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    Permanent,
    Temporary,
}

/// Result of [`IpGuard::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockStatus {
    pub blocked: bool,
    pub reason: Option<BlockReason>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl BlockStatus {
    const CLEAN: Self = Self {
        blocked: false,
        reason: None,
        expires_at: None,
    };
}

#[derive(Debug, Clone, Default)]
struct IpRecord {
    violations: u32,
    window_start: Option<DateTime<Utc>>,
    temp_blocked_until: Option<DateTime<Utc>>,
    /// First temp block inside the current promotion window.
    cycle_anchor: Option<DateTime<Utc>>,
    temp_block_cycles: u32,
    permanent: bool,
}

/// Sharded per-IP violation ledger.
pub struct IpGuard {
    shards: Vec<Mutex<HashMap<IpAddr, IpRecord>>>,
    hasher: RandomState,
    whitelist: Vec<IpMatcher>,
    cfg: GuardConfig,
    path: Option<PathBuf>,
    dirty: AtomicBool,
}

impl IpGuard {
    pub fn new(cfg: GuardConfig, path: Option<PathBuf>) -> Self {
        let whitelist = cfg
            .whitelist
            .iter()
            .filter_map(|entry| {
                let parsed = IpMatcher::parse(entry);
                if parsed.is_none() {
                    warn!(entry = %entry, "Ignoring unparseable whitelist entry");
                }
                parsed
            })
            .collect();

        let guard = Self {
            shards: (0..SHARD_COUNT).map(|_| Mutex::new(HashMap::new())).collect(),
            hasher: RandomState::new(),
            whitelist,
            cfg,
            path,
            dirty: AtomicBool::new(false),
        };
        guard.load();
        guard
    }

    pub fn is_whitelisted(&self, ip: IpAddr) -> bool {
        self.whitelist.iter().any(|matcher| matcher.contains(ip))
    }

    pub fn check(&self, ip: IpAddr) -> BlockStatus {
        self.check_at(ip, Utc::now())
    }

    pub fn record_violation(&self, ip: IpAddr, kind: ViolationKind) {
        self.record_violation_at(ip, kind, Utc::now());
    }

    /// Administrative unblock: back to clean, cycles and permanence cleared.
    pub fn unblock(&self, ip: IpAddr) {
        let mut shard = self.shard_for(ip).lock().expect("guard lock poisoned");
        if shard.remove(&ip).is_some() {
            self.dirty.store(true, Ordering::Relaxed);
            info!(%ip, "IP unblocked by operator");
        }
    }

    fn check_at(&self, ip: IpAddr, now: DateTime<Utc>) -> BlockStatus {
        if self.is_whitelisted(ip) {
            return BlockStatus::CLEAN;
        }

        let mut shard = self.shard_for(ip).lock().expect("guard lock poisoned");
        let Some(record) = shard.get_mut(&ip) else {
            return BlockStatus::CLEAN;
        };

        if record.permanent {
            return BlockStatus {
                blocked: true,
                reason: Some(BlockReason::Permanent),
                expires_at: None,
            };
        }

        if let Some(until) = record.temp_blocked_until {
            if now < until {
                return BlockStatus {
                    blocked: true,
                    reason: Some(BlockReason::Temporary),
                    expires_at: Some(until),
                };
            }
            // Expired: back to accumulating; cycles persist inside the
            // promotion window.
            record.temp_blocked_until = None;
            self.dirty.store(true, Ordering::Relaxed);
        }

        BlockStatus::CLEAN
    }

    fn record_violation_at(&self, ip: IpAddr, kind: ViolationKind, now: DateTime<Utc>) {
        if self.is_whitelisted(ip) {
            return;
        }

        let window = Duration::seconds(self.cfg.window_secs.min(i64::MAX as u64) as i64);
        let promote_window =
            Duration::seconds(self.cfg.promote_window_secs.min(i64::MAX as u64) as i64);

        let mut shard = self.shard_for(ip).lock().expect("guard lock poisoned");
        let record = shard.entry(ip).or_default();

        if record.permanent || record.temp_blocked_until.is_some_and(|until| now < until) {
            return;
        }

        match record.window_start {
            Some(start) if now - start <= window => {}
            _ => {
                record.window_start = Some(now);
                record.violations = 0;
            }
        }
        record.violations += 1;

        if record.violations < self.cfg.threshold {
            return;
        }

        // Threshold hit: temp block, doubling within the promotion window.
        match record.cycle_anchor {
            Some(anchor) if now - anchor <= promote_window => {
                record.temp_block_cycles += 1;
            }
            _ => {
                record.cycle_anchor = Some(now);
                record.temp_block_cycles = 1;
            }
        }
        record.violations = 0;
        record.window_start = None;
        self.dirty.store(true, Ordering::Relaxed);

        if record.temp_block_cycles >= self.cfg.permanent_cycles {
            record.permanent = true;
            record.temp_blocked_until = None;
            warn!(%ip, cycles = record.temp_block_cycles, "IP permanently blocked");
            return;
        }

        let exponent = record.temp_block_cycles.saturating_sub(1).min(16);
        let duration_secs = self.cfg.temp_block_secs.saturating_mul(1u64 << exponent);
        let until = now + Duration::seconds(duration_secs.min(i64::MAX as u64) as i64);
        record.temp_blocked_until = Some(until);
        warn!(
            %ip,
            ?kind,
            cycle = record.temp_block_cycles,
            until = %until,
            "IP temporarily blocked"
        );
    }

    /// Sweep expired temp blocks and stale accumulators, then flush when
    /// anything is marked dirty. Wired to a once-a-minute task.
    pub fn sweep(&self) {
        let now = Utc::now();
        let window = Duration::seconds(self.cfg.window_secs.min(i64::MAX as u64) as i64);
        let promote_window =
            Duration::seconds(self.cfg.promote_window_secs.min(i64::MAX as u64) as i64);

        for shard in &self.shards {
            let mut shard = shard.lock().expect("guard lock poisoned");
            shard.retain(|_, record| {
                if record.permanent {
                    return true;
                }
                if let Some(until) = record.temp_blocked_until {
                    if now >= until {
                        record.temp_blocked_until = None;
                    }
                }
                let cycles_live = record
                    .cycle_anchor
                    .is_some_and(|anchor| now - anchor <= promote_window);
                let window_live = record
                    .window_start
                    .is_some_and(|start| now - start <= window);
                record.temp_blocked_until.is_some() || cycles_live || window_live
            });
        }

        if self.dirty.swap(false, Ordering::Relaxed) {
            if let Err(e) = self.flush() {
                warn!(error = %e, "Blocked-IP file flush failed");
            }
        }
    }

    fn shard_for(&self, ip: IpAddr) -> &Mutex<HashMap<IpAddr, IpRecord>> {
        let mut hasher = self.hasher.build_hasher();
        ip.hash(&mut hasher);
        let index = (hasher.finish() as usize) % self.shards.len();
        &self.shards[index]
    }

    fn flush(&self) -> Result<(), CastorError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let mut ips = BTreeMap::new();
        for shard in &self.shards {
            let shard = shard.lock().expect("guard lock poisoned");
            for (ip, record) in shard.iter() {
                if record.permanent || record.temp_blocked_until.is_some() {
                    ips.insert(
                        ip.to_string(),
                        BlockedIpSlot {
                            permanent: record.permanent,
                            expires_at: record.temp_blocked_until,
                            temp_block_count: record.temp_block_cycles,
                        },
                    );
                }
            }
        }

        let file = BlockedIpFile {
            ips,
            whitelist: self.cfg.whitelist.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&file)?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    fn load(&self) {
        let Some(path) = &self.path else { return };
        let Ok(bytes) = std::fs::read(path) else {
            return;
        };
        let Ok(file) = serde_json::from_slice::<BlockedIpFile>(&bytes) else {
            warn!(path = %path.display(), "Blocked-IP file unreadable; starting empty");
            return;
        };

        let now = Utc::now();
        for (ip_text, slot) in file.ips {
            let Ok(ip) = ip_text.parse::<IpAddr>() else {
                continue;
            };
            if !slot.permanent && !slot.expires_at.is_some_and(|until| until > now) {
                continue;
            }
            let mut shard = self.shard_for(ip).lock().expect("guard lock poisoned");
            shard.insert(
                ip,
                IpRecord {
                    permanent: slot.permanent,
                    temp_blocked_until: slot.expires_at.filter(|until| *until > now),
                    temp_block_cycles: slot.temp_block_count,
                    cycle_anchor: (!slot.permanent).then_some(now),
                    ..IpRecord::default()
                },
            );
        }
    }
}

/// On-disk shape:
/// `{ips: {<ip>: {permanent, expiresAt, tempBlockCount}}, whitelist: [...]}`.
#[derive(Debug, Serialize, Deserialize)]
struct BlockedIpFile {
    ips: BTreeMap<String, BlockedIpSlot>,
    #[serde(default)]
    whitelist: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BlockedIpSlot {
    permanent: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_at: Option<DateTime<Utc>>,
    temp_block_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard(whitelist: Vec<&str>) -> IpGuard {
        let cfg = GuardConfig {
            whitelist: whitelist.into_iter().map(str::to_string).collect(),
            ..GuardConfig::default()
        };
        IpGuard::new(cfg, None)
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn burst(guard: &IpGuard, ip: IpAddr, count: u32, at: DateTime<Utc>) {
        for _ in 0..count {
            guard.record_violation_at(ip, ViolationKind::BadApiKey, at);
        }
    }

    #[test]
    fn below_threshold_stays_clean() {
        let guard = guard(vec![]);
        let ip = ip("203.0.113.1");
        burst(&guard, ip, 9, Utc::now());
        assert!(!guard.check(ip).blocked);
    }

    #[test]
    fn threshold_inside_window_temp_blocks() {
        let guard = guard(vec![]);
        let ip = ip("203.0.113.2");
        let now = Utc::now();

        burst(&guard, ip, 10, now);
        let status = guard.check_at(ip, now);
        assert!(status.blocked);
        assert_eq!(status.reason, Some(BlockReason::Temporary));
        let expires = status.expires_at.unwrap();
        assert_eq!((expires - now).num_seconds(), 1800);
    }

    #[test]
    fn violations_outside_window_do_not_accumulate() {
        let guard = guard(vec![]);
        let ip = ip("203.0.113.3");
        let start = Utc::now();

        burst(&guard, ip, 9, start);
        // Window (10 min) passes; counter restarts.
        burst(&guard, ip, 9, start + Duration::seconds(700));
        assert!(!guard.check_at(ip, start + Duration::seconds(700)).blocked);
    }

    #[test]
    fn repeat_blocks_double_then_promote_to_permanent() {
        let guard = guard(vec![]);
        let ip = ip("203.0.113.4");
        let mut now = Utc::now();

        let expected_secs = [1800, 3600, 7200, 14_400];
        for expected in expected_secs {
            burst(&guard, ip, 10, now);
            let status = guard.check_at(ip, now);
            assert_eq!(status.reason, Some(BlockReason::Temporary));
            let until = status.expires_at.unwrap();
            assert_eq!((until - now).num_seconds(), expected);
            // Wait out the block, then reoffend within the promotion window.
            now = until + Duration::seconds(1);
        }

        burst(&guard, ip, 10, now);
        let status = guard.check_at(ip, now);
        assert!(status.blocked);
        assert_eq!(status.reason, Some(BlockReason::Permanent));
        assert!(status.expires_at.is_none());
    }

    #[test]
    fn whitelisted_ip_never_blocks() {
        let guard = guard(vec!["203.0.113.0/24"]);
        let ip = ip("203.0.113.77");
        burst(&guard, ip, 100, Utc::now());
        assert!(!guard.check(ip).blocked);
    }

    #[test]
    fn expired_temp_block_returns_to_accumulating() {
        let guard = guard(vec![]);
        let ip = ip("203.0.113.5");
        let now = Utc::now();

        burst(&guard, ip, 10, now);
        let until = guard.check_at(ip, now).expires_at.unwrap();
        assert!(!guard.check_at(ip, until + Duration::seconds(1)).blocked);
    }

    #[test]
    fn unblock_resets_everything() {
        let guard = guard(vec![]);
        let ip = ip("203.0.113.6");
        let now = Utc::now();

        burst(&guard, ip, 10, now);
        assert!(guard.check_at(ip, now).blocked);

        guard.unblock(ip);
        assert!(!guard.check_at(ip, now).blocked);

        // Next block starts from cycle one again.
        burst(&guard, ip, 10, now);
        let status = guard.check_at(ip, now);
        assert_eq!(
            (status.expires_at.unwrap() - now).num_seconds(),
            1800
        );
    }

    #[test]
    fn persistence_roundtrips_blocked_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blocked.json");
        let target = ip("203.0.113.9");
        let now = Utc::now();

        {
            let guard = IpGuard::new(GuardConfig::default(), Some(path.clone()));
            burst(&guard, target, 10, now);
            guard.sweep();
        }

        let reloaded = IpGuard::new(GuardConfig::default(), Some(path));
        let status = reloaded.check_at(target, now);
        assert!(status.blocked);
        assert_eq!(status.reason, Some(BlockReason::Temporary));
    }
}
