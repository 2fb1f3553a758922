use std::net::IpAddr;

/// One whitelist entry: a bare IP or a CIDR range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpMatcher {
    network: IpAddr,
    prefix_len: u8,
}

impl IpMatcher {
    /// Parse `"10.0.0.0/8"`, `"::1/128"` or a bare address.
    pub fn parse(entry: &str) -> Option<Self> {
        let (addr_part, prefix_part) = match entry.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (entry, None),
        };

        let network: IpAddr = addr_part.trim().parse().ok()?;
        let max_len = match network {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        let prefix_len = match prefix_part {
            Some(prefix) => {
                let len: u8 = prefix.trim().parse().ok()?;
                (len <= max_len).then_some(len)?
            }
            None => max_len,
        };

        Some(Self {
            network,
            prefix_len,
        })
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = prefix_mask_u32(self.prefix_len);
                u32::from(net) & mask == u32::from(ip) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = prefix_mask_u128(self.prefix_len);
                u128::from(net) & mask == u128::from(ip) & mask
            }
            _ => false,
        }
    }
}

fn prefix_mask_u32(len: u8) -> u32 {
    if len == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(len))
    }
}

fn prefix_mask_u128(len: u8) -> u128 {
    if len == 0 {
        0
    } else {
        u128::MAX << (128 - u32::from(len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn bare_ip_matches_itself_only() {
        let matcher = IpMatcher::parse("192.168.1.5").unwrap();
        assert!(matcher.contains(ip("192.168.1.5")));
        assert!(!matcher.contains(ip("192.168.1.6")));
    }

    #[test]
    fn cidr_matches_range() {
        let matcher = IpMatcher::parse("10.0.0.0/8").unwrap();
        assert!(matcher.contains(ip("10.200.3.4")));
        assert!(!matcher.contains(ip("11.0.0.1")));
    }

    #[test]
    fn v6_cidr_matches() {
        let matcher = IpMatcher::parse("fd00::/8").unwrap();
        assert!(matcher.contains(ip("fd12::1")));
        assert!(!matcher.contains(ip("fe80::1")));
    }

    #[test]
    fn families_never_cross_match() {
        let matcher = IpMatcher::parse("0.0.0.0/0").unwrap();
        assert!(matcher.contains(ip("8.8.8.8")));
        assert!(!matcher.contains(ip("::1")));
    }

    #[test]
    fn junk_is_rejected() {
        assert!(IpMatcher::parse("not-an-ip").is_none());
        assert!(IpMatcher::parse("10.0.0.0/33").is_none());
        assert!(IpMatcher::parse("").is_none());
    }
}
