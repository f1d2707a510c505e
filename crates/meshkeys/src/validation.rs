//! Input validation for admin, network and key requests.

use std::net::IpAddr;

use crate::error::{Error, Result};

const MAX_NET_ID_LEN: usize = 12;
const MAX_KEY_NAME_LEN: usize = 32;
const MAX_USERNAME_LEN: usize = 40;
const MIN_PASSWORD_LEN: usize = 5;

/// Validate a network identifier: 1-12 ASCII alphanumerics or '-'
pub fn validate_net_id(net_id: &str) -> Result<()> {
    if net_id.is_empty() {
        return Err(Error::invalid("network id cannot be empty"));
    }
    if net_id.len() > MAX_NET_ID_LEN {
        return Err(Error::invalid(format!(
            "network id must be at most {MAX_NET_ID_LEN} characters"
        )));
    }
    if !net_id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(Error::invalid("network id may only contain letters, digits and '-'"));
    }
    Ok(())
}

/// Validate an access key name: 1-32 ASCII alphanumerics, '-' or '_'
pub fn validate_key_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_KEY_NAME_LEN {
        return Err(Error::invalid(format!(
            "access key name must be 1 to {MAX_KEY_NAME_LEN} characters"
        )));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        return Err(Error::invalid("access key name may only contain letters, digits, '-' and '_'"));
    }
    Ok(())
}

pub fn validate_username(username: &str) -> Result<()> {
    if username.trim().is_empty() {
        return Err(Error::invalid("username cannot be empty"));
    }
    if username.len() > MAX_USERNAME_LEN {
        return Err(Error::invalid(format!(
            "username must be at most {MAX_USERNAME_LEN} characters"
        )));
    }
    if username.chars().any(|c| c.is_whitespace() || c == '/') {
        return Err(Error::invalid("username cannot contain whitespace or '/'"));
    }
    Ok(())
}

pub fn validate_password(password: &str) -> Result<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(Error::invalid(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

/// Validate a CIDR range such as `10.71.0.0/16` or `fd00::/64`.
///
/// The address must be the network address itself: no host bits set.
pub fn validate_address_range(range: &str) -> Result<()> {
    let (addr, prefix) = range
        .split_once('/')
        .ok_or_else(|| Error::invalid(format!("address range '{range}' must be in CIDR form")))?;

    let addr: IpAddr = addr
        .parse()
        .map_err(|_| Error::invalid(format!("address range '{range}' has an invalid address")))?;

    let max_prefix = if addr.is_ipv4() { 32 } else { 128 };
    let prefix: u32 = match prefix.parse() {
        Ok(prefix) if prefix <= max_prefix && !prefix_has_sign(range) => prefix,
        _ => {
            return Err(Error::invalid(format!(
                "address range '{range}' needs a prefix length between 0 and {max_prefix}"
            )));
        }
    };

    let host_bits_set = match addr {
        IpAddr::V4(v4) => u32::from(v4) & host_mask_v4(prefix) != 0,
        IpAddr::V6(v6) => u128::from(v6) & host_mask_v6(prefix) != 0,
    };
    if host_bits_set {
        return Err(Error::invalid(format!(
            "address range '{range}' has host bits set beyond /{prefix}"
        )));
    }

    Ok(())
}

fn prefix_has_sign(range: &str) -> bool {
    range.rsplit('/').next().is_some_and(|p| p.starts_with('+'))
}

fn host_mask_v4(prefix: u32) -> u32 {
    u32::MAX.checked_shr(prefix).unwrap_or(0)
}

fn host_mask_v6(prefix: u32) -> u128 {
    u128::MAX.checked_shr(prefix).unwrap_or(0)
}
