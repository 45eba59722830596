//! Flow hashing
//!
//! Hashes are 64-bit FNV-1a folded to 32 bits. The value must be identical
//! in every worker and across restarts, so nothing here is randomly seeded.
//!
//! | Function | Input | Used for |
//! |----------|-------|----------|
//! | [`hash_full`] | addresses, proto, ports (ports only for SCTP) | packets with ports |
//! | [`hash_addresses`] | addresses | packets without usable ports |
//! | [`hash_flow`] | picks one of the above | the dispatcher |
//!
//! SCTP is hashed on ports alone because a multihomed association can move
//! between address pairs without changing its ports.

use std::hash::Hasher;
use std::net::IpAddr;

use fnv::FnvHasher;

use crate::packet::proto::IPPROTO_SCTP;
use crate::packet::FlowKey;

const TAG_V4: u8 = 4;
const TAG_V6: u8 = 6;

fn write_addr(hasher: &mut FnvHasher, addr: &IpAddr) {
    match addr {
        IpAddr::V4(a) => {
            hasher.write_u8(TAG_V4);
            hasher.write(&a.octets());
        }
        IpAddr::V6(a) => {
            hasher.write_u8(TAG_V6);
            hasher.write(&a.octets());
        }
    }
}

#[inline]
fn fold(h: u64) -> u32 {
    // truncation is the point of the fold
    #[allow(clippy::cast_possible_truncation)]
    let folded = (h ^ (h >> 32)) as u32;
    folded
}

/// Hash of an address pair in the given order
#[must_use]
pub fn hash_address_pair(src: &IpAddr, dst: &IpAddr) -> u32 {
    let mut hasher = FnvHasher::default();
    write_addr(&mut hasher, src);
    write_addr(&mut hasher, dst);
    fold(hasher.finish())
}

/// Hash over the source and destination addresses of the key
#[must_use]
pub fn hash_addresses(key: &FlowKey) -> u32 {
    hash_address_pair(&key.src, &key.dst)
}

/// Hash over the full key, or over proto and ports for SCTP
#[must_use]
pub fn hash_full(key: &FlowKey) -> u32 {
    let mut hasher = FnvHasher::default();
    if key.proto != IPPROTO_SCTP {
        write_addr(&mut hasher, &key.src);
        write_addr(&mut hasher, &key.dst);
    }
    hasher.write_u8(key.proto);
    if let Some(ports) = key.ports {
        hasher.write(&ports.src.to_be_bytes());
        hasher.write(&ports.dst.to_be_bytes());
    }
    fold(hasher.finish())
}

/// Hash used for backend selection: full hash when ports are known,
/// address hash otherwise.
#[must_use]
pub fn hash_flow(key: &FlowKey) -> u32 {
    if key.ports.is_some() {
        hash_full(key)
    } else {
        hash_addresses(key)
    }
}
