#![allow(dead_code)]

use granary_core::{GrainRef, UniformHasher};
use granary_store::{MembershipEntry, MemorySession, SiloAddress, SiloStatus};
use std::net::IpAddr;
use std::sync::Arc;
use time::OffsetDateTime;

pub fn session() -> Arc<MemorySession> {
    Arc::new(MemorySession::new())
}

pub fn member(ip: [u8; 4], port: u16, generation: i32, status: SiloStatus) -> MembershipEntry {
    let now = OffsetDateTime::now_utc();
    MembershipEntry {
        address: SiloAddress::new(IpAddr::from(ip), port, generation),
        silo_name: format!("silo-{port}"),
        host_name: "testhost".to_string(),
        status,
        proxy_port: 30000,
        start_time: now,
        i_am_alive_time: now,
        suspect_times: Vec::new(),
    }
}

/// Hashes an integer-keyed grain to its own key value, so tests can place
/// grains at exact ring positions.
pub struct KeyHasher;

impl UniformHasher for KeyHasher {
    fn uniform_hash(&self, grain: &GrainRef) -> u32 {
        match grain {
            GrainRef::Integer(v) | GrainRef::IntegerWithExt(v, _) => *v as u32,
            _ => 0,
        }
    }
}
