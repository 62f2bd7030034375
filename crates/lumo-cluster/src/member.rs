//! Shard membership table with heartbeat liveness and outbox replay.
//!
//! Members are registered by address and keep their shard id for the
//! lifetime of the leader; a member is never removed, only marked dead by
//! the liveness sweep. Messages destined for a dead member are staged in
//! its outbox and replayed, in enqueue order, when the member registers
//! again. Heartbeats refresh the liveness timestamp but never change
//! status; only `register` brings a dead member back.
//!
//! All state lives behind an internal mutex; callers cannot observe or
//! mutate a member except through these methods.

use lumo_core::ShardId;
use lumo_proto::Message;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Liveness status of a registered shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberStatus {
    Alive,
    Dead,
}

struct ClusterMember {
    shard_id: ShardId,
    addr: SocketAddr,
    status: MemberStatus,
    last_heartbeat: Instant,
    outbox: VecDeque<Message>,
}

/// Point-in-time view of one member, for `ls` and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberInfo {
    pub shard_id: ShardId,
    pub addr: SocketAddr,
    pub status: MemberStatus,
    pub outbox_len: usize,
}

/// Result of a `register` call.
#[derive(Debug)]
pub struct RegisterOutcome {
    pub shard_id: ShardId,
    /// Messages staged while the member was dead, in enqueue order. The
    /// caller resends these after acking the registration.
    pub replay: Vec<Message>,
}

/// Leader-owned membership table.
#[derive(Default)]
pub struct MemberTable {
    members: Mutex<Vec<ClusterMember>>,
}

impl MemberTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a shard by address. Idempotent: a known address keeps its
    /// shard id, flips back to alive, and has its outbox drained for
    /// replay; a new address is appended with the next id.
    pub fn register(&self, addr: SocketAddr) -> RegisterOutcome {
        let mut members = self.members.lock();
        if let Some(member) = members.iter_mut().find(|m| m.addr == addr) {
            member.status = MemberStatus::Alive;
            member.last_heartbeat = Instant::now();
            let replay: Vec<Message> = member.outbox.drain(..).collect();
            tracing::info!(
                shard_id = member.shard_id,
                %addr,
                replay = replay.len(),
                "re-registered shard"
            );
            return RegisterOutcome {
                shard_id: member.shard_id,
                replay,
            };
        }
        let shard_id = members.len() as ShardId;
        members.push(ClusterMember {
            shard_id,
            addr,
            status: MemberStatus::Alive,
            last_heartbeat: Instant::now(),
            outbox: VecDeque::new(),
        });
        tracing::info!(shard_id, %addr, "registered new shard");
        RegisterOutcome {
            shard_id,
            replay: Vec::new(),
        }
    }

    /// Record a heartbeat. Refreshes the timestamp only; a dead member
    /// stays dead until it registers again. Returns false for an unknown
    /// shard id.
    pub fn heartbeat(&self, shard_id: ShardId) -> bool {
        let mut members = self.members.lock();
        match members.iter_mut().find(|m| m.shard_id == shard_id) {
            Some(member) => {
                member.last_heartbeat = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Mark every alive member whose last heartbeat is older than
    /// `timeout` as dead. Returns the newly dead shard ids.
    pub fn sweep(&self, timeout: Duration) -> Vec<ShardId> {
        let mut members = self.members.lock();
        let mut newly_dead = Vec::new();
        for member in members.iter_mut() {
            if member.status == MemberStatus::Alive && member.last_heartbeat.elapsed() > timeout {
                member.status = MemberStatus::Dead;
                newly_dead.push(member.shard_id);
            }
        }
        newly_dead
    }

    /// Mark a member dead immediately (failed send).
    pub fn mark_dead(&self, shard_id: ShardId) {
        let mut members = self.members.lock();
        if let Some(member) = members.iter_mut().find(|m| m.shard_id == shard_id) {
            member.status = MemberStatus::Dead;
        }
    }

    /// Stage a message in a member's outbox for replay at re-registration.
    pub fn stage(&self, shard_id: ShardId, msg: Message) {
        let mut members = self.members.lock();
        if let Some(member) = members.iter_mut().find(|m| m.shard_id == shard_id) {
            tracing::debug!(shard_id, kind = msg.kind(), "staged message in outbox");
            member.outbox.push_back(msg);
        }
    }

    pub fn status_of(&self, shard_id: ShardId) -> Option<MemberStatus> {
        self.members
            .lock()
            .iter()
            .find(|m| m.shard_id == shard_id)
            .map(|m| m.status)
    }

    pub fn addr_of(&self, shard_id: ShardId) -> Option<SocketAddr> {
        self.members
            .lock()
            .iter()
            .find(|m| m.shard_id == shard_id)
            .map(|m| m.addr)
    }

    /// Registered member count, dead members included. Placement hashes
    /// against this.
    pub fn len(&self) -> usize {
        self.members.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.lock().is_empty()
    }

    /// All registered shard ids in registration order.
    pub fn shard_ids(&self) -> Vec<ShardId> {
        self.members.lock().iter().map(|m| m.shard_id).collect()
    }

    /// Shard ids and addresses of alive members.
    pub fn alive(&self) -> Vec<(ShardId, SocketAddr)> {
        self.members
            .lock()
            .iter()
            .filter(|m| m.status == MemberStatus::Alive)
            .map(|m| (m.shard_id, m.addr))
            .collect()
    }

    /// Snapshot of the whole table.
    pub fn snapshot(&self) -> Vec<MemberInfo> {
        self.members
            .lock()
            .iter()
            .map(|m| MemberInfo {
                shard_id: m.shard_id,
                addr: m.addr,
                status: m.status,
                outbox_len: m.outbox.len(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{}", port).parse().unwrap()
    }

    #[test]
    fn test_register_assigns_sequential_ids() {
        let table = MemberTable::new();
        assert_eq!(table.register(addr(9001)).shard_id, 0);
        assert_eq!(table.register(addr(9002)).shard_id, 1);
        assert_eq!(table.register(addr(9003)).shard_id, 2);
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn test_register_is_idempotent_by_addr() {
        let table = MemberTable::new();
        let first = table.register(addr(9001));
        let again = table.register(addr(9001));
        assert_eq!(first.shard_id, again.shard_id);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_sweep_marks_stale_members_dead() {
        let table = MemberTable::new();
        table.register(addr(9001));
        table.register(addr(9002));

        // Zero timeout: everything is stale.
        let dead = table.sweep(Duration::ZERO);
        assert_eq!(dead, vec![0, 1]);
        assert_eq!(table.status_of(0), Some(MemberStatus::Dead));

        // Already dead members are not reported again.
        assert!(table.sweep(Duration::ZERO).is_empty());
    }

    #[test]
    fn test_heartbeat_never_revives_dead_member() {
        let table = MemberTable::new();
        let shard_id = table.register(addr(9001)).shard_id;
        table.sweep(Duration::ZERO);
        assert_eq!(table.status_of(shard_id), Some(MemberStatus::Dead));

        assert!(table.heartbeat(shard_id));
        assert_eq!(table.status_of(shard_id), Some(MemberStatus::Dead));

        // Only a fresh register revives.
        table.register(addr(9001));
        assert_eq!(table.status_of(shard_id), Some(MemberStatus::Alive));
    }

    #[test]
    fn test_heartbeat_keeps_member_alive() {
        let table = MemberTable::new();
        let shard_id = table.register(addr(9001)).shard_id;
        table.heartbeat(shard_id);
        assert!(table.sweep(Duration::from_secs(60)).is_empty());
        assert_eq!(table.status_of(shard_id), Some(MemberStatus::Alive));
    }

    #[test]
    fn test_unknown_heartbeat_ignored() {
        let table = MemberTable::new();
        assert!(!table.heartbeat(7));
    }

    #[test]
    fn test_outbox_replayed_in_order_on_reregister() {
        let table = MemberTable::new();
        let shard_id = table.register(addr(9001)).shard_id;
        table.mark_dead(shard_id);

        table.stage(shard_id, Message::Clear);
        table.stage(
            shard_id,
            Message::Upload {
                photo_id: "p1".into(),
                name: "a.jpg".into(),
                format: "jpeg".into(),
                payload: vec![1],
            },
        );
        assert_eq!(table.snapshot()[0].outbox_len, 2);

        let outcome = table.register(addr(9001));
        assert_eq!(outcome.shard_id, shard_id);
        assert_eq!(outcome.replay.len(), 2);
        assert_eq!(outcome.replay[0], Message::Clear);
        assert!(matches!(outcome.replay[1], Message::Upload { .. }));
        // Outbox drained.
        assert_eq!(table.snapshot()[0].outbox_len, 0);
    }

    #[test]
    fn test_alive_excludes_dead() {
        let table = MemberTable::new();
        table.register(addr(9001));
        table.register(addr(9002));
        table.mark_dead(0);
        let alive = table.alive();
        assert_eq!(alive.len(), 1);
        assert_eq!(alive[0].0, 1);
        // Dead members still count for placement.
        assert_eq!(table.len(), 2);
    }
}
