//! Content-addressed upload routing.
//!
//! The route of a photo is a pure function of its bytes: hash to the
//! `photo_id`, dedupe against the global metadata store, place by
//! `xxhash64(photo_id) mod member_count`. The member count is taken at
//! upload time; a later membership change never re-routes existing photos.
//! A dead target gets the upload staged in its outbox instead of sent.

use crate::member::{MemberStatus, MemberTable};
use lumo_core::meta::MetadataStore;
use lumo_core::ShardId;
use lumo_placement::{photo_id_for_bytes, shard_for_photo};
use lumo_proto::{Message, Transport};
use std::sync::Arc;

/// Routing errors.
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("no shards registered")]
    NoMembers,
}

/// What happened to an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    /// Sent (or staged) to the placed shard.
    Routed { photo_id: String, shard_id: ShardId },
    /// Identical bytes were uploaded before; a no-op, not an error.
    Duplicate { photo_id: String },
}

/// Routes uploads from the leader to the owning shard.
pub struct UploadRouter {
    members: Arc<MemberTable>,
    store: Arc<dyn MetadataStore>,
    transport: Arc<dyn Transport>,
}

impl UploadRouter {
    pub fn new(
        members: Arc<MemberTable>,
        store: Arc<dyn MetadataStore>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            members,
            store,
            transport,
        }
    }

    /// Route one photo. Duplicate content is detected before any send.
    pub async fn route(
        &self,
        name: &str,
        format: &str,
        payload: Vec<u8>,
    ) -> Result<UploadOutcome, RouteError> {
        let member_count = self.members.len() as u32;
        if member_count == 0 {
            return Err(RouteError::NoMembers);
        }

        let photo_id = photo_id_for_bytes(&payload);
        if self.store.exists(&photo_id) {
            tracing::info!(photo_id, name, "duplicate upload, skipping");
            return Ok(UploadOutcome::Duplicate { photo_id });
        }

        let shard_id = shard_for_photo(&photo_id, member_count);
        let msg = Message::Upload {
            photo_id: photo_id.clone(),
            name: name.to_string(),
            format: format.to_string(),
            payload,
        };

        if self.members.status_of(shard_id) == Some(MemberStatus::Alive) {
            // addr_of cannot fail for a shard id the table just returned.
            if let Some(addr) = self.members.addr_of(shard_id) {
                match self.transport.send(addr, msg.clone()).await {
                    Ok(()) => {
                        tracing::info!(photo_id, shard_id, name, "routed upload");
                        return Ok(UploadOutcome::Routed { photo_id, shard_id });
                    }
                    Err(e) => {
                        tracing::warn!(shard_id, %addr, "upload send failed: {}", e);
                        self.members.mark_dead(shard_id);
                    }
                }
            }
        }
        self.members.stage(shard_id, msg);
        tracing::info!(photo_id, shard_id, "target dead, staged upload");
        Ok(UploadOutcome::Routed { photo_id, shard_id })
    }
}
