//! Most-recent-first contact ordering and the delayed list republish that
//! follows every activity.

use std::{sync::Arc, time::Duration};

use {
    tracing::{debug, warn},
    wabridge_common::SectorId,
    wabridge_notify::{HubEvent, NotificationHub},
    wabridge_store::SqliteContactStore,
};

#[derive(Clone)]
pub struct ContactOrdering {
    contacts: SqliteContactStore,
    hub: Arc<NotificationHub>,
    republish_delay: Duration,
}

impl ContactOrdering {
    pub fn new(
        contacts: SqliteContactStore,
        hub: Arc<NotificationHub>,
        republish_delay: Duration,
    ) -> Self {
        Self {
            contacts,
            hub,
            republish_delay,
        }
    }

    /// Give `contact_id` rank 1 in its sector and schedule a republish.
    pub async fn move_to_front(
        &self,
        sector_id: SectorId,
        contact_id: i64,
    ) -> wabridge_store::Result<()> {
        self.contacts.move_to_front(sector_id, contact_id).await?;
        self.schedule_republish(sector_id);
        Ok(())
    }

    /// Fire-and-forget [`Self::move_to_front`].
    pub fn spawn_move_to_front(&self, sector_id: SectorId, contact_id: i64) {
        let this = self.clone();
        tokio::spawn(async move {
            if let Err(e) = this.move_to_front(sector_id, contact_id).await {
                warn!(sector_id, contact_id, error = %e, "contact reorder failed");
            }
        });
    }

    /// Republish unread state and the ordered contact list after the
    /// configured delay, so the writes that triggered it are visible.
    pub fn schedule_republish(&self, sector_id: SectorId) {
        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(this.republish_delay).await;
            this.republish(sector_id).await;
        });
    }

    pub async fn republish(&self, sector_id: SectorId) {
        if let Err(e) = self.publish_unread_status(sector_id).await {
            warn!(sector_id, error = %e, "unread status publish failed");
        }
        if let Err(e) = self.publish_contacts_list(sector_id).await {
            warn!(sector_id, error = %e, "contact list publish failed");
        }
    }

    pub async fn publish_unread_status(&self, sector_id: SectorId) -> wabridge_store::Result<()> {
        let status = self.contacts.viewed_status(sector_id).await?;
        let delivered = self
            .hub
            .publish(&HubEvent::unread_status(sector_id, status));
        debug!(sector_id, delivered, "unread status published");
        Ok(())
    }

    pub async fn publish_contacts_list(&self, sector_id: SectorId) -> wabridge_store::Result<()> {
        let contacts = self.contacts.list_by_sector(sector_id).await?;
        let delivered = self
            .hub
            .publish(&HubEvent::contacts_list(sector_id, &contacts));
        debug!(sector_id, contacts = contacts.len(), delivered, "contact list published");
        Ok(())
    }
}
