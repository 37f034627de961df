//! Damage event resolution and notification fan-out.

use skyward_core::math::Vec2F;
use skyward_core::types::game::{ConnectionId, DamageTeam, EntityId};
use std::collections::HashSet;

/// What kind of hit occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DamageHitType {
    Normal,
    StrongHit,
    WeakHit,
    ShieldHit,
    Kill,
}

/// A queued request to damage a target.
#[derive(Debug, Clone)]
pub struct DamageRequest {
    pub source_entity: EntityId,
    pub target_entity: EntityId,
    pub source_team: DamageTeam,
    pub damage: f32,
    pub hit_type: DamageHitType,
    pub position: Vec2F,
    pub timestamp: u64,
}

/// The resolved outcome broadcast to interested clients.
#[derive(Debug, Clone, PartialEq)]
pub struct DamageNotification {
    pub source_entity: EntityId,
    pub target_entity: EntityId,
    pub health_lost: f32,
    pub hit_type: DamageHitType,
    pub position: Vec2F,
    pub timestamp: u64,
}

/// Dedupe key: one notification per (source, target, kind, timestamp).
type NotificationKey = (EntityId, EntityId, DamageHitType, u64);

/// Collects damage requests during a tick and resolves them into
/// notifications, deduplicating per client.
#[derive(Default)]
pub struct DamageManager {
    pending: Vec<DamageRequest>,
    notifications: Vec<DamageNotification>,
}

impl DamageManager {
    pub fn new() -> DamageManager {
        DamageManager::default()
    }

    pub fn add_request(&mut self, request: DamageRequest) {
        self.pending.push(request);
    }

    /// Resolves queued requests with the given team lookup, producing
    /// notifications for hits that connect.
    pub fn update(&mut self, target_team: impl Fn(EntityId) -> Option<DamageTeam>) {
        for request in self.pending.drain(..) {
            let Some(victim_team) = target_team(request.target_entity) else {
                continue;
            };
            let is_self = request.source_entity == request.target_entity;
            if !request.source_team.can_damage(victim_team, is_self) {
                continue;
            }
            self.notifications.push(DamageNotification {
                source_entity: request.source_entity,
                target_entity: request.target_entity,
                health_lost: request.damage,
                hit_type: request.hit_type,
                position: request.position,
                timestamp: request.timestamp,
            });
        }
    }

    /// Drains resolved notifications.
    pub fn pull_notifications(&mut self) -> Vec<DamageNotification> {
        std::mem::take(&mut self.notifications)
    }
}

/// Tracks which notifications a client has already been sent.
#[derive(Default)]
pub struct ClientNotificationFilter {
    seen: HashSet<NotificationKey>,
}

impl ClientNotificationFilter {
    /// True the first time a notification key is seen for this client.
    pub fn needs(&mut self, notification: &DamageNotification) -> bool {
        self.seen.insert((
            notification.source_entity,
            notification.target_entity,
            notification.hit_type,
            notification.timestamp,
        ))
    }

    pub fn clear(&mut self) {
        self.seen.clear();
    }
}

/// Per-client filters owned by the world.
#[derive(Default)]
pub struct NotificationRouter {
    filters: std::collections::HashMap<ConnectionId, ClientNotificationFilter>,
}

impl NotificationRouter {
    pub fn add_client(&mut self, client_id: ConnectionId) {
        self.filters.entry(client_id).or_default();
    }

    pub fn remove_client(&mut self, client_id: ConnectionId) {
        self.filters.remove(&client_id);
    }

    pub fn needs(&mut self, client_id: ConnectionId, notification: &DamageNotification) -> bool {
        self.filters
            .get_mut(&client_id)
            .map(|filter| filter.needs(notification))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skyward_core::types::game::TeamType;

    fn request(source: EntityId, target: EntityId, timestamp: u64) -> DamageRequest {
        DamageRequest {
            source_entity: source,
            target_entity: target,
            source_team: DamageTeam {
                team_type: TeamType::Enemy,
                team: 1,
            },
            damage: 10.0,
            hit_type: DamageHitType::Normal,
            position: Vec2F::new(0.0, 0.0),
            timestamp,
        }
    }

    fn friendly(_id: EntityId) -> Option<DamageTeam> {
        Some(DamageTeam {
            team_type: TeamType::Friendly,
            team: 0,
        })
    }

    #[test]
    fn resolved_hits_produce_notifications() {
        let mut manager = DamageManager::new();
        manager.add_request(request(1, 2, 100));
        manager.update(friendly);
        let notifications = manager.pull_notifications();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].health_lost, 10.0);
        assert!(manager.pull_notifications().is_empty());
    }

    #[test]
    fn self_damage_is_dropped() {
        let mut manager = DamageManager::new();
        manager.add_request(request(2, 2, 100));
        manager.update(friendly);
        assert!(manager.pull_notifications().is_empty());
    }

    #[test]
    fn unknown_targets_are_dropped() {
        let mut manager = DamageManager::new();
        manager.add_request(request(1, 99, 100));
        manager.update(|_| None);
        assert!(manager.pull_notifications().is_empty());
    }

    #[test]
    fn per_client_dedupe_by_key() {
        let mut router = NotificationRouter::default();
        router.add_client(1);
        let notification = DamageNotification {
            source_entity: 1,
            target_entity: 2,
            health_lost: 5.0,
            hit_type: DamageHitType::Normal,
            position: Vec2F::new(0.0, 0.0),
            timestamp: 42,
        };
        assert!(router.needs(1, &notification));
        assert!(!router.needs(1, &notification), "same key is deduped");

        let later = DamageNotification {
            timestamp: 43,
            ..notification
        };
        assert!(router.needs(1, &later));
        assert!(!router.needs(2, &later), "unknown clients get nothing");
    }
}
