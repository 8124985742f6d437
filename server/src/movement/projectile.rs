use std::collections::BTreeSet;

use shared::Point3;

use crate::domain::PhysicalDomain;
use crate::dynamics::CollectedEvent;
use crate::notification::{HitInfo, NotificationKind};
use crate::types::{EntityId, Mode};

impl PhysicalDomain {
    fn is_projectile(&self, id: Option<EntityId>) -> bool {
        id.and_then(|id| self.entries.get(&id))
            .is_some_and(|entry| entry.mode() == Mode::Projectile)
    }

    /// Keep contact starts involving a projectile for [`Self::process_hits`].
    pub(crate) fn collect_projectile_event(&mut self, collected: &CollectedEvent) {
        let event = collected.event;
        if !event.started() || event.removed() || event.sensor() {
            return;
        }
        let first = self.world.collider_owner(event.collider1());
        let second = self.world.collider_owner(event.collider2());
        if self.is_projectile(first) || self.is_projectile(second) {
            self.hits.push(*collected);
        }
    }

    /// Turn the projectile contacts collected during this tick into paired hit
    /// notifications, one pair per projectile and partner.
    pub(crate) fn process_hits(&mut self) {
        let mut seen = BTreeSet::new();
        for collected in std::mem::take(&mut self.hits) {
            let event = collected.event;
            let owners = (
                self.world.collider_owner(event.collider1()),
                self.world.collider_owner(event.collider2()),
            );
            let (Some(first), Some(second)) = owners else {
                continue;
            };
            let Some((projectile, target)) = [(first, second), (second, first)]
                .into_iter()
                .find(|(candidate, _)| self.is_projectile(Some(*candidate)))
            else {
                continue;
            };
            if !seen.insert((projectile, target)) {
                continue;
            }
            let Some(entry) = self.entries.get(&projectile) else {
                continue;
            };

            let data = entry.state.mode_data.projectile().cloned().unwrap_or_default();
            let attacker = data.launcher.unwrap_or(projectile);
            let pos = collected
                .point
                .or(entry.state.position)
                .unwrap_or_else(Point3::origin);
            log::trace!("{projectile} hit {target} at {pos:?}");

            self.notify(
                projectile,
                NotificationKind::Hit(HitInfo {
                    from: target,
                    id: attacker,
                    pos,
                    extra: data.extra.clone(),
                }),
            );
            self.notify(
                target,
                NotificationKind::Hit(HitInfo {
                    from: projectile,
                    id: attacker,
                    pos,
                    extra: data.extra,
                }),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use rapier3d::prelude::{CollisionEvent, CollisionEventFlags};

    use super::*;
    use crate::notification::Notification;
    use crate::testing::{TestDomain, boxed};
    use crate::types::{ModeData, ProjectileData, TransformData};

    const ARROW: EntityId = EntityId(2);
    const TARGET: EntityId = EntityId(3);
    const ARCHER: EntityId = EntityId(99);

    fn hits(notifications: &[Notification]) -> Vec<(EntityId, HitInfo)> {
        notifications
            .iter()
            .filter_map(|n| match &n.kind {
                NotificationKind::Hit(hit) => Some((n.to, hit.clone())),
                _ => None,
            })
            .collect()
    }

    fn setup() -> TestDomain {
        let mut t = TestDomain::new();
        t.add(boxed(3, Mode::Planted, [0.0, 0.0, 0.0], 0.5, 1.0));
        let mut arrow = boxed(2, Mode::Projectile, [0.0, 3.0, 0.0], 0.1, 0.2).with_mass(1.0);
        arrow.mode_data = ModeData::Projectile(ProjectileData {
            launcher: Some(ARCHER),
            extra: BTreeMap::from([("damage".to_owned(), "3".to_owned())]),
        });
        t.add(arrow);
        t
    }

    fn contact(t: &TestDomain, other: rapier3d::prelude::ColliderHandle) -> CollectedEvent {
        let arrow = t.domain.record(ARROW).unwrap().handle.unwrap().collider();
        CollectedEvent {
            event: CollisionEvent::Started(arrow, other, CollisionEventFlags::empty()),
            point: None,
        }
    }

    #[test]
    fn landing_projectile_hits_both_sides_once() {
        let mut t = setup();
        let mut notifications = Vec::new();
        for _ in 0..15 {
            notifications.extend(t.tick_ms(100));
        }

        let hits = hits(&notifications);
        assert_eq!(hits.len(), 2, "{hits:?}");
        let (to, hit) = &hits[0];
        assert_eq!(*to, ARROW);
        assert_eq!(hit.from, TARGET);
        assert_eq!(hit.id, ARCHER);
        assert_eq!(hit.extra.get("damage").map(String::as_str), Some("3"));
        assert!((hit.pos.y - 1.0).abs() < 0.1, "hit at {:?}", hit.pos);
        let (to, hit) = &hits[1];
        assert_eq!(*to, TARGET);
        assert_eq!(hit.from, ARROW);
        assert_eq!(hit.id, ARCHER);
    }

    #[test]
    fn contacts_are_deduplicated_per_partner_within_a_tick() {
        let mut t = setup();
        let target = t.domain.record(TARGET).unwrap().handle.unwrap().collider();
        let floor = t.domain.world.borders()[2];

        let batch = [contact(&t, target), contact(&t, floor), contact(&t, target)];
        t.domain.hits.extend(batch);
        t.domain.process_hits();
        let batch_hits = hits(&t.domain.take_notifications());
        assert_eq!(batch_hits.len(), 4, "{batch_hits:?}");
        assert_eq!(batch_hits[0].1.from, TARGET);
        assert_eq!(batch_hits[2].1.from, t.domain.container_id());

        // The next tick's contacts are new hits.
        t.domain.hits.push(contact(&t, target));
        t.domain.process_hits();
        assert_eq!(hits(&t.domain.take_notifications()).len(), 2);
    }

    #[test]
    fn landing_again_in_a_later_tick_hits_again() {
        let mut t = setup();
        let mut notifications = Vec::new();
        for _ in 0..15 {
            notifications.extend(t.tick_ms(100));
        }
        assert_eq!(hits(&notifications).len(), 2);

        t.domain.apply_transform(
            ARROW,
            TransformData {
                position: Some(Point3::new(0.0, 3.0, 0.0)),
                ..TransformData::default()
            },
            &mut std::collections::HashSet::new(),
        );
        let mut notifications = Vec::new();
        for _ in 0..15 {
            notifications.extend(t.tick_ms(100));
        }
        let hits = hits(&notifications);
        assert_eq!(hits.len(), 2, "{hits:?}");
        assert!(hits.iter().all(|(_, hit)| hit.id == ARCHER));
    }

    #[test]
    fn launcher_defaults_to_the_projectile() {
        let mut t = TestDomain::new();
        t.add(boxed(3, Mode::Planted, [0.0, 0.0, 0.0], 0.5, 1.0));
        t.add(boxed(2, Mode::Projectile, [0.0, 2.0, 0.0], 0.1, 0.2).with_mass(1.0));
        let mut notifications = Vec::new();
        for _ in 0..10 {
            notifications.extend(t.tick_ms(100));
        }
        let hits = hits(&notifications);
        assert!(!hits.is_empty());
        assert!(hits.iter().all(|(_, hit)| hit.id == ARROW && hit.extra.is_empty()));
    }
}
