//! Shared fixtures for the in-crate tests.

use std::time::Duration;

use shared::BBox;

use crate::config::DomainConfig;
use crate::domain::PhysicalDomain;
use crate::notification::Notification;
use crate::terrain::HeightMapTerrain;
use crate::types::{ContainerDescriptor, EntityId, EntityState, Mode};

/// A domain over flat terrain at height zero.
pub struct TestDomain {
    pub domain: PhysicalDomain,
    pub root: EntityId,
}

impl TestDomain {
    pub fn new() -> Self {
        Self::with_root([-64.0, -64.0, -64.0], [64.0, 64.0, 64.0])
    }

    pub fn with_root(low: [f32; 3], high: [f32; 3]) -> Self {
        init_logger();
        let root = EntityId(1000);
        let container = ContainerDescriptor::new(root, BBox::from_corners(low, high));
        let domain = PhysicalDomain::new(
            container,
            Some(Box::new(HeightMapTerrain::flat(16, 0.0))),
            DomainConfig::default(),
        );
        Self { domain, root }
    }

    pub fn add(&mut self, state: EntityState) {
        let id = state.id;
        if let Err(err) = self.domain.add_entity(state) {
            panic!("could not add {id}: {err}");
        }
    }

    pub fn tick_ms(&mut self, ms: u64) -> Vec<Notification> {
        self.domain.tick(Duration::from_millis(ms))
    }

    pub fn y(&self, id: u64) -> f32 {
        self.domain
            .entity(EntityId(id))
            .and_then(|state| state.position)
            .map(|position| position.y)
            .unwrap_or(f32::NAN)
    }
}

/// A box standing on its base with its origin at the bottom centre.
pub fn boxed(id: u64, mode: Mode, at: [f32; 3], half: f32, height: f32) -> EntityState {
    EntityState::new(EntityId(id))
        .at(at[0], at[1], at[2])
        .with_bbox([-half, 0.0, -half], [half, height, half])
        .with_mode(mode)
}

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}
