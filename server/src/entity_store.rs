//! Authoritative per-entity state, keyed by net id.
//!
//! Decoded Tank State packets are partial: the vitals block may be absent, and
//! even when present it only carries the fields the unit config allows. The
//! store reconciles those partial updates into a complete state per entity.
//! A field is only ever replaced by a newer value for that field, never reset
//! because a later packet omitted it.
//!
//! The store is the one shared mutable resource of the dispatch pipeline and is
//! written by a single owner, one tick at a time.

use crate::error::ServerError;
use log::info;
use shared::{TankState, Vitals};
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct EntityStateStore {
    entities: HashMap<u32, TankState>,
}

fn merge_vitals(stored: &mut Option<Vitals>, update: &Vitals) {
    match stored.as_mut() {
        None => *stored = Some(*update),
        Some(prev) => {
            prev.weapon_id = update.weapon_id;
            prev.health_mult = update.health_mult;
            prev.energy_mult = update.energy_mult;
            if update.firing_mask.is_some() {
                prev.firing_mask = update.firing_mask;
            }
            if update.extra_a.is_some() {
                prev.extra_a = update.extra_a;
            }
            if update.extra_b.is_some() {
                prev.extra_b = update.extra_b;
            }
        }
    }
}

impl EntityStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges a decoded update into the entity it names, creating the entity
    /// on first sighting. Returns the reconciled state.
    pub fn apply_update(&mut self, update: TankState) -> &TankState {
        let net_id = update.net_id;

        match self.entities.entry(net_id) {
            std::collections::hash_map::Entry::Vacant(slot) => {
                info!(
                    "Entity {} entered as unit type {}",
                    net_id, update.unit_type
                );
                slot.insert(update)
            }
            std::collections::hash_map::Entry::Occupied(slot) => {
                let stored = slot.into_mut();
                stored.unit_type = update.unit_type;
                stored.flags = update.flags;
                stored.position = update.position;
                stored.velocity = update.velocity;
                if let Some(vitals) = &update.vitals {
                    merge_vitals(&mut stored.vitals, vitals);
                }
                stored
            }
        }
    }

    pub fn get(&self, net_id: u32) -> Result<&TankState, ServerError> {
        self.entities
            .get(&net_id)
            .ok_or(ServerError::NotFound(net_id))
    }

    /// Last known unit type, used to pick the vitals schema of the entity's
    /// next frame.
    pub fn unit_type_hint(&self, net_id: u32) -> Option<u32> {
        self.entities.get(&net_id).map(|tank| tank.unit_type)
    }

    /// Handles the external "entity left" signal.
    pub fn remove(&mut self, net_id: u32) -> Option<TankState> {
        let removed = self.entities.remove(&net_id);
        if removed.is_some() {
            info!("Entity {} left", net_id);
        }
        removed
    }

    pub fn contains(&self, net_id: u32) -> bool {
        self.entities.contains_key(&net_id)
    }

    /// Copies of every entity, ordered by net id.
    pub fn snapshot(&self) -> Vec<TankState> {
        let mut tanks: Vec<TankState> = self.entities.values().cloned().collect();
        tanks.sort_by_key(|tank| tank.net_id);
        tanks
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::Vec3;

    fn update(net_id: u32, position: Vec3, vitals: Option<Vitals>) -> TankState {
        TankState {
            net_id,
            unit_type: 7,
            flags: 0,
            position,
            velocity: Vec3::ZERO,
            vitals,
        }
    }

    fn full_vitals() -> Vitals {
        Vitals {
            weapon_id: 3,
            health_mult: 500,
            energy_mult: 800,
            firing_mask: Some(4096),
            extra_a: None,
            extra_b: None,
        }
    }

    #[test]
    fn test_first_sighting_creates_entity() {
        let mut store = EntityStateStore::new();
        assert!(store.is_empty());

        let state = store
            .apply_update(update(42, Vec3::new(1.0, 2.0, 3.0), None))
            .clone();
        assert_eq!(state.net_id, 42);
        assert!(store.contains(42));
        assert_eq!(store.len(), 1);
        assert_eq!(store.unit_type_hint(42), Some(7));
        assert_eq!(store.unit_type_hint(43), None);
    }

    #[test]
    fn test_absent_vitals_keep_previous() {
        let mut store = EntityStateStore::new();
        store.apply_update(update(42, Vec3::new(1.0, 0.0, 0.0), Some(full_vitals())));

        let mut second = update(42, Vec3::new(5.0, 6.0, 7.0), None);
        second.flags = 0x04;
        second.velocity = Vec3::new(1.0, 1.0, 1.0);
        let state = store.apply_update(second.clone()).clone();

        assert_eq!(state.position, second.position);
        assert_eq!(state.velocity, second.velocity);
        assert_eq!(state.flags, 0x04);
        assert_eq!(state.vitals, Some(full_vitals()));
    }

    #[test]
    fn test_vitals_merge_field_by_field() {
        let mut store = EntityStateStore::new();
        let mut first = full_vitals();
        first.extra_a = Some(10);
        first.extra_b = Some(20);
        store.apply_update(update(1, Vec3::ZERO, Some(first)));

        let second = Vitals {
            weapon_id: 4,
            health_mult: 100,
            energy_mult: 200,
            firing_mask: None,
            extra_a: None,
            extra_b: None,
        };
        let state = store.apply_update(update(1, Vec3::ZERO, Some(second))).clone();
        let vitals = state.vitals.unwrap();

        assert_eq!(vitals.weapon_id, 4);
        assert_eq!(vitals.health_mult, 100);
        assert_eq!(vitals.energy_mult, 200);
        assert_eq!(vitals.firing_mask, Some(4096));
        assert_eq!(vitals.extra_a, Some(10));
        assert_eq!(vitals.extra_b, Some(20));
    }

    #[test]
    fn test_apply_is_idempotent() {
        let u = update(9, Vec3::new(3.0, 3.0, 3.0), Some(full_vitals()));

        let mut once = EntityStateStore::new();
        once.apply_update(u.clone());

        let mut twice = EntityStateStore::new();
        twice.apply_update(u.clone());
        twice.apply_update(u);

        assert_eq!(once.snapshot(), twice.snapshot());
    }

    #[test]
    fn test_get_and_remove() {
        let mut store = EntityStateStore::new();
        assert!(matches!(store.get(5), Err(ServerError::NotFound(5))));

        store.apply_update(update(5, Vec3::ZERO, None));
        assert!(store.get(5).is_ok());

        assert!(store.remove(5).is_some());
        assert!(store.remove(5).is_none());
        assert!(matches!(store.get(5), Err(ServerError::NotFound(5))));
    }

    #[test]
    fn test_snapshot_is_ordered() {
        let mut store = EntityStateStore::new();
        for net_id in [30, 10, 20] {
            store.apply_update(update(net_id, Vec3::ZERO, None));
        }
        let ids: Vec<u32> = store.snapshot().iter().map(|t| t.net_id).collect();
        assert_eq!(ids, vec![10, 20, 30]);
    }
}
