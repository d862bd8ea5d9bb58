//! Owns the broad phase and the contact list.

use rustc_hash::FxHashSet;

use crate::collision::broadphase::BroadPhase;

use super::body::{BodyType, RigidBody};
use super::contact::{
    Contact, ContactFilter, ContactFlags, ContactListener, DefaultContactFilter,
    DefaultContactListener,
};
use super::fixture::{Fixture, FixtureProxyKey};

/// Canonical identity of a fixture-child pair, independent of order.
type PairKey = (u64, usize, u64, usize);

fn pair_key(a: FixtureProxyKey, b: FixtureProxyKey) -> PairKey {
    let ka = (a.fixture.to_bits().get(), a.child_index);
    let kb = (b.fixture.to_bits().get(), b.child_index);
    let (lo, hi) = if ka <= kb { (ka, kb) } else { (kb, ka) };
    (lo.0, lo.1, hi.0, hi.1)
}

/// Creates contacts for new broad-phase pairs, updates them every step and
/// destroys them when the fat AABBs separate.
pub struct ContactManager {
    pub(crate) broad_phase: BroadPhase<FixtureProxyKey>,
    pub(crate) contacts: Vec<Contact>,
    pair_set: FxHashSet<PairKey>,
    pub(crate) filter: Box<dyn ContactFilter>,
    pub(crate) listener: Box<dyn ContactListener>,
}

impl Default for ContactManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ContactManager {
    pub fn new() -> Self {
        Self {
            broad_phase: BroadPhase::new(),
            contacts: Vec::new(),
            pair_set: FxHashSet::default(),
            filter: Box::new(DefaultContactFilter),
            listener: Box::new(DefaultContactListener),
        }
    }

    pub fn broad_phase(&self) -> &BroadPhase<FixtureProxyKey> {
        &self.broad_phase
    }

    pub fn contacts(&self) -> &[Contact] {
        &self.contacts
    }

    pub fn contact_count(&self) -> usize {
        self.contacts.len()
    }

    /// Broad-phase callback: create a contact unless the pair is rejected.
    pub fn add_pair(
        &mut self,
        registry: &hecs::World,
        key_a: FixtureProxyKey,
        key_b: FixtureProxyKey,
    ) {
        // Are the fixtures on the same body?
        if key_a.fixture == key_b.fixture {
            return;
        }

        let (Ok(fixture_a), Ok(fixture_b)) = (
            registry.get::<&Fixture>(key_a.fixture),
            registry.get::<&Fixture>(key_b.fixture),
        ) else {
            return;
        };

        let body_a = fixture_a.body();
        let body_b = fixture_b.body();
        if body_a == body_b {
            return;
        }

        // Does a contact already exist?
        let key = pair_key(key_a, key_b);
        if self.pair_set.contains(&key) {
            return;
        }

        // Does a joint or body type override collision?
        let should_collide = match (
            registry.get::<&RigidBody>(body_a),
            registry.get::<&RigidBody>(body_b),
        ) {
            (Ok(a), Ok(b)) => a.should_collide(&b),
            _ => false,
        };
        if !should_collide {
            return;
        }

        if !self.filter.should_collide(&fixture_a, &fixture_b) {
            return;
        }

        let Some(contact) = Contact::new(
            key_a.fixture,
            &fixture_a,
            key_a.child_index,
            key_b.fixture,
            &fixture_b,
            key_b.child_index,
        ) else {
            return;
        };

        self.pair_set.insert(key);
        self.contacts.push(contact);
    }

    /// Turn moved proxies into contacts.
    pub fn find_new_contacts(&mut self, registry: &hecs::World) {
        let mut pairs = Vec::new();
        self.broad_phase
            .update_pairs(|a: &FixtureProxyKey, b: &FixtureProxyKey| pairs.push((*a, *b)));

        for (a, b) in pairs {
            self.add_pair(registry, a, b);
        }
    }

    /// Narrow phase for every contact. Drops contacts whose fixtures no
    /// longer qualify or whose fat AABBs stopped overlapping.
    pub fn collide(&mut self, registry: &hecs::World) {
        let mut index = 0;
        while index < self.contacts.len() {
            let contact = &self.contacts[index];
            let (Ok(fixture_a), Ok(fixture_b)) = (
                registry.get::<&Fixture>(contact.fixture_a),
                registry.get::<&Fixture>(contact.fixture_b),
            ) else {
                self.destroy(index);
                continue;
            };
            let (Ok(body_a), Ok(body_b)) = (
                registry.get::<&RigidBody>(contact.body_a),
                registry.get::<&RigidBody>(contact.body_b),
            ) else {
                self.destroy(index);
                continue;
            };

            // Is this contact flagged for filtering?
            if contact.flags.contains(ContactFlags::FILTER) {
                if !body_a.should_collide(&body_b)
                    || !self.filter.should_collide(&fixture_a, &fixture_b)
                {
                    self.destroy(index);
                    continue;
                }
                self.contacts[index].flags.remove(ContactFlags::FILTER);
            }

            // At least one body must be able to move.
            let active_a = body_a.body_type != BodyType::Static;
            let active_b = body_b.body_type != BodyType::Static;
            if !active_a && !active_b {
                index += 1;
                continue;
            }

            let contact = &self.contacts[index];
            let overlap = match (
                fixture_a.proxy_id(contact.child_a),
                fixture_b.proxy_id(contact.child_b),
            ) {
                (Some(proxy_a), Some(proxy_b)) => self.broad_phase.test_overlap(proxy_a, proxy_b),
                _ => false,
            };

            // Here we destroy contacts that cease to overlap in the broad phase.
            if !overlap {
                self.destroy(index);
                continue;
            }

            // The contact persists.
            let xf_a = *body_a.transform();
            let xf_b = *body_b.transform();
            self.contacts[index].update(
                fixture_a.shape(),
                &xf_a,
                fixture_b.shape(),
                &xf_b,
                self.listener.as_mut(),
            );
            index += 1;
        }
    }

    /// Remove the contact at `index`, firing `end_contact` if it was touching.
    pub fn destroy(&mut self, index: usize) {
        let contact = self.contacts.swap_remove(index);

        if contact.is_touching() {
            self.listener.end_contact(&contact);
        }

        let key = pair_key(
            FixtureProxyKey {
                fixture: contact.fixture_a,
                child_index: contact.child_a,
            },
            FixtureProxyKey {
                fixture: contact.fixture_b,
                child_index: contact.child_b,
            },
        );
        self.pair_set.remove(&key);
    }

    /// Destroy every contact that references `fixture`.
    pub fn destroy_fixture_contacts(&mut self, fixture: hecs::Entity) {
        let mut index = 0;
        while index < self.contacts.len() {
            let contact = &self.contacts[index];
            if contact.fixture_a == fixture || contact.fixture_b == fixture {
                self.destroy(index);
            } else {
                index += 1;
            }
        }
    }

    /// Flag every contact of `fixture` so filtering is re-evaluated.
    pub fn refilter(&mut self, fixture: hecs::Entity) {
        for contact in &mut self.contacts {
            if contact.fixture_a == fixture || contact.fixture_b == fixture {
                contact.flag_for_filtering();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collision::shapes::{CircleShape, PolygonShape};
    use crate::dynamics::body::BodyDef;
    use crate::dynamics::fixture::FixtureDef;
    use glam::Vec2;

    fn spawn_body_with_fixture(
        registry: &mut hecs::World,
        manager: &mut ContactManager,
        def: BodyDef,
        fixture_def: FixtureDef,
    ) -> (hecs::Entity, hecs::Entity) {
        let body = registry.spawn((RigidBody::new(&def),));
        let fixture = registry.spawn((Fixture::new(body, fixture_def),));
        let xf = *registry.get::<&RigidBody>(body).unwrap().transform();
        registry
            .get::<&mut Fixture>(fixture)
            .unwrap()
            .create_proxies(&mut manager.broad_phase, &xf, fixture);
        registry
            .get::<&mut RigidBody>(body)
            .unwrap()
            .fixtures
            .push(fixture);
        (body, fixture)
    }

    #[test]
    fn test_find_new_contacts_dedups_pairs() {
        let mut registry = hecs::World::new();
        let mut manager = ContactManager::new();

        spawn_body_with_fixture(
            &mut registry,
            &mut manager,
            BodyDef::new_static(Vec2::ZERO),
            FixtureDef::new(PolygonShape::new_box(5.0, 0.5)),
        );
        spawn_body_with_fixture(
            &mut registry,
            &mut manager,
            BodyDef::new_dynamic(Vec2::new(0.0, 1.0)),
            FixtureDef::new(CircleShape::new(Vec2::ZERO, 0.5)),
        );

        manager.find_new_contacts(&registry);
        assert_eq!(manager.contact_count(), 1);

        // Touch every proxy again: the existing pair must not be duplicated.
        for id in 0..manager.broad_phase.proxy_count() {
            manager.broad_phase.touch_proxy(id);
        }
        manager.find_new_contacts(&registry);
        assert_eq!(manager.contact_count(), 1);
    }

    #[test]
    fn test_static_pairs_never_form() {
        let mut registry = hecs::World::new();
        let mut manager = ContactManager::new();

        for x in [0.0, 0.5] {
            spawn_body_with_fixture(
                &mut registry,
                &mut manager,
                BodyDef::new_static(Vec2::new(x, 0.0)),
                FixtureDef::new(PolygonShape::new_box(1.0, 1.0)),
            );
        }

        manager.find_new_contacts(&registry);
        assert_eq!(manager.contact_count(), 0);
    }

    #[test]
    fn test_collide_updates_and_destroys() {
        let mut registry = hecs::World::new();
        let mut manager = ContactManager::new();

        spawn_body_with_fixture(
            &mut registry,
            &mut manager,
            BodyDef::new_static(Vec2::ZERO),
            FixtureDef::new(PolygonShape::new_box(5.0, 0.5)),
        );
        let (ball, ball_fixture) = spawn_body_with_fixture(
            &mut registry,
            &mut manager,
            BodyDef::new_dynamic(Vec2::new(0.0, 0.99)),
            FixtureDef::new(CircleShape::new(Vec2::ZERO, 0.5)),
        );

        manager.find_new_contacts(&registry);
        manager.collide(&registry);
        assert!(manager.contacts()[0].is_touching());

        // Teleport the ball far away and resynchronize its proxy.
        {
            let mut body = registry.get::<&mut RigidBody>(ball).unwrap();
            body.set_transform(Vec2::new(0.0, 50.0), 0.0);
        }
        let xf = *registry.get::<&RigidBody>(ball).unwrap().transform();
        registry
            .get::<&mut Fixture>(ball_fixture)
            .unwrap()
            .synchronize(&mut manager.broad_phase, &xf, &xf);

        manager.collide(&registry);
        assert_eq!(manager.contact_count(), 0);
    }

    #[test]
    fn test_refilter_destroys_rejected_contact() {
        let mut registry = hecs::World::new();
        let mut manager = ContactManager::new();

        spawn_body_with_fixture(
            &mut registry,
            &mut manager,
            BodyDef::new_static(Vec2::ZERO),
            FixtureDef::new(PolygonShape::new_box(5.0, 0.5)),
        );
        let (_, ball_fixture) = spawn_body_with_fixture(
            &mut registry,
            &mut manager,
            BodyDef::new_dynamic(Vec2::new(0.0, 0.99)),
            FixtureDef::new(CircleShape::new(Vec2::ZERO, 0.5)),
        );

        manager.find_new_contacts(&registry);
        assert_eq!(manager.contact_count(), 1);

        registry
            .get::<&mut Fixture>(ball_fixture)
            .unwrap()
            .filter
            .mask_bits = 0;
        manager.refilter(ball_fixture);
        manager.collide(&registry);
        assert_eq!(manager.contact_count(), 0);
    }
}
