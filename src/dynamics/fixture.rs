//! Fixtures attach shapes to bodies and own their broad-phase proxies.

use glam::Vec2;

use crate::collision::broadphase::{BroadPhase, ProxyId};
use crate::collision::shapes::{MassData, Shape};
use crate::collision::{Aabb, RayCastInput, RayCastOutput};
use crate::math::Transform;

/// Collision filtering data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Filter {
    /// Collision category bits. Normally only one bit is set.
    pub category_bits: u16,
    /// Categories this fixture accepts collisions with.
    pub mask_bits: u16,
    /// Fixtures sharing a non-zero group always collide (positive) or never
    /// collide (negative). Zero falls back to the category/mask test.
    pub group_index: i16,
}

impl Default for Filter {
    fn default() -> Self {
        Self {
            category_bits: 0x0001,
            mask_bits: 0xFFFF,
            group_index: 0,
        }
    }
}

impl Filter {
    pub fn should_collide(&self, other: &Filter) -> bool {
        if self.group_index == other.group_index && self.group_index != 0 {
            return self.group_index > 0;
        }
        (self.mask_bits & other.category_bits) != 0 && (self.category_bits & other.mask_bits) != 0
    }
}

/// Everything needed to attach a shape to a body.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FixtureDef {
    pub shape: Shape,
    /// Density in kg/m^2.
    pub density: f32,
    pub friction: f32,
    pub restitution: f32,
    /// Sensors report overlap but produce no collision response.
    pub is_sensor: bool,
    pub filter: Filter,
}

impl FixtureDef {
    pub fn new(shape: impl Into<Shape>) -> Self {
        Self {
            shape: shape.into(),
            density: 0.0,
            friction: 0.2,
            restitution: 0.0,
            is_sensor: false,
            filter: Filter::default(),
        }
    }

    pub fn with_density(mut self, density: f32) -> Self {
        self.density = density;
        self
    }

    pub fn with_friction(mut self, friction: f32) -> Self {
        self.friction = friction;
        self
    }

    pub fn with_restitution(mut self, restitution: f32) -> Self {
        self.restitution = restitution;
        self
    }

    pub fn sensor(mut self) -> Self {
        self.is_sensor = true;
        self
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }
}

/// Broad-phase user data: which fixture child a proxy belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FixtureProxyKey {
    pub fixture: hecs::Entity,
    pub child_index: usize,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct FixtureProxy {
    pub(crate) aabb: Aabb,
    pub(crate) proxy_id: ProxyId,
}

/// Fixture component.
#[derive(Debug, Clone)]
pub struct Fixture {
    pub(crate) body: hecs::Entity,
    pub(crate) shape: Shape,
    pub density: f32,
    pub friction: f32,
    pub restitution: f32,
    pub(crate) is_sensor: bool,
    pub(crate) filter: Filter,
    pub(crate) proxies: Vec<FixtureProxy>,
}

impl Fixture {
    pub(crate) fn new(body: hecs::Entity, def: FixtureDef) -> Self {
        Self {
            body,
            shape: def.shape,
            density: def.density,
            friction: def.friction,
            restitution: def.restitution,
            is_sensor: def.is_sensor,
            filter: def.filter,
            proxies: Vec::new(),
        }
    }

    pub fn body(&self) -> hecs::Entity {
        self.body
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn is_sensor(&self) -> bool {
        self.is_sensor
    }

    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    pub fn proxy_id(&self, child_index: usize) -> Option<ProxyId> {
        self.proxies.get(child_index).map(|p| p.proxy_id)
    }

    /// Fat AABB of a child as last synchronized with the broad phase.
    pub fn aabb(&self, child_index: usize) -> Option<&Aabb> {
        self.proxies.get(child_index).map(|p| &p.aabb)
    }

    pub fn test_point(&self, xf: &Transform, p: Vec2) -> bool {
        self.shape.test_point(xf, p)
    }

    pub fn ray_cast(
        &self,
        input: &RayCastInput,
        xf: &Transform,
        child_index: usize,
    ) -> Option<RayCastOutput> {
        self.shape.ray_cast(input, xf, child_index)
    }

    pub fn mass_data(&self) -> MassData {
        self.shape.compute_mass(self.density)
    }

    pub(crate) fn create_proxies(
        &mut self,
        broad_phase: &mut BroadPhase<FixtureProxyKey>,
        xf: &Transform,
        fixture: hecs::Entity,
    ) {
        debug_assert!(self.proxies.is_empty());

        for child_index in 0..self.shape.child_count() {
            let aabb = self.shape.compute_aabb(xf, child_index);
            let proxy_id = broad_phase.create_proxy(
                aabb,
                FixtureProxyKey {
                    fixture,
                    child_index,
                },
            );
            self.proxies.push(FixtureProxy { aabb, proxy_id });
        }
    }

    pub(crate) fn destroy_proxies(&mut self, broad_phase: &mut BroadPhase<FixtureProxyKey>) {
        for proxy in self.proxies.drain(..) {
            broad_phase.destroy_proxy(proxy.proxy_id);
        }
    }

    /// Cover the swept motion from `xf1` to `xf2` and move the proxies.
    pub(crate) fn synchronize(
        &mut self,
        broad_phase: &mut BroadPhase<FixtureProxyKey>,
        xf1: &Transform,
        xf2: &Transform,
    ) {
        let displacement = xf2.p - xf1.p;
        for (child_index, proxy) in self.proxies.iter_mut().enumerate() {
            let aabb1 = self.shape.compute_aabb(xf1, child_index);
            let aabb2 = self.shape.compute_aabb(xf2, child_index);
            proxy.aabb = aabb1.combine(&aabb2);
            broad_phase.move_proxy(proxy.proxy_id, proxy.aabb, displacement);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_default_collides() {
        assert!(Filter::default().should_collide(&Filter::default()));
    }

    #[test]
    fn test_filter_group_overrides_mask() {
        let friend = Filter {
            group_index: 2,
            mask_bits: 0,
            ..Default::default()
        };
        assert!(friend.should_collide(&friend), "positive group always collides");

        let ghost = Filter {
            group_index: -1,
            ..Default::default()
        };
        assert!(!ghost.should_collide(&ghost), "negative group never collides");
    }

    #[test]
    fn test_filter_category_mask() {
        let player = Filter {
            category_bits: 0x0002,
            mask_bits: 0xFFFF & !0x0002,
            group_index: 0,
        };
        let wall = Filter::default();
        assert!(player.should_collide(&wall));
        assert!(!player.should_collide(&player));
    }
}
