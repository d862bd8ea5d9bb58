//! Contacts between fixture children, the shape-pair registry and the user
//! callback traits.

use crate::collision::manifold::{Manifold, WorldManifold};
use crate::collision::narrowphase::{
    collide_circles, collide_edge_and_circle, collide_edge_and_polygon,
    collide_polygon_and_circle, collide_polygons, test_overlap,
};
use crate::collision::shapes::{Shape, ShapeType};
use crate::math::Transform;
use crate::settings::MAX_MANIFOLD_POINTS;

use super::fixture::Fixture;

/// Friction mixing law: geometric mean, so either fixture can drive it to zero.
#[inline]
pub fn mix_friction(friction_a: f32, friction_b: f32) -> f32 {
    (friction_a * friction_b).sqrt()
}

/// Restitution mixing law: anything bounces on a bouncy surface.
#[inline]
pub fn mix_restitution(restitution_a: f32, restitution_b: f32) -> f32 {
    restitution_a.max(restitution_b)
}

/// Contact state bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct ContactFlags(u8);

impl ContactFlags {
    /// Used by the TOI island builder.
    pub(crate) const ISLAND: Self = Self(0x01);
    /// The manifold has points (or the sensor shapes overlap).
    pub(crate) const TOUCHING: Self = Self(0x02);
    /// Cleared by the user in `pre_solve` to disable the contact for one step.
    pub(crate) const ENABLED: Self = Self(0x04);
    /// Fixture filtering changed, re-check before the next update.
    pub(crate) const FILTER: Self = Self(0x08);
    pub(crate) const BULLET_HIT: Self = Self(0x10);
    /// `toi` holds a valid time of impact.
    pub(crate) const TOI: Self = Self(0x20);

    #[inline]
    pub(crate) fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub(crate) fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    #[inline]
    pub(crate) fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    #[inline]
    pub(crate) fn set(&mut self, other: Self, value: bool) {
        if value {
            self.insert(other);
        } else {
            self.remove(other);
        }
    }
}

/// Manifold routine for one ordered shape pairing.
type EvaluateFn = fn(&Shape, usize, &Transform, &Shape, usize, &Transform) -> Manifold;

#[derive(Clone, Copy)]
struct ContactRegister {
    evaluate: EvaluateFn,
    /// False when the fixtures must be swapped before calling `evaluate`.
    primary: bool,
}

const fn register(evaluate: EvaluateFn, primary: bool) -> Option<ContactRegister> {
    Some(ContactRegister { evaluate, primary })
}

/// Dispatch table indexed by `[ShapeType::index(a)][ShapeType::index(b)]`.
/// Edge and chain pairs never collide with each other.
static REGISTRY: [[Option<ContactRegister>; ShapeType::COUNT]; ShapeType::COUNT] = [
    // Circle
    [
        register(evaluate_circles, true),
        register(evaluate_edge_and_circle, false),
        register(evaluate_polygon_and_circle, false),
        register(evaluate_chain_and_circle, false),
    ],
    // Edge
    [
        register(evaluate_edge_and_circle, true),
        None,
        register(evaluate_edge_and_polygon, true),
        None,
    ],
    // Polygon
    [
        register(evaluate_polygon_and_circle, true),
        register(evaluate_edge_and_polygon, false),
        register(evaluate_polygons, true),
        register(evaluate_chain_and_polygon, false),
    ],
    // Chain
    [
        register(evaluate_chain_and_circle, true),
        None,
        register(evaluate_chain_and_polygon, true),
        None,
    ],
];

fn evaluate_circles(
    a: &Shape,
    _: usize,
    xf_a: &Transform,
    b: &Shape,
    _: usize,
    xf_b: &Transform,
) -> Manifold {
    match (a, b) {
        (Shape::Circle(a), Shape::Circle(b)) => collide_circles(a, xf_a, b, xf_b),
        _ => unreachable!("circle contact on {:?}/{:?}", a.shape_type(), b.shape_type()),
    }
}

fn evaluate_polygon_and_circle(
    a: &Shape,
    _: usize,
    xf_a: &Transform,
    b: &Shape,
    _: usize,
    xf_b: &Transform,
) -> Manifold {
    match (a, b) {
        (Shape::Polygon(a), Shape::Circle(b)) => collide_polygon_and_circle(a, xf_a, b, xf_b),
        _ => unreachable!("polygon/circle contact on {:?}/{:?}", a.shape_type(), b.shape_type()),
    }
}

fn evaluate_polygons(
    a: &Shape,
    _: usize,
    xf_a: &Transform,
    b: &Shape,
    _: usize,
    xf_b: &Transform,
) -> Manifold {
    match (a, b) {
        (Shape::Polygon(a), Shape::Polygon(b)) => collide_polygons(a, xf_a, b, xf_b),
        _ => unreachable!("polygon contact on {:?}/{:?}", a.shape_type(), b.shape_type()),
    }
}

fn evaluate_edge_and_circle(
    a: &Shape,
    _: usize,
    xf_a: &Transform,
    b: &Shape,
    _: usize,
    xf_b: &Transform,
) -> Manifold {
    match (a, b) {
        (Shape::Edge(a), Shape::Circle(b)) => collide_edge_and_circle(a, xf_a, b, xf_b),
        _ => unreachable!("edge/circle contact on {:?}/{:?}", a.shape_type(), b.shape_type()),
    }
}

fn evaluate_edge_and_polygon(
    a: &Shape,
    _: usize,
    xf_a: &Transform,
    b: &Shape,
    _: usize,
    xf_b: &Transform,
) -> Manifold {
    match (a, b) {
        (Shape::Edge(a), Shape::Polygon(b)) => collide_edge_and_polygon(a, xf_a, b, xf_b),
        _ => unreachable!("edge/polygon contact on {:?}/{:?}", a.shape_type(), b.shape_type()),
    }
}

fn evaluate_chain_and_circle(
    a: &Shape,
    index_a: usize,
    xf_a: &Transform,
    b: &Shape,
    _: usize,
    xf_b: &Transform,
) -> Manifold {
    match (a, b) {
        (Shape::Chain(a), Shape::Circle(b)) => {
            collide_edge_and_circle(&a.child_edge(index_a), xf_a, b, xf_b)
        }
        _ => unreachable!("chain/circle contact on {:?}/{:?}", a.shape_type(), b.shape_type()),
    }
}

fn evaluate_chain_and_polygon(
    a: &Shape,
    index_a: usize,
    xf_a: &Transform,
    b: &Shape,
    _: usize,
    xf_b: &Transform,
) -> Manifold {
    match (a, b) {
        (Shape::Chain(a), Shape::Polygon(b)) => {
            collide_edge_and_polygon(&a.child_edge(index_a), xf_a, b, xf_b)
        }
        _ => unreachable!("chain/polygon contact on {:?}/{:?}", a.shape_type(), b.shape_type()),
    }
}

/// Impulses applied by the solver, reported through
/// [`ContactListener::post_solve`].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ContactImpulse {
    pub normal_impulses: [f32; MAX_MANIFOLD_POINTS],
    pub tangent_impulses: [f32; MAX_MANIFOLD_POINTS],
    pub count: usize,
}

/// Contact event callbacks. Every method defaults to a no-op.
///
/// Callbacks run in the middle of a step, so they must not create or
/// destroy bodies or fixtures.
pub trait ContactListener {
    /// Two fixtures began to touch.
    fn begin_contact(&mut self, _contact: &Contact) {}

    /// Two fixtures ceased to touch. Also called when a touching contact is destroyed.
    fn end_contact(&mut self, _contact: &Contact) {}

    /// Called after a touching manifold is updated and before it is solved.
    /// Disable the contact here to skip the response for this step.
    fn pre_solve(&mut self, _contact: &mut Contact, _old_manifold: &Manifold) {}

    /// Impulses the solver applied to a touching contact.
    fn post_solve(&mut self, _contact: &Contact, _impulse: &ContactImpulse) {}
}

/// Listener that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultContactListener;

impl ContactListener for DefaultContactListener {}

/// Decides whether two fixtures may form a contact.
pub trait ContactFilter {
    fn should_collide(&self, fixture_a: &Fixture, fixture_b: &Fixture) -> bool {
        fixture_a.filter().should_collide(fixture_b.filter())
    }
}

/// Category/mask/group filtering.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultContactFilter;

impl ContactFilter for DefaultContactFilter {}

/// The persistent interaction between two fixture children whose fat AABBs
/// overlap. The contact exists whether or not the shapes touch.
#[derive(Clone)]
pub struct Contact {
    pub(crate) flags: ContactFlags,
    pub(crate) fixture_a: hecs::Entity,
    pub(crate) fixture_b: hecs::Entity,
    pub(crate) child_a: usize,
    pub(crate) child_b: usize,
    pub(crate) body_a: hecs::Entity,
    pub(crate) body_b: hecs::Entity,
    pub(crate) manifold: Manifold,
    pub(crate) sensor: bool,
    pub(crate) toi_count: u32,
    pub(crate) toi: f32,
    pub(crate) friction: f32,
    pub(crate) restitution: f32,
    pub(crate) tangent_speed: f32,
    evaluate: EvaluateFn,
}

impl std::fmt::Debug for Contact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Contact")
            .field("fixture_a", &self.fixture_a)
            .field("child_a", &self.child_a)
            .field("fixture_b", &self.fixture_b)
            .field("child_b", &self.child_b)
            .field("touching", &self.is_touching())
            .field("point_count", &self.manifold.point_count)
            .finish()
    }
}

impl Contact {
    /// Look up the registry and build a contact, swapping the fixtures when
    /// the registered routine expects them the other way round. Returns
    /// `None` for pairings with no routine.
    pub(crate) fn new(
        entity_a: hecs::Entity,
        fixture_a: &Fixture,
        child_a: usize,
        entity_b: hecs::Entity,
        fixture_b: &Fixture,
        child_b: usize,
    ) -> Option<Self> {
        let type_a = fixture_a.shape().shape_type();
        let type_b = fixture_b.shape().shape_type();
        let entry = REGISTRY[type_a.index()][type_b.index()]?;

        if !entry.primary {
            return Self::new(entity_b, fixture_b, child_b, entity_a, fixture_a, child_a);
        }

        Some(Self {
            flags: ContactFlags::ENABLED,
            fixture_a: entity_a,
            fixture_b: entity_b,
            child_a,
            child_b,
            body_a: fixture_a.body(),
            body_b: fixture_b.body(),
            manifold: Manifold::default(),
            sensor: fixture_a.is_sensor() || fixture_b.is_sensor(),
            toi_count: 0,
            toi: 1.0,
            friction: mix_friction(fixture_a.friction, fixture_b.friction),
            restitution: mix_restitution(fixture_a.restitution, fixture_b.restitution),
            tangent_speed: 0.0,
            evaluate: entry.evaluate,
        })
    }

    pub fn manifold(&self) -> &Manifold {
        &self.manifold
    }

    pub fn manifold_mut(&mut self) -> &mut Manifold {
        &mut self.manifold
    }

    pub fn fixture_a(&self) -> hecs::Entity {
        self.fixture_a
    }

    pub fn fixture_b(&self) -> hecs::Entity {
        self.fixture_b
    }

    pub fn child_index_a(&self) -> usize {
        self.child_a
    }

    pub fn child_index_b(&self) -> usize {
        self.child_b
    }

    pub fn body_a(&self) -> hecs::Entity {
        self.body_a
    }

    pub fn body_b(&self) -> hecs::Entity {
        self.body_b
    }

    pub fn is_sensor(&self) -> bool {
        self.sensor
    }

    pub fn is_touching(&self) -> bool {
        self.flags.contains(ContactFlags::TOUCHING)
    }

    pub fn is_enabled(&self) -> bool {
        self.flags.contains(ContactFlags::ENABLED)
    }

    /// Only lasts for the current step; `update` re-enables the contact.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.flags.set(ContactFlags::ENABLED, enabled);
    }

    pub fn is_bullet_hit(&self) -> bool {
        self.flags.contains(ContactFlags::BULLET_HIT)
    }

    /// Re-run fixture filtering before the next update.
    pub fn flag_for_filtering(&mut self) {
        self.flags.insert(ContactFlags::FILTER);
    }

    pub fn friction(&self) -> f32 {
        self.friction
    }

    pub fn set_friction(&mut self, friction: f32) {
        self.friction = friction;
    }

    pub fn reset_friction(&mut self, fixture_a: &Fixture, fixture_b: &Fixture) {
        self.friction = mix_friction(fixture_a.friction, fixture_b.friction);
    }

    pub fn restitution(&self) -> f32 {
        self.restitution
    }

    pub fn set_restitution(&mut self, restitution: f32) {
        self.restitution = restitution;
    }

    pub fn reset_restitution(&mut self, fixture_a: &Fixture, fixture_b: &Fixture) {
        self.restitution = mix_restitution(fixture_a.restitution, fixture_b.restitution);
    }

    /// Desired surface speed along the tangent, for conveyor belts.
    pub fn tangent_speed(&self) -> f32 {
        self.tangent_speed
    }

    pub fn set_tangent_speed(&mut self, speed: f32) {
        self.tangent_speed = speed;
    }

    /// World-space normal, points and separations of the current manifold.
    pub fn world_manifold(
        &self,
        fixture_a: &Fixture,
        xf_a: &Transform,
        fixture_b: &Fixture,
        xf_b: &Transform,
    ) -> WorldManifold {
        WorldManifold::new(
            &self.manifold,
            xf_a,
            fixture_a.shape().radius(),
            xf_b,
            fixture_b.shape().radius(),
        )
    }

    /// Run the registered manifold routine without touching contact state.
    pub fn evaluate(
        &self,
        shape_a: &Shape,
        xf_a: &Transform,
        shape_b: &Shape,
        xf_b: &Transform,
    ) -> Manifold {
        (self.evaluate)(shape_a, self.child_a, xf_a, shape_b, self.child_b, xf_b)
    }

    /// Refresh the manifold, carry impulses over matching point ids and fire
    /// begin/end/pre-solve events.
    pub(crate) fn update(
        &mut self,
        shape_a: &Shape,
        xf_a: &Transform,
        shape_b: &Shape,
        xf_b: &Transform,
        listener: &mut dyn ContactListener,
    ) {
        let old_manifold = self.manifold;

        // Re-enable this contact.
        self.flags.insert(ContactFlags::ENABLED);

        let was_touching = self.is_touching();

        let touching = if self.sensor {
            // Sensors don't generate manifolds.
            self.manifold.point_count = 0;
            test_overlap(shape_a, self.child_a, shape_b, self.child_b, xf_a, xf_b)
        } else {
            self.manifold = self.evaluate(shape_a, xf_a, shape_b, xf_b);

            // Match old contact ids to new contact ids and copy the stored
            // impulses to warm start the solver.
            let point_count = self.manifold.point_count;
            for mp2 in &mut self.manifold.points[..point_count] {
                mp2.normal_impulse = 0.0;
                mp2.tangent_impulse = 0.0;
                let key = mp2.id.key();

                if let Some(mp1) = old_manifold
                    .points()
                    .iter()
                    .find(|mp1| mp1.id.key() == key)
                {
                    mp2.normal_impulse = mp1.normal_impulse;
                    mp2.tangent_impulse = mp1.tangent_impulse;
                }
            }

            point_count > 0
        };

        self.flags.set(ContactFlags::TOUCHING, touching);

        if !was_touching && touching {
            tracing::trace!(
                "Contact began between {:?} and {:?}",
                self.fixture_a,
                self.fixture_b
            );
            listener.begin_contact(self);
        }

        if was_touching && !touching {
            tracing::trace!(
                "Contact ended between {:?} and {:?}",
                self.fixture_a,
                self.fixture_b
            );
            listener.end_contact(self);
        }

        if !self.sensor && touching {
            listener.pre_solve(self, &old_manifold);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collision::shapes::{CircleShape, EdgeShape, PolygonShape};
    use crate::dynamics::fixture::FixtureDef;
    use glam::Vec2;

    #[derive(Default)]
    struct Recorder {
        begins: usize,
        ends: usize,
        pre_solves: usize,
    }

    impl ContactListener for Recorder {
        fn begin_contact(&mut self, _contact: &Contact) {
            self.begins += 1;
        }

        fn end_contact(&mut self, _contact: &Contact) {
            self.ends += 1;
        }

        fn pre_solve(&mut self, _contact: &mut Contact, _old_manifold: &Manifold) {
            self.pre_solves += 1;
        }
    }

    fn entities(n: usize) -> Vec<hecs::Entity> {
        let mut world = hecs::World::new();
        (0..n).map(|_| world.spawn(())).collect()
    }

    fn fixture(body: hecs::Entity, def: FixtureDef) -> Fixture {
        Fixture::new(body, def)
    }

    #[test]
    fn test_mixing_laws() {
        assert!((mix_friction(0.4, 0.9) - 0.6).abs() < 1e-6);
        assert_eq!(mix_friction(0.0, 1.0), 0.0);
        assert_eq!(mix_restitution(0.1, 0.7), 0.7);
    }

    #[test]
    fn test_registry_swaps_to_primary_order() {
        let e = entities(4);
        let circle = fixture(e[0], FixtureDef::new(CircleShape::new(Vec2::ZERO, 0.5)));
        let block = fixture(e[1], FixtureDef::new(PolygonShape::new_box(1.0, 1.0)));

        let contact = Contact::new(e[2], &circle, 0, e[3], &block, 0).unwrap();
        assert_eq!(contact.fixture_a(), e[3], "polygon should be fixture A");
        assert_eq!(contact.fixture_b(), e[2]);
        assert_eq!(contact.body_a(), e[1]);
    }

    #[test]
    fn test_registry_rejects_edge_pairs() {
        let e = entities(3);
        let edge = fixture(
            e[0],
            FixtureDef::new(EdgeShape::new(Vec2::ZERO, Vec2::new(1.0, 0.0))),
        );
        assert!(Contact::new(e[1], &edge, 0, e[2], &edge, 0).is_none());
    }

    #[test]
    fn test_update_fires_events_and_keeps_impulses() {
        let e = entities(4);
        let a = fixture(e[0], FixtureDef::new(PolygonShape::new_box(5.0, 0.5)));
        let b = fixture(e[1], FixtureDef::new(PolygonShape::new_box(0.5, 0.5)));
        let mut contact = Contact::new(e[2], &a, 0, e[3], &b, 0).unwrap();
        let mut recorder = Recorder::default();

        let xf_a = Transform::IDENTITY;
        let touching_xf = Transform::from_translation(Vec2::new(0.0, 0.99));
        contact.update(a.shape(), &xf_a, b.shape(), &touching_xf, &mut recorder);
        assert!(contact.is_touching());
        assert_eq!(recorder.begins, 1);
        assert_eq!(recorder.pre_solves, 1);

        // Stored impulses survive a manifold refresh with identical ids.
        for mp in contact.manifold_mut().points_mut() {
            mp.normal_impulse = 3.0;
        }
        contact.update(a.shape(), &xf_a, b.shape(), &touching_xf, &mut recorder);
        assert!(contact
            .manifold()
            .points()
            .iter()
            .all(|mp| (mp.normal_impulse - 3.0).abs() < 1e-6));
        assert_eq!(recorder.begins, 1);

        let apart = Transform::from_translation(Vec2::new(0.0, 2.0));
        contact.update(a.shape(), &xf_a, b.shape(), &apart, &mut recorder);
        assert!(!contact.is_touching());
        assert_eq!(recorder.ends, 1);
    }

    #[test]
    fn test_sensor_reports_overlap_without_points() {
        let e = entities(4);
        let a = fixture(e[0], FixtureDef::new(CircleShape::new(Vec2::ZERO, 1.0)).sensor());
        let b = fixture(e[1], FixtureDef::new(CircleShape::new(Vec2::ZERO, 1.0)));
        let mut contact = Contact::new(e[2], &a, 0, e[3], &b, 0).unwrap();
        let mut recorder = Recorder::default();

        let xf_b = Transform::from_translation(Vec2::new(1.5, 0.0));
        contact.update(a.shape(), &Transform::IDENTITY, b.shape(), &xf_b, &mut recorder);
        assert!(contact.is_sensor());
        assert!(contact.is_touching());
        assert_eq!(contact.manifold().point_count, 0);
        assert_eq!(recorder.pre_solves, 0, "sensors skip pre-solve");
    }
}
