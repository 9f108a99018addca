//! Portals: placement, links and teleportation of whatever walks into them.
//!
//! Portals are expected to be root entities, their `Transform` is their world pose. Each portal
//! carries a thin sensor on its surface which beams can hit, and a child trigger volume which
//! reports movers overlapping it.

use bevy::{prelude::*, reflect::FromReflect};
use bevy_rapier3d::prelude::*;
use iyes_loopless::prelude::*;

pub mod gate;
pub mod geometry;
pub mod network;
mod placement;
pub mod velocity;

pub use gate::{GateRejection, Locomotion, MovementCollaborator, Mover};
pub use network::{PortalNetwork, PortalSettings};
pub use placement::{PlacementSettings, PortalSlot};

use gate::{check, resolve_mover_root, traverse, MomentumDelivery, MoverRefs};
use network::PortalEnd;

use super::{
    first_person_controller::{FirstPersonController, FirstPersonLabels},
    game::GameState,
    physics::*,
};

#[derive(Debug)]
pub struct PortalPlugin;

#[derive(Debug, SystemLabel)]
pub enum PortalLabels {
    RegisterPortals,
    LinkPortals,
    ShootPortals,
    TeleportEntities,
}

pub const PORTAL_SIZE: Vec2 = Vec2::new(1.5, 2.);
const SURFACE_HALF_DEPTH: f32 = 0.005;
const TRIGGER_HALF_DEPTH: f32 = 0.3;

#[derive(Debug, Default, Component, Reflect, FromReflect)]
#[reflect(Component)]
pub struct Portal;

/// Allows an entity without a `Mover` to be carried through portals as a plain transform.
#[derive(Debug, Component, Clone, Default, Reflect, FromReflect)]
#[reflect(Component)]
pub struct PortalTeleport;

/// Free form tag, matched by portal filters and used by beams to recognise portal surfaces.
#[derive(Debug, Clone, Default, PartialEq, Eq, Component, Reflect, FromReflect)]
#[reflect(Component)]
pub struct Tag(pub String);

/// Link this portal to another one once both are registered.
#[derive(Debug, Clone, Copy, Component)]
pub struct PortalLink(pub Entity);

#[derive(Debug, Resource)]
pub struct PortalAssets {
    pub mesh: Handle<Mesh>,
    pub slot_materials: [Handle<StandardMaterial>; 2],
    pub fixed_material: Handle<StandardMaterial>,
}

impl PortalAssets {
    pub fn slot_material(&self, slot: PortalSlot) -> Handle<StandardMaterial> {
        match slot {
            PortalSlot::A => self.slot_materials[0].clone(),
            PortalSlot::B => self.slot_materials[1].clone(),
        }
    }
}

#[derive(Bundle, Default)]
pub struct PortalBundle {
    #[bundle]
    pub pbr: PbrBundle,
    pub portal: Portal,
    pub name: Name,
}

/// Sensor lying on the portal plane, for beams.
#[derive(Bundle)]
pub struct PortalSurface {
    pub collider: Collider,
    pub sensor: Sensor,
    pub collision_groups: CollisionGroups,
}

impl Default for PortalSurface {
    fn default() -> Self {
        PortalSurface {
            collider: Collider::cuboid(PORTAL_SIZE.x / 2., PORTAL_SIZE.y / 2., SURFACE_HALF_DEPTH),
            sensor: Sensor,
            collision_groups: CollisionGroups::new(PORTAL_GROUP, RAYCAST_GROUP),
        }
    }
}

/// Trigger volume straddling the portal plane, for movers.
#[derive(Bundle)]
pub struct PortalTrigger {
    #[bundle]
    pub transform: TransformBundle,
    pub collider: Collider,
    pub sensor: Sensor,
    pub collision_groups: CollisionGroups,
    pub active_events: ActiveEvents,
    pub active_collision_types: ActiveCollisionTypes,
    pub name: Name,
}

impl Default for PortalTrigger {
    fn default() -> Self {
        PortalTrigger {
            transform: TransformBundle::default(),
            collider: Collider::cuboid(PORTAL_SIZE.x / 2., PORTAL_SIZE.y / 2., TRIGGER_HALF_DEPTH),
            sensor: Sensor,
            collision_groups: CollisionGroups::new(PORTAL_GROUP, PLAYER_GROUP | PROPS_GROUP),
            active_events: ActiveEvents::COLLISION_EVENTS,
            active_collision_types: ActiveCollisionTypes::default()
                | ActiveCollisionTypes::KINEMATIC_STATIC,
            name: Name::from("Portal trigger"),
        }
    }
}

/// Spawn a portal with its colliders.
pub fn spawn_portal(commands: &mut Commands, bundle: PortalBundle) -> Entity {
    commands
        .spawn(bundle)
        .insert(PortalSurface::default())
        .with_children(|parent| {
            parent.spawn(PortalTrigger::default());
        })
        .id()
}

impl Plugin for PortalPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<PortalNetwork>()
            .init_resource::<PortalSettings>()
            .init_resource::<PlacementSettings>()
            .register_type::<Portal>()
            .register_type::<PortalTeleport>()
            .register_type::<PortalSlot>()
            .register_type::<Tag>()
            .register_type::<Mover>()
            .register_type::<PortalSettings>()
            .add_startup_system_to_stage(StartupStage::PreStartup, load_portal_assets);
        add_network_systems(app);
        app.add_system(
                placement::fire_portals
                    .run_in_state(GameState::Playing)
                    .label(PortalLabels::ShootPortals)
                    .after(PortalLabels::LinkPortals),
            )
            .add_system(
                teleport_on_overlap::<FirstPersonController>
                    .run_in_state(GameState::Playing)
                    .label(PortalLabels::TeleportEntities)
                    .after(PortalLabels::ShootPortals)
                    .after(FirstPersonLabels::ProcessInputs),
            );
    }
}

/// Systems keeping the network in sync with the portal entities.
fn add_network_systems(app: &mut App) {
    app.add_system(register_portals.label(PortalLabels::RegisterPortals))
        .add_system(
            link_portals
                .label(PortalLabels::LinkPortals)
                .after(PortalLabels::RegisterPortals),
        )
        // Portals despawned by Update commands are only reported to later stages.
        .add_system_to_stage(CoreStage::PostUpdate, forget_portals);
}

fn load_portal_assets(
    mut commands: Commands,
    mut meshes: ResMut<Assets<Mesh>>,
    mut materials: ResMut<Assets<StandardMaterial>>,
) {
    let mesh = meshes.add(
        shape::Quad {
            size: PORTAL_SIZE,
            flip: false,
        }
        .into(),
    );
    let mut portal_material = |color: Color| {
        materials.add(StandardMaterial {
            base_color: color,
            unlit: true,
            double_sided: true,
            cull_mode: None,
            ..default()
        })
    };
    commands.insert_resource(PortalAssets {
        mesh,
        slot_materials: [
            portal_material(PortalSlot::A.color()),
            portal_material(PortalSlot::B.color()),
        ],
        fixed_material: portal_material(Color::rgb(0.6, 0.2, 0.9)),
    });
}

/// Keep the network in sync with the portal entities.
fn register_portals(
    mut network: ResMut<PortalNetwork>,
    defaults: Res<PortalSettings>,
    portal_query: Query<
        (Entity, &Transform, Option<&PortalSettings>),
        (With<Portal>, Or<(Added<Portal>, Changed<Transform>)>),
    >,
) {
    for (entity, transform, settings) in &portal_query {
        let settings = settings.unwrap_or(&defaults).clone();
        if network.contains(entity) {
            network.update_pose(entity, *transform);
            network.update_settings(entity, settings);
        } else {
            info!("Registering portal {:?} at {}", entity, transform.translation);
            network.register(PortalEnd::new(entity, *transform, settings));
        }
    }
}

fn forget_portals(mut network: ResMut<PortalNetwork>, removed: RemovedComponents<Portal>) {
    for entity in removed.iter() {
        network.remove(entity);
    }
}

fn link_portals(
    mut commands: Commands,
    mut network: ResMut<PortalNetwork>,
    link_query: Query<(Entity, &PortalLink)>,
) {
    for (entity, link) in &link_query {
        if network.linked(entity) == Some(link.0) {
            commands.entity(entity).remove::<PortalLink>();
        } else if network.link(entity, link.0) {
            info!("Linked portals {:?} and {:?}", entity, link.0);
            commands.entity(entity).remove::<PortalLink>();
        }
    }
}

/// The portal a collider belongs to: itself or the portal owning its trigger volume.
fn portal_of(
    network: &PortalNetwork,
    parent_of: impl Fn(Entity) -> Option<Entity>,
    collider: Entity,
) -> Option<Entity> {
    if network.contains(collider) {
        return Some(collider);
    }
    parent_of(collider).filter(|parent| network.contains(*parent))
}

/// Decide whether `collider`, overlapping `portal`, goes through. Returns the mover to teleport.
///
/// The portal is checked first, then the tag of the overlapping body or of its nearest tagged
/// ancestor, and only then is a mover looked for.
#[allow(clippy::too_many_arguments)]
fn admit_overlap(
    network: &PortalNetwork,
    portal: Entity,
    collider: Entity,
    now: f32,
    parent_of: impl Fn(Entity) -> Option<Entity>,
    locomotion_of: impl Fn(Entity) -> Option<Locomotion>,
    teleportable: impl Fn(Entity) -> bool,
    tag_of: impl Fn(Entity) -> Option<String>,
) -> Result<Entity, GateRejection> {
    const MAX_DEPTH: usize = 64;

    let tag = std::iter::successors(Some(collider), |entity| parent_of(*entity))
        .take(MAX_DEPTH)
        .find_map(&tag_of);
    check(network, portal, now, tag.as_deref())?;
    resolve_mover_root(collider, &parent_of, locomotion_of, teleportable)
        .ok_or(GateRejection::NoMoverRoot(collider))
}

fn report(rejection: &GateRejection) {
    match rejection {
        GateRejection::UnknownPortal(_)
        | GateRejection::Unlinked(_)
        | GateRejection::NoMoverRoot(_) => warn!("{}", rejection),
        GateRejection::CoolingDown { .. }
        | GateRejection::ExitCoolingDown { .. }
        | GateRejection::TagMismatch { .. } => debug!("{}", rejection),
    }
}

fn teleport_on_overlap<C: Component + MovementCollaborator>(
    time: Res<Time>,
    mut collisions: EventReader<CollisionEvent>,
    mut network: ResMut<PortalNetwork>,
    hierarchy: Query<&Parent>,
    movers: Query<&Mover>,
    teleportable: Query<(), With<PortalTeleport>>,
    tags: Query<&Tag>,
    mut bodies: Query<
        (
            &mut Transform,
            Option<&mut Velocity>,
            Option<&mut KinematicCharacterController>,
            Option<&KinematicCharacterControllerOutput>,
            Option<&mut C>,
        ),
        Without<Portal>,
    >,
) {
    let now = time.elapsed_seconds();
    let dt = time.delta_seconds();

    for collision in collisions.iter() {
        let CollisionEvent::Started(a, b, _flags) = collision else {
            continue;
        };
        let parent_of = |entity: Entity| hierarchy.get(entity).ok().map(|parent| parent.get());
        let (portal, other) = match (
            portal_of(&network, parent_of, *a),
            portal_of(&network, parent_of, *b),
        ) {
            (Some(portal), None) => (portal, *b),
            (None, Some(portal)) => (portal, *a),
            _ => continue,
        };

        let root = match admit_overlap(
            &network,
            portal,
            other,
            now,
            parent_of,
            |entity| movers.get(entity).ok().map(|mover| mover.locomotion),
            |entity| teleportable.contains(entity),
            |entity| tags.get(entity).ok().map(|tag| tag.0.clone()),
        ) {
            Ok(root) => root,
            Err(rejection) => {
                report(&rejection);
                continue;
            }
        };

        let Ok((mut transform, mut velocity, mut controller, output, mut collaborator)) =
            bodies.get_mut(root)
        else {
            report(&GateRejection::NoMoverRoot(other));
            continue;
        };
        let mover = MoverRefs {
            transform: &mut transform,
            mover: movers.get(root).copied().unwrap_or_default(),
            body_velocity: velocity.as_deref_mut(),
            controller: controller.as_deref_mut(),
            controller_velocity: output
                .filter(|_| dt > 0.)
                .map(|output| output.effective_translation / dt),
            movement: collaborator
                .as_deref_mut()
                .map(|movement| movement as &mut dyn MovementCollaborator),
        };

        match traverse(&mut network, portal, now, mover) {
            Ok(outcome) => {
                info!(
                    "Teleported {:?} from portal {:?} to {:?}, exit velocity {}",
                    root, outcome.entry, outcome.exit, outcome.velocity
                );
                if outcome.missing_collaborator {
                    if matches!(outcome.momentum, MomentumDelivery::Skipped) {
                        warn!(
                            "{:?} has no movement collaborator, teleported without momentum or alignment",
                            root
                        );
                    } else {
                        debug!("{:?} has no movement collaborator, alignment skipped", root);
                    }
                }
            }
            Err(rejection) => report(&rejection),
        }
    }
}

#[cfg(test)]
mod tests {
    use bevy::utils::HashMap;

    use super::*;
    use crate::plugins::portal::geometry::orientation_from_surface;

    const ENTRY: Entity = Entity::from_raw(1);
    const EXIT: Entity = Entity::from_raw(2);
    const TRIGGER: Entity = Entity::from_raw(3);
    const PLAYER: Entity = Entity::from_raw(10);
    const HAND: Entity = Entity::from_raw(11);
    const PROP: Entity = Entity::from_raw(12);

    fn network(linked: bool, settings: PortalSettings) -> PortalNetwork {
        let mut network = PortalNetwork::default();
        network.register(PortalEnd::new(
            ENTRY,
            Transform::from_rotation(orientation_from_surface(Vec3::Z, None)),
            settings,
        ));
        network.register(PortalEnd::new(
            EXIT,
            Transform::from_xyz(5., 0., 0.)
                .with_rotation(orientation_from_surface(Vec3::X, None)),
            PortalSettings::default(),
        ));
        if linked {
            assert!(network.link(ENTRY, EXIT));
        }
        network
    }

    /// Player with a hand collider, a loose prop and a trigger volume under the entry portal.
    struct Scene {
        parents: HashMap<Entity, Entity>,
        movers: HashMap<Entity, Locomotion>,
        tags: HashMap<Entity, String>,
    }

    impl Scene {
        fn new() -> Scene {
            Scene {
                parents: [(TRIGGER, ENTRY), (HAND, PLAYER)].into_iter().collect(),
                movers: [(PLAYER, Locomotion::KinematicController)].into_iter().collect(),
                tags: [(PLAYER, "Player".to_owned())].into_iter().collect(),
            }
        }

        fn admit(&self, network: &PortalNetwork, collider: Entity) -> Result<Entity, GateRejection> {
            admit_overlap(
                network,
                ENTRY,
                collider,
                0.,
                |e| self.parents.get(&e).copied(),
                |e| self.movers.get(&e).copied(),
                |_| false,
                |e| self.tags.get(&e).cloned(),
            )
        }
    }

    fn linked() -> PortalNetwork {
        network(true, PortalSettings::default())
    }

    fn filtered() -> PortalSettings {
        PortalSettings {
            require_tag_match: true,
            filter_tag: "Player".to_owned(),
            ..default()
        }
    }

    #[test]
    fn trigger_volumes_belong_to_their_portal() {
        let scene = Scene::new();
        let network = linked();
        let parent_of = |e: Entity| scene.parents.get(&e).copied();
        assert_eq!(portal_of(&network, parent_of, ENTRY), Some(ENTRY));
        assert_eq!(portal_of(&network, parent_of, TRIGGER), Some(ENTRY));
        assert_eq!(portal_of(&network, parent_of, HAND), None);
    }

    #[test]
    fn unlinked_portal_is_reported_before_the_mover() {
        let scene = Scene::new();
        let unlinked = network(false, PortalSettings::default());
        assert_eq!(
            scene.admit(&unlinked, PROP),
            Err(GateRejection::Unlinked(ENTRY))
        );
        assert_eq!(
            scene.admit(&linked(), PROP),
            Err(GateRejection::NoMoverRoot(PROP))
        );
    }

    #[test]
    fn overlapping_collider_resolves_to_its_mover() {
        let scene = Scene::new();
        assert_eq!(scene.admit(&linked(), HAND), Ok(PLAYER));
    }

    #[test]
    fn tag_filter_looks_at_the_overlapping_body_first() {
        let mut scene = Scene::new();
        let filtering = network(true, filtered());
        // Untagged hand, the player above it carries the tag.
        assert_eq!(scene.admit(&filtering, HAND), Ok(PLAYER));

        scene.tags.insert(HAND, "Crate".to_owned());
        assert!(matches!(
            scene.admit(&filtering, HAND),
            Err(GateRejection::TagMismatch { .. })
        ));

        scene.tags.insert(HAND, "Player".to_owned());
        scene.tags.insert(PLAYER, "Crate".to_owned());
        assert_eq!(scene.admit(&filtering, HAND), Ok(PLAYER));
    }

    #[derive(Component)]
    struct Doomed;

    fn despawn_doomed(mut commands: Commands, doomed: Query<Entity, With<Doomed>>) {
        for entity in &doomed {
            commands.entity(entity).despawn_recursive();
        }
    }

    #[test]
    fn despawned_portals_leave_the_network() {
        let mut app = App::new();
        app.init_resource::<PortalNetwork>()
            .init_resource::<PortalSettings>()
            .add_system(despawn_doomed);
        add_network_systems(&mut app);

        let a = app.world.spawn((Portal, Transform::IDENTITY)).id();
        let b = app
            .world
            .spawn((Portal, Transform::from_xyz(3., 0., 0.), PortalLink(a)))
            .id();
        app.update();
        assert_eq!(app.world.resource::<PortalNetwork>().linked(a), Some(b));

        app.world.entity_mut(b).insert(Doomed);
        app.update();
        let network = app.world.resource::<PortalNetwork>();
        assert!(!network.contains(b));
        assert!(network.contains(a));
        assert_eq!(network.linked(a), None);
    }
}
