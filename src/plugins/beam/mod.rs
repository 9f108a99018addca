//! Laser beams bouncing through portals.

use bevy::prelude::*;
use bevy_rapier3d::prelude::*;
use iyes_loopless::prelude::*;
use leafwing_input_manager::prelude::*;

pub mod tracer;

pub use tracer::{BeamPath, BeamSegment, BeamSettings, BeamTermination};

use tracer::{trace_beam, RayHit, RaycastProvider};

use super::{
    first_person_controller::FirstPersonController,
    game::GameState,
    input::Actions,
    physics::*,
    portal::{PortalLabels, PortalNetwork, Tag},
};

#[derive(Debug)]
pub struct BeamPlugin;

#[derive(Debug, SystemLabel)]
pub enum BeamLabels {
    TriggerEmitters,
    TraceBeams,
}

/// Casts a beam along its forward axis.
#[derive(Debug, Clone, Component)]
pub struct LaserEmitter {
    pub settings: BeamSettings,
    /// Fires every frame. Hand held emitters only fire while `FireLaser` is held.
    pub continuous: bool,
    /// Collider the beam goes through, usually whoever holds the emitter.
    pub ignore: Option<Entity>,
}

/// Marks an emitter as firing this frame.
#[derive(Debug, Clone, Copy, Default, Component)]
pub struct Firing;

impl Plugin for BeamPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<BeamSettings>()
            .register_type::<BeamSettings>()
            .add_system(
                trigger_emitters
                    .run_in_state(GameState::Playing)
                    .label(BeamLabels::TriggerEmitters),
            )
            .add_system(
                trace_beams
                    .run_in_state(GameState::Playing)
                    .label(BeamLabels::TraceBeams)
                    .after(BeamLabels::TriggerEmitters)
                    .after(PortalLabels::TeleportEntities),
            );
    }
}

/// Ray queries against the rapier world.
struct RapierRaycaster<'a> {
    context: &'a RapierContext,
    network: &'a PortalNetwork,
    parent_of: &'a dyn Fn(Entity) -> Option<Entity>,
    has_tag: &'a dyn Fn(Entity, &str) -> bool,
    ignore: Option<Entity>,
}

impl RapierRaycaster<'_> {
    /// The collider itself and its ancestors.
    fn lineage(&self, collider: Entity) -> impl Iterator<Item = Entity> + '_ {
        std::iter::successors(Some(collider), |entity| (self.parent_of)(*entity)).take(16)
    }
}

impl RaycastProvider for RapierRaycaster<'_> {
    fn cast(
        &self,
        origin: Vec3,
        direction: Vec3,
        max_distance: f32,
        settings: &BeamSettings,
    ) -> Option<RayHit> {
        let mut filter = QueryFilter::new().groups(CollisionGroups::new(
            RAYCAST_GROUP,
            Group::from_bits_truncate(settings.hit_mask),
        ).into());
        if !settings.include_trigger_surfaces {
            filter = filter.exclude_sensors();
        }
        if let Some(ignore) = self.ignore {
            filter = filter.exclude_collider(ignore);
        }

        let (surface, intersection) =
            self.context
                .cast_ray_and_get_normal(origin, direction, max_distance, true, filter)?;
        let portal = self
            .lineage(surface)
            .find(|entity| self.network.contains(*entity));
        let tagged_portal = self
            .lineage(surface)
            .any(|entity| (self.has_tag)(entity, &settings.portal_tag));
        Some(RayHit {
            point: intersection.point,
            normal: intersection.normal,
            distance: intersection.toi,
            surface,
            portal,
            tagged_portal,
        })
    }
}

fn trigger_emitters(
    mut commands: Commands,
    player_query: Query<(&ActionState<Actions>, Entity), With<FirstPersonController>>,
    emitter_query: Query<(Entity, &LaserEmitter, Option<&Firing>)>,
) {
    let held: Vec<Entity> = player_query
        .iter()
        .filter(|(input_state, _)| input_state.pressed(Actions::FireLaser))
        .map(|(_, player)| player)
        .collect();

    for (entity, emitter, firing) in &emitter_query {
        let fire = emitter.continuous
            || emitter
                .ignore
                .map_or(false, |holder| held.contains(&holder));
        match (fire, firing.is_some()) {
            (true, false) => {
                commands.entity(entity).insert(Firing);
            }
            (false, true) => {
                commands.entity(entity).remove::<Firing>().remove::<BeamPath>();
            }
            _ => {}
        }
    }
}

fn trace_beams(
    mut commands: Commands,
    rapier: Res<RapierContext>,
    network: Res<PortalNetwork>,
    hierarchy: Query<&Parent>,
    tags: Query<&Tag>,
    mut emitter_query: Query<
        (Entity, &GlobalTransform, &LaserEmitter, Option<&mut BeamPath>),
        With<Firing>,
    >,
) {
    let parent_of = |entity: Entity| hierarchy.get(entity).ok().map(|parent| parent.get());
    let has_tag = |entity: Entity, wanted: &str| {
        tags.get(entity)
            .map_or(false, |tag| tag.0 == wanted)
    };

    for (entity, transform, emitter, path) in &mut emitter_query {
        let raycaster = RapierRaycaster {
            context: &rapier,
            network: &network,
            parent_of: &parent_of,
            has_tag: &has_tag,
            ignore: emitter.ignore,
        };
        let transform = transform.compute_transform();
        let traced = trace_beam(
            &raycaster,
            &network,
            transform.translation,
            transform.forward(),
            &emitter.settings,
        );
        match path {
            Some(mut path) => *path = traced,
            None => {
                commands.entity(entity).insert(traced);
            }
        }
    }
}
