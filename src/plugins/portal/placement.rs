//! Portal shooter: places the two player portals on level geometry.

use bevy::{prelude::*, reflect::FromReflect};
use bevy_rapier3d::prelude::*;
use leafwing_input_manager::prelude::*;
use serde::Deserialize;

use super::{geometry::orientation_from_surface, PortalNetwork, PortalSurface, PortalTrigger};
use crate::plugins::{
    first_person_controller::{FirstPersonCamera, FirstPersonController},
    input::Actions,
    physics::*,
};

#[derive(Debug, Clone, PartialEq, Deserialize, Resource, Reflect)]
#[serde(default)]
pub struct PlacementSettings {
    pub max_shoot_distance: f32,
    /// Offset along the surface normal, against Z fighting.
    pub surface_offset: f32,
}

impl Default for PlacementSettings {
    fn default() -> Self {
        PlacementSettings {
            max_shoot_distance: 200.,
            surface_offset: 0.02,
        }
    }
}

/// Which of the two player portals an entity is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Component, Reflect, FromReflect)]
#[reflect(Component)]
pub enum PortalSlot {
    #[default]
    A,
    B,
}

impl PortalSlot {
    pub const fn action(self) -> Actions {
        match self {
            PortalSlot::A => Actions::FirePortalA,
            PortalSlot::B => Actions::FirePortalB,
        }
    }

    pub const fn other(self) -> PortalSlot {
        match self {
            PortalSlot::A => PortalSlot::B,
            PortalSlot::B => PortalSlot::A,
        }
    }

    pub const fn color(self) -> Color {
        match self {
            PortalSlot::A => Color::rgb(0.1, 0.45, 1.),
            PortalSlot::B => Color::rgb(1., 0.5, 0.05),
        }
    }
}

/// Pose of a portal stuck on a surface hit at `point`, facing out along `normal`.
pub fn placement_pose(
    point: Vec3,
    normal: Vec3,
    camera_right: Vec3,
    settings: &PlacementSettings,
) -> Transform {
    let rotation = orientation_from_surface(normal, Some(camera_right));
    Transform {
        translation: point + rotation.mul_vec3(Vec3::NEG_Z) * settings.surface_offset,
        rotation,
        ..default()
    }
}

pub(super) fn fire_portals(
    mut commands: Commands,
    player_query: Query<(&ActionState<Actions>, Entity), With<FirstPersonController>>,
    camera_query: Query<&GlobalTransform, With<FirstPersonCamera>>,
    mut portal_query: Query<(
        Entity,
        &PortalSlot,
        &mut Transform,
        &mut Visibility,
        Option<&Collider>,
    )>,
    rapier: Res<RapierContext>,
    settings: Res<PlacementSettings>,
    mut network: ResMut<PortalNetwork>,
) {
    let (Ok((input_state, player)), Ok(camera)) =
        (player_query.get_single(), camera_query.get_single())
    else {
        return;
    };

    for slot in [PortalSlot::A, PortalSlot::B] {
        if !input_state.just_pressed(slot.action()) {
            continue;
        }

        let camera = camera.compute_transform();
        let Some((_surface, impact)) = rapier.cast_ray_and_get_normal(
            camera.translation,
            camera.forward(),
            settings.max_shoot_distance,
            true,
            QueryFilter::only_fixed()
                .exclude_sensors()
                .exclude_collider(player)
                .groups(CollisionGroups::new(RAYCAST_GROUP, PORTAL_SURFACES).into()),
        ) else {
            info!("No valid surface to place portal {:?}", slot);
            continue;
        };

        let pose = placement_pose(impact.point, impact.normal, camera.right(), &settings);
        let mut placed = None;
        let mut partner = None;
        for (entity, portal_slot, mut transform, mut visibility, collider) in &mut portal_query {
            if *portal_slot == slot {
                *transform = pose;
                visibility.is_visible = true;
                if collider.is_none() {
                    commands.entity(entity).insert(PortalSurface::default());
                    commands.entity(entity).with_children(|parent| {
                        parent.spawn(PortalTrigger::default());
                    });
                }
                placed = Some(entity);
            } else if *portal_slot == slot.other() && visibility.is_visible {
                partner = Some(entity);
            }
        }

        let Some(portal) = placed else {
            warn!("No portal entity for slot {:?}", slot);
            continue;
        };
        info!("Placed portal {:?} at {}", slot, pose.translation);
        network.update_pose(portal, pose);
        if let Some(partner) = partner {
            if network.linked(portal) != Some(partner) && network.link(portal, partner) {
                info!("Linked portals {:?} and {:?}", portal, partner);
            }
        }
    }
}
