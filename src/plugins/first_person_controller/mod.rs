//! This module contains the first person controller plugin.
//!
//! The player is a kinematic capsule moved through rapier's character controller. Yaw is applied
//! to the root node and pitch to the camera anchor, so the root always stays upright.

use bevy::{prelude::*, reflect::FromReflect, render::camera::Projection};
use bevy_rapier3d::prelude::*;
use euclid::Angle;
use iyes_loopless::prelude::*;
use leafwing_input_manager::prelude::*;

mod momentum;

pub use momentum::{Motion, MotionInput, MovementSettings};

use crate::plugins::{
    beam::{BeamSettings, LaserEmitter},
    game::GameState,
    input::{default_input_map, Actions},
    physics::*,
    portal::{
        gate::{Locomotion, MovementCollaborator, Mover},
        geometry::{upright_rotation, yaw_of},
        PortalTeleport,
    },
};

#[derive(Debug)]
/// First person controller plugin, which registers the required systems to use the first person
/// controller also provided by this module.
pub struct FirstPersonControllerPlugin;

impl Plugin for FirstPersonControllerPlugin {
    fn build(&self, app: &mut App) {
        app.register_type::<FirstPersonCamera>()
            .register_type::<FirstPersonControllerSpawner>()
            .register_type::<MovementSettings>()
            .add_system(spawn_controller.label(FirstPersonLabels::SpawnControllers))
            .add_system(
                process_controller_inputs
                    .run_in_state(GameState::Playing)
                    .label(FirstPersonLabels::ProcessInputs)
                    .after(FirstPersonLabels::SpawnControllers),
            );
    }
}

#[derive(Debug, SystemLabel)]
/// Labels for the first person controller systems.
pub enum FirstPersonLabels {
    SpawnControllers,
    ProcessInputs,
}

pub const PLAYER_HEIGHT: f32 = 1.8;
pub const PLAYER_RADIUS: f32 = 0.4;
const EYE_HEIGHT: f32 = 1.55;
const SPRINT_MULTIPLIER: f32 = 2.;
const PITCH_LIMIT: f32 = 80. * std::f32::consts::PI / 180.;

#[derive(Debug, Component)]
/// First person controller component.
pub struct FirstPersonController {
    pub yaw: Angle<f32>,
    pub pitch: Angle<f32>,
    pub camera_anchor: Entity,
    pub motion: Motion,
    /// World velocity requested at the last step.
    pub intended_velocity: Vec3,
    pub settings: MovementSettings,
}

impl MovementCollaborator for FirstPersonController {
    fn receive_momentum(&mut self, world_velocity: Vec3) {
        self.motion
            .inject(world_velocity, self.settings.momentum_grace_time);
        self.intended_velocity = world_velocity;
    }

    fn align_upright(&mut self, exit_rotation: Quat, current_forward: Vec3) -> Option<Quat> {
        // The root rotation is rebuilt from yaw every step, so yaw follows the exit heading even
        // when the transform itself is left alone.
        let upright = upright_rotation(exit_rotation, current_forward);
        self.yaw = Angle::radians(yaw_of(upright.mul_vec3(Vec3::NEG_Z)));
        if !self.settings.align_upright_on_exit {
            return None;
        }
        if self.settings.reset_view_on_exit {
            self.pitch = Angle::zero();
        }
        Some(upright)
    }

    fn intended_velocity(&self) -> Option<Vec3> {
        Some(self.intended_velocity)
    }
}

#[derive(Debug, Default, Component, Reflect)]
#[reflect(Component)]
/// Marker trait for first person cameras
pub struct FirstPersonCamera;

#[derive(Debug, Component, Default, Reflect, FromReflect)]
#[reflect(Component)]
pub struct FirstPersonControllerSpawner {}

#[derive(Debug, Bundle, Default)]
pub struct FirstPersonControllerBundle {
    #[bundle]
    pub spatial: SpatialBundle,
    pub spawner: FirstPersonControllerSpawner,
}

fn spawn_controller(
    mut commands: Commands,
    spawners_query: Query<(&Transform, Entity), With<FirstPersonControllerSpawner>>,
    settings: Res<MovementSettings>,
    beam_settings: Res<BeamSettings>,
) {
    for (transform, id) in &spawners_query {
        // The capsule is centered on the root node.
        const CAMERA_OFFSET: Vec3 = Vec3::new(0., EYE_HEIGHT - PLAYER_HEIGHT / 2., 0.);

        let camera_anchor = commands
            .spawn((
                SpatialBundle::from(Transform::from_translation(CAMERA_OFFSET)),
                Name::from("Camera anchor"),
            ))
            .id();

        let camera = commands
            .spawn((
                Camera3dBundle {
                    projection: Projection::Perspective(PerspectiveProjection {
                        fov: std::f32::consts::FRAC_PI_4,
                        aspect_ratio: 16. / 9.,
                        near: 0.1,
                        far: 1000.,
                    }),
                    ..default()
                },
                Name::from("Player camera"),
                FirstPersonCamera,
            ))
            .id();

        let laser = commands
            .spawn((
                TransformBundle::from(Transform::from_xyz(0.2, -0.15, -0.3)),
                LaserEmitter {
                    settings: beam_settings.clone(),
                    continuous: false,
                    ignore: Some(id),
                },
                Name::from("Hand laser"),
            ))
            .id();

        commands
            .entity(camera_anchor)
            .push_children(&[camera, laser]);

        let yaw = Angle::radians(yaw_of(transform.forward()));
        commands
            .entity(id)
            .insert(InputManagerBundle {
                action_state: ActionState::default(),
                input_map: default_input_map(),
            })
            .insert((
                RigidBody::KinematicPositionBased,
                Collider::capsule_y(PLAYER_HEIGHT / 2. - PLAYER_RADIUS, PLAYER_RADIUS),
                KinematicCharacterController {
                    offset: CharacterLength::Absolute(0.01),
                    ..default()
                },
                CollisionGroups::new(PLAYER_GROUP, ALL_GROUPS),
                ActiveEvents::COLLISION_EVENTS,
                ActiveCollisionTypes::default() | ActiveCollisionTypes::KINEMATIC_STATIC,
                Mover::new(Locomotion::KinematicController, Some(PLAYER_RADIUS)),
                PortalTeleport,
                Name::from("Player"),
            ))
            .insert(FirstPersonController {
                yaw,
                pitch: Angle::zero(),
                camera_anchor,
                motion: Motion::default(),
                intended_velocity: Vec3::ZERO,
                settings: settings.clone(),
            })
            .add_child(camera_anchor)
            .remove::<FirstPersonControllerSpawner>();
    }
}

fn process_controller_inputs(
    time: Res<Time>,
    mut player_query: Query<(
        &ActionState<Actions>,
        &mut FirstPersonController,
        &mut KinematicCharacterController,
        &mut Transform,
        Option<&KinematicCharacterControllerOutput>,
    )>,
    mut camera_query: Query<&mut Transform, Without<FirstPersonController>>,
) {
    let dt = time.delta_seconds();
    for (input_state, mut controller, mut character, mut transform, output) in &mut player_query {
        let settings = controller.settings.clone();

        // Process mouse movement. We handle the rotation components separately:
        // * Rotation around the vertical axis (e.g. aiming left or right) is applied to the
        //   player root node.
        // * Rotation around the horizontal axis (e.g. aiming up or down) is applied directly to
        //   the camera anchor in order to keep the vertical orientation neutral on the root
        //   node.
        if let Some(mouse_movement) = input_state.axis_pair(Actions::Aim) {
            controller.yaw =
                controller.yaw - Angle::radians(mouse_movement.x() * settings.mouse_sensitivity);
            controller.pitch =
                controller.pitch - Angle::radians(mouse_movement.y() * settings.mouse_sensitivity);
            controller.pitch.radians = controller.pitch.radians.clamp(-PITCH_LIMIT, PITCH_LIMIT);
        }
        transform.rotation = Quat::from_rotation_y(controller.yaw.radians);
        if let Ok(mut camera_transform) = camera_query.get_mut(controller.camera_anchor) {
            camera_transform.rotation = Quat::from_axis_angle(Vec3::X, controller.pitch.radians);
        }

        let forward = transform.forward();
        let left = transform.left();
        let mut wish = Vec3::ZERO;
        if input_state.pressed(Actions::Forward) {
            wish += forward;
        }
        if input_state.pressed(Actions::Backwards) {
            wish -= forward;
        }
        if input_state.pressed(Actions::StrafeLeft) {
            wish += left;
        }
        if input_state.pressed(Actions::StrafeRight) {
            wish -= left;
        }
        let k = if input_state.pressed(Actions::Sprint) {
            SPRINT_MULTIPLIER
        } else {
            1.
        };
        let ground_velocity =
            Vec3::new(wish.x, 0., wish.z).normalize_or_zero() * settings.move_speed * k;

        let extra = controller.motion.step(
            &settings,
            MotionInput {
                dt,
                grounded: output.map(|o| o.grounded).unwrap_or(false),
                jump_pressed: input_state.just_pressed(Actions::Jump),
                jump_held: input_state.pressed(Actions::Jump),
            },
        );

        let velocity = ground_velocity + extra;
        controller.intended_velocity = velocity;
        character.translation = Some(velocity * dt);
    }
}
