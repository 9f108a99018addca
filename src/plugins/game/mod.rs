use std::f32::consts::*;

use crate::{
    plugins::*,
    util::scenes::{make_test_arena, ArenaSettings, LevelEntity},
};

use bevy::prelude::*;
use bevy_rapier3d::prelude::*;
use iyes_loopless::prelude::*;
use leafwing_input_manager::prelude::*;

use beam::{BeamSettings, LaserEmitter};
use fader::{ReloadRequested, WorldReload, WorldReloaded};
use first_person_controller::{FirstPersonController, FirstPersonControllerBundle};
use input::Actions;
use physics::*;
use portal::{
    geometry::orientation_from_surface, spawn_portal, Locomotion, Mover, PortalAssets,
    PortalBundle, PortalLink, PortalNetwork, PortalSlot, PortalTeleport, Tag,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GameState {
    Playing,
    /// A fade and level reload is in progress.
    Transition,
}

#[derive(Debug)]
/// Main game plugin, responsible for loading the other game plugins and bootstrapping the game.
pub struct GamePlugin {
    pub window: WindowDescriptor,
}

impl Plugin for GamePlugin {
    fn build(&self, app: &mut App) {
        app.add_plugins(DefaultPlugins.set(WindowPlugin {
            window: self.window.clone(),
            ..default()
        }));
        app.add_loopless_state(GameState::Playing);

        app.add_plugin(config::ConfigPlugin::default());
        app.add_plugin(RapierPhysicsPlugin::<NoUserData>::default());
        app.add_plugin(physics::PhysicsPlugin);
        app.add_plugin(input::InputPlugin);
        app.add_plugin(first_person_controller::FirstPersonControllerPlugin);
        app.add_plugin(portal::PortalPlugin);
        app.add_plugin(beam::BeamPlugin);
        app.add_plugin(fader::FaderPlugin);

        #[cfg(feature = "devel")]
        {
            app.add_plugins(debug::DeveloperPlugins);
        }

        app.register_type::<LevelEntity>()
            .register_type::<ArenaSettings>()
            .add_startup_system(setup)
            .add_system(request_reload.run_in_state(GameState::Playing))
            .add_system(reload_world.before(fader::FaderLabels::AdvanceFades));
    }
}

/// Perform game initialization
fn setup(
    mut commands: Commands,
    mut meshes: ResMut<Assets<Mesh>>,
    mut materials: ResMut<Assets<StandardMaterial>>,
    portal_assets: Res<PortalAssets>,
    arena: Res<ArenaSettings>,
    beam: Res<BeamSettings>,
) {
    // Light
    commands.spawn(DirectionalLightBundle {
        directional_light: DirectionalLight {
            color: Color::ANTIQUE_WHITE,
            illuminance: 20_000.,
            shadows_enabled: true,
            ..default()
        },
        transform: Transform {
            translation: Vec3::Y * 5.,
            rotation: Quat::from_euler(EulerRot::YXZ, FRAC_PI_4, FRAC_PI_4, 0.),
            scale: Vec3::ONE,
        },
        ..default()
    });

    spawn_level(
        &mut commands,
        &mut meshes,
        &mut materials,
        &portal_assets,
        &arena,
        &beam,
    );
}

/// Spawn everything that goes away when the level is reloaded.
fn spawn_level(
    commands: &mut Commands,
    meshes: &mut ResMut<Assets<Mesh>>,
    materials: &mut ResMut<Assets<StandardMaterial>>,
    portal_assets: &PortalAssets,
    arena: &ArenaSettings,
    beam: &BeamSettings,
) {
    make_test_arena(commands, meshes, materials, arena);
    let half_len = arena.size / 2.;
    const PORTAL_HEIGHT: f32 = 1.1;
    const WALL_OFFSET: f32 = 0.02;

    // Spawn player
    commands.spawn((
        FirstPersonControllerBundle {
            spatial: SpatialBundle::from(Transform::from_xyz(0., 1., half_len / 2.)),
            ..default()
        },
        Tag("Player".to_owned()),
        LevelEntity,
    ));

    // Player portals, hidden until shot
    for slot in [PortalSlot::A, PortalSlot::B] {
        commands.spawn((
            PortalBundle {
                pbr: PbrBundle {
                    mesh: portal_assets.mesh.clone(),
                    material: portal_assets.slot_material(slot),
                    visibility: Visibility { is_visible: false },
                    ..default()
                },
                name: Name::from(format!("Portal {:?}", slot)),
                ..default()
            },
            slot,
            LevelEntity,
        ));
    }

    // A fixed pair on two neighbouring walls
    let fixed_portal = |position: Vec3, normal: Vec3, name: &str| PortalBundle {
        pbr: PbrBundle {
            mesh: portal_assets.mesh.clone(),
            material: portal_assets.fixed_material.clone(),
            transform: Transform {
                translation: position,
                rotation: orientation_from_surface(normal, None),
                ..default()
            },
            ..default()
        },
        name: Name::from(name),
        ..default()
    };
    let north = spawn_portal(
        commands,
        fixed_portal(
            Vec3::new(-4., PORTAL_HEIGHT, -half_len + WALL_OFFSET),
            Vec3::Z,
            "North portal",
        ),
    );
    let west = spawn_portal(
        commands,
        fixed_portal(
            Vec3::new(-half_len + WALL_OFFSET, PORTAL_HEIGHT, 4.),
            Vec3::X,
            "West portal",
        ),
    );
    commands.entity(north).insert((PortalLink(west), LevelEntity));
    commands.entity(west).insert(LevelEntity);

    // Props
    let crate_mesh = meshes.add(shape::Cube { size: 0.5 }.into());
    let crate_material = materials.add(StandardMaterial::from(Color::BEIGE));
    for i in 0..3 {
        commands.spawn((
            PbrBundle {
                mesh: crate_mesh.clone(),
                material: crate_material.clone(),
                transform: Transform::from_xyz(2. + i as f32, 0.5, -2.),
                ..default()
            },
            RigidBody::Dynamic,
            Collider::cuboid(0.25, 0.25, 0.25),
            Velocity::default(),
            Ccd::enabled(),
            CollisionGroups::new(PROPS_GROUP, ALL_GROUPS),
            Mover::new(Locomotion::FreeBody, Some(0.45)),
            PortalTeleport,
            Name::from(format!("Crate_{}", i)),
            LevelEntity,
        ));
    }

    // Laser turret aimed at the north portal
    let turret_position = Vec3::new(-4., PORTAL_HEIGHT, 2.);
    let turret = commands
        .spawn((
            PbrBundle {
                mesh: meshes.add(shape::Cube { size: 0.4 }.into()),
                material: materials.add(StandardMaterial::from(Color::CRIMSON)),
                transform: Transform::from_translation(turret_position)
                    .looking_at(Vec3::new(-4., PORTAL_HEIGHT, -half_len), Vec3::Y),
                ..default()
            },
            RigidBody::Fixed,
            Collider::cuboid(0.2, 0.2, 0.2),
            CollisionGroups::new(PROPS_GROUP, ALL_GROUPS),
            Name::from("Laser turret"),
            LevelEntity,
        ))
        .id();
    commands.entity(turret).insert(LaserEmitter {
        settings: beam.clone(),
        continuous: true,
        ignore: Some(turret),
    });
}

fn request_reload(
    player_query: Query<(&Transform, &ActionState<Actions>), With<FirstPersonController>>,
    arena: Res<ArenaSettings>,
    mut requests: EventWriter<ReloadRequested>,
) {
    for (transform, input_state) in &player_query {
        if input_state.just_pressed(Actions::Restart) {
            info!("Restart requested");
            requests.send(ReloadRequested);
        } else if transform.translation.y < arena.kill_height {
            info!("Player fell out of the level");
            requests.send(ReloadRequested);
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn reload_world(
    mut commands: Commands,
    mut reloads: EventReader<WorldReload>,
    mut reloaded: EventWriter<WorldReloaded>,
    level_query: Query<Entity, With<LevelEntity>>,
    mut network: ResMut<PortalNetwork>,
    mut meshes: ResMut<Assets<Mesh>>,
    mut materials: ResMut<Assets<StandardMaterial>>,
    portal_assets: Res<PortalAssets>,
    arena: Res<ArenaSettings>,
    beam: Res<BeamSettings>,
) {
    if reloads.iter().count() == 0 {
        return;
    }

    for entity in &level_query {
        commands.entity(entity).despawn_recursive();
    }
    network.clear();
    spawn_level(
        &mut commands,
        &mut meshes,
        &mut materials,
        &portal_assets,
        &arena,
        &beam,
    );
    info!("Level rebuilt");
    reloaded.send(WorldReloaded);
}
