//! Trigger driven teleportation through a linked portal.

use std::fmt;

use bevy::{prelude::*, reflect::FromReflect};
use bevy_rapier3d::prelude::*;

use super::{
    geometry::{effective_clearance, exit_pose, portal_rotation},
    network::{GateState, PortalNetwork},
    velocity::VelocityObservations,
};

/// How a mover moves, fixed when it is spawned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Reflect, FromReflect)]
pub enum Locomotion {
    /// Kinematic capsule driven by a character controller.
    KinematicController,
    /// Dynamic rigid body.
    FreeBody,
    /// Nothing but a transform.
    #[default]
    PlainTransform,
}

/// Something portals can carry.
#[derive(Debug, Clone, Copy, Default, Component, Reflect, FromReflect)]
#[reflect(Component)]
pub struct Mover {
    pub locomotion: Locomotion,
    /// Physical radius, used to push the exit point clear of the exit trigger.
    pub radius: Option<f32>,
}

impl Mover {
    pub const fn new(locomotion: Locomotion, radius: Option<f32>) -> Mover {
        Mover { locomotion, radius }
    }
}

/// The movement logic driving a mover, which owns how injected velocity blends with its own.
pub trait MovementCollaborator {
    /// Take over a world space velocity after a teleport.
    fn receive_momentum(&mut self, world_velocity: Vec3);
    /// Rotation to give the mover after exiting through a portal oriented as `exit_rotation`,
    /// or `None` when it shouldn't be re-aligned.
    fn align_upright(&mut self, exit_rotation: Quat, current_forward: Vec3) -> Option<Quat>;
    /// Last world velocity the movement logic asked for.
    fn intended_velocity(&self) -> Option<Vec3>;
}

/// Mutable view over the parts of a mover a teleport writes to.
pub struct MoverRefs<'a> {
    pub transform: &'a mut Transform,
    pub mover: Mover,
    pub body_velocity: Option<&'a mut Velocity>,
    pub controller: Option<&'a mut KinematicCharacterController>,
    /// Velocity the character controller effectively moved at last step.
    pub controller_velocity: Option<Vec3>,
    pub movement: Option<&'a mut dyn MovementCollaborator>,
}

impl MoverRefs<'_> {
    fn observations(&self) -> VelocityObservations {
        VelocityObservations {
            rigid_body: self.body_velocity.as_ref().map(|v| v.linvel),
            movement: self
                .movement
                .as_ref()
                .and_then(|movement| movement.intended_velocity()),
            controller: self.controller_velocity,
        }
    }

    fn write_pose(&mut self, position: Vec3, rotation: Quat) {
        match self.mover.locomotion {
            Locomotion::KinematicController => {
                // Drop the move queued from the old position, then nudge the controller once so
                // it resyncs from the new pose.
                if let Some(controller) = self.controller.as_deref_mut() {
                    controller.translation = None;
                }
                self.transform.translation = position;
                self.transform.rotation = rotation;
                if let Some(controller) = self.controller.as_deref_mut() {
                    controller.translation = Some(Vec3::ZERO);
                }
            }
            Locomotion::FreeBody | Locomotion::PlainTransform => {
                self.transform.translation = position;
                self.transform.rotation = rotation;
            }
        }
    }

    fn deliver_momentum(&mut self, velocity: Vec3, rotation: Quat) -> MomentumDelivery {
        match self.mover.locomotion {
            Locomotion::FreeBody => match self.body_velocity.as_deref_mut() {
                Some(body) => {
                    body.linvel = velocity;
                    body.angvel = rotation.mul_vec3(body.angvel);
                    MomentumDelivery::Assigned(velocity)
                }
                None => MomentumDelivery::Skipped,
            },
            Locomotion::KinematicController | Locomotion::PlainTransform => {
                match self.movement.as_deref_mut() {
                    Some(movement) => {
                        movement.receive_momentum(velocity);
                        MomentumDelivery::Injected(velocity)
                    }
                    None => MomentumDelivery::Skipped,
                }
            }
        }
    }
}

/// Why an overlap did not turn into a teleport.
#[derive(Debug, Clone, PartialEq)]
pub enum GateRejection {
    UnknownPortal(Entity),
    Unlinked(Entity),
    CoolingDown { portal: Entity, remaining: f32 },
    ExitCoolingDown { portal: Entity, remaining: f32 },
    TagMismatch { expected: String },
    NoMoverRoot(Entity),
}

impl fmt::Display for GateRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateRejection::UnknownPortal(e) => write!(f, "{e:?} is not a registered portal"),
            GateRejection::Unlinked(e) => write!(f, "portal {e:?} has no linked portal"),
            GateRejection::CoolingDown { portal, remaining } => {
                write!(f, "portal {portal:?} re-entry blocked for {remaining:.2}s")
            }
            GateRejection::ExitCoolingDown { portal, remaining } => {
                write!(f, "exit portal {portal:?} re-entry blocked for {remaining:.2}s")
            }
            GateRejection::TagMismatch { expected } => {
                write!(f, "overlapping body is not tagged '{expected}'")
            }
            GateRejection::NoMoverRoot(e) => write!(f, "no mover root found above {e:?}"),
        }
    }
}

impl std::error::Error for GateRejection {}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MomentumDelivery {
    /// Written straight to the rigid body.
    Assigned(Vec3),
    /// Handed over to the movement collaborator.
    Injected(Vec3),
    /// Nothing could take it.
    Skipped,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TeleportOutcome {
    pub entry: Entity,
    pub exit: Entity,
    pub position: Vec3,
    pub rotation: Quat,
    /// Incoming velocity remapped to the exit frame.
    pub velocity: Vec3,
    pub momentum: MomentumDelivery,
    pub aligned: bool,
    /// The mover has no movement collaborator, so alignment (and possibly momentum) was skipped.
    pub missing_collaborator: bool,
}

/// Find the entity a teleport should move, starting from the collider that overlapped.
///
/// The nearest ancestor (self included) with a kinematic controller wins, then the nearest with a
/// free rigid body, then the top of the hierarchy if it is allowed to teleport.
pub fn resolve_mover_root(
    collider: Entity,
    parent_of: impl Fn(Entity) -> Option<Entity>,
    locomotion_of: impl Fn(Entity) -> Option<Locomotion>,
    teleportable: impl Fn(Entity) -> bool,
) -> Option<Entity> {
    const MAX_DEPTH: usize = 64;

    let mut chain = vec![collider];
    let mut current = collider;
    while let Some(parent) = parent_of(current) {
        if chain.len() >= MAX_DEPTH || chain.contains(&parent) {
            break;
        }
        chain.push(parent);
        current = parent;
    }

    let find = |wanted: Locomotion| {
        chain
            .iter()
            .copied()
            .find(|entity| locomotion_of(*entity) == Some(wanted))
    };
    find(Locomotion::KinematicController)
        .or_else(|| find(Locomotion::FreeBody))
        .or_else(|| chain.last().copied().filter(|root| teleportable(*root)))
}

/// Cooldown part of the eligibility check, evaluated on both ends of the link.
fn ready(network: &PortalNetwork, entry: Entity, now: f32) -> Result<Entity, GateRejection> {
    if !network.contains(entry) {
        return Err(GateRejection::UnknownPortal(entry));
    }
    let (entry_end, exit_end) = network
        .crossing(entry)
        .ok_or(GateRejection::Unlinked(entry))?;
    if entry_end.state(now) == GateState::CooldownActive {
        return Err(GateRejection::CoolingDown {
            portal: entry,
            remaining: entry_end.cooldown_remaining(now),
        });
    }
    if exit_end.state(now) == GateState::CooldownActive {
        return Err(GateRejection::ExitCoolingDown {
            portal: exit_end.entity,
            remaining: exit_end.cooldown_remaining(now),
        });
    }
    Ok(exit_end.entity)
}

/// Decide whether a body overlapping `entry` at time `now` may go through. Returns the exit portal.
pub fn check(
    network: &PortalNetwork,
    entry: Entity,
    now: f32,
    body_tag: Option<&str>,
) -> Result<Entity, GateRejection> {
    let exit = ready(network, entry, now)?;
    let settings = network
        .end(entry)
        .map(|end| &end.settings)
        .ok_or(GateRejection::UnknownPortal(entry))?;
    if settings.require_tag_match && body_tag != Some(settings.filter_tag.as_str()) {
        return Err(GateRejection::TagMismatch {
            expected: settings.filter_tag.clone(),
        });
    }
    Ok(exit)
}

/// Move `mover` from `entry` to its linked portal and arm the cooldown on both.
///
/// Everything is written before returning, nothing else can observe a half teleported mover.
pub fn traverse(
    network: &mut PortalNetwork,
    entry: Entity,
    now: f32,
    mut mover: MoverRefs,
) -> Result<TeleportOutcome, GateRejection> {
    ready(network, entry, now)?;
    let (entry_end, exit_end) = network
        .pair_mut(entry)
        .and_then(|pair| pair.split_mut(entry))
        .ok_or(GateRejection::Unlinked(entry))?;

    let clearance = effective_clearance(entry_end.settings.exit_clearance, mover.mover.radius);
    let (position, rotation) = exit_pose(&exit_end.pose, clearance);
    let frame_rotation = portal_rotation(&entry_end.pose, &exit_end.pose);
    let velocity = frame_rotation.mul_vec3(mover.observations().resolve());
    // Heading before the pose write, kept when the exit portal lies flat.
    let current_forward = mover.transform.forward();

    mover.write_pose(position, rotation);
    let momentum = mover.deliver_momentum(velocity, frame_rotation);

    let alignment = mover
        .movement
        .as_deref_mut()
        .map(|movement| movement.align_upright(rotation, current_forward));
    let (aligned, missing_collaborator) = match alignment {
        Some(Some(upright)) => {
            mover.write_pose(position, upright);
            (true, false)
        }
        Some(None) => (false, false),
        None => (false, true),
    };

    entry_end.last_teleport = Some(now);
    exit_end.last_teleport = Some(now);

    Ok(TeleportOutcome {
        entry: entry_end.entity,
        exit: exit_end.entity,
        position,
        rotation: mover.transform.rotation,
        velocity,
        momentum,
        aligned,
        missing_collaborator,
    })
}

#[cfg(test)]
mod tests {
    use bevy::utils::HashMap;

    use super::*;
    use crate::plugins::portal::{
        geometry::{orientation_from_surface, upright_rotation},
        network::{PortalEnd, PortalSettings},
    };

    const EPS: f32 = 1e-4;
    const A: Entity = Entity::from_raw(1);
    const B: Entity = Entity::from_raw(2);

    fn portal_pose(position: Vec3, normal: Vec3) -> Transform {
        Transform {
            translation: position,
            rotation: orientation_from_surface(normal, None),
            ..default()
        }
    }

    fn linked_network() -> PortalNetwork {
        let mut network = PortalNetwork::default();
        network.register(PortalEnd::new(
            A,
            portal_pose(Vec3::new(0., 1., 0.), Vec3::Z),
            PortalSettings::default(),
        ));
        network.register(PortalEnd::new(
            B,
            portal_pose(Vec3::new(10., 1., 5.), Vec3::X),
            PortalSettings::default(),
        ));
        assert!(network.link(A, B));
        network
    }

    #[derive(Default)]
    struct RecordingMovement {
        received: Vec<Vec3>,
        intended: Option<Vec3>,
        align: bool,
    }

    impl MovementCollaborator for RecordingMovement {
        fn receive_momentum(&mut self, world_velocity: Vec3) {
            self.received.push(world_velocity);
        }

        fn align_upright(&mut self, exit_rotation: Quat, current_forward: Vec3) -> Option<Quat> {
            self.align
                .then(|| upright_rotation(exit_rotation, current_forward))
        }

        fn intended_velocity(&self) -> Option<Vec3> {
            self.intended
        }
    }

    fn plain(transform: &mut Transform) -> MoverRefs<'_> {
        MoverRefs {
            transform,
            mover: Mover::new(Locomotion::PlainTransform, None),
            body_velocity: None,
            controller: None,
            controller_velocity: None,
            movement: None,
        }
    }

    #[test]
    fn unlinked_portal_is_rejected() {
        let mut network = PortalNetwork::default();
        network.register(PortalEnd::new(A, Transform::IDENTITY, PortalSettings::default()));
        assert_eq!(check(&network, A, 0., None), Err(GateRejection::Unlinked(A)));
        assert_eq!(
            check(&network, B, 0., None),
            Err(GateRejection::UnknownPortal(B))
        );
        let mut trf = Transform::IDENTITY;
        assert!(traverse(&mut network, A, 0., plain(&mut trf)).is_err());
        assert_eq!(trf, Transform::IDENTITY);
    }

    #[test]
    fn cooldown_blocks_quick_reentry() {
        let mut network = linked_network();
        let mut trf = Transform::IDENTITY;
        traverse(&mut network, A, 1.0, plain(&mut trf)).unwrap();
        assert!(matches!(
            check(&network, A, 1.1, None),
            Err(GateRejection::CoolingDown { .. })
        ));
        assert!(traverse(&mut network, A, 1.1, plain(&mut trf)).is_err());
        assert_eq!(check(&network, A, 1.3, None), Ok(B));
        assert!(traverse(&mut network, A, 1.3, plain(&mut trf)).is_ok());
    }

    #[test]
    fn cooldown_is_armed_on_both_ends() {
        let mut network = linked_network();
        let mut trf = Transform::IDENTITY;
        traverse(&mut network, A, 2.0, plain(&mut trf)).unwrap();
        // Overlapping the exit right away, going back the other way.
        assert!(check(&network, B, 2.05, None).is_err());
        assert_eq!(check(&network, B, 2.3, None), Ok(A));
    }

    #[test]
    fn exit_portal_cooldown_uses_its_own_duration() {
        let mut network = linked_network();
        network.update_settings(
            A,
            PortalSettings {
                reenter_block_time: 1.0,
                ..default()
            },
        );
        let mut trf = Transform::IDENTITY;
        traverse(&mut network, A, 0., plain(&mut trf)).unwrap();
        assert!(matches!(
            check(&network, B, 0.5, None),
            Err(GateRejection::ExitCoolingDown { portal, .. }) if portal == A
        ));
        assert_eq!(check(&network, B, 1.0, None), Ok(A));
    }

    #[test]
    fn tag_filter_only_lets_matching_bodies_through() {
        let mut network = linked_network();
        network.update_settings(
            A,
            PortalSettings {
                require_tag_match: true,
                filter_tag: "Player".to_owned(),
                ..default()
            },
        );
        assert!(matches!(
            check(&network, A, 0., Some("Crate")),
            Err(GateRejection::TagMismatch { .. })
        ));
        assert!(check(&network, A, 0., None).is_err());
        assert_eq!(check(&network, A, 0., Some("Player")), Ok(B));
        // B doesn't filter.
        assert_eq!(check(&network, B, 0., Some("Crate")), Ok(A));
    }

    #[test]
    fn stationary_round_trip_returns_to_start() {
        let mut network = linked_network();
        let (start, start_rot) = exit_pose(&network.end(A).unwrap().pose, 1.5);
        let mut trf = Transform::from_translation(start).with_rotation(start_rot);

        let out = traverse(&mut network, A, 0., plain(&mut trf)).unwrap();
        assert_eq!(out.exit, B);
        assert!(trf.translation.abs_diff_eq(Vec3::new(11.5, 1., 5.), EPS));
        assert_eq!(out.velocity, Vec3::ZERO);
        assert!(out.missing_collaborator);
        assert_eq!(out.momentum, MomentumDelivery::Skipped);

        traverse(&mut network, B, 0.3, plain(&mut trf)).unwrap();
        assert!(trf.translation.abs_diff_eq(start, EPS));
        assert!(trf.rotation.abs_diff_eq(start_rot, EPS));
    }

    #[test]
    fn free_body_velocity_is_remapped() {
        let mut network = linked_network();
        let mut trf = Transform::from_xyz(0., 1., 0.5);
        let mut velocity = Velocity {
            linvel: Vec3::new(0., 0., -3.),
            angvel: Vec3::Y,
        };
        let out = traverse(
            &mut network,
            A,
            0.,
            MoverRefs {
                transform: &mut trf,
                mover: Mover::new(Locomotion::FreeBody, Some(0.5)),
                body_velocity: Some(&mut velocity),
                controller: None,
                controller_velocity: None,
                movement: None,
            },
        )
        .unwrap();
        // Going into A's face comes out of B's face, which looks along +X.
        assert!(velocity.linvel.abs_diff_eq(Vec3::new(3., 0., 0.), EPS));
        assert!(velocity.angvel.abs_diff_eq(Vec3::Y, EPS));
        assert!(matches!(out.momentum, MomentumDelivery::Assigned(_)));
        assert!(out.missing_collaborator);
    }

    #[test]
    fn controller_momentum_goes_to_the_collaborator() {
        let mut network = linked_network();
        let mut trf = Transform::from_xyz(0., 1., 0.5);
        let mut controller = KinematicCharacterController {
            translation: Some(Vec3::new(0., 0., -0.1)),
            ..default()
        };
        let mut movement = RecordingMovement {
            intended: Some(Vec3::new(0., 0., -5.)),
            align: true,
            ..default()
        };
        let out = traverse(
            &mut network,
            A,
            0.,
            MoverRefs {
                transform: &mut trf,
                mover: Mover::new(Locomotion::KinematicController, Some(0.4)),
                body_velocity: None,
                controller: Some(&mut controller),
                controller_velocity: Some(Vec3::new(0., 0., -2.)),
                movement: Some(&mut movement),
            },
        )
        .unwrap();
        assert_eq!(controller.translation, Some(Vec3::ZERO));
        assert_eq!(movement.received.len(), 1);
        assert!(movement.received[0].abs_diff_eq(Vec3::new(5., 0., 0.), EPS));
        assert!(out.aligned);
        assert!(!out.missing_collaborator);
        assert!(trf.up().abs_diff_eq(Vec3::Y, EPS));
        assert!(trf.forward().abs_diff_eq(Vec3::X, EPS));
    }

    #[test]
    fn alignment_can_be_declined() {
        let mut network = linked_network();
        let mut trf = Transform::IDENTITY;
        let mut movement = RecordingMovement::default();
        let out = traverse(
            &mut network,
            A,
            0.,
            MoverRefs {
                transform: &mut trf,
                mover: Mover::new(Locomotion::PlainTransform, None),
                body_velocity: None,
                controller: None,
                controller_velocity: None,
                movement: Some(&mut movement),
            },
        )
        .unwrap();
        assert!(!out.aligned);
        assert!(!out.missing_collaborator);
        assert_eq!(out.momentum, MomentumDelivery::Injected(Vec3::ZERO));
    }

    #[test]
    fn floor_exit_keeps_the_mover_heading() {
        let mut network = PortalNetwork::default();
        network.register(PortalEnd::new(
            A,
            portal_pose(Vec3::new(0., 1., 0.), Vec3::Z),
            PortalSettings::default(),
        ));
        network.register(PortalEnd::new(
            B,
            portal_pose(Vec3::new(5., 0., 5.), Vec3::Y),
            PortalSettings::default(),
        ));
        assert!(network.link(A, B));

        let mut trf = Transform::from_xyz(0., 1., 0.5).looking_at(Vec3::new(1., 1., 0.5), Vec3::Y);
        let mut movement = RecordingMovement {
            align: true,
            ..default()
        };
        let out = traverse(
            &mut network,
            A,
            0.,
            MoverRefs {
                transform: &mut trf,
                mover: Mover::new(Locomotion::PlainTransform, None),
                body_velocity: None,
                controller: None,
                controller_velocity: None,
                movement: Some(&mut movement),
            },
        )
        .unwrap();
        assert!(out.aligned);
        assert!(trf.translation.abs_diff_eq(Vec3::new(5., 1.5, 5.), EPS));
        assert!(trf.up().abs_diff_eq(Vec3::Y, EPS));
        assert!(trf.forward().abs_diff_eq(Vec3::X, EPS));
    }

    #[test]
    fn mover_root_prefers_controller_then_body() {
        let (collider, body, player, world) = (
            Entity::from_raw(10),
            Entity::from_raw(11),
            Entity::from_raw(12),
            Entity::from_raw(13),
        );
        let parents: HashMap<Entity, Entity> =
            [(collider, body), (body, player), (player, world)].into_iter().collect();
        let mut locomotion = HashMap::new();
        locomotion.insert(body, Locomotion::FreeBody);
        locomotion.insert(player, Locomotion::KinematicController);

        let root = resolve_mover_root(
            collider,
            |e| parents.get(&e).copied(),
            |e| locomotion.get(&e).copied(),
            |_| false,
        );
        assert_eq!(root, Some(player));

        locomotion.remove(&player);
        let root = resolve_mover_root(
            collider,
            |e| parents.get(&e).copied(),
            |e| locomotion.get(&e).copied(),
            |_| false,
        );
        assert_eq!(root, Some(body));
    }

    #[test]
    fn mover_root_falls_back_to_teleportable_top() {
        let (collider, root) = (Entity::from_raw(20), Entity::from_raw(21));
        let parent_of = |e: Entity| (e == collider).then_some(root);
        assert_eq!(
            resolve_mover_root(collider, parent_of, |_| None, |e| e == root),
            Some(root)
        );
        assert_eq!(
            resolve_mover_root(collider, parent_of, |_| None, |_| false),
            None
        );
    }
}
