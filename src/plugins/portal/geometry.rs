//! Frame remapping between two linked portals.
//!
//! A portal's `forward()` is the outward normal of its front face, so anything travelling into a
//! portal moves along `-forward()`. Going through a portal re-expresses a vector in the entry
//! portal's local frame, turns it half a revolution around the local up axis, then expresses it
//! in the exit portal's frame. Every mapping here is a rigid motion: lengths and angles are kept.

use std::f32::consts::PI;

use bevy::prelude::*;

/// Below this squared length a reference axis is considered parallel to the surface normal.
const DEGENERATE_AXIS_EPSILON: f32 = 1e-4;

/// Half turn around the local up axis, mirroring "into the portal" to "out of its pair".
fn mirror() -> Quat {
    Quat::from_rotation_y(PI)
}

/// Rotation taking vectors expressed relative to `entry` to vectors relative to `exit`.
pub fn portal_rotation(entry: &Transform, exit: &Transform) -> Quat {
    (exit.rotation * mirror() * entry.rotation.inverse()).normalize()
}

/// Pose right in front of `exit`, `clearance` units along its outward normal, facing away from it.
pub fn exit_pose(exit: &Transform, clearance: f32) -> (Vec3, Quat) {
    (exit.translation + exit.forward() * clearance, exit.rotation)
}

/// Clearance to use for a mover: the configured one, raised past the mover's radius when known
/// so it does not start out overlapping the exit trigger.
pub fn effective_clearance(configured: f32, mover_radius: Option<f32>) -> f32 {
    const RADIUS_MARGIN: f32 = 0.05;
    match mover_radius {
        Some(radius) if radius.is_finite() && radius > 0. => {
            configured.max(radius + RADIUS_MARGIN)
        }
        _ => configured,
    }
}

/// Remap a world space direction (or velocity) entering `entry` to the one leaving `exit`.
pub fn transform_direction(entry: &Transform, exit: &Transform, vector: Vec3) -> Vec3 {
    portal_rotation(entry, exit).mul_vec3(vector)
}

/// Remap a world space point near `entry` to the matching point near `exit`.
pub fn transform_point(entry: &Transform, exit: &Transform, point: Vec3) -> Vec3 {
    let local = entry.rotation.inverse().mul_vec3(point - entry.translation);
    exit.translation + exit.rotation.mul_vec3(mirror().mul_vec3(local))
}

fn reject(axis: Vec3, normal: Vec3) -> Vec3 {
    axis - normal * axis.dot(normal)
}

/// Build a portal orientation whose forward is `normal`.
///
/// The portal's up is world up projected onto the surface. On floors and ceilings that projection
/// vanishes, so `secondary` (typically the aiming camera's right vector) is tried next, then fixed
/// world axes. The result is always a finite unit quaternion.
pub fn orientation_from_surface(normal: Vec3, secondary: Option<Vec3>) -> Quat {
    let normal = if normal.is_finite() {
        normal.normalize_or_zero()
    } else {
        Vec3::ZERO
    };
    let normal = if normal == Vec3::ZERO { Vec3::Z } else { normal };

    let up = [Some(Vec3::Y), secondary, Some(Vec3::NEG_Z), Some(Vec3::X)]
        .into_iter()
        .flatten()
        .filter(|axis| axis.is_finite())
        .map(|axis| reject(axis, normal))
        .find(|up| up.length_squared() > DEGENERATE_AXIS_EPSILON)
        // X and -Z can't both be parallel to a unit normal.
        .unwrap_or(Vec3::Y)
        .normalize();

    // Bevy's forward is -Z, so the local Z axis points into the surface.
    let back = -normal;
    let right = up.cross(back);
    Quat::from_mat3(&Mat3::from_cols(right, up, back)).normalize()
}

/// Upright rotation looking along `exit_rotation`'s forward flattened onto the horizontal plane.
///
/// Falls back to `current_forward` flattened, then to the world forward axis, when the flattened
/// vector vanishes (exiting a floor or ceiling portal).
pub fn upright_rotation(exit_rotation: Quat, current_forward: Vec3) -> Quat {
    let flatten = |v: Vec3| Vec3::new(v.x, 0., v.z);
    let exit_forward = flatten(exit_rotation.mul_vec3(Vec3::NEG_Z));
    let flat_forward = if exit_forward.length_squared() >= DEGENERATE_AXIS_EPSILON {
        exit_forward
    } else {
        let current = flatten(current_forward);
        if current.is_finite() && current.length_squared() >= DEGENERATE_AXIS_EPSILON {
            current
        } else {
            Vec3::NEG_Z
        }
    }
    .normalize();
    Quat::from_rotation_y(yaw_of(flat_forward))
}

/// Yaw angle around world up for which a `Quat::from_rotation_y` looks along `forward`.
pub fn yaw_of(forward: Vec3) -> f32 {
    (-forward.x).atan2(-forward.z)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f32 = 1e-4;

    fn portal(position: Vec3, normal: Vec3) -> Transform {
        Transform {
            translation: position,
            rotation: orientation_from_surface(normal, None),
            ..default()
        }
    }

    fn pairs() -> Vec<(Transform, Transform)> {
        vec![
            (portal(Vec3::ZERO, Vec3::Z), portal(Vec3::new(10., 0., 0.), Vec3::NEG_Z)),
            (portal(Vec3::new(1., 2., 3.), Vec3::X), portal(Vec3::new(-4., 1., 7.), Vec3::Y)),
            (
                portal(Vec3::new(0., 5., 0.), Vec3::new(1., 1., 0.)),
                portal(Vec3::new(3., -2., 9.), Vec3::new(-0.3, 0.2, 0.9)),
            ),
            (portal(Vec3::ZERO, Vec3::NEG_Y), portal(Vec3::ONE, Vec3::NEG_X)),
        ]
    }

    #[test]
    fn surface_orientation_faces_the_normal() {
        let rot = orientation_from_surface(Vec3::X, None);
        let trf = Transform::from_rotation(rot);
        assert!(trf.forward().abs_diff_eq(Vec3::X, EPS));
        assert!(trf.up().abs_diff_eq(Vec3::Y, EPS));
    }

    #[test]
    fn floor_orientation_uses_secondary_axis() {
        let rot = orientation_from_surface(Vec3::Y, Some(Vec3::X));
        let trf = Transform::from_rotation(rot);
        assert!(trf.forward().abs_diff_eq(Vec3::Y, EPS));
        assert!(trf.up().abs_diff_eq(Vec3::X, EPS));
    }

    #[test]
    fn degenerate_references_fall_back_to_fixed_axis() {
        // Secondary parallel to the normal too.
        let rot = orientation_from_surface(Vec3::NEG_Y, Some(Vec3::Y));
        assert!(rot.is_finite());
        assert!(rot.is_normalized());
        let trf = Transform::from_rotation(rot);
        assert!(trf.forward().abs_diff_eq(Vec3::NEG_Y, EPS));
        assert!(trf.up().dot(Vec3::NEG_Y).abs() < EPS);

        let rot = orientation_from_surface(Vec3::new(f32::NAN, 0., 0.), Some(Vec3::ZERO));
        assert!(rot.is_finite());
        assert!(rot.is_normalized());
    }

    #[test]
    fn direction_magnitude_is_preserved() {
        let directions = [
            Vec3::X,
            Vec3::Y,
            Vec3::Z,
            Vec3::new(1., 2., -3.).normalize(),
            Vec3::new(-0.2, 0.9, 0.1).normalize(),
        ];
        for (a, b) in pairs() {
            for d in directions {
                let out = transform_direction(&a, &b, d);
                assert!((out.length() - d.length()).abs() < EPS, "{d} -> {out}");
            }
        }
    }

    #[test]
    fn straight_through_travel_is_continuous() {
        for (a, b) in pairs() {
            // Travelling into A's face comes out of B's face.
            let out = transform_direction(&a, &b, -a.forward());
            assert!(out.abs_diff_eq(b.forward(), EPS), "{out} != {}", b.forward());
            // The forward axis maps onto the forward axis.
            let out = transform_direction(&a, &b, a.forward());
            assert!(out.abs_diff_eq(-b.forward(), EPS));
        }
    }

    #[test]
    fn up_axis_is_kept_through_the_mirror() {
        for (a, b) in pairs() {
            let out = transform_direction(&a, &b, a.up());
            assert!(out.abs_diff_eq(b.up(), EPS));
        }
    }

    #[test]
    fn points_map_across_portal_centres() {
        for (a, b) in pairs() {
            assert!(transform_point(&a, &b, a.translation).abs_diff_eq(b.translation, EPS));
            let out = transform_point(&a, &b, a.translation + a.forward() * 2.);
            assert!(out.abs_diff_eq(b.translation - b.forward() * 2., EPS));
            // Same rigid motion as the one applied to directions.
            let p = a.translation + a.up() * 0.5 + a.left() * 0.25;
            let expected = b.translation + transform_direction(&a, &b, p - a.translation);
            assert!(transform_point(&a, &b, p).abs_diff_eq(expected, EPS));
        }
    }

    #[test]
    fn exit_pose_is_in_front_of_exit() {
        let b = portal(Vec3::new(10., 1., 0.), Vec3::NEG_X);
        let (pos, rot) = exit_pose(&b, 1.5);
        assert!(pos.abs_diff_eq(Vec3::new(8.5, 1., 0.), EPS));
        assert!(rot.abs_diff_eq(b.rotation, EPS));
    }

    #[test]
    fn clearance_exceeds_known_radius() {
        assert_eq!(effective_clearance(1.5, None), 1.5);
        assert_eq!(effective_clearance(1.5, Some(0.4)), 1.5);
        assert!(effective_clearance(0.2, Some(0.5)) > 0.5);
    }

    #[test]
    fn upright_rotation_flattens_exit_forward() {
        let exit = orientation_from_surface(Vec3::new(1., 1., 0.), None);
        let trf = Transform::from_rotation(upright_rotation(exit, Vec3::NEG_Z));
        assert!(trf.up().abs_diff_eq(Vec3::Y, EPS));
        assert!(trf.forward().abs_diff_eq(Vec3::X, EPS));
    }

    #[test]
    fn upright_rotation_falls_back_on_floor_exit() {
        let exit = orientation_from_surface(Vec3::Y, Some(Vec3::X));
        let trf = Transform::from_rotation(upright_rotation(exit, Vec3::new(0., 0.3, 1.)));
        assert!(trf.forward().abs_diff_eq(Vec3::Z, EPS));

        let trf = Transform::from_rotation(upright_rotation(exit, Vec3::Y));
        assert!(trf.forward().abs_diff_eq(Vec3::NEG_Z, EPS));
    }
}
