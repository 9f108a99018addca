use bevy::prelude::*;

/// Velocity readings for one mover, one per locomotion representation that may report it.
///
/// Only one of them is authoritative at a time, the others are typically stale or zero.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VelocityObservations {
    /// Linear velocity of a free rigid body.
    pub rigid_body: Option<Vec3>,
    /// Last intended world velocity computed by the movement controller.
    pub movement: Option<Vec3>,
    /// Velocity reported by a kinematic character controller.
    pub controller: Option<Vec3>,
}

impl VelocityObservations {
    /// Pick the reading with the greatest magnitude.
    ///
    /// Equal magnitudes keep the earliest of rigid body, movement, controller. No reading at all
    /// resolves to zero.
    pub fn resolve(&self) -> Vec3 {
        [self.rigid_body, self.movement, self.controller]
            .into_iter()
            .flatten()
            .filter(|v| v.is_finite())
            .fold(None, |best: Option<Vec3>, v| match best {
                Some(b) if b.length_squared() >= v.length_squared() => Some(b),
                _ => Some(v),
            })
            .unwrap_or(Vec3::ZERO)
    }
}
