use bevy::prelude::*;
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Deserialize, Resource, Reflect)]
#[serde(default)]
pub struct MovementSettings {
    pub move_speed: f32,
    pub mouse_sensitivity: f32,
    pub gravity: f32,
    pub jump_height: f32,
    /// Gravity multiplier while falling.
    pub fall_multiplier: f32,
    /// Gravity multiplier while rising with the jump button released.
    pub low_jump_multiplier: f32,
    pub terminal_velocity: f32,
    /// Seconds during which velocity injected by a portal is held as is.
    pub momentum_grace_time: f32,
    /// Exponential decay rate of injected velocity once the grace time is over.
    pub momentum_damping: f32,
    pub align_upright_on_exit: bool,
    pub reset_view_on_exit: bool,
}

impl Default for MovementSettings {
    fn default() -> Self {
        MovementSettings {
            move_speed: 5.,
            mouse_sensitivity: 0.004,
            gravity: -9.81,
            jump_height: 2.,
            fall_multiplier: 2.5,
            low_jump_multiplier: 2.,
            terminal_velocity: -53.,
            momentum_grace_time: 0.15,
            momentum_damping: 4.,
            align_upright_on_exit: true,
            reset_view_on_exit: false,
        }
    }
}

/// Downward speed kept while grounded so the controller stays snapped to the floor.
const GROUNDED_VERTICAL_VELOCITY: f32 = -2.;
/// Injected horizontal speeds below this are dropped.
const EXTERNAL_VELOCITY_CUTOFF: f32 = 0.01;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MotionInput {
    pub dt: f32,
    pub grounded: bool,
    pub jump_pressed: bool,
    pub jump_held: bool,
}

/// Vertical motion and portal momentum of a character controller.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Motion {
    pub vertical_velocity: f32,
    /// Horizontal world velocity injected by a portal.
    pub external_velocity: Vec3,
    pub grace_remaining: f32,
}

impl Motion {
    /// Take over a world velocity: the vertical part replaces ours so gravity carries on from it,
    /// the horizontal part is held for the grace time and decays afterwards.
    pub fn inject(&mut self, world_velocity: Vec3, grace_time: f32) {
        self.vertical_velocity = world_velocity.y;
        self.external_velocity = Vec3::new(world_velocity.x, 0., world_velocity.z);
        self.grace_remaining = grace_time.max(0.);
    }

    pub fn in_grace(&self) -> bool {
        self.grace_remaining > 0.
    }

    /// Advance one step. Returns the velocity to add on top of the input driven movement.
    pub fn step(&mut self, settings: &MovementSettings, input: MotionInput) -> Vec3 {
        let external = self.external_velocity;

        if self.in_grace() {
            self.grace_remaining = (self.grace_remaining - input.dt).max(0.);
        } else if self.external_velocity != Vec3::ZERO {
            self.external_velocity *= (-settings.momentum_damping * input.dt).exp();
            if self.external_velocity.length() < EXTERNAL_VELOCITY_CUTOFF {
                self.external_velocity = Vec3::ZERO;
            }
        }

        if input.grounded {
            // Landing right after a portal mustn't eat the momentum it gave.
            if self.vertical_velocity < 0. && !self.in_grace() {
                self.vertical_velocity = GROUNDED_VERTICAL_VELOCITY;
            }
            if input.jump_pressed {
                self.vertical_velocity = (settings.jump_height * -2. * settings.gravity).sqrt();
            }
        } else {
            let mut g = settings.gravity;
            if self.vertical_velocity < 0. {
                g *= settings.fall_multiplier;
            } else if !input.jump_held {
                g *= settings.low_jump_multiplier;
            }
            self.vertical_velocity = (self.vertical_velocity + g * input.dt)
                .max(settings.terminal_velocity);
        }

        external + Vec3::Y * self.vertical_velocity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DT: f32 = 1. / 60.;

    fn grounded() -> MotionInput {
        MotionInput {
            dt: DT,
            grounded: true,
            ..default()
        }
    }

    fn airborne() -> MotionInput {
        MotionInput {
            dt: DT,
            ..default()
        }
    }

    #[test]
    fn injection_sets_vertical_and_holds_horizontal() {
        let settings = MovementSettings::default();
        let mut motion = Motion::default();
        motion.inject(Vec3::new(3., -4., 0.), settings.momentum_grace_time);
        assert_eq!(motion.vertical_velocity, -4.);
        assert_eq!(motion.external_velocity, Vec3::new(3., 0., 0.));

        let extra = motion.step(&settings, grounded());
        assert_eq!(extra.x, 3.);
        // Still in grace: landing keeps the downward speed.
        assert_eq!(motion.vertical_velocity, -4.);
        assert_eq!(motion.external_velocity, Vec3::new(3., 0., 0.));
    }

    #[test]
    fn grounding_snaps_after_grace() {
        let settings = MovementSettings::default();
        let mut motion = Motion::default();
        motion.inject(Vec3::new(0., -4., 0.), settings.momentum_grace_time);
        for _ in 0..20 {
            motion.step(&settings, grounded());
        }
        assert!(!motion.in_grace());
        assert_eq!(motion.vertical_velocity, GROUNDED_VERTICAL_VELOCITY);
    }

    #[test]
    fn external_velocity_decays_to_zero() {
        let settings = MovementSettings::default();
        let mut motion = Motion::default();
        motion.inject(Vec3::new(0., 0., 8.), settings.momentum_grace_time);
        let mut previous = f32::MAX;
        let mut steps = 0;
        while motion.external_velocity != Vec3::ZERO {
            motion.step(&settings, grounded());
            let speed = motion.external_velocity.length();
            assert!(speed <= previous);
            previous = speed;
            steps += 1;
            assert!(steps < 10_000);
        }
        // Held for the grace time, not snapped on the first grounded step.
        assert!(steps as f32 * DT > settings.momentum_grace_time);
    }

    #[test]
    fn falling_is_clamped_to_terminal_velocity() {
        let settings = MovementSettings::default();
        let mut motion = Motion::default();
        for _ in 0..1000 {
            motion.step(&settings, airborne());
        }
        assert_eq!(motion.vertical_velocity, settings.terminal_velocity);
    }

    #[test]
    fn jumping_reaches_jump_height_speed() {
        let settings = MovementSettings::default();
        let mut motion = Motion::default();
        motion.step(
            &settings,
            MotionInput {
                jump_pressed: true,
                jump_held: true,
                ..grounded()
            },
        );
        let expected = (2. * settings.jump_height * -settings.gravity).sqrt();
        assert!((motion.vertical_velocity - expected).abs() < 1e-4);
    }
}
