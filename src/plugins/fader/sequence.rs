use bevy::prelude::*;
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Deserialize, Resource, Reflect)]
#[serde(default)]
pub struct FadeSettings {
    pub fade_out_duration: f32,
    pub fade_in_duration: f32,
}

impl Default for FadeSettings {
    fn default() -> Self {
        FadeSettings {
            fade_out_duration: 1.,
            fade_in_duration: 1.,
        }
    }
}

/// Shortest fade, so a zero duration still reaches its target through a regular step.
const MIN_FADE_DURATION: f32 = 0.0001;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FadePhase {
    FadeOut,
    /// Waiting for the world to acknowledge it was rebuilt.
    ReloadWorld,
    /// One step for the rebuilt world to settle before it is shown.
    SettleFrame,
    FadeIn,
}

/// What the owner of a sequence has to do after polling it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FadeStep {
    Continue,
    /// Entered `ReloadWorld`, the world must now be reloaded.
    ReloadWorld,
    Finished,
}

/// Fade out, reload, fade back in. Polled once per frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FadeSequence {
    phase: FadePhase,
    elapsed: f32,
    /// Overlay opacity when the current fade started.
    from_alpha: f32,
    alpha: f32,
    reloaded: bool,
}

impl FadeSequence {
    pub fn new(current_alpha: f32) -> FadeSequence {
        let alpha = current_alpha.clamp(0., 1.);
        FadeSequence {
            phase: FadePhase::FadeOut,
            elapsed: 0.,
            from_alpha: alpha,
            alpha,
            reloaded: false,
        }
    }

    pub fn phase(&self) -> FadePhase {
        self.phase
    }

    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    /// The world has been rebuilt.
    pub fn acknowledge_reload(&mut self) {
        if self.phase == FadePhase::ReloadWorld {
            self.reloaded = true;
        }
    }

    /// Advance by `dt` seconds of unscaled time.
    pub fn poll(&mut self, dt: f32, settings: &FadeSettings) -> FadeStep {
        match self.phase {
            FadePhase::FadeOut => {
                if self.fade_towards(1., settings.fade_out_duration, dt) {
                    self.phase = FadePhase::ReloadWorld;
                    return FadeStep::ReloadWorld;
                }
                FadeStep::Continue
            }
            FadePhase::ReloadWorld => {
                if self.reloaded {
                    self.phase = FadePhase::SettleFrame;
                }
                FadeStep::Continue
            }
            FadePhase::SettleFrame => {
                self.phase = FadePhase::FadeIn;
                self.elapsed = 0.;
                self.from_alpha = self.alpha;
                FadeStep::Continue
            }
            FadePhase::FadeIn => {
                if self.fade_towards(0., settings.fade_in_duration, dt) {
                    return FadeStep::Finished;
                }
                FadeStep::Continue
            }
        }
    }

    /// Returns whether `target` was reached.
    fn fade_towards(&mut self, target: f32, duration: f32, dt: f32) -> bool {
        let duration = duration.max(MIN_FADE_DURATION);
        self.elapsed += dt.max(0.);
        if self.elapsed >= duration {
            self.alpha = target;
            self.elapsed = 0.;
            self.from_alpha = target;
            return true;
        }
        self.alpha = self.from_alpha + (target - self.from_alpha) * (self.elapsed / duration);
        false
    }
}
