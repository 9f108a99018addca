//! Full screen fade used to hide level reloads.

use bevy::{app::AppExit, prelude::*};
use iyes_loopless::prelude::*;

mod sequence;

pub use sequence::{FadePhase, FadeSequence, FadeSettings, FadeStep};

use super::game::GameState;

#[derive(Debug)]
pub struct FaderPlugin;

#[derive(Debug, SystemLabel)]
pub enum FaderLabels {
    StartFades,
    AdvanceFades,
}

/// Ask for the level to be reloaded behind a fade.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReloadRequested;

/// Sent while the screen is black: the level must be rebuilt now.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorldReload;

/// Sent back once the level has been rebuilt.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorldReloaded;

/// The overlay and the sequence currently driving it.
#[derive(Debug, Resource)]
pub struct ScreenFader {
    overlay: Entity,
    sequence: Option<FadeSequence>,
    alpha: f32,
}

impl ScreenFader {
    pub fn new(overlay: Entity) -> ScreenFader {
        ScreenFader {
            overlay,
            sequence: None,
            alpha: 0.,
        }
    }

    pub fn is_running(&self) -> bool {
        self.sequence.is_some()
    }

    /// Returns false when a sequence is already running.
    pub fn start(&mut self) -> bool {
        if self.is_running() {
            return false;
        }
        self.sequence = Some(FadeSequence::new(self.alpha));
        true
    }

    pub fn alpha(&self) -> f32 {
        self.alpha
    }
}

fn overlay_color(alpha: f32) -> Color {
    Color::rgba(0., 0., 0., alpha)
}

impl Plugin for FaderPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<FadeSettings>()
            .register_type::<FadeSettings>()
            .add_event::<ReloadRequested>()
            .add_event::<WorldReload>()
            .add_event::<WorldReloaded>()
            .add_startup_system(setup_fader)
            .add_system(start_fades.label(FaderLabels::StartFades))
            .add_system(
                advance_fades
                    .label(FaderLabels::AdvanceFades)
                    .after(FaderLabels::StartFades),
            )
            .add_system_to_stage(CoreStage::Last, teardown_fader);
    }
}

fn setup_fader(mut commands: Commands) {
    let overlay = commands
        .spawn((
            NodeBundle {
                style: Style {
                    size: Size::new(Val::Percent(100.), Val::Percent(100.)),
                    position_type: PositionType::Absolute,
                    ..default()
                },
                background_color: BackgroundColor(overlay_color(0.)),
                z_index: ZIndex::Global(i32::MAX),
                ..default()
            },
            Name::from("Screen fader"),
        ))
        .id();
    commands.insert_resource(ScreenFader::new(overlay));
}

fn teardown_fader(
    mut commands: Commands,
    mut exit_events: EventReader<AppExit>,
    fader: Option<Res<ScreenFader>>,
) {
    if exit_events.iter().count() == 0 {
        return;
    }
    if let Some(fader) = fader {
        commands.entity(fader.overlay).despawn_recursive();
        commands.remove_resource::<ScreenFader>();
    }
}

fn start_fades(
    mut commands: Commands,
    mut requests: EventReader<ReloadRequested>,
    fader: Option<ResMut<ScreenFader>>,
) {
    if requests.iter().count() == 0 {
        return;
    }
    let Some(mut fader) = fader else {
        warn!("Reload requested without a screen fader");
        return;
    };
    if fader.start() {
        info!("Reloading level");
        commands.insert_resource(NextState(GameState::Transition));
    }
}

fn advance_fades(
    mut commands: Commands,
    time: Res<Time>,
    settings: Res<FadeSettings>,
    fader: Option<ResMut<ScreenFader>>,
    mut reloads: EventWriter<WorldReload>,
    mut reloaded: EventReader<WorldReloaded>,
    mut overlay_query: Query<&mut BackgroundColor>,
) {
    let Some(mut fader) = fader else {
        return;
    };
    let acknowledged = reloaded.iter().count() > 0;
    let Some(sequence) = fader.sequence.as_mut() else {
        return;
    };

    if acknowledged {
        sequence.acknowledge_reload();
    }
    let step = sequence.poll(time.raw_delta_seconds(), &settings);
    let alpha = sequence.alpha();
    match step {
        FadeStep::Continue => {}
        FadeStep::ReloadWorld => {
            reloads.send(WorldReload);
        }
        FadeStep::Finished => {
            fader.sequence = None;
            commands.insert_resource(NextState(GameState::Playing));
        }
    }

    fader.alpha = alpha;
    if let Ok(mut color) = overlay_query.get_mut(fader.overlay) {
        *color = BackgroundColor(overlay_color(alpha));
    }
}
