pub mod draw;

use bevy::{app::PluginGroupBuilder, prelude::*};
use bevy_prototype_debug_lines::{DebugLines, DebugLinesPlugin};

use super::{beam::BeamPath, portal::Portal};

#[derive(Debug)]
/// Development plugins intended for debug builds use.
pub struct DeveloperPlugins;

impl PluginGroup for DeveloperPlugins {
    fn build(self) -> PluginGroupBuilder {
        PluginGroupBuilder::start::<Self>()
            .add(bevy_editor_pls::prelude::EditorPlugin)
            .add(bevy_inspector_egui_rapier::InspectableRapierPlugin)
            .add(DebugLinesPlugin::default())
            .add(DebugDrawPlugin)
    }
}

#[derive(Debug)]
/// Draws beams and portal normals with debug lines.
pub struct DebugDrawPlugin;

impl Plugin for DebugDrawPlugin {
    fn build(&self, app: &mut App) {
        app.add_system_to_stage(CoreStage::PostUpdate, draw_beams)
            .add_system_to_stage(CoreStage::PostUpdate, draw_portal_normals);
    }
}

fn draw_beams(beam_query: Query<&BeamPath>, mut lines: ResMut<DebugLines>) {
    for path in &beam_query {
        draw::draw_beam(path, &mut lines);
    }
}

fn draw_portal_normals(
    portal_query: Query<&Transform, With<Portal>>,
    mut lines: ResMut<DebugLines>,
) {
    for transform in &portal_query {
        draw::draw_axes(transform, 0.5, &mut lines);
    }
}
