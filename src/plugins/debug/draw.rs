use bevy::prelude::*;
use bevy_prototype_debug_lines::DebugLines;

use crate::plugins::beam::{BeamPath, BeamTermination};

/// Segments fade from red to yellow, one step per portal hop.
pub fn draw_beam(path: &BeamPath, lines: &mut ResMut<DebugLines>) {
    const IMPACT_SIZE: f32 = 0.05;

    let last = path.segments.len().saturating_sub(1).max(1) as f32;
    for (i, segment) in path.segments.iter().enumerate() {
        let color = Color::rgb(1., i as f32 / last, 0.);
        lines.line_colored(segment.start, segment.end, 0., color);
    }

    // Mark where the beam was absorbed, flat on the surface it hit
    if let (BeamTermination::Absorbed(_) | BeamTermination::HopLimitReached(_), Some(end)) =
        (path.termination, path.end())
    {
        let normal = path.impact_normal.unwrap_or(Vec3::Y).normalize_or_zero();
        let reference = if normal.y.abs() < 0.9 { Vec3::Y } else { Vec3::X };
        let tangent = normal.cross(reference).normalize_or_zero();
        let bitangent = normal.cross(tangent);
        for axis in [tangent, bitangent] {
            lines.line_colored(
                end - axis * IMPACT_SIZE,
                end + axis * IMPACT_SIZE,
                0.,
                Color::WHITE,
            );
        }
        lines.line_colored(end, end + normal * IMPACT_SIZE * 2., 0., Color::WHITE);
    }
}

/// Forward in blue, up in green, right in red.
pub fn draw_axes(transform: &Transform, length: f32, lines: &mut ResMut<DebugLines>) {
    let origin = transform.translation;
    lines.line_colored(origin, origin + transform.forward() * length, 0., Color::BLUE);
    lines.line_colored(origin, origin + transform.up() * length, 0., Color::GREEN);
    lines.line_colored(origin, origin + transform.right() * length, 0., Color::RED);
}
