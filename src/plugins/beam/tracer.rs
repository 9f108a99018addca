//! Bounded ray march continuing through linked portals.

use bevy::prelude::*;
use serde::Deserialize;

use crate::plugins::portal::{
    geometry::{transform_direction, transform_point},
    network::PortalNetwork,
};

#[derive(Debug, Clone, PartialEq, Deserialize, Resource, Reflect)]
#[serde(default)]
pub struct BeamSettings {
    pub max_distance: f32,
    /// How many portals a single cast may go through.
    pub max_portal_hops: u32,
    /// Offset from the exit portal plane so the continued ray doesn't hit it straight away.
    pub exit_epsilon: f32,
    /// Collision groups the beam can hit.
    pub hit_mask: u32,
    /// Sensors (portal triggers included) stop the beam.
    pub include_trigger_surfaces: bool,
    /// Tag marking portal surfaces that have no portal of their own.
    pub portal_tag: String,
}

impl Default for BeamSettings {
    fn default() -> Self {
        BeamSettings {
            max_distance: 50.,
            max_portal_hops: 4,
            exit_epsilon: 0.02,
            hit_mask: u32::MAX,
            include_trigger_surfaces: true,
            portal_tag: "portal".to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RayHit {
    pub point: Vec3,
    pub normal: Vec3,
    pub distance: f32,
    pub surface: Entity,
    /// Portal the surface belongs to.
    pub portal: Option<Entity>,
    /// The surface carries the portal tag.
    pub tagged_portal: bool,
}

impl RayHit {
    fn is_portal(&self) -> bool {
        self.portal.is_some() || self.tagged_portal
    }
}

/// Synchronous, side effect free ray query.
pub trait RaycastProvider {
    fn cast(
        &self,
        origin: Vec3,
        direction: Vec3,
        max_distance: f32,
        settings: &BeamSettings,
    ) -> Option<RayHit>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BeamSegment {
    pub start: Vec3,
    pub end: Vec3,
}

impl BeamSegment {
    pub fn length(&self) -> f32 {
        self.start.distance(self.end)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeamTermination {
    /// Nothing in range, the beam ends at its maximum distance.
    OutOfRange,
    /// Hit a surface that isn't a usable portal.
    Absorbed(Entity),
    /// Hit a portal with no hops left.
    HopLimitReached(Entity),
    /// The distance budget ran out right at a portal.
    BudgetExhausted,
    /// Zero or non-finite direction.
    Degenerate,
}

/// Result of one cast. Each portal hop starts a new segment.
#[derive(Debug, Clone, PartialEq, Component)]
pub struct BeamPath {
    pub segments: Vec<BeamSegment>,
    pub hops: u32,
    pub termination: BeamTermination,
    /// Normal of the surface that stopped the beam.
    pub impact_normal: Option<Vec3>,
}

impl Default for BeamPath {
    fn default() -> Self {
        BeamPath {
            segments: Vec::new(),
            hops: 0,
            termination: BeamTermination::Degenerate,
            impact_normal: None,
        }
    }
}

impl BeamPath {
    /// Endpoints as one continuous polyline: the origin, then where each segment stops.
    pub fn points(&self) -> Vec<Vec3> {
        self.segments
            .first()
            .map(|first| first.start)
            .into_iter()
            .chain(self.segments.iter().map(|segment| segment.end))
            .collect()
    }

    pub fn end(&self) -> Option<Vec3> {
        self.segments.last().map(|segment| segment.end)
    }
}

/// Cast a beam, following it through linked portals.
///
/// Every iteration either uses up the distance budget or increments a hop count bounded by
/// `max_portal_hops`, so at most `max_portal_hops + 1` rays are cast.
pub fn trace_beam<P: RaycastProvider>(
    provider: &P,
    network: &PortalNetwork,
    origin: Vec3,
    direction: Vec3,
    settings: &BeamSettings,
) -> BeamPath {
    let mut path = BeamPath::default();
    let mut direction = if direction.is_finite() {
        direction.normalize_or_zero()
    } else {
        Vec3::ZERO
    };
    if direction == Vec3::ZERO || !origin.is_finite() {
        return path;
    }

    let mut origin = origin;
    let mut remaining = settings.max_distance;
    path.termination = BeamTermination::BudgetExhausted;

    while remaining > 0. {
        let Some(hit) = provider.cast(origin, direction, remaining, settings) else {
            path.segments.push(BeamSegment {
                start: origin,
                end: origin + direction * remaining,
            });
            path.termination = BeamTermination::OutOfRange;
            break;
        };
        path.segments.push(BeamSegment {
            start: origin,
            end: hit.point,
        });

        if !hit.is_portal() {
            path.termination = BeamTermination::Absorbed(hit.surface);
            path.impact_normal = Some(hit.normal);
            break;
        }
        if path.hops >= settings.max_portal_hops {
            debug!(
                "Beam reached its hop limit ({}) at {}",
                settings.max_portal_hops, hit.point
            );
            path.termination = BeamTermination::HopLimitReached(hit.portal.unwrap_or(hit.surface));
            path.impact_normal = Some(hit.normal);
            break;
        }
        let Some((entry, exit)) = hit.portal.and_then(|portal| network.crossing(portal)) else {
            // Tagged surface without a portal, or a portal with no partner.
            path.termination = BeamTermination::Absorbed(hit.surface);
            path.impact_normal = Some(hit.normal);
            break;
        };

        remaining -= origin.distance(hit.point);
        let next_direction = transform_direction(&entry.pose, &exit.pose, direction).normalize_or_zero();
        if next_direction == Vec3::ZERO {
            path.termination = BeamTermination::Degenerate;
            break;
        }
        origin = transform_point(&entry.pose, &exit.pose, hit.point)
            + exit.pose.forward() * settings.exit_epsilon;
        direction = next_direction;
        path.hops += 1;
    }
    path
}
