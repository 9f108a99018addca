//! Portal links and their re-entry cooldowns.
//!
//! Links are only ever created pairwise through [`PortalNetwork::link`], which owns both ends of a
//! [`PortalPair`]. A portal can therefore never point at a partner that doesn't point back.

use bevy::{prelude::*, utils::HashMap};
use serde::Deserialize;

/// Per portal configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Resource, Component, Reflect)]
#[serde(default)]
pub struct PortalSettings {
    /// Distance in front of the exit portal where movers are placed.
    pub exit_clearance: f32,
    /// Seconds during which a portal ignores overlaps after a teleport.
    pub reenter_block_time: f32,
    /// Only teleport bodies carrying `filter_tag`.
    pub require_tag_match: bool,
    pub filter_tag: String,
}

impl Default for PortalSettings {
    fn default() -> Self {
        PortalSettings {
            exit_clearance: 1.5,
            reenter_block_time: 0.25,
            require_tag_match: false,
            filter_tag: "Player".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Idle,
    CooldownActive,
}

/// One portal as seen by the traversal logic.
#[derive(Debug, Clone, PartialEq)]
pub struct PortalEnd {
    pub entity: Entity,
    pub pose: Transform,
    pub settings: PortalSettings,
    /// Time of the last teleport through this portal or its partner.
    pub last_teleport: Option<f32>,
}

impl PortalEnd {
    pub fn new(entity: Entity, pose: Transform, settings: PortalSettings) -> PortalEnd {
        PortalEnd {
            entity,
            pose,
            settings,
            last_teleport: None,
        }
    }

    /// The cooldown expires lazily: it is only evaluated when asked.
    pub fn state(&self, now: f32) -> GateState {
        match self.last_teleport {
            Some(last) if now - last < self.settings.reenter_block_time => GateState::CooldownActive,
            _ => GateState::Idle,
        }
    }

    pub fn cooldown_remaining(&self, now: f32) -> f32 {
        self.last_teleport
            .map(|last| (self.settings.reenter_block_time - (now - last)).max(0.))
            .unwrap_or(0.)
    }
}

/// Two linked portals. Entering either one exits the other.
#[derive(Debug, Clone, PartialEq)]
pub struct PortalPair {
    ends: [PortalEnd; 2],
}

impl PortalPair {
    pub fn new(a: PortalEnd, b: PortalEnd) -> PortalPair {
        PortalPair { ends: [a, b] }
    }

    pub fn contains(&self, id: Entity) -> bool {
        self.ends.iter().any(|end| end.entity == id)
    }

    pub fn get(&self, id: Entity) -> Option<&PortalEnd> {
        self.ends.iter().find(|end| end.entity == id)
    }

    pub fn get_mut(&mut self, id: Entity) -> Option<&mut PortalEnd> {
        self.ends.iter_mut().find(|end| end.entity == id)
    }

    /// The partner of `id`.
    pub fn other(&self, id: Entity) -> Option<&PortalEnd> {
        let [a, b] = &self.ends;
        if a.entity == id {
            Some(b)
        } else if b.entity == id {
            Some(a)
        } else {
            None
        }
    }

    /// Borrow `(entry, exit)` for a traversal starting at `entry`.
    pub fn split_mut(&mut self, entry: Entity) -> Option<(&mut PortalEnd, &mut PortalEnd)> {
        let [a, b] = &mut self.ends;
        if a.entity == entry {
            Some((a, b))
        } else if b.entity == entry {
            Some((b, a))
        } else {
            None
        }
    }

    fn into_ends(self) -> [PortalEnd; 2] {
        self.ends
    }
}

/// Every known portal, linked or not.
#[derive(Debug, Default, Resource)]
pub struct PortalNetwork {
    pairs: Vec<PortalPair>,
    unpaired: HashMap<Entity, PortalEnd>,
}

impl PortalNetwork {
    /// Start tracking a portal. Already known portals keep their link and cooldown.
    pub fn register(&mut self, end: PortalEnd) {
        if !self.contains(end.entity) {
            self.unpaired.insert(end.entity, end);
        }
    }

    pub fn contains(&self, id: Entity) -> bool {
        self.unpaired.contains_key(&id) || self.pair(id).is_some()
    }

    /// Link `a` and `b` together, dropping any link either of them had.
    ///
    /// Returns `false` when one of them is unknown or both are the same portal.
    pub fn link(&mut self, a: Entity, b: Entity) -> bool {
        if a == b || !self.contains(a) || !self.contains(b) {
            return false;
        }
        if self.linked(a) == Some(b) {
            return true;
        }
        self.unlink(a);
        self.unlink(b);
        match (self.unpaired.remove(&a), self.unpaired.remove(&b)) {
            (Some(end_a), Some(end_b)) => {
                self.pairs.push(PortalPair::new(end_a, end_b));
                true
            }
            // Both were just moved to the unpaired set.
            _ => false,
        }
    }

    /// Break the link of `id`, if any. Both ends stay registered.
    pub fn unlink(&mut self, id: Entity) {
        if let Some(index) = self.pairs.iter().position(|pair| pair.contains(id)) {
            for end in self.pairs.swap_remove(index).into_ends() {
                self.unpaired.insert(end.entity, end);
            }
        }
    }

    /// Forget about a portal entirely, unlinking its partner.
    pub fn remove(&mut self, id: Entity) {
        self.unlink(id);
        self.unpaired.remove(&id);
    }

    pub fn clear(&mut self) {
        self.pairs.clear();
        self.unpaired.clear();
    }

    pub fn linked(&self, id: Entity) -> Option<Entity> {
        self.pair(id)
            .and_then(|pair| pair.other(id))
            .map(|end| end.entity)
    }

    pub fn pair(&self, id: Entity) -> Option<&PortalPair> {
        self.pairs.iter().find(|pair| pair.contains(id))
    }

    pub fn pair_mut(&mut self, id: Entity) -> Option<&mut PortalPair> {
        self.pairs.iter_mut().find(|pair| pair.contains(id))
    }

    pub fn end(&self, id: Entity) -> Option<&PortalEnd> {
        self.pair(id)
            .and_then(|pair| pair.get(id))
            .or_else(|| self.unpaired.get(&id))
    }

    pub fn end_mut(&mut self, id: Entity) -> Option<&mut PortalEnd> {
        if self.unpaired.contains_key(&id) {
            return self.unpaired.get_mut(&id);
        }
        self.pair_mut(id).and_then(|pair| pair.get_mut(id))
    }

    pub fn update_pose(&mut self, id: Entity, pose: Transform) {
        if let Some(end) = self.end_mut(id) {
            end.pose = pose;
        }
    }

    pub fn update_settings(&mut self, id: Entity, settings: PortalSettings) {
        if let Some(end) = self.end_mut(id) {
            end.settings = settings;
        }
    }

    /// Pose of `id` and of its partner, for anything crossing `id`.
    pub fn crossing(&self, id: Entity) -> Option<(&PortalEnd, &PortalEnd)> {
        let pair = self.pair(id)?;
        Some((pair.get(id)?, pair.other(id)?))
    }
}
