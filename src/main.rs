#![allow(clippy::type_complexity)]

use bevy::prelude::*;

mod plugins;
mod util;

fn main() {
    App::new()
        .add_plugin(plugins::game::GamePlugin {
            window: WindowDescriptor {
                title: "Portal Hop".to_string(),
                width: 1280.,
                height: 720.,
                ..Default::default()
            },
        })
        .run();
}
