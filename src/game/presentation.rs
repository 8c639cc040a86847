//! Presentation collaborator
//!
//! The core never renders. It calls into a [`Presentation`] at defined points
//! (text refresh, tint, effect spawn) and forgets about it.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::net::protocol::Transform;
use crate::net::EntityId;

/// Linear RGBA color
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const RED: Color = Color {
        r: 1.0,
        g: 0.0,
        b: 0.0,
        a: 1.0,
    };
}

/// Fire-and-forget presentation side effects
pub trait Presentation: Send {
    fn set_text(&mut self, entity: EntityId, text: &str);
    fn set_tint_color(&mut self, entity: EntityId, color: Color);
    fn spawn_effect(&mut self, effect: &str, transform: Transform);
}

/// Headless presentation for the dedicated server: logs and discards
#[derive(Debug, Default, Clone, Copy)]
pub struct LogPresentation;

impl Presentation for LogPresentation {
    fn set_text(&mut self, entity: EntityId, text: &str) {
        debug!(entity = %entity, text, "set_text");
    }

    fn set_tint_color(&mut self, entity: EntityId, color: Color) {
        debug!(entity = %entity, ?color, "set_tint_color");
    }

    fn spawn_effect(&mut self, effect: &str, transform: Transform) {
        debug!(effect, location = ?transform.location, "spawn_effect");
    }
}

/// A recorded presentation call
#[derive(Debug, Clone, PartialEq)]
pub enum PresentationCall {
    SetText { entity: EntityId, text: String },
    SetTint { entity: EntityId, color: Color },
    SpawnEffect { effect: String, transform: Transform },
}

/// What a viewer would currently see
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VisibleState {
    pub text: HashMap<EntityId, String>,
    pub tint: HashMap<EntityId, Color>,
    pub effects: usize,
}

/// Presentation that records every call. Cloning shares the log, so a test
/// or bot keeps a handle while the world owns the other.
#[derive(Debug, Clone, Default)]
pub struct RecordingPresentation {
    calls: Arc<Mutex<Vec<PresentationCall>>>,
}

impl RecordingPresentation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<PresentationCall> {
        self.calls.lock().clone()
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }

    /// Fold the call log into the state it leaves on screen
    pub fn visible_state(&self) -> VisibleState {
        let mut state = VisibleState::default();
        for call in self.calls.lock().iter() {
            match call {
                PresentationCall::SetText { entity, text } => {
                    state.text.insert(*entity, text.clone());
                }
                PresentationCall::SetTint { entity, color } => {
                    state.tint.insert(*entity, *color);
                }
                PresentationCall::SpawnEffect { .. } => state.effects += 1,
            }
        }
        state
    }

    pub fn text_of(&self, entity: EntityId) -> Option<String> {
        self.visible_state().text.remove(&entity)
    }

    pub fn tint_calls(&self, entity: EntityId) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, PresentationCall::SetTint { entity: e, .. } if *e == entity))
            .count()
    }

    pub fn effect_count(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, PresentationCall::SpawnEffect { .. }))
            .count()
    }
}

impl Presentation for RecordingPresentation {
    fn set_text(&mut self, entity: EntityId, text: &str) {
        self.calls.lock().push(PresentationCall::SetText {
            entity,
            text: text.to_string(),
        });
    }

    fn set_tint_color(&mut self, entity: EntityId, color: Color) {
        self.calls
            .lock()
            .push(PresentationCall::SetTint { entity, color });
    }

    fn spawn_effect(&mut self, effect: &str, transform: Transform) {
        self.calls.lock().push(PresentationCall::SpawnEffect {
            effect: effect.to_string(),
            transform,
        });
    }
}
