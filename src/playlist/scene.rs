//! One active scene: the sessions that play together and their outputs.

use std::path::Path;
use std::sync::Arc;
use crossbeam::channel::Receiver;
use log::{debug, info};
use crate::decode::decoder::SourceEvent;
use crate::playback::session::{PlaybackError, PlaybackSession, SessionEvent};
use crate::playlist::document::{OutputDescriptor, SceneDescriptor};
use crate::playlist::PlaylistError;
use crate::system::PlaybackContext;

struct SceneInput {
    session: PlaybackSession,
    events: Receiver<SessionEvent>,
    outputs: Vec<OutputDescriptor>,
}

/// Runtime state of the scene at a given document index.
pub struct Scene {
    index: usize,
    looping: bool,
    skippable: bool,
    inputs: Vec<SceneInput>,
}

impl Scene {
    /// Open every input of `descriptor`. Fails on the first input that cannot be
    /// opened, and on a scene without inputs since it would never end.
    pub fn open(
        context: &Arc<PlaybackContext>,
        index: usize,
        descriptor: &SceneDescriptor,
        base_dir: &Path,
    ) -> Result<Self, PlaylistError> {
        if descriptor.input.is_empty() {
            return Err(PlaylistError::Config(format!("scene {} has no inputs", index)));
        }
        let mut inputs = Vec::with_capacity(descriptor.input.len());
        for (input_index, input) in descriptor.input.iter().enumerate() {
            if !input.is_supported() {
                return Err(PlaylistError::UnsupportedInput(input.class.clone()));
            }
            let mut session = PlaybackSession::new(Arc::clone(context));
            session
                .open(input.session_options(base_dir))
                .map_err(|source| PlaylistError::Input {
                    scene: index,
                    input: input_index,
                    source,
                })?;
            let events = session.subscribe();
            inputs.push(SceneInput {
                session,
                events,
                outputs: input.output.clone(),
            });
        }
        info!("Opened scene {} with {} inputs", index, inputs.len());

        Ok(Self {
            index,
            looping: descriptor.looping,
            skippable: descriptor.skippable,
            inputs,
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn is_looping(&self) -> bool {
        self.looping
    }

    pub fn is_skippable(&self) -> bool {
        self.skippable
    }

    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    pub fn session(&self, input: usize) -> Option<&PlaybackSession> {
        self.inputs.get(input).map(|i| &i.session)
    }

    pub fn session_mut(&mut self, input: usize) -> Option<&mut PlaybackSession> {
        self.inputs.get_mut(input).map(|i| &mut i.session)
    }

    pub fn outputs(&self, input: usize) -> Option<&[OutputDescriptor]> {
        self.inputs.get(input).map(|i| i.outputs.as_slice())
    }

    /// Advance every session and collect their start and end events in order.
    pub fn advance(&mut self, dt: f32) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        for input in &mut self.inputs {
            input.session.advance(dt);
            events.extend(
                input
                    .events
                    .try_iter()
                    .filter(|e| matches!(e.kind, SourceEvent::Start | SourceEvent::End { .. })),
            );
        }
        events
    }

    pub fn resume(&mut self) {
        for input in &mut self.inputs {
            input.session.resume();
        }
    }

    pub fn pause(&mut self) {
        for input in &mut self.inputs {
            input.session.pause();
        }
    }

    /// Seek every session. All sessions are tried; the first failure is returned.
    pub fn seek(&mut self, position: f64) -> Result<(), PlaybackError> {
        let mut result = Ok(());
        for input in &mut self.inputs {
            if let Err(e) = input.session.seek(position) {
                debug!("Scene {}: session {} seek failed: {}", self.index, input.session.id(), e);
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }

    pub fn skip(&mut self, force: bool) {
        if self.skippable || force {
            for input in &mut self.inputs {
                input.session.skip(force);
            }
        }
    }

    pub fn is_playing(&self) -> bool {
        self.inputs.iter().any(|i| i.session.is_playing())
    }

    pub fn is_active(&self) -> bool {
        self.inputs.iter().any(|i| i.session.is_active())
    }

    pub fn blocks_host(&self) -> bool {
        self.inputs.iter().any(|i| i.session.blocks_host())
    }
}
