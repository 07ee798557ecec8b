//! Scene sequencing.
//!
//! A playlist opens one scene at a time. Session start and end events are
//! translated into playlist events on every `advance`; once an end arrives
//! and no session of the scene is still playing, the scene ends and the next
//! one (or the same one, for looping scenes) is opened.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use crossbeam::channel::{self, Receiver, Sender};
use log::{debug, info, warn};
use crate::decode::decoder::SourceEvent;
use crate::playback::session::{PlaybackError, PlaybackSession, SessionId};
use crate::playlist::document::{OutputDescriptor, PlaylistDocument};
use crate::playlist::scene::Scene;
use crate::system::PlaybackContext;

/// Error type for playlist operations
#[derive(Debug, thiserror::Error)]
pub enum PlaylistError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid playlist document: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Playlist configuration error: {0}")]
    Config(String),
    #[error("Unsupported input class '{0}'")]
    UnsupportedInput(String),
    #[error("Scene {scene} input {input}: {source}")]
    Input {
        scene: usize,
        input: usize,
        #[source]
        source: PlaybackError,
    },
    #[error("Playback error: {0}")]
    Playback(#[from] PlaybackError),
    #[error("Playlist is not open")]
    NotOpen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlaylistId(pub u32);

impl std::fmt::Display for PlaylistId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a playlist is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaylistOptions {
    /// Wrap to the start scene after the last one
    pub looping: bool,
    pub skippable: bool,
    pub blocks_host: bool,
    /// First scene to play; `0` means the first in the document
    pub start_scene: usize,
    /// Scene index to stop before; `0` means play to the end
    pub end_scene: usize,
}

impl Default for PlaylistOptions {
    fn default() -> Self {
        Self {
            looping: false,
            skippable: true,
            blocks_host: false,
            start_scene: 0,
            end_scene: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaylistStatus {
    #[default]
    Closed,
    Opening,
    SceneActive,
    SceneEnding,
    PlaylistEnding,
}

/// Events broadcast to playlist subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaylistEvent {
    StartPlaylist,
    BeginScene(usize),
    VideoStart { scene: usize, session: SessionId },
    VideoEnd { scene: usize, session: SessionId },
    EndScene(usize),
    EndPlaylist,
}

pub struct Playlist {
    id: PlaylistId,
    context: Arc<PlaybackContext>,
    document: Option<PlaylistDocument>,
    path: Option<PathBuf>,
    base_dir: PathBuf,
    options: PlaylistOptions,
    first_scene: usize,
    scene_end: usize,
    next_scene: usize,
    scene: Option<Scene>,
    status: PlaylistStatus,
    paused: bool,
    announce_start: bool,
    announce_scene: bool,
    subscribers: Vec<Sender<PlaylistEvent>>,
}

impl Playlist {
    pub fn new(context: Arc<PlaybackContext>) -> Self {
        Self {
            id: PlaylistId(context.next_id()),
            context,
            document: None,
            path: None,
            base_dir: PathBuf::new(),
            options: PlaylistOptions::default(),
            first_scene: 0,
            scene_end: 0,
            next_scene: 0,
            scene: None,
            status: PlaylistStatus::Closed,
            paused: true,
            announce_start: false,
            announce_scene: false,
            subscribers: Vec::new(),
        }
    }

    pub fn id(&self) -> PlaylistId {
        self.id
    }

    /// Load a playlist file and open its first in-range scene, paused.
    /// Relative media paths resolve against the file's directory.
    pub fn open<P: AsRef<Path>>(&mut self, path: P, options: PlaylistOptions) -> Result<(), PlaylistError> {
        self.close();
        let path = path.as_ref();
        let document = PlaylistDocument::load(path)?;
        let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        self.open_document(document, base_dir, options)?;
        self.path = Some(path.to_path_buf());
        Ok(())
    }

    pub fn open_document(
        &mut self,
        document: PlaylistDocument,
        base_dir: PathBuf,
        options: PlaylistOptions,
    ) -> Result<(), PlaylistError> {
        self.close();
        self.status = PlaylistStatus::Opening;

        let count = document.scene.len();
        let mut first = 0;
        if options.start_scene > 0 {
            first = options.start_scene.min(count);
        }
        let mut end = count;
        if options.end_scene > 0 {
            end = options.end_scene.clamp(first, count);
        }
        if first >= end {
            self.status = PlaylistStatus::Closed;
            return Err(PlaylistError::Config(format!(
                "no scenes in range {}..{} of {}",
                first, end, count
            )));
        }

        info!("Open playlist {} scenes {}..{} of {}", self.id, first, end, count);
        self.document = Some(document);
        self.base_dir = base_dir;
        self.options = options;
        self.first_scene = first;
        self.scene_end = end;
        self.next_scene = first;
        self.announce_start = true;
        self.read_next_scene()
    }

    /// Replace the active scene with the one at `next_scene`.
    /// Any failure closes the playlist.
    fn read_next_scene(&mut self) -> Result<(), PlaylistError> {
        let Some(document) = self.document.as_ref() else {
            return Err(PlaylistError::NotOpen);
        };
        self.scene = None;

        let index = self.next_scene;
        let opened = match document.scene.get(index) {
            Some(descriptor) if index < self.scene_end => {
                Scene::open(&self.context, index, descriptor, &self.base_dir)
            }
            _ => Err(PlaylistError::Config(format!("scene {} is out of range", index))),
        };

        match opened {
            Ok(scene) => {
                self.next_scene = index + 1;
                self.scene = Some(scene);
                self.announce_scene = true;
                self.status = PlaylistStatus::SceneActive;
                if !self.paused {
                    self.resume();
                }
                Ok(())
            }
            Err(e) => {
                warn!("Playlist {}: cannot open scene {}: {}", self.id, index, e);
                self.close();
                Err(e)
            }
        }
    }

    /// Drop the active scene. Fires `EndPlaylist` if a document was loaded.
    pub fn close(&mut self) {
        self.scene = None;
        self.path = None;
        self.options = PlaylistOptions::default();
        self.first_scene = 0;
        self.scene_end = 0;
        self.next_scene = 0;
        self.paused = true;
        self.announce_start = false;
        self.announce_scene = false;
        if self.document.take().is_some() {
            self.end_playlist();
        }
        self.status = PlaylistStatus::Closed;
    }

    /// Run one host tick: advance the scene's sessions, then sequence on their events.
    pub fn advance(&mut self, dt: f32) {
        if self.context.is_shutting_down() {
            return;
        }
        let Some(scene) = self.scene.as_mut() else {
            return;
        };
        let index = scene.index();
        let events = scene.advance(dt);

        let mut video_ended = false;
        for event in events {
            match event.kind {
                SourceEvent::Start => self.video_started(index, event.session),
                SourceEvent::End { .. } => {
                    self.broadcast(PlaylistEvent::VideoEnd {
                        scene: index,
                        session: event.session,
                    });
                    video_ended = true;
                }
                _ => {}
            }
        }

        if video_ended && !self.is_playing() {
            self.end_scene();
        }
    }

    fn video_started(&mut self, scene: usize, session: SessionId) {
        if self.announce_start {
            self.announce_start = false;
            info!("Playlist {} started", self.id);
            self.broadcast(PlaylistEvent::StartPlaylist);
        }
        if self.announce_scene {
            self.announce_scene = false;
            debug!("Playlist {} begins scene {}", self.id, scene);
            self.broadcast(PlaylistEvent::BeginScene(scene));
        }
        self.broadcast(PlaylistEvent::VideoStart { scene, session });
    }

    fn end_scene(&mut self) {
        let Some(scene) = self.scene.as_ref() else {
            return;
        };
        let index = scene.index();
        let looping = scene.is_looping();
        self.status = PlaylistStatus::SceneEnding;
        debug!("Playlist {} ends scene {}", self.id, index);
        self.broadcast(PlaylistEvent::EndScene(index));

        if looping {
            self.next_scene = index;
        } else if self.next_scene >= self.scene_end && self.options.looping {
            self.next_scene = self.first_scene;
        }

        if self.next_scene >= self.scene_end {
            self.status = PlaylistStatus::PlaylistEnding;
            self.close();
        } else if let Err(e) = self.read_next_scene() {
            warn!("Playlist {} stopped: {}", self.id, e);
        }
    }

    fn end_playlist(&mut self) {
        info!("Playlist {} ended", self.id);
        self.broadcast(PlaylistEvent::EndPlaylist);
    }

    /// Switch to `scene` if it is not the active one, then seek all its sessions.
    pub fn seek_scene(&mut self, scene: usize, position: f64) -> Result<(), PlaylistError> {
        if self.document.is_none() {
            return Err(PlaylistError::NotOpen);
        }
        if self.current_scene_index() != Some(scene) {
            self.next_scene = scene;
            self.read_next_scene()?;
        }
        self.seek(position)
    }

    /// Seek every session of the active scene.
    pub fn seek(&mut self, position: f64) -> Result<(), PlaylistError> {
        let scene = self.scene.as_mut().ok_or(PlaylistError::NotOpen)?;
        scene.seek(position)?;
        Ok(())
    }

    pub fn skip(&mut self, force: bool) {
        if self.options.skippable || force {
            if let Some(scene) = self.scene.as_mut() {
                scene.skip(force);
            }
        }
    }

    pub fn resume(&mut self) {
        if let Some(scene) = self.scene.as_mut() {
            scene.resume();
        }
        self.paused = false;
    }

    pub fn pause(&mut self) {
        if let Some(scene) = self.scene.as_mut() {
            scene.pause();
        }
        self.paused = true;
    }

    pub fn subscribe(&mut self) -> Receiver<PlaylistEvent> {
        let (tx, rx) = channel::unbounded();
        self.subscribers.push(tx);
        rx
    }

    fn broadcast(&mut self, event: PlaylistEvent) {
        self.subscribers.retain(|tx| tx.send(event).is_ok());
    }

    pub fn is_playing(&self) -> bool {
        self.scene.as_ref().is_some_and(Scene::is_playing)
    }

    pub fn is_active(&self) -> bool {
        self.scene.as_ref().is_some_and(Scene::is_active)
    }

    pub fn blocks_host(&self) -> bool {
        (self.options.blocks_host && self.is_active()) || self.scene.as_ref().is_some_and(Scene::blocks_host)
    }

    pub fn status(&self) -> PlaylistStatus {
        self.status
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Number of scenes in the loaded document
    pub fn scene_count(&self) -> usize {
        self.document.as_ref().map_or(0, |d| d.scene.len())
    }

    pub fn current_scene(&self) -> Option<&Scene> {
        self.scene.as_ref()
    }

    pub fn current_scene_index(&self) -> Option<usize> {
        self.scene.as_ref().map(Scene::index)
    }

    /// Session of input `input` in the active scene
    pub fn scene_session(&self, input: usize) -> Option<&PlaybackSession> {
        self.scene.as_ref().and_then(|s| s.session(input))
    }

    pub fn scene_session_mut(&mut self, input: usize) -> Option<&mut PlaybackSession> {
        self.scene.as_mut().and_then(|s| s.session_mut(input))
    }

    pub fn scene_outputs(&self, input: usize) -> Option<&[OutputDescriptor]> {
        self.scene.as_ref().and_then(|s| s.outputs(input))
    }
}

impl Drop for Playlist {
    fn drop(&mut self) {
        self.close();
    }
}
