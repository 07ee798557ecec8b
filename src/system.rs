//! Process-wide playback state and the session/playlist registry.
//!
//! There is one [`PlaybackContext`] per host. Sessions and playlists share it
//! through an `Arc`; it replaces any global singleton.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use log::info;
use crate::audio::sink::AudioBackend;
use crate::core::config::{PlaybackConfig, PlaybackMode};
use crate::playback::session::{PlaybackSession, SessionId};
use crate::playlist::{Playlist, PlaylistId};
use crate::render::resources::ResourceQueue;

/// Shared configuration, render queue, audio backend and host flags.
pub struct PlaybackContext {
    config: PlaybackConfig,
    resources: Arc<ResourceQueue>,
    audio_backend: Option<Arc<dyn AudioBackend>>,
    shutting_down: AtomicBool,
    editing: AtomicBool,
    next_id: AtomicU32,
}

impl PlaybackContext {
    pub fn new(config: PlaybackConfig) -> Self {
        Self {
            config,
            resources: Arc::new(ResourceQueue::new()),
            audio_backend: None,
            shutting_down: AtomicBool::new(false),
            editing: AtomicBool::new(false),
            next_id: AtomicU32::new(0),
        }
    }

    pub fn with_audio_backend(mut self, backend: Arc<dyn AudioBackend>) -> Self {
        self.audio_backend = Some(backend);
        self
    }

    pub fn config(&self) -> &PlaybackConfig {
        &self.config
    }

    /// Queue drained by the renderer thread
    pub fn resources(&self) -> &Arc<ResourceQueue> {
        &self.resources
    }

    pub fn audio_backend(&self) -> Option<&Arc<dyn AudioBackend>> {
        self.audio_backend.as_ref()
    }

    /// Unique id for a session or playlist, starting at 1
    pub fn next_id(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn next_session_id(&self) -> SessionId {
        SessionId(self.next_id())
    }

    /// The host is in its editor rather than running the game loop
    pub fn set_editing(&self, editing: bool) {
        self.editing.store(editing, Ordering::Release);
    }

    pub fn is_editing(&self) -> bool {
        self.editing.load(Ordering::Acquire)
    }

    /// Sessions run on the wall clock because the editor neither ticks nor plays audio.
    pub fn editor_playback(&self) -> bool {
        self.is_editing() && self.config.playback_mode == PlaybackMode::KeepPlaying
    }

    /// Stop all work. Advances and cleanup become no-ops from here on.
    pub fn shutdown(&self) {
        if !self.shutting_down.swap(true, Ordering::AcqRel) {
            self.resources.close();
            info!("Playback shutting down");
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }
}

/// Owns every standalone session and playlist of the host.
pub struct PlaybackSystem {
    context: Arc<PlaybackContext>,
    sessions: BTreeMap<SessionId, PlaybackSession>,
    playlists: BTreeMap<PlaylistId, Playlist>,
}

impl PlaybackSystem {
    pub fn new(config: PlaybackConfig) -> Self {
        Self::with_context(Arc::new(PlaybackContext::new(config)))
    }

    pub fn with_context(context: Arc<PlaybackContext>) -> Self {
        Self {
            context,
            sessions: BTreeMap::new(),
            playlists: BTreeMap::new(),
        }
    }

    pub fn context(&self) -> &Arc<PlaybackContext> {
        &self.context
    }

    pub fn create_session(&mut self) -> SessionId {
        let session = PlaybackSession::new(Arc::clone(&self.context));
        let id = session.id();
        self.sessions.insert(id, session);
        id
    }

    pub fn session(&self, id: SessionId) -> Option<&PlaybackSession> {
        self.sessions.get(&id)
    }

    pub fn session_mut(&mut self, id: SessionId) -> Option<&mut PlaybackSession> {
        self.sessions.get_mut(&id)
    }

    /// Close and forget a session. Returns whether it existed.
    pub fn delete_session(&mut self, id: SessionId) -> bool {
        if self.context.is_shutting_down() {
            return false;
        }
        self.sessions.remove(&id).is_some()
    }

    pub fn create_playlist(&mut self) -> PlaylistId {
        let playlist = Playlist::new(Arc::clone(&self.context));
        let id = playlist.id();
        self.playlists.insert(id, playlist);
        id
    }

    pub fn playlist(&self, id: PlaylistId) -> Option<&Playlist> {
        self.playlists.get(&id)
    }

    pub fn playlist_mut(&mut self, id: PlaylistId) -> Option<&mut Playlist> {
        self.playlists.get_mut(&id)
    }

    pub fn delete_playlist(&mut self, id: PlaylistId) -> bool {
        if self.context.is_shutting_down() {
            return false;
        }
        self.playlists.remove(&id).is_some()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn playlist_count(&self) -> usize {
        self.playlists.len()
    }

    /// Tick every standalone session, then every playlist.
    pub fn advance_all(&mut self, dt: f32) {
        if self.context.is_shutting_down() {
            return;
        }
        for session in self.sessions.values_mut() {
            session.advance(dt);
        }
        for playlist in self.playlists.values_mut() {
            playlist.advance(dt);
        }
    }

    /// True while any active session or playlist asks the host to suspend its loop.
    pub fn is_host_blocked(&self) -> bool {
        self.sessions.values().any(PlaybackSession::blocks_host)
            || self.playlists.values().any(Playlist::blocks_host)
    }

    pub fn shutdown(&mut self) {
        self.context.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use crate::decode::container::testutil::WebmBuilder;
    use crate::playback::flags::TimeSource;
    use crate::playback::session::SessionOptions;
    use crate::render::resources::ResourceUpdate;

    fn system() -> PlaybackSystem {
        let _ = env_logger::builder().is_test(true).try_init();
        PlaybackSystem::new(PlaybackConfig::default())
    }

    fn open_session(system: &mut PlaybackSystem, options: SessionOptions) -> SessionId {
        let id = system.create_session();
        let bytes = WebmBuilder::new(8, 8).frames(20, 40).build();
        system
            .session_mut(id)
            .unwrap()
            .open_reader(Box::new(Cursor::new(bytes)), options)
            .unwrap();
        id
    }

    fn updates(system: &PlaybackSystem) -> Vec<ResourceUpdate> {
        let mut updates = Vec::new();
        system.context().resources().drain(|u| updates.push(u));
        updates
    }

    #[test]
    fn test_ids_are_unique() {
        let mut system = system();
        let a = system.create_session();
        let b = system.create_session();
        let p = system.create_playlist();
        assert_ne!(a, b);
        assert_ne!(a.0, p.0);
        assert_ne!(b.0, p.0);
        assert_eq!((system.session_count(), system.playlist_count()), (2, 1));
    }

    #[test]
    fn test_advance_all_drives_sessions() {
        let mut system = system();
        let options = SessionOptions {
            time_source: TimeSource::GAME_TIME,
            ..SessionOptions::default()
        };
        let id = open_session(&mut system, options);
        system.session_mut(id).unwrap().resume();
        for _ in 0..5 {
            system.advance_all(0.04);
        }
        assert!(system.session(id).unwrap().position().unwrap() > 0.0);

        let updates = updates(&system);
        assert!(matches!(updates[0], ResourceUpdate::Create { width: 8, height: 8, .. }));
        assert!(updates.iter().any(|u| matches!(u, ResourceUpdate::Upload { .. })));
    }

    #[test]
    fn test_delete_releases_resource() {
        let mut system = system();
        let id = open_session(&mut system, SessionOptions::default());
        updates(&system);
        assert!(system.delete_session(id));
        assert!(!system.delete_session(id));
        assert!(matches!(updates(&system).as_slice(), [ResourceUpdate::Destroy(_)]));
        assert_eq!(system.context().resources().live_count(), 0);
    }

    #[test]
    fn test_host_blocking() {
        let mut system = system();
        let blocking = SessionOptions {
            blocks_host: true,
            ..SessionOptions::default()
        };
        let id = open_session(&mut system, blocking);
        open_session(&mut system, SessionOptions::default());
        assert!(system.is_host_blocked());
        system.session_mut(id).unwrap().close();
        assert!(!system.is_host_blocked());
    }

    #[test]
    fn test_shutdown_freezes_everything() {
        let mut system = system();
        let options = SessionOptions {
            time_source: TimeSource::GAME_TIME,
            ..SessionOptions::default()
        };
        let id = open_session(&mut system, options);
        system.session_mut(id).unwrap().resume();
        system.shutdown();
        system.advance_all(0.04);
        assert_eq!(system.session(id).unwrap().frame_source().frames_decoded(), 0);
        assert!(!system.delete_session(id));
        assert!(system.context().resources().is_closed());
    }

    #[test]
    fn test_editor_playback_needs_keep_playing() {
        let context = PlaybackContext::new(PlaybackConfig::default());
        context.set_editing(true);
        assert!(context.is_editing());
        assert!(!context.editor_playback());
    }
}
