//! Render resources pending creation, upload and destruction.
//!
//! Sessions enqueue from the tick thread; the renderer drains from its own
//! thread. This queue is the only state shared between the two.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use log::debug;
use parking_lot::Mutex;
use crate::decode::frame::PlanarImage;
use crate::render::renderer::{validate_frame, FrameSink, RenderError};

pub type ResourceId = u32;

/// One change the renderer has to apply.
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceUpdate {
    Create { id: ResourceId, width: u32, height: u32 },
    Upload { id: ResourceId, image: PlanarImage },
    Destroy(ResourceId),
}

#[derive(Default)]
struct Pending {
    next_id: ResourceId,
    live: BTreeMap<ResourceId, (u32, u32)>,
    creates: Vec<ResourceId>,
    /// Only the newest image per resource survives until the next drain
    uploads: BTreeMap<ResourceId, PlanarImage>,
    destroys: Vec<ResourceId>,
}

/// Mutex-protected queue between sessions and the renderer.
#[derive(Default)]
pub struct ResourceQueue {
    pending: Mutex<Pending>,
    closed: AtomicBool,
}

impl ResourceQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a resource of the given size; creation happens on the next drain.
    pub fn create(&self, width: u32, height: u32) -> ResourceId {
        let mut pending = self.pending.lock();
        pending.next_id += 1;
        let id = pending.next_id;
        pending.live.insert(id, (width, height));
        pending.creates.push(id);
        id
    }

    /// Queue `image` for upload, replacing any upload not yet drained.
    pub fn submit(&self, id: ResourceId, image: PlanarImage) -> Result<(), RenderError> {
        if self.is_closed() {
            return Ok(());
        }
        let mut pending = self.pending.lock();
        if !pending.live.contains_key(&id) {
            return Err(RenderError::Released(id));
        }
        pending.uploads.insert(id, image);
        Ok(())
    }

    /// Schedule destruction. A resource the renderer never saw is simply forgotten.
    pub fn release(&self, id: ResourceId) {
        if self.is_closed() {
            return;
        }
        let mut pending = self.pending.lock();
        if pending.live.remove(&id).is_none() {
            return;
        }
        pending.uploads.remove(&id);
        if let Some(index) = pending.creates.iter().position(|c| *c == id) {
            pending.creates.remove(index);
        } else {
            pending.destroys.push(id);
        }
    }

    /// Apply every pending change: creates, then latest uploads, then destroys.
    /// Returns how many updates were handed out.
    pub fn drain<F: FnMut(ResourceUpdate)>(&self, mut apply: F) -> usize {
        let (creates, uploads, destroys) = {
            let mut pending = self.pending.lock();
            let creates: Vec<_> = std::mem::take(&mut pending.creates)
                .into_iter()
                .filter_map(|id| pending.live.get(&id).map(|&(width, height)| (id, width, height)))
                .collect();
            (
                creates,
                std::mem::take(&mut pending.uploads),
                std::mem::take(&mut pending.destroys),
            )
        };

        let count = creates.len() + uploads.len() + destroys.len();
        for (id, width, height) in creates {
            apply(ResourceUpdate::Create { id, width, height });
        }
        for (id, image) in uploads {
            apply(ResourceUpdate::Upload { id, image });
        }
        for id in destroys {
            apply(ResourceUpdate::Destroy(id));
        }
        count
    }

    pub fn live_count(&self) -> usize {
        self.pending.lock().live.len()
    }

    /// Stop accepting work; later submits and releases are ignored.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// [`FrameSink`] that forwards a session's frames into a [`ResourceQueue`].
pub struct QueuedFrameSink {
    queue: Arc<ResourceQueue>,
    id: ResourceId,
}

impl QueuedFrameSink {
    pub fn new(queue: Arc<ResourceQueue>, width: u32, height: u32) -> Self {
        let id = queue.create(width, height);
        debug!("Render resource {} created ({}x{})", id, width, height);
        Self { queue, id }
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }
}

impl FrameSink for QueuedFrameSink {
    fn upload_frame(&mut self, image: &PlanarImage) -> Result<(), RenderError> {
        validate_frame(image)?;
        self.queue.submit(self.id, image.clone())
    }
}

impl Drop for QueuedFrameSink {
    fn drop(&mut self) {
        self.queue.release(self.id);
    }
}
