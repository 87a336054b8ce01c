//! Scoped ownership of driver resources.
//!
//! Each `Acquired` undoes exactly one driver acquisition when dropped, so an
//! early return anywhere in negotiation unwinds everything acquired so far
//! in reverse order.

use std::sync::Arc;

use tracing::debug;

use super::api::{DeckLinkApi, InterfaceHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resource {
    /// A driver reference; released.
    Interface,
    /// A registered input callback; unregistered.
    Callback,
    /// An enabled video input; disabled.
    VideoInput,
    /// Running streams; stopped.
    Streams,
}

pub(crate) struct Acquired<A: DeckLinkApi + ?Sized> {
    api: Arc<A>,
    handle: InterfaceHandle,
    resource: Resource,
}

impl<A: DeckLinkApi + ?Sized> Acquired<A> {
    pub(crate) fn interface(api: &Arc<A>, handle: InterfaceHandle) -> Self {
        Self::new(api, handle, Resource::Interface)
    }

    pub(crate) fn callback(api: &Arc<A>, input: InterfaceHandle) -> Self {
        Self::new(api, input, Resource::Callback)
    }

    pub(crate) fn video_input(api: &Arc<A>, input: InterfaceHandle) -> Self {
        Self::new(api, input, Resource::VideoInput)
    }

    pub(crate) fn streams(api: &Arc<A>, input: InterfaceHandle) -> Self {
        Self::new(api, input, Resource::Streams)
    }

    fn new(api: &Arc<A>, handle: InterfaceHandle, resource: Resource) -> Self {
        Self {
            api: Arc::clone(api),
            handle,
            resource,
        }
    }

    pub(crate) fn handle(&self) -> InterfaceHandle {
        self.handle
    }
}

impl<A: DeckLinkApi + ?Sized> Drop for Acquired<A> {
    fn drop(&mut self) {
        let result = match self.resource {
            Resource::Interface => {
                self.api.release(self.handle);
                Ok(())
            }
            Resource::Callback => self.api.set_callback(self.handle, None),
            Resource::VideoInput => self.api.disable_video_input(self.handle),
            Resource::Streams => self.api.stop_streams(self.handle),
        };
        if let Err(e) = result {
            debug!(
                "Undoing {:?} on {:?} failed: {e}",
                self.resource, self.handle
            );
        }
    }
}
