use super::StreamInfo;
use std::sync::Arc;
use tokio::sync::watch;

/// One video surface binding. The presentation layer watches it and renders
/// whatever stream is bound.
#[derive(Debug, Clone)]
pub struct VideoSurface {
    binding: Arc<watch::Sender<Option<StreamInfo>>>,
}

impl VideoSurface {
    pub fn new() -> Self {
        Self {
            binding: Arc::new(watch::Sender::new(None)),
        }
    }

    pub fn bind(&self, stream: StreamInfo) {
        self.binding.send_replace(Some(stream));
    }

    pub fn clear(&self) {
        self.binding.send_if_modified(|current| current.take().is_some());
    }

    pub fn current(&self) -> Option<StreamInfo> {
        self.binding.borrow().clone()
    }

    pub fn is_bound(&self) -> bool {
        self.binding.borrow().is_some()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<StreamInfo>> {
        self.binding.subscribe()
    }
}

impl Default for VideoSurface {
    fn default() -> Self {
        Self::new()
    }
}

/// Receivers for both surfaces, handed to the presentation layer.
#[derive(Debug, Clone)]
pub struct SurfaceWatch {
    pub local: watch::Receiver<Option<StreamInfo>>,
    pub remote: watch::Receiver<Option<StreamInfo>>,
}

#[derive(Debug, Clone, Default)]
pub struct MediaSurfaces {
    pub local: VideoSurface,
    pub remote: VideoSurface,
}

impl MediaSurfaces {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&self) {
        self.local.clear();
        self.remote.clear();
    }

    /// Number of surfaces currently showing a stream.
    pub fn active_count(&self) -> usize {
        [&self.local, &self.remote]
            .iter()
            .filter(|s| s.is_bound())
            .count()
    }

    pub fn watch(&self) -> SurfaceWatch {
        SurfaceWatch {
            local: self.local.subscribe(),
            remote: self.remote.subscribe(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calls::media::{TrackInfo, TrackKind};

    fn stream(id: &str) -> StreamInfo {
        StreamInfo {
            id: id.to_string(),
            tracks: vec![TrackInfo {
                id: format!("{id}-video"),
                kind: TrackKind::Video,
            }],
        }
    }

    #[test]
    fn test_bind_and_clear() {
        let surfaces = MediaSurfaces::new();
        let watch = surfaces.watch();
        surfaces.local.bind(stream("local"));
        surfaces.remote.bind(stream("remote"));
        assert_eq!(surfaces.active_count(), 2);
        assert_eq!(watch.remote.borrow().as_ref().map(|s| s.id.as_str()), Some("remote"));

        surfaces.clear();
        assert_eq!(surfaces.active_count(), 0);
        assert!(watch.local.borrow().is_none());
    }

    #[tokio::test]
    async fn test_clearing_empty_surface_does_not_notify() {
        let surface = VideoSurface::new();
        let mut rx = surface.subscribe();
        surface.clear();
        assert!(!rx.has_changed().unwrap());
        surface.bind(stream("s"));
        assert!(rx.has_changed().unwrap());
        rx.mark_unchanged();
        surface.clear();
        assert!(rx.has_changed().unwrap());
    }
}
